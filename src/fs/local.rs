use std::{
    io,
    path::{Path, PathBuf},
};

use futures_util::future::BoxFuture;
use tokio::fs::{self, create_dir_all, remove_dir_all, remove_file, File};

use super::{FileInfo, FileKind, FileSelector, FileSystem, InputFile, OutputFile};
use crate::error::{DatasetError, Result};

/// Filesystem rooted at a local directory, driven by `tokio::fs`.
#[derive(Clone, Debug)]
pub struct LocalFileSystem {
    root: PathBuf,
}

impl LocalFileSystem {
    /// Filesystem whose relative paths resolve under `root`.
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    fn resolve(&self, path: &str) -> PathBuf {
        let relative = path.trim_start_matches('/');
        if relative.is_empty() {
            self.root.clone()
        } else {
            self.root.join(relative)
        }
    }

    async fn walk(&self, base: &str, recursive: bool) -> io::Result<Vec<FileInfo>> {
        let mut pending = vec![base.trim_matches('/').to_string()];
        let mut listing = Vec::new();
        while let Some(dir) = pending.pop() {
            let mut entries = fs::read_dir(self.resolve(&dir)).await?;
            while let Some(entry) = entries.next_entry().await? {
                let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                    continue;
                };
                let path = super::join_path(&dir, &name);
                let metadata = entry.metadata().await?;
                if metadata.is_dir() {
                    if recursive {
                        pending.push(path.clone());
                    }
                    listing.push(FileInfo::dir(path));
                } else {
                    listing.push(FileInfo {
                        path,
                        kind: FileKind::File,
                        size: Some(metadata.len()),
                    });
                }
            }
        }
        listing.sort_by(|lhs, rhs| lhs.path.cmp(&rhs.path));
        Ok(listing)
    }
}

fn not_found(path: &str, err: io::Error) -> DatasetError {
    if err.kind() == io::ErrorKind::NotFound {
        DatasetError::NotFound(path.to_string())
    } else {
        DatasetError::Io(err)
    }
}

impl FileSystem for LocalFileSystem {
    fn type_name(&self) -> &'static str {
        "local"
    }

    fn list<'a>(&'a self, selector: &'a FileSelector) -> BoxFuture<'a, Result<Vec<FileInfo>>> {
        Box::pin(async move {
            match self.walk(&selector.base_dir, selector.recursive).await {
                Ok(listing) => Ok(listing),
                Err(err) if err.kind() == io::ErrorKind::NotFound && selector.allow_not_found => {
                    Ok(Vec::new())
                }
                Err(err) => Err(not_found(&selector.base_dir, err)),
            }
        })
    }

    fn open_input<'a>(&'a self, path: &'a str) -> BoxFuture<'a, Result<InputFile>> {
        Box::pin(async move {
            let file = File::open(self.resolve(path))
                .await
                .map_err(|err| not_found(path, err))?;
            let input: InputFile = Box::new(file);
            Ok(input)
        })
    }

    fn open_output<'a>(&'a self, path: &'a str) -> BoxFuture<'a, Result<OutputFile>> {
        Box::pin(async move {
            let file = File::create(self.resolve(path)).await?;
            let output: OutputFile = Box::new(file);
            Ok(output)
        })
    }

    fn create_dir<'a>(&'a self, path: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            create_dir_all(self.resolve(path)).await?;
            Ok(())
        })
    }

    fn delete_dir_contents<'a>(&'a self, path: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let mut entries = fs::read_dir(self.resolve(path))
                .await
                .map_err(|err| not_found(path, err))?;
            while let Some(entry) = entries.next_entry().await? {
                if entry.file_type().await?.is_dir() {
                    remove_dir_all(entry.path()).await?;
                } else {
                    remove_file(entry.path()).await?;
                }
            }
            Ok(())
        })
    }

    fn exists<'a>(&'a self, path: &'a str) -> BoxFuture<'a, Result<bool>> {
        Box::pin(async move {
            match fs::metadata(self.resolve(path)).await {
                Ok(_) => Ok(true),
                Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
                Err(err) => Err(DatasetError::Io(err)),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::AsyncWriteExt;

    use super::*;

    #[tokio::test(flavor = "multi_thread")]
    async fn local_round_trip_and_listing() {
        let dir = tempfile::tempdir().unwrap();
        let fs = LocalFileSystem::new(dir.path());

        fs.create_dir("root/state=CA").await.unwrap();
        let mut output = fs.open_output("root/state=CA/0.parquet").await.unwrap();
        output.write_all(b"PAR1").await.unwrap();
        output.shutdown().await.unwrap();

        let listing = fs.list(&FileSelector::recursive("root")).await.unwrap();
        let paths: Vec<_> = listing.iter().map(|info| info.path.as_str()).collect();
        assert_eq!(paths, vec!["root/state=CA", "root/state=CA/0.parquet"]);
        assert_eq!(listing[1].size, Some(4));

        assert!(fs.exists("root/state=CA/0.parquet").await.unwrap());
        fs.delete_dir_contents("root").await.unwrap();
        assert!(!fs.exists("root/state=CA").await.unwrap());
        assert!(fs.exists("root").await.unwrap());

        let missing = fs.open_input("root/nothing").await.err().unwrap();
        assert!(matches!(missing, DatasetError::NotFound(_)));
    }
}

use std::{
    collections::BTreeMap,
    io::{self, Cursor},
    pin::Pin,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    task::{Context, Poll},
};

use bytes::Bytes;
use futures_util::future::BoxFuture;
use tokio::io::AsyncWrite;

use super::{join_path, FileInfo, FileKind, FileSelector, FileSystem, InputFile, OutputFile};
use crate::error::{DatasetError, Result};

#[derive(Clone, Debug)]
enum Entry {
    Directory,
    File(Bytes),
}

type Entries = Arc<Mutex<BTreeMap<String, Entry>>>;

fn lock(entries: &Entries) -> MutexGuard<'_, BTreeMap<String, Entry>> {
    entries.lock().unwrap_or_else(PoisonError::into_inner)
}

fn normalize(path: &str) -> String {
    path.trim_matches('/').to_string()
}

fn insert_parents(entries: &mut BTreeMap<String, Entry>, path: &str) {
    let mut current = String::new();
    let segments: Vec<&str> = path.split('/').collect();
    for segment in &segments[..segments.len().saturating_sub(1)] {
        current = join_path(&current, segment);
        entries.entry(current.clone()).or_insert(Entry::Directory);
    }
}

/// Filesystem held entirely in process memory.
///
/// Files become visible when their output handle is shut down.
#[derive(Clone, Debug, Default)]
pub struct MemoryFileSystem {
    entries: Entries,
}

impl MemoryFileSystem {
    /// Empty filesystem.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `data` at `path`, creating parent directories.
    pub fn put(&self, path: &str, data: impl Into<Bytes>) {
        let path = normalize(path);
        let mut entries = lock(&self.entries);
        insert_parents(&mut entries, &path);
        entries.insert(path, Entry::File(data.into()));
    }

    /// Contents of the file at `path`.
    pub fn get(&self, path: &str) -> Option<Bytes> {
        match lock(&self.entries).get(&normalize(path)) {
            Some(Entry::File(data)) => Some(data.clone()),
            _ => None,
        }
    }

    /// Paths of all stored files in sorted order.
    pub fn file_paths(&self) -> Vec<String> {
        lock(&self.entries)
            .iter()
            .filter(|(_, entry)| matches!(entry, Entry::File(_)))
            .map(|(path, _)| path.clone())
            .collect()
    }
}

impl FileSystem for MemoryFileSystem {
    fn type_name(&self) -> &'static str {
        "memory"
    }

    fn list<'a>(&'a self, selector: &'a FileSelector) -> BoxFuture<'a, Result<Vec<FileInfo>>> {
        Box::pin(async move {
            let base = normalize(&selector.base_dir);
            let entries = lock(&self.entries);
            if !base.is_empty() && !matches!(entries.get(&base), Some(Entry::Directory)) {
                return if selector.allow_not_found {
                    Ok(Vec::new())
                } else {
                    Err(DatasetError::NotFound(base))
                };
            }
            let base_depth = if base.is_empty() {
                0
            } else {
                base.split('/').count()
            };
            let prefix = if base.is_empty() {
                String::new()
            } else {
                format!("{base}/")
            };
            let listing = entries
                .iter()
                .filter(|(path, _)| path.starts_with(&prefix) && path.len() > prefix.len())
                .filter(|(path, _)| {
                    selector.recursive || path.split('/').count() == base_depth + 1
                })
                .map(|(path, entry)| match entry {
                    Entry::Directory => FileInfo::dir(path.clone()),
                    Entry::File(data) => FileInfo {
                        path: path.clone(),
                        kind: FileKind::File,
                        size: Some(data.len() as u64),
                    },
                })
                .collect();
            Ok(listing)
        })
    }

    fn open_input<'a>(&'a self, path: &'a str) -> BoxFuture<'a, Result<InputFile>> {
        Box::pin(async move {
            let data = self
                .get(path)
                .ok_or_else(|| DatasetError::NotFound(path.to_string()))?;
            let input: InputFile = Box::new(Cursor::new(data));
            Ok(input)
        })
    }

    fn open_output<'a>(&'a self, path: &'a str) -> BoxFuture<'a, Result<OutputFile>> {
        Box::pin(async move {
            let path = normalize(path);
            if matches!(lock(&self.entries).get(&path), Some(Entry::Directory)) {
                return Err(DatasetError::Io(io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    format!("`{path}` is a directory"),
                )));
            }
            let output: OutputFile = Box::new(MemoryOutput {
                path,
                buffer: Vec::new(),
                entries: self.entries.clone(),
            });
            Ok(output)
        })
    }

    fn create_dir<'a>(&'a self, path: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let path = normalize(path);
            if path.is_empty() {
                return Ok(());
            }
            let mut entries = lock(&self.entries);
            insert_parents(&mut entries, &path);
            entries.entry(path).or_insert(Entry::Directory);
            Ok(())
        })
    }

    fn delete_dir_contents<'a>(&'a self, path: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let path = normalize(path);
            let prefix = if path.is_empty() {
                String::new()
            } else {
                format!("{path}/")
            };
            lock(&self.entries).retain(|entry, _| !entry.starts_with(&prefix) || entry == &path);
            Ok(())
        })
    }

    fn exists<'a>(&'a self, path: &'a str) -> BoxFuture<'a, Result<bool>> {
        Box::pin(async move {
            let path = normalize(path);
            Ok(path.is_empty() || lock(&self.entries).contains_key(&path))
        })
    }
}

struct MemoryOutput {
    path: String,
    buffer: Vec<u8>,
    entries: Entries,
}

impl AsyncWrite for MemoryOutput {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.get_mut().buffer.extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let data = Bytes::from(std::mem::take(&mut this.buffer));
        let mut entries = lock(&this.entries);
        insert_parents(&mut entries, &this.path);
        entries.insert(this.path.clone(), Entry::File(data));
        Poll::Ready(Ok(()))
    }
}

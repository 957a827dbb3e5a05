//! Filesystem abstraction and byte sources.
//!
//! Paths are `/`-separated and relative to the filesystem root. The crate ships
//! a tokio-backed [`LocalFileSystem`] and an in-process [`MemoryFileSystem`].

#[cfg(feature = "tokio")]
mod local;
mod memory;

use std::{fmt, io::Cursor, sync::Arc};

use bytes::Bytes;
use futures_util::future::BoxFuture;
#[cfg(feature = "tokio")]
pub use local::LocalFileSystem;
pub use memory::MemoryFileSystem;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeek, AsyncWrite};

use crate::error::Result;

/// Readable, seekable handle returned by [`FileSystem::open_input`].
pub trait AsyncInput: AsyncRead + AsyncSeek + Unpin + Send {}

impl<T> AsyncInput for T where T: AsyncRead + AsyncSeek + Unpin + Send {}

/// Owned input handle.
pub type InputFile = Box<dyn AsyncInput>;

/// Owned output handle; contents are committed on shutdown.
pub type OutputFile = Box<dyn AsyncWrite + Unpin + Send>;

/// Kind of a listed entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FileKind {
    /// Regular file.
    File,
    /// Directory.
    Directory,
}

/// One entry of a filesystem listing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileInfo {
    /// Path relative to the filesystem root.
    pub path: String,
    /// Entry kind.
    pub kind: FileKind,
    /// Size in bytes, when known.
    pub size: Option<u64>,
}

impl FileInfo {
    /// Regular file entry.
    pub fn file(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            kind: FileKind::File,
            size: None,
        }
    }

    /// Directory entry.
    pub fn dir(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            kind: FileKind::Directory,
            size: None,
        }
    }

    /// True for regular files.
    pub fn is_file(&self) -> bool {
        self.kind == FileKind::File
    }

    /// Final path segment.
    pub fn base_name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }
}

/// Listing request for [`FileSystem::list`].
#[derive(Clone, Debug, Default)]
pub struct FileSelector {
    /// Directory to list.
    pub base_dir: String,
    /// Descend into subdirectories.
    pub recursive: bool,
    /// Return an empty listing instead of failing when `base_dir` is missing.
    pub allow_not_found: bool,
}

impl FileSelector {
    /// Recursive selector rooted at `base_dir`.
    pub fn recursive(base_dir: impl Into<String>) -> Self {
        Self {
            base_dir: base_dir.into(),
            recursive: true,
            allow_not_found: false,
        }
    }
}

/// Storage client used for discovery, scanning, and writing.
pub trait FileSystem: fmt::Debug + Send + Sync + 'static {
    /// Short identifier used in logs.
    fn type_name(&self) -> &'static str;

    /// Lists entries under the selector's base directory, sorted by path.
    fn list<'a>(&'a self, selector: &'a FileSelector) -> BoxFuture<'a, Result<Vec<FileInfo>>>;

    /// Opens a file for reading.
    fn open_input<'a>(&'a self, path: &'a str) -> BoxFuture<'a, Result<InputFile>>;

    /// Creates or truncates a file for writing.
    fn open_output<'a>(&'a self, path: &'a str) -> BoxFuture<'a, Result<OutputFile>>;

    /// Creates a directory and any missing parents.
    fn create_dir<'a>(&'a self, path: &'a str) -> BoxFuture<'a, Result<()>>;

    /// Removes everything below `path`, keeping the directory itself.
    fn delete_dir_contents<'a>(&'a self, path: &'a str) -> BoxFuture<'a, Result<()>>;

    /// Whether a file or directory exists at `path`.
    fn exists<'a>(&'a self, path: &'a str) -> BoxFuture<'a, Result<bool>>;
}

/// Compression codec tag carried by a [`FileSource`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Compression {
    /// Raw bytes.
    #[default]
    Uncompressed,
    /// gzip stream.
    Gzip,
    /// LZ4 frame.
    Lz4,
    /// Zstandard frame.
    Zstd,
    /// Snappy stream.
    Snappy,
}

#[derive(Clone)]
enum Location {
    Path {
        path: String,
        filesystem: Arc<dyn FileSystem>,
    },
    Buffer(Bytes),
}

/// Identity of a file to read: a path on a filesystem or an in-memory buffer.
#[derive(Clone)]
pub struct FileSource {
    location: Location,
    compression: Compression,
}

impl FileSource {
    /// Source backed by `path` on `filesystem`.
    pub fn from_path(path: impl Into<String>, filesystem: Arc<dyn FileSystem>) -> Self {
        Self {
            location: Location::Path {
                path: path.into(),
                filesystem,
            },
            compression: Compression::Uncompressed,
        }
    }

    /// Source backed by an in-memory buffer.
    pub fn from_buffer(buffer: impl Into<Bytes>) -> Self {
        Self {
            location: Location::Buffer(buffer.into()),
            compression: Compression::Uncompressed,
        }
    }

    /// Tags the source with a compression codec.
    #[must_use]
    pub fn with_compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    /// Path of a filesystem-backed source.
    pub fn path(&self) -> Option<&str> {
        match &self.location {
            Location::Path { path, .. } => Some(path),
            Location::Buffer(_) => None,
        }
    }

    /// Filesystem of a path-backed source.
    pub fn filesystem(&self) -> Option<&Arc<dyn FileSystem>> {
        match &self.location {
            Location::Path { filesystem, .. } => Some(filesystem),
            Location::Buffer(_) => None,
        }
    }

    /// Contents of a buffer-backed source.
    pub fn buffer(&self) -> Option<&Bytes> {
        match &self.location {
            Location::Buffer(buffer) => Some(buffer),
            Location::Path { .. } => None,
        }
    }

    /// Compression tag.
    pub fn compression(&self) -> Compression {
        self.compression
    }

    /// Opens the source for reading.
    pub async fn open(&self) -> Result<InputFile> {
        match &self.location {
            Location::Path { path, filesystem } => filesystem.open_input(path).await,
            Location::Buffer(buffer) => Ok(Box::new(Cursor::new(buffer.clone()))),
        }
    }

    /// Reads the whole source into memory.
    pub async fn read_all(&self) -> Result<Bytes> {
        match &self.location {
            Location::Buffer(buffer) => Ok(buffer.clone()),
            Location::Path { .. } => {
                let mut input = self.open().await?;
                let mut data = Vec::new();
                input.read_to_end(&mut data).await?;
                Ok(Bytes::from(data))
            }
        }
    }
}

impl fmt::Display for FileSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.location {
            Location::Path { path, .. } => f.write_str(path),
            Location::Buffer(buffer) => write!(f, "<buffer of {} bytes>", buffer.len()),
        }
    }
}

impl fmt::Debug for FileSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileSource")
            .field("location", &self.to_string())
            .field("compression", &self.compression)
            .finish()
    }
}

/// Joins two `/`-separated path fragments.
pub fn join_path(base: &str, child: &str) -> String {
    let base = base.trim_end_matches('/');
    let child = child.trim_start_matches('/');
    match (base.is_empty(), child.is_empty()) {
        (true, _) => child.to_string(),
        (_, true) => base.to_string(),
        _ => format!("{base}/{child}"),
    }
}

/// Path segments of `path` below `base`, or `None` when `path` is outside `base`.
pub(crate) fn relative_segments<'a>(base: &str, path: &'a str) -> Option<Vec<&'a str>> {
    let base = base.trim_matches('/');
    let path = path.trim_start_matches('/');
    let rest = if base.is_empty() {
        path
    } else {
        let rest = path.strip_prefix(base)?;
        if rest.is_empty() {
            rest
        } else {
            rest.strip_prefix('/')?
        }
    };
    Some(rest.split('/').filter(|segment| !segment.is_empty()).collect())
}

//! Range-readable byte sources.
//!
//! Both the container parsers and the chunk uploader only ever need "give me
//! `length` bytes starting at `offset`" from a package of known size. The
//! [`ByteSource`] trait captures exactly that, with a file-backed and an
//! in-memory implementation.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::Mutex;

use crate::error::Result;

/// A byte container of known total length supporting arbitrary-offset reads.
///
/// Reads that run past the end are clamped to the end of the source, so the
/// returned buffer may be shorter than `length` (and empty when `offset` is
/// at or beyond [`size`](Self::size)). Callers that need an exact range must
/// validate it against `size()` first.
#[async_trait]
pub trait ByteSource: Send + Sync {
    /// Total length of the source in bytes.
    fn size(&self) -> u64;

    /// Read up to `length` bytes starting at `offset`.
    async fn read_range(&self, offset: u64, length: u64) -> Result<Bytes>;
}

/// Clamp a requested range to a source of `size` bytes, returning the number
/// of bytes that can actually be read.
fn clamped_len(size: u64, offset: u64, length: u64) -> u64 {
    if offset >= size {
        0
    } else {
        length.min(size - offset)
    }
}

/// A [`ByteSource`] backed by a file on disk.
///
/// The file handle is shared behind an async mutex, so concurrent range reads
/// are serialized (each read is a seek followed by an exact read).
pub struct FileSource {
    path: PathBuf,
    size: u64,
    file: Mutex<File>,
}

impl FileSource {
    /// Open a file and record its current length.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).await?;
        let size = file.metadata().await?.len();

        Ok(Self {
            path,
            size,
            file: Mutex::new(file),
        })
    }

    /// Path the source was opened from.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl std::fmt::Debug for FileSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileSource")
            .field("path", &self.path)
            .field("size", &self.size)
            .finish()
    }
}

#[async_trait]
impl ByteSource for FileSource {
    fn size(&self) -> u64 {
        self.size
    }

    async fn read_range(&self, offset: u64, length: u64) -> Result<Bytes> {
        let len = clamped_len(self.size, offset, length);
        if len == 0 {
            return Ok(Bytes::new());
        }

        let mut buf = vec![0u8; len as usize];
        let mut file = self.file.lock().await;
        file.seek(SeekFrom::Start(offset)).await?;
        file.read_exact(&mut buf).await?;

        Ok(Bytes::from(buf))
    }
}

/// A [`ByteSource`] over an in-memory buffer.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    data: Bytes,
}

impl MemorySource {
    /// Wrap a buffer.
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self { data: data.into() }
    }
}

#[async_trait]
impl ByteSource for MemorySource {
    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    async fn read_range(&self, offset: u64, length: u64) -> Result<Bytes> {
        let len = clamped_len(self.size(), offset, length);
        if len == 0 {
            return Ok(Bytes::new());
        }
        let start = offset as usize;
        Ok(self.data.slice(start..start + len as usize))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn test_memory_source_reads_range() {
        let source = MemorySource::new(b"0123456789".to_vec());
        assert_eq!(source.size(), 10);
        assert_eq!(&source.read_range(2, 3).await.unwrap()[..], b"234");
    }

    #[tokio::test]
    async fn test_memory_source_clamps_past_end() {
        let source = MemorySource::new(b"0123456789".to_vec());
        assert_eq!(&source.read_range(8, 10).await.unwrap()[..], b"89");
        assert!(source.read_range(10, 4).await.unwrap().is_empty());
        assert!(source.read_range(100, 4).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_file_source_reads_range() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"hello package world").unwrap();
        file.flush().unwrap();

        let source = FileSource::open(file.path()).await.unwrap();
        assert_eq!(source.size(), 19);
        assert_eq!(source.path(), file.path());
        assert_eq!(&source.read_range(6, 7).await.unwrap()[..], b"package");
        assert_eq!(&source.read_range(14, 100).await.unwrap()[..], b"world");
    }

    #[tokio::test]
    async fn test_file_source_missing_file() {
        let result = FileSource::open("/nonexistent/package.pkg").await;
        assert!(matches!(result, Err(crate::Error::Io(_))));
    }
}

//! Persisting extracted icons.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use pkgferry_common::{Error, Result};
use tracing::debug;

/// Stores a blob somewhere addressable and returns its reference (a path or
/// a URL, depending on the implementation).
#[async_trait]
pub trait TempFileStore: Send + Sync {
    async fn store(&self, data: Bytes) -> Result<String>;
}

/// Writes each blob to a uniquely named `icon-*.png` file in a directory.
///
/// Files are kept after the store is dropped.
#[derive(Debug, Clone)]
pub struct DirTempStore {
    dir: PathBuf,
}

impl DirTempStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[async_trait]
impl TempFileStore for DirTempStore {
    async fn store(&self, data: Bytes) -> Result<String> {
        let dir = self.dir.clone();
        let path = tokio::task::spawn_blocking(move || -> Result<PathBuf> {
            std::fs::create_dir_all(&dir)?;
            let mut file = tempfile::Builder::new()
                .prefix("icon-")
                .suffix(".png")
                .tempfile_in(&dir)?;
            std::io::Write::write_all(&mut file, &data)?;
            let (_, path) = file.keep().map_err(|e| Error::Io(e.error))?;
            Ok(path)
        })
        .await
        .map_err(|e| Error::internal(format!("icon store task failed: {e}")))??;

        debug!(path = %path.display(), "Stored icon");
        Ok(path.to_string_lossy().into_owned())
    }
}

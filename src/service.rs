//! Package upload orchestration: metadata first, then the session, then the
//! chunk loop.

use std::sync::Arc;

use pkgferry_common::{ByteSource, Result};
use pkgferry_pkg::{extract_metadata, PackageMetadata, TempFileStore};
use pkgferry_upload::{
    InitSession, InstallerApi, UploadCoordinator, UploadHandle, UploadObserver, UploadSettings,
};
use tracing::{debug, info, warn};

use crate::client::HttpInstaller;
use crate::config::Config;

/// Moves packages to one installer.
pub struct PackageUploader {
    api: Arc<dyn InstallerApi>,
    store: Arc<dyn TempFileStore>,
    coordinator: UploadCoordinator,
}

impl PackageUploader {
    pub fn new(
        api: Arc<dyn InstallerApi>,
        store: Arc<dyn TempFileStore>,
        settings: UploadSettings,
    ) -> Self {
        let coordinator = UploadCoordinator::new(Arc::clone(&api), settings);
        Self {
            api,
            store,
            coordinator,
        }
    }

    /// An uploader talking HTTP to the configured installer, which also
    /// stores the icons.
    pub fn from_config(config: &Config) -> Self {
        let installer = Arc::new(HttpInstaller::new(&config.server));
        Self::new(installer.clone(), installer, config.upload.clone())
    }

    /// Extract the package metadata, storing the icon through this
    /// uploader's temp-file store.
    pub async fn extract_metadata_from_file(
        &self,
        source: &dyn ByteSource,
    ) -> Result<PackageMetadata> {
        extract_metadata(source, self.store.as_ref()).await
    }

    /// Extract metadata, open a session with it, and start uploading.
    ///
    /// Extraction failures are returned before anything is sent to the
    /// installer; later failures surface through the handle and `observer`.
    pub async fn start_upload(
        &self,
        source: Arc<dyn ByteSource>,
        observer: Arc<dyn UploadObserver>,
    ) -> Result<UploadHandle> {
        let metadata = self.extract_metadata_from_file(source.as_ref()).await?;
        info!(
            title = %metadata.title,
            title_id = %metadata.title_id,
            size = source.size(),
            fallback = metadata.is_fallback(),
            "Starting upload"
        );

        let init = InitSession {
            total_size: source.size(),
            title_id: metadata.title_id,
            title: metadata.title,
            icon_ref: metadata.icon_ref,
        };
        Ok(self.coordinator.start_new(source, init, observer))
    }

    /// Stop the upload locally, then ask the installer to drop the session.
    ///
    /// An upload that already ended is left alone, remotely as well.
    pub async fn cancel_upload(&self, handle: &UploadHandle) -> Result<()> {
        if !handle.cancel() {
            debug!(state = %handle.state(), "Upload already ended, nothing to cancel");
            return Ok(());
        }

        let Some(session) = handle.session_key() else {
            return Ok(());
        };
        self.api.cancel_session(&session).await.map_err(|e| {
            warn!(session = %session, error = %e, "Installer did not confirm cancellation");
            e
        })?;
        info!(session = %session, "Upload session cancelled on installer");
        Ok(())
    }
}

//! The resumable chunk-upload loop.
//!
//! The installer drives the transfer: it is asked which chunks it still
//! needs, every chunk not seen before is sent in parallel, and the cycle
//! repeats. The loop ends when a listing comes back empty with the package
//! (nearly) fully sent, when empty listings keep coming while it is not, or
//! when listing itself keeps failing.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use parking_lot::{Mutex, ReentrantMutex};
use pkgferry_common::{ByteSource, Error, Result, SessionKey};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::api::{ChunkDescriptor, InitSession, InstallerApi, ProgressFn};
use crate::session::{UploadSession, UploadState};

/// Tunables of the upload loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadSettings {
    /// Pause before re-listing after an empty or failed listing.
    pub list_retry_delay_ms: u64,
    /// Consecutive failed listings retried before giving up.
    pub max_list_retries: u32,
    /// Consecutive empty listings retried before declaring a stall.
    pub max_empty_retries: u32,
    /// Aggregate percentage at which an empty listing means "done".
    pub completion_threshold: f64,
    /// Inline-announced chunks are only uploaded directly when at least
    /// this many are pending.
    pub min_pending_promotion: usize,
}

impl Default for UploadSettings {
    fn default() -> Self {
        Self {
            list_retry_delay_ms: 1000,
            max_list_retries: 3,
            max_empty_retries: 3,
            completion_threshold: 99.9,
            min_pending_promotion: 2,
        }
    }
}

impl UploadSettings {
    pub fn list_retry_delay(&self) -> Duration {
        Duration::from_millis(self.list_retry_delay_ms)
    }
}

/// What a finished upload did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadSummary {
    pub session_key: SessionKey,
    pub total_bytes: u64,
    pub chunks_uploaded: usize,
    pub list_calls: u64,
}

/// Receives upload events.
///
/// Callbacks run on the upload task while an internal gate is held, which is
/// what lets [`UploadHandle::cancel`] guarantee that nothing is delivered
/// after it returns. They should be quick. Calling back into the handle from
/// a callback is fine.
pub trait UploadObserver: Send + Sync {
    /// Aggregate progress in percent. Never decreases.
    fn on_progress(&self, _percent: f64) {}

    /// The installer has every chunk. Called at most once.
    fn on_complete(&self, _summary: &UploadSummary) {}

    /// The upload failed. Not called for cancellation.
    fn on_error(&self, _error: &Error) {}
}

/// Observer that ignores every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl UploadObserver for NoopObserver {}

enum Start {
    Existing(SessionKey),
    New(InitSession),
}

struct Shared {
    session: Mutex<UploadSession>,
    gate: ReentrantMutex<()>,
    observer: Arc<dyn UploadObserver>,
}

impl Shared {
    fn with_session<T>(&self, f: impl FnOnce(&mut UploadSession) -> T) -> T {
        f(&mut *self.session.lock())
    }

    /// Apply a progress mutation and forward a grown percentage.
    fn progress(&self, f: impl FnOnce(&mut UploadSession) -> Option<f64>) {
        let _gate = self.gate.lock();
        let grown = f(&mut *self.session.lock());
        if let Some(percent) = grown {
            debug!(progress = format_args!("{percent:.1}"), "Upload progress");
            self.observer.on_progress(percent);
        }
    }

    /// Close the session and notify, unless it was already closed.
    fn finish(&self, state: UploadState, notify: impl FnOnce(&dyn UploadObserver)) -> bool {
        let _gate = self.gate.lock();
        let closed = self.session.lock().close(state);
        if closed {
            notify(self.observer.as_ref());
        }
        closed
    }
}

/// Starts uploads against one installer.
pub struct UploadCoordinator {
    api: Arc<dyn InstallerApi>,
    settings: UploadSettings,
}

impl UploadCoordinator {
    pub fn new(api: Arc<dyn InstallerApi>, settings: UploadSettings) -> Self {
        Self { api, settings }
    }

    pub fn settings(&self) -> &UploadSettings {
        &self.settings
    }

    /// Upload `source` into an already opened session.
    pub fn start(
        &self,
        source: Arc<dyn ByteSource>,
        session_key: SessionKey,
        observer: Arc<dyn UploadObserver>,
    ) -> UploadHandle {
        self.spawn(source, Start::Existing(session_key), observer)
    }

    /// Open a session with `init`, then upload `source` into it.
    pub fn start_new(
        &self,
        source: Arc<dyn ByteSource>,
        init: InitSession,
        observer: Arc<dyn UploadObserver>,
    ) -> UploadHandle {
        self.spawn(source, Start::New(init), observer)
    }

    fn spawn(
        &self,
        source: Arc<dyn ByteSource>,
        start: Start,
        observer: Arc<dyn UploadObserver>,
    ) -> UploadHandle {
        let shared = Arc::new(Shared {
            session: Mutex::new(UploadSession::new(source.size())),
            gate: ReentrantMutex::new(()),
            observer,
        });
        if let Start::Existing(key) = &start {
            shared.with_session(|s| s.set_session_key(key.clone()));
        }

        let token = CancellationToken::new();
        let task = tokio::spawn(run(
            Arc::clone(&self.api),
            self.settings.clone(),
            Arc::clone(&shared),
            source,
            start,
            token.clone(),
        ));

        UploadHandle {
            shared,
            token,
            task: tokio::sync::Mutex::new(Some(task)),
        }
    }
}

/// Control over a running upload.
pub struct UploadHandle {
    shared: Arc<Shared>,
    token: CancellationToken,
    task: tokio::sync::Mutex<Option<JoinHandle<Result<UploadSummary>>>>,
}

impl std::fmt::Debug for UploadHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadHandle").finish_non_exhaustive()
    }
}

impl UploadHandle {
    /// Stop the upload. In-flight requests are dropped and no observer
    /// callback fires after this returns. Safe to call more than once.
    ///
    /// Returns `true` only for the call that stopped a running upload. An
    /// upload that already ended stays as it was and is not marked cancelled.
    pub fn cancel(&self) -> bool {
        if !self.shared.finish(UploadState::Cancelled, |_| {}) {
            return false;
        }
        self.token.cancel();
        info!("Upload cancelled");
        true
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn state(&self) -> UploadState {
        self.shared.with_session(|s| s.state())
    }

    /// Highest aggregate percentage reported so far.
    pub fn progress(&self) -> f64 {
        self.shared.with_session(|s| s.reported())
    }

    /// The current session key, once the session is open.
    pub fn session_key(&self) -> Option<SessionKey> {
        self.shared.with_session(|s| s.session_key().cloned())
    }

    /// Wait for the upload to end. Cancelled uploads yield
    /// [`Error::Cancelled`]. The outcome can be taken once.
    pub async fn wait(&self) -> Result<UploadSummary> {
        let mut slot = self.task.lock().await;
        let Some(task) = slot.as_mut() else {
            return Err(Error::internal("upload outcome already taken"));
        };
        let outcome = task.await;
        *slot = None;
        outcome.map_err(|e| Error::internal(format!("upload task failed: {e}")))?
    }
}

async fn run(
    api: Arc<dyn InstallerApi>,
    settings: UploadSettings,
    shared: Arc<Shared>,
    source: Arc<dyn ByteSource>,
    start: Start,
    token: CancellationToken,
) -> Result<UploadSummary> {
    let outcome = tokio::select! {
        biased;
        _ = token.cancelled() => Err(Error::Cancelled),
        outcome = drive(api.as_ref(), &settings, &shared, &source, start) => outcome,
    };

    match &outcome {
        Ok(_) => {}
        Err(Error::Cancelled) => {
            shared.finish(UploadState::Cancelled, |_| {});
        }
        Err(e) => {
            error!(error = %e, "Upload failed");
            shared.finish(UploadState::Failed, |observer| observer.on_error(e));
        }
    }
    outcome
}

async fn drive(
    api: &dyn InstallerApi,
    settings: &UploadSettings,
    shared: &Arc<Shared>,
    source: &Arc<dyn ByteSource>,
    start: Start,
) -> Result<UploadSummary> {
    let mut session_key = match start {
        Start::Existing(key) => key,
        Start::New(init) => {
            shared.with_session(|s| s.set_state(UploadState::Initializing));
            let key = api.init_session(&init).await?;
            info!(
                session = %key,
                title_id = %init.title_id,
                size = init.total_size,
                "Upload session opened"
            );
            shared.with_session(|s| s.set_session_key(key.clone()));
            key
        }
    };

    let delay = settings.list_retry_delay();
    let mut list_calls = 0u64;
    let mut list_failures = 0u32;
    let mut empty_listings = 0u32;
    let mut promoted = Vec::new();

    loop {
        let batch = if promoted.is_empty() {
            shared.with_session(|s| s.set_state(UploadState::Listing));
            // Poll ids start at 0 and grow with every call
            let poll_id = list_calls;
            list_calls += 1;

            let listing = match api.list_outstanding_chunks(&session_key, poll_id).await {
                Ok(listing) => {
                    list_failures = 0;
                    listing
                }
                Err(e) if e.is_retryable() => {
                    list_failures += 1;
                    if list_failures > settings.max_list_retries {
                        return Err(Error::RetriesExhausted {
                            attempts: list_failures,
                            source: Box::new(e),
                        });
                    }
                    warn!(
                        session = %session_key,
                        poll_id,
                        retry = list_failures,
                        error = %e,
                        "Chunk listing failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    continue;
                }
                Err(e) => return Err(e),
            };

            if let Some(key) = listing.session_key {
                if key != session_key {
                    debug!(old = %session_key, new = %key, "Installer rotated session key");
                    session_key = key;
                    shared.with_session(|s| s.set_session_key(session_key.clone()));
                }
            }
            shared.with_session(|s| s.claim_unseen(listing.chunks))?
        } else {
            std::mem::take(&mut promoted)
        };

        if batch.is_empty() {
            let percent = shared.with_session(|s| s.percent());
            if percent >= settings.completion_threshold {
                let summary = UploadSummary {
                    session_key: session_key.clone(),
                    total_bytes: source.size(),
                    chunks_uploaded: shared.with_session(|s| s.completed_chunks()),
                    list_calls,
                };
                info!(
                    session = %session_key,
                    chunks = summary.chunks_uploaded,
                    bytes = summary.total_bytes,
                    "Upload complete"
                );
                let notified = shared.finish(UploadState::Completed, |observer| {
                    observer.on_complete(&summary)
                });
                return if notified {
                    Ok(summary)
                } else {
                    Err(Error::Cancelled)
                };
            }

            empty_listings += 1;
            if empty_listings > settings.max_empty_retries {
                return Err(Error::ProtocolStall {
                    progress: percent,
                    retries: settings.max_empty_retries,
                });
            }
            debug!(
                session = %session_key,
                progress = format_args!("{percent:.1}"),
                retry = empty_listings,
                "No new chunks, listing again"
            );
            tokio::time::sleep(delay).await;
            continue;
        }
        empty_listings = 0;

        shared.with_session(|s| s.set_state(UploadState::Uploading));
        info!(session = %session_key, list_calls, chunks = batch.len(), "Uploading chunk batch");

        let results = join_all(
            batch
                .into_iter()
                .map(|chunk| upload_chunk(api, shared, source.as_ref(), &session_key, chunk)),
        )
        .await;
        results.into_iter().collect::<Result<Vec<()>>>()?;

        promoted = shared.with_session(|s| s.take_pending(settings.min_pending_promotion))?;
        if !promoted.is_empty() {
            debug!(chunks = promoted.len(), "Promoting inline-announced chunks");
        }
    }
}

/// Send one chunk. Installer-side failures evict the chunk so it can be
/// listed again; only a failing local read is returned as an error.
async fn upload_chunk(
    api: &dyn InstallerApi,
    shared: &Arc<Shared>,
    source: &dyn ByteSource,
    session_key: &SessionKey,
    chunk: ChunkDescriptor,
) -> Result<()> {
    let key = chunk.key.clone();
    let data = source.read_range(chunk.start, chunk.len()).await?;
    if data.len() as u64 != chunk.len() {
        return Err(Error::Io(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            format!(
                "package source returned {} of {} bytes for chunk {key}",
                data.len(),
                chunk.len()
            ),
        )));
    }

    let progress: ProgressFn = {
        let shared = Arc::clone(shared);
        let key = key.clone();
        Arc::new(move |sent| shared.progress(|s| s.record_progress(&key, sent)))
    };

    match api.upload_chunk(session_key, &chunk, data, progress).await {
        Ok(reply) => {
            shared.progress(|s| s.complete_chunk(&key));
            if !reply.chunks.is_empty() {
                debug!(chunk = %key, announced = reply.chunks.len(), "Upload reply announced chunks");
                shared.with_session(|s| s.offer_pending(reply.chunks));
            }
        }
        Err(e) => {
            warn!(chunk = %key, error = %e, "Chunk upload failed, it will be re-listed");
            shared.with_session(|s| s.fail_chunk(&key));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_defaults() {
        let settings = UploadSettings::default();
        assert_eq!(settings.list_retry_delay(), Duration::from_secs(1));
        assert_eq!(settings.max_list_retries, 3);
        assert_eq!(settings.max_empty_retries, 3);
        assert_eq!(settings.completion_threshold, 99.9);
        assert_eq!(settings.min_pending_promotion, 2);
    }

    #[test]
    fn test_settings_partial_override() {
        let settings: UploadSettings =
            serde_json::from_str(r#"{"list_retry_delay_ms": 10}"#).unwrap();
        assert_eq!(settings.list_retry_delay_ms, 10);
        assert_eq!(settings.max_empty_retries, 3);
    }
}

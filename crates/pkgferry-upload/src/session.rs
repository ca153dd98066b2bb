//! Per-upload bookkeeping.
//!
//! [`UploadSession`] holds everything the upload loop knows about one
//! transfer: which chunk keys have been scheduled, how far each in-flight
//! chunk has got, and which chunks were announced inline by upload replies.
//! Every method is a short synchronous mutation so the session can live
//! behind a plain mutex.

use std::collections::{HashMap, HashSet};
use std::fmt;

use pkgferry_common::{ChunkKey, Result, SessionKey};
use serde::Serialize;

use crate::api::ChunkDescriptor;

/// Lifecycle of an upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadState {
    Idle,
    Initializing,
    Listing,
    Uploading,
    Completed,
    Failed,
    Cancelled,
}

impl UploadState {
    /// Whether the upload has ended, one way or another.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            UploadState::Completed | UploadState::Failed | UploadState::Cancelled
        )
    }
}

impl fmt::Display for UploadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            UploadState::Idle => "idle",
            UploadState::Initializing => "initializing",
            UploadState::Listing => "listing",
            UploadState::Uploading => "uploading",
            UploadState::Completed => "completed",
            UploadState::Failed => "failed",
            UploadState::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy)]
struct ChunkProgress {
    uploaded: u64,
    total: u64,
}

/// State of one package transfer.
#[derive(Debug)]
pub struct UploadSession {
    session_key: Option<SessionKey>,
    total_bytes: u64,
    state: UploadState,
    /// Keys scheduled or done. Never scheduled again.
    queue: HashSet<ChunkKey>,
    active: HashMap<ChunkKey, ChunkProgress>,
    completed_bytes: u64,
    completed_chunks: usize,
    /// Inline-announced chunks by key, with their arrival order.
    pending: HashMap<ChunkKey, ChunkDescriptor>,
    pending_order: Vec<ChunkKey>,
    reported: f64,
}

impl UploadSession {
    pub fn new(total_bytes: u64) -> Self {
        Self {
            session_key: None,
            total_bytes,
            state: UploadState::Idle,
            queue: HashSet::new(),
            active: HashMap::new(),
            completed_bytes: 0,
            completed_chunks: 0,
            pending: HashMap::new(),
            pending_order: Vec::new(),
            reported: 0.0,
        }
    }

    pub fn session_key(&self) -> Option<&SessionKey> {
        self.session_key.as_ref()
    }

    pub fn set_session_key(&mut self, key: SessionKey) {
        if !self.state.is_terminal() {
            self.session_key = Some(key);
        }
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    pub fn state(&self) -> UploadState {
        self.state
    }

    /// Move to a non-terminal state. Ignored once the upload has ended.
    pub fn set_state(&mut self, state: UploadState) {
        if !self.state.is_terminal() {
            self.state = state;
        }
    }

    pub fn is_closed(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn completed_chunks(&self) -> usize {
        self.completed_chunks
    }

    pub fn active_chunks(&self) -> usize {
        self.active.len()
    }

    /// Take ownership of every chunk in `chunks` whose key has not been seen
    /// before. Duplicates inside `chunks` are claimed once. Each claimed
    /// chunk starts at zero progress.
    pub fn claim_unseen(&mut self, chunks: Vec<ChunkDescriptor>) -> Result<Vec<ChunkDescriptor>> {
        if self.is_closed() {
            return Ok(Vec::new());
        }
        for chunk in &chunks {
            chunk.validate(self.total_bytes)?;
        }

        let mut claimed = Vec::new();
        for chunk in chunks {
            if self.queue.insert(chunk.key.clone()) {
                self.active.insert(
                    chunk.key.clone(),
                    ChunkProgress {
                        uploaded: 0,
                        total: chunk.len(),
                    },
                );
                claimed.push(chunk);
            }
        }
        Ok(claimed)
    }

    /// Record that `uploaded` bytes of `key` have been sent. Returns the
    /// reported percentage if it grew.
    pub fn record_progress(&mut self, key: &ChunkKey, uploaded: u64) -> Option<f64> {
        if self.is_closed() {
            return None;
        }
        let progress = self.active.get_mut(key)?;
        progress.uploaded = progress.uploaded.max(uploaded.min(progress.total));
        self.bump_reported()
    }

    /// Mark `key` as fully uploaded. Returns the reported percentage if it
    /// grew.
    pub fn complete_chunk(&mut self, key: &ChunkKey) -> Option<f64> {
        if self.is_closed() {
            return None;
        }
        let progress = self.active.remove(key)?;
        self.completed_bytes = self.completed_bytes.saturating_add(progress.total);
        self.completed_chunks += 1;
        self.bump_reported()
    }

    /// Forget a failed chunk so a later listing can schedule it again.
    pub fn fail_chunk(&mut self, key: &ChunkKey) {
        if self.active.remove(key).is_some() {
            self.queue.remove(key);
        }
    }

    /// Remember chunks announced by an upload reply, skipping keys already
    /// scheduled or already pending.
    pub fn offer_pending(&mut self, chunks: Vec<ChunkDescriptor>) {
        if self.is_closed() {
            return;
        }
        for chunk in chunks {
            if self.queue.contains(&chunk.key) || self.pending.contains_key(&chunk.key) {
                continue;
            }
            self.pending_order.push(chunk.key.clone());
            self.pending.insert(chunk.key.clone(), chunk);
        }
    }

    /// Drain the pending set. When it holds at least `min` chunks they are
    /// claimed and returned as the next batch; otherwise they are dropped.
    pub fn take_pending(&mut self, min: usize) -> Result<Vec<ChunkDescriptor>> {
        let mut pending = std::mem::take(&mut self.pending);
        let order = std::mem::take(&mut self.pending_order);
        if pending.len() < min {
            return Ok(Vec::new());
        }
        let batch = order
            .into_iter()
            .filter_map(|key| pending.remove(&key))
            .collect();
        self.claim_unseen(batch)
    }

    /// Unclamped aggregate progress in percent, capped at 100.
    pub fn percent(&self) -> f64 {
        if self.total_bytes == 0 {
            return 100.0;
        }
        let in_flight: u64 = self.active.values().map(|p| p.uploaded).sum();
        let done = self.completed_bytes.saturating_add(in_flight);
        (done as f64 / self.total_bytes as f64 * 100.0).min(100.0)
    }

    /// Highest percentage reported so far.
    pub fn reported(&self) -> f64 {
        self.reported
    }

    fn bump_reported(&mut self) -> Option<f64> {
        let now = self.percent();
        if now > self.reported {
            self.reported = now;
            Some(now)
        } else {
            None
        }
    }

    /// Enter a terminal state and drop all chunk bookkeeping. Returns `false`
    /// if the session had already ended.
    pub fn close(&mut self, state: UploadState) -> bool {
        if self.is_closed() {
            return false;
        }
        self.state = state;
        self.active.clear();
        self.pending.clear();
        self.pending_order.clear();
        self.queue.clear();
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pkgferry_common::Error;

    fn chunk(key: &str, start: u64, end: u64) -> ChunkDescriptor {
        ChunkDescriptor::new(key, start, end)
    }

    #[test]
    fn test_claim_dedups_within_and_across_listings() {
        let mut s = UploadSession::new(100);
        let first = s
            .claim_unseen(vec![chunk("a", 0, 49), chunk("a", 0, 49), chunk("b", 50, 99)])
            .unwrap();
        assert_eq!(first.len(), 2);

        let second = s.claim_unseen(vec![chunk("a", 0, 49), chunk("c", 0, 9)]).unwrap();
        assert_eq!(second, vec![chunk("c", 0, 9)]);
    }

    #[test]
    fn test_claim_rejects_out_of_range_chunk() {
        let mut s = UploadSession::new(100);
        let err = s.claim_unseen(vec![chunk("a", 0, 100)]).unwrap_err();
        assert!(matches!(err, Error::InvalidChunk { .. }));
    }

    #[test]
    fn test_progress_aggregates_and_never_decreases() {
        let mut s = UploadSession::new(200);
        s.claim_unseen(vec![chunk("a", 0, 99), chunk("b", 100, 199)])
            .unwrap();

        assert_eq!(s.record_progress(&"a".into(), 50), Some(25.0));
        assert_eq!(s.record_progress(&"b".into(), 100), Some(75.0));
        // a stale, smaller value for the same chunk changes nothing
        assert_eq!(s.record_progress(&"a".into(), 10), None);
        assert_eq!(s.reported(), 75.0);

        assert_eq!(s.complete_chunk(&"a".into()), Some(100.0));
        assert_eq!(s.active_chunks(), 1);
        assert_eq!(s.completed_chunks(), 1);
    }

    #[test]
    fn test_progress_reported_value_survives_failed_chunk() {
        let mut s = UploadSession::new(100);
        s.claim_unseen(vec![chunk("a", 0, 99)]).unwrap();
        s.record_progress(&"a".into(), 60);
        s.fail_chunk(&"a".into());

        assert_eq!(s.percent(), 0.0);
        assert_eq!(s.reported(), 60.0);
        // failed chunk can be scheduled again
        assert_eq!(s.claim_unseen(vec![chunk("a", 0, 99)]).unwrap().len(), 1);
    }

    #[test]
    fn test_uploaded_is_capped_at_chunk_size() {
        let mut s = UploadSession::new(100);
        s.claim_unseen(vec![chunk("a", 0, 9)]).unwrap();
        s.record_progress(&"a".into(), 1_000);
        assert_eq!(s.percent(), 10.0);
    }

    #[test]
    fn test_empty_package_is_complete() {
        assert_eq!(UploadSession::new(0).percent(), 100.0);
    }

    #[test]
    fn test_pending_promotion_threshold() {
        let mut s = UploadSession::new(100);
        s.claim_unseen(vec![chunk("a", 0, 9)]).unwrap();

        s.offer_pending(vec![chunk("a", 0, 9), chunk("b", 10, 19)]);
        assert!(s.take_pending(2).unwrap().is_empty());

        s.offer_pending(vec![chunk("b", 10, 19), chunk("c", 20, 29), chunk("c", 20, 29)]);
        let promoted = s.take_pending(2).unwrap();
        assert_eq!(promoted, vec![chunk("b", 10, 19), chunk("c", 20, 29)]);
        assert!(s.take_pending(2).unwrap().is_empty());
    }

    #[test]
    fn test_large_inline_announcement_keeps_order_and_dedups() {
        let mut s = UploadSession::new(100_000);
        let announced: Vec<_> = (0..5_000u64)
            .map(|i| chunk(&format!("k{i}"), i * 10, i * 10 + 9))
            .collect();
        s.offer_pending(announced.clone());
        s.offer_pending(announced.iter().rev().cloned().collect());

        let promoted = s.take_pending(2).unwrap();
        assert_eq!(promoted, announced);
    }

    #[test]
    fn test_close_is_one_shot_and_freezes_state() {
        let mut s = UploadSession::new(100);
        s.claim_unseen(vec![chunk("a", 0, 99)]).unwrap();
        assert!(s.close(UploadState::Cancelled));
        assert!(!s.close(UploadState::Completed));
        assert_eq!(s.state(), UploadState::Cancelled);

        s.set_state(UploadState::Uploading);
        assert_eq!(s.state(), UploadState::Cancelled);
        assert_eq!(s.record_progress(&"a".into(), 50), None);
        assert!(s.claim_unseen(vec![chunk("b", 0, 1)]).unwrap().is_empty());
    }
}

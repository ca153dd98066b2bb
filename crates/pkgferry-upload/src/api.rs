//! The installer-side session API the upload loop talks to.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use pkgferry_common::{ChunkKey, Error, Result, SessionKey};
use serde::{Deserialize, Deserializer, Serialize};

/// Receives the cumulative number of bytes of one chunk sent so far.
pub type ProgressFn = Arc<dyn Fn(u64) + Send + Sync>;

/// Parameters for opening an upload session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitSession {
    /// Size of the whole package in bytes.
    pub total_size: u64,
    pub title_id: String,
    pub title: String,
    /// Where the installer can fetch the package icon.
    pub icon_ref: Option<String>,
}

/// A byte range of the package the installer asks for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkDescriptor {
    pub key: ChunkKey,
    pub start: u64,
    /// Inclusive.
    pub end: u64,
}

impl ChunkDescriptor {
    pub fn new(key: impl Into<ChunkKey>, start: u64, end: u64) -> Self {
        Self {
            key: key.into(),
            start,
            end,
        }
    }

    /// Number of bytes covered by the range.
    pub fn len(&self) -> u64 {
        self.end.saturating_sub(self.start).saturating_add(1)
    }

    /// Check that the range is well formed and lies inside a package of
    /// `size` bytes.
    pub fn validate(&self, size: u64) -> Result<()> {
        if self.end < self.start || self.end >= size {
            return Err(Error::InvalidChunk {
                key: self.key.to_string(),
                start: self.start,
                end: self.end,
                size,
            });
        }
        Ok(())
    }
}

/// Chunk lists may be absent or `null`; both mean "none".
fn chunks_or_empty<'de, D>(deserializer: D) -> std::result::Result<Vec<ChunkDescriptor>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<ChunkDescriptor>>::deserialize(deserializer)?.unwrap_or_default())
}

/// Answer to a list call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkListing {
    /// The installer may rotate the session key; when present it replaces
    /// the current one.
    #[serde(default)]
    pub session_key: Option<SessionKey>,
    #[serde(default, deserialize_with = "chunks_or_empty")]
    pub chunks: Vec<ChunkDescriptor>,
}

/// Answer to a chunk upload. May announce further outstanding chunks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ChunkUploadReply {
    #[serde(default, deserialize_with = "chunks_or_empty")]
    pub chunks: Vec<ChunkDescriptor>,
}

/// Remote installer operations needed to move a package.
#[async_trait]
pub trait InstallerApi: Send + Sync {
    /// Open a session for a package.
    async fn init_session(&self, request: &InitSession) -> Result<SessionKey>;

    /// Ask which chunks the installer still needs. `poll_id` grows with every
    /// call in a session.
    async fn list_outstanding_chunks(
        &self,
        session: &SessionKey,
        poll_id: u64,
    ) -> Result<ChunkListing>;

    /// Send one chunk, reporting progress through `progress`.
    async fn upload_chunk(
        &self,
        session: &SessionKey,
        chunk: &ChunkDescriptor,
        data: Bytes,
        progress: ProgressFn,
    ) -> Result<ChunkUploadReply>;

    /// Tell the installer to drop the session.
    async fn cancel_session(&self, session: &SessionKey) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_descriptor_length_is_inclusive() {
        assert_eq!(ChunkDescriptor::new("a", 0, 0).len(), 1);
        assert_eq!(ChunkDescriptor::new("a", 10, 19).len(), 10);
    }

    #[test]
    fn test_descriptor_validation() {
        assert!(ChunkDescriptor::new("a", 0, 99).validate(100).is_ok());
        assert_matches!(
            ChunkDescriptor::new("a", 0, 100).validate(100),
            Err(Error::InvalidChunk { end: 100, size: 100, .. })
        );
        assert_matches!(
            ChunkDescriptor::new("b", 5, 4).validate(100),
            Err(Error::InvalidChunk { .. })
        );
    }

    #[test]
    fn test_listing_wire_format() {
        let listing: ChunkListing = serde_json::from_str(
            r#"{"sessionKey":"s2","chunks":[{"key":"c0","start":0,"end":1023}]}"#,
        )
        .unwrap();
        assert_eq!(listing.session_key, Some(SessionKey::from("s2")));
        assert_eq!(listing.chunks, vec![ChunkDescriptor::new("c0", 0, 1023)]);

        let empty: ChunkListing = serde_json::from_str("{}").unwrap();
        assert!(empty.session_key.is_none());
        assert!(empty.chunks.is_empty());
    }

    #[test]
    fn test_null_chunk_lists_are_empty() {
        let listing: ChunkListing =
            serde_json::from_str(r#"{"sessionKey":"s","chunks":null}"#).unwrap();
        assert_eq!(listing.session_key, Some(SessionKey::from("s")));
        assert!(listing.chunks.is_empty());

        let reply: ChunkUploadReply = serde_json::from_str(r#"{"chunks":null}"#).unwrap();
        assert!(reply.chunks.is_empty());
    }
}

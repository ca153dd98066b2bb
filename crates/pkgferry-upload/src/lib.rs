//! # pkgferry-upload
//!
//! Resumable chunk upload to a remote package installer.
//!
//! The installer decides what it needs: it hands out chunk descriptors (an
//! opaque key plus an inclusive byte range) in answer to list calls and,
//! sometimes, inline in upload replies. [`UploadCoordinator`] keeps asking,
//! sends each chunk it has not seen before, aggregates per-chunk progress
//! into one monotonic percentage, and decides when the transfer is done or
//! has stalled.
//!
//! The transport sits behind the [`InstallerApi`] trait; the root crate
//! provides the HTTP implementation.

pub mod api;
pub mod coordinator;
pub mod session;

pub use api::{
    ChunkDescriptor, ChunkListing, ChunkUploadReply, InitSession, InstallerApi, ProgressFn,
};
pub use coordinator::{
    NoopObserver, UploadCoordinator, UploadHandle, UploadObserver, UploadSettings, UploadSummary,
};
pub use session::{UploadSession, UploadState};

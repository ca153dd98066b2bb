//! # pkgferry-pkg
//!
//! Metadata extraction from console package containers.
//!
//! Two container layouts are understood, both identified by a 4-byte magic:
//!
//! - **Orbis** (`\x7FCNT`): big-endian header and entry table, with metadata
//!   in an embedded little-endian `PARAM.SFO` property list
//! - **Prospero** (`\x7FFIH`): a little-endian pointer to an inner big-endian
//!   container, with metadata in an embedded JSON parameter blob
//!
//! Only the header, the entry table, and the few entries that carry metadata
//! are ever read, so large packages can be inspected cheaply through any
//! range-readable [`ByteSource`](pkgferry_common::ByteSource).
//!
//! ## Example
//!
//! ```no_run
//! use pkgferry_common::FileSource;
//! use pkgferry_pkg::{extract_metadata, DirTempStore};
//!
//! # async fn run() -> pkgferry_common::Result<()> {
//! let source = FileSource::open("game.pkg").await?;
//! let store = DirTempStore::new(std::env::temp_dir());
//! let meta = extract_metadata(&source, &store).await?;
//! println!("{} [{}]", meta.title, meta.title_id);
//! # Ok(())
//! # }
//! ```

pub mod detect;
pub mod extract;
#[cfg(any(test, feature = "fixtures"))]
pub mod fixtures;
pub mod orbis;
pub mod prospero;
mod reader;
pub mod sfo;
pub mod store;

pub use detect::{detect_format, PackageFormat, ORBIS_MAGIC, PROSPERO_MAGIC};
pub use extract::{extract_metadata, MetadataSource, PackageMetadata};
pub use orbis::{OrbisEntry, OrbisHeader, OrbisPackage, OrbisParser};
pub use prospero::{ProsperoEntry, ProsperoHeader, ProsperoPackage, ProsperoParser};
pub use sfo::{PropertyList, SfoValue, SFO_MAGIC};
pub use store::{DirTempStore, TempFileStore};

//! Pkgferry-Common: Shared types and utilities.
//!
//! This crate provides the functionality every other pkgferry crate leans on:
//!
//! - **Error Handling**: A unified error type and result alias
//! - **Opaque Keys**: Newtypes for server-issued session and chunk keys
//! - **Byte Sources**: The range-readable [`ByteSource`] abstraction over files and memory
//!
//! # Examples
//!
//! ```
//! use pkgferry_common::{ChunkKey, Error, Result, SessionKey};
//!
//! let session = SessionKey::from("a1b2c3");
//! let chunk = ChunkKey::from("chunk-0");
//! assert_eq!(session.as_str(), "a1b2c3");
//! assert_eq!(chunk.to_string(), "chunk-0");
//!
//! fn example() -> Result<()> {
//!     Err(Error::format("bad magic"))
//! }
//! assert!(example().is_err());
//! ```

pub mod error;
pub mod ids;
pub mod source;

pub use error::{Error, Result};
pub use ids::*;
pub use source::{ByteSource, FileSource, MemorySource};

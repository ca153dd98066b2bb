//! Opaque key wrappers for server-issued identifiers.
//!
//! The installer hands out session and chunk keys as free-form strings. Each
//! key type is a newtype over `String` so a `ChunkKey` can never be passed
//! where a `SessionKey` is expected.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Generate a newtype key wrapper over `String`.
///
/// The macro produces a struct with:
/// - `new()` / `as_str()` / `into_inner()`
/// - `Debug`, `Clone`, `PartialEq`, `Eq`, `Hash`, `Serialize`, `Deserialize`
/// - `Display` delegating to the inner string
/// - `From<String>` and `From<&str>` conversions
macro_rules! opaque_key {
    ($($(#[doc = $doc:expr])* $name:ident),+ $(,)?) => {
        $(
            $(#[doc = $doc])*
            #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
            #[serde(transparent)]
            pub struct $name(String);

            impl $name {
                /// Wrap a raw key.
                #[must_use]
                pub fn new(key: impl Into<String>) -> Self {
                    Self(key.into())
                }

                /// Borrow the raw key.
                #[must_use]
                pub fn as_str(&self) -> &str {
                    &self.0
                }

                /// Return the raw key.
                #[must_use]
                pub fn into_inner(self) -> String {
                    self.0
                }
            }

            impl fmt::Display for $name {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    f.write_str(&self.0)
                }
            }

            impl From<String> for $name {
                fn from(key: String) -> Self {
                    Self(key)
                }
            }

            impl From<&str> for $name {
                fn from(key: &str) -> Self {
                    Self(key.to_string())
                }
            }

            impl AsRef<str> for $name {
                fn as_ref(&self) -> &str {
                    &self.0
                }
            }
        )+
    };
}

opaque_key! {
    /// Key of an installer-side upload session.
    SessionKey,
    /// Key of one chunk within an upload session.
    ChunkKey,
}

//! Container format detection from the leading magic.

use std::fmt;

use pkgferry_common::{ByteSource, Error, Result};
use serde::Serialize;

use crate::reader::{be_u32, read_exact_at};

/// Leading magic of an Orbis package (`"\x7FCNT"`), read big-endian.
pub const ORBIS_MAGIC: u32 = 0x7F43_4E54;

/// Leading magic of a Prospero package (`"\x7FFIH"`), read big-endian.
pub const PROSPERO_MAGIC: u32 = 0x7F46_4948;

/// Supported package container formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageFormat {
    /// Orbis container with an embedded `PARAM.SFO`.
    Orbis,
    /// Prospero container with an embedded JSON parameter blob.
    Prospero,
}

impl PackageFormat {
    /// Map a big-endian leading magic to a format.
    pub fn from_magic(magic: u32) -> Option<Self> {
        match magic {
            ORBIS_MAGIC => Some(PackageFormat::Orbis),
            PROSPERO_MAGIC => Some(PackageFormat::Prospero),
            _ => None,
        }
    }
}

impl fmt::Display for PackageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PackageFormat::Orbis => write!(f, "Orbis"),
            PackageFormat::Prospero => write!(f, "Prospero"),
        }
    }
}

/// Read the leading 4 bytes of `source` and identify the container format.
pub async fn detect_format(source: &dyn ByteSource) -> Result<PackageFormat> {
    let head = read_exact_at(source, 0, 4, "magic").await?;
    let magic = be_u32(&head, 0)?;

    PackageFormat::from_magic(magic)
        .ok_or_else(|| Error::format(format!("unrecognized package magic {magic:#010x}")))
}

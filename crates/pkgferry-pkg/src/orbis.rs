//! Orbis package parsing.
//!
//! Layout (all big-endian):
//!
//! ```text
//! header @ 0x00, 0x20 bytes read
//!   0x00  magic        u32  0x7F434E54
//!   0x10  entry count  u32
//!   0x18  table offset u32
//! entry table @ table offset, 0x20 bytes per slot
//!   0x00  id           u32
//!   0x10  file offset  u32
//!   0x14  file size    u32
//! ```
//!
//! Metadata lives in the `PARAM.SFO` entry; the icon in `ICON0.PNG`.

use bytes::Bytes;
use pkgferry_common::{ByteSource, Error, Result};
use tokio::sync::OnceCell;
use tracing::debug;

use crate::detect::ORBIS_MAGIC;
use crate::reader::{be_u32, read_exact_at};
use crate::sfo::PropertyList;

/// Entry id of `PARAM.SFO`.
pub const PARAM_SFO_ID: u32 = 0x0000_1000;
/// Entry id of `ICON0.PNG`.
pub const ICON0_ID: u32 = 0x0000_1200;

const HEADER_LEN: u64 = 0x20;
const ENTRY_LEN: u64 = 0x20;

/// Fixed header fields the parser needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrbisHeader {
    pub entry_count: u32,
    pub table_offset: u32,
}

/// One entry table slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrbisEntry {
    pub id: u32,
    pub file_offset: u32,
    pub file_size: u32,
}

/// Result of [`OrbisParser::parse_package`].
#[derive(Debug, Clone)]
pub struct OrbisPackage {
    pub params: PropertyList,
    pub icon: Option<Bytes>,
}

impl OrbisPackage {
    pub fn title(&self) -> Option<&str> {
        self.params.get_str("TITLE")
    }

    pub fn title_id(&self) -> Option<&str> {
        self.params.get_str("TITLE_ID")
    }
}

/// Reads an Orbis container through a [`ByteSource`].
///
/// The header and entry table are read at most once per parser instance.
pub struct OrbisParser<'a> {
    source: &'a dyn ByteSource,
    header: OnceCell<OrbisHeader>,
    entries: OnceCell<Vec<OrbisEntry>>,
}

impl<'a> OrbisParser<'a> {
    pub fn new(source: &'a dyn ByteSource) -> Self {
        Self {
            source,
            header: OnceCell::new(),
            entries: OnceCell::new(),
        }
    }

    /// The validated container header.
    pub async fn header(&self) -> Result<OrbisHeader> {
        self.header
            .get_or_try_init(|| self.read_header())
            .await
            .copied()
    }

    async fn read_header(&self) -> Result<OrbisHeader> {
        let buf = read_exact_at(self.source, 0, HEADER_LEN, "Orbis header").await?;

        let magic = be_u32(&buf, 0x00)?;
        if magic != ORBIS_MAGIC {
            return Err(Error::format(format!("not an Orbis package (magic {magic:#010x})")));
        }

        let header = OrbisHeader {
            entry_count: be_u32(&buf, 0x10)?,
            table_offset: be_u32(&buf, 0x18)?,
        };
        debug!(
            entries = header.entry_count,
            table_offset = header.table_offset,
            "Read Orbis header"
        );
        Ok(header)
    }

    /// The full entry table.
    pub async fn entries(&self) -> Result<&[OrbisEntry]> {
        self.entries
            .get_or_try_init(|| self.read_entries())
            .await
            .map(Vec::as_slice)
    }

    async fn read_entries(&self) -> Result<Vec<OrbisEntry>> {
        let header = self.header().await?;
        let table_len = u64::from(header.entry_count) * ENTRY_LEN;
        let table = read_exact_at(
            self.source,
            u64::from(header.table_offset),
            table_len,
            "Orbis entry table",
        )
        .await?;

        table
            .chunks_exact(ENTRY_LEN as usize)
            .map(|slot| {
                Ok(OrbisEntry {
                    id: be_u32(slot, 0x00)?,
                    file_offset: be_u32(slot, 0x10)?,
                    file_size: be_u32(slot, 0x14)?,
                })
            })
            .collect()
    }

    /// First entry with the given id.
    pub async fn find_entry(&self, id: u32) -> Result<OrbisEntry> {
        self.entries()
            .await?
            .iter()
            .find(|e| e.id == id)
            .copied()
            .ok_or(Error::EntryNotFound { id })
    }

    /// Read the payload of the entry with the given id.
    pub async fn extract_blob_by_id(&self, id: u32) -> Result<Bytes> {
        let entry = self.find_entry(id).await?;
        read_exact_at(
            self.source,
            u64::from(entry.file_offset),
            u64::from(entry.file_size),
            "Orbis entry",
        )
        .await
    }

    /// Decode the embedded `PARAM.SFO`.
    pub async fn param_sfo(&self) -> Result<PropertyList> {
        let blob = self.extract_blob_by_id(PARAM_SFO_ID).await?;
        PropertyList::decode(&blob)
    }

    /// Read the embedded `ICON0.PNG`.
    pub async fn icon(&self) -> Result<Bytes> {
        self.extract_blob_by_id(ICON0_ID).await
    }

    /// Read the property list and the icon concurrently. A missing or
    /// unreadable icon is reported as `None`.
    pub async fn parse_package(&self) -> Result<OrbisPackage> {
        let (params, icon) = tokio::join!(self.param_sfo(), self.icon());

        let icon = match icon {
            Ok(icon) => Some(icon),
            Err(e) => {
                debug!(error = %e, "Orbis package has no usable icon");
                None
            }
        };

        Ok(OrbisPackage {
            params: params?,
            icon,
        })
    }
}

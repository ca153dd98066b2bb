//! Prospero package parsing.
//!
//! A Prospero file is an outer wrapper whose little-endian i64 at `0x58`
//! points at an inner container. Everything inside the inner container is
//! big-endian and addressed relative to that base:
//!
//! ```text
//! base + 0x10  entry count        u32
//! base + 0x18  file table offset  u32
//! base + file table offset, 0x20 bytes per slot:
//!   0x00 type  0x04 reserved  0x08 flags1  0x0C flags2
//!   0x10 file offset  0x14 size  0x18 padding[8]
//! ```

use bytes::Bytes;
use pkgferry_common::{ByteSource, Error, Result};
use serde_json::Value;
use tokio::sync::OnceCell;
use tracing::debug;

use crate::reader::{be_u32, le_i64, raw, read_exact_at};

/// File offset of the little-endian base pointer.
pub const BASE_POINTER_OFFSET: u64 = 0x58;
/// Entry type of the JSON parameter blob.
pub const PARAM_JSON_TYPE: u32 = 0x2101;
/// Entry type of the icon.
pub const ICON0_TYPE: u32 = 0x1200;

const HEADER_OFFSET: u64 = 0x10;
const HEADER_LEN: u64 = 0x10;
const ENTRY_LEN: u64 = 0x20;
const BLOCK_ALIGN: u64 = 0x10;

const ENCRYPTED_FLAG: u32 = 0x8000_0000;
const KEY_INDEX_MASK: u32 = 0xF000;

/// Resolve the inner container base from the pointer at [`BASE_POINTER_OFFSET`].
pub(crate) async fn read_base_pointer(source: &dyn ByteSource) -> Result<u64> {
    let buf = read_exact_at(source, BASE_POINTER_OFFSET, 8, "Prospero base pointer").await?;
    let raw = le_i64(&buf, 0)?;

    let base = u64::try_from(raw)
        .map_err(|_| Error::format(format!("negative Prospero base offset {raw}")))?;
    if base >= source.size() {
        return Err(Error::format(format!(
            "Prospero base offset {base:#x} beyond container of {} bytes",
            source.size()
        )));
    }
    Ok(base)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProsperoHeader {
    pub entry_count: u32,
    /// Relative to the base offset.
    pub file_table_offset: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProsperoEntry {
    pub entry_type: u32,
    pub reserved: u32,
    pub flags1: u32,
    pub flags2: u32,
    /// Relative to the base offset.
    pub file_offset: u32,
    pub size: u32,
    pub padding: [u8; 8],
}

impl ProsperoEntry {
    /// Index of the key the entry is encrypted with.
    pub fn key_index(&self) -> u8 {
        ((self.flags2 & KEY_INDEX_MASK) >> 12) as u8
    }

    pub fn is_encrypted(&self) -> bool {
        self.flags1 & ENCRYPTED_FLAG != 0
    }
}

/// Result of [`ProsperoParser::parse_package`].
#[derive(Debug, Clone, Default)]
pub struct ProsperoPackage {
    pub title: String,
    pub title_id: String,
    pub icon: Option<Bytes>,
}

/// Reads a Prospero container through a [`ByteSource`].
pub struct ProsperoParser<'a> {
    source: &'a dyn ByteSource,
    base: OnceCell<u64>,
    header: OnceCell<ProsperoHeader>,
    entries: OnceCell<Vec<ProsperoEntry>>,
}

impl<'a> ProsperoParser<'a> {
    pub fn new(source: &'a dyn ByteSource) -> Self {
        Self {
            source,
            base: OnceCell::new(),
            header: OnceCell::new(),
            entries: OnceCell::new(),
        }
    }

    /// File offset of the inner container.
    pub async fn base_offset(&self) -> Result<u64> {
        self.base
            .get_or_try_init(|| read_base_pointer(self.source))
            .await
            .copied()
    }

    pub async fn header(&self) -> Result<ProsperoHeader> {
        self.header
            .get_or_try_init(|| self.read_header())
            .await
            .copied()
    }

    async fn read_header(&self) -> Result<ProsperoHeader> {
        let base = self.base_offset().await?;
        let buf = read_exact_at(self.source, base + HEADER_OFFSET, HEADER_LEN, "Prospero header")
            .await?;

        let header = ProsperoHeader {
            entry_count: be_u32(&buf, 0x00)?,
            file_table_offset: be_u32(&buf, 0x08)?,
        };
        debug!(
            base,
            entries = header.entry_count,
            table_offset = header.file_table_offset,
            "Read Prospero header"
        );
        Ok(header)
    }

    pub async fn entries(&self) -> Result<&[ProsperoEntry]> {
        self.entries
            .get_or_try_init(|| self.read_entries())
            .await
            .map(Vec::as_slice)
    }

    async fn read_entries(&self) -> Result<Vec<ProsperoEntry>> {
        let base = self.base_offset().await?;
        let header = self.header().await?;
        let table = read_exact_at(
            self.source,
            base + u64::from(header.file_table_offset),
            u64::from(header.entry_count) * ENTRY_LEN,
            "Prospero entry table",
        )
        .await?;

        table
            .chunks_exact(ENTRY_LEN as usize)
            .map(|slot| {
                Ok(ProsperoEntry {
                    entry_type: be_u32(slot, 0x00)?,
                    reserved: be_u32(slot, 0x04)?,
                    flags1: be_u32(slot, 0x08)?,
                    flags2: be_u32(slot, 0x0C)?,
                    file_offset: be_u32(slot, 0x10)?,
                    size: be_u32(slot, 0x14)?,
                    padding: raw::<8>(slot, 0x18)?,
                })
            })
            .collect()
    }

    async fn read_entry(&self, entry: &ProsperoEntry) -> Result<Bytes> {
        let base = self.base_offset().await?;
        read_exact_at(
            self.source,
            base + u64::from(entry.file_offset),
            u64::from(entry.size),
            "Prospero entry",
        )
        .await
    }

    /// Scan every entry for the parameter blob and the icon.
    ///
    /// Encrypted entries are read as-is here; only [`Self::extract_by_type`]
    /// refuses them.
    pub async fn parse_package(&self) -> Result<ProsperoPackage> {
        let mut package = ProsperoPackage::default();

        for entry in self.entries().await? {
            match entry.entry_type {
                PARAM_JSON_TYPE => {
                    let blob = self.read_entry(entry).await?;
                    let (title, title_id) = decode_params(&blob)?;
                    package.title = title;
                    package.title_id = title_id;
                }
                ICON0_TYPE => match self.read_entry(entry).await {
                    Ok(icon) => package.icon = Some(icon),
                    Err(e) => debug!(error = %e, "Prospero package has no usable icon"),
                },
                _ => {}
            }
        }

        Ok(package)
    }

    /// Read the first entry of `entry_type`, rounded up to a 16-byte block
    /// and clamped at the container end. Missing and encrypted entries yield
    /// `None`.
    pub async fn extract_by_type(&self, entry_type: u32) -> Result<Option<Bytes>> {
        let Some(entry) = self
            .entries()
            .await?
            .iter()
            .find(|e| e.entry_type == entry_type)
            .copied()
        else {
            return Ok(None);
        };
        if entry.is_encrypted() {
            debug!(
                entry_type = format_args!("{entry_type:#06x}"),
                key_index = entry.key_index(),
                "Skipping encrypted Prospero entry"
            );
            return Ok(None);
        }

        let base = self.base_offset().await?;
        let start = base + u64::from(entry.file_offset);
        let size = u64::from(entry.size);

        let total = self.source.size();

        // The declared range must fit before rounding is applied.
        if start.checked_add(size).map_or(true, |end| end > total) {
            return Err(Error::format(format!(
                "Prospero entry at {start:#x}+{size:#x} exceeds container of {total} bytes"
            )));
        }

        let rounded = size.div_ceil(BLOCK_ALIGN) * BLOCK_ALIGN;
        let length = rounded.min(total - start);
        read_exact_at(self.source, start, length, "Prospero entry").await.map(Some)
    }
}

/// Pull `(title, title_id)` out of the JSON parameter blob.
fn decode_params(blob: &[u8]) -> Result<(String, String)> {
    let end = blob.iter().rposition(|&b| b != 0).map_or(0, |p| p + 1);
    let doc: Value = serde_json::from_slice(&blob[..end])?;

    let localized = doc
        .get("localizedParameters")
        .ok_or_else(|| Error::format("parameter blob has no localizedParameters"))?;
    let lang = localized
        .get("defaultLanguage")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::format("parameter blob has no defaultLanguage"))?;
    let strings = localized
        .get(lang)
        .ok_or_else(|| Error::format(format!("parameter blob has no strings for {lang}")))?;

    let title = strings
        .get("titleName")
        .and_then(Value::as_str)
        .unwrap_or_default();
    let title_id = doc.get("titleId").and_then(Value::as_str).unwrap_or_default();

    Ok((title.to_string(), title_id.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{param_json, ProsperoBuilder, ProsperoEntrySpec, PNG_STUB};
    use assert_matches::assert_matches;
    use pkgferry_common::MemorySource;

    fn with_base(mut data: Vec<u8>, base: i64) -> Vec<u8> {
        let at = BASE_POINTER_OFFSET as usize;
        data[at..at + 8].copy_from_slice(&base.to_le_bytes());
        data
    }

    #[test]
    fn test_key_index_and_encryption_flags() {
        let entry = ProsperoEntry {
            entry_type: ICON0_TYPE,
            reserved: 0,
            flags1: 0x8000_0000,
            flags2: 0x3000,
            file_offset: 0,
            size: 0,
            padding: [0; 8],
        };
        assert_eq!(entry.key_index(), 3);
        assert!(entry.is_encrypted());

        let plain = ProsperoEntry {
            flags1: 0x7FFF_FFFF,
            flags2: 0x0FFF,
            ..entry
        };
        assert_eq!(plain.key_index(), 0);
        assert!(!plain.is_encrypted());
    }

    #[tokio::test]
    async fn test_entries_decode_flags() {
        let data = ProsperoBuilder::new()
            .encrypted_entry(0x0400, vec![0u8; 4])
            .build();
        let source = MemorySource::new(data);
        let parser = ProsperoParser::new(&source);
        let entries = parser.entries().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].key_index(), 3);
        assert!(entries[0].is_encrypted());
    }

    #[tokio::test]
    async fn test_base_and_header() {
        let data = ProsperoBuilder::game("Game", "PPSA00001").build();
        let source = MemorySource::new(data);
        let parser = ProsperoParser::new(&source);
        assert_eq!(parser.base_offset().await.unwrap(), ProsperoBuilder::BASE as u64);
        let header = parser.header().await.unwrap();
        assert_eq!(header.entry_count, 1);
        assert_eq!(
            header.file_table_offset as usize,
            ProsperoBuilder::TABLE_OFFSET
        );
    }

    #[tokio::test]
    async fn test_parse_package_reads_default_language_title() {
        let data = ProsperoBuilder::game("Example Game", "PPSA00001")
            .icon(PNG_STUB)
            .build();
        let source = MemorySource::new(data);
        let pkg = ProsperoParser::new(&source).parse_package().await.unwrap();
        assert_eq!(pkg.title, "Example Game");
        assert_eq!(pkg.title_id, "PPSA00001");
        assert_eq!(pkg.icon.as_deref(), Some(PNG_STUB));
    }

    #[tokio::test]
    async fn test_parse_package_tolerates_trailing_nuls_in_json() {
        let mut blob = param_json("Padded", "PPSA00002");
        blob.extend_from_slice(&[0u8; 11]);
        let data = ProsperoBuilder::new().entry(PARAM_JSON_TYPE, blob).build();
        let source = MemorySource::new(data);
        let pkg = ProsperoParser::new(&source).parse_package().await.unwrap();
        assert_eq!(pkg.title, "Padded");
    }

    #[tokio::test]
    async fn test_parse_package_without_params_is_empty() {
        let data = ProsperoBuilder::new().icon(PNG_STUB).build();
        let source = MemorySource::new(data);
        let pkg = ProsperoParser::new(&source).parse_package().await.unwrap();
        assert_eq!(pkg.title, "");
        assert_eq!(pkg.title_id, "");
        assert!(pkg.icon.is_some());
    }

    #[tokio::test]
    async fn test_parse_package_does_not_skip_encrypted_entries() {
        let data = ProsperoBuilder::new()
            .encrypted_entry(PARAM_JSON_TYPE, param_json("Sealed", "PPSA00003"))
            .build();
        let source = MemorySource::new(data);
        let pkg = ProsperoParser::new(&source).parse_package().await.unwrap();
        assert_eq!(pkg.title, "Sealed");
    }

    #[tokio::test]
    async fn test_parse_package_rejects_invalid_json() {
        let data = ProsperoBuilder::new()
            .entry(PARAM_JSON_TYPE, b"{not json".to_vec())
            .build();
        let source = MemorySource::new(data);
        assert_matches!(
            ProsperoParser::new(&source).parse_package().await,
            Err(Error::Json(_))
        );
    }

    #[tokio::test]
    async fn test_parse_package_requires_localized_parameters() {
        let data = ProsperoBuilder::new()
            .entry(PARAM_JSON_TYPE, br#"{"titleId":"PPSA00004"}"#.to_vec())
            .build();
        let source = MemorySource::new(data);
        assert_matches!(
            ProsperoParser::new(&source).parse_package().await,
            Err(Error::Format(_))
        );
    }

    #[tokio::test]
    async fn test_extract_by_type_rounds_to_block() {
        let payload: Vec<u8> = (1..=20).collect();
        let data = ProsperoBuilder::new()
            .entry(0x0400, payload.clone())
            .entry(0x0401, vec![0xEE; 16])
            .build();
        let source = MemorySource::new(data);
        let blob = ProsperoParser::new(&source)
            .extract_by_type(0x0400)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(blob.len(), 32);
        assert_eq!(&blob[..20], &payload[..]);
        assert!(blob[20..].iter().all(|&b| b == 0));
    }

    #[tokio::test]
    async fn test_extract_by_type_clamps_at_container_end() {
        let data = ProsperoBuilder::new().entry(0x0400, vec![7u8; 20]).build();
        // drop the alignment padding after the last entry
        let trimmed = data[..data.len() - 12].to_vec();
        let source = MemorySource::new(trimmed);
        let blob = ProsperoParser::new(&source)
            .extract_by_type(0x0400)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(blob.len(), 20);
    }

    #[tokio::test]
    async fn test_extract_by_type_refuses_encrypted_and_missing() {
        let data = ProsperoBuilder::new()
            .encrypted_entry(ICON0_TYPE, PNG_STUB.to_vec())
            .build();
        let source = MemorySource::new(data);
        let parser = ProsperoParser::new(&source);
        assert_eq!(parser.extract_by_type(ICON0_TYPE).await.unwrap(), None);
        assert_eq!(parser.extract_by_type(PARAM_JSON_TYPE).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_extract_by_type_rejects_out_of_range_entry() {
        let data = ProsperoBuilder::new()
            .raw_entry(ProsperoEntrySpec {
                entry_type: 0x0400,
                flags1: 0,
                flags2: 0,
                data: vec![1; 4],
            })
            .build();
        let mut data = data;
        let slot = ProsperoBuilder::BASE + ProsperoBuilder::TABLE_OFFSET;
        data[slot + 0x14..slot + 0x18].copy_from_slice(&0x0010_0000u32.to_be_bytes());
        let source = MemorySource::new(data);
        assert_matches!(
            ProsperoParser::new(&source).extract_by_type(0x0400).await,
            Err(Error::Format(_))
        );
    }

    #[tokio::test]
    async fn test_negative_base_is_format_error() {
        let data = with_base(ProsperoBuilder::game("x", "PPSA00005").build(), -16);
        let source = MemorySource::new(data);
        let err = ProsperoParser::new(&source).header().await.unwrap_err();
        assert!(err.to_string().contains("negative"));
    }

    #[tokio::test]
    async fn test_base_beyond_container_is_format_error() {
        let data = ProsperoBuilder::game("x", "PPSA00006").build();
        let len = data.len() as i64;
        let source = MemorySource::new(with_base(data, len + 0x100));
        assert_matches!(
            ProsperoParser::new(&source).base_offset().await,
            Err(Error::Format(_))
        );
    }
}

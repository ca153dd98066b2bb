//! `PARAM.SFO` property list decoding.
//!
//! The SFO blob is little-endian throughout, unlike the big-endian Orbis
//! container that embeds it:
//!
//! ```text
//! 0x00  magic            u32  0x46535000 ("\0PSF" on disk)
//! 0x04  version          u32
//! 0x08  key table        u32  offset from blob start
//! 0x0C  data table       u32  offset from blob start
//! 0x10  entry count      u32
//! 0x14  index records    16 bytes each:
//!         +0 key offset  u16  relative to key table
//!         +2 format      u16
//!         +4 data length u32
//!         +8 max length  u32
//!         +C data offset u32  relative to data table
//! ```

use pkgferry_common::{Error, Result};
use serde::Serialize;

use crate::reader::{le_u16, le_u32};

/// SFO magic, read little-endian.
pub const SFO_MAGIC: u32 = 0x4653_5000;

const PREAMBLE_LEN: usize = 0x14;
const INDEX_RECORD_LEN: usize = 0x10;

/// Format code of a UTF-8 string stored without a terminator ("utf8-S").
pub const FMT_UTF8_SPECIAL: u16 = 0x0004;
/// Format code of a NUL-terminated UTF-8 string.
pub const FMT_UTF8: u16 = 0x0204;
/// Format code of a little-endian u32.
pub const FMT_INTEGER: u16 = 0x0404;

/// A decoded property value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum SfoValue {
    /// UTF-8 text with trailing NULs removed.
    Utf8(String),
    /// Little-endian 32-bit integer.
    Integer(u32),
    /// Any other format, kept verbatim.
    Bytes(Vec<u8>),
}

impl SfoValue {
    /// The string value, if this is a string property.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            SfoValue::Utf8(s) => Some(s),
            _ => None,
        }
    }

    /// The integer value, if this is an integer property.
    pub fn as_u32(&self) -> Option<u32> {
        match self {
            SfoValue::Integer(v) => Some(*v),
            _ => None,
        }
    }
}

/// An ordered list of decoded SFO properties.
///
/// Duplicate keys are kept in decode order; lookups return the last one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PropertyList {
    /// Format version from the preamble.
    pub version: u32,
    entries: Vec<(String, SfoValue)>,
}

impl PropertyList {
    /// Decode an SFO blob.
    pub fn decode(blob: &[u8]) -> Result<Self> {
        let magic = le_u32(blob, 0x00)?;
        if magic != SFO_MAGIC {
            return Err(Error::format(format!("invalid SFO magic {magic:#010x}")));
        }

        let version = le_u32(blob, 0x04)?;
        let key_table = le_u32(blob, 0x08)? as usize;
        let data_table = le_u32(blob, 0x0C)? as usize;
        let count = le_u32(blob, 0x10)? as usize;

        let index_fits = count
            .checked_mul(INDEX_RECORD_LEN)
            .and_then(|n| n.checked_add(PREAMBLE_LEN))
            .is_some_and(|end| end <= blob.len());
        if !index_fits {
            return Err(Error::format(format!(
                "SFO index of {count} records does not fit in {} bytes",
                blob.len()
            )));
        }

        let mut entries = Vec::with_capacity(count);
        for i in 0..count {
            let rec = PREAMBLE_LEN + i * INDEX_RECORD_LEN;
            let key_rel = le_u16(blob, rec)? as usize;
            let fmt = le_u16(blob, rec + 2)?;
            let len = le_u32(blob, rec + 4)? as usize;
            let data_rel = le_u32(blob, rec + 12)? as usize;

            let key = read_key(blob, key_table.saturating_add(key_rel))?;
            let data_start = data_table.saturating_add(data_rel);

            let value = match fmt {
                FMT_UTF8_SPECIAL | FMT_UTF8 => {
                    let raw = slice(blob, data_start, len, &key)?;
                    let end = raw.iter().rposition(|&b| b != 0).map_or(0, |p| p + 1);
                    SfoValue::Utf8(String::from_utf8_lossy(&raw[..end]).into_owned())
                }
                FMT_INTEGER => SfoValue::Integer(le_u32(blob, data_start)?),
                _ => SfoValue::Bytes(slice(blob, data_start, len, &key)?.to_vec()),
            };

            entries.push((key, value));
        }

        Ok(Self { version, entries })
    }

    /// Look up a property; the last decoded entry wins on duplicate keys.
    pub fn get(&self, key: &str) -> Option<&SfoValue> {
        self.entries
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    /// Look up a string property.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(SfoValue::as_str)
    }

    /// Look up an integer property.
    pub fn get_u32(&self, key: &str) -> Option<u32> {
        self.get(key).and_then(SfoValue::as_u32)
    }

    /// Iterate all properties in decode order, duplicates included.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &SfoValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of decoded properties, duplicates included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the list has no properties.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Read a NUL-terminated key starting at `start`. An unterminated key runs to
/// the end of the blob.
fn read_key(blob: &[u8], start: usize) -> Result<String> {
    let rest = blob
        .get(start..)
        .filter(|rest| !rest.is_empty())
        .ok_or_else(|| Error::format(format!("SFO key offset {start:#x} outside blob")))?;
    let end = rest.iter().position(|&b| b == 0).unwrap_or(rest.len());
    Ok(String::from_utf8_lossy(&rest[..end]).into_owned())
}

fn slice<'a>(blob: &'a [u8], start: usize, len: usize, key: &str) -> Result<&'a [u8]> {
    start
        .checked_add(len)
        .and_then(|end| blob.get(start..end))
        .ok_or_else(|| {
            Error::format(format!(
                "SFO value for {key} at {start:#x}+{len:#x} outside {}-byte blob",
                blob.len()
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::SfoBuilder;

    #[test]
    fn test_decodes_string_integer_and_bytes() {
        let blob = SfoBuilder::new()
            .string("TITLE", "Example Game")
            .integer("APP_VER", 0x0102)
            .bytes("PUBTOOLINFO", &[0xDE, 0xAD, 0xBE, 0xEF])
            .build();

        let list = PropertyList::decode(&blob).unwrap();
        assert_eq!(list.len(), 3);
        assert_eq!(
            list.get("TITLE"),
            Some(&SfoValue::Utf8("Example Game".to_string()))
        );
        assert_eq!(list.get("APP_VER"), Some(&SfoValue::Integer(0x0102)));
        assert_eq!(
            list.get("PUBTOOLINFO"),
            Some(&SfoValue::Bytes(vec![0xDE, 0xAD, 0xBE, 0xEF]))
        );
    }

    #[test]
    fn test_string_values_drop_trailing_nuls() {
        // Data length covers all 16 padded bytes, so seven NULs trail the text.
        let blob = SfoBuilder::new()
            .string_padded("TITLE_ID", "CUSA00001", 16)
            .build();
        let list = PropertyList::decode(&blob).unwrap();
        let title_id = list.get_str("TITLE_ID").unwrap();
        assert_eq!(title_id, "CUSA00001");
        assert!(!title_id.ends_with('\0'));
    }

    #[test]
    fn test_duplicate_keys_last_wins() {
        let blob = SfoBuilder::new()
            .string("TITLE", "First")
            .string("TITLE", "Second")
            .build();
        let list = PropertyList::decode(&blob).unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list.get_str("TITLE"), Some("Second"));
        let keys: Vec<_> = list.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["TITLE", "TITLE"]);
    }

    #[test]
    fn test_rejects_big_endian_magic() {
        let mut blob = SfoBuilder::new().string("TITLE", "x").build();
        blob[0..4].copy_from_slice(&SFO_MAGIC.to_be_bytes());
        let err = PropertyList::decode(&blob).unwrap_err();
        assert!(err.to_string().contains("invalid SFO magic"));
    }

    #[test]
    fn test_rejects_index_past_end() {
        let mut blob = SfoBuilder::new().string("TITLE", "x").build();
        blob[0x10..0x14].copy_from_slice(&1000u32.to_le_bytes());
        assert!(matches!(PropertyList::decode(&blob), Err(Error::Format(_))));
    }

    #[test]
    fn test_rejects_value_past_end() {
        let mut blob = SfoBuilder::new().string("TITLE", "x").build();
        // data length of the first record
        blob[0x18..0x1C].copy_from_slice(&0xFFFFu32.to_le_bytes());
        let err = PropertyList::decode(&blob).unwrap_err();
        assert!(err.to_string().contains("TITLE"));
    }

    #[test]
    fn test_accessors_on_wrong_type() {
        let blob = SfoBuilder::new().integer("ATTRIBUTE", 7).build();
        let list = PropertyList::decode(&blob).unwrap();
        assert_eq!(list.get_str("ATTRIBUTE"), None);
        assert_eq!(list.get_u32("ATTRIBUTE"), Some(7));
        assert_eq!(list.get("MISSING"), None);
        assert!(!list.is_empty());
    }
}

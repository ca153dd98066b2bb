//! Synthetic package builders for tests and benchmarks.
//!
//! The builders lay out just enough of each container for the parsers: the
//! header fields they read, the entry table, the entry payloads, and a
//! content id whose title-id token sits at the fixed fallback offset `0x47`.

use serde_json::json;

use crate::detect::{ORBIS_MAGIC, PROSPERO_MAGIC};
use crate::orbis::{ICON0_ID, PARAM_SFO_ID};
use crate::prospero::{BASE_POINTER_OFFSET, ICON0_TYPE, PARAM_JSON_TYPE};
use crate::sfo::{FMT_INTEGER, FMT_UTF8, SFO_MAGIC};

/// Format code the builder uses for opaque byte values.
pub const FMT_RAW: u16 = 0x0000;

/// Offset of the content id inside a container header.
const CONTENT_ID_OFFSET: usize = 0x40;
const CONTENT_ID_LEN: usize = 0x24;

fn align(n: usize, to: usize) -> usize {
    n.div_ceil(to) * to
}

fn content_id_for(title_id: &str) -> String {
    format!("UP0000-{title_id}_00-0000000000000000")
}

fn put_be_u32(buf: &mut [u8], at: usize, v: u32) {
    buf[at..at + 4].copy_from_slice(&v.to_be_bytes());
}

fn put_le_u32(buf: &mut Vec<u8>, v: u32) {
    buf.extend_from_slice(&v.to_le_bytes());
}

fn put_content_id(buf: &mut [u8], at: usize, content_id: &str) {
    let bytes = content_id.as_bytes();
    let n = bytes.len().min(CONTENT_ID_LEN);
    buf[at..at + n].copy_from_slice(&bytes[..n]);
}

struct SfoRecord {
    key: String,
    fmt: u16,
    len: u32,
    data: Vec<u8>,
}

/// Builds `PARAM.SFO` blobs.
#[derive(Default)]
pub struct SfoBuilder {
    records: Vec<SfoRecord>,
}

impl SfoBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// A NUL-terminated string, padded to a 4-byte boundary.
    pub fn string(self, key: &str, value: &str) -> Self {
        let len = value.len() + 1;
        self.string_with(key, value, len, align(len, 4))
    }

    /// A string whose recorded length covers all `max_len` padded bytes.
    pub fn string_padded(self, key: &str, value: &str, max_len: usize) -> Self {
        self.string_with(key, value, max_len, max_len)
    }

    fn string_with(mut self, key: &str, value: &str, len: usize, max_len: usize) -> Self {
        let mut data = value.as_bytes().to_vec();
        data.resize(max_len.max(data.len()), 0);
        self.records.push(SfoRecord {
            key: key.to_string(),
            fmt: FMT_UTF8,
            len: len as u32,
            data,
        });
        self
    }

    pub fn integer(mut self, key: &str, value: u32) -> Self {
        self.records.push(SfoRecord {
            key: key.to_string(),
            fmt: FMT_INTEGER,
            len: 4,
            data: value.to_le_bytes().to_vec(),
        });
        self
    }

    pub fn bytes(mut self, key: &str, value: &[u8]) -> Self {
        self.records.push(SfoRecord {
            key: key.to_string(),
            fmt: FMT_RAW,
            len: value.len() as u32,
            data: value.to_vec(),
        });
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let mut keys = Vec::new();
        let mut key_offsets = Vec::with_capacity(self.records.len());
        for rec in &self.records {
            key_offsets.push(keys.len() as u16);
            keys.extend_from_slice(rec.key.as_bytes());
            keys.push(0);
        }
        keys.resize(align(keys.len(), 4), 0);

        let key_table = 0x14 + self.records.len() * 0x10;
        let data_table = key_table + keys.len();

        let mut out = Vec::new();
        put_le_u32(&mut out, SFO_MAGIC);
        put_le_u32(&mut out, 0x0101);
        put_le_u32(&mut out, key_table as u32);
        put_le_u32(&mut out, data_table as u32);
        put_le_u32(&mut out, self.records.len() as u32);

        let mut data_rel = 0u32;
        for (rec, key_rel) in self.records.iter().zip(&key_offsets) {
            out.extend_from_slice(&key_rel.to_le_bytes());
            out.extend_from_slice(&rec.fmt.to_le_bytes());
            put_le_u32(&mut out, rec.len);
            put_le_u32(&mut out, rec.data.len() as u32);
            put_le_u32(&mut out, data_rel);
            data_rel += rec.data.len() as u32;
        }

        out.extend_from_slice(&keys);
        for rec in &self.records {
            out.extend_from_slice(&rec.data);
        }
        out
    }
}

/// Builds Orbis containers.
pub struct OrbisBuilder {
    content_id: String,
    entries: Vec<(u32, Vec<u8>)>,
}

impl Default for OrbisBuilder {
    fn default() -> Self {
        Self {
            content_id: content_id_for("CUSA12345"),
            entries: Vec::new(),
        }
    }
}

impl OrbisBuilder {
    /// Offset of the entry table in built containers.
    pub const TABLE_OFFSET: usize = 0x100;

    pub fn new() -> Self {
        Self::default()
    }

    /// A container with a `PARAM.SFO` carrying `title` and `title_id`, and a
    /// content id derived from `title_id`.
    pub fn game(title: &str, title_id: &str) -> Self {
        let sfo = SfoBuilder::new()
            .string("TITLE", title)
            .string("TITLE_ID", title_id)
            .integer("ATTRIBUTE", 0)
            .build();
        Self::new()
            .content_id(&content_id_for(title_id))
            .entry(PARAM_SFO_ID, sfo)
    }

    pub fn content_id(mut self, content_id: &str) -> Self {
        self.content_id = content_id.to_string();
        self
    }

    pub fn entry(mut self, id: u32, data: impl Into<Vec<u8>>) -> Self {
        self.entries.push((id, data.into()));
        self
    }

    pub fn icon(self, png: impl Into<Vec<u8>>) -> Self {
        self.entry(ICON0_ID, png)
    }

    pub fn build(&self) -> Vec<u8> {
        let table_len = self.entries.len() * 0x20;
        let mut out = vec![0u8; align(Self::TABLE_OFFSET + table_len, 0x10)];

        put_be_u32(&mut out, 0x00, ORBIS_MAGIC);
        put_be_u32(&mut out, 0x10, self.entries.len() as u32);
        put_be_u32(&mut out, 0x18, Self::TABLE_OFFSET as u32);
        put_content_id(&mut out, CONTENT_ID_OFFSET, &self.content_id);

        for (i, (id, data)) in self.entries.iter().enumerate() {
            let slot = Self::TABLE_OFFSET + i * 0x20;
            let offset = out.len();
            put_be_u32(&mut out, slot, *id);
            put_be_u32(&mut out, slot + 0x10, offset as u32);
            put_be_u32(&mut out, slot + 0x14, data.len() as u32);

            out.extend_from_slice(data);
            out.resize(align(out.len(), 0x10), 0);
        }
        out
    }
}

/// One Prospero entry table slot.
#[derive(Debug, Clone)]
pub struct ProsperoEntrySpec {
    pub entry_type: u32,
    pub flags1: u32,
    pub flags2: u32,
    pub data: Vec<u8>,
}

/// Builds Prospero containers: an outer wrapper whose little-endian pointer
/// at `0x58` locates the inner big-endian container.
pub struct ProsperoBuilder {
    content_id: String,
    entries: Vec<ProsperoEntrySpec>,
}

impl Default for ProsperoBuilder {
    fn default() -> Self {
        Self {
            content_id: content_id_for("PPSA12345"),
            entries: Vec::new(),
        }
    }
}

impl ProsperoBuilder {
    /// Offset of the inner container in built files.
    pub const BASE: usize = 0x200;
    /// Entry table offset, relative to [`Self::BASE`].
    pub const TABLE_OFFSET: usize = 0x100;

    pub fn new() -> Self {
        Self::default()
    }

    /// A container with a JSON parameter entry carrying `title` and
    /// `title_id`, and a content id derived from `title_id`.
    pub fn game(title: &str, title_id: &str) -> Self {
        Self::new()
            .content_id(&content_id_for(title_id))
            .entry(PARAM_JSON_TYPE, param_json(title, title_id))
    }

    pub fn content_id(mut self, content_id: &str) -> Self {
        self.content_id = content_id.to_string();
        self
    }

    pub fn entry(self, entry_type: u32, data: impl Into<Vec<u8>>) -> Self {
        self.raw_entry(ProsperoEntrySpec {
            entry_type,
            flags1: 0,
            flags2: 0,
            data: data.into(),
        })
    }

    pub fn encrypted_entry(self, entry_type: u32, data: impl Into<Vec<u8>>) -> Self {
        self.raw_entry(ProsperoEntrySpec {
            entry_type,
            flags1: 0x8000_0000,
            flags2: 0x3000,
            data: data.into(),
        })
    }

    pub fn icon(self, png: impl Into<Vec<u8>>) -> Self {
        self.entry(ICON0_TYPE, png)
    }

    pub fn raw_entry(mut self, spec: ProsperoEntrySpec) -> Self {
        self.entries.push(spec);
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let base = Self::BASE;
        let table_len = self.entries.len() * 0x20;
        let mut out = vec![0u8; align(base + Self::TABLE_OFFSET + table_len, 0x10)];

        put_be_u32(&mut out, 0x00, PROSPERO_MAGIC);
        let ptr = BASE_POINTER_OFFSET as usize;
        out[ptr..ptr + 8].copy_from_slice(&(base as i64).to_le_bytes());

        put_be_u32(&mut out, base + 0x10, self.entries.len() as u32);
        put_be_u32(&mut out, base + 0x18, Self::TABLE_OFFSET as u32);
        put_content_id(&mut out, base + CONTENT_ID_OFFSET, &self.content_id);

        for (i, spec) in self.entries.iter().enumerate() {
            let slot = base + Self::TABLE_OFFSET + i * 0x20;
            let offset = out.len() - base;
            put_be_u32(&mut out, slot, spec.entry_type);
            put_be_u32(&mut out, slot + 0x08, spec.flags1);
            put_be_u32(&mut out, slot + 0x0C, spec.flags2);
            put_be_u32(&mut out, slot + 0x10, offset as u32);
            put_be_u32(&mut out, slot + 0x14, spec.data.len() as u32);

            out.extend_from_slice(&spec.data);
            out.resize(align(out.len(), 0x10), 0);
        }
        out
    }
}

/// A minimal Prospero parameter JSON document.
pub fn param_json(title: &str, title_id: &str) -> Vec<u8> {
    let doc = json!({
        "contentId": content_id_for(title_id),
        "titleId": title_id,
        "localizedParameters": {
            "defaultLanguage": "en-US",
            "en-US": { "titleName": title },
            "ja-JP": { "titleName": format!("{title} (JP)") }
        }
    });
    doc.to_string().into_bytes()
}

/// An icon payload that starts with the PNG signature.
pub const PNG_STUB: &[u8] = b"\x89PNG\r\n\x1a\nicon-data";

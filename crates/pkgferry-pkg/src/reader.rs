//! Bounds-checked range reads and fixed-width field decoding.

use bytes::Bytes;
use pkgferry_common::{ByteSource, Error, Result};

/// Read exactly `length` bytes at `offset`, refusing ranges that do not fit
/// inside the source before the byte source is touched.
pub(crate) async fn read_exact_at(
    source: &dyn ByteSource,
    offset: u64,
    length: u64,
    what: &str,
) -> Result<Bytes> {
    let size = source.size();
    let end = offset
        .checked_add(length)
        .ok_or_else(|| Error::format(format!("{what} range overflows at {offset:#x}")))?;
    if end > size {
        return Err(Error::format(format!(
            "{what} at {offset:#x}+{length:#x} exceeds container of {size} bytes"
        )));
    }

    let buf = source.read_range(offset, length).await?;
    if (buf.len() as u64) != length {
        return Err(Error::format(format!(
            "{what} truncated: wanted {length} bytes, got {}",
            buf.len()
        )));
    }
    Ok(buf)
}

fn field<const N: usize>(buf: &[u8], at: usize) -> Result<[u8; N]> {
    at.checked_add(N)
        .and_then(|end| buf.get(at..end))
        .and_then(|s| s.try_into().ok())
        .ok_or_else(|| {
            Error::format(format!(
                "{N}-byte field at {at:#x} runs past end of {}-byte buffer",
                buf.len()
            ))
        })
}

/// Read a big-endian u32.
pub(crate) fn be_u32(buf: &[u8], at: usize) -> Result<u32> {
    field::<4>(buf, at).map(u32::from_be_bytes)
}

/// Read a little-endian u16.
pub(crate) fn le_u16(buf: &[u8], at: usize) -> Result<u16> {
    field::<2>(buf, at).map(u16::from_le_bytes)
}

/// Read a little-endian u32.
pub(crate) fn le_u32(buf: &[u8], at: usize) -> Result<u32> {
    field::<4>(buf, at).map(u32::from_le_bytes)
}

/// Read a little-endian i64.
pub(crate) fn le_i64(buf: &[u8], at: usize) -> Result<i64> {
    field::<8>(buf, at).map(i64::from_le_bytes)
}

/// Copy `N` raw bytes.
pub(crate) fn raw<const N: usize>(buf: &[u8], at: usize) -> Result<[u8; N]> {
    field::<N>(buf, at)
}

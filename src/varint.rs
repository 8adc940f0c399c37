//! 7-bits-per-byte unsigned variable length integers ("varlong"), and the
//! leading-value pack used to delta-encode a sequence of byte buffers
//! against their predecessor.

use crate::error::{Error, Result};
use bytes::{Buf, BufMut};

/// Writes `value` as a varlong: low 7 bits per byte, continuation bit set
/// on every byte but the last.
pub fn put_varlong<B: BufMut>(buf: &mut B, mut value: u64) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            buf.put_u8(byte);
            return;
        }
        buf.put_u8(byte | 0x80);
    }
}

/// Reads a varlong written by [`put_varlong`].
pub fn get_varlong<B: Buf>(buf: &mut B) -> Result<u64> {
    let mut value: u64 = 0;
    let mut shift = 0u32;
    loop {
        if !buf.has_remaining() {
            return Err(Error::Format("truncated varlong".into()));
        }
        let byte = buf.get_u8();
        value |= ((byte & 0x7f) as u64) << shift;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
        shift += 7;
        if shift >= 64 {
            return Err(Error::Format("varlong too long".into()));
        }
    }
}

const MAX_COMMON_PREFIX: usize = 32767;

/// Leading-value pack: writes `cur` as `[len+1 (0=null)][common_prefix_len][tail]`,
/// where `common_prefix_len` is the longest shared prefix with `prev`,
/// capped at [`MAX_COMMON_PREFIX`] and at `min(prev.len(), cur.len())`.
///
/// `ignore_leading` bytes of `cur`'s own prefix are always written out
/// verbatim even when they match `prev`; the page engine always passes 0.
pub fn pack_leading_value<B: BufMut>(buf: &mut B, prev: Option<&[u8]>, cur: Option<&[u8]>, ignore_leading: usize) {
    match cur {
        None => put_varlong(buf, 0),
        Some(cur) => {
            put_varlong(buf, cur.len() as u64 + 1);
            let prev = prev.unwrap_or(&[]);
            let max_common = prev.len().min(cur.len()).min(MAX_COMMON_PREFIX);
            let mut common = 0;
            while common < max_common && prev[common] == cur[common] {
                common += 1;
            }
            if common < ignore_leading {
                common = 0;
            }
            put_varlong(buf, common as u64);
            buf.put_slice(&cur[..ignore_leading.min(cur.len())]);
            buf.put_slice(&cur[ignore_leading.max(common)..]);
        }
    }
}

/// Inverse of [`pack_leading_value`].
pub fn unpack_leading_value<B: Buf>(buf: &mut B, prev: Option<&[u8]>, ignore_leading: usize) -> Result<Option<Vec<u8>>> {
    let marker = get_varlong(buf)?;
    if marker == 0 {
        return Ok(None);
    }
    let len = (marker - 1) as usize;
    let common = get_varlong(buf)? as usize;
    if common > len {
        return Err(Error::Format("common prefix longer than value".into()));
    }
    let prev = prev.unwrap_or(&[]);
    if common > prev.len() {
        return Err(Error::Format("common prefix longer than predecessor".into()));
    }
    let leading = ignore_leading.min(len);
    let mut out = Vec::with_capacity(len);
    out.extend_from_slice(&read_exact(buf, leading)?);
    if common > leading {
        out.extend_from_slice(&prev[leading..common]);
    }
    let tail_len = len - leading.max(common);
    out.extend_from_slice(&read_exact(buf, tail_len)?);
    Ok(Some(out))
}

fn read_exact<B: Buf>(buf: &mut B, len: usize) -> Result<Vec<u8>> {
    if buf.remaining() < len {
        return Err(Error::Format("truncated leading-value pack".into()));
    }
    let mut out = vec![0u8; len];
    buf.copy_to_slice(&mut out);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn varlong_roundtrip() {
        for value in [0u64, 1, 127, 128, 300, u32::MAX as u64, u64::MAX] {
            let mut buf = Vec::new();
            put_varlong(&mut buf, value);
            let mut slice = buf.as_slice();
            assert_eq!(get_varlong(&mut slice).unwrap(), value);
        }
    }

    #[test]
    fn leading_value_pack_roundtrip() {
        let prev = b"hello world".to_vec();
        let cur = b"hello there".to_vec();
        let mut buf = Vec::new();
        pack_leading_value(&mut buf, Some(&prev), Some(&cur), 0);
        let mut slice = buf.as_slice();
        let out = unpack_leading_value(&mut slice, Some(&prev), 0).unwrap();
        assert_eq!(out, Some(cur));
    }

    #[test]
    fn leading_value_pack_null() {
        let mut buf = Vec::new();
        pack_leading_value(&mut buf, None, None, 0);
        let mut slice = buf.as_slice();
        let out = unpack_leading_value(&mut slice, None, 0).unwrap();
        assert_eq!(out, None);
    }

    #[test]
    fn leading_value_pack_no_common_prefix() {
        let prev = b"aaa".to_vec();
        let cur = b"zzzz".to_vec();
        let mut buf = Vec::new();
        pack_leading_value(&mut buf, Some(&prev), Some(&cur), 0);
        let mut slice = buf.as_slice();
        let out = unpack_leading_value(&mut slice, Some(&prev), 0).unwrap();
        assert_eq!(out, Some(cur));
    }
}

//! Binary page format (spec §4.5): `PageFormat` wraps a page's header,
//! key codec, and value codec into one self-describing record.

use crate::error::{Error, Result};
use crate::page::{Page, PageKind, PageValue};
use crate::record_manager::{Recid, RecordManager, NULL_RECID};
use crate::serializer::{KeySerializer, ValueSerializer};
use crate::varint::{get_varlong, pack_leading_value, put_varlong, unpack_leading_value};
use bytes::{Buf, BufMut, Bytes, BytesMut};

const KIND_LEAF: u8 = 0;
const KIND_NONLEAF: u8 = 1;

const FORM_ALL_NULL: u8 = 0;
const FORM_ALL_INTEGERS: u8 = 1;
const FORM_ALL_INTEGERS_NEGATIVE: u8 = 2;
const FORM_ALL_LONGS: u8 = 3;
const FORM_ALL_LONGS_NEGATIVE: u8 = 4;
const FORM_ALL_STRINGS: u8 = 5;
const FORM_ALL_OTHER: u8 = 6;

const VALUE_NULL: u8 = 0;
const VALUE_LAZY: u8 = 1;
/// Inline tag bytes start here; an inline payload of length `len` is
/// tagged `VALUE_INLINE_BASE + len`, so `max_intree_record_size` must
/// leave the tag byte within `u8` range.
const VALUE_INLINE_BASE: u8 = 2;

/// Upper bound so the inline-length tag byte never overflows.
pub const MAX_INTREE_RECORD_SIZE_CEILING: usize = (u8::MAX - VALUE_INLINE_BASE) as usize;

/// Encodes `page` per spec §4.5. Oversized inline values are promoted to
/// their own lazy record via `record_manager` as part of encoding; the
/// in-memory `page` is not mutated (the caller sees the promotion once it
/// round-trips through `decode_page`).
pub fn encode_page<K, V>(
    page: &Page<K, V>,
    key_ser: &dyn KeySerializer<K>,
    value_ser: &dyn ValueSerializer<V>,
    max_intree_record_size: usize,
    record_manager: &mut dyn RecordManager,
) -> Result<Vec<u8>> {
    assert!(max_intree_record_size <= MAX_INTREE_RECORD_SIZE_CEILING);
    let mut buf = BytesMut::new();
    buf.put_u8(match page.kind {
        PageKind::Leaf => KIND_LEAF,
        PageKind::NonLeaf => KIND_NONLEAF,
    });
    if page.is_leaf() {
        put_varlong(&mut buf, page.previous);
        put_varlong(&mut buf, page.next);
    }
    let first_u8 = u8::try_from(page.first)
        .map_err(|_| Error::Format("page capacity exceeds u8 range".into()))?;
    buf.put_u8(first_u8);
    if !page.is_leaf() {
        for i in page.first..page.cap() {
            put_varlong(&mut buf, page.children[i]);
        }
    }
    encode_keys(&mut buf, page, key_ser)?;
    if page.is_leaf() {
        encode_values(&mut buf, page, value_ser, max_intree_record_size, record_manager)?;
    }
    Ok(buf.to_vec())
}

/// Decodes a page record written by [`encode_page`]. When `load_values`
/// is false, decoding stops after `first` (and, for non-leaf pages, the
/// children array); `keys` and `values`/`children` entries beyond that are
/// left empty, matching the partial-load carrier used by defrag.
pub fn decode_page<K, V>(
    recid: Recid,
    bytes: &[u8],
    cap: usize,
    key_ser: &dyn KeySerializer<K>,
    value_ser: &dyn ValueSerializer<V>,
    load_values: bool,
) -> Result<Page<K, V>> {
    let mut buf = Bytes::copy_from_slice(bytes);
    if !buf.has_remaining() {
        return Err(Error::Format("empty page record".into()));
    }
    let kind = match buf.get_u8() {
        KIND_LEAF => PageKind::Leaf,
        KIND_NONLEAF => PageKind::NonLeaf,
        other => return Err(Error::Format(format!("unknown page kind byte {other}"))),
    };
    let mut previous = NULL_RECID;
    let mut next = NULL_RECID;
    if kind == PageKind::Leaf {
        previous = get_varlong(&mut buf)?;
        next = get_varlong(&mut buf)?;
    }
    if !buf.has_remaining() {
        return Err(Error::Format("truncated page: missing first".into()));
    }
    let first = buf.get_u8() as usize;
    if first > cap {
        return Err(Error::Invariant(format!("decoded first {first} exceeds capacity {cap}")));
    }

    let mut page = match kind {
        PageKind::Leaf => Page::new_leaf(recid, cap),
        PageKind::NonLeaf => Page::new_non_leaf(recid, cap),
    };
    page.first = first;
    page.previous = previous;
    page.next = next;

    if kind == PageKind::NonLeaf {
        for i in first..cap {
            page.children[i] = get_varlong(&mut buf)?;
        }
    }
    if !load_values {
        return Ok(page);
    }

    decode_keys(&mut buf, &mut page, key_ser)?;
    if kind == PageKind::Leaf {
        decode_values(&mut buf, &mut page, value_ser, first, cap)?;
    }
    Ok(page)
}

fn encode_keys<K, V>(buf: &mut BytesMut, page: &Page<K, V>, key_ser: &dyn KeySerializer<K>) -> Result<()> {
    let live = page.first..page.cap();
    if live.is_empty() || page.keys[live.clone()].iter().all(|k| k.is_none()) {
        buf.put_u8(FORM_ALL_NULL);
        return Ok(());
    }

    if let Some(projection) = project_i64(page, key_ser) {
        if let Some(form) = try_integer_form(&projection) {
            write_integer_form(buf, &projection, form);
            return Ok(());
        }
    }

    if key_ser.is_string() {
        encode_leading_value_keys(buf, page, key_ser, FORM_ALL_STRINGS)?;
        return Ok(());
    }
    if key_ser.is_default_serializer() {
        return encode_plain_keys(buf, page, key_ser);
    }
    encode_leading_value_keys(buf, page, key_ser, FORM_ALL_OTHER)
}

fn project_i64<K, V>(page: &Page<K, V>, key_ser: &dyn KeySerializer<K>) -> Option<Vec<Option<i64>>> {
    let mut out = Vec::with_capacity(page.cap() - page.first);
    for i in page.first..page.cap() {
        match &page.keys[i] {
            None => out.push(None),
            Some(k) => out.push(Some(key_ser.as_i64(k)?)),
        }
    }
    Some(out)
}

fn try_integer_form(values: &[Option<i64>]) -> Option<u8> {
    let present: Vec<i64> = values.iter().filter_map(|v| *v).collect();
    if present.is_empty() {
        return None;
    }
    let first_sign_negative = values[0].map(|v| v < 0).unwrap_or(false);
    let fits_i32 = present.iter().all(|v| *v >= i32::MIN as i64 && *v <= i32::MAX as i64);
    if fits_i32 {
        return Some(if first_sign_negative { FORM_ALL_INTEGERS_NEGATIVE } else { FORM_ALL_INTEGERS });
    }
    if present.contains(&i64::MIN) {
        return None;
    }
    let min = *present.iter().min().unwrap();
    let max = *present.iter().max().unwrap();
    if max.checked_sub(min).map(|span| span < i64::MAX / 2).unwrap_or(false) {
        return Some(if first_sign_negative { FORM_ALL_LONGS_NEGATIVE } else { FORM_ALL_LONGS });
    }
    None
}

fn write_integer_form(buf: &mut BytesMut, values: &[Option<i64>], form: u8) {
    buf.put_u8(form);
    let first_val = values[0].expect("integer form requires a present first value");
    put_varlong(buf, first_val.unsigned_abs());
    let mut running = first_val;
    for value in &values[1..] {
        match value {
            None => put_varlong(buf, 0),
            Some(v) => {
                let delta = v - running;
                debug_assert!(delta > 0, "keys must be strictly ascending");
                put_varlong(buf, delta as u64);
                running = *v;
            }
        }
    }
}

fn decode_integer_form<K, V>(buf: &mut Bytes, page: &mut Page<K, V>, key_ser: &dyn KeySerializer<K>, negative: bool) -> Result<()> {
    let first = page.first;
    let cap = page.cap();
    let magnitude = get_varlong(buf)? as i64;
    let mut running = if negative { -magnitude } else { magnitude };
    page.keys[first] = Some(from_i64_checked(key_ser, running)?);
    for i in (first + 1)..cap {
        let delta = get_varlong(buf)?;
        if delta == 0 {
            page.keys[i] = None;
        } else {
            running += delta as i64;
            page.keys[i] = Some(from_i64_checked(key_ser, running)?);
        }
    }
    Ok(())
}

fn from_i64_checked<K>(key_ser: &dyn KeySerializer<K>, value: i64) -> Result<K> {
    key_ser.from_i64(value).ok_or_else(|| Error::Format(format!("key serializer rejected i64 projection {value}")))
}

fn encode_leading_value_keys<K, V>(buf: &mut BytesMut, page: &Page<K, V>, key_ser: &dyn KeySerializer<K>, form: u8) -> Result<()> {
    buf.put_u8(form);
    let mut prev: Option<Vec<u8>> = None;
    for i in page.first..page.cap() {
        let cur = match &page.keys[i] {
            None => None,
            Some(k) => Some(key_ser.serialize(k)?),
        };
        pack_leading_value(buf, prev.as_deref(), cur.as_deref(), 0);
        if cur.is_some() {
            prev = cur;
        }
    }
    Ok(())
}

/// `ALL_OTHER` with the default object serializer: each live slot's bytes
/// written back-to-back (`[len+1 (0=null)][bytes]`), skipping the
/// common-prefix search leading-value pack does, since generic serialized
/// objects rarely share a useful byte prefix.
fn encode_plain_keys<K, V>(buf: &mut BytesMut, page: &Page<K, V>, key_ser: &dyn KeySerializer<K>) -> Result<()> {
    buf.put_u8(FORM_ALL_OTHER);
    for i in page.first..page.cap() {
        match &page.keys[i] {
            None => put_varlong(buf, 0),
            Some(k) => {
                let bytes = key_ser.serialize(k)?;
                put_varlong(buf, bytes.len() as u64 + 1);
                buf.put_slice(&bytes);
            }
        }
    }
    Ok(())
}

fn decode_plain_keys<K, V>(buf: &mut Bytes, page: &mut Page<K, V>, key_ser: &dyn KeySerializer<K>) -> Result<()> {
    for i in page.first..page.cap() {
        let marker = get_varlong(buf)?;
        page.keys[i] = if marker == 0 {
            None
        } else {
            let len = (marker - 1) as usize;
            if buf.remaining() < len {
                return Err(Error::Format("truncated plain key".into()));
            }
            let bytes = buf.copy_to_bytes(len);
            Some(key_ser.deserialize(&bytes)?)
        };
    }
    Ok(())
}

fn decode_leading_value_keys<K, V>(buf: &mut Bytes, page: &mut Page<K, V>, key_ser: &dyn KeySerializer<K>) -> Result<()> {
    let mut prev: Option<Vec<u8>> = None;
    for i in page.first..page.cap() {
        let cur = unpack_leading_value(buf, prev.as_deref(), 0)?;
        page.keys[i] = match &cur {
            None => None,
            Some(bytes) => Some(key_ser.deserialize(bytes)?),
        };
        if cur.is_some() {
            prev = cur;
        }
    }
    Ok(())
}

fn decode_keys<K, V>(buf: &mut Bytes, page: &mut Page<K, V>, key_ser: &dyn KeySerializer<K>) -> Result<()> {
    if !buf.has_remaining() {
        return Err(Error::Format("truncated page: missing key form tag".into()));
    }
    let form = buf.get_u8();
    match form {
        FORM_ALL_NULL => {
            for i in page.first..page.cap() {
                page.keys[i] = None;
            }
            Ok(())
        }
        FORM_ALL_INTEGERS => decode_integer_form(buf, page, key_ser, false),
        FORM_ALL_INTEGERS_NEGATIVE => decode_integer_form(buf, page, key_ser, true),
        FORM_ALL_LONGS => decode_integer_form(buf, page, key_ser, false),
        FORM_ALL_LONGS_NEGATIVE => decode_integer_form(buf, page, key_ser, true),
        FORM_ALL_STRINGS => decode_leading_value_keys(buf, page, key_ser),
        FORM_ALL_OTHER => {
            if key_ser.is_default_serializer() {
                decode_plain_keys(buf, page, key_ser)
            } else {
                decode_leading_value_keys(buf, page, key_ser)
            }
        }
        other => Err(Error::Format(format!("unknown key form tag {other}"))),
    }
}

fn encode_values<K, V>(
    buf: &mut BytesMut,
    page: &Page<K, V>,
    value_ser: &dyn ValueSerializer<V>,
    max_intree_record_size: usize,
    record_manager: &mut dyn RecordManager,
) -> Result<()> {
    for i in page.first..page.cap() {
        match &page.values[i] {
            PageValue::None => buf.put_u8(VALUE_NULL),
            PageValue::Lazy(recid) => {
                buf.put_u8(VALUE_LAZY);
                put_varlong(buf, *recid);
            }
            PageValue::Inline(value) => {
                let bytes = value_ser.serialize(value)?;
                if bytes.len() <= max_intree_record_size {
                    buf.put_u8(VALUE_INLINE_BASE + bytes.len() as u8);
                    buf.put_slice(&bytes);
                } else {
                    let recid = record_manager.insert(bytes)?;
                    buf.put_u8(VALUE_LAZY);
                    put_varlong(buf, recid);
                }
            }
        }
    }
    Ok(())
}

fn decode_values<K, V>(
    buf: &mut Bytes,
    page: &mut Page<K, V>,
    value_ser: &dyn ValueSerializer<V>,
    first: usize,
    cap: usize,
) -> Result<()> {
    for i in first..cap {
        if !buf.has_remaining() {
            return Err(Error::Format("truncated page: missing value tag".into()));
        }
        let tag = buf.get_u8();
        page.values[i] = match tag {
            VALUE_NULL => PageValue::None,
            VALUE_LAZY => PageValue::Lazy(get_varlong(buf)?),
            _ => {
                let len = (tag - VALUE_INLINE_BASE) as usize;
                if buf.remaining() < len {
                    return Err(Error::Format("truncated page: missing inline value bytes".into()));
                }
                let mut bytes = vec![0u8; len];
                buf.copy_to_slice(&mut bytes);
                PageValue::Inline(value_ser.deserialize(&bytes)?)
            }
        };
    }
    Ok(())
}

use bytes::{BufMut, BytesMut};

use crate::error::PackstreamError;
use crate::markers;
use crate::structures::Structure;
use crate::value::Value;

const MAX_SIZE: usize = u32::MAX as usize;

/// Pack `value` onto the end of `out`, using the smallest encoding that
/// fits: signed integers use the smallest representation that holds the
/// value.
pub fn pack(out: &mut BytesMut, value: &Value) -> Result<(), PackstreamError> {
    match value {
        Value::Null => out.put_u8(markers::NULL),
        Value::Boolean(true) => out.put_u8(markers::TRUE),
        Value::Boolean(false) => out.put_u8(markers::FALSE),
        Value::Integer(i) => pack_int(out, *i),
        Value::Float(f) => {
            out.put_u8(markers::FLOAT);
            out.put_f64(*f);
        }
        Value::String(s) => pack_string(out, s)?,
        Value::Bytes(b) => pack_bytes(out, b)?,
        Value::List(items) => pack_list(out, items)?,
        Value::Map(map) => pack_map(out, map)?,
        Value::Structure(s) => pack_structure(out, s)?,
    }
    Ok(())
}

fn pack_int(out: &mut BytesMut, i: i64) {
    if (-16..=127).contains(&i) {
        out.put_i8(i as i8);
    } else if (i8::MIN as i64..=i8::MAX as i64).contains(&i) {
        out.put_u8(markers::INT_8);
        out.put_i8(i as i8);
    } else if (i16::MIN as i64..=i16::MAX as i64).contains(&i) {
        out.put_u8(markers::INT_16);
        out.put_i16(i as i16);
    } else if (i32::MIN as i64..=i32::MAX as i64).contains(&i) {
        out.put_u8(markers::INT_32);
        out.put_i32(i as i32);
    } else {
        out.put_u8(markers::INT_64);
        out.put_i64(i);
    }
}

fn pack_string(out: &mut BytesMut, s: &str) -> Result<(), PackstreamError> {
    let bytes = s.as_bytes();
    let len = bytes.len();
    if len > MAX_SIZE {
        return Err(PackstreamError::TooLarge { len });
    }
    if len < 16 {
        out.put_u8(markers::TINY_STRING | len as u8);
    } else if len <= u8::MAX as usize {
        out.put_u8(markers::STRING_8);
        out.put_u8(len as u8);
    } else if len <= u16::MAX as usize {
        out.put_u8(markers::STRING_16);
        out.put_u16(len as u16);
    } else {
        out.put_u8(markers::STRING_32);
        out.put_u32(len as u32);
    }
    out.put_slice(bytes);
    Ok(())
}

fn pack_bytes(out: &mut BytesMut, b: &[u8]) -> Result<(), PackstreamError> {
    let len = b.len();
    if len > MAX_SIZE {
        return Err(PackstreamError::TooLarge { len });
    }
    if len <= u8::MAX as usize {
        out.put_u8(markers::BYTES_8);
        out.put_u8(len as u8);
    } else if len <= u16::MAX as usize {
        out.put_u8(markers::BYTES_16);
        out.put_u16(len as u16);
    } else {
        out.put_u8(markers::BYTES_32);
        out.put_u32(len as u32);
    }
    out.put_slice(b);
    Ok(())
}

fn pack_list(out: &mut BytesMut, items: &[Value]) -> Result<(), PackstreamError> {
    let len = items.len();
    if len > MAX_SIZE {
        return Err(PackstreamError::TooLarge { len });
    }
    if len < 16 {
        out.put_u8(markers::TINY_LIST | len as u8);
    } else if len <= u8::MAX as usize {
        out.put_u8(markers::LIST_8);
        out.put_u8(len as u8);
    } else if len <= u16::MAX as usize {
        out.put_u8(markers::LIST_16);
        out.put_u16(len as u16);
    } else {
        out.put_u8(markers::LIST_32);
        out.put_u32(len as u32);
    }
    for item in items {
        pack(out, item)?;
    }
    Ok(())
}

fn pack_map(
    out: &mut BytesMut,
    map: &std::collections::HashMap<String, Value>,
) -> Result<(), PackstreamError> {
    // Undefined (Null) entries are omitted entirely rather than packed as
    // an explicit null — the header advertises n - k entries when k
    // values are undefined.
    let entries: Vec<(&String, &Value)> = map
        .iter()
        .filter(|(_, v)| !matches!(v, Value::Null))
        .collect();
    let len = entries.len();
    if len > MAX_SIZE {
        return Err(PackstreamError::TooLarge { len });
    }
    if len < 16 {
        out.put_u8(markers::TINY_MAP | len as u8);
    } else if len <= u8::MAX as usize {
        out.put_u8(markers::MAP_8);
        out.put_u8(len as u8);
    } else if len <= u16::MAX as usize {
        out.put_u8(markers::MAP_16);
        out.put_u16(len as u16);
    } else {
        out.put_u8(markers::MAP_32);
        out.put_u32(len as u32);
    }
    for (k, v) in entries {
        pack_string(out, k)?;
        pack(out, v)?;
    }
    Ok(())
}

fn pack_structure(out: &mut BytesMut, s: &Structure) -> Result<(), PackstreamError> {
    // Graph value types are legal on the wire only as *responses*;
    // packing one as an outbound request parameter is a protocol error
    // at a higher layer (the connection rejects it before sending any
    // bytes). This codec still encodes the bytes faithfully when asked,
    // since it's also used to encode server-originated structures in
    // tests.
    let len = s.fields.len();
    if len > u16::MAX as usize {
        return Err(PackstreamError::TooLarge { len });
    }
    if len < 16 {
        out.put_u8(markers::TINY_STRUCT | len as u8);
    } else if len <= u8::MAX as usize {
        out.put_u8(markers::STRUCT_8);
        out.put_u8(len as u8);
    } else {
        out.put_u8(markers::STRUCT_16);
        out.put_u16(len as u16);
    }
    out.put_u8(s.signature);
    for field in &s.fields {
        pack(out, field)?;
    }
    Ok(())
}

/// Returns `true` for value shapes that may never be sent as request
/// parameters: graph-value types are not legal as request parameters and
/// fail with a protocol error.
pub fn is_request_illegal(value: &Value) -> bool {
    match value {
        Value::Structure(_) => true,
        Value::List(items) => items.iter().any(is_request_illegal),
        Value::Map(map) => map.values().any(is_request_illegal),
        _ => false,
    }
}

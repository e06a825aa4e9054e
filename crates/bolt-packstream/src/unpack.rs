use bytes::{Buf, Bytes};

use crate::error::PackstreamError;
use crate::markers;
use crate::structures::Structure;
use crate::value::Value;

/// Unpack a single value from the front of `buf`, advancing it past the
/// consumed bytes. Structures are returned as raw [`Structure`]s inside
/// [`Value::Structure`]; call [`crate::structures::Structure::into_typed`]
/// to interpret a known signature.
pub fn unpack(buf: &mut Bytes) -> Result<Value, PackstreamError> {
    let marker = read_u8(buf)?;
    unpack_after_marker(buf, marker)
}

fn unpack_after_marker(buf: &mut Bytes, marker: u8) -> Result<Value, PackstreamError> {
    match marker {
        markers::NULL => Ok(Value::Null),
        markers::TRUE => Ok(Value::Boolean(true)),
        markers::FALSE => Ok(Value::Boolean(false)),
        markers::FLOAT => Ok(Value::Float(read_f64(buf)?)),
        markers::INT_8 => Ok(Value::Integer(read_i8(buf)? as i64)),
        markers::INT_16 => Ok(Value::Integer(read_i16(buf)? as i64)),
        markers::INT_32 => Ok(Value::Integer(read_i32(buf)? as i64)),
        markers::INT_64 => Ok(Value::Integer(read_i64(buf)?)),
        markers::BYTES_8 => {
            let len = read_u8(buf)? as usize;
            Ok(Value::Bytes(read_exact(buf, len)?))
        }
        markers::BYTES_16 => {
            let len = read_u16(buf)? as usize;
            Ok(Value::Bytes(read_exact(buf, len)?))
        }
        markers::BYTES_32 => {
            let len = read_u32(buf)? as usize;
            Ok(Value::Bytes(read_exact(buf, len)?))
        }
        markers::STRING_8 => {
            let len = read_u8(buf)? as usize;
            Ok(Value::String(read_string(buf, len)?))
        }
        markers::STRING_16 => {
            let len = read_u16(buf)? as usize;
            Ok(Value::String(read_string(buf, len)?))
        }
        markers::STRING_32 => {
            let len = read_u32(buf)? as usize;
            Ok(Value::String(read_string(buf, len)?))
        }
        markers::LIST_8 => {
            let len = read_u8(buf)? as usize;
            unpack_list(buf, len)
        }
        markers::LIST_16 => {
            let len = read_u16(buf)? as usize;
            unpack_list(buf, len)
        }
        markers::LIST_32 => {
            let len = read_u32(buf)? as usize;
            unpack_list(buf, len)
        }
        markers::MAP_8 => {
            let len = read_u8(buf)? as usize;
            unpack_map(buf, len)
        }
        markers::MAP_16 => {
            let len = read_u16(buf)? as usize;
            unpack_map(buf, len)
        }
        markers::MAP_32 => {
            let len = read_u32(buf)? as usize;
            unpack_map(buf, len)
        }
        markers::STRUCT_8 => {
            let len = read_u8(buf)? as usize;
            unpack_structure(buf, len)
        }
        markers::STRUCT_16 => {
            let len = read_u16(buf)? as usize;
            unpack_structure(buf, len)
        }
        other => {
            if other & 0xF0 == markers::TINY_STRING & 0xF0 && other <= 0x8F {
                let len = (other & 0x0F) as usize;
                Ok(Value::String(read_string(buf, len)?))
            } else if (markers::TINY_LIST..=0x9F).contains(&other) {
                unpack_list(buf, (other & 0x0F) as usize)
            } else if (markers::TINY_MAP..=0xAF).contains(&other) {
                unpack_map(buf, (other & 0x0F) as usize)
            } else if (markers::TINY_STRUCT..=0xBF).contains(&other) {
                unpack_structure(buf, (other & 0x0F) as usize)
            } else if (0xF0..=0xFF).contains(&other) || other <= 0x7F {
                // Tiny int: the marker byte doubles as the value for both
                // the positive (0x00-0x7F) and negative (0xF0-0xFF) ranges.
                Ok(Value::Integer(other as i8 as i64))
            } else {
                Err(PackstreamError::UnknownMarker { marker: other })
            }
        }
    }
}

fn unpack_list(buf: &mut Bytes, len: usize) -> Result<Value, PackstreamError> {
    let mut items = Vec::with_capacity(len.min(4096));
    for _ in 0..len {
        items.push(unpack(buf)?);
    }
    Ok(Value::List(items))
}

fn unpack_map(buf: &mut Bytes, len: usize) -> Result<Value, PackstreamError> {
    let mut map = std::collections::HashMap::with_capacity(len.min(4096));
    for _ in 0..len {
        let key = match unpack(buf)? {
            Value::String(s) => s,
            other => {
                return Err(PackstreamError::UnknownMarker {
                    marker: marker_of(&other),
                })
            }
        };
        let value = unpack(buf)?;
        map.insert(key, value);
    }
    Ok(Value::Map(map))
}

fn unpack_structure(buf: &mut Bytes, field_count: usize) -> Result<Value, PackstreamError> {
    let signature = read_u8(buf)?;
    let mut fields = Vec::with_capacity(field_count.min(4096));
    for _ in 0..field_count {
        fields.push(unpack(buf)?);
    }
    Ok(Value::Structure(Structure::new(signature, fields)))
}

fn marker_of(_v: &Value) -> u8 {
    0
}

fn read_u8(buf: &mut Bytes) -> Result<u8, PackstreamError> {
    if buf.remaining() < 1 {
        return Err(PackstreamError::UnexpectedEof);
    }
    Ok(buf.get_u8())
}

fn read_i8(buf: &mut Bytes) -> Result<i8, PackstreamError> {
    if buf.remaining() < 1 {
        return Err(PackstreamError::UnexpectedEof);
    }
    Ok(buf.get_i8())
}

fn read_u16(buf: &mut Bytes) -> Result<u16, PackstreamError> {
    if buf.remaining() < 2 {
        return Err(PackstreamError::UnexpectedEof);
    }
    Ok(buf.get_u16())
}

fn read_i16(buf: &mut Bytes) -> Result<i16, PackstreamError> {
    if buf.remaining() < 2 {
        return Err(PackstreamError::UnexpectedEof);
    }
    Ok(buf.get_i16())
}

fn read_u32(buf: &mut Bytes) -> Result<u32, PackstreamError> {
    if buf.remaining() < 4 {
        return Err(PackstreamError::UnexpectedEof);
    }
    Ok(buf.get_u32())
}

fn read_i32(buf: &mut Bytes) -> Result<i32, PackstreamError> {
    if buf.remaining() < 4 {
        return Err(PackstreamError::UnexpectedEof);
    }
    Ok(buf.get_i32())
}

fn read_i64(buf: &mut Bytes) -> Result<i64, PackstreamError> {
    if buf.remaining() < 8 {
        return Err(PackstreamError::UnexpectedEof);
    }
    Ok(buf.get_i64())
}

fn read_f64(buf: &mut Bytes) -> Result<f64, PackstreamError> {
    if buf.remaining() < 8 {
        return Err(PackstreamError::UnexpectedEof);
    }
    Ok(buf.get_f64())
}

fn read_exact(buf: &mut Bytes, len: usize) -> Result<Vec<u8>, PackstreamError> {
    if buf.remaining() < len {
        return Err(PackstreamError::UnexpectedEof);
    }
    Ok(buf.copy_to_bytes(len).to_vec())
}

fn read_string(buf: &mut Bytes, len: usize) -> Result<String, PackstreamError> {
    let bytes = read_exact(buf, len)?;
    Ok(String::from_utf8(bytes)?)
}

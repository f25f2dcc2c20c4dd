/// Row codec: length-prefixed column values in declaration order.
///
/// Layout: [column_count u16] then per column a tag byte and payload:
///   0 NULL      (no payload)
///   1 Integer   zig-zag varint
///   2 Real      8 bytes little endian
///   3 Text      varint length + UTF-8 bytes
///   4 Blob      varint length + bytes
///   5 Boolean   1 byte
///   6 Json      varint length + canonical JSON text
use crate::error::{Result, ZqError};
use crate::types::Value;

const TAG_NULL: u8 = 0;
const TAG_INTEGER: u8 = 1;
const TAG_REAL: u8 = 2;
const TAG_TEXT: u8 = 3;
const TAG_BLOB: u8 = 4;
const TAG_BOOLEAN: u8 = 5;
const TAG_JSON: u8 = 6;

pub fn write_varint(buf: &mut Vec<u8>, mut v: u64) {
    loop {
        let byte = (v & 0x7F) as u8;
        v >>= 7;
        if v == 0 {
            buf.push(byte);
            return;
        }
        buf.push(byte | 0x80);
    }
}

pub fn read_varint(data: &[u8], offset: &mut usize) -> Option<u64> {
    let mut v = 0u64;
    let mut shift = 0u32;
    loop {
        let byte = *data.get(*offset)?;
        *offset += 1;
        v |= ((byte & 0x7F) as u64) << shift;
        if byte & 0x80 == 0 {
            return Some(v);
        }
        shift += 7;
        if shift >= 64 {
            return None;
        }
    }
}

fn zigzag(v: i64) -> u64 {
    ((v << 1) ^ (v >> 63)) as u64
}

fn unzigzag(v: u64) -> i64 {
    ((v >> 1) as i64) ^ -((v & 1) as i64)
}

pub fn encode_row(values: &[Value]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(2 + values.len() * 8);
    buf.extend_from_slice(&(values.len() as u16).to_le_bytes());
    for value in values {
        match value {
            Value::Null => buf.push(TAG_NULL),
            Value::Integer(v) => {
                buf.push(TAG_INTEGER);
                write_varint(&mut buf, zigzag(*v));
            }
            Value::Real(v) => {
                buf.push(TAG_REAL);
                buf.extend_from_slice(&v.to_le_bytes());
            }
            Value::Text(s) => {
                buf.push(TAG_TEXT);
                write_varint(&mut buf, s.len() as u64);
                buf.extend_from_slice(s.as_bytes());
            }
            Value::Blob(b) => {
                buf.push(TAG_BLOB);
                write_varint(&mut buf, b.len() as u64);
                buf.extend_from_slice(b);
            }
            Value::Boolean(b) => {
                buf.push(TAG_BOOLEAN);
                buf.push(*b as u8);
            }
            Value::Json(j) => {
                let text = j.to_string();
                buf.push(TAG_JSON);
                write_varint(&mut buf, text.len() as u64);
                buf.extend_from_slice(text.as_bytes());
            }
        }
    }
    buf
}

pub fn decode_row(data: &[u8]) -> Result<Vec<Value>> {
    let malformed = || ZqError::Corrupt("malformed row payload".into());
    if data.len() < 2 {
        return Err(malformed());
    }
    let count = u16::from_le_bytes(data[0..2].try_into().unwrap()) as usize;
    let mut offset = 2;
    let mut values = Vec::with_capacity(count);
    for _ in 0..count {
        let tag = *data.get(offset).ok_or_else(malformed)?;
        offset += 1;
        let value = match tag {
            TAG_NULL => Value::Null,
            TAG_INTEGER => {
                let raw = read_varint(data, &mut offset).ok_or_else(malformed)?;
                Value::Integer(unzigzag(raw))
            }
            TAG_REAL => {
                let bytes = data.get(offset..offset + 8).ok_or_else(malformed)?;
                offset += 8;
                Value::Real(f64::from_le_bytes(bytes.try_into().unwrap()))
            }
            TAG_TEXT => {
                let len = read_varint(data, &mut offset).ok_or_else(malformed)? as usize;
                let bytes = data.get(offset..offset + len).ok_or_else(malformed)?;
                offset += len;
                Value::Text(String::from_utf8(bytes.to_vec()).map_err(|_| malformed())?)
            }
            TAG_BLOB => {
                let len = read_varint(data, &mut offset).ok_or_else(malformed)? as usize;
                let bytes = data.get(offset..offset + len).ok_or_else(malformed)?;
                offset += len;
                Value::Blob(bytes.to_vec())
            }
            TAG_BOOLEAN => {
                let byte = *data.get(offset).ok_or_else(malformed)?;
                offset += 1;
                Value::Boolean(byte != 0)
            }
            TAG_JSON => {
                let len = read_varint(data, &mut offset).ok_or_else(malformed)? as usize;
                let bytes = data.get(offset..offset + len).ok_or_else(malformed)?;
                offset += len;
                let parsed = serde_json::from_slice(bytes).map_err(|_| malformed())?;
                Value::Json(parsed)
            }
            _ => return Err(malformed()),
        };
        values.push(value);
    }
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn varint_round_trip() {
        for v in [0u64, 1, 127, 128, 300, u32::MAX as u64, u64::MAX] {
            let mut buf = Vec::new();
            write_varint(&mut buf, v);
            let mut offset = 0;
            assert_eq!(read_varint(&buf, &mut offset), Some(v));
            assert_eq!(offset, buf.len());
        }
    }

    #[test]
    fn row_round_trip_preserves_structure() {
        let row = vec![
            Value::Integer(-42),
            Value::Null,
            Value::Text("hello".into()),
            Value::Real(2.5),
            Value::Blob(vec![0, 1, 2, 255]),
            Value::Boolean(true),
            Value::Json(serde_json::json!({"a": [1, 2]})),
        ];
        let encoded = encode_row(&row);
        let decoded = decode_row(&encoded).unwrap();
        assert_eq!(decoded.len(), row.len());
        for (a, b) in row.iter().zip(&decoded) {
            match (a, b) {
                (Value::Null, Value::Null) => {}
                (Value::Json(x), Value::Json(y)) => assert_eq!(x, y),
                (Value::Boolean(x), Value::Boolean(y)) => assert_eq!(x, y),
                (x, y) => assert_eq!(x, y),
            }
        }
    }

    #[test]
    fn truncated_row_is_corrupt() {
        let row = vec![Value::Text("payload".into())];
        let encoded = encode_row(&row);
        assert!(decode_row(&encoded[..encoded.len() - 2]).is_err());
    }

    #[test]
    fn integer_extremes() {
        let row = vec![Value::Integer(i64::MIN), Value::Integer(i64::MAX)];
        let decoded = decode_row(&encode_row(&row)).unwrap();
        assert_eq!(decoded[0], Value::Integer(i64::MIN));
        assert_eq!(decoded[1], Value::Integer(i64::MAX));
    }
}

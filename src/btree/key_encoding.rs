/// Order-preserving key encoding.
///
/// Encoded keys compare correctly under plain byte comparison, which is all
/// the B-tree ever does. Class tags follow the value ordering rule
/// (NULL < numeric < text < blob); Boolean and Json are normalized before
/// encoding.
///
///   NULL:    [0x01]
///   numeric: [0x02][monotone f64 bits (8)][sign-flipped i64 residue (8)]
///   text:    [0x03][bytes with 0x00 -> 0x00 0xFF][0x00 0x00]
///   blob:    [0x04][same escaping][0x00 0x00]
///
/// The residue keeps distinct large integers distinct where f64 loses
/// precision, and breaks ties so Integer(5) and Real(5.0) encode equal.
/// The escape-terminated strings give correct prefix ordering inside
/// composite keys.
use crate::types::Value;

const TAG_NULL: u8 = 0x01;
const TAG_NUMERIC: u8 = 0x02;
const TAG_TEXT: u8 = 0x03;
const TAG_BLOB: u8 = 0x04;

/// Encode i64 into 8 bytes that preserve sort order under byte comparison.
pub fn encode_i64(val: i64) -> [u8; 8] {
    // Flip the sign bit so that negative numbers sort before positive
    let unsigned = (val as u64) ^ (1u64 << 63);
    unsigned.to_be_bytes()
}

pub fn decode_i64(bytes: &[u8; 8]) -> i64 {
    let unsigned = u64::from_be_bytes(*bytes);
    (unsigned ^ (1u64 << 63)) as i64
}

/// Monotone mapping of f64 onto u64 byte order.
fn encode_f64(val: f64) -> [u8; 8] {
    let bits = val.to_bits();
    let mapped = if bits & (1u64 << 63) != 0 {
        !bits
    } else {
        bits ^ (1u64 << 63)
    };
    mapped.to_be_bytes()
}

/// Table rows are keyed by row-id directly.
pub fn encode_rowid(rowid: u64) -> [u8; 8] {
    rowid.to_be_bytes()
}

pub fn decode_rowid(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[0..8]);
    u64::from_be_bytes(buf)
}

fn push_escaped(out: &mut Vec<u8>, bytes: &[u8]) {
    for &b in bytes {
        out.push(b);
        if b == 0x00 {
            out.push(0xFF);
        }
    }
    out.push(0x00);
    out.push(0x00);
}

/// Append one value's encoding.
pub fn encode_value(out: &mut Vec<u8>, value: &Value) {
    match value.normalized() {
        Value::Null => out.push(TAG_NULL),
        Value::Integer(v) => {
            out.push(TAG_NUMERIC);
            out.extend_from_slice(&encode_f64(v as f64));
            out.extend_from_slice(&encode_i64(v));
        }
        Value::Real(v) => {
            out.push(TAG_NUMERIC);
            out.extend_from_slice(&encode_f64(v));
            let residue = if v.fract() == 0.0 && v >= i64::MIN as f64 && v <= i64::MAX as f64 {
                v as i64
            } else {
                0
            };
            out.extend_from_slice(&encode_i64(residue));
        }
        Value::Text(s) => {
            out.push(TAG_TEXT);
            push_escaped(out, s.as_bytes());
        }
        Value::Blob(b) => {
            out.push(TAG_BLOB);
            push_escaped(out, &b);
        }
        Value::Boolean(_) | Value::Json(_) => unreachable!("normalized"),
    }
}

/// Encode a tuple of values, lexicographic by column order.
pub fn encode_values(values: &[Value]) -> Vec<u8> {
    let mut out = Vec::with_capacity(values.len() * 12);
    for v in values {
        encode_value(&mut out, v);
    }
    out
}

/// Encode an index entry key: the column tuple plus a row-id tiebreak so
/// duplicate keys on non-unique indexes still have a total order.
pub fn encode_index_key(values: &[Value], rowid: u64) -> Vec<u8> {
    let mut out = encode_values(values);
    out.extend_from_slice(&encode_rowid(rowid));
    out
}

/// Smallest byte string strictly greater than every key starting with
/// `prefix`, or None when the prefix is all 0xFF.
pub fn prefix_successor(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut out = prefix.to_vec();
    while let Some(&last) = out.last() {
        if last == 0xFF {
            out.pop();
        } else {
            *out.last_mut().expect("BUG: nonempty") = last + 1;
            return Some(out);
        }
    }
    None
}

pub fn compare_keys(a: &[u8], b: &[u8]) -> std::cmp::Ordering {
    a.cmp(b)
}

/// CAST: explicit conversion to a declared type's affinity.
use crate::error::Result;
use crate::sql::eval::datetime;
use crate::types::{DataType, Value};

pub fn cast_value(value: Value, type_name: &str) -> Result<Value> {
    if value.is_null() {
        return Ok(Value::Null);
    }
    let target = DataType::from_declared(type_name);
    let value = value.normalized();
    match (target, &value) {
        (DataType::Integer, Value::Text(s)) => {
            // Numeric prefix semantics: "12abc" casts to 12.
            Ok(Value::Integer(numeric_prefix(s) as i64))
        }
        (DataType::Integer, Value::Real(v)) => Ok(Value::Integer(*v as i64)),
        (DataType::Integer, Value::Blob(_)) => Ok(Value::Integer(0)),
        (DataType::Real, Value::Text(s)) => Ok(Value::Real(numeric_prefix(s))),
        (DataType::Real, Value::Integer(v)) => Ok(Value::Real(*v as f64)),
        (DataType::Real, Value::Blob(_)) => Ok(Value::Real(0.0)),
        (DataType::Text, Value::Blob(b)) => {
            Ok(Value::Text(String::from_utf8_lossy(b).into_owned()))
        }
        (DataType::Text, other) => Ok(Value::Text(other.to_string())),
        (DataType::Blob, Value::Text(s)) => Ok(Value::Blob(s.as_bytes().to_vec())),
        (DataType::Boolean, other) => Ok(Value::Boolean(other.is_truthy())),
        (DataType::Json, Value::Text(s)) => match serde_json::from_str(s) {
            Ok(parsed) => Ok(Value::Json(parsed)),
            Err(_) => Ok(Value::Null),
        },
        _ => target.coerce(value),
    }
}

/// Leading numeric portion of a string, 0 when there is none.
fn numeric_prefix(s: &str) -> f64 {
    let trimmed = s.trim_start();
    let mut end = 0;
    let bytes = trimmed.as_bytes();
    if matches!(bytes.first(), Some(b'+') | Some(b'-')) {
        end = 1;
    }
    let mut seen_dot = false;
    while end < bytes.len() {
        match bytes[end] {
            b'0'..=b'9' => end += 1,
            b'.' if !seen_dot => {
                seen_dot = true;
                end += 1;
            }
            _ => break,
        }
    }
    trimmed[..end].parse().unwrap_or(0.0)
}

/// Shared helper: cast a value to a unix timestamp when it looks like a
/// datetime string.
pub fn to_unix_seconds(value: &Value) -> Option<i64> {
    match value.normalized() {
        Value::Integer(v) => Some(v),
        Value::Real(v) => Some(v as i64),
        Value::Text(s) => datetime::parse_datetime_text(&s).map(|dt| dt.timestamp()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_to_integer_prefix() {
        assert_eq!(
            cast_value(Value::Text("12abc".into()), "INTEGER").unwrap(),
            Value::Integer(12)
        );
        assert_eq!(
            cast_value(Value::Text("abc".into()), "INTEGER").unwrap(),
            Value::Integer(0)
        );
        assert_eq!(
            cast_value(Value::Text("-3.7x".into()), "REAL").unwrap(),
            Value::Real(-3.7)
        );
    }

    #[test]
    fn null_survives_cast() {
        assert!(cast_value(Value::Null, "TEXT").unwrap().is_null());
    }

    #[test]
    fn real_truncates_to_integer() {
        assert_eq!(
            cast_value(Value::Real(3.9), "INT").unwrap(),
            Value::Integer(3)
        );
    }

    #[test]
    fn round_trip_via_text() {
        assert_eq!(
            cast_value(Value::Integer(42), "TEXT").unwrap(),
            Value::Text("42".into())
        );
        assert_eq!(
            cast_value(Value::Text("blob".into()), "BLOB").unwrap(),
            Value::Blob(b"blob".to_vec())
        );
    }
}

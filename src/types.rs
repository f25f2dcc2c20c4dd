use std::cmp::Ordering;
use std::fmt;

use crate::error::{Result, ZqError};

/// Runtime value: the tagged union flowing between the executor, the row
/// codec, and index keys.
#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
    Json(serde_json::Value),
    Boolean(bool),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(v) => Some(*v),
            Value::Boolean(b) => Some(*b as i64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(v) => Some(*v as f64),
            Value::Real(v) => Some(*v),
            Value::Boolean(b) => Some(*b as i64 as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Blob(b) => Some(b.as_slice()),
            _ => None,
        }
    }

    /// True under SQL boolean semantics: non-zero numbers are true,
    /// NULL and everything non-numeric is false.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Integer(v) => *v != 0,
            Value::Real(v) => *v != 0.0,
            Value::Boolean(b) => *b,
            _ => false,
        }
    }

    /// Collapse Boolean to Integer and Json to Text, the normalization used
    /// before comparison and key encoding.
    pub fn normalized(&self) -> Value {
        match self {
            Value::Boolean(b) => Value::Integer(*b as i64),
            Value::Json(j) => Value::Text(j.to_string()),
            other => other.clone(),
        }
    }

    /// Storage class rank: Null < numeric < Text < Blob.
    fn class_rank(&self) -> u8 {
        match self.normalized() {
            Value::Null => 0,
            Value::Integer(_) | Value::Real(_) => 1,
            Value::Text(_) => 2,
            Value::Blob(_) => 3,
            Value::Boolean(_) | Value::Json(_) => unreachable!("normalized"),
        }
    }

    /// Total order used for index keys and ORDER BY. NULL sorts first;
    /// integers and reals compare numerically; text byte-wise; blobs last.
    pub fn sort_cmp(&self, other: &Value) -> Ordering {
        let (a, b) = (self.normalized(), other.normalized());
        let rank = a.class_rank().cmp(&b.class_rank());
        if rank != Ordering::Equal {
            return rank;
        }
        match (&a, &b) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Integer(x), Value::Integer(y)) => x.cmp(y),
            (Value::Real(x), Value::Real(y)) => x.partial_cmp(y).unwrap_or(Ordering::Equal),
            (Value::Integer(x), Value::Real(y)) => {
                (*x as f64).partial_cmp(y).unwrap_or(Ordering::Equal)
            }
            (Value::Real(x), Value::Integer(y)) => {
                x.partial_cmp(&(*y as f64)).unwrap_or(Ordering::Equal)
            }
            (Value::Text(x), Value::Text(y)) => x.as_bytes().cmp(y.as_bytes()),
            (Value::Blob(x), Value::Blob(y)) => x.cmp(y),
            _ => unreachable!("same class rank"),
        }
    }

    /// SQL comparison: NULL compared with anything yields None. Numeric
    /// affinity applies when either side is numeric: numeric-looking text
    /// compares as a number against a number. Sort order (`sort_cmp`) is
    /// unaffected; stored keys were coerced at write time.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        if self.is_null() || other.is_null() {
            return None;
        }
        let (a, b) = numeric_affinity(self.normalized(), other.normalized());
        Some(a.sort_cmp(&b))
    }
}

fn numeric_affinity(a: Value, b: Value) -> (Value, Value) {
    fn as_number(s: &str) -> Option<Value> {
        let t = s.trim();
        t.parse::<i64>()
            .map(Value::Integer)
            .ok()
            .or_else(|| t.parse::<f64>().map(Value::Real).ok())
    }
    match (&a, &b) {
        (Value::Integer(_) | Value::Real(_), Value::Text(s)) => match as_number(s) {
            Some(n) => (a, n),
            None => (a, b),
        },
        (Value::Text(s), Value::Integer(_) | Value::Real(_)) => match as_number(s) {
            Some(n) => (n, b),
            None => (a, b),
        },
        _ => (a, b),
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (a, b) if a.is_null() || b.is_null() => false,
            (a, b) => a.sort_cmp(b) == Ordering::Equal,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Integer(v) => write!(f, "{}", v),
            Value::Real(v) => {
                if v.fract() == 0.0 && v.is_finite() {
                    write!(f, "{:.1}", v)
                } else {
                    write!(f, "{}", v)
                }
            }
            Value::Text(s) => write!(f, "{}", s),
            Value::Blob(b) => {
                write!(f, "x'")?;
                for byte in b {
                    write!(f, "{:02x}", byte)?;
                }
                write!(f, "'")
            }
            Value::Json(j) => write!(f, "{}", j),
            Value::Boolean(b) => write!(f, "{}", if *b { 1 } else { 0 }),
        }
    }
}

/// Declared column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    Integer,
    Real,
    Text,
    Blob,
    Boolean,
    Json,
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataType::Integer => write!(f, "INTEGER"),
            DataType::Real => write!(f, "REAL"),
            DataType::Text => write!(f, "TEXT"),
            DataType::Blob => write!(f, "BLOB"),
            DataType::Boolean => write!(f, "BOOLEAN"),
            DataType::Json => write!(f, "JSON"),
        }
    }
}

impl DataType {
    /// Affinity lookup from a declared type name, SQLite-style keyword
    /// sniffing: INT anywhere means integer, CHAR/CLOB/TEXT mean text,
    /// BLOB means blob, REAL/FLOA/DOUB mean real.
    pub fn from_declared(name: &str) -> DataType {
        let upper = name.to_ascii_uppercase();
        if upper.contains("INT") {
            DataType::Integer
        } else if upper.contains("CHAR") || upper.contains("CLOB") || upper.contains("TEXT") {
            DataType::Text
        } else if upper.contains("BLOB") {
            DataType::Blob
        } else if upper.contains("REAL") || upper.contains("FLOA") || upper.contains("DOUB") {
            DataType::Real
        } else if upper.contains("BOOL") {
            DataType::Boolean
        } else if upper.contains("JSON") {
            DataType::Json
        } else {
            // Unrecognized declarations get numeric-ish behavior via Text.
            DataType::Text
        }
    }

    /// Apply column affinity to an incoming value. Lossless coercions only;
    /// values that do not convert are stored as given.
    pub fn coerce(&self, value: Value) -> Result<Value> {
        match (self, value) {
            (_, Value::Null) => Ok(Value::Null),
            (DataType::Integer, Value::Integer(v)) => Ok(Value::Integer(v)),
            (DataType::Integer, Value::Real(v)) if v.fract() == 0.0 => {
                Ok(Value::Integer(v as i64))
            }
            (DataType::Integer, Value::Boolean(b)) => Ok(Value::Integer(b as i64)),
            (DataType::Integer, Value::Text(s)) => match s.parse::<i64>() {
                Ok(v) => Ok(Value::Integer(v)),
                Err(_) => Ok(Value::Text(s)),
            },
            (DataType::Real, Value::Integer(v)) => Ok(Value::Real(v as f64)),
            (DataType::Real, Value::Text(s)) => match s.parse::<f64>() {
                Ok(v) => Ok(Value::Real(v)),
                Err(_) => Ok(Value::Text(s)),
            },
            (DataType::Text, Value::Integer(v)) => Ok(Value::Text(v.to_string())),
            (DataType::Text, Value::Real(v)) => Ok(Value::Text(v.to_string())),
            (DataType::Boolean, Value::Integer(v)) => Ok(Value::Boolean(v != 0)),
            (DataType::Boolean, Value::Boolean(b)) => Ok(Value::Boolean(b)),
            (DataType::Json, Value::Text(s)) => match serde_json::from_str(&s) {
                Ok(j) => Ok(Value::Json(j)),
                Err(e) => Err(ZqError::Type(format!("malformed JSON value: {}", e))),
            },
            (DataType::Json, Value::Json(j)) => Ok(Value::Json(j)),
            (_, v) => Ok(v),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_sorts_before_everything() {
        assert_eq!(Value::Null.sort_cmp(&Value::Integer(i64::MIN)), Ordering::Less);
        assert_eq!(Value::Null.sort_cmp(&Value::Text("".into())), Ordering::Less);
        assert_eq!(Value::Null.sort_cmp(&Value::Null), Ordering::Equal);
    }

    #[test]
    fn numbers_compare_numerically_across_tags() {
        assert_eq!(
            Value::Integer(2).sort_cmp(&Value::Real(2.5)),
            Ordering::Less
        );
        assert_eq!(
            Value::Real(3.0).sort_cmp(&Value::Integer(3)),
            Ordering::Equal
        );
    }

    #[test]
    fn text_before_blob() {
        assert_eq!(
            Value::Text("zzz".into()).sort_cmp(&Value::Blob(vec![0])),
            Ordering::Less
        );
    }

    #[test]
    fn boolean_coerces_to_integer_for_comparison() {
        assert_eq!(
            Value::Boolean(true).sort_cmp(&Value::Integer(1)),
            Ordering::Equal
        );
    }

    #[test]
    fn null_comparison_is_unknown() {
        assert_eq!(Value::Null.compare(&Value::Null), None);
        assert_eq!(Value::Integer(1).compare(&Value::Null), None);
    }

    #[test]
    fn integer_affinity_parses_text() {
        let v = DataType::Integer.coerce(Value::Text("42".into())).unwrap();
        assert_eq!(v, Value::Integer(42));
        // Non-numeric text is kept as text.
        let v = DataType::Integer.coerce(Value::Text("abc".into())).unwrap();
        assert_eq!(v, Value::Text("abc".into()));
    }

    #[test]
    fn declared_type_sniffing() {
        assert_eq!(DataType::from_declared("BIGINT"), DataType::Integer);
        assert_eq!(DataType::from_declared("varchar(32)"), DataType::Text);
        assert_eq!(DataType::from_declared("DOUBLE PRECISION"), DataType::Real);
        assert_eq!(DataType::from_declared("BLOB"), DataType::Blob);
    }
}

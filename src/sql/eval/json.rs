/// JSON builtins: extraction by path, validity, type inspection.
///
/// Paths use the `$.key`, `$[index]`, `$.a.b[0]` subset, resolved through
/// jsonpath_lib.
use crate::error::{Result, ZqError};
use crate::types::Value;

fn parse_doc(value: &Value) -> Result<Option<serde_json::Value>> {
    match value {
        Value::Null => Ok(None),
        Value::Json(j) => Ok(Some(j.clone())),
        Value::Text(s) => match serde_json::from_str(s) {
            Ok(parsed) => Ok(Some(parsed)),
            Err(e) => Err(ZqError::Type(format!("malformed JSON document: {}", e))),
        },
        other => Err(ZqError::Type(format!("{} is not a JSON document", other))),
    }
}

/// json_extract(doc, path) -> the selected value, NULL when absent.
pub fn json_extract(doc: &Value, path: &Value) -> Result<Value> {
    let Some(parsed) = parse_doc(doc)? else {
        return Ok(Value::Null);
    };
    let Value::Text(path) = path.normalized() else {
        return Ok(Value::Null);
    };
    let selected = jsonpath_lib::select(&parsed, &path)
        .map_err(|e| ZqError::Type(format!("invalid JSON path '{}': {:?}", path, e)))?;
    match selected.first() {
        None => Ok(Value::Null),
        Some(found) => Ok(json_to_value((*found).clone())),
    }
}

/// Scalars unwrap to SQL values; arrays and objects stay JSON.
fn json_to_value(json: serde_json::Value) -> Value {
    match json {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Integer(b as i64),
        serde_json::Value::Number(n) => {
            if let Some(v) = n.as_i64() {
                Value::Integer(v)
            } else {
                Value::Real(n.as_f64().unwrap_or(0.0))
            }
        }
        serde_json::Value::String(s) => Value::Text(s),
        other => Value::Json(other),
    }
}

/// json_valid(text) -> 1 or 0.
pub fn json_valid(value: &Value) -> Value {
    match value {
        Value::Null => Value::Null,
        Value::Json(_) => Value::Integer(1),
        Value::Text(s) => Value::Integer(serde_json::from_str::<serde_json::Value>(s).is_ok() as i64),
        _ => Value::Integer(0),
    }
}

/// json_type(doc) -> 'null' | 'true' | 'false' | 'integer' | 'real' |
/// 'text' | 'array' | 'object'.
pub fn json_type(value: &Value) -> Result<Value> {
    let Some(parsed) = parse_doc(value)? else {
        return Ok(Value::Null);
    };
    let name = match parsed {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(true) => "true",
        serde_json::Value::Bool(false) => "false",
        serde_json::Value::Number(n) => {
            if n.is_i64() || n.is_u64() {
                "integer"
            } else {
                "real"
            }
        }
        serde_json::Value::String(_) => "text",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    };
    Ok(Value::Text(name.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc() -> Value {
        Value::Text(r#"{"a": {"b": [10, 20, 30]}, "name": "zed", "ok": true}"#.into())
    }

    #[test]
    fn extract_nested_paths() {
        assert_eq!(
            json_extract(&doc(), &Value::Text("$.name".into())).unwrap(),
            Value::Text("zed".into())
        );
        assert_eq!(
            json_extract(&doc(), &Value::Text("$.a.b[1]".into())).unwrap(),
            Value::Integer(20)
        );
        assert_eq!(
            json_extract(&doc(), &Value::Text("$.ok".into())).unwrap(),
            Value::Integer(1)
        );
        assert!(json_extract(&doc(), &Value::Text("$.missing".into()))
            .unwrap()
            .is_null());
    }

    #[test]
    fn extract_array_and_object_stay_json() {
        let result = json_extract(&doc(), &Value::Text("$.a.b".into())).unwrap();
        assert!(matches!(result, Value::Json(serde_json::Value::Array(_))));
    }

    #[test]
    fn top_level_array_index() {
        let arr = Value::Text("[1, 2, 3]".into());
        assert_eq!(
            json_extract(&arr, &Value::Text("$[2]".into())).unwrap(),
            Value::Integer(3)
        );
    }

    #[test]
    fn validity_and_type() {
        assert_eq!(json_valid(&doc()), Value::Integer(1));
        assert_eq!(
            json_valid(&Value::Text("{not json".into())),
            Value::Integer(0)
        );
        assert_eq!(
            json_type(&doc()).unwrap(),
            Value::Text("object".into())
        );
        assert_eq!(
            json_type(&Value::Text("[1]".into())).unwrap(),
            Value::Text("array".into())
        );
        assert_eq!(
            json_type(&Value::Text("3.5".into())).unwrap(),
            Value::Text("real".into())
        );
    }

    #[test]
    fn null_propagates() {
        assert!(json_extract(&Value::Null, &Value::Text("$.a".into()))
            .unwrap()
            .is_null());
        assert!(json_valid(&Value::Null).is_null());
    }
}

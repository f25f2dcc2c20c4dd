/// Scalar builtin functions. Unless noted, NULL in means NULL out.
///
/// Aggregates (COUNT, SUM, AVG, single-argument MIN/MAX, GROUP_CONCAT) are
/// computed by the executor's aggregation operator and never reach this
/// dispatch; hitting one here is a misuse of aggregate context.
use rand::Rng;
use sha2::{Digest, Sha256};

use crate::error::{Result, ZqError};
use crate::sql::ast::Expr;
use crate::sql::eval::{datetime, eval_expr, json, ColumnResolver, EvalEnv};
use crate::types::Value;

pub const AGGREGATE_NAMES: [&str; 6] = ["COUNT", "SUM", "AVG", "MIN", "MAX", "GROUP_CONCAT"];

/// True when a call is an aggregate invocation (MIN/MAX only with a single
/// argument; with two or more they are scalar).
pub fn is_aggregate_call(name: &str, arg_count: usize, star: bool) -> bool {
    let upper = name.to_ascii_uppercase();
    match upper.as_str() {
        "COUNT" => star || arg_count == 1,
        "SUM" | "AVG" | "GROUP_CONCAT" => true,
        "MIN" | "MAX" => arg_count == 1,
        _ => false,
    }
}

pub fn call(
    name: &str,
    args: &[Expr],
    row: &ColumnResolver<'_>,
    env: &EvalEnv<'_>,
) -> Result<Value> {
    let upper = name.to_ascii_uppercase();
    if is_aggregate_call(&upper, args.len(), false) {
        return Err(ZqError::Misuse(format!(
            "aggregate function {}() used outside of aggregation",
            name
        )));
    }

    match upper.as_str() {
        // --- Datetime ---
        "DATETIME" => {
            let instant = instant_arg(args, row, env)?;
            match instant {
                Some(i) => Ok(Value::Text(datetime::format_datetime(i))),
                None => Ok(Value::Null),
            }
        }
        "DATE" => match instant_arg(args, row, env)? {
            Some(i) => Ok(Value::Text(datetime::format_date(i))),
            None => Ok(Value::Null),
        },
        "TIME" => match instant_arg(args, row, env)? {
            Some(i) => Ok(Value::Text(datetime::format_time(i))),
            None => Ok(Value::Null),
        },
        "STRFTIME" => {
            check_arity(name, args, 2, 2)?;
            let format = eval_expr(&args[0], row, env)?;
            let when = eval_expr(&args[1], row, env)?;
            if format.is_null() || when.is_null() {
                return Ok(Value::Null);
            }
            let Value::Text(format) = format.normalized() else {
                return Err(ZqError::Type("strftime format must be text".into()));
            };
            let instant = datetime::resolve_instant(&when, env.now)?;
            Ok(Value::Text(datetime::strftime(&format, instant)?))
        }
        "UNIXEPOCH" => {
            check_arity(name, args, 0, 1)?;
            match instant_arg(args, row, env)? {
                Some(i) => Ok(Value::Integer(i.timestamp())),
                None => Ok(Value::Null),
            }
        }
        "JULIANDAY" => {
            check_arity(name, args, 0, 1)?;
            match instant_arg(args, row, env)? {
                Some(i) => Ok(Value::Real(datetime::julian_day(i))),
                None => Ok(Value::Null),
            }
        }

        // --- String ---
        "LENGTH" => {
            check_arity(name, args, 1, 1)?;
            match eval_expr(&args[0], row, env)?.normalized() {
                Value::Null => Ok(Value::Null),
                Value::Text(s) => Ok(Value::Integer(s.chars().count() as i64)),
                Value::Blob(b) => Ok(Value::Integer(b.len() as i64)),
                other => Ok(Value::Integer(other.to_string().chars().count() as i64)),
            }
        }
        "SUBSTR" | "SUBSTRING" => {
            check_arity(name, args, 2, 3)?;
            let values = eval_all(args, row, env)?;
            if values.iter().any(Value::is_null) {
                return Ok(Value::Null);
            }
            let text = text_of(&values[0]);
            let chars: Vec<char> = text.chars().collect();
            let start = values[1]
                .as_i64()
                .ok_or_else(|| ZqError::Type("substr start must be an integer".into()))?;
            // 1-based; negative counts from the end.
            let begin = if start > 0 {
                (start - 1) as usize
            } else if start < 0 {
                chars.len().saturating_sub((-start) as usize)
            } else {
                0
            };
            let len = match values.get(2) {
                Some(v) => v
                    .as_i64()
                    .ok_or_else(|| ZqError::Type("substr length must be an integer".into()))?
                    .max(0) as usize,
                None => chars.len().saturating_sub(begin),
            };
            let result: String = chars.iter().skip(begin).take(len).collect();
            Ok(Value::Text(result))
        }
        "REPLACE" => {
            check_arity(name, args, 3, 3)?;
            let values = eval_all(args, row, env)?;
            if values.iter().any(Value::is_null) {
                return Ok(Value::Null);
            }
            let (s, from, to) = (text_of(&values[0]), text_of(&values[1]), text_of(&values[2]));
            if from.is_empty() {
                return Ok(Value::Text(s));
            }
            Ok(Value::Text(s.replace(&from, &to)))
        }
        "UPPER" => unary_text(name, args, row, env, |s| s.to_uppercase()),
        "LOWER" => unary_text(name, args, row, env, |s| s.to_lowercase()),
        "TRIM" => unary_text(name, args, row, env, |s| s.trim().to_string()),
        "LTRIM" => unary_text(name, args, row, env, |s| s.trim_start().to_string()),
        "RTRIM" => unary_text(name, args, row, env, |s| s.trim_end().to_string()),
        "INSTR" => {
            check_arity(name, args, 2, 2)?;
            let values = eval_all(args, row, env)?;
            if values.iter().any(Value::is_null) {
                return Ok(Value::Null);
            }
            let haystack = text_of(&values[0]);
            let needle = text_of(&values[1]);
            // 1-based position of the first occurrence, 0 when absent.
            let position = haystack
                .find(&needle)
                .map(|byte| haystack[..byte].chars().count() as i64 + 1)
                .unwrap_or(0);
            Ok(Value::Integer(position))
        }

        // --- Numeric ---
        "ABS" => {
            check_arity(name, args, 1, 1)?;
            match eval_expr(&args[0], row, env)?.normalized() {
                Value::Null => Ok(Value::Null),
                Value::Integer(v) => Ok(Value::Integer(v.wrapping_abs())),
                Value::Real(v) => Ok(Value::Real(v.abs())),
                other => Err(ZqError::Type(format!("abs() on non-numeric {}", other))),
            }
        }
        "ROUND" => {
            check_arity(name, args, 1, 2)?;
            let values = eval_all(args, row, env)?;
            if values.iter().any(Value::is_null) {
                return Ok(Value::Null);
            }
            let x = values[0]
                .as_f64()
                .ok_or_else(|| ZqError::Type("round() on non-numeric value".into()))?;
            let digits = match values.get(1) {
                Some(v) => v
                    .as_i64()
                    .ok_or_else(|| ZqError::Type("round() digits must be an integer".into()))?,
                None => 0,
            };
            let factor = 10f64.powi(digits.clamp(-15, 15) as i32);
            Ok(Value::Real((x * factor).round() / factor))
        }
        "CEIL" | "CEILING" => numeric_unary(name, args, row, env, f64::ceil),
        "FLOOR" => numeric_unary(name, args, row, env, f64::floor),
        "MIN" | "MAX" => {
            // Two or more arguments: the scalar variant.
            check_arity(name, args, 2, usize::MAX)?;
            let values = eval_all(args, row, env)?;
            if values.iter().any(Value::is_null) {
                return Ok(Value::Null);
            }
            let mut best = values[0].clone();
            for v in &values[1..] {
                let replace = if upper == "MIN" {
                    v.sort_cmp(&best) == std::cmp::Ordering::Less
                } else {
                    v.sort_cmp(&best) == std::cmp::Ordering::Greater
                };
                if replace {
                    best = v.clone();
                }
            }
            Ok(best)
        }

        // --- JSON ---
        "JSON_EXTRACT" => {
            check_arity(name, args, 2, 2)?;
            let doc = eval_expr(&args[0], row, env)?;
            let path = eval_expr(&args[1], row, env)?;
            if path.is_null() {
                return Ok(Value::Null);
            }
            json::json_extract(&doc, &path)
        }
        "JSON_VALID" => {
            check_arity(name, args, 1, 1)?;
            Ok(json::json_valid(&eval_expr(&args[0], row, env)?))
        }
        "JSON_TYPE" => {
            check_arity(name, args, 1, 1)?;
            json::json_type(&eval_expr(&args[0], row, env)?)
        }

        // --- Hashing ---
        "SHA256" => {
            check_arity(name, args, 1, 1)?;
            match hash_input(eval_expr(&args[0], row, env)?) {
                None => Ok(Value::Null),
                Some(bytes) => {
                    let mut hasher = Sha256::new();
                    hasher.update(&bytes);
                    Ok(Value::Blob(hasher.finalize().to_vec()))
                }
            }
        }
        "BLAKE3" => {
            check_arity(name, args, 1, 1)?;
            match hash_input(eval_expr(&args[0], row, env)?) {
                None => Ok(Value::Null),
                Some(bytes) => Ok(Value::Blob(blake3::hash(&bytes).as_bytes().to_vec())),
            }
        }

        // --- Row / connection state ---
        "LAST_INSERT_ROWID" => {
            check_arity(name, args, 0, 0)?;
            Ok(Value::Integer(env.last_insert_rowid))
        }
        "CHANGES" => {
            check_arity(name, args, 0, 0)?;
            Ok(Value::Integer(env.changes))
        }
        "RANDOM" => {
            check_arity(name, args, 0, 0)?;
            Ok(Value::Integer(env.rng.borrow_mut().gen()))
        }

        _ => Err(ZqError::NotFound(format!("no such function: {}", name))),
    }
}

fn check_arity(name: &str, args: &[Expr], min: usize, max: usize) -> Result<()> {
    if args.len() < min || args.len() > max {
        return Err(ZqError::Type(format!(
            "wrong number of arguments to {}()",
            name
        )));
    }
    Ok(())
}

fn eval_all(
    args: &[Expr],
    row: &ColumnResolver<'_>,
    env: &EvalEnv<'_>,
) -> Result<Vec<Value>> {
    args.iter().map(|a| eval_expr(a, row, env)).collect()
}

fn text_of(value: &Value) -> String {
    match value.normalized() {
        Value::Text(s) => s,
        other => other.to_string(),
    }
}

/// Datetime builtins default to 'now' with no argument.
fn instant_arg(
    args: &[Expr],
    row: &ColumnResolver<'_>,
    env: &EvalEnv<'_>,
) -> Result<Option<chrono::DateTime<chrono::Utc>>> {
    if args.is_empty() {
        return Ok(Some(env.now));
    }
    let value = eval_expr(&args[0], row, env)?;
    if value.is_null() {
        return Ok(None);
    }
    datetime::resolve_instant(&value, env.now).map(Some)
}

fn unary_text(
    name: &str,
    args: &[Expr],
    row: &ColumnResolver<'_>,
    env: &EvalEnv<'_>,
    f: impl Fn(&str) -> String,
) -> Result<Value> {
    check_arity(name, args, 1, 1)?;
    let value = eval_expr(&args[0], row, env)?;
    if value.is_null() {
        return Ok(Value::Null);
    }
    Ok(Value::Text(f(&text_of(&value))))
}

fn numeric_unary(
    name: &str,
    args: &[Expr],
    row: &ColumnResolver<'_>,
    env: &EvalEnv<'_>,
    f: impl Fn(f64) -> f64,
) -> Result<Value> {
    check_arity(name, args, 1, 1)?;
    match eval_expr(&args[0], row, env)?.normalized() {
        Value::Null => Ok(Value::Null),
        Value::Integer(v) => Ok(Value::Integer(v)),
        Value::Real(v) => Ok(Value::Real(f(v))),
        other => Err(ZqError::Type(format!("{}() on non-numeric {}", name, other))),
    }
}

fn hash_input(value: Value) -> Option<Vec<u8>> {
    match value.normalized() {
        Value::Null => None,
        Value::Blob(b) => Some(b),
        Value::Text(s) => Some(s.into_bytes()),
        other => Some(other.to_string().into_bytes()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::eval::test_env::*;
    use crate::sql::parser::parse_expression;

    fn eval(sql: &str) -> Value {
        let fixture = Fixture::new();
        let expr = parse_expression(sql).unwrap();
        crate::sql::eval::eval_expr(&expr, &no_columns, &fixture.env()).unwrap()
    }

    #[test]
    fn string_functions() {
        assert_eq!(eval("length('héllo')"), Value::Integer(5));
        assert_eq!(eval("substr('alphabet', 2, 3)"), Value::Text("lph".into()));
        assert_eq!(eval("substr('alphabet', -3)"), Value::Text("bet".into()));
        assert_eq!(
            eval("replace('a-b-c', '-', '+')"),
            Value::Text("a+b+c".into())
        );
        assert_eq!(eval("upper('abc')"), Value::Text("ABC".into()));
        assert_eq!(eval("lower('ABC')"), Value::Text("abc".into()));
        assert_eq!(eval("trim('  x  ')"), Value::Text("x".into()));
        assert_eq!(eval("ltrim('  x')"), Value::Text("x".into()));
        assert_eq!(eval("rtrim('x  ')"), Value::Text("x".into()));
        assert_eq!(eval("instr('haystack', 'st')"), Value::Integer(4));
        assert_eq!(eval("instr('haystack', 'zz')"), Value::Integer(0));
    }

    #[test]
    fn numeric_functions() {
        assert_eq!(eval("abs(-7)"), Value::Integer(7));
        assert_eq!(eval("round(2.567, 2)"), Value::Real(2.57));
        assert_eq!(eval("round(2.5)"), Value::Real(3.0));
        assert_eq!(eval("ceil(1.2)"), Value::Real(2.0));
        assert_eq!(eval("floor(1.8)"), Value::Real(1.0));
        assert_eq!(eval("min(3, 1, 2)"), Value::Integer(1));
        assert_eq!(eval("max(3, 1, 2)"), Value::Integer(3));
    }

    #[test]
    fn null_in_null_out() {
        for sql in [
            "length(NULL)",
            "substr(NULL, 1)",
            "abs(NULL)",
            "round(NULL)",
            "upper(NULL)",
            "sha256(NULL)",
            "min(1, NULL)",
        ] {
            assert!(eval(sql).is_null(), "{} should be NULL", sql);
        }
    }

    #[test]
    fn hashing() {
        // SHA-256 of the empty string is well known.
        let Value::Blob(digest) = eval("sha256('')") else {
            panic!("expected blob");
        };
        assert_eq!(
            digest[..4],
            [0xe3, 0xb0, 0xc4, 0x42],
        );
        let Value::Blob(b3) = eval("blake3('abc')") else {
            panic!("expected blob");
        };
        assert_eq!(b3.len(), 32);
    }

    #[test]
    fn json_passthrough() {
        assert_eq!(
            eval("json_extract('{\"a\": 5}', '$.a')"),
            Value::Integer(5)
        );
        assert_eq!(eval("json_valid('[1]')"), Value::Integer(1));
        assert_eq!(eval("json_type('{}')"), Value::Text("object".into()));
    }

    #[test]
    fn unknown_function_is_not_found() {
        let fixture = Fixture::new();
        let expr = parse_expression("coalesce(NULL, 3)").unwrap();
        let err =
            crate::sql::eval::eval_expr(&expr, &no_columns, &fixture.env()).unwrap_err();
        assert!(matches!(err, ZqError::NotFound(_)));
    }

    #[test]
    fn aggregates_rejected_in_scalar_context() {
        let fixture = Fixture::new();
        let expr = parse_expression("count(*)").unwrap();
        let err =
            crate::sql::eval::eval_expr(&expr, &no_columns, &fixture.env()).unwrap_err();
        assert!(matches!(err, ZqError::Misuse(_)));
    }

    #[test]
    fn datetime_consistent_now() {
        let fixture = Fixture::new();
        let env = fixture.env();
        let a = crate::sql::eval::eval_expr(
            &parse_expression("unixepoch()").unwrap(),
            &no_columns,
            &env,
        )
        .unwrap();
        let b = crate::sql::eval::eval_expr(
            &parse_expression("unixepoch('now')").unwrap(),
            &no_columns,
            &env,
        )
        .unwrap();
        assert_eq!(a, b);
    }
}

/// Operator semantics: NULL propagation, numeric coercion, three-valued
/// AND/OR, division by zero yielding NULL.
use std::cmp::Ordering;

use crate::error::{Result, ZqError};
use crate::sql::ast::{BinOp, Expr, UnaryOp};
use crate::sql::eval::{eval_expr, ColumnResolver, EvalEnv};
use crate::types::Value;

pub fn apply_unary(op: UnaryOp, value: Value) -> Result<Value> {
    match op {
        UnaryOp::Neg => match value.normalized() {
            Value::Null => Ok(Value::Null),
            Value::Integer(v) => Ok(Value::Integer(v.wrapping_neg())),
            Value::Real(v) => Ok(Value::Real(-v)),
            other => Err(ZqError::Type(format!("cannot negate {}", other))),
        },
        UnaryOp::Not => {
            if value.is_null() {
                Ok(Value::Null)
            } else {
                Ok(Value::Integer(!value.is_truthy() as i64))
            }
        }
    }
}

pub fn apply_binary(
    op: BinOp,
    left: &Expr,
    right: &Expr,
    row: &ColumnResolver<'_>,
    env: &EvalEnv<'_>,
) -> Result<Value> {
    // AND/OR evaluate lazily for three-valued logic.
    match op {
        BinOp::And => {
            let a = eval_expr(left, row, env)?;
            if !a.is_null() && !a.is_truthy() {
                return Ok(Value::Integer(0));
            }
            let b = eval_expr(right, row, env)?;
            if !b.is_null() && !b.is_truthy() {
                return Ok(Value::Integer(0));
            }
            if a.is_null() || b.is_null() {
                return Ok(Value::Null);
            }
            Ok(Value::Integer(1))
        }
        BinOp::Or => {
            let a = eval_expr(left, row, env)?;
            if a.is_truthy() {
                return Ok(Value::Integer(1));
            }
            let b = eval_expr(right, row, env)?;
            if b.is_truthy() {
                return Ok(Value::Integer(1));
            }
            if a.is_null() || b.is_null() {
                return Ok(Value::Null);
            }
            Ok(Value::Integer(0))
        }
        _ => {
            let mut a = eval_expr(left, row, env)?;
            let mut b = eval_expr(right, row, env)?;
            // A NOCASE collation on either operand folds both sides of a
            // comparison.
            if is_comparison(op) && (is_nocase(left) || is_nocase(right)) {
                a = fold_case(a);
                b = fold_case(b);
            }
            apply_binary_values(op, a, b)
        }
    }
}

fn is_comparison(op: BinOp) -> bool {
    matches!(
        op,
        BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge
    )
}

fn is_nocase(expr: &Expr) -> bool {
    matches!(expr, Expr::Collate { collation, .. } if collation.eq_ignore_ascii_case("nocase"))
}

fn fold_case(value: Value) -> Value {
    match value {
        Value::Text(s) => Value::Text(s.to_lowercase()),
        other => other,
    }
}

pub fn apply_binary_values(op: BinOp, a: Value, b: Value) -> Result<Value> {
    match op {
        BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Mod => arithmetic(op, a, b),
        BinOp::Concat => {
            if a.is_null() || b.is_null() {
                return Ok(Value::Null);
            }
            Ok(Value::Text(format!("{}{}", a, b)))
        }
        BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
            match a.compare(&b) {
                None => Ok(Value::Null),
                Some(ordering) => {
                    let truth = match op {
                        BinOp::Eq => ordering == Ordering::Equal,
                        BinOp::Ne => ordering != Ordering::Equal,
                        BinOp::Lt => ordering == Ordering::Less,
                        BinOp::Le => ordering != Ordering::Greater,
                        BinOp::Gt => ordering == Ordering::Greater,
                        BinOp::Ge => ordering != Ordering::Less,
                        _ => unreachable!(),
                    };
                    Ok(Value::Integer(truth as i64))
                }
            }
        }
        BinOp::And | BinOp::Or => unreachable!("handled lazily"),
    }
}

fn arithmetic(op: BinOp, a: Value, b: Value) -> Result<Value> {
    let (a, b) = (a.normalized(), b.normalized());
    if a.is_null() || b.is_null() {
        return Ok(Value::Null);
    }
    match (&a, &b) {
        (Value::Integer(x), Value::Integer(y)) => {
            let (x, y) = (*x, *y);
            let result = match op {
                BinOp::Add => x.checked_add(y),
                BinOp::Sub => x.checked_sub(y),
                BinOp::Mul => x.checked_mul(y),
                BinOp::Div => {
                    if y == 0 {
                        return Ok(Value::Null);
                    }
                    x.checked_div(y)
                }
                BinOp::Mod => {
                    if y == 0 {
                        return Ok(Value::Null);
                    }
                    x.checked_rem(y)
                }
                _ => unreachable!(),
            };
            // Integer overflow falls back to real arithmetic.
            match result {
                Some(v) => Ok(Value::Integer(v)),
                None => arithmetic_real(op, x as f64, y as f64),
            }
        }
        _ => {
            let x = a.as_f64().ok_or_else(|| {
                ZqError::Type(format!("cannot apply arithmetic to {}", a))
            })?;
            let y = b.as_f64().ok_or_else(|| {
                ZqError::Type(format!("cannot apply arithmetic to {}", b))
            })?;
            arithmetic_real(op, x, y)
        }
    }
}

fn arithmetic_real(op: BinOp, x: f64, y: f64) -> Result<Value> {
    let result = match op {
        BinOp::Add => x + y,
        BinOp::Sub => x - y,
        BinOp::Mul => x * y,
        BinOp::Div => {
            if y == 0.0 {
                return Ok(Value::Null);
            }
            x / y
        }
        BinOp::Mod => {
            if y == 0.0 {
                return Ok(Value::Null);
            }
            x % y
        }
        _ => unreachable!(),
    };
    Ok(Value::Real(result))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_overflow_promotes_to_real() {
        let result = apply_binary_values(
            BinOp::Add,
            Value::Integer(i64::MAX),
            Value::Integer(1),
        )
        .unwrap();
        assert!(matches!(result, Value::Real(_)));
    }

    #[test]
    fn comparison_coerces_numeric() {
        assert_eq!(
            apply_binary_values(BinOp::Eq, Value::Integer(2), Value::Real(2.0)).unwrap(),
            Value::Integer(1)
        );
        assert_eq!(
            apply_binary_values(BinOp::Lt, Value::Integer(2), Value::Real(2.5)).unwrap(),
            Value::Integer(1)
        );
    }

    #[test]
    fn text_comparison_bytewise() {
        assert_eq!(
            apply_binary_values(
                BinOp::Lt,
                Value::Text("abc".into()),
                Value::Text("abd".into())
            )
            .unwrap(),
            Value::Integer(1)
        );
        // Case matters without NOCASE.
        assert_eq!(
            apply_binary_values(
                BinOp::Eq,
                Value::Text("ABC".into()),
                Value::Text("abc".into())
            )
            .unwrap(),
            Value::Integer(0)
        );
    }

    #[test]
    fn not_of_null_is_null() {
        assert!(apply_unary(UnaryOp::Not, Value::Null).unwrap().is_null());
        assert_eq!(
            apply_unary(UnaryOp::Not, Value::Integer(5)).unwrap(),
            Value::Integer(0)
        );
    }
}

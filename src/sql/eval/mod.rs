/// Expression evaluation: types, NULL propagation, coercion.
///
/// The executor resolves uncorrelated subqueries and aggregate calls before
/// expressions reach this layer, so evaluation needs only a column resolver
/// and the statement environment (parameters, statement-start clock,
/// per-connection counters and PRNG).
pub mod cast;
pub mod datetime;
pub mod functions;
pub mod json;
pub mod ops;
pub mod pattern;

use std::cell::RefCell;
use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;

use crate::error::{Result, ZqError};
use crate::sql::ast::{Expr, Literal, ParamRef};
use crate::types::Value;

/// Resolves a (table qualifier, column name) pair against the current row.
pub type ColumnResolver<'a> = dyn Fn(Option<&str>, &str) -> Option<Value> + 'a;

/// Per-statement evaluation environment.
pub struct EvalEnv<'a> {
    /// Positional parameter slots, 1-based (slot 0 unused).
    pub positional: &'a [Option<Value>],
    pub named: &'a HashMap<String, Value>,
    /// The statement's single consistent 'now'.
    pub now: DateTime<Utc>,
    pub last_insert_rowid: i64,
    pub changes: i64,
    pub rng: &'a RefCell<StdRng>,
}

impl<'a> EvalEnv<'a> {
    pub fn lookup_param(&self, param: &ParamRef) -> Result<Value> {
        match param {
            ParamRef::Positional(n) => match self.positional.get(*n as usize) {
                // Unbound parameters evaluate as NULL.
                Some(slot) => Ok(slot.clone().unwrap_or(Value::Null)),
                None => Ok(Value::Null),
            },
            ParamRef::Named(name) => Ok(self.named.get(name).cloned().unwrap_or(Value::Null)),
        }
    }
}

pub fn literal_value(literal: &Literal) -> Value {
    match literal {
        Literal::Null => Value::Null,
        Literal::Integer(v) => Value::Integer(*v),
        Literal::Real(v) => Value::Real(*v),
        Literal::String(s) => Value::Text(s.clone()),
        Literal::Blob(b) => Value::Blob(b.clone()),
    }
}

pub fn eval_expr(
    expr: &Expr,
    row: &ColumnResolver<'_>,
    env: &EvalEnv<'_>,
) -> Result<Value> {
    match expr {
        Expr::Literal(literal) => Ok(literal_value(literal)),
        Expr::Column { table, name } => row(table.as_deref(), name).ok_or_else(|| {
            ZqError::NotFound(format!(
                "no such column: {}{}",
                table.as_deref().map(|t| format!("{}.", t)).unwrap_or_default(),
                name
            ))
        }),
        Expr::Param(param) => env.lookup_param(param),
        Expr::Unary { op, expr } => {
            let value = eval_expr(expr, row, env)?;
            ops::apply_unary(*op, value)
        }
        Expr::Binary { left, op, right } => ops::apply_binary(*op, left, right, row, env),
        Expr::Function {
            name,
            args,
            distinct: _,
            star: _,
        } => functions::call(name, args, row, env),
        Expr::Case {
            operand,
            branches,
            else_expr,
        } => {
            let operand_value = operand
                .as_ref()
                .map(|e| eval_expr(e, row, env))
                .transpose()?;
            for (when, then) in branches {
                let matched = match &operand_value {
                    Some(op_val) => {
                        let when_val = eval_expr(when, row, env)?;
                        op_val.compare(&when_val) == Some(std::cmp::Ordering::Equal)
                    }
                    None => eval_expr(when, row, env)?.is_truthy(),
                };
                if matched {
                    return eval_expr(then, row, env);
                }
            }
            match else_expr {
                Some(e) => eval_expr(e, row, env),
                None => Ok(Value::Null),
            }
        }
        Expr::InList {
            expr,
            list,
            negated,
        } => {
            let needle = eval_expr(expr, row, env)?;
            if needle.is_null() {
                return Ok(Value::Null);
            }
            let mut saw_null = false;
            for item in list {
                let value = eval_expr(item, row, env)?;
                if value.is_null() {
                    saw_null = true;
                    continue;
                }
                if needle.compare(&value) == Some(std::cmp::Ordering::Equal) {
                    return Ok(Value::Integer(!negated as i64));
                }
            }
            if saw_null {
                // Unknown membership: three-valued logic.
                return Ok(Value::Null);
            }
            Ok(Value::Integer(*negated as i64))
        }
        Expr::Between {
            expr,
            low,
            high,
            negated,
        } => {
            let value = eval_expr(expr, row, env)?;
            let low = eval_expr(low, row, env)?;
            let high = eval_expr(high, row, env)?;
            if value.is_null() || low.is_null() || high.is_null() {
                return Ok(Value::Null);
            }
            let inside = value.sort_cmp(&low) != std::cmp::Ordering::Less
                && value.sort_cmp(&high) != std::cmp::Ordering::Greater;
            Ok(Value::Integer((inside != *negated) as i64))
        }
        Expr::Like {
            expr,
            pattern,
            negated,
        } => {
            let value = eval_expr(expr, row, env)?;
            let pattern = eval_expr(pattern, row, env)?;
            if value.is_null() || pattern.is_null() {
                return Ok(Value::Null);
            }
            let text = value.normalized();
            let text = match &text {
                Value::Text(s) => s.clone(),
                other => other.to_string(),
            };
            let pattern_text = match pattern.normalized() {
                Value::Text(s) => s,
                other => other.to_string(),
            };
            let matched = pattern::like_match(&text, &pattern_text);
            Ok(Value::Integer((matched != *negated) as i64))
        }
        Expr::IsNull { expr, negated } => {
            let value = eval_expr(expr, row, env)?;
            Ok(Value::Integer((value.is_null() != *negated) as i64))
        }
        Expr::Collate { expr, collation } => {
            // NOCASE folds text; comparison operators above then see the
            // folded value. Other collations pass through.
            let value = eval_expr(expr, row, env)?;
            if collation.eq_ignore_ascii_case("nocase") {
                if let Value::Text(s) = value {
                    return Ok(Value::Text(s.to_lowercase()));
                }
            }
            Ok(value)
        }
        Expr::Cast { expr, type_name } => {
            let value = eval_expr(expr, row, env)?;
            cast::cast_value(value, type_name)
        }
        Expr::Subquery(_) | Expr::InSelect { .. } => Err(ZqError::Misuse(
            "subquery reached expression evaluation unresolved".into(),
        )),
    }
}

/// WHERE-clause truth: NULL is treated as false.
pub fn eval_predicate(
    expr: &Expr,
    row: &ColumnResolver<'_>,
    env: &EvalEnv<'_>,
) -> Result<bool> {
    Ok(eval_expr(expr, row, env)?.is_truthy())
}

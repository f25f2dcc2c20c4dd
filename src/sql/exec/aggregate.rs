/// Grouping and aggregate accumulation.
///
/// Groups key on the evaluated GROUP BY tuple (order-preserving). Each
/// output row is the group's first input row plus one synthetic cell per
/// aggregate under the reserved `#agg` binding, named by the aggregate's
/// printed form; the select layer rewrites aggregate calls into column
/// references against that binding.
use std::collections::{HashMap, HashSet};

use crate::btree::key_encoding::encode_values;
use crate::error::{Result, ZqError};
use crate::sql::ast::Expr;
use crate::sql::eval::eval_expr;
use crate::sql::exec::{ExecCtx, NamedRow};
use crate::storage::page_store::PageStore;
use crate::types::Value;

pub const AGG_BINDING: &str = "#agg";

enum Acc {
    Count { n: i64 },
    Sum { int: Option<i64>, real: f64, is_real: bool, seen: bool },
    Avg { sum: f64, n: i64 },
    MinMax { is_min: bool, best: Option<Value> },
    GroupConcat { parts: Vec<String> },
}

struct Accumulator {
    acc: Acc,
    distinct_seen: Option<HashSet<Vec<u8>>>,
}

impl Accumulator {
    fn new(name: &str, distinct: bool) -> Result<Self> {
        let acc = match name.to_ascii_uppercase().as_str() {
            "COUNT" => Acc::Count { n: 0 },
            "SUM" => Acc::Sum {
                int: Some(0),
                real: 0.0,
                is_real: false,
                seen: false,
            },
            "AVG" => Acc::Avg { sum: 0.0, n: 0 },
            "MIN" => Acc::MinMax {
                is_min: true,
                best: None,
            },
            "MAX" => Acc::MinMax {
                is_min: false,
                best: None,
            },
            "GROUP_CONCAT" => Acc::GroupConcat { parts: Vec::new() },
            other => {
                return Err(ZqError::NotFound(format!(
                    "no such aggregate function: {}",
                    other
                )))
            }
        };
        Ok(Accumulator {
            acc,
            distinct_seen: distinct.then(HashSet::new),
        })
    }

    fn update(&mut self, value: Option<Value>) -> Result<()> {
        // COUNT(*) feeds None: every row counts.
        let Some(value) = value else {
            if let Acc::Count { n } = &mut self.acc {
                *n += 1;
            }
            return Ok(());
        };
        if value.is_null() {
            return Ok(());
        }
        if let Some(seen) = &mut self.distinct_seen {
            if !seen.insert(encode_values(std::slice::from_ref(&value))) {
                return Ok(());
            }
        }
        match &mut self.acc {
            Acc::Count { n } => *n += 1,
            Acc::Sum {
                int,
                real,
                is_real,
                seen,
            } => {
                *seen = true;
                match value.normalized() {
                    Value::Integer(v) => {
                        if !*is_real {
                            match int.and_then(|acc| acc.checked_add(v)) {
                                Some(next) => *int = Some(next),
                                None => {
                                    *is_real = true;
                                    *real = int.unwrap_or(0) as f64 + v as f64;
                                }
                            }
                        } else {
                            *real += v as f64;
                        }
                    }
                    Value::Real(v) => {
                        if !*is_real {
                            *is_real = true;
                            *real = int.unwrap_or(0) as f64;
                        }
                        *real += v;
                    }
                    other => {
                        return Err(ZqError::Type(format!(
                            "SUM over non-numeric value {}",
                            other
                        )))
                    }
                }
            }
            Acc::Avg { sum, n } => {
                let v = value.as_f64().ok_or_else(|| {
                    ZqError::Type(format!("AVG over non-numeric value {}", value))
                })?;
                *sum += v;
                *n += 1;
            }
            Acc::MinMax { is_min, best } => {
                let better = match best {
                    None => true,
                    Some(current) => {
                        let ordering = value.sort_cmp(current);
                        if *is_min {
                            ordering == std::cmp::Ordering::Less
                        } else {
                            ordering == std::cmp::Ordering::Greater
                        }
                    }
                };
                if better {
                    *best = Some(value);
                }
            }
            Acc::GroupConcat { parts } => parts.push(value.to_string()),
        }
        Ok(())
    }

    fn finish(self) -> Value {
        match self.acc {
            Acc::Count { n } => Value::Integer(n),
            Acc::Sum {
                int,
                real,
                is_real,
                seen,
            } => {
                if !seen {
                    Value::Null
                } else if is_real {
                    Value::Real(real)
                } else {
                    Value::Integer(int.unwrap_or(0))
                }
            }
            Acc::Avg { sum, n } => {
                if n == 0 {
                    Value::Null
                } else {
                    Value::Real(sum / n as f64)
                }
            }
            Acc::MinMax { best, .. } => best.unwrap_or(Value::Null),
            Acc::GroupConcat { parts } => {
                if parts.is_empty() {
                    Value::Null
                } else {
                    Value::Text(parts.join(","))
                }
            }
        }
    }
}

struct Group {
    representative: NamedRow,
    accumulators: Vec<Accumulator>,
}

/// Drain input rows into grouped output rows.
pub fn aggregate_rows<S: PageStore>(
    ctx: &mut ExecCtx<'_, S>,
    rows: Vec<NamedRow>,
    group_by: &[Expr],
    aggregates: &[Expr],
    input_shape: &[(String, Vec<String>)],
) -> Result<Vec<NamedRow>> {
    let mut order: Vec<Vec<u8>> = Vec::new();
    let mut groups: HashMap<Vec<u8>, Group> = HashMap::new();

    for row in rows {
        let env = ctx.eval_env();
        let resolver = row.resolver();
        let mut key_values = Vec::with_capacity(group_by.len());
        for expr in group_by {
            key_values.push(eval_expr(expr, &resolver, &env)?);
        }
        let key = encode_values(&key_values);

        if !groups.contains_key(&key) {
            let mut accumulators = Vec::with_capacity(aggregates.len());
            for agg in aggregates {
                let Expr::Function { name, distinct, .. } = agg else {
                    return Err(ZqError::Misuse(
                        "non-aggregate expression in aggregate list".into(),
                    ));
                };
                accumulators.push(Accumulator::new(name, *distinct)?);
            }
            order.push(key.clone());
            groups.insert(
                key.clone(),
                Group {
                    representative: row.clone(),
                    accumulators,
                },
            );
        }
        let group = groups.get_mut(&key).expect("BUG: inserted above");
        for (agg, accumulator) in aggregates.iter().zip(&mut group.accumulators) {
            let Expr::Function { args, star, .. } = agg else {
                unreachable!("checked at group creation");
            };
            let value = if *star {
                None
            } else {
                Some(eval_expr(&args[0], &resolver, &env)?)
            };
            accumulator.update(value)?;
        }
    }

    // Aggregates over an empty input (no GROUP BY) still produce one row.
    if groups.is_empty() && group_by.is_empty() {
        let mut accumulators = Vec::with_capacity(aggregates.len());
        for agg in aggregates {
            let Expr::Function { name, distinct, .. } = agg else {
                return Err(ZqError::Misuse(
                    "non-aggregate expression in aggregate list".into(),
                ));
            };
            accumulators.push(Accumulator::new(name, *distinct)?);
        }
        let key = Vec::new();
        order.push(key.clone());
        groups.insert(
            key,
            Group {
                representative: NamedRow::nulls(input_shape),
                accumulators,
            },
        );
    }

    let mut output = Vec::with_capacity(order.len());
    for key in order {
        let group = groups.remove(&key).expect("BUG: key recorded in order");
        let mut row = group.representative;
        for (agg, accumulator) in aggregates.iter().zip(group.accumulators) {
            row.cells.push((
                Some(AGG_BINDING.to_string()),
                agg.to_string(),
                accumulator.finish(),
            ));
        }
        output.push(row);
    }
    Ok(output)
}

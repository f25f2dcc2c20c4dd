/// Physical operators. Each exposes build (open), next, and drop (close);
/// rows stream lazily except where an operator is inherently blocking
/// (Sort, Aggregate, the HashJoin build side, the NestedLoop inner side).
use std::collections::{HashMap, VecDeque};

use crate::btree::cursor::BTreeCursor;
use crate::btree::key_encoding::{encode_values, prefix_successor};
use crate::btree::ops::BTree;
use crate::error::{Result, ZqError};
use crate::index::hash::HashIndex;
use crate::schema::index::IndexKind;
use crate::sql::ast::Expr;
use crate::sql::eval::eval_expr;
use crate::sql::exec::{aggregate, ExecCtx, NamedRow};
use crate::sql::planner::{HashJoinKind, Plan};
use crate::storage::page_store::PageStore;
use crate::storage::table::{Table, TableCursor};
use crate::types::Value;

/// Output shape of a plan: (binding, column names) per table, join order.
pub fn plan_shape(plan: &Plan) -> Vec<(String, Vec<String>)> {
    match plan {
        Plan::TableScan { table, binding, .. } | Plan::IndexScan { table, binding, .. } => {
            vec![(
                binding.clone(),
                table.columns.iter().map(|c| c.name.clone()).collect(),
            )]
        }
        Plan::Filter { input, .. }
        | Plan::Aggregate { input, .. }
        | Plan::Sort { input, .. }
        | Plan::Limit { input, .. } => plan_shape(input),
        Plan::NestedLoopJoin {
            left,
            right,
            flipped,
            ..
        }
        | Plan::HashJoin {
            left,
            right,
            flipped,
            ..
        } => {
            // A flipped join (RIGHT rewritten as LEFT) swapped its children;
            // the surfaced shape stays in FROM-clause order.
            let (first, second) = if *flipped { (right, left) } else { (left, right) };
            let mut shape = plan_shape(first);
            shape.extend(plan_shape(second));
            shape
        }
        Plan::Nothing => Vec::new(),
    }
}

fn no_row(_table: Option<&str>, _name: &str) -> Option<Value> {
    None
}

pub enum Operator {
    TableScan {
        table: Table,
        binding: String,
        cursor: TableCursor,
        upper: Option<u64>,
    },
    IndexScan {
        table: Table,
        binding: String,
        source: IndexSource,
    },
    Filter {
        input: Box<Operator>,
        predicate: Expr,
    },
    NestedLoop {
        left: Box<Operator>,
        right_rows: Vec<NamedRow>,
        right_shape: Vec<(String, Vec<String>)>,
        on: Option<Expr>,
        outer: bool,
        /// Children are swapped relative to the FROM clause; emit rows in
        /// FROM order anyway.
        flipped: bool,
        current_left: Option<NamedRow>,
        right_idx: usize,
        left_matched: bool,
    },
    HashJoin {
        left: Box<Operator>,
        build_rows: Vec<NamedRow>,
        build_matched: Vec<bool>,
        buckets: HashMap<Vec<u8>, Vec<usize>>,
        left_keys: Vec<Expr>,
        kind: HashJoinKind,
        /// Children are swapped relative to the FROM clause; emit rows in
        /// FROM order anyway.
        flipped: bool,
        left_shape: Vec<(String, Vec<String>)>,
        right_shape: Vec<(String, Vec<String>)>,
        pending: VecDeque<NamedRow>,
        emitting_unmatched: bool,
        unmatched_idx: usize,
    },
    /// Blocking operators deliver from a precomputed buffer.
    Buffered {
        rows: std::vec::IntoIter<NamedRow>,
    },
    Limit {
        input: Box<Operator>,
        remaining: Option<i64>,
        to_skip: i64,
    },
    Nothing {
        emitted: bool,
    },
}

pub enum IndexSource {
    Ordered {
        cursor: BTreeCursor,
        end_exclusive: Option<Vec<u8>>,
        started: bool,
    },
    Hash {
        rowids: std::vec::IntoIter<u64>,
    },
}

impl Operator {
    /// Build the operator tree, running blocking phases eagerly.
    pub fn build<S: PageStore>(plan: &Plan, ctx: &mut ExecCtx<'_, S>) -> Result<Operator> {
        match plan {
            Plan::TableScan {
                table,
                binding,
                lower,
                upper,
            } => {
                let handle = Table {
                    def: table.clone(),
                    indexes: Vec::new(),
                };
                let lower_id = eval_bound(lower.as_ref(), ctx)?;
                let upper_id = eval_bound(upper.as_ref(), ctx)?;
                let cursor = handle.scan(ctx.store, lower_id)?;
                Ok(Operator::TableScan {
                    table: handle,
                    binding: binding.clone(),
                    cursor,
                    upper: upper_id,
                })
            }
            Plan::IndexScan {
                table,
                binding,
                index,
                eq_prefix,
                range_lower,
                range_upper,
            } => {
                // Probe values take the indexed column's affinity, matching
                // how the stored keys were coerced at write time.
                let column_type = |position: usize| {
                    index
                        .columns
                        .get(position)
                        .and_then(|name| table.column_index(name))
                        .map(|idx| table.columns[idx].data_type)
                };
                let env = ctx.eval_env();
                let mut prefix_values = Vec::with_capacity(eq_prefix.len());
                for (position, expr) in eq_prefix.iter().enumerate() {
                    let value = eval_expr(expr, &no_row, &env)?;
                    let value = match column_type(position) {
                        Some(data_type) => data_type.coerce(value)?,
                        None => value,
                    };
                    prefix_values.push(value);
                }
                drop(env);
                let handle = Table {
                    def: table.clone(),
                    indexes: Vec::new(),
                };
                // Equality with NULL never matches anything.
                if prefix_values.iter().any(Value::is_null) {
                    return Ok(Operator::IndexScan {
                        table: handle,
                        binding: binding.clone(),
                        source: IndexSource::Hash {
                            rowids: Vec::new().into_iter(),
                        },
                    });
                }
                let source = match index.kind {
                    IndexKind::Hash => {
                        let key = encode_values(&prefix_values);
                        let rowids =
                            HashIndex::open(index.root).lookup(ctx.store, &key)?;
                        IndexSource::Hash {
                            rowids: rowids.into_iter(),
                        }
                    }
                    IndexKind::Ordered => {
                        let prefix = encode_values(&prefix_values);
                        let range_type = column_type(prefix_values.len());
                        let mut start = prefix.clone();
                        if let Some(lower) = range_lower {
                            let env = ctx.eval_env();
                            let mut v = eval_expr(lower, &no_row, &env)?;
                            drop(env);
                            if let Some(data_type) = range_type {
                                v = data_type.coerce(v)?;
                            }
                            start = {
                                let mut values = prefix_values.clone();
                                values.push(v);
                                encode_values(&values)
                            };
                        }
                        let end_exclusive = if let Some(upper) = range_upper {
                            let env = ctx.eval_env();
                            let mut v = eval_expr(upper, &no_row, &env)?;
                            drop(env);
                            if let Some(data_type) = range_type {
                                v = data_type.coerce(v)?;
                            }
                            let mut values = prefix_values.clone();
                            values.push(v);
                            prefix_successor(&encode_values(&values))
                        } else {
                            prefix_successor(&prefix)
                        };
                        let tree = BTree::open(index.root);
                        let cursor = BTreeCursor::seek(&tree, ctx.store, &start)?;
                        IndexSource::Ordered {
                            cursor,
                            end_exclusive,
                            started: false,
                        }
                    }
                };
                Ok(Operator::IndexScan {
                    table: handle,
                    binding: binding.clone(),
                    source,
                })
            }
            Plan::Filter { input, predicate } => Ok(Operator::Filter {
                input: Box::new(Operator::build(input, ctx)?),
                predicate: predicate.clone(),
            }),
            Plan::NestedLoopJoin {
                left,
                right,
                on,
                outer_left,
                flipped,
            } => {
                // Inner side materializes once; it is re-scanned per outer row.
                let mut right_op = Operator::build(right, ctx)?;
                let mut right_rows = Vec::new();
                while let Some(row) = right_op.next(ctx)? {
                    right_rows.push(row);
                }
                Ok(Operator::NestedLoop {
                    left: Box::new(Operator::build(left, ctx)?),
                    right_rows,
                    right_shape: plan_shape(right),
                    on: on.clone(),
                    outer: *outer_left,
                    flipped: *flipped,
                    current_left: None,
                    right_idx: 0,
                    left_matched: false,
                })
            }
            Plan::HashJoin {
                left,
                right,
                left_keys,
                right_keys,
                kind,
                flipped,
            } => {
                // Build phase: drain the right input into the hash table.
                let mut right_op = Operator::build(right, ctx)?;
                let mut build_rows = Vec::new();
                let mut buckets: HashMap<Vec<u8>, Vec<usize>> = HashMap::new();
                while let Some(row) = right_op.next(ctx)? {
                    let key = join_key(&row, right_keys, ctx)?;
                    let idx = build_rows.len();
                    build_rows.push(row);
                    if let Some(key) = key {
                        buckets.entry(key).or_default().push(idx);
                    }
                }
                let build_matched = vec![false; build_rows.len()];
                Ok(Operator::HashJoin {
                    left: Box::new(Operator::build(left, ctx)?),
                    build_rows,
                    build_matched,
                    buckets,
                    left_keys: left_keys.clone(),
                    kind: *kind,
                    flipped: *flipped,
                    left_shape: plan_shape(left),
                    right_shape: plan_shape(right),
                    pending: VecDeque::new(),
                    emitting_unmatched: false,
                    unmatched_idx: 0,
                })
            }
            Plan::Aggregate {
                input,
                group_by,
                aggregates,
            } => {
                let shape = plan_shape(input);
                let mut input_op = Operator::build(input, ctx)?;
                let mut rows = Vec::new();
                while let Some(row) = input_op.next(ctx)? {
                    rows.push(row);
                }
                let output = aggregate::aggregate_rows(ctx, rows, group_by, aggregates, &shape)?;
                Ok(Operator::Buffered {
                    rows: output.into_iter(),
                })
            }
            Plan::Sort { input, keys } => {
                let mut input_op = Operator::build(input, ctx)?;
                let mut rows = Vec::new();
                while let Some(row) = input_op.next(ctx)? {
                    rows.push(row);
                }
                // Decorate with key tuples, sort, undecorate.
                let mut decorated: Vec<(Vec<Value>, NamedRow)> = Vec::with_capacity(rows.len());
                for row in rows {
                    let env = ctx.eval_env();
                    let resolver = row.resolver();
                    let mut key = Vec::with_capacity(keys.len());
                    for item in keys {
                        key.push(eval_expr(&item.expr, &resolver, &env)?);
                    }
                    drop(env);
                    drop(resolver);
                    decorated.push((key, row));
                }
                decorated.sort_by(|(a, _), (b, _)| {
                    for (item, (x, y)) in keys.iter().zip(a.iter().zip(b.iter())) {
                        let ordering = x.sort_cmp(y);
                        let ordering = if item.descending {
                            ordering.reverse()
                        } else {
                            ordering
                        };
                        if ordering != std::cmp::Ordering::Equal {
                            return ordering;
                        }
                    }
                    std::cmp::Ordering::Equal
                });
                Ok(Operator::Buffered {
                    rows: decorated
                        .into_iter()
                        .map(|(_, r)| r)
                        .collect::<Vec<_>>()
                        .into_iter(),
                })
            }
            Plan::Limit {
                input,
                limit,
                offset,
            } => {
                let env = ctx.eval_env();
                let remaining = match limit {
                    Some(e) => {
                        let v = eval_expr(e, &no_row, &env)?;
                        match v.as_i64() {
                            Some(n) if n >= 0 => Some(n),
                            // Negative LIMIT means unlimited.
                            Some(_) => None,
                            None => {
                                return Err(ZqError::Type(
                                    "LIMIT requires an integer".into(),
                                ))
                            }
                        }
                    }
                    None => None,
                };
                let to_skip = match offset {
                    Some(e) => eval_expr(e, &no_row, &env)?
                        .as_i64()
                        .ok_or_else(|| ZqError::Type("OFFSET requires an integer".into()))?
                        .max(0),
                    None => 0,
                };
                drop(env);
                Ok(Operator::Limit {
                    input: Box::new(Operator::build(input, ctx)?),
                    remaining,
                    to_skip,
                })
            }
            Plan::Nothing => Ok(Operator::Nothing { emitted: false }),
        }
    }

    pub fn next<S: PageStore>(&mut self, ctx: &mut ExecCtx<'_, S>) -> Result<Option<NamedRow>> {
        match self {
            Operator::TableScan {
                table,
                binding,
                cursor,
                upper,
            } => match cursor.next(ctx.store)? {
                Some((rowid, values)) => {
                    if let Some(upper) = upper {
                        if rowid > *upper {
                            return Ok(None);
                        }
                    }
                    Ok(Some(NamedRow::from_table(binding, &table.def, values)))
                }
                None => Ok(None),
            },
            Operator::IndexScan {
                table,
                binding,
                source,
            } => match source {
                IndexSource::Hash { rowids } => match rowids.next() {
                    Some(rowid) => {
                        let values = table.get_row(ctx.store, rowid)?.ok_or_else(|| {
                            ZqError::Corrupt(format!(
                                "index references missing row {} in {}",
                                rowid, table.def.name
                            ))
                        })?;
                        Ok(Some(NamedRow::from_table(binding, &table.def, values)))
                    }
                    None => Ok(None),
                },
                IndexSource::Ordered {
                    cursor,
                    end_exclusive,
                    started,
                } => {
                    let entry = if *started {
                        cursor.advance(ctx.store)?
                    } else {
                        *started = true;
                        cursor.current(ctx.store)?
                    };
                    match entry {
                        Some((key, value)) => {
                            if let Some(end) = end_exclusive {
                                if key.as_slice() >= end.as_slice() {
                                    return Ok(None);
                                }
                            }
                            let rowid = u64::from_be_bytes(
                                value.get(0..8).and_then(|b| b.try_into().ok()).ok_or_else(
                                    || ZqError::Corrupt("index entry value truncated".into()),
                                )?,
                            );
                            let values =
                                table.get_row(ctx.store, rowid)?.ok_or_else(|| {
                                    ZqError::Corrupt(format!(
                                        "index references missing row {} in {}",
                                        rowid, table.def.name
                                    ))
                                })?;
                            Ok(Some(NamedRow::from_table(binding, &table.def, values)))
                        }
                        None => Ok(None),
                    }
                }
            },
            Operator::Filter { input, predicate } => loop {
                let Some(row) = input.next(ctx)? else {
                    return Ok(None);
                };
                let env = ctx.eval_env();
                let truthy = eval_expr(predicate, &row.resolver(), &env)?.is_truthy();
                drop(env);
                if truthy {
                    return Ok(Some(row));
                }
            },
            Operator::NestedLoop {
                left,
                right_rows,
                right_shape,
                on,
                outer,
                flipped,
                current_left,
                right_idx,
                left_matched,
            } => loop {
                if current_left.is_none() {
                    match left.next(ctx)? {
                        Some(row) => {
                            *current_left = Some(row);
                            *right_idx = 0;
                            *left_matched = false;
                        }
                        None => return Ok(None),
                    }
                }
                let left_row = current_left.as_ref().expect("BUG: set above").clone();
                while *right_idx < right_rows.len() {
                    let right_row = right_rows[*right_idx].clone();
                    *right_idx += 1;
                    // A flipped join concatenates back in FROM-clause order.
                    let combined = if *flipped {
                        right_row.concat(left_row.clone())
                    } else {
                        left_row.clone().concat(right_row)
                    };
                    let keep = match on {
                        Some(predicate) => {
                            let env = ctx.eval_env();
                            let truthy =
                                eval_expr(predicate, &combined.resolver(), &env)?.is_truthy();
                            drop(env);
                            truthy
                        }
                        None => true,
                    };
                    if keep {
                        *left_matched = true;
                        return Ok(Some(combined));
                    }
                }
                // Right side exhausted for this outer row.
                let emit_padding = *outer && !*left_matched;
                *current_left = None;
                if emit_padding {
                    return Ok(Some(if *flipped {
                        NamedRow::nulls(right_shape).concat(left_row)
                    } else {
                        left_row.concat(NamedRow::nulls(right_shape))
                    }));
                }
            },
            Operator::HashJoin {
                left,
                build_rows,
                build_matched,
                buckets,
                left_keys,
                kind,
                flipped,
                left_shape,
                right_shape,
                pending,
                emitting_unmatched,
                unmatched_idx,
            } => loop {
                if let Some(row) = pending.pop_front() {
                    return Ok(Some(row));
                }
                if *emitting_unmatched {
                    // FULL OUTER tail: unmatched build rows, probe side padded.
                    while *unmatched_idx < build_rows.len() {
                        let idx = *unmatched_idx;
                        *unmatched_idx += 1;
                        if !build_matched[idx] {
                            return Ok(Some(if *flipped {
                                build_rows[idx].clone().concat(NamedRow::nulls(left_shape))
                            } else {
                                NamedRow::nulls(left_shape).concat(build_rows[idx].clone())
                            }));
                        }
                    }
                    return Ok(None);
                }
                match left.next(ctx)? {
                    Some(probe) => {
                        let key = join_key(&probe, left_keys, ctx)?;
                        let matches = key.as_ref().and_then(|k| buckets.get(k));
                        match matches {
                            Some(indices) if !indices.is_empty() => {
                                for &idx in indices {
                                    build_matched[idx] = true;
                                    // Flipped joins concatenate back in
                                    // FROM-clause order.
                                    pending.push_back(if *flipped {
                                        build_rows[idx].clone().concat(probe.clone())
                                    } else {
                                        probe.clone().concat(build_rows[idx].clone())
                                    });
                                }
                            }
                            _ => {
                                if matches!(
                                    kind,
                                    HashJoinKind::LeftOuter | HashJoinKind::FullOuter
                                ) {
                                    pending.push_back(if *flipped {
                                        NamedRow::nulls(right_shape).concat(probe)
                                    } else {
                                        probe.concat(NamedRow::nulls(right_shape))
                                    });
                                }
                            }
                        }
                    }
                    None => {
                        if *kind == HashJoinKind::FullOuter {
                            *emitting_unmatched = true;
                        } else {
                            return Ok(None);
                        }
                    }
                }
            },
            Operator::Buffered { rows } => Ok(rows.next()),
            Operator::Limit {
                input,
                remaining,
                to_skip,
            } => {
                while *to_skip > 0 {
                    if input.next(ctx)?.is_none() {
                        return Ok(None);
                    }
                    *to_skip -= 1;
                }
                if let Some(n) = remaining {
                    if *n == 0 {
                        return Ok(None);
                    }
                    *n -= 1;
                }
                input.next(ctx)
            }
            Operator::Nothing { emitted } => {
                if *emitted {
                    Ok(None)
                } else {
                    *emitted = true;
                    Ok(Some(NamedRow::empty()))
                }
            }
        }
    }
}

fn eval_bound<S: PageStore>(
    bound: Option<&Expr>,
    ctx: &mut ExecCtx<'_, S>,
) -> Result<Option<u64>> {
    let Some(expr) = bound else {
        return Ok(None);
    };
    let env = ctx.eval_env();
    let value = eval_expr(expr, &no_row, &env)?;
    Ok(value.as_i64().filter(|v| *v >= 0).map(|v| v as u64))
}

/// Encoded join key for a row, None when any component is NULL (NULL never
/// matches in an equi-join).
fn join_key<S: PageStore>(
    row: &NamedRow,
    keys: &[Expr],
    ctx: &mut ExecCtx<'_, S>,
) -> Result<Option<Vec<u8>>> {
    let env = ctx.eval_env();
    let resolver = row.resolver();
    let mut values = Vec::with_capacity(keys.len());
    for key in keys {
        let value = eval_expr(key, &resolver, &env)?;
        if value.is_null() {
            return Ok(None);
        }
        values.push(value);
    }
    Ok(Some(encode_values(&values)))
}

/// Query planner: AST -> tree of physical operators.
///
/// Scans get equality/range predicates pushed into their bounds; the
/// leftover conjuncts become a Filter above the scan. Joins build left-deep;
/// chains of inner/cross joins are reordered so the smallest estimated
/// input is leftmost. An equi-join with a small estimated build side plans
/// as a hash join, everything else as a nested loop.
use crate::error::{Result, ZqError};
use crate::schema::catalog::{SystemCatalog, TableDef};
use crate::schema::index::{IndexDef, IndexKind};
use crate::sql::ast::*;
use crate::storage::page_store::PageStore;

/// Inputs estimated at or below this row count build the hash table.
const HASH_JOIN_BUILD_LIMIT: u64 = 100_000;

#[derive(Debug, Clone)]
pub enum Plan {
    TableScan {
        table: TableDef,
        binding: String,
        /// Row-id bounds (from rowid-alias predicates), inclusive.
        lower: Option<Expr>,
        upper: Option<Expr>,
    },
    IndexScan {
        table: TableDef,
        binding: String,
        index: IndexDef,
        /// Equality expressions for a leading prefix of the index columns.
        eq_prefix: Vec<Expr>,
        /// Optional inclusive range on the next index column.
        range_lower: Option<Expr>,
        range_upper: Option<Expr>,
    },
    Filter {
        input: Box<Plan>,
        predicate: Expr,
    },
    NestedLoopJoin {
        left: Box<Plan>,
        right: Box<Plan>,
        on: Option<Expr>,
        outer_left: bool,
        /// True when left/right are swapped relative to the FROM clause
        /// (RIGHT JOIN); rows still surface in FROM-clause column order.
        flipped: bool,
    },
    HashJoin {
        left: Box<Plan>,
        right: Box<Plan>,
        left_keys: Vec<Expr>,
        right_keys: Vec<Expr>,
        kind: HashJoinKind,
        /// True when left/right are swapped relative to the FROM clause
        /// (RIGHT JOIN); rows still surface in FROM-clause column order.
        flipped: bool,
    },
    Aggregate {
        input: Box<Plan>,
        group_by: Vec<Expr>,
        aggregates: Vec<Expr>,
    },
    Sort {
        input: Box<Plan>,
        keys: Vec<OrderByItem>,
    },
    Limit {
        input: Box<Plan>,
        limit: Option<Expr>,
        offset: Option<Expr>,
    },
    /// Produces exactly one empty row (SELECT without FROM).
    Nothing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashJoinKind {
    Inner,
    LeftOuter,
    FullOuter,
}

impl Plan {
    /// Estimated row count, from catalog statistics.
    pub fn estimated_rows(&self) -> u64 {
        match self {
            Plan::TableScan { table, lower, upper, .. } => {
                if lower.is_some() || upper.is_some() {
                    (table.row_count / 4).max(1)
                } else {
                    table.row_count.max(1)
                }
            }
            Plan::IndexScan { table, .. } => (table.row_count / 10).max(1),
            Plan::Filter { input, .. } => (input.estimated_rows() / 2).max(1),
            Plan::NestedLoopJoin { left, right, .. }
            | Plan::HashJoin { left, right, .. } => {
                left.estimated_rows().saturating_mul(right.estimated_rows()).max(1)
            }
            Plan::Aggregate { input, .. } => (input.estimated_rows() / 4).max(1),
            Plan::Sort { input, .. } | Plan::Limit { input, .. } => input.estimated_rows(),
            Plan::Nothing => 1,
        }
    }
}

/// Split a predicate into its AND-conjuncts.
fn conjuncts(expr: Expr, out: &mut Vec<Expr>) {
    match expr {
        Expr::Binary {
            left,
            op: BinOp::And,
            right,
        } => {
            conjuncts(*left, out);
            conjuncts(*right, out);
        }
        other => out.push(other),
    }
}

fn rejoin(conjuncts: Vec<Expr>) -> Option<Expr> {
    conjuncts.into_iter().reduce(|acc, e| Expr::Binary {
        left: Box::new(acc),
        op: BinOp::And,
        right: Box::new(e),
    })
}

/// `column = <expr>` where the column belongs to the given binding and the
/// value side is row-independent (no column references at all, so it can be
/// evaluated before the scan opens). Returns the value expression.
fn equality_on(conjunct: &Expr, binding: &str, column: &str) -> Option<Expr> {
    let Expr::Binary { left, op: BinOp::Eq, right } = conjunct else {
        return None;
    };
    let matches_column = |e: &Expr| {
        matches!(e, Expr::Column { table, name }
            if name == column && table.as_deref().map_or(true, |t| t == binding))
    };
    if matches_column(left) && is_row_independent(right) {
        return Some((**right).clone());
    }
    if matches_column(right) && is_row_independent(left) {
        return Some((**left).clone());
    }
    None
}

/// Range conjunct `column <op> <expr>` -> (is_lower, value).
fn range_on(conjunct: &Expr, binding: &str, column: &str) -> Option<(bool, Expr)> {
    let Expr::Binary { left, op, right } = conjunct else {
        return None;
    };
    let matches_column = |e: &Expr| {
        matches!(e, Expr::Column { table, name }
            if name == column && table.as_deref().map_or(true, |t| t == binding))
    };
    match op {
        BinOp::Gt | BinOp::Ge if matches_column(left) && is_row_independent(right) => {
            Some((true, (**right).clone()))
        }
        BinOp::Lt | BinOp::Le if matches_column(left) && is_row_independent(right) => {
            Some((false, (**right).clone()))
        }
        BinOp::Gt | BinOp::Ge if matches_column(right) && is_row_independent(left) => {
            Some((false, (**left).clone()))
        }
        BinOp::Lt | BinOp::Le if matches_column(right) && is_row_independent(left) => {
            Some((true, (**left).clone()))
        }
        _ => None,
    }
}

/// True when the expression can be evaluated without a current row:
/// literals, parameters, and functions over them.
fn is_row_independent(expr: &Expr) -> bool {
    let mut independent = true;
    walk(expr, &mut |e| {
        if matches!(e, Expr::Column { .. } | Expr::Subquery(_) | Expr::InSelect { .. }) {
            independent = false;
        }
    });
    independent
}

pub fn walk(expr: &Expr, visit: &mut impl FnMut(&Expr)) {
    visit(expr);
    walk_children(expr, &mut |child| walk(child, visit));
}

/// Visit each direct child of an expression (non-recursive).
pub fn walk_children(expr: &Expr, visit: &mut impl FnMut(&Expr)) {
    match expr {
        Expr::Unary { expr, .. } => visit(expr),
        Expr::Binary { left, right, .. } => {
            visit(left);
            visit(right);
        }
        Expr::Function { args, .. } => {
            for a in args {
                visit(a);
            }
        }
        Expr::Case {
            operand,
            branches,
            else_expr,
        } => {
            if let Some(op) = operand {
                visit(op);
            }
            for (w, t) in branches {
                visit(w);
                visit(t);
            }
            if let Some(e) = else_expr {
                visit(e);
            }
        }
        Expr::InList { expr, list, .. } => {
            visit(expr);
            for item in list {
                visit(item);
            }
        }
        Expr::Between {
            expr, low, high, ..
        } => {
            visit(expr);
            visit(low);
            visit(high);
        }
        Expr::Like { expr, pattern, .. } => {
            visit(expr);
            visit(pattern);
        }
        Expr::IsNull { expr, .. } => visit(expr),
        Expr::Collate { expr, .. } => visit(expr),
        Expr::Cast { expr, .. } => visit(expr),
        Expr::InSelect { expr, .. } => visit(expr),
        Expr::Literal(_) | Expr::Column { .. } | Expr::Param(_) | Expr::Subquery(_) => {}
    }
}

/// Choose the access path for one table given the WHERE conjuncts that
/// apply to it. Consumed conjuncts are removed from the list.
fn plan_scan(
    store: &mut impl PageStore,
    catalog: &SystemCatalog,
    table_ref: &TableRef,
    conjuncts: &mut Vec<Expr>,
) -> Result<Plan> {
    let table = catalog.expect_table(store, &table_ref.name)?;
    let binding = table_ref.binding().to_string();
    let indexes = catalog.indexes_for_table(store, &table_ref.name)?;

    // Best index: longest equality prefix, then an optional range column.
    let mut best: Option<(usize, bool, IndexDef, Vec<usize>, Vec<Expr>, Option<Expr>, Option<Expr>)> =
        None;
    for index in &indexes {
        let mut used = Vec::new();
        let mut eq_prefix = Vec::new();
        for col in &index.columns {
            let found = conjuncts
                .iter()
                .enumerate()
                .find_map(|(i, c)| equality_on(c, &binding, col).map(|e| (i, e)));
            match found {
                Some((i, value)) => {
                    used.push(i);
                    eq_prefix.push(value);
                }
                None => break,
            }
        }
        // Hash indexes require the full column tuple.
        if index.kind == IndexKind::Hash && eq_prefix.len() != index.columns.len() {
            continue;
        }
        let mut range_lower = None;
        let mut range_upper = None;
        let mut has_range = false;
        if index.kind == IndexKind::Ordered {
            if let Some(next_col) = index.columns.get(eq_prefix.len()) {
                for (i, c) in conjuncts.iter().enumerate() {
                    if used.contains(&i) {
                        continue;
                    }
                    if let Some((is_lower, value)) = range_on(c, &binding, next_col) {
                        let slot = if is_lower {
                            &mut range_lower
                        } else {
                            &mut range_upper
                        };
                        if slot.is_none() {
                            *slot = Some(value);
                            has_range = true;
                            // The conjunct stays: bounds are inclusive and
                            // strict operators still need the filter.
                        }
                    }
                }
            }
        }
        if eq_prefix.is_empty() && !has_range {
            continue;
        }
        let score = (eq_prefix.len(), has_range);
        let better = match &best {
            None => true,
            Some((best_eq, best_range, ..)) => {
                score.0 > *best_eq || (score.0 == *best_eq && score.1 && !*best_range)
            }
        };
        if better {
            best = Some((
                eq_prefix.len(),
                has_range,
                index.clone(),
                used,
                eq_prefix,
                range_lower,
                range_upper,
            ));
        }
    }

    if let Some((_, _, index, mut used, eq_prefix, range_lower, range_upper)) = best {
        // Equality conjuncts consumed by the prefix are fully answered by
        // the index; remove them.
        used.sort_unstable_by(|a, b| b.cmp(a));
        for i in used {
            conjuncts.remove(i);
        }
        return Ok(Plan::IndexScan {
            table,
            binding,
            index,
            eq_prefix,
            range_lower,
            range_upper,
        });
    }

    // Row-id bounds from the INTEGER PRIMARY KEY alias.
    let mut lower = None;
    let mut upper = None;
    if let Some(alias_idx) = table.rowid_alias() {
        let alias = table.columns[alias_idx].name.clone();
        for c in conjuncts.iter() {
            if let Some(value) = equality_on(c, &binding, &alias) {
                lower = Some(value.clone());
                upper = Some(value);
                break;
            }
            if let Some((is_lower, value)) = range_on(c, &binding, &alias) {
                let slot = if is_lower { &mut lower } else { &mut upper };
                if slot.is_none() {
                    *slot = Some(value);
                }
            }
        }
    }

    Ok(Plan::TableScan {
        table,
        binding,
        lower,
        upper,
    })
}

/// Equi-join keys between the accumulated left side and a new right table:
/// conjuncts of the ON clause of the shape left_col = right_col.
fn equi_join_keys(
    on: &Expr,
    right_binding: &str,
) -> Option<(Vec<Expr>, Vec<Expr>)> {
    let mut parts = Vec::new();
    conjuncts(on.clone(), &mut parts);
    let mut left_keys = Vec::new();
    let mut right_keys = Vec::new();
    for part in parts {
        let Expr::Binary { left, op: BinOp::Eq, right } = &part else {
            return None;
        };
        let left_is_right_side = matches!(&**left, Expr::Column { table: Some(t), .. } if t == right_binding);
        let right_is_right_side = matches!(&**right, Expr::Column { table: Some(t), .. } if t == right_binding);
        match (left_is_right_side, right_is_right_side) {
            (false, true) => {
                left_keys.push((**left).clone());
                right_keys.push((**right).clone());
            }
            (true, false) => {
                left_keys.push((**right).clone());
                right_keys.push((**left).clone());
            }
            _ => return None,
        }
    }
    if left_keys.is_empty() {
        None
    } else {
        Some((left_keys, right_keys))
    }
}

/// Plan the FROM clause plus WHERE push-down. Returns the plan and the
/// conjuncts that could not be pushed into any scan.
pub fn plan_from(
    store: &mut impl PageStore,
    catalog: &SystemCatalog,
    from: &FromClause,
    where_clause: Option<Expr>,
) -> Result<Plan> {
    let mut parts = Vec::new();
    if let Some(w) = where_clause {
        conjuncts(w, &mut parts);
    }

    // Reorder a pure cross-join chain so the smallest input goes leftmost;
    // joins with ON clauses keep syntax order, which guarantees their
    // conditions only reference tables already in scope.
    let mut ordered: Vec<&Join> = from.joins.iter().collect();
    let reorderable = from
        .joins
        .iter()
        .all(|j| matches!(j.kind, JoinKind::Cross) && j.on.is_none());
    if reorderable && from.joins.len() > 1 {
        let mut sized: Vec<(u64, &Join)> = Vec::new();
        for join in &from.joins {
            let def = catalog.expect_table(store, &join.table.name)?;
            sized.push((def.row_count, join));
        }
        sized.sort_by_key(|(n, _)| *n);
        ordered = sized.into_iter().map(|(_, j)| j).collect();
    }

    let mut plan = plan_scan(store, catalog, &from.table, &mut parts)?;

    for join in ordered {
        let mut right_parts: Vec<Expr> = Vec::new();
        // Outer joins keep their ON clause out of the scan push-down so
        // unmatched rows are preserved.
        if matches!(join.kind, JoinKind::Inner) {
            if let Some(on) = &join.on {
                conjuncts(on.clone(), &mut right_parts);
            }
        }
        let right = plan_scan(store, catalog, &join.table, &mut right_parts)?;
        let remaining_on = if matches!(join.kind, JoinKind::Inner) {
            rejoin(right_parts)
        } else {
            join.on.clone()
        };

        let binding = join.table.binding().to_string();
        plan = match join.kind {
            JoinKind::Cross => Plan::NestedLoopJoin {
                left: Box::new(plan),
                right: Box::new(right),
                on: None,
                outer_left: false,
                flipped: false,
            },
            JoinKind::Inner => {
                let equi = remaining_on.as_ref().and_then(|on| equi_join_keys(on, &binding));
                match equi {
                    Some((left_keys, right_keys))
                        if right.estimated_rows() <= HASH_JOIN_BUILD_LIMIT =>
                    {
                        Plan::HashJoin {
                            left: Box::new(plan),
                            right: Box::new(right),
                            left_keys,
                            right_keys,
                            kind: HashJoinKind::Inner,
                            flipped: false,
                        }
                    }
                    _ => Plan::NestedLoopJoin {
                        left: Box::new(plan),
                        right: Box::new(right),
                        on: remaining_on,
                        outer_left: false,
                        flipped: false,
                    },
                }
            }
            JoinKind::Left => {
                let equi = remaining_on.as_ref().and_then(|on| equi_join_keys(on, &binding));
                match equi {
                    Some((left_keys, right_keys))
                        if right.estimated_rows() <= HASH_JOIN_BUILD_LIMIT =>
                    {
                        Plan::HashJoin {
                            left: Box::new(plan),
                            right: Box::new(right),
                            left_keys,
                            right_keys,
                            kind: HashJoinKind::LeftOuter,
                            flipped: false,
                        }
                    }
                    _ => Plan::NestedLoopJoin {
                        left: Box::new(plan),
                        right: Box::new(right),
                        on: remaining_on,
                        outer_left: true,
                        flipped: false,
                    },
                }
            }
            JoinKind::Right => {
                // RIGHT OUTER is a LEFT OUTER with the sides swapped; the
                // flipped flag keeps the surfaced column order at the
                // FROM-clause order despite the physical swap.
                let equi = remaining_on.as_ref().and_then(|on| equi_join_keys(on, &binding));
                match equi {
                    Some((left_keys, right_keys)) => Plan::HashJoin {
                        left: Box::new(right),
                        right: Box::new(plan),
                        left_keys: right_keys,
                        right_keys: left_keys,
                        kind: HashJoinKind::LeftOuter,
                        flipped: true,
                    },
                    None => Plan::NestedLoopJoin {
                        left: Box::new(right),
                        right: Box::new(plan),
                        on: remaining_on,
                        outer_left: true,
                        flipped: true,
                    },
                }
            }
            JoinKind::FullOuter => {
                let equi = remaining_on.as_ref().and_then(|on| equi_join_keys(on, &binding));
                match equi {
                    Some((left_keys, right_keys)) => Plan::HashJoin {
                        left: Box::new(plan),
                        right: Box::new(right),
                        left_keys,
                        right_keys,
                        kind: HashJoinKind::FullOuter,
                        flipped: false,
                    },
                    None => {
                        return Err(ZqError::Misuse(
                            "FULL OUTER JOIN requires an equi-join condition".into(),
                        ))
                    }
                }
            }
        };
    }

    if let Some(predicate) = rejoin(parts) {
        plan = Plan::Filter {
            input: Box::new(plan),
            predicate,
        };
    }
    Ok(plan)
}

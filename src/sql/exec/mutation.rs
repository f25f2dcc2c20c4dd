/// INSERT / UPDATE / DELETE execution.
///
/// UPDATE and DELETE collect their target row-ids into a set before
/// touching anything, so the scan cursor never observes its own
/// modifications. Every forward operation logs its reverse into the
/// transaction's undo log.
use crate::error::{Result, ZqError};
use crate::sql::ast::*;
use crate::sql::eval::eval_expr;
use crate::sql::exec::{resolve_subqueries, select, ExecCtx, ExecResult, NamedRow};
use crate::sql::parser::parse_expression;
use crate::storage::page_store::PageStore;
use crate::storage::table::Table;
use crate::storage::undo::UndoOp;
use crate::types::Value;

pub fn exec_insert<S: PageStore>(ctx: &mut ExecCtx<'_, S>, stmt: &Stmt) -> Result<ExecResult> {
    let Stmt::Insert {
        table,
        columns,
        source,
        on_conflict,
    } = stmt
    else {
        unreachable!("dispatched as INSERT");
    };
    let mut t = Table::load(ctx.store, ctx.catalog, table)?;

    // Materialize the source rows first.
    let source_rows: Vec<Vec<Value>> = match source {
        InsertSource::Values(rows) => {
            let mut out = Vec::with_capacity(rows.len());
            for row_exprs in rows {
                let mut row = Vec::with_capacity(row_exprs.len());
                for expr in row_exprs {
                    let expr = resolve_subqueries(ctx, expr)?;
                    let env = ctx.eval_env();
                    row.push(eval_expr(&expr, &|_, _| None, &env)?);
                }
                out.push(row);
            }
            out
        }
        InsertSource::Select(select_stmt) => select::run_select(ctx, select_stmt)?
            .into_iter()
            .map(|r| r.values.into_iter().map(|(_, v)| v).collect())
            .collect(),
    };

    // Map provided columns onto the table's declaration order.
    let provided: Vec<usize> = match columns {
        Some(names) => names
            .iter()
            .map(|name| {
                t.def.column_index(name).ok_or_else(|| {
                    ZqError::NotFound(format!("no such column: {}.{}", table, name))
                })
            })
            .collect::<Result<_>>()?,
        None => (0..t.def.columns.len()).collect(),
    };

    let mut affected = 0u64;
    for source_row in source_rows {
        if source_row.len() != provided.len() {
            return Err(ZqError::Type(format!(
                "{} values for {} columns",
                source_row.len(),
                provided.len()
            )));
        }
        let full_row = complete_row(ctx, &t, &provided, source_row)?;
        check_constraints(ctx, &t, &full_row)?;

        match t.insert_row(ctx.store, full_row.clone()) {
            Ok(rowid) => {
                ctx.store.log_undo(UndoOp::Insert {
                    table: table.clone(),
                    rowid,
                });
                ctx.conn.last_insert_rowid = rowid as i64;
                affected += 1;
            }
            Err(ZqError::Constraint(_)) if *on_conflict == Some(ConflictAction::Ignore) => {}
            Err(ZqError::Constraint(_)) if *on_conflict == Some(ConflictAction::Replace) => {
                for victim in conflicting_rowids(ctx, &mut t, &full_row)? {
                    let old = t.delete_row(ctx.store, victim)?;
                    ctx.store.log_undo(UndoOp::Delete {
                        table: table.clone(),
                        rowid: victim,
                        row: old,
                    });
                }
                let rowid = t.insert_row(ctx.store, full_row)?;
                ctx.store.log_undo(UndoOp::Insert {
                    table: table.clone(),
                    rowid,
                });
                ctx.conn.last_insert_rowid = rowid as i64;
                affected += 1;
            }
            Err(e) => return Err(e),
        }
    }

    t.persist_counters(ctx.store, ctx.catalog)?;
    ctx.conn.changes = affected as i64;
    Ok(ExecResult::RowsAffected(affected))
}

/// Fill omitted columns with their DEFAULT expression (evaluated now, not
/// at schema time), or NULL.
fn complete_row<S: PageStore>(
    ctx: &mut ExecCtx<'_, S>,
    t: &Table,
    provided: &[usize],
    source_row: Vec<Value>,
) -> Result<Vec<Value>> {
    let mut full: Vec<Option<Value>> = vec![None; t.def.columns.len()];
    for (slot, value) in provided.iter().zip(source_row) {
        full[*slot] = Some(value);
    }
    let mut out = Vec::with_capacity(full.len());
    for (column, value) in t.def.columns.iter().zip(full) {
        match value {
            Some(v) => out.push(v),
            None => match &column.default_expr {
                Some(text) => {
                    let expr = parse_expression(text)?;
                    let env = ctx.eval_env();
                    out.push(eval_expr(&expr, &|_, _| None, &env)?);
                }
                None => out.push(Value::Null),
            },
        }
    }
    Ok(out)
}

/// Column CHECK constraints: a failing (false) check rejects the row;
/// NULL results pass.
fn check_constraints<S: PageStore>(
    ctx: &mut ExecCtx<'_, S>,
    t: &Table,
    row: &[Value],
) -> Result<()> {
    let named = NamedRow::from_table(&t.def.name, &t.def, row.to_vec());
    for column in &t.def.columns {
        let Some(text) = &column.check_expr else {
            continue;
        };
        let expr = parse_expression(text)?;
        let env = ctx.eval_env();
        let value = eval_expr(&expr, &named.resolver(), &env)?;
        if !value.is_null() && !value.is_truthy() {
            return Err(ZqError::Constraint(format!(
                "CHECK constraint failed: {}.{}",
                t.def.name, column.name
            )));
        }
    }
    Ok(())
}

/// Row-ids that would collide with the candidate row: the row-id itself
/// plus every unique-index match.
fn conflicting_rowids<S: PageStore>(
    ctx: &mut ExecCtx<'_, S>,
    t: &mut Table,
    row: &[Value],
) -> Result<Vec<u64>> {
    let mut victims = Vec::new();
    if let Some(alias) = t.def.rowid_alias() {
        if let Value::Integer(v) = &row[alias] {
            if *v > 0 && t.get_row(ctx.store, *v as u64)?.is_some() {
                victims.push(*v as u64);
            }
        }
    }
    for def in t.indexes.clone() {
        if !def.unique {
            continue;
        }
        let key = crate::index::key_from_row(&def, &t.def, row)?;
        if key.has_null() {
            continue;
        }
        let handle = crate::index::IndexHandle::new(def);
        for rowid in handle.lookup_exact(ctx.store, &key)? {
            if !victims.contains(&rowid) {
                victims.push(rowid);
            }
        }
    }
    Ok(victims)
}

pub fn exec_update<S: PageStore>(ctx: &mut ExecCtx<'_, S>, stmt: &Stmt) -> Result<ExecResult> {
    let Stmt::Update {
        table,
        sets,
        where_clause,
    } = stmt
    else {
        unreachable!("dispatched as UPDATE");
    };
    let mut t = Table::load(ctx.store, ctx.catalog, table)?;

    let sets: Vec<(usize, Expr)> = sets
        .iter()
        .map(|(name, expr)| {
            let idx = t.def.column_index(name).ok_or_else(|| {
                ZqError::NotFound(format!("no such column: {}.{}", table, name))
            })?;
            Ok((idx, resolve_subqueries(ctx, expr)?))
        })
        .collect::<Result<_>>()?;
    let predicate = where_clause
        .as_ref()
        .map(|e| resolve_subqueries(ctx, e))
        .transpose()?;

    let targets = collect_targets(ctx, &t, predicate.as_ref())?;
    let alias = t.def.rowid_alias();

    let mut affected = 0u64;
    for rowid in targets {
        let Some(old_row) = t.get_row(ctx.store, rowid)? else {
            continue;
        };
        let named = NamedRow::from_table(&t.def.name, &t.def, old_row.clone());
        let mut new_row = old_row.clone();
        for (idx, expr) in &sets {
            let env = ctx.eval_env();
            new_row[*idx] = eval_expr(expr, &named.resolver(), &env)?;
        }
        check_constraints(ctx, &t, &new_row)?;

        // Changing the INTEGER PRIMARY KEY moves the row to a new row-id.
        let rowid_changed = alias.is_some_and(|idx| {
            new_row[idx].compare(&old_row[idx]) != Some(std::cmp::Ordering::Equal)
        });
        if rowid_changed {
            let removed = t.delete_row(ctx.store, rowid)?;
            ctx.store.log_undo(UndoOp::Delete {
                table: table.clone(),
                rowid,
                row: removed,
            });
            let new_rowid = t.insert_row(ctx.store, new_row)?;
            ctx.store.log_undo(UndoOp::Insert {
                table: table.clone(),
                rowid: new_rowid,
            });
        } else {
            let old = t.update_row(ctx.store, rowid, new_row)?;
            ctx.store.log_undo(UndoOp::Update {
                table: table.clone(),
                rowid,
                old_row: old,
            });
        }
        affected += 1;
    }

    t.persist_counters(ctx.store, ctx.catalog)?;
    ctx.conn.changes = affected as i64;
    Ok(ExecResult::RowsAffected(affected))
}

pub fn exec_delete<S: PageStore>(ctx: &mut ExecCtx<'_, S>, stmt: &Stmt) -> Result<ExecResult> {
    let Stmt::Delete {
        table,
        where_clause,
    } = stmt
    else {
        unreachable!("dispatched as DELETE");
    };
    let mut t = Table::load(ctx.store, ctx.catalog, table)?;
    let predicate = where_clause
        .as_ref()
        .map(|e| resolve_subqueries(ctx, e))
        .transpose()?;

    let targets = collect_targets(ctx, &t, predicate.as_ref())?;
    let mut affected = 0u64;
    for rowid in targets {
        let row = t.delete_row(ctx.store, rowid)?;
        ctx.store.log_undo(UndoOp::Delete {
            table: table.clone(),
            rowid,
            row,
        });
        affected += 1;
    }

    t.persist_counters(ctx.store, ctx.catalog)?;
    ctx.conn.changes = affected as i64;
    Ok(ExecResult::RowsAffected(affected))
}

/// The row-ids a predicate selects, gathered before any mutation.
fn collect_targets<S: PageStore>(
    ctx: &mut ExecCtx<'_, S>,
    t: &Table,
    predicate: Option<&Expr>,
) -> Result<Vec<u64>> {
    let mut targets = Vec::new();
    let mut cursor = t.scan(ctx.store, None)?;
    while let Some((rowid, values)) = cursor.next(ctx.store)? {
        let keep = match predicate {
            Some(expr) => {
                let named = NamedRow::from_table(&t.def.name, &t.def, values);
                let env = ctx.eval_env();
                let resolver = named.resolver();
                eval_expr(expr, &resolver, &env)?.is_truthy()
            }
            None => true,
        };
        if keep {
            targets.push(rowid);
        }
    }
    Ok(targets)
}

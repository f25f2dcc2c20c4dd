/// Statement execution.
///
/// `execute_statement` dispatches one parsed statement against a page
/// store (the transaction overlay) and the catalog. SELECT plans through
/// the planner into physical operators; DML routes through the table
/// layer with undo logging; DDL materializes catalog changes.
pub mod aggregate;
pub mod ddl;
pub mod mutation;
pub mod operators;
pub mod select;

use std::cell::RefCell;
use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;

use crate::error::{Result, ZqError};
use crate::schema::catalog::{SystemCatalog, TableDef};
use crate::sql::ast::{Expr, Literal, Stmt};
use crate::sql::eval::EvalEnv;
use crate::storage::page_store::PageStore;
use crate::types::Value;

/// One result row: named values in projection order.
#[derive(Debug, Clone)]
pub struct Row {
    pub values: Vec<(String, Value)>,
}

impl Row {
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }
}

#[derive(Debug)]
pub enum ExecResult {
    Rows(Vec<Row>),
    RowsAffected(u64),
    Ok,
}

/// Per-connection executor state: the counters the row functions expose and
/// the connection's deterministic PRNG.
pub struct ConnState {
    pub last_insert_rowid: i64,
    pub changes: i64,
    pub rng: RefCell<StdRng>,
}

impl ConnState {
    pub fn new(rng: StdRng) -> Self {
        ConnState {
            last_insert_rowid: 0,
            changes: 0,
            rng: RefCell::new(rng),
        }
    }
}

/// Everything a statement needs while it runs.
pub struct ExecCtx<'a, S: PageStore> {
    pub store: &'a mut S,
    pub catalog: &'a SystemCatalog,
    pub positional: &'a [Option<Value>],
    pub named: &'a HashMap<String, Value>,
    /// Statement start time; all datetime builtins see this one instant.
    pub now: DateTime<Utc>,
    pub conn: &'a mut ConnState,
}

impl<'a, S: PageStore> ExecCtx<'a, S> {
    pub fn eval_env(&self) -> EvalEnv<'_> {
        EvalEnv {
            positional: self.positional,
            named: self.named,
            now: self.now,
            last_insert_rowid: self.conn.last_insert_rowid,
            changes: self.conn.changes,
            rng: &self.conn.rng,
        }
    }
}

/// A row flowing between operators: cells carry their table binding so
/// qualified references resolve across joins.
#[derive(Debug, Clone)]
pub struct NamedRow {
    pub cells: Vec<(Option<String>, String, Value)>,
}

impl NamedRow {
    pub fn empty() -> Self {
        NamedRow { cells: Vec::new() }
    }

    pub fn from_table(binding: &str, table: &TableDef, values: Vec<Value>) -> Self {
        let cells = table
            .columns
            .iter()
            .zip(values)
            .map(|(col, value)| (Some(binding.to_string()), col.name.clone(), value))
            .collect();
        NamedRow { cells }
    }

    /// All-NULL row matching a plan's output shape (outer-join padding).
    pub fn nulls(shape: &[(String, Vec<String>)]) -> Self {
        let mut cells = Vec::new();
        for (binding, columns) in shape {
            for col in columns {
                cells.push((Some(binding.clone()), col.clone(), Value::Null));
            }
        }
        NamedRow { cells }
    }

    pub fn concat(mut self, other: NamedRow) -> Self {
        self.cells.extend(other.cells);
        self
    }

    pub fn resolve(&self, table: Option<&str>, name: &str) -> Option<Value> {
        self.cells
            .iter()
            .find(|(binding, cell_name, _)| {
                cell_name == name
                    && match table {
                        Some(t) => binding.as_deref() == Some(t),
                        None => true,
                    }
            })
            .map(|(_, _, v)| v.clone())
    }

    pub fn resolver(&self) -> impl Fn(Option<&str>, &str) -> Option<Value> + '_ {
        move |table, name| self.resolve(table, name)
    }
}

/// Literal carrier for resolved subqueries and substituted aggregates.
pub fn value_to_expr(value: Value) -> Expr {
    match value {
        Value::Null => Expr::Literal(Literal::Null),
        Value::Integer(v) => Expr::Literal(Literal::Integer(v)),
        Value::Real(v) => Expr::Literal(Literal::Real(v)),
        Value::Text(s) => Expr::Literal(Literal::String(s)),
        Value::Blob(b) => Expr::Literal(Literal::Blob(b)),
        Value::Boolean(b) => Expr::Literal(Literal::Integer(b as i64)),
        Value::Json(j) => Expr::Literal(Literal::String(j.to_string())),
    }
}

/// Replace uncorrelated subqueries with their results: a scalar subquery
/// becomes its first row's first column (NULL when empty); `IN (SELECT …)`
/// becomes an IN list. Correlated references surface as NotFound when the
/// inner query runs.
pub fn resolve_subqueries<S: PageStore>(
    ctx: &mut ExecCtx<'_, S>,
    expr: &Expr,
) -> Result<Expr> {
    Ok(match expr {
        Expr::Subquery(select) => {
            let rows = select::run_select(ctx, select)?;
            let value = rows
                .first()
                .and_then(|r| r.values.first().map(|(_, v)| v.clone()))
                .unwrap_or(Value::Null);
            value_to_expr(value)
        }
        Expr::InSelect {
            expr,
            select,
            negated,
        } => {
            let inner = resolve_subqueries(ctx, expr)?;
            let rows = select::run_select(ctx, select)?;
            let list = rows
                .into_iter()
                .filter_map(|r| r.values.into_iter().next().map(|(_, v)| value_to_expr(v)))
                .collect();
            Expr::InList {
                expr: Box::new(inner),
                list,
                negated: *negated,
            }
        }
        Expr::Unary { op, expr } => Expr::Unary {
            op: *op,
            expr: Box::new(resolve_subqueries(ctx, expr)?),
        },
        Expr::Binary { left, op, right } => Expr::Binary {
            left: Box::new(resolve_subqueries(ctx, left)?),
            op: *op,
            right: Box::new(resolve_subqueries(ctx, right)?),
        },
        Expr::Function {
            name,
            args,
            distinct,
            star,
        } => Expr::Function {
            name: name.clone(),
            args: args
                .iter()
                .map(|a| resolve_subqueries(ctx, a))
                .collect::<Result<_>>()?,
            distinct: *distinct,
            star: *star,
        },
        Expr::Case {
            operand,
            branches,
            else_expr,
        } => Expr::Case {
            operand: operand
                .as_ref()
                .map(|e| resolve_subqueries(ctx, e).map(Box::new))
                .transpose()?,
            branches: branches
                .iter()
                .map(|(w, t)| Ok((resolve_subqueries(ctx, w)?, resolve_subqueries(ctx, t)?)))
                .collect::<Result<_>>()?,
            else_expr: else_expr
                .as_ref()
                .map(|e| resolve_subqueries(ctx, e).map(Box::new))
                .transpose()?,
        },
        Expr::InList {
            expr,
            list,
            negated,
        } => Expr::InList {
            expr: Box::new(resolve_subqueries(ctx, expr)?),
            list: list
                .iter()
                .map(|e| resolve_subqueries(ctx, e))
                .collect::<Result<_>>()?,
            negated: *negated,
        },
        Expr::Between {
            expr,
            low,
            high,
            negated,
        } => Expr::Between {
            expr: Box::new(resolve_subqueries(ctx, expr)?),
            low: Box::new(resolve_subqueries(ctx, low)?),
            high: Box::new(resolve_subqueries(ctx, high)?),
            negated: *negated,
        },
        Expr::Like {
            expr,
            pattern,
            negated,
        } => Expr::Like {
            expr: Box::new(resolve_subqueries(ctx, expr)?),
            pattern: Box::new(resolve_subqueries(ctx, pattern)?),
            negated: *negated,
        },
        Expr::IsNull { expr, negated } => Expr::IsNull {
            expr: Box::new(resolve_subqueries(ctx, expr)?),
            negated: *negated,
        },
        Expr::Collate { expr, collation } => Expr::Collate {
            expr: Box::new(resolve_subqueries(ctx, expr)?),
            collation: collation.clone(),
        },
        Expr::Cast { expr, type_name } => Expr::Cast {
            expr: Box::new(resolve_subqueries(ctx, expr)?),
            type_name: type_name.clone(),
        },
        Expr::Literal(_) | Expr::Column { .. } | Expr::Param(_) => expr.clone(),
    })
}

/// Execute one statement. Transaction control statements are handled by the
/// session and must not reach this dispatcher.
pub fn execute_statement<S: PageStore>(
    ctx: &mut ExecCtx<'_, S>,
    stmt: &Stmt,
) -> Result<ExecResult> {
    match stmt {
        Stmt::Select(select) => {
            let rows = select::run_select(ctx, select)?;
            Ok(ExecResult::Rows(rows))
        }
        Stmt::Insert { .. } => mutation::exec_insert(ctx, stmt),
        Stmt::Update { .. } => mutation::exec_update(ctx, stmt),
        Stmt::Delete { .. } => mutation::exec_delete(ctx, stmt),
        Stmt::CreateTable { .. }
        | Stmt::CreateIndex { .. }
        | Stmt::DropTable { .. }
        | Stmt::DropIndex { .. } => ddl::exec_ddl(ctx, stmt),
        Stmt::Pragma { name, value } => ddl::exec_pragma(ctx, name, value.as_ref()),
        Stmt::Begin(_) | Stmt::Commit | Stmt::Rollback { .. } | Stmt::Savepoint(_) => Err(
            ZqError::Misuse("transaction control must be handled by the session".into()),
        ),
    }
}

/// Prepared statements: compile once, bind, execute many.
///
/// A statement owns its parsed form and parameter slots. Positional slots
/// are 1-based; named parameters (`:n`, `@n`, `$n`) share one namespace.
/// `step` executes on first call and then drains the buffered result rows;
/// `reset` clears execution state but keeps bindings; `finalize` releases
/// the statement. Out-of-order calls surface `Misuse`, bad slot indexes
/// `Range`. A statement is reusable across transactions on one connection,
/// not across threads.
use std::collections::HashMap;

use crate::error::{Result, ZqError};
use crate::sql::ast::{Expr, ParamRef, Stmt};
use crate::sql::exec::{ExecResult, Row};
use crate::sql::parser::parse_statement;
use crate::sql::planner::walk;
use crate::sql::session::Session;
use crate::types::Value;

enum StmtState {
    Ready,
    Rows(std::collections::VecDeque<Row>),
    Done,
    Finalized,
}

pub struct Statement {
    stmt: Stmt,
    sql: String,
    /// 1-based positional slots; index 0 is unused.
    positional: Vec<Option<Value>>,
    named: HashMap<String, Value>,
    state: StmtState,
    /// Rows affected by the last execution (for mutating statements).
    changes: u64,
}

impl Statement {
    pub fn prepare(sql: &str) -> Result<Statement> {
        let stmt = parse_statement(sql)?;
        let slots = max_positional_param(&stmt);
        Ok(Statement {
            stmt,
            sql: sql.to_string(),
            positional: vec![None; slots as usize + 1],
            named: HashMap::new(),
            state: StmtState::Ready,
            changes: 0,
        })
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn parameter_count(&self) -> usize {
        self.positional.len().saturating_sub(1)
    }

    /// Bind a value to a 1-based positional slot.
    pub fn bind(&mut self, slot: usize, value: Value) -> Result<()> {
        if matches!(self.state, StmtState::Finalized) {
            return Err(ZqError::Misuse("bind after finalize".into()));
        }
        if matches!(self.state, StmtState::Rows(_)) {
            return Err(ZqError::Misuse("bind while rows are pending; reset first".into()));
        }
        if slot == 0 || slot >= self.positional.len() {
            return Err(ZqError::Range(format!(
                "parameter index {} out of range 1..={}",
                slot,
                self.parameter_count()
            )));
        }
        self.positional[slot] = Some(value);
        Ok(())
    }

    /// Bind a named parameter (without its sigil).
    pub fn bind_named(&mut self, name: &str, value: Value) -> Result<()> {
        if matches!(self.state, StmtState::Finalized) {
            return Err(ZqError::Misuse("bind after finalize".into()));
        }
        self.named.insert(name.to_string(), value);
        Ok(())
    }

    /// Execute on first call, then yield buffered rows one at a time.
    /// Returns None when the statement is done.
    pub fn step(&mut self, session: &mut Session) -> Result<Option<Row>> {
        match &mut self.state {
            StmtState::Finalized => Err(ZqError::Misuse("step after finalize".into())),
            StmtState::Done => Ok(None),
            StmtState::Rows(rows) => {
                let next = rows.pop_front();
                if next.is_none() {
                    self.state = StmtState::Done;
                }
                Ok(next)
            }
            StmtState::Ready => {
                let result =
                    session.execute_stmt(&self.stmt, &self.positional, &self.named)?;
                match result {
                    ExecResult::Rows(rows) => {
                        let mut queue: std::collections::VecDeque<Row> = rows.into();
                        let first = queue.pop_front();
                        self.state = if first.is_some() {
                            StmtState::Rows(queue)
                        } else {
                            StmtState::Done
                        };
                        Ok(first)
                    }
                    ExecResult::RowsAffected(n) => {
                        self.changes = n;
                        self.state = StmtState::Done;
                        Ok(None)
                    }
                    ExecResult::Ok => {
                        self.state = StmtState::Done;
                        Ok(None)
                    }
                }
            }
        }
    }

    /// Run to completion, collecting every row.
    pub fn query(&mut self, session: &mut Session) -> Result<Vec<Row>> {
        let mut rows = Vec::new();
        while let Some(row) = self.step(session)? {
            rows.push(row);
        }
        Ok(rows)
    }

    /// Clear execution state; bindings survive.
    pub fn reset(&mut self) -> Result<()> {
        if matches!(self.state, StmtState::Finalized) {
            return Err(ZqError::Misuse("reset after finalize".into()));
        }
        self.state = StmtState::Ready;
        Ok(())
    }

    /// Release the statement. Further calls are Misuse.
    pub fn finalize(&mut self) {
        self.state = StmtState::Finalized;
        self.positional.clear();
        self.positional.push(None);
        self.named.clear();
    }

    pub fn last_changes(&self) -> u64 {
        self.changes
    }
}

/// Highest positional parameter index referenced anywhere in a statement.
fn max_positional_param(stmt: &Stmt) -> u32 {
    let mut max = 0u32;
    let mut check = |expr: &Expr| {
        walk(expr, &mut |e| {
            if let Expr::Param(ParamRef::Positional(n)) = e {
                max = max.max(*n);
            }
        });
    };
    visit_statement_exprs(stmt, &mut check);
    max
}

/// Apply a visitor to every expression position in a statement.
fn visit_statement_exprs(stmt: &Stmt, visit: &mut impl FnMut(&Expr)) {
    use crate::sql::ast::{InsertSource, Select, SelectColumn};
    fn visit_select(select: &Select, visit: &mut impl FnMut(&Expr)) {
        for column in &select.columns {
            if let SelectColumn::Expr { expr, .. } = column {
                visit(expr);
            }
        }
        if let Some(from) = &select.from {
            for join in &from.joins {
                if let Some(on) = &join.on {
                    visit(on);
                }
            }
        }
        if let Some(w) = &select.where_clause {
            visit(w);
        }
        for g in &select.group_by {
            visit(g);
        }
        if let Some(h) = &select.having {
            visit(h);
        }
        for item in &select.order_by {
            visit(&item.expr);
        }
        if let Some(l) = &select.limit {
            visit(l);
        }
        if let Some(o) = &select.offset {
            visit(o);
        }
    }
    match stmt {
        Stmt::Select(select) => visit_select(select, visit),
        Stmt::Insert { source, .. } => match source {
            InsertSource::Values(rows) => {
                for row in rows {
                    for expr in row {
                        visit(expr);
                    }
                }
            }
            InsertSource::Select(select) => visit_select(select, visit),
        },
        Stmt::Update {
            sets,
            where_clause,
            ..
        } => {
            for (_, expr) in sets {
                visit(expr);
            }
            if let Some(w) = where_clause {
                visit(w);
            }
        }
        Stmt::Delete { where_clause, .. } => {
            if let Some(w) = where_clause {
                visit(w);
            }
        }
        Stmt::Pragma { value, .. } => {
            if let Some(v) = value {
                visit(v);
            }
        }
        Stmt::CreateTable { columns, .. } => {
            for spec in columns {
                if let Some(d) = &spec.default {
                    visit(d);
                }
                if let Some(c) = &spec.check {
                    visit(c);
                }
            }
        }
        Stmt::CreateIndex { .. }
        | Stmt::DropTable { .. }
        | Stmt::DropIndex { .. }
        | Stmt::Begin(_)
        | Stmt::Commit
        | Stmt::Rollback { .. }
        | Stmt::Savepoint(_) => {}
    }
}

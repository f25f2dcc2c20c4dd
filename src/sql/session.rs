/// Per-connection session: statement dispatch, transaction state, undo
/// application, checkpoint policy.
///
/// - `BEGIN DEFERRED` captures a read snapshot and upgrades to a writer on
///   the first mutating statement (stale snapshot at upgrade -> Busy).
/// - `BEGIN IMMEDIATE` takes the writer lock up front.
/// - Without `BEGIN`, each statement runs in auto-commit mode: reads
///   against a fresh snapshot, writes wrapped in an implicit transaction.
/// - Statement failure inside a transaction replays the undo log back to
///   the statement mark and leaves the transaction alive; `Corrupt`/`Io`
///   poison the connection read-only until reopened.
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::concurrency::{LockManager, WriteGuard};
use crate::error::{Result, ZqError};
use crate::schema::catalog::SystemCatalog;
use crate::sql::ast::{Stmt, TxMode};
use crate::sql::exec::{execute_statement, ConnState, ExecCtx, ExecResult, Row};
use crate::sql::parser::parse_statement;
use crate::storage::pager::Pager;
use crate::tx::page_store::{ReadStore, TxPageStore};
use crate::tx::transaction::Transaction;
use crate::types::Value;

const CHECKPOINT_MAX_ATTEMPTS: usize = 2;
const DEFAULT_CHECKPOINT_WAL_BYTES: u64 = 1024 * 1024;

/// State shared by every connection of one database handle.
pub struct DbShared {
    pub pager: Mutex<Pager>,
    pub locks: LockManager,
    /// Live read snapshots; checkpoints defer while any exist.
    pub active_snapshots: AtomicUsize,
}

fn parse_env_u64(name: &str, default: u64) -> u64 {
    let Ok(raw) = std::env::var(name) else {
        return default;
    };
    match raw.parse::<u64>() {
        Ok(v) => v,
        Err(_) => {
            log::warn!("{} must be an integer, using default {}", name, default);
            default
        }
    }
}

/// Database operation statistics for observability.
#[derive(Debug, Clone, Default)]
pub struct DatabaseStats {
    pub total_checkpoints: u64,
    pub failed_checkpoints: u64,
    pub deferred_checkpoints: u64,
    pub last_failure_error: Option<String>,
}

enum TxSlot {
    None,
    /// Deferred transaction before its first write.
    Read {
        snapshot: crate::storage::pager::Snapshot,
    },
    Write {
        tx: Transaction,
        guard: WriteGuard,
    },
}

pub struct Session {
    shared: Arc<DbShared>,
    conn: ConnState,
    slot: TxSlot,
    /// Set after a fatal error: the connection refuses writes until reopen.
    read_only: Option<String>,
    /// Set after a failed DDL statement inside an explicit transaction,
    /// whose side effects the row-level undo log cannot cover.
    tx_failed: bool,
    checkpoint_wal_bytes: u64,
    stats: DatabaseStats,
}

impl Session {
    pub fn new(shared: Arc<DbShared>, conn: ConnState) -> Self {
        let stats = DatabaseStats::default();
        if let Some(report) = shared.pager.lock().freelist_sanitize_report() {
            log::warn!(
                "freelist sanitized on open: out_of_range={} duplicates={}",
                report.out_of_range.len(),
                report.duplicates.len()
            );
        }
        Session {
            shared,
            conn,
            slot: TxSlot::None,
            read_only: None,
            tx_failed: false,
            checkpoint_wal_bytes: parse_env_u64(
                "ZQLITE_CHECKPOINT_WAL_BYTES",
                DEFAULT_CHECKPOINT_WAL_BYTES,
            ),
            stats,
        }
    }

    pub fn conn_state(&self) -> &ConnState {
        &self.conn
    }

    pub fn database_stats(&self) -> &DatabaseStats {
        &self.stats
    }

    pub fn in_transaction(&self) -> bool {
        !matches!(self.slot, TxSlot::None)
    }

    /// Execute a SQL string (one statement).
    pub fn execute(&mut self, sql: &str) -> Result<ExecResult> {
        let stmt = parse_statement(sql)?;
        self.execute_stmt(&stmt, &[None], &HashMap::new())
    }

    /// Execute a read-only query and return its rows.
    pub fn query(&mut self, sql: &str) -> Result<Vec<Row>> {
        match self.execute(sql)? {
            ExecResult::Rows(rows) => Ok(rows),
            _ => Ok(Vec::new()),
        }
    }

    /// Execute a parsed statement with bound parameters (the prepared
    /// statement path; plain `execute` passes empty bindings).
    pub fn execute_stmt(
        &mut self,
        stmt: &Stmt,
        positional: &[Option<Value>],
        named: &HashMap<String, Value>,
    ) -> Result<ExecResult> {
        match stmt {
            Stmt::Begin(mode) => return self.handle_begin(*mode),
            Stmt::Commit => return self.handle_commit(),
            Stmt::Rollback { to_savepoint: None } => return self.handle_rollback(),
            Stmt::Rollback {
                to_savepoint: Some(name),
            } => return self.rollback_to_savepoint(name, positional, named),
            Stmt::Savepoint(name) => return self.handle_savepoint(name),
            Stmt::Pragma { name, value: _ } if name.eq_ignore_ascii_case("wal_checkpoint") => {
                return self.checkpoint_now()
            }
            Stmt::Pragma { name, value: _ } if name.eq_ignore_ascii_case("busy_timeout") => {
                return Ok(ExecResult::Rows(vec![Row {
                    values: vec![(
                        "busy_timeout".into(),
                        Value::Integer(self.shared.locks.busy_timeout().as_millis() as i64),
                    )],
                }]))
            }
            _ => {}
        }

        let writes = !is_read_only(stmt);
        if writes {
            if let Some(reason) = &self.read_only {
                return Err(ZqError::Misuse(format!(
                    "connection is read-only after a fatal error: {}",
                    reason
                )));
            }
            if self.tx_failed {
                return Err(ZqError::Misuse(
                    "transaction must be rolled back after a failed schema change".into(),
                ));
            }
        }

        enum Path {
            WriteTx,
            SlotSnapshot,
            Upgrade,
            FreshSnapshot,
            Autocommit,
        }
        let path = match (&self.slot, writes) {
            (TxSlot::Write { .. }, _) => Path::WriteTx,
            (TxSlot::Read { .. }, false) => Path::SlotSnapshot,
            (TxSlot::Read { .. }, true) => Path::Upgrade,
            (TxSlot::None, false) => Path::FreshSnapshot,
            (TxSlot::None, true) => Path::Autocommit,
        };
        match path {
            Path::WriteTx => self.run_in_write_tx(stmt, positional, named),
            Path::SlotSnapshot => self.run_on_slot_snapshot(stmt, positional, named),
            Path::Upgrade => {
                self.upgrade_to_writer()?;
                self.run_in_write_tx(stmt, positional, named)
            }
            Path::FreshSnapshot => self.run_on_fresh_snapshot(stmt, positional, named),
            Path::Autocommit => self.run_autocommit(stmt, positional, named),
        }
    }

    // --- Transaction control ---

    fn handle_begin(&mut self, mode: TxMode) -> Result<ExecResult> {
        if !matches!(self.slot, TxSlot::None) {
            return Err(ZqError::Misuse("transaction already active".into()));
        }
        match mode {
            TxMode::Immediate => {
                if let Some(reason) = &self.read_only {
                    return Err(ZqError::Misuse(format!(
                        "connection is read-only after a fatal error: {}",
                        reason
                    )));
                }
                let guard = self.shared.locks.write_lock()?;
                let tx = Transaction::begin(self.shared.pager.lock().meta());
                self.slot = TxSlot::Write { tx, guard };
            }
            TxMode::Deferred => {
                // Register before capturing: a checkpoint that observes a
                // zero count must not be able to truncate frames this
                // snapshot is about to reference.
                self.shared.active_snapshots.fetch_add(1, Ordering::SeqCst);
                let snapshot = self.shared.pager.lock().snapshot();
                self.slot = TxSlot::Read { snapshot };
            }
        }
        Ok(ExecResult::Ok)
    }

    /// Deferred transaction reaches its first write: take the writer lock
    /// and verify the snapshot is still the latest committed state.
    fn upgrade_to_writer(&mut self) -> Result<()> {
        let TxSlot::Read { snapshot } = &self.slot else {
            return Err(ZqError::Misuse("not in a deferred transaction".into()));
        };
        let guard = self.shared.locks.write_lock()?;
        let pager = self.shared.pager.lock();
        if pager.wal_committed_len() != snapshot.committed_len() {
            return Err(ZqError::Busy(
                "snapshot is stale: another writer committed since BEGIN".into(),
            ));
        }
        let tx = Transaction::begin(pager.meta());
        drop(pager);
        self.shared.active_snapshots.fetch_sub(1, Ordering::SeqCst);
        self.slot = TxSlot::Write { tx, guard };
        Ok(())
    }

    fn handle_commit(&mut self) -> Result<ExecResult> {
        match std::mem::replace(&mut self.slot, TxSlot::None) {
            TxSlot::None => Err(ZqError::Misuse("no active transaction".into())),
            TxSlot::Read { .. } => {
                self.shared.active_snapshots.fetch_sub(1, Ordering::SeqCst);
                self.tx_failed = false;
                Ok(ExecResult::Ok)
            }
            TxSlot::Write { mut tx, guard } => {
                if self.tx_failed {
                    // A failed DDL statement left partial state: refuse to
                    // publish it.
                    let mut pager = self.shared.pager.lock();
                    tx.rollback(&mut pager);
                    drop(pager);
                    drop(guard);
                    self.tx_failed = false;
                    return Err(ZqError::Misuse(
                        "transaction rolled back after a failed schema change".into(),
                    ));
                }
                let mut pager = self.shared.pager.lock();
                match tx.commit(&mut pager) {
                    Ok(()) => {
                        Self::post_commit_checkpoint(
                            &mut self.stats,
                            self.checkpoint_wal_bytes,
                            &self.shared,
                            &mut pager,
                        );
                        Ok(ExecResult::Ok)
                    }
                    Err(e) => {
                        if e.is_fatal() {
                            self.read_only = Some(e.to_string());
                        }
                        tx.rollback(&mut pager);
                        Err(e)
                    }
                }
            }
        }
    }

    fn handle_rollback(&mut self) -> Result<ExecResult> {
        match std::mem::replace(&mut self.slot, TxSlot::None) {
            TxSlot::None => Err(ZqError::Misuse("no active transaction".into())),
            TxSlot::Read { .. } => {
                self.shared.active_snapshots.fetch_sub(1, Ordering::SeqCst);
                self.tx_failed = false;
                Ok(ExecResult::Ok)
            }
            TxSlot::Write { mut tx, guard } => {
                let mut pager = self.shared.pager.lock();
                tx.rollback(&mut pager);
                drop(pager);
                drop(guard);
                self.tx_failed = false;
                Ok(ExecResult::Ok)
            }
        }
    }

    fn handle_savepoint(&mut self, name: &str) -> Result<ExecResult> {
        match &mut self.slot {
            TxSlot::Write { tx, .. } => {
                tx.create_savepoint(name);
                Ok(ExecResult::Ok)
            }
            _ => Err(ZqError::Misuse(
                "SAVEPOINT requires an active write transaction".into(),
            )),
        }
    }

    fn rollback_to_savepoint(
        &mut self,
        name: &str,
        positional: &[Option<Value>],
        named: &HashMap<String, Value>,
    ) -> Result<ExecResult> {
        let _ = (positional, named);
        if !matches!(self.slot, TxSlot::Write { .. }) {
            return Err(ZqError::Misuse(
                "ROLLBACK TO requires an active write transaction".into(),
            ));
        }
        let (mut tx, guard) = match std::mem::replace(&mut self.slot, TxSlot::None) {
            TxSlot::Write { tx, guard } => (tx, guard),
            _ => unreachable!("checked above"),
        };
        let mark = match tx.savepoint_mark(name) {
            Ok(mark) => mark,
            Err(e) => {
                self.slot = TxSlot::Write { tx, guard };
                return Err(e);
            }
        };
        let ops = tx.drain_undo_to(mark);
        tx.truncate_savepoints(mark);

        let mut pager = self.shared.pager.lock();
        let mut store = TxPageStore::new(tx, &mut pager);
        let catalog = SystemCatalog::new();
        let result = crate::tx::apply_undo(&mut store, &catalog, ops);
        let tx_back = store.into_tx();
        drop(pager);
        self.slot = TxSlot::Write { tx: tx_back, guard };

        match result {
            Ok(()) => Ok(ExecResult::Ok),
            Err(e) => {
                self.read_only = Some(format!("savepoint rollback failed: {}", e));
                Err(e)
            }
        }
    }

    // --- Statement execution paths ---

    fn run_on_fresh_snapshot(
        &mut self,
        stmt: &Stmt,
        positional: &[Option<Value>],
        named: &HashMap<String, Value>,
    ) -> Result<ExecResult> {
        // Register before capturing (checkpoint exclusion), then release
        // whatever the statement outcome.
        self.shared.active_snapshots.fetch_add(1, Ordering::SeqCst);
        let snapshot = self.shared.pager.lock().snapshot();
        let result = self.run_on_snapshot(&snapshot, stmt, positional, named);
        self.shared.active_snapshots.fetch_sub(1, Ordering::SeqCst);
        result
    }

    fn run_on_slot_snapshot(
        &mut self,
        stmt: &Stmt,
        positional: &[Option<Value>],
        named: &HashMap<String, Value>,
    ) -> Result<ExecResult> {
        let TxSlot::Read { snapshot } = &self.slot else {
            unreachable!("caller checked the slot");
        };
        let snapshot = snapshot.clone();
        self.run_on_snapshot(&snapshot, stmt, positional, named)
    }

    fn run_on_snapshot(
        &mut self,
        snapshot: &crate::storage::pager::Snapshot,
        stmt: &Stmt,
        positional: &[Option<Value>],
        named: &HashMap<String, Value>,
    ) -> Result<ExecResult> {
        let mut pager = self.shared.pager.lock();
        let mut store = ReadStore::new(&mut pager, snapshot.clone());
        let catalog = SystemCatalog::new();
        let mut ctx = ExecCtx {
            store: &mut store,
            catalog: &catalog,
            positional,
            named,
            now: chrono::Utc::now(),
            conn: &mut self.conn,
        };
        execute_statement(&mut ctx, stmt)
    }

    fn run_autocommit(
        &mut self,
        stmt: &Stmt,
        positional: &[Option<Value>],
        named: &HashMap<String, Value>,
    ) -> Result<ExecResult> {
        let guard = self.shared.locks.write_lock()?;
        let mut pager = self.shared.pager.lock();
        let tx = Transaction::begin(pager.meta());
        let mut store = TxPageStore::new(tx, &mut pager);
        let catalog = SystemCatalog::new();
        let mut ctx = ExecCtx {
            store: &mut store,
            catalog: &catalog,
            positional,
            named,
            now: chrono::Utc::now(),
            conn: &mut self.conn,
        };
        let result = execute_statement(&mut ctx, stmt);
        let mut tx = store.into_tx();

        match result {
            Ok(exec_result) => match tx.commit(&mut pager) {
                Ok(()) => {
                    Self::post_commit_checkpoint(
                        &mut self.stats,
                        self.checkpoint_wal_bytes,
                        &self.shared,
                        &mut pager,
                    );
                    drop(pager);
                    drop(guard);
                    Ok(exec_result)
                }
                Err(e) => {
                    if e.is_fatal() {
                        self.read_only = Some(e.to_string());
                    }
                    tx.rollback(&mut pager);
                    Err(e)
                }
            },
            Err(e) => {
                if e.is_fatal() {
                    self.read_only = Some(e.to_string());
                }
                tx.rollback(&mut pager);
                Err(e)
            }
        }
    }

    fn run_in_write_tx(
        &mut self,
        stmt: &Stmt,
        positional: &[Option<Value>],
        named: &HashMap<String, Value>,
    ) -> Result<ExecResult> {
        let (tx, guard) = match std::mem::replace(&mut self.slot, TxSlot::None) {
            TxSlot::Write { tx, guard } => (tx, guard),
            _ => unreachable!("caller checked the slot"),
        };
        let mark = tx.undo_mark();

        let mut pager = self.shared.pager.lock();
        let mut store = TxPageStore::new(tx, &mut pager);
        let catalog = SystemCatalog::new();
        let mut ctx = ExecCtx {
            store: &mut store,
            catalog: &catalog,
            positional,
            named,
            now: chrono::Utc::now(),
            conn: &mut self.conn,
        };
        let result = execute_statement(&mut ctx, stmt);

        let result = match result {
            Ok(ok) => Ok(ok),
            Err(e) if e.is_fatal() => {
                self.read_only = Some(e.to_string());
                let mut tx = store.into_tx();
                tx.rollback(&mut pager);
                drop(pager);
                drop(guard);
                return Err(e);
            }
            Err(e) => {
                // Statement-level rollback: replay the undo log to the mark.
                let ops = store.tx_mut().drain_undo_to(mark);
                if let Err(undo_err) = crate::tx::apply_undo(&mut store, &catalog, ops) {
                    self.read_only = Some(format!("undo replay failed: {}", undo_err));
                    let mut tx = store.into_tx();
                    tx.rollback(&mut pager);
                    drop(pager);
                    drop(guard);
                    return Err(undo_err);
                }
                if is_ddl(stmt) {
                    // Catalog-level side effects are not in the undo log.
                    self.tx_failed = true;
                }
                Err(e)
            }
        };

        let tx = store.into_tx();
        drop(pager);
        self.slot = TxSlot::Write { tx, guard };
        result
    }

    // --- Checkpointing ---

    /// After a commit, transfer the WAL into the main file when it has
    /// outgrown the threshold and no reader snapshot is live. Takes its
    /// pieces of session state directly so it can run while the pager
    /// guard is held.
    fn post_commit_checkpoint(
        stats: &mut DatabaseStats,
        threshold: u64,
        shared: &DbShared,
        pager: &mut Pager,
    ) {
        let size = pager.wal_size_bytes().unwrap_or(0);
        if size < threshold {
            return;
        }
        if shared.active_snapshots.load(Ordering::SeqCst) > 0 {
            stats.deferred_checkpoints += 1;
            return;
        }
        stats.total_checkpoints += 1;
        if let Err((attempts, e)) = checkpoint_with_retry(pager) {
            stats.failed_checkpoints += 1;
            stats.last_failure_error = Some(e.to_string());
            log::warn!(
                "checkpoint failed after {} attempt(s): {} (wal {} bytes)",
                attempts,
                e,
                size
            );
        }
    }

    /// PRAGMA wal_checkpoint: explicit request, serialized with writers.
    fn checkpoint_now(&mut self) -> Result<ExecResult> {
        if self.in_transaction() {
            return Err(ZqError::Misuse(
                "cannot checkpoint inside a transaction".into(),
            ));
        }
        let _guard = self.shared.locks.write_lock()?;
        if self.shared.active_snapshots.load(Ordering::SeqCst) > 0 {
            return Err(ZqError::Busy(
                "checkpoint deferred: read snapshots are active".into(),
            ));
        }
        let mut pager = self.shared.pager.lock();
        self.stats.total_checkpoints += 1;
        match checkpoint_with_retry(&mut pager) {
            Ok(_) => Ok(ExecResult::Ok),
            Err((attempts, e)) => {
                self.stats.failed_checkpoints += 1;
                self.stats.last_failure_error = Some(e.to_string());
                log::warn!("checkpoint failed after {} attempt(s): {}", attempts, e);
                Err(e)
            }
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        // An open transaction dies with the connection: discard, release.
        match std::mem::replace(&mut self.slot, TxSlot::None) {
            TxSlot::Read { .. } => {
                self.shared.active_snapshots.fetch_sub(1, Ordering::SeqCst);
            }
            TxSlot::Write { mut tx, guard } => {
                let mut pager = self.shared.pager.lock();
                tx.rollback(&mut pager);
                drop(pager);
                drop(guard);
            }
            TxSlot::None => {}
        }
    }
}

fn checkpoint_with_retry(pager: &mut Pager) -> std::result::Result<usize, (usize, ZqError)> {
    let mut last_err = None;
    for attempt in 1..=CHECKPOINT_MAX_ATTEMPTS {
        if attempt > 1 {
            std::thread::sleep(std::time::Duration::from_millis(1));
        }
        match pager.checkpoint() {
            Ok(()) => return Ok(attempt),
            Err(e) => last_err = Some(e),
        }
    }
    Err((
        CHECKPOINT_MAX_ATTEMPTS,
        last_err.unwrap_or_else(|| {
            ZqError::Io(std::io::Error::other(
                "checkpoint failed without error detail",
            ))
        }),
    ))
}

fn is_read_only(stmt: &Stmt) -> bool {
    matches!(stmt, Stmt::Select(_) | Stmt::Pragma { .. })
}

fn is_ddl(stmt: &Stmt) -> bool {
    matches!(
        stmt,
        Stmt::CreateTable { .. }
            | Stmt::CreateIndex { .. }
            | Stmt::DropTable { .. }
            | Stmt::DropIndex { .. }
    )
}

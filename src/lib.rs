//! ZQLite: embedded relational database.
//!
//! A single-process library executing SQL against a persistent,
//! single-file store:
//! - paged storage with checksums, LRU cache and free-page management
//! - write-ahead log with commit frames, crash recovery and checkpointing
//! - B-tree tables and B-tree / hash / unique / composite indexes
//! - snapshot-isolation reads with serialized writers
//! - prepared statements with positional and named parameters

pub mod btree;
pub mod capi;
pub mod concurrency;
pub mod error;
pub mod index;
pub mod schema;
pub mod sql;
pub mod storage;
pub mod tx;
pub mod types;
pub mod wal;

use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicUsize;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::concurrency::{LockManager, DEFAULT_BUSY_TIMEOUT_MS};
use crate::sql::exec::ConnState;
use crate::sql::session::{DbShared, Session};
use crate::storage::codec::{PageCodec, PlainCodec};
use crate::storage::page::PAGE_SIZE;
use crate::storage::pager::{Pager, DEFAULT_CACHE_PAGES};

pub use crate::error::{ErrorCode, Result, ZqError};
pub use crate::sql::exec::{ExecResult, Row};
pub use crate::sql::stmt::Statement;
pub use crate::types::Value;

/// Open-time settings. The defaults come from the environment:
/// `ZQLITE_BUSY_TIMEOUT_MS` and `ZQLITE_CACHE_PAGES`.
#[derive(Debug, Clone)]
pub struct DbOptions {
    pub busy_timeout: Duration,
    pub cache_pages: usize,
}

impl Default for DbOptions {
    fn default() -> Self {
        DbOptions {
            busy_timeout: busy_timeout_from_env(),
            cache_pages: cache_pages_from_env(),
        }
    }
}

/// Shared handle over one database file. Connections derived from the same
/// handle share the page cache, the WAL, and the locking state.
pub struct Database {
    shared: Arc<DbShared>,
    path: PathBuf,
}

fn busy_timeout_from_env() -> Duration {
    let ms = std::env::var("ZQLITE_BUSY_TIMEOUT_MS")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(DEFAULT_BUSY_TIMEOUT_MS);
    Duration::from_millis(ms)
}

fn cache_pages_from_env() -> usize {
    std::env::var("ZQLITE_CACHE_PAGES")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(DEFAULT_CACHE_PAGES)
}

fn check_page_size_env() -> Result<()> {
    if let Ok(raw) = std::env::var("ZQLITE_PAGE_SIZE") {
        match raw.parse::<usize>() {
            Ok(size) if size == PAGE_SIZE => {}
            Ok(size) => {
                return Err(ZqError::Misuse(format!(
                    "unsupported page size {} (this build uses {})",
                    size, PAGE_SIZE
                )))
            }
            Err(_) => {
                log::warn!("ZQLITE_PAGE_SIZE must be an integer, using {}", PAGE_SIZE);
            }
        }
    }
    Ok(())
}

impl Database {
    /// Create a new database file.
    pub fn create(path: &Path) -> Result<Database> {
        Self::create_with(path, Box::new(PlainCodec), DbOptions::default())
    }

    /// Create with a page codec (the encryption-at-rest seam) and options.
    pub fn create_with(
        path: &Path,
        codec: Box<dyn PageCodec>,
        options: DbOptions,
    ) -> Result<Database> {
        check_page_size_env()?;
        let pager = Pager::create(path, codec, options.cache_pages)?;
        Self::from_pager(path, pager, options)
    }

    /// Open an existing database, running WAL recovery first.
    pub fn open(path: &Path) -> Result<Database> {
        Self::open_with(path, Box::new(PlainCodec), DbOptions::default())
    }

    pub fn open_with(
        path: &Path,
        codec: Box<dyn PageCodec>,
        options: DbOptions,
    ) -> Result<Database> {
        check_page_size_env()?;
        let pager = Pager::open(path, codec, options.cache_pages)?;
        Self::from_pager(path, pager, options)
    }

    /// Open the database at `path`, creating it when absent.
    pub fn open_or_create(path: &Path) -> Result<Database> {
        if path.exists() {
            Self::open(path)
        } else {
            Self::create(path)
        }
    }

    fn from_pager(path: &Path, pager: Pager, options: DbOptions) -> Result<Database> {
        let locks = LockManager::new(path, options.busy_timeout)?;
        Ok(Database {
            shared: Arc::new(DbShared {
                pager: Mutex::new(pager),
                locks,
                active_snapshots: AtomicUsize::new(0),
            }),
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Open a connection. Each connection is thread-affine: it must not be
    /// used concurrently from multiple threads.
    pub fn connect(&self) -> Connection {
        Connection {
            session: Session::new(self.shared.clone(), ConnState::new(StdRng::from_entropy())),
        }
    }
}

/// One connection: a session plus its prepared-statement surface.
pub struct Connection {
    session: Session,
}

impl Connection {
    /// Execute a single SQL statement.
    pub fn execute(&mut self, sql: &str) -> Result<ExecResult> {
        self.session.execute(sql)
    }

    /// Execute a query and collect its rows.
    pub fn query(&mut self, sql: &str) -> Result<Vec<Row>> {
        self.session.query(sql)
    }

    /// Execute a semicolon-separated script, stopping at the first error.
    pub fn execute_script(&mut self, sql: &str) -> Result<Vec<ExecResult>> {
        let stmts = crate::sql::parser::parse_statements(sql)?;
        let mut results = Vec::with_capacity(stmts.len());
        for stmt in &stmts {
            results.push(self.session.execute_stmt(
                stmt,
                &[None],
                &std::collections::HashMap::new(),
            )?);
        }
        Ok(results)
    }

    /// Compile a statement for repeated execution.
    pub fn prepare(&self, sql: &str) -> Result<Statement> {
        Statement::prepare(sql)
    }

    /// Advance a prepared statement by one row.
    pub fn step(&mut self, stmt: &mut Statement) -> Result<Option<Row>> {
        stmt.step(&mut self.session)
    }

    /// Run a prepared statement to completion.
    pub fn query_prepared(&mut self, stmt: &mut Statement) -> Result<Vec<Row>> {
        stmt.query(&mut self.session)
    }

    pub fn begin(&mut self) -> Result<()> {
        self.execute("BEGIN IMMEDIATE").map(|_| ())
    }

    pub fn commit(&mut self) -> Result<()> {
        self.execute("COMMIT").map(|_| ())
    }

    pub fn rollback(&mut self) -> Result<()> {
        self.execute("ROLLBACK").map(|_| ())
    }

    pub fn last_insert_rowid(&self) -> i64 {
        self.session.conn_state().last_insert_rowid
    }

    /// Row count of the last mutating statement.
    pub fn changes(&self) -> i64 {
        self.session.conn_state().changes
    }

    pub fn database_stats(&self) -> &crate::sql::session::DatabaseStats {
        self.session.database_stats()
    }
}

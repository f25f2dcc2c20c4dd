/// Durability and recovery: committed state must survive reopen with and
/// without checkpoints; uncommitted WAL tails must vanish.
use std::path::PathBuf;

use tempfile::TempDir;
use zqlite::{Database, Value};

fn db_path(dir: &TempDir) -> PathBuf {
    dir.path().join("test.db")
}

fn wal_path(dir: &TempDir) -> PathBuf {
    let mut os = db_path(dir).into_os_string();
    os.push("-wal");
    PathBuf::from(os)
}

#[test]
fn committed_data_survives_reopen_without_checkpoint() {
    let dir = TempDir::new().unwrap();
    {
        let db = Database::create(&db_path(&dir)).unwrap();
        let mut conn = db.connect();
        conn.execute("CREATE TABLE t(id INTEGER PRIMARY KEY, v TEXT)")
            .unwrap();
        conn.execute("INSERT INTO t VALUES (1, 'persisted')").unwrap();
        // No checkpoint: data lives only in the WAL.
        assert!(std::fs::metadata(wal_path(&dir)).unwrap().len() > 36);
    }
    {
        let db = Database::open(&db_path(&dir)).unwrap();
        let mut conn = db.connect();
        let rows = conn.query("SELECT v FROM t WHERE id = 1").unwrap();
        assert_eq!(rows[0].get("v"), Some(&Value::Text("persisted".into())));
    }
}

#[test]
fn checkpoint_then_reopen() {
    let dir = TempDir::new().unwrap();
    {
        let db = Database::create(&db_path(&dir)).unwrap();
        let mut conn = db.connect();
        conn.execute("CREATE TABLE t(id INTEGER PRIMARY KEY, v TEXT)")
            .unwrap();
        for i in 0..100 {
            conn.execute(&format!("INSERT INTO t VALUES ({}, 'row{}')", i + 1, i))
                .unwrap();
        }
        conn.execute("PRAGMA wal_checkpoint").unwrap();
        // Checkpoint truncated the WAL back to its header.
        assert_eq!(std::fs::metadata(wal_path(&dir)).unwrap().len(), 36);
    }
    {
        let db = Database::open(&db_path(&dir)).unwrap();
        let mut conn = db.connect();
        let rows = conn.query("SELECT count(*) AS n FROM t").unwrap();
        assert_eq!(rows[0].get("n"), Some(&Value::Integer(100)));
    }
}

#[test]
fn writes_after_checkpoint_survive() {
    let dir = TempDir::new().unwrap();
    {
        let db = Database::create(&db_path(&dir)).unwrap();
        let mut conn = db.connect();
        conn.execute("CREATE TABLE t(id INTEGER PRIMARY KEY, v TEXT)")
            .unwrap();
        conn.execute("INSERT INTO t VALUES (1, 'before')").unwrap();
        conn.execute("PRAGMA wal_checkpoint").unwrap();
        conn.execute("INSERT INTO t VALUES (2, 'after')").unwrap();
    }
    {
        let db = Database::open(&db_path(&dir)).unwrap();
        let mut conn = db.connect();
        let rows = conn.query("SELECT count(*) AS n FROM t").unwrap();
        assert_eq!(rows[0].get("n"), Some(&Value::Integer(2)));
    }
}

#[test]
fn uncommitted_transaction_absent_after_crash_copy() {
    // An open transaction never reaches the WAL (its dirty pages are
    // private). Copying the files mid-transaction simulates a crash; the
    // copy must show only committed state.
    let dir = TempDir::new().unwrap();
    let crash_dir = TempDir::new().unwrap();
    let crashed = crash_dir.path().join("crashed.db");
    let crashed_wal = {
        let mut os = crashed.clone().into_os_string();
        os.push("-wal");
        PathBuf::from(os)
    };
    {
        let db = Database::create(&db_path(&dir)).unwrap();
        let mut conn = db.connect();
        conn.execute("CREATE TABLE t(id INTEGER PRIMARY KEY, v TEXT)")
            .unwrap();
        conn.execute("INSERT INTO t VALUES (1, 'committed')").unwrap();
        conn.execute("BEGIN").unwrap();
        conn.execute("INSERT INTO t VALUES (2, 'uncommitted')").unwrap();

        std::fs::copy(db_path(&dir), &crashed).unwrap();
        std::fs::copy(wal_path(&dir), &crashed_wal).unwrap();
        conn.execute("ROLLBACK").unwrap();
    }
    {
        let db = Database::open(&crashed).unwrap();
        let mut conn = db.connect();
        let rows = conn.query("SELECT count(*) AS n FROM t").unwrap();
        assert_eq!(rows[0].get("n"), Some(&Value::Integer(1)));
    }
}

#[test]
fn schema_survives_recovery() {
    let dir = TempDir::new().unwrap();
    {
        let db = Database::create(&db_path(&dir)).unwrap();
        let mut conn = db.connect();
        conn.execute("CREATE TABLE a(id INTEGER PRIMARY KEY)").unwrap();
        conn.execute("CREATE TABLE b(id INTEGER PRIMARY KEY, x TEXT)")
            .unwrap();
        conn.execute("CREATE INDEX ix_b ON b(x)").unwrap();
        conn.execute("INSERT INTO b VALUES (1, 'indexed')").unwrap();
    }
    {
        let db = Database::open(&db_path(&dir)).unwrap();
        let mut conn = db.connect();
        let rows = conn.query("SELECT x FROM b WHERE x = 'indexed'").unwrap();
        assert_eq!(rows.len(), 1);
        conn.execute("INSERT INTO a VALUES (7)").unwrap();
    }
}

#[test]
fn repeated_open_close_cycles_are_stable() {
    let dir = TempDir::new().unwrap();
    {
        let db = Database::create(&db_path(&dir)).unwrap();
        let mut conn = db.connect();
        conn.execute("CREATE TABLE t(id INTEGER PRIMARY KEY, n INT)")
            .unwrap();
    }
    for round in 0..5 {
        let db = Database::open(&db_path(&dir)).unwrap();
        let mut conn = db.connect();
        conn.execute(&format!("INSERT INTO t(n) VALUES ({})", round))
            .unwrap();
        let rows = conn.query("SELECT count(*) AS n FROM t").unwrap();
        assert_eq!(rows[0].get("n"), Some(&Value::Integer(round + 1)));
    }
}

use tempfile::TempDir;
use zqlite::{Database, Value, ZqError};

fn setup() -> (Database, TempDir) {
    let dir = TempDir::new().unwrap();
    let db = Database::create(&dir.path().join("test.db")).unwrap();
    (db, dir)
}

#[test]
fn unique_index_rejects_duplicates_and_keeps_table_intact() {
    let (db, _dir) = setup();
    let mut conn = db.connect();
    conn.execute("CREATE TABLE t(id INTEGER PRIMARY KEY, name TEXT)")
        .unwrap();
    conn.execute("INSERT INTO t VALUES (1,'a'),(2,'b')").unwrap();
    conn.execute("CREATE UNIQUE INDEX ix ON t(name)").unwrap();

    let err = conn.execute("INSERT INTO t VALUES (3,'a')").unwrap_err();
    assert!(matches!(err, ZqError::Constraint(_)), "{err}");

    let rows = conn.query("SELECT count(*) AS n FROM t").unwrap();
    assert_eq!(rows[0].get("n"), Some(&Value::Integer(2)));
}

#[test]
fn index_backfill_equals_incremental_maintenance() {
    let (db, _dir) = setup();
    let mut conn = db.connect();
    conn.execute("CREATE TABLE before_t(id INTEGER PRIMARY KEY, k TEXT)")
        .unwrap();
    conn.execute("CREATE TABLE after_t(id INTEGER PRIMARY KEY, k TEXT)")
        .unwrap();

    // Index created before the inserts on one table, after on the other.
    conn.execute("CREATE INDEX ix_before ON before_t(k)").unwrap();
    for i in 0..200 {
        let k = format!("key{:03}", i % 50);
        conn.execute(&format!("INSERT INTO before_t(k) VALUES ('{}')", k))
            .unwrap();
        conn.execute(&format!("INSERT INTO after_t(k) VALUES ('{}')", k))
            .unwrap();
    }
    conn.execute("CREATE INDEX ix_after ON after_t(k)").unwrap();

    for probe in ["key000", "key017", "key049"] {
        let a = conn
            .query(&format!(
                "SELECT count(*) AS n FROM before_t WHERE k = '{}'",
                probe
            ))
            .unwrap();
        let b = conn
            .query(&format!(
                "SELECT count(*) AS n FROM after_t WHERE k = '{}'",
                probe
            ))
            .unwrap();
        assert_eq!(a[0].get("n"), b[0].get("n"), "probe {}", probe);
        assert_eq!(a[0].get("n"), Some(&Value::Integer(4)));
    }
}

#[test]
fn index_scan_returns_same_rows_as_full_scan() {
    let (db, _dir) = setup();
    let mut conn = db.connect();
    conn.execute("CREATE TABLE t(id INTEGER PRIMARY KEY, grp TEXT, n INT)")
        .unwrap();
    for i in 0..300 {
        conn.execute(&format!(
            "INSERT INTO t(grp, n) VALUES ('g{}', {})",
            i % 7,
            i
        ))
        .unwrap();
    }
    let without_index = conn
        .query("SELECT n FROM t WHERE grp = 'g3' ORDER BY n")
        .unwrap();
    conn.execute("CREATE INDEX ix_grp ON t(grp)").unwrap();
    let with_index = conn
        .query("SELECT n FROM t WHERE grp = 'g3' ORDER BY n")
        .unwrap();

    assert_eq!(without_index.len(), with_index.len());
    for (a, b) in without_index.iter().zip(&with_index) {
        assert_eq!(a.get("n"), b.get("n"));
    }
}

#[test]
fn index_range_scan() {
    let (db, _dir) = setup();
    let mut conn = db.connect();
    conn.execute("CREATE TABLE t(id INTEGER PRIMARY KEY, score INT)")
        .unwrap();
    conn.execute("CREATE INDEX ix_score ON t(score)").unwrap();
    for i in 0..100 {
        conn.execute(&format!("INSERT INTO t(score) VALUES ({})", i))
            .unwrap();
    }
    let rows = conn
        .query("SELECT count(*) AS n FROM t WHERE score >= 10 AND score < 20")
        .unwrap();
    assert_eq!(rows[0].get("n"), Some(&Value::Integer(10)));
}

#[test]
fn hash_index_exact_match() {
    let (db, _dir) = setup();
    let mut conn = db.connect();
    conn.execute("CREATE TABLE t(id INTEGER PRIMARY KEY, token TEXT)")
        .unwrap();
    conn.execute("CREATE INDEX ix_token ON t(token) USING HASH")
        .unwrap();
    for i in 0..500 {
        conn.execute(&format!("INSERT INTO t(token) VALUES ('tok-{}')", i))
            .unwrap();
    }
    let rows = conn
        .query("SELECT id FROM t WHERE token = 'tok-123'")
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("id"), Some(&Value::Integer(124)));

    // Mutations keep the hash index in sync.
    conn.execute("UPDATE t SET token = 'tok-renamed' WHERE token = 'tok-123'")
        .unwrap();
    assert!(conn
        .query("SELECT id FROM t WHERE token = 'tok-123'")
        .unwrap()
        .is_empty());
    assert_eq!(
        conn.query("SELECT id FROM t WHERE token = 'tok-renamed'")
            .unwrap()
            .len(),
        1
    );
}

#[test]
fn composite_index_full_tuple_match() {
    let (db, _dir) = setup();
    let mut conn = db.connect();
    conn.execute("CREATE TABLE t(id INTEGER PRIMARY KEY, a TEXT, b INT)")
        .unwrap();
    conn.execute("CREATE UNIQUE INDEX ix_ab ON t(a, b)").unwrap();

    conn.execute("INSERT INTO t(a, b) VALUES ('x', 1), ('x', 2), ('y', 1)")
        .unwrap();
    let err = conn
        .execute("INSERT INTO t(a, b) VALUES ('x', 1)")
        .unwrap_err();
    assert!(matches!(err, ZqError::Constraint(_)));

    let rows = conn
        .query("SELECT id FROM t WHERE a = 'x' AND b = 2")
        .unwrap();
    assert_eq!(rows.len(), 1);

    // NULL components are exempt from uniqueness.
    conn.execute("INSERT INTO t(a, b) VALUES ('x', NULL)").unwrap();
    conn.execute("INSERT INTO t(a, b) VALUES ('x', NULL)").unwrap();
}

#[test]
fn text_primary_key_enforced_via_implicit_index() {
    let (db, _dir) = setup();
    let mut conn = db.connect();
    conn.execute("CREATE TABLE t(code TEXT PRIMARY KEY, v INT)")
        .unwrap();
    conn.execute("INSERT INTO t VALUES ('alpha', 1)").unwrap();
    let err = conn.execute("INSERT INTO t VALUES ('alpha', 2)").unwrap_err();
    assert!(matches!(err, ZqError::Constraint(_)));
}

#[test]
fn drop_index_then_queries_still_work() {
    let (db, _dir) = setup();
    let mut conn = db.connect();
    conn.execute("CREATE TABLE t(id INTEGER PRIMARY KEY, k TEXT)")
        .unwrap();
    conn.execute("CREATE INDEX ix ON t(k)").unwrap();
    conn.execute("INSERT INTO t(k) VALUES ('a'), ('b')").unwrap();
    conn.execute("DROP INDEX ix").unwrap();

    let rows = conn.query("SELECT id FROM t WHERE k = 'b'").unwrap();
    assert_eq!(rows.len(), 1);

    let err = conn.execute("DROP INDEX ix").unwrap_err();
    assert!(matches!(err, ZqError::NotFound(_)));
    conn.execute("DROP INDEX IF EXISTS ix").unwrap();
}

#[test]
fn unique_backfill_failure_rejects_index() {
    let (db, _dir) = setup();
    let mut conn = db.connect();
    conn.execute("CREATE TABLE t(id INTEGER PRIMARY KEY, k TEXT)")
        .unwrap();
    conn.execute("INSERT INTO t(k) VALUES ('dup'), ('dup')").unwrap();
    let err = conn.execute("CREATE UNIQUE INDEX ix ON t(k)").unwrap_err();
    assert!(matches!(err, ZqError::Constraint(_)));

    // The failed index is not left behind.
    conn.execute("INSERT INTO t(k) VALUES ('dup')").unwrap();
}

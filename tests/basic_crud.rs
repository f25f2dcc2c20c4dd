use tempfile::TempDir;
use zqlite::{Database, ExecResult, Value, ZqError};

fn setup() -> (Database, TempDir) {
    let dir = TempDir::new().unwrap();
    let db = Database::create(&dir.path().join("test.db")).unwrap();
    (db, dir)
}

#[test]
fn full_crud_cycle() {
    let (db, _dir) = setup();
    let mut conn = db.connect();

    conn.execute("CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT, email TEXT)")
        .unwrap();

    conn.execute("INSERT INTO users VALUES (1, 'Alice', 'alice@example.com')")
        .unwrap();
    conn.execute("INSERT INTO users VALUES (2, 'Bob', 'bob@example.com')")
        .unwrap();
    conn.execute("INSERT INTO users VALUES (3, 'Charlie', 'charlie@example.com')")
        .unwrap();

    let rows = conn.query("SELECT * FROM users").unwrap();
    assert_eq!(rows.len(), 3);

    let rows = conn.query("SELECT * FROM users WHERE id = 2").unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("name"), Some(&Value::Text("Bob".into())));

    conn.execute("UPDATE users SET name = 'Bobby' WHERE id = 2")
        .unwrap();
    let rows = conn.query("SELECT name FROM users WHERE id = 2").unwrap();
    assert_eq!(rows[0].get("name"), Some(&Value::Text("Bobby".into())));

    conn.execute("DELETE FROM users WHERE id = 3").unwrap();
    let rows = conn.query("SELECT * FROM users").unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(conn.changes(), 1);
}

#[test]
fn select_name_by_id() {
    // CREATE TABLE t(...); INSERT two rows; point query returns one row.
    let (db, _dir) = setup();
    let mut conn = db.connect();
    conn.execute("CREATE TABLE t(id INTEGER PRIMARY KEY, name TEXT)")
        .unwrap();
    conn.execute("INSERT INTO t VALUES (1,'a'),(2,'b')").unwrap();
    let rows = conn.query("SELECT name FROM t WHERE id=2").unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("name"), Some(&Value::Text("b".into())));
}

#[test]
fn default_expression_evaluated_at_insert() {
    let (db, _dir) = setup();
    let mut conn = db.connect();
    conn.execute("CREATE TABLE u(id INTEGER PRIMARY KEY, ts INTEGER DEFAULT (unixepoch()))")
        .unwrap();
    conn.execute("INSERT INTO u(id) VALUES (1)").unwrap();
    let rows = conn.query("SELECT ts IS NOT NULL AS filled FROM u").unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("filled"), Some(&Value::Integer(1)));

    let rows = conn.query("SELECT ts FROM u").unwrap();
    let Some(Value::Integer(ts)) = rows[0].get("ts") else {
        panic!("expected integer timestamp");
    };
    assert!(*ts > 1_600_000_000);
}

#[test]
fn literal_default_applies_to_omitted_columns() {
    let (db, _dir) = setup();
    let mut conn = db.connect();
    conn.execute("CREATE TABLE t(id INTEGER PRIMARY KEY, status TEXT DEFAULT 'new')")
        .unwrap();
    conn.execute("INSERT INTO t(id) VALUES (1)").unwrap();
    let rows = conn.query("SELECT status FROM t").unwrap();
    assert_eq!(rows[0].get("status"), Some(&Value::Text("new".into())));
}

#[test]
fn rowid_alias_autoassigns_monotonically() {
    let (db, _dir) = setup();
    let mut conn = db.connect();
    conn.execute("CREATE TABLE t(id INTEGER PRIMARY KEY, v TEXT)")
        .unwrap();
    conn.execute("INSERT INTO t(v) VALUES ('a')").unwrap();
    assert_eq!(conn.last_insert_rowid(), 1);
    conn.execute("INSERT INTO t VALUES (10, 'b')").unwrap();
    conn.execute("INSERT INTO t(v) VALUES ('c')").unwrap();
    assert_eq!(conn.last_insert_rowid(), 11);

    // Deleting the max row must not allow id reuse.
    conn.execute("DELETE FROM t WHERE id = 11").unwrap();
    conn.execute("INSERT INTO t(v) VALUES ('d')").unwrap();
    assert_eq!(conn.last_insert_rowid(), 12);
}

#[test]
fn not_null_and_check_constraints() {
    let (db, _dir) = setup();
    let mut conn = db.connect();
    conn.execute("CREATE TABLE t(id INTEGER PRIMARY KEY, name TEXT NOT NULL, age INT CHECK (age >= 0))")
        .unwrap();

    let err = conn
        .execute("INSERT INTO t(id, age) VALUES (1, 5)")
        .unwrap_err();
    assert!(matches!(err, ZqError::Constraint(_)), "{err}");

    let err = conn
        .execute("INSERT INTO t VALUES (1, 'x', -3)")
        .unwrap_err();
    assert!(matches!(err, ZqError::Constraint(_)), "{err}");

    conn.execute("INSERT INTO t VALUES (1, 'x', 3)").unwrap();
    // A NULL check result passes.
    conn.execute("INSERT INTO t(id, name) VALUES (2, 'y')").unwrap();
}

#[test]
fn insert_then_delete_restores_table_content() {
    let (db, _dir) = setup();
    let mut conn = db.connect();
    conn.execute("CREATE TABLE t(id INTEGER PRIMARY KEY, v TEXT)")
        .unwrap();
    conn.execute("INSERT INTO t VALUES (1, 'keep'), (2, 'keep2')")
        .unwrap();
    let before = conn.query("SELECT * FROM t ORDER BY id").unwrap();

    conn.execute("INSERT INTO t VALUES (50, 'temp')").unwrap();
    conn.execute("DELETE FROM t WHERE id = 50").unwrap();

    let after = conn.query("SELECT * FROM t ORDER BY id").unwrap();
    assert_eq!(before.len(), after.len());
    for (b, a) in before.iter().zip(&after) {
        assert_eq!(b.get("id"), a.get("id"));
        assert_eq!(b.get("v"), a.get("v"));
    }
}

#[test]
fn payloads_around_the_spill_threshold() {
    let (db, _dir) = setup();
    let mut conn = db.connect();
    conn.execute("CREATE TABLE t(id INTEGER PRIMARY KEY, body TEXT)")
        .unwrap();

    // At, just below, and far above the spill threshold.
    for (id, len) in [(1, 1000), (2, 1024), (3, 1100), (4, 20_000)] {
        let body = "z".repeat(len);
        let mut stmt = conn.prepare("INSERT INTO t VALUES (?, ?)").unwrap();
        stmt.bind(1, Value::Integer(id)).unwrap();
        stmt.bind(2, Value::Text(body)).unwrap();
        conn.step(&mut stmt).unwrap();
    }
    for (id, len) in [(1, 1000), (2, 1024), (3, 1100), (4, 20_000)] {
        let rows = conn
            .query(&format!("SELECT length(body) AS n FROM t WHERE id = {}", id))
            .unwrap();
        assert_eq!(rows[0].get("n"), Some(&Value::Integer(len)));
    }

    conn.execute("DELETE FROM t WHERE id = 4").unwrap();
    let rows = conn.query("SELECT count(*) AS n FROM t").unwrap();
    assert_eq!(rows[0].get("n"), Some(&Value::Integer(3)));
}

#[test]
fn multi_statement_script() {
    let (db, _dir) = setup();
    let mut conn = db.connect();
    let results = conn
        .execute_script(
            "CREATE TABLE t(id INTEGER PRIMARY KEY, v TEXT);
             INSERT INTO t VALUES (1, 'one');
             SELECT v FROM t;",
        )
        .unwrap();
    assert_eq!(results.len(), 3);
    let ExecResult::Rows(rows) = &results[2] else {
        panic!("expected rows");
    };
    assert_eq!(rows[0].get("v"), Some(&Value::Text("one".into())));
}

#[test]
fn unknown_table_is_not_found() {
    let (db, _dir) = setup();
    let mut conn = db.connect();
    let err = conn.query("SELECT * FROM missing").unwrap_err();
    assert!(matches!(err, ZqError::NotFound(_)));
}

#[test]
fn on_conflict_ignore_and_replace() {
    let (db, _dir) = setup();
    let mut conn = db.connect();
    conn.execute("CREATE TABLE t(id INTEGER PRIMARY KEY, v TEXT)")
        .unwrap();
    conn.execute("INSERT INTO t VALUES (1, 'original')").unwrap();

    conn.execute("INSERT INTO t VALUES (1, 'ignored') ON CONFLICT IGNORE")
        .unwrap();
    let rows = conn.query("SELECT v FROM t WHERE id = 1").unwrap();
    assert_eq!(rows[0].get("v"), Some(&Value::Text("original".into())));

    conn.execute("INSERT INTO t VALUES (1, 'replaced') ON CONFLICT REPLACE")
        .unwrap();
    let rows = conn.query("SELECT v FROM t WHERE id = 1").unwrap();
    assert_eq!(rows[0].get("v"), Some(&Value::Text("replaced".into())));
    let rows = conn.query("SELECT count(*) AS n FROM t").unwrap();
    assert_eq!(rows[0].get("n"), Some(&Value::Integer(1)));
}

use tempfile::TempDir;
use zqlite::{Database, Value};

fn setup() -> (Database, TempDir) {
    let dir = TempDir::new().unwrap();
    let db = Database::create(&dir.path().join("test.db")).unwrap();
    (db, dir)
}

fn one(conn: &mut zqlite::Connection, sql: &str) -> Value {
    let rows = conn.query(sql).unwrap();
    assert_eq!(rows.len(), 1, "{}", sql);
    rows[0].values[0].1.clone()
}

#[test]
fn string_functions_through_sql() {
    let (db, _dir) = setup();
    let mut conn = db.connect();
    assert_eq!(one(&mut conn, "SELECT length('hello')"), Value::Integer(5));
    assert_eq!(
        one(&mut conn, "SELECT substr('alphabet', 2, 3)"),
        Value::Text("lph".into())
    );
    assert_eq!(
        one(&mut conn, "SELECT substr('alphabet', -3)"),
        Value::Text("bet".into())
    );
    assert_eq!(
        one(&mut conn, "SELECT replace('x-y', '-', '+')"),
        Value::Text("x+y".into())
    );
    assert_eq!(
        one(&mut conn, "SELECT upper('ab') || lower('CD')"),
        Value::Text("ABcd".into())
    );
    assert_eq!(
        one(&mut conn, "SELECT trim('  pad  ')"),
        Value::Text("pad".into())
    );
    assert_eq!(one(&mut conn, "SELECT instr('haystack', 'st')"), Value::Integer(4));
}

#[test]
fn numeric_functions_through_sql() {
    let (db, _dir) = setup();
    let mut conn = db.connect();
    assert_eq!(one(&mut conn, "SELECT abs(-9)"), Value::Integer(9));
    assert_eq!(one(&mut conn, "SELECT round(3.567, 1)"), Value::Real(3.6));
    assert_eq!(one(&mut conn, "SELECT ceil(1.1)"), Value::Real(2.0));
    assert_eq!(one(&mut conn, "SELECT floor(9.9)"), Value::Real(9.0));
    assert_eq!(one(&mut conn, "SELECT min(3, 7)"), Value::Integer(3));
    assert_eq!(one(&mut conn, "SELECT max(3, 7)"), Value::Integer(7));
}

#[test]
fn datetime_now_is_consistent_within_statement() {
    let (db, _dir) = setup();
    let mut conn = db.connect();
    let row = conn
        .query("SELECT unixepoch() AS a, unixepoch('now') AS b, datetime('now') AS text")
        .unwrap();
    assert_eq!(row[0].get("a"), row[0].get("b"));
    let Some(Value::Text(rendered)) = row[0].get("text") else {
        panic!("expected text datetime");
    };
    assert_eq!(rendered.len(), "2024-01-01 00:00:00".len());

    assert_eq!(
        one(&mut conn, "SELECT date('2024-03-15 06:30:00')"),
        Value::Text("2024-03-15".into())
    );
    assert_eq!(
        one(&mut conn, "SELECT time('2024-03-15 06:30:00')"),
        Value::Text("06:30:00".into())
    );
    assert_eq!(
        one(&mut conn, "SELECT strftime('%Y/%m', '2024-03-15')"),
        Value::Text("2024/03".into())
    );
    let Value::Real(jd) = one(&mut conn, "SELECT julianday('2000-01-01 12:00:00')") else {
        panic!("expected real");
    };
    assert!((jd - 2_451_545.0).abs() < 1e-9);
}

#[test]
fn json_functions_through_sql() {
    let (db, _dir) = setup();
    let mut conn = db.connect();
    conn.execute("CREATE TABLE docs(id INTEGER PRIMARY KEY, body TEXT)")
        .unwrap();
    conn.execute(
        r#"INSERT INTO docs(body) VALUES ('{"user": {"name": "zed", "tags": [1, 2, 3]}}')"#,
    )
    .unwrap();

    let rows = conn
        .query("SELECT json_extract(body, '$.user.name') AS name FROM docs")
        .unwrap();
    assert_eq!(rows[0].get("name"), Some(&Value::Text("zed".into())));

    let rows = conn
        .query("SELECT json_extract(body, '$.user.tags[1]') AS tag FROM docs")
        .unwrap();
    assert_eq!(rows[0].get("tag"), Some(&Value::Integer(2)));

    assert_eq!(one(&mut conn, "SELECT json_valid('[1,2]')"), Value::Integer(1));
    assert_eq!(one(&mut conn, "SELECT json_valid('{oops')"), Value::Integer(0));
    assert_eq!(
        one(&mut conn, "SELECT json_type('{\"a\":1}')"),
        Value::Text("object".into())
    );
}

#[test]
fn hash_functions() {
    let (db, _dir) = setup();
    let mut conn = db.connect();
    let Value::Blob(sha) = one(&mut conn, "SELECT sha256('abc')") else {
        panic!("expected blob");
    };
    assert_eq!(sha.len(), 32);
    // SHA-256("abc") starts with ba7816bf.
    assert_eq!(&sha[..4], &[0xba, 0x78, 0x16, 0xbf]);

    let Value::Blob(b3) = one(&mut conn, "SELECT blake3('abc')") else {
        panic!("expected blob");
    };
    assert_eq!(b3.len(), 32);
    assert_ne!(sha, b3);
}

#[test]
fn row_state_functions() {
    let (db, _dir) = setup();
    let mut conn = db.connect();
    conn.execute("CREATE TABLE t(id INTEGER PRIMARY KEY, v TEXT)")
        .unwrap();
    conn.execute("INSERT INTO t(v) VALUES ('a'), ('b'), ('c')")
        .unwrap();
    assert_eq!(one(&mut conn, "SELECT last_insert_rowid()"), Value::Integer(3));
    assert_eq!(one(&mut conn, "SELECT changes()"), Value::Integer(3));

    conn.execute("DELETE FROM t WHERE id > 1").unwrap();
    assert_eq!(one(&mut conn, "SELECT changes()"), Value::Integer(2));
}

#[test]
fn null_propagation_in_functions() {
    let (db, _dir) = setup();
    let mut conn = db.connect();
    for sql in [
        "SELECT length(NULL)",
        "SELECT substr(NULL, 1)",
        "SELECT abs(NULL)",
        "SELECT sha256(NULL)",
        "SELECT json_extract(NULL, '$.a')",
        "SELECT datetime(NULL)",
    ] {
        assert!(one(&mut conn, sql).is_null(), "{}", sql);
    }
    // NULL = NULL is NULL; NULL IS NULL is 1.
    assert!(one(&mut conn, "SELECT NULL = NULL").is_null());
    assert_eq!(one(&mut conn, "SELECT NULL IS NULL"), Value::Integer(1));
}

#[test]
fn case_insensitive_function_names() {
    let (db, _dir) = setup();
    let mut conn = db.connect();
    assert_eq!(one(&mut conn, "SELECT LENGTH('abc')"), Value::Integer(3));
    assert_eq!(one(&mut conn, "SELECT Length('abc')"), Value::Integer(3));
}

#[test]
fn random_is_deterministic_per_connection_seed() {
    let (db, _dir) = setup();
    let mut conn = db.connect();
    let a = one(&mut conn, "SELECT random()");
    let b = one(&mut conn, "SELECT random()");
    // Two draws from the connection PRNG differ (with overwhelming odds).
    assert_ne!(a, b);
}

use tempfile::TempDir;
use zqlite::{Database, Value};

fn setup() -> (Database, TempDir) {
    let dir = TempDir::new().unwrap();
    let db = Database::create(&dir.path().join("test.db")).unwrap();
    let mut conn = db.connect();
    conn.execute("CREATE TABLE sales(id INTEGER PRIMARY KEY, region TEXT, amount INT)")
        .unwrap();
    conn.execute(
        "INSERT INTO sales(region, amount) VALUES \
         ('north', 10), ('north', 20), ('south', 5), ('south', 15), ('west', 40)",
    )
    .unwrap();
    (db, dir)
}

#[test]
fn scalar_aggregates() {
    let (db, _dir) = setup();
    let mut conn = db.connect();
    let rows = conn
        .query(
            "SELECT count(*) AS c, sum(amount) AS s, avg(amount) AS a, \
             min(amount) AS lo, max(amount) AS hi FROM sales",
        )
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("c"), Some(&Value::Integer(5)));
    assert_eq!(rows[0].get("s"), Some(&Value::Integer(90)));
    assert_eq!(rows[0].get("a"), Some(&Value::Real(18.0)));
    assert_eq!(rows[0].get("lo"), Some(&Value::Integer(5)));
    assert_eq!(rows[0].get("hi"), Some(&Value::Integer(40)));
}

#[test]
fn empty_input_aggregates() {
    let (db, _dir) = setup();
    let mut conn = db.connect();
    conn.execute("DELETE FROM sales").unwrap();
    let rows = conn
        .query("SELECT count(*) AS c, sum(amount) AS s, avg(amount) AS a FROM sales")
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("c"), Some(&Value::Integer(0)));
    assert!(rows[0].get("s").unwrap().is_null());
    assert!(rows[0].get("a").unwrap().is_null());
}

#[test]
fn count_column_skips_nulls() {
    let (db, _dir) = setup();
    let mut conn = db.connect();
    conn.execute("INSERT INTO sales(region, amount) VALUES ('north', NULL)")
        .unwrap();
    let rows = conn
        .query("SELECT count(*) AS all_rows, count(amount) AS with_amount FROM sales")
        .unwrap();
    assert_eq!(rows[0].get("all_rows"), Some(&Value::Integer(6)));
    assert_eq!(rows[0].get("with_amount"), Some(&Value::Integer(5)));
}

#[test]
fn group_by_with_having() {
    let (db, _dir) = setup();
    let mut conn = db.connect();
    let rows = conn
        .query(
            "SELECT region, sum(amount) AS total FROM sales \
             GROUP BY region HAVING sum(amount) > 15 \
             ORDER BY total DESC",
        )
        .unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].get("region"), Some(&Value::Text("west".into())));
    assert_eq!(rows[0].get("total"), Some(&Value::Integer(40)));
    assert_eq!(rows[1].get("region"), Some(&Value::Text("north".into())));
    assert_eq!(rows[1].get("total"), Some(&Value::Integer(30)));
}

#[test]
fn group_concat_and_distinct_count() {
    let (db, _dir) = setup();
    let mut conn = db.connect();
    let rows = conn
        .query("SELECT count(DISTINCT region) AS regions FROM sales")
        .unwrap();
    assert_eq!(rows[0].get("regions"), Some(&Value::Integer(3)));

    let rows = conn
        .query(
            "SELECT region, group_concat(amount) AS amounts FROM sales \
             GROUP BY region ORDER BY region",
        )
        .unwrap();
    assert_eq!(rows[0].get("region"), Some(&Value::Text("north".into())));
    assert_eq!(rows[0].get("amounts"), Some(&Value::Text("10,20".into())));
}

#[test]
fn aggregate_in_order_by() {
    let (db, _dir) = setup();
    let mut conn = db.connect();
    let rows = conn
        .query(
            "SELECT region FROM sales GROUP BY region ORDER BY count(*) DESC, region",
        )
        .unwrap();
    assert_eq!(rows.len(), 3);
    // north and south tie at 2; west has 1.
    assert_eq!(rows[0].get("region"), Some(&Value::Text("north".into())));
    assert_eq!(rows[2].get("region"), Some(&Value::Text("west".into())));
}

#[test]
fn sum_mixes_integers_and_reals() {
    let (db, _dir) = setup();
    let mut conn = db.connect();
    conn.execute("CREATE TABLE m(id INTEGER PRIMARY KEY, v REAL)").unwrap();
    conn.execute("INSERT INTO m(v) VALUES (1), (2.5)").unwrap();
    let rows = conn.query("SELECT sum(v) AS s FROM m").unwrap();
    assert_eq!(rows[0].get("s"), Some(&Value::Real(3.5)));
}

#[test]
fn distinct_select() {
    let (db, _dir) = setup();
    let mut conn = db.connect();
    let rows = conn
        .query("SELECT DISTINCT region FROM sales ORDER BY region")
        .unwrap();
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[0].get("region"), Some(&Value::Text("north".into())));
}

#[test]
fn aggregates_without_from() {
    let (db, _dir) = setup();
    let mut conn = db.connect();
    let rows = conn.query("SELECT count(*) AS n").unwrap();
    assert_eq!(rows[0].get("n"), Some(&Value::Integer(1)));
}

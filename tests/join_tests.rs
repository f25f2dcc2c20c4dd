use tempfile::TempDir;
use zqlite::{Database, Value};

fn setup() -> (Database, TempDir) {
    let dir = TempDir::new().unwrap();
    let db = Database::create(&dir.path().join("test.db")).unwrap();
    let mut conn = db.connect();
    conn.execute("CREATE TABLE users(id INTEGER PRIMARY KEY, name TEXT)")
        .unwrap();
    conn.execute("CREATE TABLE orders(id INTEGER PRIMARY KEY, user_id INT, total INT)")
        .unwrap();
    conn.execute("INSERT INTO users VALUES (1,'alice'),(2,'bob'),(3,'carol')")
        .unwrap();
    conn.execute("INSERT INTO orders VALUES (10,1,100),(11,1,50),(12,2,75),(13,9,1)")
        .unwrap();
    (db, dir)
}

#[test]
fn inner_join_matches_only() {
    let (db, _dir) = setup();
    let mut conn = db.connect();
    let rows = conn
        .query(
            "SELECT users.name, orders.total FROM users \
             JOIN orders ON orders.user_id = users.id ORDER BY orders.id",
        )
        .unwrap();
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[0].get("name"), Some(&Value::Text("alice".into())));
    assert_eq!(rows[2].get("name"), Some(&Value::Text("bob".into())));
}

#[test]
fn left_join_pads_unmatched_with_nulls() {
    let (db, _dir) = setup();
    let mut conn = db.connect();
    let rows = conn
        .query(
            "SELECT users.name, orders.total FROM users \
             LEFT JOIN orders ON orders.user_id = users.id \
             ORDER BY users.id, orders.id",
        )
        .unwrap();
    // alice x2, bob x1, carol padded.
    assert_eq!(rows.len(), 4);
    let carol = &rows[3];
    assert_eq!(carol.get("name"), Some(&Value::Text("carol".into())));
    assert!(carol.get("total").unwrap().is_null());
}

#[test]
fn left_join_anti_pattern_finds_orphans() {
    let (db, _dir) = setup();
    let mut conn = db.connect();
    let rows = conn
        .query(
            "SELECT users.name FROM users \
             LEFT JOIN orders ON orders.user_id = users.id \
             WHERE orders.id IS NULL",
        )
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("name"), Some(&Value::Text("carol".into())));
}

#[test]
fn right_join_preserves_right_side() {
    let (db, _dir) = setup();
    let mut conn = db.connect();
    let rows = conn
        .query(
            "SELECT users.name, orders.id AS oid FROM users \
             RIGHT JOIN orders ON orders.user_id = users.id \
             ORDER BY oid",
        )
        .unwrap();
    // All four orders survive; order 13 has no user.
    assert_eq!(rows.len(), 4);
    let orphan = &rows[3];
    assert_eq!(orphan.get("oid"), Some(&Value::Integer(13)));
    assert!(orphan.get("name").unwrap().is_null());
}

#[test]
fn right_join_select_star_keeps_from_clause_order() {
    // The planner executes RIGHT JOIN with the sides swapped internally;
    // the surfaced column order must still follow the FROM clause.
    let (db, _dir) = setup();
    let mut conn = db.connect();
    let rows = conn
        .query(
            "SELECT * FROM users \
             RIGHT JOIN orders ON orders.user_id = users.id \
             ORDER BY orders.id",
        )
        .unwrap();
    assert_eq!(rows.len(), 4);

    let names: Vec<&str> = rows[0].values.iter().map(|(n, _)| n.as_str()).collect();
    assert_eq!(names, vec!["id", "name", "id", "user_id", "total"]);
    // Matched row: users columns first, positionally.
    assert_eq!(rows[0].values[0].1, Value::Integer(1));
    assert_eq!(rows[0].values[1].1, Value::Text("alice".into()));
    assert_eq!(rows[0].values[2].1, Value::Integer(10));

    // The orphan order pads the users side, which stays leftmost.
    let orphan = &rows[3];
    assert!(orphan.values[0].1.is_null());
    assert!(orphan.values[1].1.is_null());
    assert_eq!(orphan.values[2].1, Value::Integer(13));
    assert_eq!(orphan.values[3].1, Value::Integer(9));
    assert_eq!(orphan.values[4].1, Value::Integer(1));
}

#[test]
fn full_outer_join_covers_both_sides() {
    let (db, _dir) = setup();
    let mut conn = db.connect();
    let rows = conn
        .query(
            "SELECT users.name, orders.id AS oid FROM users \
             FULL OUTER JOIN orders ON orders.user_id = users.id",
        )
        .unwrap();
    // 3 matches + carol (no order) + order 13 (no user).
    assert_eq!(rows.len(), 5);
    let unmatched_user = rows
        .iter()
        .find(|r| r.get("name") == Some(&Value::Text("carol".into())))
        .unwrap();
    assert!(unmatched_user.get("oid").unwrap().is_null());
    let unmatched_order = rows
        .iter()
        .find(|r| r.get("oid") == Some(&Value::Integer(13)))
        .unwrap();
    assert!(unmatched_order.get("name").unwrap().is_null());
}

#[test]
fn cross_join_is_cartesian() {
    let (db, _dir) = setup();
    let mut conn = db.connect();
    let rows = conn
        .query("SELECT count(*) AS n FROM users CROSS JOIN orders")
        .unwrap();
    assert_eq!(rows[0].get("n"), Some(&Value::Integer(12)));
}

#[test]
fn aliased_self_join() {
    let (db, _dir) = setup();
    let mut conn = db.connect();
    let rows = conn
        .query(
            "SELECT a.name AS first, b.name AS second FROM users a \
             JOIN users b ON b.id = a.id + 1 ORDER BY a.id",
        )
        .unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].get("first"), Some(&Value::Text("alice".into())));
    assert_eq!(rows[0].get("second"), Some(&Value::Text("bob".into())));
}

#[test]
fn non_equi_join_condition() {
    let (db, _dir) = setup();
    let mut conn = db.connect();
    let rows = conn
        .query(
            "SELECT count(*) AS n FROM users \
             JOIN orders ON orders.total > 60 AND orders.user_id = users.id",
        )
        .unwrap();
    // order 10 (100, alice) and order 12 (75, bob).
    assert_eq!(rows[0].get("n"), Some(&Value::Integer(2)));
}

#[test]
fn three_way_join() {
    let (db, _dir) = setup();
    let mut conn = db.connect();
    conn.execute("CREATE TABLE items(id INTEGER PRIMARY KEY, order_id INT, sku TEXT)")
        .unwrap();
    conn.execute("INSERT INTO items VALUES (1,10,'widget'),(2,12,'gadget')")
        .unwrap();
    let rows = conn
        .query(
            "SELECT users.name, items.sku FROM users \
             JOIN orders ON orders.user_id = users.id \
             JOIN items ON items.order_id = orders.id \
             ORDER BY items.id",
        )
        .unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].get("sku"), Some(&Value::Text("widget".into())));
    assert_eq!(rows[1].get("name"), Some(&Value::Text("bob".into())));
}

use pretty_assertions::assert_eq;
use quereus_core::{Collation, ColumnDef, ConflictPolicy, IndexDef, KeyDef, LogicalType, Row, TableSchema, Value};
use quereus_helpers::IndexMap;
use quereus_storage::InMemoryModule;
use quereus_vtab::{BestIndexInput, Constraint, ConstraintOp, Module, MutationOp, UpdateResult, VirtualTable};
use smol_str::SmolStr;

fn table_t() -> TableSchema {
    TableSchema {
        schema_name: SmolStr::new("main"),
        table_name: SmolStr::new("t"),
        columns: vec![ColumnDef::new("id", LogicalType::Integer), ColumnDef::new("v", LogicalType::Text)],
        primary_key: KeyDef::single(0),
        secondary_indexes: vec![],
        check_constraints: vec![],
        module_name: SmolStr::new("memory"),
    }
}

fn row(id: i64, v: &str) -> Row {
    Row::from(vec![Value::Integer(id), Value::from(v)])
}

fn options() -> IndexMap<String, String> {
    IndexMap::default()
}

/// CREATE TABLE t(id INTEGER PRIMARY KEY, v TEXT); BEGIN; INSERT INTO t
/// VALUES(1,'a'); SELECT v FROM t WHERE id=1; ROLLBACK; SELECT count(*)
/// FROM t; — first SELECT sees 'a', second sees 0 rows.
#[test]
fn read_your_own_writes_then_rollback() {
    let module = InMemoryModule::new();
    let t = module.connect("t", &table_t(), &options()).unwrap();

    t.begin().unwrap();
    t.mutate(MutationOp::Insert, Some(&row(1, "a")), None, ConflictPolicy::Abort).unwrap();

    let plan = t.best_index(&BestIndexInput {
        constraints: vec![Constraint { column: 0, op: ConstraintOp::Eq, value: Some(Value::Integer(1)), usable: true }],
        order_by: vec![],
    }).unwrap();
    let mut cursor = t.open_cursor().unwrap();
    cursor.filter(plan.idx_num, plan.idx_str.as_deref(), &[Value::Integer(1)], &plan).unwrap();
    assert!(!cursor.eof());
    assert_eq!(cursor.column(1).unwrap(), Value::from("a"));

    t.rollback().unwrap();

    let mut scan = t.open_cursor().unwrap();
    let full = quereus_vtab::BestIndexPlan::full_scan(0, 0);
    scan.filter(full.idx_num, None, &[], &full).unwrap();
    assert!(scan.eof());
}

/// CREATE TABLE u(id INTEGER PRIMARY KEY, email TEXT); CREATE INDEX ix ON
/// u(email); INSERT INTO u VALUES(1,'a@x'); BEGIN; INSERT INTO u
/// VALUES(2,'b@x'); SELECT id FROM u WHERE email='b@x'; ROLLBACK; SELECT
/// id FROM u WHERE email='b@x'; — first returns 2, second returns none.
#[test]
fn secondary_index_with_pending_insert() {
    let module = InMemoryModule::new();
    let schema = TableSchema {
        schema_name: SmolStr::new("main"),
        table_name: SmolStr::new("u"),
        columns: vec![ColumnDef::new("id", LogicalType::Integer), ColumnDef::new("email", LogicalType::Text)],
        primary_key: KeyDef::single(0),
        secondary_indexes: vec![IndexDef { name: SmolStr::new("ix"), key: KeyDef::single(1), collation: Collation::Binary }],
        check_constraints: vec![],
        module_name: SmolStr::new("memory"),
    };
    let u = module.connect("u", &schema, &options()).unwrap();
    u.mutate(MutationOp::Insert, Some(&row(1, "a@x")), None, ConflictPolicy::Abort).unwrap();
    u.commit().unwrap();

    u.begin().unwrap();
    u.mutate(MutationOp::Insert, Some(&row(2, "b@x")), None, ConflictPolicy::Abort).unwrap();

    let lookup = |table: &dyn VirtualTable| -> Vec<Value> {
        let plan = table
            .best_index(&BestIndexInput {
                constraints: vec![Constraint { column: 1, op: ConstraintOp::Eq, value: Some(Value::from("b@x")), usable: true }],
                order_by: vec![],
            })
            .unwrap();
        let mut cursor = table.open_cursor().unwrap();
        cursor.filter(plan.idx_num, plan.idx_str.as_deref(), &[Value::from("b@x")], &plan).unwrap();
        let mut ids = Vec::new();
        while !cursor.eof() {
            ids.push(cursor.column(0).unwrap());
            cursor.next().unwrap();
        }
        ids
    };

    assert_eq!(lookup(u.as_ref()), vec![Value::Integer(2)]);
    u.rollback().unwrap();
    assert_eq!(lookup(u.as_ref()), Vec::<Value>::new());
}

/// BEGIN; INSERT INTO t VALUES(1,'keep'); SAVEPOINT s; INSERT INTO t
/// VALUES(2,'drop'); ROLLBACK TO s; COMMIT; SELECT id FROM t ORDER BY id;
/// — rows [1].
#[test]
fn savepoint_rollback_preserves_outer_writes() {
    let module = InMemoryModule::new();
    let t = module.connect("t", &table_t(), &options()).unwrap();

    t.begin().unwrap();
    t.mutate(MutationOp::Insert, Some(&row(1, "keep")), None, ConflictPolicy::Abort).unwrap();
    t.savepoint(1).unwrap();
    t.mutate(MutationOp::Insert, Some(&row(2, "drop")), None, ConflictPolicy::Abort).unwrap();
    t.rollback_to(1).unwrap();
    t.commit().unwrap();

    let full = quereus_vtab::BestIndexPlan::full_scan(0, 0);
    let mut cursor = t.open_cursor().unwrap();
    cursor.filter(full.idx_num, None, &[], &full).unwrap();
    let mut ids = Vec::new();
    while !cursor.eof() {
        ids.push(cursor.column(0).unwrap());
        cursor.next().unwrap();
    }
    assert_eq!(ids, vec![Value::Integer(1)]);
}

/// Connection A begins and inserts; connection B commits a conflicting
/// insert first. A's commit fails with ConcurrentUpdate; the table ends
/// in B's state.
#[test]
fn concurrent_update_detection() {
    let module = InMemoryModule::new();
    let a = module.connect("t", &table_t(), &options()).unwrap();
    let b = module.connect("t", &table_t(), &options()).unwrap();

    a.begin().unwrap();
    b.begin().unwrap();
    a.mutate(MutationOp::Insert, Some(&row(1, "a")), None, ConflictPolicy::Abort).unwrap();
    b.mutate(MutationOp::Insert, Some(&row(2, "b")), None, ConflictPolicy::Abort).unwrap();

    b.commit().unwrap();
    assert!(a.commit().is_err());

    let full = quereus_vtab::BestIndexPlan::full_scan(0, 0);
    let mut cursor = a.open_cursor().unwrap();
    cursor.filter(full.idx_num, None, &[], &full).unwrap();
    let mut ids = Vec::new();
    while !cursor.eof() {
        ids.push(cursor.column(0).unwrap());
        cursor.next().unwrap();
    }
    assert_eq!(ids, vec![Value::Integer(2)]);
}

#[test]
fn insert_or_ignore_twice_is_idempotent() {
    let module = InMemoryModule::new();
    let t = module.connect("t", &table_t(), &options()).unwrap();

    let first = t.mutate(MutationOp::Insert, Some(&row(1, "a")), None, ConflictPolicy::Ignore).unwrap();
    t.commit().unwrap();
    assert!(matches!(first, UpdateResult::Applied { affected: 1, .. }));

    let second = t.mutate(MutationOp::Insert, Some(&row(1, "a")), None, ConflictPolicy::Ignore).unwrap();
    t.commit().unwrap();
    assert!(matches!(second, UpdateResult::Ignored));

    let full = quereus_vtab::BestIndexPlan::full_scan(0, 0);
    let mut cursor = t.open_cursor().unwrap();
    cursor.filter(full.idx_num, None, &[], &full).unwrap();
    let mut count = 0;
    while !cursor.eof() {
        count += 1;
        cursor.next().unwrap();
    }
    assert_eq!(count, 1);
}

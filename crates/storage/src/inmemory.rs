use std::sync::Arc;

use parking_lot::RwLock;
use quereus_core::{
    Collation, ConflictPolicy, IndexDef, KeyDef, QuereusError, QuereusResult, Row, SortDirection,
    TableSchema, Value,
};
use quereus_helpers::IndexMap;
use quereus_vtab::{
    BestIndexInput, BestIndexPlan, Capabilities, ConstraintOp, ConstraintUsage, Cursor, Module,
    MutationOp, UpdateResult, VirtualTable,
};
use smol_str::SmolStr;

use crate::layer::PRIMARY_INDEX;
use crate::manager::{Connection, TableManager};

/// The reference virtual-table module: every table it serves is backed by
/// an MVCC layer stack (`TableManager`) living entirely in process memory.
/// Tables are keyed by name so repeated `connect` calls for the same table
/// (one per session that opens it) share the same underlying manager while
/// each session gets its own `Connection`.
#[derive(Default)]
pub struct InMemoryModule {
    tables: RwLock<IndexMap<SmolStr, Arc<TableManager>>>,
}

impl InMemoryModule {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Module for InMemoryModule {
    fn capabilities(&self) -> Capabilities {
        Capabilities::SUPPORTS_ISOLATION
            | Capabilities::SUPPORTS_SAVEPOINTS
            | Capabilities::SUPPORTS_SECONDARY_INDEXES
    }

    fn connect(
        &self,
        table_name: &str,
        schema: &TableSchema,
        _options: &IndexMap<String, String>,
    ) -> QuereusResult<Arc<dyn VirtualTable>> {
        let manager = {
            let mut tables = self.tables.write();
            tables
                .entry(SmolStr::new(table_name))
                .or_insert_with(|| TableManager::new(schema.clone()))
                .clone()
        };
        let conn = manager.open_connection();
        Ok(Arc::new(InMemoryTable(Arc::new(InMemoryTableInner { manager, conn }))))
    }
}

struct InMemoryTableInner {
    manager: Arc<TableManager>,
    conn: Connection,
}

/// One session's handle onto an in-memory table. Cloning the inner `Arc`
/// (rather than borrowing through `&self`) is what lets `open_cursor`
/// return a `'static`-bound cursor that still shares this session's
/// manager and connection.
pub struct InMemoryTable(Arc<InMemoryTableInner>);

impl VirtualTable for InMemoryTable {
    fn schema(&self) -> TableSchema {
        self.0.manager.schema()
    }

    fn best_index(&self, input: &BestIndexInput) -> QuereusResult<BestIndexPlan> {
        let schema = self.0.manager.schema();

        if let Some(plan) = plan_for_key(&schema.primary_key, PRIMARY_INDEX, 1, input) {
            return Ok(plan);
        }
        for index in &schema.secondary_indexes {
            if let Some(plan) = plan_for_key(&index.key, &index.name, 2, input) {
                return Ok(plan);
            }
        }
        let estimated_rows = self.0.manager.scan_all(&self.0.conn, PRIMARY_INDEX).len() as u64;
        Ok(BestIndexPlan::full_scan(input.constraints.len(), estimated_rows))
    }

    fn open_cursor(&self) -> QuereusResult<Box<dyn Cursor>> {
        Ok(Box::new(InMemoryCursor { table: self.0.clone(), rows: Vec::new(), pos: 0 }))
    }

    fn mutate(
        &self,
        op: MutationOp,
        new_row: Option<&Row>,
        old_key_values: Option<&[Value]>,
        conflict: ConflictPolicy,
    ) -> QuereusResult<UpdateResult> {
        self.0.manager.mutate(&self.0.conn, op, new_row, old_key_values, conflict)
    }

    fn begin(&self) -> QuereusResult<()> {
        self.0.manager.begin(&self.0.conn);
        Ok(())
    }

    fn commit(&self) -> QuereusResult<()> {
        self.0.manager.commit(&self.0.conn, &[])
    }

    fn rollback(&self) -> QuereusResult<()> {
        self.0.manager.rollback(&self.0.conn);
        Ok(())
    }

    fn savepoint(&self, _depth: u32) -> QuereusResult<()> {
        self.0.manager.create_savepoint(&self.0.conn);
        Ok(())
    }

    fn release(&self, depth: u32) -> QuereusResult<()> {
        self.0.manager.release(&self.0.conn, depth);
        Ok(())
    }

    fn rollback_to(&self, depth: u32) -> QuereusResult<()> {
        self.0.manager.rollback_to(&self.0.conn, depth)
    }

    fn create_index(&self, name: &str, columns: &[usize]) -> QuereusResult<()> {
        let key = KeyDef { columns: columns.iter().map(|&c| (c, SortDirection::Ascending)).collect() };
        self.0.manager.create_secondary_index(IndexDef { name: SmolStr::new(name), key, collation: Collation::Binary })
    }

    fn drop_index(&self, name: &str) -> QuereusResult<()> {
        self.0.manager.drop_secondary_index(name)
    }
}

/// Matches `key`'s columns, in order, against usable equality constraints
/// in `input`. Only a full match (every key column pinned by an `Eq`)
/// produces a plan; a partial prefix match is left to the full-scan
/// fallback, which verifies every constraint anyway.
fn plan_for_key(key: &KeyDef, index_name: &str, idx_num: i32, input: &BestIndexInput) -> Option<BestIndexPlan> {
    let mut usage = vec![ConstraintUsage::default(); input.constraints.len()];
    for (slot, &(column, _)) in key.columns.iter().enumerate() {
        let (ci, _) = input
            .constraints
            .iter()
            .enumerate()
            .find(|(_, c)| c.column == column && c.op == ConstraintOp::Eq && c.usable && c.value.is_some())?;
        usage[ci] = ConstraintUsage { argv_index: Some(slot as u32), omit: true };
    }
    Some(BestIndexPlan {
        idx_num,
        idx_str: Some(index_name.to_string()),
        constraint_usage: usage,
        estimated_cost: 1.0,
        estimated_rows: 1,
        order_by_consumed: false,
    })
}

struct InMemoryCursor {
    table: Arc<InMemoryTableInner>,
    rows: Vec<Row>,
    pos: usize,
}

impl Cursor for InMemoryCursor {
    fn filter(&mut self, idx_num: i32, idx_str: Option<&str>, args: &[Value], _plan: &BestIndexPlan) -> QuereusResult<()> {
        let schema = self.table.manager.schema();
        let index_name = idx_str.unwrap_or(PRIMARY_INDEX);
        let all = self.table.manager.scan_all(&self.table.conn, index_name);

        self.rows = if idx_num == 0 {
            all.into_iter().map(|(_, row)| row).collect()
        } else {
            let key = if index_name == PRIMARY_INDEX {
                &schema.primary_key
            } else {
                &schema.secondary_indexes.iter().find(|ix| ix.name == index_name)
                    .ok_or_else(|| QuereusError::Internal { message: format!("unknown index {index_name}") })?
                    .key
            };
            all.into_iter()
                .map(|(_, row)| row)
                .filter(|row| {
                    key.columns.iter().zip(args).all(|(&(col, _), expected)| {
                        row.get(col).is_some_and(|actual| actual == expected)
                    })
                })
                .collect()
        };
        self.pos = 0;
        Ok(())
    }

    fn next(&mut self) -> QuereusResult<()> {
        self.pos += 1;
        Ok(())
    }

    fn eof(&self) -> bool {
        self.pos >= self.rows.len()
    }

    fn column(&self, i: usize) -> QuereusResult<Value> {
        self.rows[self.pos]
            .get(i)
            .cloned()
            .ok_or_else(|| QuereusError::Internal { message: format!("column {i} out of range") })
    }

    fn row_id(&self) -> QuereusResult<i64> {
        let schema = self.table.manager.schema();
        single_integer_pk(&schema, &self.rows[self.pos])
            .ok_or_else(|| QuereusError::Misuse { message: "table has no rowid-compatible primary key".into() })
    }
}

fn single_integer_pk(schema: &TableSchema, row: &Row) -> Option<i64> {
    let mut indices = schema.primary_key.column_indices();
    let only = indices.next()?;
    if indices.next().is_some() {
        return None;
    }
    row.get(only).and_then(Value::as_integer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use quereus_core::{ColumnDef, LogicalType};

    fn schema(name: &str, indexes: Vec<IndexDef>) -> TableSchema {
        TableSchema {
            schema_name: SmolStr::new("main"),
            table_name: SmolStr::new(name),
            columns: vec![ColumnDef::new("id", LogicalType::Integer), ColumnDef::new("email", LogicalType::Text)],
            primary_key: KeyDef::single(0),
            secondary_indexes: indexes,
            check_constraints: vec![],
            module_name: SmolStr::new("memory"),
        }
    }

    fn row(id: i64, email: &str) -> Row {
        Row::from(vec![Value::Integer(id), Value::from(email)])
    }

    #[test]
    fn secondary_index_with_pending_insert_scenario() {
        let module = InMemoryModule::new();
        let s = schema("u", vec![IndexDef { name: SmolStr::new("ix"), key: KeyDef::single(1), collation: Collation::Binary }]);
        let table = module.connect("u", &s, &IndexMap::default()).unwrap();
        table.mutate(MutationOp::Insert, Some(&row(1, "a@x")), None, ConflictPolicy::Abort).unwrap();
        table.commit().unwrap();

        table.begin().unwrap();
        table.mutate(MutationOp::Insert, Some(&row(2, "b@x")), None, ConflictPolicy::Abort).unwrap();

        let input = BestIndexInput {
            constraints: vec![quereus_vtab::Constraint { column: 1, op: ConstraintOp::Eq, value: Some(Value::from("b@x")), usable: true }],
            order_by: vec![],
        };
        let plan = table.best_index(&input).unwrap();
        let mut cursor = table.open_cursor().unwrap();
        cursor.filter(plan.idx_num, plan.idx_str.as_deref(), &[Value::from("b@x")], &plan).unwrap();
        let mut ids = Vec::new();
        while !cursor.eof() {
            ids.push(cursor.column(0).unwrap());
            cursor.next().unwrap();
        }
        assert_eq!(ids, vec![Value::Integer(2)]);

        table.rollback().unwrap();
        cursor.filter(plan.idx_num, plan.idx_str.as_deref(), &[Value::from("b@x")], &plan).unwrap();
        assert!(cursor.eof());
    }

    #[test]
    fn full_scan_still_yields_all_rows() {
        let module = InMemoryModule::new();
        let s = schema("t", vec![]);
        let table = module.connect("t", &s, &IndexMap::default()).unwrap();
        table.mutate(MutationOp::Insert, Some(&row(1, "a")), None, ConflictPolicy::Abort).unwrap();
        table.mutate(MutationOp::Insert, Some(&row(2, "b")), None, ConflictPolicy::Abort).unwrap();
        table.commit().unwrap();

        let plan = BestIndexPlan::full_scan(0, 2);
        let mut cursor = table.open_cursor().unwrap();
        cursor.filter(plan.idx_num, None, &[], &plan).unwrap();
        let mut count = 0;
        while !cursor.eof() {
            count += 1;
            cursor.next().unwrap();
        }
        assert_eq!(count, 2);
    }
}

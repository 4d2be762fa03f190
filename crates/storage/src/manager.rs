use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use quereus_core::{ConflictPolicy, ConstraintKind, QuereusError, QuereusResult, Row, TableSchema, Value};
use quereus_vtab::{MutationOp, UpdateResult};

use crate::keys::{encode_secondary_key, encode_values};
use crate::layer::{Layer, LayerKind, PRIMARY_INDEX};
use crate::validate::prepare_row;

/// How long collapse waits to acquire its latch before giving up for this
/// call.
const COLLAPSE_TIMEOUT: std::time::Duration = std::time::Duration::from_millis(50);

/// One per-table MVCC manager. Owns the layer chain and
/// serializes commits and schema changes through named latches, acquired
/// in this fixed order wherever more than one is needed at once:
/// `schema_change` → `commit` → `collapse` → `consolidate`.
pub struct TableManager {
    schema: RwLock<TableSchema>,
    base: Arc<Layer>,
    committed: RwLock<Arc<Layer>>,
    layer_ids: quereus_helpers::IdCounter,
    rowid_counter: AtomicI64,
    commit_latch: Mutex<()>,
    collapse_latch: Mutex<()>,
    schema_latch: Mutex<()>,
    consolidate_latch: Mutex<()>,
}

impl TableManager {
    pub fn new(schema: TableSchema) -> Arc<TableManager> {
        let layer_ids = quereus_helpers::IdCounter::new();
        let index_names = schema.secondary_indexes.iter().map(|ix| ix.name.clone());
        let base = Layer::new_base(0, index_names);
        Arc::new(TableManager {
            schema: RwLock::new(schema),
            base: base.clone(),
            committed: RwLock::new(base),
            layer_ids,
            rowid_counter: AtomicI64::new(1),
            commit_latch: Mutex::new(()),
            collapse_latch: Mutex::new(()),
            schema_latch: Mutex::new(()),
            consolidate_latch: Mutex::new(()),
        })
    }

    pub fn schema(&self) -> TableSchema {
        self.schema.read().clone()
    }

    pub fn current_committed(&self) -> Arc<Layer> {
        self.committed.read().clone()
    }

    pub fn open_connection(self: &Arc<Self>) -> Connection {
        Connection {
            read_layer: RwLock::new(self.current_committed()),
            pending: Mutex::new(None),
            explicit: AtomicBool::new(false),
            savepoints: Mutex::new(Vec::new()),
        }
    }

    fn next_layer_id(&self) -> u64 {
        self.layer_ids.next()
    }

    /// Ensures `conn` has a pending transaction layer rooted at the
    /// table's current committed layer, creating one if absent.
    fn ensure_pending<'a>(&self, conn: &'a Connection) -> parking_lot::MappedMutexGuard<'a, Layer> {
        let mut guard = conn.pending.lock();
        if guard.is_none() {
            let parent = self.current_committed();
            *guard = Some(Layer::new_child(self.next_layer_id(), parent));
        }
        parking_lot::MutexGuard::map(guard, |p| p.as_mut().unwrap())
    }

    /// Applies one mutation to `conn`'s pending layer.
    pub fn mutate(
        &self,
        conn: &Connection,
        op: MutationOp,
        new_row: Option<&Row>,
        old_key_values: Option<&[Value]>,
        conflict: ConflictPolicy,
    ) -> QuereusResult<UpdateResult> {
        let schema = self.schema();
        let pending = self.ensure_pending(conn);

        match op {
            MutationOp::Insert => self.mutate_insert(&schema, &pending, new_row, conflict),
            MutationOp::Update => self.mutate_update(&schema, &pending, new_row, old_key_values, conflict),
            MutationOp::Delete => self.mutate_delete(&schema, &pending, old_key_values),
        }
    }

    fn mutate_insert(
        &self,
        schema: &TableSchema,
        pending: &Layer,
        new_row: Option<&Row>,
        conflict: ConflictPolicy,
    ) -> QuereusResult<UpdateResult> {
        let new_row = new_row.ok_or_else(|| QuereusError::Misuse { message: "INSERT requires a row".into() })?;
        let prepared = prepare_row(schema, new_row.clone())?;

        let (key, row_id) = if schema.has_rowid_alias() {
            let rowid = self.rowid_counter.fetch_add(1, Ordering::Relaxed);
            (encode_values(&[Value::Integer(rowid)])?, Some(rowid))
        } else {
            let key = crate::keys::encode_key_for(&schema.primary_key, &prepared)?;
            let row_id = single_integer_pk(schema, &prepared);
            (key, row_id)
        };

        if let Some(existing) = pending.get(PRIMARY_INDEX, &key) {
            return match conflict {
                ConflictPolicy::Ignore => Ok(UpdateResult::Ignored),
                ConflictPolicy::Replace => {
                    self.remove_secondary_entries(schema, pending, &existing);
                    pending.insert(PRIMARY_INDEX, key, prepared.clone());
                    self.add_secondary_entries(schema, pending, &prepared);
                    Ok(UpdateResult::Applied { row_id, affected: 1 })
                }
                ConflictPolicy::Abort | ConflictPolicy::Fail | ConflictPolicy::Rollback => {
                    Ok(UpdateResult::Constraint {
                        kind: ConstraintKind::Unique,
                        message: format!("UNIQUE constraint failed: {}", schema.table_name),
                        existing: Some(existing),
                    })
                }
            };
        }

        pending.insert(PRIMARY_INDEX, key, prepared.clone());
        self.add_secondary_entries(schema, pending, &prepared);
        Ok(UpdateResult::Applied { row_id, affected: 1 })
    }

    fn mutate_update(
        &self,
        schema: &TableSchema,
        pending: &Layer,
        new_row: Option<&Row>,
        old_key_values: Option<&[Value]>,
        conflict: ConflictPolicy,
    ) -> QuereusResult<UpdateResult> {
        let new_row = new_row.ok_or_else(|| QuereusError::Misuse { message: "UPDATE requires a row".into() })?;
        let old_key_values = old_key_values.ok_or_else(|| QuereusError::Misuse {
            message: "UPDATE requires the target row's key".into(),
        })?;
        let old_key = encode_values(old_key_values)?;

        let Some(existing) = pending.get(PRIMARY_INDEX, &old_key) else {
            return Ok(UpdateResult::NotFound);
        };

        let prepared = prepare_row(schema, new_row.clone())?;
        let new_key = if schema.has_rowid_alias() {
            old_key.clone()
        } else {
            crate::keys::encode_key_for(&schema.primary_key, &prepared)?
        };

        if new_key != old_key {
            if let Some(occupying) = pending.get(PRIMARY_INDEX, &new_key) {
                return match conflict {
                    ConflictPolicy::Ignore => Ok(UpdateResult::Ignored),
                    ConflictPolicy::Replace => {
                        self.remove_secondary_entries(schema, pending, &existing);
                        self.remove_secondary_entries(schema, pending, &occupying);
                        pending.tombstone(PRIMARY_INDEX, old_key);
                        pending.insert(PRIMARY_INDEX, new_key, prepared.clone());
                        self.add_secondary_entries(schema, pending, &prepared);
                        Ok(UpdateResult::Applied { row_id: single_integer_pk(schema, &prepared), affected: 1 })
                    }
                    ConflictPolicy::Abort | ConflictPolicy::Fail | ConflictPolicy::Rollback => {
                        Ok(UpdateResult::Constraint {
                            kind: ConstraintKind::Unique,
                            message: format!("UNIQUE constraint failed: {}", schema.table_name),
                            existing: Some(occupying),
                        })
                    }
                };
            }
            self.remove_secondary_entries(schema, pending, &existing);
            pending.tombstone(PRIMARY_INDEX, old_key);
            pending.insert(PRIMARY_INDEX, new_key, prepared.clone());
            self.add_secondary_entries(schema, pending, &prepared);
        } else {
            self.remove_secondary_entries(schema, pending, &existing);
            pending.insert(PRIMARY_INDEX, new_key, prepared.clone());
            self.add_secondary_entries(schema, pending, &prepared);
        }
        Ok(UpdateResult::Applied { row_id: single_integer_pk(schema, &prepared), affected: 1 })
    }

    fn mutate_delete(
        &self,
        schema: &TableSchema,
        pending: &Layer,
        old_key_values: Option<&[Value]>,
    ) -> QuereusResult<UpdateResult> {
        let old_key_values = old_key_values.ok_or_else(|| QuereusError::Misuse {
            message: "DELETE requires the target row's key".into(),
        })?;
        let key = encode_values(old_key_values)?;
        match pending.get(PRIMARY_INDEX, &key) {
            Some(existing) => {
                self.remove_secondary_entries(schema, pending, &existing);
                pending.tombstone(PRIMARY_INDEX, key);
                Ok(UpdateResult::Applied { row_id: None, affected: 1 })
            }
            None => Ok(UpdateResult::Applied { row_id: None, affected: 0 }),
        }
    }

    fn add_secondary_entries(&self, schema: &TableSchema, pending: &Layer, row: &Row) {
        for index in &schema.secondary_indexes {
            if let Ok(key) = encode_secondary_key(&index.key, &schema.primary_key, row) {
                pending.insert(&index.name, key, row.clone());
            }
        }
    }

    fn remove_secondary_entries(&self, schema: &TableSchema, pending: &Layer, row: &Row) {
        for index in &schema.secondary_indexes {
            if let Ok(key) = encode_secondary_key(&index.key, &schema.primary_key, row) {
                pending.tombstone(&index.name, key);
            }
        }
    }

    /// Commit protocol. `sibling_roots` carries the ids
    /// of pending layers from other tables in the same coordinated commit
    /// region, any of which is also an acceptable parent for this table's
    /// pending layer — the one relaxation of the parent-chain check.
    pub fn commit(&self, conn: &Connection, sibling_roots: &[u64]) -> QuereusResult<()> {
        let _guard = self.commit_latch.lock();

        let mut pending_slot = conn.pending.lock();
        let Some(pending) = pending_slot.take() else {
            conn.savepoints.lock().clear();
            conn.explicit.store(false, Ordering::Release);
            return Ok(());
        };

        let current = self.current_committed();
        let parent_ok = pending
            .parent()
            .map(|p| p.id == current.id || sibling_roots.contains(&p.id))
            .unwrap_or(false);
        if !parent_ok {
            *pending_slot = Some(pending);
            return Err(QuereusError::concurrent_update(
                "pending layer's parent is no longer the current committed layer",
            ));
        }

        pending.freeze();
        let pending = Arc::new(pending);
        *self.committed.write() = pending.clone();
        drop(pending_slot);

        *conn.read_layer.write() = pending;
        conn.savepoints.lock().clear();
        conn.explicit.store(false, Ordering::Release);

        self.try_collapse();
        Ok(())
    }

    pub fn rollback(&self, conn: &Connection) {
        *conn.pending.lock() = None;
        *conn.read_layer.write() = self.current_committed();
        conn.savepoints.lock().clear();
        conn.explicit.store(false, Ordering::Release);
    }

    pub fn begin(&self, conn: &Connection) {
        conn.explicit.store(true, Ordering::Release);
    }

    /// Snapshots the current pending layer (creating one if needed) and
    /// pushes it onto the savepoint stack at the next depth.
    pub fn create_savepoint(&self, conn: &Connection) -> u32 {
        let pending = self.ensure_pending(conn);
        let snapshot = self.snapshot_of(&pending);
        drop(pending);
        let mut stack = conn.savepoints.lock();
        stack.push(snapshot);
        stack.len() as u32
    }

    fn snapshot_of(&self, pending: &Layer) -> Arc<Layer> {
        let parent = pending.parent().expect("pending layer always has a parent");
        let snapshot = Layer::new_child(self.next_layer_id(), parent);
        for name in pending.index_names() {
            for (key, row) in pending.range_all(&name) {
                snapshot.insert(&name, key, row);
            }
        }
        snapshot.freeze();
        Arc::new(snapshot)
    }

    pub fn release(&self, conn: &Connection, depth: u32) {
        let mut stack = conn.savepoints.lock();
        stack.truncate(depth as usize);
    }

    /// Rebuilds a fresh mutable pending layer rooted at the snapshot
    /// recorded at `depth`; the snapshot itself survives so the savepoint
    /// remains re-rollback-able, and deeper snapshots are discarded.
    pub fn rollback_to(&self, conn: &Connection, depth: u32) -> QuereusResult<()> {
        let mut stack = conn.savepoints.lock();
        if depth == 0 || depth as usize > stack.len() {
            return Err(QuereusError::Misuse { message: format!("no savepoint at depth {depth}") });
        }
        stack.truncate(depth as usize);
        let snapshot = stack.last().expect("depth >= 1 implies non-empty stack").clone();
        drop(stack);
        *conn.pending.lock() = Some(Layer::new_child(self.next_layer_id(), snapshot));
        Ok(())
    }

    /// Best-effort chain compaction. Never blocks the caller
    /// and never fails loudly: the correctness of reads/writes never
    /// depends on collapse succeeding, only its absence bounds how deep
    /// an ancestor chain can grow.
    pub fn try_collapse(&self) {
        let Some(guard) = self.collapse_latch.try_lock_for(COLLAPSE_TIMEOUT) else {
            log::warn!("collapse: could not acquire latch within timeout, skipping");
            return;
        };
        let current = self.current_committed();
        if current.parent().is_none() {
            return;
        }
        if current.parent_strong_count() != 1 {
            log::debug!("collapse: layer {} still referenced, skipping", current.id);
            return;
        }
        current.clear_base();
        drop(guard);
    }

    /// Schema-change safety: only legal when the current
    /// committed layer equals the base layer. Consolidates outstanding
    /// transaction layers into the base first; fails `Busy` if active
    /// connections still reference anything newer.
    pub fn prepare_schema_change(&self) -> QuereusResult<()> {
        let _schema_guard = self.schema_latch.lock();
        let _consolidate_guard = self.consolidate_latch.lock();

        let committed = self.committed.read();
        if Arc::ptr_eq(&committed, &self.base) {
            return Ok(());
        }
        // Checked while still holding the read guard, before taking our
        // own clone below, so this strong count reflects only external
        // holders (connections' read layers, pending layers' parents,
        // savepoint snapshots) — exactly what "no active connections
        // still reference it" means.
        if Arc::strong_count(&*committed) != 1 {
            return Err(QuereusError::busy("active connections still reference a newer layer"));
        }
        let current = Arc::clone(&committed);
        drop(committed);

        self.base.absorb(&current);
        *self.committed.write() = self.base.clone();
        Ok(())
    }

    pub fn set_schema(&self, schema: TableSchema) {
        *self.schema.write() = schema;
    }

    /// The rows `conn` currently sees in `index`, honoring read-your-own-
    /// writes: if a pending layer exists it is read (its inheritance chain
    /// already covers the connection's read layer plus its own edits),
    /// otherwise the connection's committed read layer is read directly.
    pub fn scan_all(&self, conn: &Connection, index: &str) -> Vec<(Vec<u8>, Row)> {
        let pending = conn.pending.lock();
        match pending.as_ref() {
            Some(p) => p.range_all(index),
            None => conn.read_layer().range_all(index),
        }
    }

    pub fn scan_range(&self, conn: &Connection, index: &str, lo: &[u8], hi: &[u8]) -> Vec<(Vec<u8>, Row)> {
        let pending = conn.pending.lock();
        match pending.as_ref() {
            Some(p) => p.range(index, lo, hi),
            None => conn.read_layer().range(index, lo, hi),
        }
    }

    /// Adds a secondary index to a table that may already hold rows.
    /// Requires the same schema-change safety as any other alteration
    /// (consolidated first via `prepare_schema_change`), then builds the
    /// new tree from the base layer's current primary rows and seeds it in
    /// one step.
    pub fn create_secondary_index(&self, index: quereus_core::IndexDef) -> QuereusResult<()> {
        self.prepare_schema_change()?;
        let schema = self.schema.read().clone();
        let mut entries = Vec::new();
        for (_, row) in self.base.range_all(PRIMARY_INDEX) {
            let key = crate::keys::encode_secondary_key(&index.key, &schema.primary_key, &row)?;
            entries.push((key, row));
        }
        self.base.seed_index(index.name.clone(), entries);
        self.schema.write().secondary_indexes.push(index);
        Ok(())
    }

    pub fn drop_secondary_index(&self, name: &str) -> QuereusResult<()> {
        self.prepare_schema_change()?;
        self.base.drop_index(name);
        self.schema.write().secondary_indexes.retain(|ix| ix.name != name);
        Ok(())
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

/// One SQL session's view of one table.
pub struct Connection {
    read_layer: RwLock<Arc<Layer>>,
    pending: Mutex<Option<Layer>>,
    explicit: AtomicBool,
    savepoints: Mutex<Vec<Arc<Layer>>>,
}

impl Connection {
    pub fn read_layer(&self) -> Arc<Layer> {
        self.read_layer.read().clone()
    }

    pub fn is_explicit_transaction(&self) -> bool {
        self.explicit.load(Ordering::Acquire)
    }

    pub fn has_pending(&self) -> bool {
        self.pending.lock().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use quereus_core::{ColumnDef, KeyDef, LogicalType};
    use smol_str::SmolStr;

    fn schema() -> TableSchema {
        TableSchema {
            schema_name: SmolStr::new("main"),
            table_name: SmolStr::new("t"),
            columns: vec![
                ColumnDef::new("id", LogicalType::Integer),
                ColumnDef::new("v", LogicalType::Text),
            ],
            primary_key: KeyDef::single(0),
            secondary_indexes: vec![],
            check_constraints: vec![],
            module_name: SmolStr::new("memory"),
        }
    }

    fn row(id: i64, v: &str) -> Row {
        Row::from(vec![Value::Integer(id), Value::from(v)])
    }

    #[test]
    fn read_your_own_writes_then_rollback_scenario() {
        let mgr = TableManager::new(schema());
        let conn = mgr.open_connection();
        mgr.begin(&conn);

        let result = mgr
            .mutate(&conn, MutationOp::Insert, Some(&row(1, "a")), None, ConflictPolicy::Abort)
            .unwrap();
        assert!(matches!(result, UpdateResult::Applied { row_id: Some(1), affected: 1 }));

        let pending = conn.pending.lock();
        let seen = pending.as_ref().unwrap().get(PRIMARY_INDEX, &encode_values(&[Value::Integer(1)]).unwrap());
        assert_eq!(seen, Some(row(1, "a")));
        drop(pending);

        mgr.rollback(&conn);
        assert_eq!(mgr.current_committed().range_all(PRIMARY_INDEX).len(), 0);
    }

    #[test]
    fn savepoint_rollback_preserves_outer_writes_scenario() {
        let mgr = TableManager::new(schema());
        let conn = mgr.open_connection();
        mgr.begin(&conn);

        mgr.mutate(&conn, MutationOp::Insert, Some(&row(1, "keep")), None, ConflictPolicy::Abort).unwrap();
        let depth = mgr.create_savepoint(&conn);
        mgr.mutate(&conn, MutationOp::Insert, Some(&row(2, "drop")), None, ConflictPolicy::Abort).unwrap();
        mgr.rollback_to(&conn, depth).unwrap();
        mgr.commit(&conn, &[]).unwrap();

        let rows: Vec<_> = mgr.current_committed().range_all(PRIMARY_INDEX);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].1, row(1, "keep"));
    }

    #[test]
    fn concurrent_update_detection_scenario() {
        let mgr = TableManager::new(schema());
        let conn_a = mgr.open_connection();
        let conn_b = mgr.open_connection();
        mgr.begin(&conn_a);
        mgr.begin(&conn_b);

        mgr.mutate(&conn_a, MutationOp::Insert, Some(&row(1, "a")), None, ConflictPolicy::Abort).unwrap();
        mgr.mutate(&conn_b, MutationOp::Insert, Some(&row(2, "b")), None, ConflictPolicy::Abort).unwrap();

        mgr.commit(&conn_b, &[]).unwrap();
        let result = mgr.commit(&conn_a, &[]);
        assert!(result.is_err());

        let rows: Vec<_> = mgr.current_committed().range_all(PRIMARY_INDEX);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].1, row(2, "b"));
    }

    #[test]
    fn insert_or_ignore_twice_is_idempotent() {
        let mgr = TableManager::new(schema());
        let conn = mgr.open_connection();
        mgr.mutate(&conn, MutationOp::Insert, Some(&row(1, "a")), None, ConflictPolicy::Ignore).unwrap();
        mgr.commit(&conn, &[]).unwrap();
        mgr.mutate(&conn, MutationOp::Insert, Some(&row(1, "a")), None, ConflictPolicy::Ignore).unwrap();
        mgr.commit(&conn, &[]).unwrap();

        assert_eq!(mgr.current_committed().range_all(PRIMARY_INDEX).len(), 1);
    }
}

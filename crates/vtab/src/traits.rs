use std::sync::Arc;

use quereus_core::{ConflictPolicy, QuereusError, QuereusResult, Row, TableSchema, Value};
use quereus_helpers::IndexMap;

use crate::best_index::{BestIndexInput, BestIndexPlan};
use crate::capabilities::Capabilities;
use crate::mutation::{MutationOp, UpdateResult};

/// A registered family of virtual tables (e.g. "the in-memory module").
/// One `Module` instance is shared across every table it connects.
pub trait Module: Send + Sync {
    fn capabilities(&self) -> Capabilities;

    /// Creates (or reopens) a table backed by this module.
    fn connect(
        &self,
        table_name: &str,
        schema: &TableSchema,
        options: &IndexMap<String, String>,
    ) -> QuereusResult<Arc<dyn VirtualTable>>;
}

/// A single virtual table. Implementations are expected to be `Arc`-shared
/// across every connection that has it open; interior mutability (a
/// `TableManager`, for the in-memory module) carries the actual state.
pub trait VirtualTable: Send + Sync {
    /// A snapshot of the table's current schema. Returned by value rather
    /// than by reference since a module backed by interior mutability
    /// (the in-memory module's `TableManager`) has no stable `&TableSchema`
    /// to hand out once `create_index`/`drop_index` can change it.
    fn schema(&self) -> TableSchema;

    /// Chooses an access path for the constraints and ordering the
    /// optimizer offers. Returning `BestIndexPlan::full_scan` is always a
    /// valid, if unoptimized, answer.
    fn best_index(&self, input: &BestIndexInput) -> QuereusResult<BestIndexPlan>;

    fn open_cursor(&self) -> QuereusResult<Box<dyn Cursor>>;

    fn mutate(
        &self,
        op: MutationOp,
        new_row: Option<&Row>,
        old_key_values: Option<&[Value]>,
        conflict: ConflictPolicy,
    ) -> QuereusResult<UpdateResult>;

    fn begin(&self) -> QuereusResult<()>;
    fn sync(&self) -> QuereusResult<()> {
        Ok(())
    }
    fn commit(&self) -> QuereusResult<()>;
    fn rollback(&self) -> QuereusResult<()>;

    fn savepoint(&self, depth: u32) -> QuereusResult<()>;
    fn release(&self, depth: u32) -> QuereusResult<()>;
    fn rollback_to(&self, depth: u32) -> QuereusResult<()>;

    /// Optional: only modules advertising `SUPPORTS_SECONDARY_INDEXES`
    /// need override these.
    fn create_index(&self, _name: &str, _columns: &[usize]) -> QuereusResult<()> {
        Err(QuereusError::Misuse {
            message: "this module does not support secondary indexes".to_string(),
        })
    }

    fn drop_index(&self, _name: &str) -> QuereusResult<()> {
        Err(QuereusError::Misuse {
            message: "this module does not support secondary indexes".to_string(),
        })
    }
}

/// A cursor over one table, positioned by `filter` and advanced by
/// `next`. Scoped acquisition: every `open_cursor()` caller is expected to
/// `close()` the cursor on every exit path, including cancellation.
pub trait Cursor: Send {
    fn filter(
        &mut self,
        idx_num: i32,
        idx_str: Option<&str>,
        args: &[Value],
        plan: &BestIndexPlan,
    ) -> QuereusResult<()>;

    fn next(&mut self) -> QuereusResult<()>;
    fn eof(&self) -> bool;
    fn column(&self, i: usize) -> QuereusResult<Value>;
    fn row_id(&self) -> QuereusResult<i64>;
    fn close(&mut self) -> QuereusResult<()> {
        Ok(())
    }
}

//! The transaction coordinator (C10): tracks autocommit vs. explicit
//! transaction mode for one session and drives `begin`/`sync`/`commit`/
//! `rollback`/savepoint hooks across every table the current transaction
//! has touched.
//!
//! `Connection` owns exactly one of these. Savepoints are named at the SQL
//! level (`SAVEPOINT s`) but every virtual-table hook takes an integer
//! depth (§4.3/§4.10), so the coordinator is also where a savepoint name
//! is resolved to the depth the storage layer understands.

use std::sync::Arc;

use quereus_core::{QuereusError, QuereusResult};
use quereus_helpers::IndexMap;
use quereus_vtab::VirtualTable;
use smol_str::SmolStr;

pub struct TransactionCoordinator {
    autocommit: bool,
    /// Tables touched since the last commit/rollback boundary: in
    /// autocommit mode this is "touched by the statement in flight" and
    /// is drained as soon as that statement finishes; in an explicit
    /// transaction it accumulates across every statement between `BEGIN`
    /// and `COMMIT`/`ROLLBACK`.
    active: IndexMap<SmolStr, Arc<dyn VirtualTable>>,
    /// Named savepoints, outermost first, each holding the integer depth
    /// assigned when it was created.
    savepoints: Vec<(SmolStr, u32)>,
}

impl Default for TransactionCoordinator {
    fn default() -> Self {
        Self { autocommit: true, active: IndexMap::default(), savepoints: Vec::new() }
    }
}

impl TransactionCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_autocommit(&self) -> bool {
        self.autocommit
    }

    /// Records that `table` (named `name`) participates in the
    /// transaction currently in flight, calling `begin` on it the first
    /// time it's seen since the last commit/rollback boundary.
    pub fn touch(&mut self, name: &str, table: &Arc<dyn VirtualTable>) -> QuereusResult<()> {
        if !self.active.contains_key(name) {
            table.begin()?;
            self.active.insert(SmolStr::new(name), table.clone());
        }
        Ok(())
    }

    pub fn begin_explicit(&mut self) -> QuereusResult<()> {
        if !self.autocommit {
            return Err(QuereusError::Misuse { message: "already inside a transaction".into() });
        }
        self.autocommit = false;
        Ok(())
    }

    /// Runs the coordinated commit region (§4.10) over every table
    /// touched since the last boundary: `sync` on each, then `commit` on
    /// each. Used both for an explicit `COMMIT` and for flushing an
    /// autocommit statement — the only difference is whether `autocommit`
    /// was already `true` going in.
    pub fn commit(&mut self) -> QuereusResult<()> {
        let active = std::mem::take(&mut self.active);
        self.autocommit = true;
        self.savepoints.clear();
        commit_active(&active)
    }

    pub fn rollback(&mut self) {
        let active = std::mem::take(&mut self.active);
        self.autocommit = true;
        self.savepoints.clear();
        rollback_active(&active);
    }

    pub fn savepoint(&mut self, name: SmolStr) -> QuereusResult<()> {
        if self.autocommit {
            return Err(QuereusError::Misuse { message: "SAVEPOINT requires an open transaction".into() });
        }
        let depth = self.savepoints.len() as u32 + 1;
        for table in self.active.values() {
            table.savepoint(depth)?;
        }
        self.savepoints.retain(|(n, _)| *n != name);
        self.savepoints.push((name, depth));
        Ok(())
    }

    pub fn release(&mut self, name: &str) -> QuereusResult<()> {
        let depth = self.depth_of(name)?;
        for table in self.active.values() {
            table.release(depth)?;
        }
        self.savepoints.retain(|(_, d)| *d < depth);
        Ok(())
    }

    pub fn rollback_to(&mut self, name: &str) -> QuereusResult<()> {
        let depth = self.depth_of(name)?;
        for table in self.active.values() {
            table.rollback_to(depth)?;
        }
        self.savepoints.retain(|(_, d)| *d <= depth);
        Ok(())
    }

    fn depth_of(&self, name: &str) -> QuereusResult<u32> {
        self.savepoints
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, d)| *d)
            .ok_or_else(|| QuereusError::Misuse { message: format!("no such savepoint: {name}") })
    }
}

/// A `sync` failure aborts before any table commits; a `commit` failure
/// (e.g. a concurrent-update conflict) discards the failing table's own
/// pending layer and whatever hasn't committed yet, then surfaces the
/// error — the tables that already committed stay committed, a
/// documented limitation of coordinating through the `VirtualTable`
/// trait object rather than a concrete `TableManager` (see `DESIGN.md`).
fn commit_active(active: &IndexMap<SmolStr, Arc<dyn VirtualTable>>) -> QuereusResult<()> {
    for table in active.values() {
        if let Err(e) = table.sync() {
            rollback_active(active);
            return Err(e);
        }
    }
    for (i, table) in active.values().enumerate() {
        if let Err(e) = table.commit() {
            for t in active.values().skip(i) {
                let _ = t.rollback();
            }
            return Err(e);
        }
    }
    Ok(())
}

fn rollback_active(active: &IndexMap<SmolStr, Arc<dyn VirtualTable>>) {
    for table in active.values() {
        let _ = table.rollback();
    }
}

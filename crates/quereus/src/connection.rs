//! One SQL session: a `Catalog` view over the database's tables, plus the
//! transaction coordinator that tracks this session's autocommit state.

use std::cell::RefCell;
use std::sync::Arc;

use quereus_core::{QuereusError, QuereusResult, TableSchema};
use quereus_helpers::IndexMap;
use quereus_planner::ast;
use quereus_planner::catalog::Catalog;
use quereus_vtab::VirtualTable;
use smol_str::SmolStr;

use crate::coordinator::TransactionCoordinator;
use crate::database::DatabaseInner;
use crate::statement::Statement;

/// A session's handle onto the engine. Tables are opened (via
/// `Module::connect`) at most once per session, the first time they're
/// referenced, and cached for the session's lifetime — `Module::connect`
/// mints a fresh MVCC read snapshot each call, so calling it again for a
/// table this session already has open would silently reset its view.
pub struct Connection {
    pub(crate) db: Arc<DatabaseInner>,
    tables: RefCell<IndexMap<SmolStr, Arc<dyn VirtualTable>>>,
    pub(crate) coordinator: RefCell<TransactionCoordinator>,
}

impl Connection {
    pub(crate) fn new(db: Arc<DatabaseInner>) -> Self {
        Self { db, tables: RefCell::new(IndexMap::default()), coordinator: RefCell::new(TransactionCoordinator::new()) }
    }

    pub fn get_autocommit(&self) -> bool {
        self.coordinator.borrow().is_autocommit()
    }

    /// Builds (or replays, if already prepared once) a plan for `stmt`
    /// and returns a handle that can be `run` with bound parameters.
    /// DDL and transaction-control statements never reach the planner
    /// (`Planner::build_statement` rejects them); `prepare` intercepts
    /// those itself.
    pub fn prepare<'c>(&'c self, stmt: &ast::Statement) -> QuereusResult<Statement<'c>> {
        Statement::prepare(self, stmt)
    }

    /// Prepares and immediately runs `stmt` with no bound parameters —
    /// the common case for DDL and transaction control, and a
    /// convenience for callers who don't need to re-run a query.
    pub fn exec(&self, stmt: &ast::Statement) -> QuereusResult<crate::statement::RowSequence<'_>> {
        self.prepare(stmt)?.run(quereus_runtime::BoundParams::empty())
    }

    pub(crate) fn open_table(&self, name: &str) -> QuereusResult<Arc<dyn VirtualTable>> {
        if let Some(table) = self.tables.borrow().get(name) {
            return Ok(table.clone());
        }
        let schema = self
            .db
            .schemas
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| QuereusError::Resolution { message: format!("no such table: {name}") })?;
        let module = self
            .db
            .modules
            .read()
            .get(schema.module_name.as_str())
            .cloned()
            .ok_or_else(|| QuereusError::Internal { message: format!("no such module: {}", schema.module_name) })?;
        let table = module.connect(name, &schema, &IndexMap::default())?;
        self.tables.borrow_mut().insert(SmolStr::new(name), table.clone());
        Ok(table)
    }

    pub(crate) fn table_schema(&self, name: &str) -> QuereusResult<TableSchema> {
        self.db.schemas.read().get(name).cloned().ok_or_else(|| QuereusError::Resolution { message: format!("no such table: {name}") })
    }

    /// Runs whatever the coordinator does when a statement (that built a
    /// plan, not a DDL/transaction-control one) finishes — commit in
    /// autocommit mode, nothing inside an explicit transaction. Called
    /// once the statement's row sequence has been fully consumed or has
    /// failed.
    pub(crate) fn end_statement(&self, ok: bool) -> QuereusResult<()> {
        let mut coordinator = self.coordinator.borrow_mut();
        if !coordinator.is_autocommit() {
            return Ok(());
        }
        if ok {
            coordinator.commit()
        } else {
            coordinator.rollback();
            Ok(())
        }
    }
}

impl Catalog for Connection {
    fn resolve_table(&self, _schema: Option<&str>, name: &str) -> QuereusResult<(Arc<dyn VirtualTable>, TableSchema)> {
        let table = self.open_table(name)?;
        self.coordinator.borrow_mut().touch(name, &table)?;
        let schema = table.schema();
        Ok((table, schema))
    }
}

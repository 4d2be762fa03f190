//! A prepared statement: built once against a `Connection`'s catalog
//! view, runnable (repeatedly, with different bound parameters) into a
//! lazy row sequence — `prepare(sql) → Statement`, `statement.run(params?)
//! → lazy row sequence` per §6.
//!
//! `ast::Statement::CreateTable`/`CreateIndex`/`DropIndex`/`Begin`/
//! `Commit`/`Rollback`/`Savepoint`/`Release`/`RollbackTo` never reach
//! `quereus_planner::Planner` (it rejects them as `Misuse` — see
//! `builder.rs`'s `build_statement`); `Statement::prepare` intercepts
//! them here and runs them directly against the connection instead of
//! building a plan.

use quereus_core::{CheckConstraint, ColumnDef, QuereusError, QuereusResult, Row, TableSchema, Value};
use quereus_planner::ast;
use quereus_planner::plan::PlanRef;
use quereus_planner::Planner;
use quereus_runtime::{check::compile_check, emit, BoundParams, ExecContext, RowStream};
use smol_str::SmolStr;
use std::sync::Arc;

use crate::connection::Connection;

enum Body {
    /// A `SELECT`/`INSERT`/`UPDATE`/`DELETE`, already planned and
    /// optimized. Re-runnable as-is: every table reference it closes
    /// over is an `Arc<dyn VirtualTable>` baked in at build time, so
    /// running it again re-reads (or re-mutates) the same tables.
    Plan(PlanRef),
    CreateTable(ast::CreateTableStmt),
    CreateIndex(ast::CreateIndexStmt),
    DropIndex(SmolStr),
    Begin,
    Commit,
    Rollback,
    Savepoint(SmolStr),
    Release(SmolStr),
    RollbackTo(SmolStr),
}

pub struct Statement<'c> {
    conn: &'c Connection,
    body: Body,
}

impl<'c> Statement<'c> {
    pub(crate) fn prepare(conn: &'c Connection, stmt: &ast::Statement) -> QuereusResult<Self> {
        let body = match stmt {
            ast::Statement::Select(_) | ast::Statement::Insert(_) | ast::Statement::Update(_) | ast::Statement::Delete(_) => {
                let planner = Planner::new(conn);
                let plan = planner.build_statement(stmt)?;
                Body::Plan(quereus_planner::optimize(plan)?)
            }
            ast::Statement::CreateTable(s) => Body::CreateTable(s.clone()),
            ast::Statement::CreateIndex(s) => Body::CreateIndex(s.clone()),
            ast::Statement::DropIndex { name } => Body::DropIndex(name.clone()),
            ast::Statement::Begin => Body::Begin,
            ast::Statement::Commit => Body::Commit,
            ast::Statement::Rollback => Body::Rollback,
            ast::Statement::Savepoint { name } => Body::Savepoint(name.clone()),
            ast::Statement::Release { name } => Body::Release(name.clone()),
            ast::Statement::RollbackTo { name } => Body::RollbackTo(name.clone()),
        };
        Ok(Self { conn, body })
    }

    /// Runs the statement, binding `params` to any `?`/`:name` parameter
    /// references the plan contains. DDL and transaction-control
    /// statements ignore `params` and run immediately; the returned
    /// sequence is already exhausted, carrying a single affected-row-count
    /// row for uniformity with the DML case.
    pub fn run(&self, params: BoundParams) -> QuereusResult<RowSequence<'c>> {
        match &self.body {
            Body::Plan(plan) => {
                let ctx = ExecContext::new(Arc::new(params), self.conn.db.aggregates.clone());
                let (stream, _attrs) = emit(plan.clone(), ctx)?;
                Ok(RowSequence::tracked(self.conn, stream))
            }
            Body::CreateTable(s) => self.run_create_table(s),
            Body::CreateIndex(s) => self.run_create_index(s),
            Body::DropIndex(name) => self.run_drop_index(name),
            Body::Begin => {
                self.conn.coordinator.borrow_mut().begin_explicit()?;
                Ok(RowSequence::immediate(0))
            }
            Body::Commit => {
                self.conn.coordinator.borrow_mut().commit()?;
                Ok(RowSequence::immediate(0))
            }
            Body::Rollback => {
                self.conn.coordinator.borrow_mut().rollback();
                Ok(RowSequence::immediate(0))
            }
            Body::Savepoint(name) => {
                self.conn.coordinator.borrow_mut().savepoint(name.clone())?;
                Ok(RowSequence::immediate(0))
            }
            Body::Release(name) => {
                self.conn.coordinator.borrow_mut().release(name)?;
                Ok(RowSequence::immediate(0))
            }
            Body::RollbackTo(name) => {
                self.conn.coordinator.borrow_mut().rollback_to(name)?;
                Ok(RowSequence::immediate(0))
            }
        }
    }

    fn run_create_table(&self, stmt: &ast::CreateTableStmt) -> QuereusResult<RowSequence<'c>> {
        let mut schemas = self.conn.db.schemas.write();
        if schemas.contains_key(stmt.name.as_str()) {
            if stmt.if_not_exists {
                return Ok(RowSequence::immediate(0));
            }
            return Err(QuereusError::Misuse { message: format!("table {} already exists", stmt.name) });
        }
        let columns: Vec<ColumnDef> = stmt.columns.clone();
        let check_constraints = stmt
            .check_constraints
            .iter()
            .map(|(name, expr)| {
                Ok(CheckConstraint { name: name.clone(), expr: compile_check(expr, &columns)? })
            })
            .collect::<QuereusResult<Vec<_>>>()?;
        let schema = TableSchema {
            schema_name: SmolStr::new("main"),
            table_name: stmt.name.clone(),
            columns,
            primary_key: stmt.primary_key.clone(),
            secondary_indexes: Vec::new(),
            check_constraints,
            module_name: SmolStr::new(&self.conn.db.config.default_module),
        };
        schemas.insert(stmt.name.clone(), schema);
        Ok(RowSequence::immediate(0))
    }

    fn run_create_index(&self, stmt: &ast::CreateIndexStmt) -> QuereusResult<RowSequence<'c>> {
        let table = self.conn.open_table(&stmt.table)?;
        let schema = table.schema();
        let mut columns = Vec::with_capacity(stmt.columns.len());
        for name in &stmt.columns {
            let idx = schema
                .column_index(name)
                .ok_or_else(|| QuereusError::Resolution { message: format!("no such column: {name}") })?;
            columns.push(idx);
        }
        table.create_index(&stmt.name, &columns)?;
        self.conn.db.schemas.write().insert(stmt.table.clone(), table.schema());
        self.conn.db.index_owners.write().insert(stmt.name.clone(), stmt.table.clone());
        Ok(RowSequence::immediate(0))
    }

    fn run_drop_index(&self, name: &SmolStr) -> QuereusResult<RowSequence<'c>> {
        let owner = self
            .conn
            .db
            .index_owners
            .write()
            .shift_remove(name)
            .ok_or_else(|| QuereusError::Resolution { message: format!("no such index: {name}") })?;
        let table = self.conn.open_table(&owner)?;
        table.drop_index(name)?;
        self.conn.db.schemas.write().insert(owner, table.schema());
        Ok(RowSequence::immediate(0))
    }
}

/// The lazy row sequence `Statement::run` hands back. A `SELECT`
/// produces one row per result row; `INSERT`/`UPDATE`/`DELETE` produce a
/// single row holding the affected-row count; DDL and transaction
/// control produce a single zero row, for a uniform return type across
/// every statement kind.
pub struct RowSequence<'c> {
    conn: Option<&'c Connection>,
    inner: RowStream,
    finished: bool,
}

impl<'c> RowSequence<'c> {
    fn tracked(conn: &'c Connection, inner: RowStream) -> Self {
        Self { conn: Some(conn), inner, finished: false }
    }

    fn immediate(affected: i64) -> Self {
        Self { conn: None, inner: Box::new(std::iter::once(Ok(Row::new(vec![Value::Integer(affected)])))), finished: false }
    }
}

impl Iterator for RowSequence<'_> {
    type Item = QuereusResult<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.inner.next() {
            Some(Ok(row)) => Some(Ok(row)),
            Some(Err(e)) => {
                self.finished = true;
                if let Some(conn) = self.conn {
                    let _ = conn.end_statement(false);
                }
                Some(Err(e))
            }
            None => {
                self.finished = true;
                match self.conn {
                    Some(conn) => match conn.end_statement(true) {
                        Ok(()) => None,
                        Err(e) => Some(Err(e)),
                    },
                    None => None,
                }
            }
        }
    }
}

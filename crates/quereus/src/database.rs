//! The engine entry point: owns the module registry, the schema
//! registry (DDL metadata is out of this crate's scope per §6, but
//! something still has to remember what `CREATE TABLE` just declared
//! until the table is first opened), and the aggregate registry every
//! connection's execution context shares.

use std::sync::Arc;

use quereus_core::TableSchema;
use quereus_helpers::IndexMap;
use quereus_runtime::aggregate::AggregateRegistry;
use quereus_storage::InMemoryModule;
use quereus_vtab::Module;
use smol_str::SmolStr;

use crate::config::EngineConfig;
use crate::connection::Connection;

pub(crate) struct DatabaseInner {
    pub(crate) modules: parking_lot::RwLock<IndexMap<String, Arc<dyn Module>>>,
    pub(crate) schemas: parking_lot::RwLock<IndexMap<SmolStr, TableSchema>>,
    /// Index name → owning table name. `ast::Statement::DropIndex` names
    /// only the index (mirroring real SQL's `DROP INDEX ix`), so this is
    /// where that name gets resolved back to a table.
    pub(crate) index_owners: parking_lot::RwLock<IndexMap<SmolStr, SmolStr>>,
    pub(crate) aggregates: Arc<AggregateRegistry>,
    pub(crate) config: EngineConfig,
}

/// An open engine instance. Cheap to clone (an `Arc` around the shared
/// registries); every `Connection` opened from it sees the same tables.
#[derive(Clone)]
pub struct Database(pub(crate) Arc<DatabaseInner>);

impl Database {
    /// Opens an engine instance with `config`, pre-registering the
    /// reference in-memory module under `config.default_module`.
    pub fn open(config: EngineConfig) -> Self {
        let mut modules: IndexMap<String, Arc<dyn Module>> = IndexMap::default();
        modules.insert(config.default_module.clone(), Arc::new(InMemoryModule::new()));
        Self(Arc::new(DatabaseInner {
            modules: parking_lot::RwLock::new(modules),
            schemas: parking_lot::RwLock::new(IndexMap::default()),
            index_owners: parking_lot::RwLock::new(IndexMap::default()),
            aggregates: Arc::new(AggregateRegistry::with_builtins()),
            config,
        }))
    }

    /// Registers an additional virtual-table module an embedder supplies
    /// (a non-memory backend, a table-valued function source, ...) under
    /// `name`, the identifier a future `CREATE TABLE ... USING name`
    /// would name.
    pub fn register_module(&self, name: impl Into<String>, module: Arc<dyn Module>) {
        self.0.modules.write().insert(name.into(), module);
    }

    /// Opens a new session. Every `Connection` has its own autocommit
    /// state and savepoint stack; tables are shared through the module
    /// registry, not through the connection.
    pub fn connect(&self) -> Connection {
        Connection::new(self.0.clone())
    }

    pub fn close(self) {}
}

impl Default for Database {
    fn default() -> Self {
        Self::open(EngineConfig::default())
    }
}

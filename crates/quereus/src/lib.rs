//! The embeddable SQL query engine facade (§6 External Interfaces):
//! `Database`/`Connection`/`Statement`, built over the MVCC storage
//! engine (`quereus-storage`), the planner/optimizer (`quereus-planner`)
//! and the streaming runtime (`quereus-runtime`).
//!
//! This crate does not parse SQL text. An embedder's own front end (or a
//! test, as in `tests/end_to_end.rs`) builds a `quereus_planner::ast::Statement`
//! by hand and hands it to `Connection::prepare`/`exec`; `ast` is
//! re-exported here as the seam a real parser's output is adapted to.

pub mod config;
pub mod connection;
pub mod coordinator;
pub mod database;
pub mod logger;
pub mod statement;

pub use config::EngineConfig;
pub use connection::Connection;
pub use database::Database;
pub use quereus_core::{QuereusError, QuereusResult};
pub use quereus_planner::ast;
pub use quereus_runtime::BoundParams;
pub use statement::{RowSequence, Statement};

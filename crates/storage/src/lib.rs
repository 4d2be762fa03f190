//! MVCC layer stack and table manager for the in-memory virtual-table
//! module: the storage half of the engine, built on the ordered tree and
//! key codec from `quereus-keycodec`.

pub mod inmemory;
pub mod keys;
pub mod layer;
pub mod manager;
pub mod validate;

pub use inmemory::InMemoryModule;
pub use layer::{Layer, LayerKind, PRIMARY_INDEX};
pub use manager::{Connection, TableManager};

//! How a `Planner` looks up tables and CTEs by name. The facade crate
//! implements this over its schema registry; tests implement it directly
//! over a handful of hand-built tables.

use quereus_core::{QuereusResult, TableSchema};
use quereus_vtab::VirtualTable;
use std::sync::Arc;

pub trait Catalog {
    /// Resolves `schema.name` (schema defaults to whatever the catalog
    /// treats as current, usually `"main"`) to a live table handle plus
    /// its schema.
    fn resolve_table(&self, schema: Option<&str>, name: &str) -> QuereusResult<(Arc<dyn VirtualTable>, TableSchema)>;
}

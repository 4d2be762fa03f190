//! The module/table/cursor virtual-table contract: the seam between the
//! planner/runtime and a concrete table implementation (the in-memory
//! module, or anything else an embedder registers).

pub mod best_index;
pub mod capabilities;
pub mod mutation;
pub mod traits;

pub use best_index::{BestIndexInput, BestIndexPlan, Constraint, ConstraintOp, ConstraintUsage, OrderingTerm};
pub use capabilities::Capabilities;
pub use mutation::{MutationOp, UpdateResult};
pub use traits::{Cursor, Module, VirtualTable};

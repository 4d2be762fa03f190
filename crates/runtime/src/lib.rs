//! The streaming execution runtime: turns an optimized plan tree into a
//! lazily-pulled sequence of rows.
//!
//! `emit` is the entry point external callers drive; everything else
//! here is internal machinery it leans on (scalar evaluation, the
//! aggregate/window engines, the DML drivers, and the row-context stack
//! that makes a correlated subquery's outer-row references resolve
//! without threading them through every function signature by hand).

pub mod aggregate;
pub mod check;
pub mod dml;
pub mod emit;
pub mod eval;
pub mod row_context;
pub mod scalar_functions;
pub mod window;

pub use emit::{emit, BoundParams, ExecContext, RowStream};
pub use row_context::RowContext;

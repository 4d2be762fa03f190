use quereus_core::{ConstraintKind, Row};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationOp {
    Insert,
    Update,
    Delete,
}

/// The outcome of `VirtualTable::mutate`. Deliberately not an `Err` case
/// of the engine's `QuereusError`: a unique-constraint hit or a missing
/// target row is an expected outcome a conflict policy may resolve
/// without the mutation being an exceptional failure. Callers convert
/// `Constraint` into an error themselves when the active policy is
/// `Abort`/`Fail`/`Rollback`.
#[derive(Debug, Clone)]
pub enum UpdateResult {
    /// The mutation applied. `row_id` is populated for `Insert` when the
    /// table assigns one.
    Applied { row_id: Option<i64>, affected: u64 },
    /// `Ignore` conflict policy absorbed a would-be conflict: no row
    /// changed, but this isn't a failure.
    Ignored,
    /// An insert collided with an existing row at the same primary key.
    Constraint { kind: ConstraintKind, message: String, existing: Option<Row> },
    /// An update or delete targeted a row that no longer has an effective
    /// value (already deleted, or never existed).
    NotFound,
}

//! The stack of "currently active row" frames a scalar expression
//! resolves `ColumnReference`s against. Every relational operator that
//! produces rows (a `TableScan`, an `Aggregate`'s group, a `Join`'s
//! combined row) pushes one frame before evaluating any scalar that may
//! reference its output, and pops it via the guard's `Drop` impl —
//! grounded on `quereus_helpers::ScopeStack`'s guaranteed-release push,
//! the same shape `enter_panic` uses for its own (fixed, thread-local)
//! stack.

use quereus_core::{AttrId, QuereusError, QuereusResult, Row, RowDescriptor};
use quereus_helpers::{ScopeGuard, ScopeStack};

struct Frame {
    descriptor: RowDescriptor,
    row: Row,
}

/// Resolves `AttrId`s to values by walking its frame stack from the top
/// (innermost, most-recently-pushed row) down — the same order name
/// resolution walks `Scope`'s outer chain, so a correlated subquery's
/// inner row shadows the outer query's row for any attribute both
/// happen to describe.
#[derive(Clone, Default)]
pub struct RowContext {
    frames: ScopeStack<Frame>,
}

/// Held by the caller that pushed a frame; dropping it pops the frame,
/// even if evaluation partway through panics or an iterator is dropped
/// before reaching its end.
#[must_use]
pub struct DescriptorGuard(ScopeGuard<Frame>);

impl RowContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, descriptor: RowDescriptor, row: Row) -> DescriptorGuard {
        DescriptorGuard(self.frames.push(Frame { descriptor, row }))
    }

    /// Resolves `attr` by walking frames from the top (innermost) down,
    /// so an inner row shadows an outer one for any attribute both
    /// happen to describe — mirrors `Scope::resolve`'s inner-wins rule
    /// at plan-build time.
    pub fn resolve(&self, attr: AttrId) -> QuereusResult<quereus_core::Value> {
        let mut depth = self.frames.depth();
        while depth > 0 {
            depth -= 1;
            let frame = self.frames.get(depth).expect("depth < current stack length");
            if let Some(pos) = frame.descriptor.position(attr) {
                return frame.row.get(pos).cloned().ok_or_else(|| {
                    QuereusError::internal(format!("row descriptor position {pos} out of range for its row"))
                });
            }
        }
        Err(QuereusError::internal(format!("attribute {attr:?} not visible in the current row context")))
    }
}

use quereus_core::{SortDirection, Value};

/// A comparison operator a `Filter` predicate can offer to a table's
/// `best_index` for possible pushdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintOp {
    Eq,
    Lt,
    Le,
    Gt,
    Ge,
    Is,
    IsNot,
    Like,
    Glob,
    Regexp,
    Match,
    IsNull,
    IsNotNull,
}

/// One constraint extracted from a conjunction above a table scan. `value`
/// is `None` for the unary operators (`IsNull`/`IsNotNull`); `usable` is
/// `false` when the planner cannot actually bind this constraint (e.g. the
/// comparison value depends on a column from the same scan), offered to
/// `best_index` anyway so a module can see the full shape of the predicate.
#[derive(Debug, Clone)]
pub struct Constraint {
    pub column: usize,
    pub op: ConstraintOp,
    pub value: Option<Value>,
    pub usable: bool,
}

/// One requested output ordering column.
#[derive(Debug, Clone, Copy)]
pub struct OrderingTerm {
    pub column: usize,
    pub direction: SortDirection,
}

/// What the optimizer offers a table when asking it to choose an access
/// path.
#[derive(Debug, Clone, Default)]
pub struct BestIndexInput {
    pub constraints: Vec<Constraint>,
    pub order_by: Vec<OrderingTerm>,
}

/// Per-constraint usage the table reports back: whether it will bind the
/// constraint's value as a `filter` argument (`argv_index`, 0-based
/// position in the argument vector passed to `Cursor::filter`), and
/// whether the table's own scan already guarantees the constraint so the
/// caller may omit the verification predicate (`omit`). When `omit` is
/// `false` the caller must still apply the predicate itself — the table's
/// scan may return rows that merely overlap it.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConstraintUsage {
    pub argv_index: Option<u32>,
    pub omit: bool,
}

/// The table's chosen access path, returned from `best_index`.
#[derive(Debug, Clone)]
pub struct BestIndexPlan {
    pub idx_num: i32,
    pub idx_str: Option<String>,
    pub constraint_usage: Vec<ConstraintUsage>,
    pub estimated_cost: f64,
    pub estimated_rows: u64,
    pub order_by_consumed: bool,
}

impl BestIndexPlan {
    /// A full-scan fallback: no constraints used, no ordering claimed.
    /// Modules return this from `best_index` when nothing in the offered
    /// input matches an index they maintain.
    pub fn full_scan(constraint_count: usize, estimated_rows: u64) -> Self {
        Self {
            idx_num: 0,
            idx_str: None,
            constraint_usage: vec![ConstraintUsage::default(); constraint_count],
            estimated_cost: estimated_rows as f64,
            estimated_rows,
            order_by_consumed: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_scan_claims_nothing() {
        let plan = BestIndexPlan::full_scan(3, 100);
        assert_eq!(plan.constraint_usage.len(), 3);
        assert!(plan.constraint_usage.iter().all(|u| !u.omit && u.argv_index.is_none()));
        assert!(!plan.order_by_consumed);
    }
}

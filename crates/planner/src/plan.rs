//! The relational-algebra plan tree a `Planner` builds from a `Statement`
//! and an optimizer rewrites. Every node that produces rows carries the
//! `AttrId`s of the columns it produces, in order, so a later node can
//! reference them via `ColumnReference` without re-resolving names.

use std::sync::Arc;

use quereus_core::{AttrId, ConflictPolicy, LogicalType, SortDirection, TableSchema, Value};
use quereus_vtab::VirtualTable;
use smol_str::SmolStr;

use crate::ast::{BinaryOp, FrameBound, JoinKind, SetOp, UnaryOp};

pub type PlanRef = Arc<PlanNode>;
pub type ScalarRef = Arc<ScalarNode>;

/// A relational node: something that produces a stream of rows. Not
/// `Debug` itself since it carries `Arc<dyn VirtualTable>` handles; use
/// `describe()` (builder.rs) to render a plan for logging/EXPLAIN.
#[derive(Clone)]
pub enum PlanNode {
    TableScan {
        table: Arc<dyn VirtualTable>,
        schema: TableSchema,
        output: Vec<AttrId>,
        filter: Option<PushedFilter>,
    },
    TableFunctionCall {
        name: SmolStr,
        args: Vec<ScalarRef>,
        output: Vec<AttrId>,
    },
    Values {
        rows: Vec<Vec<ScalarRef>>,
        output: Vec<AttrId>,
    },
    SingleRow,
    Filter {
        input: PlanRef,
        predicate: ScalarRef,
    },
    Project {
        input: PlanRef,
        /// `(expression, output attribute)` pairs, in output order.
        columns: Vec<(ScalarRef, AttrId)>,
    },
    Distinct {
        input: PlanRef,
    },
    Sort {
        input: PlanRef,
        keys: Vec<(ScalarRef, SortDirection)>,
    },
    Aggregate {
        input: PlanRef,
        group_by: Vec<ScalarRef>,
        /// The attribute id the output row publishes each `group_by`
        /// expression's value under, in the same order — the builder
        /// allocates one per grouping key so later clauses (HAVING, the
        /// projection, ORDER BY) can reference a group column by id
        /// rather than re-evaluating the grouping expression.
        group_attrs: Vec<AttrId>,
        aggregates: Vec<(ScalarRef, AttrId)>,
        having: Option<ScalarRef>,
    },
    Window {
        input: PlanRef,
        functions: Vec<WindowFunctionSpec>,
    },
    LimitOffset {
        input: PlanRef,
        limit: Option<ScalarRef>,
        offset: Option<ScalarRef>,
    },
    Join {
        left: PlanRef,
        right: PlanRef,
        kind: JoinKind,
        condition: Option<ScalarRef>,
    },
    SetOperation {
        op: SetOp,
        left: PlanRef,
        right: PlanRef,
    },
    CteReference {
        name: SmolStr,
        /// The CTE body's own plan, re-used (not re-planned) at every
        /// `FROM` site that names it — non-recursive CTEs only, so one
        /// `plan` per definition is unambiguous.
        plan: PlanRef,
        output: Vec<AttrId>,
    },
    Insert {
        table: Arc<dyn VirtualTable>,
        schema: TableSchema,
        source: PlanRef,
        column_mapping: Vec<usize>,
        on_conflict: ConflictPolicy,
    },
    Update {
        table: Arc<dyn VirtualTable>,
        schema: TableSchema,
        source: PlanRef,
        assignments: Vec<(usize, ScalarRef)>,
        on_conflict: ConflictPolicy,
    },
    Delete {
        table: Arc<dyn VirtualTable>,
        schema: TableSchema,
        source: PlanRef,
    },
    /// Inserted by the optimizer between a `Filter` and a `TableScan` when
    /// `best_index` left constraints unverified (`omit == false`).
    VerifyConstraints {
        input: PlanRef,
        residual: ScalarRef,
    },
}

/// Constraints pushed into a `TableScan` via `best_index`, recorded so
/// `VerifyConstraints` (or a re-plan) knows what still needs checking.
#[derive(Debug, Clone)]
pub struct PushedFilter {
    pub idx_num: i32,
    pub idx_str: Option<String>,
    pub args: Vec<ScalarRef>,
}

#[derive(Debug, Clone)]
pub struct WindowFunctionSpec {
    pub function: ScalarRef,
    pub partition_by: Vec<ScalarRef>,
    pub order_by: Vec<(ScalarRef, SortDirection)>,
    pub frame: Option<(FrameBound, FrameBound)>,
    pub output: AttrId,
}

/// A scalar node: something that evaluates to one `Value` given a row
/// context.
#[derive(Debug, Clone)]
pub enum ScalarNode {
    Literal(Value),
    ColumnReference(AttrId),
    ParameterReference(ParamSlot),
    UnaryOp { op: UnaryOp, operand: ScalarRef },
    BinaryOp { op: BinaryOp, left: ScalarRef, right: ScalarRef },
    Collate { expr: ScalarRef, collation: SmolStr },
    Cast { expr: ScalarRef, ty: LogicalType },
    Case { operand: Option<ScalarRef>, whens: Vec<(ScalarRef, ScalarRef)>, else_expr: Option<ScalarRef> },
    ScalarFunctionCall { name: SmolStr, args: Vec<ScalarRef> },
    AggregateFunctionCall { name: SmolStr, args: Vec<ScalarRef>, distinct: bool, output: AttrId },
    WindowFunctionCall { name: SmolStr, args: Vec<ScalarRef>, distinct: bool, output: AttrId },
    In { expr: ScalarRef, list: Vec<ScalarRef>, negated: bool },
    /// `expr IN (SELECT ...)`. Kept distinct from `In` (whose `list` is a
    /// fixed set of scalar expressions) because membership against a
    /// subquery's result set needs its own three-valued-NULL handling:
    /// the emitter runs `subquery`, collects its first column, and
    /// substitutes the membership test's result before scalar evaluation
    /// reaches this node.
    InSubquery { expr: ScalarRef, subquery: PlanRef, negated: bool },
    Exists { subquery: PlanRef, negated: bool },
    /// A `(SELECT ...)` used where a single value is expected. Resolved by
    /// the emitter the same way `Exists` is: run `subquery`, take the
    /// first row's first column, or `NULL` if it produced none.
    ScalarSubquery { subquery: PlanRef },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamSlot {
    Positional(u32),
    Named(u32),
}

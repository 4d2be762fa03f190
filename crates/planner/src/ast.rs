//! A parser-agnostic statement tree. This crate does not parse SQL text
//! itself; a front end builds one of these and hands it to `Planner`.
//! Shapes mirror the surface grammar closely enough that a recursive-
//! descent parser can build them directly, node by node.

use quereus_core::Value;
use smol_str::SmolStr;

#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Select(SelectStmt),
    Insert(InsertStmt),
    Update(UpdateStmt),
    Delete(DeleteStmt),
    CreateTable(CreateTableStmt),
    CreateIndex(CreateIndexStmt),
    DropIndex { name: SmolStr },
    Begin,
    Commit,
    Rollback,
    Savepoint { name: SmolStr },
    Release { name: SmolStr },
    RollbackTo { name: SmolStr },
}

#[derive(Debug, Clone, PartialEq)]
pub struct SelectStmt {
    pub ctes: Vec<CteDef>,
    pub core: SelectCore,
    /// Additional `(set_op, core)` pairs for a compound `UNION`/`INTERSECT`/
    /// `EXCEPT` chain; empty for a simple `SELECT`.
    pub compound: Vec<(SetOp, SelectCore)>,
    pub order_by: Vec<OrderByItem>,
    pub limit: Option<Expr>,
    pub offset: Option<Expr>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetOp {
    Union,
    UnionAll,
    Intersect,
    Except,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CteDef {
    pub name: SmolStr,
    pub column_names: Option<Vec<SmolStr>>,
    pub body: Box<SelectStmt>,
    pub recursive: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SelectCore {
    pub distinct: bool,
    pub columns: Vec<SelectItem>,
    pub from: Option<FromClause>,
    pub where_clause: Option<Expr>,
    pub group_by: Vec<Expr>,
    pub having: Option<Expr>,
    pub window_defs: Vec<NamedWindowDef>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SelectItem {
    /// `expr [AS alias]`
    Expr { expr: Expr, alias: Option<SmolStr> },
    /// `*` or `table.*`
    Wildcard { qualifier: Option<SmolStr> },
}

#[derive(Debug, Clone, PartialEq)]
pub enum FromClause {
    Table { schema: Option<SmolStr>, name: SmolStr, alias: Option<SmolStr> },
    Subquery { body: Box<SelectStmt>, alias: SmolStr },
    TableFunction { name: SmolStr, args: Vec<Expr>, alias: Option<SmolStr> },
    Join { left: Box<FromClause>, right: Box<FromClause>, kind: JoinKind, condition: Option<Expr> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    Left,
    Cross,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderByItem {
    pub expr: Expr,
    pub descending: bool,
    pub nulls_first: Option<bool>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NamedWindowDef {
    pub name: SmolStr,
    pub spec: WindowSpec,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WindowSpec {
    pub partition_by: Vec<Expr>,
    pub order_by: Vec<OrderByItem>,
    pub frame: Option<WindowFrame>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowFrame {
    pub start: FrameBound,
    pub end: FrameBound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameBound {
    UnboundedPreceding,
    Preceding(u64),
    CurrentRow,
    Following(u64),
    UnboundedFollowing,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InsertStmt {
    pub table: SmolStr,
    pub columns: Option<Vec<SmolStr>>,
    pub source: InsertSource,
    pub on_conflict: quereus_core::ConflictPolicy,
}

#[derive(Debug, Clone, PartialEq)]
pub enum InsertSource {
    Values(Vec<Vec<Expr>>),
    Select(Box<SelectStmt>),
    DefaultValues,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpdateStmt {
    pub table: SmolStr,
    pub alias: Option<SmolStr>,
    pub assignments: Vec<(SmolStr, Expr)>,
    pub where_clause: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeleteStmt {
    pub table: SmolStr,
    pub alias: Option<SmolStr>,
    pub where_clause: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreateTableStmt {
    pub name: SmolStr,
    pub columns: Vec<quereus_core::ColumnDef>,
    pub primary_key: quereus_core::KeyDef,
    /// Row-level `CHECK` clauses (§3's table schema field); compiled into
    /// `quereus_core::CheckPredicate`s by whoever turns this statement
    /// into a `TableSchema` (the `quereus` facade crate's
    /// `run_create_table`, via `quereus_runtime::check::compile_check`),
    /// since this crate's `Planner` never evaluates expressions itself.
    pub check_constraints: Vec<(Option<SmolStr>, Expr)>,
    pub if_not_exists: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreateIndexStmt {
    pub name: SmolStr,
    pub table: SmolStr,
    pub columns: Vec<SmolStr>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Column { qualifier: Option<SmolStr>, name: SmolStr },
    Parameter(ParamRef),
    Unary { op: UnaryOp, operand: Box<Expr> },
    Binary { op: BinaryOp, left: Box<Expr>, right: Box<Expr> },
    Collate { expr: Box<Expr>, collation: SmolStr },
    Cast { expr: Box<Expr>, ty: quereus_core::LogicalType },
    Case { operand: Option<Box<Expr>>, whens: Vec<(Expr, Expr)>, else_expr: Option<Box<Expr>> },
    FunctionCall { name: SmolStr, args: Vec<Expr>, distinct: bool, filter: Option<Box<Expr>>, over: Option<WindowRef> },
    In { expr: Box<Expr>, list: InList, negated: bool },
    Exists { subquery: Box<SelectStmt>, negated: bool },
    ScalarSubquery(Box<SelectStmt>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ParamRef {
    Positional(u32),
    Named(SmolStr),
}

#[derive(Debug, Clone, PartialEq)]
pub enum InList {
    Exprs(Vec<Expr>),
    Subquery(Box<SelectStmt>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum WindowRef {
    Named(SmolStr),
    Inline(WindowSpec),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Negate,
    Not,
    IsNull,
    IsNotNull,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Concat,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    And,
    Or,
    Like,
    Glob,
}

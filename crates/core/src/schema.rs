use std::sync::Arc;

use smol_str::SmolStr;

use crate::errors::QuereusResult;
use crate::value::Value;

/// The logical type a column was declared with. The runtime `Value` tag is
/// not necessarily this type (SQL is dynamically typed per-value); this
/// drives default-value coercion and `CAST` behavior in the planner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum LogicalType {
    Integer,
    Real,
    Text,
    Blob,
    Boolean,
    Numeric,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Collation {
    Binary,
    NoCase,
    Rtrim,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SortDirection {
    Ascending,
    Descending,
}

#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ColumnDef {
    pub name: SmolStr,
    pub logical_type: LogicalType,
    pub nullable: bool,
    pub default: Option<crate::value::Value>,
    pub collation: Collation,
    /// Set on computed/generated columns; such columns never accept a
    /// user-supplied value on INSERT.
    pub generated: bool,
}

impl ColumnDef {
    pub fn new(name: impl Into<SmolStr>, logical_type: LogicalType) -> Self {
        Self {
            name: name.into(),
            logical_type,
            nullable: true,
            default: None,
            collation: Collation::Binary,
            generated: false,
        }
    }
}

/// An ordered sequence of column indices (with direction), as used by both
/// the primary key and secondary indexes.
#[derive(Debug, Clone)]
pub struct KeyDef {
    pub columns: Vec<(usize, SortDirection)>,
}

impl KeyDef {
    pub fn single(column: usize) -> Self {
        Self {
            columns: vec![(column, SortDirection::Ascending)],
        }
    }

    pub fn column_indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.columns.iter().map(|(i, _)| *i)
    }
}

#[derive(Debug, Clone)]
pub struct IndexDef {
    pub name: SmolStr,
    pub key: KeyDef,
    pub collation: Collation,
}

/// A row-level `CHECK` constraint. The expression type is supplied by the
/// planner crate; the schema only needs to carry it opaquely for the
/// mutation path to re-evaluate on every write.
#[derive(Debug, Clone)]
pub struct CheckConstraint<Expr> {
    pub name: Option<SmolStr>,
    pub expr: Expr,
}

/// A compiled `CHECK` predicate: takes the candidate row's values and
/// reports whether the constraint is satisfied (SQL truthiness — a CHECK
/// whose expression evaluates to NULL is treated as satisfied, matching
/// the standard NOT NULL-handling of `CHECK`). Boxed as an opaque
/// closure so `quereus-core` never has to know about the planner's
/// expression tree: `quereus-runtime::check::compile_check` produces one
/// from an `ast::Expr` and a column list, and the table schema only ever
/// carries the already-compiled form.
#[derive(Clone)]
pub struct CheckPredicate(pub Arc<dyn Fn(&[Value]) -> QuereusResult<bool> + Send + Sync>);

impl CheckPredicate {
    pub fn new(f: impl Fn(&[Value]) -> QuereusResult<bool> + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    pub fn evaluate(&self, row: &[Value]) -> QuereusResult<bool> {
        (self.0)(row)
    }
}

impl std::fmt::Debug for CheckPredicate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("CheckPredicate(..)")
    }
}

/// A full table schema, handed to the engine by whatever DDL layer an
/// embedder provides (DDL persistence is out of this crate's scope, per
/// the engine's external-interfaces contract).
///
/// Invariant: primary-key column indices are always valid against
/// `columns`; an embedder must not rename or drop a primary-key column
/// without rebuilding the schema (and hence the table) from scratch.
#[derive(Debug, Clone)]
pub struct TableSchema {
    pub schema_name: SmolStr,
    pub table_name: SmolStr,
    pub columns: Vec<ColumnDef>,
    pub primary_key: KeyDef,
    pub secondary_indexes: Vec<IndexDef>,
    pub check_constraints: Vec<CheckConstraint<CheckPredicate>>,
    pub module_name: SmolStr,
}

impl TableSchema {
    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// `true` when the primary key is the implicit rowid rather than a
    /// projection over declared columns (i.e. no column in `columns` was
    /// marked as the PK at schema-construction time).
    pub fn has_rowid_alias(&self) -> bool {
        self.primary_key.columns.is_empty()
    }
}

/// What to do when a write would violate a UNIQUE/PRIMARY KEY constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConflictPolicy {
    #[default]
    Abort,
    Ignore,
    Replace,
    Fail,
    Rollback,
}

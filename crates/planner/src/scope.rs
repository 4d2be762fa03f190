//! Name resolution: mapping the column names visible at a point in a
//! `SELECT` (its FROM/JOIN tree, outer queries for a correlated
//! subquery) to the `AttrId`s a plan references.

use std::sync::atomic::{AtomicU32, Ordering};

use quereus_core::{AttrId, QuereusError, QuereusResult};
use smol_str::SmolStr;

/// Owns the `AttrId` namespace for one planning session. Not a process-
/// wide static: two independently constructed `Planner`s must not
/// collide, since a plan from one is never merged with a plan from the
/// other.
#[derive(Default)]
pub struct AttrAllocator(AtomicU32);

impl AttrAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&self) -> AttrId {
        AttrId(self.0.fetch_add(1, Ordering::Relaxed))
    }
}

/// One column visible in a scope: its name, the table alias (if any) that
/// introduced it, and the attribute id a plan node will emit it under.
#[derive(Debug, Clone)]
pub struct ScopeColumn {
    pub table: Option<SmolStr>,
    pub name: SmolStr,
    pub attr: AttrId,
}

/// The columns visible at one point in a query: the current FROM/JOIN
/// tree, plus a chain of outer scopes for correlated subquery references.
pub struct Scope<'a> {
    pub columns: Vec<ScopeColumn>,
    pub outer: Option<&'a Scope<'a>>,
}

impl<'a> Scope<'a> {
    pub fn new(columns: Vec<ScopeColumn>) -> Self {
        Scope { columns, outer: None }
    }

    pub fn nested(columns: Vec<ScopeColumn>, outer: &'a Scope<'a>) -> Self {
        Scope { columns, outer: Some(outer) }
    }

    /// Resolves `qualifier.name` (or bare `name`) to exactly one
    /// `AttrId`, searching this scope before falling back to outer
    /// scopes. An unqualified name matching more than one column in the
    /// same scope is ambiguous; a name found in both this scope and an
    /// outer one is not — the inner binding wins, which is how a
    /// correlated subquery shadows its outer query's columns.
    pub fn resolve(&self, qualifier: Option<&str>, name: &str) -> QuereusResult<AttrId> {
        let matches: Vec<&ScopeColumn> = self
            .columns
            .iter()
            .filter(|c| {
                c.name.as_str().eq_ignore_ascii_case(name)
                    && qualifier.is_none_or(|q| c.table.as_deref().is_some_and(|t| t.eq_ignore_ascii_case(q)))
            })
            .collect();

        match matches.as_slice() {
            [one] => Ok(one.attr),
            [] => match self.outer {
                Some(outer) => outer.resolve(qualifier, name),
                None => Err(QuereusError::Resolution { message: format!("no such column: {}", qualified(qualifier, name)) }),
            },
            _ => Err(QuereusError::Resolution { message: format!("ambiguous column name: {}", qualified(qualifier, name)) }),
        }
    }
}

fn qualified(qualifier: Option<&str>, name: &str) -> String {
    match qualifier {
        Some(q) => format!("{q}.{name}"),
        None => name.to_string(),
    }
}

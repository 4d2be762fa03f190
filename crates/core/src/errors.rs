use std::fmt;
use std::sync::Arc;

use crate::row::Row;

/// The engine's error taxonomy. One enum, not one Rust type per kind: each
/// variant carries whatever payload that kind of failure needs, and every
/// failure can carry an optional SQL source location and underlying cause —
/// mirrored here the same way the corpus's own `SQLBaseError` carries a
/// `description` + position marker regardless of which rule produced it.
#[derive(Debug, Clone, thiserror::Error)]
pub enum QuereusError {
    #[error("parse error: {message}")]
    Parse { message: String },

    #[error("{message}")]
    Resolution { message: String },

    #[error("type error: {message}")]
    Type { message: String },

    #[error("constraint violation ({kind:?}): {message}")]
    Constraint {
        kind: ConstraintKind,
        message: String,
        /// The row that already occupies the key, for a UNIQUE violation.
        existing: Option<Row>,
    },

    #[error("attempt to write a read-only table: {table}")]
    ReadOnly { table: String },

    #[error("busy: {message}")]
    Busy { message: String },

    #[error("concurrent update: {message}")]
    ConcurrentUpdate { message: String },

    #[error("misuse: {message}")]
    Misuse { message: String },

    #[error("internal error: {message}")]
    Internal { message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintKind {
    Unique,
    NotNull,
    Check,
    ForeignKey,
}

impl QuereusError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            QuereusError::Parse { .. } => ErrorKind::Parse,
            QuereusError::Resolution { .. } => ErrorKind::Resolution,
            QuereusError::Type { .. } => ErrorKind::Type,
            QuereusError::Constraint { .. } => ErrorKind::Constraint,
            QuereusError::ReadOnly { .. } => ErrorKind::ReadOnly,
            QuereusError::Busy { .. } => ErrorKind::Busy,
            QuereusError::ConcurrentUpdate { .. } => ErrorKind::ConcurrentUpdate,
            QuereusError::Misuse { .. } => ErrorKind::Misuse,
            QuereusError::Internal { .. } => ErrorKind::Internal,
        }
    }

    /// `true` for `Internal`: such a failure aborts the whole transaction
    /// rather than merely the current statement.
    pub fn aborts_transaction(&self) -> bool {
        matches!(self, QuereusError::Internal { .. })
    }

    pub fn internal(message: impl Into<String>) -> Self {
        QuereusError::Internal { message: message.into() }
    }

    pub fn busy(message: impl Into<String>) -> Self {
        QuereusError::Busy { message: message.into() }
    }

    pub fn concurrent_update(message: impl Into<String>) -> Self {
        QuereusError::ConcurrentUpdate { message: message.into() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Parse,
    Resolution,
    Type,
    Constraint,
    ReadOnly,
    Busy,
    ConcurrentUpdate,
    Misuse,
    Internal,
}

/// A user-visible failure report: message, kind, optional SQL location,
/// optional cause — everything a failed statement needs to produce.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub error: QuereusError,
    pub location: Option<SourceLocation>,
    pub cause: Option<Arc<QuereusError>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceLocation {
    pub line: u32,
    pub column: u32,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)?;
        if let Some(loc) = self.location {
            write!(f, " at {}:{}", loc.line, loc.column)?;
        }
        if let Some(cause) = &self.cause {
            write!(f, " (caused by: {cause})")?;
        }
        Ok(())
    }
}

pub type QuereusResult<T> = Result<T, QuereusError>;

#[derive(Debug, Clone, thiserror::Error)]
#[error("value cannot be encoded as a SQL key: {reason}")]
pub struct EncodingError {
    pub reason: String,
}

pub mod attribute;
pub mod errors;
pub mod row;
pub mod schema;
pub mod value;

pub use attribute::{AttrId, Attribute, RowDescriptor};
pub use errors::{ConstraintKind, Diagnostic, ErrorKind, EncodingError, QuereusError, QuereusResult, SourceLocation};
pub use row::Row;
pub use schema::{
    CheckConstraint, CheckPredicate, Collation, ColumnDef, ConflictPolicy, IndexDef, KeyDef,
    LogicalType, SortDirection, TableSchema,
};
pub use value::{sql_compare, Value};

use quereus_helpers::IndexMap;
use smol_str::SmolStr;

use crate::schema::LogicalType;

/// A planner-level identity for a column produced by one plan node.
/// Stable across optimizer rewrites: a node that republishes a column
/// (e.g. `Project` passing a column through unchanged) forwards the
/// attribute id of its source rather than minting a new one, so downstream
/// `ColumnReference`s keep resolving correctly after rewrites.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AttrId(pub u32);

#[derive(Debug, Clone)]
pub struct Attribute {
    pub id: AttrId,
    pub name: SmolStr,
    pub logical_type: LogicalType,
}

/// Maps attribute ids to their position in a row produced by some plan
/// node. A runtime row-context may have several descriptors stacked at
/// once, so a correlated subquery or a `HAVING` filter can resolve a
/// column reference against whichever row is currently active for that
/// attribute's producing node (`quereus-runtime::RowContext`).
#[derive(Debug, Clone, Default)]
pub struct RowDescriptor {
    positions: IndexMap<AttrId, usize>,
}

impl RowDescriptor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_attributes(attrs: &[Attribute]) -> Self {
        let mut positions = IndexMap::default();
        for (i, attr) in attrs.iter().enumerate() {
            positions.insert(attr.id, i);
        }
        Self { positions }
    }

    /// As `from_attributes`, for call sites that only have bare ids (a
    /// plan node's `output: Vec<AttrId>`) and no `Attribute` metadata.
    pub fn from_attr_ids(ids: &[AttrId]) -> Self {
        let mut positions = IndexMap::default();
        for (i, id) in ids.iter().enumerate() {
            positions.insert(*id, i);
        }
        Self { positions }
    }

    pub fn position(&self, attr: AttrId) -> Option<usize> {
        self.positions.get(&attr).copied()
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}

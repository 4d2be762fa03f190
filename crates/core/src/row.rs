use std::sync::Arc;

use crate::value::Value;

/// An immutable, ordered sequence of values produced by a relational
/// operator. Rows are reference-counted rather than deep-cloned: the same
/// physical row commonly flows unchanged through several operators (e.g. a
/// `Filter` above a `TableScan` republishes the scan's row verbatim), and an
/// `Arc<[Value]>` lets every stage of the pipeline share it.
#[derive(Debug, Clone, PartialEq)]
pub struct Row(Arc<[Value]>);

impl Row {
    pub fn new(values: Vec<Value>) -> Self {
        Self(Arc::from(values))
    }

    pub fn values(&self) -> &[Value] {
        &self.0
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.0.get(index)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Projects a subset of columns into a new row, used when building a
    /// composite key or a GROUP BY key tuple from a source row.
    pub fn project(&self, indices: &[usize]) -> Row {
        Row::new(indices.iter().map(|&i| self.0[i].clone()).collect())
    }
}

impl From<Vec<Value>> for Row {
    fn from(values: Vec<Value>) -> Self {
        Row::new(values)
    }
}

impl FromIterator<Value> for Row {
    fn from_iter<T: IntoIterator<Item = Value>>(iter: T) -> Self {
        Row::new(iter.into_iter().collect())
    }
}

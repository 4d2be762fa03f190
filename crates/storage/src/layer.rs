use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use quereus_core::Row;
use quereus_helpers::IndexMap;
use quereus_keycodec::InheritingMap;
use smol_str::SmolStr;

/// Identifies which ordered tree within a layer a key belongs to: the
/// table's primary tree, or one of its secondary indexes.
pub const PRIMARY_INDEX: &str = "$primary";

type Tree = InheritingMap<Vec<u8>, Row>;

enum TreeSlot {
    /// Being written to by at most one connection; not yet committed.
    Mutable(Tree),
    /// Committed: read-only, freely shared by concurrent scans via the
    /// `Arc`, and usable as another layer's inheritance parent.
    Frozen(Arc<Tree>),
}

impl TreeSlot {
    fn child_of(parent: &TreeSlot) -> TreeSlot {
        match parent {
            TreeSlot::Frozen(tree) => TreeSlot::Mutable(Tree::new_child(tree.clone())),
            TreeSlot::Mutable(_) => {
                unreachable!("a layer used as an inheritance parent is always frozen first")
            }
        }
    }

    fn freeze(&mut self) {
        if let TreeSlot::Mutable(tree) = self {
            let tree = std::mem::replace(tree, Tree::new());
            *self = TreeSlot::Frozen(Arc::new(tree));
        }
    }

    fn as_mut(&mut self) -> &mut Tree {
        match self {
            TreeSlot::Mutable(tree) => tree,
            TreeSlot::Frozen(_) => panic!("attempted to write a frozen layer"),
        }
    }

    fn view(&self) -> TreeView<'_> {
        match self {
            TreeSlot::Mutable(tree) => TreeView::Borrowed(tree),
            TreeSlot::Frozen(tree) => TreeView::Shared(tree.clone()),
        }
    }
}

/// A read-only handle to a tree regardless of whether its owning layer is
/// still mutable (borrowed in place) or frozen (cheaply `Arc`-shared).
pub enum TreeView<'a> {
    Borrowed(&'a Tree),
    Shared(Arc<Tree>),
}

impl TreeView<'_> {
    pub fn get(&self, key: &[u8]) -> Option<Row> {
        match self {
            TreeView::Borrowed(t) => t.get(&key.to_vec()),
            TreeView::Shared(t) => t.get(&key.to_vec()),
        }
    }

    pub fn range(&self, lo: &[u8], hi: &[u8]) -> Vec<(Vec<u8>, Row)> {
        if lo > hi {
            return Vec::new();
        }
        match self {
            TreeView::Borrowed(t) => t.range(lo.to_vec()..=hi.to_vec()),
            TreeView::Shared(t) => t.range(lo.to_vec()..=hi.to_vec()),
        }
    }

    pub fn range_all(&self) -> Vec<(Vec<u8>, Row)> {
        match self {
            TreeView::Borrowed(t) => t.range(..),
            TreeView::Shared(t) => t.range(..),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerKind {
    Base,
    Transaction,
}

/// One versioned snapshot of a table's data: either the
/// table's immutable root, or a transaction layer inheriting from a
/// parent layer one tree per index.
pub struct Layer {
    pub id: u64,
    pub kind: LayerKind,
    parent: RwLock<Option<Arc<Layer>>>,
    frozen: AtomicBool,
    trees: RwLock<IndexMap<SmolStr, TreeSlot>>,
}

impl Layer {
    /// The table's root. Created empty and frozen immediately: nothing
    /// ever writes to the base directly, only transaction layers rooted
    /// at it do, so there is no mutable phase to model.
    pub fn new_base(id: u64, index_names: impl IntoIterator<Item = SmolStr>) -> Arc<Layer> {
        let mut trees = IndexMap::default();
        trees.insert(SmolStr::new(PRIMARY_INDEX), TreeSlot::Frozen(Arc::new(Tree::new())));
        for name in index_names {
            trees.insert(name, TreeSlot::Frozen(Arc::new(Tree::new())));
        }
        Arc::new(Layer {
            id,
            kind: LayerKind::Base,
            parent: RwLock::new(None),
            frozen: AtomicBool::new(true),
            trees: RwLock::new(trees),
        })
    }

    /// A new, mutable transaction layer rooted at `parent`, which must
    /// already be frozen (the table's base, or a previously committed
    /// transaction layer).
    pub fn new_child(id: u64, parent: Arc<Layer>) -> Layer {
        let parent_trees = parent.trees.read();
        let mut trees = IndexMap::default();
        for (name, slot) in parent_trees.iter() {
            trees.insert(name.clone(), TreeSlot::child_of(slot));
        }
        drop(parent_trees);
        Layer {
            id,
            kind: LayerKind::Transaction,
            parent: RwLock::new(Some(parent)),
            frozen: AtomicBool::new(false),
            trees: RwLock::new(trees),
        }
    }

    pub fn parent(&self) -> Option<Arc<Layer>> {
        self.parent.read().clone()
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen.load(Ordering::Acquire)
    }

    /// `true` if `ancestor` is this layer or appears somewhere in its
    /// parent chain — used by the commit protocol's parent-chain check.
    pub fn chain_contains(&self, ancestor_id: u64) -> bool {
        self.id == ancestor_id || self.parent.read().as_ref().is_some_and(|p| p.chain_contains(ancestor_id))
    }

    /// The strong reference count of this layer's parent `Arc`, or 0 if
    /// it has none. Used by collapse as a proxy for "no connection (or
    /// savepoint snapshot) still references the parent chain" — any such
    /// reference manifests as an extra clone of this `Arc`.
    pub fn parent_strong_count(&self) -> usize {
        self.parent.read().as_ref().map_or(0, Arc::strong_count)
    }

    pub fn get(&self, index: &str, key: &[u8]) -> Option<Row> {
        self.trees.read().get(index).map(|slot| slot.view()).and_then(|v| v.get(key))
    }

    pub fn range(&self, index: &str, lo: &[u8], hi: &[u8]) -> Vec<(Vec<u8>, Row)> {
        match self.trees.read().get(index) {
            Some(slot) => slot.view().range(lo, hi),
            None => Vec::new(),
        }
    }

    pub fn range_all(&self, index: &str) -> Vec<(Vec<u8>, Row)> {
        match self.trees.read().get(index) {
            Some(slot) => slot.view().range_all(),
            None => Vec::new(),
        }
    }

    /// Records an override in `index`'s tree. Returns the prior effective
    /// row, if any.
    pub fn insert(&self, index: &str, key: Vec<u8>, row: Row) -> Option<Row> {
        let mut trees = self.trees.write();
        trees.get_mut(index).map(|slot| slot.as_mut().insert(key, row)).flatten()
    }

    pub fn tombstone(&self, index: &str, key: Vec<u8>) -> Option<Row> {
        let mut trees = self.trees.write();
        trees.get_mut(index).map(|slot| slot.as_mut().tombstone(key)).flatten()
    }

    /// Marks the layer committed: every tree's mutable phase ends and
    /// becomes immutable and freely shareable.
    pub fn freeze(&self) {
        let mut trees = self.trees.write();
        for slot in trees.values_mut() {
            slot.freeze();
        }
        self.frozen.store(true, Ordering::Release);
    }

    /// Materializes this layer's effective view (merged with its whole
    /// ancestor chain) into its own trees and detaches its parent. Used
    /// by collapse once nothing still references the parent chain.
    pub fn clear_base(&self) {
        let mut parent = self.parent.write();
        if parent.is_none() {
            return;
        }
        let mut trees = self.trees.write();
        for slot in trees.values_mut() {
            match slot {
                TreeSlot::Frozen(tree) => {
                    let mut materialized = Tree::new();
                    for (k, v) in tree.range(..) {
                        materialized.insert(k, v);
                    }
                    *slot = TreeSlot::Frozen(Arc::new(materialized));
                }
                TreeSlot::Mutable(tree) => tree.clear_base(),
            }
        }
        *parent = None;
    }

    pub fn index_names(&self) -> Vec<SmolStr> {
        self.trees.read().keys().cloned().collect()
    }

    /// Installs a brand-new, pre-populated, already-frozen tree under
    /// `name`. Used by `create_secondary_index` to add an index to a
    /// table that already has rows, without ever putting a mutable phase
    /// on the base layer: the tree is built up front and swapped in whole.
    pub fn seed_index(&self, name: SmolStr, entries: Vec<(Vec<u8>, Row)>) {
        let mut tree = Tree::new();
        for (key, row) in entries {
            tree.insert(key, row);
        }
        self.trees.write().insert(name, TreeSlot::Frozen(Arc::new(tree)));
    }

    /// Drops an index's tree entirely. A no-op if the name isn't tracked.
    pub fn drop_index(&self, name: &str) {
        self.trees.write().shift_remove(name);
    }

    /// Overwrites this layer's trees with `source`'s effective view,
    /// index by index. Used to fold a committed transaction layer's data
    /// back into the table's literal base layer during schema-change
    /// consolidation — the one place a frozen layer's
    /// contents are replaced wholesale rather than inherited from.
    pub fn absorb(&self, source: &Layer) {
        let mut trees = self.trees.write();
        for name in source.index_names() {
            let mut materialized = Tree::new();
            for (k, v) in source.range_all(&name) {
                materialized.insert(k, v);
            }
            trees.insert(name, TreeSlot::Frozen(Arc::new(materialized)));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use quereus_core::Value;

    fn row(v: i64) -> Row {
        Row::new(vec![Value::Integer(v)])
    }

    #[test]
    fn base_starts_empty_and_frozen() {
        let base = Layer::new_base(0, []);
        assert!(base.is_frozen());
        assert_eq!(base.range_all(PRIMARY_INDEX), vec![]);
    }

    #[test]
    fn child_shadows_and_freezes_independently() {
        let base = Layer::new_base(0, []);

        let txn = Layer::new_child(1, base.clone());
        txn.insert(PRIMARY_INDEX, vec![2], row(2));
        assert_eq!(txn.get(PRIMARY_INDEX, &[2]), Some(row(2)));
        assert_eq!(base.get(PRIMARY_INDEX, &[2]), None);
        txn.freeze();
        assert!(txn.is_frozen());
    }

    #[test]
    fn clear_base_materializes_then_drops_parent() {
        let base = Layer::new_base(0, []);
        let mid = Layer::new_child(1, base.clone());
        mid.insert(PRIMARY_INDEX, vec![1], row(1));
        mid.freeze();
        let mid = Arc::new(mid);

        let top = Layer::new_child(2, mid.clone());
        top.insert(PRIMARY_INDEX, vec![2], row(2));
        // Drop the local handle so `top.parent` is the only remaining
        // reference, the condition collapse checks for.
        drop(mid);
        assert_eq!(top.parent_strong_count(), 1);

        top.clear_base();

        assert_eq!(top.parent_strong_count(), 0);
        assert!(top.parent().is_none());
        // Ancestor data survives, now folded into `top` directly.
        assert_eq!(top.get(PRIMARY_INDEX, &[1]), Some(row(1)));
        assert_eq!(top.get(PRIMARY_INDEX, &[2]), Some(row(2)));
    }

    #[test]
    fn chain_contains_walks_ancestors() {
        let base = Layer::new_base(0, []);
        let mid = Arc::new(Layer::new_child(1, base.clone()));
        mid.freeze();
        let top = Layer::new_child(2, mid.clone());

        assert!(top.chain_contains(0));
        assert!(top.chain_contains(1));
        assert!(top.chain_contains(2));
        assert!(!top.chain_contains(99));
    }
}

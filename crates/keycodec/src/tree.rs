use std::collections::BTreeMap;
use std::ops::RangeBounds;
use std::sync::Arc;

/// An ordered map that may inherit from a parent snapshot instead of
/// copying it. Each layer stores only what it changed — `Some(v)` for an
/// insert/update, `None` as a tombstone shadowing whatever the same key
/// holds in an ancestor — so a transaction layer built over a large base
/// costs only the size of its own edits.
///
/// Lookups and range scans walk from `self` toward the root, and the
/// first layer that mentions a key wins: a child's tombstone hides an
/// ancestor's live value, and a child's insert shadows an ancestor's
/// value of the same key without touching it.
#[derive(Debug)]
pub struct InheritingMap<K, V> {
    parent: Option<Arc<InheritingMap<K, V>>>,
    entries: BTreeMap<K, Option<V>>,
}

impl<K, V> InheritingMap<K, V>
where
    K: Ord + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self { parent: None, entries: BTreeMap::new() }
    }

    /// Builds a new, empty layer whose reads fall through to `parent`.
    pub fn new_child(parent: Arc<InheritingMap<K, V>>) -> Self {
        Self { parent: Some(parent), entries: BTreeMap::new() }
    }

    pub fn parent(&self) -> Option<&Arc<InheritingMap<K, V>>> {
        self.parent.as_ref()
    }

    /// Records an override on the local tree. Returns the prior effective
    /// value (local if present, else inherited), for change tracking.
    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        let prior = self.get(&key);
        self.entries.insert(key, Some(value));
        prior
    }

    /// Records that `key` is absent in this layer, shadowing whatever an
    /// ancestor holds for it. A no-op ancestor-side: nothing upstream is
    /// mutated. Returns the prior effective value, if any.
    pub fn tombstone(&mut self, key: K) -> Option<V> {
        let prior = self.get(&key);
        self.entries.insert(key, None);
        prior
    }

    pub fn get(&self, key: &K) -> Option<V> {
        if let Some(slot) = self.entries.get(key) {
            return slot.clone();
        }
        self.parent.as_ref().and_then(|p| p.get(key))
    }

    pub fn contains(&self, key: &K) -> bool {
        self.get(key).is_some()
    }

    /// Live entries within `bounds`, nearest layer winning per key. Walks
    /// the whole ancestor chain, so this is O(chain depth + matching keys)
    /// — the storage layer is expected to consolidate long chains rather
    /// than let `range` absorb the cost indefinitely.
    pub fn range<R>(&self, bounds: R) -> Vec<(K, V)>
    where
        R: RangeBounds<K> + Clone,
    {
        let mut merged: BTreeMap<K, Option<V>> = BTreeMap::new();
        let mut chain = Vec::new();
        let mut cursor = Some(self);
        while let Some(layer) = cursor {
            chain.push(layer);
            cursor = layer.parent.as_deref();
        }
        // Apply from the root inward so a child's entry for a key
        // overwrites whatever an ancestor wrote for that same key.
        for layer in chain.into_iter().rev() {
            for (k, v) in layer.entries.range(bounds.clone()) {
                merged.insert(k.clone(), v.clone());
            }
        }
        merged
            .into_iter()
            .filter_map(|(k, v)| v.map(|v| (k, v)))
            .collect()
    }

    /// This layer's own entry count, including tombstones — not the
    /// effective count across the chain; callers that need the latter
    /// aggregate via `range`/`effective_count` themselves.
    pub fn count(&self) -> usize {
        self.entries.len()
    }

    /// Number of live keys visible through this layer within `bounds`.
    pub fn effective_count<R>(&self, bounds: R) -> usize
    where
        R: RangeBounds<K> + Clone,
    {
        self.range(bounds).len()
    }

    /// Materializes the current effective view (this layer merged with
    /// its whole ancestor chain) into local storage, then detaches the
    /// parent pointer. After this call the layer is independent and the
    /// former parent chain may be reclaimed once no other reader holds
    /// it.
    pub fn clear_base(&mut self) {
        if self.parent.is_none() {
            return;
        }
        let effective = self.range(..);
        self.entries = effective.into_iter().map(|(k, v)| (k, Some(v))).collect();
        self.parent = None;
    }

    /// This layer's own edits, without resolving against any ancestor.
    /// Used by consolidation to decide which keys still need folding in
    /// from the parent.
    pub fn own_entries(&self) -> &BTreeMap<K, Option<V>> {
        &self.entries
    }

    pub fn is_base(&self) -> bool {
        self.parent.is_none()
    }
}

impl<K, V> Default for InheritingMap<K, V>
where
    K: Ord + Clone,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn child_shadows_parent_value() {
        let mut base = InheritingMap::new();
        base.insert(1, "a");
        base.insert(2, "b");
        let base = Arc::new(base);

        let mut child = InheritingMap::new_child(base);
        child.insert(2, "b2");
        child.insert(3, "c");

        assert_eq!(child.get(&1), Some("a"));
        assert_eq!(child.get(&2), Some("b2"));
        assert_eq!(child.get(&3), Some("c"));
    }

    #[test]
    fn tombstone_hides_ancestor_value() {
        let mut base = InheritingMap::new();
        base.insert(1, "a");
        let base = Arc::new(base);

        let mut child = InheritingMap::new_child(base);
        child.tombstone(1);

        assert_eq!(child.get(&1), None);
    }

    #[test]
    fn range_merges_across_generations() {
        let mut base = InheritingMap::new();
        base.insert(1, "a");
        base.insert(2, "b");
        base.insert(3, "c");
        let base = Arc::new(base);

        let mut mid = InheritingMap::new_child(base);
        mid.tombstone(2);
        mid.insert(4, "d");
        let mid = Arc::new(mid);

        let mut top = InheritingMap::new_child(mid);
        top.insert(3, "c2");

        let mut all = top.range(..);
        all.sort();
        assert_eq!(all, vec![(1, "a"), (3, "c2"), (4, "d")]);
    }

    #[test]
    fn range_respects_bounds() {
        let mut base = InheritingMap::new();
        for i in 0..10 {
            base.insert(i, i * 10);
        }
        let mut items = base.range(3..6);
        items.sort();
        assert_eq!(items, vec![(3, 30), (4, 40), (5, 50)]);
    }

    #[test]
    fn clear_base_detaches_from_ancestors() {
        let mut base = InheritingMap::new();
        base.insert(1, "a");
        let base = Arc::new(base);

        let mut child = InheritingMap::new_child(base);
        child.insert(2, "b");
        child.clear_base();

        assert!(child.is_base());
        assert_eq!(child.get(&1), Some("a"));
        assert_eq!(child.get(&2), Some("b"));
        assert_eq!(child.count(), 2);
    }

    #[test]
    fn count_is_local_not_effective() {
        let mut base = InheritingMap::new();
        base.insert(1, "a");
        base.insert(2, "b");
        let base = Arc::new(base);

        let mut child = InheritingMap::new_child(base);
        child.tombstone(1);

        // Locally, the child only has its own tombstone entry.
        assert_eq!(child.count(), 1);
        // Effectively, only key 2 is live.
        assert_eq!(child.effective_count(..), 1);
    }
}

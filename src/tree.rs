//! The enclosing B+Tree root object (spec §6): tree-wide metadata (height,
//! root recid, entry count, comparator, serializers) plus the orchestration
//! that the page engine itself leaves to "the enclosing tree" —
//! `first_insert` and `root_overflow` promotion, and collapsing the root
//! after a merge cascade empties it down to one child.

use crate::cursor::Cursor;
use crate::error::{Error, Result};
use crate::ops::{self, Context};
use crate::page::Page;
use crate::record_manager::{Recid, RecordManager, NULL_RECID};
use crate::serializer::{Comparator, KeySerializer, NaturalOrder, ValueSerializer};

pub struct BPlusTree<K, V, RM> {
    cap: usize,
    max_intree_record_size: usize,
    load_values: bool,
    comparator: Box<dyn Comparator<K>>,
    key_ser: Box<dyn KeySerializer<K>>,
    value_ser: Box<dyn ValueSerializer<V>>,
    record_manager: RM,
    root: Recid,
    height: usize,
    len: usize,
}

impl<K, V, RM: RecordManager> BPlusTree<K, V, RM> {
    pub fn new(
        cap: usize,
        max_intree_record_size: usize,
        comparator: Box<dyn Comparator<K>>,
        key_ser: Box<dyn KeySerializer<K>>,
        value_ser: Box<dyn ValueSerializer<V>>,
        record_manager: RM,
    ) -> Self {
        assert!(cap >= 4 && cap % 2 == 0, "page capacity must be an even number >= 4");
        Self {
            cap,
            max_intree_record_size,
            load_values: true,
            comparator,
            key_ser,
            value_ser,
            record_manager,
            root: NULL_RECID,
            height: 0,
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn ctx(&mut self) -> Context<'_, K, V> {
        Context {
            cap: self.cap,
            max_intree_record_size: self.max_intree_record_size,
            load_values: self.load_values,
            comparator: self.comparator.as_ref(),
            key_ser: self.key_ser.as_ref(),
            value_ser: self.value_ser.as_ref(),
            record_manager: &mut self.record_manager,
        }
    }

    pub fn find_value(&mut self, key: &K) -> Result<Option<V>>
    where
        K: Clone,
        V: Clone,
    {
        if self.root == NULL_RECID {
            return Ok(None);
        }
        let (root, height) = (self.root, self.height);
        let mut ctx = self.ctx();
        ops::find_value(&mut ctx, root, height, key)
    }

    pub fn find_first(&mut self) -> Result<Option<Cursor<K, V>>>
    where
        K: Clone,
        V: Clone,
    {
        if self.root == NULL_RECID {
            return Ok(None);
        }
        let (root, height) = (self.root, self.height);
        let mut ctx = self.ctx();
        let pos = ops::find_first(&mut ctx, root, height)?;
        Ok(Some(Cursor::new(pos.page, pos.slot)))
    }

    pub fn find(&mut self, key: &K) -> Result<Option<Cursor<K, V>>>
    where
        K: Clone,
        V: Clone,
    {
        if self.root == NULL_RECID {
            return Ok(None);
        }
        let (root, height) = (self.root, self.height);
        let mut ctx = self.ctx();
        let pos = ops::find(&mut ctx, root, height, key)?;
        Ok(Some(Cursor::new(pos.page, pos.slot)))
    }

    /// Advances `cursor`, threading the tree's collaborators (comparator,
    /// serializers, record manager) through to it. A cursor cannot step
    /// itself; only the owning tree can assemble what it needs.
    pub fn cursor_next(&mut self, cursor: &mut Cursor<K, V>) -> Result<Option<(K, V)>>
    where
        K: Clone,
        V: Clone,
    {
        let mut ctx = self.ctx();
        cursor.next(&mut ctx)
    }

    /// Backward counterpart of [`Self::cursor_next`].
    pub fn cursor_previous(&mut self, cursor: &mut Cursor<K, V>) -> Result<Option<(K, V)>>
    where
        K: Clone,
        V: Clone,
    {
        let mut ctx = self.ctx();
        cursor.previous(&mut ctx)
    }

    /// spec §6 `insert(root, height, key, value, replace) -> InsertResult`,
    /// plus the bootstrapping (`first_insert`) and root-overflow promotion
    /// the enclosing tree is responsible for.
    pub fn insert(&mut self, key: K, value: V, replace: bool) -> Result<Option<V>>
    where
        K: Clone,
        V: Clone,
    {
        if self.root == NULL_RECID {
            self.first_insert(key, value)?;
            return Ok(None);
        }
        let (root, height) = (self.root, self.height);
        let mut ctx = self.ctx();
        let outcome = ops::insert(&mut ctx, root, height, &key, value, replace)?;
        if let Some(overflow_recid) = outcome.overflow {
            self.root_overflow(overflow_recid)?;
        }
        if outcome.existing.is_none() {
            self.len += 1;
        }
        Ok(outcome.existing)
    }

    /// Bootstraps the very first entry: a fresh leaf at 50% fill
    /// (`first = CAP/2`), leaving room for `HALF-1` more plain inserts
    /// before the next one must split.
    fn first_insert(&mut self, key: K, value: V) -> Result<()>
    where
        K: Clone,
    {
        let half = self.cap / 2;
        let mut page: Page<K, V> = Page::new_leaf(NULL_RECID, self.cap);
        page.first = half;
        page.set_entry(half, Some(key), crate::page::PageValue::Inline(value));
        let mut ctx = self.ctx();
        let recid = ctx.allocate(&page)?;
        self.root = recid;
        self.height = 1;
        self.len = 1;
        Ok(())
    }

    /// spec §4.3 "Root overflow promotion": wraps the old root and its
    /// new sibling under a fresh two-child non-leaf root.
    fn root_overflow(&mut self, overflow_recid: Recid) -> Result<()>
    where
        K: Clone,
    {
        let old_root = self.root;
        let cap = self.cap;
        let mut ctx = self.ctx();
        let overflow_page = ctx.fetch(overflow_recid, true)?;
        let old_root_page = ctx.fetch(old_root, true)?;
        let overflow_key = overflow_page.boundary_key().cloned();
        let old_root_key = old_root_page.boundary_key().cloned();

        let mut new_root: Page<K, V> = Page::new_non_leaf(NULL_RECID, cap);
        new_root.first = cap - 2;
        new_root.set_child(cap - 2, overflow_key, overflow_recid);
        new_root.set_child(cap - 1, old_root_key, old_root);

        let new_root_recid = ctx.allocate(&new_root)?;
        self.root = new_root_recid;
        self.height += 1;
        Ok(())
    }

    /// spec §6 `remove(root, height, key) -> RemoveResult`, plus the
    /// root-collapse the enclosing tree performs when a non-leaf root's
    /// live region shrinks to a single child.
    pub fn remove(&mut self, key: &K) -> Result<V>
    where
        K: Clone,
        V: Clone,
    {
        if self.root == NULL_RECID {
            return Err(Error::NotFound);
        }
        let (root, height) = (self.root, self.height);
        let mut ctx = self.ctx();
        let outcome = ops::remove(&mut ctx, root, height, key)?;

        if height > 1 {
            let mut ctx = self.ctx();
            let root_page = ctx.fetch(root, true)?;
            if root_page.fill() == 1 {
                let only_child = root_page.children[root_page.first];
                ctx.destroy(root)?;
                self.root = only_child;
                self.height -= 1;
            }
        }
        self.len -= 1;
        outcome.value.ok_or(Error::NotFound)
    }

    /// spec §4.7: rebuilds the tree's storage into `dst`, compacting away
    /// deleted/fragmented space while preserving every recid (including
    /// `self.root`, so the caller can swap `dst` in as the new backend
    /// without updating anything else).
    pub fn defrag<RM2: RecordManager>(&mut self, dst: &mut RM2) -> Result<()> {
        if self.root == NULL_RECID {
            return Ok(());
        }
        ops::defrag(&mut self.record_manager, dst, self.cap, self.key_ser.as_ref(), self.value_ser.as_ref(), self.root, self.height)
    }

    /// Full-tree recursive destruction (spec §4.4).
    pub fn clear(&mut self) -> Result<()> {
        if self.root == NULL_RECID {
            return Ok(());
        }
        let (root, height) = (self.root, self.height);
        let mut ctx = self.ctx();
        ops::delete_tree(&mut ctx, root, height)?;
        self.root = NULL_RECID;
        self.height = 0;
        self.len = 0;
        Ok(())
    }
}

/// Convenience constructor for the common case: natural key order, the
/// default serde-backed object serializer for both key and value.
pub fn with_default_serializers<K, V, RM>(cap: usize, max_intree_record_size: usize, record_manager: RM) -> BPlusTree<K, V, RM>
where
    K: Ord + serde::Serialize + serde::de::DeserializeOwned + 'static,
    V: serde::Serialize + serde::de::DeserializeOwned + 'static,
    RM: RecordManager,
{
    BPlusTree::new(
        cap,
        max_intree_record_size,
        Box::new(NaturalOrder),
        Box::new(crate::serializer::DefaultSerializer::<K>::default()),
        Box::new(crate::serializer::DefaultSerializer::<V>::default()),
        record_manager,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record_manager::MemRecordManager;
    use proptest::prelude::*;

    fn new_tree() -> BPlusTree<i32, i32, MemRecordManager> {
        with_default_serializers(4, 64, MemRecordManager::new())
    }

    fn forward_keys(tree: &mut BPlusTree<i32, i32, MemRecordManager>) -> Vec<i32> {
        let mut out = Vec::new();
        let Some(mut cursor) = tree.find_first().unwrap() else {
            return out;
        };
        let mut ctx = tree.ctx();
        while let Some((k, _)) = cursor.next(&mut ctx).unwrap() {
            out.push(k);
        }
        out
    }

    #[test]
    fn s1_first_insert() {
        let mut tree = new_tree();
        assert_eq!(tree.insert(10, 100, false).unwrap(), None);
        assert_eq!(tree.find_value(&10).unwrap(), Some(100));
        assert_eq!(tree.find_value(&7).unwrap(), None);
        assert_eq!(tree.height, 1);

        let root_recid = tree.root;
        let mut ctx = tree.ctx();
        let root = ctx.fetch(root_recid, true).unwrap();
        assert_eq!(root.first, 2);
        assert_eq!(root.keys, vec![None, None, Some(10), None]);
        assert_eq!(root.previous, 0);
        assert_eq!(root.next, 0);
    }

    #[test]
    fn s2_leaf_split() {
        let mut tree = new_tree();
        tree.insert(10, 100, false).unwrap();
        tree.insert(20, 200, false).unwrap();
        tree.insert(30, 300, false).unwrap();
        tree.insert(40, 400, false).unwrap();

        assert_eq!(tree.height, 2);
        assert_eq!(tree.find_value(&30).unwrap(), Some(300));
        assert_eq!(forward_keys(&mut tree), vec![10, 20, 30, 40]);

        let root_recid = tree.root;
        let mut ctx = tree.ctx();
        let root = ctx.fetch(root_recid, true).unwrap();
        assert_eq!(root.first, 2);
        assert_eq!(root.keys[2], Some(20));
        assert_eq!(root.keys[3], None);
    }

    #[test]
    fn s3_replace_semantics() {
        let mut tree = new_tree();
        for (k, v) in [(10, 100), (20, 200), (30, 300), (40, 400)] {
            tree.insert(k, v, false).unwrap();
        }
        let existing = tree.insert(20, 222, true).unwrap();
        assert_eq!(existing, Some(200));
        assert_eq!(tree.find_value(&20).unwrap(), Some(222));
        assert_eq!(tree.find_value(&10).unwrap(), Some(100));
        assert_eq!(tree.find_value(&30).unwrap(), Some(300));
    }

    #[test]
    fn s4_remove_triggers_merge_and_root_collapse() {
        let mut tree = new_tree();
        for (k, v) in [(10, 100), (20, 200), (30, 300), (40, 400)] {
            tree.insert(k, v, false).unwrap();
        }
        assert_eq!(tree.remove(&40).unwrap(), 400);
        assert_eq!(tree.height, 1);
        assert_eq!(forward_keys(&mut tree), vec![10, 20, 30]);
    }

    #[test]
    fn s5_remove_merge_cascade() {
        let mut tree = new_tree();
        for k in 1..=8 {
            tree.insert(k, k * 10, false).unwrap();
        }
        for k in [1, 2, 3, 4] {
            tree.remove(&k).unwrap();
        }
        assert_eq!(forward_keys(&mut tree), vec![5, 6, 7, 8]);
        assert_eq!(tree.len(), 4);
    }

    #[test]
    fn s6_large_value_becomes_lazy_record() {
        let mut tree: BPlusTree<i32, Vec<u8>, MemRecordManager> =
            with_default_serializers(4, 32, MemRecordManager::new());
        let big = vec![7u8; 64];
        tree.insert(1, big.clone(), false).unwrap();
        // the oversized value was promoted to its own record, alongside the
        // root leaf's own record
        assert_eq!(tree.record_manager.len(), 2);
        assert_eq!(tree.find_value(&1).unwrap(), Some(big.clone()));
        assert_eq!(tree.remove(&1).unwrap(), big);
        assert_eq!(tree.find_value(&1).unwrap(), None);
        // removing the entry frees the lazy record too, leaving only the
        // (now empty) root leaf
        assert_eq!(tree.record_manager.len(), 1);
    }

    #[test]
    fn defrag_preserves_recids_and_contents() {
        let mut tree = new_tree();
        for k in 1..=8 {
            tree.insert(k, k * 10, false).unwrap();
        }
        tree.remove(&3).unwrap();

        let mut dst = MemRecordManager::new();
        tree.defrag(&mut dst).unwrap();
        tree.record_manager = dst;

        assert_eq!(forward_keys(&mut tree), vec![1, 2, 4, 5, 6, 7, 8]);
        for k in [1, 2, 4, 5, 6, 7, 8] {
            assert_eq!(tree.find_value(&k).unwrap(), Some(k * 10));
        }
    }

    #[test]
    fn remove_absent_key_reports_not_found() {
        let mut tree = new_tree();
        tree.insert(10, 100, false).unwrap();
        let err = tree.remove(&999).unwrap_err();
        assert!(matches!(err, Error::NotFound));
    }

    /// Walks every non-leaf page once, asserting spec §8 property 3 (a
    /// separator key equals the largest key of its child subtree) and
    /// property 8 (every non-root page's fill stays within `[HALF-1,
    /// CAP-1]`).
    fn assert_structural_invariants(tree: &mut BPlusTree<i32, i32, MemRecordManager>) {
        if tree.root == NULL_RECID {
            return;
        }
        let half = tree.cap / 2;
        let cap = tree.cap;
        let height = tree.height;
        let root = tree.root;
        let mut ctx = tree.ctx();

        fn walk(ctx: &mut Context<'_, i32, i32>, recid: Recid, height: usize, half: usize, cap: usize, is_root: bool) -> Option<i32> {
            let page = ctx.fetch(recid, true).unwrap();
            if !is_root {
                assert!(
                    page.fill() >= half - 1 && page.fill() <= cap - 1,
                    "non-root fill {} outside [{}, {}]",
                    page.fill(),
                    half - 1,
                    cap - 1
                );
            }
            if height == 1 {
                return page.boundary_key().copied();
            }
            let mut last = None;
            for i in page.first..page.cap() {
                let child_boundary = walk(ctx, page.children[i], height - 1, half, cap, false);
                assert_eq!(page.keys[i], child_boundary, "separator mismatch at slot {i}");
                last = child_boundary;
            }
            last
        }
        walk(&mut ctx, root, height, half, cap, true);
    }

    /// Walks the leaf list left to right, asserting spec §8 property 4:
    /// `previous`/`next` are mutual inverses and leaf boundaries strictly
    /// ascend.
    fn assert_leaf_list_invariants(tree: &mut BPlusTree<i32, i32, MemRecordManager>) {
        if tree.root == NULL_RECID {
            return;
        }
        let mut recid = tree.root;
        let height = tree.height;
        let mut ctx = tree.ctx();
        for _ in 1..height {
            let page = ctx.fetch(recid, true).unwrap();
            recid = page.children[page.first];
        }
        let mut prev_recid = NULL_RECID;
        let mut prev_max: Option<i32> = None;
        loop {
            let page = ctx.fetch(recid, true).unwrap();
            assert_eq!(page.previous, prev_recid, "leaf back-pointer mismatch");
            if let (Some(pm), Some(&first_key)) = (prev_max, page.keys[page.first..page.cap()].iter().flatten().next()) {
                assert!(pm < first_key, "leaf list out of order");
            }
            prev_max = page.keys[page.first..page.cap()].iter().flatten().next_back().copied();
            prev_recid = recid;
            let next = page.next;
            if next == NULL_RECID {
                break;
            }
            recid = next;
        }
    }

    #[derive(Clone, Debug)]
    enum Op {
        Insert(i32, i32),
        Remove(i32),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        let key_range = 0i32..30;
        let value_range = 0i32..1000;
        prop_oneof![
            (key_range.clone(), value_range).prop_map(|(k, v)| Op::Insert(k, v)),
            key_range.prop_map(Op::Remove),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn structural_invariants_hold_under_random_ops(ops in prop::collection::vec(op_strategy(), 1..50)) {
            let mut tree = new_tree();
            for op in ops {
                match op {
                    Op::Insert(k, v) => {
                        let _ = tree.insert(k, v, true);
                    }
                    Op::Remove(k) => {
                        let _ = tree.remove(&k);
                    }
                }
                assert_structural_invariants(&mut tree);
                assert_leaf_list_invariants(&mut tree);
            }
        }
    }

    #[test]
    fn backward_cursor_visits_reverse_order() {
        let mut tree = new_tree();
        for k in 1..=8 {
            tree.insert(k, k * 10, false).unwrap();
        }
        // `previous` decrements before reading, so it never re-visits the
        // slot the cursor currently sits on: consume key 8 via `next`
        // first, then walk backward from there.
        let mut cursor = tree.find(&8).unwrap().unwrap();
        let mut ctx = tree.ctx();
        let (first, _) = cursor.next(&mut ctx).unwrap().unwrap();
        let mut out = vec![first];
        while let Some((k, _)) = cursor.previous(&mut ctx).unwrap() {
            out.push(k);
        }
        assert_eq!(out, vec![8, 7, 6, 5, 4, 3, 2, 1]);
    }
}

//! Recursive page operations (spec §4.2-§4.4): `find`, `find_first`,
//! `find_value`, `insert`, `remove`, `delete`. Height-driven recursion
//! over recids fetched through the [`Context`]; no page ever references
//! another except by recid.

use crate::error::{Error, Result};
use crate::format::{decode_page, encode_page};
use crate::page::{Page, PageValue};
use crate::record_manager::{Recid, RecordManager, NULL_RECID};
use crate::serializer::{Comparator, KeySerializer, ValueSerializer};

/// Everything a recursive page operation needs: the record manager, the
/// page codec's (de)serializers, the comparator, and the page capacity.
/// Mirrors the "tree context" of spec §2 item 6.
pub struct Context<'a, K, V> {
    pub cap: usize,
    pub max_intree_record_size: usize,
    pub load_values: bool,
    pub comparator: &'a dyn Comparator<K>,
    pub key_ser: &'a dyn KeySerializer<K>,
    pub value_ser: &'a dyn ValueSerializer<V>,
    pub record_manager: &'a mut dyn crate::record_manager::RecordManager,
}

impl<'a, K, V> Context<'a, K, V> {
    pub fn fetch(&mut self, recid: Recid, load_values: bool) -> Result<Page<K, V>> {
        let bytes = self.record_manager.fetch_raw(recid)?;
        decode_page(recid, &bytes, self.cap, self.key_ser, self.value_ser, load_values)
    }

    pub fn persist(&mut self, page: &Page<K, V>) -> Result<()> {
        let bytes = encode_page(page, self.key_ser, self.value_ser, self.max_intree_record_size, &mut *self.record_manager)?;
        self.record_manager.update(page.recid, bytes)
    }

    pub fn allocate(&mut self, page: &Page<K, V>) -> Result<Recid> {
        let bytes = encode_page(page, self.key_ser, self.value_ser, self.max_intree_record_size, &mut *self.record_manager)?;
        self.record_manager.insert(bytes)
    }

    pub fn destroy(&mut self, recid: Recid) -> Result<()> {
        self.record_manager.delete(recid)
    }
}

/// A leaf position, the basis of a [`crate::cursor::Cursor`].
pub struct Position<K, V> {
    pub page: Page<K, V>,
    pub slot: usize,
}

fn deref_value<K, V: Clone>(ctx: &mut Context<K, V>, value: &PageValue<V>) -> Result<Option<V>> {
    match value {
        PageValue::None => Ok(None),
        PageValue::Inline(v) => Ok(Some(v.clone())),
        PageValue::Lazy(recid) => {
            let bytes = ctx.record_manager.fetch(*recid)?;
            Ok(Some(ctx.value_ser.deserialize(&bytes)?))
        }
    }
}

/// spec §4.2: descends computing `slot = findChildren(key)` at every
/// level, returning the leaf position once `height` reaches 1.
pub fn find<K, V>(ctx: &mut Context<K, V>, root: Recid, height: usize, key: &K) -> Result<Position<K, V>> {
    let mut recid = root;
    let mut h = height;
    loop {
        let page = ctx.fetch(recid, true)?;
        let slot = page.find_children(key, ctx.comparator);
        if h == 1 {
            return Ok(Position { page, slot });
        }
        recid = page.children[slot];
        h -= 1;
    }
}

/// spec §4.2: descends the left spine (`slot = first` at every level).
pub fn find_first<K, V>(ctx: &mut Context<K, V>, root: Recid, height: usize) -> Result<Position<K, V>> {
    let mut recid = root;
    let mut h = height;
    loop {
        let page = ctx.fetch(recid, true)?;
        let slot = page.first;
        if h == 1 {
            return Ok(Position { page, slot });
        }
        recid = page.children[slot];
        h -= 1;
    }
}

/// spec §4.2: `find` plus equality check and lazy-record dereference.
pub fn find_value<K, V: Clone>(ctx: &mut Context<K, V>, root: Recid, height: usize, key: &K) -> Result<Option<V>> {
    let pos = find(ctx, root, height, key)?;
    if !pos.page.slot_equals(pos.slot, key, ctx.comparator) {
        return Ok(None);
    }
    deref_value(ctx, &pos.page.values[pos.slot])
}

pub struct InsertOutcome<V> {
    pub existing: Option<V>,
    pub overflow: Option<Recid>,
}

/// spec §4.3.
pub fn insert<K: Clone, V: Clone>(
    ctx: &mut Context<K, V>,
    recid: Recid,
    height: usize,
    key: &K,
    value: V,
    replace: bool,
) -> Result<InsertOutcome<V>> {
    let mut page = ctx.fetch(recid, true)?;
    let slot = page.find_children(key, ctx.comparator);

    if height == 1 {
        if page.slot_equals(slot, key, ctx.comparator) {
            let existing = deref_value(ctx, &page.values[slot])?;
            if replace {
                if let PageValue::Lazy(old_recid) = page.values[slot] {
                    ctx.record_manager.delete(old_recid)?;
                }
                page.set_entry(slot, Some(key.clone()), PageValue::Inline(value));
                ctx.persist(&page)?;
            }
            return Ok(InsertOutcome { existing, overflow: None });
        }
        let overflow = insert_entry_or_split_leaf(ctx, page, slot, Some(key.clone()), PageValue::Inline(value))?;
        return Ok(InsertOutcome { existing: None, overflow });
    }

    let child_recid = page.children[slot];
    let child_outcome = insert(ctx, child_recid, height - 1, key, value, replace)?;

    let overflow = match child_outcome.overflow {
        None => None,
        Some(overflow_recid) => {
            let overflow_page = ctx.fetch(overflow_recid, true)?;
            let overflow_key = overflow_page.boundary_key().cloned();
            let child_page = ctx.fetch(child_recid, true)?;
            page.keys[slot] = child_page.boundary_key().cloned();
            insert_entry_or_split_nonleaf(ctx, page, slot, overflow_key, overflow_recid)?
        }
    };
    Ok(InsertOutcome { existing: child_outcome.existing, overflow })
}

/// `slot` is the raw `find_children` result. The fast path (room exists, i.e.
/// not [`Page::is_overflowing`]) inserts immediately before it, at `slot - 1`
/// (never underflows: `first > 0` here forces `slot >= first >= 1`). The
/// split path takes `slot` as-is;
/// `split_leaf` derives its own `slot - 1` internally for the `slot >= H`
/// case, and needs the un-decremented value to handle `slot == 0`.
fn insert_entry_or_split_leaf<K: Clone, V: Clone>(
    ctx: &mut Context<K, V>,
    mut page: Page<K, V>,
    slot: usize,
    key: Option<K>,
    value: PageValue<V>,
) -> Result<Option<Recid>> {
    if !page.is_overflowing() {
        page.insert_entry(slot - 1, key, value);
        ctx.persist(&page)?;
        Ok(None)
    } else {
        Ok(Some(split_leaf(ctx, page, slot, key, value)?))
    }
}

/// See [`insert_entry_or_split_leaf`] for the `slot` vs `slot - 1` split.
fn insert_entry_or_split_nonleaf<K: Clone, V>(
    ctx: &mut Context<K, V>,
    mut page: Page<K, V>,
    slot: usize,
    key: Option<K>,
    child: Recid,
) -> Result<Option<Recid>> {
    if !page.is_overflowing() {
        page.insert_child(slot - 1, key, child);
        ctx.persist(&page)?;
        Ok(None)
    } else {
        Ok(Some(split_nonleaf(ctx, page, slot, key, child)?))
    }
}

/// spec §4.3 split, leaf variant: also splices the new sibling into the
/// leaf linked list immediately before `this`.
fn split_leaf<K: Clone, V: Clone>(
    ctx: &mut Context<K, V>,
    mut this: Page<K, V>,
    target_slot: usize,
    key: Option<K>,
    value: PageValue<V>,
) -> Result<Recid> {
    let cap = this.cap();
    let h = this.half();
    let mut new_page: Page<K, V> = Page::new_leaf(NULL_RECID, cap);

    if target_slot < h {
        this.copy_entries_to(0, &mut new_page, h, target_slot);
        new_page.set_entry(h + target_slot, key, value);
        this.copy_entries_to(target_slot, &mut new_page, h + target_slot + 1, h - 1 - target_slot);
    } else {
        this.copy_entries_to(0, &mut new_page, h, h);
        this.copy_entries_within(h, h - 1, target_slot - h);
        this.set_entry(target_slot - 1, key, value);
    }
    new_page.first = h;
    this.first = h - 1;
    this.clear_below_first();

    let old_previous_recid = this.previous;
    new_page.previous = old_previous_recid;
    new_page.next = this.recid;

    let new_recid = ctx.allocate(&new_page)?;
    this.previous = new_recid;

    if old_previous_recid != NULL_RECID {
        let mut old_previous = ctx.fetch(old_previous_recid, true)?;
        old_previous.next = new_recid;
        ctx.persist(&old_previous)?;
    }
    ctx.persist(&this)?;
    Ok(new_recid)
}

/// spec §4.3 split, non-leaf variant.
fn split_nonleaf<K: Clone, V>(ctx: &mut Context<K, V>, mut this: Page<K, V>, target_slot: usize, key: Option<K>, child: Recid) -> Result<Recid> {
    let cap = this.cap();
    let h = this.half();
    let mut new_page: Page<K, V> = Page::new_non_leaf(NULL_RECID, cap);

    if target_slot < h {
        this.copy_children_to(0, &mut new_page, h, target_slot);
        new_page.set_child(h + target_slot, key, child);
        this.copy_children_to(target_slot, &mut new_page, h + target_slot + 1, h - 1 - target_slot);
    } else {
        this.copy_children_to(0, &mut new_page, h, h);
        this.copy_children_within(h, h - 1, target_slot - h);
        this.set_child(target_slot - 1, key, child);
    }
    new_page.first = h;
    this.first = h - 1;
    this.clear_below_first();

    let new_recid = ctx.allocate(&new_page)?;
    ctx.persist(&this)?;
    Ok(new_recid)
}

pub struct RemoveOutcome<V> {
    pub value: Option<V>,
    pub underflow: bool,
}

/// spec §4.4.
pub fn remove<K: Clone, V: Clone>(ctx: &mut Context<K, V>, recid: Recid, height: usize, key: &K) -> Result<RemoveOutcome<V>> {
    let mut page = ctx.fetch(recid, true)?;
    let slot = page.find_children(key, ctx.comparator);

    if height == 1 {
        if !page.slot_equals(slot, key, ctx.comparator) {
            return Err(Error::NotFound);
        }
        let old_value = page.values[slot].clone();
        let value = deref_value(ctx, &old_value)?;
        if let PageValue::Lazy(old_recid) = old_value {
            ctx.record_manager.delete(old_recid)?;
        }
        page.remove_entry(slot);
        let underflow = page.is_underflowing();
        ctx.persist(&page)?;
        return Ok(RemoveOutcome { value, underflow });
    }

    let child_recid = page.children[slot];
    let child_outcome = remove(ctx, child_recid, height - 1, key)?;
    let child_page = ctx.fetch(child_recid, true)?;
    page.keys[slot] = child_page.boundary_key().cloned();

    if child_outcome.underflow {
        rebalance(ctx, &mut page, slot)?;
    } else {
        ctx.persist(&page)?;
    }

    let underflow = page.is_underflowing();
    Ok(RemoveOutcome { value: child_outcome.value, underflow })
}

fn rebalance<K: Clone, V: Clone>(ctx: &mut Context<K, V>, page: &mut Page<K, V>, slot: usize) -> Result<()> {
    let half = page.half();
    let cap = page.cap();
    // `slot` is always a live index, so `slot+1 < cap` alone guarantees
    // `slot+1` is live too (live slots are exactly the contiguous
    // range `[first, cap)`).
    let has_right = slot + 1 < cap;

    if has_right {
        let sibling_recid = page.children[slot + 1];
        let mut child = ctx.fetch(page.children[slot], true)?;
        let mut sibling = ctx.fetch(sibling_recid, true)?;
        if sibling.first < half {
            rotate_from_right(&mut child, &mut sibling);
            page.keys[slot] = child.boundary_key().cloned();
        } else {
            merge_into_left(ctx, page, slot, &mut child, sibling_recid, &mut sibling)?;
            ctx.persist(page)?;
            ctx.persist(&child)?;
            return Ok(());
        }
        ctx.persist(&child)?;
        ctx.persist(&sibling)?;
        ctx.persist(page)?;
        Ok(())
    } else {
        let sibling_recid = page.children[slot - 1];
        let mut sibling = ctx.fetch(sibling_recid, true)?;
        let mut child = ctx.fetch(page.children[slot], true)?;
        if sibling.first < half {
            rotate_from_left(&mut sibling, &mut child);
            page.keys[slot - 1] = sibling.boundary_key().cloned();
        } else {
            let child_recid = page.children[slot];
            merge_into_left(ctx, page, slot - 1, &mut sibling, child_recid, &mut child)?;
            ctx.persist(page)?;
            ctx.persist(&sibling)?;
            return Ok(());
        }
        ctx.persist(&sibling)?;
        ctx.persist(&child)?;
        ctx.persist(page)?;
        Ok(())
    }
}

/// `child` is to the left of `sibling`; steal `sibling`'s smallest
/// entries onto `child`'s high end.
fn rotate_from_right<K: Clone, V: Clone>(child: &mut Page<K, V>, sibling: &mut Page<K, V>) {
    let half = child.half();
    let cap = child.cap();
    let steal = (half - sibling.first + 1) / 2;

    let fill = child.fill();
    child.copy_range_within(child.first, child.first - steal, fill);
    sibling.copy_range_to(sibling.first, child, cap - steal, steal);
    child.first -= steal;
    sibling.first += steal;
    sibling.clear_below_first();
}

/// `sibling` is to the left of `child`; steal `sibling`'s largest
/// entries onto `child`'s low end.
fn rotate_from_left<K: Clone, V: Clone>(sibling: &mut Page<K, V>, child: &mut Page<K, V>) {
    let half = sibling.half();
    let cap = sibling.cap();
    let steal = (half - sibling.first + 1) / 2;

    sibling.copy_range_to(cap - steal, child, child.first - steal, steal);
    let remaining = sibling.fill() - steal;
    sibling.copy_range_within(sibling.first, sibling.first + steal, remaining);
    child.first -= steal;
    sibling.first += steal;
    sibling.clear_below_first();
}

/// Merges the page at `right_recid` into `left` (both live under `parent`
/// at adjacent slots `left_slot`/`left_slot+1`), unsplicing it from the
/// leaf list if applicable, deleting its record, and compacting `parent`.
fn merge_into_left<K: Clone, V: Clone>(
    ctx: &mut Context<K, V>,
    parent: &mut Page<K, V>,
    left_slot: usize,
    left: &mut Page<K, V>,
    right_recid: Recid,
    right: &mut Page<K, V>,
) -> Result<()> {
    let cap = left.cap();
    let left_fill = left.fill();
    let right_fill = right.fill();
    let new_first = cap - (left_fill + right_fill);
    // `right`'s keys become the merged page's new upper range, so its
    // boundary key (possibly the sentinel) is what `parent` must now
    // record for the surviving `left` page, not `left`'s stale one.
    let merged_boundary = right.boundary_key().cloned();
    // Slide `left`'s own entries down to their final position first, then
    // append `right`'s entries right after them.
    left.copy_range_within(left.first, new_first, left_fill);
    right.copy_range_to(right.first, left, new_first + left_fill, right_fill);
    left.first = new_first;
    left.clear_below_first();
    parent.keys[left_slot] = merged_boundary;

    if left.is_leaf() {
        let after_recid = right.next;
        left.next = after_recid;
        if after_recid != NULL_RECID {
            let mut after = ctx.fetch(after_recid, true)?;
            after.previous = left.recid;
            ctx.persist(&after)?;
        }
    }

    // The dead page (`right`) lived at `left_slot + 1`; remove its
    // separator entry from `parent`.
    let _ = parent.remove_child(left_slot + 1);
    ctx.destroy(right_recid)?;
    Ok(())
}

/// spec §4.7: copies every page reachable from `recid` out of `src` into
/// `dst`, preserving recids via `fetch_raw`/`force_insert` so the tree's
/// own recid (the root included) stays valid. Non-leaf pages are partially
/// decoded (`load_values = false`) only far enough to recover `children`
/// for the recursion; no page is ever re-serialized.
pub fn defrag<K, V>(
    src: &mut dyn RecordManager,
    dst: &mut dyn RecordManager,
    cap: usize,
    key_ser: &dyn KeySerializer<K>,
    value_ser: &dyn ValueSerializer<V>,
    recid: Recid,
    height: usize,
) -> Result<()> {
    let bytes = src.fetch_raw(recid)?;
    if height > 1 {
        let page: Page<K, V> = decode_page(recid, &bytes, cap, key_ser, value_ser, false)?;
        for i in page.first..page.cap() {
            defrag(src, dst, cap, key_ser, value_ser, page.children[i], height - 1)?;
        }
    }
    dst.force_insert(recid, bytes)
}

/// spec §4.4: full-tree recursive destruction.
pub fn delete_tree<K, V>(ctx: &mut Context<K, V>, recid: Recid, height: usize) -> Result<()> {
    if height > 1 {
        let page = ctx.fetch(recid, true)?;
        for i in page.first..page.cap() {
            delete_tree(ctx, page.children[i], height - 1)?;
        }
    } else {
        let page = ctx.fetch(recid, true)?;
        for i in page.first..page.cap() {
            if let PageValue::Lazy(value_recid) = page.values[i] {
                ctx.destroy(value_recid)?;
            }
        }
    }
    ctx.destroy(recid)
}

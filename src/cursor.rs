//! Bidirectional iterator over leaf entries (spec §4.6). A `Cursor` holds
//! `(page, index)` and follows the leaf linked list across page
//! boundaries; it does not lock anything and is invalidated by a
//! concurrent mutation of the tree.

use crate::error::{Error, Result};
use crate::ops::Context;
use crate::page::{Page, PageValue};
use crate::record_manager::NULL_RECID;

pub struct Cursor<K, V> {
    page: Page<K, V>,
    index: usize,
}

impl<K, V> Cursor<K, V> {
    pub fn new(page: Page<K, V>, index: usize) -> Self {
        Self { page, index }
    }
}

impl<K: Clone, V: Clone> Cursor<K, V> {
    /// Advances past the slot at `index` (re-homing onto the next leaf if
    /// needed) and returns the entry now under the cursor, or `None` once
    /// the leaf list is exhausted.
    pub fn next(&mut self, ctx: &mut Context<K, V>) -> Result<Option<(K, V)>> {
        if self.index == self.page.cap() || self.page.keys[self.index].is_none() {
            let next_recid = self.page.next;
            if next_recid == NULL_RECID {
                return Ok(None);
            }
            self.page = ctx.fetch(next_recid, true)?;
            self.index = self.page.first;
        }
        let key = self.page.keys[self.index].clone().expect("advance skips absent slots");
        let value = deref(ctx, &self.page.values[self.index])?;
        self.index += 1;
        Ok(Some((key, value)))
    }

    /// Retreats before the slot at `index` (re-homing onto the previous
    /// leaf if needed) and returns the entry now under the cursor, or
    /// `None` once the leaf list is exhausted.
    pub fn previous(&mut self, ctx: &mut Context<K, V>) -> Result<Option<(K, V)>> {
        if self.index == self.page.first {
            let previous_recid = self.page.previous;
            if previous_recid == NULL_RECID {
                return Ok(None);
            }
            self.page = ctx.fetch(previous_recid, true)?;
            self.index = self.page.cap();
        }
        self.index -= 1;
        let key = self.page.keys[self.index].clone().expect("previous never lands on the sentinel");
        let value = deref(ctx, &self.page.values[self.index])?;
        Ok(Some((key, value)))
    }
}

fn deref<K, V: Clone>(ctx: &mut Context<K, V>, value: &PageValue<V>) -> Result<V> {
    match value {
        PageValue::None => Err(Error::Invariant("cursor landed on a live slot with no value".into())),
        PageValue::Inline(v) => Ok(v.clone()),
        PageValue::Lazy(recid) => {
            let bytes = ctx.record_manager.fetch(*recid)?;
            Ok(ctx.value_ser.deserialize(&bytes)?)
        }
    }
}

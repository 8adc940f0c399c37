//! The external record manager collaborator (spec §6). The page engine
//! never touches disk directly: it only ever asks a `RecordManager` for
//! `insert`/`fetch`/`update`/`delete`/`fetch_raw`/`force_insert` keyed by
//! an opaque [`Recid`].
//!
//! [`MemRecordManager`] is the in-memory reference implementation used by
//! every test in this crate; a persistent backend is out of scope here
//! (spec §1, OUT OF SCOPE).

use crate::error::{Error, Result};
use std::collections::HashMap;

/// Opaque 64-bit record id. `0` is reserved to mean "no record" wherever
/// the page engine stores an optional recid (e.g. leaf `previous`/`next`).
pub type Recid = u64;

pub const NULL_RECID: Recid = 0;

/// The record manager contract from spec §6, collapsed to a single
/// raw-bytes surface: every value crossing this boundary has already been
/// serialized by the page format or a [`crate::serializer::ValueSerializer`],
/// so there is no separate "object" overload here.
pub trait RecordManager {
    /// Persists a fresh record, returning its newly allocated recid.
    fn insert(&mut self, bytes: Vec<u8>) -> Result<Recid>;

    /// Loads and returns the bytes stored under `recid`.
    fn fetch(&mut self, recid: Recid) -> Result<Vec<u8>>;

    /// Overwrites the record at `recid`.
    fn update(&mut self, recid: Recid, bytes: Vec<u8>) -> Result<()>;

    /// Frees the record at `recid`.
    fn delete(&mut self, recid: Recid) -> Result<()>;

    /// Raw access used by defrag (spec §4.7); identical to `fetch` in this
    /// reference implementation because records are already opaque bytes.
    fn fetch_raw(&mut self, recid: Recid) -> Result<Vec<u8>> {
        self.fetch(recid)
    }

    /// Inserts `bytes` under a caller-chosen `recid`, preserving identity
    /// across a defrag copy instead of allocating a fresh one.
    fn force_insert(&mut self, recid: Recid, bytes: Vec<u8>) -> Result<()>;
}

/// In-memory reference `RecordManager`. Backed by a `HashMap`; recid
/// allocation is a monotonic counter starting at 1 so that `0` can serve
/// as the "no record" sentinel used throughout the page format.
#[derive(Default)]
pub struct MemRecordManager {
    records: HashMap<Recid, Vec<u8>>,
    next_recid: Recid,
}

impl MemRecordManager {
    pub fn new() -> Self {
        Self {
            records: HashMap::new(),
            next_recid: 1,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl RecordManager for MemRecordManager {
    fn insert(&mut self, bytes: Vec<u8>) -> Result<Recid> {
        let recid = self.next_recid;
        self.next_recid += 1;
        self.records.insert(recid, bytes);
        Ok(recid)
    }

    fn fetch(&mut self, recid: Recid) -> Result<Vec<u8>> {
        self.records
            .get(&recid)
            .cloned()
            .ok_or_else(|| Error::Invariant(format!("dangling recid {recid}")))
    }

    fn update(&mut self, recid: Recid, bytes: Vec<u8>) -> Result<()> {
        if !self.records.contains_key(&recid) {
            return Err(Error::Invariant(format!("update on unknown recid {recid}")));
        }
        self.records.insert(recid, bytes);
        Ok(())
    }

    fn delete(&mut self, recid: Recid) -> Result<()> {
        self.records
            .remove(&recid)
            .map(|_| ())
            .ok_or_else(|| Error::Invariant(format!("delete on unknown recid {recid}")))
    }

    fn force_insert(&mut self, recid: Recid, bytes: Vec<u8>) -> Result<()> {
        self.records.insert(recid, bytes);
        if recid >= self.next_recid {
            self.next_recid = recid + 1;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_fetch_roundtrip() {
        let mut rm = MemRecordManager::new();
        let recid = rm.insert(b"hello".to_vec()).unwrap();
        assert_ne!(recid, NULL_RECID);
        assert_eq!(rm.fetch(recid).unwrap(), b"hello".to_vec());
    }

    #[test]
    fn update_overwrites() {
        let mut rm = MemRecordManager::new();
        let recid = rm.insert(b"a".to_vec()).unwrap();
        rm.update(recid, b"b".to_vec()).unwrap();
        assert_eq!(rm.fetch(recid).unwrap(), b"b".to_vec());
    }

    #[test]
    fn delete_frees_record() {
        let mut rm = MemRecordManager::new();
        let recid = rm.insert(b"a".to_vec()).unwrap();
        rm.delete(recid).unwrap();
        assert!(rm.fetch(recid).is_err());
    }

    #[test]
    fn force_insert_preserves_recid_identity() {
        let mut src = MemRecordManager::new();
        let recid = src.insert(b"payload".to_vec()).unwrap();
        let bytes = src.fetch_raw(recid).unwrap();

        let mut dst = MemRecordManager::new();
        dst.force_insert(recid, bytes.clone()).unwrap();
        assert_eq!(dst.fetch(recid).unwrap(), bytes);
    }
}

//! A persistent, on-disk B+Tree index engine: fixed-capacity pages with a
//! sentinel "+infinity" slot, pluggable key/value (de)serialization and key
//! comparison, a bidirectional cursor over the leaf linked list, and a
//! `RecordManager` boundary so the page engine never touches storage
//! directly.
//!
//! The public entry point is [`tree::BPlusTree`]; construct one with
//! [`tree::with_default_serializers`] for the common serde-backed case, or
//! [`tree::BPlusTree::new`] to plug in custom codecs and comparators.

pub mod cursor;
pub mod error;
pub mod format;
pub mod ops;
pub mod page;
pub mod record_manager;
pub mod serializer;
pub mod tree;
pub mod varint;

pub use cursor::Cursor;
pub use error::{Error, Result};
pub use record_manager::{MemRecordManager, Recid, RecordManager, NULL_RECID};
pub use serializer::{Comparator, KeySerializer, NaturalOrder, ValueSerializer};
pub use tree::{with_default_serializers, BPlusTree};

//! BlobMap
//!
//! Persistent copy-on-write B-tree key/value store over whole-object blob storage.
//!
//! ## Features
//! - One blob per node; any store with get/put/delete of named blobs works
//! - Versioned saves: `save_new` leaves the previous snapshot readable
//! - Bounded memory: only a configurable number of leaves stay resident
//! - Background node writes with a bounded in-flight window
//! - Batched lazy iteration with merge, concat, take-while and prefetch combinators
//!
//! ## Layout
//! - `storage`: the blob gateway and an in-memory implementation
//! - `blobmap`: tree, nodes, cursor and the multi-valued map
//! - `batched`: the iteration framework

pub mod batched;
pub mod blobmap;
pub mod config;
pub mod storage;

mod error;

pub use batched::{BatchedEnumerator, BatchedEnumeratorExt, BoxBatched};
pub use blobmap::{
    BlobMap, BlobMapKey, BlobMapStats, BlobMultiMap, Cursor, KeyPredicate, MemoryProbe,
    MultiMapKey, SavedSnapshot,
};
pub use config::BlobMapOptions;
pub use error::{BlobMapError, Result};
pub use storage::{BlobStorage, MemoryStorage};

//! Storage gateway
//!
//! The only capability the tree needs from its environment: named byte blobs
//! with whole-object get/put/delete. Backends (filesystem, object stores) and
//! decorators (retry, compression, logging) live outside this crate and plug in
//! through [`BlobStorage`].

pub mod memory;

pub use memory::MemoryStorage;

use crate::Result;
use async_trait::async_trait;

/// Named-blob storage
///
/// A missing blob is `Ok(None)`, never an error. Implementations apply their own
/// retry policy; an `Err` means retries are exhausted.
#[async_trait]
pub trait BlobStorage: Send + Sync {
    /// Fetch a whole blob
    async fn fetch(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Store (create or replace) a whole blob
    async fn store(&self, key: &str, data: Vec<u8>) -> Result<()>;

    /// Delete a blob; deleting a missing blob succeeds
    async fn delete(&self, key: &str) -> Result<()>;

    /// Delete every blob in this namespace
    async fn clear(&self) -> Result<()>;
}

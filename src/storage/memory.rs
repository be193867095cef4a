//! In-memory blob storage
//!
//! Backed by a `DashMap`, so concurrent background writes never contend on a
//! single lock. Used by the test suites and by callers that embed a map without
//! durable storage.

use super::BlobStorage;
use crate::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Default)]
pub struct MemoryStorage {
    blobs: DashMap<String, Vec<u8>>,
    fetches: AtomicU64,
    stores: AtomicU64,
    deletes: AtomicU64,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.blobs.contains_key(key)
    }

    /// Snapshot of blob names, sorted
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.blobs.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }

    /// Raw bytes of a blob, bypassing the counters
    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.blobs.get(key).map(|v| v.value().clone())
    }

    /// Overwrite a blob directly, bypassing the counters
    pub fn insert(&self, key: impl Into<String>, data: Vec<u8>) {
        self.blobs.insert(key.into(), data);
    }

    pub fn fetch_count(&self) -> u64 {
        self.fetches.load(Ordering::Relaxed)
    }

    pub fn store_count(&self) -> u64 {
        self.stores.load(Ordering::Relaxed)
    }

    pub fn delete_count(&self) -> u64 {
        self.deletes.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl BlobStorage for MemoryStorage {
    async fn fetch(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.fetches.fetch_add(1, Ordering::Relaxed);
        Ok(self.blobs.get(key).map(|v| v.value().clone()))
    }

    async fn store(&self, key: &str, data: Vec<u8>) -> Result<()> {
        self.stores.fetch_add(1, Ordering::Relaxed);
        self.blobs.insert(key.to_string(), data);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.deletes.fetch_add(1, Ordering::Relaxed);
        self.blobs.remove(key);
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.blobs.clear();
        Ok(())
    }
}

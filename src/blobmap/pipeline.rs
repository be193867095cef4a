//! Bounded background save pipeline
//!
//! Node writes run as tokio tasks so a save can keep encoding while earlier blobs
//! are still in flight. Completed writes are reaped before each new one is
//! submitted; once the in-flight limit is reached new writes wait for a slot.
//! A failed write keeps its payload and is re-issued by the next flush.

use crate::storage::BlobStorage;
use crate::{BlobMapError, Result};
use ahash::AHashMap;
use std::sync::Arc;
use tokio::task::{JoinError, JoinSet};

struct FailedWrite {
    name: String,
    data: Vec<u8>,
    error: BlobMapError,
}

type WriteOutcome = std::result::Result<String, FailedWrite>;

pub(crate) struct SavePipeline {
    storage: Arc<dyn BlobStorage>,
    in_flight: JoinSet<WriteOutcome>,
    max_in_flight: usize,
    /// In-flight write count per blob name
    pending: AHashMap<String, usize>,
    /// Writes that failed, waiting to be re-issued
    retry: Vec<(String, Vec<u8>)>,
}

impl SavePipeline {
    pub fn new(storage: Arc<dyn BlobStorage>, max_in_flight: usize) -> Self {
        Self {
            storage,
            in_flight: JoinSet::new(),
            max_in_flight: max_in_flight.max(1),
            pending: AHashMap::new(),
            retry: Vec::new(),
        }
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Writes that failed and will be re-issued by the next flush
    pub fn retry_len(&self) -> usize {
        self.retry.len()
    }

    /// True while a write of `name` is in flight or waiting for a retry
    ///
    /// Storage may not hold the blob's latest payload yet.
    pub fn is_pending(&self, name: &str) -> bool {
        self.pending.contains_key(name) || self.retry.iter().any(|(pending, _)| pending == name)
    }

    /// Queue a blob write
    ///
    /// Fails with the aggregated errors of any earlier write found failed; in that
    /// case this write was not submitted.
    pub async fn submit(&mut self, name: String, data: Vec<u8>) -> Result<()> {
        self.reap()?;
        self.wait_below(self.max_in_flight).await?;

        // A newer payload for the same blob supersedes a pending retry
        self.retry.retain(|(pending, _)| *pending != name);
        self.spawn(name, data);
        Ok(())
    }

    /// Re-issue failed writes, then wait for every write to finish
    pub async fn flush(&mut self) -> Result<()> {
        let mut errors = Vec::new();
        for (name, data) in std::mem::take(&mut self.retry) {
            tracing::debug!(blob = %name, "re-issuing failed write");
            if let Err(e) = self.wait_below(self.max_in_flight).await {
                errors.push(e);
            }
            self.spawn(name, data);
        }
        if let Err(e) = self.wait_below(1).await {
            errors.push(e);
        }
        Self::aggregate(errors)
    }

    /// Wait for in-flight writes and forget everything pending
    ///
    /// Used before the namespace is wiped, when the outcome no longer matters.
    pub async fn discard(&mut self) {
        while let Some(joined) = self.in_flight.join_next().await {
            if let Err(e) = Self::outcome(joined) {
                tracing::debug!(error = %e, "discarding failed write");
            }
        }
        self.pending.clear();
        self.retry.clear();
    }

    fn spawn(&mut self, name: String, data: Vec<u8>) {
        *self.pending.entry(name.clone()).or_insert(0) += 1;
        let storage = self.storage.clone();
        self.in_flight.spawn(async move {
            match storage.store(&name, data.clone()).await {
                Ok(()) => Ok(name),
                Err(error) => Err(FailedWrite { name, data, error }),
            }
        });
    }

    /// Collect writes that already finished
    fn reap(&mut self) -> Result<()> {
        let mut errors = Vec::new();
        while let Some(joined) = self.in_flight.try_join_next() {
            if let Err(e) = self.record(joined) {
                errors.push(e);
            }
        }
        Self::aggregate(errors)
    }

    /// Wait until fewer than `limit` writes are in flight
    async fn wait_below(&mut self, limit: usize) -> Result<()> {
        let mut errors = Vec::new();
        while self.in_flight.len() >= limit {
            let Some(joined) = self.in_flight.join_next().await else {
                break;
            };
            if let Err(e) = self.record(joined) {
                errors.push(e);
            }
        }
        Self::aggregate(errors)
    }

    fn settle(&mut self, name: &str) {
        if let Some(count) = self.pending.get_mut(name) {
            *count -= 1;
            if *count == 0 {
                self.pending.remove(name);
            }
        }
    }

    fn record(&mut self, joined: std::result::Result<WriteOutcome, JoinError>) -> Result<()> {
        match joined {
            Ok(Ok(name)) => {
                self.settle(&name);
                Ok(())
            }
            Ok(Err(failed)) => {
                self.settle(&failed.name);
                tracing::warn!(blob = %failed.name, error = %failed.error, "background write failed");
                self.retry.push((failed.name, failed.data));
                Err(failed.error)
            }
            Err(join_error) => {
                // The blob name is lost with the task; `pending` keeps it until discard
                tracing::warn!(error = %join_error, "background write task aborted");
                Err(join_error.into())
            }
        }
    }

    fn outcome(joined: std::result::Result<WriteOutcome, JoinError>) -> Result<()> {
        match joined {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(failed)) => Err(failed.error),
            Err(join_error) => Err(join_error.into()),
        }
    }

    fn aggregate(errors: Vec<BlobMapError>) -> Result<()> {
        let mut flat = Vec::with_capacity(errors.len());
        for error in errors {
            match error {
                BlobMapError::BackgroundWrites(inner) => flat.extend(inner),
                other => flat.push(other),
            }
        }
        if flat.is_empty() {
            Ok(())
        } else {
            Err(BlobMapError::BackgroundWrites(flat))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Fails stores of chosen blobs; tracks peak concurrency
    #[derive(Default)]
    struct Flaky {
        inner: MemoryStorage,
        failing: Mutex<HashSet<String>>,
        active: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl BlobStorage for Flaky {
        async fn fetch(&self, key: &str) -> Result<Option<Vec<u8>>> {
            self.inner.fetch(key).await
        }

        async fn store(&self, key: &str, data: Vec<u8>) -> Result<()> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(2)).await;
            self.active.fetch_sub(1, Ordering::SeqCst);

            if self.failing.lock().contains(key) {
                return Err(BlobMapError::storage(format!("refusing {}", key)));
            }
            self.inner.store(key, data).await
        }

        async fn delete(&self, key: &str) -> Result<()> {
            self.inner.delete(key).await
        }

        async fn clear(&self) -> Result<()> {
            self.inner.clear().await
        }
    }

    #[tokio::test]
    async fn test_in_flight_writes_are_bounded() {
        let storage = Arc::new(Flaky::default());
        let mut pipeline = SavePipeline::new(storage.clone(), 3);

        for n in 0..20 {
            pipeline.submit(n.to_string(), vec![n as u8]).await.unwrap();
            assert!(pipeline.in_flight() <= 3);
        }
        pipeline.flush().await.unwrap();

        assert_eq!(pipeline.in_flight(), 0);
        assert_eq!(storage.inner.len(), 20);
        assert!(storage.peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn test_failed_write_is_retried_by_next_flush() {
        let storage = Arc::new(Flaky::default());
        storage.failing.lock().insert("7".to_string());
        let mut pipeline = SavePipeline::new(storage.clone(), 4);

        pipeline.submit("7".into(), b"seven".to_vec()).await.unwrap();
        pipeline.submit("8".into(), b"eight".to_vec()).await.unwrap();
        assert!(pipeline.is_pending("7") && pipeline.is_pending("8"));

        let err = pipeline.flush().await.unwrap_err();
        assert!(matches!(&err, BlobMapError::BackgroundWrites(errors) if errors.len() == 1));
        assert_eq!(pipeline.retry_len(), 1);
        assert!(!storage.inner.contains("7"));
        assert!(pipeline.is_pending("7"));
        assert!(!pipeline.is_pending("8"));

        storage.failing.lock().clear();
        pipeline.flush().await.unwrap();
        assert_eq!(storage.inner.get("7"), Some(b"seven".to_vec()));
        assert_eq!(pipeline.retry_len(), 0);
        assert!(!pipeline.is_pending("7"));
    }

    #[tokio::test]
    async fn test_newer_payload_supersedes_retry() {
        let storage = Arc::new(Flaky::default());
        storage.failing.lock().insert("0".to_string());
        let mut pipeline = SavePipeline::new(storage.clone(), 4);

        pipeline.submit("0".into(), b"old".to_vec()).await.unwrap();
        assert!(pipeline.flush().await.is_err());

        storage.failing.lock().clear();
        pipeline.submit("0".into(), b"new".to_vec()).await.unwrap();
        pipeline.flush().await.unwrap();
        assert_eq!(storage.inner.get("0"), Some(b"new".to_vec()));
    }

    #[tokio::test]
    async fn test_discard_drops_pending_work() {
        let storage = Arc::new(Flaky::default());
        storage.failing.lock().insert("1".to_string());
        let mut pipeline = SavePipeline::new(storage.clone(), 4);

        pipeline.submit("1".into(), vec![1]).await.unwrap();
        pipeline.discard().await;
        assert_eq!(pipeline.in_flight(), 0);
        assert_eq!(pipeline.retry_len(), 0);
        pipeline.flush().await.unwrap();
    }
}

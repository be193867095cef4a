//! One-batch-deep prefetch
//!
//! The source is moved into a tokio task that fetches the next batch while the
//! caller works on the current one. Each `get_next_batch` hands back the finished
//! prefetch and immediately launches the one after it.

use super::BatchedEnumerator;
use crate::{BlobMapError, Result};
use async_trait::async_trait;
use std::marker::PhantomData;
use tokio::task::JoinHandle;

type Fetched<T, S> = (S, Result<Option<Vec<T>>>);

pub struct LookAhead<T, S> {
    /// Source, while no fetch is in flight
    idle: Option<S>,
    in_flight: Option<JoinHandle<Fetched<T, S>>>,
    batch: Vec<T>,
    finished: bool,
    _item: PhantomData<fn() -> T>,
}

impl<T, S> LookAhead<T, S>
where
    T: Send + 'static,
    S: BatchedEnumerator<T> + 'static,
{
    pub fn new(source: S) -> Self {
        Self {
            idle: Some(source),
            in_flight: None,
            batch: Vec::new(),
            finished: false,
            _item: PhantomData,
        }
    }

    fn prefetch(mut source: S, required: usize) -> JoinHandle<Fetched<T, S>> {
        tokio::spawn(async move {
            let fetched = match source.get_next_batch(required).await {
                Ok(true) => Ok(Some(source.take_current_batch())),
                Ok(false) => Ok(None),
                Err(e) => Err(e),
            };
            (source, fetched)
        })
    }
}

#[async_trait]
impl<T, S> BatchedEnumerator<T> for LookAhead<T, S>
where
    T: Send + 'static,
    S: BatchedEnumerator<T> + 'static,
{
    async fn get_next_batch(&mut self, required: usize) -> Result<bool> {
        self.batch.clear();
        if self.finished {
            return Ok(false);
        }

        let handle = match self.in_flight.take() {
            Some(handle) => handle,
            None => {
                let source = self.idle.take().ok_or_else(|| {
                    BlobMapError::InvalidState("look-ahead source lost".into())
                })?;
                Self::prefetch(source, required)
            }
        };

        let (source, fetched) = match handle.await {
            Ok(done) => done,
            Err(join_error) => {
                self.finished = true;
                return Err(join_error.into());
            }
        };

        match fetched {
            Ok(Some(batch)) => {
                self.in_flight = Some(Self::prefetch(source, required));
                self.batch = batch;
                Ok(true)
            }
            Ok(None) => {
                self.finished = true;
                self.idle = Some(source);
                Ok(false)
            }
            Err(e) => {
                tracing::debug!(error = %e, "look-ahead prefetch failed");
                self.finished = true;
                self.idle = Some(source);
                Err(e)
            }
        }
    }

    fn current_batch(&self) -> &[T] {
        &self.batch
    }

    fn take_current_batch(&mut self) -> Vec<T> {
        std::mem::take(&mut self.batch)
    }
}

impl<T, S> Drop for LookAhead<T, S> {
    fn drop(&mut self) {
        if let Some(handle) = self.in_flight.take() {
            handle.abort();
        }
    }
}

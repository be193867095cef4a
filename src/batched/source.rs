//! In-memory sources

use super::BatchedEnumerator;
use crate::Result;
use async_trait::async_trait;
use std::collections::VecDeque;

/// Replays pre-built batches, ignoring the size hint
pub struct VecBatches<T> {
    pending: VecDeque<Vec<T>>,
    batch: Vec<T>,
}

/// Yield exactly these batches, in order
pub fn from_batches<T: Send + 'static>(batches: Vec<Vec<T>>) -> VecBatches<T> {
    VecBatches {
        pending: batches.into(),
        batch: Vec::new(),
    }
}

/// Yield `items` in chunks of `batch_size`
pub fn from_vec<T: Send + 'static>(items: Vec<T>, batch_size: usize) -> VecBatches<T> {
    let batch_size = batch_size.max(1);
    let mut batches = Vec::with_capacity(items.len() / batch_size + 1);
    let mut items = items.into_iter().peekable();
    while items.peek().is_some() {
        batches.push(items.by_ref().take(batch_size).collect());
    }
    from_batches(batches)
}

pub fn empty<T: Send + 'static>() -> VecBatches<T> {
    from_batches(Vec::new())
}

#[async_trait]
impl<T: Send + 'static> BatchedEnumerator<T> for VecBatches<T> {
    async fn get_next_batch(&mut self, _required: usize) -> Result<bool> {
        match self.pending.pop_front() {
            Some(batch) => {
                self.batch = batch;
                Ok(true)
            }
            None => {
                self.batch.clear();
                Ok(false)
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

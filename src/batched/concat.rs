//! Sequential concatenation of enumerators

use super::BatchedEnumerator;
use crate::Result;
use async_trait::async_trait;

/// Exhausts each source in order before moving to the next
pub struct Concat<S> {
    sources: Vec<S>,
    current: usize,
}

impl<S> Concat<S> {
    pub fn new(sources: Vec<S>) -> Self {
        Self {
            sources,
            current: 0,
        }
    }
}

#[async_trait]
impl<T, S> BatchedEnumerator<T> for Concat<S>
where
    T: Send + 'static,
    S: BatchedEnumerator<T>,
{
    async fn get_next_batch(&mut self, required: usize) -> Result<bool> {
        while let Some(source) = self.sources.get_mut(self.current) {
            if source.get_next_batch(required).await? {
                return Ok(true);
            }
            self.current += 1;
        }
        Ok(false)
    }

    fn current_batch(&self) -> &[T] {
        match self.sources.get(self.current) {
            Some(source) => source.current_batch(),
            None => &[],
        }
    }

    fn take_current_batch(&mut self) -> Vec<T> {
        match self.sources.get_mut(self.current) {
            Some(source) => source.take_current_batch(),
            None => Vec::new(),
        }
    }
}

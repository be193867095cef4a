//! Batched lazy iteration
//!
//! A [`BatchedEnumerator`] is a finite, non-restartable, pull-based sequence that
//! yields caller-sized batches instead of single elements, so storage round trips
//! are amortized over many records. Combinators stack on top of each other:
//!
//! ```text
//! Cursor(tree A) ─┐
//!                 ├─ merge ─ take_while ─ select ─ look_ahead ─> caller
//! Cursor(tree B) ─┘
//! ```
//!
//! Resources (nested enumerators, prefetch tasks) are released on drop.

mod concat;
mod look_ahead;
mod merge;
pub mod priority_queue;
mod source;
mod transform;

pub use concat::Concat;
pub use look_ahead::LookAhead;
pub use merge::Merge;
pub use priority_queue::{Comparator, PriorityQueue};
pub use source::{empty, from_batches, from_vec, VecBatches};
pub use transform::{
    FnTransformer, SelectManyOp, SelectOp, TakeOp, TakeWhileOp, Transform, Transformer, WhereOp,
};

use crate::{BlobMapError, Result};
use async_trait::async_trait;
use std::cmp::Ordering;
use std::sync::Arc;

/// Elements pulled per batch by the aggregation helpers
pub const DEFAULT_BATCH_SIZE: usize = 10_000;

/// Lazy sequence of batches
#[async_trait]
pub trait BatchedEnumerator<T: Send>: Send {
    /// Advance to the next batch
    ///
    /// `required` is a size hint, not a limit. Returns `false` once the sequence
    /// is exhausted; the current batch is then empty.
    async fn get_next_batch(&mut self, required: usize) -> Result<bool>;

    /// The batch produced by the last successful `get_next_batch`
    fn current_batch(&self) -> &[T];

    /// Move the current batch out, leaving it empty
    fn take_current_batch(&mut self) -> Vec<T>;
}

pub type BoxBatched<T> = Box<dyn BatchedEnumerator<T>>;

#[async_trait]
impl<T: Send, E: BatchedEnumerator<T> + ?Sized> BatchedEnumerator<T> for Box<E> {
    async fn get_next_batch(&mut self, required: usize) -> Result<bool> {
        (**self).get_next_batch(required).await
    }

    fn current_batch(&self) -> &[T] {
        (**self).current_batch()
    }

    fn take_current_batch(&mut self) -> Vec<T> {
        (**self).take_current_batch()
    }
}

/// Exhaust `sources` left to right
pub fn concat<T, S>(sources: Vec<S>) -> Concat<S>
where
    T: Send + 'static,
    S: BatchedEnumerator<T>,
{
    Concat::new(sources)
}

/// K-way merge of individually sorted sources by natural order
pub fn merge<T, S>(sources: Vec<S>) -> Merge<T, S>
where
    T: Ord + Send + 'static,
    S: BatchedEnumerator<T>,
{
    Merge::new(sources, Arc::new(|a: &T, b: &T| a.cmp(b)))
}

/// K-way merge of sources sorted by `compare`
pub fn merge_by<T, S, F>(sources: Vec<S>, compare: F) -> Merge<T, S>
where
    T: Send + 'static,
    S: BatchedEnumerator<T>,
    F: Fn(&T, &T) -> Ordering + Send + Sync + 'static,
{
    Merge::new(sources, Arc::new(compare))
}

/// Keep one batch prefetch in flight ahead of the caller
pub fn look_ahead<T, S>(source: S) -> LookAhead<T, S>
where
    T: Send + 'static,
    S: BatchedEnumerator<T> + 'static,
{
    LookAhead::new(source)
}

/// Combinators available on every enumerator
#[async_trait]
pub trait BatchedEnumeratorExt<T: Send + 'static>: BatchedEnumerator<T> + Sized + 'static {
    fn select<U, F>(self, selector: F) -> Transform<T, U, Self, SelectOp<F>>
    where
        U: Send + 'static,
        F: FnMut(T) -> U + Send,
    {
        Transform::new(self, SelectOp(selector))
    }

    fn select_many<U, I, F>(self, selector: F) -> Transform<T, U, Self, SelectManyOp<F>>
    where
        U: Send + 'static,
        I: IntoIterator<Item = U>,
        F: FnMut(T) -> I + Send,
    {
        Transform::new(self, SelectManyOp(selector))
    }

    /// Keep elements matching `predicate` (LINQ `Where`)
    fn filter<P>(self, predicate: P) -> Transform<T, T, Self, WhereOp<P>>
    where
        P: FnMut(&T) -> bool + Send,
    {
        Transform::new(self, WhereOp(predicate))
    }

    /// Stop at the first element failing `predicate`; no further source reads
    fn take_while<P>(self, predicate: P) -> Transform<T, T, Self, TakeWhileOp<P>>
    where
        P: FnMut(&T) -> bool + Send,
    {
        Transform::new(self, TakeWhileOp::new(predicate))
    }

    fn take(self, count: usize) -> Transform<T, T, Self, TakeOp> {
        Transform::new(self, TakeOp::new(count))
    }

    fn look_ahead(self) -> LookAhead<T, Self> {
        LookAhead::new(self)
    }

    fn boxed(self) -> BoxBatched<T> {
        Box::new(self)
    }

    /// First element; an empty sequence is an error
    async fn first(self) -> Result<T> {
        let mut this = self;
        while this.get_next_batch(1).await? {
            if let Some(item) = this.take_current_batch().into_iter().next() {
                return Ok(item);
            }
        }
        Err(BlobMapError::EmptySequence)
    }

    /// Fold all elements, seeded by the first; an empty sequence is an error
    async fn aggregate<F>(self, each: F) -> Result<T>
    where
        F: FnMut(T, T) -> T + Send,
    {
        let (mut this, mut each) = (self, each);
        let mut accumulator: Option<T> = None;
        while this.get_next_batch(DEFAULT_BATCH_SIZE).await? {
            for item in this.take_current_batch() {
                accumulator = Some(match accumulator.take() {
                    Some(acc) => each(acc, item),
                    None => item,
                });
            }
        }
        accumulator.ok_or(BlobMapError::EmptySequence)
    }

    /// Fold all elements into `seed`
    async fn aggregate_seed<A, F>(self, seed: A, each: F) -> Result<A>
    where
        A: Send,
        F: FnMut(A, T) -> A + Send,
    {
        let (mut this, mut each) = (self, each);
        let mut accumulator = seed;
        while this.get_next_batch(DEFAULT_BATCH_SIZE).await? {
            for item in this.take_current_batch() {
                accumulator = each(accumulator, item);
            }
        }
        Ok(accumulator)
    }

    /// Materialize everything; meant for small results and tests
    async fn to_list(self) -> Result<Vec<T>> {
        let mut this = self;
        let mut result = Vec::new();
        while this.get_next_batch(DEFAULT_BATCH_SIZE).await? {
            result.append(&mut this.take_current_batch());
        }
        Ok(result)
    }
}

impl<T: Send + 'static, E: BatchedEnumerator<T> + Sized + 'static> BatchedEnumeratorExt<T> for E {}

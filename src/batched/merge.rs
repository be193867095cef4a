//! K-way merge over individually sorted enumerators
//!
//! The queue holds one current element per active source. Popping an element
//! refills that source's slot from the rest of its current batch, or from its
//! next non-empty batch; a source that runs dry simply drops out.

use super::priority_queue::{Comparator, PriorityQueue};
use super::{BatchedEnumerator, DEFAULT_BATCH_SIZE};
use crate::Result;
use async_trait::async_trait;

struct Slot<T, S> {
    source: S,
    pending: std::vec::IntoIter<T>,
}

pub struct Merge<T, S> {
    slots: Vec<Slot<T, S>>,
    queue: PriorityQueue<T>,
    started: bool,
    batch: Vec<T>,
}

impl<T, S> Merge<T, S> {
    pub fn new(sources: Vec<S>, compare: Comparator<T>) -> Self {
        let slots = sources
            .into_iter()
            .map(|source| Slot {
                source,
                pending: Vec::new().into_iter(),
            })
            .collect();
        Self {
            slots,
            queue: PriorityQueue::new(compare),
            started: false,
            batch: Vec::new(),
        }
    }
}

impl<T, S> Merge<T, S>
where
    T: Send + 'static,
    S: BatchedEnumerator<T>,
{
    /// Put the next element of source `index` into the queue, if it has one
    async fn refill(&mut self, index: usize, required: usize) -> Result<()> {
        let slot = &mut self.slots[index];
        if let Some(item) = slot.pending.next() {
            self.queue.push(item, index);
            return Ok(());
        }

        while slot.source.get_next_batch(required).await? {
            let mut batch = slot.source.take_current_batch().into_iter();
            if let Some(item) = batch.next() {
                slot.pending = batch;
                self.queue.push(item, index);
                break;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl<T, S> BatchedEnumerator<T> for Merge<T, S>
where
    T: Send + 'static,
    S: BatchedEnumerator<T>,
{
    async fn get_next_batch(&mut self, required: usize) -> Result<bool> {
        let required = required.max(1);

        if !self.started {
            for index in 0..self.slots.len() {
                self.refill(index, required).await?;
            }
            self.started = true;
        }

        let mut out = Vec::with_capacity(required.min(DEFAULT_BATCH_SIZE));
        while out.len() < required {
            let Some((item, index)) = self.queue.pop() else {
                break;
            };
            out.push(item);
            self.refill(index, required).await?;
        }

        self.batch = out;
        Ok(!self.batch.is_empty())
    }

    fn current_batch(&self) -> &[T] {
        &self.batch
    }

    fn take_current_batch(&mut self) -> Vec<T> {
        std::mem::take(&mut self.batch)
    }
}

#[cfg(test)]
mod tests {
    use crate::batched::{
        empty, from_batches, from_vec, merge, merge_by, BatchedEnumerator, BatchedEnumeratorExt,
        BoxBatched,
    };
    use proptest::prelude::*;

    #[tokio::test]
    async fn test_merge_interleaved() {
        let evens: Vec<u32> = (0..100).filter(|n| n % 2 == 0).collect();
        let odds: Vec<u32> = (0..100).filter(|n| n % 2 == 1).collect();
        let merged = merge(vec![from_vec(evens, 7), from_vec(odds, 13)])
            .to_list()
            .await
            .unwrap();
        assert_eq!(merged, (0..100).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_merge_respects_required() {
        let mut merged = merge(vec![from_vec((0..10u32).collect(), 10), from_vec((10..20).collect(), 10)]);
        let mut sizes = Vec::new();
        while merged.get_next_batch(4).await.unwrap() {
            sizes.push(merged.current_batch().len());
        }
        assert_eq!(sizes, vec![4, 4, 4, 4, 4]);
    }

    #[tokio::test]
    async fn test_merge_skips_empty_batches() {
        let sources: Vec<BoxBatched<u32>> = vec![
            from_batches(vec![vec![], vec![2u32], vec![], vec![], vec![6]]).boxed(),
            empty::<u32>().boxed(),
            from_batches(vec![vec![1u32, 3], vec![], vec![5]]).boxed(),
        ];
        let merged = merge(sources).to_list().await.unwrap();
        assert_eq!(merged, vec![1, 2, 3, 5, 6]);
    }

    #[tokio::test]
    async fn test_merge_ties_follow_source_order() {
        let left = from_vec(vec![(1u32, "left"), (2, "left")], 1);
        let right = from_vec(vec![(1u32, "right"), (2, "right")], 1);
        let merged = merge_by(vec![left, right], |a, b| a.0.cmp(&b.0))
            .to_list()
            .await
            .unwrap();
        assert_eq!(
            merged,
            vec![(1, "left"), (1, "right"), (2, "left"), (2, "right")]
        );
    }

    #[tokio::test]
    async fn test_merge_with_descending_comparator() {
        let a = from_vec(vec![9u32, 5, 1], 2);
        let b = from_vec(vec![8u32, 4], 2);
        let merged = merge_by(vec![a, b], |x, y| y.cmp(x)).to_list().await.unwrap();
        assert_eq!(merged, vec![9, 8, 5, 4, 1]);
    }

    proptest! {
        #[test]
        fn prop_merge_yields_sorted_union(
            mut a in proptest::collection::vec(0u32..1000, 0..200),
            mut b in proptest::collection::vec(0u32..1000, 0..200),
            mut c in proptest::collection::vec(0u32..1000, 0..200),
            batch in 1usize..50,
        ) {
            a.sort();
            b.sort();
            c.sort();
            let mut expected: Vec<u32> = a.iter().chain(&b).chain(&c).copied().collect();
            expected.sort();

            let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
            let merged = runtime
                .block_on(merge(vec![from_vec(a, batch), from_vec(b, batch), from_vec(c, batch)]).to_list())
                .unwrap();
            prop_assert_eq!(merged, expected);
        }
    }
}

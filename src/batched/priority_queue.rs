//! Min-priority queue keyed by a caller comparator
//!
//! Each entry carries the index of the source it came from. Entries that compare
//! equal pop in ascending source index, which makes k-way merges deterministic.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::sync::Arc;

pub type Comparator<T> = Arc<dyn Fn(&T, &T) -> Ordering + Send + Sync>;

struct HeapItem<T> {
    item: T,
    source: usize,
    compare: Comparator<T>,
}

impl<T> PartialEq for HeapItem<T> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<T> Eq for HeapItem<T> {}

impl<T> PartialOrd for HeapItem<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for HeapItem<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.compare)(&self.item, &other.item).then_with(|| self.source.cmp(&other.source))
    }
}

pub struct PriorityQueue<T> {
    heap: BinaryHeap<Reverse<HeapItem<T>>>,
    compare: Comparator<T>,
}

impl<T> PriorityQueue<T> {
    pub fn new(compare: Comparator<T>) -> Self {
        Self {
            heap: BinaryHeap::new(),
            compare,
        }
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn push(&mut self, item: T, source: usize) {
        self.heap.push(Reverse(HeapItem {
            item,
            source,
            compare: self.compare.clone(),
        }));
    }

    /// Remove the smallest entry
    pub fn pop(&mut self) -> Option<(T, usize)> {
        self.heap
            .pop()
            .map(|Reverse(entry)| (entry.item, entry.source))
    }

    pub fn peek(&self) -> Option<&T> {
        self.heap.peek().map(|Reverse(entry)| &entry.item)
    }
}

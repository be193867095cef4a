//! One-to-many transform with an optional take hint
//!
//! Every element-wise combinator (`select`, `select_many`, `filter`, `take_while`,
//! `take`) is a [`Transform`] with a different [`Transformer`]. The take hint lets
//! an early terminator shrink, or stop, the reads issued against the source.

use super::BatchedEnumerator;
use crate::Result;
use async_trait::async_trait;
use std::marker::PhantomData;

/// Per-element mapping driven by [`Transform`]
pub trait Transformer<In, Out>: Send {
    /// Map one source element to zero or more outputs
    fn apply(&mut self, item: In, out: &mut Vec<Out>);

    /// How many source elements to request for a caller asking for `required`
    ///
    /// `None` ends the sequence without reading the source again.
    fn take_hint(&mut self, required: usize) -> Option<usize> {
        Some(required)
    }
}

pub struct Transform<In, Out, S, X> {
    source: S,
    transformer: X,
    batch: Vec<Out>,
    _input: PhantomData<fn(In)>,
}

impl<In, Out, S, X> Transform<In, Out, S, X> {
    pub fn new(source: S, transformer: X) -> Self {
        Self {
            source,
            transformer,
            batch: Vec::new(),
            _input: PhantomData,
        }
    }
}

#[async_trait]
impl<In, Out, S, X> BatchedEnumerator<Out> for Transform<In, Out, S, X>
where
    In: Send + 'static,
    Out: Send + 'static,
    S: BatchedEnumerator<In>,
    X: Transformer<In, Out>,
{
    async fn get_next_batch(&mut self, required: usize) -> Result<bool> {
        self.batch.clear();

        let take = match self.transformer.take_hint(required) {
            Some(take) => take,
            None => return Ok(false),
        };
        if !self.source.get_next_batch(take).await? {
            return Ok(false);
        }

        let items = self.source.take_current_batch();
        let mut out = Vec::with_capacity(items.len());
        for item in items {
            self.transformer.apply(item, &mut out);
        }
        self.batch = out;
        Ok(true)
    }

    fn current_batch(&self) -> &[Out] {
        &self.batch
    }

    fn take_current_batch(&mut self) -> Vec<Out> {
        std::mem::take(&mut self.batch)
    }
}

/// Closure-built transformer: `map_to_many` plus an optional take hint
pub struct FnTransformer<M, H> {
    map_to_many: M,
    take_hint: Option<H>,
}

impl<M, H> FnTransformer<M, H> {
    pub fn new(map_to_many: M, take_hint: Option<H>) -> Self {
        Self {
            map_to_many,
            take_hint,
        }
    }
}

impl<In, Out, M, H> Transformer<In, Out> for FnTransformer<M, H>
where
    M: FnMut(In, &mut Vec<Out>) + Send,
    H: FnMut(usize) -> Option<usize> + Send,
{
    fn apply(&mut self, item: In, out: &mut Vec<Out>) {
        (self.map_to_many)(item, out)
    }

    fn take_hint(&mut self, required: usize) -> Option<usize> {
        match self.take_hint.as_mut() {
            Some(hint) => hint(required),
            None => Some(required),
        }
    }
}

pub struct SelectOp<F>(pub F);

impl<In, Out, F> Transformer<In, Out> for SelectOp<F>
where
    F: FnMut(In) -> Out + Send,
{
    fn apply(&mut self, item: In, out: &mut Vec<Out>) {
        out.push((self.0)(item));
    }
}

pub struct SelectManyOp<F>(pub F);

impl<In, Out, I, F> Transformer<In, Out> for SelectManyOp<F>
where
    I: IntoIterator<Item = Out>,
    F: FnMut(In) -> I + Send,
{
    fn apply(&mut self, item: In, out: &mut Vec<Out>) {
        out.extend((self.0)(item));
    }
}

pub struct WhereOp<P>(pub P);

impl<T, P> Transformer<T, T> for WhereOp<P>
where
    P: FnMut(&T) -> bool + Send,
{
    fn apply(&mut self, item: T, out: &mut Vec<T>) {
        if (self.0)(&item) {
            out.push(item);
        }
    }
}

pub struct TakeWhileOp<P> {
    predicate: P,
    more: bool,
}

impl<P> TakeWhileOp<P> {
    pub fn new(predicate: P) -> Self {
        Self {
            predicate,
            more: true,
        }
    }
}

impl<T, P> Transformer<T, T> for TakeWhileOp<P>
where
    P: FnMut(&T) -> bool + Send,
{
    fn apply(&mut self, item: T, out: &mut Vec<T>) {
        self.more = self.more && (self.predicate)(&item);
        if self.more {
            out.push(item);
        }
    }

    fn take_hint(&mut self, required: usize) -> Option<usize> {
        self.more.then_some(required)
    }
}

pub struct TakeOp {
    remaining: usize,
}

impl TakeOp {
    pub fn new(count: usize) -> Self {
        Self { remaining: count }
    }
}

impl<T> Transformer<T, T> for TakeOp {
    fn apply(&mut self, item: T, out: &mut Vec<T>) {
        if self.remaining > 0 {
            self.remaining -= 1;
            out.push(item);
        }
    }

    fn take_hint(&mut self, required: usize) -> Option<usize> {
        (self.remaining > 0).then(|| required.max(1).min(self.remaining))
    }
}

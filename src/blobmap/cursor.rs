//! Sorted range cursor
//!
//! Walks the tree left to right with a stack of `(branch, child position)` frames
//! and yields one leaf's qualifying entries per batch. The tree lock is held only
//! for the duration of a single `get_next_batch`.

use super::keys;
use super::node::NodeIdx;
use super::tree::Tree;
use crate::batched::BatchedEnumerator;
use crate::{BlobMapError, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Key predicate ending a scan at its first failure
pub type KeyPredicate = Box<dyn FnMut(&str) -> bool + Send>;

pub(crate) type Decoder<V> = fn(&[u8]) -> Result<V>;

pub struct Cursor<V> {
    tree: Arc<Mutex<Tree>>,
    frames: Vec<(NodeIdx, usize)>,
    min_key: String,
    last_emitted: Option<String>,
    take_while: Option<KeyPredicate>,
    decode: Decoder<V>,
    /// Structure version the frames were built against
    version: u64,
    started: bool,
    done: bool,
    batch: Vec<(String, V)>,
}

impl<V: Send + 'static> Cursor<V> {
    pub(crate) fn new(
        tree: Arc<Mutex<Tree>>,
        min_key: impl Into<String>,
        take_while: Option<KeyPredicate>,
        decode: Decoder<V>,
    ) -> Self {
        Self {
            tree,
            frames: Vec::new(),
            min_key: min_key.into(),
            last_emitted: None,
            take_while,
            decode,
            version: 0,
            started: false,
            done: false,
            batch: Vec::new(),
        }
    }

    /// Build the frame stack down to the leaf owning `key`
    async fn descend(&mut self, tree: &mut Tree, key: &str) -> Result<NodeIdx> {
        self.frames.clear();
        tree.ensure_root().await?;
        let mut current = tree.root();
        loop {
            if tree.node(current)?.is_leaf() {
                return Ok(current);
            }
            tree.load_branch(current).await?;
            let branch = tree.branch(current)?;
            let position = branch.route(key);
            let child = child_at(tree, current, position)?;
            self.frames.push((current, position));
            current = child;
        }
    }

    /// Step to the next leaf, carrying exhausted frames upward
    async fn advance(&mut self, tree: &mut Tree) -> Result<Option<NodeIdx>> {
        loop {
            let Some((branch, position)) = self.frames.pop() else {
                return Ok(None);
            };
            if position + 1 < tree.branch(branch)?.children.len() {
                self.frames.push((branch, position + 1));
                break;
            }
        }

        // Leftmost path below the new position
        let (branch, position) = self.frames[self.frames.len() - 1];
        let mut current = child_at(tree, branch, position)?;
        while !tree.node(current)?.is_leaf() {
            tree.load_branch(current).await?;
            let child = child_at(tree, current, 0)?;
            self.frames.push((current, 0));
            current = child;
        }
        Ok(Some(current))
    }

    /// Push the qualifying entries of `leaf`; returns false once the scan is cut
    fn collect(&mut self, tree: &Tree, leaf: NodeIdx) -> Result<bool> {
        let values = &tree.leaf(leaf)?.values;
        let start = match &self.last_emitted {
            Some(last) => keys::upper_bound(values, last),
            None => keys::lower_bound(values, &self.min_key),
        };

        for (key, raw) in &values[start..] {
            if let Some(predicate) = self.take_while.as_mut() {
                if !predicate(key) {
                    return Ok(false);
                }
            }
            self.batch.push((key.clone(), (self.decode)(raw)?));
        }
        Ok(true)
    }
}

fn child_at(tree: &Tree, branch: NodeIdx, position: usize) -> Result<NodeIdx> {
    tree.branch(branch)?
        .children
        .get(position)
        .map(|(_, child)| *child)
        .ok_or_else(|| {
            BlobMapError::InvalidState(format!("branch {} has no child at {}", branch, position))
        })
}

#[async_trait]
impl<V: Send + 'static> BatchedEnumerator<(String, V)> for Cursor<V> {
    async fn get_next_batch(&mut self, _required: usize) -> Result<bool> {
        self.batch.clear();
        if self.done {
            return Ok(false);
        }

        let shared = self.tree.clone();
        let mut tree = shared.lock().await;

        loop {
            let leaf = if !self.started || tree.structure_version() != self.version {
                let anchor = self.last_emitted.clone().unwrap_or_else(|| self.min_key.clone());
                if self.started {
                    tracing::trace!(map = tree.name(), anchor = %anchor, "tree changed, re-descending");
                }
                self.started = true;
                self.version = tree.structure_version();
                self.descend(&mut tree, &anchor).await?
            } else {
                match self.advance(&mut tree).await? {
                    Some(leaf) => leaf,
                    None => {
                        self.done = true;
                        return Ok(false);
                    }
                }
            };

            tree.load_leaf(leaf).await?;
            let more = match self.collect(&tree, leaf) {
                Ok(more) => more,
                Err(e) => {
                    self.done = true;
                    self.batch.clear();
                    return Err(e);
                }
            };
            if let Some((key, _)) = self.batch.last() {
                self.last_emitted = Some(key.clone());
            }

            if !more {
                self.done = true;
                return Ok(!self.batch.is_empty());
            }
            if !self.batch.is_empty() {
                return Ok(true);
            }
            // Nothing qualifying in this leaf; keep walking
        }
    }

    fn current_batch(&self) -> &[(String, V)] {
        &self.batch
    }

    fn take_current_batch(&mut self) -> Vec<(String, V)> {
        std::mem::take(&mut self.batch)
    }
}

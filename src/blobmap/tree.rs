//! Tree manager
//!
//! Owns the node arena and everything shared between nodes: the id counter, the
//! garbage set, the resident-leaf order and the save pipeline.
//!
//! ## Copy-on-write
//! The first time a clean non-root node is dirtied its old id is retired into the
//! garbage set and it takes a fresh one, which in turn dirties its parent. The
//! root keeps its id until `save_new` moves it, so a saved snapshot (root id plus
//! the blobs reachable from it) is never written over by later mutation.
//!
//! ## Residency
//! Branches stay resident once loaded; only leaves are evicted, least recently
//! used first, and never while locked by a split.

use super::codec::{self, BranchRecord};
use super::keys::{self, compare_keys};
use super::memory::{MemoryGovernor, MemoryProbe};
use super::node::{split_upper, Branch, Leaf, Node, NodeBody, NodeIdx, Residency};
use super::pipeline::SavePipeline;
use super::BlobMapStats;
use crate::config::BlobMapOptions;
use crate::storage::BlobStorage;
use crate::{BlobMapError, Result};
use ahash::AHashSet;
use lru::LruCache;
use std::cmp::Ordering;
use std::fmt::Write as _;
use std::sync::Arc;

/// Blob name of a node id under an optional prefix
pub(crate) fn blob_name(prefix: Option<&str>, id: u64) -> String {
    match prefix {
        Some(prefix) => format!("{}{}", prefix, id),
        None => id.to_string(),
    }
}

pub(crate) struct Tree {
    storage: Arc<dyn BlobStorage>,
    options: BlobMapOptions,

    /// Node arena; freed slots are `None` and recycled through `free`
    nodes: Vec<Option<Node>>,
    free: Vec<NodeIdx>,
    root: NodeIdx,

    /// Id counter, persisted in the root blob
    highest_id: u64,

    /// Ids no longer referenced by the working tree
    garbage: AHashSet<u64>,

    /// Resident leaves, most recently used first
    loaded_leaves: LruCache<NodeIdx, ()>,

    pipeline: SavePipeline,
    governor: MemoryGovernor,

    /// Bumped whenever nodes move between parents or slots are freed
    structure_version: u64,
}

impl Tree {
    pub fn new(
        storage: Arc<dyn BlobStorage>,
        options: BlobMapOptions,
        probe: Arc<dyn MemoryProbe>,
    ) -> Self {
        let pipeline = SavePipeline::new(storage.clone(), options.max_pending_saves);
        let governor = MemoryGovernor::new(probe, options.memory_check_interval());
        let root_id = options.root_node_id;

        let mut tree = Self {
            storage,
            options,
            nodes: Vec::new(),
            free: Vec::new(),
            root: 0,
            highest_id: root_id,
            garbage: AHashSet::new(),
            loaded_leaves: LruCache::unbounded(),
            pipeline,
            governor,
            structure_version: 0,
        };
        tree.root = tree.alloc_node(Node::unloaded_branch(root_id, None));
        tree
    }

    pub fn name(&self) -> &str {
        self.options.display_name()
    }

    pub fn options(&self) -> &BlobMapOptions {
        &self.options
    }

    pub fn storage(&self) -> Arc<dyn BlobStorage> {
        self.storage.clone()
    }

    pub fn root(&self) -> NodeIdx {
        self.root
    }

    pub fn root_id(&self) -> Result<u64> {
        Ok(self.node(self.root)?.id)
    }

    pub fn structure_version(&self) -> u64 {
        self.structure_version
    }

    fn blob_name(&self, id: u64) -> String {
        blob_name(self.options.id_prefix.as_deref(), id)
    }

    // ---- arena ----

    fn alloc_node(&mut self, node: Node) -> NodeIdx {
        match self.free.pop() {
            Some(idx) => {
                self.nodes[idx] = Some(node);
                idx
            }
            None => {
                self.nodes.push(Some(node));
                self.nodes.len() - 1
            }
        }
    }

    fn free_node(&mut self, idx: NodeIdx) {
        if let Some(slot) = self.nodes.get_mut(idx) {
            *slot = None;
            self.loaded_leaves.pop(&idx);
            self.free.push(idx);
        }
    }

    pub fn node(&self, idx: NodeIdx) -> Result<&Node> {
        self.nodes
            .get(idx)
            .and_then(Option::as_ref)
            .ok_or_else(|| BlobMapError::InvalidState(format!("node slot {} is empty", idx)))
    }

    fn node_mut(&mut self, idx: NodeIdx) -> Result<&mut Node> {
        self.nodes
            .get_mut(idx)
            .and_then(Option::as_mut)
            .ok_or_else(|| BlobMapError::InvalidState(format!("node slot {} is empty", idx)))
    }

    pub fn branch(&self, idx: NodeIdx) -> Result<&Branch> {
        self.node(idx)?
            .branch()
            .ok_or_else(|| BlobMapError::InvalidState(format!("node {} is not a loaded branch", idx)))
    }

    fn branch_mut(&mut self, idx: NodeIdx) -> Result<&mut Branch> {
        self.node_mut(idx)?
            .branch_mut()
            .ok_or_else(|| BlobMapError::InvalidState(format!("node {} is not a loaded branch", idx)))
    }

    pub fn leaf(&self, idx: NodeIdx) -> Result<&Leaf> {
        self.node(idx)?
            .leaf()
            .ok_or_else(|| BlobMapError::InvalidState(format!("node {} is not a loaded leaf", idx)))
    }

    fn leaf_mut(&mut self, idx: NodeIdx) -> Result<&mut Leaf> {
        self.node_mut(idx)?
            .leaf_mut()
            .ok_or_else(|| BlobMapError::InvalidState(format!("node {} is not a loaded leaf", idx)))
    }

    // ---- loading ----

    pub async fn ensure_root(&mut self) -> Result<()> {
        self.load_branch(self.root).await
    }

    /// Materialize a branch; its children come back unloaded
    pub async fn load_branch(&mut self, idx: NodeIdx) -> Result<()> {
        let node = self.node(idx)?;
        if node.is_leaf() {
            return Err(BlobMapError::InvalidState(format!(
                "node {} is a leaf, expected a branch",
                idx
            )));
        }
        if node.is_loaded() {
            return Ok(());
        }

        let (id, parent) = (node.id, node.parent);
        let name = self.blob_name(id);
        let Some(bytes) = self.fetch(&name).await? else {
            if parent.is_some() {
                return Err(BlobMapError::Corruption(format!(
                    "branch blob {} is missing",
                    name
                )));
            }
            return self.init_root().await;
        };

        let record = codec::decode_branch(&name, &bytes)?;
        if !keys::is_strictly_sorted(&record.children) {
            return Err(BlobMapError::Corruption(format!(
                "branch blob {} has unsorted keys",
                name
            )));
        }
        if parent.is_none() {
            self.highest_id = self.highest_id.max(record.highest_id);
        }

        let mut children = Vec::with_capacity(record.children.len());
        for (key, child_id) in record.children {
            let child = if record.level == 0 {
                Node::unloaded_leaf(child_id, idx)
            } else {
                Node::unloaded_branch(child_id, Some(idx))
            };
            children.push((key, self.alloc_node(child)));
        }

        let level = record.level;
        self.node_mut(idx)?.body = NodeBody::Branch(Residency::Loaded(Branch { level, children }));
        tracing::trace!(map = self.name(), blob = %name, level, "loaded branch");
        Ok(())
    }

    /// First use of a root id with no blob: one level-0 root over one empty leaf
    async fn init_root(&mut self) -> Result<()> {
        let root = self.root;
        self.node_mut(root)?.body = NodeBody::Branch(Residency::Loaded(Branch::new(0)));

        let leaf_id = self.allocate_id()?;
        let leaf = self.alloc_node(Node::new_leaf(leaf_id, root, Vec::new()));
        self.branch_mut(root)?.children.push((String::new(), leaf));

        tracing::debug!(map = self.name(), root_id = self.root_id()?, "initialized empty root");
        self.register_leaf(leaf).await
    }

    /// Materialize a leaf, or refresh its recency if already resident
    pub async fn load_leaf(&mut self, idx: NodeIdx) -> Result<()> {
        let node = self.node(idx)?;
        if !node.is_leaf() {
            return Err(BlobMapError::InvalidState(format!(
                "node {} is a branch, expected a leaf",
                idx
            )));
        }
        if node.is_loaded() {
            self.loaded_leaves.promote(&idx);
            return Ok(());
        }

        // A missing leaf blob reads as empty
        let name = self.blob_name(node.id);
        let values = match self.fetch(&name).await? {
            Some(bytes) => codec::decode_leaf(&name, &bytes)?.values,
            None => Vec::new(),
        };
        if !keys::is_strictly_sorted(&values) {
            return Err(BlobMapError::Corruption(format!(
                "leaf blob {} has unsorted keys",
                name
            )));
        }

        let count = values.len();
        self.node_mut(idx)?.body = NodeBody::Leaf(Residency::Loaded(Leaf { values, locked: 0 }));
        tracing::trace!(map = self.name(), blob = %name, keys = count, "loaded leaf");
        self.register_leaf(idx).await
    }

    /// Read a node blob, first letting any pending write of it land
    async fn fetch(&mut self, name: &str) -> Result<Option<Vec<u8>>> {
        if self.pipeline.is_pending(name) {
            self.pipeline.flush().await?;
        }
        self.storage.fetch(name).await
    }

    /// Make room for one more resident leaf, then record `idx` as most recent
    async fn register_leaf(&mut self, idx: NodeIdx) -> Result<()> {
        let limit = self.options.max_leaves_loaded.saturating_sub(1);
        self.evict_to(limit).await?;
        self.loaded_leaves.put(idx, ());
        Ok(())
    }

    // ---- ids and garbage ----

    /// Next id from the counter; dirties the root, which persists it
    pub fn allocate_id(&mut self) -> Result<u64> {
        self.highest_id += 1;
        let root = self.root;
        self.node_mut(root)?.dirty = true;
        Ok(self.highest_id)
    }

    fn add_garbage(&mut self, id: u64) -> Result<()> {
        if !self.garbage.insert(id) {
            return Err(BlobMapError::DoubleFree(id));
        }
        Ok(())
    }

    /// Mark a node dirty, reassigning ids up the parent chain
    fn set_dirty(&mut self, idx: NodeIdx) -> Result<()> {
        let mut current = idx;
        loop {
            let node = self.node_mut(current)?;
            if node.dirty {
                return Ok(());
            }
            node.dirty = true;

            let Some(parent) = node.parent else {
                return Ok(());
            };
            let retired = node.id;
            self.add_garbage(retired)?;
            let fresh = self.allocate_id()?;
            self.node_mut(current)?.id = fresh;
            current = parent;
        }
    }

    // ---- lookup and mutation ----

    /// Descend by floor lookup to the leaf that owns `key`, loading on the way
    pub async fn find_leaf(&mut self, key: &str) -> Result<NodeIdx> {
        self.ensure_root().await?;
        let mut current = self.root;
        loop {
            if self.node(current)?.is_leaf() {
                self.load_leaf(current).await?;
                return Ok(current);
            }
            self.load_branch(current).await?;
            let branch = self.branch(current)?;
            current = branch
                .children
                .get(branch.route(key))
                .map(|(_, child)| *child)
                .ok_or_else(|| {
                    BlobMapError::InvalidState(format!("branch {} has no children", current))
                })?;
        }
    }

    pub async fn get(&mut self, key: &str) -> Result<Option<Vec<u8>>> {
        let leaf = self.find_leaf(key).await?;
        Ok(self.leaf(leaf)?.get(key).map(<[u8]>::to_vec))
    }

    /// Insert or replace the value stored under `key`
    pub async fn upsert(&mut self, key: &str, value: Vec<u8>) -> Result<()> {
        let leaf = self.find_leaf(key).await?;
        self.set_dirty(leaf)?;

        let max = self.options.max_node_keys;
        let contents = self.leaf(leaf)?;
        let position = keys::search(&contents.values, key);
        let len = contents.values.len();
        match position {
            Ok(index) => self.leaf_mut(leaf)?.values[index].1 = value,
            Err(index) if len < max => {
                self.leaf_mut(leaf)?.values.insert(index, (key.to_owned(), value))
            }
            Err(_) => self.split_leaf(leaf, key.to_owned(), value).await?,
        }

        self.limit_memory_consumption().await
    }

    async fn split_leaf(&mut self, leaf: NodeIdx, key: String, value: Vec<u8>) -> Result<()> {
        self.leaf_mut(leaf)?.locked += 1;
        let result = self.split_locked_leaf(leaf, key, value).await;
        if let Ok(contents) = self.leaf_mut(leaf) {
            contents.locked = contents.locked.saturating_sub(1);
        }
        result
    }

    async fn split_locked_leaf(&mut self, leaf: NodeIdx, key: String, value: Vec<u8>) -> Result<()> {
        let upper = split_upper(&mut self.leaf_mut(leaf)?.values);
        let median = upper
            .first()
            .map(|(k, _)| k.clone())
            .ok_or_else(|| BlobMapError::InvalidState("split of an empty leaf".into()))?;
        let parent = self
            .node(leaf)?
            .parent
            .ok_or_else(|| BlobMapError::InvalidState("leaf without a parent".into()))?;

        let peer_id = self.allocate_id()?;
        let peer = self.alloc_node(Node::new_leaf(peer_id, parent, upper));
        self.loaded_leaves.put(peer, ());
        self.branch_add(parent, median.clone(), peer)?;

        let target = if compare_keys(&key, &median) == Ordering::Less {
            leaf
        } else {
            peer
        };
        keys::upsert_sorted(&mut self.leaf_mut(target)?.values, key, value);
        self.structure_version += 1;

        tracing::debug!(map = self.name(), peer = peer_id, median = %median, "split leaf");

        let limit = self.options.max_leaves_loaded;
        self.evict_to(limit).await
    }

    /// Add `child` under `key`, splitting full branches up to the root
    fn branch_add(&mut self, branch: NodeIdx, key: String, child: NodeIdx) -> Result<()> {
        let max = self.options.max_node_keys;
        let (mut target, mut key, mut child) = (branch, key, child);

        loop {
            self.set_dirty(target)?;
            if self.branch(target)?.children.len() < max {
                return self.attach(target, key, child);
            }

            let level = self.branch(target)?.level;
            let upper = split_upper(&mut self.branch_mut(target)?.children);
            let median = upper
                .first()
                .map(|(k, _)| k.clone())
                .ok_or_else(|| BlobMapError::InvalidState("split of an empty branch".into()))?;
            let joins_upper = compare_keys(&key, &median) != Ordering::Less;

            match self.node(target)?.parent {
                Some(parent) => {
                    let peer_id = self.allocate_id()?;
                    let peer = self.alloc_node(Node::new_branch(peer_id, Some(parent), level));
                    for (k, c) in upper {
                        self.attach(peer, k, c)?;
                    }
                    self.attach(if joins_upper { peer } else { target }, key, child)?;
                    tracing::debug!(map = self.name(), peer = peer_id, level, median = %median, "split branch");

                    key = median;
                    child = peer;
                    target = parent;
                }
                None => {
                    // The root keeps its identity and grows a level
                    let lower_half = std::mem::take(&mut self.branch_mut(target)?.children);
                    let lower_id = self.allocate_id()?;
                    let lower = self.alloc_node(Node::new_branch(lower_id, Some(target), level));
                    let upper_id = self.allocate_id()?;
                    let higher = self.alloc_node(Node::new_branch(upper_id, Some(target), level));
                    for (k, c) in lower_half {
                        self.attach(lower, k, c)?;
                    }
                    for (k, c) in upper {
                        self.attach(higher, k, c)?;
                    }

                    let root = self.branch_mut(target)?;
                    root.level = level + 1;
                    root.children = vec![(String::new(), lower), (median.clone(), higher)];

                    self.attach(if joins_upper { higher } else { lower }, key, child)?;
                    tracing::debug!(map = self.name(), level = level + 1, median = %median, "root split");
                    return Ok(());
                }
            }
        }
    }

    fn attach(&mut self, branch: NodeIdx, key: String, child: NodeIdx) -> Result<()> {
        self.node_mut(child)?.parent = Some(branch);
        keys::upsert_sorted(&mut self.branch_mut(branch)?.children, key, child);
        Ok(())
    }

    /// Remove `key`; returns whether it was present
    ///
    /// A leaf emptied this way is detached unless it is its parent's first child.
    pub async fn delete(&mut self, key: &str) -> Result<bool> {
        let leaf = self.find_leaf(key).await?;
        let contents = self.leaf(leaf)?;
        let Ok(index) = keys::search(&contents.values, key) else {
            return Ok(false);
        };
        let remaining = contents.values.len() - 1;

        let parent = self
            .node(leaf)?
            .parent
            .ok_or_else(|| BlobMapError::InvalidState("leaf without a parent".into()))?;
        let slot = self.branch(parent)?.position_of(leaf).ok_or_else(|| {
            BlobMapError::InvalidState(format!("leaf {} missing from its parent", leaf))
        })?;

        if remaining == 0 && slot > 0 {
            self.detach_leaf(parent, slot, leaf)?;
        } else {
            self.set_dirty(leaf)?;
            self.leaf_mut(leaf)?.values.remove(index);
        }

        self.limit_memory_consumption().await?;
        Ok(true)
    }

    fn detach_leaf(&mut self, parent: NodeIdx, slot: usize, leaf: NodeIdx) -> Result<()> {
        let id = self.node(leaf)?.id;
        self.add_garbage(id)?;
        self.set_dirty(parent)?;
        self.branch_mut(parent)?.children.remove(slot);
        self.free_node(leaf);
        self.structure_version += 1;
        tracing::debug!(map = self.name(), leaf = id, "detached empty leaf");
        Ok(())
    }

    // ---- saving ----

    fn save_order(&self) -> Result<Vec<NodeIdx>> {
        // Post-order: every child is written before the branch naming it
        let mut order = Vec::new();
        let mut stack = vec![(self.root, false)];
        while let Some((idx, expanded)) = stack.pop() {
            if expanded {
                order.push(idx);
                continue;
            }
            stack.push((idx, true));
            if let Some(branch) = self.node(idx)?.branch() {
                stack.extend(branch.children.iter().rev().map(|(_, child)| (*child, false)));
            }
        }
        Ok(order)
    }

    async fn save_all(&mut self) -> Result<()> {
        let mut branches = Vec::new();
        for idx in self.save_order()? {
            let level = self.node(idx)?.branch().map(|branch| branch.level);
            match level {
                Some(level) => branches.push((level, idx)),
                None => self.save_leaf(idx).await?,
            }
        }

        // A branch becomes durable only after every node one level below it
        branches.sort_by_key(|(level, _)| *level);
        let mut flushed = None;
        for (level, idx) in branches {
            if flushed != Some(level) {
                self.pipeline.flush().await?;
                flushed = Some(level);
            }
            self.save_branch(idx).await?;
        }
        Ok(())
    }

    async fn save_leaf(&mut self, idx: NodeIdx) -> Result<()> {
        let node = self.node(idx)?;
        let Some(contents) = node.leaf() else {
            return Ok(());
        };
        if !node.dirty {
            return Ok(());
        }

        let name = self.blob_name(node.id);
        let data = codec::encode_leaf(&contents.values, self.options.compress_nodes)?;
        tracing::trace!(map = self.name(), blob = %name, bytes = data.len(), "saving leaf");

        self.pipeline.submit(name, data).await?;
        self.node_mut(idx)?.dirty = false;
        Ok(())
    }

    async fn save_branch(&mut self, idx: NodeIdx) -> Result<()> {
        let node = self.node(idx)?;
        let Some(branch) = node.branch() else {
            return Ok(());
        };
        if !node.dirty {
            return Ok(());
        }

        let children = branch
            .children
            .iter()
            .map(|(key, child)| Ok((key.clone(), self.node(*child)?.id)))
            .collect::<Result<Vec<_>>>()?;
        let record = BranchRecord {
            level: branch.level,
            highest_id: if node.parent.is_none() { self.highest_id } else { 0 },
            children,
        };
        let name = self.blob_name(node.id);
        let data = codec::encode_branch(&record, self.options.compress_nodes)?;
        tracing::trace!(map = self.name(), blob = %name, level = record.level, "saving branch");

        self.pipeline.submit(name, data).await?;
        self.node_mut(idx)?.dirty = false;
        Ok(())
    }

    pub async fn flush_pending_saves(&mut self) -> Result<()> {
        self.pipeline.flush().await
    }

    /// Save in place and delete everything garbage immediately
    pub async fn save_overwrite(&mut self) -> Result<()> {
        self.save_all().await?;
        self.pipeline.flush().await?;

        let retired: Vec<u64> = self.garbage.iter().copied().collect();
        for id in &retired {
            self.storage.delete(&self.blob_name(*id)).await?;
            self.garbage.remove(id);
        }
        tracing::debug!(map = self.name(), deleted = retired.len(), "saved in place");
        Ok(())
    }

    /// Save under a new root id; returns it with the ids the new version no longer
    /// references
    pub async fn save_new(&mut self) -> Result<(u64, Vec<u64>)> {
        let root = self.root;
        if self.node(root)?.dirty {
            let retired = self.node(root)?.id;
            self.add_garbage(retired)?;
            let fresh = self.allocate_id()?;
            self.node_mut(root)?.id = fresh;

            self.save_all().await?;
            self.pipeline.flush().await?;
        }

        let garbage: Vec<u64> = std::mem::take(&mut self.garbage).into_iter().collect();
        let root_id = self.root_id()?;
        tracing::debug!(map = self.name(), root_id, garbage = garbage.len(), "saved new version");
        Ok((root_id, garbage))
    }

    /// Wipe the storage namespace and restart from an empty root
    ///
    /// The id counter is kept, so ids stay unique across the reset.
    pub async fn clear(&mut self) -> Result<()> {
        self.pipeline.discard().await;
        self.storage.clear().await?;

        let root_id = self.root_id()?;
        self.nodes.clear();
        self.free.clear();
        self.loaded_leaves.clear();
        self.garbage.clear();
        self.root = self.alloc_node(Node::unloaded_branch(root_id, None));
        self.structure_version += 1;

        tracing::debug!(map = self.name(), "cleared");
        Ok(())
    }

    // ---- memory ----

    /// Periodic check: gated by the memory probe and its throttle
    pub async fn limit_memory_consumption(&mut self) -> Result<()> {
        if self.governor.check_due() {
            let limit = self.options.max_leaves_loaded;
            self.evict_to(limit).await?;
        }
        Ok(())
    }

    /// Evict least recently used unlocked leaves until at most `limit` remain
    async fn evict_to(&mut self, limit: usize) -> Result<()> {
        while self.loaded_leaves.len() > limit {
            let nodes = &self.nodes;
            let victim = self
                .loaded_leaves
                .iter()
                .rev()
                .map(|(idx, _)| *idx)
                .find(|idx| {
                    nodes
                        .get(*idx)
                        .and_then(Option::as_ref)
                        .and_then(Node::leaf)
                        .map_or(true, |leaf| leaf.locked == 0)
                });

            let Some(victim) = victim else {
                tracing::debug!(map = self.name(), resident = self.loaded_leaves.len(), "all resident leaves locked");
                return Ok(());
            };
            self.unload_leaf(victim).await?;
        }
        Ok(())
    }

    async fn unload_leaf(&mut self, idx: NodeIdx) -> Result<()> {
        if self.nodes.get(idx).and_then(Option::as_ref).is_some() {
            self.save_leaf(idx).await?;
            self.node_mut(idx)?.body = NodeBody::Leaf(Residency::Unloaded);
        }
        self.loaded_leaves.pop(&idx);
        tracing::trace!(map = self.name(), slot = idx, "evicted leaf");
        Ok(())
    }

    // ---- diagnostics ----

    pub fn stats(&self) -> BlobMapStats {
        let mut stats = BlobMapStats::default();
        let mut stack = vec![self.root];
        while let Some(idx) = stack.pop() {
            let Some(node) = self.nodes.get(idx).and_then(Option::as_ref) else {
                continue;
            };
            match &node.body {
                NodeBody::Branch(Residency::Loaded(branch)) => {
                    stats.branch_nodes_loaded += 1;
                    stack.extend(branch.children.iter().map(|(_, child)| *child));
                }
                NodeBody::Branch(Residency::Unloaded) => stats.branch_nodes_unloaded += 1,
                NodeBody::Leaf(Residency::Loaded(leaf)) => {
                    stats.leaf_nodes_loaded += 1;
                    stats.leaf_keys_loaded += leaf.values.len();
                }
                NodeBody::Leaf(Residency::Unloaded) => stats.leaf_nodes_unloaded += 1,
            }
        }
        stats.pending_saves = self.pipeline.in_flight();
        stats.garbage_ids = self.garbage.len();
        stats
    }

    /// Indented dump of the resident part of the tree
    pub fn print_tree(&self) -> String {
        let mut out = String::new();
        self.print_node(self.root, 0, &mut out);
        out
    }

    fn print_node(&self, idx: NodeIdx, depth: usize, out: &mut String) {
        let Some(node) = self.nodes.get(idx).and_then(Option::as_ref) else {
            return;
        };
        let indent = "  ".repeat(depth);
        let shown = |key: &str| if key.is_empty() { "(empty)".to_string() } else { key.to_string() };

        match &node.body {
            NodeBody::Branch(Residency::Unloaded) => {
                let _ = writeln!(out, "{}(unloaded branch: ID {})", indent, node.id);
            }
            NodeBody::Leaf(Residency::Unloaded) => {
                let _ = writeln!(out, "{}(unloaded leaf: ID {})", indent, node.id);
            }
            NodeBody::Branch(Residency::Loaded(branch)) => {
                for (key, child) in &branch.children {
                    let _ = writeln!(out, "{}-> {}", indent, shown(key));
                    self.print_node(*child, depth + 1, out);
                }
            }
            NodeBody::Leaf(Residency::Loaded(leaf)) => {
                for (key, value) in &leaf.values {
                    let _ = writeln!(out, "{}{} = {} bytes", indent, shown(key), value.len());
                }
            }
        }
    }
}

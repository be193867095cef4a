//! In-memory node model
//!
//! Nodes live in an arena owned by the tree and refer to each other by
//! [`NodeIdx`]. The arena index is only an in-memory handle; the storage id of a
//! node changes every time copy-on-write dirties it.

use super::keys;

/// Arena handle of a node
pub(crate) type NodeIdx = usize;

/// Whether a node's contents are materialized
#[derive(Debug)]
pub(crate) enum Residency<C> {
    Unloaded,
    Loaded(C),
}

impl<C> Residency<C> {
    pub fn is_loaded(&self) -> bool {
        matches!(self, Residency::Loaded(_))
    }

    pub fn loaded(&self) -> Option<&C> {
        match self {
            Residency::Loaded(contents) => Some(contents),
            Residency::Unloaded => None,
        }
    }

    pub fn loaded_mut(&mut self) -> Option<&mut C> {
        match self {
            Residency::Loaded(contents) => Some(contents),
            Residency::Unloaded => None,
        }
    }
}

#[derive(Debug)]
pub(crate) struct Branch {
    /// 0 means the children are leaves
    pub level: u32,
    /// Sorted by separator key; "" leads on the leftmost chain only
    pub children: Vec<(String, NodeIdx)>,
}

impl Branch {
    pub fn new(level: u32) -> Self {
        Self {
            level,
            children: Vec::new(),
        }
    }

    /// Position of the child a lookup for `key` routes to
    pub fn route(&self, key: &str) -> usize {
        keys::floor_index(&self.children, key)
    }

    pub fn position_of(&self, child: NodeIdx) -> Option<usize> {
        self.children.iter().position(|(_, idx)| *idx == child)
    }
}

#[derive(Debug, Default)]
pub(crate) struct Leaf {
    /// Sorted by key
    pub values: Vec<(String, Vec<u8>)>,
    /// Held while the leaf splits; a locked leaf is never evicted
    pub locked: u32,
}

impl Leaf {
    pub fn get(&self, key: &str) -> Option<&[u8]> {
        keys::search(&self.values, key)
            .ok()
            .map(|index| self.values[index].1.as_slice())
    }
}

#[derive(Debug)]
pub(crate) enum NodeBody {
    Branch(Residency<Branch>),
    Leaf(Residency<Leaf>),
}

#[derive(Debug)]
pub(crate) struct Node {
    /// Storage id; the blob name is the id with the map's prefix
    pub id: u64,
    pub dirty: bool,
    /// `None` for the root only
    pub parent: Option<NodeIdx>,
    pub body: NodeBody,
}

impl Node {
    pub fn unloaded_branch(id: u64, parent: Option<NodeIdx>) -> Self {
        Self {
            id,
            dirty: false,
            parent,
            body: NodeBody::Branch(Residency::Unloaded),
        }
    }

    pub fn unloaded_leaf(id: u64, parent: NodeIdx) -> Self {
        Self {
            id,
            dirty: false,
            parent: Some(parent),
            body: NodeBody::Leaf(Residency::Unloaded),
        }
    }

    /// A node created by a split or a fresh root: dirty from birth
    pub fn new_branch(id: u64, parent: Option<NodeIdx>, level: u32) -> Self {
        Self {
            id,
            dirty: true,
            parent,
            body: NodeBody::Branch(Residency::Loaded(Branch::new(level))),
        }
    }

    pub fn new_leaf(id: u64, parent: NodeIdx, values: Vec<(String, Vec<u8>)>) -> Self {
        Self {
            id,
            dirty: true,
            parent: Some(parent),
            body: NodeBody::Leaf(Residency::Loaded(Leaf { values, locked: 0 })),
        }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self.body, NodeBody::Leaf(_))
    }

    pub fn is_loaded(&self) -> bool {
        match &self.body {
            NodeBody::Branch(residency) => residency.is_loaded(),
            NodeBody::Leaf(residency) => residency.is_loaded(),
        }
    }

    pub fn branch(&self) -> Option<&Branch> {
        match &self.body {
            NodeBody::Branch(residency) => residency.loaded(),
            NodeBody::Leaf(_) => None,
        }
    }

    pub fn branch_mut(&mut self) -> Option<&mut Branch> {
        match &mut self.body {
            NodeBody::Branch(residency) => residency.loaded_mut(),
            NodeBody::Leaf(_) => None,
        }
    }

    pub fn leaf(&self) -> Option<&Leaf> {
        match &self.body {
            NodeBody::Leaf(residency) => residency.loaded(),
            NodeBody::Branch(_) => None,
        }
    }

    pub fn leaf_mut(&mut self) -> Option<&mut Leaf> {
        match &mut self.body {
            NodeBody::Leaf(residency) => residency.loaded_mut(),
            NodeBody::Branch(_) => None,
        }
    }
}

/// Split point shared by leaves and branches: the upper half starts at `len / 2`
pub(crate) fn split_upper<V>(entries: &mut Vec<(String, V)>) -> Vec<(String, V)> {
    let middle = entries.len() / 2;
    entries.split_off(middle)
}

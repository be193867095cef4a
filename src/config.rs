//! BlobMap configuration
//!
//! Tunes the split threshold, the resident-leaf cap and the write pipeline.

use crate::{BlobMapError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default split threshold (entries per node)
pub const DEFAULT_MAX_NODE_KEYS: usize = 1000;

/// Default resident-leaf cap
pub const DEFAULT_MAX_LEAVES_LOADED: usize = 1000;

/// Default limit of in-flight background writes
pub const DEFAULT_MAX_PENDING_SAVES: usize = 20;

/// Default throttle for the periodic memory check
pub const DEFAULT_MEMORY_CHECK_INTERVAL_MS: u64 = 5000;

/// Options for a single map instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlobMapOptions {
    /// Split threshold: a node holding this many entries splits on the next add
    pub max_node_keys: usize,

    /// Resident-leaf cap enforced by the eviction policy
    ///
    /// The cap is best effort: leaves locked mid-split are never evicted.
    pub max_leaves_loaded: usize,

    /// Prefix prepended to every node id to form its blob name
    ///
    /// Lets several maps share one storage namespace.
    pub id_prefix: Option<String>,

    /// Human-readable name used in log fields
    pub name: Option<String>,

    /// Root id of the snapshot to open (0 for a fresh store)
    pub root_node_id: u64,

    /// Writes allowed in flight before new writes wait
    pub max_pending_saves: usize,

    /// Throttle for the periodic memory check (milliseconds)
    pub memory_check_interval_ms: u64,

    /// Snappy-compress node blobs when it makes them smaller
    pub compress_nodes: bool,
}

impl Default for BlobMapOptions {
    fn default() -> Self {
        Self {
            max_node_keys: DEFAULT_MAX_NODE_KEYS,
            max_leaves_loaded: DEFAULT_MAX_LEAVES_LOADED,
            id_prefix: None,
            name: None,
            root_node_id: 0,
            max_pending_saves: DEFAULT_MAX_PENDING_SAVES,
            memory_check_interval_ms: DEFAULT_MEMORY_CHECK_INTERVAL_MS,
            compress_nodes: true,
        }
    }
}

impl BlobMapOptions {
    /// Small nodes and a tight leaf cap, so splits and evictions happen quickly
    pub fn for_testing() -> Self {
        Self {
            max_node_keys: 17,
            max_leaves_loaded: 8,
            memory_check_interval_ms: 0,
            ..Default::default()
        }
    }

    /// Wide nodes and a generous cap for bulk pipeline stages
    pub fn for_large_datasets() -> Self {
        Self {
            max_node_keys: 4000,
            max_leaves_loaded: 4000,
            max_pending_saves: 64,
            ..Default::default()
        }
    }

    pub fn with_max_node_keys(mut self, max_node_keys: usize) -> Self {
        self.max_node_keys = max_node_keys;
        self
    }

    pub fn with_max_leaves_loaded(mut self, max_leaves_loaded: usize) -> Self {
        self.max_leaves_loaded = max_leaves_loaded;
        self
    }

    pub fn with_id_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.id_prefix = Some(prefix.into());
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Open the snapshot whose root blob has this id
    pub fn with_root_node_id(mut self, root_node_id: u64) -> Self {
        self.root_node_id = root_node_id;
        self
    }

    pub fn with_max_pending_saves(mut self, max_pending_saves: usize) -> Self {
        self.max_pending_saves = max_pending_saves;
        self
    }

    pub fn with_compression(mut self, enabled: bool) -> Self {
        self.compress_nodes = enabled;
        self
    }

    /// Parse options from JSON; missing fields take their defaults
    pub fn from_json(json: &str) -> Result<Self> {
        let options: Self = serde_json::from_str(json)?;
        options.validate()?;
        Ok(options)
    }

    /// Check values the tree cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.max_node_keys < 2 {
            return Err(BlobMapError::InvalidArgument(format!(
                "max_node_keys must be at least 2, got {}",
                self.max_node_keys
            )));
        }
        if self.max_leaves_loaded == 0 {
            return Err(BlobMapError::InvalidArgument(
                "max_leaves_loaded must be at least 1".into(),
            ));
        }
        if self.max_pending_saves == 0 {
            return Err(BlobMapError::InvalidArgument(
                "max_pending_saves must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn memory_check_interval(&self) -> Duration {
        Duration::from_millis(self.memory_check_interval_ms)
    }

    /// Name used in log fields
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("(unnamed)")
    }
}

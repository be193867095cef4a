//! Persistent copy-on-write B-tree over blob storage
//!
//! Every node is one blob. Lookups descend by floor search over branch separators;
//! mutation dirties the touched leaf and its ancestors, giving each of them a fresh
//! id so a previously saved snapshot stays intact. A map is opened at a root id and
//! saved either in place ([`BlobMap::save_overwrite`]) or as a new version
//! ([`BlobMap::save_new`]).
//!
//! ```text
//!              root (level 1)
//!            ""      "m"
//!           /          \
//!     branch (0)     branch (0)
//!     ""   "f"       "m"   "t"
//!     |     |         |     |
//!   leaf  leaf      leaf  leaf
//! ```
//!
//! Values are bincode-encoded; the raw byte API bypasses the codec.

mod codec;
mod cursor;
pub mod keys;
pub mod memory;
pub mod multimap;
mod node;
mod pipeline;
mod tree;

pub use cursor::{Cursor, KeyPredicate};
pub use keys::{compare_keys, keys_equal_ignore_case};
pub use memory::{AlwaysUnderPressure, MemoryProbe};
pub use multimap::{BlobMultiMap, MultiMapKey};

use self::tree::Tree;
use crate::config::BlobMapOptions;
use crate::storage::BlobStorage;
use crate::Result;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::hash::Hash;
use std::marker::PhantomData;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Counts over the resident part of the tree
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobMapStats {
    pub leaf_keys_loaded: usize,
    pub leaf_nodes_loaded: usize,
    pub leaf_nodes_unloaded: usize,
    pub branch_nodes_loaded: usize,
    pub branch_nodes_unloaded: usize,
    pub pending_saves: usize,
    pub garbage_ids: usize,
}

fn encode_value<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    Ok(bincode::serialize(value)?)
}

fn decode_value<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    Ok(bincode::deserialize(bytes)?)
}

fn copy_raw(bytes: &[u8]) -> Result<Vec<u8>> {
    Ok(bytes.to_vec())
}

/// Typed handle to one map
///
/// Clones share the same tree.
pub struct BlobMap<T> {
    tree: Arc<Mutex<Tree>>,
    name: String,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for BlobMap<T> {
    fn clone(&self) -> Self {
        Self {
            tree: self.tree.clone(),
            name: self.name.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> BlobMap<T>
where
    T: Serialize + DeserializeOwned + Send + 'static,
{
    /// Open the map rooted at `options.root_node_id`
    ///
    /// Nothing is read until first use; a root id with no blob starts empty.
    pub fn new(storage: Arc<dyn BlobStorage>, options: BlobMapOptions) -> Result<Self> {
        Self::with_memory_probe(storage, options, Arc::new(AlwaysUnderPressure))
    }

    pub fn with_memory_probe(
        storage: Arc<dyn BlobStorage>,
        options: BlobMapOptions,
        probe: Arc<dyn MemoryProbe>,
    ) -> Result<Self> {
        options.validate()?;
        let name = options.display_name().to_owned();
        tracing::debug!(map = %name, root_id = options.root_node_id, "opening map");
        Ok(Self {
            tree: Arc::new(Mutex::new(Tree::new(storage, options, probe))),
            name,
            _marker: PhantomData,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Look up `key`; a missing key yields a handle without a value
    pub async fn get_key(&self, key: &str) -> Result<BlobMapKey<T>> {
        let raw = self.tree.lock().await.get(key).await?;
        Ok(BlobMapKey {
            tree: self.tree.clone(),
            key: key.to_owned(),
            raw,
            _marker: PhantomData,
        })
    }

    /// Decoded value under `key`, if any
    pub async fn get(&self, key: &str) -> Result<Option<T>> {
        self.get_key(key).await?.get_value()
    }

    /// Store `value` under `key`, replacing any previous value
    pub async fn set(&self, key: &str, value: &T) -> Result<()> {
        let bytes = encode_value(value)?;
        self.tree.lock().await.upsert(key, bytes).await
    }

    /// Remove `key`; returns whether it existed
    pub async fn delete_key(&self, key: &str) -> Result<bool> {
        self.tree.lock().await.delete(key).await
    }

    /// Read-modify-write of one key
    ///
    /// `updater` returns whether it changed the value; a missing key starts from
    /// `T::default()`. A changed value for which `can_remove` holds is deleted
    /// instead of stored.
    pub async fn mutate<U, R>(&self, key: &str, updater: U, can_remove: R) -> Result<()>
    where
        T: Default,
        U: FnOnce(&mut T) -> bool,
        R: FnOnce(&T) -> bool,
    {
        let mut entry = self.get_key(key).await?;
        match entry.get_value()? {
            Some(mut value) => {
                if !updater(&mut value) {
                    return Ok(());
                }
                if can_remove(&value) {
                    self.delete_key(key).await?;
                } else {
                    entry.update_value(&value).await?;
                }
            }
            None => {
                let mut value = T::default();
                if updater(&mut value) && !can_remove(&value) {
                    entry.update_value(&value).await?;
                }
            }
        }
        Ok(())
    }

    /// Save every dirty node in place and delete garbage blobs
    pub async fn save_overwrite(&self) -> Result<()> {
        self.tree.lock().await.save_overwrite().await
    }

    /// Save as a new version under a fresh root id
    ///
    /// The previous version stays readable until the snapshot's garbage is deleted.
    pub async fn save_new(&self) -> Result<SavedSnapshot> {
        let mut tree = self.tree.lock().await;
        let (root_id, garbage) = tree.save_new().await?;
        Ok(SavedSnapshot {
            root_id,
            garbage,
            storage: tree.storage(),
            prefix: tree.options().id_prefix.clone(),
        })
    }

    /// Delete every blob of the map and start over empty
    pub async fn clear(&self) -> Result<()> {
        self.tree.lock().await.clear().await
    }

    /// Sorted scan of keys `>= min_key`, cut at the first key failing `take_while`
    pub fn iterate_key_values(
        &self,
        min_key: &str,
        take_while: Option<KeyPredicate>,
    ) -> Cursor<T> {
        Cursor::new(self.tree.clone(), min_key, take_while, decode_value::<T>)
    }

    /// [`iterate_key_values`](Self::iterate_key_values) over undecoded bytes
    pub fn iterate_raw(
        &self,
        min_key: &str,
        take_while: Option<KeyPredicate>,
    ) -> Cursor<Vec<u8>> {
        Cursor::new(self.tree.clone(), min_key, take_while, copy_raw)
    }

    /// Fresh id from the map's persisted counter
    pub async fn allocate_id(&self) -> Result<u64> {
        let mut tree = self.tree.lock().await;
        tree.ensure_root().await?;
        tree.allocate_id()
    }

    pub async fn gather_stats(&self) -> BlobMapStats {
        self.tree.lock().await.stats()
    }

    pub async fn print_tree(&self) -> String {
        self.tree.lock().await.print_tree()
    }

    /// Wait for every background write; surfaces failures
    pub async fn flush_pending_saves(&self) -> Result<()> {
        self.tree.lock().await.flush_pending_saves().await
    }

    /// Run the throttled memory check now
    pub async fn limit_memory_consumption(&self) -> Result<()> {
        self.tree.lock().await.limit_memory_consumption().await
    }
}

impl<V> BlobMap<Vec<V>>
where
    V: Serialize + DeserializeOwned + Send + 'static,
{
    /// [`BlobMap::mutate`] for list values; an emptied list removes the key
    pub async fn mutate_list<U>(&self, key: &str, updater: U) -> Result<()>
    where
        U: FnOnce(&mut Vec<V>) -> bool,
    {
        self.mutate(key, updater, Vec::is_empty).await
    }

    /// Append `value` to the list stored under `key`
    pub async fn add_to_list(&self, key: &str, value: V) -> Result<()> {
        self.mutate_list(key, |list| {
            list.push(value);
            true
        })
        .await
    }
}

impl<K, V> BlobMap<HashMap<K, V>>
where
    K: Serialize + DeserializeOwned + Eq + Hash + Send + 'static,
    V: Serialize + DeserializeOwned + Send + 'static,
{
    /// [`BlobMap::mutate`] for dictionary values; an emptied dictionary removes the key
    pub async fn mutate_dictionary<U>(&self, key: &str, updater: U) -> Result<()>
    where
        U: FnOnce(&mut HashMap<K, V>) -> bool,
    {
        self.mutate(key, updater, HashMap::is_empty).await
    }
}

/// A key looked up in a map, with the value it had at lookup time
pub struct BlobMapKey<T> {
    tree: Arc<Mutex<Tree>>,
    key: String,
    raw: Option<Vec<u8>>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> BlobMapKey<T>
where
    T: Serialize + DeserializeOwned,
{
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn has_value(&self) -> bool {
        self.raw.is_some()
    }

    pub fn get_value(&self) -> Result<Option<T>> {
        self.raw.as_deref().map(decode_value).transpose()
    }

    pub fn raw_value(&self) -> Option<&[u8]> {
        self.raw.as_deref()
    }

    pub async fn update_value(&mut self, value: &T) -> Result<()> {
        let bytes = encode_value(value)?;
        self.update_raw_value(bytes).await
    }

    /// Store already-encoded bytes under this key
    pub async fn update_raw_value(&mut self, bytes: Vec<u8>) -> Result<()> {
        self.tree.lock().await.upsert(&self.key, bytes.clone()).await?;
        self.raw = Some(bytes);
        Ok(())
    }
}

/// Result of [`BlobMap::save_new`]
pub struct SavedSnapshot {
    root_id: u64,
    garbage: Vec<u64>,
    storage: Arc<dyn BlobStorage>,
    prefix: Option<String>,
}

impl SavedSnapshot {
    /// Root id to reopen this version with
    pub fn root_id(&self) -> u64 {
        self.root_id
    }

    /// Ids the new version no longer references
    pub fn garbage(&self) -> &[u64] {
        &self.garbage
    }

    /// Delete the blobs only older versions reference
    pub async fn delete_garbage(&self) -> Result<()> {
        for id in &self.garbage {
            let name = tree::blob_name(self.prefix.as_deref(), *id);
            self.storage.delete(&name).await?;
        }
        tracing::debug!(root_id = self.root_id, deleted = self.garbage.len(), "deleted garbage");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batched::{self, BatchedEnumerator, BatchedEnumeratorExt};
    use crate::storage::MemoryStorage;
    use crate::BlobMapError;
    use async_trait::async_trait;
    use parking_lot::Mutex as SyncMutex;
    use std::collections::HashMap;

    fn open(storage: &Arc<MemoryStorage>, options: BlobMapOptions) -> BlobMap<String> {
        BlobMap::new(storage.clone(), options).unwrap()
    }

    async fn fill(map: &BlobMap<String>, count: usize) -> Vec<String> {
        let keys: Vec<String> = (0..count).map(|n| format!("{:03}", n)).collect();
        for key in &keys {
            map.set(key, &format!("value {}", key)).await.unwrap();
        }
        keys
    }

    #[tokio::test]
    async fn test_missing_key_has_no_value() {
        let storage = Arc::new(MemoryStorage::new());
        let map = open(&storage, BlobMapOptions::default());

        let entry = map.get_key("nothing").await.unwrap();
        assert!(!entry.has_value());
        assert_eq!(entry.get_value().unwrap(), None);
        assert!(!map.delete_key("nothing").await.unwrap());
    }

    #[tokio::test]
    async fn test_store_and_retrieve() {
        let storage = Arc::new(MemoryStorage::new());
        let map = open(&storage, BlobMapOptions::for_testing());

        let mut entry = map.get_key("greeting").await.unwrap();
        entry.update_value(&"hello".to_string()).await.unwrap();
        assert!(entry.has_value());

        assert_eq!(map.get("greeting").await.unwrap(), Some("hello".to_string()));
        map.set("greeting", &"hi".to_string()).await.unwrap();
        assert_eq!(map.get("greeting").await.unwrap(), Some("hi".to_string()));

        assert!(map.delete_key("greeting").await.unwrap());
        assert_eq!(map.get("greeting").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_persists_across_reopen() {
        let storage = Arc::new(MemoryStorage::new());
        let map = open(&storage, BlobMapOptions::for_testing());
        let keys = fill(&map, 300).await;
        map.save_overwrite().await.unwrap();

        let reopened = open(&storage, BlobMapOptions::for_testing());
        for key in &keys {
            assert_eq!(reopened.get(key).await.unwrap(), Some(format!("value {}", key)));
        }
        assert!(!storage.is_empty());
    }

    #[tokio::test]
    async fn test_save_new_blob_lifecycle() {
        let storage = Arc::new(MemoryStorage::new());
        let map = open(&storage, BlobMapOptions::default());
        map.set("a", &"1".to_string()).await.unwrap();
        map.save_overwrite().await.unwrap();
        assert_eq!(storage.keys(), vec!["0", "1"]);

        map.set("b", &"2".to_string()).await.unwrap();
        let snapshot = map.save_new().await.unwrap();
        assert_eq!(storage.keys(), vec!["0", "1", "2", "3"]);
        assert_eq!(snapshot.root_id(), 3);

        snapshot.delete_garbage().await.unwrap();
        assert_eq!(storage.keys(), vec!["2", "3"]);

        let reopened = open(&storage, BlobMapOptions::default().with_root_node_id(3));
        assert_eq!(reopened.get("a").await.unwrap(), Some("1".to_string()));
        assert_eq!(reopened.get("b").await.unwrap(), Some("2".to_string()));
    }

    #[tokio::test]
    async fn test_snapshots_are_isolated() {
        let storage = Arc::new(MemoryStorage::new());
        let map = open(&storage, BlobMapOptions::for_testing());
        fill(&map, 200).await;
        let first = map.save_new().await.unwrap();

        map.set("050", &"changed".to_string()).await.unwrap();
        map.delete_key("100").await.unwrap();
        let second = map.save_new().await.unwrap();
        assert_ne!(first.root_id(), second.root_id());

        let old = open(&storage, BlobMapOptions::for_testing().with_root_node_id(first.root_id()));
        let new = open(&storage, BlobMapOptions::for_testing().with_root_node_id(second.root_id()));
        assert_eq!(old.get("050").await.unwrap(), Some("value 050".to_string()));
        assert_eq!(old.get("100").await.unwrap(), Some("value 100".to_string()));
        assert_eq!(new.get("050").await.unwrap(), Some("changed".to_string()));
        assert_eq!(new.get("100").await.unwrap(), None);
        assert_eq!(new.get("150").await.unwrap(), Some("value 150".to_string()));
    }

    #[tokio::test]
    async fn test_save_new_without_changes_keeps_root() {
        let storage = Arc::new(MemoryStorage::new());
        let map = open(&storage, BlobMapOptions::default());
        map.set("k", &"v".to_string()).await.unwrap();
        let first = map.save_new().await.unwrap();
        let second = map.save_new().await.unwrap();
        assert_eq!(first.root_id(), second.root_id());
        assert!(second.garbage().is_empty());
    }

    #[tokio::test]
    async fn test_iterates_all_keys_in_order() {
        let storage = Arc::new(MemoryStorage::new());
        let map = open(&storage, BlobMapOptions::for_testing());
        let keys = fill(&map, 562).await;

        let all = map.iterate_key_values("", None).to_list().await.unwrap();
        let seen: Vec<String> = all.iter().map(|(k, _)| k.clone()).collect();
        assert_eq!(seen, keys);

        let from_250 = map.iterate_key_values("250", None).to_list().await.unwrap();
        assert_eq!(from_250.len(), 312);
        assert_eq!(from_250[0], ("250".to_string(), "value 250".to_string()));
    }

    #[tokio::test]
    async fn test_iterates_from_every_start() {
        let storage = Arc::new(MemoryStorage::new());
        let options = BlobMapOptions::for_testing().with_max_node_keys(11);
        let map = open(&storage, options);
        let keys = fill(&map, 243).await;
        map.save_overwrite().await.unwrap();

        for (start, key) in keys.iter().enumerate() {
            let found = map.iterate_raw(key, None).to_list().await.unwrap();
            let found: Vec<&str> = found.iter().map(|(k, _)| k.as_str()).collect();
            let expected: Vec<&str> = keys[start..].iter().map(String::as_str).collect();
            assert_eq!(found, expected);
        }
    }

    #[tokio::test]
    async fn test_take_while_prefix() {
        let storage = Arc::new(MemoryStorage::new());
        let map = open(&storage, BlobMapOptions::for_testing());
        fill(&map, 500).await;

        let prefixed = map
            .iterate_key_values("01", Some(Box::new(|k: &str| k.starts_with("01"))))
            .to_list()
            .await
            .unwrap();
        let seen: Vec<String> = prefixed.into_iter().map(|(k, _)| k).collect();
        let expected: Vec<String> = (10..20).map(|n| format!("{:03}", n)).collect();
        assert_eq!(seen, expected);

        let none = map
            .iterate_key_values("", Some(Box::new(|_: &str| false)))
            .to_list()
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_cursor_survives_splits_between_batches() {
        let storage = Arc::new(MemoryStorage::new());
        let map = open(&storage, BlobMapOptions::for_testing());
        for n in (0..200).step_by(2) {
            map.set(&format!("{:03}", n), &String::new()).await.unwrap();
        }

        let mut cursor = map.iterate_key_values("", None);
        let mut seen = Vec::new();
        let mut odd = (1..200).step_by(2);
        while cursor.get_next_batch(1).await.unwrap() {
            seen.extend(cursor.take_current_batch().into_iter().map(|(k, _)| k));
            // Odd keys land in both finished and unvisited leaves
            for n in odd.by_ref().take(10) {
                map.set(&format!("{:03}", n), &String::new()).await.unwrap();
            }
        }

        let mut sorted = seen.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(seen, sorted);
        assert!(seen.contains(&"198".to_string()));
    }

    #[tokio::test]
    async fn test_merge_two_maps() {
        let storage = Arc::new(MemoryStorage::new());
        let evens = open(&storage, BlobMapOptions::for_testing().with_id_prefix("evens/"));
        let odds = open(&storage, BlobMapOptions::for_testing().with_id_prefix("odds/"));
        for n in 0..100 {
            let map = if n % 2 == 0 { &evens } else { &odds };
            map.set(&format!("{:03}", n), &n.to_string()).await.unwrap();
        }

        let sources = vec![
            evens.iterate_key_values("", None).boxed(),
            odds.iterate_key_values("", None).boxed(),
        ];
        let merged = batched::merge_by(sources, |a: &(String, String), b: &(String, String)| {
            compare_keys(&a.0, &b.0)
        })
            .select(|(_, v)| v)
            .to_list()
            .await
            .unwrap();
        let expected: Vec<String> = (0..100).map(|n: i32| n.to_string()).collect();
        assert_eq!(merged, expected);
    }

    #[tokio::test]
    async fn test_mutate() {
        let storage = Arc::new(MemoryStorage::new());
        let map: BlobMap<Vec<u32>> = BlobMap::new(storage.clone(), BlobMapOptions::default()).unwrap();

        map.mutate("list", |v| { v.push(1); true }, |v| v.is_empty()).await.unwrap();
        map.mutate("list", |v| { v.push(2); true }, |v| v.is_empty()).await.unwrap();
        assert_eq!(map.get("list").await.unwrap(), Some(vec![1, 2]));

        // Unchanged: nothing written, nothing removed
        map.mutate("list", |v| { v.clear(); false }, |_| true).await.unwrap();
        assert_eq!(map.get("list").await.unwrap(), Some(vec![1, 2]));

        map.mutate("list", |v| { v.clear(); true }, |v| v.is_empty()).await.unwrap();
        assert_eq!(map.get("list").await.unwrap(), None);

        // A fresh value that is removable is never stored
        map.mutate("other", |_| true, |v| v.is_empty()).await.unwrap();
        assert!(!map.get_key("other").await.unwrap().has_value());
    }

    #[tokio::test]
    async fn test_list_helpers() {
        let storage = Arc::new(MemoryStorage::new());
        let map: BlobMap<Vec<String>> = BlobMap::new(storage, BlobMapOptions::default()).unwrap();

        map.add_to_list("tags", "a".to_string()).await.unwrap();
        map.add_to_list("tags", "b".to_string()).await.unwrap();
        assert_eq!(
            map.get("tags").await.unwrap(),
            Some(vec!["a".to_string(), "b".to_string()])
        );

        map.mutate_list("tags", |list| {
            list.retain(|tag| tag != "a");
            true
        })
        .await
        .unwrap();
        assert_eq!(map.get("tags").await.unwrap(), Some(vec!["b".to_string()]));

        map.mutate_list("tags", |list| {
            list.clear();
            true
        })
        .await
        .unwrap();
        assert!(!map.get_key("tags").await.unwrap().has_value());
    }

    #[tokio::test]
    async fn test_mutate_dictionary() {
        let storage = Arc::new(MemoryStorage::new());
        let map: BlobMap<HashMap<String, u32>> =
            BlobMap::new(storage, BlobMapOptions::default()).unwrap();

        map.mutate_dictionary("counts", |counts| {
            counts.insert("x".to_string(), 1);
            counts.insert("y".to_string(), 2);
            true
        })
        .await
        .unwrap();
        let counts = map.get("counts").await.unwrap().unwrap();
        assert_eq!(counts.len(), 2);
        assert_eq!(counts.get("y"), Some(&2));

        map.mutate_dictionary("counts", |counts| {
            counts.remove("x");
            counts.remove("y");
            true
        })
        .await
        .unwrap();
        assert_eq!(map.get("counts").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_allocate_id_is_persisted() {
        let storage = Arc::new(MemoryStorage::new());
        let map = open(&storage, BlobMapOptions::default());
        let first = map.allocate_id().await.unwrap();
        let second = map.allocate_id().await.unwrap();
        assert!(second > first);
        map.save_overwrite().await.unwrap();

        let reopened = open(&storage, BlobMapOptions::default());
        assert!(reopened.allocate_id().await.unwrap() > second);
    }

    #[tokio::test]
    async fn test_clear_resets_map() {
        let storage = Arc::new(MemoryStorage::new());
        let map = open(&storage, BlobMapOptions::for_testing());
        fill(&map, 100).await;
        map.save_overwrite().await.unwrap();
        let before = map.allocate_id().await.unwrap();

        map.clear().await.unwrap();
        assert_eq!(map.get("010").await.unwrap(), None);
        assert!(map.iterate_raw("", None).to_list().await.unwrap().is_empty());
        assert!(map.allocate_id().await.unwrap() > before);

        map.set("x", &"y".to_string()).await.unwrap();
        map.save_overwrite().await.unwrap();
        let reopened = open(&storage, BlobMapOptions::for_testing());
        assert_eq!(reopened.get("x").await.unwrap(), Some("y".to_string()));
    }

    #[tokio::test]
    async fn test_stats_and_rejected_options() {
        let storage = Arc::new(MemoryStorage::new());
        let map = open(&storage, BlobMapOptions::for_testing());
        fill(&map, 100).await;

        let stats = map.gather_stats().await;
        assert!(stats.leaf_nodes_loaded <= 8);
        assert!(stats.leaf_nodes_unloaded > 0);
        map.flush_pending_saves().await.unwrap();
        assert_eq!(map.gather_stats().await.pending_saves, 0);
        assert!(map.print_tree().await.contains("-> (empty)"));

        let bad = BlobMap::<String>::new(storage, BlobMapOptions::default().with_max_node_keys(1));
        assert!(matches!(bad, Err(BlobMapError::InvalidArgument(_))));
    }

    /// Refuses every store while `failing` is set
    #[derive(Default)]
    struct Unreliable {
        inner: MemoryStorage,
        failing: SyncMutex<bool>,
        attempts: SyncMutex<HashMap<String, usize>>,
    }

    #[async_trait]
    impl BlobStorage for Unreliable {
        async fn fetch(&self, key: &str) -> Result<Option<Vec<u8>>> {
            self.inner.fetch(key).await
        }

        async fn store(&self, key: &str, data: Vec<u8>) -> Result<()> {
            *self.attempts.lock().entry(key.to_string()).or_insert(0) += 1;
            if *self.failing.lock() {
                return Err(BlobMapError::storage("service unavailable"));
            }
            self.inner.store(key, data).await
        }

        async fn delete(&self, key: &str) -> Result<()> {
            self.inner.delete(key).await
        }

        async fn clear(&self) -> Result<()> {
            self.inner.clear().await
        }
    }

    #[tokio::test]
    async fn test_failed_save_can_be_retried() {
        let storage = Arc::new(Unreliable::default());
        let map: BlobMap<String> = BlobMap::new(storage.clone(), BlobMapOptions::default()).unwrap();
        map.set("k", &"v".to_string()).await.unwrap();

        *storage.failing.lock() = true;
        let err = map.save_overwrite().await.unwrap_err();
        assert!(matches!(err, BlobMapError::BackgroundWrites(_)));
        assert!(!storage.inner.contains("1"));

        *storage.failing.lock() = false;
        map.save_overwrite().await.unwrap();
        assert!(storage.inner.contains("0") && storage.inner.contains("1"));
        assert!(storage.attempts.lock()["1"] >= 2);

        let reopened: BlobMap<String> = BlobMap::new(storage.clone(), BlobMapOptions::default()).unwrap();
        assert_eq!(reopened.get("k").await.unwrap(), Some("v".to_string()));
    }
}

//! Multi-valued keys over a single map
//!
//! Each entry is stored under `"{value}-{id:020}"`, where the id comes from the
//! map's own counter. Zero-padding keeps the entries of one value in insertion
//! order; the composite key is split at its last `-`, so values may contain
//! dashes themselves.

use super::keys::{compare_keys, keys_equal_ignore_case, starts_with_ignore_case};
use super::{BlobMap, KeyPredicate};
use crate::batched::{BatchedEnumeratorExt, BoxBatched};
use crate::Result;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::cmp::Ordering;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MultiMapKey {
    pub value: String,
    pub id: String,
}

impl MultiMapKey {
    pub fn new(value: impl Into<String>, id: u64) -> Self {
        Self {
            value: value.into(),
            id: format!("{:020}", id),
        }
    }

    /// Split a stored key at its last `-`
    pub fn parse(raw: &str) -> Option<Self> {
        let (value, id) = raw.rsplit_once('-')?;
        Some(Self {
            value: value.to_owned(),
            id: id.to_owned(),
        })
    }

    /// Smallest stored key for `value`, and the prefix every one of them shares
    fn lower_bound(value: &str) -> String {
        format!("{}-", value)
    }
}

impl fmt::Display for MultiMapKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.value, self.id)
    }
}

/// Scan over multi-map entries
pub type MultiMapCursor<T> = BoxBatched<(MultiMapKey, T)>;

fn parse_entry<T>((raw, value): (String, T)) -> Option<(MultiMapKey, T)> {
    match MultiMapKey::parse(&raw) {
        Some(key) => Some((key, value)),
        None => {
            tracing::warn!(key = %raw, "skipping entry without a multi-map id");
            None
        }
    }
}

/// Stored keys that can still hold a value below `until`
///
/// An entry `"{v}-{id}"` sorts past `until` when `v` is a prefix of `until`
/// followed by a char at or below `-`. Such entries all share the part of
/// `until` before its first such char, so the scan runs on through that prefix.
fn below_until(until: &str) -> KeyPredicate {
    let until = until.to_owned();
    let shared = until
        .char_indices()
        .find(|(_, c)| *c <= '-')
        .map(|(index, _)| until[..index].to_owned());
    Box::new(move |raw: &str| {
        compare_keys(raw, &until) == Ordering::Less
            || shared
                .as_deref()
                .map_or(false, |prefix| starts_with_ignore_case(raw, prefix))
    })
}

pub struct BlobMultiMap<T> {
    map: BlobMap<T>,
}

impl<T> BlobMultiMap<T>
where
    T: Serialize + DeserializeOwned + Send + 'static,
{
    pub fn new(map: BlobMap<T>) -> Self {
        Self { map }
    }

    /// The underlying single-valued map
    pub fn inner(&self) -> &BlobMap<T> {
        &self.map
    }

    /// Add another value under `key`
    pub async fn add(&self, key: &str, value: &T) -> Result<MultiMapKey> {
        let id = self.map.allocate_id().await?;
        let full = MultiMapKey::new(key, id);
        self.map.set(&full.to_string(), value).await?;
        Ok(full)
    }

    pub async fn delete(&self, key: &MultiMapKey) -> Result<bool> {
        self.map.delete_key(&key.to_string()).await
    }

    pub async fn upsert(&self, key: &MultiMapKey, value: &T) -> Result<()> {
        self.map.set(&key.to_string(), value).await
    }

    pub async fn upsert_raw(&self, key: &MultiMapKey, bytes: Vec<u8>) -> Result<()> {
        let mut entry = self.map.get_key(&key.to_string()).await?;
        entry.update_raw_value(bytes).await
    }

    /// Every value stored under `key`, in insertion order
    pub fn iterate_key(&self, key: &str) -> MultiMapCursor<T> {
        let prefix = MultiMapKey::lower_bound(key);
        let wanted = key.to_owned();
        let scan_prefix = prefix.clone();
        self.map
            .iterate_key_values(
                &prefix,
                Some(Box::new(move |raw: &str| {
                    starts_with_ignore_case(raw, &scan_prefix)
                })),
            )
            .select_many(parse_entry::<T>)
            .filter(move |(k, _): &(MultiMapKey, T)| keys_equal_ignore_case(&k.value, &wanted))
            .boxed()
    }

    /// Entries with `from <= value < until`; no upper limit without `until`
    pub fn iterate_key_range(&self, from: &str, until: Option<&str>) -> MultiMapCursor<T> {
        let from_value = from.to_owned();
        let until_value = until.map(str::to_owned);
        self.map
            .iterate_key_values(from, until.map(below_until))
            .select_many(parse_entry::<T>)
            .filter(move |(k, _): &(MultiMapKey, T)| {
                compare_keys(&k.value, &from_value) != Ordering::Less
                    && until_value
                        .as_deref()
                        .map_or(true, |until| compare_keys(&k.value, until) == Ordering::Less)
            })
            .boxed()
    }

    pub fn iterate_all(&self) -> MultiMapCursor<T> {
        self.map
            .iterate_key_values("", None)
            .select_many(parse_entry::<T>)
            .boxed()
    }

    pub async fn save_overwrite(&self) -> Result<()> {
        self.map.save_overwrite().await
    }

    pub async fn clear(&self) -> Result<()> {
        self.map.clear().await
    }
}

//! Group id resolution: internal gateway id → externally addressable id.
//!
//! The gateway reports group messages with an opaque per-account identifier,
//! but sending to a group needs the public id. The resolver keeps a bounded
//! LRU of translations and asks the gateway's group directory on a miss.

use anyhow::{bail, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Deserialize;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

/// One group descriptor from `GET /v1/groups/{account}`.
#[derive(Debug, Clone, Deserialize)]
pub struct GroupEntry {
    #[serde(default)]
    pub name: Option<String>,
    /// Externally addressable id, used as a send recipient.
    #[serde(default)]
    pub id: Option<String>,
    /// Opaque per-account id the receive stream reports.
    #[serde(default)]
    pub internal_id: Option<String>,
}

/// Source of group descriptors, implemented by the Signal client.
#[async_trait]
pub trait GroupDirectory: Send + Sync {
    async fn list_groups(&self) -> Result<Vec<GroupEntry>>;
}

/// Bounded LRU map. Front of the recency deque is the most recently used
/// key; inserting at capacity evicts from the back.
#[derive(Debug)]
pub struct LruCache {
    capacity: usize,
    map: HashMap<String, String>,
    recency: VecDeque<String>,
}

impl LruCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            map: HashMap::new(),
            recency: VecDeque::new(),
        }
    }

    /// Look up a key, promoting it to most-recently-used on a hit.
    pub fn get(&mut self, key: &str) -> Option<String> {
        let value = self.map.get(key)?.clone();
        self.promote(key);
        Some(value)
    }

    /// Insert a translation, evicting the least recently used entry when at
    /// capacity. Re-inserting an existing key updates it in place.
    pub fn insert(&mut self, key: String, value: String) {
        if self.map.insert(key.clone(), value).is_some() {
            self.promote(&key);
            return;
        }
        if self.map.len() > self.capacity {
            if let Some(evicted) = self.recency.pop_back() {
                self.map.remove(&evicted);
            }
        }
        self.recency.push_front(key);
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    fn promote(&mut self, key: &str) {
        if let Some(pos) = self.recency.iter().position(|k| k == key) {
            let entry = self.recency.remove(pos).unwrap_or_else(|| key.to_string());
            self.recency.push_front(entry);
        }
    }
}

/// Cached translator from internal to public group ids.
pub struct GroupResolver {
    directory: Arc<dyn GroupDirectory>,
    cache: Mutex<LruCache>,
}

impl GroupResolver {
    pub fn new(directory: Arc<dyn GroupDirectory>, max_cache_size: usize) -> Self {
        Self {
            directory,
            cache: Mutex::new(LruCache::new(max_cache_size)),
        }
    }

    /// Translate an internal group id to the public one. The directory fetch
    /// runs outside the cache lock; concurrent misses on the same id may
    /// fetch twice, which is harmless.
    pub async fn resolve(&self, internal_id: &str) -> Result<String> {
        if let Some(hit) = self.cache.lock().get(internal_id) {
            return Ok(hit);
        }

        let groups = self.directory.list_groups().await?;
        let Some(public_id) = groups.into_iter().find_map(|group| {
            (group.internal_id.as_deref() == Some(internal_id))
                .then_some(group.id)
                .flatten()
                .filter(|id| !id.is_empty())
        }) else {
            bail!("gateway knows no group with internal id {internal_id}");
        };

        self.cache
            .lock()
            .insert(internal_id.to_string(), public_id.clone());
        Ok(public_id)
    }

    #[cfg(test)]
    fn cached_len(&self) -> usize {
        self.cache.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn lru_hit_and_miss() {
        let mut cache = LruCache::new(4);
        cache.insert("a".into(), "pub-a".into());
        assert_eq!(cache.get("a").as_deref(), Some("pub-a"));
        assert!(cache.get("b").is_none());
    }

    #[test]
    fn lru_never_exceeds_capacity() {
        let mut cache = LruCache::new(3);
        for i in 0..10 {
            cache.insert(format!("k{i}"), format!("v{i}"));
            assert!(cache.len() <= 3);
        }
    }

    #[test]
    fn lru_evicts_least_recently_used() {
        let mut cache = LruCache::new(2);
        cache.insert("a".into(), "1".into());
        cache.insert("b".into(), "2".into());
        // Touch "a" so "b" becomes the eviction candidate.
        assert!(cache.get("a").is_some());
        cache.insert("c".into(), "3".into());
        assert!(cache.get("b").is_none());
        assert!(cache.get("a").is_some());
        assert!(cache.get("c").is_some());
    }

    #[test]
    fn lru_reinsert_updates_in_place() {
        let mut cache = LruCache::new(2);
        cache.insert("a".into(), "old".into());
        cache.insert("b".into(), "2".into());
        cache.insert("a".into(), "new".into());
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("a").as_deref(), Some("new"));
        // "a" was promoted by the update, so "b" gets evicted next.
        cache.insert("c".into(), "3".into());
        assert!(cache.get("b").is_none());
    }

    #[test]
    fn lru_capacity_floor_is_one() {
        let mut cache = LruCache::new(0);
        cache.insert("a".into(), "1".into());
        cache.insert("b".into(), "2".into());
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("b").as_deref(), Some("2"));
    }

    struct FakeDirectory {
        groups: Vec<GroupEntry>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl GroupDirectory for FakeDirectory {
        async fn list_groups(&self) -> Result<Vec<GroupEntry>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.groups.clone())
        }
    }

    fn entry(internal: &str, public: &str) -> GroupEntry {
        GroupEntry {
            name: Some("grp".into()),
            id: Some(public.into()),
            internal_id: Some(internal.into()),
        }
    }

    #[tokio::test]
    async fn resolve_fetches_once_then_caches() {
        let directory = Arc::new(FakeDirectory {
            groups: vec![entry("INT1", "PUB1")],
            calls: AtomicUsize::new(0),
        });
        let resolver = GroupResolver::new(directory.clone(), 10);

        assert_eq!(resolver.resolve("INT1").await.unwrap(), "PUB1");
        assert_eq!(resolver.resolve("INT1").await.unwrap(), "PUB1");
        assert_eq!(directory.calls.load(Ordering::SeqCst), 1);
        assert_eq!(resolver.cached_len(), 1);
    }

    #[tokio::test]
    async fn resolve_unknown_group_fails_without_caching() {
        let directory = Arc::new(FakeDirectory {
            groups: vec![entry("INT1", "PUB1")],
            calls: AtomicUsize::new(0),
        });
        let resolver = GroupResolver::new(directory, 10);

        assert!(resolver.resolve("MISSING").await.is_err());
        assert_eq!(resolver.cached_len(), 0);
    }

    #[tokio::test]
    async fn resolve_skips_descriptor_with_empty_public_id() {
        let directory = Arc::new(FakeDirectory {
            groups: vec![
                GroupEntry {
                    name: None,
                    id: Some(String::new()),
                    internal_id: Some("INT1".into()),
                },
                entry("INT1", "PUB1"),
            ],
            calls: AtomicUsize::new(0),
        });
        let resolver = GroupResolver::new(directory, 10);
        assert_eq!(resolver.resolve("INT1").await.unwrap(), "PUB1");
    }
}

//! In-process LRU tier.

use lru::LruCache;
use parking_lot::Mutex;
use serde_json::Value;
use std::num::NonZeroUsize;
use std::time::Duration;
use tokio::time::Instant;

struct LocalEntry {
    value: Value,
    tags: Vec<String>,
    expires_at: Instant,
}

pub(crate) struct LocalTier {
    entries: Mutex<LruCache<String, LocalEntry>>,
    ttl: Duration,
}

impl LocalTier {
    pub(crate) fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            ttl,
        }
    }

    pub(crate) fn get(&self, key: &str) -> Option<Value> {
        let mut entries = self.entries.lock();
        let expired = match entries.get(key) {
            Some(entry) if Instant::now() < entry.expires_at => return Some(entry.value.clone()),
            Some(_) => true,
            None => false,
        };
        if expired {
            entries.pop(key);
        }
        None
    }

    /// Keeps the entry for `min(local ttl, ttl)`.
    pub(crate) fn insert(&self, key: &str, value: Value, tags: &[String], ttl: Duration) {
        let ttl = ttl.min(self.ttl);
        if ttl.is_zero() {
            return;
        }
        self.entries.lock().put(
            key.to_string(),
            LocalEntry {
                value,
                tags: tags.to_vec(),
                expires_at: Instant::now() + ttl,
            },
        );
    }

    pub(crate) fn remove(&self, key: &str) -> bool {
        self.entries.lock().pop(key).is_some()
    }

    pub(crate) fn invalidate_tag(&self, tag: &str) -> usize {
        let mut entries = self.entries.lock();
        let doomed: Vec<String> = entries
            .iter()
            .filter(|(_, e)| e.tags.iter().any(|t| t == tag))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &doomed {
            entries.pop(key);
        }
        doomed.len()
    }

    pub(crate) fn clear(&self) {
        self.entries.lock().clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test(start_paused = true)]
    async fn test_entry_expires_at_shorter_ttl() {
        let tier = LocalTier::new(8, Duration::from_secs(10));
        tier.insert("a", json!(1), &[], Duration::from_secs(60));
        tier.insert("b", json!(2), &[], Duration::from_secs(2));
        tokio::time::advance(Duration::from_secs(3)).await;
        assert_eq!(tier.get("a"), Some(json!(1)));
        assert_eq!(tier.get("b"), None);
        tokio::time::advance(Duration::from_secs(8)).await;
        assert_eq!(tier.get("a"), None);
        assert_eq!(tier.len(), 0);
    }

    #[test]
    fn test_capacity_evicts_least_recent() {
        let tier = LocalTier::new(2, Duration::from_secs(60));
        tier.insert("a", json!(1), &[], Duration::from_secs(60));
        tier.insert("b", json!(2), &[], Duration::from_secs(60));
        assert!(tier.get("a").is_some());
        tier.insert("c", json!(3), &[], Duration::from_secs(60));
        assert!(tier.get("b").is_none());
        assert!(tier.get("a").is_some());
    }

    #[test]
    fn test_invalidate_tag() {
        let tier = LocalTier::new(8, Duration::from_secs(60));
        let tags = vec!["word:7".to_string()];
        tier.insert("a", json!(1), &tags, Duration::from_secs(60));
        tier.insert("b", json!(2), &[], Duration::from_secs(60));
        assert_eq!(tier.invalidate_tag("word:7"), 1);
        assert!(tier.get("a").is_none());
        assert!(tier.get("b").is_some());
    }
}

use std::collections::HashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};

/// Expiring key/value store. Entries older than the TTL are treated as
/// absent and swept out by `purge_expired`.
#[derive(Debug)]
pub struct TtlCache<K, V> {
    entries: HashMap<K, (V, Instant)>,
    ttl: Duration,
}

impl<K: Eq + Hash + Clone, V: Clone> TtlCache<K, V> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn get(&self, key: &K) -> Option<V> {
        let (value, inserted_at) = self.entries.get(key)?;
        if inserted_at.elapsed() > self.ttl {
            return None;
        }
        Some(value.clone())
    }

    pub fn insert(&mut self, key: K, value: V) {
        self.entries.insert(key, (value, Instant::now()));
    }

    pub fn purge_expired(&mut self) {
        let ttl = self.ttl;
        self.entries.retain(|_, (_, at)| at.elapsed() <= ttl);
    }

    /// Oldest-first eviction down to `max_len` entries.
    pub fn evict_to(&mut self, max_len: usize) {
        while self.entries.len() > max_len {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|(_, (_, at))| *at)
                .map(|(k, _)| k.clone());
            match oldest {
                Some(k) => {
                    self.entries.remove(&k);
                }
                None => break,
            }
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expired_entries_are_absent() {
        let mut cache: TtlCache<&str, u32> = TtlCache::new(Duration::from_millis(0));
        cache.insert("a", 1);
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(cache.get(&"a"), None);
        cache.purge_expired();
        assert!(cache.is_empty());
    }

    #[test]
    fn live_entries_round_trip() {
        let mut cache: TtlCache<String, String> = TtlCache::new(Duration::from_secs(60));
        cache.insert("k".into(), "v".into());
        assert_eq!(cache.get(&"k".to_string()).as_deref(), Some("v"));
    }

    #[test]
    fn eviction_keeps_newest() {
        let mut cache: TtlCache<u32, u32> = TtlCache::new(Duration::from_secs(60));
        for i in 0..5 {
            cache.insert(i, i);
            std::thread::sleep(Duration::from_millis(2));
        }
        cache.evict_to(2);
        assert_eq!(cache.len(), 2);
        assert!(cache.get(&4).is_some());
        assert!(cache.get(&0).is_none());
    }
}

use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::models::WebserviceConfig;

/// Default lifetime of a cached webservice config: 5 minutes.
pub const DEFAULT_CONFIG_TTL: Duration = Duration::from_secs(300);

/// Entry stored in the cache with its own expiry timestamp.
#[derive(Clone)]
pub(crate) struct CacheEntry {
    value: Arc<WebserviceConfig>,
    pub(crate) expires_at: Instant,
}

impl CacheEntry {
    fn live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// Webservice config cache, indexed by name and by id.
///
/// Every entry expires on its own schedule: loading a new webservice never
/// extends or shortens the lifetime of the others. Expired entries are
/// dropped lazily on read; `evict_expired()` sweeps them eagerly.
/// Any write to the backing repository must call `invalidate_all()`.
#[derive(Clone)]
pub struct ConfigCache {
    by_name: Arc<DashMap<String, CacheEntry>>,
    by_id: Arc<DashMap<i32, CacheEntry>>,
    ttl: Duration,
}

impl ConfigCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            by_name: Arc::new(DashMap::new()),
            by_id: Arc::new(DashMap::new()),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn get_by_name(&self, name: &str) -> Option<Arc<WebserviceConfig>> {
        let now = Instant::now();
        if let Some(entry) = self.by_name.get(name) {
            if entry.live(now) {
                return Some(Arc::clone(&entry.value));
            }
            // expired; drop the ref before removing
            drop(entry);
            self.by_name.remove_if(name, |_, e| !e.live(now));
        }
        None
    }

    pub fn get_by_id(&self, id: i32) -> Option<Arc<WebserviceConfig>> {
        let now = Instant::now();
        if let Some(entry) = self.by_id.get(&id) {
            if entry.live(now) {
                return Some(Arc::clone(&entry.value));
            }
            drop(entry);
            self.by_id.remove_if(&id, |_, e| !e.live(now));
        }
        None
    }

    /// Cache `config` under both its name and its id with a fresh TTL.
    /// A previous entry for the same id under another name is dropped.
    pub fn insert(&self, config: WebserviceConfig) -> Arc<WebserviceConfig> {
        let value = Arc::new(config);
        let entry = CacheEntry {
            value: Arc::clone(&value),
            expires_at: expiry(Instant::now(), self.ttl),
        };
        self.by_name.insert(value.name.clone(), entry.clone());
        if let Some(previous) = self.by_id.insert(value.id, entry) {
            if previous.value.name != value.name {
                self.by_name
                    .remove_if(&previous.value.name, |_, e| e.value.id == value.id);
            }
        }
        value
    }

    /// Drop every entry under every key.
    pub fn invalidate_all(&self) {
        self.by_name.clear();
        self.by_id.clear();
    }

    /// Remove all expired entries. Returns how many name-keyed entries went.
    pub fn evict_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.by_name.len();
        self.by_name.retain(|_, entry| entry.live(now));
        self.by_id.retain(|_, entry| entry.live(now));
        before - self.by_name.len()
    }

    /// Number of webservices currently cached (for metrics / debugging).
    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}

/// `now + ttl`, falling back to the default TTL when that overflows.
fn expiry(now: Instant, ttl: Duration) -> Instant {
    now.checked_add(ttl)
        .or_else(|| now.checked_add(DEFAULT_CONFIG_TTL))
        .unwrap_or(now)
}

impl Default for ConfigCache {
    fn default() -> Self {
        Self::new(DEFAULT_CONFIG_TTL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::WebserviceConfigData;

    fn ws(id: i32, name: &str) -> WebserviceConfig {
        let mut ws = WebserviceConfig::new(name, WebserviceConfigData::default());
        ws.id = id;
        ws
    }

    #[test]
    fn test_insert_indexes_by_name_and_id() {
        let cache = ConfigCache::default();
        let stored = cache.insert(ws(7, "CRM"));
        let by_name = cache.get_by_name("CRM").unwrap();
        let by_id = cache.get_by_id(7).unwrap();
        assert!(Arc::ptr_eq(&stored, &by_name));
        assert!(Arc::ptr_eq(&stored, &by_id));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_entries_expire_independently() {
        let cache = ConfigCache::new(Duration::from_millis(80));
        cache.insert(ws(1, "Old"));
        std::thread::sleep(Duration::from_millis(50));
        cache.insert(ws(2, "New"));
        std::thread::sleep(Duration::from_millis(50));

        // "Old" has outlived its TTL, "New" has not.
        assert!(cache.get_by_name("Old").is_none());
        assert!(cache.get_by_id(1).is_none());
        assert!(cache.get_by_name("New").is_some());
        assert!(cache.get_by_id(2).is_some());
    }

    #[test]
    fn test_invalidate_all_clears_both_indexes() {
        let cache = ConfigCache::default();
        cache.insert(ws(1, "A"));
        cache.insert(ws(2, "B"));
        cache.invalidate_all();
        assert!(cache.is_empty());
        assert!(cache.get_by_id(1).is_none());
        assert!(cache.get_by_name("B").is_none());
    }

    #[test]
    fn test_evict_expired() {
        let cache = ConfigCache::new(Duration::from_millis(10));
        cache.insert(ws(1, "A"));
        cache.insert(ws(2, "B"));
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(cache.evict_expired(), 2);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_rename_drops_the_old_name() {
        let cache = ConfigCache::default();
        cache.insert(ws(1, "Before"));
        cache.insert(ws(1, "After"));
        assert_eq!(cache.get_by_id(1).unwrap().name, "After");
        assert!(cache.get_by_name("Before").is_none());
        assert_eq!(cache.get_by_name("After").unwrap().id, 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_rename_keeps_name_now_owned_by_another_id() {
        let cache = ConfigCache::default();
        cache.insert(ws(1, "CRM"));
        cache.insert(ws(2, "CRM"));
        cache.insert(ws(1, "Legacy"));
        assert_eq!(cache.get_by_name("CRM").unwrap().id, 2);
        assert_eq!(cache.get_by_name("Legacy").unwrap().id, 1);
    }

    #[test]
    fn test_huge_ttl_does_not_overflow() {
        let cache = ConfigCache::new(Duration::from_secs(u64::MAX));
        cache.insert(ws(1, "CRM"));
        assert!(cache.get_by_name("CRM").is_some());
    }
}

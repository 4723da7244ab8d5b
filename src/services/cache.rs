use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use chrono::Utc;
use metrics::counter;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

/// Backing store for the cache document: a single namespaced JSON blob.
///
/// Implementations must never panic on I/O trouble; they report it and the
/// cache degrades to a miss.
pub trait CacheStore: Send + Sync {
    fn load(&self) -> Result<Option<String>, StoreError>;
    fn save(&self, document: &str) -> Result<(), StoreError>;
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("cache store I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Filesystem-backed store holding the cache document at a fixed path.
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl CacheStore for FileStore {
    fn load(&self) -> Result<Option<String>, StoreError> {
        match std::fs::read_to_string(&self.path) {
            Ok(document) => Ok(Some(document)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, document: &str) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, document)?;
        Ok(())
    }
}

/// In-memory store; used by embedders that do not want persistence and by
/// tests.
#[derive(Default)]
pub struct MemoryStore {
    document: Mutex<Option<String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CacheStore for MemoryStore {
    fn load(&self) -> Result<Option<String>, StoreError> {
        Ok(self
            .document
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }

    fn save(&self, document: &str) -> Result<(), StoreError> {
        *self
            .document
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(document.to_string());
        Ok(())
    }
}

/// Wire/disk format of one cached payload. Field names match the persisted
/// document (`id -> {data, timestamp, expiresAt}`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CacheEntry {
    data: Value,
    timestamp: i64,
    expires_at: i64,
}

/// TTL-keyed store for completed job payloads.
///
/// Every backing-store failure is caught and logged here; callers only ever
/// observe a cache miss. Writes are read-modify-write on the whole document:
/// concurrent writers can lose updates, which is acceptable for a single
/// active session.
pub struct ResultCache {
    store: Box<dyn CacheStore>,
}

impl ResultCache {
    pub fn new(store: Box<dyn CacheStore>) -> Self {
        let cache = Self { store };
        let swept = cache.sweep_expired();
        if swept > 0 {
            debug!(swept, "evicted expired cache entries at startup");
        }
        cache
    }

    /// Fetch a cached payload. Expired entries are lazily evicted.
    pub fn get(&self, key: &str) -> Option<Value> {
        let mut map = self.read_map()?;
        let entry = map.get(key).cloned()?;

        if entry.expires_at <= Utc::now().timestamp_millis() {
            map.remove(key);
            self.write_map(&map);
            counter!("analysis_cache_misses_total").increment(1);
            return None;
        }

        counter!("analysis_cache_hits_total").increment(1);
        Some(entry.data)
    }

    pub fn set(&self, key: &str, value: Value, ttl: Duration) {
        let mut map = self.read_map().unwrap_or_default();
        let now = Utc::now().timestamp_millis();
        // expiresAt must be strictly after creation; clamp a zero TTL to 1ms
        let ttl_ms = (ttl.as_millis() as i64).max(1);
        map.insert(
            key.to_string(),
            CacheEntry {
                data: value,
                timestamp: now,
                expires_at: now + ttl_ms,
            },
        );
        self.write_map(&map);
    }

    pub fn remove(&self, key: &str) {
        let Some(mut map) = self.read_map() else {
            return;
        };
        if map.remove(key).is_some() {
            self.write_map(&map);
        }
    }

    /// Full-store pass removing every expired entry. Returns how many were
    /// dropped.
    pub fn sweep_expired(&self) -> usize {
        let Some(mut map) = self.read_map() else {
            return 0;
        };
        let now = Utc::now().timestamp_millis();
        let before = map.len();
        map.retain(|_, entry| entry.expires_at > now);
        let swept = before - map.len();
        if swept > 0 {
            self.write_map(&map);
        }
        swept
    }

    fn read_map(&self) -> Option<HashMap<String, CacheEntry>> {
        let document = match self.store.load() {
            Ok(Some(document)) => document,
            Ok(None) => return Some(HashMap::new()),
            Err(e) => {
                warn!(error = %e, "cache load failed, treating as empty");
                return None;
            }
        };

        match serde_json::from_str(&document) {
            Ok(map) => Some(map),
            Err(e) => {
                warn!(error = %e, "cache document corrupt, treating as empty");
                None
            }
        }
    }

    fn write_map(&self, map: &HashMap<String, CacheEntry>) {
        let document = match serde_json::to_string(map) {
            Ok(document) => document,
            Err(e) => {
                warn!(error = %e, "cache serialization failed, skipping write");
                return;
            }
        };
        if let Err(e) = self.store.save(&document) {
            warn!(error = %e, "cache save failed, entry not persisted");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    /// Store whose writes always fail, for degradation checks.
    struct BrokenStore;

    impl CacheStore for BrokenStore {
        fn load(&self) -> Result<Option<String>, StoreError> {
            Err(std::io::Error::new(ErrorKind::Other, "disk on fire").into())
        }

        fn save(&self, _document: &str) -> Result<(), StoreError> {
            Err(std::io::Error::new(ErrorKind::Other, "disk on fire").into())
        }
    }

    fn memory_cache() -> ResultCache {
        ResultCache::new(Box::new(MemoryStore::new()))
    }

    #[test]
    fn test_roundtrip_before_expiry() {
        let cache = memory_cache();
        let payload = json!({"slope_deg": 12.5, "aspect": "NW"});
        cache.set("job-1", payload.clone(), Duration::from_secs(60));
        assert_eq!(cache.get("job-1"), Some(payload));
    }

    #[test]
    fn test_expired_entry_is_evicted_on_read() {
        let cache = memory_cache();
        cache.set("job-1", json!(1), Duration::from_millis(1));
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(cache.get("job-1"), None);
        // lazily removed, so a sweep finds nothing left to do
        assert_eq!(cache.sweep_expired(), 0);
    }

    #[test]
    fn test_zero_ttl_still_expires_after_creation() {
        let cache = memory_cache();
        cache.set("job-1", json!(1), Duration::ZERO);
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(cache.get("job-1"), None);
    }

    #[test]
    fn test_remove() {
        let cache = memory_cache();
        cache.set("job-1", json!(1), Duration::from_secs(60));
        cache.remove("job-1");
        assert_eq!(cache.get("job-1"), None);
    }

    #[test]
    fn test_sweep_removes_only_expired() {
        let cache = memory_cache();
        cache.set("old", json!(1), Duration::from_millis(1));
        cache.set("fresh", json!(2), Duration::from_secs(60));
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(cache.sweep_expired(), 1);
        assert_eq!(cache.get("fresh"), Some(json!(2)));
    }

    #[test]
    fn test_store_failures_degrade_to_miss() {
        let cache = ResultCache::new(Box::new(BrokenStore));
        cache.set("job-1", json!(1), Duration::from_secs(60));
        assert_eq!(cache.get("job-1"), None);
        cache.remove("job-1");
        assert_eq!(cache.sweep_expired(), 0);
    }

    #[test]
    fn test_corrupt_document_degrades_to_miss() {
        let store = MemoryStore::new();
        store.save("this is not json{{{").unwrap();
        let cache = ResultCache::new(Box::new(store));
        assert_eq!(cache.get("anything"), None);
    }

    #[test]
    fn test_file_store_roundtrip() {
        let path = std::env::temp_dir()
            .join("terrain-analysis-test")
            .join(format!("{}.json", uuid::Uuid::new_v4()));
        let cache = ResultCache::new(Box::new(FileStore::new(path.clone())));
        cache.set("job-1", json!({"elevation_m": 2104}), Duration::from_secs(60));

        // a second cache over the same path sees the persisted entry
        let reopened = ResultCache::new(Box::new(FileStore::new(path.clone())));
        assert_eq!(reopened.get("job-1"), Some(json!({"elevation_m": 2104})));

        std::fs::remove_file(path).ok();
    }

    #[test]
    fn test_persisted_document_shape() {
        let entry = CacheEntry {
            data: json!(1),
            timestamp: 10,
            expires_at: 20,
        };
        let document = serde_json::to_string(&entry).unwrap();
        assert!(document.contains("\"expiresAt\":20"));
        assert!(document.contains("\"timestamp\":10"));
    }
}

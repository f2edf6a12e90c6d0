// =============================================================================
// Ephemeral TTL store — in-process key/value with per-key expiry
// =============================================================================
//
// Holds exactly three key families:
//   idempotency:<sha256>            cached webhook replies (5 min)
//   cooldown:<action>:<ticker|global>  cooldown markers
//   notification:last:<level>:<title>  fan-out frequency limiter (24 h)
//
// Expired entries are swept lazily: any read that touches an expired key
// removes it, and prefix scans purge before collecting.
// =============================================================================

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

struct Entry {
    value: String,
    expires_at: Instant,
}

/// Thread-safe TTL key/value store shared by the dedup, cooldown and
/// notification services.
pub struct TtlStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl TtlStore {
    pub fn new() -> Self {
        Self { entries: Mutex::new(HashMap::new()) }
    }

    /// Insert or replace `key` with the given time-to-live. A zero TTL is a
    /// no-op (the key would be born expired).
    pub fn set(&self, key: &str, value: &str, ttl: Duration) {
        if ttl.is_zero() {
            return;
        }
        self.entries.lock().insert(
            key.to_string(),
            Entry { value: value.to_string(), expires_at: Instant::now() + ttl },
        );
    }

    /// Read a live value. An expired entry is removed and reads as absent.
    pub fn get(&self, key: &str) -> Option<String> {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(e) if e.expires_at > Instant::now() => Some(e.value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn exists(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Remaining lifetime of a live key, rounded up to whole seconds.
    pub fn ttl_seconds(&self, key: &str) -> Option<u64> {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(e) => {
                let now = Instant::now();
                if e.expires_at <= now {
                    entries.remove(key);
                    None
                } else {
                    let remaining = e.expires_at - now;
                    Some(remaining.as_secs() + u64::from(remaining.subsec_nanos() > 0))
                }
            }
            None => None,
        }
    }

    /// Remove a key. Returns whether a live entry was present.
    pub fn remove(&self, key: &str) -> bool {
        let mut entries = self.entries.lock();
        match entries.remove(key) {
            Some(e) => e.expires_at > Instant::now(),
            None => false,
        }
    }

    /// All live keys starting with `prefix`, with remaining TTLs in seconds.
    pub fn scan_prefix(&self, prefix: &str) -> Vec<(String, u64)> {
        let mut entries = self.entries.lock();
        let now = Instant::now();
        entries.retain(|_, e| e.expires_at > now);

        let mut out: Vec<(String, u64)> = entries
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .map(|(k, e)| {
                let remaining = e.expires_at - now;
                (k.clone(), remaining.as_secs() + u64::from(remaining.subsec_nanos() > 0))
            })
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    /// Remove every live key matching the predicate; returns how many went.
    pub fn remove_where<F: Fn(&str) -> bool>(&self, pred: F) -> usize {
        let mut entries = self.entries.lock();
        let now = Instant::now();
        entries.retain(|_, e| e.expires_at > now);

        let before = entries.len();
        entries.retain(|k, _| !pred(k));
        before - entries.len()
    }

    /// Number of live keys. Used by the health endpoint.
    pub fn len(&self) -> usize {
        let mut entries = self.entries.lock();
        let now = Instant::now();
        entries.retain(|_, e| e.expires_at > now);
        entries.len()
    }
}

impl Default for TtlStore {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_get_remove() {
        let store = TtlStore::new();
        store.set("k", "v", Duration::from_secs(60));
        assert_eq!(store.get("k"), Some("v".to_string()));
        assert!(store.exists("k"));
        assert!(store.remove("k"));
        assert!(!store.exists("k"));
        assert!(!store.remove("k"));
    }

    #[test]
    fn expired_key_reads_as_absent() {
        let store = TtlStore::new();
        store.set("k", "v", Duration::from_nanos(1));
        std::thread::sleep(Duration::from_millis(2));
        assert_eq!(store.get("k"), None);
        assert_eq!(store.len(), 0);
    }

    #[test]
    fn zero_ttl_is_never_stored() {
        let store = TtlStore::new();
        store.set("k", "v", Duration::ZERO);
        assert!(!store.exists("k"));
    }

    #[test]
    fn ttl_seconds_rounds_up() {
        let store = TtlStore::new();
        store.set("k", "v", Duration::from_millis(1500));
        let ttl = store.ttl_seconds("k").unwrap();
        assert!(ttl == 2, "expected ceil to 2s, got {ttl}");
        assert_eq!(store.ttl_seconds("missing"), None);
    }

    #[test]
    fn scan_prefix_filters_and_sorts() {
        let store = TtlStore::new();
        store.set("cooldown:buy:7203", "1", Duration::from_secs(30));
        store.set("cooldown:buy:global", "1", Duration::from_secs(10));
        store.set("cooldown:sell:7203", "1", Duration::from_secs(30));
        store.set("idempotency:abc", "1", Duration::from_secs(30));

        let buys = store.scan_prefix("cooldown:buy:");
        assert_eq!(buys.len(), 2);
        assert_eq!(buys[0].0, "cooldown:buy:7203");
        assert_eq!(buys[1].0, "cooldown:buy:global");

        let all = store.scan_prefix("cooldown:");
        assert_eq!(all.len(), 3);
    }

    #[test]
    fn remove_where_counts_matches() {
        let store = TtlStore::new();
        store.set("cooldown:buy:7203", "1", Duration::from_secs(30));
        store.set("cooldown:sell:7203", "1", Duration::from_secs(30));
        store.set("cooldown:buy:9984", "1", Duration::from_secs(30));

        let removed = store.remove_where(|k| k.ends_with(":7203"));
        assert_eq!(removed, 2);
        assert_eq!(store.len(), 1);
    }
}

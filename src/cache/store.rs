//! Per-site TTL+LRU cache store with statistics and pattern eviction.

// std
use std::{collections::HashMap, sync::Mutex};
// crates.io
use regex::Regex;
use serde_json::Value;
// self
use crate::{
    _prelude::*,
    http::semantics::{ListMeta, Validators},
};

/// Fixed per-entry overhead charged on top of the serialized body.
const ENTRY_OVERHEAD_BYTES: u64 = 256;

/// A cached upstream response.
#[derive(Clone, Debug)]
pub struct CachedResponse {
    /// HTTP status the entry was stored with; 404 entries are negative
    /// cache records.
    pub status: u16,
    /// Decoded response body.
    pub body: Arc<Value>,
    /// Validators for conditional revalidation.
    pub validators: Validators,
    /// Pagination metadata captured from list responses.
    pub list_meta: ListMeta,
}

/// Result of a cache lookup.
#[derive(Debug)]
pub enum Lookup {
    /// Fresh entry.
    Hit(CachedResponse),
    /// Expired entry still inside its revalidation grace window; callers
    /// should revalidate with the attached validators.
    Stale(CachedResponse),
    /// No usable entry.
    Miss,
}

/// Monotonic cache statistics.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups served from a fresh entry.
    pub hits: u64,
    /// Lookups that found no usable entry.
    pub misses: u64,
    /// Entries written.
    pub sets: u64,
    /// Entries removed by TTL expiry.
    pub ttl_evictions: u64,
    /// Entries removed by LRU byte pressure.
    pub lru_evictions: u64,
    /// Entries removed by explicit or pattern deletes.
    pub explicit_evictions: u64,
    /// Approximate bytes currently held.
    pub bytes: u64,
    /// Entries currently held.
    pub entries: u64,
}

#[derive(Debug)]
struct Entry {
    value: CachedResponse,
    stored_at: Instant,
    ttl: Duration,
    last_accessed: Instant,
    bytes: u64,
    pinned: bool,
}
impl Entry {
    fn expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.stored_at) >= self.ttl
    }

    fn within_grace(&self, now: Instant, grace: Duration) -> bool {
        now.saturating_duration_since(self.stored_at) < self.ttl + grace
    }
}

#[derive(Debug, Default)]
struct StoreState {
    entries: HashMap<String, Entry>,
    bytes: u64,
    hits: u64,
    misses: u64,
    sets: u64,
    ttl_evictions: u64,
    lru_evictions: u64,
    explicit_evictions: u64,
}

/// Thread-safe TTL+LRU map for one site.
///
/// The mutex is never held across an await point; every operation completes
/// synchronously once the lock is taken.
#[derive(Debug)]
pub struct CacheStore {
    max_bytes: u64,
    state: Mutex<StoreState>,
}
impl CacheStore {
    /// Build a store bounded to `max_bytes` of approximate payload.
    pub fn new(max_bytes: u64) -> Self {
        Self {
            max_bytes,
            state: Mutex::new(StoreState::default()),
        }
    }

    /// Look up `key`, distinguishing fresh hits from revalidatable stale
    /// entries. Expired entries beyond their grace window are evicted.
    pub fn lookup(&self, key: &str, grace: Duration) -> Lookup {
        let now = Instant::now();
        let mut state = self.lock();

        let Some(entry) = state.entries.get_mut(key) else {
            state.misses += 1;

            return Lookup::Miss;
        };

        if !entry.expired(now) {
            entry.last_accessed = now;

            let value = entry.value.clone();

            state.hits += 1;

            return Lookup::Hit(value);
        }

        if entry.within_grace(now, grace) && entry.value.validators.usable() {
            entry.last_accessed = now;

            let value = entry.value.clone();

            state.misses += 1;

            return Lookup::Stale(value);
        }

        if let Some(removed) = state.entries.remove(key) {
            state.bytes -= removed.bytes;
        }

        state.ttl_evictions += 1;
        state.misses += 1;

        Lookup::Miss
    }

    /// Insert or replace `key`, then enforce the byte bound by evicting
    /// least-recently-accessed entries.
    pub fn set(&self, key: impl Into<String>, value: CachedResponse, ttl: Duration) {
        self.set_with(key, value, ttl, false);
    }

    /// Insert an entry exempt from LRU eviction (still subject to TTL).
    pub fn set_pinned(&self, key: impl Into<String>, value: CachedResponse, ttl: Duration) {
        self.set_with(key, value, ttl, true);
    }

    fn set_with(&self, key: impl Into<String>, value: CachedResponse, ttl: Duration, pinned: bool) {
        let key = key.into();
        let now = Instant::now();
        let bytes = approximate_size(&key, &value);
        let entry = Entry {
            value,
            stored_at: now,
            ttl,
            last_accessed: now,
            bytes,
            pinned,
        };
        let mut state = self.lock();

        if let Some(previous) = state.entries.insert(key, entry) {
            state.bytes -= previous.bytes;
        }

        state.bytes += bytes;
        state.sets += 1;

        self.enforce_bound(&mut state);
    }

    /// Reset the TTL of an existing entry in place after a 304 revalidation,
    /// adopting any refreshed validators.
    pub fn refresh_ttl(&self, key: &str, ttl: Duration, validators: Option<Validators>) -> bool {
        let now = Instant::now();
        let mut state = self.lock();
        let Some(entry) = state.entries.get_mut(key) else {
            return false;
        };

        entry.stored_at = now;
        entry.last_accessed = now;
        entry.ttl = ttl;

        if let Some(validators) = validators
            && validators.usable()
        {
            entry.value.validators = validators;
        }

        true
    }

    /// Remove one key.
    pub fn delete(&self, key: &str) -> bool {
        let mut state = self.lock();

        match state.entries.remove(key) {
            Some(entry) => {
                state.bytes -= entry.bytes;
                state.explicit_evictions += 1;

                true
            }
            None => false,
        }
    }

    /// Remove every key matching `pattern`; linear over the key set.
    pub fn delete_pattern(&self, pattern: &Regex) -> usize {
        let mut state = self.lock();
        let matched: Vec<String> = state
            .entries
            .keys()
            .filter(|key| pattern.is_match(key))
            .cloned()
            .collect();

        for key in &matched {
            if let Some(entry) = state.entries.remove(key) {
                state.bytes -= entry.bytes;
                state.explicit_evictions += 1;
            }
        }

        matched.len()
    }

    /// Drop every entry.
    pub fn clear(&self) {
        let mut state = self.lock();
        let removed = state.entries.len() as u64;

        state.entries.clear();
        state.bytes = 0;
        state.explicit_evictions += removed;
    }

    /// Point-in-time statistics snapshot.
    pub fn stats(&self) -> CacheStats {
        let state = self.lock();

        CacheStats {
            hits: state.hits,
            misses: state.misses,
            sets: state.sets,
            ttl_evictions: state.ttl_evictions,
            lru_evictions: state.lru_evictions,
            explicit_evictions: state.explicit_evictions,
            bytes: state.bytes,
            entries: state.entries.len() as u64,
        }
    }

    fn enforce_bound(&self, state: &mut StoreState) {
        while state.bytes > self.max_bytes {
            let Some(victim) = state
                .entries
                .iter()
                .filter(|(_, entry)| !entry.pinned)
                .min_by_key(|(_, entry)| entry.last_accessed)
                .map(|(key, _)| key.clone())
            else {
                break;
            };

            if let Some(entry) = state.entries.remove(&victim) {
                state.bytes -= entry.bytes;
                state.lru_evictions += 1;

                tracing::debug!(key = %victim, "evicted cache entry under byte pressure");
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StoreState> {
        self.state.lock().expect("cache store mutex poisoned")
    }
}

fn approximate_size(key: &str, value: &CachedResponse) -> u64 {
    let body_bytes = serde_json::to_string(&*value.body)
        .map(|rendered| rendered.len())
        .unwrap_or(0) as u64;

    key.len() as u64 + body_bytes + ENTRY_OVERHEAD_BYTES
}

#[cfg(test)]
mod tests {
    // crates.io
    use serde_json::json;
    // self
    use super::*;

    fn response(body: Value) -> CachedResponse {
        CachedResponse {
            status: 200,
            body: Arc::new(body),
            validators: Validators::default(),
            list_meta: ListMeta::default(),
        }
    }

    fn validated_response(body: Value) -> CachedResponse {
        CachedResponse {
            validators: Validators {
                etag: Some("\"v1\"".into()),
                last_modified: None,
            },
            ..response(body)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn entries_expire_after_their_ttl() {
        let store = CacheStore::new(u64::MAX);

        store.set("k", response(json!({ "id": 1 })), Duration::from_secs(60));

        assert!(matches!(store.lookup("k", Duration::ZERO), Lookup::Hit(_)));

        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(matches!(store.lookup("k", Duration::ZERO), Lookup::Hit(_)));

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(matches!(store.lookup("k", Duration::ZERO), Lookup::Miss));

        let stats = store.stats();

        assert_eq!(stats.ttl_evictions, 1);
        assert_eq!(stats.entries, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_entries_with_validators_survive_the_grace_window() {
        let store = CacheStore::new(u64::MAX);

        store.set(
            "k",
            validated_response(json!({ "id": 1 })),
            Duration::from_secs(60),
        );
        tokio::time::advance(Duration::from_secs(90)).await;

        assert!(matches!(
            store.lookup("k", Duration::from_secs(60)),
            Lookup::Stale(_)
        ));
        // Without a grace window the same entry is gone.
        assert!(matches!(store.lookup("k", Duration::ZERO), Lookup::Miss));
    }

    #[test]
    fn lru_eviction_keeps_bytes_bounded() {
        let store = CacheStore::new(4 * 1024);
        let filler = "z".repeat(1024);

        for index in 0..8 {
            store.set(
                format!("k{index}"),
                response(json!({ "filler": filler })),
                Duration::from_secs(300),
            );
        }

        let stats = store.stats();

        assert!(
            stats.bytes <= 4 * 1024,
            "bytes {} exceed bound",
            stats.bytes
        );
        assert!(stats.lru_evictions > 0);
    }

    #[test]
    fn least_recently_accessed_entry_is_evicted_first() {
        // Room for two small entries but not three.
        let store = CacheStore::new(600);

        store.set("old", response(json!(1)), Duration::from_secs(300));
        std::thread::sleep(Duration::from_millis(2));
        store.set("fresh", response(json!(2)), Duration::from_secs(300));
        std::thread::sleep(Duration::from_millis(2));

        // Touch "old" so "fresh" becomes the eviction candidate.
        assert!(matches!(
            store.lookup("old", Duration::ZERO),
            Lookup::Hit(_)
        ));
        std::thread::sleep(Duration::from_millis(2));
        store.set("new", response(json!(3)), Duration::from_secs(300));

        assert!(matches!(
            store.lookup("old", Duration::ZERO),
            Lookup::Hit(_)
        ));
        assert!(matches!(
            store.lookup("fresh", Duration::ZERO),
            Lookup::Miss
        ));
        assert_eq!(store.stats().lru_evictions, 1);
    }

    #[test]
    fn pattern_delete_removes_matching_keys() {
        let store = CacheStore::new(u64::MAX);

        store.set(
            "site:s1|op:getPost|p:id=1",
            response(json!(1)),
            Duration::from_secs(300),
        );
        store.set(
            "site:s1|op:getPost|p:id=2",
            response(json!(2)),
            Duration::from_secs(300),
        );
        store.set(
            "site:s1|op:listPosts|p:-",
            response(json!([])),
            Duration::from_secs(300),
        );

        let pattern = Regex::new(r"^site:s1\|op:getPost\|").expect("pattern");
        let removed = store.delete_pattern(&pattern);

        assert_eq!(removed, 2);
        assert!(matches!(
            store.lookup("site:s1|op:listPosts|p:-", Duration::ZERO),
            Lookup::Hit(_)
        ));
        assert_eq!(store.stats().explicit_evictions, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_ttl_extends_an_entry_in_place() {
        let store = CacheStore::new(u64::MAX);

        store.set("k", validated_response(json!(1)), Duration::from_secs(10));
        tokio::time::advance(Duration::from_secs(8)).await;

        assert!(store.refresh_ttl(
            "k",
            Duration::from_secs(60),
            Some(Validators {
                etag: Some("\"v2\"".into()),
                last_modified: None
            })
        ));

        tokio::time::advance(Duration::from_secs(30)).await;

        match store.lookup("k", Duration::ZERO) {
            Lookup::Hit(entry) => assert_eq!(entry.validators.etag.as_deref(), Some("\"v2\"")),
            other => panic!("expected hit, got {other:?}"),
        }
    }

    #[test]
    fn pinned_entries_survive_byte_pressure() {
        let store = CacheStore::new(2 * 1024);
        let filler = "z".repeat(512);

        store.set_pinned(
            "pinned",
            response(json!({ "filler": filler })),
            Duration::from_secs(300),
        );

        for index in 0..8 {
            store.set(
                format!("k{index}"),
                response(json!({ "filler": filler })),
                Duration::from_secs(300),
            );
        }

        let held = store.lock().entries.contains_key("pinned");

        assert!(held);
    }

    #[test]
    fn clear_empties_the_store() {
        let store = CacheStore::new(u64::MAX);

        store.set("a", response(json!(1)), Duration::from_secs(300));
        store.set("b", response(json!(2)), Duration::from_secs(300));
        store.clear();

        let stats = store.stats();

        assert_eq!(stats.entries, 0);
        assert_eq!(stats.bytes, 0);
    }
}

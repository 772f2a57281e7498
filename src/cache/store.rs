use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// A single cache entry: opaque string value, optional expiry, tags.
#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
    tags: Vec<String>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

/// In-process key/value store with per-entry TTL and tag-based invalidation.
///
/// All operations take `&self`; interior mutability via a mutex. Writes are
/// idempotent: two concurrent misses may both store the same key and the
/// second write simply wins. Expired entries are dropped lazily on read and
/// in bulk via [`MemoryStore::purge_expired`].
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Get a value. Returns `None` for missing or expired keys.
    pub fn get(&self, key: &str) -> Option<String> {
        let mut entries = self.entries.lock().expect("cache mutex poisoned");
        let now = Instant::now();

        match entries.get(key) {
            Some(entry) if entry.is_expired(now) => {
                entries.remove(key);
                None
            }
            Some(entry) => Some(entry.value.clone()),
            None => None,
        }
    }

    /// Set a value with a TTL and tags. A zero TTL means no expiry.
    pub fn set(&self, key: &str, value: String, ttl: Duration, tags: &[String]) {
        let expires_at = if ttl.is_zero() {
            None
        } else {
            Some(Instant::now() + ttl)
        };
        let mut entries = self.entries.lock().expect("cache mutex poisoned");
        entries.insert(
            key.to_string(),
            Entry {
                value,
                expires_at,
                tags: tags.to_vec(),
            },
        );
    }

    /// Increment an integer-valued entry, creating it at 1 with no expiry.
    /// Returns the post-increment value. Non-numeric values reset to 1.
    pub fn increment(&self, key: &str) -> i64 {
        let mut entries = self.entries.lock().expect("cache mutex poisoned");
        let now = Instant::now();

        let entry = entries.entry(key.to_string()).or_insert_with(|| Entry {
            value: "0".to_string(),
            expires_at: None,
            tags: Vec::new(),
        });
        if entry.is_expired(now) {
            entry.value = "0".to_string();
            entry.expires_at = None;
        }

        let next = entry.value.parse::<i64>().unwrap_or(0) + 1;
        entry.value = next.to_string();
        next
    }

    /// Set or refresh an existing key's expiry. No-op for missing keys.
    pub fn expire(&self, key: &str, ttl: Duration) {
        let mut entries = self.entries.lock().expect("cache mutex poisoned");
        if let Some(entry) = entries.get_mut(key) {
            entry.expires_at = Some(Instant::now() + ttl);
        }
    }

    /// Remove a single key.
    pub fn remove(&self, key: &str) {
        let mut entries = self.entries.lock().expect("cache mutex poisoned");
        entries.remove(key);
    }

    /// Remove every entry carrying the given tag. Returns how many were
    /// removed. Not exercised in the hot path.
    pub fn invalidate_tag(&self, tag: &str) -> usize {
        let mut entries = self.entries.lock().expect("cache mutex poisoned");
        let before = entries.len();
        entries.retain(|_, e| !e.tags.iter().any(|t| t == tag));
        before - entries.len()
    }

    /// Drop all expired entries. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let mut entries = self.entries.lock().expect("cache mutex poisoned");
        let now = Instant::now();
        let before = entries.len();
        entries.retain(|_, e| !e.is_expired(now));
        before - entries.len()
    }

    /// Current entry count (including not-yet-purged expired entries).
    pub fn len(&self) -> usize {
        self.entries.lock().expect("cache mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop everything.
    pub fn clear(&self) {
        self.entries.lock().expect("cache mutex poisoned").clear();
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

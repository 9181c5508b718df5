//! Thread-Safe Storage Engine with Versioned Entries
//!
//! This module implements the key-value map shared by every connection.
//!
//! ## Design Decisions
//!
//! 1. **Sharded Locks**: Instead of one big lock, keys are spread over 64 shards,
//!    each guarded by its own `RwLock`.
//! 2. **Write Versions**: Every write stamps the entry with a value taken from a
//!    global monotonic counter. Expiry timers remember the version they were
//!    registered for and only remove an entry whose version still matches, so a
//!    newer SET is never erased by an older timer.
//! 3. **Lazy Expiry**: Entries also remember their deadline, and a read that
//!    finds a passed deadline drops the entry on the spot. The timer in
//!    [`crate::storage::expiry`] remains the mechanism that reclaims memory.
//!
//! ## Concurrency Model
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     StorageEngine                           │
//! │  ┌─────────┐ ┌─────────┐ ┌─────────┐ ┌─────────┐            │
//! │  │ Shard 0 │ │ Shard 1 │ │ Shard 2 │ │ Shard N │            │
//! │  │ RwLock  │ │ RwLock  │ │ RwLock  │ │ RwLock  │            │
//! │  │ HashMap │ │ HashMap │ │ HashMap │ │ HashMap │            │
//! │  └─────────┘ └─────────┘ └─────────┘ └─────────┘            │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! All operations on one key take that key's shard lock, so SET, GET and
//! timer-driven removal of the same key are serialized in invocation order.

use crate::protocol::RespValue;
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Number of shards for the storage engine.
const NUM_SHARDS: usize = 64;

/// A stored value plus the bookkeeping needed for expiry.
#[derive(Debug, Clone)]
pub struct Entry {
    /// The value exactly as it arrived in the SET request
    pub value: RespValue,
    /// Write version assigned when this entry was stored
    pub version: u64,
    /// When this entry expires (None = never expires)
    pub expires_at: Option<Instant>,
}

impl Entry {
    /// Checks if this entry has expired.
    #[inline]
    pub fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|exp| Instant::now() >= exp)
    }

    /// Returns the remaining TTL in milliseconds, or None if no expiry.
    pub fn ttl_ms(&self) -> Option<u64> {
        self.expires_at.map(|exp| {
            exp.saturating_duration_since(Instant::now()).as_millis() as u64
        })
    }
}

/// A single shard containing a portion of the key-value pairs.
#[derive(Debug, Default)]
struct Shard {
    data: RwLock<HashMap<Bytes, Entry>>,
}

/// The key-value store shared by all command executions.
///
/// # Thread Safety
///
/// This struct is designed to be wrapped in an `Arc` and shared across
/// all client handler tasks and expiry timers. All operations are thread-safe.
///
/// # Example
///
/// ```
/// use quickkv::storage::StorageEngine;
/// use quickkv::protocol::RespValue;
/// use bytes::Bytes;
///
/// let engine = StorageEngine::new();
///
/// let v1 = engine.set(Bytes::from("name"), RespValue::bulk_string("Ariz"));
/// assert_eq!(engine.get(b"name"), Some(RespValue::bulk_string("Ariz")));
///
/// // A stale version does not remove the newer write
/// let v2 = engine.set(Bytes::from("name"), RespValue::bulk_string("Ariz 2"));
/// assert!(!engine.remove_if_version(b"name", v1));
/// assert!(engine.remove_if_version(b"name", v2));
/// ```
pub struct StorageEngine {
    shards: Vec<Shard>,

    /// Source of write versions; the first write gets version 1
    next_version: AtomicU64,

    key_count: AtomicU64,
    get_count: AtomicU64,
    set_count: AtomicU64,
    del_count: AtomicU64,
    expired_count: AtomicU64,
}

impl std::fmt::Debug for StorageEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageEngine")
            .field("shards", &self.shards.len())
            .field("key_count", &self.key_count.load(Ordering::Relaxed))
            .field("get_count", &self.get_count.load(Ordering::Relaxed))
            .field("set_count", &self.set_count.load(Ordering::Relaxed))
            .finish()
    }
}

impl Default for StorageEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl StorageEngine {
    /// Creates a new, empty storage engine.
    pub fn new() -> Self {
        let shards = (0..NUM_SHARDS).map(|_| Shard::default()).collect();

        Self {
            shards,
            next_version: AtomicU64::new(0),
            key_count: AtomicU64::new(0),
            get_count: AtomicU64::new(0),
            set_count: AtomicU64::new(0),
            del_count: AtomicU64::new(0),
            expired_count: AtomicU64::new(0),
        }
    }

    /// Determines which shard a key belongs to.
    #[inline]
    fn shard_index(&self, key: &[u8]) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() as usize) % NUM_SHARDS
    }

    #[inline]
    fn get_shard(&self, key: &[u8]) -> &Shard {
        &self.shards[self.shard_index(key)]
    }

    /// Stores `key → value` without expiry, replacing any previous entry and
    /// its deadline.
    ///
    /// Returns the write version of the new entry.
    pub fn set(&self, key: Bytes, value: RespValue) -> u64 {
        self.insert(key, value, None)
    }

    /// Stores `key → value` with a deadline `ttl` from now.
    ///
    /// The deadline only drives lazy expiry on read; the caller is expected to
    /// register a timer for the returned version as well.
    pub fn set_with_ttl(&self, key: Bytes, value: RespValue, ttl: Duration) -> u64 {
        // A TTL too large to represent is treated as no deadline at all.
        let expires_at = Instant::now().checked_add(ttl);
        self.insert(key, value, expires_at)
    }

    fn insert(&self, key: Bytes, value: RespValue, expires_at: Option<Instant>) -> u64 {
        self.set_count.fetch_add(1, Ordering::Relaxed);

        let shard = self.get_shard(&key);
        let mut data = shard.data.write();

        // Taken under the shard lock so versions of one key increase in the
        // order the writes become visible.
        let version = self.next_version.fetch_add(1, Ordering::Relaxed) + 1;

        let previous = data.insert(
            key,
            Entry {
                value,
                version,
                expires_at,
            },
        );

        if previous.is_none() {
            self.key_count.fetch_add(1, Ordering::Relaxed);
        }

        version
    }

    /// Gets the value for a key.
    ///
    /// Returns `None` if the key doesn't exist or its deadline has passed.
    pub fn get(&self, key: &[u8]) -> Option<RespValue> {
        self.get_count.fetch_add(1, Ordering::Relaxed);
        self.get_entry(key).map(|entry| entry.value)
    }

    /// Gets the full entry for a key, including version and deadline.
    pub fn get_entry(&self, key: &[u8]) -> Option<Entry> {
        let shard = self.get_shard(key);

        {
            let data = shard.data.read();
            match data.get(key) {
                Some(entry) if !entry.is_expired() => return Some(entry.clone()),
                Some(_) => {}
                None => return None,
            }
        }

        // Deadline passed - upgrade to a write lock and drop the entry
        let mut data = shard.data.write();
        match data.get(key) {
            Some(entry) if entry.is_expired() => {
                data.remove(key);
                self.key_count.fetch_sub(1, Ordering::Relaxed);
                self.expired_count.fetch_add(1, Ordering::Relaxed);
                None
            }
            // Re-written by another thread between the two locks
            Some(entry) => Some(entry.clone()),
            None => None,
        }
    }

    /// Returns the current write version of a key, if present.
    pub fn version_of(&self, key: &[u8]) -> Option<u64> {
        self.get_entry(key).map(|entry| entry.version)
    }

    /// Checks if a key exists (and has not expired).
    pub fn exists(&self, key: &[u8]) -> bool {
        let shard = self.get_shard(key);
        let data = shard.data.read();

        data.get(key).is_some_and(|e| !e.is_expired())
    }

    /// Removes a key whatever its version.
    ///
    /// Returns `true` if an entry was removed.
    pub fn remove_if_present(&self, key: &[u8]) -> bool {
        self.del_count.fetch_add(1, Ordering::Relaxed);

        let shard = self.get_shard(key);
        let mut data = shard.data.write();

        if data.remove(key).is_some() {
            self.key_count.fetch_sub(1, Ordering::Relaxed);
            true
        } else {
            false
        }
    }

    /// Removes a key only if it still holds the entry written with `version`.
    ///
    /// This is what expiry timers call. Returns `true` if the entry was removed,
    /// `false` if the key is gone or has been re-written since.
    pub fn remove_if_version(&self, key: &[u8], version: u64) -> bool {
        let shard = self.get_shard(key);
        let mut data = shard.data.write();

        match data.get(key) {
            Some(entry) if entry.version == version => {
                data.remove(key);
                self.key_count.fetch_sub(1, Ordering::Relaxed);
                self.expired_count.fetch_add(1, Ordering::Relaxed);
                true
            }
            _ => false,
        }
    }

    /// Returns the number of stored keys.
    ///
    /// Entries past their deadline count until a read or timer removes them.
    pub fn len(&self) -> u64 {
        self.key_count.load(Ordering::Relaxed)
    }

    /// Returns true if the database is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns database statistics.
    pub fn stats(&self) -> StorageStats {
        StorageStats {
            keys: self.key_count.load(Ordering::Relaxed),
            get_ops: self.get_count.load(Ordering::Relaxed),
            set_ops: self.set_count.load(Ordering::Relaxed),
            del_ops: self.del_count.load(Ordering::Relaxed),
            expired: self.expired_count.load(Ordering::Relaxed),
        }
    }
}

/// Database statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StorageStats {
    /// Number of keys currently stored
    pub keys: u64,
    /// Total GET operations
    pub get_ops: u64,
    /// Total SET operations
    pub set_ops: u64,
    /// Total explicit removals
    pub del_ops: u64,
    /// Total keys removed because their TTL ran out
    pub expired: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn bulk(s: &'static str) -> RespValue {
        RespValue::bulk_string(Bytes::from(s))
    }

    #[test]
    fn test_set_and_get() {
        let engine = StorageEngine::new();

        engine.set(Bytes::from("key"), bulk("value"));
        assert_eq!(engine.get(b"key"), Some(bulk("value")));
    }

    #[test]
    fn test_get_nonexistent() {
        let engine = StorageEngine::new();
        assert_eq!(engine.get(b"nonexistent"), None);
    }

    #[test]
    fn test_nil_value_is_not_absence() {
        let engine = StorageEngine::new();

        engine.set(Bytes::from("key"), RespValue::null());
        assert_eq!(engine.get(b"key"), Some(RespValue::null()));
        assert!(engine.exists(b"key"));
    }

    #[test]
    fn test_any_value_stored_verbatim() {
        let engine = StorageEngine::new();
        let value = RespValue::array(vec![RespValue::integer(7), RespValue::error("boom")]);

        engine.set(Bytes::from("key"), value.clone());
        assert_eq!(engine.get(b"key"), Some(value));
    }

    #[test]
    fn test_overwrite_bumps_version() {
        let engine = StorageEngine::new();

        let v1 = engine.set(Bytes::from("key"), bulk("one"));
        let v2 = engine.set(Bytes::from("key"), bulk("two"));

        assert!(v2 > v1);
        assert_eq!(engine.version_of(b"key"), Some(v2));
        assert_eq!(engine.len(), 1);
    }

    #[test]
    fn test_remove_if_version() {
        let engine = StorageEngine::new();

        let stale = engine.set(Bytes::from("key"), bulk("one"));
        let current = engine.set(Bytes::from("key"), bulk("two"));

        assert!(!engine.remove_if_version(b"key", stale));
        assert_eq!(engine.get(b"key"), Some(bulk("two")));

        assert!(engine.remove_if_version(b"key", current));
        assert_eq!(engine.get(b"key"), None);
        assert!(!engine.remove_if_version(b"key", current));
        assert_eq!(engine.stats().expired, 1);
    }

    #[test]
    fn test_remove_if_present() {
        let engine = StorageEngine::new();

        engine.set(Bytes::from("key"), bulk("value"));
        assert!(engine.remove_if_present(b"key"));
        assert_eq!(engine.get(b"key"), None);
        assert!(!engine.remove_if_present(b"key"));
        assert!(engine.is_empty());
    }

    #[test]
    fn test_lazy_expiry_on_read() {
        let engine = StorageEngine::new();

        engine.set_with_ttl(Bytes::from("key"), bulk("value"), Duration::from_millis(50));
        assert!(engine.exists(b"key"));

        std::thread::sleep(Duration::from_millis(100));

        assert_eq!(engine.get(b"key"), None);
        assert_eq!(engine.len(), 0);
        assert_eq!(engine.stats().expired, 1);
    }

    #[test]
    fn test_zero_ttl_is_immediately_expired() {
        let engine = StorageEngine::new();

        engine.set_with_ttl(Bytes::from("key"), bulk("value"), Duration::ZERO);
        assert!(!engine.exists(b"key"));
        assert_eq!(engine.get(b"key"), None);
    }

    #[test]
    fn test_set_clears_previous_deadline() {
        let engine = StorageEngine::new();

        engine.set_with_ttl(Bytes::from("key"), bulk("one"), Duration::from_millis(20));
        engine.set(Bytes::from("key"), bulk("two"));

        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(engine.get(b"key"), Some(bulk("two")));
        assert_eq!(engine.get_entry(b"key").and_then(|e| e.ttl_ms()), None);
    }

    #[test]
    fn test_huge_ttl_does_not_overflow() {
        let engine = StorageEngine::new();

        engine.set_with_ttl(Bytes::from("key"), bulk("value"), Duration::MAX);
        assert_eq!(engine.get(b"key"), Some(bulk("value")));
    }

    #[test]
    fn test_repeated_get_is_stable() {
        let engine = StorageEngine::new();
        engine.set(Bytes::from("key"), bulk("value"));

        let first = engine.get(b"key");
        for _ in 0..10 {
            assert_eq!(engine.get(b"key"), first);
        }
        assert_eq!(engine.stats().get_ops, 11);
    }

    #[test]
    fn test_concurrent_writers() {
        let engine = Arc::new(StorageEngine::new());

        std::thread::scope(|s| {
            for t in 0..4 {
                let engine = Arc::clone(&engine);
                s.spawn(move || {
                    for i in 0..1_000 {
                        let key = Bytes::from(format!("key:{}:{}", t, i));
                        engine.set(key.clone(), bulk("value"));
                        assert!(engine.get(&key).is_some());
                    }
                });
            }
        });

        assert_eq!(engine.len(), 4_000);
        assert_eq!(engine.stats().set_ops, 4_000);
    }
}

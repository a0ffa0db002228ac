//! Shared key-value store with TTLs and optimistic transactions.
//!
//! Party and queue state must be visible to every server process, so it lives
//! behind the `SharedStore` trait instead of in-process locks. Writers read
//! values with their versions, then commit a `Transaction` that only applies
//! if every watched key still has the version that was read. This mirrors
//! WATCH/MULTI/EXEC on a networked store; `MemoryStore` is the in-process
//! implementation used by a single node and by tests.

use chrono::{DateTime, Duration, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use thiserror::Error;

/// Shared store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Shared store unavailable")]
    Unavailable,

    #[error("Codec error: {0}")]
    Codec(String),

    #[error("Backend error: {0}")]
    Backend(String),
}

/// A stored value with the version it was read at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Versioned {
    pub value: Vec<u8>,
    pub version: u64,
}

/// A decoded value with the version it was read at.
#[derive(Debug, Clone)]
pub struct Typed<T> {
    pub value: T,
    pub version: u64,
}

/// A single write inside a transaction.
#[derive(Debug, Clone)]
pub enum WriteOp {
    Put {
        key: String,
        value: Vec<u8>,
        ttl: Duration,
    },
    Delete {
        key: String,
    },
    Expire {
        key: String,
        ttl: Duration,
    },
}

/// Watched preconditions plus writes, applied all-or-nothing.
#[derive(Debug, Clone, Default)]
pub struct Transaction {
    watches: Vec<(String, Option<u64>)>,
    ops: Vec<WriteOp>,
}

impl Transaction {
    pub fn new() -> Self {
        Self::default()
    }

    /// Require `key` to still be at `version` (`None`: must be absent).
    pub fn watch(&mut self, key: impl Into<String>, version: Option<u64>) -> &mut Self {
        self.watches.push((key.into(), version));
        self
    }

    pub fn put(&mut self, key: impl Into<String>, value: Vec<u8>, ttl: Duration) -> &mut Self {
        self.ops.push(WriteOp::Put {
            key: key.into(),
            value,
            ttl,
        });
        self
    }

    /// Encode and put a typed value.
    pub fn put_typed<T: Serialize + ?Sized>(
        &mut self,
        key: impl Into<String>,
        value: &T,
        ttl: Duration,
    ) -> Result<&mut Self, StoreError> {
        let bytes = encode(value)?;
        Ok(self.put(key, bytes, ttl))
    }

    pub fn delete(&mut self, key: impl Into<String>) -> &mut Self {
        self.ops.push(WriteOp::Delete { key: key.into() });
        self
    }

    pub fn expire(&mut self, key: impl Into<String>, ttl: Duration) -> &mut Self {
        self.ops.push(WriteOp::Expire {
            key: key.into(),
            ttl,
        });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }
}

/// Result of a commit attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitResult {
    Committed,
    /// A watched key changed; nothing was written
    Conflict,
}

/// Shared key-value store used for cross-process party and queue state.
pub trait SharedStore: Send + Sync {
    /// Read a live value and its version.
    fn get(&self, key: &str) -> Result<Option<Versioned>, StoreError>;

    /// Apply a transaction atomically if its watches hold.
    fn commit(&self, txn: Transaction) -> Result<CommitResult, StoreError>;

    /// Remaining time to live of a key.
    fn ttl(&self, key: &str) -> Result<Option<Duration>, StoreError>;

    /// Store clock. Expiry and record timestamps are measured against it.
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Encode a value for storage.
pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, StoreError> {
    bincode::serialize(value).map_err(|e| StoreError::Codec(e.to_string()))
}

/// Decode a stored value; malformed bytes are a codec error.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, StoreError> {
    bincode::deserialize(bytes).map_err(|e| StoreError::Codec(e.to_string()))
}

/// Read and decode a typed value.
pub fn get_typed<T: DeserializeOwned>(
    store: &dyn SharedStore,
    key: &str,
) -> Result<Option<Typed<T>>, StoreError> {
    match store.get(key)? {
        Some(entry) => Ok(Some(Typed {
            value: decode(&entry.value)?,
            version: entry.version,
        })),
        None => Ok(None),
    }
}

struct Entry {
    value: Vec<u8>,
    version: u64,
    expires_at: DateTime<Utc>,
}

struct Inner {
    entries: HashMap<String, Entry>,
    next_version: u64,
}

/// In-process shared store.
pub struct MemoryStore {
    inner: Mutex<Inner>,
    clock_offset: Mutex<Duration>,
    available: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                next_version: 1,
            }),
            clock_offset: Mutex::new(Duration::zero()),
            available: AtomicBool::new(true),
        }
    }

    /// Store clock (wall clock plus any simulated advance).
    pub fn now(&self) -> DateTime<Utc> {
        let offset = self
            .clock_offset
            .lock()
            .map(|o| *o)
            .unwrap_or_else(|_| Duration::zero());
        Utc::now() + offset
    }

    /// Move the store clock forward, expiring keys as time passes.
    pub fn advance_clock(&self, by: Duration) {
        if let Ok(mut offset) = self.clock_offset.lock() {
            *offset = *offset + by;
        }
    }

    /// Simulate an outage.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        let now = self.now();
        self.inner
            .lock()
            .map(|inner| inner.entries.values().filter(|e| e.expires_at > now).count())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable)
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Inner>, StoreError> {
        self.inner
            .lock()
            .map_err(|_| StoreError::Backend("store mutex poisoned".to_string()))
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Inner {
    fn purge_expired(&mut self, key: &str, now: DateTime<Utc>) {
        if self
            .entries
            .get(key)
            .map(|e| e.expires_at <= now)
            .unwrap_or(false)
        {
            self.entries.remove(key);
        }
    }

    /// Drop every expired entry so abandoned keys do not pile up.
    fn sweep(&mut self, now: DateTime<Utc>) {
        self.entries.retain(|_, e| e.expires_at > now);
    }
}

impl SharedStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Versioned>, StoreError> {
        self.check_available()?;
        let now = self.now();
        let mut inner = self.lock()?;
        inner.purge_expired(key, now);

        Ok(inner.entries.get(key).map(|e| Versioned {
            value: e.value.clone(),
            version: e.version,
        }))
    }

    fn commit(&self, txn: Transaction) -> Result<CommitResult, StoreError> {
        self.check_available()?;
        let now = self.now();
        let mut inner = self.lock()?;
        inner.sweep(now);

        for (key, expected) in &txn.watches {
            let current = inner.entries.get(key).map(|e| e.version);
            if current != *expected {
                return Ok(CommitResult::Conflict);
            }
        }

        for op in txn.ops {
            let version = inner.next_version;
            inner.next_version += 1;

            match op {
                WriteOp::Put { key, value, ttl } => {
                    inner.entries.insert(
                        key,
                        Entry {
                            value,
                            version,
                            expires_at: now + ttl,
                        },
                    );
                }
                WriteOp::Delete { key } => {
                    inner.entries.remove(&key);
                }
                WriteOp::Expire { key, ttl } => {
                    inner.purge_expired(&key, now);
                    if let Some(entry) = inner.entries.get_mut(&key) {
                        entry.expires_at = now + ttl;
                    }
                }
            }
        }

        Ok(CommitResult::Committed)
    }

    fn ttl(&self, key: &str) -> Result<Option<Duration>, StoreError> {
        self.check_available()?;
        let now = self.now();
        let mut inner = self.lock()?;
        inner.purge_expired(key, now);

        Ok(inner.entries.get(key).map(|e| e.expires_at - now))
    }

    fn now(&self) -> DateTime<Utc> {
        MemoryStore::now(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_get_and_expiry() {
        let store = MemoryStore::new();
        let mut txn = Transaction::new();
        txn.put("a", b"one".to_vec(), Duration::minutes(10));
        assert_eq!(store.commit(txn).unwrap(), CommitResult::Committed);

        assert_eq!(store.get("a").unwrap().unwrap().value, b"one".to_vec());

        store.advance_clock(Duration::minutes(11));
        assert!(store.get("a").unwrap().is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn test_watch_conflict_writes_nothing() {
        let store = MemoryStore::new();
        let mut txn = Transaction::new();
        txn.put("a", vec![1], Duration::minutes(5));
        store.commit(txn).unwrap();
        let version = store.get("a").unwrap().unwrap().version;

        // Concurrent writer bumps the version
        let mut other = Transaction::new();
        other.put("a", vec![2], Duration::minutes(5));
        store.commit(other).unwrap();

        let mut stale = Transaction::new();
        stale.watch("a", Some(version));
        stale.put("a", vec![3], Duration::minutes(5));
        stale.put("b", vec![3], Duration::minutes(5));
        assert_eq!(store.commit(stale).unwrap(), CommitResult::Conflict);

        assert_eq!(store.get("a").unwrap().unwrap().value, vec![2]);
        assert!(store.get("b").unwrap().is_none());
    }

    #[test]
    fn test_watch_absent_key() {
        let store = MemoryStore::new();
        let mut first = Transaction::new();
        first.watch("slot", None).put("slot", vec![1], Duration::minutes(1));
        assert_eq!(store.commit(first).unwrap(), CommitResult::Committed);

        let mut second = Transaction::new();
        second.watch("slot", None).put("slot", vec![2], Duration::minutes(1));
        assert_eq!(store.commit(second).unwrap(), CommitResult::Conflict);
    }

    #[test]
    fn test_expire_refreshes_ttl() {
        let store = MemoryStore::new();
        let mut txn = Transaction::new();
        txn.put("a", vec![1], Duration::minutes(5));
        store.commit(txn).unwrap();

        store.advance_clock(Duration::minutes(4));
        let mut touch = Transaction::new();
        touch.expire("a", Duration::minutes(5));
        store.commit(touch).unwrap();

        store.advance_clock(Duration::minutes(4));
        assert!(store.get("a").unwrap().is_some());
        assert!(store.ttl("a").unwrap().unwrap() <= Duration::minutes(1));
    }

    #[test]
    fn test_commit_sweeps_expired_keys() {
        let store = MemoryStore::new();
        for i in 0..100 {
            let mut txn = Transaction::new();
            txn.put(format!("invite:{}", i), vec![1], Duration::seconds(60));
            store.commit(txn).unwrap();
        }
        store.advance_clock(Duration::hours(1));

        let mut txn = Transaction::new();
        txn.put("fresh", vec![2], Duration::seconds(60));
        store.commit(txn).unwrap();

        assert_eq!(store.len(), 1);
        assert_eq!(store.inner.lock().unwrap().entries.len(), 1);
    }

    #[test]
    fn test_unavailable_fails_closed() {
        let store = MemoryStore::new();
        store.set_available(false);
        assert!(matches!(store.get("a"), Err(StoreError::Unavailable)));
        assert!(matches!(
            store.commit(Transaction::new()),
            Err(StoreError::Unavailable)
        ));
    }

    #[test]
    fn test_typed_round_trip() {
        let store = MemoryStore::new();
        let mut txn = Transaction::new();
        txn.put_typed("numbers", &vec![1u32, 2, 3], Duration::minutes(1))
            .unwrap();
        store.commit(txn).unwrap();

        let typed: Typed<Vec<u32>> = get_typed(&store, "numbers").unwrap().unwrap();
        assert_eq!(typed.value, vec![1, 2, 3]);

        let mut bad = Transaction::new();
        bad.put("numbers", vec![0xff], Duration::minutes(1));
        store.commit(bad).unwrap();
        assert!(matches!(
            get_typed::<Vec<u32>>(&store, "numbers"),
            Err(StoreError::Codec(_))
        ));
    }
}

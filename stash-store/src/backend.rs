//! Storage backend trait and in-memory implementation.
//!
//! The backend is the external persistence collaborator: a durable
//! string-to-string map with async, fallible operations. Everything the
//! store layers on top (namespacing, caching, migrations) is backend
//! agnostic.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use stash_core::{BackendError, StashResult};

/// Async persistence backend for the key-value store.
///
/// Implementations must be safe for concurrent use. Keys and values are
/// opaque strings; the store handles all encoding and namespacing above
/// this trait.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Read a value. `Ok(None)` means the key has never been stored.
    async fn get(&self, key: &str) -> StashResult<Option<String>>;

    /// Write a value, replacing any previous one.
    async fn set(&self, key: &str, value: &str) -> StashResult<()>;

    /// Remove a key. Removing an absent key is not an error.
    async fn remove(&self, key: &str) -> StashResult<()>;

    /// Remove everything, including reserved entries.
    async fn clear(&self) -> StashResult<()>;
}

#[async_trait]
impl<B: StorageBackend + ?Sized> StorageBackend for Arc<B> {
    async fn get(&self, key: &str) -> StashResult<Option<String>> {
        (**self).get(key).await
    }

    async fn set(&self, key: &str, value: &str) -> StashResult<()> {
        (**self).set(key, value).await
    }

    async fn remove(&self, key: &str) -> StashResult<()> {
        (**self).remove(key).await
    }

    async fn clear(&self) -> StashResult<()> {
        (**self).clear().await
    }
}

/// In-memory [`StorageBackend`].
///
/// Used by tests and by embedders that want a process-local store. Carries
/// fault-injection switches so the error-propagation contracts of the store
/// can be exercised, and read/write counters for asserting I/O behavior.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: RwLock<HashMap<String, String>>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    reads: AtomicUsize,
    writes: AtomicUsize,
}

impl MemoryBackend {
    /// Create an empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `get` fail with an I/O error.
    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Make every subsequent `set` / `remove` / `clear` fail with an I/O error.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of `get` calls seen, including failed ones.
    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// Number of mutating calls seen, including failed ones.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Inspect the raw persisted string for a key (test/debug use).
    pub fn raw(&self, key: &str) -> Option<String> {
        self.entries
            .read()
            .ok()
            .and_then(|map| map.get(key).cloned())
    }

    /// Number of persisted entries.
    pub fn len(&self) -> usize {
        self.entries.read().map(|map| map.len()).unwrap_or(0)
    }

    /// Whether the backend holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn get(&self, key: &str) -> StashResult<Option<String>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(BackendError::Io {
                reason: format!("injected read failure for {key}"),
            }
            .into());
        }
        let map = self
            .entries
            .read()
            .map_err(|_| BackendError::LockPoisoned)?;
        Ok(map.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> StashResult<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(BackendError::Io {
                reason: format!("injected write failure for {key}"),
            }
            .into());
        }
        let mut map = self
            .entries
            .write()
            .map_err(|_| BackendError::LockPoisoned)?;
        map.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> StashResult<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(BackendError::Io {
                reason: format!("injected write failure for {key}"),
            }
            .into());
        }
        let mut map = self
            .entries
            .write()
            .map_err(|_| BackendError::LockPoisoned)?;
        map.remove(key);
        Ok(())
    }

    async fn clear(&self) -> StashResult<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(BackendError::Io {
                reason: "injected write failure for clear".to_string(),
            }
            .into());
        }
        let mut map = self
            .entries
            .write()
            .map_err(|_| BackendError::LockPoisoned)?;
        map.clear();
        Ok(())
    }
}

//! The cached, namespaced key-value store.
//!
//! [`KeyValueStore`] layers four concerns over one [`StorageBackend`]:
//! per-user key namespacing, a write-through in-memory read cache, the
//! metadata record that gates migrations, and the installation identifier.
//!
//! # Lifecycle
//!
//! Construction is cheap and synchronous. The first data operation runs a
//! one-shot initialization (create the metadata record from configured
//! defaults if the backend has none, bring the cache up); concurrent
//! callers before that point all await the same initialization.
//!
//! # Read resilience
//!
//! Backend and decode failures on the read path are logged and reported as
//! absence. Callers of [`get`](KeyValueStore::get) cannot distinguish
//! "never stored" from "stored but unreadable"; write and delete failures
//! propagate normally.

use std::collections::HashMap;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{OnceCell, RwLock};

use stash_core::{
    BackendError, MetaPatch, StashError, StashResult, StoreMeta, ValidationError,
};

use crate::backend::StorageBackend;
use crate::config::StoreConfig;

/// Typed, cached accessor over a [`StorageBackend`].
///
/// User data is addressed by logical keys; the backend key is
/// `"{curr_user}:{logical_key}"` with `curr_user` read from the metadata
/// record. Reserved entries (metadata, install id) bypass namespacing and
/// the user-data cache entirely.
pub struct KeyValueStore<B: StorageBackend> {
    backend: B,
    config: StoreConfig,
    /// One-shot lazy initialization. Only a successful run is memoized, so
    /// a failed bootstrap is retried on the next operation.
    init: OnceCell<()>,
    /// Cached metadata record. `None` means "not loaded yet", which is
    /// distinct from the record being absent in the backend.
    meta: RwLock<Option<StoreMeta>>,
    /// User-data cache, keyed by namespaced key. `None` until the store
    /// initializes; absence of a key is the only "no value" representation.
    cache: RwLock<Option<HashMap<String, Value>>>,
    install_id: OnceCell<String>,
}

impl<B: StorageBackend> KeyValueStore<B> {
    /// Create a store over `backend`. No I/O happens until the first
    /// operation.
    pub fn new(backend: B, config: StoreConfig) -> Self {
        Self {
            backend,
            config,
            init: OnceCell::new(),
            meta: RwLock::new(None),
            cache: RwLock::new(None),
            install_id: OnceCell::new(),
        }
    }

    /// Create a store with the default configuration.
    pub fn with_defaults(backend: B) -> Self {
        Self::new(backend, StoreConfig::default())
    }

    /// The underlying backend.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// The store configuration.
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    // ========================================================================
    // LAZY INITIALIZATION
    // ========================================================================

    /// Ensure the metadata record exists and the cache is live.
    ///
    /// Memoized: concurrent callers await one initialization, and repeated
    /// calls after success are no-ops.
    async fn ensure_init(&self) -> StashResult<()> {
        self.init
            .get_or_try_init(|| async {
                if self.get_meta().await?.is_none() {
                    // Fresh backend: materialize the configured defaults.
                    self.put_meta(&MetaPatch::default()).await?;
                }
                let mut cache = self.cache.write().await;
                if cache.is_none() {
                    *cache = Some(HashMap::new());
                }
                Ok(())
            })
            .await
            .map(|_| ())
    }

    // ========================================================================
    // NAMESPACING
    // ========================================================================

    /// Resolve a logical key to its namespaced backend key, loading the
    /// metadata record if it is not cached yet.
    pub async fn resolve_key(&self, logical: &str) -> StashResult<String> {
        let user = match self.get_meta().await? {
            Some(meta) => meta.curr_user,
            None => self.config.defaults.curr_user.clone(),
        };
        Ok(format!("{user}:{logical}"))
    }

    /// Cache-only variant of [`resolve_key`](Self::resolve_key).
    ///
    /// Returns `None` when the metadata record has not been cached yet.
    /// Never touches the backend, which keeps
    /// [`cache_get`](Self::cache_get) a pure peek.
    pub async fn resolve_key_cached(&self, logical: &str) -> Option<String> {
        let meta = self.meta.read().await;
        meta.as_ref()
            .map(|m| format!("{}:{}", m.curr_user, logical))
    }

    // ========================================================================
    // METADATA ACCESSOR
    // ========================================================================

    /// Read the metadata record: cached copy if present, otherwise loaded
    /// from the backend. `Ok(None)` means the backend has never been
    /// initialized; absence is not an error.
    pub async fn get_meta(&self) -> StashResult<Option<StoreMeta>> {
        if let Some(meta) = self.meta.read().await.clone() {
            return Ok(Some(meta));
        }

        let Some(raw) = self.backend.get(&self.config.meta_key).await? else {
            return Ok(None);
        };
        let meta: StoreMeta =
            serde_json::from_str(&raw).map_err(|e| BackendError::Decode {
                key: self.config.meta_key.clone(),
                reason: e.to_string(),
            })?;

        let mut cached = self.meta.write().await;
        *cached = Some(meta.clone());
        Ok(Some(meta))
    }

    /// Merge `patch` into the metadata record and persist the full merged
    /// record.
    ///
    /// This is the only mutation path for `last_migration_version` and
    /// `curr_user`. Switching `curr_user` does not touch cached entries
    /// under the old namespace; callers that re-login should follow up
    /// with [`purge_cache`](Self::purge_cache).
    pub async fn put_meta(&self, patch: &MetaPatch) -> StashResult<()> {
        let mut cached = self.meta.write().await;

        let base = match cached.clone() {
            Some(meta) => meta,
            // Not cached: prefer the persisted record over defaults so a
            // partial patch cannot clobber fields written earlier.
            None => match self.backend.get(&self.config.meta_key).await? {
                Some(raw) => {
                    serde_json::from_str(&raw).map_err(|e| BackendError::Decode {
                        key: self.config.meta_key.clone(),
                        reason: e.to_string(),
                    })?
                }
                None => self.config.defaults.clone(),
            },
        };

        let merged = patch.merged_into(&base);
        let encoded =
            serde_json::to_string(&merged).map_err(|e| BackendError::Encode {
                key: self.config.meta_key.clone(),
                reason: e.to_string(),
            })?;

        *cached = Some(merged);
        self.backend.set(&self.config.meta_key, &encoded).await
    }

    // ========================================================================
    // BASIC KEY OPERATIONS
    // ========================================================================

    /// Store `value` under `key`.
    ///
    /// The cache is updated before the backend write starts; if the write
    /// fails the error propagates and the cache keeps the new value. That
    /// inconsistency window is a documented limitation, resolved by the
    /// next successful write or a [`purge_cache`](Self::purge_cache).
    pub async fn put<T: Serialize>(&self, key: &str, value: &T) -> StashResult<()> {
        if key.is_empty() {
            return Err(ValidationError::EmptyKey { operation: "put" }.into());
        }
        let json = encode_value(key, value)?;

        self.ensure_init().await?;
        let namespaced = self.resolve_key(key).await?;

        {
            let mut cache = self.cache.write().await;
            cache
                .get_or_insert_with(HashMap::new)
                .insert(namespaced.clone(), json.clone());
        }

        let encoded = serde_json::to_string(&json).map_err(|e| BackendError::Encode {
            key: namespaced.clone(),
            reason: e.to_string(),
        })?;
        self.backend.set(&namespaced, &encoded).await
    }

    /// Read the value under `key`.
    ///
    /// Cache hits return without touching the backend. Misses read through
    /// and populate the cache. Absence, backend read failures, and decode
    /// failures all present as `Ok(None)`; only an empty key is an error.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> StashResult<Option<T>> {
        if key.is_empty() {
            return Err(ValidationError::EmptyKey { operation: "get" }.into());
        }

        self.ensure_init().await?;
        let namespaced = self.resolve_key(key).await?;

        {
            let cache = self.cache.read().await;
            if let Some(value) = cache.as_ref().and_then(|map| map.get(&namespaced)) {
                return Ok(decode_cached(&namespaced, value.clone()));
            }
        }

        let raw = match self.backend.get(&namespaced).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return Ok(None),
            Err(e) => {
                tracing::warn!(key = %namespaced, error = %e, "read failed, treating as absent");
                return Ok(None);
            }
        };

        let value: Value = match serde_json::from_str(&raw) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(key = %namespaced, error = %e, "stored value is not valid JSON, treating as absent");
                return Ok(None);
            }
        };

        {
            let mut cache = self.cache.write().await;
            cache
                .get_or_insert_with(HashMap::new)
                .insert(namespaced.clone(), value.clone());
        }
        Ok(decode_cached(&namespaced, value))
    }

    /// Remove `key` from the cache and the backend. Removal is
    /// unconditional; deleting an absent key succeeds.
    pub async fn del(&self, key: &str) -> StashResult<()> {
        if key.is_empty() {
            return Err(ValidationError::EmptyKey { operation: "del" }.into());
        }

        self.ensure_init().await?;
        let namespaced = self.resolve_key(key).await?;

        {
            let mut cache = self.cache.write().await;
            if let Some(map) = cache.as_mut() {
                map.remove(&namespaced);
            }
        }
        self.backend.remove(&namespaced).await
    }

    /// Shallow-merge `partial` into the cached object under `key`,
    /// creating an empty object first when absent (upsert).
    ///
    /// Only the partial fragment is persisted to the backend, NOT the
    /// merged object. After a cache purge, a `get` therefore returns the
    /// last fragment instead of the merged view. Long-standing behavior
    /// that callers depend on; do not "fix" without an explicit decision.
    pub async fn update<T: Serialize>(&self, key: &str, partial: &T) -> StashResult<()> {
        if key.is_empty() {
            return Err(ValidationError::EmptyKey { operation: "update" }.into());
        }
        let fragment = encode_value(key, partial)?;

        self.ensure_init().await?;
        let namespaced = self.resolve_key(key).await?;

        {
            let mut cache = self.cache.write().await;
            let map = cache.get_or_insert_with(HashMap::new);
            let entry = map
                .entry(namespaced.clone())
                .or_insert_with(|| Value::Object(serde_json::Map::new()));
            merge_shallow(entry, &fragment);
        }

        let encoded = serde_json::to_string(&fragment).map_err(|e| BackendError::Encode {
            key: namespaced.clone(),
            reason: e.to_string(),
        })?;
        self.backend.set(&namespaced, &encoded).await
    }

    /// Pure cache peek: returns the cached value without ever touching the
    /// backend.
    ///
    /// Returns `Ok(None)` when the store has not initialized yet, when the
    /// metadata record is not cached (the namespaced key cannot be
    /// resolved), or when the entry simply is not cached.
    pub async fn cache_get<T: DeserializeOwned>(&self, key: &str) -> StashResult<Option<T>> {
        if key.is_empty() {
            return Err(ValidationError::EmptyKey { operation: "cache_get" }.into());
        }

        let Some(namespaced) = self.resolve_key_cached(key).await else {
            return Ok(None);
        };

        let cache = self.cache.read().await;
        let Some(value) = cache.as_ref().and_then(|map| map.get(&namespaced)) else {
            return Ok(None);
        };
        Ok(decode_cached(&namespaced, value.clone()))
    }

    // ========================================================================
    // INSTALLATION IDENTIFIER
    // ========================================================================

    /// The stable installation identifier for this physical store.
    ///
    /// Resolved once per instance: read from the backend if present,
    /// otherwise generated, persisted, and cached. Survives restarts via
    /// the backend.
    pub async fn install_id(&self) -> StashResult<String> {
        let id = self
            .install_id
            .get_or_try_init(|| async {
                if let Some(existing) = self.backend.get(&self.config.install_id_key).await? {
                    return Ok::<_, StashError>(existing);
                }
                let id = stash_core::new_install_id();
                self.backend.set(&self.config.install_id_key, &id).await?;
                tracing::info!(install_id = %id, "generated new installation id");
                Ok(id)
            })
            .await?;
        Ok(id.clone())
    }

    // ========================================================================
    // CACHE INTROSPECTION
    // ========================================================================

    /// Snapshot of the user-data cache, for tests and debugging. Mutating
    /// the snapshot has no effect on the store.
    pub async fn cache_snapshot(&self) -> HashMap<String, Value> {
        self.cache.read().await.clone().unwrap_or_default()
    }

    /// Discard every cached user-data entry. The metadata and install-id
    /// caches are untouched.
    pub async fn purge_cache(&self) {
        let mut cache = self.cache.write().await;
        *cache = Some(HashMap::new());
    }
}

/// Serialize a value, rejecting JSON `null` (absence is expressed by
/// removal, never by a stored null).
fn encode_value<T: Serialize>(key: &str, value: &T) -> StashResult<Value> {
    let json = serde_json::to_value(value).map_err(|e| BackendError::Encode {
        key: key.to_string(),
        reason: e.to_string(),
    })?;
    if json.is_null() {
        return Err(ValidationError::NullValue {
            key: key.to_string(),
        }
        .into());
    }
    Ok(json)
}

/// Convert a cached JSON value into the caller's type. A shape mismatch is
/// a read-path decode failure: logged, reported as absence.
fn decode_cached<T: DeserializeOwned>(key: &str, value: Value) -> Option<T> {
    match serde_json::from_value(value) {
        Ok(typed) => Some(typed),
        Err(e) => {
            tracing::warn!(key = %key, error = %e, "cached value does not match requested type, treating as absent");
            None
        }
    }
}

/// Shallow merge: copy the fragment's top-level fields into the target
/// object. Non-object fragments (or targets) replace the target wholesale.
fn merge_shallow(target: &mut Value, fragment: &Value) {
    match (target, fragment) {
        (Value::Object(target_map), Value::Object(fields)) => {
            for (field, value) in fields {
                target_map.insert(field.clone(), value.clone());
            }
        }
        (target, fragment) => *target = fragment.clone(),
    }
}

// =============================================================================
// TESTS
// =============================================================================

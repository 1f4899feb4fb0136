//! Stash Store - Cached Key-Value Accessor
//!
//! A typed accessor layer over a pluggable async key-value backend:
//! per-user key namespacing, a write-through in-memory read cache, a
//! versioned schema-migration runner, and a stable installation id.
//! The backend itself (disk, browser storage, remote) stays behind the
//! [`StorageBackend`] trait; [`MemoryBackend`] ships for tests and
//! embedders that want a process-local store.

pub mod backend;
pub mod config;
pub mod migration;
pub mod store;

pub use backend::{MemoryBackend, StorageBackend};
pub use config::StoreConfig;
pub use migration::{MigrationStep, MigrationTable};
pub use store::KeyValueStore;

// Re-export the core types callers need at the API surface.
pub use stash_core::{
    BackendError, MetaPatch, StashError, StashResult, StoreMeta, ValidationError,
};

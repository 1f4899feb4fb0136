//! Stash Core - Data Types
//!
//! Pure data structures for the stash key-value layer. All other crates
//! depend on this. This crate contains ONLY data types and the error
//! taxonomy - no storage logic.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod error;

pub use error::{BackendError, StashError, StashResult, ValidationError};

// ============================================================================
// RESERVED KEYS
// ============================================================================

/// Backend key for the store metadata record.
///
/// Reserved keys are stored as-is, never run through user namespacing, and
/// the leading `__` sentinel keeps them out of the `user:logical` key space.
pub const META_KEY: &str = "__stash_meta__";

/// Backend key for the installation identifier.
pub const INSTALL_ID_KEY: &str = "__stash_install_id__";

// ============================================================================
// IDENTITY
// ============================================================================

/// Generate a new installation identifier (UUIDv7, timestamp-sortable).
pub fn new_install_id() -> String {
    Uuid::now_v7().to_string()
}

// ============================================================================
// METADATA RECORD
// ============================================================================

/// The store metadata record.
///
/// Exactly one instance exists per physical store, persisted JSON-encoded
/// under [`META_KEY`]. It gates migrations and drives user namespacing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreMeta {
    /// Highest migration version ever applied. Monotonically non-decreasing.
    pub last_migration_version: u64,
    /// User whose namespace receives all user-data keys.
    pub curr_user: String,
}

impl Default for StoreMeta {
    fn default() -> Self {
        Self {
            last_migration_version: 0,
            curr_user: String::new(),
        }
    }
}

/// Partial-update payload for [`StoreMeta`].
///
/// Fields left as `None` keep their current value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetaPatch {
    /// New migration high-water mark.
    pub last_migration_version: Option<u64>,
    /// New current user. Switching users does NOT purge cached entries
    /// under the old namespace; callers own that decision.
    pub curr_user: Option<String>,
}

impl MetaPatch {
    /// Apply this patch on top of an existing record, returning the merged
    /// record.
    pub fn merged_into(&self, base: &StoreMeta) -> StoreMeta {
        StoreMeta {
            last_migration_version: self
                .last_migration_version
                .unwrap_or(base.last_migration_version),
            curr_user: self
                .curr_user
                .clone()
                .unwrap_or_else(|| base.curr_user.clone()),
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserved_keys_are_distinct_and_unnamespaced() {
        assert_ne!(META_KEY, INSTALL_ID_KEY);
        // Namespaced user keys always have the form `user:logical`; reserved
        // keys stay outside that space.
        assert!(!META_KEY.contains(':'));
        assert!(!INSTALL_ID_KEY.contains(':'));
    }

    #[test]
    fn test_new_install_id_is_unique() {
        assert_ne!(new_install_id(), new_install_id());
    }

    #[test]
    fn test_meta_roundtrips_through_json() {
        let meta = StoreMeta {
            last_migration_version: 7,
            curr_user: "alice".to_string(),
        };
        let encoded = serde_json::to_string(&meta).expect("encode");
        let decoded: StoreMeta = serde_json::from_str(&encoded).expect("decode");
        assert_eq!(meta, decoded);
    }

    #[test]
    fn test_patch_merges_only_set_fields() {
        let base = StoreMeta {
            last_migration_version: 2,
            curr_user: "alice".to_string(),
        };

        let patch = MetaPatch {
            last_migration_version: Some(5),
            curr_user: None,
        };
        let merged = patch.merged_into(&base);
        assert_eq!(merged.last_migration_version, 5);
        assert_eq!(merged.curr_user, "alice");

        let patch = MetaPatch {
            last_migration_version: None,
            curr_user: Some("bob".to_string()),
        };
        let merged = patch.merged_into(&base);
        assert_eq!(merged.last_migration_version, 2);
        assert_eq!(merged.curr_user, "bob");
    }

    #[test]
    fn test_empty_patch_is_identity() {
        let base = StoreMeta {
            last_migration_version: 3,
            curr_user: "carol".to_string(),
        };
        assert_eq!(MetaPatch::default().merged_into(&base), base);
    }
}

//! Store configuration.

use stash_core::{StoreMeta, INSTALL_ID_KEY, META_KEY};

/// Configuration for a [`KeyValueStore`](crate::KeyValueStore).
///
/// Carries the caller-supplied metadata defaults used when a backend has
/// never been initialized, plus the reserved backend keys. Reserved keys
/// are constant for the lifetime of a store instance and are never run
/// through user namespacing; overriding them lets embedders host several
/// logical stores in one physical backend.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Metadata record created on first use of a fresh backend.
    pub defaults: StoreMeta,
    /// Backend key holding the metadata record.
    pub meta_key: String,
    /// Backend key holding the installation identifier.
    pub install_id_key: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            defaults: StoreMeta::default(),
            meta_key: META_KEY.to_string(),
            install_id_key: INSTALL_ID_KEY.to_string(),
        }
    }
}

impl StoreConfig {
    /// Create a config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the metadata defaults for fresh backends.
    pub fn with_defaults(mut self, defaults: StoreMeta) -> Self {
        self.defaults = defaults;
        self
    }

    /// Set only the default user, keeping migration version 0.
    pub fn with_default_user(mut self, user: impl Into<String>) -> Self {
        self.defaults.curr_user = user.into();
        self
    }

    /// Override the reserved metadata key.
    pub fn with_meta_key(mut self, key: impl Into<String>) -> Self {
        self.meta_key = key.into();
        self
    }

    /// Override the reserved install-id key.
    pub fn with_install_id_key(mut self, key: impl Into<String>) -> Self {
        self.install_id_key = key.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_uses_reserved_keys() {
        let config = StoreConfig::default();
        assert_eq!(config.meta_key, META_KEY);
        assert_eq!(config.install_id_key, INSTALL_ID_KEY);
        assert_eq!(config.defaults.last_migration_version, 0);
        assert_eq!(config.defaults.curr_user, "");
    }

    #[test]
    fn test_builder_methods() {
        let config = StoreConfig::new()
            .with_default_user("alice")
            .with_meta_key("__alt_meta__")
            .with_install_id_key("__alt_install__");

        assert_eq!(config.defaults.curr_user, "alice");
        assert_eq!(config.meta_key, "__alt_meta__");
        assert_eq!(config.install_id_key, "__alt_install__");
    }

    #[test]
    fn test_with_defaults_replaces_whole_record() {
        let config = StoreConfig::new().with_defaults(StoreMeta {
            last_migration_version: 4,
            curr_user: "bob".to_string(),
        });
        assert_eq!(config.defaults.last_migration_version, 4);
        assert_eq!(config.defaults.curr_user, "bob");
    }
}

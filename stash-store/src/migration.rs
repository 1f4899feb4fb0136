//! Versioned schema-migration runner.
//!
//! Migrations are organized as a table mapping version numbers to ordered
//! lists of steps. The runner applies versions above the persisted
//! high-water mark in ascending order, strictly sequentially, and advances
//! `last_migration_version` afterwards. Execution is best-effort: a step
//! reporting failure is logged and the run continues. There is no rollback.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use stash_core::MetaPatch;

use crate::backend::StorageBackend;
use crate::store::KeyValueStore;

/// A single migration step.
///
/// Steps receive the store itself and report success as a boolean; the
/// runner never treats a failed step as fatal. `name()` identifies the
/// step in failure logs.
#[async_trait]
pub trait MigrationStep<B: StorageBackend>: Send + Sync {
    /// Identifier used in logs.
    fn name(&self) -> &str;

    /// Apply the step. Return `false` to report failure.
    async fn apply(&self, store: &KeyValueStore<B>) -> bool;
}

/// Migration table: version number to ordered steps for that version.
///
/// Supplied per call and never persisted; only the resulting
/// `last_migration_version` survives. Versions must be strictly positive;
/// a table containing version 0 invalidates the entire call.
pub type MigrationTable<B> = BTreeMap<u64, Vec<Arc<dyn MigrationStep<B>>>>;

impl<B: StorageBackend> KeyValueStore<B> {
    /// Run every pending migration in `table`.
    ///
    /// Returns `true` when the table was processed (including the case
    /// where every version was already applied), `false` on an empty
    /// table, an uninitialized store, an invalid version number, or a
    /// metadata persistence failure. Never returns an error; failures are
    /// logged.
    ///
    /// Versions at or below the persisted `last_migration_version` are
    /// skipped entirely. Steps within a version run in list order, one at
    /// a time; a later step may depend on an earlier one's effect. After
    /// the run, the persisted version is the highest version actually
    /// visited, even if some of its steps reported failure.
    pub async fn migrate(&self, table: &MigrationTable<B>) -> bool {
        if table.is_empty() {
            tracing::error!("migration table is empty, nothing to run");
            return false;
        }

        let meta = match self.get_meta().await {
            Ok(Some(meta)) => meta,
            Ok(None) => {
                // Migrations upgrade an existing store, never bootstrap one.
                tracing::info!("store has no metadata record, skipping migrations");
                return false;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to load metadata record");
                return false;
            }
        };

        if table.keys().any(|&version| version == 0) {
            tracing::error!("migration versions must be strictly positive, aborting");
            return false;
        }

        let mut highest_visited = None;
        for (&version, steps) in table {
            if version <= meta.last_migration_version {
                tracing::debug!(
                    version,
                    current = meta.last_migration_version,
                    "version already applied, skipping"
                );
                continue;
            }

            for step in steps {
                if step.apply(self).await {
                    tracing::debug!(version, step = step.name(), "migration step applied");
                } else {
                    tracing::error!(
                        version,
                        step = step.name(),
                        "migration step reported failure, continuing"
                    );
                }
            }
            highest_visited = Some(version);
        }

        if let Some(version) = highest_visited {
            let patch = MetaPatch {
                last_migration_version: Some(version),
                curr_user: None,
            };
            if let Err(e) = self.put_meta(&patch).await {
                tracing::error!(version, error = %e, "failed to persist migration version");
                return false;
            }
            tracing::info!(version, "migrations applied");
        }

        true
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::config::StoreConfig;
    use serde_json::json;
    use std::sync::Mutex;

    type Store = KeyValueStore<MemoryBackend>;
    type Log = Arc<Mutex<Vec<String>>>;

    /// Step that records its name in a shared log and reports `succeed`.
    struct RecordingStep {
        name: String,
        log: Log,
        succeed: bool,
    }

    impl RecordingStep {
        fn ok(name: &str, log: &Log) -> Arc<dyn MigrationStep<MemoryBackend>> {
            Arc::new(Self {
                name: name.to_string(),
                log: Arc::clone(log),
                succeed: true,
            })
        }

        fn failing(name: &str, log: &Log) -> Arc<dyn MigrationStep<MemoryBackend>> {
            Arc::new(Self {
                name: name.to_string(),
                log: Arc::clone(log),
                succeed: false,
            })
        }
    }

    #[async_trait]
    impl MigrationStep<MemoryBackend> for RecordingStep {
        fn name(&self) -> &str {
            &self.name
        }

        async fn apply(&self, _store: &Store) -> bool {
            self.log.lock().unwrap().push(self.name.clone());
            self.succeed
        }
    }

    /// Step that rewrites a stored entry through the store API.
    struct RenameThemeStep;

    #[async_trait]
    impl MigrationStep<MemoryBackend> for RenameThemeStep {
        fn name(&self) -> &str {
            "rename-theme"
        }

        async fn apply(&self, store: &Store) -> bool {
            let Ok(Some(old)) = store.get::<serde_json::Value>("prefs").await else {
                return false;
            };
            let Some(theme) = old.get("colour_theme").cloned() else {
                return false;
            };
            store.put("prefs", &json!({ "theme": theme })).await.is_ok()
        }
    }

    async fn initialized_store() -> Store {
        let store = KeyValueStore::new(
            MemoryBackend::new(),
            StoreConfig::new().with_default_user("alice"),
        );
        store.put_meta(&MetaPatch::default()).await.unwrap();
        store
    }

    async fn stored_version(store: &Store) -> u64 {
        store
            .get_meta()
            .await
            .unwrap()
            .unwrap()
            .last_migration_version
    }

    #[tokio::test]
    async fn test_empty_table_fails() {
        let store = initialized_store().await;
        assert!(!store.migrate(&MigrationTable::new()).await);
        assert_eq!(stored_version(&store).await, 0);
    }

    #[tokio::test]
    async fn test_uninitialized_store_fails_without_bootstrapping() {
        let store = KeyValueStore::with_defaults(MemoryBackend::new());
        let log = Log::default();
        let table =
            MigrationTable::from([(1, vec![RecordingStep::ok("v1", &log)])]);

        assert!(!store.migrate(&table).await);
        assert!(log.lock().unwrap().is_empty());
        // Must not create a metadata record as a side effect.
        assert_eq!(store.get_meta().await.unwrap(), None);
        assert!(store.backend().is_empty());
    }

    #[tokio::test]
    async fn test_version_zero_invalidates_whole_call() {
        let store = initialized_store().await;
        let log = Log::default();
        let table = MigrationTable::from([
            (0, vec![RecordingStep::ok("v0", &log)]),
            (1, vec![RecordingStep::ok("v1", &log)]),
        ]);

        assert!(!store.migrate(&table).await);
        // Nothing ran, version untouched.
        assert!(log.lock().unwrap().is_empty());
        assert_eq!(stored_version(&store).await, 0);
    }

    #[tokio::test]
    async fn test_versions_and_steps_run_in_order() {
        let store = initialized_store().await;
        let log = Log::default();
        let table = MigrationTable::from([
            (2, vec![RecordingStep::ok("f3", &log)]),
            (
                1,
                vec![RecordingStep::ok("f1", &log), RecordingStep::ok("f2", &log)],
            ),
        ]);

        assert!(store.migrate(&table).await);
        assert_eq!(*log.lock().unwrap(), vec!["f1", "f2", "f3"]);
        assert_eq!(stored_version(&store).await, 2);
    }

    #[tokio::test]
    async fn test_second_run_is_idempotent() {
        let store = initialized_store().await;
        let log = Log::default();
        let table = MigrationTable::from([
            (1, vec![RecordingStep::ok("v1", &log)]),
            (2, vec![RecordingStep::ok("v2", &log)]),
        ]);

        assert!(store.migrate(&table).await);
        assert_eq!(log.lock().unwrap().len(), 2);

        // Same table again: every version is at or below the stored mark.
        assert!(store.migrate(&table).await);
        assert_eq!(log.lock().unwrap().len(), 2);
        assert_eq!(stored_version(&store).await, 2);
    }

    #[tokio::test]
    async fn test_already_applied_version_does_not_regress() {
        let store = initialized_store().await;
        store
            .put_meta(&MetaPatch {
                last_migration_version: Some(1),
                curr_user: None,
            })
            .await
            .unwrap();

        let log = Log::default();
        let table = MigrationTable::from([(1, vec![RecordingStep::ok("v1", &log)])]);

        assert!(store.migrate(&table).await);
        assert!(log.lock().unwrap().is_empty());
        assert_eq!(stored_version(&store).await, 1);
    }

    #[tokio::test]
    async fn test_failing_step_does_not_halt_the_run() {
        let store = initialized_store().await;
        let log = Log::default();
        let table = MigrationTable::from([
            (
                1,
                vec![
                    RecordingStep::failing("bad", &log),
                    RecordingStep::ok("after-bad", &log),
                ],
            ),
            (2, vec![RecordingStep::ok("v2", &log)]),
        ]);

        assert!(store.migrate(&table).await);
        assert_eq!(*log.lock().unwrap(), vec!["bad", "after-bad", "v2"]);
        // Highest visited version persists even though a step failed.
        assert_eq!(stored_version(&store).await, 2);
    }

    #[tokio::test]
    async fn test_version_persistence_failure_reports_false() {
        let store = initialized_store().await;
        let log = Log::default();
        let table = MigrationTable::from([(1, vec![RecordingStep::ok("v1", &log)])]);

        store.backend().fail_writes(true);
        assert!(!store.migrate(&table).await);
        // The step itself still ran; only the version write failed.
        assert_eq!(*log.lock().unwrap(), vec!["v1"]);
    }

    #[tokio::test]
    async fn test_steps_can_rewrite_data_through_the_store() {
        let store = initialized_store().await;
        store
            .put("prefs", &json!({"colour_theme": "dark"}))
            .await
            .unwrap();

        let step: Arc<dyn MigrationStep<MemoryBackend>> = Arc::new(RenameThemeStep);
        let table = MigrationTable::from([(1, vec![step])]);

        assert!(store.migrate(&table).await);
        let migrated: Option<serde_json::Value> = store.get("prefs").await.unwrap();
        assert_eq!(migrated, Some(json!({"theme": "dark"})));
        assert_eq!(stored_version(&store).await, 1);
    }
}

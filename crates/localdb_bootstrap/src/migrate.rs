//! Schema sync through a ready handle.

use crate::error::{BootstrapError, BootstrapResult};
use crate::handle::DatabaseHandle;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{error, info};

/// What a call to [`crate::BootstrapManager::migrate`] did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    /// Tables created by this call.
    pub tables_created: usize,
    /// Time the sync took.
    pub elapsed: Duration,
    /// True if the call was skipped because the schema was already synced.
    pub skipped: bool,
}

/// Remembers whether the schema was synced by this manager.
#[derive(Debug, Default)]
pub(crate) struct SchemaMigrator {
    synced: AtomicBool,
}

impl SchemaMigrator {
    pub(crate) fn is_synced(&self) -> bool {
        self.synced.load(Ordering::SeqCst)
    }

    pub(crate) fn run(
        &self,
        db: &DatabaseHandle,
        skip_if_synced: bool,
    ) -> BootstrapResult<MigrationReport> {
        if skip_if_synced && self.is_synced() {
            return Ok(MigrationReport {
                tables_created: 0,
                elapsed: Duration::ZERO,
                skipped: true,
            });
        }

        let started = Instant::now();
        match db.sync_schema() {
            Ok(tables_created) => {
                self.synced.store(true, Ordering::SeqCst);
                let elapsed = started.elapsed();
                info!(
                    tables_created,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "local database schema synced"
                );
                Ok(MigrationReport {
                    tables_created,
                    elapsed,
                    skipped: false,
                })
            }
            Err(e) => {
                error!(error = %e, "local database schema migration failed");
                Err(BootstrapError::Migration(e.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{EngineClient, EngineError, EngineResult, Outcome, Statement};
    use crate::schema::Schema;
    use std::sync::Arc;

    struct Counting {
        fail: bool,
    }

    impl EngineClient for Counting {
        fn execute(&self, _statement: Statement) -> EngineResult<Outcome> {
            Ok(Outcome::default())
        }

        fn execute_batch(&self, statements: Vec<Statement>) -> EngineResult<Vec<Outcome>> {
            if self.fail {
                return Err(EngineError::Misconfigured("read-only".into()));
            }
            Ok(statements
                .iter()
                .map(|_| Outcome {
                    rows: Vec::new(),
                    affected: 1,
                })
                .collect())
        }

        fn extensions(&self) -> Vec<String> {
            Vec::new()
        }
    }

    fn handle(fail: bool) -> DatabaseHandle {
        let schema = Schema::new().with_table("notes", "id").with_table("tags", "id");
        DatabaseHandle::new(Arc::new(Counting { fail }), schema)
    }

    #[test]
    fn second_run_is_skipped_when_asked() {
        let migrator = SchemaMigrator::default();
        let db = handle(false);

        let first = migrator.run(&db, true).unwrap();
        assert_eq!(first.tables_created, 2);
        assert!(!first.skipped);

        assert!(migrator.run(&db, true).unwrap().skipped);
        assert!(!migrator.run(&db, false).unwrap().skipped);
    }

    #[test]
    fn failure_leaves_flag_unset() {
        let migrator = SchemaMigrator::default();
        let result = migrator.run(&handle(true), true);
        assert!(matches!(result, Err(BootstrapError::Migration(_))));
        assert!(!migrator.is_synced());
    }
}

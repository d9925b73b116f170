//! Lazy access to the database handle.

use crate::error::BootstrapResult;
use crate::handle::DatabaseHandle;
use crate::manager::BootstrapManager;
use std::sync::Arc;

/// A database value that can be handed out before the bootstrap finished.
///
/// It holds nothing but the manager. Every access asks the manager for the
/// handle at that moment, so using it early fails with
/// [`crate::BootstrapError::Uninitialized`] instead of at construction.
#[derive(Debug, Clone)]
pub struct LazyDatabase {
    manager: Arc<BootstrapManager>,
}

impl LazyDatabase {
    pub(crate) fn new(manager: Arc<BootstrapManager>) -> Self {
        Self { manager }
    }

    /// Returns the handle if the database is ready.
    pub fn get(&self) -> BootstrapResult<Arc<DatabaseHandle>> {
        self.manager.db()
    }

    /// Runs `f` with the handle.
    pub fn with<R>(&self, f: impl FnOnce(&DatabaseHandle) -> R) -> BootstrapResult<R> {
        let db = self.manager.db()?;
        Ok(f(&db))
    }

    /// Returns true if the database is ready.
    pub fn is_ready(&self) -> bool {
        self.manager.is_ready()
    }

    /// Waits for the handle, starting the bootstrap if none is running.
    pub async fn ready(&self) -> BootstrapResult<Arc<DatabaseHandle>> {
        self.manager.initialize().await
    }

    /// The manager behind this facade.
    pub fn manager(&self) -> &Arc<BootstrapManager> {
        &self.manager
    }
}

#[cfg(test)]
mod tests {
    use crate::config::BootstrapConfig;
    use crate::environment::HostEnvironment;
    use crate::error::BootstrapError;
    use crate::manager::BootstrapManager;
    use crate::schema::Schema;
    use crate::source::MockSource;
    use std::sync::Arc;

    #[tokio::test]
    async fn access_is_deferred_until_use() {
        let manager = BootstrapManager::builder(Schema::new().with_table("notes", "id"))
            .config(BootstrapConfig::new().with_environment(HostEnvironment::Headless))
            .source(Arc::new(MockSource::new(b"\0asm\x01\0\0\0", 4)))
            .build()
            .unwrap();

        let lazy = manager.lazy();
        assert!(!lazy.is_ready());
        assert_eq!(lazy.get().unwrap_err(), BootstrapError::Uninitialized);
        assert!(lazy.with(|db| db.schema().len()).is_err());

        let db = lazy.ready().await.unwrap();
        assert!(Arc::ptr_eq(&db, &lazy.get().unwrap()));
        assert_eq!(lazy.with(|db| db.schema().len()).unwrap(), 1);
        assert!(Arc::ptr_eq(lazy.manager(), &manager));
    }
}

use std::sync::Arc;

use storage::repository::Storage;
use tokio::task::JoinHandle;

use crate::Clock;
use crate::config::{EngineConfig, RemoteSyncConfig};
use crate::controller::{SessionController, SharedController, spawn_liveness_driver};
use crate::error::AppServicesError;
use crate::persistence::{PersistenceOrchestrator, SnapshotSink};
use crate::remote::{HttpRemoteSync, RemoteSessionSync};

/// Wires storage, remote sync and the persistence workers together and hands
/// out controllers that share them.
#[derive(Clone)]
pub struct AppServices {
    storage: Storage,
    remote: Option<Arc<dyn RemoteSessionSync>>,
    persistence: PersistenceOrchestrator,
    clock: Clock,
    config: EngineConfig,
}

impl AppServices {
    /// Build services backed by `SQLite` storage. Remote sync is enabled when
    /// `remote` is given.
    ///
    /// # Errors
    ///
    /// Returns `AppServicesError` if storage initialization fails.
    pub async fn new_sqlite(
        db_url: &str,
        clock: Clock,
        config: EngineConfig,
        remote: Option<RemoteSyncConfig>,
    ) -> Result<Self, AppServicesError> {
        let storage = Storage::sqlite(db_url).await?;
        let remote = remote
            .map(|remote| Arc::new(HttpRemoteSync::new(remote)) as Arc<dyn RemoteSessionSync>);
        Ok(Self::from_parts(storage, remote, clock, config))
    }

    /// Assemble from already-built parts. Spawns the persistence workers, so
    /// it must run inside a tokio runtime.
    #[must_use]
    pub fn from_parts(
        storage: Storage,
        remote: Option<Arc<dyn RemoteSessionSync>>,
        clock: Clock,
        config: EngineConfig,
    ) -> Self {
        let persistence = PersistenceOrchestrator::spawn(
            Arc::clone(&storage.snapshots),
            remote.clone(),
            clock.clone(),
            &config,
        );
        Self {
            storage,
            remote,
            persistence,
            clock,
            config,
        }
    }

    #[must_use]
    pub fn controller(&self) -> SessionController {
        let sink: Arc<dyn SnapshotSink> = Arc::new(self.persistence.clone());
        SessionController::new(
            Arc::clone(&self.storage.snapshots),
            self.remote.clone(),
            sink,
            self.clock.clone(),
            self.config.clone(),
        )
    }

    /// Drive the controller's liveness tick at the configured interval.
    pub fn spawn_liveness(&self, controller: &SharedController) -> JoinHandle<()> {
        spawn_liveness_driver(controller, self.config.liveness_interval)
    }

    #[must_use]
    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    #[must_use]
    pub fn persistence(&self) -> &PersistenceOrchestrator {
        &self.persistence
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Drain pending writes before exit.
    pub async fn shutdown(&self) {
        self.persistence.flush().await;
    }
}

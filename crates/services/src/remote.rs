use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use exam_core::model::{SessionId, SessionSnapshot};
use reqwest::{Client, RequestBuilder, StatusCode};

use crate::config::RemoteSyncConfig;
use crate::error::SyncError;

/// Server of record for session snapshots.
///
/// Writes are one-way during an active session; `fetch` is only used by the
/// recovery flow when the local store has nothing.
#[async_trait]
pub trait RemoteSessionSync: Send + Sync {
    /// Insert or overwrite the snapshot for its session id.
    ///
    /// # Errors
    ///
    /// Returns `SyncError` if the endpoint is unreachable or rejects the write.
    async fn upsert(&self, snapshot: &SessionSnapshot) -> Result<(), SyncError>;

    /// # Errors
    ///
    /// Returns `SyncError` if the endpoint is unreachable or the body is invalid.
    async fn fetch(&self, id: SessionId) -> Result<Option<SessionSnapshot>, SyncError>;

    /// Deleting an unknown id succeeds.
    ///
    /// # Errors
    ///
    /// Returns `SyncError` if the endpoint is unreachable or rejects the delete.
    async fn delete(&self, id: SessionId) -> Result<(), SyncError>;
}

/// JSON-over-HTTP adapter: `PUT`/`GET`/`DELETE {base}/sessions/{id}`.
#[derive(Clone)]
pub struct HttpRemoteSync {
    client: Client,
    config: RemoteSyncConfig,
}

impl HttpRemoteSync {
    #[must_use]
    pub fn new(config: RemoteSyncConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    #[must_use]
    pub fn from_env() -> Option<Self> {
        RemoteSyncConfig::from_env().map(Self::new)
    }

    fn session_url(&self, id: SessionId) -> String {
        format!(
            "{}/sessions/{id}",
            self.config.base_url.trim_end_matches('/')
        )
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.config.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

#[async_trait]
impl RemoteSessionSync for HttpRemoteSync {
    async fn upsert(&self, snapshot: &SessionSnapshot) -> Result<(), SyncError> {
        let response = self
            .authorize(self.client.put(self.session_url(snapshot.session_id)))
            .json(snapshot)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(SyncError::HttpStatus(response.status()));
        }
        Ok(())
    }

    async fn fetch(&self, id: SessionId) -> Result<Option<SessionSnapshot>, SyncError> {
        let response = self
            .authorize(self.client.get(self.session_url(id)))
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(SyncError::HttpStatus(response.status()));
        }
        Ok(Some(response.json().await?))
    }

    async fn delete(&self, id: SessionId) -> Result<(), SyncError> {
        let response = self
            .authorize(self.client.delete(self.session_url(id)))
            .send()
            .await?;

        let status = response.status();
        if status.is_success() || status == StatusCode::NOT_FOUND {
            Ok(())
        } else {
            Err(SyncError::HttpStatus(status))
        }
    }
}

#[derive(Default)]
struct InMemoryRemoteState {
    snapshots: HashMap<SessionId, SessionSnapshot>,
    failures_left: u32,
    upserts: usize,
}

/// In-process server of record for tests and offline runs.
///
/// `fail_next(n)` makes the next `n` calls fail with `Unavailable`.
#[derive(Clone, Default)]
pub struct InMemoryRemote {
    state: Arc<Mutex<InMemoryRemoteState>>,
}

impl InMemoryRemote {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next(&self, calls: u32) {
        self.lock().failures_left = calls;
    }

    /// Successful upserts so far.
    #[must_use]
    pub fn upsert_count(&self) -> usize {
        self.lock().upserts
    }

    #[must_use]
    pub fn stored(&self, id: SessionId) -> Option<SessionSnapshot> {
        self.lock().snapshots.get(&id).cloned()
    }

    pub fn insert(&self, snapshot: SessionSnapshot) {
        self.lock().snapshots.insert(snapshot.session_id, snapshot);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, InMemoryRemoteState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_available(state: &mut InMemoryRemoteState) -> Result<(), SyncError> {
        if state.failures_left > 0 {
            state.failures_left -= 1;
            return Err(SyncError::Unavailable("simulated outage".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteSessionSync for InMemoryRemote {
    async fn upsert(&self, snapshot: &SessionSnapshot) -> Result<(), SyncError> {
        let mut state = self.lock();
        Self::check_available(&mut state)?;
        state.upserts += 1;
        state
            .snapshots
            .insert(snapshot.session_id, snapshot.clone());
        Ok(())
    }

    async fn fetch(&self, id: SessionId) -> Result<Option<SessionSnapshot>, SyncError> {
        let mut state = self.lock();
        Self::check_available(&mut state)?;
        Ok(state.snapshots.get(&id).cloned())
    }

    async fn delete(&self, id: SessionId) -> Result<(), SyncError> {
        let mut state = self.lock();
        Self::check_available(&mut state)?;
        state.snapshots.remove(&id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_url_joins_without_double_slash() {
        let remote = HttpRemoteSync::new(RemoteSyncConfig {
            base_url: "https://sync.example.test/api/".into(),
            token: None,
        });
        let id = SessionId::generate();
        assert_eq!(
            remote.session_url(id),
            format!("https://sync.example.test/api/sessions/{id}")
        );
    }

    #[tokio::test]
    async fn in_memory_remote_fails_then_recovers() {
        let remote = InMemoryRemote::new();
        remote.fail_next(1);
        let id = SessionId::generate();

        assert!(matches!(
            remote.fetch(id).await,
            Err(SyncError::Unavailable(_))
        ));
        assert!(remote.fetch(id).await.unwrap().is_none());
        remote.delete(id).await.unwrap();
    }
}

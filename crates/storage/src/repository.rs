use async_trait::async_trait;
use exam_core::model::{SessionId, SessionSnapshot};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Errors surfaced by storage adapters.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    #[error("not found")]
    NotFound,

    #[error("conflict")]
    Conflict,

    #[error("connection error: {0}")]
    Connection(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Durable local store for whole session snapshots, keyed by session id.
///
/// Writes are whole-state overwrites, so re-saving the same snapshot is
/// harmless and the latest save always wins.
#[async_trait]
pub trait SessionSnapshotRepository: Send + Sync {
    /// Insert or overwrite the snapshot for its session id.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the snapshot cannot be stored.
    async fn save_snapshot(&self, snapshot: &SessionSnapshot) -> Result<(), StorageError>;

    /// Fetch the snapshot for a session, if one was saved.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on connection or decoding failures.
    async fn load_snapshot(&self, id: SessionId) -> Result<Option<SessionSnapshot>, StorageError>;

    /// Delete a session's snapshot. Returns `false` if nothing was stored.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the delete cannot be executed.
    async fn delete_snapshot(&self, id: SessionId) -> Result<bool, StorageError>;

    /// Started-but-not-ended snapshots, most recently saved first.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on connection or decoding failures.
    async fn list_unfinished(&self, limit: u32) -> Result<Vec<SessionSnapshot>, StorageError>;
}

#[derive(Clone)]
struct StoredSnapshot {
    snapshot: SessionSnapshot,
    saved_seq: u64,
}

#[derive(Default)]
struct InMemoryState {
    snapshots: HashMap<SessionId, StoredSnapshot>,
    next_seq: u64,
}

/// Simple in-memory repository implementation for testing and prototyping.
#[derive(Clone, Default)]
pub struct InMemoryRepository {
    state: Arc<Mutex<InMemoryState>>,
}

impl InMemoryRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored snapshots.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Connection` if the lock is poisoned.
    pub fn len(&self) -> Result<usize, StorageError> {
        let guard = self
            .state
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        Ok(guard.snapshots.len())
    }

    /// # Errors
    ///
    /// Returns `StorageError::Connection` if the lock is poisoned.
    pub fn is_empty(&self) -> Result<bool, StorageError> {
        self.len().map(|n| n == 0)
    }
}

#[async_trait]
impl SessionSnapshotRepository for InMemoryRepository {
    async fn save_snapshot(&self, snapshot: &SessionSnapshot) -> Result<(), StorageError> {
        let mut guard = self
            .state
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        guard.next_seq += 1;
        let saved_seq = guard.next_seq;
        guard.snapshots.insert(
            snapshot.session_id,
            StoredSnapshot {
                snapshot: snapshot.clone(),
                saved_seq,
            },
        );
        Ok(())
    }

    async fn load_snapshot(&self, id: SessionId) -> Result<Option<SessionSnapshot>, StorageError> {
        let guard = self
            .state
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        Ok(guard.snapshots.get(&id).map(|s| s.snapshot.clone()))
    }

    async fn delete_snapshot(&self, id: SessionId) -> Result<bool, StorageError> {
        let mut guard = self
            .state
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        Ok(guard.snapshots.remove(&id).is_some())
    }

    async fn list_unfinished(&self, limit: u32) -> Result<Vec<SessionSnapshot>, StorageError> {
        let guard = self
            .state
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        let mut stored: Vec<&StoredSnapshot> = guard
            .snapshots
            .values()
            .filter(|s| s.snapshot.is_unfinished())
            .collect();
        stored.sort_by(|a, b| b.saved_seq.cmp(&a.saved_seq));
        let limit = usize::try_from(limit).unwrap_or(usize::MAX);
        Ok(stored
            .into_iter()
            .take(limit)
            .map(|s| s.snapshot.clone())
            .collect())
    }
}

/// Aggregates repositories behind trait objects for easy backend swapping.
#[derive(Clone)]
pub struct Storage {
    pub snapshots: Arc<dyn SessionSnapshotRepository>,
}

impl Storage {
    #[must_use]
    pub fn in_memory() -> Self {
        let snapshots: Arc<dyn SessionSnapshotRepository> = Arc::new(InMemoryRepository::new());
        Self { snapshots }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use exam_core::model::{
        PaperId, PaperRef, QuestionId, QuestionRef, Section, Session, SessionConfig,
    };
    use exam_core::time::fixed_now;

    fn build_session() -> Session {
        Session::new(
            SessionId::generate(),
            SessionConfig {
                paper: PaperRef::new(PaperId::new(1), "Practice Paper", None),
                sections: vec![Section::new("A", 10)],
                questions: vec![QuestionRef::new(QuestionId::new(1), 0)],
            },
        )
    }

    #[tokio::test]
    async fn save_overwrites_by_session_id() {
        let repo = InMemoryRepository::new();
        let mut session = build_session();
        session.start(fixed_now(), Duration::seconds(60)).unwrap();
        repo.save_snapshot(&session.snapshot()).await.unwrap();

        session.pause(fixed_now() + Duration::seconds(5)).unwrap();
        repo.save_snapshot(&session.snapshot()).await.unwrap();
        repo.save_snapshot(&session.snapshot()).await.unwrap();

        assert_eq!(repo.len().unwrap(), 1);
        let loaded = repo.load_snapshot(session.id()).await.unwrap().unwrap();
        assert!(loaded.is_paused);
    }

    #[tokio::test]
    async fn list_unfinished_skips_setup_and_ended() {
        let repo = InMemoryRepository::new();

        let setup = build_session();
        repo.save_snapshot(&setup.snapshot()).await.unwrap();

        let mut ended = build_session();
        ended.start(fixed_now(), Duration::seconds(60)).unwrap();
        ended.end(fixed_now()).unwrap();
        repo.save_snapshot(&ended.snapshot()).await.unwrap();

        let mut older = build_session();
        older.start(fixed_now(), Duration::seconds(60)).unwrap();
        repo.save_snapshot(&older.snapshot()).await.unwrap();

        let mut newer = build_session();
        newer.start(fixed_now(), Duration::seconds(60)).unwrap();
        repo.save_snapshot(&newer.snapshot()).await.unwrap();

        let listed = repo.list_unfinished(10).await.unwrap();
        let ids: Vec<_> = listed.iter().map(|s| s.session_id).collect();
        assert_eq!(ids, vec![newer.id(), older.id()]);
    }

    #[tokio::test]
    async fn delete_reports_whether_anything_was_removed() {
        let repo = InMemoryRepository::new();
        let session = build_session();
        repo.save_snapshot(&session.snapshot()).await.unwrap();

        assert!(repo.delete_snapshot(session.id()).await.unwrap());
        assert!(!repo.delete_snapshot(session.id()).await.unwrap());
        assert!(repo.load_snapshot(session.id()).await.unwrap().is_none());
    }
}

//! Shared error types for the services crate.

use thiserror::Error;

use exam_core::model::{SessionId, SessionModelError, SessionPhase};
use storage::repository::StorageError;
use storage::sqlite::SqliteInitError;

/// Errors emitted by `RemoteSessionSync` adapters.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SyncError {
    #[error("remote sync request failed with status {0}")]
    HttpStatus(reqwest::StatusCode),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error("remote sync unavailable: {0}")]
    Unavailable(String),
}

/// Errors returned to callers of session commands and the recovery flow.
///
/// Persistence failures during a running session are never surfaced here;
/// they show up in `PersistenceStatus` instead.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SessionError {
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("question index {index} is outside 0..{limit}")]
    OutOfRangeIndex { index: usize, limit: usize },
    #[error("{command} is not allowed while the session is {phase}")]
    InvalidState {
        command: &'static str,
        phase: SessionPhase,
    },
    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(String),
    #[error("no active session")]
    NoActiveSession,
    #[error("session {session_id} cannot be recovered: {reason}")]
    SessionNotRecoverable {
        session_id: SessionId,
        reason: String,
    },
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Sync(#[from] SyncError),
    #[error(transparent)]
    Model(SessionModelError),
}

impl From<SessionModelError> for SessionError {
    fn from(err: SessionModelError) -> Self {
        match err {
            SessionModelError::InvalidConfiguration(reason) => Self::InvalidConfiguration(reason),
            SessionModelError::OutOfRangeIndex { index, limit } => {
                Self::OutOfRangeIndex { index, limit }
            }
            SessionModelError::InvalidState { command, phase } => {
                Self::InvalidState { command, phase }
            }
            SessionModelError::InvalidSnapshot(reason) => Self::InvalidSnapshot(reason),
            other => Self::Model(other),
        }
    }
}

/// Errors emitted while bootstrapping app services.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AppServicesError {
    #[error(transparent)]
    Sqlite(#[from] SqliteInitError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_errors_keep_their_kind() {
        let err = SessionError::from(SessionModelError::InvalidSnapshot("bad cursor".into()));
        assert!(matches!(err, SessionError::InvalidSnapshot(ref r) if r == "bad cursor"));

        let err = SessionError::from(SessionModelError::OutOfRangeIndex { index: 4, limit: 2 });
        assert!(matches!(
            err,
            SessionError::OutOfRangeIndex { index: 4, limit: 2 }
        ));

        let err = SessionError::from(SessionModelError::InvalidConfiguration("empty".into()));
        assert!(matches!(err, SessionError::InvalidConfiguration(_)));
    }
}

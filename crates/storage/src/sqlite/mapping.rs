use exam_core::model::{SessionId, SessionSnapshot};
use sqlx::Row;

use crate::repository::StorageError;

fn ser<E: core::fmt::Display>(e: E) -> StorageError {
    StorageError::Serialization(e.to_string())
}

pub(crate) fn session_id_to_text(id: SessionId) -> String {
    id.to_string()
}

pub(crate) fn paper_id_to_i64(snapshot: &SessionSnapshot) -> Result<i64, StorageError> {
    i64::try_from(snapshot.paper_id.value())
        .map_err(|_| StorageError::Serialization("paper_id overflow".into()))
}

pub(crate) fn encode_payload(snapshot: &SessionSnapshot) -> Result<String, StorageError> {
    serde_json::to_string(snapshot).map_err(ser)
}

/// Decodes a stored row, checking the payload belongs to the row's key.
pub(crate) fn map_snapshot_row(
    row: &sqlx::sqlite::SqliteRow,
) -> Result<SessionSnapshot, StorageError> {
    let id_text: String = row.try_get("id").map_err(ser)?;
    let id: SessionId = id_text.parse().map_err(ser)?;
    let payload: String = row.try_get("payload").map_err(ser)?;
    let snapshot: SessionSnapshot = serde_json::from_str(&payload).map_err(ser)?;

    if snapshot.session_id != id {
        return Err(StorageError::Serialization(format!(
            "row {id} holds snapshot for {}",
            snapshot.session_id
        )));
    }
    Ok(snapshot)
}

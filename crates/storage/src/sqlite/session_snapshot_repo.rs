use async_trait::async_trait;
use chrono::Utc;
use exam_core::model::{SessionId, SessionSnapshot};

use super::SqliteRepository;
use super::mapping::{encode_payload, map_snapshot_row, paper_id_to_i64, session_id_to_text};
use crate::repository::{SessionSnapshotRepository, StorageError};

fn conn<E: core::fmt::Display>(e: E) -> StorageError {
    StorageError::Connection(e.to_string())
}

#[async_trait]
impl SessionSnapshotRepository for SqliteRepository {
    async fn save_snapshot(&self, snapshot: &SessionSnapshot) -> Result<(), StorageError> {
        let payload = encode_payload(snapshot)?;
        let is_paused = i64::from(snapshot.is_paused);

        // save_seq orders saves even when two land in the same clock tick.
        sqlx::query(
            r"
            INSERT INTO session_snapshots (
                id, paper_id, paper_name, started_at, ended_at, is_paused,
                snapshot_version, payload, save_seq, updated_at
            )
            VALUES (
                ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8,
                (SELECT COALESCE(MAX(save_seq), 0) + 1 FROM session_snapshots),
                ?9
            )
            ON CONFLICT(id) DO UPDATE SET
                paper_id = excluded.paper_id,
                paper_name = excluded.paper_name,
                started_at = excluded.started_at,
                ended_at = excluded.ended_at,
                is_paused = excluded.is_paused,
                snapshot_version = excluded.snapshot_version,
                payload = excluded.payload,
                save_seq = excluded.save_seq,
                updated_at = excluded.updated_at
            ",
        )
        .bind(session_id_to_text(snapshot.session_id))
        .bind(paper_id_to_i64(snapshot)?)
        .bind(snapshot.paper_name.as_str())
        .bind(snapshot.started_at)
        .bind(snapshot.ended_at)
        .bind(is_paused)
        .bind(i64::from(snapshot.version))
        .bind(payload)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(conn)?;

        tracing::debug!(session_id = %snapshot.session_id, "snapshot saved");
        Ok(())
    }

    async fn load_snapshot(&self, id: SessionId) -> Result<Option<SessionSnapshot>, StorageError> {
        let row = sqlx::query(
            r"
            SELECT id, payload
            FROM session_snapshots
            WHERE id = ?1
            ",
        )
        .bind(session_id_to_text(id))
        .fetch_optional(&self.pool)
        .await
        .map_err(conn)?;

        row.as_ref().map(map_snapshot_row).transpose()
    }

    async fn delete_snapshot(&self, id: SessionId) -> Result<bool, StorageError> {
        let res = sqlx::query("DELETE FROM session_snapshots WHERE id = ?1")
            .bind(session_id_to_text(id))
            .execute(&self.pool)
            .await
            .map_err(conn)?;

        let removed = res.rows_affected() > 0;
        tracing::debug!(session_id = %id, removed, "snapshot deleted");
        Ok(removed)
    }

    async fn list_unfinished(&self, limit: u32) -> Result<Vec<SessionSnapshot>, StorageError> {
        let rows = sqlx::query(
            r"
            SELECT id, payload
            FROM session_snapshots
            WHERE started_at IS NOT NULL AND ended_at IS NULL
            ORDER BY save_seq DESC
            LIMIT ?1
            ",
        )
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(conn)?;

        // One undecodable row must not hide every other resumable session.
        Ok(rows
            .iter()
            .filter_map(|row| match map_snapshot_row(row) {
                Ok(snapshot) => Some(snapshot),
                Err(err) => {
                    tracing::warn!(error = %err, "skipping undecodable snapshot row");
                    None
                }
            })
            .collect())
    }
}

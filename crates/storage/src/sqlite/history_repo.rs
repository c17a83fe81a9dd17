use assess_core::model::SessionId;

use super::SqliteRepository;
use super::mapping::map_history_row;
use crate::repository::{HistoryEntry, HistoryRow, SessionHistoryRepository, StorageError};

const SELECT_COLUMNS: &str = r"
    SELECT
        id, session_id, session_type, focus_type, focus_target, started_at,
        ended_at, total_questions, correct_answers, accuracy, summary_source
    FROM session_history
";

fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .is_some_and(|db| db.is_unique_violation())
}

#[async_trait::async_trait]
impl SessionHistoryRepository for SqliteRepository {
    async fn append_entry(&self, entry: &HistoryEntry) -> Result<i64, StorageError> {
        let summary = &entry.summary;
        let focus_type = entry.focus.as_ref().map(|f| f.focus_type().as_str());
        let focus_target = entry.focus.as_ref().map(|f| f.focus_target_id());

        let res = sqlx::query(
            r"
                INSERT INTO session_history (
                    session_id, session_type, focus_type, focus_target, started_at,
                    ended_at, total_questions, correct_answers, accuracy, summary_source
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            ",
        )
        .bind(entry.session_id.as_str())
        .bind(entry.session_type.as_str())
        .bind(focus_type)
        .bind(focus_target)
        .bind(entry.started_at)
        .bind(summary.ended_at())
        .bind(i64::from(summary.total_questions()))
        .bind(i64::from(summary.correct_answers()))
        .bind(summary.accuracy())
        .bind(summary.source().as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                StorageError::Conflict
            } else {
                StorageError::Connection(e.to_string())
            }
        })?;

        Ok(res.last_insert_rowid())
    }

    async fn get_entry(&self, id: i64) -> Result<HistoryRow, StorageError> {
        let sql = format!("{SELECT_COLUMNS} WHERE id = ?1");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?
            .ok_or(StorageError::NotFound)?;

        map_history_row(&row)
    }

    async fn find_by_session(
        &self,
        session_id: &SessionId,
    ) -> Result<Option<HistoryRow>, StorageError> {
        let sql = format!("{SELECT_COLUMNS} WHERE session_id = ?1");
        let row = sqlx::query(&sql)
            .bind(session_id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        row.as_ref().map(map_history_row).transpose()
    }

    async fn list_recent(&self, limit: u32) -> Result<Vec<HistoryRow>, StorageError> {
        let sql = format!("{SELECT_COLUMNS} ORDER BY ended_at DESC, id DESC LIMIT ?1");
        let rows = sqlx::query(&sql)
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(map_history_row(&row)?);
        }
        Ok(out)
    }
}

use assess_core::model::{
    FocusContext, FocusType, SessionId, SessionSummary, SessionType, SummarySource,
};
use sqlx::Row;

use crate::repository::{HistoryEntry, HistoryRow, StorageError};

pub(crate) fn ser<E: core::fmt::Display>(e: E) -> StorageError {
    StorageError::Serialization(e.to_string())
}

fn u32_from_i64(field: &'static str, v: i64) -> Result<u32, StorageError> {
    u32::try_from(v).map_err(|_| StorageError::Serialization(format!("invalid {field}: {v}")))
}

pub(crate) fn parse_focus_type(s: &str) -> Result<FocusType, StorageError> {
    match s {
        "knowledge_area" => Ok(FocusType::KnowledgeArea),
        "concept" => Ok(FocusType::Concept),
        _ => Err(StorageError::Serialization(format!("invalid focus type: {s}"))),
    }
}

pub(crate) fn parse_summary_source(s: &str) -> Result<SummarySource, StorageError> {
    match s {
        "server" => Ok(SummarySource::Server),
        "local_fallback" => Ok(SummarySource::LocalFallback),
        _ => Err(StorageError::Serialization(format!(
            "invalid summary source: {s}"
        ))),
    }
}

pub(crate) fn map_history_row(row: &sqlx::sqlite::SqliteRow) -> Result<HistoryRow, StorageError> {
    let id: i64 = row.try_get("id").map_err(ser)?;
    let session_id = SessionId::new(row.try_get::<String, _>("session_id").map_err(ser)?);
    let session_type = row
        .try_get::<String, _>("session_type")
        .map_err(ser)?
        .parse::<SessionType>()
        .map_err(ser)?;

    let focus_type: Option<String> = row.try_get("focus_type").map_err(ser)?;
    let focus_target: Option<String> = row.try_get("focus_target").map_err(ser)?;
    let focus = match (focus_type, focus_target) {
        (Some(kind), Some(target)) => Some(FocusContext::from_parts(
            parse_focus_type(&kind)?,
            &target,
        )),
        (None, None) => None,
        _ => {
            return Err(StorageError::Serialization(
                "focus_type and focus_target must be set together".into(),
            ));
        }
    };

    let summary = SessionSummary::from_persisted(
        u32_from_i64(
            "total_questions",
            row.try_get::<i64, _>("total_questions").map_err(ser)?,
        )?,
        u32_from_i64(
            "correct_answers",
            row.try_get::<i64, _>("correct_answers").map_err(ser)?,
        )?,
        row.try_get("accuracy").map_err(ser)?,
        row.try_get("ended_at").map_err(ser)?,
        parse_summary_source(&row.try_get::<String, _>("summary_source").map_err(ser)?)?,
    )
    .map_err(ser)?;

    Ok(HistoryRow::new(
        id,
        HistoryEntry {
            session_id,
            session_type,
            focus,
            started_at: row.try_get("started_at").map_err(ser)?,
            summary,
        },
    ))
}

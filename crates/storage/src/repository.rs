use assess_core::model::{FocusContext, SessionId, SessionSummary, SessionType};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
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

/// A single ended session, as recorded in local history.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    pub session_id: SessionId,
    pub session_type: SessionType,
    pub focus: Option<FocusContext>,
    pub started_at: DateTime<Utc>,
    pub summary: SessionSummary,
}

/// A persisted history entry with its row id.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryRow {
    pub id: i64,
    pub entry: HistoryEntry,
}

impl HistoryRow {
    #[must_use]
    pub fn new(id: i64, entry: HistoryEntry) -> Self {
        Self { id, entry }
    }
}

/// Repository contract for the local session history.
#[async_trait]
pub trait SessionHistoryRepository: Send + Sync {
    /// Append an ended session.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Conflict` if the session was already recorded,
    /// or other storage errors.
    async fn append_entry(&self, entry: &HistoryEntry) -> Result<i64, StorageError>;

    /// Fetch an entry by row id.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if missing, or other storage errors.
    async fn get_entry(&self, id: i64) -> Result<HistoryRow, StorageError>;

    /// Look up the entry recorded for a session, if any.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    async fn find_by_session(
        &self,
        session_id: &SessionId,
    ) -> Result<Option<HistoryRow>, StorageError>;

    /// Most recently ended sessions first.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    async fn list_recent(&self, limit: u32) -> Result<Vec<HistoryRow>, StorageError>;
}

/// Simple in-memory repository implementation for testing and prototyping.
#[derive(Clone, Default)]
pub struct InMemoryRepository {
    rows: Arc<Mutex<HashMap<i64, HistoryEntry>>>,
}

impl InMemoryRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionHistoryRepository for InMemoryRepository {
    async fn append_entry(&self, entry: &HistoryEntry) -> Result<i64, StorageError> {
        let mut guard = self
            .rows
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        if guard.values().any(|e| e.session_id == entry.session_id) {
            return Err(StorageError::Conflict);
        }
        let id = guard.keys().max().map_or(1, |max| max + 1);
        guard.insert(id, entry.clone());
        Ok(id)
    }

    async fn get_entry(&self, id: i64) -> Result<HistoryRow, StorageError> {
        let guard = self
            .rows
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        guard
            .get(&id)
            .cloned()
            .map(|entry| HistoryRow::new(id, entry))
            .ok_or(StorageError::NotFound)
    }

    async fn find_by_session(
        &self,
        session_id: &SessionId,
    ) -> Result<Option<HistoryRow>, StorageError> {
        let guard = self
            .rows
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        Ok(guard
            .iter()
            .find(|(_, entry)| &entry.session_id == session_id)
            .map(|(id, entry)| HistoryRow::new(*id, entry.clone())))
    }

    async fn list_recent(&self, limit: u32) -> Result<Vec<HistoryRow>, StorageError> {
        let guard = self
            .rows
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        let mut rows: Vec<HistoryRow> = guard
            .iter()
            .map(|(id, entry)| HistoryRow::new(*id, entry.clone()))
            .collect();
        rows.sort_by(|a, b| {
            b.entry
                .summary
                .ended_at()
                .cmp(&a.entry.summary.ended_at())
                .then(b.id.cmp(&a.id))
        });
        rows.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
        Ok(rows)
    }
}

/// Aggregates repositories behind trait objects for easy backend swapping.
#[derive(Clone)]
pub struct Storage {
    pub history: Arc<dyn SessionHistoryRepository>,
}

impl Storage {
    #[must_use]
    pub fn in_memory() -> Self {
        let history: Arc<dyn SessionHistoryRepository> = Arc::new(InMemoryRepository::new());
        Self { history }
    }
}

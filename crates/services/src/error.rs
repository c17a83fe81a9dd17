//! Shared error types for the services crate.

use thiserror::Error;

use assess_core::model::{SessionSummaryError, Version};
use storage::repository::StorageError;

use crate::sessions::Operation;

/// Errors returned by the remote session service.
///
/// Variants follow the failure taxonomy of the scoring API: transport problems
/// are retriable per operation, conflicts require a re-sync, and exhaustion is
/// a domain signal rather than a failure.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ApiError {
    /// Connection failed, DNS error, timeout.
    #[error("network error: {message}")]
    Network { message: String },

    #[error("authentication failed: {message}")]
    Unauthorized { message: String },

    #[error("access denied: {message}")]
    Forbidden { message: String },

    /// Optimistic-lock mismatch or replayed submission.
    #[error("conflict: {message}")]
    Conflict { message: String },

    /// No further eligible questions exist for the session's scope.
    #[error("no eligible questions remain")]
    NoEligibleQuestions,

    /// Request data rejected (e.g. missing enrollment). Message is user-facing.
    #[error("{message}")]
    Validation { message: String },

    #[error("server error ({status}): {message}")]
    Server { status: u16, message: String },

    #[error("request error ({status}): {message}")]
    Client { status: u16, message: String },

    #[error("failed to parse response: {message}")]
    Parse { message: String },
}

impl ApiError {
    /// Transport-level failures worth retrying in place.
    #[must_use]
    pub fn is_retriable(&self) -> bool {
        matches!(self, ApiError::Network { .. } | ApiError::Server { .. })
    }

    #[must_use]
    pub fn is_auth_error(&self) -> bool {
        matches!(
            self,
            ApiError::Unauthorized { .. } | ApiError::Forbidden { .. }
        )
    }

    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, ApiError::Conflict { .. })
    }

    #[must_use]
    pub fn is_exhaustion(&self) -> bool {
        matches!(self, ApiError::NoEligibleQuestions)
    }
}

/// Errors emitted by the session controller.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SessionError {
    #[error(transparent)]
    Api(#[from] ApiError),

    /// Local version check failed before any request was issued.
    #[error("version conflict: expected {expected}, current {current}")]
    VersionConflict { expected: Version, current: Version },

    #[error("{operation} is not allowed while the session is {status}")]
    InvalidState {
        operation: Operation,
        status: &'static str,
    },

    #[error("no active session")]
    NoSession,

    #[error("no question is loaded")]
    NoQuestion,

    #[error("no answer selected")]
    NoSelection,

    #[error("option {0} is not offered by the current question")]
    InvalidSelection(String),

    #[error("feedback is already shown for this question")]
    FeedbackShown,

    #[error("no feedback to proceed from")]
    NoFeedback,

    #[error("invalid focus: {0}")]
    InvalidFocus(&'static str),

    #[error(transparent)]
    Summary(#[from] SessionSummaryError),
}

impl SessionError {
    /// Conflicts must be resolved by re-fetching the session, never by blind retry.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        match self {
            SessionError::VersionConflict { .. } => true,
            SessionError::Api(err) => err.is_conflict(),
            _ => false,
        }
    }

    #[must_use]
    pub fn is_retriable(&self) -> bool {
        matches!(self, SessionError::Api(err) if err.is_retriable())
    }
}

/// Errors emitted while recording local history.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum HistoryError {
    #[error("history is not configured")]
    Disabled,
    #[error("session has not ended")]
    NotEnded,
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors emitted while reading configuration.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("{0} is not set")]
    Missing(&'static str),
    #[error("invalid value for {name}: {value}")]
    Invalid { name: &'static str, value: String },
}

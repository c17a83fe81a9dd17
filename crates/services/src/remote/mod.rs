//! Contract with the remote scoring service.
//!
//! The adaptive selection algorithm lives behind this boundary; the client
//! only sees descriptors, questions and graded answers.

mod http;
mod in_memory;
mod wire;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use assess_core::model::{
    AnswerResult, AnswerSubmission, ConceptId, CourseId, FocusContext, KnowledgeAreaId, Question,
    RemoteStatus, SessionDescriptor, SessionId, SessionSummary, SessionSummaryError, SessionType,
    TargetProgress, Version,
};

use crate::error::ApiError;

pub use http::HttpSessionService;
pub use in_memory::{BankQuestion, CallCounts, InMemorySessionService};

/// Parameters of the default (non-focused) start path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StartConfig {
    pub session_type: Option<SessionType>,
    pub strategy: Option<String>,
    pub knowledge_area_filter: Option<Vec<KnowledgeAreaId>>,
}

/// Every way a session can be started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartRequest {
    Default(StartConfig),
    Focused(FocusContext),
}

impl StartRequest {
    #[must_use]
    pub fn focused_area(id: KnowledgeAreaId) -> Self {
        Self::Focused(FocusContext::KnowledgeArea(id))
    }

    #[must_use]
    pub fn focused_concepts(ids: Vec<ConceptId>) -> Self {
        Self::Focused(FocusContext::Concepts(ids))
    }

    #[must_use]
    pub fn is_focused(&self) -> bool {
        matches!(self, StartRequest::Focused(_))
    }
}

/// Response to pause and resume calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PauseState {
    pub status: RemoteStatus,
    pub is_paused: bool,
    pub version: Version,
}

/// Response to an end call.
#[derive(Debug, Clone, PartialEq)]
pub struct EndOutcome {
    pub ended_at: DateTime<Utc>,
    pub total_questions: u32,
    pub correct_answers: u32,
    pub accuracy: Option<f64>,
    pub version: Option<Version>,
    pub target_progress: Option<TargetProgress>,
}

impl EndOutcome {
    /// Server-authoritative summary for this outcome.
    ///
    /// # Errors
    ///
    /// Returns `SessionSummaryError` if the reported totals are inconsistent.
    pub fn summary(&self) -> Result<SessionSummary, SessionSummaryError> {
        SessionSummary::from_server(
            self.total_questions,
            self.correct_answers,
            self.accuracy,
            self.ended_at,
        )
    }
}

/// HTTP endpoints for the session lifecycle and question loop.
#[async_trait]
pub trait RemoteSessionService: Send + Sync {
    /// Start a session (default or focused).
    ///
    /// # Errors
    ///
    /// Returns `ApiError` on transport or validation failures.
    async fn start(&self, request: &StartRequest) -> Result<SessionDescriptor, ApiError>;

    /// Fetch the current descriptor, used to refresh the version before a guarded end.
    ///
    /// # Errors
    ///
    /// Returns `ApiError` on transport failures.
    async fn get_session(&self, id: &SessionId) -> Result<SessionDescriptor, ApiError>;

    /// # Errors
    ///
    /// Returns `ApiError::Conflict` on a version mismatch.
    async fn pause(&self, id: &SessionId, expected: Version) -> Result<PauseState, ApiError>;

    /// # Errors
    ///
    /// Returns `ApiError::Conflict` on a version mismatch.
    async fn resume(&self, id: &SessionId, expected: Version) -> Result<PauseState, ApiError>;

    /// # Errors
    ///
    /// Returns `ApiError::Conflict` on a version mismatch.
    async fn end(&self, id: &SessionId, expected: Version) -> Result<EndOutcome, ApiError>;

    /// # Errors
    ///
    /// Returns `ApiError::NoEligibleQuestions` when the scope is exhausted.
    async fn next_question(&self, id: &SessionId) -> Result<Question, ApiError>;

    /// # Errors
    ///
    /// Returns `ApiError::Conflict` when the idempotency token was already used.
    async fn submit_answer(&self, submission: &AnswerSubmission)
    -> Result<AnswerResult, ApiError>;
}

/// Upstream lookup resolving a course into the scope used by `start`.
#[async_trait]
pub trait CourseScopeLookup: Send + Sync {
    /// # Errors
    ///
    /// Returns `ApiError::Validation` when the learner is not enrolled.
    async fn resolve_scope(&self, course: &CourseId) -> Result<StartConfig, ApiError>;
}

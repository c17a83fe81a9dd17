use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::model::ids::{ConceptId, KnowledgeAreaId, SessionId};

//
// ─── ERRORS ───────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum SessionSummaryError {
    #[error("correct answers ({correct}) exceed total questions ({total})")]
    CountMismatch { total: u32, correct: u32 },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unknown session type: {0}")]
pub struct ParseSessionTypeError(String);

//
// ─── VERSION ──────────────────────────────────────────────────────────────────
//

/// Optimistic-lock counter exchanged with the scoring service.
///
/// The client never increments it; every applied response replaces it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Version(u64);

impl Version {
    /// Version assumed when the server omits one.
    pub const INITIAL: Version = Version(1);

    #[must_use]
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    #[must_use]
    pub fn value(self) -> u64 {
        self.0
    }
}

impl Default for Version {
    fn default() -> Self {
        Self::INITIAL
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

//
// ─── SESSION TYPE / REMOTE STATUS ─────────────────────────────────────────────
//

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionType {
    Diagnostic,
    Adaptive,
    FocusedKnowledgeArea,
    FocusedConcept,
    Review,
}

impl SessionType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            SessionType::Diagnostic => "diagnostic",
            SessionType::Adaptive => "adaptive",
            SessionType::FocusedKnowledgeArea => "focused_knowledge_area",
            SessionType::FocusedConcept => "focused_concept",
            SessionType::Review => "review",
        }
    }

    #[must_use]
    pub fn is_focused(self) -> bool {
        matches!(
            self,
            SessionType::FocusedKnowledgeArea | SessionType::FocusedConcept
        )
    }
}

impl fmt::Display for SessionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionType {
    type Err = ParseSessionTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "diagnostic" => Ok(Self::Diagnostic),
            "adaptive" => Ok(Self::Adaptive),
            "focused_knowledge_area" => Ok(Self::FocusedKnowledgeArea),
            "focused_concept" => Ok(Self::FocusedConcept),
            "review" => Ok(Self::Review),
            other => Err(ParseSessionTypeError(other.to_owned())),
        }
    }
}

/// Status as reported by the scoring service, distinct from the client state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteStatus {
    Active,
    Paused,
    Completed,
}

//
// ─── FOCUS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FocusType {
    KnowledgeArea,
    Concept,
}

impl FocusType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            FocusType::KnowledgeArea => "knowledge_area",
            FocusType::Concept => "concept",
        }
    }
}

/// Scope of a focused session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FocusContext {
    KnowledgeArea(KnowledgeAreaId),
    Concepts(Vec<ConceptId>),
}

impl FocusContext {
    #[must_use]
    pub fn focus_type(&self) -> FocusType {
        match self {
            FocusContext::KnowledgeArea(_) => FocusType::KnowledgeArea,
            FocusContext::Concepts(_) => FocusType::Concept,
        }
    }

    /// Target identifier; concept sets are joined with commas.
    #[must_use]
    pub fn focus_target_id(&self) -> String {
        match self {
            FocusContext::KnowledgeArea(id) => id.to_string(),
            FocusContext::Concepts(ids) => ids
                .iter()
                .map(ConceptId::as_str)
                .collect::<Vec<_>>()
                .join(","),
        }
    }

    /// Inverse of `focus_type` + `focus_target_id`, used when rehydrating persisted rows.
    #[must_use]
    pub fn from_parts(focus_type: FocusType, target_id: &str) -> Self {
        match focus_type {
            FocusType::KnowledgeArea => FocusContext::KnowledgeArea(KnowledgeAreaId::new(target_id)),
            FocusType::Concept => FocusContext::Concepts(
                target_id
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(ConceptId::new)
                    .collect(),
            ),
        }
    }
}

//
// ─── SUMMARY ──────────────────────────────────────────────────────────────────
//

/// Where a final summary came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SummarySource {
    /// Reported by the scoring service (end response or auto-completion).
    Server,
    /// Built from locally accumulated counters because the server did not confirm.
    LocalFallback,
}

impl SummarySource {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            SummarySource::Server => "server",
            SummarySource::LocalFallback => "local_fallback",
        }
    }
}

/// Final totals for an ended session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSummary {
    total_questions: u32,
    correct_answers: u32,
    accuracy: f64,
    ended_at: DateTime<Utc>,
    source: SummarySource,
}

impl SessionSummary {
    /// Build a summary reported by the server. `accuracy` is derived when omitted.
    ///
    /// # Errors
    ///
    /// Returns `SessionSummaryError::CountMismatch` if `correct_answers > total_questions`.
    pub fn from_server(
        total_questions: u32,
        correct_answers: u32,
        accuracy: Option<f64>,
        ended_at: DateTime<Utc>,
    ) -> Result<Self, SessionSummaryError> {
        Self::build(
            total_questions,
            correct_answers,
            accuracy,
            ended_at,
            SummarySource::Server,
        )
    }

    /// Build a summary from local counters.
    ///
    /// # Errors
    ///
    /// Returns `SessionSummaryError::CountMismatch` if `correct_answers > total_questions`.
    pub fn from_local(
        total_questions: u32,
        correct_answers: u32,
        ended_at: DateTime<Utc>,
    ) -> Result<Self, SessionSummaryError> {
        Self::build(
            total_questions,
            correct_answers,
            None,
            ended_at,
            SummarySource::LocalFallback,
        )
    }

    /// Rehydrate a summary from persisted storage.
    ///
    /// # Errors
    ///
    /// Returns `SessionSummaryError::CountMismatch` if totals do not align.
    pub fn from_persisted(
        total_questions: u32,
        correct_answers: u32,
        accuracy: f64,
        ended_at: DateTime<Utc>,
        source: SummarySource,
    ) -> Result<Self, SessionSummaryError> {
        Self::build(
            total_questions,
            correct_answers,
            Some(accuracy),
            ended_at,
            source,
        )
    }

    fn build(
        total_questions: u32,
        correct_answers: u32,
        accuracy: Option<f64>,
        ended_at: DateTime<Utc>,
        source: SummarySource,
    ) -> Result<Self, SessionSummaryError> {
        if correct_answers > total_questions {
            return Err(SessionSummaryError::CountMismatch {
                total: total_questions,
                correct: correct_answers,
            });
        }
        let accuracy =
            accuracy.unwrap_or_else(|| derive_accuracy(total_questions, correct_answers));

        Ok(Self {
            total_questions,
            correct_answers,
            accuracy,
            ended_at,
            source,
        })
    }

    #[must_use]
    pub fn total_questions(&self) -> u32 {
        self.total_questions
    }

    #[must_use]
    pub fn correct_answers(&self) -> u32 {
        self.correct_answers
    }

    #[must_use]
    pub fn accuracy(&self) -> f64 {
        self.accuracy
    }

    #[must_use]
    pub fn ended_at(&self) -> DateTime<Utc> {
        self.ended_at
    }

    #[must_use]
    pub fn source(&self) -> SummarySource {
        self.source
    }
}

/// Fraction of correct answers, `0.0` for an empty session.
#[must_use]
pub fn derive_accuracy(total: u32, correct: u32) -> f64 {
    if total == 0 {
        0.0
    } else {
        f64::from(correct) / f64::from(total)
    }
}

/// Progress on the focus target, reported only for focused sessions.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetProgress {
    pub mastery_before: Option<f64>,
    pub mastery_after: Option<f64>,
    pub mastery_delta: f64,
    pub questions_in_focus: u32,
}

//
// ─── SESSION ──────────────────────────────────────────────────────────────────
//

/// Domain form of the descriptor returned by start and get-session calls.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionDescriptor {
    pub id: SessionId,
    pub session_type: SessionType,
    pub status: RemoteStatus,
    pub is_resumed: bool,
    pub total_answered: u32,
    pub correct_count: u32,
    pub version: Option<Version>,
    pub started_at: DateTime<Utc>,
    pub focus: Option<FocusContext>,
    pub question_target: Option<u32>,
}

/// The single authoritative session record held by the client.
///
/// Lifecycle status is owned by the state machine that holds this record;
/// the record itself only carries server-derived data.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    id: SessionId,
    session_type: SessionType,
    is_resumed: bool,
    total_answered: u32,
    correct_count: u32,
    version: Version,
    started_at: DateTime<Utc>,
    ended_at: Option<DateTime<Utc>>,
    focus: Option<FocusContext>,
    question_target: Option<u32>,
    final_summary: Option<SessionSummary>,
    target_progress: Option<TargetProgress>,
}

impl Session {
    /// Create the record from a start descriptor. Missing versions default to `Version::INITIAL`.
    #[must_use]
    pub fn from_descriptor(descriptor: SessionDescriptor) -> Self {
        Self {
            id: descriptor.id,
            session_type: descriptor.session_type,
            is_resumed: descriptor.is_resumed,
            total_answered: descriptor.total_answered,
            correct_count: descriptor.correct_count,
            version: descriptor.version.unwrap_or_default(),
            started_at: descriptor.started_at,
            ended_at: None,
            focus: descriptor.focus,
            question_target: descriptor.question_target,
            final_summary: None,
            target_progress: None,
        }
    }

    #[must_use]
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    #[must_use]
    pub fn session_type(&self) -> SessionType {
        self.session_type
    }

    #[must_use]
    pub fn is_resumed(&self) -> bool {
        self.is_resumed
    }

    #[must_use]
    pub fn total_answered(&self) -> u32 {
        self.total_answered
    }

    #[must_use]
    pub fn correct_count(&self) -> u32 {
        self.correct_count
    }

    #[must_use]
    pub fn version(&self) -> Version {
        self.version
    }

    #[must_use]
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    #[must_use]
    pub fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.ended_at
    }

    #[must_use]
    pub fn focus(&self) -> Option<&FocusContext> {
        self.focus.as_ref()
    }

    #[must_use]
    pub fn question_target(&self) -> Option<u32> {
        self.question_target
    }

    #[must_use]
    pub fn final_summary(&self) -> Option<&SessionSummary> {
        self.final_summary.as_ref()
    }

    #[must_use]
    pub fn target_progress(&self) -> Option<&TargetProgress> {
        self.target_progress.as_ref()
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.final_summary.is_some()
    }

    /// Replace the cached version. Last applied response wins, even if older.
    pub fn set_version(&mut self, version: Version) {
        self.version = version;
    }

    /// Replace aggregate counters with server-authoritative values.
    pub fn apply_counters(&mut self, total_answered: u32, correct_count: u32) {
        self.total_answered = total_answered;
        self.correct_count = correct_count;
    }

    /// Summary built from the locally accumulated counters.
    ///
    /// # Errors
    ///
    /// Returns `SessionSummaryError::CountMismatch` if counters are inconsistent.
    pub fn local_summary(&self, ended_at: DateTime<Utc>) -> Result<SessionSummary, SessionSummaryError> {
        SessionSummary::from_local(self.total_answered, self.correct_count, ended_at)
    }

    /// Record the final summary. The summary's totals become the session's totals.
    pub fn finish(&mut self, summary: SessionSummary, target_progress: Option<TargetProgress>) {
        self.total_answered = summary.total_questions();
        self.correct_count = summary.correct_answers();
        self.ended_at = Some(summary.ended_at());
        self.final_summary = Some(summary);
        if target_progress.is_some() {
            self.target_progress = target_progress;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::fixed_now;

    fn descriptor(version: Option<Version>) -> SessionDescriptor {
        SessionDescriptor {
            id: SessionId::new("s-1"),
            session_type: SessionType::Adaptive,
            status: RemoteStatus::Active,
            is_resumed: false,
            total_answered: 3,
            correct_count: 2,
            version,
            started_at: fixed_now(),
            focus: None,
            question_target: Some(20),
        }
    }

    #[test]
    fn missing_version_defaults_to_one() {
        let session = Session::from_descriptor(descriptor(None));
        assert_eq!(session.version(), Version::new(1));
    }

    #[test]
    fn finish_adopts_summary_totals() {
        let mut session = Session::from_descriptor(descriptor(Some(Version::new(4))));
        let summary = SessionSummary::from_server(10, 9, Some(0.9), fixed_now()).unwrap();
        session.finish(summary, None);
        assert_eq!(session.total_answered(), 10);
        assert_eq!(session.correct_count(), 9);
        assert!(session.is_finished());
        assert_eq!(session.ended_at(), Some(fixed_now()));
    }

    #[test]
    fn summary_derives_accuracy_and_rejects_overcount() {
        let summary = SessionSummary::from_local(8, 6, fixed_now()).unwrap();
        assert!((summary.accuracy() - 0.75).abs() < f64::EPSILON);
        assert_eq!(summary.source(), SummarySource::LocalFallback);

        let empty = SessionSummary::from_local(0, 0, fixed_now()).unwrap();
        assert!(empty.accuracy().abs() < f64::EPSILON);

        let err = SessionSummary::from_server(1, 2, None, fixed_now()).unwrap_err();
        assert_eq!(err, SessionSummaryError::CountMismatch { total: 1, correct: 2 });
    }

    #[test]
    fn focus_context_round_trips_through_parts() {
        let focus = FocusContext::Concepts(vec![ConceptId::new("c1"), ConceptId::new("c2")]);
        assert_eq!(focus.focus_target_id(), "c1,c2");
        let back = FocusContext::from_parts(focus.focus_type(), &focus.focus_target_id());
        assert_eq!(back, focus);
    }

    #[test]
    fn session_type_parses_wire_names() {
        assert_eq!(
            "focused_concept".parse::<SessionType>().unwrap(),
            SessionType::FocusedConcept
        );
        assert!("weekly".parse::<SessionType>().is_err());
    }
}

//! JSON shapes exchanged with the scoring service and their domain conversions.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use assess_core::model::{
    AnswerOption, AnswerResult, AnswerStats, AnswerSubmission, ConceptId, FocusContext, FocusType,
    KnowledgeAreaId, OptionLetter, Question, QuestionId, RemoteStatus, SessionDescriptor,
    SessionId, SessionSummary, SessionType, TargetProgress, Version,
};

use super::{EndOutcome, PauseState, StartConfig};
use crate::error::ApiError;

/// Error code the service uses when no eligible questions remain.
pub(crate) const NO_ELIGIBLE_QUESTIONS: &str = "no_eligible_questions";

fn parse_error(context: &str, err: impl std::fmt::Display) -> ApiError {
    ApiError::Parse {
        message: format!("{context}: {err}"),
    }
}

// =============================================================================
// Request bodies
// =============================================================================

#[derive(Debug, Serialize)]
pub(crate) struct StartBody {
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub session_type: Option<SessionType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strategy: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub knowledge_area_filter: Option<Vec<KnowledgeAreaId>>,
}

impl From<&StartConfig> for StartBody {
    fn from(config: &StartConfig) -> Self {
        Self {
            session_type: config.session_type,
            strategy: config.strategy.clone(),
            knowledge_area_filter: config.knowledge_area_filter.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub(crate) enum FocusedStartBody {
    Area { knowledge_area_id: KnowledgeAreaId },
    Concepts { concept_ids: Vec<ConceptId> },
}

impl From<&FocusContext> for FocusedStartBody {
    fn from(focus: &FocusContext) -> Self {
        match focus {
            FocusContext::KnowledgeArea(id) => Self::Area {
                knowledge_area_id: id.clone(),
            },
            FocusContext::Concepts(ids) => Self::Concepts {
                concept_ids: ids.clone(),
            },
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct VersionBody {
    pub expected_version: Version,
}

#[derive(Debug, Serialize)]
pub(crate) struct NextQuestionBody<'a> {
    pub session_id: &'a SessionId,
}

#[derive(Debug, Serialize)]
pub(crate) struct SubmitBody<'a> {
    pub session_id: &'a SessionId,
    pub question_id: &'a QuestionId,
    pub selected_answer: OptionLetter,
    pub idempotency_token: String,
}

impl<'a> From<&'a AnswerSubmission> for SubmitBody<'a> {
    fn from(submission: &'a AnswerSubmission) -> Self {
        Self {
            session_id: &submission.session_id,
            question_id: &submission.question_id,
            selected_answer: submission.selected,
            idempotency_token: submission.idempotency_token.to_string(),
        }
    }
}

// =============================================================================
// Response bodies
// =============================================================================

#[derive(Debug, Deserialize)]
pub(crate) struct FocusContextWire {
    pub focus_type: FocusType,
    pub focus_target_id: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SessionDescriptorWire {
    #[serde(alias = "session_id")]
    pub id: SessionId,
    #[serde(rename = "type", alias = "session_type")]
    pub session_type: SessionType,
    pub status: RemoteStatus,
    #[serde(default)]
    pub is_resumed: bool,
    #[serde(default, alias = "questions_answered")]
    pub total_answered: u32,
    #[serde(default, alias = "correct_answers")]
    pub correct_count: u32,
    #[serde(default)]
    pub version: Option<Version>,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub focus_context: Option<FocusContextWire>,
    #[serde(default)]
    pub question_target: Option<u32>,
}

impl From<SessionDescriptorWire> for SessionDescriptor {
    fn from(wire: SessionDescriptorWire) -> Self {
        SessionDescriptor {
            id: wire.id,
            session_type: wire.session_type,
            status: wire.status,
            is_resumed: wire.is_resumed,
            total_answered: wire.total_answered,
            correct_count: wire.correct_count,
            version: wire.version,
            started_at: wire.started_at,
            focus: wire
                .focus_context
                .map(|f| FocusContext::from_parts(f.focus_type, &f.focus_target_id)),
            question_target: wire.question_target,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct PauseWire {
    pub status: RemoteStatus,
    pub is_paused: bool,
    pub version: Version,
}

impl From<PauseWire> for PauseState {
    fn from(wire: PauseWire) -> Self {
        PauseState {
            status: wire.status,
            is_paused: wire.is_paused,
            version: wire.version,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct TargetProgressWire {
    #[serde(default)]
    pub mastery_before: Option<f64>,
    #[serde(default)]
    pub mastery_after: Option<f64>,
    #[serde(default)]
    pub mastery_delta: f64,
    #[serde(default, alias = "questions_answered_in_focus")]
    pub questions_in_focus: u32,
}

impl From<TargetProgressWire> for TargetProgress {
    fn from(wire: TargetProgressWire) -> Self {
        TargetProgress {
            mastery_before: wire.mastery_before,
            mastery_after: wire.mastery_after,
            mastery_delta: wire.mastery_delta,
            questions_in_focus: wire.questions_in_focus,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct EndWire {
    pub ended_at: DateTime<Utc>,
    #[serde(alias = "total_answered")]
    pub total_questions: u32,
    #[serde(alias = "correct_count")]
    pub correct_answers: u32,
    #[serde(default)]
    pub accuracy: Option<f64>,
    #[serde(default)]
    pub version: Option<Version>,
    #[serde(default)]
    pub target_progress: Option<TargetProgressWire>,
}

impl From<EndWire> for EndOutcome {
    fn from(wire: EndWire) -> Self {
        EndOutcome {
            ended_at: wire.ended_at,
            total_questions: wire.total_questions,
            correct_answers: wire.correct_answers,
            accuracy: wire.accuracy,
            version: wire.version,
            target_progress: wire.target_progress.map(TargetProgress::from),
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct QuestionWire {
    #[serde(alias = "question_id")]
    pub id: QuestionId,
    #[serde(alias = "prompt")]
    pub question_text: String,
    pub options: BTreeMap<String, String>,
    pub knowledge_area_id: KnowledgeAreaId,
    #[serde(default)]
    pub knowledge_area_name: String,
    #[serde(default)]
    pub difficulty: f64,
    #[serde(default)]
    pub concepts_tested: Vec<ConceptId>,
}

impl QuestionWire {
    pub(crate) fn into_question(self) -> Result<Question, ApiError> {
        let mut options = Vec::with_capacity(self.options.len());
        for (key, text) in self.options {
            let letter: OptionLetter = key.parse().map_err(|e| parse_error("option key", e))?;
            options.push(AnswerOption { letter, text });
        }
        Question::new(
            self.id,
            self.question_text,
            options,
            self.knowledge_area_id,
            self.knowledge_area_name,
            self.difficulty,
            self.concepts_tested,
        )
        .map_err(|e| parse_error("question", e))
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct StatsWire {
    pub total_answered: u32,
    pub correct_count: u32,
    #[serde(default)]
    pub accuracy: Option<f64>,
    pub version: Version,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SummaryWire {
    #[serde(alias = "total_answered")]
    pub total_questions: u32,
    #[serde(alias = "correct_count")]
    pub correct_answers: u32,
    #[serde(default)]
    pub accuracy: Option<f64>,
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct AnswerWire {
    pub is_correct: bool,
    pub correct_answer: OptionLetter,
    #[serde(default)]
    pub explanation: Option<String>,
    pub stats: StatsWire,
    #[serde(default)]
    pub session_completed: bool,
    #[serde(default)]
    pub summary: Option<SummaryWire>,
}

impl AnswerWire {
    /// `received_at` stamps a completion summary that arrives without `ended_at`.
    pub(crate) fn into_result(self, received_at: DateTime<Utc>) -> Result<AnswerResult, ApiError> {
        let accuracy = self.stats.accuracy.unwrap_or_else(|| {
            assess_core::model::derive_accuracy(self.stats.total_answered, self.stats.correct_count)
        });
        let summary = self
            .summary
            .map(|s| {
                SessionSummary::from_server(
                    s.total_questions,
                    s.correct_answers,
                    s.accuracy,
                    s.ended_at.unwrap_or(received_at),
                )
            })
            .transpose()
            .map_err(|e| parse_error("summary", e))?;

        Ok(AnswerResult {
            is_correct: self.is_correct,
            correct_answer: self.correct_answer,
            explanation: self.explanation,
            stats: AnswerStats {
                total_answered: self.stats.total_answered,
                correct_count: self.stats.correct_count,
                accuracy,
                version: self.stats.version,
            },
            session_completed: self.session_completed,
            summary,
        })
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct CourseScopeWire {
    #[serde(default)]
    pub knowledge_area_ids: Vec<KnowledgeAreaId>,
    #[serde(default)]
    pub strategy: Option<String>,
}

impl From<CourseScopeWire> for StartConfig {
    fn from(wire: CourseScopeWire) -> Self {
        StartConfig {
            session_type: None,
            strategy: wire.strategy,
            knowledge_area_filter: if wire.knowledge_area_ids.is_empty() {
                None
            } else {
                Some(wire.knowledge_area_ids)
            },
        }
    }
}

// =============================================================================
// Error bodies
// =============================================================================

/// Extract `(code, message)` from the error body shapes the service emits:
/// `{"code", "message"}`, `{"error_code", ...}` or `{"detail": {...} | "text"}`.
pub(crate) fn parse_error_body(text: &str) -> (Option<String>, Option<String>) {
    let Ok(json) = serde_json::from_str::<serde_json::Value>(text) else {
        return (None, None);
    };

    let pick = |value: &serde_json::Value, keys: &[&str]| {
        keys.iter()
            .find_map(|k| value.get(*k).and_then(|v| v.as_str()).map(str::to_owned))
    };

    let detail = json.get("detail");
    let code = pick(&json, &["code", "error_code"])
        .or_else(|| detail.and_then(|d| pick(d, &["code", "error_code"])));
    let message = pick(&json, &["message"])
        .or_else(|| detail.and_then(|d| d.as_str().map(str::to_owned)))
        .or_else(|| detail.and_then(|d| pick(d, &["message", "msg"])));

    (code, message)
}

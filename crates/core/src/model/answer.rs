use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::model::ids::{QuestionId, SessionId};
use crate::model::question::OptionLetter;
use crate::model::session::{SessionSummary, Version};

/// Token attached to each submission attempt so the server can reject replays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdempotencyToken(Uuid);

impl IdempotencyToken {
    /// A fresh random token. Never reuse one across attempts.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    #[must_use]
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for IdempotencyToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnswerSubmission {
    pub session_id: SessionId,
    pub question_id: QuestionId,
    pub selected: OptionLetter,
    pub idempotency_token: IdempotencyToken,
}

impl AnswerSubmission {
    #[must_use]
    pub fn new(session_id: SessionId, question_id: QuestionId, selected: OptionLetter) -> Self {
        Self {
            session_id,
            question_id,
            selected,
            idempotency_token: IdempotencyToken::generate(),
        }
    }
}

/// Aggregate counters returned with every graded answer.
#[derive(Debug, Clone, PartialEq)]
pub struct AnswerStats {
    pub total_answered: u32,
    pub correct_count: u32,
    pub accuracy: f64,
    pub version: Version,
}

/// Outcome of grading one submission.
///
/// `summary` is only meaningful when `session_completed` is set; it is then
/// authoritative and replaces any locally accumulated totals.
#[derive(Debug, Clone, PartialEq)]
pub struct AnswerResult {
    pub is_correct: bool,
    pub correct_answer: OptionLetter,
    pub explanation: Option<String>,
    pub stats: AnswerStats,
    pub session_completed: bool,
    pub summary: Option<SessionSummary>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn each_submission_gets_a_fresh_token() {
        let letter = OptionLetter::new('A').unwrap();
        let first = AnswerSubmission::new(SessionId::new("s"), QuestionId::new("q"), letter);
        let second = AnswerSubmission::new(SessionId::new("s"), QuestionId::new("q"), letter);
        assert_ne!(first.idempotency_token, second.idempotency_token);
    }
}

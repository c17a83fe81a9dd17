use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use assess_core::Clock;
use assess_core::model::{
    AnswerResult, AnswerStats, AnswerSubmission, CourseId, FocusContext, IdempotencyToken,
    OptionLetter, Question, QuestionId, RemoteStatus, SessionDescriptor, SessionId,
    SessionSummary, SessionType, TargetProgress, Version, derive_accuracy,
};

use super::{
    CourseScopeLookup, EndOutcome, PauseState, RemoteSessionService, StartConfig, StartRequest,
};
use crate::error::ApiError;

/// A question plus the grading data the server keeps to itself.
#[derive(Debug, Clone)]
pub struct BankQuestion {
    pub question: Question,
    pub correct: OptionLetter,
    pub explanation: Option<String>,
}

/// Number of calls received per endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub start: usize,
    pub get_session: usize,
    pub pause: usize,
    pub resume: usize,
    pub end: usize,
    pub next_question: usize,
    pub submit_answer: usize,
    pub resolve_scope: usize,
}

struct HostedSession {
    descriptor: SessionDescriptor,
    version: Version,
    scope: StartRequest,
    served: Option<QuestionId>,
    answered: HashSet<QuestionId>,
    ended: Option<EndOutcome>,
}

impl HostedSession {
    fn snapshot(&self) -> SessionDescriptor {
        SessionDescriptor {
            version: Some(self.version),
            ..self.descriptor.clone()
        }
    }

    fn bump(&mut self) -> Version {
        self.version = Version::new(self.version.value() + 1);
        self.version
    }

    fn check_version(&self, expected: Version) -> Result<(), ApiError> {
        if expected == self.version {
            Ok(())
        } else {
            Err(ApiError::Conflict {
                message: format!("expected version {expected}, current {}", self.version),
            })
        }
    }

    fn ensure_open(&self) -> Result<(), ApiError> {
        if self.descriptor.status == RemoteStatus::Completed {
            return Err(ApiError::Client {
                status: 410,
                message: "session has ended".into(),
            });
        }
        Ok(())
    }

    fn is_eligible(&self, bank: &BankQuestion) -> bool {
        let question = &bank.question;
        if self.answered.contains(question.id()) {
            return false;
        }
        match &self.scope {
            StartRequest::Default(config) => config
                .knowledge_area_filter
                .as_ref()
                .is_none_or(|areas| areas.contains(question.knowledge_area_id())),
            StartRequest::Focused(FocusContext::KnowledgeArea(area)) => {
                question.knowledge_area_id() == area
            }
            StartRequest::Focused(FocusContext::Concepts(concepts)) => question
                .concepts_tested()
                .iter()
                .any(|c| concepts.contains(c)),
        }
    }

    fn finish(&mut self, clock: &Clock) -> EndOutcome {
        self.descriptor.status = RemoteStatus::Completed;
        let total = self.descriptor.total_answered;
        let correct = self.descriptor.correct_count;
        let accuracy = derive_accuracy(total, correct);
        let target_progress = self.descriptor.focus.as_ref().map(|_| TargetProgress {
            mastery_before: None,
            mastery_after: Some(accuracy),
            mastery_delta: accuracy,
            questions_in_focus: total,
        });
        let outcome = EndOutcome {
            ended_at: clock.now(),
            total_questions: total,
            correct_answers: correct,
            accuracy: Some(accuracy),
            version: Some(self.version),
            target_progress,
        };
        self.ended = Some(outcome.clone());
        outcome
    }
}

#[derive(Default)]
struct State {
    next_id: u64,
    sessions: HashMap<SessionId, HostedSession>,
    tokens: HashSet<IdempotencyToken>,
    calls: CallCounts,
}

/// In-process scoring service for offline runs and tests.
///
/// Serves questions from a fixed bank in order, enforces the optimistic-lock
/// version on pause/resume/end, rejects replayed idempotency tokens, and
/// reports exhaustion once the scope has no unanswered questions left.
#[derive(Clone)]
pub struct InMemorySessionService {
    clock: Clock,
    bank: Arc<Vec<BankQuestion>>,
    question_target: Option<u32>,
    courses: Arc<HashMap<CourseId, StartConfig>>,
    state: Arc<Mutex<State>>,
}

impl InMemorySessionService {
    #[must_use]
    pub fn new(clock: Clock, bank: Vec<BankQuestion>) -> Self {
        Self {
            clock,
            bank: Arc::new(bank),
            question_target: None,
            courses: Arc::new(HashMap::new()),
            state: Arc::new(Mutex::new(State::default())),
        }
    }

    /// Auto-complete sessions once this many answers have been graded.
    #[must_use]
    pub fn with_question_target(mut self, target: u32) -> Self {
        self.question_target = Some(target);
        self
    }

    /// Register a course the learner is enrolled in.
    #[must_use]
    pub fn with_course(mut self, course: CourseId, scope: StartConfig) -> Self {
        Arc::make_mut(&mut self.courses).insert(course, scope);
        self
    }

    #[must_use]
    pub fn calls(&self) -> CallCounts {
        self.lock().map(|s| s.calls).unwrap_or_default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>, ApiError> {
        self.state.lock().map_err(|e| ApiError::Server {
            status: 500,
            message: e.to_string(),
        })
    }

    fn not_found(id: &SessionId) -> ApiError {
        ApiError::Client {
            status: 404,
            message: format!("session {id} not found"),
        }
    }

    fn pause_state(session: &HostedSession) -> PauseState {
        PauseState {
            status: session.descriptor.status,
            is_paused: session.descriptor.status == RemoteStatus::Paused,
            version: session.version,
        }
    }
}

#[async_trait]
impl RemoteSessionService for InMemorySessionService {
    async fn start(&self, request: &StartRequest) -> Result<SessionDescriptor, ApiError> {
        let mut state = self.lock()?;
        state.calls.start += 1;

        let (session_type, focus) = match request {
            StartRequest::Default(config) => {
                (config.session_type.unwrap_or(SessionType::Adaptive), None)
            }
            StartRequest::Focused(focus @ FocusContext::KnowledgeArea(_)) => {
                (SessionType::FocusedKnowledgeArea, Some(focus.clone()))
            }
            StartRequest::Focused(FocusContext::Concepts(ids)) if ids.is_empty() => {
                return Err(ApiError::Validation {
                    message: "at least one concept is required".into(),
                });
            }
            StartRequest::Focused(focus @ FocusContext::Concepts(_)) => {
                (SessionType::FocusedConcept, Some(focus.clone()))
            }
        };

        state.next_id += 1;
        let id = SessionId::new(format!("mem-{}", state.next_id));
        let descriptor = SessionDescriptor {
            id: id.clone(),
            session_type,
            status: RemoteStatus::Active,
            is_resumed: false,
            total_answered: 0,
            correct_count: 0,
            version: Some(Version::INITIAL),
            started_at: self.clock.now(),
            focus,
            question_target: self.question_target,
        };
        state.sessions.insert(
            id,
            HostedSession {
                descriptor: descriptor.clone(),
                version: Version::INITIAL,
                scope: request.clone(),
                served: None,
                answered: HashSet::new(),
                ended: None,
            },
        );
        Ok(descriptor)
    }

    async fn get_session(&self, id: &SessionId) -> Result<SessionDescriptor, ApiError> {
        let mut state = self.lock()?;
        state.calls.get_session += 1;
        state
            .sessions
            .get(id)
            .map(HostedSession::snapshot)
            .ok_or_else(|| Self::not_found(id))
    }

    async fn pause(&self, id: &SessionId, expected: Version) -> Result<PauseState, ApiError> {
        let mut state = self.lock()?;
        state.calls.pause += 1;
        let session = state.sessions.get_mut(id).ok_or_else(|| Self::not_found(id))?;
        session.ensure_open()?;
        session.check_version(expected)?;
        session.descriptor.status = RemoteStatus::Paused;
        session.bump();
        Ok(Self::pause_state(session))
    }

    async fn resume(&self, id: &SessionId, expected: Version) -> Result<PauseState, ApiError> {
        let mut state = self.lock()?;
        state.calls.resume += 1;
        let session = state.sessions.get_mut(id).ok_or_else(|| Self::not_found(id))?;
        session.ensure_open()?;
        session.check_version(expected)?;
        session.descriptor.status = RemoteStatus::Active;
        session.descriptor.is_resumed = true;
        session.bump();
        Ok(Self::pause_state(session))
    }

    async fn end(&self, id: &SessionId, expected: Version) -> Result<EndOutcome, ApiError> {
        let mut state = self.lock()?;
        state.calls.end += 1;
        let session = state.sessions.get_mut(id).ok_or_else(|| Self::not_found(id))?;
        if let Some(outcome) = &session.ended {
            return Ok(outcome.clone());
        }
        session.check_version(expected)?;
        session.bump();
        Ok(session.finish(&self.clock))
    }

    async fn next_question(&self, id: &SessionId) -> Result<Question, ApiError> {
        let mut state = self.lock()?;
        state.calls.next_question += 1;
        let session = state.sessions.get_mut(id).ok_or_else(|| Self::not_found(id))?;
        session.ensure_open()?;
        if session.descriptor.status == RemoteStatus::Paused {
            return Err(ApiError::Validation {
                message: "session is paused".into(),
            });
        }

        let pending = session
            .served
            .as_ref()
            .and_then(|served| self.bank.iter().find(|b| b.question.id() == served));
        if let Some(bank) = pending {
            return Ok(bank.question.clone());
        }

        let next = self
            .bank
            .iter()
            .find(|b| session.is_eligible(b))
            .ok_or(ApiError::NoEligibleQuestions)?;
        session.served = Some(next.question.id().clone());
        Ok(next.question.clone())
    }

    async fn submit_answer(
        &self,
        submission: &AnswerSubmission,
    ) -> Result<AnswerResult, ApiError> {
        let mut state = self.lock()?;
        state.calls.submit_answer += 1;
        if !state.tokens.insert(submission.idempotency_token) {
            return Err(ApiError::Conflict {
                message: "duplicate submission".into(),
            });
        }

        let session = state
            .sessions
            .get_mut(&submission.session_id)
            .ok_or_else(|| Self::not_found(&submission.session_id))?;
        session.ensure_open()?;
        if session.served.as_ref() != Some(&submission.question_id) {
            return Err(ApiError::Validation {
                message: format!("question {} was not served", submission.question_id),
            });
        }
        let bank = self
            .bank
            .iter()
            .find(|b| b.question.id() == &submission.question_id)
            .ok_or_else(|| ApiError::Validation {
                message: format!("unknown question {}", submission.question_id),
            })?;

        let is_correct = submission.selected == bank.correct;
        session.served = None;
        session.answered.insert(submission.question_id.clone());
        session.descriptor.total_answered += 1;
        if is_correct {
            session.descriptor.correct_count += 1;
        }
        let version = session.bump();

        let total = session.descriptor.total_answered;
        let correct = session.descriptor.correct_count;
        let completed = self.question_target.is_some_and(|target| total >= target);
        let summary = if completed {
            let outcome = session.finish(&self.clock);
            Some(
                SessionSummary::from_server(total, correct, outcome.accuracy, outcome.ended_at)
                    .map_err(|e| ApiError::Server {
                        status: 500,
                        message: e.to_string(),
                    })?,
            )
        } else {
            None
        };

        Ok(AnswerResult {
            is_correct,
            correct_answer: bank.correct,
            explanation: bank.explanation.clone(),
            stats: AnswerStats {
                total_answered: total,
                correct_count: correct,
                accuracy: derive_accuracy(total, correct),
                version,
            },
            session_completed: completed,
            summary,
        })
    }
}

#[async_trait]
impl CourseScopeLookup for InMemorySessionService {
    async fn resolve_scope(&self, course: &CourseId) -> Result<StartConfig, ApiError> {
        self.lock()?.calls.resolve_scope += 1;
        self.courses
            .get(course)
            .cloned()
            .ok_or_else(|| ApiError::Validation {
                message: format!("You are not enrolled in course {course}"),
            })
    }
}

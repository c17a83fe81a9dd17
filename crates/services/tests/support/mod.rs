#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::oneshot;

use assess_core::model::{
    AnswerOption, AnswerResult, AnswerStats, AnswerSubmission, KnowledgeAreaId, OptionLetter,
    Question, QuestionId, RemoteStatus, SessionDescriptor, SessionId, SessionSummary, SessionType,
    Version,
};
use assess_core::time::fixed_now;
use services::remote::CallCounts;
use services::{
    ApiError, Clock, EndOutcome, PauseState, RemoteSessionService, SessionController, StartRequest,
};

pub type Gate<T> = oneshot::Sender<Result<T, ApiError>>;

enum Step<T> {
    Ready(Result<T, ApiError>),
    Gated(oneshot::Receiver<Result<T, ApiError>>),
}

#[derive(Default)]
struct Script {
    start: VecDeque<Step<SessionDescriptor>>,
    get_session: VecDeque<Step<SessionDescriptor>>,
    pause: VecDeque<Step<PauseState>>,
    resume: VecDeque<Step<PauseState>>,
    end: VecDeque<Step<EndOutcome>>,
    next_question: VecDeque<Step<Question>>,
    submit: VecDeque<Step<AnswerResult>>,
    calls: CallCounts,
    end_versions: Vec<Version>,
    start_requests: Vec<StartRequest>,
}

/// Remote double answering from per-endpoint queues.
///
/// Gated steps park the call until the test releases the paired sender, which
/// lets tests resolve concurrent requests in any order.
#[derive(Default)]
pub struct ScriptedRemote {
    script: Mutex<Script>,
}

macro_rules! scripted {
    ($push:ident, $gate:ident, $field:ident, $ty:ty) => {
        pub fn $push(&self, result: Result<$ty, ApiError>) -> &Self {
            self.script.lock().unwrap().$field.push_back(Step::Ready(result));
            self
        }

        pub fn $gate(&self) -> Gate<$ty> {
            let (tx, rx) = oneshot::channel();
            self.script.lock().unwrap().$field.push_back(Step::Gated(rx));
            tx
        }
    };
}

impl ScriptedRemote {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    scripted!(push_start, gate_start, start, SessionDescriptor);
    scripted!(push_get_session, gate_get_session, get_session, SessionDescriptor);
    scripted!(push_pause, gate_pause, pause, PauseState);
    scripted!(push_resume, gate_resume, resume, PauseState);
    scripted!(push_end, gate_end, end, EndOutcome);
    scripted!(push_next_question, gate_next_question, next_question, Question);
    scripted!(push_submit, gate_submit, submit, AnswerResult);

    pub fn calls(&self) -> CallCounts {
        self.script.lock().unwrap().calls
    }

    pub fn end_versions(&self) -> Vec<Version> {
        self.script.lock().unwrap().end_versions.clone()
    }

    pub fn start_requests(&self) -> Vec<StartRequest> {
        self.script.lock().unwrap().start_requests.clone()
    }

    async fn take<T>(
        &self,
        pick: impl FnOnce(&mut Script) -> Option<Step<T>>,
    ) -> Result<T, ApiError> {
        let step = pick(&mut self.script.lock().unwrap());
        match step {
            Some(Step::Ready(result)) => result,
            Some(Step::Gated(rx)) => rx.await.unwrap_or_else(|_| {
                Err(ApiError::Network {
                    message: "gate dropped".into(),
                })
            }),
            None => Err(ApiError::Server {
                status: 500,
                message: "unscripted call".into(),
            }),
        }
    }
}

#[async_trait]
impl RemoteSessionService for ScriptedRemote {
    async fn start(&self, request: &StartRequest) -> Result<SessionDescriptor, ApiError> {
        self.take(|s| {
            s.calls.start += 1;
            s.start_requests.push(request.clone());
            s.start.pop_front()
        })
        .await
    }

    async fn get_session(&self, _id: &SessionId) -> Result<SessionDescriptor, ApiError> {
        self.take(|s| {
            s.calls.get_session += 1;
            s.get_session.pop_front()
        })
        .await
    }

    async fn pause(&self, _id: &SessionId, _expected: Version) -> Result<PauseState, ApiError> {
        self.take(|s| {
            s.calls.pause += 1;
            s.pause.pop_front()
        })
        .await
    }

    async fn resume(&self, _id: &SessionId, _expected: Version) -> Result<PauseState, ApiError> {
        self.take(|s| {
            s.calls.resume += 1;
            s.resume.pop_front()
        })
        .await
    }

    async fn end(&self, _id: &SessionId, expected: Version) -> Result<EndOutcome, ApiError> {
        self.take(|s| {
            s.calls.end += 1;
            s.end_versions.push(expected);
            s.end.pop_front()
        })
        .await
    }

    async fn next_question(&self, _id: &SessionId) -> Result<Question, ApiError> {
        self.take(|s| {
            s.calls.next_question += 1;
            s.next_question.pop_front()
        })
        .await
    }

    async fn submit_answer(
        &self,
        _submission: &AnswerSubmission,
    ) -> Result<AnswerResult, ApiError> {
        self.take(|s| {
            s.calls.submit_answer += 1;
            s.submit.pop_front()
        })
        .await
    }
}

// ─── fixtures ───

pub fn controller(remote: &Arc<ScriptedRemote>) -> Arc<SessionController> {
    let remote: Arc<dyn RemoteSessionService> = remote.clone();
    Arc::new(SessionController::new(remote, Clock::fixed(fixed_now())))
}

pub fn letter(c: char) -> OptionLetter {
    OptionLetter::new(c).unwrap()
}

pub fn descriptor(status: RemoteStatus, version: u64, total: u32, correct: u32) -> SessionDescriptor {
    SessionDescriptor {
        id: SessionId::new("s-1"),
        session_type: SessionType::Adaptive,
        status,
        is_resumed: total > 0,
        total_answered: total,
        correct_count: correct,
        version: Some(Version::new(version)),
        started_at: fixed_now(),
        focus: None,
        question_target: None,
    }
}

pub fn active(version: u64) -> SessionDescriptor {
    descriptor(RemoteStatus::Active, version, 0, 0)
}

pub fn question(id: &str) -> Question {
    Question::new(
        QuestionId::new(id),
        format!("Prompt {id}"),
        vec![
            AnswerOption {
                letter: letter('A'),
                text: "first".into(),
            },
            AnswerOption {
                letter: letter('B'),
                text: "second".into(),
            },
            AnswerOption {
                letter: letter('C'),
                text: "third".into(),
            },
        ],
        KnowledgeAreaId::new("ka-1"),
        "Algebra",
        0.5,
        Vec::new(),
    )
    .unwrap()
}

pub fn answer(total: u32, correct: u32, version: u64) -> AnswerResult {
    AnswerResult {
        is_correct: true,
        correct_answer: letter('A'),
        explanation: Some("because".into()),
        stats: AnswerStats {
            total_answered: total,
            correct_count: correct,
            accuracy: f64::from(correct) / f64::from(total.max(1)),
            version: Version::new(version),
        },
        session_completed: false,
        summary: None,
    }
}

pub fn completed(total: u32, correct: u32, version: u64) -> AnswerResult {
    AnswerResult {
        session_completed: true,
        summary: Some(SessionSummary::from_server(total, correct, None, fixed_now()).unwrap()),
        ..answer(total, correct, version)
    }
}

pub fn paused(is_paused: bool, version: u64) -> PauseState {
    PauseState {
        status: if is_paused {
            RemoteStatus::Paused
        } else {
            RemoteStatus::Active
        },
        is_paused,
        version: Version::new(version),
    }
}

pub fn end_outcome(total: u32, correct: u32, version: u64) -> EndOutcome {
    EndOutcome {
        ended_at: fixed_now(),
        total_questions: total,
        correct_answers: correct,
        accuracy: None,
        version: Some(Version::new(version)),
        target_progress: None,
    }
}

/// Start the controller against a queued active descriptor and load one question.
pub async fn start_with_question(remote: &Arc<ScriptedRemote>, controller: &SessionController) {
    remote.push_start(Ok(active(1)));
    remote.push_next_question(Ok(question("q-1")));
    controller
        .start(StartRequest::Default(Default::default()))
        .await
        .unwrap();
    controller.fetch_next().await.unwrap();
}

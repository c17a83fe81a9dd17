//! Owned session state with controlled mutation.
//!
//! Every method here is synchronous and runs under the controller's lock.
//! Async work is split into a `begin_*` half that checks guards and marks the
//! request in flight, and a `finish_*` half that re-checks the epoch and
//! status before applying the response.

use std::fmt;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use assess_core::model::{
    AnswerResult, AnswerSubmission, OptionLetter, Question, RemoteStatus, Session,
    SessionDescriptor, SessionId, SessionSummary, TargetProgress, Version,
};
use storage::repository::HistoryEntry;

use crate::error::{ApiError, SessionError};
use crate::remote::{EndOutcome, PauseState, StartRequest};

//
// ─── STATUS ───────────────────────────────────────────────────────────────────
//

/// Live states an end can start from and revert to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiveStatus {
    Active,
    Paused,
}

impl From<LiveStatus> for SessionStatus {
    fn from(value: LiveStatus) -> Self {
        match value {
            LiveStatus::Active => SessionStatus::Active,
            LiveStatus::Paused => SessionStatus::Paused,
        }
    }
}

/// Why a session is ending.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    /// The learner asked to end.
    Explicit,
    /// The server declared completion in a submit response.
    AutoCompleted,
    /// No eligible questions remain for the scope.
    Exhausted,
    /// The wall-clock ceiling elapsed.
    TimeLimit,
}

impl EndReason {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            EndReason::Explicit => "explicit",
            EndReason::AutoCompleted => "auto_completed",
            EndReason::Exhausted => "exhausted",
            EndReason::TimeLimit => "time_limit",
        }
    }

    /// Forced ends always reach `ended`, even when the remote end fails.
    #[must_use]
    pub fn is_forced(self) -> bool {
        !matches!(self, EndReason::Explicit)
    }
}

/// Client lifecycle state. Exactly one value at any time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionStatus {
    #[default]
    Idle,
    Loading,
    Active,
    Paused,
    /// An end is underway; further end requests collapse into this one.
    Ending { reason: EndReason, from: LiveStatus },
    Ended,
    Error,
}

impl SessionStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::Idle => "idle",
            SessionStatus::Loading => "loading",
            SessionStatus::Active => "active",
            SessionStatus::Paused => "paused",
            SessionStatus::Ending { .. } => "ending",
            SessionStatus::Ended => "ended",
            SessionStatus::Error => "error",
        }
    }

    fn live(self) -> Option<LiveStatus> {
        match self {
            SessionStatus::Active => Some(LiveStatus::Active),
            SessionStatus::Paused => Some(LiveStatus::Paused),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_live(self) -> bool {
        self.live().is_some()
    }

    #[must_use]
    pub fn is_ending(self) -> bool {
        matches!(self, SessionStatus::Ending { .. })
    }

    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionStatus::Ended)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

//
// ─── REQUEST STATE ────────────────────────────────────────────────────────────
//

/// Remote operations the controller tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Start,
    Pause,
    Resume,
    End,
    Refresh,
    Fetch,
    Submit,
}

impl Operation {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Operation::Start => "start",
            Operation::Pause => "pause",
            Operation::Resume => "resume",
            Operation::End => "end",
            Operation::Refresh => "refresh",
            Operation::Fetch => "fetch",
            Operation::Submit => "submit",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum RequestState {
    #[default]
    Idle,
    InFlight,
    Succeeded,
    Failed(String),
}

impl RequestState {
    #[must_use]
    pub fn is_in_flight(&self) -> bool {
        matches!(self, RequestState::InFlight)
    }
}

/// One `RequestState` per tracked operation.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RequestStates {
    start: RequestState,
    pause: RequestState,
    resume: RequestState,
    end: RequestState,
    refresh: RequestState,
    fetch: RequestState,
    submit: RequestState,
}

impl RequestStates {
    #[must_use]
    pub fn get(&self, operation: Operation) -> &RequestState {
        match operation {
            Operation::Start => &self.start,
            Operation::Pause => &self.pause,
            Operation::Resume => &self.resume,
            Operation::End => &self.end,
            Operation::Refresh => &self.refresh,
            Operation::Fetch => &self.fetch,
            Operation::Submit => &self.submit,
        }
    }

    fn set(&mut self, operation: Operation, state: RequestState) {
        let slot = match operation {
            Operation::Start => &mut self.start,
            Operation::Pause => &mut self.pause,
            Operation::Resume => &mut self.resume,
            Operation::End => &mut self.end,
            Operation::Refresh => &mut self.refresh,
            Operation::Fetch => &mut self.fetch,
            Operation::Submit => &mut self.submit,
        };
        *slot = state;
    }

    fn pause_or_resume_in_flight(&self) -> bool {
        self.pause.is_in_flight() || self.resume.is_in_flight()
    }
}

//
// ─── QUESTION FLOW ────────────────────────────────────────────────────────────
//

/// Current question, selection and feedback.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct QuestionFlow {
    question: Option<Question>,
    selected: Option<OptionLetter>,
    feedback: Option<AnswerResult>,
}

impl QuestionFlow {
    #[must_use]
    pub fn question(&self) -> Option<&Question> {
        self.question.as_ref()
    }

    #[must_use]
    pub fn selected(&self) -> Option<OptionLetter> {
        self.selected
    }

    #[must_use]
    pub fn feedback(&self) -> Option<&AnswerResult> {
        self.feedback.as_ref()
    }

    fn load(&mut self, question: Question) {
        *self = QuestionFlow {
            question: Some(question),
            ..QuestionFlow::default()
        };
    }

    fn clear(&mut self) {
        *self = QuestionFlow::default();
    }
}

//
// ─── OUTCOMES ─────────────────────────────────────────────────────────────────
//

/// Result of start, pause, resume and refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlOutcome {
    Applied,
    /// Guard not met; no request was issued.
    Skipped,
    /// The response arrived after a reset or restart and was discarded.
    Stale,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    Loaded(Question),
    /// Scope exhausted; the session ended with this summary.
    Completed(SessionSummary),
    Skipped,
    Stale,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    Feedback(AnswerResult),
    /// The server declared the session complete.
    Completed(SessionSummary),
    Skipped,
    Stale,
}

/// Identifies the session generation a request was issued under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ticket {
    epoch: u64,
}

/// Which path claimed the one-shot initialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartPath {
    Default,
    Focused,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Initialization {
    #[default]
    Pending,
    Claimed(StartPath),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum HistoryState {
    #[default]
    NotDue,
    Pending,
    InFlight,
    Failed,
    Recorded,
}

/// What a forced end should do next after its version refresh.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ForcedEndStep {
    End(SessionId, Version),
    Done(SessionSummary),
    Stale,
}

/// Read-only view published to subscribers after every mutation.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SessionSnapshot {
    pub revision: u64,
    pub status: SessionStatus,
    pub session: Option<Session>,
    pub flow: QuestionFlow,
    pub requests: RequestStates,
    pub end_reason: Option<EndReason>,
    pub last_error: Option<String>,
}

//
// ─── STORE ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Default)]
pub struct SessionStore {
    status: SessionStatus,
    session: Option<Session>,
    flow: QuestionFlow,
    requests: RequestStates,
    epoch: u64,
    revision: u64,
    initialization: Initialization,
    last_start: Option<StartRequest>,
    end_reason: Option<EndReason>,
    last_error: Option<String>,
    history: HistoryState,
    /// Forced end that arrived while an explicit end was in flight.
    deferred_force: Option<EndReason>,
}

impl SessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn status(&self) -> SessionStatus {
        self.status
    }

    #[must_use]
    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    #[must_use]
    pub fn flow(&self) -> &QuestionFlow {
        &self.flow
    }

    #[must_use]
    pub fn requests(&self) -> &RequestStates {
        &self.requests
    }

    #[must_use]
    pub fn revision(&self) -> u64 {
        self.revision
    }

    #[must_use]
    pub fn initialization(&self) -> Initialization {
        self.initialization
    }

    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            revision: self.revision,
            status: self.status,
            session: self.session.clone(),
            flow: self.flow.clone(),
            requests: self.requests.clone(),
            end_reason: self.end_reason,
            last_error: self.last_error.clone(),
        }
    }

    fn touch(&mut self) {
        self.revision += 1;
    }

    fn ticket(&self) -> Ticket {
        Ticket { epoch: self.epoch }
    }

    fn is_current(&self, ticket: Ticket, operation: Operation) -> bool {
        if ticket.epoch == self.epoch {
            return true;
        }
        debug!(%operation, ticket = ticket.epoch, epoch = self.epoch, "discarding stale response");
        false
    }

    fn transition(&mut self, next: SessionStatus) {
        if self.status != next {
            info!(from = %self.status, to = %next, "session status changed");
            self.status = next;
        }
    }

    fn set_request(&mut self, operation: Operation, state: RequestState) {
        self.requests.set(operation, state);
    }

    fn fail(&mut self, operation: Operation, err: &ApiError) {
        warn!(%operation, error = %err, "remote call failed");
        self.set_request(operation, RequestState::Failed(err.to_string()));
        self.last_error = Some(err.to_string());
    }

    /// Version and counters from a server response; ignored once ended.
    fn apply_version(&mut self, version: Version) {
        if self.status.is_terminal() {
            return;
        }
        if let Some(session) = self.session.as_mut() {
            if session.version() != version {
                debug!(from = %session.version(), to = %version, "version updated");
            }
            session.set_version(version);
        }
    }

    fn enter_ended(&mut self, summary: SessionSummary, progress: Option<TargetProgress>) {
        if let Some(session) = self.session.as_mut() {
            session.finish(summary, progress);
        }
        self.flow.clear();
        self.transition(SessionStatus::Ended);
        self.history = HistoryState::Pending;
    }

    fn final_summary(&self) -> Option<SessionSummary> {
        self.session.as_ref().and_then(|s| s.final_summary().cloned())
    }

    fn local_summary(&self, now: DateTime<Utc>) -> Result<SessionSummary, SessionError> {
        let session = self.session.as_ref().ok_or(SessionError::NoSession)?;
        Ok(session.local_summary(now)?)
    }

    // ─── initialization ───

    /// Claim the one-shot mount initialization. Returns `false` if another path won.
    pub fn claim_initialization(&mut self, path: StartPath) -> bool {
        match self.initialization {
            Initialization::Pending => {
                debug!(?path, "initialization claimed");
                self.initialization = Initialization::Claimed(path);
                self.touch();
                true
            }
            Initialization::Claimed(_) => false,
        }
    }

    // ─── start ───

    /// # Errors
    ///
    /// Returns `SessionError::InvalidState` unless the store is idle or errored.
    pub fn begin_start(&mut self, request: StartRequest) -> Result<Ticket, SessionError> {
        if !matches!(self.status, SessionStatus::Idle | SessionStatus::Error) {
            return Err(SessionError::InvalidState {
                operation: Operation::Start,
                status: self.status.as_str(),
            });
        }
        self.epoch += 1;
        self.session = None;
        self.flow.clear();
        self.requests = RequestStates::default();
        self.set_request(Operation::Start, RequestState::InFlight);
        self.last_start = Some(request);
        self.end_reason = None;
        self.last_error = None;
        self.deferred_force = None;
        self.history = HistoryState::NotDue;
        self.transition(SessionStatus::Loading);
        self.touch();
        Ok(self.ticket())
    }

    /// Last start request, used by `retry_start`.
    #[must_use]
    pub fn last_start(&self) -> Option<&StartRequest> {
        self.last_start.as_ref()
    }

    /// # Errors
    ///
    /// Returns the remote failure after moving to `error`.
    pub fn finish_start(
        &mut self,
        ticket: Ticket,
        result: Result<SessionDescriptor, ApiError>,
        now: DateTime<Utc>,
    ) -> Result<ControlOutcome, SessionError> {
        if !self.is_current(ticket, Operation::Start) || self.status != SessionStatus::Loading {
            return Ok(ControlOutcome::Stale);
        }
        self.touch();
        match result {
            Ok(descriptor) => {
                let remote_status = descriptor.status;
                info!(
                    session = %descriptor.id,
                    kind = %descriptor.session_type,
                    resumed = descriptor.is_resumed,
                    "session started"
                );
                self.session = Some(Session::from_descriptor(descriptor));
                self.set_request(Operation::Start, RequestState::Succeeded);
                match remote_status {
                    RemoteStatus::Active => self.transition(SessionStatus::Active),
                    RemoteStatus::Paused => self.transition(SessionStatus::Paused),
                    RemoteStatus::Completed => match self.local_summary(now) {
                        Ok(summary) => {
                            self.end_reason = Some(EndReason::AutoCompleted);
                            self.enter_ended(summary, None);
                        }
                        Err(err) => {
                            warn!(error = %err, "completed session reported inconsistent totals");
                            self.last_error = Some(err.to_string());
                            self.transition(SessionStatus::Error);
                            return Err(err);
                        }
                    },
                }
                Ok(ControlOutcome::Applied)
            }
            Err(err) => {
                self.fail(Operation::Start, &err);
                self.transition(SessionStatus::Error);
                Err(err.into())
            }
        }
    }

    // ─── pause / resume ───

    /// Guard for pause and resume. `None` means no request should be issued.
    pub fn begin_control(&mut self, operation: Operation) -> Option<(Ticket, SessionId, Version)> {
        let required = match operation {
            Operation::Pause => SessionStatus::Active,
            Operation::Resume => SessionStatus::Paused,
            _ => return None,
        };
        if self.status != required || self.requests.pause_or_resume_in_flight() {
            debug!(%operation, status = %self.status, "control request skipped");
            return None;
        }
        let session = self.session.as_ref()?;
        let args = (self.ticket(), session.id().clone(), session.version());
        self.set_request(operation, RequestState::InFlight);
        self.touch();
        Some(args)
    }

    /// # Errors
    ///
    /// Returns the remote failure; status is left unchanged.
    pub fn finish_control(
        &mut self,
        operation: Operation,
        ticket: Ticket,
        result: Result<PauseState, ApiError>,
    ) -> Result<ControlOutcome, SessionError> {
        if !self.is_current(ticket, operation) {
            return Ok(ControlOutcome::Stale);
        }
        self.touch();
        match result {
            Ok(state) => {
                self.set_request(operation, RequestState::Succeeded);
                self.apply_version(state.version);
                if self.status.is_live() {
                    let next = if state.is_paused {
                        SessionStatus::Paused
                    } else {
                        SessionStatus::Active
                    };
                    self.transition(next);
                }
                Ok(ControlOutcome::Applied)
            }
            Err(err) => {
                self.fail(operation, &err);
                Err(err.into())
            }
        }
    }

    // ─── refresh ───

    /// # Errors
    ///
    /// Returns `SessionError::NoSession` when nothing has started.
    pub fn begin_refresh(&mut self) -> Result<(Ticket, SessionId), SessionError> {
        let session = self.session.as_ref().ok_or(SessionError::NoSession)?;
        let args = (self.ticket(), session.id().clone());
        self.set_request(Operation::Refresh, RequestState::InFlight);
        self.touch();
        Ok(args)
    }

    /// Overwrite version and counters from a get-session response.
    ///
    /// # Errors
    ///
    /// Returns the remote failure.
    pub fn finish_refresh(
        &mut self,
        ticket: Ticket,
        result: Result<SessionDescriptor, ApiError>,
    ) -> Result<ControlOutcome, SessionError> {
        if !self.is_current(ticket, Operation::Refresh) {
            return Ok(ControlOutcome::Stale);
        }
        self.touch();
        match result {
            Ok(descriptor) => {
                self.set_request(Operation::Refresh, RequestState::Succeeded);
                self.apply_descriptor(&descriptor);
                if self.status.is_live() {
                    match descriptor.status {
                        RemoteStatus::Active => self.transition(SessionStatus::Active),
                        RemoteStatus::Paused => self.transition(SessionStatus::Paused),
                        RemoteStatus::Completed => {}
                    }
                }
                Ok(ControlOutcome::Applied)
            }
            Err(err) => {
                self.fail(Operation::Refresh, &err);
                Err(err.into())
            }
        }
    }

    fn apply_descriptor(&mut self, descriptor: &SessionDescriptor) {
        if self.status.is_terminal() {
            return;
        }
        if let Some(version) = descriptor.version {
            self.apply_version(version);
        }
        if let Some(session) = self.session.as_mut() {
            session.apply_counters(descriptor.total_answered, descriptor.correct_count);
        }
    }

    // ─── end ───

    /// Enter `ending`. `Ok(None)` when an end is already underway or done.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::InvalidState` when the session is not live and
    /// `SessionError::VersionConflict` when `expected` is stale.
    pub fn begin_end(
        &mut self,
        reason: EndReason,
        expected: Option<Version>,
    ) -> Result<Option<(Ticket, SessionId, Version)>, SessionError> {
        if self.status.is_ending() || self.status.is_terminal() {
            if reason.is_forced()
                && matches!(
                    self.status,
                    SessionStatus::Ending {
                        reason: EndReason::Explicit,
                        ..
                    }
                )
            {
                debug!(reason = reason.as_str(), "forced end deferred behind explicit end");
                self.deferred_force = Some(reason);
            }
            debug!(reason = reason.as_str(), status = %self.status, "end already underway");
            return Ok(None);
        }
        let Some(from) = self.status.live() else {
            return Err(SessionError::InvalidState {
                operation: Operation::End,
                status: self.status.as_str(),
            });
        };
        let session = self.session.as_ref().ok_or(SessionError::NoSession)?;
        let current = session.version();
        if let Some(expected) = expected.filter(|v| *v != current) {
            return Err(SessionError::VersionConflict { expected, current });
        }
        let args = (self.ticket(), session.id().clone(), current);
        self.set_request(Operation::End, RequestState::InFlight);
        self.end_reason = Some(reason);
        self.transition(SessionStatus::Ending { reason, from });
        self.touch();
        Ok(Some(args))
    }

    /// Apply the end response.
    ///
    /// Explicit ends revert to the prior live state on failure. Forced ends
    /// fall back to the local totals.
    ///
    /// # Errors
    ///
    /// Returns the remote failure of an explicit end.
    pub fn finish_end(
        &mut self,
        ticket: Ticket,
        result: Result<EndOutcome, ApiError>,
        now: DateTime<Utc>,
    ) -> Result<Option<SessionSummary>, SessionError> {
        if !self.is_current(ticket, Operation::End) {
            return Ok(None);
        }
        let SessionStatus::Ending { reason, from } = self.status else {
            // Auto-completion raced the end call and already finished the session.
            return Ok(self.final_summary());
        };
        self.touch();
        match result {
            Ok(outcome) => {
                self.deferred_force = None;
                self.set_request(Operation::End, RequestState::Succeeded);
                if let Some(version) = outcome.version {
                    self.apply_version(version);
                }
                let summary = outcome.summary()?;
                info!(
                    reason = reason.as_str(),
                    total = summary.total_questions(),
                    correct = summary.correct_answers(),
                    "session ended"
                );
                self.enter_ended(summary.clone(), outcome.target_progress);
                Ok(Some(summary))
            }
            Err(err) if reason.is_forced() => {
                self.fail(Operation::End, &err);
                warn!(reason = reason.as_str(), "remote end failed; ending with local totals");
                self.end_locally(now).map(Some)
            }
            Err(err) => {
                self.fail(Operation::End, &err);
                if let Some(forced) = self.deferred_force.take() {
                    warn!(
                        reason = forced.as_str(),
                        "explicit end failed after a forced end was requested; ending with local totals"
                    );
                    self.end_reason = Some(forced);
                    return self.end_locally(now).map(Some);
                }
                self.transition(from.into());
                Err(err.into())
            }
        }
    }

    /// Version refresh preceding a forced end.
    ///
    /// A failed refresh skips the remote end and finishes locally.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Summary` if local counters are inconsistent.
    pub(crate) fn finish_forced_refresh(
        &mut self,
        ticket: Ticket,
        result: Result<SessionDescriptor, ApiError>,
        now: DateTime<Utc>,
    ) -> Result<ForcedEndStep, SessionError> {
        if !self.is_current(ticket, Operation::Refresh) {
            return Ok(ForcedEndStep::Stale);
        }
        if !self.status.is_ending() {
            return Ok(self
                .final_summary()
                .map_or(ForcedEndStep::Stale, ForcedEndStep::Done));
        }
        self.touch();
        match result {
            Ok(descriptor) => {
                // Only the version is taken; counters stay as the submits left them.
                if let Some(version) = descriptor.version {
                    self.apply_version(version);
                }
                let version = descriptor
                    .version
                    .or_else(|| self.session.as_ref().map(Session::version))
                    .unwrap_or_default();
                Ok(ForcedEndStep::End(descriptor.id, version))
            }
            Err(err) => {
                warn!(error = %err, "version refresh failed; ending locally without remote confirmation");
                self.last_error = Some(err.to_string());
                self.set_request(Operation::End, RequestState::Failed(err.to_string()));
                self.end_locally(now).map(ForcedEndStep::Done)
            }
        }
    }

    fn end_locally(&mut self, now: DateTime<Utc>) -> Result<SessionSummary, SessionError> {
        let summary = self.local_summary(now)?;
        info!(
            total = summary.total_questions(),
            correct = summary.correct_answers(),
            "session ended with local totals"
        );
        self.enter_ended(summary.clone(), None);
        Ok(summary)
    }

    // ─── fetch ───

    /// Guard for `fetch_next`. `None` means skip.
    pub fn begin_fetch(&mut self) -> Option<(Ticket, SessionId)> {
        if self.status != SessionStatus::Active
            || self.flow.question.is_some()
            || self.requests.fetch.is_in_flight()
        {
            debug!(status = %self.status, "fetch skipped");
            return None;
        }
        let id = self.session.as_ref()?.id().clone();
        self.set_request(Operation::Fetch, RequestState::InFlight);
        self.touch();
        Some((self.ticket(), id))
    }

    /// Apply a fetch response. Exhaustion moves the store into `ending`.
    ///
    /// # Errors
    ///
    /// Returns remote failures other than exhaustion.
    pub(crate) fn finish_fetch(
        &mut self,
        ticket: Ticket,
        result: Result<Question, ApiError>,
    ) -> Result<FetchResolution, SessionError> {
        if !self.is_current(ticket, Operation::Fetch) {
            return Ok(FetchResolution::Done(FetchOutcome::Stale));
        }
        self.touch();
        match result {
            Ok(question) => {
                self.set_request(Operation::Fetch, RequestState::Succeeded);
                if !self.status.is_live() || self.flow.question.is_some() {
                    return Ok(FetchResolution::Done(FetchOutcome::Stale));
                }
                debug!(question = %question.id(), "question loaded");
                self.flow.load(question.clone());
                Ok(FetchResolution::Done(FetchOutcome::Loaded(question)))
            }
            Err(ApiError::NoEligibleQuestions) => {
                self.set_request(Operation::Fetch, RequestState::Succeeded);
                let Some(from) = self.status.live() else {
                    return Ok(FetchResolution::Done(FetchOutcome::Skipped));
                };
                let Some(session) = self.session.as_ref() else {
                    return Ok(FetchResolution::Done(FetchOutcome::Skipped));
                };
                let id = session.id().clone();
                info!(session = %id, "no eligible questions remain");
                self.end_reason = Some(EndReason::Exhausted);
                self.set_request(Operation::End, RequestState::InFlight);
                self.transition(SessionStatus::Ending {
                    reason: EndReason::Exhausted,
                    from,
                });
                Ok(FetchResolution::Exhausted(self.ticket(), id))
            }
            Err(err) => {
                self.fail(Operation::Fetch, &err);
                Err(err.into())
            }
        }
    }

    // ─── answering ───

    /// # Errors
    ///
    /// Returns an error if no question is loaded, feedback is already shown,
    /// or the letter is not offered.
    pub fn select_answer(&mut self, letter: OptionLetter) -> Result<(), SessionError> {
        let question = self.flow.question.as_ref().ok_or(SessionError::NoQuestion)?;
        if self.flow.feedback.is_some() {
            return Err(SessionError::FeedbackShown);
        }
        if !question.has_option(letter) {
            return Err(SessionError::InvalidSelection(letter.to_string()));
        }
        self.flow.selected = Some(letter);
        self.touch();
        Ok(())
    }

    /// Guard for `submit_answer`. `Ok(None)` while a submission is in flight.
    ///
    /// # Errors
    ///
    /// Returns an error when the session is not active or the flow is not
    /// ready for submission.
    pub fn begin_submit(&mut self) -> Result<Option<(Ticket, AnswerSubmission)>, SessionError> {
        if self.requests.submit.is_in_flight() {
            debug!("submit already in flight");
            return Ok(None);
        }
        if self.status != SessionStatus::Active {
            return Err(SessionError::InvalidState {
                operation: Operation::Submit,
                status: self.status.as_str(),
            });
        }
        let session = self.session.as_ref().ok_or(SessionError::NoSession)?;
        let question = self.flow.question.as_ref().ok_or(SessionError::NoQuestion)?;
        if self.flow.feedback.is_some() {
            return Err(SessionError::FeedbackShown);
        }
        let selected = self.flow.selected.ok_or(SessionError::NoSelection)?;
        let submission =
            AnswerSubmission::new(session.id().clone(), question.id().clone(), selected);
        self.set_request(Operation::Submit, RequestState::InFlight);
        self.touch();
        Ok(Some((self.ticket(), submission)))
    }

    /// # Errors
    ///
    /// Returns the remote failure; the selection is kept for a retry.
    pub fn finish_submit(
        &mut self,
        ticket: Ticket,
        result: Result<AnswerResult, ApiError>,
        now: DateTime<Utc>,
    ) -> Result<SubmitOutcome, SessionError> {
        if !self.is_current(ticket, Operation::Submit) || self.status.is_terminal() {
            return Ok(SubmitOutcome::Stale);
        }
        self.touch();
        let answer = match result {
            Ok(answer) => answer,
            Err(err) => {
                self.fail(Operation::Submit, &err);
                return Err(err.into());
            }
        };
        self.set_request(Operation::Submit, RequestState::Succeeded);
        self.apply_version(answer.stats.version);
        if let Some(session) = self.session.as_mut() {
            session.apply_counters(answer.stats.total_answered, answer.stats.correct_count);
        }

        if answer.session_completed {
            let summary = match &answer.summary {
                Some(summary) => summary.clone(),
                None => SessionSummary::from_server(
                    answer.stats.total_answered,
                    answer.stats.correct_count,
                    Some(answer.stats.accuracy),
                    now,
                )?,
            };
            info!(
                total = summary.total_questions(),
                correct = summary.correct_answers(),
                "session auto-completed"
            );
            self.end_reason = Some(EndReason::AutoCompleted);
            self.enter_ended(summary.clone(), None);
            return Ok(SubmitOutcome::Completed(summary));
        }

        if !self.status.is_live() {
            return Ok(SubmitOutcome::Skipped);
        }
        self.flow.feedback = Some(answer.clone());
        Ok(SubmitOutcome::Feedback(answer))
    }

    /// Clear feedback so the next fetch can fire.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::NoFeedback` when no feedback is shown.
    pub fn clear_feedback(&mut self) -> Result<(), SessionError> {
        if self.flow.feedback.is_none() {
            return Err(SessionError::NoFeedback);
        }
        self.flow.clear();
        self.set_request(Operation::Submit, RequestState::Idle);
        self.touch();
        Ok(())
    }

    // ─── reset ───

    /// Back to `idle`. Outstanding responses become stale.
    pub fn reset(&mut self) {
        let revision = self.revision;
        let epoch = self.epoch + 1;
        *self = SessionStore {
            epoch,
            revision,
            ..SessionStore::default()
        };
        info!("session reset");
        self.touch();
    }

    // ─── history ───

    /// Claim the pending history entry. Only one caller wins per session.
    pub fn claim_history(&mut self, retry: bool) -> Option<HistoryEntry> {
        let due = match self.history {
            HistoryState::Pending => true,
            HistoryState::Failed => retry,
            _ => false,
        };
        if !due {
            return None;
        }
        let session = self.session.as_ref()?;
        let summary = session.final_summary()?.clone();
        self.history = HistoryState::InFlight;
        Some(HistoryEntry {
            session_id: session.id().clone(),
            session_type: session.session_type(),
            focus: session.focus().cloned(),
            started_at: session.started_at(),
            summary,
        })
    }

    pub fn finish_history(&mut self, session_id: &SessionId, recorded: bool) {
        let same = self.session.as_ref().is_some_and(|s| s.id() == session_id);
        if !same || self.history != HistoryState::InFlight {
            return;
        }
        self.history = if recorded {
            HistoryState::Recorded
        } else {
            HistoryState::Failed
        };
    }

    #[must_use]
    pub fn history_recorded(&self) -> bool {
        self.history == HistoryState::Recorded
    }
}

/// Fetch result before the exhaustion branch runs.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum FetchResolution {
    Done(FetchOutcome),
    Exhausted(Ticket, SessionId),
}

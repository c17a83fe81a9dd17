use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::watch;
use tracing::{debug, info, warn};

use assess_core::model::{CourseId, OptionLetter, SessionId, SessionSummary, Version};
use storage::repository::{SessionHistoryRepository, StorageError};

use super::store::{
    ControlOutcome, EndReason, FetchOutcome, FetchResolution, ForcedEndStep, Operation,
    SessionSnapshot, SessionStatus, SessionStore, StartPath, SubmitOutcome, Ticket,
};
use crate::Clock;
use crate::config::SessionSettings;
use crate::error::{HistoryError, SessionError};
use crate::remote::{CourseScopeLookup, RemoteSessionService, StartConfig, StartRequest};

/// Drives one assessment session against the scoring service.
///
/// State lives in a `SessionStore` behind a mutex that is never held across
/// an await. Every operation checks its guard and marks the request in
/// flight, releases the lock for the network call, then re-checks the epoch
/// and status before applying the response. Share it as `Arc<SessionController>`.
pub struct SessionController {
    remote: Arc<dyn RemoteSessionService>,
    history: Option<Arc<dyn SessionHistoryRepository>>,
    clock: Clock,
    start_config: StartConfig,
    store: Mutex<SessionStore>,
    snapshots: watch::Sender<SessionSnapshot>,
}

impl SessionController {
    #[must_use]
    pub fn new(remote: Arc<dyn RemoteSessionService>, clock: Clock) -> Self {
        let (snapshots, _) = watch::channel(SessionSnapshot::default());
        Self {
            remote,
            history: None,
            clock,
            start_config: StartConfig::default(),
            store: Mutex::new(SessionStore::new()),
            snapshots,
        }
    }

    /// Record ended sessions into local history.
    #[must_use]
    pub fn with_history(mut self, history: Arc<dyn SessionHistoryRepository>) -> Self {
        self.history = Some(history);
        self
    }

    /// Scope used by `auto_start` and `start_for_course`.
    #[must_use]
    pub fn with_start_config(mut self, config: StartConfig) -> Self {
        self.start_config = config;
        self
    }

    #[must_use]
    pub fn with_settings(mut self, settings: &SessionSettings) -> Self {
        self.start_config.session_type = settings.session_type;
        self.start_config.strategy.clone_from(&settings.strategy);
        self
    }

    // ─── observation ───

    /// Receiver that yields a fresh snapshot after every state change.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshots.subscribe()
    }

    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        self.lock().snapshot()
    }

    #[must_use]
    pub fn status(&self) -> SessionStatus {
        self.lock().status()
    }

    #[must_use]
    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SessionStore> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run a synchronous mutation and publish a snapshot if anything changed.
    fn with_store<T>(&self, mutate: impl FnOnce(&mut SessionStore) -> T) -> T {
        let mut store = self.lock();
        let before = store.revision();
        let out = mutate(&mut store);
        if store.revision() != before {
            self.snapshots.send_replace(store.snapshot());
        }
        out
    }

    // ─── start ───

    /// Start a session explicitly.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::InvalidState` unless idle or errored, or the
    /// remote failure (status becomes `error`).
    pub async fn start(&self, request: StartRequest) -> Result<ControlOutcome, SessionError> {
        let path = if request.is_focused() {
            StartPath::Focused
        } else {
            StartPath::Default
        };
        self.start_with(path, request, false).await
    }

    /// Default mount-time start. Runs at most once per controller generation;
    /// skipped when another path already claimed initialization.
    ///
    /// # Errors
    ///
    /// Returns the remote failure of the start call.
    pub async fn auto_start(&self) -> Result<ControlOutcome, SessionError> {
        let request = StartRequest::Default(self.start_config.clone());
        self.start_with(StartPath::Default, request, true).await
    }

    /// Resolve a course into its scope and start against it.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Api` with a `Validation` error when the learner
    /// is not enrolled, or any start failure.
    pub async fn start_for_course(
        &self,
        lookup: &dyn CourseScopeLookup,
        course: &CourseId,
    ) -> Result<ControlOutcome, SessionError> {
        let mut scope = lookup.resolve_scope(course).await?;
        debug!(%course, areas = ?scope.knowledge_area_filter, "course scope resolved");
        if scope.session_type.is_none() {
            scope.session_type = self.start_config.session_type;
        }
        if scope.strategy.is_none() {
            scope.strategy.clone_from(&self.start_config.strategy);
        }
        self.start(StartRequest::Default(scope)).await
    }

    /// `error → loading` with the last start request.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::InvalidState` unless the last start failed.
    pub async fn retry_start(&self) -> Result<ControlOutcome, SessionError> {
        let (ticket, request) = self.with_store(|store| {
            if store.status() != SessionStatus::Error {
                return Err(SessionError::InvalidState {
                    operation: Operation::Start,
                    status: store.status().as_str(),
                });
            }
            let request = store.last_start().cloned().ok_or(SessionError::NoSession)?;
            store.begin_start(request.clone()).map(|ticket| (ticket, request))
        })?;
        info!("retrying session start");
        self.run_start(ticket, request).await
    }

    pub(crate) async fn start_with(
        &self,
        path: StartPath,
        request: StartRequest,
        exclusive: bool,
    ) -> Result<ControlOutcome, SessionError> {
        let ticket = self.with_store(|store| {
            let claimed = store.claim_initialization(path);
            if exclusive && !claimed {
                return Ok(None);
            }
            store.begin_start(request.clone()).map(Some)
        })?;
        let Some(ticket) = ticket else {
            debug!(?path, "initialization already claimed; start skipped");
            return Ok(ControlOutcome::Skipped);
        };
        self.run_start(ticket, request).await
    }

    async fn run_start(
        &self,
        ticket: Ticket,
        request: StartRequest,
    ) -> Result<ControlOutcome, SessionError> {
        debug!(focused = request.is_focused(), "issuing start");
        let result = self.remote.start(&request).await;
        let now = self.clock.now();
        let outcome = self.with_store(|store| store.finish_start(ticket, result, now))?;
        self.record_history().await;
        Ok(outcome)
    }

    // ─── pause / resume ───

    /// Pause an active session. A no-op unless status is exactly `active`
    /// and no pause or resume is in flight.
    ///
    /// # Errors
    ///
    /// Returns the remote failure, including `Conflict` on a stale version.
    pub async fn pause(&self) -> Result<ControlOutcome, SessionError> {
        self.control(Operation::Pause).await
    }

    /// Resume a paused session. Same guard as `pause`, mirrored.
    ///
    /// # Errors
    ///
    /// Returns the remote failure, including `Conflict` on a stale version.
    pub async fn resume(&self) -> Result<ControlOutcome, SessionError> {
        self.control(Operation::Resume).await
    }

    async fn control(&self, operation: Operation) -> Result<ControlOutcome, SessionError> {
        let Some((ticket, id, version)) = self.with_store(|store| store.begin_control(operation))
        else {
            return Ok(ControlOutcome::Skipped);
        };
        debug!(%operation, session = %id, %version, "issuing control request");
        let result = match operation {
            Operation::Pause => self.remote.pause(&id, version).await,
            _ => self.remote.resume(&id, version).await,
        };
        self.with_store(|store| store.finish_control(operation, ticket, result))
    }

    /// Re-sync version and counters from the server.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::NoSession` before a start, or the remote failure.
    pub async fn refresh(&self) -> Result<ControlOutcome, SessionError> {
        let (ticket, id) = self.with_store(SessionStore::begin_refresh)?;
        let result = self.remote.get_session(&id).await;
        self.with_store(|store| store.finish_refresh(ticket, result))
    }

    /// Discard the session and return to `idle`.
    pub fn reset(&self) {
        self.with_store(SessionStore::reset);
    }

    // ─── end ───

    /// End the session with the cached version.
    ///
    /// Returns `Ok(None)` when an end is already underway or done, so
    /// concurrent calls produce a single remote end.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::InvalidState` when the session is not live,
    /// or the remote failure (status reverts to its prior live state). If the
    /// time limit elapsed while the request was in flight, a failure ends the
    /// session with local totals instead.
    pub async fn end(&self) -> Result<Option<SessionSummary>, SessionError> {
        self.end_as(EndReason::Explicit, None).await
    }

    /// End only if the cached version still equals `expected`.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::VersionConflict` without issuing a request when
    /// `expected` is stale; callers re-sync with `refresh`.
    pub async fn end_with_version(
        &self,
        expected: Version,
    ) -> Result<Option<SessionSummary>, SessionError> {
        self.end_as(EndReason::Explicit, Some(expected)).await
    }

    /// Force the session to `ended` regardless of pending operations.
    ///
    /// Forced ends refresh the version, attempt a remote end and finish with
    /// local totals if the server does not confirm. A no-op when the session
    /// is not live.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Summary` if local counters are inconsistent.
    pub async fn force_complete(
        &self,
        reason: EndReason,
    ) -> Result<Option<SessionSummary>, SessionError> {
        if !reason.is_forced() {
            return self.end().await;
        }
        let begun = self.with_store(|store| {
            // An explicit end in flight records the forced reason instead.
            if store.status().is_live() || store.status().is_ending() {
                store.begin_end(reason, None)
            } else {
                Ok(None)
            }
        })?;
        let Some((ticket, id, _)) = begun else {
            return Ok(None);
        };
        info!(reason = reason.as_str(), session = %id, "forcing session completion");
        let summary = self.drive_forced_end(ticket, id).await?;
        self.record_history().await;
        Ok(summary)
    }

    async fn end_as(
        &self,
        reason: EndReason,
        expected: Option<Version>,
    ) -> Result<Option<SessionSummary>, SessionError> {
        let Some((ticket, id, version)) =
            self.with_store(|store| store.begin_end(reason, expected))?
        else {
            return Ok(None);
        };
        debug!(session = %id, %version, "issuing end");
        let result = self.remote.end(&id, version).await;
        let now = self.clock.now();
        let summary = self.with_store(|store| store.finish_end(ticket, result, now))?;
        self.record_history().await;
        Ok(summary)
    }

    /// Refresh the version, then end with it. Always leaves the store `ended`
    /// unless a reset made the ticket stale.
    async fn drive_forced_end(
        &self,
        ticket: Ticket,
        id: SessionId,
    ) -> Result<Option<SessionSummary>, SessionError> {
        let refreshed = self.remote.get_session(&id).await;
        let now = self.clock.now();
        let step = self.with_store(|store| store.finish_forced_refresh(ticket, refreshed, now))?;
        match step {
            ForcedEndStep::Stale => Ok(None),
            ForcedEndStep::Done(summary) => Ok(Some(summary)),
            ForcedEndStep::End(id, version) => {
                debug!(session = %id, %version, "issuing end after version refresh");
                let result = self.remote.end(&id, version).await;
                let now = self.clock.now();
                self.with_store(|store| store.finish_end(ticket, result, now))
            }
        }
    }

    // ─── question flow ───

    /// Load the next question. Skipped unless active with nothing loaded and
    /// no fetch in flight. Exhaustion ends the session.
    ///
    /// # Errors
    ///
    /// Returns remote failures other than exhaustion; the session stays live.
    pub async fn fetch_next(&self) -> Result<FetchOutcome, SessionError> {
        let Some((ticket, id)) = self.with_store(SessionStore::begin_fetch) else {
            return Ok(FetchOutcome::Skipped);
        };
        debug!(session = %id, "fetching next question");
        let result = self.remote.next_question(&id).await;
        match self.with_store(|store| store.finish_fetch(ticket, result))? {
            FetchResolution::Done(outcome) => Ok(outcome),
            FetchResolution::Exhausted(ticket, id) => {
                let summary = self.drive_forced_end(ticket, id).await?;
                self.record_history().await;
                Ok(summary.map_or(FetchOutcome::Stale, FetchOutcome::Completed))
            }
        }
    }

    /// # Errors
    ///
    /// Returns an error when no question is loaded, feedback is shown, or the
    /// letter is not one of the options.
    pub fn select_answer(&self, letter: OptionLetter) -> Result<(), SessionError> {
        self.with_store(|store| store.select_answer(letter))
    }

    /// Submit the selected answer with a fresh idempotency token.
    ///
    /// # Errors
    ///
    /// Returns an error when the flow is not ready, or the remote failure.
    pub async fn submit_answer(&self) -> Result<SubmitOutcome, SessionError> {
        let Some((ticket, submission)) = self.with_store(SessionStore::begin_submit)? else {
            return Ok(SubmitOutcome::Skipped);
        };
        debug!(
            question = %submission.question_id,
            token = %submission.idempotency_token,
            "submitting answer"
        );
        let result = self.remote.submit_answer(&submission).await;
        let now = self.clock.now();
        let outcome = self.with_store(|store| store.finish_submit(ticket, result, now))?;
        if matches!(outcome, SubmitOutcome::Completed(_)) {
            self.record_history().await;
        }
        Ok(outcome)
    }

    /// Leave the feedback view and fetch the next question.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::NoFeedback` when no feedback is shown, or a
    /// fetch failure.
    pub async fn proceed_to_next(&self) -> Result<FetchOutcome, SessionError> {
        self.with_store(SessionStore::clear_feedback)?;
        self.fetch_next().await
    }

    // ─── history ───

    async fn record_history(&self) {
        if self.history.is_none() {
            return;
        }
        if let Err(err) = self.persist_history(false).await {
            warn!(error = %err, "failed to record session history; call finalize_history to retry");
        }
    }

    /// Record the ended session into history if an earlier attempt failed.
    ///
    /// # Errors
    ///
    /// Returns `HistoryError::Disabled` without a repository,
    /// `HistoryError::NotEnded` before the session ends, or storage failures.
    pub async fn finalize_history(&self) -> Result<Option<i64>, HistoryError> {
        if self.history.is_none() {
            return Err(HistoryError::Disabled);
        }
        if self.status() != SessionStatus::Ended {
            return Err(HistoryError::NotEnded);
        }
        self.persist_history(true).await
    }

    #[must_use]
    pub fn history_recorded(&self) -> bool {
        self.lock().history_recorded()
    }

    async fn persist_history(&self, retry: bool) -> Result<Option<i64>, HistoryError> {
        let Some(repo) = self.history.as_ref() else {
            return Err(HistoryError::Disabled);
        };
        let Some(entry) = self.with_store(|store| store.claim_history(retry)) else {
            return Ok(None);
        };
        let result = repo.append_entry(&entry).await;
        let recorded = matches!(result, Ok(_) | Err(StorageError::Conflict));
        self.with_store(|store| store.finish_history(&entry.session_id, recorded));
        match result {
            Ok(id) => {
                info!(session = %entry.session_id, row = id, "session history recorded");
                Ok(Some(id))
            }
            Err(StorageError::Conflict) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }
}

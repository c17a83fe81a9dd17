use std::sync::Arc;

use tracing::debug;

use assess_core::model::{ConceptId, FocusContext, KnowledgeAreaId, TargetProgress};

use super::controller::SessionController;
use super::store::{ControlOutcome, StartPath};
use crate::error::SessionError;
use crate::remote::StartRequest;

/// How a session view is mounted.
///
/// A supplied `focus` always suppresses the default auto-start, whatever
/// `skip_auto_start` says.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LaunchOptions {
    pub skip_auto_start: bool,
    pub focus: Option<FocusContext>,
}

impl LaunchOptions {
    #[must_use]
    pub fn focused(focus: FocusContext) -> Self {
        Self {
            skip_auto_start: true,
            focus: Some(focus),
        }
    }

    /// Whether the default mount path may start a session.
    #[must_use]
    pub fn allows_auto_start(&self) -> bool {
        !self.skip_auto_start && self.focus.is_none()
    }
}

impl SessionController {
    /// Default mount path. Starts only when the options allow it and no other
    /// path has claimed initialization.
    ///
    /// # Errors
    ///
    /// Returns the remote failure of the start call.
    pub async fn mount(&self, options: &LaunchOptions) -> Result<ControlOutcome, SessionError> {
        if !options.allows_auto_start() {
            debug!(?options, "auto-start suppressed");
            return Ok(ControlOutcome::Skipped);
        }
        self.auto_start().await
    }
}

/// Starts sessions scoped to a knowledge area or a set of concepts.
#[derive(Clone)]
pub struct FocusedVariantResolver {
    controller: Arc<SessionController>,
}

impl FocusedVariantResolver {
    #[must_use]
    pub fn new(controller: Arc<SessionController>) -> Self {
        Self { controller }
    }

    #[must_use]
    pub fn controller(&self) -> &Arc<SessionController> {
        &self.controller
    }

    /// # Errors
    ///
    /// Returns the remote failure of the start call.
    pub async fn start_focused_by_area(
        &self,
        area: KnowledgeAreaId,
    ) -> Result<ControlOutcome, SessionError> {
        self.start_focus(FocusContext::KnowledgeArea(area)).await
    }

    /// # Errors
    ///
    /// Returns `SessionError::InvalidFocus` for an empty concept list, or the
    /// remote failure of the start call.
    pub async fn start_focused_by_concepts(
        &self,
        concepts: Vec<ConceptId>,
    ) -> Result<ControlOutcome, SessionError> {
        self.start_focus(FocusContext::Concepts(concepts)).await
    }

    /// Mount with the given options: the focused start when a focus is set,
    /// otherwise the default path.
    ///
    /// # Errors
    ///
    /// Returns the start failure of whichever path ran.
    pub async fn launch(&self, options: &LaunchOptions) -> Result<ControlOutcome, SessionError> {
        match &options.focus {
            Some(focus) => self.start_focus(focus.clone()).await,
            None => self.controller.mount(options).await,
        }
    }

    async fn start_focus(&self, focus: FocusContext) -> Result<ControlOutcome, SessionError> {
        if matches!(&focus, FocusContext::Concepts(ids) if ids.is_empty()) {
            return Err(SessionError::InvalidFocus("at least one concept is required"));
        }
        debug!(focus_type = focus.focus_type().as_str(), target = %focus.focus_target_id(), "starting focused session");
        // Claim before issuing so a racing default mount cannot start too.
        self.controller
            .start_with(StartPath::Focused, StartRequest::Focused(focus), false)
            .await
    }

    /// Focus of the current session, if it is focused.
    #[must_use]
    pub fn focus(&self) -> Option<FocusContext> {
        self.controller
            .snapshot()
            .session
            .and_then(|s| s.focus().cloned())
    }

    /// Mastery movement reported when the focused session ended.
    #[must_use]
    pub fn target_progress(&self) -> Option<TargetProgress> {
        self.controller
            .snapshot()
            .session
            .and_then(|s| s.target_progress().cloned())
    }
}

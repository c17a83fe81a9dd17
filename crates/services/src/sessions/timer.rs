use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tracing::{info, warn};

use super::controller::SessionController;
use super::store::EndReason;

/// Wall-clock ceiling for a session.
///
/// Runs independently of the question flow. When the limit elapses it forces
/// completion through the controller, whatever requests are still pending.
/// The task is aborted when the timer is cancelled or dropped.
#[derive(Debug)]
pub struct SessionTimer {
    deadline: Instant,
    handle: JoinHandle<()>,
}

impl SessionTimer {
    /// Spawn the timer on the current runtime.
    #[must_use]
    pub fn start(controller: Arc<SessionController>, limit: Duration) -> Self {
        let deadline = Instant::now() + limit;
        let handle = tokio::spawn(async move {
            sleep_until(deadline).await;
            info!(limit_secs = limit.as_secs(), "session time limit reached");
            if let Err(err) = controller.force_complete(EndReason::TimeLimit).await {
                warn!(error = %err, "forced completion failed");
            }
        });
        Self { deadline, handle }
    }

    #[must_use]
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub fn cancel(self) {
        self.handle.abort();
    }
}

impl Drop for SessionTimer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

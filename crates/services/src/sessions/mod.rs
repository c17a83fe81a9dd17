mod controller;
mod focused;
mod store;
mod timer;

// Public API of the session subsystem.
pub use crate::error::SessionError;
pub use controller::SessionController;
pub use focused::{FocusedVariantResolver, LaunchOptions};
pub use store::{
    ControlOutcome, EndReason, FetchOutcome, Initialization, LiveStatus, Operation, QuestionFlow,
    RequestState, RequestStates, SessionSnapshot, SessionStatus, SessionStore, StartPath,
    SubmitOutcome, Ticket,
};
pub use timer::SessionTimer;

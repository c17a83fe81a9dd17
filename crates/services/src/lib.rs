#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod remote;
pub mod sessions;

pub use assess_core::Clock;

pub use config::{ClientConfig, SessionSettings};
pub use error::{ApiError, ConfigError, HistoryError, SessionError};
pub use remote::{
    BankQuestion, CourseScopeLookup, EndOutcome, HttpSessionService, InMemorySessionService,
    PauseState, RemoteSessionService, StartConfig, StartRequest,
};
pub use sessions::{
    ControlOutcome, EndReason, FetchOutcome, FocusedVariantResolver, LaunchOptions,
    SessionController, SessionSnapshot, SessionStatus, SessionTimer, SubmitOutcome,
};

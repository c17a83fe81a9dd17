mod answer;
mod ids;
mod question;
mod session;

pub use answer::{AnswerResult, AnswerStats, AnswerSubmission, IdempotencyToken};
pub use ids::{ConceptId, CourseId, KnowledgeAreaId, ParseIdError, QuestionId, SessionId};
pub use question::{AnswerOption, OptionLetter, Question, QuestionError};
pub use session::{
    FocusContext, FocusType, ParseSessionTypeError, RemoteStatus, Session, SessionDescriptor,
    SessionSummary, SessionSummaryError, SessionType, SummarySource, TargetProgress, Version,
    derive_accuracy,
};

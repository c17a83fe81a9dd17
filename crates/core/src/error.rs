use thiserror::Error;

use crate::model::{ParseIdError, ParseSessionTypeError, QuestionError, SessionSummaryError};

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Question(#[from] QuestionError),
    #[error(transparent)]
    Summary(#[from] SessionSummaryError),
    #[error(transparent)]
    Id(#[from] ParseIdError),
    #[error(transparent)]
    SessionType(#[from] ParseSessionTypeError),
}

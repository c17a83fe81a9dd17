use async_trait::async_trait;
use chrono::Utc;
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue, USER_AGENT};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use tracing::debug;

use assess_core::model::{
    AnswerResult, AnswerSubmission, CourseId, Question, SessionDescriptor, SessionId, Version,
};

use super::wire::{
    self, AnswerWire, CourseScopeWire, EndWire, FocusedStartBody, NextQuestionBody, PauseWire,
    QuestionWire, SessionDescriptorWire, StartBody, SubmitBody, VersionBody,
};
use super::{
    CourseScopeLookup, EndOutcome, PauseState, RemoteSessionService, StartConfig, StartRequest,
};
use crate::config::ClientConfig;
use crate::error::ApiError;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// `RemoteSessionService` over the scoring service's JSON/HTTP API.
#[derive(Clone)]
pub struct HttpSessionService {
    client: Client,
    base_url: String,
    api_token: Option<String>,
}

impl HttpSessionService {
    #[must_use]
    pub fn new(config: &ClientConfig) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("assess-client/{VERSION}"))
                .unwrap_or_else(|_| HeaderValue::from_static("assess-client")),
        );
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let client = Client::builder()
            .default_headers(headers)
            .timeout(config.http_timeout)
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_owned(),
            api_token: config.api_token.clone(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.api_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send<T: DeserializeOwned>(
        &self,
        operation: &'static str,
        request: RequestBuilder,
    ) -> Result<T, ApiError> {
        let response = self
            .authorized(request)
            .send()
            .await
            .map_err(to_network_error)?;

        let status = response.status();
        debug!(operation, status = status.as_u16(), "scoring service responded");
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(to_http_error(status, &error_text));
        }

        response.json::<T>().await.map_err(|e| ApiError::Parse {
            message: format!("failed to parse {operation} response: {e}"),
        })
    }
}

fn to_network_error(err: reqwest::Error) -> ApiError {
    ApiError::Network {
        message: err.to_string(),
    }
}

/// Map a non-success response onto the error taxonomy.
///
/// The exhaustion signal is recognized by its body code regardless of status,
/// since deployments have used 404, 409 and 422 for it.
fn to_http_error(status: StatusCode, error_text: &str) -> ApiError {
    let (code, message) = wire::parse_error_body(error_text);
    if code.as_deref() == Some(wire::NO_ELIGIBLE_QUESTIONS) {
        return ApiError::NoEligibleQuestions;
    }

    let status_code = status.as_u16();
    let message = message
        .or_else(|| (!error_text.trim().is_empty()).then(|| error_text.to_owned()))
        .unwrap_or_else(|| format!("request failed ({status_code})"));

    match status_code {
        401 => ApiError::Unauthorized { message },
        403 => ApiError::Forbidden { message },
        409 => ApiError::Conflict { message },
        400 | 422 => ApiError::Validation { message },
        500..=599 => ApiError::Server {
            status: status_code,
            message,
        },
        _ => ApiError::Client {
            status: status_code,
            message,
        },
    }
}

#[async_trait]
impl RemoteSessionService for HttpSessionService {
    async fn start(&self, request: &StartRequest) -> Result<SessionDescriptor, ApiError> {
        let builder = match request {
            StartRequest::Default(config) => self
                .client
                .post(self.url("sessions/start"))
                .json(&StartBody::from(config)),
            StartRequest::Focused(focus) => self
                .client
                .post(self.url("sessions/start/focused"))
                .json(&FocusedStartBody::from(focus)),
        };
        let wire: SessionDescriptorWire = self.send("start", builder).await?;
        Ok(wire.into())
    }

    async fn get_session(&self, id: &SessionId) -> Result<SessionDescriptor, ApiError> {
        let builder = self.client.get(self.url(&format!("sessions/{id}")));
        let wire: SessionDescriptorWire = self.send("get_session", builder).await?;
        Ok(wire.into())
    }

    async fn pause(&self, id: &SessionId, expected: Version) -> Result<PauseState, ApiError> {
        let builder = self
            .client
            .post(self.url(&format!("sessions/{id}/pause")))
            .json(&VersionBody {
                expected_version: expected,
            });
        let wire: PauseWire = self.send("pause", builder).await?;
        Ok(wire.into())
    }

    async fn resume(&self, id: &SessionId, expected: Version) -> Result<PauseState, ApiError> {
        let builder = self
            .client
            .post(self.url(&format!("sessions/{id}/resume")))
            .json(&VersionBody {
                expected_version: expected,
            });
        let wire: PauseWire = self.send("resume", builder).await?;
        Ok(wire.into())
    }

    async fn end(&self, id: &SessionId, expected: Version) -> Result<EndOutcome, ApiError> {
        let builder = self
            .client
            .post(self.url(&format!("sessions/{id}/end")))
            .json(&VersionBody {
                expected_version: expected,
            });
        let wire: EndWire = self.send("end", builder).await?;
        Ok(wire.into())
    }

    async fn next_question(&self, id: &SessionId) -> Result<Question, ApiError> {
        let builder = self
            .client
            .post(self.url(&format!("sessions/{id}/next-question")))
            .json(&NextQuestionBody { session_id: id });
        let wire: QuestionWire = self.send("next_question", builder).await?;
        wire.into_question()
    }

    async fn submit_answer(
        &self,
        submission: &AnswerSubmission,
    ) -> Result<AnswerResult, ApiError> {
        let builder = self
            .client
            .post(self.url(&format!("sessions/{}/answers", submission.session_id)))
            .json(&SubmitBody::from(submission));
        let wire: AnswerWire = self.send("submit_answer", builder).await?;
        wire.into_result(Utc::now())
    }
}

#[async_trait]
impl CourseScopeLookup for HttpSessionService {
    async fn resolve_scope(&self, course: &CourseId) -> Result<StartConfig, ApiError> {
        let builder = self.client.get(self.url(&format!("courses/{course}/scope")));
        let wire: CourseScopeWire = self.send("resolve_scope", builder).await?;
        Ok(wire.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exhaustion_code_wins_over_status() {
        for status in [StatusCode::NOT_FOUND, StatusCode::CONFLICT, StatusCode::UNPROCESSABLE_ENTITY] {
            let err = to_http_error(status, r#"{"code":"no_eligible_questions"}"#);
            assert_eq!(err, ApiError::NoEligibleQuestions);
        }
    }

    #[test]
    fn conflict_and_validation_map_by_status() {
        let err = to_http_error(StatusCode::CONFLICT, r#"{"detail":"version mismatch"}"#);
        assert_eq!(
            err,
            ApiError::Conflict {
                message: "version mismatch".into()
            }
        );

        let err = to_http_error(
            StatusCode::UNPROCESSABLE_ENTITY,
            r#"{"detail":"You are not enrolled in this course"}"#,
        );
        assert_eq!(
            err,
            ApiError::Validation {
                message: "You are not enrolled in this course".into()
            }
        );
    }

    #[test]
    fn empty_bodies_get_generic_messages() {
        let err = to_http_error(StatusCode::BAD_GATEWAY, "");
        assert_eq!(
            err,
            ApiError::Server {
                status: 502,
                message: "request failed (502)".into()
            }
        );
        assert!(err.is_retriable());
        assert!(to_http_error(StatusCode::UNAUTHORIZED, "").is_auth_error());
    }

    #[test]
    fn urls_join_without_double_slashes() {
        let service = HttpSessionService::new(&ClientConfig::new("http://localhost:8000/api/"));
        assert_eq!(
            service.url("/sessions/start"),
            "http://localhost:8000/api/sessions/start"
        );
    }
}

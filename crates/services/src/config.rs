use std::env;
use std::time::Duration;

use assess_core::model::SessionType;

use crate::error::ConfigError;

pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_SESSION_TIME_LIMIT: Duration = Duration::from_secs(60 * 60);

/// Connection settings for the scoring service.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientConfig {
    pub base_url: String,
    pub api_token: Option<String>,
    pub http_timeout: Duration,
}

impl ClientConfig {
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_token: None,
            http_timeout: DEFAULT_HTTP_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.api_token = Some(token.into());
        self
    }

    /// Read `ASSESS_API_BASE_URL`, `ASSESS_API_TOKEN` and `ASSESS_HTTP_TIMEOUT_SECS`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Missing` when the base URL is unset and
    /// `ConfigError::Invalid` for a malformed timeout.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub(crate) fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let base_url = non_empty(lookup("ASSESS_API_BASE_URL"))
            .ok_or(ConfigError::Missing("ASSESS_API_BASE_URL"))?;
        let api_token = non_empty(lookup("ASSESS_API_TOKEN"));
        let http_timeout = parse_secs("ASSESS_HTTP_TIMEOUT_SECS", lookup("ASSESS_HTTP_TIMEOUT_SECS"))?
            .unwrap_or(DEFAULT_HTTP_TIMEOUT);

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_owned(),
            api_token,
            http_timeout,
        })
    }
}

/// Per-session knobs shared by every start path.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionSettings {
    pub time_limit: Duration,
    pub session_type: Option<SessionType>,
    pub strategy: Option<String>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            time_limit: DEFAULT_SESSION_TIME_LIMIT,
            session_type: None,
            strategy: None,
        }
    }
}

impl SessionSettings {
    /// Read `ASSESS_SESSION_TIME_LIMIT_SECS`, `ASSESS_SESSION_TYPE` and `ASSESS_STRATEGY`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` for malformed values.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub(crate) fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let time_limit = parse_secs(
            "ASSESS_SESSION_TIME_LIMIT_SECS",
            lookup("ASSESS_SESSION_TIME_LIMIT_SECS"),
        )?
        .unwrap_or(DEFAULT_SESSION_TIME_LIMIT);

        let session_type = non_empty(lookup("ASSESS_SESSION_TYPE"))
            .map(|raw| {
                raw.parse::<SessionType>().map_err(|_| ConfigError::Invalid {
                    name: "ASSESS_SESSION_TYPE",
                    value: raw.clone(),
                })
            })
            .transpose()?;

        Ok(Self {
            time_limit,
            session_type,
            strategy: non_empty(lookup("ASSESS_STRATEGY")),
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn parse_secs(name: &'static str, raw: Option<String>) -> Result<Option<Duration>, ConfigError> {
    let Some(raw) = non_empty(raw) else {
        return Ok(None);
    };
    match raw.trim().parse::<u64>() {
        Ok(secs) if secs > 0 => Ok(Some(Duration::from_secs(secs))),
        _ => Err(ConfigError::Invalid { name, value: raw }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        move |name: &str| map.get(name).cloned()
    }

    #[test]
    fn client_config_requires_base_url() {
        let err = ClientConfig::from_lookup(lookup(&[])).unwrap_err();
        assert_eq!(err, ConfigError::Missing("ASSESS_API_BASE_URL"));
    }

    #[test]
    fn client_config_trims_trailing_slash_and_reads_timeout() {
        let config = ClientConfig::from_lookup(lookup(&[
            ("ASSESS_API_BASE_URL", "https://api.example.test/v1/"),
            ("ASSESS_API_TOKEN", "secret"),
            ("ASSESS_HTTP_TIMEOUT_SECS", "5"),
        ]))
        .unwrap();
        assert_eq!(config.base_url, "https://api.example.test/v1");
        assert_eq!(config.api_token.as_deref(), Some("secret"));
        assert_eq!(config.http_timeout, Duration::from_secs(5));
    }

    #[test]
    fn zero_timeout_is_invalid() {
        let err = ClientConfig::from_lookup(lookup(&[
            ("ASSESS_API_BASE_URL", "http://localhost"),
            ("ASSESS_HTTP_TIMEOUT_SECS", "0"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn session_settings_defaults_and_overrides() {
        let defaults = SessionSettings::from_lookup(lookup(&[])).unwrap();
        assert_eq!(defaults, SessionSettings::default());

        let custom = SessionSettings::from_lookup(lookup(&[
            ("ASSESS_SESSION_TIME_LIMIT_SECS", "900"),
            ("ASSESS_SESSION_TYPE", "diagnostic"),
            ("ASSESS_STRATEGY", "max_information"),
        ]))
        .unwrap();
        assert_eq!(custom.time_limit, Duration::from_secs(900));
        assert_eq!(custom.session_type, Some(SessionType::Diagnostic));
        assert_eq!(custom.strategy.as_deref(), Some("max_information"));
    }

    #[test]
    fn unknown_session_type_is_invalid() {
        let err =
            SessionSettings::from_lookup(lookup(&[("ASSESS_SESSION_TYPE", "weekly")])).unwrap_err();
        assert_eq!(
            err,
            ConfigError::Invalid {
                name: "ASSESS_SESSION_TYPE",
                value: "weekly".into()
            }
        );
    }
}

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::{DEFAULT_API_BASE_URL, REQUEST_TIMEOUT};

pub const API_BASE_URL_ENV: &str = "EVENTS_API_BASE_URL";
pub const MAX_TIMEOUT_MS: u64 = 300_000;

/// How the edit modal writes its changes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EditStrategy {
    /// Hand the form to the router; the route action performs the write.
    #[default]
    RouterAction,
    /// Write to the cache first and reconcile with the server afterwards.
    Optimistic,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("{0} is not valid unicode")]
    NotUnicode(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub api_base_url: Url,
    pub image_base_url: Url,
    pub request_timeout: Duration,
    pub edit_strategy: EditStrategy,
}

impl Default for AppConfig {
    fn default() -> Self {
        let base = Url::parse(DEFAULT_API_BASE_URL).expect("default API base URL is a valid literal");
        Self {
            api_base_url: base.clone(),
            image_base_url: base,
            request_timeout: REQUEST_TIMEOUT,
            edit_strategy: EditStrategy::default(),
        }
    }
}

impl AppConfig {
    /// Defaults, with the API base URL taken from `EVENTS_API_BASE_URL` when set.
    pub fn from_env() -> Result<Self, ConfigError> {
        match std::env::var(API_BASE_URL_ENV) {
            Ok(value) => Self::default().with_api_base_url(&value),
            Err(std::env::VarError::NotPresent) => Ok(Self::default()),
            Err(std::env::VarError::NotUnicode(_)) => Err(ConfigError::NotUnicode(API_BASE_URL_ENV)),
        }
    }

    /// Points both the API and image assets at `base`.
    pub fn with_api_base_url(mut self, base: &str) -> Result<Self, ConfigError> {
        let mut url = Url::parse(base.trim()).map_err(|e| ConfigError::Invalid {
            field: "api_base_url",
            reason: e.to_string(),
        })?;

        // Relative joins replace the last segment unless the path ends in '/'.
        if !url.path().ends_with('/') {
            let path = format!("{}/", url.path());
            url.set_path(&path);
        }

        self.api_base_url = url.clone();
        self.image_base_url = url;
        self.validate()?;
        Ok(self)
    }

    #[must_use]
    pub fn with_edit_strategy(mut self, strategy: EditStrategy) -> Self {
        self.edit_strategy = strategy;
        self
    }

    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        Self::validate_url("api_base_url", &self.api_base_url)?;
        Self::validate_url("image_base_url", &self.image_base_url)?;

        let timeout_ms = self.request_timeout.as_millis();
        if timeout_ms == 0 || timeout_ms > u128::from(MAX_TIMEOUT_MS) {
            return Err(ConfigError::Invalid {
                field: "request_timeout",
                reason: format!("must be between 1ms and {MAX_TIMEOUT_MS}ms"),
            });
        }

        Ok(())
    }

    fn validate_url(field: &'static str, url: &Url) -> Result<(), ConfigError> {
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::Invalid {
                field,
                reason: format!("unsupported scheme '{}'", url.scheme()),
            });
        }
        if url.host_str().is_none() {
            return Err(ConfigError::Invalid {
                field,
                reason: "missing host".to_string(),
            });
        }
        if !url.username().is_empty() || url.password().is_some() {
            return Err(ConfigError::Invalid {
                field,
                reason: "credentials are not allowed".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_points_at_local_server() {
        let config = AppConfig::default();
        assert_eq!(config.api_base_url.as_str(), "http://localhost:3000/");
        assert_eq!(config.edit_strategy, EditStrategy::RouterAction);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_base_url_gets_trailing_slash() {
        let config = AppConfig::default()
            .with_api_base_url("https://api.example.com/v1")
            .unwrap();
        assert_eq!(config.api_base_url.as_str(), "https://api.example.com/v1/");
        assert_eq!(
            config.api_base_url.join("events/1").unwrap().as_str(),
            "https://api.example.com/v1/events/1"
        );
        assert_eq!(config.image_base_url, config.api_base_url);
    }

    #[test]
    fn test_rejects_bad_base_urls() {
        assert!(AppConfig::default().with_api_base_url("not a url").is_err());
        assert!(AppConfig::default().with_api_base_url("ftp://example.com").is_err());
        assert!(AppConfig::default()
            .with_api_base_url("http://user:pw@example.com")
            .is_err());
    }

    #[test]
    fn test_from_env_reads_base_url() {
        // The only test touching this variable, so no other test races it.
        std::env::set_var(API_BASE_URL_ENV, " https://events.example.com/api ");
        let configured = AppConfig::from_env();
        std::env::remove_var(API_BASE_URL_ENV);
        let fallback = AppConfig::from_env();

        let configured = configured.unwrap();
        assert_eq!(
            configured.api_base_url.as_str(),
            "https://events.example.com/api/"
        );
        assert_eq!(configured.image_base_url, configured.api_base_url);
        assert_eq!(fallback.unwrap(), AppConfig::default());
    }

    #[test]
    fn test_rejects_zero_timeout() {
        let config = AppConfig::default().with_request_timeout(Duration::ZERO);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid {
                field: "request_timeout",
                ..
            })
        ));
    }
}

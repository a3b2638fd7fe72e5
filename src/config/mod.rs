use std::time::Duration;

use garde::Validate;
use serde::Deserialize;

use crate::services::backend::JobEndpoints;
use crate::services::poller::PollSettings;

#[derive(Debug, Deserialize, Validate)]
pub struct AppConfig {
    /// Base URL of the job backend (e.g., "http://127.0.0.1:5000")
    #[garde(length(min = 1))]
    pub backend_url: String,

    /// Path of the job start endpoint (POST)
    #[serde(default = "default_start_path")]
    #[garde(length(min = 1))]
    pub start_path: String,

    /// Path of the job status endpoint (GET)
    #[serde(default = "default_status_path")]
    #[garde(length(min = 1))]
    pub status_path: String,

    /// Path of the prior-results check (GET)
    #[serde(default = "default_results_exist_path")]
    #[garde(length(min = 1))]
    pub results_exist_path: String,

    /// Path of the results document (GET)
    #[serde(default = "default_results_path")]
    #[garde(length(min = 1))]
    pub results_path: String,

    /// Delay between status polls, in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    #[garde(range(min = 1))]
    pub poll_interval_ms: u64,

    /// Consecutive failed polls tolerated before giving up
    #[serde(default = "default_max_retries")]
    #[garde(skip)]
    pub max_retries: u32,

    /// Duration of one progress bar transition, in milliseconds
    #[serde(default = "default_animation_ms")]
    #[garde(range(max = 60_000))]
    pub animation_ms: u64,

    /// JSON body sent with the start request. Optional.
    #[serde(default)]
    #[garde(skip)]
    pub job_payload: Option<String>,

    /// Prometheus scrape listener address (e.g., "0.0.0.0:9000"). Optional.
    #[serde(default)]
    #[garde(skip)]
    pub metrics_bind_addr: Option<String>,
}

fn default_start_path() -> String {
    "/start_evaluation".to_string()
}

fn default_status_path() -> String {
    "/status".to_string()
}

fn default_results_exist_path() -> String {
    "/check_results_exist".to_string()
}

fn default_results_path() -> String {
    "/results".to_string()
}

fn default_poll_interval_ms() -> u64 {
    2000
}

fn default_max_retries() -> u32 {
    3
}

fn default_animation_ms() -> u64 {
    500
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_vars(std::env::vars())
    }

    pub fn from_vars<I>(vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let config: Self = envy::from_iter(vars)?;
        config.validate()?;
        Ok(config)
    }

    pub fn endpoints(&self) -> JobEndpoints {
        JobEndpoints::new(
            &self.backend_url,
            &self.start_path,
            &self.status_path,
            &self.results_exist_path,
            &self.results_path,
        )
    }

    pub fn poll_settings(&self) -> PollSettings {
        PollSettings {
            interval: Duration::from_millis(self.poll_interval_ms),
            max_retries: self.max_retries,
            animation: Duration::from_millis(self.animation_ms),
        }
    }

    /// Parse the configured start payload.
    pub fn payload(&self) -> Result<Option<serde_json::Value>, ConfigError> {
        self.job_payload
            .as_deref()
            .filter(|raw| !raw.trim().is_empty())
            .map(serde_json::from_str::<serde_json::Value>)
            .transpose()
            .map_err(ConfigError::Payload)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read configuration from environment: {0}")]
    Env(#[from] envy::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(#[from] garde::Report),

    #[error("JOB_PAYLOAD is not valid JSON: {0}")]
    Payload(#[source] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults() {
        let config = AppConfig::from_vars(vars(&[("BACKEND_URL", "http://127.0.0.1:5000")])).unwrap();
        assert_eq!(config.poll_settings(), PollSettings::default());
        assert_eq!(config.endpoints(), JobEndpoints::evaluation("http://127.0.0.1:5000"));
        assert!(config.payload().unwrap().is_none());
        assert!(config.metrics_bind_addr.is_none());
    }

    #[test]
    fn test_overrides() {
        let config = AppConfig::from_vars(vars(&[
            ("BACKEND_URL", "http://ocr.local"),
            ("STATUS_PATH", "/api/ocr/status"),
            ("POLL_INTERVAL_MS", "1000"),
            ("MAX_RETRIES", "5"),
            ("ANIMATION_MS", "0"),
            ("JOB_PAYLOAD", r#"{"video_id": "dQw4w9WgXcQ"}"#),
        ]))
        .unwrap();

        let settings = config.poll_settings();
        assert_eq!(settings.interval, Duration::from_millis(1000));
        assert_eq!(settings.max_retries, 5);
        assert_eq!(settings.animation, Duration::ZERO);
        assert_eq!(config.endpoints().status, "http://ocr.local/api/ocr/status");
        assert_eq!(
            config.payload().unwrap(),
            Some(serde_json::json!({"video_id": "dQw4w9WgXcQ"}))
        );
    }

    #[test]
    fn test_missing_backend_url() {
        let err = AppConfig::from_vars(vars(&[])).unwrap_err();
        assert!(matches!(err, ConfigError::Env(_)));
    }

    #[test]
    fn test_zero_interval_rejected() {
        let err = AppConfig::from_vars(vars(&[
            ("BACKEND_URL", "http://127.0.0.1:5000"),
            ("POLL_INTERVAL_MS", "0"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_bad_payload() {
        let config = AppConfig::from_vars(vars(&[
            ("BACKEND_URL", "http://127.0.0.1:5000"),
            ("JOB_PAYLOAD", "{not json"),
        ]))
        .unwrap();
        assert!(matches!(config.payload(), Err(ConfigError::Payload(_))));
    }
}

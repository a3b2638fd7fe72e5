use std::future::Future;

use reqwest::{Client, Response};
use serde::de::DeserializeOwned;

use crate::models::job::{JobStatus, ResultsExist, StartResponse};

/// The four calls a job poller needs from its backend.
pub trait JobBackend: Send + Sync + 'static {
    /// Ask the backend to start a job.
    fn start_job(
        &self,
        payload: Option<&serde_json::Value>,
    ) -> impl Future<Output = Result<StartResponse, BackendError>> + Send;

    /// Fetch the current status of the running job.
    fn fetch_status(&self) -> impl Future<Output = Result<JobStatus, BackendError>> + Send;

    /// Whether results from an earlier run are available.
    fn results_exist(&self) -> impl Future<Output = Result<bool, BackendError>> + Send;

    /// Fetch the rendered results of the last finished job.
    fn fetch_results(&self) -> impl Future<Output = Result<String, BackendError>> + Send;
}

/// Absolute URLs of the backend calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobEndpoints {
    pub start: String,
    pub status: String,
    pub results_exist: String,
    pub results: String,
}

impl JobEndpoints {
    /// Join the given paths onto a base URL.
    pub fn new(
        base_url: &str,
        start: &str,
        status: &str,
        results_exist: &str,
        results: &str,
    ) -> Self {
        let base = base_url.trim_end_matches('/');
        let join = |path: &str| format!("{}/{}", base, path.trim_start_matches('/'));
        Self {
            start: join(start),
            status: join(status),
            results_exist: join(results_exist),
            results: join(results),
        }
    }

    /// Endpoints of the evaluation service.
    pub fn evaluation(base_url: &str) -> Self {
        Self::new(
            base_url,
            "/start_evaluation",
            "/status",
            "/check_results_exist",
            "/results",
        )
    }
}

/// HTTP client for a job backend.
pub struct HttpBackend {
    http: Client,
    endpoints: JobEndpoints,
}

impl HttpBackend {
    pub fn new(endpoints: JobEndpoints) -> Self {
        Self {
            http: Client::new(),
            endpoints,
        }
    }

    pub fn endpoints(&self) -> &JobEndpoints {
        &self.endpoints
    }

    async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T, BackendError> {
        let response = Self::check_status(response).await?;
        let body = response.bytes().await.map_err(BackendError::Http)?;
        serde_json::from_slice(&body).map_err(BackendError::Decode)
    }

    async fn check_status(response: Response) -> Result<Response, BackendError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(BackendError::Status {
            status: status.as_u16(),
            message: server_message(&body),
        })
    }
}

impl JobBackend for HttpBackend {
    async fn start_job(
        &self,
        payload: Option<&serde_json::Value>,
    ) -> Result<StartResponse, BackendError> {
        let mut request = self.http.post(&self.endpoints.start);
        if let Some(payload) = payload {
            request = request.json(payload);
        }

        let response = request.send().await.map_err(BackendError::Http)?;
        Self::read_json(response).await
    }

    async fn fetch_status(&self) -> Result<JobStatus, BackendError> {
        let response = self
            .http
            .get(&self.endpoints.status)
            .send()
            .await
            .map_err(BackendError::Http)?;
        Self::read_json(response).await
    }

    async fn results_exist(&self) -> Result<bool, BackendError> {
        let response = self
            .http
            .get(&self.endpoints.results_exist)
            .send()
            .await
            .map_err(BackendError::Http)?;
        let body: ResultsExist = Self::read_json(response).await?;
        Ok(body.exists)
    }

    async fn fetch_results(&self) -> Result<String, BackendError> {
        let response = self
            .http
            .get(&self.endpoints.results)
            .send()
            .await
            .map_err(BackendError::Http)?;
        let response = Self::check_status(response).await?;
        response.text().await.map_err(BackendError::Http)
    }
}

/// Pull a human-readable message out of an error body.
///
/// Backends answer failures with `{"message": ...}` or `{"error": ...}`.
fn server_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    ["message", "error"]
        .iter()
        .find_map(|key| value.get(key).and_then(|v| v.as_str()))
        .filter(|m| !m.is_empty())
        .map(str::to_string)
}

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Server responded with status: {status}")]
    Status { status: u16, message: Option<String> },

    #[error("Malformed response: {0}")]
    Decode(#[from] serde_json::Error),
}

impl BackendError {
    /// Message supplied by the server, if any.
    pub fn server_message(&self) -> Option<&str> {
        match self {
            Self::Status { message, .. } => message.as_deref(),
            _ => None,
        }
    }
}

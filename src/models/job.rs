use serde::{Deserialize, Deserializer, Serialize};

/// Status document returned by the backend on each poll.
///
/// Every field is optional on the wire. `progress` accepts any JSON value and
/// keeps it only when it is a finite number; anything else means the job is
/// in an indeterminate state. `complete` reads `null` as false. Backends
/// without a results endpoint (OCR) deliver the output in `result` of the
/// completing document.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct JobStatus {
    #[serde(default, deserialize_with = "lenient_progress")]
    pub progress: Option<f64>,

    #[serde(default)]
    pub message: Option<String>,

    #[serde(default, deserialize_with = "lenient_flag")]
    pub complete: bool,

    #[serde(default)]
    pub error: Option<String>,

    #[serde(default)]
    pub running: Option<bool>,

    #[serde(default)]
    pub result: Option<serde_json::Value>,
}

impl JobStatus {
    /// Status of a job that is still running with a known percentage.
    pub fn running(progress: f64) -> Self {
        Self {
            progress: Some(progress),
            running: Some(true),
            ..Default::default()
        }
    }

    /// Status of a finished job.
    pub fn completed() -> Self {
        Self {
            progress: Some(100.0),
            complete: true,
            ..Default::default()
        }
    }

    /// Status of a job the backend reports as failed.
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            running: Some(false),
            ..Default::default()
        }
    }
}

fn lenient_progress<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(value
        .as_ref()
        .and_then(serde_json::Value::as_f64)
        .filter(|p| p.is_finite()))
}

fn lenient_flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<bool>::deserialize(deserializer)?.unwrap_or(false))
}

/// Response to the job start request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StartResponse {
    #[serde(default)]
    pub status: Option<String>,

    #[serde(default)]
    pub message: Option<String>,
}

impl StartResponse {
    pub fn is_started(&self) -> bool {
        self.status.as_deref() == Some("started")
    }
}

/// Response to the prior-results check.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ResultsExist {
    #[serde(default)]
    pub exists: bool,
}

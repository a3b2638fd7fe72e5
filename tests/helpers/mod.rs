//! Test backends for poller tests

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::Html;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::sync::Notify;

use job_poller::models::job::{JobStatus, StartResponse};
use job_poller::services::backend::{BackendError, JobBackend};
use job_poller::services::poller::{JobOutcome, PollObserver, PollSettings, PollerSnapshot};

/// Settings used by the paused-clock tests.
pub fn test_settings() -> PollSettings {
    PollSettings {
        interval: Duration::from_millis(2000),
        max_retries: 3,
        animation: Duration::from_millis(500),
    }
}

/// How the scripted backend answers the start request.
#[derive(Debug, Clone)]
pub enum StartReply {
    Started,
    Rejected(String),
    HttpError(u16, Option<String>),
}

/// One scripted answer of the status endpoint.
#[derive(Debug, Clone)]
pub enum Step {
    Status(JobStatus),
    Fail(u16),
    /// Answer only after the gate is notified.
    Hold(Arc<Notify>, JobStatus),
}

/// In-memory backend replaying a fixed script of status answers.
///
/// Once the script runs out every poll returns `idle`.
pub struct ScriptedBackend {
    start: StartReply,
    steps: Mutex<VecDeque<Step>>,
    idle: JobStatus,
    start_calls: AtomicUsize,
    status_calls: AtomicUsize,
}

impl ScriptedBackend {
    pub fn new(start: StartReply, steps: Vec<Step>) -> Self {
        Self {
            start,
            steps: Mutex::new(steps.into()),
            idle: JobStatus {
                running: Some(true),
                ..Default::default()
            },
            start_calls: AtomicUsize::new(0),
            status_calls: AtomicUsize::new(0),
        }
    }

    pub fn started(steps: Vec<Step>) -> Self {
        Self::new(StartReply::Started, steps)
    }

    pub fn with_idle(mut self, idle: JobStatus) -> Self {
        self.idle = idle;
        self
    }

    pub fn start_calls(&self) -> usize {
        self.start_calls.load(Ordering::SeqCst)
    }

    pub fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }
}

impl JobBackend for ScriptedBackend {
    async fn start_job(&self, _payload: Option<&Value>) -> Result<StartResponse, BackendError> {
        self.start_calls.fetch_add(1, Ordering::SeqCst);
        match &self.start {
            StartReply::Started => Ok(StartResponse {
                status: Some("started".into()),
                message: None,
            }),
            StartReply::Rejected(message) => Ok(StartResponse {
                status: Some("error".into()),
                message: Some(message.clone()),
            }),
            StartReply::HttpError(status, message) => Err(BackendError::Status {
                status: *status,
                message: message.clone(),
            }),
        }
    }

    async fn fetch_status(&self) -> Result<JobStatus, BackendError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        let step = self.steps.lock().unwrap().pop_front();
        match step {
            Some(Step::Status(status)) => Ok(status),
            Some(Step::Fail(status)) => Err(BackendError::Status {
                status,
                message: None,
            }),
            Some(Step::Hold(gate, status)) => {
                gate.notified().await;
                Ok(status)
            }
            None => Ok(self.idle.clone()),
        }
    }

    async fn results_exist(&self) -> Result<bool, BackendError> {
        Ok(false)
    }

    async fn fetch_results(&self) -> Result<String, BackendError> {
        Ok(String::new())
    }
}

/// Observer that records every event it sees. Clones share the record.
#[derive(Clone, Default)]
pub struct RecordingObserver {
    progress: Arc<Mutex<Vec<PollerSnapshot>>>,
    retries: Arc<Mutex<Vec<(u32, u32)>>>,
    terminal: Arc<Mutex<Vec<JobOutcome>>>,
}

impl RecordingObserver {
    pub fn progress(&self) -> Vec<PollerSnapshot> {
        self.progress.lock().unwrap().clone()
    }

    pub fn retries(&self) -> Vec<(u32, u32)> {
        self.retries.lock().unwrap().clone()
    }

    pub fn terminal(&self) -> Vec<JobOutcome> {
        self.terminal.lock().unwrap().clone()
    }
}

impl PollObserver for RecordingObserver {
    fn on_progress(&self, snapshot: &PollerSnapshot) {
        self.progress.lock().unwrap().push(snapshot.clone());
    }

    fn on_retry(&self, attempt: u32, max_retries: u32, _reason: &str) {
        self.retries.lock().unwrap().push((attempt, max_retries));
    }

    fn on_terminal(&self, outcome: &JobOutcome) {
        self.terminal.lock().unwrap().push(outcome.clone());
    }
}

/// Scripted HTTP evaluation service.
#[derive(Default)]
pub struct FakeService {
    pub start: Option<(StatusCode, Value)>,
    pub statuses: VecDeque<(StatusCode, String)>,
    pub exists: bool,
    pub results: String,
    pub status_hits: usize,
}

pub type SharedService = Arc<Mutex<FakeService>>;

impl FakeService {
    pub fn with_statuses(statuses: Vec<(StatusCode, Value)>) -> Self {
        Self {
            statuses: statuses
                .into_iter()
                .map(|(code, body)| (code, body.to_string()))
                .collect(),
            ..Default::default()
        }
    }
}

async fn start_evaluation(State(service): State<SharedService>) -> (StatusCode, Json<Value>) {
    let service = service.lock().unwrap();
    service
        .start
        .clone()
        .map(|(code, body)| (code, Json(body)))
        .unwrap_or((StatusCode::OK, Json(json!({"status": "started"}))))
}

async fn status(
    State(service): State<SharedService>,
) -> (StatusCode, [(header::HeaderName, &'static str); 1], String) {
    let mut service = service.lock().unwrap();
    service.status_hits += 1;
    let (code, body) = if service.statuses.len() > 1 {
        service.statuses.pop_front().unwrap()
    } else {
        service
            .statuses
            .front()
            .cloned()
            .unwrap_or((StatusCode::OK, json!({"running": true}).to_string()))
    };
    (code, [(header::CONTENT_TYPE, "application/json")], body)
}

async fn check_results_exist(State(service): State<SharedService>) -> Json<Value> {
    Json(json!({"exists": service.lock().unwrap().exists}))
}

async fn results(State(service): State<SharedService>) -> Html<String> {
    Html(service.lock().unwrap().results.clone())
}

/// Serve `service` on an ephemeral port and return its base URL.
pub async fn spawn_service(service: SharedService) -> String {
    let app = Router::new()
        .route("/start_evaluation", post(start_evaluation))
        .route("/status", get(status))
        .route("/check_results_exist", get(check_results_exist))
        .route("/results", get(results))
        .with_state(service);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

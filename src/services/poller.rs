use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::models::job::JobStatus;
use crate::services::backend::{BackendError, JobBackend};
use crate::services::progress::{
    ProgressAnimation, ProgressIndicator, ProgressTracker, DEFAULT_ANIMATION,
};

/// Default delay between two status polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(2000);

/// Consecutive transport failures tolerated before the job is given up.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Per use site polling parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    pub interval: Duration,
    pub max_retries: u32,
    pub animation: Duration,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            max_retries: DEFAULT_MAX_RETRIES,
            animation: DEFAULT_ANIMATION,
        }
    }
}

/// Lifecycle phase of a polled job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum Phase {
    Idle,
    Starting,
    Running,
    Succeeded,
    Failed,
}

impl Phase {
    fn rank(self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::Starting => 1,
            Self::Running => 2,
            Self::Succeeded | Self::Failed => 3,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    pub fn is_active(self) -> bool {
        matches!(self, Self::Starting | Self::Running)
    }
}

/// Why a job ended without success.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JobFailure {
    /// The status endpoint stayed unreachable past the retry budget.
    #[error("Failed to check status: {message}")]
    PollTransport { attempts: u32, message: String },

    /// The backend reported the job as failed.
    #[error("{0}")]
    Job(String),

    /// The backend stopped running the job without reporting an outcome.
    #[error("Job stopped unexpectedly")]
    UnexpectedStop,
}

impl JobFailure {
    /// Short label for metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::PollTransport { .. } => "transport",
            Self::Job(_) => "job",
            Self::UnexpectedStop => "unexpected_stop",
        }
    }
}

/// Final result of a polled job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Succeeded,
    Failed(JobFailure),
    Cancelled,
}

/// The start request did not produce a running job.
#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error("{0}")]
    Rejected(String),

    #[error("Error: {0}")]
    Transport(#[source] BackendError),
}

impl From<BackendError> for SubmitError {
    fn from(err: BackendError) -> Self {
        match err.server_message() {
            Some(message) => Self::Rejected(message.to_string()),
            None => Self::Transport(err),
        }
    }
}

/// What one poll did to the job.
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    /// Progress or message updated; keep polling.
    Continue,
    /// Transport failure within the retry budget; keep polling.
    Retrying { attempt: u32, max_retries: u32 },
    /// The job reached a terminal outcome; polling stops.
    Finished(JobOutcome),
    /// The job was no longer running when the response arrived.
    Discarded,
}

/// Published view of a job, sampled by renderers.
#[derive(Debug, Clone, PartialEq)]
pub struct PollerSnapshot {
    pub phase: Phase,
    pub progress: f64,
    pub indicator: ProgressIndicator,
    pub animation: Option<ProgressAnimation>,
    pub message: Option<String>,
    pub retry_count: u32,
    pub outcome: Option<JobOutcome>,
    /// Output delivered inline by the completing status document.
    pub result: Option<serde_json::Value>,
}

impl PollerSnapshot {
    /// Progress value to draw at `now`.
    pub fn displayed_at(&self, now: Instant) -> f64 {
        match self.animation {
            Some(animation) => animation.value_at(now),
            None => self.progress,
        }
    }
}

/// Client-side state of one job.
///
/// Phases only move forward, except that cancelling an active job drops it
/// back to `Idle`. Responses applied outside `Running` are discarded.
#[derive(Debug, Clone)]
pub struct PollerState {
    phase: Phase,
    progress: ProgressTracker,
    retry_count: u32,
    message: Option<String>,
    outcome: Option<JobOutcome>,
    result: Option<serde_json::Value>,
}

impl Default for PollerState {
    fn default() -> Self {
        Self::new(DEFAULT_ANIMATION)
    }
}

impl PollerState {
    pub fn new(animation: Duration) -> Self {
        Self {
            phase: Phase::Idle,
            progress: ProgressTracker::new(animation),
            retry_count: 0,
            message: None,
            outcome: None,
            result: None,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn progress(&self) -> &ProgressTracker {
        &self.progress
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn outcome(&self) -> Option<&JobOutcome> {
        self.outcome.as_ref()
    }

    pub fn result(&self) -> Option<&serde_json::Value> {
        self.result.as_ref()
    }

    fn advance(&mut self, next: Phase) -> bool {
        if next.rank() > self.phase.rank() {
            self.phase = next;
            true
        } else {
            false
        }
    }

    /// Enter `Running` after the backend accepted the job.
    pub fn start(&mut self) -> bool {
        if self.phase != Phase::Idle || self.outcome.is_some() {
            return false;
        }
        self.advance(Phase::Starting) && self.advance(Phase::Running)
    }

    /// Apply a successfully fetched status document.
    pub fn apply_status(&mut self, status: &JobStatus, now: Instant) -> PollOutcome {
        if self.phase != Phase::Running {
            return PollOutcome::Discarded;
        }

        self.retry_count = 0;
        if let Some(message) = &status.message {
            self.message = Some(message.clone());
        }

        if let Some(error) = status.error.as_deref().filter(|e| !e.is_empty()) {
            return self.finish(JobOutcome::Failed(JobFailure::Job(error.to_string())));
        }

        if status.complete {
            self.result = status.result.clone();
            self.progress.snap(100.0);
            return self.finish(JobOutcome::Succeeded);
        }

        if status.running == Some(false) {
            return self.finish(JobOutcome::Failed(JobFailure::UnexpectedStop));
        }

        match status.progress {
            Some(progress) => self.progress.advance_to(progress, now),
            None => self.progress.mark_indeterminate(),
        }
        PollOutcome::Continue
    }

    /// Apply a failed status fetch.
    pub fn apply_transport_failure(&mut self, reason: &str, max_retries: u32) -> PollOutcome {
        if self.phase != Phase::Running {
            return PollOutcome::Discarded;
        }

        self.retry_count += 1;
        if self.retry_count <= max_retries {
            return PollOutcome::Retrying {
                attempt: self.retry_count,
                max_retries,
            };
        }

        self.finish(JobOutcome::Failed(JobFailure::PollTransport {
            attempts: self.retry_count,
            message: reason.to_string(),
        }))
    }

    /// Abandon an active job. Returns false when there was nothing to cancel.
    pub fn cancel(&mut self) -> bool {
        if !self.phase.is_active() {
            return false;
        }
        self.phase = Phase::Idle;
        self.outcome = Some(JobOutcome::Cancelled);
        true
    }

    fn finish(&mut self, outcome: JobOutcome) -> PollOutcome {
        let next = match outcome {
            JobOutcome::Succeeded => Phase::Succeeded,
            _ => Phase::Failed,
        };
        self.advance(next);
        self.outcome = Some(outcome.clone());
        PollOutcome::Finished(outcome)
    }

    pub fn snapshot(&self) -> PollerSnapshot {
        PollerSnapshot {
            phase: self.phase,
            progress: self.progress.target(),
            indicator: self.progress.indicator(),
            animation: self.progress.animation(),
            message: self.message.clone(),
            retry_count: self.retry_count,
            outcome: self.outcome.clone(),
            result: self.result.clone(),
        }
    }
}

/// Hooks through which a renderer follows a job.
pub trait PollObserver: Send + Sync {
    fn on_progress(&self, _snapshot: &PollerSnapshot) {}

    fn on_retry(&self, _attempt: u32, _max_retries: u32, _reason: &str) {}

    fn on_terminal(&self, _outcome: &JobOutcome) {}
}

/// Observer that ignores every event.
pub struct NoopObserver;

impl PollObserver for NoopObserver {}

/// Caller-side handle on a submitted job.
#[derive(Debug, Clone)]
pub struct JobHandle {
    id: Uuid,
    submitted_at: DateTime<Utc>,
    cancel: CancellationToken,
    snapshots: watch::Receiver<PollerSnapshot>,
}

impl JobHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn submitted_at(&self) -> DateTime<Utc> {
        self.submitted_at
    }

    /// Stop polling. Safe to call any number of times.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn snapshot(&self) -> PollerSnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn phase(&self) -> Phase {
        self.snapshots.borrow().phase
    }

    pub fn subscribe(&self) -> watch::Receiver<PollerSnapshot> {
        self.snapshots.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.snapshots.borrow().outcome.is_some()
    }

    /// Inline output of a completed job, if the backend sent one.
    pub fn result(&self) -> Option<serde_json::Value> {
        self.snapshots.borrow().result.clone()
    }

    /// Wait for the job to reach a terminal outcome.
    pub async fn wait(&self) -> JobOutcome {
        let mut rx = self.snapshots.clone();
        let finished = rx
            .wait_for(|s| s.outcome.is_some())
            .await
            .ok()
            .and_then(|snapshot| snapshot.outcome.clone());
        // Sender gone without an outcome means the poll task died.
        finished
            .or_else(|| rx.borrow().outcome.clone())
            .unwrap_or(JobOutcome::Cancelled)
    }

    /// Wait for the outcome, cancelling the job once `interrupt` resolves.
    ///
    /// `interrupt` is created once and polled until it fires, so a signal
    /// arriving between polls is not lost.
    pub async fn cancel_on<F: Future>(&self, interrupt: F) -> JobOutcome {
        let finished = self.wait();
        tokio::pin!(finished, interrupt);

        tokio::select! {
            outcome = &mut finished => return outcome,
            _ = &mut interrupt => {
                tracing::warn!(job_id = %self.id, "Interrupted, cancelling job");
                self.cancel();
            }
        }
        finished.await
    }
}

/// Submits jobs to one backend and polls each to completion.
///
/// At most one job is active per poller; submitting again or dropping the
/// poller cancels the active one.
pub struct AsyncJobPoller<B: JobBackend> {
    backend: Arc<B>,
    settings: PollSettings,
    observer: Arc<dyn PollObserver>,
    active: Option<JobHandle>,
}

impl<B: JobBackend> AsyncJobPoller<B> {
    pub fn new(backend: B, settings: PollSettings) -> Self {
        Self::with_shared(Arc::new(backend), settings)
    }

    pub fn with_shared(backend: Arc<B>, settings: PollSettings) -> Self {
        Self {
            backend,
            settings,
            observer: Arc::new(NoopObserver),
            active: None,
        }
    }

    pub fn with_observer(mut self, observer: impl PollObserver + 'static) -> Self {
        self.observer = Arc::new(observer);
        self
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn settings(&self) -> PollSettings {
        self.settings
    }

    pub fn active(&self) -> Option<&JobHandle> {
        self.active.as_ref()
    }

    /// Phase of the active job, `Idle` when there is none.
    pub fn phase(&self) -> Phase {
        self.active.as_ref().map_or(Phase::Idle, JobHandle::phase)
    }

    /// Start a job on the backend and begin polling it.
    pub async fn submit(
        &mut self,
        payload: Option<serde_json::Value>,
    ) -> Result<JobHandle, SubmitError> {
        self.cancel();

        let id = Uuid::new_v4();
        let response = self.backend.start_job(payload.as_ref()).await.map_err(|e| {
            tracing::warn!(job_id = %id, error = %e, "Job start request failed");
            SubmitError::from(e)
        })?;

        if !response.is_started() {
            let message = response
                .message
                .unwrap_or_else(|| "Failed to start job".to_string());
            tracing::warn!(job_id = %id, message = %message, "Backend rejected job");
            return Err(SubmitError::Rejected(message));
        }
        metrics::counter!("job_poller_jobs_submitted").increment(1);

        let mut state = PollerState::new(self.settings.animation);
        state.start();
        tracing::info!(
            job_id = %id,
            interval_ms = self.settings.interval.as_millis() as u64,
            max_retries = self.settings.max_retries,
            "Job started, polling status"
        );

        let (publisher, snapshots) = watch::channel(state.snapshot());
        let cancel = CancellationToken::new();
        let session = JobSession {
            id,
            backend: Arc::clone(&self.backend),
            settings: self.settings,
            observer: Arc::clone(&self.observer),
            state,
            publisher,
            started: Instant::now(),
        };
        tokio::spawn(session.run(cancel.clone()));

        let handle = JobHandle {
            id,
            submitted_at: Utc::now(),
            cancel,
            snapshots,
        };
        self.active = Some(handle.clone());
        Ok(handle)
    }

    /// Cancel the active job, if any. Idempotent.
    pub fn cancel(&mut self) {
        if let Some(handle) = self.active.take() {
            handle.cancel();
        }
    }
}

impl<B: JobBackend> Drop for AsyncJobPoller<B> {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Poll loop of one job. Owns the job's state and its timer.
struct JobSession<B> {
    id: Uuid,
    backend: Arc<B>,
    settings: PollSettings,
    observer: Arc<dyn PollObserver>,
    state: PollerState,
    publisher: watch::Sender<PollerSnapshot>,
    started: Instant,
}

impl<B: JobBackend> JobSession<B> {
    async fn run(mut self, cancel: CancellationToken) -> JobOutcome {
        loop {
            let polled = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                outcome = self.poll() => Some(outcome),
            };
            let Some(outcome) = polled else {
                return self.cancelled();
            };
            if let PollOutcome::Finished(outcome) = outcome {
                return outcome;
            }

            let slept = tokio::select! {
                biased;
                _ = cancel.cancelled() => false,
                _ = tokio::time::sleep(self.settings.interval) => true,
            };
            if !slept {
                return self.cancelled();
            }
        }
    }

    async fn poll(&mut self) -> PollOutcome {
        metrics::counter!("job_poller_polls_total").increment(1);

        let outcome = match self.backend.fetch_status().await {
            Ok(status) => {
                let now = tokio::time::Instant::now().into_std();
                self.state.apply_status(&status, now)
            }
            Err(e) => {
                metrics::counter!("job_poller_transport_failures_total").increment(1);
                let reason = e.to_string();
                let outcome = self
                    .state
                    .apply_transport_failure(&reason, self.settings.max_retries);
                if let PollOutcome::Retrying { attempt, max_retries } = outcome {
                    tracing::warn!(
                        job_id = %self.id,
                        attempt,
                        max_retries,
                        error = %reason,
                        "Status check failed, retrying"
                    );
                    self.observer.on_retry(attempt, max_retries, &reason);
                }
                outcome
            }
        };

        self.publish();
        match &outcome {
            PollOutcome::Continue => {
                let snapshot = self.state.snapshot();
                tracing::debug!(
                    job_id = %self.id,
                    progress = %snapshot.indicator,
                    message = snapshot.message.as_deref().unwrap_or(""),
                    "Job progress"
                );
                self.observer.on_progress(&snapshot);
            }
            PollOutcome::Finished(finished) => self.finish(finished),
            PollOutcome::Retrying { .. } | PollOutcome::Discarded => {}
        }
        outcome
    }

    fn finish(&self, outcome: &JobOutcome) {
        let elapsed = self.started.elapsed();
        metrics::histogram!("job_poller_job_seconds").record(elapsed.as_secs_f64());

        match outcome {
            JobOutcome::Succeeded => {
                metrics::counter!("job_poller_jobs_completed").increment(1);
                tracing::info!(
                    job_id = %self.id,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Job completed successfully"
                );
            }
            JobOutcome::Failed(failure) => {
                metrics::counter!("job_poller_jobs_failed", "reason" => failure.reason())
                    .increment(1);
                tracing::error!(
                    job_id = %self.id,
                    reason = failure.reason(),
                    error = %failure,
                    "Job failed"
                );
            }
            JobOutcome::Cancelled => {
                metrics::counter!("job_poller_jobs_cancelled").increment(1);
                tracing::info!(job_id = %self.id, "Job cancelled");
            }
        }

        self.observer.on_progress(&self.state.snapshot());
        self.observer.on_terminal(outcome);
    }

    fn cancelled(&mut self) -> JobOutcome {
        if self.state.cancel() {
            self.publish();
            self.finish(&JobOutcome::Cancelled);
        }
        self.state
            .outcome()
            .cloned()
            .unwrap_or(JobOutcome::Cancelled)
    }

    fn publish(&self) {
        self.publisher.send_replace(self.state.snapshot());
    }
}

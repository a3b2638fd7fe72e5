use std::net::SocketAddr;
use std::process::ExitCode;
use std::time::{Duration, Instant};

use metrics_exporter_prometheus::PrometheusBuilder;
use tracing_subscriber::EnvFilter;

use job_poller::config::AppConfig;
use job_poller::services::backend::{HttpBackend, JobBackend};
use job_poller::services::poller::{
    AsyncJobPoller, JobHandle, JobOutcome, PollObserver, PollerSnapshot,
};
use job_poller::services::progress::ProgressIndicator;

const FRAME_INTERVAL: Duration = Duration::from_millis(50);
const BAR_WIDTH: usize = 30;

/// Prints retry notices on stderr, below the progress line.
struct ConsoleObserver;

impl PollObserver for ConsoleObserver {
    fn on_retry(&self, attempt: u32, max_retries: u32, _reason: &str) {
        eprintln!("\nConnection issue, retrying ({attempt}/{max_retries})...");
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .with_writer(std::io::stderr)
        .init();

    // Load configuration from environment
    let config = AppConfig::from_env().expect("Failed to load configuration from environment");
    let payload = config.payload().expect("Failed to parse job payload");

    if let Some(addr) = config.metrics_bind_addr.as_deref() {
        install_metrics(addr);
    }

    let backend = HttpBackend::new(config.endpoints());
    tracing::info!(
        start = %backend.endpoints().start,
        status = %backend.endpoints().status,
        "Initializing job poller"
    );

    match backend.results_exist().await {
        Ok(true) => tracing::info!("Previous results are available"),
        Ok(false) => tracing::info!("No previous results found"),
        Err(e) => tracing::warn!(error = %e, "Could not check for existing results"),
    }

    let mut poller =
        AsyncJobPoller::new(backend, config.poll_settings()).with_observer(ConsoleObserver);

    let handle = match poller.submit(payload).await {
        Ok(handle) => handle,
        Err(e) => {
            eprintln!("Failed to start job: {e}");
            return ExitCode::FAILURE;
        }
    };

    match follow(&handle).await {
        JobOutcome::Succeeded => match handle.result() {
            Some(result) => {
                println!("{}", render_result(&result));
                ExitCode::SUCCESS
            }
            None => match poller.backend().fetch_results().await {
                Ok(results) => {
                    println!("{results}");
                    ExitCode::SUCCESS
                }
                Err(e) => {
                    tracing::error!(job_id = %handle.id(), error = %e, "Failed to fetch results");
                    eprintln!("Job completed but results could not be fetched: {e}");
                    ExitCode::FAILURE
                }
            },
        },
        JobOutcome::Failed(failure) => {
            eprintln!("Job failed: {failure}");
            ExitCode::FAILURE
        }
        JobOutcome::Cancelled => {
            eprintln!("Job cancelled");
            ExitCode::from(130)
        }
    }
}

/// Render progress frames until the job ends. Ctrl-C cancels the job.
async fn follow(handle: &JobHandle) -> JobOutcome {
    let mut frames = tokio::time::interval(FRAME_INTERVAL);
    let finished = handle.cancel_on(tokio::signal::ctrl_c());
    tokio::pin!(finished);

    loop {
        tokio::select! {
            outcome = &mut finished => {
                eprintln!("{}", render_frame(&handle.snapshot(), Instant::now()));
                return outcome;
            }
            _ = frames.tick() => {
                eprint!("{}", render_frame(&handle.snapshot(), Instant::now()));
            }
        }
    }
}

fn render_frame(snapshot: &PollerSnapshot, now: Instant) -> String {
    let message = snapshot.message.as_deref().unwrap_or("");
    match snapshot.indicator {
        ProgressIndicator::Indeterminate => {
            format!("\r[{}] processing... {message}", "~".repeat(BAR_WIDTH))
        }
        ProgressIndicator::Percent(_) => {
            let displayed = snapshot.displayed_at(now);
            let filled = ((displayed / 100.0) * BAR_WIDTH as f64).round() as usize;
            format!(
                "\r[{}{}] {} {message}",
                "#".repeat(filled.min(BAR_WIDTH)),
                " ".repeat(BAR_WIDTH - filled.min(BAR_WIDTH)),
                ProgressIndicator::from_value(displayed),
            )
        }
    }
}

/// Strings print as-is, anything else as pretty JSON.
fn render_result(result: &serde_json::Value) -> String {
    match result {
        serde_json::Value::String(text) => text.clone(),
        other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
    }
}

fn install_metrics(addr: &str) {
    let addr: SocketAddr = match addr.parse() {
        Ok(addr) => addr,
        Err(e) => {
            tracing::warn!(addr, error = %e, "Invalid metrics bind address, metrics disabled");
            return;
        }
    };

    if let Err(e) = PrometheusBuilder::new().with_http_listener(addr).install() {
        tracing::warn!(error = %e, "Failed to install Prometheus metrics exporter");
        return;
    }

    metrics::describe_counter!("job_poller_jobs_submitted", "Jobs accepted by the backend");
    metrics::describe_counter!("job_poller_polls_total", "Status polls issued");
    metrics::describe_counter!(
        "job_poller_transport_failures_total",
        "Status polls that failed in transport"
    );
    metrics::describe_counter!("job_poller_jobs_completed", "Jobs that completed successfully");
    metrics::describe_counter!("job_poller_jobs_failed", "Jobs that ended in failure");
    metrics::describe_counter!("job_poller_jobs_cancelled", "Jobs cancelled before finishing");
    metrics::describe_histogram!(
        "job_poller_job_seconds",
        "Time from job start to terminal outcome"
    );

    tracing::info!(%addr, "Serving Prometheus metrics");
}

//! Async job poller
//!
//! Client-side driver for long-running backend jobs (evaluation grading, OCR,
//! video processing): submit a job, poll its status endpoint on an interval,
//! and turn the responses into a monotonic progress signal and a terminal
//! outcome.

pub mod config;
pub mod models;
pub mod services;

use std::fmt;
use std::time::{Duration, Instant};

/// Default duration of one progress transition.
pub const DEFAULT_ANIMATION: Duration = Duration::from_millis(500);

/// Clamp a progress value into [0, 100].
pub fn clamp_progress(value: f64) -> f64 {
    value.clamp(0.0, 100.0)
}

/// Linear interpolation from `from` to `to` after `elapsed` of `duration`.
///
/// The fraction is clamped to [0, 1], so the result always lands exactly on
/// `to` once the duration has passed.
pub fn interpolate(from: f64, to: f64, elapsed: Duration, duration: Duration) -> f64 {
    if duration.is_zero() {
        return to;
    }
    let fraction = (elapsed.as_secs_f64() / duration.as_secs_f64()).clamp(0.0, 1.0);
    if fraction >= 1.0 {
        to
    } else {
        from + fraction * (to - from)
    }
}

/// A single in-flight transition of the displayed progress value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressAnimation {
    pub from: f64,
    pub to: f64,
    pub started: Instant,
    pub duration: Duration,
}

impl ProgressAnimation {
    pub fn value_at(&self, now: Instant) -> f64 {
        interpolate(
            self.from,
            self.to,
            now.saturating_duration_since(self.started),
            self.duration,
        )
    }

    pub fn is_finished(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.started) >= self.duration
    }
}

/// What a progress bar should show.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ProgressIndicator {
    /// No numeric progress known; show a full-width pulsing bar.
    Indeterminate,
    /// Rounded percentage in [0, 100].
    Percent(u8),
}

impl ProgressIndicator {
    pub fn from_value(value: f64) -> Self {
        if value.is_finite() {
            Self::Percent(clamp_progress(value.round()) as u8)
        } else {
            Self::Indeterminate
        }
    }
}

impl fmt::Display for ProgressIndicator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Indeterminate => f.write_str("processing..."),
            Self::Percent(p) => write!(f, "{p}%"),
        }
    }
}

/// Displayed progress for one job.
///
/// `target` is the value the display converges to and never decreases.
/// The visual path toward it is described by `animation` and sampled by
/// whatever drives redraws.
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    target: f64,
    animation: Option<ProgressAnimation>,
    indeterminate: bool,
    duration: Duration,
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new(DEFAULT_ANIMATION)
    }
}

impl ProgressTracker {
    pub fn new(duration: Duration) -> Self {
        Self {
            target: 0.0,
            animation: None,
            indeterminate: false,
            duration,
        }
    }

    /// The converged displayed value.
    pub fn target(&self) -> f64 {
        self.target
    }

    pub fn animation(&self) -> Option<ProgressAnimation> {
        self.animation
    }

    pub fn is_indeterminate(&self) -> bool {
        self.indeterminate
    }

    pub fn indicator(&self) -> ProgressIndicator {
        if self.indeterminate {
            ProgressIndicator::Indeterminate
        } else {
            ProgressIndicator::from_value(self.target)
        }
    }

    /// Move toward a newly reported progress value.
    ///
    /// Values below the current target are ignored. Equal values and 100
    /// snap; anything else starts a transition from the value currently on
    /// screen.
    pub fn advance_to(&mut self, reported: f64, now: Instant) {
        if !reported.is_finite() {
            self.indeterminate = true;
            return;
        }
        self.indeterminate = false;

        let next = clamp_progress(reported);
        if next < self.target {
            return;
        }

        let on_screen = self.value_at(now);
        if next == on_screen || next == 100.0 {
            self.snap(next);
            return;
        }

        self.target = next;
        self.animation = Some(ProgressAnimation {
            from: on_screen,
            to: next,
            started: now,
            duration: self.duration,
        });
    }

    /// Set the displayed value immediately, without animation.
    pub fn snap(&mut self, value: f64) {
        self.target = clamp_progress(value);
        self.animation = None;
        self.indeterminate = false;
    }

    pub fn mark_indeterminate(&mut self) {
        self.indeterminate = true;
    }

    /// Value on screen at `now`.
    pub fn value_at(&self, now: Instant) -> f64 {
        match self.animation {
            Some(animation) => animation.value_at(now),
            None => self.target,
        }
    }

    /// Sample one frame, retiring the transition once it has finished.
    pub fn sample(&mut self, now: Instant) -> f64 {
        if let Some(animation) = self.animation {
            if animation.is_finished(now) {
                self.animation = None;
            }
        }
        self.value_at(now)
    }
}

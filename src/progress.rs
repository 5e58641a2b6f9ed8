//! Build progress reporting
//!
//! The index builder reports its phases through this trait so embedding
//! applications can surface progress without the core depending on any
//! particular UI. No timing guarantees are made.

use tracing::info;

/// Receiver for build-phase notifications.
pub trait ProgressTracker: Send + Sync {
    /// Enter a named phase. Phases may nest.
    fn push_phase(&self, name: &str);

    /// Leave the most recently pushed phase.
    fn pull_phase(&self);

    /// Report progress inside the current phase, in percent (0.0..=100.0).
    fn progress(&self, percent: f64);
}

/// Tracker that discards all notifications.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopProgressTracker;

impl ProgressTracker for NoopProgressTracker {
    fn push_phase(&self, _name: &str) {}
    fn pull_phase(&self) {}
    fn progress(&self, _percent: f64) {}
}

/// Tracker that forwards phase transitions to the `tracing` subscriber.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingProgressTracker;

impl ProgressTracker for LoggingProgressTracker {
    fn push_phase(&self, name: &str) {
        info!(phase = name, "phase started");
    }

    fn pull_phase(&self) {
        info!("phase finished");
    }

    fn progress(&self, percent: f64) {
        info!(percent, "progress");
    }
}

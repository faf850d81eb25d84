//! Run timing for the orchestrator's summary log.

use std::time::Duration;
use tokio::time::Instant;

/// Times one pipeline run and counts what happened to its stages.
///
/// Uses tokio's clock, so paused-time tests see exact durations.
#[derive(Debug)]
pub struct RunTimer {
    pipeline: String,
    start: Instant,
    executed: usize,
    skipped: usize,
}

/// The figures a finished [`RunTimer`] reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunTiming {
    /// Pipeline name.
    pub pipeline: String,
    /// Wall time from start to finish.
    pub elapsed: Duration,
    /// Stages whose `execute` was called.
    pub executed: usize,
    /// Stages recorded as skipped without running.
    pub skipped: usize,
}

impl RunTiming {
    /// Returns the elapsed time in fractional milliseconds.
    #[must_use]
    pub fn elapsed_ms(&self) -> f64 {
        self.elapsed.as_secs_f64() * 1000.0
    }
}

impl RunTimer {
    /// Starts timing `pipeline`.
    #[must_use]
    pub fn start(pipeline: impl Into<String>) -> Self {
        Self {
            pipeline: pipeline.into(),
            start: Instant::now(),
            executed: 0,
            skipped: 0,
        }
    }

    /// Counts a stage that ran.
    pub fn stage_executed(&mut self) {
        self.executed += 1;
    }

    /// Counts a stage that was skipped after a halt.
    pub fn stage_skipped(&mut self) {
        self.skipped += 1;
    }

    /// Returns the time since the run started.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Stops the timer.
    #[must_use]
    pub fn finish(self) -> RunTiming {
        RunTiming {
            elapsed: self.elapsed(),
            pipeline: self.pipeline,
            executed: self.executed,
            skipped: self.skipped,
        }
    }
}

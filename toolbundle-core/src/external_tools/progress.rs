//! Stage/percentage progress reporting.
//!
//! Progress is delivered synchronously through a [`ProgressSink`] on the task
//! that runs the operation. [`StageReporter`] owns the per-stage contract:
//! every stage starts at 0, percentages never go down, and 100 is emitted
//! exactly once, by [`StageReporter::finish`].

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};

use super::types::ExternalToolId;

/// Install pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressStage {
    Downloading,
    Extracting,
    Installing,
}

impl ProgressStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Downloading => "downloading",
            Self::Extracting => "extracting",
            Self::Installing => "installing",
        }
    }
}

impl fmt::Display for ProgressStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One progress notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressEvent {
    pub tool: ExternalToolId,
    pub stage: ProgressStage,
    /// 0 to 100.
    pub percent: u8,
}

/// Receives progress notifications.
pub trait ProgressSink: Send + Sync {
    fn on_progress(&self, event: ProgressEvent);
}

impl<F> ProgressSink for F
where
    F: Fn(ProgressEvent) + Send + Sync,
{
    fn on_progress(&self, event: ProgressEvent) {
        self(event)
    }
}

/// Computes an integer percentage, clamped to 0..=100.
pub fn percent_of(done: u64, total: u64) -> u8 {
    if total == 0 {
        return 0;
    }
    ((done.min(total) as u128 * 100) / total as u128) as u8
}

/// Enforces the per-stage progress contract on top of a sink.
pub struct StageReporter<'a> {
    sink: &'a dyn ProgressSink,
    tool: ExternalToolId,
    stage: ProgressStage,
    interval: Duration,
    last_percent: u8,
    last_emit: Instant,
    finished: bool,
}

impl<'a> StageReporter<'a> {
    /// Starts a stage and emits its 0% event.
    pub fn begin(
        sink: &'a dyn ProgressSink,
        tool: ExternalToolId,
        stage: ProgressStage,
        interval: Duration,
    ) -> Self {
        sink.on_progress(ProgressEvent {
            tool,
            stage,
            percent: 0,
        });
        Self {
            sink,
            tool,
            stage,
            interval,
            last_percent: 0,
            last_emit: Instant::now(),
            finished: false,
        }
    }

    /// Reports intermediate progress.
    ///
    /// Values are capped at 99, dropped unless they exceed the last emitted
    /// value, and rate limited to one event per interval.
    pub fn update(&mut self, percent: u8) {
        if self.finished {
            return;
        }
        let percent = percent.min(99);
        if percent <= self.last_percent || self.last_emit.elapsed() < self.interval {
            return;
        }
        self.emit(percent);
    }

    /// Completes the stage with its single 100% event.
    pub fn finish(&mut self) {
        if self.finished {
            return;
        }
        self.emit(100);
        self.finished = true;
    }

    fn emit(&mut self, percent: u8) {
        self.last_percent = percent;
        self.last_emit = Instant::now();
        self.sink.on_progress(ProgressEvent {
            tool: self.tool,
            stage: self.stage,
            percent,
        });
    }
}

//! Progress reporting for update phases
//!
//! The orchestrator reports every transition through a [`ProgressSink`]. Sinks
//! must never block or fail: a UI that is not listening must not stall or
//! abort an update.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::sync::broadcast;
use tracing::{debug, error, info, trace};

/// Named unit of work, used for progress display only
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Stage {
    /// Backing up the settings store before the flash
    #[default]
    LfsBackup,

    /// Restoring the settings store after the flash
    LfsRestore,

    /// Unpacking the resource bundle
    ResourcesUpdate,

    /// Percent update within the current stage
    Progress,

    /// Phase finished successfully
    Completed,

    /// Phase failed
    Error,
}

impl Stage {
    /// Status line shown for this stage
    pub fn description(self) -> &'static str {
        match self {
            Stage::LfsBackup => "Backing up settings",
            Stage::LfsRestore => "Restoring settings",
            Stage::ResourcesUpdate => "Updating resources",
            Stage::Progress => "In progress",
            Stage::Completed => "Completed",
            Stage::Error => "Error",
        }
    }

    /// Whether this stage ends the phase
    pub fn is_terminal(self) -> bool {
        matches!(self, Stage::Completed | Stage::Error)
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.description())
    }
}

/// Immutable snapshot delivered to sinks on every transition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateProgress {
    /// Stage currently running
    pub stage: Stage,

    /// 1-based index of the stage within this invocation
    pub stage_idx: u32,

    /// Number of stages expected, excluding the terminal one
    pub total_stages: u32,

    /// Percent complete within the stage (0-100)
    pub percent: u8,

    /// Human readable status
    pub status: String,

    /// Whether the phase failed
    pub failed: bool,
}

/// Progress state owned by the orchestrator for one invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct UpdateTaskState {
    /// Last non-`Progress` stage reported
    pub current_stage: Stage,

    /// Count of stage transitions so far
    pub current_stage_idx: u32,

    /// Number of stages expected
    pub total_stages: u32,

    /// Percent complete within the current stage (0-100)
    pub progress_percent: u8,

    /// Status line of the current stage
    pub status: String,
}

impl UpdateTaskState {
    /// Apply a progress notification and return the snapshot to publish.
    ///
    /// `Stage::Progress` keeps the current stage and only moves the percent.
    pub fn apply(&mut self, stage: Stage, percent: u8) -> UpdateProgress {
        if stage != Stage::Progress {
            self.current_stage = stage;
            self.current_stage_idx = self.current_stage_idx.saturating_add(1);
            self.status = if stage == Stage::Error {
                format!(
                    "{} #[{}-{}]",
                    stage.description(),
                    self.current_stage_idx,
                    self.progress_percent
                )
            } else {
                stage.description().to_string()
            };
        }
        self.progress_percent = percent.min(100);

        self.snapshot()
    }

    /// Snapshot of the current state
    pub fn snapshot(&self) -> UpdateProgress {
        UpdateProgress {
            stage: self.current_stage,
            stage_idx: self.current_stage_idx,
            total_stages: self.total_stages,
            percent: self.progress_percent,
            status: self.status.clone(),
            failed: self.current_stage == Stage::Error,
        }
    }
}

/// Percent shown after `processed` of `total` bundle entries.
///
/// The `+ 1` in the divisor keeps the bar below 100 until the phase emits
/// `Completed`; the result is also capped at 99 in case more entries are
/// visited than were counted.
pub fn extraction_percent(processed: usize, total: usize) -> u8 {
    let processed = processed as u128;
    let divisor = (total as u128).saturating_add(1);
    let percent = processed.saturating_mul(100) / divisor;
    u8::try_from(percent.min(99)).unwrap_or(99)
}

/// Receiver of progress notifications
///
/// Called in-line from the update worker, including from inside the per-entry
/// extraction callback. Implementations must return promptly.
pub trait ProgressSink: Send + Sync {
    /// Publish a progress snapshot.
    fn set_progress(&self, progress: &UpdateProgress);
}

/// Sink publishing snapshots on a tokio broadcast channel
///
/// Sending never blocks; snapshots sent while nobody is subscribed are
/// dropped, and slow subscribers observe a lag instead of stalling the worker.
#[derive(Debug, Clone)]
pub struct BroadcastProgressSink {
    tx: broadcast::Sender<UpdateProgress>,
}

impl BroadcastProgressSink {
    /// Create a sink buffering up to `capacity` snapshots per subscriber
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Subscribe to progress updates
    pub fn subscribe(&self) -> broadcast::Receiver<UpdateProgress> {
        self.tx.subscribe()
    }
}

impl Default for BroadcastProgressSink {
    fn default() -> Self {
        Self::new(256)
    }
}

impl ProgressSink for BroadcastProgressSink {
    fn set_progress(&self, progress: &UpdateProgress) {
        if self.tx.send(progress.clone()).is_err() {
            trace!("No progress subscribers");
        }
    }
}

/// Sink mirroring progress into the log
///
/// Stage transitions are logged at `info`; percent updates within a stage
/// arrive once per bundle entry and go to `debug`.
#[derive(Debug, Default)]
pub struct TracingProgressSink {
    last_stage_idx: AtomicU32,
}

impl ProgressSink for TracingProgressSink {
    fn set_progress(&self, progress: &UpdateProgress) {
        let previous = self.last_stage_idx.swap(progress.stage_idx, Ordering::Relaxed);
        let is_tick = progress.stage_idx != 0 && previous == progress.stage_idx;

        if progress.failed {
            error!(
                stage_idx = progress.stage_idx,
                total_stages = progress.total_stages,
                percent = progress.percent,
                "{}",
                progress.status
            );
        } else if is_tick {
            debug!(
                stage = ?progress.stage,
                stage_idx = progress.stage_idx,
                percent = progress.percent,
                "{}",
                progress.status
            );
        } else {
            info!(
                stage = ?progress.stage,
                stage_idx = progress.stage_idx,
                total_stages = progress.total_stages,
                percent = progress.percent,
                "{}",
                progress.status
            );
        }
    }
}

/// Sink forwarding to several sinks in order
#[derive(Default)]
pub struct FanoutSink {
    sinks: Vec<Box<dyn ProgressSink>>,
}

impl FanoutSink {
    /// Create an empty fanout
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a sink
    pub fn with(mut self, sink: impl ProgressSink + 'static) -> Self {
        self.sinks.push(Box::new(sink));
        self
    }
}

impl ProgressSink for FanoutSink {
    fn set_progress(&self, progress: &UpdateProgress) {
        for sink in &self.sinks {
            sink.set_progress(progress);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extraction_percent_never_reaches_100() {
        assert_eq!(extraction_percent(0, 10), 0);
        assert_eq!(extraction_percent(5, 10), 45);
        assert_eq!(extraction_percent(10, 10), 90);
        assert_eq!(extraction_percent(1, 1), 50);
        assert_eq!(extraction_percent(99, 99), 99);
        assert_eq!(extraction_percent(500, 10), 99);
    }

    #[test]
    fn test_progress_stage_keeps_current_stage() {
        let mut state = UpdateTaskState::default();

        let first = state.apply(Stage::ResourcesUpdate, 0);
        assert_eq!(first.stage_idx, 1);
        assert_eq!(first.status, "Updating resources");

        let tick = state.apply(Stage::Progress, 42);
        assert_eq!(tick.stage, Stage::ResourcesUpdate);
        assert_eq!(tick.stage_idx, 1);
        assert_eq!(tick.percent, 42);
    }

    #[test]
    fn test_percent_is_clamped() {
        let mut state = UpdateTaskState::default();
        assert_eq!(state.apply(Stage::LfsBackup, 250).percent, 100);
    }

    #[test]
    fn test_error_status_carries_stage_and_percent() {
        let mut state = UpdateTaskState::default();
        state.apply(Stage::LfsRestore, 0);
        state.apply(Stage::Progress, 37);

        let failed = state.apply(Stage::Error, 37);
        assert!(failed.failed);
        assert_eq!(failed.status, "Error #[2-37]");
        assert!(failed.stage.is_terminal());
    }

    #[tokio::test]
    async fn test_broadcast_sink_delivers_snapshots() -> Result<(), broadcast::error::RecvError> {
        let sink = BroadcastProgressSink::new(8);
        let mut rx = sink.subscribe();

        let mut state = UpdateTaskState::default();
        sink.set_progress(&state.apply(Stage::LfsBackup, 0));
        sink.set_progress(&state.apply(Stage::Completed, 100));

        assert_eq!(rx.recv().await?.stage, Stage::LfsBackup);
        assert_eq!(rx.recv().await?.percent, 100);
        Ok(())
    }

    #[test]
    #[tracing_test::traced_test]
    fn test_tracing_sink_logs_entry_ticks_at_debug() {
        let sink = TracingProgressSink::default();
        let mut state = UpdateTaskState::default();
        sink.set_progress(&state.apply(Stage::ResourcesUpdate, 0));
        sink.set_progress(&state.apply(Stage::Progress, 41));

        logs_assert(|lines: &[&str]| {
            let ticks: Vec<&&str> = lines.iter().filter(|l| l.contains("percent=41")).collect();
            match ticks.as_slice() {
                [tick] if tick.contains("DEBUG") => Ok(()),
                other => Err(format!("expected one DEBUG tick, got {other:?}")),
            }
        });
        assert!(logs_contain("INFO"));
    }

    #[test]
    fn test_broadcast_sink_without_subscribers_is_silent() {
        let sink = BroadcastProgressSink::default();
        let mut state = UpdateTaskState::default();
        sink.set_progress(&state.apply(Stage::LfsBackup, 0));
    }
}

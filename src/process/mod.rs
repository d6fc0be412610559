//! External fetch-tool supervision
//!
//! [`ProcessRunner::run`] owns one tool invocation from spawn to exit:
//! - the output file is checked first; an existing file is never overwritten
//! - combined stdout/stderr is read record by record and classified with
//!   [`classify_line`]; tool log lines are forwarded to `tracing` under the
//!   `fetch_tool` target
//! - the cancellation token is checked before every record, so a stop request
//!   kills the child without waiting for more output
//! - a wall-clock ceiling kills runaway invocations

pub mod invocation;
pub mod launcher;
pub mod line;
pub mod progress;
pub mod reader;

pub use invocation::{Container, ContentKey, FetchInvocation, sanitize_name};
pub use launcher::{CommandLauncher, RunningProcess, TokioLauncher};
pub use line::{Line, StreamKind, ToolLevel, classify_line};
pub use progress::{Observation, ProgressTracker};
pub use reader::OutputRecordReader;

use crate::error::ProcessError;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// How one invocation ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Exit status zero
    Completed,
    /// The output file was already there; nothing was spawned
    AlreadyExists,
    /// The cancellation token tripped; the child was killed
    Stopped,
    /// The wall-clock ceiling was reached; the child was killed
    TimedOut,
    /// Non-zero exit (`None` when ended by a signal)
    Failed {
        /// Exit code
        exit_code: Option<i32>,
    },
}

/// Runs fetch-tool invocations through a [`CommandLauncher`]
#[derive(Clone)]
pub struct ProcessRunner {
    launcher: Arc<dyn CommandLauncher>,
    timeout: Duration,
}

impl ProcessRunner {
    /// Create a runner
    ///
    /// # Arguments
    ///
    /// * `launcher` - How processes are started
    /// * `timeout` - Wall-clock ceiling for one invocation
    pub fn new(launcher: Arc<dyn CommandLauncher>, timeout: Duration) -> Self {
        Self { launcher, timeout }
    }

    /// Run one invocation to completion
    ///
    /// `on_progress` is called with the overall percentage (slowest stream) whenever it
    /// changes.
    ///
    /// # Errors
    ///
    /// Spawn, output and reap failures. Non-zero exits are a [`RunOutcome`], not an error.
    pub async fn run<F>(
        &self,
        invocation: &FetchInvocation,
        cancel: &CancellationToken,
        mut on_progress: F,
    ) -> Result<RunOutcome, ProcessError>
    where
        F: FnMut(f32) + Send,
    {
        let output = invocation.output_path();
        if output.exists() {
            tracing::info!(path = %output.display(), "output already exists, not starting the fetch tool");
            return Ok(RunOutcome::AlreadyExists);
        }
        if cancel.is_cancelled() {
            return Ok(RunOutcome::Stopped);
        }

        let mut process = self
            .launcher
            .launch(&invocation.program, &invocation.args())
            .await?;
        let name = invocation.save_name.as_str();
        tracing::info!(file = name, launcher = self.launcher.name(), "fetch tool running");

        let deadline = tokio::time::sleep(self.timeout);
        tokio::pin!(deadline);
        let mut tracker = ProgressTracker::new();
        let mut last_overall: Option<f32> = None;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    kill_quietly(process.as_mut(), name).await;
                    tracing::info!(file = name, "fetch tool stopped");
                    return Ok(RunOutcome::Stopped);
                }
                _ = &mut deadline => {
                    kill_quietly(process.as_mut(), name).await;
                    tracing::warn!(file = name, timeout_secs = self.timeout.as_secs(), "fetch tool timed out");
                    return Ok(RunOutcome::TimedOut);
                }
                record = process.next_record() => {
                    let Some(record) = record? else {
                        break;
                    };
                    let Some(line) = classify_line(&record) else {
                        continue;
                    };
                    if let Some(overall) = observe_line(name, &line, &mut tracker) {
                        if last_overall != Some(overall) {
                            last_overall = Some(overall);
                            on_progress(overall);
                        }
                    }
                }
            }
        }

        let exit_code = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                kill_quietly(process.as_mut(), name).await;
                return Ok(RunOutcome::Stopped);
            }
            _ = &mut deadline => {
                kill_quietly(process.as_mut(), name).await;
                tracing::warn!(file = name, timeout_secs = self.timeout.as_secs(), "fetch tool timed out");
                return Ok(RunOutcome::TimedOut);
            }
            code = process.wait() => code?,
        };

        match exit_code {
            Some(0) => {
                tracing::info!(file = name, streams = tracker.completed_streams(), "fetch tool finished");
                Ok(RunOutcome::Completed)
            }
            other => {
                tracing::warn!(file = name, exit_code = ?other, "Process exit code");
                Ok(RunOutcome::Failed { exit_code: other })
            }
        }
    }
}

async fn kill_quietly(process: &mut dyn RunningProcess, name: &str) {
    if let Err(e) = process.kill().await {
        tracing::warn!(file = name, error = %e, "failed to kill fetch tool");
    }
}

/// Log one classified line; returns the overall percentage after a progress change
fn observe_line(name: &str, line: &Line, tracker: &mut ProgressTracker) -> Option<f32> {
    match line {
        Line::Log { level, message } => {
            match level {
                ToolLevel::Debug => tracing::debug!(target: "fetch_tool", file = name, "{}", message),
                ToolLevel::Info => tracing::info!(target: "fetch_tool", file = name, "{}", message),
                ToolLevel::Warn => tracing::warn!(target: "fetch_tool", file = name, "{}", message),
                ToolLevel::Error => tracing::error!(target: "fetch_tool", file = name, "{}", message),
            }
            None
        }
        Line::Progress {
            percent, segments, ..
        } => {
            let key = line.stream_key()?;
            let observation = tracker.observe(&key, *percent, *segments);
            match observation {
                Observation::Repeated => None,
                Observation::Advanced(p) => {
                    tracing::debug!(target: "fetch_tool", file = name, stream = %key, percent = p, "progress");
                    tracker.overall()
                }
                Observation::StreamCompleted => {
                    tracing::info!(target: "fetch_tool", file = name, stream = %key, "stream complete");
                    tracker.overall()
                }
            }
        }
        Line::Freeform(text) => {
            tracing::debug!(target: "fetch_tool", file = name, "{}", text);
            None
        }
    }
}

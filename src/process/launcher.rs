//! Process launching seam

use super::reader::OutputRecordReader;
use crate::error::ProcessError;
use async_trait::async_trait;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::AsyncRead;
use tokio::process::{Child, Command};
use tokio::sync::mpsc;

/// A started process whose combined output can be read record by record
#[async_trait]
pub trait RunningProcess: Send {
    /// Next output record from stdout or stderr, `None` once both are closed
    async fn next_record(&mut self) -> Result<Option<String>, ProcessError>;

    /// Wait for exit; `None` when the process was ended by a signal
    async fn wait(&mut self) -> Result<Option<i32>, ProcessError>;

    /// Kill the process and reap it
    async fn kill(&mut self) -> Result<(), ProcessError>;
}

/// Starts external processes
#[async_trait]
pub trait CommandLauncher: Send + Sync {
    /// Spawn one process
    async fn launch(&self, program: &Path, args: &[OsString]) -> Result<Box<dyn RunningProcess>, ProcessError>;

    /// Launcher name for logging
    fn name(&self) -> &'static str;
}

/// Launches real processes with `tokio::process`
///
/// Children are killed when their handle is dropped.
#[derive(Debug, Clone, Default)]
pub struct TokioLauncher;

impl TokioLauncher {
    /// Create a launcher
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CommandLauncher for TokioLauncher {
    async fn launch(&self, program: &Path, args: &[OsString]) -> Result<Box<dyn RunningProcess>, ProcessError> {
        let program = program.to_path_buf();
        let mut command = Command::new(&program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|e| ProcessError::SpawnFailed {
            program: program.clone(),
            reason: e.to_string(),
        })?;
        tracing::debug!(program = %program.display(), pid = ?child.id(), "process started");

        let (tx, records) = mpsc::channel(256);
        if let Some(stdout) = child.stdout.take() {
            forward_records(stdout, tx.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            forward_records(stderr, tx);
        }

        Ok(Box::new(TokioProcess {
            program,
            child,
            records,
        }))
    }

    fn name(&self) -> &'static str {
        "tokio"
    }
}

fn forward_records<R>(stream: R, tx: mpsc::Sender<std::io::Result<String>>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = OutputRecordReader::new(stream);
        loop {
            match reader.next_record().await {
                Ok(Some(record)) => {
                    if tx.send(Ok(record)).await.is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    let _ = tx.send(Err(e)).await;
                    break;
                }
            }
        }
    });
}

struct TokioProcess {
    program: PathBuf,
    child: Child,
    records: mpsc::Receiver<std::io::Result<String>>,
}

#[async_trait]
impl RunningProcess for TokioProcess {
    async fn next_record(&mut self) -> Result<Option<String>, ProcessError> {
        match self.records.recv().await {
            Some(Ok(record)) => Ok(Some(record)),
            Some(Err(e)) => Err(ProcessError::OutputRead(format!(
                "{}: {}",
                self.program.display(),
                e
            ))),
            None => Ok(None),
        }
    }

    async fn wait(&mut self) -> Result<Option<i32>, ProcessError> {
        let status = self
            .child
            .wait()
            .await
            .map_err(|e| ProcessError::Wait(e.to_string()))?;
        Ok(status.code())
    }

    async fn kill(&mut self) -> Result<(), ProcessError> {
        self.child
            .kill()
            .await
            .map_err(|e| ProcessError::Wait(format!("Failed to kill {}: {}", self.program.display(), e)))
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::process::FetchInvocation;
    use std::os::unix::fs::PermissionsExt;

    fn script(dir: &std::path::Path, body: &str) -> PathBuf {
        let path = dir.join("fake-tool.sh");
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[tokio::test]
    async fn missing_binary_is_a_spawn_error() {
        let invocation = FetchInvocation::new("/nonexistent/fetch-tool-xyz", "a.mpd", "/tmp", "a.mp4");
        let err = TokioLauncher::new()
            .launch(&invocation.program, &invocation.args())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ProcessError::SpawnFailed { .. }));
    }

    #[tokio::test]
    async fn stdout_and_stderr_are_combined() {
        let dir = tempfile::tempdir().unwrap();
        let program = script(dir.path(), "echo out\necho err 1>&2\nexit 3");
        let invocation = FetchInvocation::new(program, "a.mpd", dir.path(), "a.mp4");

        let mut process = TokioLauncher::new()
            .launch(&invocation.program, &invocation.args())
            .await
            .unwrap();
        let mut records = Vec::new();
        while let Some(record) = process.next_record().await.unwrap() {
            records.push(record);
        }
        records.sort();

        assert_eq!(records, vec!["err".to_string(), "out".to_string()]);
        assert_eq!(process.wait().await.unwrap(), Some(3));
    }
}

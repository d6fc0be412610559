//! Manifest backend: the external fetch tool

use super::{
    BackendEvent, BackendStatus, DownloadJob, Downloader, EventData, KeyProvider, ManifestStatus,
    RunRegistry, completion_data, report,
};
use crate::config::Config;
use crate::process::{CommandLauncher, FetchInvocation, ProcessRunner, RunOutcome};
use crate::types::InvocationId;
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Binary name looked up on PATH when no fetch-tool path is configured
pub const FETCH_TOOL_BINARY: &str = "N_m3u8DL-RE";

/// Downloads DASH/HLS manifests with the fetch tool
///
/// Encrypted jobs get their keys from the [`KeyProvider`] before the tool starts.
#[derive(Clone)]
pub struct ManifestDownloader {
    runner: ProcessRunner,
    keys: Arc<dyn KeyProvider>,
    tool: PathBuf,
    decryption_binary: Option<PathBuf>,
    ffmpeg_binary: Option<PathBuf>,
    mkvmerge_binary: Option<PathBuf>,
    temp_dir: PathBuf,
    retry_count: u32,
    log_level: String,
    runs: Arc<RunRegistry>,
}

impl ManifestDownloader {
    /// Create a backend with an explicit tool path and no helper binaries
    pub fn new(tool: PathBuf, runner: ProcessRunner, keys: Arc<dyn KeyProvider>) -> Self {
        Self {
            runner,
            keys,
            tool,
            decryption_binary: None,
            ffmpeg_binary: None,
            mkvmerge_binary: None,
            temp_dir: std::env::temp_dir(),
            retry_count: 3,
            log_level: "INFO".to_string(),
            runs: Arc::new(RunRegistry::default()),
        }
    }

    /// Build from configuration, resolving every binary
    ///
    /// # Returns
    ///
    /// `None` when the fetch tool is neither configured nor on PATH.
    pub fn from_config(
        config: &Config,
        launcher: Arc<dyn CommandLauncher>,
        keys: Arc<dyn KeyProvider>,
    ) -> Option<Self> {
        let tools = &config.tools;
        let tool = tools.resolve(tools.fetch_tool_path.as_ref(), FETCH_TOOL_BINARY)?;
        let runner = ProcessRunner::new(launcher, config.download.process_timeout);
        Some(Self {
            decryption_binary: tools.resolve(tools.decryption_binary_path.as_ref(), "packager"),
            ffmpeg_binary: tools.resolve(tools.ffmpeg_path.as_ref(), "ffmpeg"),
            mkvmerge_binary: tools.resolve(tools.mkvmerge_path.as_ref(), "mkvmerge"),
            temp_dir: config.download.temp_dir.clone(),
            retry_count: config.download.segment_retry_count,
            log_level: config.download.tool_log_level.clone(),
            ..Self::new(tool, runner, keys)
        })
    }

    /// Set the working directory root
    pub fn with_temp_dir(mut self, temp_dir: PathBuf) -> Self {
        self.temp_dir = temp_dir;
        self
    }

    fn invocation(&self, job: &DownloadJob) -> FetchInvocation {
        FetchInvocation::new(&self.tool, &job.play_url, &job.save_dir, &job.filename)
            .with_temp_dir(self.temp_dir.join(job.invocation.to_string()))
            .with_headers(job.headers.clone())
            .with_binaries(
                self.decryption_binary.clone(),
                self.ffmpeg_binary.clone(),
                self.mkvmerge_binary.clone(),
            )
            .with_tool_options(self.retry_count, self.log_level.clone())
    }

    async fn execute(
        &self,
        job: DownloadJob,
        token: CancellationToken,
        events: mpsc::Sender<BackendEvent>,
    ) {
        let invocation = job.invocation;
        let mut command = self.invocation(&job);

        if let Some(license) = &job.license {
            match self
                .keys
                .content_keys(license, &job.play_url, &job.headers)
                .await
            {
                Ok(keys) if !keys.is_empty() => command = command.with_keys(keys),
                Ok(_) => {
                    self.fail(invocation, &job, "no content keys returned", &events).await;
                    return;
                }
                Err(e) => {
                    self.fail(invocation, &job, &e.to_string(), &events).await;
                    return;
                }
            }
        }

        let started = Instant::now();
        let progress_tx = events.clone();
        let outcome = self
            .runner
            .run(&command, &token, move |percent| {
                let _ = progress_tx.try_send(BackendEvent {
                    invocation,
                    status: BackendStatus::Manifest(ManifestStatus::Downloading),
                    data: EventData {
                        percent: Some(percent),
                        ..Default::default()
                    },
                });
            })
            .await;
        self.runs.finish(invocation).await;

        let output = command.output_path();
        let (status, data) = match outcome {
            Ok(RunOutcome::Completed) => (
                ManifestStatus::Completed,
                completion_data(output, started.elapsed()).await,
            ),
            Ok(RunOutcome::AlreadyExists) => (
                ManifestStatus::ExistOutputFilepath,
                EventData {
                    output_path: Some(output),
                    ..Default::default()
                },
            ),
            Ok(RunOutcome::Stopped) => (ManifestStatus::UserStop, EventData::default()),
            Ok(RunOutcome::TimedOut) => (
                ManifestStatus::Error,
                EventData {
                    message: Some("fetch tool timed out".to_string()),
                    ..Default::default()
                },
            ),
            Ok(RunOutcome::Failed { exit_code }) => (
                ManifestStatus::Error,
                EventData {
                    message: Some(format!("fetch tool exited with {:?}", exit_code)),
                    ..Default::default()
                },
            ),
            Err(e) => (
                ManifestStatus::Error,
                EventData {
                    message: Some(e.to_string()),
                    ..Default::default()
                },
            ),
        };

        tracing::debug!(%invocation, item_id = %job.item_id, status = status.as_str(), "manifest run finished");
        report(&events, invocation, BackendStatus::Manifest(status), data).await;
    }

    async fn fail(
        &self,
        invocation: InvocationId,
        job: &DownloadJob,
        message: &str,
        events: &mpsc::Sender<BackendEvent>,
    ) {
        self.runs.finish(invocation).await;
        tracing::warn!(
            %invocation,
            item_id = %job.item_id,
            content_id = %job.content_id,
            provider = self.keys.name(),
            error = message,
            "content keys unavailable"
        );
        report(
            events,
            invocation,
            BackendStatus::Manifest(ManifestStatus::Error),
            EventData {
                message: Some(message.to_string()),
                ..Default::default()
            },
        )
        .await;
    }
}

#[async_trait]
impl Downloader for ManifestDownloader {
    async fn start(&self, job: DownloadJob, events: mpsc::Sender<BackendEvent>) -> crate::Result<()> {
        report(
            &events,
            job.invocation,
            BackendStatus::Manifest(ManifestStatus::Ready),
            EventData::default(),
        )
        .await;

        let token = self.runs.register(job.invocation).await;
        let backend = self.clone();
        tokio::spawn(async move {
            backend.execute(job, token, events).await;
        });
        Ok(())
    }

    async fn stop(&self, invocation: InvocationId) -> bool {
        self.runs.cancel(invocation).await
    }

    fn name(&self) -> &'static str {
        "manifest"
    }
}

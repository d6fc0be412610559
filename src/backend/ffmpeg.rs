//! Simple backend: clear HLS through ffmpeg

use super::{
    BackendEvent, BackendStatus, DownloadJob, Downloader, EventData, RunRegistry, SimpleStatus,
    completion_data, report,
};
use crate::process::{CommandLauncher, RunningProcess};
use crate::types::InvocationId;
use async_trait::async_trait;
use regex::Regex;
use std::ffi::OsString;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Packet faults tolerated before a run is stopped with `PF_STOP`
pub const MAX_PACKET_FAULTS: i64 = 20;

/// Downloads clear HLS playlists by remuxing them with ffmpeg
#[derive(Clone)]
pub struct FfmpegDownloader {
    launcher: Arc<dyn CommandLauncher>,
    ffmpeg: PathBuf,
    timeout: Duration,
    runs: Arc<RunRegistry>,
}

impl FfmpegDownloader {
    /// Create a backend
    ///
    /// # Arguments
    ///
    /// * `launcher` - How processes are started
    /// * `ffmpeg` - ffmpeg binary
    /// * `timeout` - Wall-clock ceiling for one run
    pub fn new(launcher: Arc<dyn CommandLauncher>, ffmpeg: PathBuf, timeout: Duration) -> Self {
        Self {
            launcher,
            ffmpeg,
            timeout,
            runs: Arc::new(RunRegistry::default()),
        }
    }

    /// ffmpeg arguments for one job
    pub fn args(job: &DownloadJob) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec!["-nostdin".into(), "-hide_banner".into()];
        if !job.headers.is_empty() {
            let headers: String = job
                .headers
                .iter()
                .map(|(k, v)| format!("{}: {}\r\n", k, v))
                .collect();
            args.push("-headers".into());
            args.push(headers.into());
        }
        args.extend([
            "-i".into(),
            job.play_url.clone().into(),
            "-c".into(),
            "copy".into(),
            "-bsf:a".into(),
            "aac_adtstoasc".into(),
            job.output_path().into(),
        ]);
        args
    }

    async fn execute(&self, job: DownloadJob, token: CancellationToken, events: mpsc::Sender<BackendEvent>) {
        let invocation = job.invocation;
        let started = Instant::now();
        let (status, data) = self.supervise(&job, &token, &events).await;
        self.runs.finish(invocation).await;

        let data = if status == SimpleStatus::Completed {
            EventData {
                duration_secs: data.duration_secs,
                ..completion_data(job.output_path(), started.elapsed()).await
            }
        } else {
            data
        };
        tracing::debug!(%invocation, item_id = %job.item_id, status = status.as_str(), "ffmpeg run finished");
        report(&events, invocation, BackendStatus::Simple(status), data).await;
    }

    async fn supervise(
        &self,
        job: &DownloadJob,
        token: &CancellationToken,
        events: &mpsc::Sender<BackendEvent>,
    ) -> (SimpleStatus, EventData) {
        if !job.play_url.starts_with("http://") && !job.play_url.starts_with("https://") {
            return (SimpleStatus::WrongUrl, message(format!("not an HTTP URL: {}", job.play_url)));
        }
        if let Err(e) = tokio::fs::create_dir_all(&job.save_dir).await {
            return (SimpleStatus::WrongDirectory, message(e.to_string()));
        }
        if tokio::fs::try_exists(job.output_path()).await.unwrap_or(false) {
            tracing::info!(invocation = %job.invocation, path = %job.output_path().display(), "Output already present, not overwritten");
            return (SimpleStatus::Completed, EventData::default());
        }

        let mut process = match self.launcher.launch(&self.ffmpeg, &Self::args(job)).await {
            Ok(process) => process,
            Err(e) => return (SimpleStatus::Exception, message(e.to_string())),
        };

        let deadline = tokio::time::sleep(self.timeout);
        tokio::pin!(deadline);
        let mut data = EventData::default();
        let mut faults: i64 = 0;

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    kill(process.as_mut()).await;
                    return (SimpleStatus::UserStop, data);
                }
                _ = &mut deadline => {
                    kill(process.as_mut()).await;
                    return (SimpleStatus::TimeOver, data);
                }
                record = process.next_record() => {
                    let record = match record {
                        Ok(Some(record)) => record,
                        Ok(None) => break,
                        Err(e) => {
                            kill(process.as_mut()).await;
                            return (SimpleStatus::Exception, message(e.to_string()));
                        }
                    };
                    match parse_ffmpeg_line(&record) {
                        FfmpegLine::Duration(secs) => data.duration_secs = Some(secs),
                        FfmpegLine::Time(secs) => {
                            if let Some(total) = data.duration_secs.filter(|t| *t > 0) {
                                let percent = ((secs as f32 / total as f32) * 100.0).min(100.0);
                                data.percent = Some(percent);
                                let _ = events.try_send(BackendEvent {
                                    invocation: job.invocation,
                                    status: BackendStatus::Simple(SimpleStatus::Downloading),
                                    data: EventData {
                                        percent: Some(percent),
                                        duration_secs: Some(total),
                                        ..Default::default()
                                    },
                                });
                            }
                        }
                        FfmpegLine::Forbidden => {
                            kill(process.as_mut()).await;
                            return (SimpleStatus::HttpForbidden, message(record));
                        }
                        FfmpegLine::PacketFault => {
                            faults += 1;
                            data.packet_faults = Some(faults);
                            if faults > MAX_PACKET_FAULTS {
                                tracing::warn!(invocation = %job.invocation, faults, "too many packet faults");
                                kill(process.as_mut()).await;
                                return (SimpleStatus::PfStop, data);
                            }
                        }
                        FfmpegLine::Other => tracing::trace!(target: "ffmpeg", "{}", record),
                    }
                }
            }
        }

        let exit = tokio::select! {
            biased;
            _ = token.cancelled() => {
                kill(process.as_mut()).await;
                return (SimpleStatus::UserStop, data);
            }
            _ = &mut deadline => {
                kill(process.as_mut()).await;
                return (SimpleStatus::TimeOver, data);
            }
            exit = process.wait() => exit,
        };

        match exit {
            Ok(Some(0)) => (SimpleStatus::Completed, data),
            Ok(None) => (SimpleStatus::ForceStop, data),
            Ok(Some(code)) => {
                tracing::warn!(invocation = %job.invocation, exit_code = code, "Process exit code");
                (SimpleStatus::Error, data)
            }
            Err(e) => (SimpleStatus::Exception, message(e.to_string())),
        }
    }
}

fn message(text: String) -> EventData {
    EventData {
        message: Some(text),
        ..Default::default()
    }
}

async fn kill(process: &mut dyn RunningProcess) {
    if let Err(e) = process.kill().await {
        tracing::warn!(error = %e, "failed to kill ffmpeg");
    }
}

#[derive(Debug, PartialEq)]
enum FfmpegLine {
    Duration(i64),
    Time(i64),
    Forbidden,
    PacketFault,
    Other,
}

struct FfmpegPatterns {
    duration: Regex,
    time: Regex,
    fault: Regex,
}

fn patterns() -> Option<&'static FfmpegPatterns> {
    static PATTERNS: OnceLock<Option<FfmpegPatterns>> = OnceLock::new();
    PATTERNS
        .get_or_init(|| {
            Some(FfmpegPatterns {
                duration: Regex::new(r"Duration:\s*(\d+):(\d{2}):(\d{2})").ok()?,
                time: Regex::new(r"time=\s*(\d+):(\d{2}):(\d{2})").ok()?,
                fault: Regex::new(r"(?i)(packet corrupt|invalid data found|error while decoding|failed to reload playlist)").ok()?,
            })
        })
        .as_ref()
}

fn hms(caps: &regex::Captures<'_>) -> Option<i64> {
    let h: i64 = caps.get(1)?.as_str().parse().ok()?;
    let m: i64 = caps.get(2)?.as_str().parse().ok()?;
    let s: i64 = caps.get(3)?.as_str().parse().ok()?;
    Some(h * 3600 + m * 60 + s)
}

fn parse_ffmpeg_line(line: &str) -> FfmpegLine {
    let Some(p) = patterns() else {
        return FfmpegLine::Other;
    };
    if line.contains("403 Forbidden") {
        return FfmpegLine::Forbidden;
    }
    if let Some(secs) = p.duration.captures(line).as_ref().and_then(hms) {
        return FfmpegLine::Duration(secs);
    }
    if let Some(secs) = p.time.captures(line).as_ref().and_then(hms) {
        return FfmpegLine::Time(secs);
    }
    if p.fault.is_match(line) {
        return FfmpegLine::PacketFault;
    }
    FfmpegLine::Other
}

#[async_trait]
impl Downloader for FfmpegDownloader {
    async fn start(&self, job: DownloadJob, events: mpsc::Sender<BackendEvent>) -> crate::Result<()> {
        report(
            &events,
            job.invocation,
            BackendStatus::Simple(SimpleStatus::Ready),
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
        "ffmpeg"
    }
}

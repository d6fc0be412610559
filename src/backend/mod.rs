//! Download backends
//!
//! A [`Downloader`] runs one [`DownloadJob`] per [`start`](Downloader::start) call and
//! reports [`BackendEvent`]s on a channel, all tagged with the job's [`InvocationId`].
//! Two variants exist:
//! - [`ManifestDownloader`] for DASH/HLS manifests through the fetch tool (required for
//!   encrypted content)
//! - [`FfmpegDownloader`] for clear HLS through ffmpeg
//!
//! Each speaks its own status vocabulary; [`classifier`](crate::classifier) maps both onto
//! the same item effects.

mod ffmpeg;
pub mod keys;
mod manifest;

pub use ffmpeg::FfmpegDownloader;
pub use keys::{KeyProvider, NoOpKeyProvider};
pub use manifest::{FETCH_TOOL_BINARY, ManifestDownloader};

use crate::catalog::LicenseInfo;
use crate::error::Result;
use crate::types::{InvocationId, ItemId};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;

/// Everything a backend needs to fetch one item
#[derive(Debug, Clone)]
pub struct DownloadJob {
    /// Correlation id for every event of this run
    pub invocation: InvocationId,
    /// Item being downloaded
    pub item_id: ItemId,
    /// Content id (for logs)
    pub content_id: String,
    /// Manifest or playlist URL
    pub play_url: String,
    /// Output directory
    pub save_dir: PathBuf,
    /// Output filename
    pub filename: String,
    /// Request headers
    pub headers: BTreeMap<String, String>,
    /// Licence information for encrypted content
    pub license: Option<LicenseInfo>,
}

impl DownloadJob {
    /// Path the backend writes
    pub fn output_path(&self) -> PathBuf {
        self.save_dir.join(&self.filename)
    }
}

/// Status vocabulary of the manifest backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestStatus {
    /// Invocation accepted
    Ready,
    /// Transferring
    Downloading,
    /// Some segments failed; the tool retries them
    SegmentFail,
    /// Output written
    Completed,
    /// Output was already there
    ExistOutputFilepath,
    /// Stopped on request
    UserStop,
    /// Failed
    Error,
}

impl ManifestStatus {
    /// Wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ready => "READY",
            Self::Downloading => "DOWNLOADING",
            Self::SegmentFail => "SEGMENT_FAIL",
            Self::Completed => "COMPLETED",
            Self::ExistOutputFilepath => "EXIST_OUTPUT_FILEPATH",
            Self::UserStop => "USER_STOP",
            Self::Error => "ERROR",
        }
    }
}

/// Status vocabulary of the simple (ffmpeg) backend
///
/// The integer values are what gets stored in `backend_status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimpleStatus {
    /// Accepted
    Ready = 0,
    /// The URL could not be opened
    WrongUrl = 1,
    /// The output directory is unusable
    WrongDirectory = 2,
    /// The backend crashed
    Exception = 3,
    /// ffmpeg reported an error
    Error = 4,
    /// Transferring
    Downloading = 5,
    /// Stopped on request
    UserStop = 6,
    /// Output written
    Completed = 7,
    /// Wall-clock ceiling reached
    TimeOver = 8,
    /// Too many packet faults; the run was stopped
    PfStop = 9,
    /// Killed from outside
    ForceStop = 10,
    /// The server refused the stream
    HttpForbidden = 11,
}

impl SimpleStatus {
    /// Wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ready => "READY",
            Self::WrongUrl => "WRONG_URL",
            Self::WrongDirectory => "WRONG_DIRECTORY",
            Self::Exception => "EXCEPTION",
            Self::Error => "ERROR",
            Self::Downloading => "DOWNLOADING",
            Self::UserStop => "USER_STOP",
            Self::Completed => "COMPLETED",
            Self::TimeOver => "TIME_OVER",
            Self::PfStop => "PF_STOP",
            Self::ForceStop => "FORCE_STOP",
            Self::HttpForbidden => "HTTP_FORBIDDEN",
        }
    }
}

/// A status from either backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendStatus {
    /// From the manifest backend
    Manifest(ManifestStatus),
    /// From the simple backend
    Simple(SimpleStatus),
    /// A status this version does not know
    Other(String),
}

impl BackendStatus {
    /// Integer stored on the item as `backend_status`
    pub fn code(&self) -> i32 {
        match self {
            Self::Simple(status) => *status as i32,
            Self::Manifest(status) => match status {
                ManifestStatus::Ready => 0,
                ManifestStatus::Downloading => 5,
                ManifestStatus::UserStop => 6,
                ManifestStatus::Completed | ManifestStatus::ExistOutputFilepath => 7,
                ManifestStatus::Error => 4,
                ManifestStatus::SegmentFail => 12,
            },
            Self::Other(_) => -1,
        }
    }

    /// Wire name
    pub fn name(&self) -> &str {
        match self {
            Self::Manifest(status) => status.as_str(),
            Self::Simple(status) => status.as_str(),
            Self::Other(name) => name,
        }
    }
}

impl std::fmt::Display for BackendStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Payload attached to a backend event
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventData {
    /// Percent complete
    pub percent: Option<f32>,
    /// Media duration in seconds
    pub duration_secs: Option<i64>,
    /// Output size in bytes
    pub filesize: Option<i64>,
    /// Output size, human readable
    pub filesize_str: Option<String>,
    /// Average speed, human readable
    pub download_speed: Option<String>,
    /// Packet faults counted so far
    pub packet_faults: Option<i64>,
    /// Output path
    pub output_path: Option<PathBuf>,
    /// Free-form detail (error text)
    pub message: Option<String>,
}

/// One status report from a running backend
#[derive(Debug, Clone)]
pub struct BackendEvent {
    /// Invocation the event belongs to
    pub invocation: InvocationId,
    /// Reported status
    pub status: BackendStatus,
    /// Attached data
    pub data: EventData,
}

/// A download backend
#[async_trait]
pub trait Downloader: Send + Sync {
    /// Start one run; events for it are sent on `events`
    ///
    /// Returns once the run is started. A run that cannot start still reports a terminal
    /// event, so callers only track runs through the channel.
    async fn start(&self, job: DownloadJob, events: mpsc::Sender<BackendEvent>) -> Result<()>;

    /// Stop a run; returns whether it was running
    async fn stop(&self, invocation: InvocationId) -> bool;

    /// Backend name for logging
    fn name(&self) -> &'static str;
}

/// Stand-in for a backend whose binary could not be found
///
/// Every run fails immediately with the given terminal status, so items are recorded as
/// failed instead of waiting forever.
#[derive(Debug, Clone)]
pub struct UnavailableDownloader {
    tool: &'static str,
    status: BackendStatus,
}

impl UnavailableDownloader {
    /// A manifest backend without the fetch tool
    pub fn manifest() -> Self {
        Self {
            tool: FETCH_TOOL_BINARY,
            status: BackendStatus::Manifest(ManifestStatus::Error),
        }
    }

    /// A simple backend without ffmpeg
    pub fn ffmpeg() -> Self {
        Self {
            tool: "ffmpeg",
            status: BackendStatus::Simple(SimpleStatus::Exception),
        }
    }
}

#[async_trait]
impl Downloader for UnavailableDownloader {
    async fn start(&self, job: DownloadJob, events: mpsc::Sender<BackendEvent>) -> Result<()> {
        tracing::warn!(invocation = %job.invocation, item_id = %job.item_id, tool = self.tool, "backend binary not available");
        report(
            &events,
            job.invocation,
            self.status.clone(),
            EventData {
                message: Some(format!("{} not found", self.tool)),
                ..Default::default()
            },
        )
        .await;
        Ok(())
    }

    async fn stop(&self, _invocation: InvocationId) -> bool {
        false
    }

    fn name(&self) -> &'static str {
        "unavailable"
    }
}

/// Cancellation tokens of a backend's live runs
#[derive(Debug, Default)]
pub(crate) struct RunRegistry {
    runs: Mutex<HashMap<InvocationId, CancellationToken>>,
}

impl RunRegistry {
    pub(crate) async fn register(&self, invocation: InvocationId) -> CancellationToken {
        let token = CancellationToken::new();
        self.runs.lock().await.insert(invocation, token.clone());
        token
    }

    pub(crate) async fn finish(&self, invocation: InvocationId) {
        self.runs.lock().await.remove(&invocation);
    }

    pub(crate) async fn cancel(&self, invocation: InvocationId) -> bool {
        match self.runs.lock().await.get(&invocation) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }
}

/// Send an event; a closed channel means nobody is listening any more
pub(crate) async fn report(
    events: &mpsc::Sender<BackendEvent>,
    invocation: InvocationId,
    status: BackendStatus,
    data: EventData,
) {
    if events
        .send(BackendEvent {
            invocation,
            status,
            data,
        })
        .await
        .is_err()
    {
        tracing::debug!(%invocation, "event receiver dropped");
    }
}

/// Human-readable byte size
pub(crate) fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.2} {}", size, UNITS[unit])
    }
}

/// Completion data for a finished output file
pub(crate) async fn completion_data(path: PathBuf, elapsed: std::time::Duration) -> EventData {
    let filesize = tokio::fs::metadata(&path).await.map(|m| m.len()).ok();
    let download_speed = filesize.map(|bytes| {
        let secs = elapsed.as_secs_f64().max(1.0);
        format!("{}/s", format_size((bytes as f64 / secs) as u64))
    });
    EventData {
        percent: Some(100.0),
        filesize: filesize.map(|b| b as i64),
        filesize_str: filesize.map(format_size),
        download_speed,
        output_path: Some(path),
        ..Default::default()
    }
}

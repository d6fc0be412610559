//! Configuration types for vod-dl

use crate::error::{Error, Result};
use crate::types::Quality;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Download behavior configuration (directories, concurrency, supervision limits)
///
/// Used as a nested sub-config within [`Config`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Output directory (default: "./downloads")
    #[serde(default = "default_save_dir")]
    pub save_dir: PathBuf,

    /// Working directory for the fetch tool (default: "./temp")
    #[serde(default = "default_temp_dir")]
    pub temp_dir: PathBuf,

    /// Maximum concurrent downloads (default: 4)
    ///
    /// This is the initial ceiling; it can be changed at runtime with
    /// [`VodDownloader::set_max_concurrent`](crate::VodDownloader::set_max_concurrent).
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_downloads: usize,

    /// Backend for clear (non-encrypted) content (default: ffmpeg)
    #[serde(default)]
    pub clear_backend: ClearBackend,

    /// Hard wall-clock ceiling for one fetch-tool run (default: 1 hour)
    #[serde(default = "default_process_timeout", with = "duration_serde")]
    pub process_timeout: Duration,

    /// How long one scheduled run may wait for free slots in total (default: 1 hour)
    #[serde(default = "default_run_wait_ceiling", with = "duration_serde")]
    pub run_wait_ceiling: Duration,

    /// Poll interval while waiting for a free slot (default: 10 seconds)
    #[serde(default = "default_slot_poll_interval", with = "duration_serde")]
    pub slot_poll_interval: Duration,

    /// Pause after each dispatch before starting the next one (default: 10 seconds)
    #[serde(default = "default_dispatch_pause", with = "duration_serde")]
    pub dispatch_pause: Duration,

    /// Segment retry count passed to the fetch tool (default: 3)
    #[serde(default = "default_segment_retry_count")]
    pub segment_retry_count: u32,

    /// Fetch-tool log level (default: "INFO")
    #[serde(default = "default_tool_log_level")]
    pub tool_log_level: String,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            save_dir: default_save_dir(),
            temp_dir: default_temp_dir(),
            max_concurrent_downloads: default_max_concurrent(),
            clear_backend: ClearBackend::default(),
            process_timeout: default_process_timeout(),
            run_wait_ceiling: default_run_wait_ceiling(),
            slot_poll_interval: default_slot_poll_interval(),
            dispatch_pause: default_dispatch_pause(),
            segment_retry_count: default_segment_retry_count(),
            tool_log_level: default_tool_log_level(),
        }
    }
}

/// Backend used for clear content
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClearBackend {
    /// Simple segment fetch through ffmpeg
    #[default]
    Ffmpeg,
    /// The manifest fetch tool, without keys
    FetchTool,
}

/// External tool paths
///
/// Unset paths are looked up on `PATH` when `search_path` is true.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Path to the manifest fetch tool (auto-detected as `N_m3u8DL-RE` if None)
    #[serde(default)]
    pub fetch_tool_path: Option<PathBuf>,

    /// Path to the decryption helper (auto-detected as `packager` if None)
    #[serde(default)]
    pub decryption_binary_path: Option<PathBuf>,

    /// Path to ffmpeg (auto-detected if None)
    #[serde(default)]
    pub ffmpeg_path: Option<PathBuf>,

    /// Path to mkvmerge, used to remux matroska output (auto-detected if None)
    #[serde(default)]
    pub mkvmerge_path: Option<PathBuf>,

    /// Whether to search PATH for external binaries if explicit paths not set (default: true)
    #[serde(default = "default_true")]
    pub search_path: bool,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            fetch_tool_path: None,
            decryption_binary_path: None,
            ffmpeg_path: None,
            mkvmerge_path: None,
            search_path: true,
        }
    }
}

impl ToolsConfig {
    /// Resolve a tool path: the explicit path if configured, otherwise a PATH lookup
    ///
    /// # Arguments
    ///
    /// * `explicit` - Configured path, if any
    /// * `binary` - Binary name to search for on PATH
    ///
    /// # Returns
    ///
    /// `None` when the tool is neither configured nor discoverable.
    pub fn resolve(&self, explicit: Option<&PathBuf>, binary: &str) -> Option<PathBuf> {
        if let Some(path) = explicit {
            return Some(path.clone());
        }
        if self.search_path {
            return which::which(binary).ok();
        }
        None
    }
}

/// Eligibility mode
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadMode {
    /// Download everything except deny-listed channels, genres and programs
    #[default]
    #[serde(alias = "blacklist")]
    DenyList,
    /// Download only allow-listed genres and programs
    #[serde(alias = "whitelist")]
    AllowList,
}

/// Eligibility policy
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Target quality (default: 1080p)
    #[serde(default = "default_quality")]
    pub quality: Quality,

    /// Allow-list or deny-list mode (default: deny-list)
    #[serde(default)]
    pub mode: DownloadMode,

    /// Deny-listed channels (substring match on the channel name)
    #[serde(default)]
    pub except_channels: Vec<String>,

    /// Deny-listed programs (substring match, spaces ignored)
    #[serde(default)]
    pub except_programs: Vec<String>,

    /// Deny-listed genres (substring match)
    #[serde(default)]
    pub except_genres: Vec<String>,

    /// Allow-listed programs (substring match, spaces ignored)
    #[serde(default)]
    pub allow_programs: Vec<String>,

    /// Allow-listed genres (substring match)
    #[serde(default)]
    pub allow_genres: Vec<String>,

    /// In allow-list mode, always take episode 1 (default: true)
    #[serde(default = "default_true")]
    pub first_episode_always: bool,

    /// Episode-number exclusion keywords
    #[serde(default = "default_episode_number_keywords")]
    pub episode_number_keywords: Vec<String>,

    /// Episode-title exclusion keywords
    #[serde(default = "default_episode_title_keywords")]
    pub episode_title_keywords: Vec<String>,

    /// Take quick (live, still-airing) content for every program (default: false)
    #[serde(default)]
    pub quick_download: bool,

    /// Programs whose quick content is taken even when `quick_download` is off
    #[serde(default)]
    pub quick_programs: Vec<String>,

    /// Wait for a 2160p stream when only 1080p is available (default: false)
    #[serde(default)]
    pub uhd_wait: bool,

    /// How long to wait for 2160p, in minutes (default: 100)
    #[serde(default = "default_uhd_wait_minutes")]
    pub uhd_wait_minutes: u32,

    /// Re-try items the user stopped (default: false)
    #[serde(default)]
    pub retry_user_abort: bool,

    /// Retry ceiling (default: 20)
    #[serde(default = "default_max_retry")]
    pub max_retry: u32,

    /// UTC offset, in minutes, of clock times embedded in quick-content titles
    /// (default: 540, i.e. +09:00)
    #[serde(default = "default_broadcast_utc_offset_minutes")]
    pub broadcast_utc_offset_minutes: i32,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            quality: default_quality(),
            mode: DownloadMode::default(),
            except_channels: vec![],
            except_programs: vec![],
            except_genres: vec![],
            allow_programs: vec![],
            allow_genres: vec![],
            first_episode_always: true,
            episode_number_keywords: default_episode_number_keywords(),
            episode_title_keywords: default_episode_title_keywords(),
            quick_download: false,
            quick_programs: vec![],
            uhd_wait: false,
            uhd_wait_minutes: default_uhd_wait_minutes(),
            retry_user_abort: false,
            max_retry: default_max_retry(),
            broadcast_utc_offset_minutes: default_broadcast_utc_offset_minutes(),
        }
    }
}

/// Recent-episode scheduling
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Run the recent-episode scheduler (default: true)
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Interval between runs (default: 30 minutes)
    #[serde(default = "default_schedule_interval", with = "duration_serde")]
    pub interval: Duration,

    /// How many days back to ask the catalog for (default: 2)
    #[serde(default = "default_search_days")]
    pub search_days: u32,

    /// Genres to ask the catalog for
    #[serde(default = "default_search_genres")]
    pub search_genres: Vec<String>,

    /// Delete old items at the start of each run (default: false)
    #[serde(default)]
    pub auto_clear: bool,

    /// Age, in days, after which items are deleted by the automatic clear (default: 7)
    #[serde(default = "default_auto_clear_days")]
    pub auto_clear_days: u32,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: default_schedule_interval(),
            search_days: default_search_days(),
            search_genres: default_search_genres(),
            auto_clear: false,
            auto_clear_days: default_auto_clear_days(),
        }
    }
}

/// Operator program queue
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProgramQueueConfig {
    /// Re-queue failed program items at startup (default: false)
    #[serde(default)]
    pub failed_redownload: bool,

    /// Streaming fetch attempts per entry (default: 3)
    #[serde(default = "default_streaming_attempts")]
    pub streaming_attempts: u32,

    /// Pause between streaming fetch attempts (default: 20 seconds)
    #[serde(default = "default_streaming_retry_pause", with = "duration_serde")]
    pub streaming_retry_pause: Duration,
}

impl Default for ProgramQueueConfig {
    fn default() -> Self {
        Self {
            failed_redownload: false,
            streaming_attempts: default_streaming_attempts(),
            streaming_retry_pause: default_streaming_retry_pause(),
        }
    }
}

/// Subtitle retrieval
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SubtitleConfig {
    /// Fetch subtitles (default: true)
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Wanted language codes; `all` takes every track (default: ["all"])
    #[serde(default = "default_subtitle_languages")]
    pub languages: Vec<String>,

    /// Origin header sent with subtitle requests
    #[serde(default)]
    pub origin: Option<String>,

    /// Referer header sent with subtitle requests
    #[serde(default)]
    pub referer: Option<String>,

    /// Request timeout (default: 30 seconds)
    #[serde(default = "default_subtitle_timeout", with = "duration_serde")]
    pub timeout: Duration,
}

impl Default for SubtitleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            languages: default_subtitle_languages(),
            origin: None,
            referer: None,
            timeout: default_subtitle_timeout(),
        }
    }
}

/// Retry configuration for transient catalog failures
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (default: 2)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial delay before first retry (default: 1 second)
    #[serde(default = "default_initial_delay", with = "duration_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 10 seconds)
    #[serde(default = "default_max_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: true,
        }
    }
}

/// Data storage configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Database path (default: "./vod-dl.db")
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

/// Main configuration for VodDownloader
///
/// Each section maps to a TOML table:
/// - [`download`](DownloadConfig): directories, concurrency, supervision limits
/// - [`tools`](ToolsConfig): external binary paths
/// - [`policy`](PolicyConfig): eligibility rules
/// - [`schedule`](ScheduleConfig): recent-episode scheduling
/// - [`program_queue`](ProgramQueueConfig): operator queue
/// - [`subtitles`](SubtitleConfig): subtitle retrieval
/// - [`retry`](RetryConfig): catalog retry backoff
/// - [`persistence`](PersistenceConfig): database location
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Download behavior settings
    #[serde(default)]
    pub download: DownloadConfig,

    /// External tool paths
    #[serde(default)]
    pub tools: ToolsConfig,

    /// Eligibility policy
    #[serde(default)]
    pub policy: PolicyConfig,

    /// Recent-episode scheduling
    #[serde(default)]
    pub schedule: ScheduleConfig,

    /// Operator program queue
    #[serde(default)]
    pub program_queue: ProgramQueueConfig,

    /// Subtitle retrieval
    #[serde(default)]
    pub subtitles: SubtitleConfig,

    /// Catalog retry backoff
    #[serde(default)]
    pub retry: RetryConfig,

    /// Data storage
    #[serde(default)]
    pub persistence: PersistenceConfig,
}

impl Config {
    /// Parse a configuration from TOML text and validate it
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).map_err(|e| Error::Config {
            message: format!("Failed to parse configuration: {}", e),
            key: None,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file
    ///
    /// # Arguments
    ///
    /// * `path` - Path to a TOML file
    pub async fn load(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path).await.map_err(|e| Error::Config {
            message: format!("Failed to read {}: {}", path.display(), e),
            key: None,
        })?;
        Self::from_toml_str(&content)
    }

    /// Check settings that have no sensible meaning when zero or empty
    pub fn validate(&self) -> Result<()> {
        if self.download.max_concurrent_downloads == 0 {
            return Err(Error::Config {
                message: "max_concurrent_downloads must be at least 1".to_string(),
                key: Some("download.max_concurrent_downloads".to_string()),
            });
        }
        if self.policy.max_retry == 0 {
            return Err(Error::Config {
                message: "max_retry must be at least 1".to_string(),
                key: Some("policy.max_retry".to_string()),
            });
        }
        if self.download.slot_poll_interval.is_zero() {
            return Err(Error::Config {
                message: "slot_poll_interval must be at least one second".to_string(),
                key: Some("download.slot_poll_interval".to_string()),
            });
        }
        if self.schedule.interval.is_zero() {
            return Err(Error::Config {
                message: "interval must be at least one second".to_string(),
                key: Some("schedule.interval".to_string()),
            });
        }
        if self.download.save_dir.as_os_str().is_empty() {
            return Err(Error::Config {
                message: "save_dir must not be empty".to_string(),
                key: Some("download.save_dir".to_string()),
            });
        }
        if self.policy.broadcast_utc_offset_minutes.abs() >= 24 * 60 {
            return Err(Error::Config {
                message: "broadcast_utc_offset_minutes must be within one day".to_string(),
                key: Some("policy.broadcast_utc_offset_minutes".to_string()),
            });
        }
        Ok(())
    }
}

fn default_save_dir() -> PathBuf {
    PathBuf::from("./downloads")
}

fn default_temp_dir() -> PathBuf {
    PathBuf::from("./temp")
}

fn default_max_concurrent() -> usize {
    4
}

fn default_process_timeout() -> Duration {
    Duration::from_secs(3600)
}

fn default_run_wait_ceiling() -> Duration {
    Duration::from_secs(3600)
}

fn default_slot_poll_interval() -> Duration {
    Duration::from_secs(10)
}

fn default_dispatch_pause() -> Duration {
    Duration::from_secs(10)
}

fn default_segment_retry_count() -> u32 {
    3
}

fn default_tool_log_level() -> String {
    "INFO".to_string()
}

fn default_true() -> bool {
    true
}

fn default_quality() -> Quality {
    Quality::P1080
}

fn split_list(list: &str) -> Vec<String> {
    list.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect()
}

fn default_episode_number_keywords() -> Vec<String> {
    split_list("특집,비하인드,스페셜,선공개,티저,메이킹,예고")
}

fn default_episode_title_keywords() -> Vec<String> {
    split_list("예고")
}

fn default_uhd_wait_minutes() -> u32 {
    100
}

fn default_max_retry() -> u32 {
    20
}

fn default_broadcast_utc_offset_minutes() -> i32 {
    9 * 60
}

fn default_schedule_interval() -> Duration {
    Duration::from_secs(30 * 60)
}

fn default_search_days() -> u32 {
    2
}

fn default_search_genres() -> Vec<String> {
    split_list("드라마,예능,시사,교양,해외시리즈,애니메이션,스포츠,키즈,시사교양")
}

fn default_auto_clear_days() -> u32 {
    7
}

fn default_streaming_attempts() -> u32 {
    3
}

fn default_streaming_retry_pause() -> Duration {
    Duration::from_secs(20)
}

fn default_subtitle_languages() -> Vec<String> {
    vec!["all".to_string()]
}

fn default_subtitle_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_max_attempts() -> u32 {
    2
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(10)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_database_path() -> PathBuf {
    PathBuf::from("./vod-dl.db")
}

// Duration serialization helper (whole seconds)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

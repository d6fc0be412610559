//! Core types for vod-dl

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Unique identifier for a catalog item (sqlite rowid)
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(pub i64);

impl ItemId {
    /// Get the inner i64 value
    pub fn get(&self) -> i64 {
        self.0
    }
}

impl From<i64> for ItemId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for ItemId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for ItemId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

impl sqlx::Type<sqlx::Sqlite> for ItemId {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <i64 as sqlx::Type<sqlx::Sqlite>>::type_info()
    }

    fn compatible(ty: &sqlx::sqlite::SqliteTypeInfo) -> bool {
        <i64 as sqlx::Type<sqlx::Sqlite>>::compatible(ty)
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for ItemId {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        sqlx::Encode::<sqlx::Sqlite>::encode_by_ref(&self.0, buf)
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for ItemId {
    fn decode(value: sqlx::sqlite::SqliteValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let id = <i64 as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
        Ok(Self(id))
    }
}

/// Correlation id for one backend run of one item
///
/// Allocated by the downloader from a monotonic counter; every
/// [`BackendEvent`](crate::backend::BackendEvent) carries it back.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InvocationId(pub u64);

impl std::fmt::Display for InvocationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "inv-{}", self.0)
    }
}

/// Persisted outcome code
///
/// The integer values are stable and shared with external tooling. `Eligible` (0) is the
/// only state from which a download is started.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "i32", from = "i32")]
pub enum OutcomeCode {
    /// 0: no abort reason, ready for dispatch
    Eligible,
    /// 1: the simple fetch backend failed to start or errored
    ToolStartError,
    /// 2: the simple fetch backend timed out
    ToolTimeOver,
    /// 3: the simple fetch backend was force-stopped
    ForceStop,
    /// 4: the stream answered HTTP 403
    HttpForbidden,
    /// 5: target is 2160p, only 1080p is available, wait window still open
    UhdWait,
    /// 6: no quality (reserved)
    NoQuality,
    /// 7: quick content without a readable broadcast timestamp
    NoPermission,
    /// 8: quick content still airing
    QuickStillAiring,
    /// 9: retry ceiling reached
    TooManyRetries,
    /// 11: quick content not enabled for this program
    QuickPass,
    /// 12: channel is deny-listed
    ExcludedChannel,
    /// 13: program is deny-listed
    ExcludedProgram,
    /// 14: allow-list mode and nothing matched
    AllowListMiss,
    /// 15: episode number matched an exclusion keyword
    ExcludedEpisodeNumber,
    /// 16: episode title matched an exclusion keyword
    ExcludedEpisodeTitle,
    /// 17: genre is deny-listed
    ExcludedGenre,
    /// 18: preview-only playback URL
    Preview,
    /// 21: many retry (reserved)
    ManyRetry,
    /// 30: stopped by the user
    UserStop,
    /// 31: download in progress
    Downloading,
    /// 32: download completed
    Completed,
    /// 33: metadata or credentials could not be refreshed
    RefreshFailed,
    /// 34: the manifest backend reported an error
    DownloadError,
    /// A code this version does not know; preserved as-is
    Unknown(i32),
}

impl OutcomeCode {
    /// Convert a stored integer to an outcome code
    pub fn from_i32(code: i32) -> Self {
        match code {
            0 => Self::Eligible,
            1 => Self::ToolStartError,
            2 => Self::ToolTimeOver,
            3 => Self::ForceStop,
            4 => Self::HttpForbidden,
            5 => Self::UhdWait,
            6 => Self::NoQuality,
            7 => Self::NoPermission,
            8 => Self::QuickStillAiring,
            9 => Self::TooManyRetries,
            11 => Self::QuickPass,
            12 => Self::ExcludedChannel,
            13 => Self::ExcludedProgram,
            14 => Self::AllowListMiss,
            15 => Self::ExcludedEpisodeNumber,
            16 => Self::ExcludedEpisodeTitle,
            17 => Self::ExcludedGenre,
            18 => Self::Preview,
            21 => Self::ManyRetry,
            30 => Self::UserStop,
            31 => Self::Downloading,
            32 => Self::Completed,
            33 => Self::RefreshFailed,
            34 => Self::DownloadError,
            other => Self::Unknown(other),
        }
    }

    /// Convert an outcome code to its stored integer
    pub fn to_i32(&self) -> i32 {
        match self {
            Self::Eligible => 0,
            Self::ToolStartError => 1,
            Self::ToolTimeOver => 2,
            Self::ForceStop => 3,
            Self::HttpForbidden => 4,
            Self::UhdWait => 5,
            Self::NoQuality => 6,
            Self::NoPermission => 7,
            Self::QuickStillAiring => 8,
            Self::TooManyRetries => 9,
            Self::QuickPass => 11,
            Self::ExcludedChannel => 12,
            Self::ExcludedProgram => 13,
            Self::AllowListMiss => 14,
            Self::ExcludedEpisodeNumber => 15,
            Self::ExcludedEpisodeTitle => 16,
            Self::ExcludedGenre => 17,
            Self::Preview => 18,
            Self::ManyRetry => 21,
            Self::UserStop => 30,
            Self::Downloading => 31,
            Self::Completed => 32,
            Self::RefreshFailed => 33,
            Self::DownloadError => 34,
            Self::Unknown(code) => *code,
        }
    }

    /// Human-readable status shown to operators
    pub fn describe(&self) -> &'static str {
        match self {
            Self::Eligible => "ready",
            Self::ToolStartError => "fetch tool failed to start",
            Self::ToolTimeOver => "fetch tool timed out",
            Self::ForceStop => "fetch tool force-stopped",
            Self::HttpForbidden => "stream returned HTTP 403",
            Self::UhdWait => "waiting for 2160p",
            Self::NoQuality => "no quality available",
            Self::NoPermission => "no broadcast timestamp",
            Self::QuickStillAiring => "still airing",
            Self::TooManyRetries => "too many retries",
            Self::QuickPass => "skipped: quick content",
            Self::ExcludedChannel => "skipped: excluded channel",
            Self::ExcludedProgram => "skipped: excluded program",
            Self::AllowListMiss => "skipped: not on allow list",
            Self::ExcludedEpisodeNumber => "skipped: episode number keyword",
            Self::ExcludedEpisodeTitle => "skipped: episode title keyword",
            Self::ExcludedGenre => "skipped: excluded genre",
            Self::Preview => "skipped: preview",
            Self::ManyRetry => "many retries",
            Self::UserStop => "stopped by user",
            Self::Downloading => "downloading",
            Self::Completed => "completed",
            Self::RefreshFailed => "data refresh failed",
            Self::DownloadError => "download error",
            Self::Unknown(_) => "unknown",
        }
    }
}

impl From<i32> for OutcomeCode {
    fn from(code: i32) -> Self {
        Self::from_i32(code)
    }
}

impl From<OutcomeCode> for i32 {
    fn from(code: OutcomeCode) -> Self {
        code.to_i32()
    }
}

impl std::fmt::Display for OutcomeCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.to_i32(), self.describe())
    }
}

/// Catalog content classification
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    /// On-demand episode
    Vod,
    /// Live broadcast still in progress ("quick" content)
    Onairvod,
    /// Movie
    Movie,
}

impl ContentType {
    /// Stored string form
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Vod => "vod",
            Self::Onairvod => "onairvod",
            Self::Movie => "movie",
        }
    }

    /// Parse the stored string form; unknown values are treated as on-demand
    pub fn parse(s: &str) -> Self {
        match s {
            "onairvod" => Self::Onairvod,
            "movie" => Self::Movie,
            _ => Self::Vod,
        }
    }

    /// Derive the classification from a catalog type string (`onair` means quick
    /// content)
    pub fn from_catalog_type(kind: &str) -> Self {
        match kind {
            "onair" => Self::Onairvod,
            "movie" => Self::Movie,
            _ => Self::Vod,
        }
    }
}

/// How an item entered the store
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    /// Discovered by the recent-episode scheduler
    Recent,
    /// Explicitly enqueued by an operator
    Program,
}

impl Origin {
    /// Stored string form
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Recent => "recent",
            Self::Program => "program",
        }
    }

    /// Parse the stored string form (missing or unknown values are `Recent`)
    pub fn parse(s: &str) -> Self {
        match s {
            "program" => Self::Program,
            _ => Self::Recent,
        }
    }
}

/// Streaming quality tier
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Quality {
    /// 360p
    #[serde(rename = "360p")]
    P360,
    /// 480p
    #[serde(rename = "480p")]
    P480,
    /// 720p
    #[serde(rename = "720p")]
    P720,
    /// 1080p
    #[serde(rename = "1080p")]
    P1080,
    /// 2160p
    #[serde(rename = "2160p")]
    P2160,
}

impl Quality {
    /// Catalog string form
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::P360 => "360p",
            Self::P480 => "480p",
            Self::P720 => "720p",
            Self::P1080 => "1080p",
            Self::P2160 => "2160p",
        }
    }

    /// Parse the catalog string form
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "360p" => Some(Self::P360),
            "480p" => Some(Self::P480),
            "720p" => Some(Self::P720),
            "1080p" => Some(Self::P1080),
            "2160p" => Some(Self::P2160),
            _ => None,
        }
    }
}

impl std::fmt::Display for Quality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Streaming request flavour
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamAction {
    /// DASH manifest (encrypted content)
    Dash,
    /// HLS playlist (clear content)
    Hls,
}

impl StreamAction {
    /// Catalog string form
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Dash => "dash",
            Self::Hls => "hls",
        }
    }
}

/// Listing filter for operator views
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ItemFilter {
    /// Everything
    All,
    /// `completed = true`
    Completed,
    /// Code 31 (download in progress or interrupted)
    Uncompleted,
    /// `user_aborted = true`
    UserAborted,
    /// `transient_fault = true`
    PacketFault,
    /// Codes 1 through 9
    DownloadFaults,
    /// Codes 15 and 16
    KeywordExcluded,
    /// A specific code
    Code(OutcomeCode),
}

/// Snapshot of one operator queue entry
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QueueEntryInfo {
    /// Monotonic queue id
    pub queue_id: u64,
    /// Backing item
    pub item_id: ItemId,
    /// Content id
    pub content_id: String,
    /// Requested quality
    pub quality: Quality,
    /// Human-readable status ("waiting", "downloading", "URL failed", ...)
    pub status_text: String,
    /// Last raw backend status integer (-1 when none)
    pub backend_status: i32,
    /// Percent complete (0-100)
    pub percent: f32,
    /// Output filename once known
    pub filename: Option<String>,
    /// When the entry was queued
    pub queued_at: DateTime<Utc>,
    /// Cancel requested
    pub cancel_requested: bool,
    /// Encrypted content
    pub is_drm: bool,
    /// A backend run is active
    pub is_downloading: bool,
    /// Finished successfully
    pub completed: bool,
}

/// Event emitted by the downloader
///
/// Events are broadcast to all subscribers; see
/// [`VodDownloader::subscribe`](crate::VodDownloader::subscribe).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Item added to a queue (recent intake or operator queue)
    Queued {
        /// Item id
        item_id: ItemId,
        /// Content id
        content_id: String,
    },

    /// A backend run was started
    Dispatched {
        /// Item id
        item_id: ItemId,
        /// Invocation id
        invocation: InvocationId,
        /// Output filename
        filename: String,
    },

    /// Progress reported by a running backend
    Progress {
        /// Item id
        item_id: ItemId,
        /// Percent complete, when known
        #[serde(skip_serializing_if = "Option::is_none")]
        percent: Option<f32>,
    },

    /// Download finished successfully
    Completed {
        /// Item id
        item_id: ItemId,
        /// Final output path
        path: std::path::PathBuf,
    },

    /// Download ended with a failure code
    Failed {
        /// Item id
        item_id: ItemId,
        /// Code recorded on the item
        code: OutcomeCode,
    },

    /// Download stopped by the user
    Stopped {
        /// Item id
        item_id: ItemId,
    },

    /// A scheduled run started
    RunStarted,

    /// A scheduled run finished
    RunFinished {
        /// Number of downloads dispatched in this run
        dispatched: usize,
    },

    /// Downloader shutdown
    Shutdown,
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_codes_keep_their_wire_values() {
        let cases = [
            (OutcomeCode::Eligible, 0),
            (OutcomeCode::ToolStartError, 1),
            (OutcomeCode::ToolTimeOver, 2),
            (OutcomeCode::ForceStop, 3),
            (OutcomeCode::HttpForbidden, 4),
            (OutcomeCode::UhdWait, 5),
            (OutcomeCode::NoQuality, 6),
            (OutcomeCode::NoPermission, 7),
            (OutcomeCode::QuickStillAiring, 8),
            (OutcomeCode::TooManyRetries, 9),
            (OutcomeCode::QuickPass, 11),
            (OutcomeCode::ExcludedChannel, 12),
            (OutcomeCode::ExcludedProgram, 13),
            (OutcomeCode::AllowListMiss, 14),
            (OutcomeCode::ExcludedEpisodeNumber, 15),
            (OutcomeCode::ExcludedEpisodeTitle, 16),
            (OutcomeCode::ExcludedGenre, 17),
            (OutcomeCode::Preview, 18),
            (OutcomeCode::ManyRetry, 21),
            (OutcomeCode::UserStop, 30),
            (OutcomeCode::Downloading, 31),
            (OutcomeCode::Completed, 32),
            (OutcomeCode::RefreshFailed, 33),
            (OutcomeCode::DownloadError, 34),
        ];

        for (code, value) in cases {
            assert_eq!(code.to_i32(), value, "{code:?} should encode to {value}");
            assert_eq!(OutcomeCode::from_i32(value), code, "{value} should decode to {code:?}");
        }
    }

    #[test]
    fn unknown_outcome_codes_are_preserved() {
        let code = OutcomeCode::from_i32(10);
        assert_eq!(code, OutcomeCode::Unknown(10));
        assert_eq!(code.to_i32(), 10, "gaps in the code space must survive a save");
    }

    #[test]
    fn outcome_code_serializes_as_integer() {
        let json = serde_json::to_string(&OutcomeCode::UhdWait).unwrap();
        assert_eq!(json, "5");
        let back: OutcomeCode = serde_json::from_str("33").unwrap();
        assert_eq!(back, OutcomeCode::RefreshFailed);
    }

    #[test]
    fn content_type_from_catalog_type() {
        assert_eq!(ContentType::from_catalog_type("onair"), ContentType::Onairvod);
        assert_eq!(ContentType::from_catalog_type("general"), ContentType::Vod);
        assert_eq!(ContentType::parse(ContentType::Movie.as_str()), ContentType::Movie);
    }

    #[test]
    fn quality_parses_catalog_strings() {
        assert_eq!(Quality::parse("2160p"), Some(Quality::P2160));
        assert_eq!(Quality::parse(" 1080p "), Some(Quality::P1080));
        assert_eq!(Quality::parse("4k"), None);
        assert!(Quality::P2160 > Quality::P1080);
    }
}

//! Catalog item domain model

use crate::catalog::{ContentDetails, StreamingGrant};
use crate::types::{ContentType, ItemId, Origin, OutcomeCode, Quality};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;

/// Genre recorded when the catalog provides none
pub const DEFAULT_GENRE: &str = "일반";

/// One downloadable unit (episode or movie cut)
///
/// Items are created by catalog intake or operator enqueue and then mutated in place by
/// the eligibility filter, the refresher, dispatch and completion handling. The
/// [`outcome_code`](Self::outcome_code) together with the `completed` and
/// `user_aborted` flags encodes where the item is in its lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogItem {
    /// Store id
    pub id: ItemId,
    /// How the item entered the store
    pub origin: Origin,
    /// Stable catalog identifier
    pub content_id: String,
    /// Content classification
    pub content_type: ContentType,
    /// Raw catalog type string
    pub vod_type: Option<String>,
    /// Channel name
    pub channel_name: String,
    /// Program id
    pub program_id: String,
    /// Program title
    pub program_title: String,
    /// Release date as given by the catalog
    pub release_date: Option<String>,
    /// Episode number (free text)
    pub episode_number: String,
    /// Episode title
    pub episode_title: String,
    /// Genre, filled by the refresher
    pub program_genre: Option<String>,
    /// Thumbnail URL
    pub image: Option<String>,
    /// Quality requested by an operator (program items)
    pub requested_quality: Option<Quality>,
    /// Quality resolved from the streaming document
    pub quality: Option<Quality>,
    /// Raw catalog listing entry
    pub catalog_json: Option<Value>,
    /// Raw content-detail document
    pub contents_json: Option<Value>,
    /// Raw streaming credential document
    pub streaming_json: Option<Value>,
    /// URL handed to the backend
    pub play_url: Option<String>,
    /// Output filename
    pub filename: Option<String>,
    /// Encrypted content
    pub drm: bool,
    /// When the item was first stored
    pub created_at: DateTime<Utc>,
    /// When the last download started
    pub start_time: Option<DateTime<Utc>>,
    /// When the last download ended
    pub end_time: Option<DateTime<Utc>>,
    /// Wall-clock download time in seconds
    pub download_time_secs: Option<i64>,
    /// Media duration in seconds, as reported by the backend
    pub duration_secs: Option<i64>,
    /// Output size in bytes
    pub filesize: Option<i64>,
    /// Output size, human readable
    pub filesize_str: Option<String>,
    /// Average download speed, human readable
    pub download_speed: Option<String>,
    /// Output directory
    pub save_path: Option<PathBuf>,
    /// Last raw backend status integer (-1 when none)
    pub backend_status: i32,
    /// Downloaded successfully
    pub completed: bool,
    /// Stopped by the user
    pub user_aborted: bool,
    /// Last run ended with a packet fault
    pub transient_fault: bool,
    /// Packet faults reported by the last run
    pub packet_faults: i64,
    /// Retry counter (monotonic until an operator reset)
    pub retry_count: u32,
    /// Persisted outcome
    pub outcome_code: OutcomeCode,
}

impl CatalogItem {
    /// A blank item with just an origin and content id
    ///
    /// The id is `0` until the item is stored.
    pub fn new(origin: Origin, content_id: impl Into<String>) -> Self {
        Self {
            id: ItemId(0),
            origin,
            content_id: content_id.into(),
            content_type: ContentType::Vod,
            vod_type: None,
            channel_name: String::new(),
            program_id: String::new(),
            program_title: String::new(),
            release_date: None,
            episode_number: String::new(),
            episode_title: String::new(),
            program_genre: None,
            image: None,
            requested_quality: None,
            quality: None,
            catalog_json: None,
            contents_json: None,
            streaming_json: None,
            play_url: None,
            filename: None,
            drm: false,
            created_at: Utc::now(),
            start_time: None,
            end_time: None,
            download_time_secs: None,
            duration_secs: None,
            filesize: None,
            filesize_str: None,
            download_speed: None,
            save_path: None,
            backend_status: -1,
            completed: false,
            user_aborted: false,
            transient_fault: false,
            packet_faults: 0,
            retry_count: 0,
            outcome_code: OutcomeCode::Eligible,
        }
    }

    /// Live content that may still be airing
    pub fn is_quick(&self) -> bool {
        self.content_type == ContentType::Onairvod
    }

    /// Final output path, once both the directory and filename are known
    pub fn output_path(&self) -> Option<PathBuf> {
        match (&self.save_path, &self.filename) {
            (Some(dir), Some(name)) => Some(dir.join(name)),
            _ => None,
        }
    }

    /// Typed view of the stored content details
    pub fn details(&self) -> Option<ContentDetails> {
        self.contents_json.as_ref().map(ContentDetails::from_value)
    }

    /// Typed view of the stored streaming document
    pub fn grant(&self) -> Option<StreamingGrant> {
        self.streaming_json.as_ref().map(StreamingGrant::from_value)
    }

    /// Record a content-detail document: genre and DRM flag come from it
    pub fn set_contents(&mut self, contents: Value) {
        let details = ContentDetails::from_value(&contents);
        self.program_genre = Some(details.genre.unwrap_or_else(|| DEFAULT_GENRE.to_string()));
        self.drm = details.drm;
        self.contents_json = Some(contents);
    }

    /// Record a streaming document with the filename the catalog derived for it
    ///
    /// Streams without an HLS variant are muxed to matroska, so the filename's `.mp4`
    /// suffix becomes `.mkv`.
    pub fn set_streaming(&mut self, streaming: Value, filename: String) {
        let grant = StreamingGrant::from_value(&streaming);
        self.quality = grant.quality.as_deref().and_then(Quality::parse);
        self.filename = Some(if grant.hls.is_some() {
            filename
        } else {
            filename.replace(".mp4", ".mkv")
        });
        self.play_url = grant.playback_url().map(str::to_string);
        self.streaming_json = Some(streaming);
    }

    /// Short label used in logs
    pub fn label(&self) -> String {
        if self.episode_number.is_empty() {
            format!("{} ({})", self.program_title, self.content_id)
        } else {
            format!(
                "{} [{}] ({})",
                self.program_title, self.episode_number, self.content_id
            )
        }
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn missing_genre_defaults_to_general() {
        let mut item = CatalogItem::new(Origin::Recent, "C1");
        item.set_contents(json!({"drms": "y"}));
        assert_eq!(item.program_genre.as_deref(), Some(DEFAULT_GENRE));
        assert!(item.drm);
    }

    #[test]
    fn streams_without_hls_are_muxed_to_matroska() {
        let mut item = CatalogItem::new(Origin::Recent, "C1");
        item.set_streaming(
            json!({
                "quality": "1080p",
                "playurl": "https://cdn.example/top",
                "play_info": {"uri": "https://cdn.example/a.mpd"}
            }),
            "Show.E1.1080p.mp4".to_string(),
        );
        assert_eq!(item.filename.as_deref(), Some("Show.E1.1080p.mkv"));
        assert_eq!(item.play_url.as_deref(), Some("https://cdn.example/a.mpd"));
        assert_eq!(item.quality, Some(Quality::P1080));
    }

    #[test]
    fn hls_streams_keep_their_filename() {
        let mut item = CatalogItem::new(Origin::Recent, "C1");
        item.set_streaming(
            json!({"quality": "720p", "play_info": {"hls": "https://cdn.example/a.m3u8"}}),
            "Show.E1.720p.mp4".to_string(),
        );
        assert_eq!(item.filename.as_deref(), Some("Show.E1.720p.mp4"));
        assert_eq!(item.play_url.as_deref(), Some("https://cdn.example/a.m3u8"));
    }

    #[test]
    fn output_path_needs_directory_and_name() {
        let mut item = CatalogItem::new(Origin::Recent, "C1");
        assert!(item.output_path().is_none());
        item.save_path = Some(PathBuf::from("/media"));
        item.filename = Some("a.mp4".into());
        assert_eq!(item.output_path(), Some(PathBuf::from("/media/a.mp4")));
    }
}

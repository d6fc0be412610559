//! Database layer for vod-dl
//!
//! Handles SQLite persistence for catalog items and runtime state.
//!
//! ## Submodules
//!
//! Methods on [`Database`] are organized by domain:
//! - [`migrations`] — Database lifecycle, schema migrations
//! - [`items`] — Catalog item CRUD, listing filters, operator resets
//! - [`state`] — Runtime state (shutdown tracking)

use crate::catalog::NewEpisode;
use crate::error::DatabaseError;
use crate::item::CatalogItem;
use crate::types::{ContentType, ItemId, Origin, OutcomeCode, Quality};
use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;
use sqlx::{FromRow, sqlite::SqlitePool};
use std::path::PathBuf;

mod items;
mod migrations;
mod state;

/// Column list shared by every item query
pub(crate) const ITEM_COLUMNS: &str = r#"
    id, origin, content_id, content_type, vod_type, channel_name, program_id,
    program_title, release_date, episode_number, episode_title, program_genre, image,
    requested_quality, quality, catalog_json, contents_json, streaming_json, play_url,
    filename, drm, created_at, start_time, end_time, download_time_secs, duration_secs,
    filesize, filesize_str, download_speed, save_path, backend_status, completed,
    user_aborted, transient_fault, packet_faults, retry_count, outcome_code
"#;

/// New catalog item to be inserted into the database
#[derive(Debug, Clone)]
pub struct NewCatalogItem {
    /// How the item entered the store
    pub origin: Origin,
    /// Catalog content id
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
    /// Release date
    pub release_date: Option<String>,
    /// Episode number
    pub episode_number: String,
    /// Episode title
    pub episode_title: String,
    /// Thumbnail URL
    pub image: Option<String>,
    /// Operator-requested quality (program items)
    pub requested_quality: Option<Quality>,
    /// Raw catalog listing entry
    pub catalog_json: Option<Value>,
}

impl NewCatalogItem {
    /// Build a recent-intake item from a catalog listing entry
    pub fn from_episode(episode: &NewEpisode, raw: Value) -> Self {
        Self {
            origin: Origin::Recent,
            content_id: episode.contentid.clone(),
            content_type: episode.content_type(),
            vod_type: Some(episode.kind.clone()).filter(|s| !s.is_empty()),
            channel_name: episode.channelname.clone(),
            program_id: episode.programid.clone(),
            program_title: episode.programtitle.clone(),
            release_date: Some(episode.releasedate.clone()).filter(|s| !s.is_empty()),
            episode_number: episode.episodenumber.clone(),
            episode_title: episode.episodetitle.clone(),
            image: Some(normalize_url(&episode.image)).filter(|s| !s.is_empty()),
            requested_quality: None,
            catalog_json: Some(raw),
        }
    }

    /// Build an operator program item; metadata is filled from content details later
    pub fn program(content_id: impl Into<String>, quality: Quality) -> Self {
        Self {
            origin: Origin::Program,
            content_id: content_id.into(),
            content_type: ContentType::Vod,
            vod_type: None,
            channel_name: String::new(),
            program_id: String::new(),
            program_title: String::new(),
            release_date: None,
            episode_number: String::new(),
            episode_title: String::new(),
            image: None,
            requested_quality: Some(quality),
            catalog_json: None,
        }
    }
}

/// Protocol-relative thumbnail URLs get an explicit scheme
fn normalize_url(url: &str) -> String {
    let url = url.trim();
    if url.starts_with("//") {
        format!("https:{}", url)
    } else if !url.is_empty() && !url.contains("://") {
        format!("https://{}", url)
    } else {
        url.to_string()
    }
}

/// Catalog item record from database (raw from SQLite)
#[derive(Debug, Clone, FromRow)]
pub struct CatalogRow {
    /// Unique database ID
    pub id: i64,
    /// `recent` or `program`
    pub origin: String,
    /// Catalog content id
    pub content_id: String,
    /// `vod`, `onairvod` or `movie`
    pub content_type: String,
    /// Raw catalog type string
    pub vod_type: Option<String>,
    /// Channel name
    pub channel_name: String,
    /// Program id
    pub program_id: String,
    /// Program title
    pub program_title: String,
    /// Release date
    pub release_date: Option<String>,
    /// Episode number
    pub episode_number: String,
    /// Episode title
    pub episode_title: String,
    /// Genre
    pub program_genre: Option<String>,
    /// Thumbnail URL
    pub image: Option<String>,
    /// Requested quality string
    pub requested_quality: Option<String>,
    /// Resolved quality string
    pub quality: Option<String>,
    /// Catalog listing JSON
    pub catalog_json: Option<String>,
    /// Content details JSON
    pub contents_json: Option<String>,
    /// Streaming JSON
    pub streaming_json: Option<String>,
    /// Backend URL
    pub play_url: Option<String>,
    /// Output filename
    pub filename: Option<String>,
    /// Encrypted content (0/1)
    pub drm: i32,
    /// Unix timestamp when created
    pub created_at: i64,
    /// Unix timestamp when the last download started
    pub start_time: Option<i64>,
    /// Unix timestamp when the last download ended
    pub end_time: Option<i64>,
    /// Download time in seconds
    pub download_time_secs: Option<i64>,
    /// Media duration in seconds
    pub duration_secs: Option<i64>,
    /// Output size in bytes
    pub filesize: Option<i64>,
    /// Output size, human readable
    pub filesize_str: Option<String>,
    /// Download speed, human readable
    pub download_speed: Option<String>,
    /// Output directory
    pub save_path: Option<String>,
    /// Last raw backend status
    pub backend_status: i32,
    /// Completed flag (0/1)
    pub completed: i32,
    /// User-abort flag (0/1)
    pub user_aborted: i32,
    /// Packet-fault flag (0/1)
    pub transient_fault: i32,
    /// Packet-fault counter
    pub packet_faults: i64,
    /// Retry counter
    pub retry_count: i64,
    /// Outcome code integer
    pub outcome_code: i32,
}

fn timestamp(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).single().unwrap_or_else(Utc::now)
}

fn json_column(id: i64, column: &str, text: Option<String>) -> Result<Option<Value>, DatabaseError> {
    text.map(|t| {
        serde_json::from_str(&t).map_err(|e| DatabaseError::CorruptRow {
            id,
            reason: format!("{} is not valid JSON: {}", column, e),
        })
    })
    .transpose()
}

impl TryFrom<CatalogRow> for CatalogItem {
    type Error = DatabaseError;

    fn try_from(row: CatalogRow) -> Result<Self, Self::Error> {
        let id = row.id;
        Ok(CatalogItem {
            id: ItemId(row.id),
            origin: Origin::parse(&row.origin),
            content_id: row.content_id,
            content_type: ContentType::parse(&row.content_type),
            vod_type: row.vod_type,
            channel_name: row.channel_name,
            program_id: row.program_id,
            program_title: row.program_title,
            release_date: row.release_date,
            episode_number: row.episode_number,
            episode_title: row.episode_title,
            program_genre: row.program_genre,
            image: row.image,
            requested_quality: row.requested_quality.as_deref().and_then(Quality::parse),
            quality: row.quality.as_deref().and_then(Quality::parse),
            catalog_json: json_column(id, "catalog_json", row.catalog_json)?,
            contents_json: json_column(id, "contents_json", row.contents_json)?,
            streaming_json: json_column(id, "streaming_json", row.streaming_json)?,
            play_url: row.play_url,
            filename: row.filename,
            drm: row.drm != 0,
            created_at: timestamp(row.created_at),
            start_time: row.start_time.map(timestamp),
            end_time: row.end_time.map(timestamp),
            download_time_secs: row.download_time_secs,
            duration_secs: row.duration_secs,
            filesize: row.filesize,
            filesize_str: row.filesize_str,
            download_speed: row.download_speed,
            save_path: row.save_path.map(PathBuf::from),
            backend_status: row.backend_status,
            completed: row.completed != 0,
            user_aborted: row.user_aborted != 0,
            transient_fault: row.transient_fault != 0,
            packet_faults: row.packet_faults,
            retry_count: u32::try_from(row.retry_count.max(0)).unwrap_or(u32::MAX),
            outcome_code: OutcomeCode::from_i32(row.outcome_code),
        })
    }
}

/// Database handle for vod-dl
pub struct Database {
    pool: SqlitePool,
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

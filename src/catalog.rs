//! Catalog collaborator interface
//!
//! The catalog is the remote service that lists new episodes, serves content details and
//! issues short-lived streaming credentials. It is supplied by the embedding application
//! through [`CatalogApi`]. Documents stay opaque [`serde_json::Value`]s on the item (they
//! are persisted verbatim); the typed views in this module read the handful of fields the
//! pipeline depends on.

use crate::error::CatalogError;
use crate::types::{ContentType, Quality, StreamAction};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;

/// How long a credential is trusted when the play URL carries no explicit expiry
pub const DEFAULT_CREDENTIAL_TTL_SECS: i64 = 60 * 60;

/// Remote catalog
///
/// Implementations return `Ok(None)` when the catalog answers but has nothing for the
/// request; the refresher records that as a data-refresh failure. Transport problems
/// should be reported as [`CatalogError::Unavailable`] so they are retried.
#[async_trait]
pub trait CatalogApi: Send + Sync {
    /// List recently published episodes
    ///
    /// # Arguments
    ///
    /// * `days` - How many days back to look
    /// * `genres` - Genres to include
    async fn new_episodes(&self, days: u32, genres: &[String]) -> Result<Vec<Value>, CatalogError>;

    /// Fetch the content-detail document for a content id
    async fn content_details(&self, content_id: &str) -> Result<Option<Value>, CatalogError>;

    /// Fetch a streaming credential document
    async fn streaming(
        &self,
        content_type: ContentType,
        content_id: &str,
        quality: Quality,
        action: StreamAction,
    ) -> Result<Option<Value>, CatalogError>;

    /// Whether a previously issued credential must be refreshed before use
    fn is_expired(&self, play_url: &str, issued_at: Option<&Value>, now: DateTime<Utc>) -> bool {
        credential_expired(play_url, issued_at, now)
    }

    /// Output filename for a content-detail document and resolved quality
    fn output_filename(&self, details: &Value, quality: &str) -> String {
        default_output_filename(details, quality)
    }

    /// Short name used in logs
    fn name(&self) -> &'static str {
        "catalog"
    }
}

/// Catalog listing entry
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NewEpisode {
    /// Content id
    pub contentid: String,
    /// Channel name
    pub channelname: String,
    /// Program id
    pub programid: String,
    /// Program title
    pub programtitle: String,
    /// Release date
    pub releasedate: String,
    /// Episode number (free text, usually digits)
    #[serde(deserialize_with = "string_or_number")]
    pub episodenumber: String,
    /// Episode title
    pub episodetitle: String,
    /// Thumbnail
    pub image: String,
    /// Catalog type (`onair` for quick content)
    #[serde(rename = "type")]
    pub kind: String,
}

impl NewEpisode {
    /// Read a listing entry; the content id is mandatory
    pub fn from_value(value: &Value) -> Result<Self, CatalogError> {
        let episode: NewEpisode = serde_json::from_value(value.clone())
            .map_err(|e| CatalogError::Malformed(format!("listing entry: {}", e)))?;
        if episode.contentid.is_empty() {
            return Err(CatalogError::Malformed("listing entry without contentid".to_string()));
        }
        Ok(episode)
    }

    /// Content classification derived from the catalog type
    pub fn content_type(&self) -> ContentType {
        ContentType::from_catalog_type(&self.kind)
    }
}

/// Content-detail view
#[derive(Debug, Clone, Default)]
pub struct ContentDetails {
    /// Genre text, when present
    pub genre: Option<String>,
    /// Encrypted content
    pub drm: bool,
    /// Measured play time in seconds (quick content)
    pub playtime: Option<i64>,
    /// Catalog type string
    pub kind: Option<String>,
}

impl ContentDetails {
    /// Read the fields the pipeline needs from a content-detail document
    pub fn from_value(value: &Value) -> Self {
        Self {
            genre: value
                .get("genretext")
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string),
            drm: value.get("drms").is_some_and(truthy),
            playtime: value.get("playtime").and_then(as_i64_lenient).filter(|t| *t > 0),
            kind: value.get("type").and_then(Value::as_str).map(str::to_string),
        }
    }
}

/// Subtitle descriptor from a streaming document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubtitleTrack {
    /// Language code (defaults to `ko`)
    pub language: String,
    /// Source URL
    pub url: String,
}

/// Licence request information for encrypted content
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LicenseInfo {
    /// Licence server URL
    pub license_uri: String,
    /// Request properties/headers for the licence server
    pub request_properties: BTreeMap<String, String>,
}

/// Streaming-credential view
#[derive(Debug, Clone, Default)]
pub struct StreamingGrant {
    /// Top-level play URL
    pub playurl: Option<String>,
    /// Resolved quality string
    pub quality: Option<String>,
    /// HLS variant URL, when the stream has one
    pub hls: Option<String>,
    /// Manifest URI
    pub uri: Option<String>,
    /// Encrypted stream
    pub drm: bool,
    /// Licence request information
    pub license: Option<LicenseInfo>,
    /// Headers for manifest/segment requests
    pub headers: BTreeMap<String, String>,
    /// Issue timestamp document
    pub issue: Option<Value>,
    /// Subtitle tracks
    pub subtitles: Vec<SubtitleTrack>,
}

impl StreamingGrant {
    /// Read the fields the pipeline needs from a streaming document
    pub fn from_value(value: &Value) -> Self {
        let play_info = value.get("play_info").cloned().unwrap_or(Value::Null);
        let text = |v: &Value, key: &str| {
            v.get(key).and_then(Value::as_str).filter(|s| !s.is_empty()).map(str::to_string)
        };

        let license = match (
            text(&play_info, "drm_license_uri"),
            play_info.get("drm_key_request_properties").map(string_map),
        ) {
            (Some(license_uri), Some(request_properties)) if !request_properties.is_empty() => {
                Some(LicenseInfo {
                    license_uri,
                    request_properties,
                })
            }
            _ => None,
        };

        let mut headers = play_info.get("mpd_headers").map(string_map).unwrap_or_default();
        if let Some(extra) = play_info.get("headers").map(string_map) {
            headers.extend(extra);
        }

        let subtitles = value
            .get("subtitles")
            .and_then(Value::as_array)
            .map(|tracks| {
                tracks
                    .iter()
                    .filter_map(|track| {
                        let url = text(track, "url")?;
                        let language =
                            text(track, "languagecode").unwrap_or_else(|| "ko".to_string());
                        Some(SubtitleTrack { language, url })
                    })
                    .collect()
            })
            .unwrap_or_default();

        Self {
            playurl: text(value, "playurl"),
            quality: text(value, "quality"),
            hls: text(&play_info, "hls"),
            uri: text(&play_info, "uri"),
            drm: value.get("drm").is_some_and(truthy),
            license,
            headers,
            issue: value.get("issue").cloned().filter(|v| !v.is_null()),
            subtitles,
        }
    }

    /// URL handed to a backend: the HLS variant when present, else the manifest URI,
    /// else the top-level play URL
    pub fn playback_url(&self) -> Option<&str> {
        self.hls
            .as_deref()
            .or(self.uri.as_deref())
            .or(self.playurl.as_deref())
    }
}

/// Default credential expiry rule
///
/// A play URL carrying an `expires`/`exp` query parameter (unix seconds) expires at that
/// instant. Otherwise the credential is trusted for [`DEFAULT_CREDENTIAL_TTL_SECS`] after
/// its issue time. A credential without either signal is treated as expired.
pub fn credential_expired(play_url: &str, issued_at: Option<&Value>, now: DateTime<Utc>) -> bool {
    if let Ok(url) = url::Url::parse(play_url) {
        let expiry = url
            .query_pairs()
            .find(|(k, _)| k.eq_ignore_ascii_case("expires") || k == "exp")
            .and_then(|(_, v)| v.parse::<i64>().ok());
        if let Some(expiry) = expiry {
            return now.timestamp() >= expiry;
        }
    }

    match issued_at.and_then(parse_issue_time) {
        Some(issued) => now.signed_duration_since(issued).num_seconds() >= DEFAULT_CREDENTIAL_TTL_SECS,
        None => true,
    }
}

fn parse_issue_time(value: &Value) -> Option<DateTime<Utc>> {
    if let Some(secs) = as_i64_lenient(value) {
        // Millisecond timestamps are common in catalog payloads
        let secs = if secs > 100_000_000_000 { secs / 1000 } else { secs };
        return Utc.timestamp_opt(secs, 0).single();
    }
    let text = value.as_str()?;
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Utc));
    }
    chrono::NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Default output filename: `<title>.E<episode>.<date>.<quality>.mp4`
pub fn default_output_filename(details: &Value, quality: &str) -> String {
    let field = |key: &str| {
        details
            .get(key)
            .map(|v| match v {
                Value::String(s) => s.trim().to_string(),
                Value::Number(n) => n.to_string(),
                _ => String::new(),
            })
            .unwrap_or_default()
    };

    let title = field("programtitle");
    let title = if title.is_empty() { field("title") } else { title };
    let mut parts = vec![if title.is_empty() { field("contentid") } else { title }];

    let episode = field("episodenumber");
    if !episode.is_empty() {
        parts.push(format!("E{}", episode));
    }
    let date: String = field("releasedate").chars().filter(|c| c.is_ascii_digit()).collect();
    if date.len() == 8 {
        parts.push(date[2..].to_string());
    }
    if !quality.is_empty() {
        parts.push(quality.to_string());
    }

    let name = parts.join(".");
    let name: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c => c,
        })
        .collect();
    format!("{}.mp4", name)
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_i64().is_some_and(|n| n != 0),
        Value::String(s) => !s.is_empty() && s != "false" && s != "0",
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

fn as_i64_lenient(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn string_map(value: &Value) -> BTreeMap<String, String> {
    value
        .as_object()
        .map(|map| {
            map.iter()
                .map(|(k, v)| {
                    let v = match v {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    (k.clone(), v)
                })
                .collect()
        })
        .unwrap_or_default()
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => s,
        Value::Number(n) => n.to_string(),
        _ => String::new(),
    })
}

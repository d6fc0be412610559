//! Subtitle retrieval
//!
//! Streaming documents list WebVTT tracks. Each wanted track is fetched, converted to
//! SubRip and written next to the video as `<stem>.<lang>.srt`. Failures are logged and
//! skipped; a missing subtitle never blocks a download.

use crate::catalog::SubtitleTrack;
use crate::config::SubtitleConfig;
use crate::error::Result;
use regex::Regex;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, CACHE_CONTROL, HeaderMap, HeaderValue, ORIGIN, PRAGMA, REFERER};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/125.0.0.0 Safari/537.36";

/// Fetches subtitle tracks over HTTP
#[derive(Clone)]
pub struct SubtitleFetcher {
    client: reqwest::Client,
    config: SubtitleConfig,
}

impl SubtitleFetcher {
    /// Create a fetcher with browser-like default headers
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: SubtitleConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json, text/plain, */*"));
        headers.insert(
            ACCEPT_LANGUAGE,
            HeaderValue::from_static("ko,ko-KR;q=0.9,en-US;q=0.8,en;q=0.7"),
        );
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        headers.insert(PRAGMA, HeaderValue::from_static("no-cache"));
        for (name, value) in [(ORIGIN, &config.origin), (REFERER, &config.referer)] {
            if let Some(value) = value.as_deref().and_then(|v| HeaderValue::from_str(v).ok()) {
                headers.insert(name, value);
            }
        }

        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .timeout(config.timeout)
            .build()?;
        Ok(Self { client, config })
    }

    /// Whether a language is wanted (`all` takes everything)
    pub fn wants(&self, language: &str) -> bool {
        self.config
            .languages
            .iter()
            .any(|l| l == "all" || l.eq_ignore_ascii_case(language))
    }

    /// Fetch every wanted track for a video
    ///
    /// # Returns
    ///
    /// Paths of the subtitle files written.
    pub async fn fetch_all(&self, tracks: &[SubtitleTrack], video: &Path) -> Vec<PathBuf> {
        if !self.config.enabled {
            return Vec::new();
        }
        let mut written = Vec::new();
        for track in tracks.iter().filter(|t| self.wants(&t.language)) {
            match self.fetch_one(track, video).await {
                Ok(Some(path)) => written.push(path),
                Ok(None) => {}
                Err(e) => {
                    tracing::error!(url = %track.url, language = %track.language, error = %e, "Downloading subtitle failed")
                }
            }
        }
        written
    }

    /// Fetch one track
    ///
    /// # Returns
    ///
    /// The written path, or `None` when the server did not answer 200 or the body was not
    /// WebVTT.
    pub async fn fetch_one(&self, track: &SubtitleTrack, video: &Path) -> Result<Option<PathBuf>> {
        let target = srt_path(video, &track.language);
        let response = self.client.get(&track.url).send().await?;
        if response.status() != reqwest::StatusCode::OK {
            tracing::error!(
                path = %target.display(),
                status = %response.status(),
                "Downloading subtitle failed"
            );
            return Ok(None);
        }

        let body = response.text().await?;
        let Some(srt) = vtt_to_srt(&body) else {
            tracing::error!(path = %target.display(), "subtitle is not WebVTT");
            return Ok(None);
        };
        tokio::fs::write(&target, srt).await?;
        tracing::debug!(path = %target.display(), "subtitle written");
        Ok(Some(target))
    }
}

/// `<video stem>.<lang>.srt` next to the video
pub fn srt_path(video: &Path, language: &str) -> PathBuf {
    video.with_extension(format!("{}.srt", language))
}

fn cue_tag_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"</?(?:c|v|lang|ruby|rt)(?:[.\s][^>]*)?>|<\d[^>]*>").ok())
        .as_ref()
}

/// Convert WebVTT text to SubRip
///
/// Returns `None` when the input has no `WEBVTT` header or no cues.
pub fn vtt_to_srt(vtt: &str) -> Option<String> {
    let text = vtt.trim_start_matches('\u{feff}').replace("\r\n", "\n").replace('\r', "\n");
    if !text.trim_start().starts_with("WEBVTT") {
        return None;
    }

    let mut srt = String::new();
    let mut index = 0;
    for block in text.split("\n\n") {
        let lines: Vec<&str> = block.lines().filter(|l| !l.trim().is_empty()).collect();
        let Some(timing_at) = lines.iter().position(|l| l.contains("-->")) else {
            continue;
        };
        let Some(timing) = convert_timing(lines[timing_at]) else {
            continue;
        };

        index += 1;
        srt.push_str(&format!("{}\n{}\n", index, timing));
        for line in &lines[timing_at + 1..] {
            let cleaned = match cue_tag_pattern() {
                Some(pattern) => pattern.replace_all(line, "").into_owned(),
                None => line.to_string(),
            };
            srt.push_str(&unescape(&cleaned));
            srt.push('\n');
        }
        srt.push('\n');
    }

    (index > 0).then_some(srt)
}

fn convert_timing(line: &str) -> Option<String> {
    let (start, rest) = line.split_once("-->")?;
    let end = rest.split_whitespace().next()?;
    Some(format!("{} --> {}", convert_timestamp(start.trim())?, convert_timestamp(end)?))
}

fn convert_timestamp(ts: &str) -> Option<String> {
    let (clock, millis) = ts.split_once('.')?;
    let parts: Vec<u32> = clock
        .split(':')
        .map(|p| p.parse().ok())
        .collect::<Option<_>>()?;
    let (h, m, s) = match parts.as_slice() {
        [m, s] => (0, *m, *s),
        [h, m, s] => (*h, *m, *s),
        _ => return None,
    };
    let millis: u32 = millis.parse().ok()?;
    Some(format!("{:02}:{:02}:{:02},{:03}", h, m, s, millis))
}

fn unescape(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
}

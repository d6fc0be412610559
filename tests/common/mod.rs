//! Shared fixtures for integration tests

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::broadcast;
use vod_dl::types::{ContentType, StreamAction};
use vod_dl::{CatalogApi, CatalogError, Config, Event, Quality};

/// Catalog serving fixed documents from memory
#[derive(Default)]
pub struct MemoryCatalog {
    episodes: Mutex<Vec<Value>>,
    details: Mutex<HashMap<String, Value>>,
}

impl MemoryCatalog {
    /// Publish one clear episode with its details
    pub fn publish(&self, content_id: &str, program: &str, episode: &str) {
        self.episodes.lock().unwrap().push(json!({
            "contentid": content_id,
            "channelname": "KBS 2TV",
            "programid": format!("P-{}", program),
            "programtitle": program,
            "releasedate": "2024-05-01",
            "episodenumber": episode,
            "episodetitle": "episode",
            "type": "general"
        }));
        self.details.lock().unwrap().insert(
            content_id.to_string(),
            json!({
                "contentid": content_id,
                "programtitle": program,
                "episodenumber": episode,
                "genretext": "드라마",
                "drms": ""
            }),
        );
    }
}

#[async_trait]
impl CatalogApi for MemoryCatalog {
    async fn new_episodes(&self, _days: u32, _genres: &[String]) -> Result<Vec<Value>, CatalogError> {
        Ok(self.episodes.lock().unwrap().clone())
    }

    async fn content_details(&self, content_id: &str) -> Result<Option<Value>, CatalogError> {
        Ok(self.details.lock().unwrap().get(content_id).cloned())
    }

    async fn streaming(
        &self,
        _content_type: ContentType,
        content_id: &str,
        quality: Quality,
        _action: StreamAction,
    ) -> Result<Option<Value>, CatalogError> {
        if !self.details.lock().unwrap().contains_key(content_id) {
            return Ok(None);
        }
        Ok(Some(json!({
            "playurl": format!("https://cdn.example/{}/top.m3u8", content_id),
            "quality": quality.as_str(),
            "issue": Utc::now().timestamp(),
            "play_info": {"hls": format!("https://cdn.example/{}/hls.m3u8", content_id)}
        })))
    }
}

/// Config with every path inside `dir` and no external tools on PATH
pub fn isolated_config(dir: &Path) -> Config {
    let toml = format!(
        r#"
[download]
save_dir = '{save}'
temp_dir = '{temp}'
dispatch_pause = 0

[tools]
search_path = false

[subtitles]
enabled = false

[persistence]
database_path = '{db}'
"#,
        save = dir.join("media").display(),
        temp = dir.join("temp").display(),
        db = dir.join("vod-dl.db").display(),
    );
    Config::from_toml_str(&toml).unwrap()
}

/// Wait for the first event matching `pred` on an existing subscription
pub async fn wait_for_event<F>(
    events: &mut broadcast::Receiver<Event>,
    timeout: Duration,
    mut pred: F,
) -> Option<Event>
where
    F: FnMut(&Event) -> bool,
{
    tokio::time::timeout(timeout, async {
        loop {
            match events.recv().await {
                Ok(event) if pred(&event) => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    })
    .await
    .ok()
    .flatten()
}

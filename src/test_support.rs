//! Scripted collaborators shared by unit tests

use crate::catalog::CatalogApi;
use crate::error::{CatalogError, ProcessError};
use crate::process::{CommandLauncher, RunningProcess};
use crate::types::{ContentType, Quality, StreamAction};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

/// In-memory catalog whose answers are set by the test
#[derive(Default)]
pub(crate) struct ScriptedCatalog {
    episodes: Mutex<Vec<Value>>,
    details: Mutex<HashMap<String, Value>>,
    streaming: Mutex<HashMap<String, Value>>,
    actions: Mutex<HashMap<String, StreamAction>>,
    failing_details: AtomicUsize,
    streaming_calls: AtomicUsize,
    expired: AtomicBool,
}

impl ScriptedCatalog {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn set_episodes(&self, episodes: Vec<Value>) {
        *self.episodes.lock().unwrap() = episodes;
    }

    pub(crate) fn set_details(&self, content_id: &str, details: Value) {
        self.details
            .lock()
            .unwrap()
            .insert(content_id.to_string(), details);
    }

    pub(crate) fn set_streaming(&self, content_id: &str, streaming: Value) {
        self.streaming
            .lock()
            .unwrap()
            .insert(content_id.to_string(), streaming);
    }

    pub(crate) fn remove_streaming(&self, content_id: &str) {
        self.streaming.lock().unwrap().remove(content_id);
    }

    /// Make the next `n` content-detail calls fail with a transport error
    pub(crate) fn fail_next_details(&self, n: usize) {
        self.failing_details.store(n, Ordering::SeqCst);
    }

    pub(crate) fn expire_all(&self, expired: bool) {
        self.expired.store(expired, Ordering::SeqCst);
    }

    pub(crate) fn last_action(&self, content_id: &str) -> Option<StreamAction> {
        self.actions.lock().unwrap().get(content_id).copied()
    }

    pub(crate) fn streaming_calls(&self) -> usize {
        self.streaming_calls.load(Ordering::SeqCst)
    }

    /// A full listing entry plus details and clear HLS streaming for one content id
    pub(crate) fn add_episode(&self, content_id: &str, title: &str, episode: &str) {
        self.episodes.lock().unwrap().push(json!({
            "contentid": content_id,
            "channelname": "KBS 2TV",
            "programid": format!("P-{}", title),
            "programtitle": title,
            "releasedate": "2024-05-01",
            "episodenumber": episode,
            "episodetitle": format!("{} 이야기", episode),
            "image": "img.example/a.jpg",
            "type": "general"
        }));
        self.set_details(
            content_id,
            json!({
                "contentid": content_id,
                "programtitle": title,
                "episodenumber": episode,
                "genretext": "드라마",
                "drms": ""
            }),
        );
        self.set_streaming(content_id, Self::hls_stream("1080p"));
    }

    pub(crate) fn hls_stream(quality: &str) -> Value {
        json!({
            "playurl": "https://cdn.example/top.m3u8",
            "quality": quality,
            "issue": Utc::now().timestamp(),
            "play_info": {"hls": "https://cdn.example/hls.m3u8", "headers": {"Cookie": "c=1"}},
            "subtitles": []
        })
    }

    pub(crate) fn dash_stream(quality: &str) -> Value {
        json!({
            "playurl": "https://cdn.example/a.mpd",
            "quality": quality,
            "issue": Utc::now().timestamp(),
            "drm": true,
            "play_info": {
                "uri": "https://cdn.example/a.mpd",
                "drm_license_uri": "https://license.example/wv",
                "drm_key_request_properties": {"Authorization": "token"},
                "mpd_headers": {"Cookie": "c=1"}
            }
        })
    }
}

#[async_trait]
impl CatalogApi for ScriptedCatalog {
    async fn new_episodes(&self, _days: u32, _genres: &[String]) -> Result<Vec<Value>, CatalogError> {
        Ok(self.episodes.lock().unwrap().clone())
    }

    async fn content_details(&self, content_id: &str) -> Result<Option<Value>, CatalogError> {
        let failing = self.failing_details.load(Ordering::SeqCst);
        if failing > 0 {
            self.failing_details.store(failing - 1, Ordering::SeqCst);
            return Err(CatalogError::Unavailable("connection reset".to_string()));
        }
        Ok(self.details.lock().unwrap().get(content_id).cloned())
    }

    async fn streaming(
        &self,
        _content_type: ContentType,
        content_id: &str,
        _quality: Quality,
        action: StreamAction,
    ) -> Result<Option<Value>, CatalogError> {
        self.streaming_calls.fetch_add(1, Ordering::SeqCst);
        self.actions
            .lock()
            .unwrap()
            .insert(content_id.to_string(), action);
        Ok(self.streaming.lock().unwrap().get(content_id).cloned())
    }

    fn is_expired(&self, _play_url: &str, _issued_at: Option<&Value>, _now: DateTime<Utc>) -> bool {
        self.expired.load(Ordering::SeqCst)
    }
}

/// How a scripted process behaves once its records are used up
#[derive(Clone, Copy, Debug)]
pub(crate) enum Ending {
    /// Close output and exit with this code
    Exit(i32),
    /// Keep output open forever
    Hang,
}

/// Launcher that replays a fixed output script
pub(crate) struct ScriptedLauncher {
    records: Vec<String>,
    ending: Ending,
    trip_after: Option<(usize, CancellationToken)>,
    spawns: AtomicUsize,
    kills: Arc<AtomicUsize>,
    launches: Mutex<Vec<(PathBuf, Vec<String>)>>,
}

impl ScriptedLauncher {
    pub(crate) fn new(records: &[&str], ending: Ending) -> Self {
        Self {
            records: records.iter().map(|r| r.to_string()).collect(),
            ending,
            trip_after: None,
            spawns: AtomicUsize::new(0),
            kills: Arc::new(AtomicUsize::new(0)),
            launches: Mutex::new(Vec::new()),
        }
    }

    /// Cancel `token` once `n` records have been read
    pub(crate) fn trip_after(mut self, n: usize, token: CancellationToken) -> Self {
        self.trip_after = Some((n, token));
        self
    }

    pub(crate) fn spawns(&self) -> usize {
        self.spawns.load(Ordering::SeqCst)
    }

    pub(crate) fn kills(&self) -> usize {
        self.kills.load(Ordering::SeqCst)
    }

    /// Program and rendered arguments of every launch so far
    pub(crate) fn launches(&self) -> Vec<(PathBuf, Vec<String>)> {
        self.launches.lock().unwrap().clone()
    }
}

#[async_trait]
impl CommandLauncher for ScriptedLauncher {
    async fn launch(&self, program: &Path, args: &[OsString]) -> Result<Box<dyn RunningProcess>, ProcessError> {
        self.spawns.fetch_add(1, Ordering::SeqCst);
        let args = args.iter().map(|a| a.to_string_lossy().into_owned()).collect();
        self.launches.lock().unwrap().push((program.to_path_buf(), args));
        Ok(Box::new(ScriptedProcess {
            records: self.records.clone().into_iter(),
            read: 0,
            ending: self.ending,
            trip_after: self.trip_after.clone(),
            kills: Arc::clone(&self.kills),
        }))
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

struct ScriptedProcess {
    records: std::vec::IntoIter<String>,
    read: usize,
    ending: Ending,
    trip_after: Option<(usize, CancellationToken)>,
    kills: Arc<AtomicUsize>,
}

#[async_trait]
impl RunningProcess for ScriptedProcess {
    async fn next_record(&mut self) -> Result<Option<String>, ProcessError> {
        if let Some((n, token)) = &self.trip_after {
            if self.read >= *n {
                token.cancel();
                std::future::pending::<()>().await;
            }
        }
        match self.records.next() {
            Some(record) => {
                self.read += 1;
                Ok(Some(record))
            }
            None => match self.ending {
                Ending::Exit(_) => Ok(None),
                Ending::Hang => {
                    std::future::pending::<()>().await;
                    Ok(None)
                }
            },
        }
    }

    async fn wait(&mut self) -> Result<Option<i32>, ProcessError> {
        match self.ending {
            Ending::Exit(code) => Ok(Some(code)),
            Ending::Hang => {
                std::future::pending::<()>().await;
                Ok(None)
            }
        }
    }

    async fn kill(&mut self) -> Result<(), ProcessError> {
        self.kills.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

//! Retrieval refresher
//!
//! Fetches content details and a streaming credential for an item and records them on it.
//! Data faults never surface as errors: they become outcome code 33 with one more retry
//! counted, or 18 for preview-only streams. Transport failures are retried with
//! [`retry_with_backoff`] first.

use crate::catalog::{CatalogApi, StreamingGrant};
use crate::config::RetryConfig;
use crate::error::CatalogError;
use crate::item::CatalogItem;
use crate::retry::retry_with_backoff;
use crate::types::{OutcomeCode, Quality, StreamAction};
use chrono::Utc;
use std::sync::Arc;

/// Result of one refresh attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// Details and a credential were recorded
    Refreshed,
    /// Content details were missing (code 33, retry counted)
    MissingDetails,
    /// The streaming credential was missing (code 33, retry counted)
    MissingStreaming,
    /// The stream is a preview (code 18)
    Preview,
}

impl RefreshOutcome {
    /// Whether the item can still be dispatched
    pub fn is_usable(&self) -> bool {
        matches!(self, RefreshOutcome::Refreshed)
    }
}

/// Refreshes catalog documents on items
#[derive(Clone)]
pub struct Refresher {
    catalog: Arc<dyn CatalogApi>,
    retry: RetryConfig,
}

impl Refresher {
    /// Create a refresher over a catalog
    pub fn new(catalog: Arc<dyn CatalogApi>, retry: RetryConfig) -> Self {
        Self { catalog, retry }
    }

    /// The catalog this refresher talks to
    pub fn catalog(&self) -> &Arc<dyn CatalogApi> {
        &self.catalog
    }

    async fn content_details(&self, content_id: &str) -> Option<serde_json::Value> {
        let result = retry_with_backoff(&self.retry, || {
            let catalog = Arc::clone(&self.catalog);
            let content_id = content_id.to_string();
            async move { catalog.content_details(&content_id).await }
        })
        .await;
        log_catalog_failure(content_id, "content details", result)
    }

    async fn streaming(
        &self,
        item: &CatalogItem,
        quality: Quality,
        action: StreamAction,
    ) -> Option<serde_json::Value> {
        let content_type = item.content_type;
        let result = retry_with_backoff(&self.retry, || {
            let catalog = Arc::clone(&self.catalog);
            let content_id = item.content_id.clone();
            async move {
                catalog
                    .streaming(content_type, &content_id, quality, action)
                    .await
            }
        })
        .await;
        log_catalog_failure(&item.content_id, "streaming", result)
    }

    /// Fetch content details and a streaming credential for `quality`
    ///
    /// # Returns
    ///
    /// What happened; the item's code and retry counter already reflect it.
    pub async fn refresh(&self, item: &mut CatalogItem, quality: Quality) -> RefreshOutcome {
        if !self.refresh_details(item).await {
            return RefreshOutcome::MissingDetails;
        }
        self.refresh_streaming(item, quality).await
    }

    /// Fetch and record content details only
    ///
    /// # Returns
    ///
    /// Whether details were recorded. A miss sets code 33 and counts a retry.
    pub async fn refresh_details(&self, item: &mut CatalogItem) -> bool {
        let Some(contents) = self.content_details(&item.content_id).await else {
            tracing::warn!(item_id = %item.id, content_id = %item.content_id, "Skipped - no content details");
            mark_incomplete(item);
            return false;
        };
        item.set_contents(contents);
        true
    }

    /// Fetch and record a streaming credential, using the DRM flag already on the item
    pub async fn refresh_streaming(&self, item: &mut CatalogItem, quality: Quality) -> RefreshOutcome {
        let action = if item.drm {
            StreamAction::Dash
        } else {
            StreamAction::Hls
        };
        let Some(streaming) = self.streaming(item, quality, action).await else {
            tracing::warn!(item_id = %item.id, content_id = %item.content_id, "Skipped - no streaming data");
            mark_incomplete(item);
            return RefreshOutcome::MissingStreaming;
        };

        let grant = StreamingGrant::from_value(&streaming);
        let resolved = grant.quality.clone().unwrap_or_else(|| quality.as_str().to_string());
        let filename = match item.contents_json.as_ref() {
            Some(details) => self.catalog.output_filename(details, &resolved),
            None => format!("{}.{}.mp4", item.content_id, resolved),
        };
        item.set_streaming(streaming, filename);

        let preview = grant
            .playurl
            .as_deref()
            .or(item.play_url.as_deref())
            .is_some_and(|url| url.contains("preview"));
        if preview {
            tracing::debug!(item_id = %item.id, content_id = %item.content_id, "Skipped - preview content");
            item.outcome_code = OutcomeCode::Preview;
            return RefreshOutcome::Preview;
        }

        RefreshOutcome::Refreshed
    }

    /// Whether the stored credential must be refreshed before use
    pub fn is_stale(&self, item: &CatalogItem) -> bool {
        let Some(play_url) = item.play_url.as_deref() else {
            return true;
        };
        let issued = item.streaming_json.as_ref().and_then(|s| s.get("issue"));
        self.catalog.is_expired(play_url, issued, Utc::now())
    }

    /// Refresh the item if its credential has expired
    ///
    /// # Returns
    ///
    /// Whether the item can still be dispatched.
    pub async fn ensure_fresh(&self, item: &mut CatalogItem, quality: Quality) -> bool {
        if !self.is_stale(item) {
            return true;
        }
        tracing::warn!(
            item_id = %item.id,
            content_id = %item.content_id,
            "The play URL may have expired, retrieving it again"
        );
        self.refresh(item, quality).await.is_usable()
    }
}

fn mark_incomplete(item: &mut CatalogItem) {
    item.outcome_code = OutcomeCode::RefreshFailed;
    item.retry_count = item.retry_count.saturating_add(1);
}

fn log_catalog_failure(
    content_id: &str,
    what: &str,
    result: Result<Option<serde_json::Value>, CatalogError>,
) -> Option<serde_json::Value> {
    match result {
        Ok(document) => document,
        Err(e) => {
            tracing::warn!(content_id, error = %e, "catalog {} request failed", what);
            None
        }
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedCatalog;
    use crate::types::Origin;
    use serde_json::json;
    use std::time::Duration;

    fn fast_retry() -> RetryConfig {
        RetryConfig {
            max_attempts: 2,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            backoff_multiplier: 2.0,
            jitter: false,
        }
    }

    #[tokio::test]
    async fn refresh_records_documents() {
        let catalog = Arc::new(ScriptedCatalog::new());
        catalog.set_details("C1", json!({"genretext": "예능", "drms": "", "programtitle": "쇼"}));
        catalog.set_streaming("C1", ScriptedCatalog::hls_stream("1080p"));
        let refresher = Refresher::new(catalog.clone(), fast_retry());

        let mut item = CatalogItem::new(Origin::Recent, "C1");
        let outcome = refresher.refresh(&mut item, Quality::P1080).await;

        assert_eq!(outcome, RefreshOutcome::Refreshed);
        assert_eq!(item.program_genre.as_deref(), Some("예능"));
        assert_eq!(item.quality, Some(Quality::P1080));
        assert!(!item.drm);
        assert_eq!(item.filename.as_deref(), Some("쇼.1080p.mp4"));
        assert_eq!(
            catalog.last_action("C1"),
            Some(StreamAction::Hls),
            "clear content asks for HLS"
        );
    }

    #[tokio::test]
    async fn drm_content_asks_for_dash() {
        let catalog = Arc::new(ScriptedCatalog::new());
        catalog.set_details("C1", json!({"genretext": "드라마", "drms": "wv"}));
        catalog.set_streaming("C1", ScriptedCatalog::dash_stream("1080p"));
        let refresher = Refresher::new(catalog.clone(), fast_retry());

        let mut item = CatalogItem::new(Origin::Recent, "C1");
        refresher.refresh(&mut item, Quality::P1080).await;

        assert!(item.drm);
        assert_eq!(catalog.last_action("C1"), Some(StreamAction::Dash));
        assert!(
            item.filename.as_deref().unwrap().ends_with(".mkv"),
            "manifest-only streams are muxed to matroska"
        );
    }

    #[tokio::test]
    async fn missing_documents_count_retries() {
        let catalog = Arc::new(ScriptedCatalog::new());
        let refresher = Refresher::new(catalog.clone(), fast_retry());
        let mut item = CatalogItem::new(Origin::Recent, "C1");

        for expected in 1..=3 {
            let outcome = refresher.refresh(&mut item, Quality::P1080).await;
            assert_eq!(outcome, RefreshOutcome::MissingDetails);
            assert_eq!(item.outcome_code, OutcomeCode::RefreshFailed);
            assert_eq!(item.retry_count, expected, "retry_count grows by one per failure");
        }

        catalog.set_details("C1", json!({"genretext": "드라마"}));
        let outcome = refresher.refresh(&mut item, Quality::P1080).await;
        assert_eq!(outcome, RefreshOutcome::MissingStreaming);
        assert_eq!(item.retry_count, 4);
    }

    #[tokio::test]
    async fn transport_errors_are_retried_before_giving_up() {
        let catalog = Arc::new(ScriptedCatalog::new());
        catalog.set_details("C1", json!({"genretext": "드라마"}));
        catalog.set_streaming("C1", ScriptedCatalog::hls_stream("1080p"));
        catalog.fail_next_details(2);
        let refresher = Refresher::new(catalog.clone(), fast_retry());

        let mut item = CatalogItem::new(Origin::Recent, "C1");
        let outcome = refresher.refresh(&mut item, Quality::P1080).await;
        assert_eq!(outcome, RefreshOutcome::Refreshed, "two failures fit in two retries");
        assert_eq!(item.retry_count, 0);
    }

    #[tokio::test]
    async fn preview_streams_are_marked() {
        let catalog = Arc::new(ScriptedCatalog::new());
        catalog.set_details("C1", json!({"genretext": "드라마"}));
        catalog.set_streaming(
            "C1",
            json!({
                "playurl": "https://cdn.example/preview/a.m3u8",
                "quality": "1080p",
                "play_info": {"hls": "https://cdn.example/preview/a.m3u8"}
            }),
        );
        let refresher = Refresher::new(catalog, fast_retry());

        let mut item = CatalogItem::new(Origin::Recent, "C1");
        assert_eq!(
            refresher.refresh(&mut item, Quality::P1080).await,
            RefreshOutcome::Preview
        );
        assert_eq!(item.outcome_code, OutcomeCode::Preview);
    }

    #[tokio::test]
    async fn ensure_fresh_only_refreshes_stale_credentials() {
        let catalog = Arc::new(ScriptedCatalog::new());
        catalog.set_details("C1", json!({"genretext": "드라마"}));
        catalog.set_streaming("C1", ScriptedCatalog::hls_stream("1080p"));
        let refresher = Refresher::new(catalog.clone(), fast_retry());

        let mut item = CatalogItem::new(Origin::Recent, "C1");
        assert!(refresher.is_stale(&item), "no credential at all is stale");
        assert!(refresher.ensure_fresh(&mut item, Quality::P1080).await);
        let calls = catalog.streaming_calls();

        assert!(refresher.ensure_fresh(&mut item, Quality::P1080).await);
        assert_eq!(catalog.streaming_calls(), calls, "fresh credentials are reused");

        catalog.expire_all(true);
        assert!(refresher.ensure_fresh(&mut item, Quality::P1080).await);
        assert_eq!(catalog.streaming_calls(), calls + 1);
    }
}

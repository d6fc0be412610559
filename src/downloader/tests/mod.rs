use super::test_helpers::{create_test_downloader, create_test_downloader_with, test_config};
use super::*;
use crate::db::NewCatalogItem;
use crate::item::CatalogItem;
use crate::test_support::{Ending, ScriptedCatalog, ScriptedLauncher};
use crate::types::{ItemFilter, Origin, OutcomeCode, Quality};
use serde_json::json;
use std::time::Duration;

mod completion;

/// Poll `check` until it holds or five seconds pass
async fn wait_until<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..250 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("timed out waiting for {what}");
}

async fn item(downloader: &VodDownloader, id: ItemId) -> CatalogItem {
    downloader.db.get_item(id).await.unwrap().unwrap()
}

/// A stored recent item with details and a clear HLS credential, ready to dispatch
async fn ready_item(downloader: &VodDownloader, content_id: &str) -> CatalogItem {
    let id = downloader
        .db
        .insert_item(&NewCatalogItem {
            origin: Origin::Recent,
            program_title: "Show".to_string(),
            episode_number: "3".to_string(),
            requested_quality: None,
            ..NewCatalogItem::program(content_id, Quality::P1080)
        })
        .await
        .unwrap();
    let mut stored = item(downloader, id).await;
    stored.set_contents(json!({"genretext": "드라마", "drms": ""}));
    stored.set_streaming(
        ScriptedCatalog::hls_stream("1080p"),
        format!("Show.{}.1080p.mp4", content_id),
    );
    stored.outcome_code = OutcomeCode::Eligible;
    downloader.db.save_item(&stored).await.unwrap();
    stored
}

fn hanging() -> Arc<ScriptedLauncher> {
    Arc::new(ScriptedLauncher::new(&[], Ending::Hang))
}

fn exiting() -> Arc<ScriptedLauncher> {
    Arc::new(ScriptedLauncher::new(&[], Ending::Exit(0)))
}

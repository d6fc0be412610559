//! Shared test helpers for creating VodDownloader instances in tests.

use crate::backend::keys::StaticKeyProvider;
use crate::backend::{Downloader, FfmpegDownloader, ManifestDownloader};
use crate::config::{Config, RetryConfig};
use crate::db::Database;
use crate::downloader::VodDownloader;
use crate::process::{ContentKey, ProcessRunner};
use crate::refresher::Refresher;
use crate::test_support::{ScriptedCatalog, ScriptedLauncher};
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;

/// Config pointing every path into `dir`, with short waits
pub(crate) fn test_config(dir: &std::path::Path) -> Config {
    let mut config = Config::default();
    config.persistence.database_path = dir.join("test.db");
    config.download.save_dir = dir.join("media");
    config.download.temp_dir = dir.join("temp");
    config.download.max_concurrent_downloads = 3;
    config.download.slot_poll_interval = Duration::from_millis(20);
    config.download.dispatch_pause = Duration::ZERO;
    config.download.run_wait_ceiling = Duration::from_secs(10);
    config.schedule.interval = Duration::from_secs(3600);
    config.program_queue.streaming_retry_pause = Duration::ZERO;
    config.subtitles.enabled = false;
    config.retry = RetryConfig {
        max_attempts: 0,
        initial_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
        backoff_multiplier: 2.0,
        jitter: false,
    };
    config
}

/// Helper to create a test VodDownloader with scripted collaborators.
/// Returns the downloader, the tempdir (which must be kept alive) and the catalog.
///
/// Both backends run their processes through `launcher`; the manifest backend gets a
/// static content key so encrypted items can start.
pub(crate) async fn create_test_downloader(
    launcher: Arc<ScriptedLauncher>,
) -> (VodDownloader, tempfile::TempDir, Arc<ScriptedCatalog>) {
    let temp_dir = tempdir().unwrap();
    let config = test_config(temp_dir.path());
    create_test_downloader_with(config, launcher, temp_dir).await
}

/// Same as [`create_test_downloader`] with a caller-adjusted config
pub(crate) async fn create_test_downloader_with(
    config: Config,
    launcher: Arc<ScriptedLauncher>,
    temp_dir: tempfile::TempDir,
) -> (VodDownloader, tempfile::TempDir, Arc<ScriptedCatalog>) {
    std::fs::create_dir_all(&config.download.save_dir).unwrap();
    std::fs::create_dir_all(&config.download.temp_dir).unwrap();

    let db = Database::new(&config.persistence.database_path)
        .await
        .unwrap();

    let catalog = Arc::new(ScriptedCatalog::new());
    let refresher = Refresher::new(catalog.clone(), config.retry.clone());

    let keys = Arc::new(StaticKeyProvider::new(vec![
        ContentKey::parse("00ff:11ee").unwrap(),
    ]));
    let runner = ProcessRunner::new(launcher.clone(), config.download.process_timeout);
    let manifest: Arc<dyn Downloader> = Arc::new(
        ManifestDownloader::new("/bin/fetch-tool".into(), runner, keys)
            .with_temp_dir(config.download.temp_dir.clone()),
    );
    let clear: Arc<dyn Downloader> = Arc::new(FfmpegDownloader::new(
        launcher,
        "/bin/ffmpeg".into(),
        config.download.process_timeout,
    ));

    let downloader = VodDownloader::from_parts(config, db, refresher, manifest, clear)
        .await
        .unwrap();

    (downloader, temp_dir, catalog)
}

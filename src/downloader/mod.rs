//! Core downloader implementation split into focused submodules.
//!
//! The `VodDownloader` struct and its methods are organized by domain:
//! - [`dispatch`] - Scheduled runs over recent items and slot-limited dispatch
//! - [`completion`] - Folding backend events back into item state
//! - [`program_queue`] - Operator program queue and its processor
//! - [`control`] - Operator commands (reset, retrieve, delete, list, cancel)
//! - [`lifecycle`] - Startup restore and shutdown coordination
//! - [`services`] - Background service starters

mod completion;
mod control;
mod dispatch;
mod lifecycle;
mod program_queue;
mod services;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

pub use program_queue::ProgramRequest;

use crate::backend::{
    BackendEvent, Downloader, FfmpegDownloader, KeyProvider, ManifestDownloader,
    NoOpKeyProvider, UnavailableDownloader,
};
use crate::catalog::CatalogApi;
use crate::config::{ClearBackend, Config};
use crate::db::Database;
use crate::eligibility::PolicySnapshot;
use crate::error::{Error, Result};
use crate::process::{CommandLauncher, TokioLauncher};
use crate::refresher::Refresher;
use crate::subtitles::SubtitleFetcher;
use crate::types::{Event, InvocationId, ItemId, QueueEntryInfo};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use tokio::sync::{Mutex, Notify, broadcast, mpsc};
use tokio_util::sync::CancellationToken;

/// Buffer of the backend event channel shared by every run
const BACKEND_EVENT_CAPACITY: usize = 1024;

/// One live invocation in the in-flight registry
#[derive(Debug, Clone)]
pub(crate) struct InFlight {
    pub(crate) item_id: ItemId,
    pub(crate) content_id: String,
    /// Selects the backend that owns the run
    pub(crate) drm: bool,
    /// Operator queue entry, for program items
    pub(crate) queue_id: Option<u64>,
}

/// Slot accounting and run guards
#[derive(Clone)]
pub(crate) struct DispatchState {
    /// Live invocations; one entry per dispatch, removed on its first terminal signal
    pub(crate) in_flight: Arc<Mutex<HashMap<InvocationId, InFlight>>>,
    /// Concurrency ceiling, read on every slot check
    pub(crate) max_concurrent: Arc<AtomicUsize>,
    /// Signalled whenever a slot is released
    pub(crate) slot_freed: Arc<Notify>,
    /// Monotonic invocation id source
    pub(crate) next_invocation: Arc<AtomicU64>,
    /// Set while a scheduled run is in progress
    pub(crate) schedule_running: Arc<AtomicBool>,
    /// Cleared during shutdown
    pub(crate) accepting_new: Arc<AtomicBool>,
    /// Stops the background tasks once shutdown has drained the registry
    pub(crate) shutdown: CancellationToken,
}

/// The two backend variants and the channel their events arrive on
#[derive(Clone)]
pub(crate) struct Backends {
    /// Encrypted content (and clear content when configured)
    pub(crate) manifest: Arc<dyn Downloader>,
    /// Clear content
    pub(crate) clear: Arc<dyn Downloader>,
    /// Sender handed to every run
    pub(crate) events: mpsc::Sender<BackendEvent>,
}

impl Backends {
    pub(crate) fn for_content(&self, drm: bool) -> &Arc<dyn Downloader> {
        if drm { &self.manifest } else { &self.clear }
    }
}

/// One entry of the operator program queue
#[derive(Debug, Clone)]
pub(crate) struct QueueEntry {
    pub(crate) info: QueueEntryInfo,
    /// Not yet taken by the processor
    pub(crate) pending: bool,
    /// Run started for this entry
    pub(crate) invocation: Option<InvocationId>,
}

/// In-memory operator queue (never persisted)
#[derive(Clone, Default)]
pub(crate) struct ProgramQueueState {
    pub(crate) entries: Arc<Mutex<Vec<QueueEntry>>>,
    pub(crate) next_queue_id: Arc<AtomicU64>,
    /// Signalled when an entry is added
    pub(crate) wakeup: Arc<Notify>,
}

/// Main downloader instance (cloneable - all fields are Arc-wrapped)
#[derive(Clone)]
pub struct VodDownloader {
    /// Database instance for persistence (wrapped in Arc for sharing across tasks)
    /// Public for integration tests to query item state
    pub db: Arc<Database>,
    /// Event broadcast channel sender (multiple subscribers supported)
    pub(crate) event_tx: broadcast::Sender<Event>,
    /// Configuration (wrapped in Arc for sharing across tasks)
    pub(crate) config: Arc<Config>,
    /// Catalog document refresher
    pub(crate) refresher: Refresher,
    /// Subtitle fetcher
    pub(crate) subtitles: SubtitleFetcher,
    /// Download backends
    pub(crate) backends: Backends,
    /// Slot accounting and run guards
    pub(crate) dispatch: DispatchState,
    /// Operator program queue
    pub(crate) program_queue: ProgramQueueState,
}

impl VodDownloader {
    /// Create a downloader with the default key provider and process launcher
    ///
    /// Encrypted content fails with code 34 until a real [`KeyProvider`] is supplied
    /// through [`with_collaborators`](Self::with_collaborators).
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use std::sync::Arc;
    /// use vod_dl::{Config, VodDownloader};
    /// use vod_dl::catalog::CatalogApi;
    ///
    /// # async fn example(catalog: Arc<dyn CatalogApi>) -> vod_dl::Result<()> {
    /// let downloader = VodDownloader::new(Config::default(), catalog).await?;
    ///
    /// let mut events = downloader.subscribe();
    /// tokio::spawn(async move {
    ///     while let Ok(event) = events.recv().await {
    ///         tracing::info!(?event, "download event");
    ///     }
    /// });
    /// # Ok(())
    /// # }
    /// ```
    pub async fn new(config: Config, catalog: Arc<dyn CatalogApi>) -> Result<Self> {
        Self::with_collaborators(
            config,
            catalog,
            Arc::new(NoOpKeyProvider),
            Arc::new(TokioLauncher::new()),
        )
        .await
    }

    /// Create a downloader with explicit collaborators
    ///
    /// This initializes all core components:
    /// - Validates the configuration and creates the output and temp directories
    /// - Opens/creates the SQLite database and runs migrations
    /// - Resolves the fetch tool and ffmpeg (missing binaries fail their runs)
    /// - Starts the completion loop and the program queue processor
    /// - Restores the program queue from the previous session
    ///
    /// # Arguments
    ///
    /// * `config` - Downloader configuration
    /// * `catalog` - Remote catalog
    /// * `keys` - Content key source for encrypted streams
    /// * `launcher` - How external processes are started
    pub async fn with_collaborators(
        config: Config,
        catalog: Arc<dyn CatalogApi>,
        keys: Arc<dyn KeyProvider>,
        launcher: Arc<dyn CommandLauncher>,
    ) -> Result<Self> {
        config.validate()?;

        for (dir, what) in [
            (&config.download.save_dir, "save"),
            (&config.download.temp_dir, "temp"),
        ] {
            tokio::fs::create_dir_all(dir).await.map_err(|e| {
                Error::Io(std::io::Error::new(
                    e.kind(),
                    format!("Failed to create {} directory '{}': {}", what, dir.display(), e),
                ))
            })?;
        }

        let db = Database::new(&config.persistence.database_path).await?;

        let manifest: Arc<dyn Downloader> =
            match ManifestDownloader::from_config(&config, launcher.clone(), keys.clone()) {
                Some(backend) => Arc::new(backend),
                None => {
                    tracing::warn!("fetch tool not found, manifest downloads will fail");
                    Arc::new(UnavailableDownloader::manifest())
                }
            };

        let clear: Arc<dyn Downloader> = match config.download.clear_backend {
            ClearBackend::FetchTool => manifest.clone(),
            ClearBackend::Ffmpeg => {
                let tools = &config.tools;
                match tools.resolve(tools.ffmpeg_path.as_ref(), "ffmpeg") {
                    Some(ffmpeg) => Arc::new(FfmpegDownloader::new(
                        launcher.clone(),
                        ffmpeg,
                        config.download.process_timeout,
                    )),
                    None => {
                        tracing::warn!("ffmpeg not found, clear downloads will fail");
                        Arc::new(UnavailableDownloader::ffmpeg())
                    }
                }
            }
        };

        tracing::info!(
            manifest_backend = manifest.name(),
            clear_backend = clear.name(),
            key_provider = keys.name(),
            launcher = launcher.name(),
            "Backends initialized"
        );

        let refresher = Refresher::new(catalog, config.retry.clone());
        Self::from_parts(config, db, refresher, manifest, clear).await
    }

    /// Assemble a downloader from already-built parts and start its background tasks
    pub(crate) async fn from_parts(
        config: Config,
        db: Database,
        refresher: Refresher,
        manifest: Arc<dyn Downloader>,
        clear: Arc<dyn Downloader>,
    ) -> Result<Self> {
        let unclean = db.was_unclean_shutdown().await?;

        // Mark that we're starting up (for unclean shutdown detection)
        db.set_clean_start().await?;

        let subtitles = SubtitleFetcher::new(config.subtitles.clone())?;
        let (event_tx, _rx) = broadcast::channel(1000);
        let (backend_tx, backend_rx) = mpsc::channel(BACKEND_EVENT_CAPACITY);

        let dispatch = DispatchState {
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            max_concurrent: Arc::new(AtomicUsize::new(config.download.max_concurrent_downloads)),
            slot_freed: Arc::new(Notify::new()),
            next_invocation: Arc::new(AtomicU64::new(1)),
            schedule_running: Arc::new(AtomicBool::new(false)),
            accepting_new: Arc::new(AtomicBool::new(true)),
            shutdown: CancellationToken::new(),
        };

        let downloader = Self {
            db: Arc::new(db),
            event_tx,
            config: Arc::new(config),
            refresher,
            subtitles,
            backends: Backends {
                manifest,
                clear,
                events: backend_tx,
            },
            dispatch,
            program_queue: ProgramQueueState::default(),
        };

        downloader.spawn_completion_loop(backend_rx);
        downloader.spawn_program_queue_processor();
        downloader.restore(unclean).await?;

        Ok(downloader)
    }

    /// Subscribe to downloader events
    ///
    /// Multiple subscribers are supported. Each subscriber receives all events
    /// independently; a subscriber more than 1000 events behind gets
    /// `RecvError::Lagged`.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Events as a [`Stream`](futures::Stream)
    ///
    /// Lagged positions surface as errors in the stream.
    pub fn event_stream(&self) -> tokio_stream::wrappers::BroadcastStream<Event> {
        tokio_stream::wrappers::BroadcastStream::new(self.event_tx.subscribe())
    }

    /// Get the current configuration
    pub fn get_config(&self) -> Arc<Config> {
        Arc::clone(&self.config)
    }

    /// Change the concurrency ceiling; takes effect on the next slot check
    pub fn set_max_concurrent(&self, max: usize) {
        let previous = self.dispatch.max_concurrent.swap(max, Ordering::SeqCst);
        tracing::info!(previous, max, "Concurrency ceiling changed");
        self.dispatch.slot_freed.notify_waiters();
    }

    /// Current concurrency ceiling
    pub fn max_concurrent(&self) -> usize {
        self.dispatch.max_concurrent.load(Ordering::SeqCst)
    }

    /// Number of live invocations
    pub async fn in_flight_count(&self) -> usize {
        self.dispatch.in_flight.lock().await.len()
    }

    /// Eligibility options as currently configured
    pub(crate) fn policy(&self) -> PolicySnapshot {
        PolicySnapshot::from_config(&self.config.policy)
    }

    /// Emit an event to all subscribers
    ///
    /// If there are no active subscribers, the event is dropped.
    pub(crate) fn emit_event(&self, event: Event) {
        self.event_tx.send(event).ok();
    }

    pub(crate) fn next_invocation(&self) -> InvocationId {
        InvocationId(self.dispatch.next_invocation.fetch_add(1, Ordering::SeqCst))
    }

    pub(crate) fn is_accepting(&self) -> bool {
        self.dispatch.accepting_new.load(Ordering::SeqCst)
    }
}

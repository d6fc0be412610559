//! Periodic scheduled runs over recent items
//!
//! The scheduler wakes every `schedule.interval` and calls
//! [`VodDownloader::run_recent_tick`]. The first run starts immediately. A run that
//! fails is logged and the loop carries on; the run guard inside the downloader skips a
//! tick that arrives while the previous run is still going.
//!
//! # Example
//!
//! ```no_run
//! use vod_dl::{Config, VodDownloader};
//! use vod_dl::catalog::CatalogApi;
//! use vod_dl::recent_scheduler::RecentScheduler;
//! use std::sync::Arc;
//!
//! # async fn example(catalog: Arc<dyn CatalogApi>) -> Result<(), Box<dyn std::error::Error>> {
//! let downloader = Arc::new(VodDownloader::new(Config::default(), catalog).await?);
//! let scheduler = RecentScheduler::new(downloader.clone());
//!
//! // Run scheduler (returns once the downloader shuts down)
//! tokio::spawn(async move {
//!     scheduler.run().await;
//! });
//! # Ok(())
//! # }
//! ```

use crate::VodDownloader;
use std::sync::Arc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

/// Drives scheduled runs until the downloader stops accepting work
pub struct RecentScheduler {
    downloader: Arc<VodDownloader>,
}

impl RecentScheduler {
    /// Creates a new scheduler for a downloader
    pub fn new(downloader: Arc<VodDownloader>) -> Self {
        Self { downloader }
    }

    /// Run scheduled passes until shutdown
    pub async fn run(self) {
        let period = self.downloader.config.schedule.interval;
        info!(interval_secs = period.as_secs(), "Recent scheduler started");

        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = self.downloader.dispatch.shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            if !self.downloader.is_accepting_new() {
                break;
            }

            match self.downloader.run_recent_tick().await {
                Ok(dispatched) => debug!(dispatched, "Scheduled tick done"),
                Err(e) => error!(error = %e, "Scheduled run failed"),
            }
        }

        info!("Recent scheduler shutting down");
    }
}

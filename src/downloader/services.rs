//! Background service starters.

use crate::recent_scheduler;

use super::VodDownloader;

impl VodDownloader {
    /// Start the recent scheduler background task
    ///
    /// Returns a finished task when `schedule.enabled` is off.
    pub fn start_recent_scheduler(&self) -> tokio::task::JoinHandle<()> {
        if !self.config.schedule.enabled {
            tracing::info!("Scheduled runs disabled, skipping recent scheduler");
            return tokio::spawn(async {});
        }

        let scheduler = recent_scheduler::RecentScheduler::new(std::sync::Arc::new(self.clone()));
        let handle = tokio::spawn(async move {
            scheduler.run().await;
        });

        tracing::info!("Recent scheduler background task started");

        handle
    }
}

//! Startup restore and shutdown coordination.

use crate::error::Result;
use crate::types::{Event, Origin, OutcomeCode, Quality};
use std::sync::atomic::Ordering;

use super::VodDownloader;

/// How long shutdown waits for running downloads to report their stop
const SHUTDOWN_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

impl VodDownloader {
    /// Rebuild the program queue from the previous session
    ///
    /// Program items left at code 31 were interrupted and are queued again. With
    /// `program_queue.failed_redownload` every program item that has not completed is
    /// queued instead. Recent items at 31 need nothing here; the next scheduled run
    /// re-evaluates them.
    pub(crate) async fn restore(&self, unclean: bool) -> Result<()> {
        if unclean {
            tracing::warn!("Previous session did not shut down cleanly, restoring interrupted downloads");
        }

        if self.config.program_queue.failed_redownload {
            let queued = self.enqueue_failed().await?;
            tracing::info!(queued, "Restored program queue from failed items");
            return Ok(());
        }

        let interrupted = self
            .db
            .list_by_code(Origin::Program, OutcomeCode::Downloading)
            .await?;
        let restored = interrupted.len();
        for mut item in interrupted {
            item.outcome_code = OutcomeCode::Eligible;
            self.db.save_item(&item).await?;
            let quality = item.requested_quality.unwrap_or(Quality::P1080);
            self.push_queue_entry(&item, quality).await;
        }
        if restored > 0 {
            tracing::info!(restored, "Restored interrupted program downloads");
        }
        Ok(())
    }

    /// Gracefully shut down the downloader
    ///
    /// This method performs a graceful shutdown sequence:
    /// 1. Stops accepting new work (scheduled runs and queue entries)
    /// 2. Stops every running download
    /// 3. Waits up to 30 seconds for the backends to report the stops
    /// 4. Stops the background tasks
    /// 5. Marks a clean shutdown in the database
    ///
    /// # Errors
    ///
    /// Returns an error if database operations fail during shutdown.
    /// The method will attempt to complete as much of the shutdown sequence as possible
    /// even if some steps fail.
    pub async fn shutdown(&self) -> Result<()> {
        tracing::info!("Initiating graceful shutdown");

        self.dispatch.accepting_new.store(false, Ordering::SeqCst);
        self.dispatch.slot_freed.notify_waiters();
        tracing::info!("Stopped accepting new downloads");

        self.stop_all().await;

        match tokio::time::timeout(SHUTDOWN_TIMEOUT, self.wait_for_in_flight()).await {
            Ok(()) => tracing::info!("All running downloads stopped"),
            Err(_) => tracing::warn!(
                remaining = self.in_flight_count().await,
                "Timeout waiting for downloads to stop, proceeding with shutdown"
            ),
        }

        self.dispatch.shutdown.cancel();

        if let Err(e) = self.db.set_clean_shutdown().await {
            tracing::error!(error = %e, "Failed to mark clean shutdown in database");
        } else {
            tracing::info!("Marked clean shutdown in database");
        }

        self.emit_event(Event::Shutdown);

        tracing::info!("Graceful shutdown complete");
        Ok(())
    }

    /// Ask every backend to stop its running invocations
    pub(crate) async fn stop_all(&self) {
        let running: Vec<_> = self
            .dispatch
            .in_flight
            .lock()
            .await
            .keys()
            .copied()
            .collect();
        tracing::debug!(running = running.len(), "Stopping all running downloads");

        for invocation in running {
            self.stop_invocation(invocation).await;
        }
    }

    async fn wait_for_in_flight(&self) {
        loop {
            let remaining = self.in_flight_count().await;
            if remaining == 0 {
                return;
            }
            tracing::debug!(remaining, "Waiting for running downloads to stop");
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        }
    }

    /// Whether the downloader still accepts new work
    pub fn is_accepting_new(&self) -> bool {
        self.is_accepting()
    }
}

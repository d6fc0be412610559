//! # vod-dl
//!
//! Configurable acquisition pipeline for streaming-catalog episodes.
//!
//! ## Design Philosophy
//!
//! vod-dl is designed to be:
//! - **Policy-driven** - Every stored item carries an outcome code that says why it was or
//!   was not downloaded
//! - **Sensible defaults** - Works out of the box with zero configuration
//! - **Library-first** - The embedding application supplies the catalog; no CLI or UI
//! - **Event-driven** - Consumers subscribe to events, no polling required
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use vod_dl::{Config, VodDownloader, run_with_shutdown};
//! use vod_dl::catalog::CatalogApi;
//!
//! async fn run(catalog: Arc<dyn CatalogApi>) -> vod_dl::Result<()> {
//!     let downloader = VodDownloader::new(Config::default(), catalog).await?;
//!
//!     // Subscribe to events
//!     let mut events = downloader.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             tracing::info!(?event, "download event");
//!         }
//!     });
//!
//!     let _scheduler = downloader.start_recent_scheduler();
//!     run_with_shutdown(downloader).await
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Download backends (manifest fetch tool and ffmpeg)
pub mod backend;
/// Remote catalog interface and document views
pub mod catalog;
/// Terminal backend status classification
pub mod classifier;
/// Configuration types
pub mod config;
/// Database persistence layer
pub mod db;
/// Core downloader implementation (decomposed into focused submodules)
pub mod downloader;
/// Download policy rules
pub mod eligibility;
/// Error types
pub mod error;
/// Stored catalog item
pub mod item;
/// External process supervision and tool output parsing
pub mod process;
/// Scheduled runs over recent episodes
pub mod recent_scheduler;
/// Catalog document refresh
pub mod refresher;
/// Retry logic with exponential backoff
pub mod retry;
/// Subtitle download and conversion
pub mod subtitles;
/// Core types and events
pub mod types;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod test_support;

// Re-export commonly used types
pub use catalog::CatalogApi;
pub use config::Config;
pub use db::Database;
pub use downloader::{ProgramRequest, VodDownloader};
pub use error::{CatalogError, DatabaseError, Error, ProcessError, Result};
pub use item::CatalogItem;
pub use types::{
    Event, InvocationId, ItemFilter, ItemId, Origin, OutcomeCode, Quality, QueueEntryInfo,
};

/// Helper function to run the downloader with graceful signal handling.
///
/// Waits for a termination signal and then calls the downloader's `shutdown()` method.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use vod_dl::{CatalogApi, Config, VodDownloader, run_with_shutdown};
///
/// async fn serve(catalog: Arc<dyn CatalogApi>) -> vod_dl::Result<()> {
///     let downloader = VodDownloader::new(Config::default(), catalog).await?;
///
///     // Run with automatic signal handling
///     run_with_shutdown(downloader).await
/// }
/// ```
pub async fn run_with_shutdown(downloader: VodDownloader) -> Result<()> {
    wait_for_signal().await;
    downloader.shutdown().await
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Set up signal handlers - these may fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), _) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            if let Ok(mut sigint) = signal(SignalKind::interrupt()) {
                sigint.recv().await;
                tracing::info!("Received SIGINT signal (Ctrl+C)");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
        (_, Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                sigterm.recv().await;
                tracing::info!("Received SIGTERM signal");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        }
    }
}

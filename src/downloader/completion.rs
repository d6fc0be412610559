//! Folding backend events back into item state.

use super::{InFlight, VodDownloader};
use crate::backend::{BackendEvent, BackendStatus, EventData};
use crate::classifier::{Classification, TerminalOutcome, classify};
use crate::error::Result;
use crate::types::{Event, InvocationId};
use chrono::Utc;
use tokio::sync::mpsc;

impl VodDownloader {
    /// Spawn the task that receives every backend event
    ///
    /// The task stops when shutdown cancels the token; shutdown only does so once the
    /// in-flight registry is empty.
    pub(crate) fn spawn_completion_loop(&self, mut rx: mpsc::Receiver<BackendEvent>) {
        let downloader = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = downloader.dispatch.shutdown.cancelled() => break,
                    event = rx.recv() => match event {
                        Some(event) => downloader.handle_backend_event(event).await,
                        None => break,
                    },
                }
            }
            tracing::debug!("Completion loop stopped");
        });
    }

    /// Apply one backend event
    ///
    /// Running statuses update progress. The first terminal status of an invocation
    /// removes it from the registry, frees its slot and writes the outcome; any later
    /// terminal status for the same invocation is ignored.
    pub(crate) async fn handle_backend_event(&self, event: BackendEvent) {
        let BackendEvent {
            invocation,
            status,
            data,
        } = event;

        let outcome = match classify(&status) {
            Classification::Running => {
                self.record_progress(invocation, &status, &data).await;
                return;
            }
            Classification::Terminal(outcome) => outcome,
        };

        let removed = self.dispatch.in_flight.lock().await.remove(&invocation);
        let Some(entry) = removed else {
            tracing::debug!(%invocation, status = %status, "Terminal status for an unknown invocation ignored");
            return;
        };
        self.dispatch.slot_freed.notify_waiters();

        let item_id = entry.item_id;
        if let Err(e) = self.record_outcome(entry, &status, outcome, &data).await {
            tracing::error!(%invocation, item_id = %item_id, error = %e, "Failed to record download outcome");
        }
    }

    async fn record_progress(&self, invocation: InvocationId, status: &BackendStatus, data: &EventData) {
        let entry = self.dispatch.in_flight.lock().await.get(&invocation).cloned();
        let Some(entry) = entry else {
            return;
        };

        if let Some(queue_id) = entry.queue_id {
            let code = status.code();
            let percent = data.percent;
            self.update_queue_entry(queue_id, |queued| {
                queued.info.status_text = status.name().to_lowercase();
                queued.info.backend_status = code;
                if let Some(percent) = percent {
                    queued.info.percent = percent;
                }
            })
            .await;
        }

        if matches!(status, BackendStatus::Other(_)) {
            tracing::debug!(%invocation, item_id = %entry.item_id, status = %status, "Unrecognized backend status");
        }
        self.emit_event(Event::Progress {
            item_id: entry.item_id,
            percent: data.percent,
        });
    }

    /// Mirror a terminal status onto the program queue entry, if the run came from one
    async fn finish_queue_entry(
        &self,
        entry: &InFlight,
        status: &BackendStatus,
        outcome: TerminalOutcome,
    ) {
        let Some(queue_id) = entry.queue_id else {
            return;
        };
        let status_text = match outcome {
            TerminalOutcome::Completed | TerminalOutcome::AlreadyExists => "completed".to_string(),
            TerminalOutcome::UserStopped => "stopped".to_string(),
            TerminalOutcome::PacketFault => "packet fault".to_string(),
            TerminalOutcome::Failed(code) => code.describe().to_string(),
        };
        self.update_queue_entry(queue_id, |queued| {
            queued.info.status_text = status_text;
            queued.info.backend_status = status.code();
            queued.info.is_downloading = false;
            queued.info.completed = outcome.is_success();
            if outcome.is_success() {
                queued.info.percent = 100.0;
            }
        })
        .await;
    }

    async fn record_outcome(
        &self,
        entry: InFlight,
        status: &BackendStatus,
        outcome: TerminalOutcome,
        data: &EventData,
    ) -> Result<()> {
        let Some(mut item) = self.db.get_item(entry.item_id).await? else {
            tracing::warn!(item_id = %entry.item_id, content_id = %entry.content_id, "Item deleted while downloading");
            self.finish_queue_entry(&entry, status, outcome).await;
            return Ok(());
        };

        item.backend_status = status.code();

        // stops issued by shutdown leave the item at 31 so the next session resumes it
        if outcome == TerminalOutcome::UserStopped && !self.is_accepting() {
            self.db.save_item(&item).await?;
            self.finish_queue_entry(&entry, status, outcome).await;
            tracing::info!(item_id = %item.id, content_id = %item.content_id, "Download interrupted by shutdown");
            return Ok(());
        }

        outcome.apply(&mut item, data, Utc::now());
        self.db.save_item(&item).await?;
        self.finish_queue_entry(&entry, status, outcome).await;

        match outcome {
            TerminalOutcome::Completed | TerminalOutcome::AlreadyExists => {
                let path = data
                    .output_path
                    .clone()
                    .or_else(|| item.output_path())
                    .unwrap_or_default();
                tracing::info!(
                    item_id = %item.id,
                    content_id = %item.content_id,
                    path = %path.display(),
                    filesize = ?item.filesize,
                    "Download completed"
                );
                self.emit_event(Event::Completed {
                    item_id: item.id,
                    path,
                });
            }
            TerminalOutcome::UserStopped => {
                tracing::info!(item_id = %item.id, content_id = %item.content_id, "Download stopped");
                self.emit_event(Event::Stopped { item_id: item.id });
            }
            TerminalOutcome::PacketFault => {
                tracing::warn!(
                    item_id = %item.id,
                    content_id = %item.content_id,
                    packet_faults = item.packet_faults,
                    "Download stopped after packet faults"
                );
                self.emit_event(Event::Failed {
                    item_id: item.id,
                    code: item.outcome_code,
                });
            }
            TerminalOutcome::Failed(code) => {
                tracing::warn!(
                    item_id = %item.id,
                    content_id = %item.content_id,
                    outcome = %code,
                    status = %status,
                    message = data.message.as_deref().unwrap_or(""),
                    "Download failed"
                );
                self.emit_event(Event::Failed {
                    item_id: item.id,
                    code,
                });
            }
        }
        Ok(())
    }
}

//! Operator program queue and its processor.
//!
//! Program items are enqueued by an operator for one content id and quality. Entries live
//! in memory only; the processor takes them one at a time and dispatches them under the
//! same slot ceiling as scheduled runs.

use super::dispatch::Launch;
use super::{InFlight, QueueEntry, VodDownloader};
use crate::db::NewCatalogItem;
use crate::error::{Error, Result};
use crate::item::CatalogItem;
use crate::refresher::RefreshOutcome;
use crate::types::{Event, InvocationId, ItemId, OutcomeCode, Quality, QueueEntryInfo};
use chrono::Utc;
use std::sync::atomic::Ordering;

/// One operator request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramRequest {
    /// Catalog content id
    pub content_id: String,
    /// Requested quality
    pub quality: Quality,
}

impl ProgramRequest {
    /// Parse `content_id|quality`
    ///
    /// The quality may be omitted (1080p). Returns `None` for an empty content id or an
    /// unknown quality.
    pub fn parse(line: &str) -> Option<Self> {
        let (content_id, quality) = match line.split_once('|') {
            Some((content_id, quality)) => (content_id.trim(), Quality::parse(quality)?),
            None => (line.trim(), Quality::P1080),
        };
        if content_id.is_empty() {
            return None;
        }
        Some(Self {
            content_id: content_id.to_string(),
            quality,
        })
    }
}

/// Entry taken by the processor
#[derive(Debug, Clone)]
struct NextEntry {
    queue_id: u64,
    item_id: ItemId,
    quality: Quality,
}

impl VodDownloader {
    /// Queue one program item
    ///
    /// # Arguments
    ///
    /// * `content_id` - Catalog content id
    /// * `quality` - Requested quality
    /// * `force` - Download again even when the item is already stored
    ///
    /// # Returns
    ///
    /// The queue id of the new entry.
    ///
    /// # Errors
    ///
    /// [`Error::AlreadyQueued`] when the item is stored and `force` is not set, or when
    /// `force` is set and the item is already in the queue.
    pub async fn enqueue_program(
        &self,
        content_id: &str,
        quality: Quality,
        force: bool,
    ) -> Result<u64> {
        if !self.is_accepting() {
            return Err(Error::ShuttingDown);
        }

        let item = match self.db.find_program(content_id, quality).await? {
            Some(_) if !force => {
                return Err(Error::AlreadyQueued(format!("{} ({})", content_id, quality)));
            }
            Some(mut item) => {
                if self.queue_holds(item.id).await {
                    return Err(Error::AlreadyQueued(format!(
                        "{} ({}) is in the queue",
                        content_id, quality
                    )));
                }
                item.outcome_code = OutcomeCode::Eligible;
                item.completed = false;
                item.user_aborted = false;
                self.db.save_item(&item).await?;
                item
            }
            None => self.insert_program(content_id, quality).await?,
        };

        Ok(self.push_queue_entry(&item, quality).await)
    }

    /// Queue a batch of program requests
    ///
    /// Every request creates a new item, whether or not one is already stored.
    ///
    /// # Returns
    ///
    /// Queue ids in request order.
    pub async fn enqueue_programs(&self, batch: &[ProgramRequest]) -> Result<Vec<u64>> {
        if !self.is_accepting() {
            return Err(Error::ShuttingDown);
        }
        let mut queued = Vec::with_capacity(batch.len());
        for request in batch {
            let item = self.insert_program(&request.content_id, request.quality).await?;
            queued.push(self.push_queue_entry(&item, request.quality).await);
        }
        tracing::info!(count = queued.len(), "Program batch queued");
        Ok(queued)
    }

    /// Queue every program item that has not completed
    ///
    /// Items already in the queue are skipped.
    ///
    /// # Returns
    ///
    /// Number of entries added.
    pub async fn enqueue_failed(&self) -> Result<usize> {
        let mut added = 0;
        for mut item in self.db.list_failed_programs().await? {
            if self.queue_holds(item.id).await {
                continue;
            }
            item.outcome_code = OutcomeCode::Eligible;
            item.user_aborted = false;
            self.db.save_item(&item).await?;
            let quality = item.requested_quality.unwrap_or(Quality::P1080);
            self.push_queue_entry(&item, quality).await;
            added += 1;
        }
        if added > 0 {
            tracing::info!(added, "Failed program items queued again");
        }
        Ok(added)
    }

    /// Cancel a queue entry; a running download for it is stopped
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] for an unknown queue id.
    pub async fn cancel_queued(&self, queue_id: u64) -> Result<()> {
        let invocation = {
            let mut entries = self.program_queue.entries.lock().await;
            let Some(entry) = entries.iter_mut().find(|e| e.info.queue_id == queue_id) else {
                return Err(Error::NotFound(format!("queue entry {}", queue_id)));
            };
            entry.info.cancel_requested = true;
            if entry.pending {
                entry.pending = false;
                entry.info.status_text = "cancelled".to_string();
            }
            entry.invocation
        };

        if let Some(invocation) = invocation {
            let stopped = self.stop_invocation(invocation).await;
            tracing::info!(queue_id, %invocation, stopped, "Queue entry cancelled");
        } else {
            tracing::info!(queue_id, "Queue entry cancelled");
        }
        Ok(())
    }

    /// Drop every pending entry and stop running clear-content downloads
    ///
    /// # Returns
    ///
    /// Number of entries dropped.
    pub async fn clear_queue(&self) -> usize {
        let (dropped, running) = {
            let mut entries = self.program_queue.entries.lock().await;
            let before = entries.len();
            entries.retain(|e| !e.pending);
            let running: Vec<InvocationId> = entries
                .iter_mut()
                .filter(|e| e.info.is_downloading && !e.info.is_drm)
                .filter_map(|e| {
                    e.info.cancel_requested = true;
                    e.invocation
                })
                .collect();
            (before - entries.len(), running)
        };

        for invocation in running {
            self.stop_invocation(invocation).await;
        }
        tracing::info!(dropped, "Program queue cleared");
        dropped
    }

    /// Remove finished entries from the queue view
    ///
    /// # Returns
    ///
    /// Number of entries removed.
    pub async fn remove_completed_from_queue(&self) -> usize {
        let mut entries = self.program_queue.entries.lock().await;
        let before = entries.len();
        entries.retain(|e| !e.info.completed);
        before - entries.len()
    }

    /// Snapshot of the queue in insertion order
    pub async fn list_queue(&self) -> Vec<QueueEntryInfo> {
        self.program_queue
            .entries
            .lock()
            .await
            .iter()
            .map(|e| e.info.clone())
            .collect()
    }

    async fn insert_program(&self, content_id: &str, quality: Quality) -> Result<CatalogItem> {
        let id = self
            .db
            .insert_item(&NewCatalogItem::program(content_id, quality))
            .await?;
        self.db
            .get_item(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("item {}", id)))
    }

    async fn queue_holds(&self, item_id: ItemId) -> bool {
        self.program_queue
            .entries
            .lock()
            .await
            .iter()
            .any(|e| e.info.item_id == item_id && !e.info.completed && !e.info.cancel_requested)
    }

    /// Append an entry for a stored item and wake the processor
    pub(crate) async fn push_queue_entry(&self, item: &CatalogItem, quality: Quality) -> u64 {
        let queue_id = self.program_queue.next_queue_id.fetch_add(1, Ordering::SeqCst) + 1;
        let info = QueueEntryInfo {
            queue_id,
            item_id: item.id,
            content_id: item.content_id.clone(),
            quality,
            status_text: "waiting".to_string(),
            backend_status: -1,
            percent: 0.0,
            filename: item.filename.clone(),
            queued_at: Utc::now(),
            cancel_requested: false,
            is_drm: item.drm,
            is_downloading: false,
            completed: false,
        };
        self.program_queue.entries.lock().await.push(QueueEntry {
            info,
            pending: true,
            invocation: None,
        });
        self.program_queue.wakeup.notify_one();

        tracing::debug!(queue_id, item_id = %item.id, content_id = %item.content_id, %quality, "Program item queued");
        self.emit_event(Event::Queued {
            item_id: item.id,
            content_id: item.content_id.clone(),
        });
        queue_id
    }

    /// Apply a change to one queue entry, if it still exists
    pub(crate) async fn update_queue_entry(&self, queue_id: u64, change: impl FnOnce(&mut QueueEntry)) {
        let mut entries = self.program_queue.entries.lock().await;
        if let Some(entry) = entries.iter_mut().find(|e| e.info.queue_id == queue_id) {
            change(entry);
        }
    }

    async fn set_queue_status(&self, queue_id: u64, status: &str) {
        self.update_queue_entry(queue_id, |entry| {
            entry.info.status_text = status.to_string();
        })
        .await;
    }

    async fn queue_entry_cancelled(&self, queue_id: u64) -> bool {
        self.program_queue
            .entries
            .lock()
            .await
            .iter()
            .find(|e| e.info.queue_id == queue_id)
            .is_none_or(|e| e.info.cancel_requested)
    }

    async fn take_next_entry(&self) -> Option<NextEntry> {
        if !self.is_accepting() {
            return None;
        }
        let mut entries = self.program_queue.entries.lock().await;
        let entry = entries
            .iter_mut()
            .find(|e| e.pending && !e.info.cancel_requested)?;
        entry.pending = false;
        entry.info.status_text = "waiting for slot".to_string();
        Some(NextEntry {
            queue_id: entry.info.queue_id,
            item_id: entry.info.item_id,
            quality: entry.info.quality,
        })
    }

    /// Spawn the task that works through the program queue
    pub(crate) fn spawn_program_queue_processor(&self) {
        let downloader = self.clone();
        tokio::spawn(async move {
            loop {
                if let Some(next) = downloader.take_next_entry().await {
                    downloader.process_entry(next).await;
                    continue;
                }
                tokio::select! {
                    biased;
                    _ = downloader.dispatch.shutdown.cancelled() => break,
                    _ = downloader.program_queue.wakeup.notified() => {}
                }
            }
            tracing::debug!("Program queue processor stopped");
        });
    }

    async fn process_entry(&self, next: NextEntry) {
        let queue_id = next.queue_id;
        if let Err(e) = self.run_entry(next).await {
            tracing::warn!(queue_id, error = %e, "Program download failed");
            self.update_queue_entry(queue_id, |entry| {
                entry.info.status_text = "ERROR".to_string();
                entry.info.is_downloading = false;
                entry.invocation = None;
            })
            .await;
        }
    }

    async fn run_entry(&self, next: NextEntry) -> Result<()> {
        let NextEntry {
            queue_id,
            item_id,
            quality,
        } = next;
        let Some(mut item) = self.db.get_item(item_id).await? else {
            self.set_queue_status(queue_id, "deleted").await;
            return Ok(());
        };

        let invocation = self.next_invocation();
        let slot = InFlight {
            item_id,
            content_id: item.content_id.clone(),
            drm: item.drm,
            queue_id: Some(queue_id),
        };
        self.reserve_slot(invocation, slot, None).await?;

        if self.queue_entry_cancelled(queue_id).await {
            self.release_slot(invocation).await;
            self.set_queue_status(queue_id, "cancelled").await;
            return Ok(());
        }

        if item.contents_json.is_none() {
            self.set_queue_status(queue_id, "fetching details").await;
            if !self.refresher.refresh_details(&mut item).await {
                return self.abandon_entry(&item, invocation, queue_id, "ERROR").await;
            }
        }

        if !self.fetch_program_streaming(&mut item, quality, queue_id).await {
            return self.abandon_entry(&item, invocation, queue_id, "ERROR").await;
        }

        if self.complete_if_present(&mut item).await? {
            self.release_slot(invocation).await;
            self.update_queue_entry(queue_id, |entry| {
                entry.info.filename = item.filename.clone();
                entry.info.status_text = "completed".to_string();
                entry.info.percent = 100.0;
                entry.info.completed = true;
            })
            .await;
            return Ok(());
        }

        if let Some(slot) = self.dispatch.in_flight.lock().await.get_mut(&invocation) {
            slot.drm = item.drm;
        }
        self.update_queue_entry(queue_id, |entry| {
            entry.info.is_drm = item.drm;
            entry.info.filename = item.filename.clone();
            entry.info.status_text = "downloading".to_string();
            entry.info.is_downloading = true;
            entry.invocation = Some(invocation);
        })
        .await;

        let status = match self.launch(&mut item, invocation).await? {
            Launch::Started => return Ok(()),
            Launch::NoLicence => "DRM error",
            Launch::NoPlayUrl | Launch::StartFailed => "ERROR",
        };

        item.retry_count = item.retry_count.saturating_add(1);
        item.outcome_code = OutcomeCode::Eligible;
        self.db.save_item(&item).await?;
        self.update_queue_entry(queue_id, |entry| {
            entry.info.status_text = status.to_string();
            entry.info.is_downloading = false;
            entry.invocation = None;
        })
        .await;
        Ok(())
    }

    /// Fetch a streaming credential, retrying a configured number of times
    async fn fetch_program_streaming(
        &self,
        item: &mut CatalogItem,
        quality: Quality,
        queue_id: u64,
    ) -> bool {
        let settings = &self.config.program_queue;
        let attempts = settings.streaming_attempts.max(1);
        for attempt in 1..=attempts {
            match self.refresher.refresh_streaming(item, quality).await {
                RefreshOutcome::Refreshed => return true,
                RefreshOutcome::Preview => return false,
                outcome => {
                    tracing::debug!(queue_id, attempt, attempts, ?outcome, content_id = %item.content_id, "Streaming fetch failed");
                    self.set_queue_status(queue_id, "URL failed").await;
                }
            }
            if attempt < attempts && !settings.streaming_retry_pause.is_zero() {
                tokio::time::sleep(settings.streaming_retry_pause).await;
            }
        }
        false
    }

    async fn abandon_entry(
        &self,
        item: &CatalogItem,
        invocation: InvocationId,
        queue_id: u64,
        status: &str,
    ) -> Result<()> {
        self.release_slot(invocation).await;
        self.db.save_item(item).await?;
        self.set_queue_status(queue_id, status).await;
        Ok(())
    }
}

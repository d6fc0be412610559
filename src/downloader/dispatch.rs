//! Scheduled runs over recent items and slot-limited dispatch.

use super::{InFlight, VodDownloader};
use crate::backend::DownloadJob;
use crate::catalog::NewEpisode;
use crate::db::NewCatalogItem;
use crate::eligibility::{self, PolicySnapshot};
use crate::error::{Error, Result};
use crate::item::CatalogItem;
use crate::process::sanitize_name;
use crate::retry::retry_with_backoff;
use crate::types::{Event, InvocationId, ItemId, Origin, OutcomeCode, Quality};
use chrono::Utc;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

/// What happened to a reserved slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Launch {
    /// A backend run was started and owns the slot
    Started,
    /// The item has no playback URL
    NoPlayUrl,
    /// Encrypted content without licence information
    NoLicence,
    /// The backend refused the job
    StartFailed,
}

/// Clears the run flag when a scheduled run ends, however it ends
struct RunGuard<'a>(&'a AtomicBool);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl VodDownloader {
    /// Run one scheduled pass over recent items
    ///
    /// The pass runs, in order: the automatic clear (when enabled), catalog intake with
    /// intake screening, re-evaluation of waiting items (codes 5, 8, 31 and user-aborted
    /// ones), re-admission of refresh failures below the retry ceiling, a refresh of every
    /// eligible item, a final eligibility pass, and dispatch of what is still eligible.
    ///
    /// Only one pass runs at a time; a second concurrent call logs a warning and returns
    /// immediately.
    ///
    /// # Returns
    ///
    /// Number of downloads dispatched.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DispatchWaitTimeout`] when the pass waited longer than
    /// `download.run_wait_ceiling` for free slots, and persistence errors. Per-item
    /// failures never abort the pass.
    pub async fn run_recent_tick(&self) -> Result<usize> {
        if !self.is_accepting() {
            return Err(Error::ShuttingDown);
        }
        if self.dispatch.schedule_running.swap(true, Ordering::SeqCst) {
            tracing::warn!("A scheduled run is already in progress, skipping");
            return Ok(0);
        }
        let _guard = RunGuard(&self.dispatch.schedule_running);

        let started = Instant::now();
        tracing::info!("Scheduled run started");
        self.emit_event(Event::RunStarted);

        let result = self.recent_pass(started).await;
        let dispatched = result.as_ref().map_or(0, |n| *n);
        self.emit_event(Event::RunFinished { dispatched });

        match &result {
            Ok(_) => tracing::info!(
                dispatched,
                elapsed_secs = started.elapsed().as_secs(),
                "Scheduled run finished"
            ),
            Err(e) => tracing::error!(error = %e, dispatched, "Scheduled run aborted"),
        }
        result
    }

    async fn recent_pass(&self, started: Instant) -> Result<usize> {
        let policy = self.policy();
        let schedule = &self.config.schedule;

        if schedule.auto_clear {
            let deleted = self.db.delete_older_than(schedule.auto_clear_days).await?;
            if deleted > 0 {
                tracing::info!(deleted, days = schedule.auto_clear_days, "Cleared old items");
            }
        }

        self.intake(&policy).await?;
        self.reevaluate_waiting(&policy).await?;
        self.readmit_refresh_failures(&policy).await?;
        self.refresh_eligible(&policy).await?;
        self.reevaluate_eligible(&policy).await?;
        self.dispatch_eligible(&policy, started).await
    }

    /// Store new catalog listings and screen the newly created items
    ///
    /// A failing listing is logged; the pass continues with the stored items.
    pub(crate) async fn intake(&self, policy: &PolicySnapshot) -> Result<usize> {
        let schedule = &self.config.schedule;
        let catalog = self.refresher.catalog();
        let listing = retry_with_backoff(&self.config.retry, || {
            let catalog = Arc::clone(catalog);
            let genres = schedule.search_genres.clone();
            let days = schedule.search_days;
            async move { catalog.new_episodes(days, &genres).await }
        })
        .await;

        let listing = match listing {
            Ok(listing) => listing,
            Err(e) => {
                tracing::warn!(error = %e, "Catalog listing failed, continuing with stored items");
                return Ok(0);
            }
        };

        let mut added = 0;
        for raw in listing {
            let episode = match NewEpisode::from_value(&raw) {
                Ok(episode) if !episode.contentid.is_empty() => episode,
                Ok(_) => continue,
                Err(e) => {
                    tracing::warn!(error = %e, "Skipping malformed listing entry");
                    continue;
                }
            };

            let (id, created) = self
                .db
                .upsert_recent(&NewCatalogItem::from_episode(&episode, raw))
                .await?;
            if !created {
                continue;
            }
            let Some(mut item) = self.db.get_item(id).await? else {
                continue;
            };

            let code = eligibility::screen_intake(&mut item, policy);
            self.db.save_item(&item).await?;
            tracing::debug!(item_id = %id, content_id = %item.content_id, outcome = %code, "New item stored");
            self.emit_event(Event::Queued {
                item_id: id,
                content_id: item.content_id.clone(),
            });
            added += 1;
        }

        if added > 0 {
            tracing::info!(added, "Catalog intake stored new items");
        }
        Ok(added)
    }

    /// Re-evaluate items waiting on time (5, 8), interrupted downloads (31) and
    /// user-stopped items
    async fn reevaluate_waiting(&self, policy: &PolicySnapshot) -> Result<()> {
        let live = self.in_flight_items().await;
        let mut waiting = Vec::new();
        for code in [
            OutcomeCode::UhdWait,
            OutcomeCode::QuickStillAiring,
            OutcomeCode::Downloading,
        ] {
            waiting.extend(self.db.list_by_code(Origin::Recent, code).await?);
        }
        waiting.extend(self.db.list_user_aborted(Origin::Recent).await?);

        let mut seen = HashSet::new();
        for mut item in waiting {
            if live.contains(&item.id) || !seen.insert(item.id) {
                continue;
            }
            eligibility::apply(&mut item, policy, Utc::now());
            self.db.save_item(&item).await?;
        }
        Ok(())
    }

    /// Refresh failures below the retry ceiling get another chance
    async fn readmit_refresh_failures(&self, policy: &PolicySnapshot) -> Result<()> {
        for mut item in self
            .db
            .list_by_code(Origin::Recent, OutcomeCode::RefreshFailed)
            .await?
        {
            if item.retry_count < policy.max_retry {
                item.outcome_code = OutcomeCode::Eligible;
            } else {
                item.outcome_code = OutcomeCode::TooManyRetries;
                tracing::debug!(item_id = %item.id, content_id = %item.content_id, retries = item.retry_count, "Retry ceiling reached");
            }
            self.db.save_item(&item).await?;
        }
        Ok(())
    }

    async fn refresh_eligible(&self, policy: &PolicySnapshot) -> Result<()> {
        let live = self.in_flight_items().await;
        for mut item in self
            .db
            .list_by_code(Origin::Recent, OutcomeCode::Eligible)
            .await?
        {
            if live.contains(&item.id) {
                continue;
            }
            let quality = quality_for(&item, policy);
            let outcome = self.refresher.refresh(&mut item, quality).await;
            tracing::debug!(item_id = %item.id, content_id = %item.content_id, ?outcome, "Item refreshed");
            self.db.save_item(&item).await?;
        }
        Ok(())
    }

    async fn reevaluate_eligible(&self, policy: &PolicySnapshot) -> Result<()> {
        let live = self.in_flight_items().await;
        for mut item in self
            .db
            .list_by_code(Origin::Recent, OutcomeCode::Eligible)
            .await?
        {
            if live.contains(&item.id) {
                continue;
            }
            eligibility::apply(&mut item, policy, Utc::now());
            self.db.save_item(&item).await?;
        }
        Ok(())
    }

    /// Dispatch every eligible recent item, waiting for slots as needed
    pub(crate) async fn dispatch_eligible(
        &self,
        policy: &PolicySnapshot,
        run_started: Instant,
    ) -> Result<usize> {
        let live = self.in_flight_items().await;
        let pause = self.config.download.dispatch_pause;
        let mut dispatched = 0;

        for item in self
            .db
            .list_by_code(Origin::Recent, OutcomeCode::Eligible)
            .await?
        {
            if !self.is_accepting() {
                break;
            }
            if live.contains(&item.id) {
                continue;
            }

            let item_id = item.id;
            let content_id = item.content_id.clone();
            let quality = quality_for(&item, policy);
            match self.dispatch_item(item, quality, Some(run_started)).await {
                Ok(true) => {
                    dispatched += 1;
                    if !pause.is_zero() {
                        tokio::time::sleep(pause).await;
                    }
                }
                Ok(false) => {}
                Err(e @ Error::DispatchWaitTimeout { .. }) => return Err(e),
                Err(Error::ShuttingDown) => break,
                Err(e) => {
                    tracing::warn!(item_id = %item_id, content_id = %content_id, error = %e, "Dispatch failed");
                    self.count_retry(item_id).await;
                }
            }
        }
        Ok(dispatched)
    }

    /// Take one eligible item through the dispatch state machine
    ///
    /// # Returns
    ///
    /// Whether a backend run was started.
    pub(crate) async fn dispatch_item(
        &self,
        mut item: CatalogItem,
        quality: Quality,
        run_started: Option<Instant>,
    ) -> Result<bool> {
        if self.complete_if_present(&mut item).await? {
            return Ok(false);
        }

        let invocation = self.next_invocation();
        let entry = InFlight {
            item_id: item.id,
            content_id: item.content_id.clone(),
            drm: item.drm,
            queue_id: None,
        };
        if let Err(e) = self.reserve_slot(invocation, entry, run_started).await {
            if matches!(e, Error::DispatchWaitTimeout { .. }) {
                item.retry_count = item.retry_count.saturating_add(1);
                item.outcome_code = OutcomeCode::Eligible;
                self.db.save_item(&item).await?;
            }
            return Err(e);
        }

        if !self.refresher.ensure_fresh(&mut item, quality).await {
            self.release_slot(invocation).await;
            self.db.save_item(&item).await?;
            return Ok(false);
        }
        if let Some(slot) = self.dispatch.in_flight.lock().await.get_mut(&invocation) {
            slot.drm = item.drm;
        }

        match self.launch(&mut item, invocation).await? {
            Launch::Started => Ok(true),
            Launch::NoPlayUrl | Launch::NoLicence | Launch::StartFailed => {
                item.retry_count = item.retry_count.saturating_add(1);
                item.outcome_code = OutcomeCode::Eligible;
                self.db.save_item(&item).await?;
                Ok(false)
            }
        }
    }

    /// Mark an item completed when its output file is already on disk
    ///
    /// # Returns
    ///
    /// Whether the item was completed this way. No backend may be started for it then.
    pub(crate) async fn complete_if_present(&self, item: &mut CatalogItem) -> Result<bool> {
        item.save_path = Some(self.config.download.save_dir.clone());
        let Some(output) = existing_output(item).await else {
            return Ok(false);
        };
        item.completed = true;
        item.outcome_code = OutcomeCode::Completed;
        item.end_time = Some(Utc::now());
        self.db.save_item(item).await?;
        tracing::info!(item_id = %item.id, content_id = %item.content_id, path = %output.display(), "Output already present, marked completed");
        self.emit_event(Event::Completed {
            item_id: item.id,
            path: output,
        });
        Ok(true)
    }

    /// Wait for a free slot and claim it for `invocation`
    ///
    /// The check and the claim happen under one lock, so two dispatchers can never both
    /// take the last slot. Waiting is woken by released slots and re-checked every
    /// `download.slot_poll_interval`.
    ///
    /// # Arguments
    ///
    /// * `run_started` - Start of the scheduled run, when the run wait ceiling applies
    pub(crate) async fn reserve_slot(
        &self,
        invocation: InvocationId,
        entry: InFlight,
        run_started: Option<Instant>,
    ) -> Result<()> {
        let ceiling = self.config.download.run_wait_ceiling;
        let poll = self.config.download.slot_poll_interval;

        loop {
            let notified = self.dispatch.slot_freed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if !self.is_accepting() {
                return Err(Error::ShuttingDown);
            }
            {
                let mut in_flight = self.dispatch.in_flight.lock().await;
                if in_flight.len() < self.max_concurrent() {
                    in_flight.insert(invocation, entry);
                    return Ok(());
                }
            }

            let wait = match run_started {
                Some(started) => {
                    let waited = started.elapsed();
                    if waited >= ceiling {
                        return Err(Error::DispatchWaitTimeout {
                            content_id: entry.content_id.clone(),
                            waited_secs: waited.as_secs(),
                        });
                    }
                    poll.min(ceiling - waited)
                }
                None => poll,
            };

            tracing::debug!(content_id = %entry.content_id, "Waiting for a download slot");
            tokio::select! {
                _ = &mut notified => {}
                _ = tokio::time::sleep(wait) => {}
                _ = self.dispatch.shutdown.cancelled() => {}
            }
        }
    }

    /// Give a claimed slot back without a run
    pub(crate) async fn release_slot(&self, invocation: InvocationId) {
        self.dispatch.in_flight.lock().await.remove(&invocation);
        self.dispatch.slot_freed.notify_waiters();
    }

    /// Start a backend run for an item that holds a slot
    ///
    /// Checks licence information for encrypted content, fetches subtitles next to the
    /// output and records the item as downloading (31) before the backend starts. Every
    /// outcome other than [`Launch::Started`] gives the slot back.
    pub(crate) async fn launch(
        &self,
        item: &mut CatalogItem,
        invocation: InvocationId,
    ) -> Result<Launch> {
        let Some((grant, play_url)) = item.grant().zip(item.play_url.clone()) else {
            tracing::warn!(item_id = %item.id, content_id = %item.content_id, "No playback URL");
            self.release_slot(invocation).await;
            return Ok(Launch::NoPlayUrl);
        };

        let license = if item.drm {
            match grant.license.clone() {
                Some(license) => Some(license),
                None => {
                    tracing::warn!(item_id = %item.id, content_id = %item.content_id, "DRM licence information missing");
                    self.release_slot(invocation).await;
                    return Ok(Launch::NoLicence);
                }
            }
        } else {
            None
        };

        let save_dir = self.config.download.save_dir.clone();
        let filename = item
            .filename
            .clone()
            .unwrap_or_else(|| format!("{}.mp4", item.content_id));
        item.save_path = Some(save_dir.clone());
        item.filename = Some(filename.clone());

        let written = self
            .subtitles
            .fetch_all(&grant.subtitles, &save_dir.join(&filename))
            .await;
        if !written.is_empty() {
            tracing::debug!(item_id = %item.id, count = written.len(), "Subtitles written");
        }

        item.outcome_code = OutcomeCode::Downloading;
        item.start_time = Some(Utc::now());
        item.end_time = None;
        item.transient_fault = false;
        item.packet_faults = 0;
        item.backend_status = -1;
        if let Err(e) = self.db.save_item(item).await {
            self.release_slot(invocation).await;
            return Err(e);
        }

        let job = DownloadJob {
            invocation,
            item_id: item.id,
            content_id: item.content_id.clone(),
            play_url,
            save_dir,
            filename: filename.clone(),
            headers: grant.headers.clone(),
            license,
        };
        let backend = self.backends.for_content(item.drm);
        if let Err(e) = backend.start(job, self.backends.events.clone()).await {
            tracing::warn!(item_id = %item.id, content_id = %item.content_id, backend = backend.name(), error = %e, "Backend refused the job");
            self.release_slot(invocation).await;
            return Ok(Launch::StartFailed);
        }

        tracing::info!(
            %invocation,
            item_id = %item.id,
            content_id = %item.content_id,
            backend = backend.name(),
            filename = %filename,
            "Download dispatched"
        );
        self.emit_event(Event::Dispatched {
            item_id: item.id,
            invocation,
            filename,
        });
        Ok(Launch::Started)
    }

    /// Items with a live invocation
    pub(crate) async fn in_flight_items(&self) -> HashSet<ItemId> {
        self.dispatch
            .in_flight
            .lock()
            .await
            .values()
            .map(|entry| entry.item_id)
            .collect()
    }

    /// Count a retry and make the item eligible again after an unexpected failure
    async fn count_retry(&self, id: ItemId) {
        let result = async {
            if let Some(mut item) = self.db.get_item(id).await? {
                item.retry_count = item.retry_count.saturating_add(1);
                item.outcome_code = OutcomeCode::Eligible;
                self.db.save_item(&item).await?;
            }
            Ok::<_, Error>(())
        }
        .await;
        if let Err(e) = result {
            tracing::error!(item_id = %id, error = %e, "Failed to record retry");
        }
    }
}

/// Quality to request: the operator's choice for program items, else the policy target
pub(crate) fn quality_for(item: &CatalogItem, policy: &PolicySnapshot) -> Quality {
    item.requested_quality.unwrap_or(policy.quality)
}

/// Output file already on disk for `item`
///
/// The clear backend writes the stored name; the manifest backend writes it with commas
/// removed from the stem.
async fn existing_output(item: &CatalogItem) -> Option<PathBuf> {
    let stored = item.output_path()?;
    let (stem, suffix) = sanitize_name(item.filename.as_deref()?);
    let manifest = stored.with_file_name(format!("{stem}{suffix}"));
    for path in [stored, manifest] {
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Some(path);
        }
    }
    None
}

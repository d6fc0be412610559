//! Operator commands: reset, retrieve, delete, list, cancel.

use crate::error::{DatabaseError, Error, Result};
use crate::item::CatalogItem;
use crate::types::{ItemFilter, ItemId, Origin, OutcomeCode};

use super::VodDownloader;

impl VodDownloader {
    /// Fully reset an item so the next run considers it again
    ///
    /// Clears the completed, user-abort and packet-fault flags, sets code 0 and zeroes
    /// the packet-fault count, backend status and retry counter.
    ///
    /// # Errors
    ///
    /// Returns an error if the item does not exist.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # use vod_dl::*;
    /// # async fn example(downloader: VodDownloader, id: ItemId) -> Result<()> {
    /// downloader.reset_item(id).await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn reset_item(&self, id: ItemId) -> Result<()> {
        if !self.db.reset_item(id).await? {
            return Err(not_found(id));
        }
        tracing::info!(item_id = %id, "Item reset");
        Ok(())
    }

    /// Clear flags and codes on every item; retry counters are kept
    ///
    /// # Returns
    ///
    /// Number of items touched.
    pub async fn reset_all(&self) -> Result<u64> {
        let touched = self.db.reset_all().await?;
        tracing::info!(touched, "All items reset");
        Ok(touched)
    }

    /// Refresh an item's documents now
    ///
    /// On success the item becomes eligible (code 0); on failure it carries code 33 and
    /// one more retry.
    ///
    /// # Returns
    ///
    /// The item as stored after the refresh.
    pub async fn retrieve_item(&self, id: ItemId) -> Result<CatalogItem> {
        let mut item = self.db.get_item(id).await?.ok_or_else(|| not_found(id))?;
        let quality = item.requested_quality.unwrap_or(self.config.policy.quality);

        let outcome = self.refresher.refresh(&mut item, quality).await;
        if outcome.is_usable() {
            item.outcome_code = OutcomeCode::Eligible;
        }
        self.db.save_item(&item).await?;
        tracing::info!(item_id = %id, content_id = %item.content_id, ?outcome, "Item retrieved");
        Ok(item)
    }

    /// Delete an item, stopping its download first
    ///
    /// # Returns
    ///
    /// Whether an item was deleted.
    pub async fn delete_item(&self, id: ItemId) -> Result<bool> {
        self.cancel_item(id).await;
        let deleted = self.db.delete_item(id).await?;
        if deleted {
            tracing::info!(item_id = %id, "Item deleted");
        }
        Ok(deleted)
    }

    /// Delete completed program items
    pub async fn delete_completed_programs(&self) -> Result<u64> {
        let deleted = self.db.delete_programs(true).await?;
        tracing::info!(deleted, "Completed program items deleted");
        Ok(deleted)
    }

    /// Delete program items that have not completed
    pub async fn delete_incomplete_programs(&self) -> Result<u64> {
        let deleted = self.db.delete_programs(false).await?;
        tracing::info!(deleted, "Incomplete program items deleted");
        Ok(deleted)
    }

    /// List items for operator views, newest first
    ///
    /// # Arguments
    ///
    /// * `filter` - Which items to include
    /// * `origin` - Restrict to one origin, or `None` for both
    pub async fn list_items(
        &self,
        filter: ItemFilter,
        origin: Option<Origin>,
    ) -> Result<Vec<CatalogItem>> {
        self.db.list_items(filter, origin).await
    }

    /// Stop every running download of an item
    ///
    /// # Returns
    ///
    /// Whether a run was stopped. The outcome is recorded when the backend reports the
    /// stop.
    pub async fn cancel_item(&self, id: ItemId) -> bool {
        let running: Vec<_> = self
            .dispatch
            .in_flight
            .lock()
            .await
            .iter()
            .filter(|(_, entry)| entry.item_id == id)
            .map(|(invocation, _)| *invocation)
            .collect();

        let mut stopped = false;
        for invocation in running {
            stopped |= self.stop_invocation(invocation).await;
        }
        if stopped {
            tracing::info!(item_id = %id, "Download cancelled");
        }
        stopped
    }

    /// Ask the owning backend to stop one invocation
    pub(crate) async fn stop_invocation(&self, invocation: crate::types::InvocationId) -> bool {
        let drm = self
            .dispatch
            .in_flight
            .lock()
            .await
            .get(&invocation)
            .map(|entry| entry.drm);
        match drm {
            Some(drm) => self.backends.for_content(drm).stop(invocation).await,
            None => false,
        }
    }
}

fn not_found(id: ItemId) -> Error {
    Error::Database(DatabaseError::NotFound(format!("Item {} not found", id)))
}

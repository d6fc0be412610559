//! Catalog item CRUD, listing filters and operator resets.

use crate::error::DatabaseError;
use crate::item::CatalogItem;
use crate::types::{ItemFilter, ItemId, Origin, OutcomeCode, Quality};
use crate::{Error, Result};
use serde_json::Value;

use super::{CatalogRow, Database, ITEM_COLUMNS, NewCatalogItem};

fn json_text(value: &Option<Value>) -> Result<Option<String>> {
    value
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .map_err(Error::Serialization)
}

fn into_items(rows: Vec<CatalogRow>) -> Result<Vec<CatalogItem>> {
    rows.into_iter()
        .map(|row| CatalogItem::try_from(row).map_err(Error::Database))
        .collect()
}

impl Database {
    /// Insert a new item with outcome code 0
    pub async fn insert_item(&self, item: &NewCatalogItem) -> Result<ItemId> {
        let now = chrono::Utc::now().timestamp();

        let result = sqlx::query(
            r#"
            INSERT INTO catalog_items (
                origin, content_id, content_type, vod_type, channel_name, program_id,
                program_title, release_date, episode_number, episode_title, image,
                requested_quality, catalog_json, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(item.origin.as_str())
        .bind(&item.content_id)
        .bind(item.content_type.as_str())
        .bind(&item.vod_type)
        .bind(&item.channel_name)
        .bind(&item.program_id)
        .bind(&item.program_title)
        .bind(&item.release_date)
        .bind(&item.episode_number)
        .bind(&item.episode_title)
        .bind(&item.image)
        .bind(item.requested_quality.map(|q| q.as_str()))
        .bind(json_text(&item.catalog_json)?)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to insert item: {}",
                e
            )))
        })?;

        Ok(ItemId(result.last_insert_rowid()))
    }

    /// Insert or refresh a recent-intake item, keyed by content id
    ///
    /// An existing recent item keeps its lifecycle state (code, flags, retries); only its
    /// catalog metadata is replaced.
    ///
    /// # Returns
    ///
    /// The item id and whether the item was newly created.
    pub async fn upsert_recent(&self, item: &NewCatalogItem) -> Result<(ItemId, bool)> {
        let existing: Option<i64> = sqlx::query_scalar(
            "SELECT id FROM catalog_items WHERE origin = 'recent' AND content_id = ?",
        )
        .bind(&item.content_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to look up recent item: {}",
                e
            )))
        })?;

        let Some(id) = existing else {
            let id = self
                .insert_item(&NewCatalogItem {
                    origin: Origin::Recent,
                    ..item.clone()
                })
                .await?;
            return Ok((id, true));
        };

        sqlx::query(
            r#"
            UPDATE catalog_items SET
                content_type = ?, vod_type = ?, channel_name = ?, program_id = ?,
                program_title = ?, release_date = ?, episode_number = ?, episode_title = ?,
                image = ?, catalog_json = ?
            WHERE id = ?
            "#,
        )
        .bind(item.content_type.as_str())
        .bind(&item.vod_type)
        .bind(&item.channel_name)
        .bind(&item.program_id)
        .bind(&item.program_title)
        .bind(&item.release_date)
        .bind(&item.episode_number)
        .bind(&item.episode_title)
        .bind(&item.image)
        .bind(json_text(&item.catalog_json)?)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to update recent item: {}",
                e
            )))
        })?;

        Ok((ItemId(id), false))
    }

    /// Get an item by ID
    pub async fn get_item(&self, id: ItemId) -> Result<Option<CatalogItem>> {
        let sql = format!("SELECT {} FROM catalog_items WHERE id = ?", ITEM_COLUMNS);
        let row = sqlx::query_as::<_, CatalogRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to get item: {}",
                    e
                )))
            })?;

        row.map(|r| CatalogItem::try_from(r).map_err(Error::Database))
            .transpose()
    }

    /// Find the program item for a content id and requested quality
    pub async fn find_program(
        &self,
        content_id: &str,
        quality: Quality,
    ) -> Result<Option<CatalogItem>> {
        let sql = format!(
            "SELECT {} FROM catalog_items \
             WHERE origin = 'program' AND content_id = ? AND requested_quality = ? \
             ORDER BY id DESC LIMIT 1",
            ITEM_COLUMNS
        );
        let row = sqlx::query_as::<_, CatalogRow>(&sql)
            .bind(content_id)
            .bind(quality.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to find program item: {}",
                    e
                )))
            })?;

        row.map(|r| CatalogItem::try_from(r).map_err(Error::Database))
            .transpose()
    }

    /// Persist every mutable column of an item
    pub async fn save_item(&self, item: &CatalogItem) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE catalog_items SET
                content_type = ?, vod_type = ?, channel_name = ?, program_id = ?,
                program_title = ?, release_date = ?, episode_number = ?, episode_title = ?,
                program_genre = ?, image = ?, quality = ?, catalog_json = ?,
                contents_json = ?, streaming_json = ?, play_url = ?, filename = ?, drm = ?,
                start_time = ?, end_time = ?, download_time_secs = ?, duration_secs = ?,
                filesize = ?, filesize_str = ?, download_speed = ?, save_path = ?,
                backend_status = ?, completed = ?, user_aborted = ?, transient_fault = ?,
                packet_faults = ?, retry_count = ?, outcome_code = ?
            WHERE id = ?
            "#,
        )
        .bind(item.content_type.as_str())
        .bind(&item.vod_type)
        .bind(&item.channel_name)
        .bind(&item.program_id)
        .bind(&item.program_title)
        .bind(&item.release_date)
        .bind(&item.episode_number)
        .bind(&item.episode_title)
        .bind(&item.program_genre)
        .bind(&item.image)
        .bind(item.quality.map(|q| q.as_str()))
        .bind(json_text(&item.catalog_json)?)
        .bind(json_text(&item.contents_json)?)
        .bind(json_text(&item.streaming_json)?)
        .bind(&item.play_url)
        .bind(&item.filename)
        .bind(item.drm as i32)
        .bind(item.start_time.map(|t| t.timestamp()))
        .bind(item.end_time.map(|t| t.timestamp()))
        .bind(item.download_time_secs)
        .bind(item.duration_secs)
        .bind(item.filesize)
        .bind(&item.filesize_str)
        .bind(&item.download_speed)
        .bind(
            item.save_path
                .as_ref()
                .and_then(|p| p.to_str().map(String::from)),
        )
        .bind(item.backend_status)
        .bind(item.completed as i32)
        .bind(item.user_aborted as i32)
        .bind(item.transient_fault as i32)
        .bind(item.packet_faults)
        .bind(i64::from(item.retry_count))
        .bind(item.outcome_code.to_i32())
        .bind(item.id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to save item: {}",
                e
            )))
        })?;

        if result.rows_affected() == 0 {
            return Err(Error::Database(DatabaseError::NotFound(format!(
                "item {} not found",
                item.id
            ))));
        }

        Ok(())
    }

    /// List items of one origin with a given outcome code, oldest first
    pub async fn list_by_code(&self, origin: Origin, code: OutcomeCode) -> Result<Vec<CatalogItem>> {
        let sql = format!(
            "SELECT {} FROM catalog_items WHERE origin = ? AND outcome_code = ? ORDER BY id ASC",
            ITEM_COLUMNS
        );
        let rows = sqlx::query_as::<_, CatalogRow>(&sql)
            .bind(origin.as_str())
            .bind(code.to_i32())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to list items by code: {}",
                    e
                )))
            })?;

        into_items(rows)
    }

    /// List user-aborted items of one origin, oldest first
    pub async fn list_user_aborted(&self, origin: Origin) -> Result<Vec<CatalogItem>> {
        let sql = format!(
            "SELECT {} FROM catalog_items WHERE origin = ? AND user_aborted = 1 ORDER BY id ASC",
            ITEM_COLUMNS
        );
        let rows = sqlx::query_as::<_, CatalogRow>(&sql)
            .bind(origin.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to list user-aborted items: {}",
                    e
                )))
            })?;

        into_items(rows)
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
        let (condition, code) = match filter {
            ItemFilter::All => ("1 = 1", None),
            ItemFilter::Completed => ("completed = 1", None),
            ItemFilter::Uncompleted => ("outcome_code = ?", Some(OutcomeCode::Downloading.to_i32())),
            ItemFilter::UserAborted => ("user_aborted = 1", None),
            ItemFilter::PacketFault => ("transient_fault = 1", None),
            ItemFilter::DownloadFaults => ("outcome_code BETWEEN 1 AND 9", None),
            ItemFilter::KeywordExcluded => ("outcome_code IN (15, 16)", None),
            ItemFilter::Code(code) => ("outcome_code = ?", Some(code.to_i32())),
        };
        let origin_clause = if origin.is_some() { " AND origin = ?" } else { "" };
        let sql = format!(
            "SELECT {} FROM catalog_items WHERE {}{} ORDER BY id DESC",
            ITEM_COLUMNS, condition, origin_clause
        );

        let mut query = sqlx::query_as::<_, CatalogRow>(&sql);
        if let Some(code) = code {
            query = query.bind(code);
        }
        if let Some(origin) = origin {
            query = query.bind(origin.as_str());
        }

        let rows = query.fetch_all(&self.pool).await.map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to list items: {}",
                e
            )))
        })?;

        into_items(rows)
    }

    /// Program items that have not completed, oldest first
    pub async fn list_failed_programs(&self) -> Result<Vec<CatalogItem>> {
        let sql = format!(
            "SELECT {} FROM catalog_items WHERE origin = 'program' AND completed = 0 ORDER BY id ASC",
            ITEM_COLUMNS
        );
        let rows = sqlx::query_as::<_, CatalogRow>(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to list failed program items: {}",
                    e
                )))
            })?;

        into_items(rows)
    }

    /// Delete an item
    ///
    /// # Returns
    ///
    /// Whether a row was deleted.
    pub async fn delete_item(&self, id: ItemId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM catalog_items WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to delete item: {}",
                    e
                )))
            })?;

        Ok(result.rows_affected() > 0)
    }

    /// Delete items created more than `days` days ago
    ///
    /// Items with a download in progress are kept.
    ///
    /// # Returns
    ///
    /// Number of deleted items.
    pub async fn delete_older_than(&self, days: u32) -> Result<u64> {
        let cutoff = chrono::Utc::now().timestamp() - i64::from(days) * 24 * 60 * 60;
        let result = sqlx::query(
            "DELETE FROM catalog_items WHERE created_at < ? AND outcome_code != ?",
        )
        .bind(cutoff)
        .bind(OutcomeCode::Downloading.to_i32())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to delete old items: {}",
                e
            )))
        })?;

        Ok(result.rows_affected())
    }

    /// Delete program items by completion state
    ///
    /// # Returns
    ///
    /// Number of deleted items.
    pub async fn delete_programs(&self, completed: bool) -> Result<u64> {
        let result =
            sqlx::query("DELETE FROM catalog_items WHERE origin = 'program' AND completed = ?")
                .bind(completed as i32)
                .execute(&self.pool)
                .await
                .map_err(|e| {
                    Error::Database(DatabaseError::QueryFailed(format!(
                        "Failed to delete program items: {}",
                        e
                    )))
                })?;

        Ok(result.rows_affected())
    }

    /// Fully reset one item, including its retry counter
    pub async fn reset_item(&self, id: ItemId) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE catalog_items SET
                completed = 0, user_aborted = 0, transient_fault = 0, outcome_code = 0,
                packet_faults = 0, backend_status = -1, retry_count = 0
            WHERE id = ?
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to reset item: {}",
                e
            )))
        })?;

        Ok(result.rows_affected() > 0)
    }

    /// Clear flags and codes on every item; retry counters are left alone
    ///
    /// # Returns
    ///
    /// Number of items touched.
    pub async fn reset_all(&self) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE catalog_items SET
                completed = 0, user_aborted = 0, transient_fault = 0, outcome_code = 0
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to reset items: {}",
                e
            )))
        })?;

        Ok(result.rows_affected())
    }

    /// Backdate an item's creation time
    #[cfg(test)]
    pub(crate) async fn set_created_at(&self, id: ItemId, created_at: i64) -> Result<()> {
        sqlx::query("UPDATE catalog_items SET created_at = ? WHERE id = ?")
            .bind(created_at)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(Error::Sqlx)?;
        Ok(())
    }
}

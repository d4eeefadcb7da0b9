use super::schema::Database;
use super::types::{CacheEntry, CacheEntrySummary, CachedImage, DatabaseError, NewCacheEntry};

impl Database {
    // ========================================================================
    // Cache Entry Operations
    // ========================================================================

    /// Store a complete cache entry for `source_id`.
    ///
    /// The entry row and every image row are written in one transaction:
    /// either the whole entry becomes visible or nothing does.
    pub async fn append_entry(
        &self,
        source_id: i64,
        entry: &NewCacheEntry,
    ) -> Result<i64, DatabaseError> {
        let mut tx = self.pool.begin().await?;

        let exists: Option<(i64,)> = sqlx::query_as("SELECT id FROM feed_sources WHERE id = ?")
            .bind(source_id)
            .fetch_optional(&mut *tx)
            .await?;
        if exists.is_none() {
            return Err(DatabaseError::NotFound {
                kind: "source",
                id: source_id,
            });
        }

        let (entry_id,): (i64,) = sqlx::query_as(
            "INSERT INTO cache_entries (source_id, cached_at, markup) VALUES (?, ?, ?) RETURNING id",
        )
        .bind(source_id)
        .bind(entry.cached_at)
        .bind(&entry.markup)
        .fetch_one(&mut *tx)
        .await?;

        for image in &entry.images {
            sqlx::query(
                "INSERT INTO cached_images (entry_id, cached_at, url, data) VALUES (?, ?, ?, ?)",
            )
            .bind(entry_id)
            .bind(entry.cached_at)
            .bind(&image.url)
            .bind(&image.data)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        tracing::info!(
            source_id,
            entry_id,
            images = entry.images.len(),
            image_bytes = entry.total_image_bytes(),
            "Stored cache entry"
        );
        Ok(entry_id)
    }

    /// Entries of a source, newest first.
    pub async fn entries_for_source(
        &self,
        source_id: i64,
    ) -> Result<Vec<CacheEntrySummary>, DatabaseError> {
        let entries: Vec<CacheEntrySummary> = sqlx::query_as(
            r#"
            SELECT
                e.id, e.source_id, e.cached_at,
                COUNT(i.id) AS image_count,
                LENGTH(CAST(e.markup AS BLOB)) + COALESCE(SUM(LENGTH(i.data)), 0) AS total_bytes
            FROM cache_entries e
            LEFT JOIN cached_images i ON i.entry_id = e.id
            WHERE e.source_id = ?
            GROUP BY e.id
            ORDER BY e.cached_at DESC, e.id DESC
        "#,
        )
        .bind(source_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(entries)
    }

    /// Load one entry with all of its images, sorted by URL.
    pub async fn get_entry(&self, id: i64) -> Result<Option<CacheEntry>, DatabaseError> {
        let row: Option<(i64, i64, i64, String)> = sqlx::query_as(
            "SELECT id, source_id, cached_at, markup FROM cache_entries WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        let Some((id, source_id, cached_at, markup)) = row else {
            return Ok(None);
        };

        let images: Vec<CachedImage> = sqlx::query_as(
            "SELECT id, entry_id, cached_at, url, data FROM cached_images WHERE entry_id = ? ORDER BY url",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        Ok(Some(CacheEntry {
            id,
            source_id,
            cached_at,
            markup,
            images,
        }))
    }

    /// Delete one entry; its images go with it.
    pub async fn delete_entry(&self, id: i64) -> Result<(), DatabaseError> {
        let result = sqlx::query("DELETE FROM cache_entries WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(DatabaseError::NotFound { kind: "entry", id });
        }
        Ok(())
    }

    /// Ids of every stored entry across all sources, oldest first.
    pub async fn all_entry_ids(&self) -> Result<Vec<i64>, DatabaseError> {
        let rows: Vec<(i64,)> = sqlx::query_as("SELECT id FROM cache_entries ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    /// Delete an entry's images, then the entry, and commit.
    ///
    /// Returns the number of images removed. A missing entry is not an
    /// error; it removes nothing.
    pub async fn purge_entry(&self, id: i64) -> Result<u64, DatabaseError> {
        let mut tx = self.pool.begin().await?;

        let images = sqlx::query("DELETE FROM cached_images WHERE entry_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        sqlx::query("DELETE FROM cache_entries WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        tracing::debug!(entry_id = id, images, "Purged cache entry");
        Ok(images)
    }
}

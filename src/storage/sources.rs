use super::schema::Database;
use super::types::{DatabaseError, FeedSource};
use crate::util::{strip_control_chars, suggest_source_name, validate_url};

const SOURCE_COLUMNS: &str = "id, name, url, created_at, last_read_at, position";

/// Control characters stripped, surrounding whitespace trimmed.
fn sanitize_name(name: &str) -> Result<String, DatabaseError> {
    let name = strip_control_chars(name);
    let name = name.trim();
    if name.is_empty() {
        return Err(DatabaseError::EmptyName);
    }
    Ok(name.to_string())
}

impl Database {
    // ========================================================================
    // Feed Source Operations
    // ========================================================================

    /// Subscribe to a feed.
    ///
    /// The URL must be an absolute `http://` or `https://` URL. Without an
    /// explicit `name`, one is derived from the URL (see
    /// [`suggest_source_name`]). The new source is placed above every
    /// existing one.
    pub async fn add_source(
        &self,
        url: &str,
        name: Option<&str>,
    ) -> Result<FeedSource, DatabaseError> {
        let parsed = validate_url(url)?;
        let now = chrono::Utc::now().timestamp();

        let mut tx = self.pool.begin().await?;

        let (count, min_position): (i64, Option<i64>) =
            sqlx::query_as("SELECT COUNT(*), MIN(position) FROM feed_sources")
                .fetch_one(&mut *tx)
                .await?;

        let name = match name {
            Some(name) => sanitize_name(name)?,
            None => suggest_source_name(&parsed, usize::try_from(count).unwrap_or(0)),
        };
        let position = min_position.map_or(0, |p| p - 1);

        let source: FeedSource = sqlx::query_as(&format!(
            "INSERT INTO feed_sources (name, url, created_at, last_read_at, position)
             VALUES (?, ?, ?, NULL, ?)
             RETURNING {SOURCE_COLUMNS}"
        ))
        .bind(&name)
        .bind(parsed.as_str())
        .bind(now)
        .bind(position)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::info!(id = source.id, name = %source.name, url = %source.url, "Added feed source");
        Ok(source)
    }

    /// All sources in display order.
    pub async fn list_sources(&self) -> Result<Vec<FeedSource>, DatabaseError> {
        let sources: Vec<FeedSource> = sqlx::query_as(&format!(
            "SELECT {SOURCE_COLUMNS} FROM feed_sources ORDER BY position, id"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(sources)
    }

    pub async fn get_source(&self, id: i64) -> Result<Option<FeedSource>, DatabaseError> {
        let source: Option<FeedSource> = sqlx::query_as(&format!(
            "SELECT {SOURCE_COLUMNS} FROM feed_sources WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(source)
    }

    /// Rename a source. Control characters are stripped and the result
    /// trimmed; an empty name is rejected.
    pub async fn rename_source(&self, id: i64, name: &str) -> Result<FeedSource, DatabaseError> {
        let name = sanitize_name(name)?;
        sqlx::query_as(&format!(
            "UPDATE feed_sources SET name = ? WHERE id = ? RETURNING {SOURCE_COLUMNS}"
        ))
        .bind(&name)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(DatabaseError::NotFound { kind: "source", id })
    }

    /// Move a source to `index` in display order (0 is the top). Indexes past
    /// the end move it to the bottom.
    ///
    /// Positions of all sources are rewritten as `0..n` in one transaction.
    pub async fn move_source(&self, id: i64, index: usize) -> Result<(), DatabaseError> {
        let mut tx = self.pool.begin().await?;

        let rows: Vec<(i64,)> = sqlx::query_as("SELECT id FROM feed_sources ORDER BY position, id")
            .fetch_all(&mut *tx)
            .await?;
        let mut order: Vec<i64> = rows.into_iter().map(|(id,)| id).collect();

        let current = order
            .iter()
            .position(|&existing| existing == id)
            .ok_or(DatabaseError::NotFound { kind: "source", id })?;
        order.remove(current);
        order.insert(index.min(order.len()), id);

        for (position, source_id) in order.iter().enumerate() {
            sqlx::query("UPDATE feed_sources SET position = ? WHERE id = ?")
                .bind(position as i64)
                .bind(source_id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Delete a source together with all of its cache entries and images.
    pub async fn delete_source(&self, id: i64) -> Result<(), DatabaseError> {
        let result = sqlx::query("DELETE FROM feed_sources WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(DatabaseError::NotFound { kind: "source", id });
        }
        tracing::info!(id, "Deleted feed source");
        Ok(())
    }

    /// Record that the source was just read.
    pub async fn mark_source_read(&self, id: i64) -> Result<(), DatabaseError> {
        let now = chrono::Utc::now().timestamp();
        let result = sqlx::query("UPDATE feed_sources SET last_read_at = ? WHERE id = ?")
            .bind(now)
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(DatabaseError::NotFound { kind: "source", id });
        }
        Ok(())
    }
}

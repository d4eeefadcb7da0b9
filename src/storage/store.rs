use async_trait::async_trait;

use super::schema::Database;
use super::types::{DatabaseError, NewCacheEntry};

/// The persistence operations the caching pipeline and bulk cleanup need.
///
/// [`Database`] is the real implementation. Keeping the pipeline generic over
/// this trait lets callers wrap the database, for example to observe or fail
/// writes.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Persist a complete entry for `source_id` atomically, returning its id.
    async fn append_entry(&self, source_id: i64, entry: &NewCacheEntry)
        -> Result<i64, DatabaseError>;

    /// Ids of every stored entry.
    async fn all_entry_ids(&self) -> Result<Vec<i64>, DatabaseError>;

    /// Delete one entry and its images in a single commit. Returns the number
    /// of images removed.
    async fn purge_entry(&self, entry_id: i64) -> Result<u64, DatabaseError>;
}

#[async_trait]
impl CacheStore for Database {
    async fn append_entry(
        &self,
        source_id: i64,
        entry: &NewCacheEntry,
    ) -> Result<i64, DatabaseError> {
        Database::append_entry(self, source_id, entry).await
    }

    async fn all_entry_ids(&self) -> Result<Vec<i64>, DatabaseError> {
        Database::all_entry_ids(self).await
    }

    async fn purge_entry(&self, entry_id: i64) -> Result<u64, DatabaseError> {
        Database::purge_entry(self, entry_id).await
    }
}

#[async_trait]
impl<S: CacheStore + ?Sized> CacheStore for std::sync::Arc<S> {
    async fn append_entry(
        &self,
        source_id: i64,
        entry: &NewCacheEntry,
    ) -> Result<i64, DatabaseError> {
        (**self).append_entry(source_id, entry).await
    }

    async fn all_entry_ids(&self) -> Result<Vec<i64>, DatabaseError> {
        (**self).all_entry_ids().await
    }

    async fn purge_entry(&self, entry_id: i64) -> Result<u64, DatabaseError> {
        (**self).purge_entry(entry_id).await
    }
}

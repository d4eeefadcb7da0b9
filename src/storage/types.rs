use thiserror::Error;

use crate::util::UrlValidationError;

// ============================================================================
// Error Types
// ============================================================================

/// Database-specific errors with user-friendly messages
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Another instance of the application has locked the database
    #[error("Another instance of silkfeed appears to be running. Please close it and try again.")]
    InstanceLocked,

    /// Migration failed
    #[error("Database migration failed: {0}")]
    Migration(String),

    /// A source URL was rejected
    #[error("Invalid feed URL: {0}")]
    InvalidUrl(#[from] UrlValidationError),

    /// A source name was empty after sanitizing
    #[error("Source name cannot be empty")]
    EmptyName,

    /// The referenced row does not exist
    #[error("No {kind} with id {id}")]
    NotFound { kind: &'static str, id: i64 },

    /// Generic database error
    #[error("Database error: {0}")]
    Other(#[from] sqlx::Error),
}

impl DatabaseError {
    /// Check if a sqlx error indicates database locking
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        let error_string = err.to_string().to_lowercase();

        // SQLITE_BUSY (5), SQLITE_LOCKED (6), SQLITE_CANTOPEN (14)
        if error_string.contains("database is locked")
            || error_string.contains("database table is locked")
            || error_string.contains("unable to open database file")
        {
            return DatabaseError::InstanceLocked;
        }

        DatabaseError::Other(err)
    }
}

// ============================================================================
// Data Structures
// ============================================================================

/// A subscribed feed, identified by its URL.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct FeedSource {
    pub id: i64,
    pub name: String,
    pub url: String,
    /// Unix seconds
    pub created_at: i64,
    /// Unix seconds of the last time an entry of this source was opened
    pub last_read_at: Option<i64>,
    /// Display order, ascending
    pub position: i64,
}

/// One downloaded image belonging to a cache entry.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct CachedImage {
    pub id: i64,
    pub entry_id: i64,
    pub cached_at: i64,
    pub url: String,
    pub data: Vec<u8>,
}

/// A stored snapshot of a feed document together with every image it references.
///
/// Entries are immutable once stored; they are only ever deleted whole.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub id: i64,
    pub source_id: i64,
    pub cached_at: i64,
    pub markup: String,
    /// Sorted by URL
    pub images: Vec<CachedImage>,
}

impl CacheEntry {
    /// Bytes of the image cached for `url`, if any.
    pub fn image_data(&self, url: &str) -> Option<&[u8]> {
        self.images
            .iter()
            .find(|image| image.url == url)
            .map(|image| image.data.as_slice())
    }
}

/// Listing row for a cache entry, without markup or image blobs.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct CacheEntrySummary {
    pub id: i64,
    pub source_id: i64,
    pub cached_at: i64,
    pub image_count: i64,
    /// Markup plus image bytes
    pub total_bytes: i64,
}

/// An image ready to be stored with its entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewCachedImage {
    pub url: String,
    pub data: Vec<u8>,
}

/// A complete cache entry that has not been persisted yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewCacheEntry {
    pub cached_at: i64,
    pub markup: String,
    pub images: Vec<NewCachedImage>,
}

impl NewCacheEntry {
    pub fn image_data(&self, url: &str) -> Option<&[u8]> {
        self.images
            .iter()
            .find(|image| image.url == url)
            .map(|image| image.data.as_slice())
    }

    pub fn total_image_bytes(&self) -> usize {
        self.images.iter().map(|image| image.data.len()).sum()
    }
}

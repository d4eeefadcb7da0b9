mod entries;
mod schema;
mod sources;
mod store;
mod types;

pub use schema::Database;
pub use store::CacheStore;
pub use types::{
    CacheEntry, CacheEntrySummary, CachedImage, DatabaseError, FeedSource, NewCacheEntry,
    NewCachedImage,
};

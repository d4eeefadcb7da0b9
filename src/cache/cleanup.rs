use thiserror::Error;

use crate::storage::{CacheStore, DatabaseError};

/// What a cleanup sweep removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub entries_removed: usize,
    pub images_removed: u64,
}

/// The sweep stopped early. Everything counted in `report` is gone for good;
/// every other entry is untouched.
#[derive(Debug, Error)]
#[error("Cleanup stopped after removing {} entries: {source}", .report.entries_removed)]
pub struct CleanupError {
    pub report: CleanupReport,
    #[source]
    pub source: DatabaseError,
}

/// Deletes every cache entry of every source, committing after each one.
///
/// For each entry the images are deleted first, then the entry, then the
/// change is committed before moving on. Feed sources themselves are kept.
pub async fn clean_all<S: CacheStore + ?Sized>(store: &S) -> Result<CleanupReport, CleanupError> {
    let mut report = CleanupReport::default();

    let ids = store
        .all_entry_ids()
        .await
        .map_err(|source| CleanupError { report, source })?;

    tracing::info!(entries = ids.len(), "Cleaning cache");

    for id in ids {
        match store.purge_entry(id).await {
            Ok(images) => {
                report.entries_removed += 1;
                report.images_removed += images;
            }
            Err(source) => {
                tracing::warn!(entry_id = id, error = %source, removed = report.entries_removed, "Cleanup stopped");
                return Err(CleanupError { report, source });
            }
        }
    }

    tracing::info!(
        entries = report.entries_removed,
        images = report.images_removed,
        "Cache cleaned"
    );
    Ok(report)
}

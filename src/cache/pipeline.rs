//! Stage orchestrator for creating one cache entry.
//!
//! A [`CachePipeline`] walks a single attempt through
//! `Idle → FetchingFeed → ScanningImages → DownloadingImages → BuildingEntry →
//! Persisting → Done`, one stage per [`CachePipeline::advance`] call. Any stage
//! may end the attempt in `Failed`. The outputs of finished stages live inside
//! the state value itself, so a state can never claim a stage is ready while
//! its inputs are missing.
//!
//! Nothing runs until `advance` is called: a caller that only shows the feed
//! download step never touches the image hosts.

use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tokio::sync::mpsc;
use url::Url;

use super::builder;
use super::downloader::{download_all, DownloadError, ImageMap, DEFAULT_CONCURRENT_DOWNLOADS};
use crate::feed::{scan_for_image_urls, FetchError, FetchProfile, Fetcher, MarkupError};
use crate::storage::{CacheStore, DatabaseError, NewCacheEntry};

/// Process-wide source of attempt ids. Every pipeline instance gets a new one.
static NEXT_ATTEMPT: AtomicU64 = AtomicU64::new(1);

// ============================================================================
// Stages and State
// ============================================================================

/// The five units of work, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    FetchingFeed,
    ScanningImages,
    DownloadingImages,
    BuildingEntry,
    Persisting,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Stage::FetchingFeed => "fetching feed",
            Stage::ScanningImages => "scanning for images",
            Stage::DownloadingImages => "downloading images",
            Stage::BuildingEntry => "building entry",
            Stage::Persisting => "saving entry",
        };
        f.write_str(name)
    }
}

/// A stage that is ready to run, carrying everything earlier stages produced.
#[derive(Debug)]
pub enum Step {
    ScanningImages {
        markup: String,
    },
    DownloadingImages {
        markup: String,
        image_urls: Vec<Url>,
    },
    BuildingEntry {
        markup: String,
        images: ImageMap,
    },
    Persisting {
        entry: NewCacheEntry,
    },
}

impl Step {
    /// The fetched feed document, as carried by every step.
    pub fn markup(&self) -> &str {
        match self {
            Step::ScanningImages { markup }
            | Step::DownloadingImages { markup, .. }
            | Step::BuildingEntry { markup, .. } => markup,
            Step::Persisting { entry } => &entry.markup,
        }
    }

    /// Image URLs found by the scan, once it has run.
    pub fn image_urls(&self) -> Option<&[Url]> {
        match self {
            Step::DownloadingImages { image_urls, .. } => Some(image_urls),
            _ => None,
        }
    }

    pub fn stage(&self) -> Stage {
        match self {
            Step::ScanningImages { .. } => Stage::ScanningImages,
            Step::DownloadingImages { .. } => Stage::DownloadingImages,
            Step::BuildingEntry { .. } => Stage::BuildingEntry,
            Step::Persisting { .. } => Stage::Persisting,
        }
    }
}

#[derive(Debug)]
pub enum PipelineState {
    /// Nothing has run yet; the feed download is next
    Idle,
    /// The given step is next
    At(Step),
    /// Terminal: the entry is stored
    Done { entry_id: i64 },
    /// Terminal: `stage` failed. Only [`CachePipeline::restart`] leaves this state.
    ///
    /// `completed` holds what the stages before `stage` produced, or `None`
    /// when the feed fetch itself failed.
    Failed {
        stage: Stage,
        error: PipelineError,
        completed: Option<Step>,
    },
}

impl PipelineState {
    /// The stage the next `advance` would run, or `None` once terminal.
    pub fn next_stage(&self) -> Option<Stage> {
        match self {
            PipelineState::Idle => Some(Stage::FetchingFeed),
            PipelineState::At(step) => Some(step.stage()),
            PipelineState::Done { .. } | PipelineState::Failed { .. } => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.next_stage().is_none()
    }

    pub fn entry_id(&self) -> Option<i64> {
        match self {
            PipelineState::Done { entry_id } => Some(*entry_id),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&PipelineError> {
        match self {
            PipelineState::Failed { error, .. } => Some(error),
            _ => None,
        }
    }

    /// Outputs of the stages that finished, whether the pipeline is still
    /// running or stopped in `Failed`. Read-only: a failed attempt cannot
    /// resume from them.
    pub fn completed(&self) -> Option<&Step> {
        match self {
            PipelineState::At(step) => Some(step),
            PipelineState::Failed { completed, .. } => completed.as_ref(),
            PipelineState::Idle | PipelineState::Done { .. } => None,
        }
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Why a cache attempt failed.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Markup(#[from] MarkupError),
    #[error(transparent)]
    Download(#[from] DownloadError),
    /// Everything upstream succeeded but the entry could not be written
    #[error("Could not save cache entry: {0}")]
    Storage(#[from] DatabaseError),
}

/// Mutually exclusive failure categories, for deciding what to tell the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The source URL was malformed; no request was sent
    InvalidUrl,
    /// Transport, HTTP status, timeout or size failure
    Network,
    /// The feed body was not UTF-8 text
    TextDecode,
    /// The feed body was text but not a feed
    MarkupParse,
    /// Writing the finished entry failed
    Storage,
}

fn fetch_error_kind(error: &FetchError) -> ErrorKind {
    match error {
        FetchError::InvalidUrl(_) => ErrorKind::InvalidUrl,
        FetchError::TextDecode(_) => ErrorKind::TextDecode,
        _ => ErrorKind::Network,
    }
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::Fetch(e) => fetch_error_kind(e),
            PipelineError::Markup(_) => ErrorKind::MarkupParse,
            PipelineError::Download(e) => fetch_error_kind(&e.source),
            PipelineError::Storage(_) => ErrorKind::Storage,
        }
    }

    /// The stage that produced this error.
    pub fn stage(&self) -> Stage {
        match self {
            PipelineError::Fetch(_) => Stage::FetchingFeed,
            PipelineError::Markup(_) => Stage::ScanningImages,
            PipelineError::Download(_) => Stage::DownloadingImages,
            PipelineError::Storage(_) => Stage::Persisting,
        }
    }
}

// ============================================================================
// Events
// ============================================================================

/// Progress notifications, tagged with the attempt that produced them so
/// observers can ignore events from an abandoned attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineEvent {
    StageStarted { attempt: u64, stage: Stage },
    StageFinished { attempt: u64, stage: Stage },
    StageFailed { attempt: u64, stage: Stage, error: String },
    ImagesProgress { attempt: u64, done: usize, total: usize },
    Finished { attempt: u64, entry_id: i64 },
}

// ============================================================================
// Pipeline
// ============================================================================

/// Fetchers and limits shared by every attempt.
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub feed_fetcher: Fetcher,
    pub image_fetcher: Fetcher,
    pub max_concurrent_downloads: usize,
}

impl PipelineOptions {
    /// Fast profile for the feed, patient profile for images, 16 concurrent downloads.
    pub fn new() -> Result<Self, FetchError> {
        Self::with_profiles(
            FetchProfile::fast(),
            FetchProfile::patient(),
            DEFAULT_CONCURRENT_DOWNLOADS,
        )
    }

    pub fn with_profiles(
        feed: FetchProfile,
        images: FetchProfile,
        max_concurrent_downloads: usize,
    ) -> Result<Self, FetchError> {
        let feed_fetcher = Fetcher::new(feed)?;
        let image_fetcher = feed_fetcher.with_profile(images);
        Ok(Self {
            feed_fetcher,
            image_fetcher,
            max_concurrent_downloads,
        })
    }
}

/// One attempt at caching a feed source.
pub struct CachePipeline<S> {
    attempt: u64,
    source_id: i64,
    source_url: String,
    options: PipelineOptions,
    store: S,
    events: Option<mpsc::Sender<PipelineEvent>>,
    state: PipelineState,
}

impl<S: CacheStore> CachePipeline<S> {
    pub fn new(
        store: S,
        source_id: i64,
        source_url: impl Into<String>,
        options: PipelineOptions,
    ) -> Self {
        Self {
            attempt: NEXT_ATTEMPT.fetch_add(1, Ordering::Relaxed),
            source_id,
            source_url: source_url.into(),
            options,
            store,
            events: None,
            state: PipelineState::Idle,
        }
    }

    /// Report progress on `tx`. A dropped receiver is ignored.
    pub fn with_events(mut self, tx: mpsc::Sender<PipelineEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    pub fn attempt(&self) -> u64 {
        self.attempt
    }

    pub fn source_id(&self) -> i64 {
        self.source_id
    }

    pub fn state(&self) -> &PipelineState {
        &self.state
    }

    /// Throw this attempt away and start over from `Idle` with a new attempt id.
    ///
    /// Nothing produced by this attempt is carried over: the feed is fetched
    /// again even if the failure happened later.
    pub fn restart(self) -> Self {
        let attempt = NEXT_ATTEMPT.fetch_add(1, Ordering::Relaxed);
        tracing::info!(
            previous = self.attempt,
            attempt,
            source_id = self.source_id,
            "Restarting cache pipeline"
        );
        Self {
            attempt,
            source_id: self.source_id,
            source_url: self.source_url,
            options: self.options,
            store: self.store,
            events: self.events,
            state: PipelineState::Idle,
        }
    }

    /// Run the next stage to completion and return the resulting state.
    ///
    /// Does nothing once the pipeline is `Done` or `Failed`. If the returned
    /// future is dropped before it completes, the state is left where it was
    /// and the same stage runs again on the next call.
    ///
    /// Persisting is the exception: the write may commit just before the
    /// future is dropped, and running the stage again then stores a second
    /// copy. Callers that cancel during `Persisting` should check
    /// [`Database::entries_for_source`](crate::storage::Database::entries_for_source)
    /// or [`restart`](Self::restart) instead of advancing.
    pub async fn advance(&mut self) -> &PipelineState {
        let Some(stage) = self.state.next_stage() else {
            return &self.state;
        };
        let attempt = self.attempt;

        tracing::debug!(attempt, source_id = self.source_id, stage = ?stage, "Running stage");
        emit(
            self.events.as_ref(),
            PipelineEvent::StageStarted { attempt, stage },
        )
        .await;

        let outcome: Result<PipelineState, PipelineError> = match &mut self.state {
            PipelineState::Idle => self
                .options
                .feed_fetcher
                .fetch_text(&self.source_url)
                .await
                .map(|markup| PipelineState::At(Step::ScanningImages { markup }))
                .map_err(PipelineError::from),
            PipelineState::At(Step::ScanningImages { markup }) => scan_for_image_urls(markup)
                .map(|image_urls| {
                    PipelineState::At(Step::DownloadingImages {
                        markup: std::mem::take(markup),
                        image_urls,
                    })
                })
                .map_err(PipelineError::from),
            PipelineState::At(Step::DownloadingImages { markup, image_urls }) => {
                download_stage(
                    &self.options,
                    image_urls,
                    self.events.as_ref(),
                    attempt,
                )
                .await
                .map(|images| {
                    PipelineState::At(Step::BuildingEntry {
                        markup: std::mem::take(markup),
                        images,
                    })
                })
                .map_err(PipelineError::from)
            }
            PipelineState::At(Step::BuildingEntry { markup, images }) => {
                let entry = builder::build(std::mem::take(markup), std::mem::take(images));
                Ok(PipelineState::At(Step::Persisting { entry }))
            }
            PipelineState::At(Step::Persisting { entry }) => self
                .store
                .append_entry(self.source_id, entry)
                .await
                .map(|entry_id| PipelineState::Done { entry_id })
                .map_err(PipelineError::Storage),
            PipelineState::Done { .. } | PipelineState::Failed { .. } => return &self.state,
        };

        match outcome {
            Ok(next) => {
                self.state = next;
                emit(
                    self.events.as_ref(),
                    PipelineEvent::StageFinished { attempt, stage },
                )
                .await;
                if let PipelineState::Done { entry_id } = self.state {
                    tracing::info!(attempt, source_id = self.source_id, entry_id, "Cache entry created");
                    emit(
                        self.events.as_ref(),
                        PipelineEvent::Finished { attempt, entry_id },
                    )
                    .await;
                }
            }
            Err(error) => {
                tracing::warn!(
                    attempt,
                    source_id = self.source_id,
                    stage = ?stage,
                    kind = ?error.kind(),
                    error = %error,
                    "Cache pipeline failed"
                );
                emit(
                    self.events.as_ref(),
                    PipelineEvent::StageFailed {
                        attempt,
                        stage,
                        error: error.to_string(),
                    },
                )
                .await;
                let completed = match std::mem::replace(&mut self.state, PipelineState::Idle) {
                    PipelineState::At(step) => Some(step),
                    _ => None,
                };
                self.state = PipelineState::Failed {
                    stage,
                    error,
                    completed,
                };
            }
        }

        &self.state
    }

    /// Advance until `Done` or `Failed`.
    pub async fn run_to_end(&mut self) -> &PipelineState {
        while !self.state.is_terminal() {
            self.advance().await;
        }
        &self.state
    }
}

async fn emit(events: Option<&mpsc::Sender<PipelineEvent>>, event: PipelineEvent) {
    if let Some(tx) = events {
        if let Err(e) = tx.send(event).await {
            tracing::debug!(error = %e, "Pipeline event dropped (receiver closed)");
        }
    }
}

/// Downloads the images, turning the downloader's `(done, total)` updates
/// into [`PipelineEvent::ImagesProgress`] when someone is listening.
async fn download_stage(
    options: &PipelineOptions,
    urls: &[Url],
    events: Option<&mpsc::Sender<PipelineEvent>>,
    attempt: u64,
) -> Result<ImageMap, DownloadError> {
    let fetcher = &options.image_fetcher;
    let concurrency = options.max_concurrent_downloads;

    let Some(events) = events else {
        return download_all(fetcher, urls, concurrency, None).await;
    };

    let (progress_tx, mut progress_rx) = mpsc::channel(32);
    let download = async move {
        let result = download_all(fetcher, urls, concurrency, Some(&progress_tx)).await;
        drop(progress_tx);
        result
    };
    let forward = async {
        while let Some((done, total)) = progress_rx.recv().await {
            emit(
                Some(events),
                PipelineEvent::ImagesProgress {
                    attempt,
                    done,
                    total,
                },
            )
            .await;
        }
    };

    let (result, ()) = tokio::join!(download, forward);
    result
}

//! Offline cache creation and removal.
//!
//! - [`downloader`] - all-or-nothing concurrent image downloads
//! - [`builder`] - turns markup and downloaded images into a storable entry
//! - [`pipeline`] - the staged, restartable orchestrator tying everything together
//! - [`cleanup`] - bulk removal of every stored entry

pub mod builder;
pub mod cleanup;
pub mod downloader;
pub mod pipeline;

pub use builder::build;
pub use cleanup::{clean_all, CleanupError, CleanupReport};
pub use downloader::{download_all, DownloadError, ImageMap, DEFAULT_CONCURRENT_DOWNLOADS};
pub use pipeline::{
    CachePipeline, ErrorKind, PipelineError, PipelineEvent, PipelineOptions, PipelineState, Stage,
    Step,
};

//! SilkFeed: an RSS reader core that snapshots a feed together with every
//! image its items reference, so the whole thing can be read offline later.
//!
//! - [`feed`] - fetching, feed parsing, image discovery, content blocks
//! - [`cache`] - the staged caching pipeline and bulk cleanup
//! - [`storage`] - SQLite persistence of sources, entries and images
//! - [`config`] - the optional TOML configuration file
//! - [`util`] - URL validation, text sanitizing, source naming

pub mod cache;
pub mod config;
pub mod feed;
pub mod storage;
pub mod util;

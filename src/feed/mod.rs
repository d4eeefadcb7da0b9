//! Feed retrieval and markup handling.
//!
//! - **Fetching**: single HTTP GETs under a named timeout profile
//! - **Parsing**: RSS/Atom/JSON Feed markup into items via `feed-rs`
//! - **Scanning**: the ordered set of image URLs a feed's items reference
//! - **Content**: an item's description split into text and image blocks
//!
//! # Architecture
//!
//! - [`fetcher`] - network access, the only part of this module that does I/O
//! - [`parser`] - feed-level parsing and description unescaping
//! - [`scanner`] - image discovery over every item description
//! - [`content`] - HTML fragment walking shared by the scanner and the reader
//!
//! # Example
//!
//! ```no_run
//! use silkfeed::feed::{scan_for_image_urls, FetchProfile, Fetcher};
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let fetcher = Fetcher::new(FetchProfile::fast())?;
//! let markup = fetcher.fetch_text("https://example.com/rss").await?;
//! for url in scan_for_image_urls(&markup)? {
//!     println!("{url}");
//! }
//! # Ok(())
//! # }
//! ```

pub mod content;
pub mod fetcher;
pub mod parser;
pub mod scanner;

pub use content::{content_blocks, parse_image_src, ContentBlock};
pub use fetcher::{FetchError, FetchProfile, Fetcher};
pub use parser::{parse_items, FeedItem, MarkupError};
pub use scanner::scan_for_image_urls;

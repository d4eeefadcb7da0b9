//! Utility functions for common operations.
//!
//! - **URL validation**: every feed and image link is checked before a request is made
//! - **Text processing**: control-character stripping and whitespace collapsing
//! - **Naming**: default display names for newly added feed sources
//!
//! # Examples
//!
//! ```
//! use silkfeed::util::{strip_control_chars, validate_url};
//!
//! let url = validate_url("https://example.com/feed.xml").unwrap();
//! assert_eq!(url.scheme(), "https");
//!
//! assert_eq!(strip_control_chars("name\x07"), "name");
//! ```

mod naming;
mod text;
mod url_validator;

pub use naming::suggest_source_name;
pub use text::{collapse_whitespace, strip_control_chars};
pub use url_validator::{validate_url, UrlValidationError};

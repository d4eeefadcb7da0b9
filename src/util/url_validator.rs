use thiserror::Error;
use url::Url;

/// Errors that can occur during URL validation.
#[derive(Error, Debug)]
pub enum UrlValidationError {
    /// The URL string could not be parsed.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    /// The URL does not spell out `http://` or `https://`.
    #[error("Unsupported scheme in {0:?} (expected a link starting with http:// or https://)")]
    UnsupportedScheme(String),
    /// The URL parsed but names no host.
    #[error("URL has no host: {0}")]
    MissingHost(String),
}

/// Validates a URL string before any request is made for it.
///
/// Feed sources and image links must both be absolute `http`/`https`
/// URLs with a host. The scheme has to be written out in full: inputs such
/// as `https:example.com` are accepted by the WHATWG parser but are almost
/// always typos, so they are rejected here.
///
/// # Errors
///
/// - [`UrlValidationError::UnsupportedScheme`] if the input does not start
///   with `http://` or `https://` (case-insensitive)
/// - [`UrlValidationError::InvalidUrl`] if the remainder does not parse
/// - [`UrlValidationError::MissingHost`] if there is no host
///
/// # Examples
///
/// ```
/// use silkfeed::util::validate_url;
///
/// let url = validate_url("https://rsshub.app/36kr/home").unwrap();
/// assert_eq!(url.host_str(), Some("rsshub.app"));
///
/// assert!(validate_url("ftp://example.com/feed").is_err());
/// assert!(validate_url("not a url").is_err());
/// ```
pub fn validate_url(url_str: &str) -> Result<Url, UrlValidationError> {
    let trimmed = url_str.trim();
    let lower = trimmed
        .get(..8)
        .map(str::to_ascii_lowercase)
        .unwrap_or_else(|| trimmed.to_ascii_lowercase());
    if !(lower.starts_with("http://") || lower.starts_with("https://")) {
        return Err(UrlValidationError::UnsupportedScheme(trimmed.to_owned()));
    }

    let url = Url::parse(trimmed)?;

    match url.host_str() {
        Some(host) if !host.is_empty() => Ok(url),
        _ => Err(UrlValidationError::MissingHost(trimmed.to_owned())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_urls() {
        assert!(validate_url("https://example.com/feed.xml").is_ok());
        assert!(validate_url("http://news.example.org").is_ok());
        assert!(validate_url("HTTPS://Example.com/rss").is_ok());
    }

    #[test]
    fn test_surrounding_whitespace_is_ignored() {
        let url = validate_url("  https://example.com/feed  ").unwrap();
        assert_eq!(url.as_str(), "https://example.com/feed");
    }

    #[test]
    fn test_invalid_schemes() {
        assert!(matches!(
            validate_url("file:///etc/passwd"),
            Err(UrlValidationError::UnsupportedScheme(_))
        ));
        assert!(matches!(
            validate_url("ftp://example.com"),
            Err(UrlValidationError::UnsupportedScheme(_))
        ));
    }

    #[test]
    fn test_scheme_without_slashes_rejected() {
        assert!(validate_url("https:example.com/feed").is_err());
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(validate_url("").is_err());
        assert!(validate_url("rss feed please").is_err());
        assert!(matches!(
            validate_url("http://exa mple.com/"),
            Err(UrlValidationError::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_localhost_is_allowed() {
        // Self-hosted feed bridges commonly run on the local machine.
        assert!(validate_url("http://127.0.0.1:1200/feed").is_ok());
        assert!(validate_url("http://localhost:1200/feed").is_ok());
    }

    #[test]
    fn test_url_with_port_accepted() {
        let url = validate_url("https://example.com:8443/feed.xml").unwrap();
        assert_eq!(url.port(), Some(8443));
    }
}

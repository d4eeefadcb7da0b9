use crate::util::{validate_url, UrlValidationError};
use futures::StreamExt;
use reqwest::header::{HeaderValue, CACHE_CONTROL, PRAGMA};
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use url::Url;

const MAX_FEED_SIZE: usize = 10 * 1024 * 1024; // 10MB
const MAX_IMAGE_SIZE: usize = 100 * 1024 * 1024; // 100MB

/// Backoff between connectivity retries for the patient profile: 1s, 2s, 4s ... capped.
const CONNECT_RETRY_BASE: Duration = Duration::from_secs(1);
const CONNECT_RETRY_CAP: Duration = Duration::from_secs(30);

/// Errors that can occur while fetching a single URL.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The URL was rejected before any request was sent
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] UrlValidationError),
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// HTTP response with non-2xx status code
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// Request exceeded the profile's timeout
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),
    /// Response body exceeded the profile's size limit
    #[error("Response too large (exceeds {0} bytes)")]
    ResponseTooLarge(usize),
    /// Response was incomplete (received fewer bytes than Content-Length)
    #[error("Incomplete response: expected {expected} bytes, received {received}")]
    IncompleteResponse { expected: u64, received: usize },
    /// The body was fetched but is not UTF-8 text
    #[error("The content at this link is not readable text: {0}")]
    TextDecode(#[from] std::string::FromUtf8Error),
}

impl FetchError {
    /// True for failures of the transport itself, as opposed to a bad URL
    /// or a body that arrived intact but could not be decoded.
    pub fn is_network(&self) -> bool {
        !matches!(self, FetchError::InvalidUrl(_) | FetchError::TextDecode(_))
    }

    /// Connection-level failures are the ones worth waiting out when the
    /// device is offline; anything the server answered is final.
    fn is_connectivity(&self) -> bool {
        match self {
            FetchError::Network(e) => e.is_connect(),
            _ => false,
        }
    }
}

/// How a request behaves when the network is slow or missing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchProfile {
    /// Budget for the whole request, connectivity waits included
    pub timeout: Duration,
    /// Retry connection failures until `timeout` runs out instead of failing at once
    pub wait_for_connectivity: bool,
    /// Maximum accepted body size
    pub max_bytes: usize,
}

impl FetchProfile {
    /// Short budget, no waiting. Used for the feed document so a bad link
    /// surfaces quickly.
    pub const fn fast() -> Self {
        Self {
            timeout: Duration::from_millis(15_600),
            wait_for_connectivity: false,
            max_bytes: MAX_FEED_SIZE,
        }
    }

    /// One hour budget that waits for connectivity. Used for images, which
    /// may be large and slow.
    pub const fn patient() -> Self {
        Self {
            timeout: Duration::from_secs(60 * 60),
            wait_for_connectivity: true,
            max_bytes: MAX_IMAGE_SIZE,
        }
    }
}

/// HTTP GET with a fixed [`FetchProfile`].
///
/// Cloning is cheap: the underlying `reqwest::Client` is reference counted,
/// so one fetcher can be shared by many concurrent downloads.
#[derive(Debug, Clone)]
pub struct Fetcher {
    client: reqwest::Client,
    profile: FetchProfile,
}

impl Fetcher {
    /// Build a fetcher with its own client configured for `profile`.
    pub fn new(profile: FetchProfile) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("silkfeed/", env!("CARGO_PKG_VERSION")))
            .pool_idle_timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self::with_client(client, profile))
    }

    /// Wrap an existing client (allows custom configuration and test servers).
    pub fn with_client(client: reqwest::Client, profile: FetchProfile) -> Self {
        Self { client, profile }
    }

    /// Same client and connection pool, different profile.
    pub fn with_profile(&self, profile: FetchProfile) -> Self {
        Self::with_client(self.client.clone(), profile)
    }

    pub fn profile(&self) -> FetchProfile {
        self.profile
    }

    /// Fetch `url` and decode the body as UTF-8.
    ///
    /// # Errors
    ///
    /// - [`FetchError::InvalidUrl`] before any network activity
    /// - transport errors ([`FetchError::Network`], [`FetchError::Timeout`],
    ///   [`FetchError::HttpStatus`], ...) as in [`Fetcher::fetch_bytes`]
    /// - [`FetchError::TextDecode`] if the body is not valid UTF-8
    pub async fn fetch_text(&self, url: &str) -> Result<String, FetchError> {
        let bytes = self.fetch_bytes(url).await?;
        Ok(String::from_utf8(bytes)?)
    }

    /// Validate `url` and fetch its body as raw bytes.
    pub async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let url = validate_url(url)?;
        self.fetch_url(&url).await
    }

    /// Fetch an already validated URL.
    ///
    /// The whole operation, connectivity waits included, is bounded by the
    /// profile's timeout.
    pub async fn fetch_url(&self, url: &Url) -> Result<Vec<u8>, FetchError> {
        let budget = self.profile.timeout;
        tokio::time::timeout(budget, self.fetch_with_wait(url))
            .await
            .map_err(|_| FetchError::Timeout(budget))?
    }

    async fn fetch_with_wait(&self, url: &Url) -> Result<Vec<u8>, FetchError> {
        let started = Instant::now();
        let mut attempt: u32 = 0;

        loop {
            match self.fetch_once(url).await {
                Err(e) if self.profile.wait_for_connectivity && e.is_connectivity() => {
                    let delay = connectivity_backoff(attempt);
                    tracing::debug!(
                        url = %url,
                        error = %e,
                        attempt = attempt + 1,
                        delay_secs = delay.as_secs(),
                        elapsed_secs = started.elapsed().as_secs(),
                        "Waiting for connectivity before retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt = attempt.saturating_add(1);
                }
                result => return result,
            }
        }
    }

    async fn fetch_once(&self, url: &Url) -> Result<Vec<u8>, FetchError> {
        // Snapshots must reflect the server right now, never an intermediary's copy
        let response = self
            .client
            .get(url.clone())
            .header(CACHE_CONTROL, HeaderValue::from_static("no-cache"))
            .header(PRAGMA, HeaderValue::from_static("no-cache"))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(FetchError::HttpStatus(response.status().as_u16()));
        }

        read_limited_bytes(response, self.profile.max_bytes).await
    }
}

fn connectivity_backoff(attempt: u32) -> Duration {
    CONNECT_RETRY_BASE
        .saturating_mul(2u32.saturating_pow(attempt.min(16)))
        .min(CONNECT_RETRY_CAP)
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, FetchError> {
    // Capture Content-Length for completeness check
    let expected_length = response.content_length();

    // Fast path: check Content-Length header
    if let Some(len) = expected_length {
        if len > limit as u64 {
            return Err(FetchError::ResponseTooLarge(limit));
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(FetchError::ResponseTooLarge(limit));
        }
        bytes.extend_from_slice(&chunk);
    }

    if let Some(expected) = expected_length {
        if (bytes.len() as u64) < expected {
            return Err(FetchError::IncompleteResponse {
                expected,
                received: bytes.len(),
            });
        }
    }

    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fetcher(profile: FetchProfile) -> Fetcher {
        Fetcher::with_client(reqwest::Client::new(), profile)
    }

    #[test]
    fn test_profiles() {
        let fast = FetchProfile::fast();
        assert_eq!(fast.timeout, Duration::from_millis(15_600));
        assert!(!fast.wait_for_connectivity);

        let patient = FetchProfile::patient();
        assert_eq!(patient.timeout, Duration::from_secs(3600));
        assert!(patient.wait_for_connectivity);
    }

    #[test]
    fn test_connectivity_backoff_is_capped() {
        assert_eq!(connectivity_backoff(0), Duration::from_secs(1));
        assert_eq!(connectivity_backoff(1), Duration::from_secs(2));
        assert_eq!(connectivity_backoff(3), Duration::from_secs(8));
        assert_eq!(connectivity_backoff(10), CONNECT_RETRY_CAP);
        assert_eq!(connectivity_backoff(u32::MAX), CONNECT_RETRY_CAP);
    }

    #[tokio::test]
    async fn test_fetch_text_success_bypasses_cache() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/feed"))
            .and(header("cache-control", "no-cache"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<rss/>"))
            .expect(1)
            .mount(&mock_server)
            .await;

        let text = fetcher(FetchProfile::fast())
            .fetch_text(&format!("{}/feed", mock_server.uri()))
            .await
            .unwrap();
        assert_eq!(text, "<rss/>");
    }

    #[tokio::test]
    async fn test_invalid_url_fails_before_request() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&mock_server)
            .await;

        let err = fetcher(FetchProfile::fast())
            .fetch_text("not a url")
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::InvalidUrl(_)));
        assert!(!err.is_network());
    }

    #[tokio::test]
    async fn test_non_utf8_body_is_decode_error() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0xff, 0xfe, 0x00, 0x80]))
            .mount(&mock_server)
            .await;

        let err = fetcher(FetchProfile::fast())
            .fetch_text(&mock_server.uri())
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::TextDecode(_)));
        assert!(!err.is_network());
    }

    #[tokio::test]
    async fn test_binary_body_is_fine_as_bytes() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0xff, 0xd8, 0xff]))
            .mount(&mock_server)
            .await;

        let bytes = fetcher(FetchProfile::patient())
            .fetch_bytes(&mock_server.uri())
            .await
            .unwrap();
        assert_eq!(bytes, vec![0xff, 0xd8, 0xff]);
    }

    #[tokio::test]
    async fn test_404_is_http_status() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&mock_server)
            .await;

        let err = fetcher(FetchProfile::fast())
            .fetch_bytes(&mock_server.uri())
            .await
            .unwrap_err();
        match err {
            FetchError::HttpStatus(404) => {}
            e => panic!("Expected HttpStatus(404), got {:?}", e),
        }
    }

    #[tokio::test]
    async fn test_server_error_is_not_retried_by_patient_profile() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .expect(1)
            .mount(&mock_server)
            .await;

        let err = fetcher(FetchProfile::patient())
            .fetch_bytes(&mock_server.uri())
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::HttpStatus(503)));
        assert!(err.is_network());
    }

    #[tokio::test]
    async fn test_slow_response_times_out() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("late")
                    .set_delay(Duration::from_secs(5)),
            )
            .mount(&mock_server)
            .await;

        let profile = FetchProfile {
            timeout: Duration::from_millis(200),
            ..FetchProfile::fast()
        };
        let err = fetcher(profile)
            .fetch_bytes(&mock_server.uri())
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_body_over_limit_rejected() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![b'x'; 2048]))
            .mount(&mock_server)
            .await;

        let profile = FetchProfile {
            max_bytes: 1024,
            ..FetchProfile::fast()
        };
        let err = fetcher(profile)
            .fetch_bytes(&mock_server.uri())
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::ResponseTooLarge(1024)));
    }

    #[tokio::test]
    async fn test_fast_profile_does_not_wait_for_connectivity() {
        let addr = refused_addr();

        let started = std::time::Instant::now();
        let err = fetcher(FetchProfile::fast())
            .fetch_bytes(&format!("http://{addr}/feed"))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Network(_)));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    /// Bind then drop a listener so the port refuses connections.
    fn refused_addr() -> std::net::SocketAddr {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        addr
    }

    #[tokio::test]
    async fn test_patient_profile_retries_until_budget_runs_out() {
        let addr = refused_addr();
        let budget = Duration::from_millis(3500);
        let profile = FetchProfile {
            timeout: budget,
            ..FetchProfile::patient()
        };

        let started = std::time::Instant::now();
        let err = fetcher(profile)
            .fetch_bytes(&format!("http://{addr}/a.png"))
            .await
            .unwrap_err();

        // Giving up at once would surface the connect error instead
        assert!(matches!(err, FetchError::Timeout(d) if d == budget), "{err:?}");
        assert!(started.elapsed() >= Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_patient_profile_succeeds_once_server_comes_up() {
        let addr = refused_addr();
        let profile = FetchProfile {
            timeout: Duration::from_secs(10),
            ..FetchProfile::patient()
        };

        let fetch = async {
            fetcher(profile)
                .fetch_bytes(&format!("http://{addr}/a.png"))
                .await
        };
        // Comes up between the first attempt and the first retry
        let server_up = async {
            tokio::time::sleep(Duration::from_millis(300)).await;
            let listener = std::net::TcpListener::bind(addr).unwrap();
            let server = MockServer::builder().listener(listener).start().await;
            Mock::given(method("GET"))
                .and(path("/a.png"))
                .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![1, 2, 3]))
                .expect(1)
                .mount(&server)
                .await;
            server
        };

        let (result, server) = tokio::join!(fetch, server_up);
        assert_eq!(result.unwrap(), vec![1, 2, 3]);
        server.verify().await;
    }
}

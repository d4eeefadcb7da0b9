use futures::stream::{self, StreamExt, TryStreamExt};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use thiserror::Error;
use tokio::sync::mpsc;
use url::Url;

use crate::feed::{FetchError, Fetcher};

/// Downloaded image bytes keyed by source URL.
pub type ImageMap = HashMap<Url, Vec<u8>>;

/// Default number of images fetched at the same time.
pub const DEFAULT_CONCURRENT_DOWNLOADS: usize = 16;

/// One image of the batch could not be fetched, so the whole batch failed.
#[derive(Debug, Error)]
#[error("Failed to download image {url}: {source}")]
pub struct DownloadError {
    pub url: Url,
    #[source]
    pub source: FetchError,
}

/// Fetches every URL concurrently and returns all of them or none.
///
/// Duplicate URLs are fetched once. At most `concurrency` requests are in
/// flight at a time. The first failure ends the batch: requests still in
/// flight are dropped and the images already received are discarded, so a
/// partial map is never returned.
///
/// # Arguments
///
/// * `fetcher` - Fetcher carrying the profile to use (normally the patient one)
/// * `urls` - Image URLs, possibly with duplicates
/// * `concurrency` - Maximum simultaneous requests (0 is treated as 1)
/// * `progress_tx` - Optional channel for `(completed, total)` updates
pub async fn download_all(
    fetcher: &Fetcher,
    urls: &[Url],
    concurrency: usize,
    progress_tx: Option<&mpsc::Sender<(usize, usize)>>,
) -> Result<ImageMap, DownloadError> {
    let mut seen = HashSet::new();
    let unique: Vec<&Url> = urls.iter().filter(|url| seen.insert(*url)).collect();

    let total = unique.len();
    if total == 0 {
        if let Some(tx) = progress_tx {
            if let Err(e) = tx.send((0, 0)).await {
                tracing::debug!(error = %e, "Progress channel send failed (receiver dropped)");
            }
        }
        return Ok(ImageMap::new());
    }

    tracing::info!(total, concurrency, "Downloading images");
    let completed = AtomicUsize::new(0);
    let completed = &completed;

    let images: ImageMap = stream::iter(unique)
        .map(|url| async move {
            let data = fetcher.fetch_url(url).await.map_err(|source| {
                tracing::warn!(url = %url, error = %source, "Image download failed");
                DownloadError {
                    url: url.clone(),
                    source,
                }
            })?;

            let done = completed.fetch_add(1, Ordering::Relaxed).saturating_add(1);
            tracing::debug!(url = %url, bytes = data.len(), done, total, "Image downloaded");
            if let Some(tx) = progress_tx {
                if let Err(e) = tx.send((done, total)).await {
                    tracing::debug!(error = %e, "Progress channel send failed (receiver dropped)");
                }
            }

            Ok::<_, DownloadError>((url.clone(), data))
        })
        .buffer_unordered(concurrency.max(1))
        .try_collect()
        .await?;

    Ok(images)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::FetchProfile;
    use pretty_assertions::assert_eq;
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fetcher() -> Fetcher {
        Fetcher::with_client(reqwest::Client::new(), FetchProfile::patient())
    }

    fn url(server: &MockServer, p: &str) -> Url {
        Url::parse(&format!("{}{}", server.uri(), p)).unwrap()
    }

    async fn serve(server: &MockServer, p: &str, body: &[u8]) {
        Mock::given(method("GET"))
            .and(path(p))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(body.to_vec()))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_empty_set_returns_empty_map() {
        let images = download_all(&fetcher(), &[], 4, None).await.unwrap();
        assert!(images.is_empty());
    }

    #[tokio::test]
    async fn test_empty_set_reports_zero_progress() {
        let (tx, mut rx) = mpsc::channel(4);
        download_all(&fetcher(), &[], 4, Some(&tx)).await.unwrap();
        assert_eq!(rx.recv().await, Some((0, 0)));

        // A closed receiver is not an error
        drop(rx);
        assert!(download_all(&fetcher(), &[], 4, Some(&tx)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_downloads_every_url() {
        let server = MockServer::start().await;
        serve(&server, "/a.png", b"AAA").await;
        serve(&server, "/b.png", b"BB").await;
        serve(&server, "/c.png", b"C").await;

        let urls = vec![url(&server, "/a.png"), url(&server, "/b.png"), url(&server, "/c.png")];
        let images = download_all(&fetcher(), &urls, 2, None).await.unwrap();

        assert_eq!(images.len(), 3);
        assert_eq!(images[&urls[0]], b"AAA".to_vec());
        assert_eq!(images[&urls[1]], b"BB".to_vec());
        assert_eq!(images[&urls[2]], b"C".to_vec());
    }

    #[tokio::test]
    async fn test_duplicates_fetched_once() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/a.png"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"A".to_vec()))
            .expect(1)
            .mount(&server)
            .await;

        let a = url(&server, "/a.png");
        let images = download_all(&fetcher(), &[a.clone(), a.clone(), a], 4, None)
            .await
            .unwrap();
        assert_eq!(images.len(), 1);
    }

    #[tokio::test]
    async fn test_one_failure_fails_the_batch() {
        let server = MockServer::start().await;
        serve(&server, "/a.png", b"A").await;
        Mock::given(method("GET"))
            .and(path("/broken.png"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        // Slow enough to still be in flight when the failure arrives
        Mock::given(method("GET"))
            .and(path("/slow.png"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(b"S".to_vec())
                    .set_delay(Duration::from_secs(30)),
            )
            .mount(&server)
            .await;

        let urls = vec![
            url(&server, "/a.png"),
            url(&server, "/broken.png"),
            url(&server, "/slow.png"),
        ];
        let started = std::time::Instant::now();
        let err = download_all(&fetcher(), &urls, 4, None).await.unwrap_err();

        assert_eq!(err.url, urls[1]);
        assert!(matches!(err.source, FetchError::HttpStatus(500)));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_progress_reports_each_completion() {
        let server = MockServer::start().await;
        serve(&server, "/a.png", b"A").await;
        serve(&server, "/b.png", b"B").await;

        let (tx, mut rx) = mpsc::channel(16);
        let urls = vec![url(&server, "/a.png"), url(&server, "/b.png")];
        download_all(&fetcher(), &urls, 1, Some(&tx)).await.unwrap();
        drop(tx);

        let mut updates = Vec::new();
        while let Some(update) = rx.recv().await {
            updates.push(update);
        }
        assert_eq!(updates, vec![(1, 2), (2, 2)]);
    }
}

use crate::storage::{NewCacheEntry, NewCachedImage};

use super::downloader::ImageMap;

/// Assembles a self-contained entry from the feed markup and its images.
///
/// Every image in the map becomes exactly one [`NewCachedImage`]. Images are
/// sorted by URL so the same inputs always produce the same entry; readers
/// look images up by URL, never by position.
pub fn build(markup: String, images: ImageMap) -> NewCacheEntry {
    let cached_at = chrono::Utc::now().timestamp();

    let mut images: Vec<NewCachedImage> = images
        .into_iter()
        .map(|(url, data)| NewCachedImage {
            url: url.into(),
            data,
        })
        .collect();
    images.sort_by(|a, b| a.url.cmp(&b.url));

    NewCacheEntry {
        cached_at,
        markup,
        images,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use url::Url;

    fn map(pairs: &[(&str, &[u8])]) -> ImageMap {
        pairs
            .iter()
            .map(|(url, data)| (Url::parse(url).unwrap(), data.to_vec()))
            .collect()
    }

    #[test]
    fn test_every_image_becomes_one_record() {
        let entry = build(
            "<rss/>".to_string(),
            map(&[("http://x/b.png", b"B"), ("http://x/a.png", b"A")]),
        );
        assert_eq!(entry.markup, "<rss/>");
        let urls: Vec<&str> = entry.images.iter().map(|i| i.url.as_str()).collect();
        assert_eq!(urls, vec!["http://x/a.png", "http://x/b.png"]);
        assert_eq!(entry.image_data("http://x/b.png"), Some(&b"B"[..]));
        assert_eq!(entry.total_image_bytes(), 2);
    }

    #[test]
    fn test_no_images() {
        let entry = build("<rss/>".to_string(), ImageMap::new());
        assert!(entry.images.is_empty());
        assert!(entry.cached_at > 0);
    }
}

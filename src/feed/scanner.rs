use std::collections::HashSet;
use url::Url;

use super::content::{image_sources, parse_image_src};
use super::parser::{item_bodies, MarkupError};

/// Collects every image URL referenced by the feed's item descriptions.
///
/// URLs come out in document order: items in feed order, `<img>` tags in
/// order within each description. A URL that appears more than once is kept
/// at its first occurrence only. Tags whose `src` is missing, empty, relative
/// or otherwise not an absolute http(s) URL are skipped without failing the
/// scan.
///
/// # Errors
///
/// Returns [`MarkupError`] if the markup is not a feed at all.
pub fn scan_for_image_urls(markup: &str) -> Result<Vec<Url>, MarkupError> {
    let mut seen = HashSet::new();
    let mut urls = Vec::new();

    for body in item_bodies(markup)? {
        for src in image_sources(&body) {
            let Some(url) = parse_image_src(&src) else {
                tracing::debug!(src = %src, "Skipping image with unusable src");
                continue;
            };
            if seen.insert(url.clone()) {
                urls.push(url);
            }
        }
    }

    tracing::debug!(count = urls.len(), "Scanned feed for images");
    Ok(urls)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn rss(descriptions: &[&str]) -> String {
        let items: String = descriptions
            .iter()
            .enumerate()
            .map(|(i, d)| {
                format!(
                    "<item><title>Item {i}</title><description><![CDATA[{d}]]></description></item>"
                )
            })
            .collect();
        format!(r#"<rss version="2.0"><channel><title>t</title>{items}</channel></rss>"#)
    }

    fn strings(urls: Vec<Url>) -> Vec<String> {
        urls.into_iter().map(String::from).collect()
    }

    #[test]
    fn test_two_items_in_document_order() {
        let markup = rss(&[
            r#"<p><img src="http://x/a.png"><img src="http://x/b.png"></p>"#,
            r#"<img src="http://x/c.png">"#,
        ]);
        assert_eq!(
            strings(scan_for_image_urls(&markup).unwrap()),
            vec!["http://x/a.png", "http://x/b.png", "http://x/c.png"]
        );
    }

    #[test]
    fn test_no_images() {
        let markup = rss(&["<p>only text</p>", ""]);
        assert!(scan_for_image_urls(&markup).unwrap().is_empty());
    }

    #[test]
    fn test_empty_feed_has_no_images() {
        assert!(scan_for_image_urls(&rss(&[])).unwrap().is_empty());
    }

    #[test]
    fn test_malformed_tags_skipped() {
        let markup = rss(&[
            r#"<img><img src=""><img src="/relative.png"><img src="http://x/ok.png">"#,
        ]);
        assert_eq!(
            strings(scan_for_image_urls(&markup).unwrap()),
            vec!["http://x/ok.png"]
        );
    }

    #[test]
    fn test_protocol_relative_becomes_https() {
        let markup = rss(&[r#"<img src="//cdn.example.com/pic.jpg">"#]);
        assert_eq!(
            strings(scan_for_image_urls(&markup).unwrap()),
            vec!["https://cdn.example.com/pic.jpg"]
        );
    }

    #[test]
    fn test_duplicates_collapse_to_first_occurrence() {
        let markup = rss(&[
            r#"<img src="http://x/b.png"><img src="http://x/a.png">"#,
            r#"<img src="http://x/b.png"><img src="http://x/c.png">"#,
        ]);
        assert_eq!(
            strings(scan_for_image_urls(&markup).unwrap()),
            vec!["http://x/b.png", "http://x/a.png", "http://x/c.png"]
        );
    }

    #[test]
    fn test_escaped_description() {
        let markup = r#"<rss version="2.0"><channel><title>t</title><item><title>x</title>
            <description>&lt;p&gt;hi&lt;/p&gt;&lt;img src="https://i.example/p.jpg" w="657"&gt;</description>
        </item></channel></rss>"#;
        assert_eq!(
            strings(scan_for_image_urls(markup).unwrap()),
            vec!["https://i.example/p.jpg"]
        );
    }

    #[test]
    fn test_unparseable_markup_is_error() {
        assert!(scan_for_image_urls("this is not a feed").is_err());
    }

    proptest! {
        #[test]
        fn prop_scan_preserves_first_occurrence_order(
            picks in prop::collection::vec(prop::collection::vec(0usize..8, 0..6), 0..5)
        ) {
            let descriptions: Vec<String> = picks
                .iter()
                .map(|item| {
                    item.iter()
                        .map(|n| format!(r#"<img src="http://img.example/{n}.png">"#))
                        .collect()
                })
                .collect();
            let refs: Vec<&str> = descriptions.iter().map(String::as_str).collect();
            let markup = rss(&refs);

            let mut expected: Vec<String> = Vec::new();
            for n in picks.iter().flatten() {
                let url = format!("http://img.example/{n}.png");
                if !expected.contains(&url) {
                    expected.push(url);
                }
            }

            let found = strings(scan_for_image_urls(&markup).unwrap());
            prop_assert_eq!(found, expected);
        }
    }
}

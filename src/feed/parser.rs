use feed_rs::model::Entry;
use feed_rs::parser;
use thiserror::Error;

use super::content::unescape_html;

/// The feed markup could not be turned into items.
#[derive(Debug, Error)]
pub enum MarkupError {
    #[error("Could not parse feed: {0}")]
    Feed(#[from] parser::ParseFeedError),
}

/// One article of a feed as stored in a snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedItem {
    pub title: String,
    /// Description HTML, already unescaped
    pub body: String,
}

/// Parses feed markup (RSS, Atom or JSON Feed) into its items, in document order.
///
/// The body of an item is its description, falling back to its full content
/// when there is no description. Items without either get an empty body.
pub fn parse_items(markup: &str) -> Result<Vec<FeedItem>, MarkupError> {
    let feed = parser::parse(markup.as_bytes())?;

    let items = feed
        .entries
        .into_iter()
        .map(|entry| {
            let title = entry
                .title
                .as_ref()
                .map(|t| t.content.trim().to_string())
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| "Untitled".to_string());
            let body = entry_body(entry).unwrap_or_default();
            FeedItem { title, body }
        })
        .collect();

    Ok(items)
}

/// Item bodies only, for callers that do not need titles.
pub(crate) fn item_bodies(markup: &str) -> Result<Vec<String>, MarkupError> {
    let feed = parser::parse(markup.as_bytes())?;
    Ok(feed.entries.into_iter().filter_map(entry_body).collect())
}

fn entry_body(entry: Entry) -> Option<String> {
    entry
        .summary
        .map(|s| s.content)
        .or_else(|| entry.content.and_then(|c| c.body))
        .map(unescape_nested)
}

/// Some publishers escape the description twice, so after the XML layer is
/// decoded it still reads `&lt;p&gt;...`. Such text is unescaped once more.
fn unescape_nested(body: String) -> String {
    if !body.contains('<') && body.contains("&lt;") {
        unescape_html(&body).into_owned()
    } else {
        body
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const RSS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0"><channel><title>IT</title>
  <item>
    <title>First</title>
    <description>&lt;p&gt;Hello&lt;/p&gt;&lt;img src="http://x/a.png"&gt;</description>
  </item>
  <item>
    <title>Second</title>
    <description><![CDATA[<p>CDATA body</p>]]></description>
  </item>
  <item>
    <description>no title here</description>
  </item>
</channel></rss>"#;

    #[test]
    fn test_parse_items_in_order() {
        let items = parse_items(RSS).unwrap();
        assert_eq!(items.len(), 3);
        assert_eq!(items[0].title, "First");
        assert_eq!(items[0].body, r#"<p>Hello</p><img src="http://x/a.png">"#);
        assert_eq!(items[1].title, "Second");
        assert_eq!(items[1].body, "<p>CDATA body</p>");
        assert_eq!(items[2].title, "Untitled");
    }

    #[test]
    fn test_double_escaped_description() {
        let rss = r#"<rss version="2.0"><channel><title>t</title><item><title>x</title>
            <description>&amp;lt;p&amp;gt;Twice&amp;lt;/p&amp;gt;</description>
        </item></channel></rss>"#;
        let items = parse_items(rss).unwrap();
        assert_eq!(items[0].body, "<p>Twice</p>");
    }

    #[test]
    fn test_atom_content_fallback() {
        let atom = r#"<?xml version="1.0" encoding="utf-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>Atom</title><id>urn:a</id><updated>2024-11-03T00:00:00Z</updated>
  <entry>
    <title>Entry</title><id>urn:a:1</id><updated>2024-11-03T00:00:00Z</updated>
    <content type="html">&lt;p&gt;Atom body&lt;/p&gt;</content>
  </entry>
</feed>"#;
        let items = parse_items(atom).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].title, "Entry");
        assert!(items[0].body.contains("Atom body"));
    }

    #[test]
    fn test_empty_channel() {
        let rss = r#"<rss version="2.0"><channel><title>t</title></channel></rss>"#;
        assert!(parse_items(rss).unwrap().is_empty());
    }

    #[test]
    fn test_not_a_feed_is_error() {
        assert!(parse_items("<not valid xml").is_err());
        assert!(parse_items("hello world").is_err());
        assert!(parse_items("").is_err());
    }
}

//! HTML fragment handling for item descriptions.
//!
//! Feed descriptions are loose HTML, not XML: unclosed `<img>` and `<br>`
//! tags, unquoted attributes and HTML5 named entities are all common. The
//! fragment is walked with `quick-xml` in a lenient configuration (end-name
//! checks off, unmatched ends allowed, HTML attribute syntax). A syntax error
//! ends the walk and keeps whatever was collected before it.

use quick_xml::escape::{resolve_html5_entity, unescape_with};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::borrow::Cow;
use url::Url;

use crate::util::{collapse_whitespace, validate_url};

/// One renderable piece of an item body, in document order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentBlock {
    Text(String),
    Image { url: String, data: Vec<u8> },
}

/// Elements whose boundaries end the current text block.
const BLOCK_TAGS: &[&[u8]] = &[
    b"p",
    b"div",
    b"li",
    b"ul",
    b"ol",
    b"h1",
    b"h2",
    b"h3",
    b"h4",
    b"h5",
    b"h6",
    b"blockquote",
    b"section",
    b"article",
    b"figure",
    b"figcaption",
    b"pre",
    b"table",
    b"tr",
];

/// Elements whose text is never shown.
const SKIPPED_TAGS: &[&[u8]] = &[b"script", b"style"];

enum Token {
    Text(String),
    BlockBoundary,
    LineBreak,
    Image(Option<String>),
}

/// Splits an item body into text and image blocks.
///
/// Text is flushed into a [`ContentBlock::Text`] at every block-level
/// boundary and before every image; `<br>` becomes a newline. Whitespace is
/// collapsed and empty text blocks are dropped. An `<img>` becomes a
/// [`ContentBlock::Image`] only if `resolve` knows its URL; images that were
/// never cached are left out.
///
/// # Examples
///
/// ```
/// use silkfeed::feed::{content_blocks, ContentBlock};
///
/// let png = vec![0x89, b'P', b'N', b'G'];
/// let blocks = content_blocks(
///     r#"<p>A</p><img src="http://x/a.png"><p>B</p>"#,
///     |url| (url.as_str() == "http://x/a.png").then_some(png.as_slice()),
/// );
/// assert_eq!(
///     blocks,
///     vec![
///         ContentBlock::Text("A".into()),
///         ContentBlock::Image { url: "http://x/a.png".into(), data: png.clone() },
///         ContentBlock::Text("B".into()),
///     ]
/// );
/// ```
pub fn content_blocks<'a, F>(body: &str, mut resolve: F) -> Vec<ContentBlock>
where
    F: FnMut(&Url) -> Option<&'a [u8]>,
{
    let mut blocks = Vec::new();
    let mut pending = String::new();

    fn flush(pending: &mut String, blocks: &mut Vec<ContentBlock>) {
        let text = collapse_whitespace(pending);
        if !text.is_empty() {
            blocks.push(ContentBlock::Text(text));
        }
        pending.clear();
    }

    walk_fragment(body, |token| match token {
        Token::Text(text) => pending.push_str(&text),
        Token::LineBreak => pending.push('\n'),
        Token::BlockBoundary => flush(&mut pending, &mut blocks),
        Token::Image(src) => {
            flush(&mut pending, &mut blocks);
            let Some(url) = src.as_deref().and_then(parse_image_src) else {
                return;
            };
            match resolve(&url) {
                Some(data) => blocks.push(ContentBlock::Image {
                    url: url.into(),
                    data: data.to_vec(),
                }),
                None => tracing::debug!(url = %url, "Image not in cache, skipping"),
            }
        }
    });
    flush(&mut pending, &mut blocks);

    blocks
}

/// Raw `src` values of every `<img>` in the fragment, in document order.
///
/// Tags without a `src` attribute are left out.
pub(crate) fn image_sources(body: &str) -> Vec<String> {
    let mut sources = Vec::new();
    walk_fragment(body, |token| {
        if let Token::Image(Some(src)) = token {
            sources.push(src);
        }
    });
    sources
}

/// Normalizes an `img src` value into an absolute URL.
///
/// Protocol-relative links (`//cdn.example.com/a.png`) are assumed to be
/// HTTPS. Relative paths, `data:` URIs and anything else that is not an
/// absolute http(s) URL yield `None`.
pub fn parse_image_src(src: &str) -> Option<Url> {
    let src = src.trim();
    if src.is_empty() {
        return None;
    }
    let absolute: Cow<'_, str> = if src.starts_with("//") {
        Cow::Owned(format!("https:{src}"))
    } else {
        Cow::Borrowed(src)
    };
    validate_url(&absolute).ok()
}

/// Unescapes XML and HTML5 named entities, returning the input unchanged
/// when it contains an entity neither table knows.
pub(crate) fn unescape_html(s: &str) -> Cow<'_, str> {
    unescape_with(s, resolve_html5_entity).unwrap_or(Cow::Borrowed(s))
}

fn walk_fragment(html: &str, mut visit: impl FnMut(Token)) {
    let mut reader = Reader::from_str(html);
    {
        let config = reader.config_mut();
        config.check_end_names = false;
        config.allow_unmatched_ends = true;
        config.check_comments = false;
    }

    let mut skip_depth: usize = 0;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = e.name().as_ref().to_ascii_lowercase();
                if SKIPPED_TAGS.contains(&name.as_slice()) {
                    skip_depth += 1;
                } else if skip_depth == 0 {
                    visit_tag(&name, &e, &mut visit);
                }
            }
            Ok(Event::Empty(e)) => {
                let name = e.name().as_ref().to_ascii_lowercase();
                if skip_depth == 0 && !SKIPPED_TAGS.contains(&name.as_slice()) {
                    visit_tag(&name, &e, &mut visit);
                }
            }
            Ok(Event::End(e)) => {
                let name = e.name().as_ref().to_ascii_lowercase();
                if SKIPPED_TAGS.contains(&name.as_slice()) {
                    skip_depth = skip_depth.saturating_sub(1);
                } else if skip_depth == 0 && BLOCK_TAGS.contains(&name.as_slice()) {
                    visit(Token::BlockBoundary);
                }
            }
            Ok(Event::Text(e)) if skip_depth == 0 => {
                let raw = String::from_utf8_lossy(&e);
                visit(Token::Text(unescape_html(&raw).into_owned()));
            }
            Ok(Event::CData(e)) if skip_depth == 0 => {
                visit(Token::Text(String::from_utf8_lossy(&e).into_owned()));
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                tracing::debug!(
                    error = %e,
                    position = reader.buffer_position(),
                    "Stopping at malformed HTML in item body"
                );
                break;
            }
            _ => {}
        }
    }
}

fn visit_tag(name: &[u8], e: &BytesStart<'_>, visit: &mut impl FnMut(Token)) {
    match name {
        b"img" => visit(Token::Image(src_attribute(e))),
        b"br" => visit(Token::LineBreak),
        name if BLOCK_TAGS.contains(&name) => visit(Token::BlockBoundary),
        _ => {}
    }
}

fn src_attribute(e: &BytesStart<'_>) -> Option<String> {
    for attr in e.html_attributes() {
        let attr = match attr {
            Ok(attr) => attr,
            Err(err) => {
                tracing::debug!(error = %err, "Skipping malformed attribute");
                continue;
            }
        };
        if attr.key.as_ref().eq_ignore_ascii_case(b"src") {
            let raw = String::from_utf8_lossy(&attr.value);
            let value = unescape_html(&raw).trim().to_owned();
            return (!value.is_empty()).then_some(value);
        }
    }
    None
}

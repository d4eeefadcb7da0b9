use url::Url;

/// Suggests a display name for a newly added feed source.
///
/// `https://rsshub.app/36kr/home` becomes `rsshub-36kr`: the second-level
/// domain label followed by the first path segment. A URL without any path
/// segment falls back to `Feed N`, where `N` is one more than the number of
/// sources that already exist. A host without a second-level label (an IP
/// address or a single-label name) yields just the path segment.
pub fn suggest_source_name(url: &Url, existing_sources: usize) -> String {
    let Some(segment) = url
        .path_segments()
        .and_then(|mut segments| segments.find(|s| !s.is_empty()))
    else {
        return format!("Feed {}", existing_sources + 1);
    };

    match domain_label(url) {
        Some(domain) => format!("{domain}-{segment}"),
        None => segment.to_owned(),
    }
}

fn domain_label(url: &Url) -> Option<&str> {
    // IP literals have no meaningful "domain" part
    let host = url.domain()?;
    let labels: Vec<&str> = host.split('.').filter(|l| !l.is_empty()).collect();
    if labels.len() >= 2 {
        Some(labels[labels.len() - 2])
    } else {
        None
    }
}

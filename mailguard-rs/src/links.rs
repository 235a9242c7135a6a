//! Link normalization
//!
//! Webmail rewrites outbound links through a redirect wrapper
//! (`https://www.google.com/url?q=<encoded target>&sa=...`). Links are
//! recorded, deduplicated and matched against analysis results by the
//! unwrapped target.

/// Marker preceding the wrapped destination
pub const REDIRECT_MARKER: &str = "url?q=";

/// Maximum number of characters kept from a link label
pub const MAX_LINK_TEXT: usize = 100;

/// Recover the real destination of a wrapped link
///
/// Unwraps repeatedly until the result no longer changes, so applying it to
/// an already-unwrapped URL returns that URL unchanged.
pub fn unwrap_redirect(href: &str) -> String {
    let mut current = href.to_string();
    while let Some(next) = unwrap_once(&current) {
        if next == current {
            break;
        }
        current = next;
    }
    current
}

/// Strip one layer of wrapping; `None` if there is none or it cannot be decoded
fn unwrap_once(href: &str) -> Option<String> {
    let start = href.rfind(REDIRECT_MARKER)? + REDIRECT_MARKER.len();
    let encoded = href[start..].split('&').next().unwrap_or_default();
    urlencoding::decode(encoded).ok().map(|decoded| decoded.into_owned())
}

/// Hrefs that belong to the webmail UI rather than the message
pub fn is_ignored_href(href: &str) -> bool {
    let href = href.trim();
    href.is_empty()
        || href.starts_with('?')
        || href.starts_with('#')
        || href
            .get(..11)
            .is_some_and(|scheme| scheme.eq_ignore_ascii_case("javascript:"))
}

/// Only absolute web URLs are sent for analysis
pub fn is_web_url(href: &str) -> bool {
    href.starts_with("http://") || href.starts_with("https://")
}

/// Truncate a label on a character boundary
pub fn truncate_label(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

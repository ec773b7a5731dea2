//! Link URL classification and resolution.

use url::Url;

/// Schemes whose links point at nothing an archive could store.
const UNREWRITABLE_PREFIXES: &[&str] = &["mailto:", "javascript:", "data:", "tel:", "about:"];

/// Returns whether a link target must be left alone rather than archived.
#[must_use]
pub fn is_unrewritable_url(url: &str) -> bool {
    let trimmed = url.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return true;
    }
    UNREWRITABLE_PREFIXES.iter().any(|prefix| {
        trimmed
            .get(..prefix.len())
            .is_some_and(|head| head.eq_ignore_ascii_case(prefix))
    })
}

/// Resolves a link target against the URL of the document containing it.
#[must_use]
pub fn resolve_link(base: &str, relative: &str) -> Option<String> {
    let relative = relative.trim();
    match Url::parse(base) {
        Ok(base) => base.join(relative).ok().map(String::from),
        Err(_) => Url::parse(relative).ok().map(String::from),
    }
}

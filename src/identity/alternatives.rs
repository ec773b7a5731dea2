//! Ordered URL alternatives, from the URL as given to its most normalized form.
//!
//! Earlier projects stored URLs less normalized than current ones. Lookups try
//! each alternative in order so those resources keep their identity; new
//! resources are created under the last alternative.

use std::fmt;
use std::sync::{Arc, LazyLock};

use regex::Regex;

/// Splits a URL into scheme, authority, path, query and fragment.
#[allow(clippy::expect_used)]
static URL_PARTS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)^(?:([A-Za-z][A-Za-z0-9+.\-]*):)?(?://([^/?#]*))?([^?#]*)(?:\?([^#]*))?(?:#(.*))?$")
        .expect("URL_PARTS regex is valid")
});

/// Characters `requote` never escapes, besides ASCII alphanumerics.
const REQUOTE_SAFE: &[u8] = b"!#$%&'()*+,/:;=?@[]~_.-";

/// A pluggable last-stage URL normalization.
pub trait UrlNormalizer: Send + Sync + fmt::Debug {
    /// Returns the normalized form of `url`, or `None` when it does not apply.
    fn normalize(&self, url: &str) -> Option<String>;
}

/// Drops the `sid` session parameter that phpBB boards append to `*.php` links.
#[derive(Debug, Clone, Copy, Default)]
pub struct PhpBbSessionNormalizer;

impl UrlNormalizer for PhpBbSessionNormalizer {
    fn normalize(&self, url: &str) -> Option<String> {
        let mut parts = UrlParts::parse(url)?;
        if !parts.path.ends_with(".php") {
            return None;
        }
        let query = parts.query.as_deref()?;
        let kept: Vec<&str> = query
            .split('&')
            .filter(|pair| pair.split('=').next() != Some("sid"))
            .collect();
        if kept.len() == query.split('&').count() {
            return None;
        }
        parts.query = Some(kept.join("&"));
        Some(parts.unparse())
    }
}

/// Returns the alternatives of `url`, least to most normalized.
///
/// The first entry is always `url` itself. A step contributes an entry only
/// when it changes the URL.
#[must_use]
pub fn url_alternatives(url: &str, normalizers: &[Arc<dyn UrlNormalizer>]) -> Vec<String> {
    let mut alternatives = vec![url.to_owned()];

    let mut current = match UrlParts::parse(url) {
        Some(mut parts) => {
            if parts.fragment.as_deref().is_some_and(|f| !f.is_empty()) {
                parts.fragment = None;
                alternatives.push(parts.unparse());
            }

            if parts.is_http() {
                if let Some(netloc) = parts.netloc.as_mut() {
                    if netloc.is_ascii() && netloc.bytes().any(|b| b.is_ascii_uppercase()) {
                        netloc.make_ascii_lowercase();
                        alternatives.push(parts.unparse());
                    }
                }

                if parts.path.is_empty() {
                    parts.path.push('/');
                    alternatives.push(parts.unparse());
                }

                let unquoted = parts.unparse();
                let requoted = requote(&unquoted);
                if requoted != unquoted {
                    alternatives.push(requoted.clone());
                }
                requoted
            } else {
                parts.unparse()
            }
        }
        None => url.to_owned(),
    };

    for normalizer in normalizers {
        if let Some(normalized) = normalizer.normalize(&current) {
            if normalized != current {
                alternatives.push(normalized.clone());
                current = normalized;
            }
        }
    }

    alternatives
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct UrlParts {
    scheme: Option<String>,
    netloc: Option<String>,
    path: String,
    query: Option<String>,
    fragment: Option<String>,
}

impl UrlParts {
    fn parse(url: &str) -> Option<Self> {
        let caps = URL_PARTS.captures(url)?;
        let part = |i: usize| caps.get(i).map(|m| m.as_str().to_owned());
        Some(Self {
            scheme: part(1),
            netloc: part(2),
            path: part(3).unwrap_or_default(),
            query: part(4),
            fragment: part(5),
        })
    }

    fn is_http(&self) -> bool {
        self.scheme
            .as_deref()
            .is_some_and(|s| s.eq_ignore_ascii_case("http") || s.eq_ignore_ascii_case("https"))
    }

    /// Rebuilds the URL. Empty query and fragment components are dropped.
    fn unparse(&self) -> String {
        let mut url = String::new();
        if let Some(scheme) = &self.scheme {
            url.push_str(scheme);
            url.push(':');
        }
        if let Some(netloc) = &self.netloc {
            url.push_str("//");
            url.push_str(netloc);
            if !self.path.is_empty() && !self.path.starts_with('/') {
                url.push('/');
            }
        }
        url.push_str(&self.path);
        if let Some(query) = self.query.as_deref().filter(|q| !q.is_empty()) {
            url.push('?');
            url.push_str(query);
        }
        if let Some(fragment) = self.fragment.as_deref().filter(|f| !f.is_empty()) {
            url.push('#');
            url.push_str(fragment);
        }
        url
    }
}

/// Re-encodes a URL so it is fully percent-encoded exactly once.
///
/// Escapes of unreserved characters are decoded, characters outside the safe
/// set are encoded, and other escapes are kept. If the URL holds a malformed
/// escape every `%` is encoded as `%25` instead.
fn requote(url: &str) -> String {
    match unquote_unreserved(url) {
        Some(unquoted) => quote(&unquoted, true),
        None => quote(url, false),
    }
}

fn unquote_unreserved(url: &str) -> Option<String> {
    let mut pieces = url.split('%');
    let mut out = pieces.next().unwrap_or_default().to_owned();
    for piece in pieces {
        let mut chars = piece.chars();
        let hex: String = chars.by_ref().take(2).collect();
        if hex.chars().count() == 2 && hex.chars().all(char::is_alphanumeric) {
            let byte = u8::from_str_radix(&hex, 16).ok()?;
            let c = char::from(byte);
            if byte.is_ascii_alphanumeric() || b"-._~".contains(&byte) {
                out.push(c);
            } else {
                out.push('%');
                out.push_str(&hex);
            }
            out.push_str(chars.as_str());
        } else {
            out.push('%');
            out.push_str(piece);
        }
    }
    Some(out)
}

fn quote(text: &str, keep_percent: bool) -> String {
    let mut out = String::with_capacity(text.len());
    for &byte in text.as_bytes() {
        let safe = byte.is_ascii_alphanumeric()
            || (REQUOTE_SAFE.contains(&byte) && (keep_percent || byte != b'%'));
        if safe {
            out.push(char::from(byte));
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alts(url: &str) -> Vec<String> {
        url_alternatives(url, &[])
    }

    #[test]
    fn test_original_is_always_first() {
        assert_eq!(alts("https://example.com/"), vec!["https://example.com/"]);
    }

    #[test]
    fn test_each_normalization_step_appends() {
        assert_eq!(
            alts("https://Example.com#top"),
            vec![
                "https://Example.com#top",
                "https://Example.com",
                "https://example.com",
                "https://example.com/",
            ]
        );
    }

    #[test]
    fn test_requote_encodes_unsafe_characters() {
        assert_eq!(
            alts("https://example.com/a b"),
            vec!["https://example.com/a b", "https://example.com/a%20b"]
        );
    }

    #[test]
    fn test_requote_decodes_unreserved_escapes() {
        assert_eq!(
            alts("https://example.com/%7Euser"),
            vec!["https://example.com/%7Euser", "https://example.com/~user"]
        );
        // Reserved escapes stay encoded.
        assert_eq!(alts("https://example.com/a%2Fb"), vec!["https://example.com/a%2Fb"]);
    }

    #[test]
    fn test_requote_malformed_escape_quotes_percent() {
        assert_eq!(
            alts("https://example.com/%zz"),
            vec!["https://example.com/%zz", "https://example.com/%25zz"]
        );
    }

    #[test]
    fn test_non_http_schemes_only_strip_fragment() {
        assert_eq!(
            alts("ftp://Example.com/x#y"),
            vec!["ftp://Example.com/x#y", "ftp://Example.com/x"]
        );
        assert_eq!(alts("file:///tmp/a b"), vec!["file:///tmp/a b"]);
    }

    #[test]
    fn test_non_ascii_host_is_not_lowercased() {
        let result = alts("https://BÜCHER.example/");
        assert_eq!(result[0], "https://BÜCHER.example/");
        assert_eq!(result.len(), 2);
        assert!(result[1].starts_with("https://B%C3%9CCHER.example/"));
    }

    #[test]
    fn test_phpbb_sid_is_dropped() {
        let normalizers: Vec<Arc<dyn UrlNormalizer>> = vec![Arc::new(PhpBbSessionNormalizer)];
        assert_eq!(
            url_alternatives(
                "https://forum.example.com/viewtopic.php?t=5&sid=abc",
                &normalizers
            ),
            vec![
                "https://forum.example.com/viewtopic.php?t=5&sid=abc",
                "https://forum.example.com/viewtopic.php?t=5",
            ]
        );
    }

    #[test]
    fn test_phpbb_ignores_other_paths() {
        assert_eq!(
            PhpBbSessionNormalizer.normalize("https://example.com/page?sid=1"),
            None
        );
        assert_eq!(
            PhpBbSessionNormalizer.normalize("https://example.com/index.php?t=1"),
            None
        );
    }
}

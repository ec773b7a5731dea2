//! Content-type parsing and extension-based guessing.

/// Known file extensions and their MIME types.
const EXTENSION_TYPES: &[(&str, &str)] = &[
    ("html", "text/html"),
    ("htm", "text/html"),
    ("xhtml", "application/xhtml+xml"),
    ("css", "text/css"),
    ("js", "text/javascript"),
    ("json", "application/json"),
    ("xml", "text/xml"),
    ("txt", "text/plain"),
    ("png", "image/png"),
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("gif", "image/gif"),
    ("webp", "image/webp"),
    ("svg", "image/svg+xml"),
    ("ico", "image/vnd.microsoft.icon"),
    ("pdf", "application/pdf"),
    ("woff", "font/woff"),
    ("woff2", "font/woff2"),
    ("mp3", "audio/mpeg"),
    ("mp4", "video/mp4"),
    ("zip", "application/zip"),
];

/// Guesses a MIME type from the extension of the URL's last path segment.
#[must_use]
pub fn guess_content_type(url: &str) -> Option<&'static str> {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let segment = path.rsplit('/').next().unwrap_or(path);
    let (_, extension) = segment.rsplit_once('.')?;
    EXTENSION_TYPES
        .iter()
        .find(|(ext, _)| ext.eq_ignore_ascii_case(extension))
        .map(|(_, mime)| *mime)
}

/// Splits a `Content-Type` value into a lower-cased MIME type and charset.
#[must_use]
pub fn parse_content_type(value: &str) -> (String, Option<String>) {
    let mut parts = value.split(';');
    let mime = parts
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    let charset = parts.find_map(|param| {
        let (key, value) = param.split_once('=')?;
        key.trim()
            .eq_ignore_ascii_case("charset")
            .then(|| value.trim().trim_matches('"').to_owned())
    });
    (mime, charset)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guess_by_extension() {
        assert_eq!(guess_content_type("https://x/a/style.CSS"), Some("text/css"));
        assert_eq!(guess_content_type("https://x/index.html?p=1"), Some("text/html"));
        assert_eq!(guess_content_type("https://x/logo.png#top"), Some("image/png"));
        assert_eq!(guess_content_type("https://x/"), None);
        assert_eq!(guess_content_type("https://x/file.unknown"), None);
    }

    #[test]
    fn test_parse_content_type_with_charset() {
        assert_eq!(
            parse_content_type("Text/HTML; charset=\"ISO-8859-1\""),
            ("text/html".to_owned(), Some("ISO-8859-1".to_owned()))
        );
        assert_eq!(parse_content_type("text/css"), ("text/css".to_owned(), None));
    }
}

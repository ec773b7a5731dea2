//! Link extraction for HTML and CSS.
//!
//! HTML goes through a real parser, so markup inside comments and script
//! text is never mistaken for a tag and entities are decoded. CSS is scanned
//! with regular expressions for `url(...)` and `@import`.

use std::sync::LazyLock;

use regex::Regex;
use scraper::{Html, Selector};

use super::{ContentKind, Document, Link, LinkExtractor};

#[allow(clippy::expect_used)]
static LINK_TARGETS: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("[src], [href]").expect("LINK_TARGETS selector is valid"));

#[allow(clippy::expect_used)]
static STYLE_BLOCKS: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("style").expect("STYLE_BLOCKS selector is valid"));

#[allow(clippy::expect_used)]
static CSS_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)url\(\s*(?:"([^"]*)"|'([^']*)'|([^)\s]*))\s*\)"#)
        .expect("CSS_URL regex is valid")
});

#[allow(clippy::expect_used)]
static CSS_IMPORT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)@import\s+(?:"([^"]*)"|'([^']*)')"#).expect("CSS_IMPORT regex is valid")
});

/// Finds links in HTML documents and CSS stylesheets.
///
/// Bodies are decoded with the declared charset when it is a single-byte
/// Latin one, and as UTF-8 otherwise, replacing invalid sequences.
#[derive(Debug, Clone, Copy, Default)]
pub struct HtmlLinkExtractor;

impl LinkExtractor for HtmlLinkExtractor {
    fn extract(
        &self,
        body: &[u8],
        declared_charset: Option<&str>,
        kind: ContentKind,
    ) -> (Option<Document>, Vec<Link>) {
        let text = decode_body(body, declared_charset);
        let links = match kind {
            ContentKind::Html => html_links(&text),
            ContentKind::Css => css_links(&text),
        };
        (Some(Document { kind, text }), links)
    }
}

fn decode_body(body: &[u8], declared_charset: Option<&str>) -> String {
    let charset = declared_charset.map(|c| c.trim().to_ascii_lowercase());
    match charset.as_deref() {
        // windows-1252 only differs from Latin-1 in 0x80..=0x9F, which hold no link syntax.
        Some(
            "iso-8859-1" | "iso8859-1" | "latin1" | "latin-1" | "l1" | "windows-1252" | "cp1252",
        ) => body.iter().map(|&b| char::from(b)).collect(),
        _ => String::from_utf8_lossy(body).into_owned(),
    }
}

fn html_links(text: &str) -> Vec<Link> {
    let document = Html::parse_document(text);
    let mut links = Vec::new();

    for element in document.select(&LINK_TARGETS) {
        let element = element.value();
        let Some(target) = element.attr("src").or_else(|| element.attr("href")) else {
            continue;
        };
        let target = target.trim();
        if target.is_empty() {
            continue;
        }
        let rel = element.attr("rel").unwrap_or_default().to_ascii_lowercase();
        let (kind, embedded) = classify_tag(element.name(), &rel);
        let title = element
            .attr("title")
            .or_else(|| element.attr("alt"))
            .map(str::to_owned);
        links.push(Link::new(target, title, kind, embedded));
    }

    for style in document.select(&STYLE_BLOCKS) {
        let css: String = style.text().collect();
        links.extend(css_links(&css));
    }

    links
}

fn classify_tag(name: &str, rel: &str) -> (&'static str, bool) {
    match name {
        "img" => ("Image", true),
        "script" => ("Script", true),
        "iframe" | "frame" => ("Frame", true),
        "embed" | "object" | "source" | "audio" | "video" | "track" => ("Media", true),
        "input" => ("Image", true),
        "link" if rel.split_whitespace().any(|r| r == "stylesheet") => ("Stylesheet", true),
        "link" if rel.split_whitespace().any(|r| r == "icon") => ("Icon", true),
        _ => ("Link", false),
    }
}

fn css_links(text: &str) -> Vec<Link> {
    let first_group = |caps: &regex::Captures<'_>| {
        (1..caps.len())
            .find_map(|i| caps.get(i))
            .map(|m| m.as_str().to_owned())
    };

    let imports = CSS_IMPORT
        .captures_iter(text)
        .filter_map(|caps| first_group(&caps))
        .map(|url| Link::new(url, None, "Stylesheet", true));
    let urls = CSS_URL
        .captures_iter(text)
        .filter_map(|caps| first_group(&caps))
        .filter(|url| !url.is_empty())
        .map(|url| Link::new(url, None, "Resource", true));

    imports.chain(urls).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extract(body: &str, kind: ContentKind) -> Vec<Link> {
        HtmlLinkExtractor.extract(body.as_bytes(), None, kind).1
    }

    #[test]
    fn test_html_embedded_and_plain_links() {
        let links = extract(
            r#"<html><head><link rel="stylesheet" href="/s.css"></head>
               <body><img src='logo.png' alt="Logo"><a href="/next?a=1&amp;b=2" title="Next">n</a></body></html>"#,
            ContentKind::Html,
        );

        assert_eq!(links.len(), 3);
        assert_eq!(links[0], Link::new("/s.css", None, "Stylesheet", true));
        assert_eq!(
            links[1],
            Link::new("logo.png", Some("Logo".into()), "Image", true)
        );
        assert_eq!(
            links[2],
            Link::new("/next?a=1&b=2", Some("Next".into()), "Link", false)
        );
    }

    #[test]
    fn test_html_style_block_urls_are_embedded() {
        let links = extract(
            "<style>body { background: url(bg.gif) }</style>",
            ContentKind::Html,
        );
        assert_eq!(links, vec![Link::new("bg.gif", None, "Resource", true)]);
    }

    #[test]
    fn test_css_import_and_url() {
        let links = extract(
            r#"@import "base.css"; .a { background: url('img/a.png'); }"#,
            ContentKind::Css,
        );
        assert_eq!(
            links,
            vec![
                Link::new("base.css", None, "Stylesheet", true),
                Link::new("img/a.png", None, "Resource", true),
            ]
        );
    }

    #[test]
    fn test_comments_and_script_text_are_not_tags() {
        let links = extract(
            r#"<!-- <img src="old.png"> -->
               <script>document.write('<img src="fake.png">');</script>
               <img src="real.png">"#,
            ContentKind::Html,
        );
        assert_eq!(links, vec![Link::new("real.png", None, "Image", true)]);
    }

    #[test]
    fn test_entities_in_attributes_are_decoded() {
        let links = extract(
            r#"<a href="/search?q=caf&eacute;&#38;page=2&lt;">x</a>"#,
            ContentKind::Html,
        );
        assert_eq!(links[0].relative_url, "/search?q=caf\u{e9}&page=2<");
    }

    #[test]
    fn test_document_text_is_lossy_utf8() {
        let (doc, _) = HtmlLinkExtractor.extract(b"ok \xff", None, ContentKind::Css);
        let doc = doc.unwrap_or_else(|| unreachable!());
        assert_eq!(doc.text, "ok \u{fffd}");
    }

    #[test]
    fn test_declared_latin1_charset_is_honored() {
        let body = b"<a href=\"/caf\xe9\" title=\"Caf\xe9\">x</a>";
        let (doc, links) = HtmlLinkExtractor.extract(body, Some("ISO-8859-1"), ContentKind::Html);

        assert!(doc.unwrap_or_else(|| unreachable!()).text.contains("Caf\u{e9}"));
        assert_eq!(links[0].relative_url, "/caf\u{e9}");
        assert_eq!(links[0].title.as_deref(), Some("Caf\u{e9}"));
    }
}

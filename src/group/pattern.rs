//! URL pattern compiler for resource groups.
//!
//! Pattern syntax:
//! - `**` matches any sequence of characters
//! - `*` matches any sequence without `/`, `?`, `=` or `&`
//! - `#` matches one or more digits
//! - `@` matches one or more ASCII letters
//!
//! Everything else is literal. Matching is anchored at both ends.

use std::fmt;

use regex::Regex;

/// A compiled group URL pattern.
#[derive(Clone)]
pub struct UrlPattern {
    source: String,
    regex: Regex,
}

impl UrlPattern {
    /// Compiles a pattern.
    ///
    /// # Errors
    ///
    /// Returns the regex error if the translated pattern exceeds the regex
    /// engine's size limits.
    pub fn compile(pattern: &str) -> Result<Self, regex::Error> {
        let regex = Regex::new(&translate(pattern))?;
        Ok(Self {
            source: pattern.to_owned(),
            regex,
        })
    }

    /// Returns the pattern as written.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Returns whether `url` matches the whole pattern.
    #[must_use]
    pub fn matches(&self, url: &str) -> bool {
        self.regex.is_match(url)
    }
}

impl fmt::Debug for UrlPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("UrlPattern").field(&self.source).finish()
    }
}

fn translate(pattern: &str) -> String {
    let mut out = String::from("^");
    let mut literal = String::new();
    let mut chars = pattern.chars().peekable();

    while let Some(c) = chars.next() {
        let wildcard = match c {
            '*' if chars.peek() == Some(&'*') => {
                chars.next();
                ".*"
            }
            '*' => "[^/?=&]*",
            '#' => "[0-9]+",
            '@' => "[a-zA-Z]+",
            _ => {
                literal.push(c);
                continue;
            }
        };
        out.push_str(&regex::escape(&literal));
        literal.clear();
        out.push_str(wildcard);
    }
    out.push_str(&regex::escape(&literal));
    out.push('$');
    out
}

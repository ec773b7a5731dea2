//! User-Agent string for archive fetches.
//!
//! Every HTTP request identifies the archiver with a fixed header so site
//! operators can tell archive traffic apart.

/// Project URL for User-Agent identification.
const PROJECT_UA_URL: &str = "https://github.com/fierce/webarchiver";

/// Default User-Agent for fetch requests.
#[must_use]
pub fn default_user_agent() -> String {
    let version = env!("CARGO_PKG_VERSION");
    format!("webarchiver/{version} (+{PROJECT_UA_URL})")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_user_agent_contains_version_and_url() {
        let ua = default_user_agent();
        assert!(ua.contains(PROJECT_UA_URL));
        assert_eq!(
            env!("CARGO_PKG_VERSION"),
            ua.strip_prefix("webarchiver/")
                .and_then(|s| s.split(' ').next())
                .unwrap()
        );
    }
}

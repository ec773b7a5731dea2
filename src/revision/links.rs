use tracing::{debug, instrument};

use super::{ResourceRevision, RevisionError};
use crate::doc::{ContentKind, Document, Link, is_unrewritable_url};
use crate::project::Project;

/// Link kind of the pseudo-link synthesized for redirects.
pub const REDIRECT_LINK_KIND: &str = "Redirect";

impl Project {
    /// Parses a revision's body and returns its document and links.
    ///
    /// Only HTML and CSS bodies are parsed. Links that can never be archived
    /// are dropped. A redirect contributes an embedded pseudo-link to its
    /// target so the target is fetched along with it.
    ///
    /// # Errors
    ///
    /// Returns `RevisionError::Io` if the body cannot be read.
    #[instrument(skip(self, revision), fields(revision_id = %revision.id()))]
    pub async fn revision_links(
        &self,
        revision: &ResourceRevision,
    ) -> Result<(Option<Document>, Vec<Link>), RevisionError> {
        let kind = if revision.is_html() {
            Some(ContentKind::Html)
        } else if revision.is_css() {
            Some(ContentKind::Css)
        } else {
            None
        };

        let (document, mut links) = match kind {
            Some(kind) if revision.has_body() => {
                let body = revision.read_body().await?;
                let charset = revision.declared_charset();
                let (document, links) =
                    self.inner
                        .extractor
                        .extract(&body, charset.as_deref(), kind);
                let links: Vec<Link> = links
                    .into_iter()
                    .filter(|link| !is_unrewritable_url(&link.relative_url))
                    .collect();
                (document, links)
            }
            _ => (None, Vec::new()),
        };

        if let Some(target) = revision.redirect_url() {
            links.push(Link::new(
                target,
                revision.redirect_title(),
                REDIRECT_LINK_KIND,
                true,
            ));
        }

        debug!(links = links.len(), "links extracted");
        Ok((document, links))
    }
}

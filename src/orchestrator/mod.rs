//! Download orchestration.
//!
//! Every download runs as a spawned task registered under a [`TaskKey`]; a
//! second request for the same key joins the running task instead of starting
//! another fetch. Tasks:
//!
//! - **body**: fetch one resource and record the outcome as a revision
//! - **full**: body, then a body task for each embedded resource it links to
//! - **group**: full downloads of every group member, while the group's
//!   source is downloaded to discover more members
//!
//! Fetch failures never fail a task. They are recorded as error revisions and
//! returned like any other revision.

mod error;
mod group_task;
mod policy;
mod registry;
mod task;

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use futures_util::StreamExt;
use futures_util::stream::FuturesUnordered;
use tokio::sync::Semaphore;
use tracing::{debug, info, instrument, warn};

pub use error::OrchestratorError;
pub use policy::{AlwaysRefetch, AnyRevisionIsFresh, FreshnessPolicy};
pub use task::{DownloadOptions, DownloadOutcome, TaskHandle, TaskKey, TaskKind, TaskProgress};

use self::registry::TaskRegistry;
use self::task::TaskContext;
use crate::config::ArchiverConfig;
use crate::doc::resolve_link;
use crate::fetch::{Fetcher, ProtocolFetcher};
use crate::identity::Resource;
use crate::project::Project;
use crate::revision::{PersistedError, ResourceRevision, RevisionOutcome};

/// Schedules and deduplicates downloads for one project. Cheap to clone.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<OrchestratorInner>,
}

struct OrchestratorInner {
    project: Project,
    fetcher: Arc<dyn Fetcher>,
    policy: Arc<dyn FreshnessPolicy>,
    registry: Arc<TaskRegistry>,
    fetch_permits: Arc<Semaphore>,
}

impl fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Orchestrator")
            .field("project", &self.inner.project.path())
            .field("fetcher", &self.inner.fetcher)
            .field("policy", &self.inner.policy)
            .field("active_tasks", &self.inner.registry.len())
            .finish()
    }
}

impl Orchestrator {
    /// Creates an orchestrator fetching over HTTP(S) and `file`.
    #[must_use]
    pub fn new(project: Project, config: &ArchiverConfig) -> Self {
        Self::with_parts(
            project,
            Arc::new(ProtocolFetcher::new(config.http_settings())),
            Arc::new(AnyRevisionIsFresh),
            config.max_concurrent_fetches,
        )
    }

    /// Creates an orchestrator with explicit collaborators.
    #[must_use]
    pub fn with_parts(
        project: Project,
        fetcher: Arc<dyn Fetcher>,
        policy: Arc<dyn FreshnessPolicy>,
        max_concurrent_fetches: usize,
    ) -> Self {
        debug!(max_concurrent_fetches, "creating orchestrator");
        Self {
            inner: Arc::new(OrchestratorInner {
                project,
                fetcher,
                policy,
                registry: Arc::new(TaskRegistry::default()),
                fetch_permits: Arc::new(Semaphore::new(max_concurrent_fetches.max(1))),
            }),
        }
    }

    #[must_use]
    pub fn project(&self) -> &Project {
        &self.inner.project
    }

    /// Handles of every task still running.
    #[must_use]
    pub fn active_tasks(&self) -> Vec<TaskHandle> {
        self.inner.registry.active()
    }

    /// Fetches a resource unless it is up to date, and records the outcome.
    ///
    /// # Errors
    ///
    /// Returns `OrchestratorError::Model` if the resource belongs to another
    /// project or was deleted.
    pub fn download_body(&self, resource: &Resource) -> Result<TaskHandle, OrchestratorError> {
        self.inner.project.ensure_owned(resource)?;
        let key = TaskKey::Resource(resource.key(), TaskKind::Body);
        let this = self.clone();
        let target = resource.clone();
        Ok(self.inner.registry.get_or_spawn(
            key,
            || format!("Downloading {}", resource.url()),
            move |ctx| async move { this.run_body(target, ctx).await.map_err(Arc::new) },
        ))
    }

    /// Downloads a resource and every resource it embeds, one level deep.
    ///
    /// # Errors
    ///
    /// Returns `OrchestratorError::Model` if the resource belongs to another
    /// project or was deleted.
    pub fn download(
        &self,
        resource: &Resource,
        options: DownloadOptions,
    ) -> Result<TaskHandle, OrchestratorError> {
        self.inner.project.ensure_owned(resource)?;
        let kind = if options.needs_result {
            TaskKind::Full
        } else {
            TaskKind::FullNoResult
        };
        let key = TaskKey::Resource(resource.key(), kind);
        let this = self.clone();
        let target = resource.clone();
        let needs_result = options.needs_result;
        let handle = self.inner.registry.get_or_spawn(
            key,
            || format!("Downloading {} and embedded resources", resource.url()),
            move |ctx| this.run_full(target, needs_result, ctx),
        );
        Ok(handle.with_wait_for_embedded(options.wait_for_embedded))
    }

    #[instrument(skip(self, resource, ctx), fields(resource_id = %resource.id(), url = %resource.url()))]
    async fn run_body(
        self,
        resource: Resource,
        ctx: TaskContext,
    ) -> Result<Option<ResourceRevision>, OrchestratorError> {
        let project = &self.inner.project;
        if self.inner.policy.is_up_to_date(project, &resource).await? {
            debug!("resource is up to date");
            resource.mark_downloaded_this_session();
            return Ok(project.default_revision(&resource).await?);
        }

        ctx.progress.set_subtitle("Waiting for a connection");
        let permit = Arc::clone(&self.inner.fetch_permits)
            .acquire_owned()
            .await
            .map_err(|_| OrchestratorError::SemaphoreClosed)?;

        ctx.progress.set_subtitle("Downloading");
        let url = resource.url();
        let outcome = match self.inner.fetcher.fetch(&url).await {
            Ok(response) => RevisionOutcome::Response {
                metadata: response.metadata,
                body: response.body,
            },
            Err(error) => {
                warn!(error = %error, "fetch failed, recording error revision");
                RevisionOutcome::Error(PersistedError::from(&error))
            }
        };
        let revision = project.record_revision(&resource, outcome).await?;
        drop(permit);

        resource.mark_downloaded_this_session();
        ctx.progress.set_subtitle("Complete");
        info!(
            revision_id = %revision.id(),
            status = ?revision.status_code(),
            error = revision.is_error(),
            "resource downloaded"
        );
        Ok(Some(revision))
    }

    #[instrument(skip(self, resource, ctx), fields(resource_id = %resource.id(), url = %resource.url()))]
    async fn run_full(
        self,
        resource: Resource,
        needs_result: bool,
        mut ctx: TaskContext,
    ) -> DownloadOutcome {
        let revision = self
            .download_body(&resource)
            .map_err(Arc::new)?
            .wait()
            .await?;
        let result = if needs_result { revision.clone() } else { None };
        ctx.complete_primary(Ok(result.clone()));

        let Some(revision) = revision else {
            return Ok(result);
        };

        ctx.progress.set_subtitle("Finding embedded resources");
        let targets = self
            .embedded_targets(&resource, &revision)
            .await
            .map_err(Arc::new)?;

        let mut children = FuturesUnordered::new();
        for target in targets {
            if ctx.cancel.is_cancelled() {
                debug!("cancelled, not scheduling remaining embedded resources");
                break;
            }
            match self.download_body(&target) {
                Ok(handle) => {
                    ctx.progress.add_total(1);
                    children.push(async move { handle.wait_finished().await });
                }
                Err(e) => warn!(url = %target.url(), error = %e, "embedded resource skipped"),
            }
        }

        ctx.progress.set_subtitle("Downloading embedded resources");
        while let Some(outcome) = children.next().await {
            if let Err(e) = outcome {
                warn!(error = %e, "embedded download failed");
            }
            ctx.progress.increment_completed();
        }

        ctx.progress.set_subtitle("Complete");
        debug!(embedded = ctx.progress.total(), "full download complete");
        Ok(result)
    }

    /// Resolves every link of a revision and returns the embedded targets
    /// that still need a body fetch this session.
    async fn embedded_targets(
        &self,
        resource: &Resource,
        revision: &ResourceRevision,
    ) -> Result<Vec<Resource>, OrchestratorError> {
        let project = &self.inner.project;
        let (_, links) = project.revision_links(revision).await?;
        let base = resource.url();

        let mut seen = HashSet::new();
        let mut targets = Vec::new();
        for link in links {
            let Some(absolute) = resolve_link(&base, &link.relative_url) else {
                debug!(link = %link.relative_url, "unresolvable link skipped");
                continue;
            };
            let target = project.resolve(&absolute).await?;
            if !link.embedded
                || &target == resource
                || target.already_downloaded_this_session()
                || !seen.insert(target.id())
            {
                continue;
            }
            targets.push(target);
        }
        Ok(targets)
    }
}

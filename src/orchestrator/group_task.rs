//! Group download and membership update tasks.

use std::collections::HashSet;

use futures_util::future::BoxFuture;
use futures_util::stream::FuturesUnordered;
use futures_util::{FutureExt, StreamExt};
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tracing::{debug, info, instrument, warn};

use super::task::TaskContext;
use super::{
    DownloadOptions, DownloadOutcome, Orchestrator, OrchestratorError, TaskHandle, TaskKey,
    TaskKind,
};
use crate::events::ProjectEvent;
use crate::group::GroupSource;
use crate::identity::Resource;
use crate::project::ModelError;
use crate::types::{ResourceGroupId, ResourceId};

/// A scheduled child of a group task. `None` marks the membership update.
type ChildFuture = BoxFuture<'static, (Option<ResourceId>, DownloadOutcome)>;

const MEMBER_OPTIONS: DownloadOptions = DownloadOptions {
    wait_for_embedded: true,
    needs_result: false,
};

impl Orchestrator {
    /// Downloads every member of a group.
    ///
    /// The group's source is downloaded at the same time; members it reveals
    /// while the task runs are downloaded too.
    ///
    /// # Errors
    ///
    /// - `ModelError::NotFound` if the group does not exist
    /// - `ModelError::InvalidSource` if the group has no source
    pub fn download_group(
        &self,
        group: ResourceGroupId,
    ) -> BoxFuture<'static, Result<TaskHandle, OrchestratorError>> {
        let this = self.clone();
        async move {
            let snapshot = this
                .inner
                .project
                .group(group)
                .await
                .ok_or_else(|| ModelError::not_found("group", group.get()))?;
            if snapshot.source().is_none() {
                return Err(ModelError::invalid_source(format!(
                    "group {:?} has no source",
                    snapshot.name()
                ))
                .into());
            }

            let key = TaskKey::Group(group, TaskKind::DownloadGroup);
            let task = this.clone();
            let handle = this.inner.registry.get_or_spawn(
                key,
                || format!("Downloading group: {}", snapshot.name()),
                move |ctx| task.run_group(group, ctx),
            );
            Ok(handle.with_wait_for_embedded(true))
        }
        .boxed()
    }

    /// Downloads a group's source so that new members are discovered.
    ///
    /// A root resource source gets a full download; a group source gets a
    /// group download.
    ///
    /// # Errors
    ///
    /// - `ModelError::NotFound` if the group or its source does not exist
    /// - `ModelError::InvalidSource` if the group has no source
    pub async fn update_group_membership(
        &self,
        group: ResourceGroupId,
    ) -> Result<TaskHandle, OrchestratorError> {
        let project = &self.inner.project;
        let snapshot = project
            .group(group)
            .await
            .ok_or_else(|| ModelError::not_found("group", group.get()))?;

        let source = match snapshot.source() {
            None => {
                return Err(ModelError::invalid_source(format!(
                    "group {:?} has no source",
                    snapshot.name()
                ))
                .into());
            }
            Some(GroupSource::RootResource(root)) => {
                let root = project
                    .root_resource(root)
                    .await
                    .ok_or_else(|| ModelError::not_found("root resource", root.get()))?;
                self.download(root.resource(), MEMBER_OPTIONS)?
            }
            Some(GroupSource::ResourceGroup(source)) => self.download_group(source).await?,
        };

        let key = TaskKey::Group(group, TaskKind::UpdateGroupMembership);
        Ok(self.inner.registry.get_or_spawn(
            key,
            || format!("Updating group members: {}", snapshot.name()),
            move |ctx| async move {
                ctx.progress.set_subtitle(source.progress().title().to_owned());
                let outcome = source.wait_finished().await;
                ctx.progress.set_subtitle("Complete");
                outcome.map(|_| None)
            },
        ))
    }

    #[instrument(skip(self, ctx), fields(group_id = %group))]
    async fn run_group(self, group: ResourceGroupId, ctx: TaskContext) -> DownloadOutcome {
        let project = self.inner.project.clone();

        // Subscribe before the snapshot so no member added in between is missed.
        let mut events = project.subscribe();
        let members = project.group_members(group).await.unwrap_or_default();

        let mut scheduler = MemberScheduler::new(self.clone(), group, ctx);
        match self.update_group_membership(group).await {
            Ok(update) => scheduler
                .pending
                .push(async move { (None, update.wait_finished().await) }.boxed()),
            Err(e) => warn!(error = %e, "membership update not started"),
        }
        for member in members {
            scheduler.schedule(member);
        }

        let mut listening = true;
        loop {
            if scheduler.pending.is_empty() {
                // Events published before the last child finished may still be queued.
                loop {
                    match events.try_recv() {
                        Ok(event) => scheduler.handle_event(&event),
                        Err(TryRecvError::Lagged(_)) => {
                            let members = project.group_members(group).await.unwrap_or_default();
                            for member in members {
                                scheduler.schedule(member);
                            }
                        }
                        Err(TryRecvError::Empty | TryRecvError::Closed) => break,
                    }
                }
                if scheduler.pending.is_empty() {
                    break;
                }
            }

            tokio::select! {
                Some((member, outcome)) = scheduler.pending.next() => {
                    scheduler.finish(member, &outcome);
                }
                event = events.recv(), if listening => match event {
                    Ok(event) => scheduler.handle_event(&event),
                    Err(RecvError::Lagged(skipped)) => {
                        debug!(skipped, "event receiver lagged, rescanning members");
                        let members = project.group_members(group).await.unwrap_or_default();
                        for member in members {
                            scheduler.schedule(member);
                        }
                    }
                    Err(RecvError::Closed) => listening = false,
                },
                () = scheduler.ctx.cancel.cancelled(), if !scheduler.cancelled => {
                    info!("group download cancelled");
                    scheduler.cancelled = true;
                }
            }
        }

        scheduler.ctx.progress.set_subtitle("Complete");
        info!(
            members = scheduler.scheduled.len(),
            failed = scheduler.failed,
            "group download complete"
        );
        Ok(None)
    }
}

struct MemberScheduler {
    orchestrator: Orchestrator,
    group: ResourceGroupId,
    ctx: TaskContext,
    pending: FuturesUnordered<ChildFuture>,
    scheduled: HashSet<ResourceId>,
    cancelled: bool,
    failed: usize,
}

impl MemberScheduler {
    fn new(orchestrator: Orchestrator, group: ResourceGroupId, ctx: TaskContext) -> Self {
        Self {
            orchestrator,
            group,
            ctx,
            pending: FuturesUnordered::new(),
            scheduled: HashSet::new(),
            cancelled: false,
            failed: 0,
        }
    }

    fn handle_event(&mut self, event: &ProjectEvent) {
        match event {
            ProjectEvent::GroupMemberAdded { group, resource } if *group == self.group => {
                debug!(url = %resource.url(), "member added during download");
                self.schedule(resource.clone());
            }
            _ => {}
        }
    }

    fn schedule(&mut self, member: Resource) {
        if self.cancelled || self.ctx.cancel.is_cancelled() || !self.scheduled.insert(member.id()) {
            return;
        }
        match self.orchestrator.download(&member, MEMBER_OPTIONS) {
            Ok(handle) => {
                let id = member.id();
                self.ctx.progress.add_total(1);
                self.pending
                    .push(async move { (Some(id), handle.wait_finished().await) }.boxed());
            }
            Err(e) => warn!(url = %member.url(), error = %e, "member skipped"),
        }
    }

    fn finish(&mut self, member: Option<ResourceId>, outcome: &DownloadOutcome) {
        match (member, outcome) {
            (Some(id), Err(e)) => {
                self.failed += 1;
                warn!(resource_id = %id, error = %e, "member download failed");
            }
            (None, Err(e)) => warn!(error = %e, "membership update failed"),
            _ => {}
        }
        if member.is_some() {
            self.ctx.progress.increment_completed();
            self.ctx.progress.set_subtitle(format!(
                "{} of {} members",
                self.ctx.progress.completed(),
                self.ctx.progress.total()
            ));
        }
    }
}

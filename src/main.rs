//! CLI entry point for the web archiver.

use std::io::{self, IsTerminal};

use anyhow::{Context, Result, anyhow, bail};
use clap::Parser;
use tracing::{debug, info, warn};
use webarchiver::{
    ArchiverConfig, DownloadOptions, GroupSource, Orchestrator, Project, ProjectOptions,
    ResourceRevision, TaskHandle,
};

mod app_config;
mod cli;
mod progress;

use app_config::VerbositySetting;
use cli::{Args, Command, ListTarget};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();
    let loaded = app_config::load_default_file_config()?;
    let file_config = loaded.config.unwrap_or_default();

    // Priority: RUST_LOG env var > quiet flag > verbose flag > config file > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => file_config
                .verbosity
                .map_or("info", VerbositySetting::as_filter),
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    debug!(?args, config_path = ?loaded.path, "CLI arguments parsed");

    let mut config = ArchiverConfig::default();
    file_config.apply_to(&mut config);
    if let Some(concurrency) = args.concurrency {
        config.max_concurrent_fetches = usize::from(concurrency);
    }
    config.validate()?;

    let project = Project::open(
        &args.project,
        ProjectOptions {
            db: config.db,
            ..ProjectOptions::default()
        },
    )
    .await
    .with_context(|| format!("Failed to open project '{}'", args.project.display()))?;
    info!(path = %project.path().display(), "project opened");

    let use_spinner = !args.quiet && io::stderr().is_terminal();
    let result = run(&project, &config, args.command, use_spinner).await;
    project.close().await;
    result
}

async fn run(
    project: &Project,
    config: &ArchiverConfig,
    command: Command,
    use_spinner: bool,
) -> Result<()> {
    match command {
        Command::Add { url, name } => {
            let resource = project.resolve(&url).await?;
            let name = name.unwrap_or_else(|| resource.url());
            let root = project.create_root_resource(&name, &resource).await?;
            println!("{}\t{}\t{}", root.id(), root.name(), resource.url());
        }
        Command::Group {
            name,
            pattern,
            source_root,
            source_group,
        } => {
            let source = find_source(project, source_root, source_group).await?;
            let group = project.create_group(&name, &pattern, source).await?;
            println!(
                "{}\t{}\t{} members",
                group.id(),
                group.name(),
                group.members().len()
            );
        }
        Command::Download { url, wait_embedded } => {
            let orchestrator = Orchestrator::new(project.clone(), config);
            let resource = project.resolve(&url).await?;
            let handle = orchestrator.download(
                &resource,
                DownloadOptions {
                    wait_for_embedded: wait_embedded,
                    needs_result: true,
                },
            )?;
            let outcome = wait_with_progress(&orchestrator, &handle, use_spinner).await?;
            match outcome {
                Some(revision) => print_revision(&revision).await,
                None => println!("no revision recorded"),
            }
            // Embedded downloads keep running after the primary result is in.
            if let Err(e) = handle.wait_finished().await {
                warn!(error = %e, "embedded downloads failed");
            }
        }
        Command::DownloadGroup { name } => {
            let orchestrator = Orchestrator::new(project.clone(), config);
            let group = project
                .group_named(&name)
                .await
                .ok_or_else(|| anyhow!("no group named {name:?}"))?;
            let handle = orchestrator.download_group(group.id()).await?;
            wait_with_progress(&orchestrator, &handle, use_spinner).await?;
            let members = project.group_members(group.id()).await.unwrap_or_default();
            println!("{}\t{} members downloaded", group.name(), members.len());
        }
        Command::UpdateGroup { name } => {
            let orchestrator = Orchestrator::new(project.clone(), config);
            let group = project
                .group_named(&name)
                .await
                .ok_or_else(|| anyhow!("no group named {name:?}"))?;
            let before = group.members().len();
            let handle = orchestrator.update_group_membership(group.id()).await?;
            wait_with_progress(&orchestrator, &handle, use_spinner).await?;
            let after = project
                .group_members(group.id())
                .await
                .map_or(0, |members| members.len());
            println!(
                "{}\t{after} members ({} new)",
                group.name(),
                after.saturating_sub(before)
            );
        }
        Command::List { what } => list(project, what).await,
        Command::Revisions { url } => {
            let resource = project
                .get_resource(&url)
                .await
                .ok_or_else(|| anyhow!("no resource for {url}"))?;
            for revision in project.list_revisions(&resource).await? {
                print_revision(&revision).await;
            }
        }
        Command::Rename { old_url, new_url } => {
            let resource = project
                .get_resource(&old_url)
                .await
                .ok_or_else(|| anyhow!("no resource for {old_url}"))?;
            if !project.rename_resource(&resource, &new_url).await? {
                bail!("{new_url} already belongs to another resource");
            }
            println!("{}\t{}", resource.id(), resource.url());
        }
        Command::Delete { url } => {
            let resource = project
                .get_resource(&url)
                .await
                .ok_or_else(|| anyhow!("no resource for {url}"))?;
            project.delete_resource(&resource).await?;
            info!(url = %url, "resource deleted");
        }
    }
    Ok(())
}

async fn find_source(
    project: &Project,
    source_root: Option<String>,
    source_group: Option<String>,
) -> Result<Option<GroupSource>> {
    if let Some(name) = source_root {
        let root = project
            .root_resource_named(&name)
            .await
            .ok_or_else(|| anyhow!("no root resource named {name:?}"))?;
        return Ok(Some(GroupSource::RootResource(root.id())));
    }
    if let Some(name) = source_group {
        let group = project
            .group_named(&name)
            .await
            .ok_or_else(|| anyhow!("no group named {name:?}"))?;
        return Ok(Some(GroupSource::ResourceGroup(group.id())));
    }
    Ok(None)
}

/// Waits for a task, cancelling it on Ctrl-C.
async fn wait_with_progress(
    orchestrator: &Orchestrator,
    handle: &TaskHandle,
    use_spinner: bool,
) -> Result<Option<ResourceRevision>> {
    let (spinner, stop) = progress::spawn_progress_ui(use_spinner, orchestrator.clone());
    let outcome = tokio::select! {
        outcome = handle.wait() => outcome,
        _ = tokio::signal::ctrl_c() => {
            warn!("interrupted, finishing downloads already in flight");
            handle.cancel();
            handle.wait().await
        }
    };
    progress::stop_progress_ui(spinner, &stop).await;
    Ok(outcome?)
}

async fn print_revision(revision: &ResourceRevision) {
    let status = match (revision.error(), revision.metadata()) {
        (Some(error), _) => format!("{}: {}", error.error_type, error.message),
        (None, Some(metadata)) => format!("{} {}", metadata.status_code, metadata.reason_phrase),
        (None, None) => "OK".to_string(),
    };
    let size = if revision.has_body() {
        revision
            .body_size()
            .await
            .map_or_else(|_| "?".to_string(), |bytes| format!("{bytes} bytes"))
    } else {
        "no body".to_string()
    };
    println!(
        "{}\t{}\t{}\t{}",
        revision.id(),
        revision.resource().url(),
        status,
        size
    );
}

async fn list(project: &Project, what: ListTarget) {
    match what {
        ListTarget::Resources => {
            for resource in project.resources().await {
                println!(
                    "{}\t{}",
                    resource.id(),
                    project.display_url(&resource.url()).await
                );
            }
        }
        ListTarget::Roots => {
            for root in project.root_resources().await {
                println!(
                    "{}\t{}\t{}",
                    root.id(),
                    root.name(),
                    root.resource().url()
                );
            }
        }
        ListTarget::Groups => {
            for group in project.groups().await {
                let source = match group.source() {
                    Some(GroupSource::RootResource(id)) => format!("root:{id}"),
                    Some(GroupSource::ResourceGroup(id)) => format!("group:{id}"),
                    None => "-".to_string(),
                };
                println!(
                    "{}\t{}\t{}\t{}\t{} members",
                    group.id(),
                    group.name(),
                    group.url_pattern(),
                    source,
                    group.members().len()
                );
            }
        }
    }
}

//! Progress UI (spinner) for download runs.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use webarchiver::{Orchestrator, TaskHandle, TaskKind};

/// Spawns the progress UI (spinner) when requested.
/// Returns (handle, stop) so the caller can signal stop and await the handle.
/// When `use_spinner` is false, returns (None, stop) with stop already true.
pub(crate) fn spawn_progress_ui(
    use_spinner: bool,
    orchestrator: Orchestrator,
) -> (Option<tokio::task::JoinHandle<()>>, Arc<AtomicBool>) {
    if !use_spinner {
        return (None, Arc::new(AtomicBool::new(true)));
    }
    let stop = Arc::new(AtomicBool::new(false));
    let handle = spawn_spinner_inner(orchestrator, Arc::clone(&stop));
    (Some(handle), stop)
}

/// Stops the spinner and waits for it to clear the line.
pub(crate) async fn stop_progress_ui(
    handle: Option<tokio::task::JoinHandle<()>>,
    stop: &AtomicBool,
) {
    stop.store(true, Ordering::SeqCst);
    if let Some(handle) = handle {
        let _ = handle.await;
    }
}

fn spawn_spinner_inner(
    orchestrator: Orchestrator,
    stop: Arc<AtomicBool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::with_template("{spinner} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        spinner.enable_steady_tick(Duration::from_millis(100));

        while !stop.load(Ordering::SeqCst) {
            let tasks = orchestrator.active_tasks();
            spinner.set_message(describe(&tasks));
            tokio::time::sleep(Duration::from_millis(120)).await;
        }

        spinner.finish_and_clear();
    })
}

/// One-line summary: the outermost running task plus a count of the rest.
fn describe(tasks: &[TaskHandle]) -> String {
    let Some(lead) = tasks
        .iter()
        .min_by_key(|task| kind_rank(task.kind()))
    else {
        return "Finishing...".to_string();
    };

    let progress = lead.progress();
    let mut message = if progress.total() > 0 {
        format!(
            "[{}/{}] {}",
            progress.completed(),
            progress.total(),
            progress.title()
        )
    } else {
        progress.title().to_string()
    };
    message.push_str(&format!(" ({})", progress.subtitle()));
    if tasks.len() > 1 {
        message.push_str(&format!(", {} tasks running", tasks.len()));
    }
    message
}

fn kind_rank(kind: TaskKind) -> u8 {
    match kind {
        TaskKind::DownloadGroup => 0,
        TaskKind::UpdateGroupMembership => 1,
        TaskKind::Full | TaskKind::FullNoResult => 2,
        TaskKind::Body => 3,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_describe_without_tasks() {
        assert_eq!(describe(&[]), "Finishing...");
    }

    #[test]
    fn test_kind_rank_prefers_groups() {
        assert!(kind_rank(TaskKind::DownloadGroup) < kind_rank(TaskKind::Body));
        assert!(kind_rank(TaskKind::Full) < kind_rank(TaskKind::Body));
    }

    #[tokio::test]
    async fn test_spawn_progress_ui_when_disabled_returns_none_handle() {
        let dir = tempfile::tempdir().unwrap();
        let project = webarchiver::Project::open(dir.path(), webarchiver::ProjectOptions::default())
            .await
            .unwrap();
        let orchestrator = Orchestrator::new(project, &webarchiver::ArchiverConfig::default());

        let (handle, stop) = spawn_progress_ui(false, orchestrator);

        assert!(handle.is_none());
        assert!(stop.load(Ordering::SeqCst));
    }
}

//! Progress bar utilities for CLI downloads

use console::style;
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use pullman_core::{Task, TaskState};
use tokio::task::JoinHandle;

const TEMPLATE: &str =
    "{spinner:.green} {prefix:.bold} [{bar:30.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta}) {msg}";

/// Renders one progress bar per task
pub struct DownloadProgress {
    multi: MultiProgress,
}

impl DownloadProgress {
    /// `visible = false` keeps the bars off the terminal, e.g. for JSON output
    pub fn new(visible: bool) -> Self {
        let multi = MultiProgress::new();
        if !visible {
            multi.set_draw_target(ProgressDrawTarget::hidden());
        }
        Self { multi }
    }

    /// Follow `task` until it reaches a terminal state
    pub fn track(&self, task: &Task) -> JoinHandle<()> {
        let pb = self.multi.add(ProgressBar::new(0));
        pb.set_style(
            ProgressStyle::with_template(TEMPLATE)
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("█▓▒░  "),
        );
        pb.set_prefix(label(task));

        let mut receiver = task.subscribe();
        tokio::spawn(async move {
            loop {
                let state = receiver.borrow_and_update().clone();
                if render(&pb, &state) {
                    break;
                }
                if receiver.changed().await.is_err() {
                    pb.abandon();
                    break;
                }
            }
        })
    }
}

fn label(task: &Task) -> String {
    task.request()
        .destination
        .as_ref()
        .and_then(|destination| destination.file_name.clone())
        .or_else(|| {
            task.request()
                .source
                .path_segments()
                .and_then(|segments| segments.last())
                .filter(|segment| !segment.is_empty())
                .map(str::to_string)
        })
        .unwrap_or_else(|| task.request().source.to_string())
}

/// Draw `state`, returning `true` once the bar is done
fn render(pb: &ProgressBar, state: &TaskState) -> bool {
    match state {
        TaskState::Queued(_) => {
            pb.set_message("queued");
            false
        }
        TaskState::Downloading(progress) => {
            if progress.total_bytes_expected_to_write > 0 {
                pb.set_length(progress.total_bytes_expected_to_write);
            }
            pb.set_position(progress.total_bytes_written);
            pb.set_message("");
            false
        }
        TaskState::Suspended(_) => {
            pb.set_message(format!("{} Paused", style("⏸").yellow()));
            false
        }
        TaskState::Completed { .. } => {
            pb.set_message("moving into place");
            false
        }
        TaskState::Finished { .. } => {
            pb.finish_with_message(format!("{} Done", style("✓").green().bold()));
            true
        }
        TaskState::Canceled => {
            pb.abandon_with_message(format!("{} Canceled", style("○").dim()));
            true
        }
        TaskState::Failed(error) => {
            pb.abandon_with_message(format!("{} Failed: {}", style("✗").red().bold(), error));
            true
        }
    }
}

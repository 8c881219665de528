//! CLI command implementations

use crate::output::{self, TaskRow};
use crate::progress::DownloadProgress;
use crate::OutputFormat;
use anyhow::{bail, Context, Result};
use console::style;
use futures::future::join_all;
use pullman_core::{
    Destination, Manager, ManagerConfig, Queue, Request, Task, TaskSnapshot, TaskState,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use url::Url;

/// Arguments of `pullman get`
pub struct GetOptions {
    pub urls: Vec<String>,
    pub dest: Option<PathBuf>,
    pub file_name: Option<String>,
    pub background: bool,
    pub persist: bool,
    pub no_cellular: bool,
    pub wait: bool,
}

// ============================================================================
// Download Commands
// ============================================================================

pub async fn get(config: ManagerConfig, options: GetOptions, format: OutputFormat) -> Result<()> {
    if options.file_name.is_some() && options.urls.len() > 1 {
        bail!("--file-name can only be used with a single URL");
    }

    let mut pending = options
        .urls
        .iter()
        .map(|url| build_request(url, &options))
        .collect::<Result<Queue<_>>>()?;

    let manager = Manager::http(config)?;

    // registering the same URL twice yields the same task
    let mut tasks: Vec<Arc<Task>> = Vec::new();
    while let Some(request) = pending.dequeue() {
        let task = manager.register(request, None);
        if !tasks.iter().any(|known| Arc::ptr_eq(known, &task)) {
            tasks.push(task);
        }
    }
    info!(tasks = tasks.len(), sessions = manager.session_count(), "downloads registered");

    let progress = DownloadProgress::new(format == OutputFormat::Human);
    let watchers: Vec<_> = tasks.iter().map(|task| progress.track(task)).collect();

    let finished = join_all(tasks.iter().map(|task| task.wait_until_terminal()));
    tokio::select! {
        _ = finished => {}
        _ = tokio::signal::ctrl_c() => {
            warn!("interrupted, canceling downloads");
            manager.cancel_all();
        }
    }

    for watcher in watchers {
        let _ = watcher.await;
    }

    let snapshots: Vec<TaskSnapshot> = tasks.iter().map(|task| task.snapshot()).collect();
    print_summary(&snapshots, format)?;

    let unfinished = tasks
        .iter()
        .filter(|task| !matches!(task.state(), TaskState::Finished { .. }))
        .count();
    if unfinished > 0 {
        bail!("{} of {} downloads did not finish", unfinished, tasks.len());
    }

    Ok(())
}

fn build_request(url: &str, options: &GetOptions) -> Result<Request> {
    let source = Url::parse(url).with_context(|| format!("Invalid URL: {}", url))?;

    let directory = match &options.dest {
        Some(dir) => dir.clone(),
        None => std::env::current_dir().context("Cannot determine current directory")?,
    };

    Ok(Request::new(source)
        .with_destination(Destination::new(directory, options.file_name.clone()))
        .with_keep_alive(options.background)
        .with_should_persist(options.persist)
        .with_cellular_access(!options.no_cellular)
        .with_waits_for_connectivity(options.wait))
}

fn print_summary(snapshots: &[TaskSnapshot], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(snapshots)?);
        }
        OutputFormat::Table => {
            use tabled::Table;

            let rows: Vec<TaskRow> = snapshots.iter().map(TaskRow::from).collect();
            println!("{}", Table::new(rows));
        }
        OutputFormat::Human => {
            for snapshot in snapshots {
                match (&snapshot.path, &snapshot.error) {
                    (Some(path), _) => println!(
                        "{} {} ({})",
                        style("✓").green().bold(),
                        style(path.display()).cyan(),
                        output::file_size(path)
                    ),
                    (None, Some(error)) => println!(
                        "{} {}: {}",
                        style("✗").red().bold(),
                        snapshot.source,
                        error
                    ),
                    (None, None) => println!(
                        "{} {}: {}",
                        style("○").dim(),
                        snapshot.source,
                        snapshot.state
                    ),
                }
            }
        }
    }

    Ok(())
}

// ============================================================================
// Config Commands
// ============================================================================

pub fn show_config(config: &ManagerConfig, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(config)?);
        }
        OutputFormat::Human | OutputFormat::Table => {
            println!("{}", style("Configuration").bold());
            println!("  Name:                 {}", config.name);
            println!("  Background session:   {}", config.background_identifier);
            println!("  Discretionary:        {}", config.background_is_discretionary);
            println!("  Scratch directory:    {}", config.scratch_dir.display());
            println!("  User agent:           {}", config.user_agent);
            println!("  Connect timeout:      {}s", config.connect_timeout_secs);
            println!(
                "  Request timeout:      {}",
                output::format_timeout(config.request_timeout_secs)
            );
            println!(
                "  Background timeout:   {}",
                output::format_timeout(config.background_timeout_secs)
            );
        }
    }

    Ok(())
}

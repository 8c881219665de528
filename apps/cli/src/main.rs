//! Pullman CLI - session based downloads from the command line

mod commands;
mod output;
mod progress;

use anyhow::Result;
use clap::{Parser, Subcommand};
use pullman_core::ManagerConfig;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Pullman - resumable download manager
#[derive(Parser)]
#[command(name = "pullman")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file (JSON)
    #[arg(long, env = "PULLMAN_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Directory for in-flight transfers
    #[arg(long, env = "PULLMAN_SCRATCH_DIR", global = true)]
    scratch_dir: Option<PathBuf>,

    /// Output format
    #[arg(long, default_value = "human", global = true)]
    output: OutputFormat,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
enum OutputFormat {
    Human,
    Json,
    Table,
}

#[derive(Subcommand)]
enum Commands {
    /// Download one or more URLs
    Get {
        /// URLs to download
        #[arg(required = true)]
        urls: Vec<String>,

        /// Directory for finished downloads (defaults to the current directory)
        #[arg(short, long)]
        dest: Option<PathBuf>,

        /// File name to save as, single URL only
        #[arg(short = 'O', long)]
        file_name: Option<String>,

        /// Run on the background session
        #[arg(short, long)]
        background: bool,

        /// Use a persisted foreground session
        #[arg(long)]
        persist: bool,

        /// Never use cellular networks
        #[arg(long)]
        no_cellular: bool,

        /// Wait for connectivity instead of failing fast
        #[arg(short, long)]
        wait: bool,
    },

    /// Show the effective configuration
    Config,

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: clap_complete::Shell,
    },
}

fn init_tracing(verbose: bool) {
    let fallback = if verbose {
        "pullman_core=debug,pullman=debug"
    } else {
        "warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut config = match &cli.config {
        Some(path) => ManagerConfig::load(path).await?,
        None => ManagerConfig::named("pullman"),
    };
    if let Some(scratch_dir) = cli.scratch_dir {
        config.scratch_dir = scratch_dir;
    }

    match cli.command {
        Commands::Get {
            urls,
            dest,
            file_name,
            background,
            persist,
            no_cellular,
            wait,
        } => {
            let options = commands::GetOptions {
                urls,
                dest,
                file_name,
                background,
                persist,
                no_cellular,
                wait,
            };
            commands::get(config, options, cli.output).await?
        }

        Commands::Config => commands::show_config(&config, cli.output)?,

        Commands::Completions { shell } => {
            use clap::CommandFactory;
            clap_complete::generate(shell, &mut Cli::command(), "pullman", &mut std::io::stdout());
        }
    }

    Ok(())
}

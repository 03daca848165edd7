//! gangwayd: the Gangway batch scheduler daemon.
//!
//! The `simulate` command loads a cluster manifest into an in-memory cache,
//! runs scheduling cycles with the configured policy and prints where each
//! pending pod was bound, as JSON on stdout. Logs go to stderr.
//!
//! # Usage
//!
//! ```text
//! gangwayd simulate --cluster cluster.toml --config scheduler.toml --cycles 3
//! gangwayd default-config > scheduler.toml
//! ```

mod manifest;
mod simulate;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;

use gangway_plugins::default_registry;
use gangway_scheduler::SchedulerConfig;

use crate::manifest::ClusterManifest;

#[derive(Parser)]
#[command(name = "gangwayd", about = "Gangway batch scheduler")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Dry-run scheduling cycles over a cluster manifest.
    Simulate {
        /// Cluster manifest (TOML).
        #[arg(long)]
        cluster: PathBuf,

        /// Scheduler configuration (TOML). Built-in policy when omitted.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Number of cycles to run.
        #[arg(long, default_value = "1")]
        cycles: u32,

        /// Print per-cycle reports along with the placements.
        #[arg(long)]
        report: bool,
    },
    /// Print the built-in scheduler configuration.
    DefaultConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,gangway=debug")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Simulate {
            cluster,
            config,
            cycles,
            report,
        } => run_simulation(cluster, config, cycles, report).await,
        Command::DefaultConfig => {
            print!("{}", toml::to_string_pretty(&SchedulerConfig::default())?);
            Ok(())
        }
    }
}

async fn run_simulation(
    cluster: PathBuf,
    config: Option<PathBuf>,
    cycles: u32,
    report: bool,
) -> anyhow::Result<()> {
    let manifest = ClusterManifest::from_file(&cluster)?;
    let config = match config {
        Some(path) => SchedulerConfig::from_file(&path)?,
        None => SchedulerConfig::default(),
    };
    config.validate(&default_registry())?;
    info!(
        nodes = manifest.nodes.len(),
        pods = manifest.pods.len(),
        cycles,
        "starting simulation"
    );

    // Ctrl-C stops the run between actions.
    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = cancel_tx.send(true);
        }
    });

    let sim = simulate::simulate(&manifest, config, cycles, cancel_rx).await?;
    let output = if report {
        serde_json::to_string_pretty(&sim)?
    } else {
        serde_json::to_string_pretty(&sim.placements)?
    };
    println!("{output}");
    Ok(())
}

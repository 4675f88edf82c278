mod app;
mod config;
mod input;
mod logging;
mod models;
mod pty;
mod registry;
mod resize;
mod spawn;
mod terminal;
#[cfg(test)]
mod test_utils;
mod tui;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use app::{run_tui, RunOptions};
use models::AgentKind;

#[derive(Parser)]
#[command(name = "termdeck")]
#[command(version)]
#[command(about = "Run shells and AI coding agents side by side in one terminal")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Config file (default: <config dir>/termdeck/config.toml)
    #[arg(short, long, env = "TERMDECK_CONFIG")]
    config: Option<PathBuf>,

    /// Log file (default: <data dir>/termdeck/termdeck.log)
    #[arg(long, env = "TERMDECK_LOG_FILE")]
    log_file: Option<PathBuf>,

    /// Working directory for new terminals
    #[arg(short, long)]
    workdir: Option<PathBuf>,

    /// Start with a plain shell instead of the orchestrator agent
    #[arg(long)]
    no_orchestrator: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// List agent kinds and their start timeouts
    Agents,
    /// Print the default config file location
    ConfigPath,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::ConfigPath) => {
            println!("{}", config::default_config_path().display());
            return Ok(());
        }
        Some(Commands::Agents) => {
            let config = config::load(cli.config.as_deref())?;
            for kind in AgentKind::AGENTS.iter() {
                let (program, args) = config.launch_command(kind);
                println!(
                    "{:<8} {:>4}s  {} {}",
                    kind.name(),
                    config.spawn.timeout_for(kind).as_secs(),
                    program,
                    args.join(" ")
                );
            }
            return Ok(());
        }
        None => {}
    }

    let log_path = cli.log_file.clone().unwrap_or_else(logging::default_log_path);
    logging::init(&log_path)?;

    let config = match config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            tracing::warn!("{:#}; using built-in defaults", e);
            config::Config::default()
        }
    };

    let workdir = match cli.workdir {
        Some(path) if path.is_absolute() => path,
        Some(path) => std::env::current_dir()?.join(path),
        None => std::env::current_dir().context("Failed to read current directory")?,
    };
    if !workdir.is_dir() {
        anyhow::bail!("Working directory {} does not exist", workdir.display());
    }

    run_tui(RunOptions {
        config,
        workdir,
        orchestrator: !cli.no_orchestrator,
    })
    .await
}

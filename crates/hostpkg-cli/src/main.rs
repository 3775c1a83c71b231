use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use clap_complete::Shell;

mod completion;
mod config;
mod dispatch;
mod logging;
mod render;

use config::AgentConfig;
use render::{current_output_style, render_status_line};

#[derive(Parser, Debug)]
#[command(name = "hostpkg")]
#[command(about = "Package lifecycle agent for managed hosts", long_about = None)]
struct Cli {
    /// Configuration file (defaults to <prefix>/config.toml when present).
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Repository root for package state and artifacts.
    #[arg(long, global = true)]
    prefix: Option<PathBuf>,
    /// Base URL of the remote package service.
    #[arg(long, global = true)]
    endpoint: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Install a package, upgrading it when another version is installed.
    Install {
        name: String,
        #[arg(long)]
        version: Option<String>,
        /// Opaque configuration handed to the package installer.
        #[arg(long)]
        configuration: Option<String>,
    },
    /// Upgrade an installed package, rolling back on failure.
    Upgrade {
        name: String,
        #[arg(long)]
        version: Option<String>,
        #[arg(long)]
        configuration: Option<String>,
    },
    Uninstall {
        name: String,
        #[arg(long)]
        version: Option<String>,
    },
    /// Show the recorded install state of a package.
    State { name: String },
    /// Print a shell completion script.
    Completions { shell: Shell },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!(
                "{}",
                render_status_line(current_output_style(), "error", &format!("{err:#}"))
            );
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    let config = AgentConfig::load(cli.config.as_deref(), cli.prefix.as_deref())?
        .with_overrides(cli.prefix.clone(), cli.endpoint.clone());
    logging::init_logging(&config.log_filter);
    dispatch::run_cli(cli, &config)
}

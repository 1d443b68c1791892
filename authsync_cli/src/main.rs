use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use clap_verbosity_flag::InfoLevel;
use directories::ProjectDirs;

use crate::cmd::CmdKeys;
use crate::init_config::CmdConfig;

mod cmd;
mod init_config;

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// config file to use instead of the one in the user config directory
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(flatten)]
    verbosity: clap_verbosity_flag::Verbosity<InfoLevel>,

    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a manager or worker and serve until interrupted
    Start {
        #[arg(value_enum)]
        role: Role,
    },
    /// Exit successfully; used by container health checks
    Healthcheck,
    /// Inspect or modify the config file
    Config {
        #[command(subcommand)]
        cmd: CmdConfig,
    },
    /// Manage keys through a running manager's control endpoint
    Keys {
        #[command(subcommand)]
        cmd: CmdKeys,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Role {
    Manager,
    Worker,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_max_level(cli.verbosity)
        .init();

    // Default location: ~/.config/authsync/authsync.toml
    let config_file = match cli.config {
        Some(path) => path,
        None => ProjectDirs::from("", "", "authsync")
            .context("failed to determine config directory path")?
            .config_dir()
            .join("authsync.toml"),
    };

    cmd::run_command(config_file, cli.cmd).await
}

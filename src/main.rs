use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

mod cmd;

#[derive(Parser)]
#[command(name = "remedy")]
#[command(version, about = "Autonomous incident remediation agent")]
pub struct Cli {
    /// Debug-level diagnostics (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit diagnostics as JSON lines on stderr
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Repository to operate on (defaults to the current directory)
    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run one incident through the remediation pipeline
    Handle {
        /// Incident JSON file, or `-` for stdin
        incident: PathBuf,

        /// Allow unattended merges for low-risk, high-confidence fixes
        #[arg(long)]
        auto_apply: bool,
    },
    /// Show the audit trail
    History {
        /// Only entries for this incident
        #[arg(long)]
        incident: Option<String>,

        /// Print raw JSON lines
        #[arg(long)]
        json: bool,
    },
    /// Return to trunk and delete an agent branch
    Rollback { branch: String },
    /// View or initialize configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show the effective configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
    /// Write a default remedy.toml
    Init,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    remedy::telemetry::init_tracing(cli.verbose, cli.log_json);

    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };
    if let Err(e) = dotenvy::from_path(project_dir.join(".env"))
        && !e.not_found()
    {
        tracing::warn!("ignoring unreadable .env: {}", e);
    }

    match &cli.command {
        Commands::Handle {
            incident,
            auto_apply,
        } => {
            let status = cmd::cmd_handle(&project_dir, incident, *auto_apply).await?;
            if !status.is_success() {
                return Ok(ExitCode::from(2));
            }
        }
        Commands::History { incident, json } => {
            cmd::cmd_history(&project_dir, incident.as_deref(), *json)?
        }
        Commands::Rollback { branch } => cmd::cmd_rollback(&project_dir, branch).await?,
        Commands::Config { command } => cmd::cmd_config(&project_dir, command.clone())?,
    }

    Ok(ExitCode::SUCCESS)
}

//! Configuration view and initialization: `remedy config`.

use anyhow::{Context, Result};
use console::style;
use remedy::config::AgentConfig;
use std::path::Path;

use super::super::ConfigCommands;

pub fn cmd_config(project_dir: &Path, command: Option<ConfigCommands>) -> Result<()> {
    let config_path = AgentConfig::config_path(project_dir);

    match command {
        None | Some(ConfigCommands::Show) => {
            if config_path.exists() {
                println!("# Config file: {}", config_path.display());
            } else {
                println!("# No remedy.toml at {}; showing defaults", config_path.display());
            }
            println!("# Effective values (with env overrides)");
            println!();
            let config = AgentConfig::load_for_project(project_dir)?;
            let rendered = toml::to_string_pretty(&config).context("Failed to render config")?;
            print!("{}", rendered);
        }
        Some(ConfigCommands::Validate) => {
            let config = AgentConfig::load_for_project(project_dir)?;
            let warnings = config.warnings();
            if warnings.is_empty() {
                println!("{}", style("Configuration is valid.").green());
            } else {
                println!("Configuration warnings:");
                for warning in warnings {
                    println!("  - {}", style(warning).yellow());
                }
            }
        }
        Some(ConfigCommands::Init) => {
            if config_path.exists() {
                println!("remedy.toml already exists at {}", config_path.display());
                println!("Delete it first if you want to recreate it.");
                return Ok(());
            }

            AgentConfig::default().save(&config_path)?;
            println!("Created remedy.toml at {}", config_path.display());
            println!();
            println!("Add at least one [[providers]] entry, for example:");
            println!();
            println!("  [[providers]]");
            println!("  name = \"claude\"");
            println!("  command = \"claude --print\"");
        }
    }

    Ok(())
}

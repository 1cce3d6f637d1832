use std::collections::HashMap;

use anyhow::{Context, Result};
use clap::{Args as ClapArgs, Subcommand};

use mcp_gateway::config;
use mcp_gateway::registry::{BackendConfig, BackendRegistry};

use crate::cli::output;

#[derive(ClapArgs)]
pub struct Args {
    #[command(subcommand)]
    pub action: Action,
}

#[derive(Subcommand)]
pub enum Action {
    /// Register a new backend
    Add {
        name: String,
        command: String,
        #[arg(trailing_var_arg = true)]
        args: Vec<String>,
        #[arg(long)]
        auto_activate: bool,
        #[arg(long, default_value = "")]
        description: String,
    },
    /// Remove a registered backend
    Remove { name: String },
    /// List registered backends
    List,
}

pub async fn run(args: Args, config_path: Option<&str>) -> Result<()> {
    let cfg = mcp_gateway::config::GatewayConfig::load(config_path)?;
    let registry_path = config::registry_path(cfg.registry_path.as_ref())?;
    let mut registry = BackendRegistry::load(&registry_path);

    match args.action {
        Action::Add { name, command, args, auto_activate, description } => {
            registry.add(
                &name,
                BackendConfig {
                    command,
                    args,
                    env: HashMap::new(),
                    auto_activate,
                    description,
                    estimated_tokens: 0,
                },
            );
            registry.save().context("saving backend registry")?;
            output::success(&format!("registered backend '{name}'"));
        }
        Action::Remove { name } => {
            if registry.remove(&name).is_some() {
                registry.save().context("saving backend registry")?;
                output::success(&format!("removed backend '{name}'"));
            } else {
                output::warning(&format!("no backend named '{name}'"));
            }
        }
        Action::List => {
            if registry.all().is_empty() {
                output::info("no backends registered");
            }
            for (name, cfg) in registry.all() {
                let auto = if cfg.auto_activate { " (auto-activate)" } else { "" };
                output::info_stdout(&format!("{name}: {}{auto}", cfg.command));
            }
        }
    }
    Ok(())
}

use anyhow::Result;
use clap::{Args as ClapArgs, Subcommand};

use mcp_gateway::clients;

use crate::cli::output;

#[derive(ClapArgs)]
pub struct Args {
    #[command(subcommand)]
    pub action: Action,
}

#[derive(Subcommand)]
pub enum Action {
    /// List detected host clients and their configured servers
    List,
    /// Detect configuration drift across clients and optionally fix it
    Sync {
        /// Actually write the missing entries instead of only reporting drift
        #[arg(long)]
        apply: bool,
    },
}

pub async fn run(args: Args, _config_path: Option<&str>) -> Result<()> {
    match args.action {
        Action::List => {
            let detected = clients::detect_clients();
            if detected.is_empty() {
                output::info("no host clients detected");
            }
            for client in detected {
                output::info_stdout(&format!(
                    "{}: {} servers ({})",
                    client.client_type.display_name(),
                    client.configured_servers.len(),
                    client.config_path.display()
                ));
            }
        }
        Action::Sync { apply } => {
            match clients::sync_configurations(apply) {
                Ok(report) => {
                    output::header(&format!("{} clients detected", report.clients_detected));
                    for entry in &report.drift {
                        let missing: Vec<&str> = entry.missing_from.iter().map(|c| c.display_name()).collect();
                        output::warning(&format!("{}: missing from {}", entry.server_name, missing.join(", ")));
                    }
                    if apply {
                        output::success(&format!("applied {} fixes", report.applied));
                    } else if !report.drift.is_empty() {
                        output::info("run with --apply to synchronize");
                    }
                }
                Err(e) => output::error(&e),
            }
        }
    }
    Ok(())
}

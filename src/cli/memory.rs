use anyhow::Result;
use clap::{Args as ClapArgs, Subcommand};

use mcp_gateway::config;
use mcp_gateway::memory::ConversationalMemory;

use crate::cli::output;

#[derive(ClapArgs)]
pub struct Args {
    #[command(subcommand)]
    pub action: Action,
}

#[derive(Subcommand)]
pub enum Action {
    /// Show derived user preferences and recent installation history
    Show,
}

pub async fn run(args: Args, config_path: Option<&str>) -> Result<()> {
    let cfg = config::GatewayConfig::load(config_path)?;
    let memory_path = config::memory_path(cfg.memory_path.as_ref())?;
    let memory = ConversationalMemory::load(&memory_path);

    match args.action {
        Action::Show => {
            let prefs = memory.get_preferences();
            output::header("derived preferences");
            output::info_stdout(&format!(
                "preferred install method: {}",
                prefs.preferred_install_method.as_deref().unwrap_or("(none yet)")
            ));
            output::info_stdout(&format!("preferred clients: {}", prefs.preferred_clients.join(", ")));
            output::info_stdout(&format!("prefers official: {:?}", prefs.prefers_official));
            for combo in &prefs.common_server_combos {
                output::info_stdout(&format!("combo: {}", combo.join(" + ")));
            }

            output::header("recent installations");
            for record in memory.get_installation_history(None).into_iter().take(10) {
                output::info_stdout(&format!(
                    "{} ({}) at {}: {}",
                    record.server_name,
                    record.option_name,
                    record.installed_at,
                    if record.success { "ok" } else { "failed" }
                ));
            }
        }
    }
    Ok(())
}

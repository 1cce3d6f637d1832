use anyhow::Result;
use clap::Args as ClapArgs;

use mcp_gateway::config;
use mcp_gateway::orchestrator::Orchestrator;
use mcp_gateway::registry::BackendRegistry;
use mcp_gateway::verifier::{HealthStatus, Verifier};

use crate::cli::output;

#[derive(ClapArgs)]
pub struct Args {}

pub async fn run(_args: Args, config_path: Option<&str>) -> Result<()> {
    let cfg = config::GatewayConfig::load(config_path)?;
    let registry_path = config::registry_path(cfg.registry_path.as_ref())?;
    let registry = BackendRegistry::load(&registry_path);

    let backends: Vec<_> = registry
        .all()
        .iter()
        .map(|(name, cfg)| (name.clone(), cfg.command.clone(), cfg.args.clone(), cfg.env.clone()))
        .collect();

    if backends.is_empty() {
        output::info("no backends registered, nothing to check");
        return Ok(());
    }

    let spinner = output::spinner(&format!("checking {} backends", backends.len()));
    let orchestrator = Orchestrator::new();
    let verifier = Verifier::new(&orchestrator);
    let reports = verifier.check_ecosystem_health(&backends).await;
    spinner.finish_and_clear();

    output::header("ecosystem health");
    for report in &reports {
        match report.status {
            HealthStatus::Healthy => output::success(&format!("{}: healthy", report.server_name)),
            HealthStatus::Degraded => output::warning(&format!(
                "{}: degraded{}",
                report.server_name,
                report.suggestion.as_deref().map(|s| format!(" — {s}")).unwrap_or_default()
            )),
            HealthStatus::Unhealthy => output::error(&format!(
                "{}: unhealthy{}",
                report.server_name,
                report.suggestion.as_deref().map(|s| format!(" — {s}")).unwrap_or_default()
            )),
        }
    }

    Ok(())
}

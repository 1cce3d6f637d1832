use anyhow::{Context, Result};
use clap::Args as ClapArgs;

use mcp_gateway::config;
use mcp_gateway::orchestrator::Orchestrator;
use mcp_gateway::registry::BackendRegistry;
use mcp_gateway::verifier::Verifier;

use crate::cli::output;

#[derive(ClapArgs)]
pub struct Args {
    /// Name of a registered backend to verify
    pub name: String,
}

pub async fn run(args: Args, config_path: Option<&str>) -> Result<()> {
    let cfg = config::GatewayConfig::load(config_path)?;
    let registry_path = config::registry_path(cfg.registry_path.as_ref())?;
    let registry = BackendRegistry::load(&registry_path);

    let backend = registry
        .get(&args.name)
        .with_context(|| format!("no backend named '{}'", args.name))?;

    let spinner = output::spinner(&format!("verifying {}", args.name));
    let orchestrator = Orchestrator::new();
    let verifier = Verifier::new(&orchestrator);
    let result = verifier
        .verify_server(&args.name, &backend.command, &backend.args, &backend.env)
        .await;
    spinner.finish_and_clear();

    output::header(&format!("verification: {}", args.name));
    output::info_stdout(&format!("verdict: {:?}", result.verdict));
    output::info_stdout(&format!("process started: {}", result.process_started));
    output::info_stdout(&format!("handshake completed: {}", result.mcp_handshake));
    output::info_stdout(&format!("tools discovered: {}", result.tools_discovered.join(", ")));
    if let Some(smoke) = &result.smoke_test {
        output::info_stdout(&format!(
            "smoke test: {} ({}ms, status={})",
            smoke.tool_name, smoke.latency_ms, smoke.status
        ));
    }
    for err in &result.errors {
        output::error(err);
    }

    Ok(())
}

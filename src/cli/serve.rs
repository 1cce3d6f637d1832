use anyhow::{Context, Result};
use clap::Args as ClapArgs;
use rmcp::transport::io::stdio;
use rmcp::ServiceExt;

use mcp_gateway::config::{self, GatewayConfig};
use mcp_gateway::gateway::GatewayServer;
use mcp_gateway::memory::ConversationalMemory;
use mcp_gateway::orchestrator::Orchestrator;
use mcp_gateway::registry::BackendRegistry;

use crate::cli::output;

#[derive(ClapArgs)]
pub struct Args {}

pub async fn run(_args: Args, config_path: Option<&str>) -> Result<()> {
    let cfg = GatewayConfig::load(config_path).context("loading gateway configuration")?;
    let registry_path = config::registry_path(cfg.registry_path.as_ref())?;
    let memory_path = config::memory_path(cfg.memory_path.as_ref())?;

    let registry = BackendRegistry::load(&registry_path);
    let memory = ConversationalMemory::load(&memory_path);
    let orchestrator = Orchestrator::new();

    output::info("starting gateway");
    let server = GatewayServer::new(orchestrator, registry, memory);
    server.auto_activate().await;

    let service = server
        .serve(stdio())
        .await
        .context("starting MCP stdio transport")?;

    service.waiting().await.context("gateway service loop")?;
    Ok(())
}

//! Gateway Engine: the MCP server surface exposed to the host client.
//!
//! A fixed set of control tools (`activate_backend`, `deactivate_backend`,
//! `list_backends`, `context_budget`, `register_backend`) is always
//! available. Activating a backend adds its tools to the list under a
//! `{backend}_{tool}` name and proxies calls through to the live process.

use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::Arc;

use rmcp::model::{
    CallToolRequestParam, CallToolResult, Content, ErrorData, Implementation, ListToolsResult,
    PaginatedRequestParam, ServerCapabilities, ServerInfo, Tool as RmcpTool, ToolsCapability,
};
use rmcp::service::{Peer, RequestContext, RoleServer};
use rmcp::ServerHandler;
use serde_json::{json, Value};
use tokio::sync::RwLock;

use crate::memory::ConversationalMemory;
use crate::orchestrator::{DiscoveredTool, Orchestrator};
use crate::registry::BackendRegistry;

const SERVER_NAME: &str = "mcp-gateway";
const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");
const SERVER_INSTRUCTIONS: &str =
    "Meta-manager for MCP backend servers. Use activate_backend to bring a backend's tools \
     into this session, list_backends to see what's configured, and context_budget to check \
     token cost before activating more.";

/// Estimated tokens per tool definition in the host's system prompt.
const TOKENS_PER_TOOL_ESTIMATE: u32 = 60;

#[derive(Clone)]
struct ProxyToolEntry {
    backend: String,
    tool: DiscoveredTool,
}

/// One backend that has been activated into the current session.
struct ActiveBackend {
    tool_names: Vec<String>,
}

pub struct GatewayServer {
    orchestrator: Arc<Orchestrator>,
    registry: RwLock<BackendRegistry>,
    memory: Arc<ConversationalMemory>,
    active: RwLock<HashMap<String, ActiveBackend>>,
    proxy_tools: RwLock<HashMap<String, ProxyToolEntry>>,
    peer: RwLock<Option<Peer<RoleServer>>>,
}

impl GatewayServer {
    pub fn new(orchestrator: Orchestrator, registry: BackendRegistry, memory: ConversationalMemory) -> Self {
        Self {
            orchestrator: Arc::new(orchestrator),
            registry: RwLock::new(registry),
            memory: Arc::new(memory),
            active: RwLock::new(HashMap::new()),
            proxy_tools: RwLock::new(HashMap::new()),
            peer: RwLock::new(None),
        }
    }

    /// Activate every backend registered with `auto_activate = true`.
    pub async fn auto_activate(&self) {
        let names = self.registry.read().await.auto_activate_list();
        for name in names {
            if let Err(e) = self.activate_backend(&name).await {
                tracing::warn!(backend = %name, error = %e, "auto-activation failed");
            }
        }
    }

    fn control_tools() -> Vec<RmcpTool> {
        let empty_schema = Arc::new(serde_json::Map::new());
        let named_schema = |param: &str| {
            let mut props = serde_json::Map::new();
            props.insert(param.to_string(), json!({"type": "string"}));
            let mut schema = serde_json::Map::new();
            schema.insert("type".into(), json!("object"));
            schema.insert("properties".into(), Value::Object(props));
            schema.insert("required".into(), json!([param]));
            Arc::new(schema)
        };
        let register_schema = {
            let mut schema = serde_json::Map::new();
            schema.insert("type".into(), json!("object"));
            schema.insert(
                "properties".into(),
                json!({
                    "server_name": {"type": "string"},
                    "command": {"type": "string"},
                    "args": {"type": "array", "items": {"type": "string"}},
                    "env": {"type": "object"},
                    "auto_activate": {"type": "boolean"},
                    "description": {"type": "string"},
                }),
            );
            schema.insert("required".into(), json!(["server_name", "command"]));
            Arc::new(schema)
        };

        vec![
            RmcpTool {
                name: Cow::Borrowed("activate_backend"),
                title: None,
                description: Some(Cow::Borrowed("Activate a configured backend and expose its tools")),
                input_schema: named_schema("server_name"),
                output_schema: None,
                annotations: None,
                icons: None,
                execution: None,
                meta: None,
            },
            RmcpTool {
                name: Cow::Borrowed("deactivate_backend"),
                title: None,
                description: Some(Cow::Borrowed("Deactivate a backend and remove its tools")),
                input_schema: named_schema("server_name"),
                output_schema: None,
                annotations: None,
                icons: None,
                execution: None,
                meta: None,
            },
            RmcpTool {
                name: Cow::Borrowed("list_backends"),
                title: None,
                description: Some(Cow::Borrowed("List configured backends and their activation state")),
                input_schema: empty_schema.clone(),
                output_schema: None,
                annotations: None,
                icons: None,
                execution: None,
                meta: None,
            },
            RmcpTool {
                name: Cow::Borrowed("context_budget"),
                title: None,
                description: Some(Cow::Borrowed("Report estimated token cost of active backends")),
                input_schema: empty_schema,
                output_schema: None,
                annotations: None,
                icons: None,
                execution: None,
                meta: None,
            },
            RmcpTool {
                name: Cow::Borrowed("register_backend"),
                title: None,
                description: Some(Cow::Borrowed("Register a new backend launch configuration")),
                input_schema: register_schema,
                output_schema: None,
                annotations: None,
                icons: None,
                execution: None,
                meta: None,
            },
        ]
    }

    async fn notify_tools_changed(&self) {
        if let Some(peer) = self.peer.read().await.as_ref() {
            if let Err(e) = peer.notify_tool_list_changed().await {
                tracing::debug!(error = %e, "failed to send tools/list_changed notification");
            }
        }
    }

    async fn activate_backend(&self, name: &str) -> Result<String, ErrorData> {
        if self.active.read().await.contains_key(name) {
            return Ok(format!("backend '{name}' is already active"));
        }

        let config = {
            let registry = self.registry.read().await;
            registry
                .get(name)
                .cloned()
                .ok_or_else(|| ErrorData::invalid_params(format!("unknown backend: {name}"), None))?
        };

        self.orchestrator
            .start_server(name, &config.command, &config.args, &config.env)
            .await
            .map_err(|e| ErrorData::internal_error(e.to_string(), None))?;
        self.orchestrator
            .handshake(name)
            .await
            .map_err(|e| ErrorData::internal_error(e.to_string(), None))?;

        let discovered = self
            .orchestrator
            .list_tools(name)
            .await
            .map_err(|e| ErrorData::internal_error(e.to_string(), None))?;

        let mut tool_names = Vec::with_capacity(discovered.tools.len());
        {
            let mut proxy_tools = self.proxy_tools.write().await;
            for tool in discovered.tools {
                let exposed = format!("{name}_{}", tool.name);
                tool_names.push(exposed.clone());
                proxy_tools.insert(
                    exposed,
                    ProxyToolEntry {
                        backend: name.to_string(),
                        tool,
                    },
                );
            }
        }

        let tool_count = tool_names.len();
        self.active.write().await.insert(name.to_string(), ActiveBackend { tool_names });

        self.memory.record_installation(name, "activate", true, None, vec![]);
        self.notify_tools_changed().await;

        Ok(format!("activated '{name}': {tool_count} tools now available"))
    }

    async fn deactivate_backend(&self, name: &str) -> Result<String, ErrorData> {
        let Some(active) = self.active.write().await.remove(name) else {
            return Ok(format!("backend '{name}' is not active"));
        };

        {
            let mut proxy_tools = self.proxy_tools.write().await;
            for tool_name in &active.tool_names {
                proxy_tools.remove(tool_name);
            }
        }

        if let Err(e) = self.orchestrator.stop_server(name).await {
            tracing::warn!(backend = %name, error = %e, "stop_server failed during deactivation");
        }

        self.notify_tools_changed().await;
        Ok(format!("deactivated '{name}'"))
    }

    async fn list_backends_report(&self) -> String {
        let registry = self.registry.read().await;
        let active = self.active.read().await;
        let all_backends = registry.all();

        if all_backends.is_empty() {
            return "# Configured backends\n\nNo backends registered. Use `register_backend` to add one.".to_string();
        }

        let mut names: Vec<&String> = all_backends.keys().collect();
        names.sort();

        let mut lines = vec!["# Configured backends\n".to_string()];
        for name in names {
            let config = &all_backends[name];
            let backend = active.get(name);
            let status = if backend.is_some() { "ACTIVE" } else { "inactive" };
            let auto = if config.auto_activate { " [auto]" } else { "" };
            let (tool_count, tokens) = match backend {
                Some(b) => (b.tool_names.len().to_string(), b.tool_names.len() as u32 * TOKENS_PER_TOOL_ESTIMATE),
                None => ("?".to_string(), config.estimated_tokens),
            };
            let desc = if config.description.is_empty() { String::new() } else { format!(" — {}", config.description) };
            lines.push(format!("- **{name}** [{status}]{auto}: {tool_count} tools, ~{tokens} tokens{desc}"));
        }

        lines.push(String::new());
        lines.push(format!(
            "**Active**: {} | **Total registered**: {}",
            active.len(),
            all_backends.len()
        ));
        lines.join("\n")
    }

    async fn context_budget_report(&self) -> String {
        let active = self.active.read().await;
        let registry = self.registry.read().await;

        let gateway_tool_count = Self::control_tools().len();
        let proxy_tool_count: usize = active.values().map(|a| a.tool_names.len()).sum();
        let total_tools = gateway_tool_count + proxy_tool_count;
        let estimated_tokens = total_tools as u32 * TOKENS_PER_TOOL_ESTIMATE;

        let mut lines = vec![
            "# Context budget\n".to_string(),
            format!("- **Gateway tools** (always loaded): {gateway_tool_count}"),
            format!("- **Proxied backend tools**: {proxy_tool_count}"),
            format!("- **Total tools**: {total_tools}"),
            format!("- **Estimated token overhead**: ~{estimated_tokens} tokens"),
            String::new(),
            "## Active backends".to_string(),
        ];

        if active.is_empty() {
            lines.push("  (none)".to_string());
        } else {
            let mut names: Vec<&String> = active.keys().collect();
            names.sort();
            for name in names {
                let tc = active[name].tool_names.len();
                lines.push(format!("  - {name}: {tc} tools (~{} tokens)", tc as u32 * TOKENS_PER_TOOL_ESTIMATE));
            }
        }
        lines.push(String::new());

        let full_mode_tokens: u32 = registry.all().values().map(|c| c.estimated_tokens).sum();
        let savings = full_mode_tokens.saturating_sub(estimated_tokens);
        if full_mode_tokens > 0 {
            let pct = (savings as f64 / full_mode_tokens as f64 * 100.0) as u32;
            lines.push(format!("**Savings vs all-loaded**: ~{savings} tokens ({pct}% reduction)"));
        }

        lines.join("\n")
    }

    async fn register_backend_from_args(&self, arguments: &Value) -> Result<String, ErrorData> {
        let name = arguments
            .get("server_name")
            .and_then(Value::as_str)
            .ok_or_else(|| ErrorData::invalid_params("server_name is required", None))?;
        let command = arguments
            .get("command")
            .and_then(Value::as_str)
            .ok_or_else(|| ErrorData::invalid_params("command is required", None))?;
        let args: Vec<String> = arguments
            .get("args")
            .and_then(Value::as_array)
            .map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
            .unwrap_or_default();
        let env: HashMap<String, String> = arguments
            .get("env")
            .and_then(Value::as_object)
            .map(|m| {
                m.iter()
                    .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                    .collect()
            })
            .unwrap_or_default();
        let auto_activate = arguments.get("auto_activate").and_then(Value::as_bool).unwrap_or(false);
        let description = arguments
            .get("description")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let config = crate::registry::BackendConfig {
            command: command.to_string(),
            args,
            env,
            auto_activate,
            description,
            estimated_tokens: 0,
        };

        let mut registry = self.registry.write().await;
        registry.add(name, config);
        registry
            .save()
            .map_err(|e| ErrorData::internal_error(e.to_string(), None))?;

        Ok(format!("registered backend '{name}'"))
    }

    async fn dispatch_proxy_call(&self, tool_name: &str, arguments: Value) -> Result<CallToolResult, ErrorData> {
        let entry = {
            let proxy_tools = self.proxy_tools.read().await;
            proxy_tools
                .get(tool_name)
                .map(|e| (e.backend.clone(), e.tool.name.clone()))
                .ok_or_else(|| ErrorData::invalid_request(format!("unknown tool: {tool_name}"), None))?
        };

        let output = self
            .orchestrator
            .forward_tool_call(&entry.0, &entry.1, arguments, None)
            .await
            .map_err(|e| ErrorData::internal_error(e.to_string(), None))?;

        Ok(CallToolResult {
            content: vec![Content::text(render_output(&output))],
            is_error: Some(false),
            structured_content: None,
            meta: None,
        })
    }
}

fn render_output(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => serde_json::to_string(other).unwrap_or_default(),
    }
}

impl ServerHandler for GatewayServer {
    async fn initialize(
        &self,
        _request: rmcp::model::InitializeRequestParam,
        context: RequestContext<RoleServer>,
    ) -> Result<rmcp::model::InitializeResult, ErrorData> {
        *self.peer.write().await = Some(context.peer.clone());
        Ok(rmcp::model::InitializeResult {
            protocol_version: Default::default(),
            capabilities: self.get_info().capabilities,
            server_info: Implementation {
                name: SERVER_NAME.to_string(),
                title: None,
                version: SERVER_VERSION.to_string(),
                description: None,
                icons: None,
                website_url: None,
            },
            instructions: Some(SERVER_INSTRUCTIONS.to_string()),
        })
    }

    async fn list_tools(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, ErrorData> {
        let mut tools = Self::control_tools();
        let proxy_tools = self.proxy_tools.read().await;
        for entry in proxy_tools.values() {
            tools.push(RmcpTool {
                name: Cow::Owned(format!("{}_{}", entry.backend, entry.tool.name)),
                title: None,
                description: Some(Cow::Owned(entry.tool.description.clone())),
                input_schema: match &entry.tool.parameters_schema {
                    Value::Object(m) => Arc::new(m.clone()),
                    _ => Arc::new(serde_json::Map::new()),
                },
                output_schema: None,
                annotations: None,
                icons: None,
                execution: None,
                meta: None,
            });
        }
        Ok(ListToolsResult {
            tools,
            next_cursor: None,
            meta: None,
        })
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParam,
        _context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, ErrorData> {
        let arguments = request.arguments.map(Value::Object).unwrap_or_else(|| json!({}));

        match request.name.as_ref() {
            "activate_backend" => {
                let name = arguments
                    .get("server_name")
                    .and_then(Value::as_str)
                    .ok_or_else(|| ErrorData::invalid_params("server_name is required", None))?;
                let message = self.activate_backend(name).await?;
                Ok(CallToolResult { content: vec![Content::text(message)], is_error: Some(false), structured_content: None, meta: None })
            }
            "deactivate_backend" => {
                let name = arguments
                    .get("server_name")
                    .and_then(Value::as_str)
                    .ok_or_else(|| ErrorData::invalid_params("server_name is required", None))?;
                let message = self.deactivate_backend(name).await?;
                Ok(CallToolResult { content: vec![Content::text(message)], is_error: Some(false), structured_content: None, meta: None })
            }
            "list_backends" => {
                let report = self.list_backends_report().await;
                Ok(CallToolResult { content: vec![Content::text(report)], is_error: Some(false), structured_content: None, meta: None })
            }
            "context_budget" => {
                let report = self.context_budget_report().await;
                Ok(CallToolResult { content: vec![Content::text(report)], is_error: Some(false), structured_content: None, meta: None })
            }
            "register_backend" => {
                let message = self.register_backend_from_args(&arguments).await?;
                Ok(CallToolResult { content: vec![Content::text(message)], is_error: Some(false), structured_content: None, meta: None })
            }
            other => self.dispatch_proxy_call(other, arguments).await,
        }
    }

    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: Default::default(),
            capabilities: ServerCapabilities {
                tools: Some(ToolsCapability { list_changed: Some(true) }),
                ..Default::default()
            },
            server_info: Implementation {
                name: SERVER_NAME.to_string(),
                title: None,
                version: SERVER_VERSION.to_string(),
                description: None,
                icons: None,
                website_url: None,
            },
            instructions: Some(SERVER_INSTRUCTIONS.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::ConversationalMemory;
    use crate::registry::BackendRegistry;
    use tempfile::tempdir;

    fn server() -> (tempfile::TempDir, GatewayServer) {
        let dir = tempdir().unwrap();
        let registry = BackendRegistry::load(dir.path().join("backends.json"));
        let memory = ConversationalMemory::load(dir.path().join("memory.json"));
        (dir, GatewayServer::new(Orchestrator::new(), registry, memory))
    }

    #[tokio::test]
    async fn activating_unknown_backend_errors() {
        let (_dir, server) = server();
        let result = server.activate_backend("ghost").await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn deactivating_inactive_backend_is_a_no_op_message() {
        let (_dir, server) = server();
        let message = server.deactivate_backend("ghost").await.unwrap();
        assert!(message.contains("not active"));
    }

    #[tokio::test]
    async fn register_backend_persists_to_registry() {
        let (_dir, server) = server();
        let args = json!({"server_name": "echo", "command": "echo", "args": ["hi"]});
        let message = server.register_backend_from_args(&args).await.unwrap();
        assert!(message.contains("echo"));
        assert!(server.registry.read().await.get("echo").is_some());
    }

    #[tokio::test]
    async fn context_budget_report_counts_only_gateway_tools_with_no_active_backends() {
        let (_dir, server) = server();
        let report = server.context_budget_report().await;
        assert!(report.contains("Proxied backend tools**: 0"));
        assert!(report.contains("(none)"));
    }

    #[tokio::test]
    async fn list_backends_report_shows_none_registered_when_empty() {
        let (_dir, server) = server();
        let report = server.list_backends_report().await;
        assert!(report.contains("No backends registered"));
    }
}

//! Verification engine: spins up a backend in isolation, runs the MCP
//! handshake, discovers tools, smoke-tests one, and classifies the result.
//! Also holds the self-heal remediation table and the bounded-concurrency
//! ecosystem health sweep.

use std::collections::HashMap;
use std::time::Instant;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::Semaphore;

use crate::orchestrator::{DiscoveredTool, Orchestrator};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    FullyOperational,
    PartiallyWorking,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct SmokeTestResult {
    pub tool_name: String,
    pub status: String, // ok | error
    pub latency_ms: u64,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct VerificationResult {
    pub server_name: String,
    pub process_started: bool,
    pub mcp_handshake: bool,
    pub tools_discovered: Vec<String>,
    pub smoke_test: Option<SmokeTestResult>,
    pub errors: Vec<String>,
    pub verdict: Verdict,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub server_name: String,
    pub status: HealthStatus,
    pub suggestion: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixCategory {
    MissingBinary,
    MissingNodeModule,
    MissingBrowser,
    Permission,
    PortConflict,
    MissingCredentials,
    Timeout,
    ConnectionRefused,
    Unknown,
}

struct RemediationEntry {
    patterns: &'static [&'static str],
    category: FixCategory,
    suggestion: &'static str,
}

/// Ordered, case-insensitive substring match, first entry wins. Mirrors
/// `original_source/verification.py`'s `_REMEDIATION_MAP`.
const REMEDIATION_MAP: &[RemediationEntry] = &[
    RemediationEntry {
        patterns: &["enoent", "not found", "no such file"],
        category: FixCategory::MissingBinary,
        suggestion: "Install the missing command and ensure it's on PATH.",
    },
    RemediationEntry {
        patterns: &["eacces", "permission denied"],
        category: FixCategory::Permission,
        suggestion: "Check file permissions, or run `chmod +x` on the target binary.",
    },
    RemediationEntry {
        patterns: &["cannot find module", "module_not_found"],
        category: FixCategory::MissingNodeModule,
        suggestion: "Run `npm install -g <package>` to install the missing module.",
    },
    RemediationEntry {
        patterns: &["chromium", "browser", "puppeteer"],
        category: FixCategory::MissingBrowser,
        suggestion: "Run `npx puppeteer install chromium` to install a browser.",
    },
    RemediationEntry {
        patterns: &["eaddrinuse", "address already in use"],
        category: FixCategory::PortConflict,
        suggestion: "Another process is using the required port; stop it or reconfigure.",
    },
    RemediationEntry {
        patterns: &["api key", "unauthorized", "401"],
        category: FixCategory::MissingCredentials,
        suggestion: "Set the required API key or credential in the backend's environment.",
    },
    RemediationEntry {
        patterns: &["etimedout", "timeout"],
        category: FixCategory::Timeout,
        suggestion: "The backend took too long to respond; check its startup dependencies.",
    },
    RemediationEntry {
        patterns: &["econnrefused", "connection refused"],
        category: FixCategory::ConnectionRefused,
        suggestion: "The backend refused the connection; verify it is listening as expected.",
    },
];

fn categorize(message: &str) -> (FixCategory, Option<&'static str>) {
    let lower = message.to_lowercase();
    for entry in REMEDIATION_MAP {
        if entry.patterns.iter().any(|p| lower.contains(p)) {
            return (entry.category, Some(entry.suggestion));
        }
    }
    (FixCategory::Unknown, None)
}

/// Pick the best tool to smoke-test: a zero-required-params tool first, then
/// a tool with at most 2 required params that are all strings, else the
/// first tool.
fn pick_simple_tool(tools: &[DiscoveredTool]) -> Option<&DiscoveredTool> {
    if tools.is_empty() {
        return None;
    }

    let required_of = |t: &DiscoveredTool| -> Vec<String> {
        t.parameters_schema
            .get("required")
            .and_then(Value::as_array)
            .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
            .unwrap_or_default()
    };

    if let Some(t) = tools.iter().find(|t| required_of(t).is_empty()) {
        return Some(t);
    }

    let is_simple_string = |t: &DiscoveredTool| -> bool {
        let required = required_of(t);
        if required.is_empty() || required.len() > 2 {
            return false;
        }
        let properties = t.parameters_schema.get("properties");
        required.iter().all(|name| {
            properties
                .and_then(|p| p.get(name))
                .and_then(|p| p.get("type"))
                .and_then(Value::as_str)
                == Some("string")
        })
    };

    if let Some(t) = tools.iter().find(|t| is_simple_string(t)) {
        return Some(t);
    }

    tools.first()
}

/// Build a minimal JSON input satisfying a tool's required parameters, one
/// placeholder value per JSON Schema type.
fn build_test_input(tool: &DiscoveredTool) -> Value {
    let required: Vec<String> = tool
        .parameters_schema
        .get("required")
        .and_then(Value::as_array)
        .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
        .unwrap_or_default();

    let properties = tool.parameters_schema.get("properties");
    let mut input = serde_json::Map::new();
    for name in &required {
        let ty = properties
            .and_then(|p| p.get(name))
            .and_then(|p| p.get("type"))
            .and_then(Value::as_str)
            .unwrap_or("string");
        let value = match ty {
            "string" => Value::String("test".into()),
            "integer" => Value::from(1),
            "number" => Value::from(1.0),
            "boolean" => Value::Bool(true),
            "array" => Value::Array(vec![]),
            "object" => Value::Object(serde_json::Map::new()),
            _ => Value::String("test".into()),
        };
        input.insert(name.clone(), value);
    }
    Value::Object(input)
}

pub struct Verifier<'a> {
    orchestrator: &'a Orchestrator,
}

impl<'a> Verifier<'a> {
    pub fn new(orchestrator: &'a Orchestrator) -> Self {
        Self { orchestrator }
    }

    /// Spin up `name` in isolation, handshake, discover tools, smoke-test
    /// one, then tear it down regardless of outcome.
    pub async fn verify_server(
        &self,
        name: &str,
        command: &str,
        args: &[String],
        env: &HashMap<String, String>,
    ) -> VerificationResult {
        let mut errors = Vec::new();

        let start_result = self.orchestrator.start_server(name, command, args, env).await;
        let process_started = start_result.is_ok();
        if let Err(e) = &start_result {
            errors.push(e.to_string());
            return Self::build_result(name, false, false, Vec::new(), None, errors);
        }

        let handshake_result = self.orchestrator.handshake(name).await;
        let mcp_handshake = handshake_result.is_ok();
        if let Err(e) = &handshake_result {
            errors.push(e.to_string());
        }

        let mut tools_discovered = Vec::new();
        let mut smoke_test = None;

        if mcp_handshake {
            match self.orchestrator.list_tools(name).await {
                Ok(result) => {
                    tools_discovered = result.tools.iter().map(|t| t.name.clone()).collect();
                    if let Some(tool) = pick_simple_tool(&result.tools) {
                        smoke_test = Some(self.smoke_test_tool(name, tool).await);
                    }
                }
                Err(e) => errors.push(e.to_string()),
            }
        }

        let _ = self.orchestrator.stop_server(name).await;

        Self::build_result(
            name,
            process_started,
            mcp_handshake,
            tools_discovered,
            smoke_test,
            errors,
        )
    }

    async fn smoke_test_tool(&self, backend: &str, tool: &DiscoveredTool) -> SmokeTestResult {
        let input = build_test_input(tool);
        let start = Instant::now();
        match self
            .orchestrator
            .forward_tool_call(backend, &tool.name, input, Some(15))
            .await
        {
            Ok(_) => SmokeTestResult {
                tool_name: tool.name.clone(),
                status: "ok".into(),
                latency_ms: start.elapsed().as_millis() as u64,
                error: None,
            },
            Err(e) => SmokeTestResult {
                tool_name: tool.name.clone(),
                status: "error".into(),
                latency_ms: start.elapsed().as_millis() as u64,
                error: Some(e.to_string()),
            },
        }
    }

    fn build_result(
        name: &str,
        process_started: bool,
        mcp_handshake: bool,
        tools_discovered: Vec<String>,
        smoke_test: Option<SmokeTestResult>,
        errors: Vec<String>,
    ) -> VerificationResult {
        let verdict = if !process_started {
            Verdict::Failed
        } else if !mcp_handshake {
            Verdict::Failed
        } else if !errors.is_empty() && tools_discovered.is_empty() {
            Verdict::Failed
        } else if !errors.is_empty() && !tools_discovered.is_empty() {
            Verdict::PartiallyWorking
        } else if matches!(&smoke_test, Some(s) if s.status != "ok") {
            Verdict::PartiallyWorking
        } else {
            Verdict::FullyOperational
        };

        VerificationResult {
            server_name: name.to_string(),
            process_started,
            mcp_handshake,
            tools_discovered,
            smoke_test,
            errors,
            verdict,
        }
    }

    /// Map a verification verdict and its errors onto a health status plus a
    /// remediation suggestion when unhealthy or degraded.
    pub fn self_heal(result: &VerificationResult) -> HealthReport {
        let status = match result.verdict {
            Verdict::FullyOperational => HealthStatus::Healthy,
            Verdict::PartiallyWorking => HealthStatus::Degraded,
            Verdict::Failed => HealthStatus::Unhealthy,
        };

        let suggestion = if status == HealthStatus::Healthy {
            None
        } else {
            result
                .errors
                .first()
                .and_then(|msg| categorize(msg).1)
                .map(str::to_string)
        };

        HealthReport {
            server_name: result.server_name.clone(),
            status,
            suggestion,
        }
    }

    /// Verify every backend in `backends` concurrently, bounded to 4 at a
    /// time, matching `asyncio.Semaphore(4)` in the source.
    pub async fn check_ecosystem_health(
        &self,
        backends: &[(String, String, Vec<String>, HashMap<String, String>)],
    ) -> Vec<HealthReport> {
        let semaphore = Semaphore::new(4);
        let mut reports = Vec::with_capacity(backends.len());

        let futures = backends.iter().map(|(name, command, args, env)| {
            let semaphore = &semaphore;
            async move {
                let _permit = semaphore.acquire().await.expect("semaphore not closed");
                let result = self.verify_server(name, command, args, env).await;
                Self::self_heal(&result)
            }
        });

        for report in futures::future::join_all(futures).await {
            reports.push(report);
        }
        reports
    }
}

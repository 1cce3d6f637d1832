//! Process Orchestrator: owns backend MCP server subprocesses, performs the
//! MCP handshake, discovers tools, forwards tool calls, and runs workflows.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::time::timeout;

use crate::error::{GatewayError, GatewayResult};
use crate::protocol;

const SPAWN_TIMEOUT: Duration = Duration::from_secs(10);
const HANDSHAKE_TIMEOUT_SECS: u64 = 15;
const TOOLS_LIST_TIMEOUT_SECS: u64 = 15;
const PROMPTS_LIST_TIMEOUT_SECS: u64 = 5;
const DEFAULT_CALL_TIMEOUT_SECS: u64 = 30;
const TERM_GRACE: Duration = Duration::from_secs(5);
const KILL_GRACE: Duration = Duration::from_secs(5);

/// Resolve `${VAR_NAME}` references in a backend's configured env values
/// against the process environment, same as `mcp/mod.rs`'s client-config
/// resolver. A reference whose variable is not set is left as-is so the
/// backend's own error surfaces what's missing, rather than silently
/// starting with an empty value.
fn resolve_env(env: &HashMap<String, String>) -> HashMap<String, String> {
    let re = regex::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").expect("valid regex");
    env.iter()
        .map(|(k, v)| {
            let resolved = re.replace_all(v, |caps: &regex::Captures| {
                let var_name = &caps[1];
                std::env::var(var_name).unwrap_or_else(|_| caps[0].to_string())
            });
            (k.clone(), resolved.to_string())
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendStatus {
    Running,
    Stopped,
    Error,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct RunningBackend {
    pub name: String,
    pub pid: u32,
    pub status: BackendStatus,
    #[serde(skip)]
    pub started_at: Instant,
    pub command: String,
    #[serde(skip)]
    pub args: Vec<String>,
    #[serde(skip)]
    pub env: HashMap<String, String>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct DiscoveredTool {
    pub name: String,
    pub description: String,
    #[serde(rename = "inputSchema")]
    pub parameters_schema: Value,
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct ServerToolsResult {
    pub tools: Vec<DiscoveredTool>,
    pub prompts: Vec<Value>,
}

struct PendingRequests {
    next_id: AtomicU64,
    waiters: Mutex<HashMap<u64, oneshot::Sender<Value>>>,
}

impl PendingRequests {
    fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            waiters: Mutex::new(HashMap::new()),
        }
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    async fn register(&self, id: u64) -> oneshot::Receiver<Value> {
        let (tx, rx) = oneshot::channel();
        self.waiters.lock().await.insert(id, tx);
        rx
    }

    async fn resolve(&self, id: u64, value: Value) {
        if let Some(tx) = self.waiters.lock().await.remove(&id) {
            let _ = tx.send(value);
        }
    }
}

/// A live backend: the child process, a request-writer queue, and a reader
/// task that demultiplexes responses by id. Owned exclusively by the
/// Orchestrator; never shared across tasks.
struct BackendHandle {
    running: RunningBackend,
    child: Child,
    write_tx: mpsc::UnboundedSender<Value>,
    pending: Arc<PendingRequests>,
    reader_task: tokio::task::JoinHandle<()>,
    writer_task: tokio::task::JoinHandle<()>,
}

/// Owns all running backend subprocesses and drives the MCP protocol over
/// their stdio.
pub struct Orchestrator {
    backends: Mutex<HashMap<String, BackendHandle>>,
}

impl Default for Orchestrator {
    fn default() -> Self {
        Self::new()
    }
}

impl Orchestrator {
    pub fn new() -> Self {
        Self {
            backends: Mutex::new(HashMap::new()),
        }
    }

    fn build_command(command: &str, args: &[String], env: &HashMap<String, String>) -> Command {
        let mut cmd = Command::new(command);
        cmd.args(args)
            .envs(resolve_env(env))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        // Create a new process group on Unix so the whole tree can be killed
        // with killpg on shutdown.
        #[cfg(unix)]
        unsafe {
            cmd.pre_exec(|| {
                if libc::setpgid(0, 0) != 0 {
                    return Err(std::io::Error::last_os_error());
                }
                Ok(())
            });
        }
        cmd
    }

    fn spawn_managed(
        name: &str,
        command: &str,
        args: &[String],
        env: &HashMap<String, String>,
    ) -> GatewayResult<Child> {
        let mut cmd = Self::build_command(command, args, env);
        cmd.spawn().map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => GatewayError::CommandNotFound {
                command: command.to_string(),
            },
            std::io::ErrorKind::PermissionDenied => GatewayError::PermissionDenied {
                command: command.to_string(),
            },
            _ => {
                tracing::warn!(backend = name, error = %e, "unexpected spawn error");
                GatewayError::CommandNotFound {
                    command: command.to_string(),
                }
            }
        })
    }

    /// Spawn a backend and wire up its writer/reader tasks. Does not perform
    /// the MCP handshake.
    async fn spawn_backend(
        name: &str,
        command: &str,
        args: &[String],
        env: &HashMap<String, String>,
    ) -> GatewayResult<BackendHandle> {
        let spawn_result = timeout(SPAWN_TIMEOUT, async {
            Self::spawn_managed(name, command, args, env)
        })
        .await;

        let mut child = match spawn_result {
            Ok(Ok(child)) => child,
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                return Err(GatewayError::StartupTimeout {
                    backend: name.to_string(),
                    timeout_secs: SPAWN_TIMEOUT.as_secs(),
                })
            }
        };

        let pid = child.id().unwrap_or(0);
        let stdin = child.stdin.take().expect("piped stdin");
        let stdout = child.stdout.take().expect("piped stdout");

        let pending = Arc::new(PendingRequests::new());
        let (write_tx, write_rx) = mpsc::unbounded_channel::<Value>();

        let writer_task = tokio::spawn(Self::writer_loop(stdin, write_rx));
        let reader_pending = pending.clone();
        let backend_name = name.to_string();
        let reader_task = tokio::spawn(Self::reader_loop(backend_name, stdout, reader_pending));

        let running = RunningBackend {
            name: name.to_string(),
            pid,
            status: BackendStatus::Running,
            started_at: Instant::now(),
            command: command.to_string(),
            args: args.to_vec(),
            env: env.clone(),
        };

        Ok(BackendHandle {
            running,
            child,
            write_tx,
            pending,
            reader_task,
            writer_task,
        })
    }

    async fn writer_loop(mut stdin: ChildStdin, mut rx: mpsc::UnboundedReceiver<Value>) {
        while let Some(message) = rx.recv().await {
            if protocol::write_message(&mut stdin, &message).await.is_err() {
                break;
            }
        }
        let _ = stdin.shutdown().await;
    }

    async fn reader_loop(
        name: String,
        stdout: tokio::process::ChildStdout,
        pending: Arc<PendingRequests>,
    ) {
        let mut reader = BufReader::new(stdout);
        loop {
            // A generous overall budget; individual callers apply their own
            // timeout via oneshot-receiver awaits, this loop just keeps
            // draining lines until EOF.
            match protocol::read_response(&mut reader, 3600).await {
                Some(value) => {
                    if let Some(id) = value.get("id").and_then(Value::as_u64) {
                        pending.resolve(id, value).await;
                    }
                }
                None => {
                    tracing::debug!(backend = %name, "reader loop ending (EOF or timeout)");
                    break;
                }
            }
        }
    }

    async fn send_request(
        handle: &BackendHandle,
        message: Value,
        id: u64,
        timeout_secs: u64,
    ) -> Option<Value> {
        let rx = handle.pending.register(id).await;
        if handle.write_tx.send(message).is_err() {
            return None;
        }
        timeout(Duration::from_secs(timeout_secs), rx).await.ok()?.ok()
    }

    async fn send_notification(handle: &BackendHandle, message: Value) {
        let _ = handle.write_tx.send(message);
    }

    async fn perform_handshake(handle: &BackendHandle, name: &str) -> GatewayResult<()> {
        let id = handle.pending.next_id();
        let request = protocol::initialize_request(id);
        let response = Self::send_request(handle, request, id, HANDSHAKE_TIMEOUT_SECS)
            .await
            .ok_or_else(|| GatewayError::HandshakeTimeout {
                backend: name.to_string(),
                timeout_secs: HANDSHAKE_TIMEOUT_SECS,
            })?;

        if let Some(err) = response.get("error") {
            return Err(GatewayError::BackendReturnedError {
                backend: name.to_string(),
                message: err.get("message").and_then(Value::as_str).unwrap_or("initialize failed").to_string(),
            });
        }

        if response
            .get("result")
            .and_then(|r| r.get("protocolVersion"))
            .is_none()
        {
            tracing::warn!(backend = name, "initialize response missing protocolVersion");
        }

        Self::send_notification(handle, protocol::initialized_notification()).await;
        Ok(())
    }

    /// Run `tools/list` (and tolerate a timed-out `prompts/list`) against an
    /// already-handshaked, live backend.
    async fn list_tools_live(handle: &BackendHandle, name: &str) -> ServerToolsResult {
        let id = handle.pending.next_id();
        let request = protocol::tools_list_request(id);
        let tools = match Self::send_request(handle, request, id, TOOLS_LIST_TIMEOUT_SECS).await {
            Some(response) => response
                .get("result")
                .and_then(|r| r.get("tools"))
                .and_then(Value::as_array)
                .map(|arr| {
                    arr.iter()
                        .filter_map(|t| {
                            Some(DiscoveredTool {
                                name: t.get("name")?.as_str()?.to_string(),
                                description: t
                                    .get("description")
                                    .and_then(Value::as_str)
                                    .unwrap_or_default()
                                    .to_string(),
                                parameters_schema: t
                                    .get("inputSchema")
                                    .cloned()
                                    .unwrap_or_else(|| serde_json::json!({})),
                            })
                        })
                        .collect()
                })
                .unwrap_or_default(),
            None => {
                tracing::warn!(backend = name, "no response to tools/list");
                Vec::new()
            }
        };

        let prompt_id = handle.pending.next_id();
        let prompts_request = protocol::prompts_list_request(prompt_id);
        let prompts = Self::send_request(handle, prompts_request, prompt_id, PROMPTS_LIST_TIMEOUT_SECS)
            .await
            .and_then(|r| r.get("result").and_then(|r| r.get("prompts")).cloned())
            .and_then(|v| v.as_array().cloned())
            .unwrap_or_default();

        ServerToolsResult { tools, prompts }
    }

    /// Start a backend. If already running, return its current state.
    pub async fn start_server(
        &self,
        name: &str,
        command: &str,
        args: &[String],
        env: &HashMap<String, String>,
    ) -> GatewayResult<RunningBackend> {
        let mut backends = self.backends.lock().await;
        if let Some(existing) = backends.get(name) {
            return Ok(existing.running.clone());
        }

        let handle = Self::spawn_backend(name, command, args, env).await?;
        let running = handle.running.clone();
        backends.insert(name.to_string(), handle);
        Ok(running)
    }

    /// Perform the MCP handshake against a backend previously started with
    /// `start_server`.
    pub async fn handshake(&self, name: &str) -> GatewayResult<()> {
        let backends = self.backends.lock().await;
        let handle = backends
            .get(name)
            .ok_or_else(|| GatewayError::UnknownBackend(name.to_string()))?;
        Self::perform_handshake(handle, name).await
    }

    pub async fn stop_server(&self, name: &str) -> GatewayResult<()> {
        let mut backends = self.backends.lock().await;
        let mut handle = backends
            .remove(name)
            .ok_or_else(|| GatewayError::UnknownBackend(name.to_string()))?;

        Self::terminate(&mut handle).await;
        Ok(())
    }

    async fn terminate(handle: &mut BackendHandle) {
        handle.reader_task.abort();
        handle.writer_task.abort();

        if let Ok(Some(_)) = handle.child.try_wait() {
            return; // already exited
        }

        #[cfg(unix)]
        {
            if let Some(pid) = handle.child.id() {
                unsafe {
                    libc::killpg(pid as libc::pid_t, libc::SIGTERM);
                }
            }
        }

        if timeout(TERM_GRACE, handle.child.wait()).await.is_err() {
            #[cfg(unix)]
            {
                if let Some(pid) = handle.child.id() {
                    unsafe {
                        libc::killpg(pid as libc::pid_t, libc::SIGKILL);
                    }
                }
            }
            let _ = timeout(KILL_GRACE, handle.child.wait()).await;
        }
    }

    /// Stop then start with the original `command`/`args`/`env` — the
    /// original configuration captured at `start_server` time, closing the
    /// fidelity gap noted in DESIGN.md's second Open Question decision.
    pub async fn restart_server(&self, name: &str) -> GatewayResult<RunningBackend> {
        let (command, args, env) = {
            let backends = self.backends.lock().await;
            let handle = backends
                .get(name)
                .ok_or_else(|| GatewayError::UnknownBackend(name.to_string()))?;
            (
                handle.running.command.clone(),
                handle.running.args.clone(),
                handle.running.env.clone(),
            )
        };

        let _ = self.stop_server(name).await;
        let running = self.start_server(name, &command, &args, &env).await?;
        self.handshake(name).await?;
        Ok(running)
    }

    /// Transient probe: spawn, handshake, discover tools/prompts, then kill
    /// the process regardless of outcome. Never registered in the persistent
    /// map.
    pub async fn discover_server_tools(
        &self,
        name: &str,
        command: &str,
        args: &[String],
        env: &HashMap<String, String>,
    ) -> ServerToolsResult {
        let handle = match Self::spawn_backend(name, command, args, env).await {
            Ok(h) => h,
            Err(_) => return ServerToolsResult::default(),
        };
        let mut handle = handle;

        let result = async {
            Self::perform_handshake(&handle, name).await?;
            Ok::<ServerToolsResult, GatewayError>(Self::list_tools_live(&handle, name).await)
        }
        .await
        .unwrap_or_default();

        Self::terminate(&mut handle).await;
        result
    }

    /// Re-run `tools/list` over an already-running, handshaked backend — the
    /// activation path this port chooses per DESIGN.md's third Open Question
    /// decision.
    pub async fn list_tools(&self, name: &str) -> GatewayResult<ServerToolsResult> {
        let backends = self.backends.lock().await;
        let handle = backends
            .get(name)
            .ok_or_else(|| GatewayError::UnknownBackend(name.to_string()))?;
        Ok(Self::list_tools_live(handle, name).await)
    }

    /// Forward a tool call. If the backend's process has exited, restart and
    /// re-handshake before the call (automatic crash recovery per §7).
    pub async fn forward_tool_call(
        &self,
        backend: &str,
        tool: &str,
        arguments: Value,
        timeout_secs: Option<u64>,
    ) -> GatewayResult<Value> {
        let needs_restart = {
            let mut backends = self.backends.lock().await;
            match backends.get_mut(backend) {
                Some(handle) => matches!(handle.child.try_wait(), Ok(Some(_))),
                None => return Err(GatewayError::UnknownBackend(backend.to_string())),
            }
        };

        if needs_restart {
            tracing::info!(backend, "backend process exited, restarting before call");
            self.restart_server(backend).await?;
        }

        let backends = self.backends.lock().await;
        let handle = backends
            .get(backend)
            .ok_or_else(|| GatewayError::UnknownBackend(backend.to_string()))?;

        let id = handle.pending.next_id();
        let request = protocol::tools_call_request(id, tool, arguments);
        let timeout_secs = timeout_secs.unwrap_or(DEFAULT_CALL_TIMEOUT_SECS);
        let response = Self::send_request(handle, request, id, timeout_secs)
            .await
            .ok_or_else(|| GatewayError::ToolCallTimeout {
                backend: backend.to_string(),
                tool: tool.to_string(),
                timeout_secs,
            })?;

        if let Some(err) = response.get("error") {
            return Err(GatewayError::BackendReturnedError {
                backend: backend.to_string(),
                message: err.get("message").and_then(Value::as_str).unwrap_or("tool call failed").to_string(),
            });
        }

        let result = response.get("result").cloned().unwrap_or(Value::Null);
        Ok(protocol::extract_tool_output(&result))
    }

    pub async fn shutdown(&self) {
        let mut backends = self.backends.lock().await;
        for (name, mut handle) in backends.drain() {
            tracing::debug!(backend = %name, "shutting down backend");
            Self::terminate(&mut handle).await;
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct WorkflowStep {
    pub server: String,
    pub tool: String,
    pub input: Value,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct StepResult {
    pub server: String,
    pub tool: String,
    pub status: String, // completed | failed | skipped
    pub output: Option<Value>,
    pub error: Option<String>,
    pub latency_ms: u64,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct WorkflowResult {
    pub workflow_name: String,
    pub status: String, // completed | partial | failed
    pub steps: Vec<StepResult>,
}

/// Substitute the `$previous` token in a workflow step input's top-level
/// fields, per §4.3.6 and §9's explicitly shallow, single-level rule: exact
/// match replaces a field's string value with the raw previous output;
/// substring match replaces with its JSON-encoded (or plain string) form.
/// Nested objects and arrays are left untouched — substitution never
/// recurses past the top level.
fn substitute_previous(value: &Value, previous: &Value) -> Value {
    let Value::Object(map) = value else {
        return substitute_previous_field(value, previous);
    };
    Value::Object(
        map.iter()
            .map(|(k, v)| (k.clone(), substitute_previous_field(v, previous)))
            .collect(),
    )
}

fn substitute_previous_field(value: &Value, previous: &Value) -> Value {
    match value {
        Value::String(s) if s == "$previous" => previous.clone(),
        Value::String(s) if s.contains("$previous") => {
            let replacement = match previous {
                Value::String(p) => p.clone(),
                other => other.to_string(),
            };
            Value::String(s.replace("$previous", &replacement))
        }
        other => other.clone(),
    }
}

impl Orchestrator {
    pub async fn execute_workflow(&self, steps: Vec<WorkflowStep>, workflow_name: &str) -> WorkflowResult {
        let mut results = Vec::with_capacity(steps.len());
        let mut previous: Option<Value> = None;
        let mut failed = false;

        for step in &steps {
            if failed {
                results.push(StepResult {
                    server: step.server.clone(),
                    tool: step.tool.clone(),
                    status: "skipped".into(),
                    output: None,
                    error: None,
                    latency_ms: 0,
                });
                continue;
            }

            let input = match &previous {
                Some(prev) => substitute_previous(&step.input, prev),
                None => step.input.clone(),
            };

            let start = Instant::now();
            match self.forward_tool_call(&step.server, &step.tool, input, None).await {
                Ok(output) => {
                    let latency_ms = start.elapsed().as_millis() as u64;
                    previous = Some(output.clone());
                    results.push(StepResult {
                        server: step.server.clone(),
                        tool: step.tool.clone(),
                        status: "completed".into(),
                        output: Some(output),
                        error: None,
                        latency_ms,
                    });
                }
                Err(e) => {
                    let latency_ms = start.elapsed().as_millis() as u64;
                    results.push(StepResult {
                        server: step.server.clone(),
                        tool: step.tool.clone(),
                        status: "failed".into(),
                        output: None,
                        error: Some(e.to_string()),
                        latency_ms,
                    });
                    failed = true;
                }
            }
        }

        let completed = results.iter().filter(|r| r.status == "completed").count();
        let status = if completed == results.len() {
            "completed"
        } else if completed > 0 {
            "partial"
        } else {
            "failed"
        };

        WorkflowResult {
            workflow_name: workflow_name.to_string(),
            status: status.to_string(),
            steps: results,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn substitute_exact_token_replaces_with_raw_value() {
        let previous = json!("WORLD");
        let input = json!({"text": "$previous"});
        let result = substitute_previous(&input, &previous);
        assert_eq!(result, json!({"text": "WORLD"}));
    }

    #[test]
    fn substitute_embedded_token_replaces_with_string_form() {
        let previous = json!("WORLD");
        let input = json!({"text": "[$previous]"});
        let result = substitute_previous(&input, &previous);
        assert_eq!(result, json!({"text": "[WORLD]"}));
    }

    #[test]
    fn substitute_embedded_token_with_non_string_previous_uses_json_form() {
        let previous = json!({"a": 1});
        let input = json!({"text": "value=$previous"});
        let result = substitute_previous(&input, &previous);
        assert_eq!(result, json!({"text": "value={\"a\":1}"}));
    }

    #[test]
    fn substitute_does_not_recurse_into_nested_objects() {
        let previous = json!("WORLD");
        let input = json!({"nested": {"text": "$previous"}});
        let result = substitute_previous(&input, &previous);
        assert_eq!(result, json!({"nested": {"text": "$previous"}}));
    }

    #[test]
    fn resolve_env_substitutes_set_vars() {
        std::env::set_var("MCP_GATEWAY_TEST_VAR", "resolved_value");
        let env = HashMap::from([("KEY".to_string(), "${MCP_GATEWAY_TEST_VAR}".to_string())]);
        let resolved = resolve_env(&env);
        assert_eq!(resolved["KEY"], "resolved_value");
        std::env::remove_var("MCP_GATEWAY_TEST_VAR");
    }

    #[test]
    fn resolve_env_leaves_missing_vars_untouched() {
        let env = HashMap::from([("KEY".to_string(), "${DEFINITELY_MISSING_VAR_XYZ}".to_string())]);
        let resolved = resolve_env(&env);
        assert_eq!(resolved["KEY"], "${DEFINITELY_MISSING_VAR_XYZ}");
    }

    #[test]
    fn resolve_env_passes_through_plain_values() {
        let env = HashMap::from([("KEY".to_string(), "plain_value".to_string())]);
        let resolved = resolve_env(&env);
        assert_eq!(resolved["KEY"], "plain_value");
    }

    #[tokio::test]
    async fn start_unknown_command_reports_command_not_found() {
        let orchestrator = Orchestrator::new();
        let result = orchestrator
            .start_server("nope", "nonexistent-xyz-binary", &[], &HashMap::new())
            .await;
        assert!(matches!(result, Err(GatewayError::CommandNotFound { .. })));
    }

    #[tokio::test]
    async fn stop_unknown_backend_is_an_error() {
        let orchestrator = Orchestrator::new();
        let result = orchestrator.stop_server("ghost").await;
        assert!(matches!(result, Err(GatewayError::UnknownBackend(_))));
    }

    #[tokio::test]
    async fn workflow_skips_remaining_steps_after_a_failure() {
        // No real backend is registered, so the first step fails immediately;
        // this exercises the skip-on-failure bookkeeping without a live
        // subprocess. Real protocol exchange is covered by the fixture-backed
        // tests in `tests/mcp_e2e.rs`.
        let orchestrator = Orchestrator::new();
        let steps = vec![
            WorkflowStep { server: "missing".into(), tool: "x".into(), input: json!({}) },
            WorkflowStep { server: "missing".into(), tool: "y".into(), input: json!({"text": "$previous"}) },
        ];
        let result = orchestrator.execute_workflow(steps, "wf").await;
        assert_eq!(result.status, "failed");
        assert_eq!(result.steps[0].status, "failed");
        assert_eq!(result.steps[1].status, "skipped");
    }
}

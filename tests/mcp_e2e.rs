//! End-to-end tests against small Node.js MCP fixture servers under
//! `tests/fixtures/`. Skipped automatically when `node` is not on `$PATH`.

use std::collections::HashMap;
use std::path::PathBuf;

use mcp_gateway::orchestrator::{Orchestrator, WorkflowStep};
use serde_json::json;

fn node_available() -> bool {
    which::which("node").is_ok()
}

fn fixture(name: &str) -> String {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(name)
        .to_string_lossy()
        .into_owned()
}

fn no_env() -> HashMap<String, String> {
    HashMap::new()
}

/// Scenario 1: activate a dummy backend, call its one tool through the
/// orchestrator, then stop it.
#[tokio::test]
async fn activate_then_call_then_stop() {
    if !node_available() {
        eprintln!("SKIP: node not found on $PATH");
        return;
    }

    let orchestrator = Orchestrator::new();
    let args = vec![fixture("dummy_echo.mjs")];

    orchestrator.start_server("dummy", "node", &args, &no_env()).await.expect("start");
    orchestrator.handshake("dummy").await.expect("handshake");

    let tools = orchestrator.list_tools("dummy").await.expect("list tools");
    assert_eq!(tools.tools.len(), 1);
    assert_eq!(tools.tools[0].name, "echo");

    let output = orchestrator
        .forward_tool_call("dummy", "echo", json!({"text": "hello"}), None)
        .await
        .expect("call echo");
    assert_eq!(output, json!("hello"));

    orchestrator.stop_server("dummy").await.expect("stop");
}

/// Scenario 2: a two-step workflow where the second step's input references
/// the first step's output via `$previous`.
#[tokio::test]
async fn workflow_substitutes_previous_output() {
    if !node_available() {
        eprintln!("SKIP: node not found on $PATH");
        return;
    }

    let orchestrator = Orchestrator::new();

    orchestrator
        .start_server("a", "node", &vec![fixture("dummy_shout.mjs")], &no_env())
        .await
        .expect("start a");
    orchestrator.handshake("a").await.expect("handshake a");

    orchestrator
        .start_server("b", "node", &vec![fixture("dummy_wrap.mjs")], &no_env())
        .await
        .expect("start b");
    orchestrator.handshake("b").await.expect("handshake b");

    let steps = vec![
        WorkflowStep { server: "a".into(), tool: "shout".into(), input: json!({}) },
        WorkflowStep { server: "b".into(), tool: "wrap".into(), input: json!({"text": "$previous"}) },
    ];

    let result = orchestrator.execute_workflow(steps, "shout-then-wrap").await;

    assert_eq!(result.status, "completed");
    assert_eq!(result.steps.len(), 2);
    assert_eq!(result.steps[0].output, Some(json!("WORLD")));
    assert_eq!(result.steps[1].output, Some(json!("[WORLD]")));

    orchestrator.stop_server("a").await.expect("stop a");
    orchestrator.stop_server("b").await.expect("stop b");
}

/// Scenario 6: a backend that exits right after answering its first call.
/// The second call against the same backend name must detect the exited
/// process, restart it, re-handshake, and still succeed.
#[tokio::test]
async fn forward_tool_call_restarts_crashed_backend() {
    if !node_available() {
        eprintln!("SKIP: node not found on $PATH");
        return;
    }

    let orchestrator = Orchestrator::new();
    let args = vec![fixture("dummy_crash_once.mjs")];

    orchestrator.start_server("flaky", "node", &args, &no_env()).await.expect("start");
    orchestrator.handshake("flaky").await.expect("handshake");

    let first = orchestrator
        .forward_tool_call("flaky", "tick", json!({}), None)
        .await
        .expect("first call");
    assert_eq!(first, json!("tock"));

    // Give the fixture time to actually exit before the next call checks
    // `try_wait`.
    tokio::time::sleep(std::time::Duration::from_millis(150)).await;

    let second = orchestrator
        .forward_tool_call("flaky", "tick", json!({}), None)
        .await
        .expect("second call after restart");
    assert_eq!(second, json!("tock"));

    orchestrator.stop_server("flaky").await.expect("stop");
}

//! Shared newline-delimited JSON-RPC 2.0 framing for talking to backend MCP
//! servers over stdio.
//!
//! One JSON object per line. Requests carry `id`; notifications don't.
//! Response reading always skips lines with no `id` — see DESIGN.md's first
//! Open Question decision for why this is the one reader used everywhere.

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::time::{timeout, Duration};

pub const PROTOCOL_VERSION: &str = "2024-11-05";
pub const CLIENT_NAME: &str = "meta-mcp-orchestrator";
pub const CLIENT_VERSION: &str = "0.1.0";

/// Build an `initialize` request for the given id.
pub fn initialize_request(id: u64) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": "initialize",
        "params": {
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": { "name": CLIENT_NAME, "version": CLIENT_VERSION },
        }
    })
}

/// The `notifications/initialized` notification (no id).
pub fn initialized_notification() -> Value {
    json!({ "jsonrpc": "2.0", "method": "notifications/initialized" })
}

pub fn tools_list_request(id: u64) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "method": "tools/list" })
}

pub fn prompts_list_request(id: u64) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "method": "prompts/list" })
}

pub fn tools_call_request(id: u64, name: &str, arguments: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": "tools/call",
        "params": { "name": name, "arguments": arguments },
    })
}

/// Write `message` as one JSON line terminated by `\n`, flushing immediately.
pub async fn write_message<W>(writer: &mut W, message: &Value) -> std::io::Result<()>
where
    W: tokio::io::AsyncWrite + Unpin,
{
    let mut line = serde_json::to_string(message)?;
    line.push('\n');
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await
}

/// Read lines from `reader` until one parses as JSON and carries an `id`
/// field (a response), or the overall `timeout_secs` budget elapses. Lines
/// that fail to parse, or parse but lack `id`, are treated as malformed or
/// notification traffic and skipped.
///
/// Returns `None` on timeout or EOF.
pub async fn read_response<R>(reader: &mut BufReader<R>, timeout_secs: u64) -> Option<Value>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let deadline = Duration::from_secs(timeout_secs);
    timeout(deadline, async {
        loop {
            let mut line = String::new();
            let n = reader.read_line(&mut line).await.ok()?;
            if n == 0 {
                return None; // EOF
            }
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let value: Value = match serde_json::from_str(trimmed) {
                Ok(v) => v,
                Err(_) => {
                    tracing::debug!(line = trimmed, "skipping malformed JSON-RPC line");
                    continue;
                }
            };
            if value.get("id").is_none() {
                tracing::debug!(?value, "skipping notification (no id)");
                continue;
            }
            return Some(value);
        }
    })
    .await
    .ok()
    .flatten()
}

/// Extract the human-facing result payload from a successful `tools/call`
/// response's `result.content`, per §4.3.5:
/// - a single `{type:"text", text}` part unwraps to the text string,
/// - multiple text parts become a list of strings,
/// - anything else passes through unchanged.
pub fn extract_tool_output(result: &Value) -> Value {
    let Some(content) = result.get("content").and_then(Value::as_array) else {
        return result.clone();
    };

    let texts: Vec<&str> = content
        .iter()
        .filter_map(|part| {
            if part.get("type").and_then(Value::as_str) == Some("text") {
                part.get("text").and_then(Value::as_str)
            } else {
                None
            }
        })
        .collect();

    if texts.len() == content.len() && !texts.is_empty() {
        if texts.len() == 1 {
            return Value::String(texts[0].to_string());
        }
        return Value::Array(texts.iter().map(|t| Value::String(t.to_string())).collect());
    }

    result.clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[tokio::test]
    async fn read_response_skips_notifications() {
        let data = b"{\"jsonrpc\":\"2.0\",\"method\":\"notifications/progress\"}\n{\"jsonrpc\":\"2.0\",\"id\":1,\"result\":{}}\n";
        let mut reader = BufReader::new(Cursor::new(&data[..]));
        let resp = read_response(&mut reader, 2).await.expect("response");
        assert_eq!(resp["id"], 1);
    }

    #[tokio::test]
    async fn read_response_skips_malformed_lines() {
        let data = b"not json\n{\"jsonrpc\":\"2.0\",\"id\":7,\"result\":{}}\n";
        let mut reader = BufReader::new(Cursor::new(&data[..]));
        let resp = read_response(&mut reader, 2).await.expect("response");
        assert_eq!(resp["id"], 7);
    }

    #[tokio::test]
    async fn read_response_times_out_on_eof() {
        let data = b"";
        let mut reader = BufReader::new(Cursor::new(&data[..]));
        let resp = read_response(&mut reader, 1).await;
        assert!(resp.is_none());
    }

    #[test]
    fn extract_single_text_part() {
        let result = json!({"content": [{"type": "text", "text": "hello"}]});
        assert_eq!(extract_tool_output(&result), json!("hello"));
    }

    #[test]
    fn extract_multiple_text_parts() {
        let result = json!({"content": [
            {"type": "text", "text": "a"},
            {"type": "text", "text": "b"},
        ]});
        assert_eq!(extract_tool_output(&result), json!(["a", "b"]));
    }

    #[test]
    fn extract_non_text_passes_through() {
        let result = json!({"content": [{"type": "image", "data": "xyz"}]});
        assert_eq!(extract_tool_output(&result), result);
    }
}

use thiserror::Error;

/// Error taxonomy for the gateway's runtime kernel.
///
/// Variants map directly to the kinds enumerated in the error-handling design:
/// each one is worded so its `Display` text is suitable to return directly to
/// a host client as a tool-call error string.
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("command not found: {command}")]
    CommandNotFound { command: String },

    #[error("permission denied executing {command}")]
    PermissionDenied { command: String },

    #[error("backend '{backend}' did not start within {timeout_secs}s")]
    StartupTimeout { backend: String, timeout_secs: u64 },

    #[error("backend '{backend}' did not complete the MCP handshake within {timeout_secs}s")]
    HandshakeTimeout { backend: String, timeout_secs: u64 },

    #[error("tool call '{tool}' on backend '{backend}' timed out after {timeout_secs}s")]
    ToolCallTimeout {
        backend: String,
        tool: String,
        timeout_secs: u64,
    },

    #[error("protocol error from backend '{backend}': {message}")]
    ProtocolError { backend: String, message: String },

    #[error("backend '{backend}' returned an error: {message}")]
    BackendReturnedError { backend: String, message: String },

    #[error("backend '{backend}' crashed during the call")]
    BackendCrashed { backend: String },

    #[error("unknown backend: {0}")]
    UnknownBackend(String),

    #[error("failed to write configuration for client {client}: {source}")]
    ConfigIOError {
        client: String,
        #[source]
        source: std::io::Error,
    },

    #[error("state file corrupt, resetting to defaults: {path}")]
    StateCorruption { path: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type GatewayResult<T> = std::result::Result<T, GatewayError>;

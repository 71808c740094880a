//! Error types for the What If Store bridge.
//!
//! One error enum is shared by the server, the client and the procedure
//! handlers so that a failure raised deep inside a handler reaches the caller
//! with the same JSON-RPC code on either transport.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the bridge.
#[derive(Debug, Error)]
pub enum BridgeError {
    // Configuration errors
    #[error("Invalid port {value}: port must be between 0 and 65535")]
    InvalidPort { value: i64 },

    #[error("Configuration error: {message}")]
    Config { message: String },

    // Lifecycle errors
    #[error("Bridge server is already running on {addr}")]
    AlreadyRunning { addr: std::net::SocketAddr },

    #[error("Failed to bind {addr}: {message}")]
    Bind {
        addr: String,
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    // Procedure errors
    #[error("Procedure not found: {path}")]
    ProcedureNotFound { path: String },

    #[error("Procedure {path} is a {actual}, not a {expected}")]
    KindMismatch {
        path: String,
        expected: String,
        actual: String,
    },

    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    #[error("Invalid input for {path}: {message}")]
    InvalidInput { path: String, message: String },

    #[error("Procedure router is incomplete: {message}")]
    Router { message: String },

    // Codec errors
    #[error("Codec error: {message}")]
    Codec { message: String },

    #[error("Failed to encode result: {message}")]
    Encode { message: String },

    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    // Local application errors
    #[error("Application not found: {id}")]
    AppNotFound { id: String },

    #[error("Failed to launch {app}: {message}")]
    LaunchFailed { app: String, message: String },

    #[error("File watch error: {message}")]
    Watch { message: String },

    // File system errors
    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    // Client-side transport errors
    #[error("Transport error: {message}")]
    Transport { message: String },

    #[error("Request timeout after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Remote error {code}: {message}")]
    Rpc { code: i32, message: String },

    #[error("Server requested reconnect")]
    ReconnectRequested,

    #[error("Subscription closed: {reason}")]
    SubscriptionClosed { reason: String },

    // Generic errors
    #[error("{0}")]
    Other(String),
}

/// Result type alias for bridge operations.
pub type Result<T> = std::result::Result<T, BridgeError>;

impl From<std::io::Error> for BridgeError {
    fn from(err: std::io::Error) -> Self {
        BridgeError::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(err: serde_json::Error) -> Self {
        BridgeError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<notify::Error> for BridgeError {
    fn from(err: notify::Error) -> Self {
        BridgeError::Watch {
            message: err.to_string(),
        }
    }
}

impl BridgeError {
    /// Create an IO error with path context.
    pub fn io_with_path(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        BridgeError::Io {
            message: err.to_string(),
            path: Some(path.into()),
            source: Some(err),
        }
    }

    /// Convert to a JSON-RPC error code.
    ///
    /// Standard JSON-RPC error codes:
    /// - -32700: Parse error
    /// - -32600: Invalid Request
    /// - -32601: Method not found
    /// - -32602: Invalid params
    /// - -32603: Internal error
    ///
    /// Custom error codes (application-defined, -32000 to -32099):
    /// - -32000: Transport/connectivity error
    /// - -32003: Launch failed
    /// - -32004: Application not found
    pub fn to_rpc_error_code(&self) -> i32 {
        match self {
            BridgeError::Codec { .. } | BridgeError::Json { .. } => -32700,

            BridgeError::KindMismatch { .. } | BridgeError::InvalidRequest { .. } => -32600,

            BridgeError::ProcedureNotFound { .. } => -32601,

            BridgeError::InvalidInput { .. } => -32602,

            BridgeError::Transport { .. }
            | BridgeError::Timeout(_)
            | BridgeError::ReconnectRequested
            | BridgeError::SubscriptionClosed { .. } => -32000,

            BridgeError::LaunchFailed { .. } => -32003,

            BridgeError::AppNotFound { .. } => -32004,

            BridgeError::Rpc { code, .. } => *code,

            BridgeError::Encode { .. } => -32603,

            _ => -32603,
        }
    }

    /// Rebuild an error received from the remote end.
    ///
    /// Only the code and message travel over the wire, so the original
    /// variant is not recovered; callers match on the code instead.
    pub fn from_rpc(code: i32, message: impl Into<String>) -> Self {
        BridgeError::Rpc {
            code,
            message: message.into(),
        }
    }

    /// True when the failure means the server could not be reached at all.
    pub fn is_unreachable(&self) -> bool {
        matches!(
            self,
            BridgeError::Transport { .. } | BridgeError::Timeout(_) | BridgeError::ReconnectRequested
        )
    }
}

use serde_json::Value;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Failure to establish the transport. Fatal to the whole run.
#[derive(Error, Debug, Clone)]
pub enum ConnectError {
    #[error("Invalid credentials: {0}")]
    Credentials(String),
    #[error("Invalid endpoint {url}: {reason}")]
    InvalidEndpoint { url: String, reason: String },
    #[error("Could not reach {url}: {reason}")]
    Network { url: String, reason: String },
    #[error("Handshake with {url} timed out after {after:?}")]
    Timeout { url: String, after: Duration },
    #[error("Handshake with {url} failed: {reason}")]
    Handshake { url: String, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    PeerClosed,
    IdleTimeout(Duration),
    LocalClose,
    Io(String),
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::PeerClosed => write!(f, "closed by peer"),
            CloseReason::IdleTimeout(after) => write!(f, "no traffic for {:?}", after),
            CloseReason::LocalClose => write!(f, "closed locally"),
            CloseReason::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Session closed: {reason}")]
pub struct ClosedError {
    pub reason: CloseReason,
}

impl ClosedError {
    pub fn new(reason: CloseReason) -> Self {
        Self { reason }
    }

    pub fn io(err: impl fmt::Display) -> Self {
        Self::new(CloseReason::Io(err.to_string()))
    }
}

#[derive(Error, Debug, Clone)]
pub enum RpcError {
    #[error("{method} timed out after {after:?}")]
    Timeout { method: String, after: Duration },
    #[error("{method} failed with engine error {code}: {message}")]
    Remote {
        method: String,
        code: i64,
        message: String,
    },
    #[error(transparent)]
    Closed(#[from] ClosedError),
    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl RpcError {
    pub(crate) fn remote(method: &str, payload: &Value) -> Self {
        let code = payload.get("code").and_then(Value::as_i64).unwrap_or(-32000);
        let mut message = payload
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unspecified engine error")
            .to_string();
        if let Some(parameter) = payload.get("parameter").and_then(Value::as_str) {
            if !parameter.is_empty() {
                message = format!("{} ({})", message, parameter);
            }
        }
        RpcError::Remote {
            method: method.to_string(),
            code,
            message,
        }
    }

    /// True when the session itself is gone and no further call can succeed.
    pub fn is_session_fatal(&self) -> bool {
        matches!(self, RpcError::Closed(_))
    }
}

#[derive(Error, Debug, Clone)]
pub enum EngineError {
    #[error("Session could not be opened: {0}")]
    Session(#[source] RpcError),
    #[error("Could not open app {app_id}: {source}")]
    Open {
        app_id: String,
        #[source]
        source: RpcError,
    },
    #[error("Engine refused to open app {app_id}: {detail}")]
    OpenRejected { app_id: String, detail: String },
    #[error("{method} on app {app_id} failed: {source}")]
    Invoke {
        app_id: String,
        method: String,
        #[source]
        source: RpcError,
    },
    #[error("{method} failed: {source}")]
    Global {
        method: String,
        #[source]
        source: RpcError,
    },
    #[error("Unexpected {method} reply: {detail}")]
    Decode { method: String, detail: String },
}

impl EngineError {
    pub fn rpc_error(&self) -> Option<&RpcError> {
        match self {
            EngineError::Session(source)
            | EngineError::Open { source, .. }
            | EngineError::Invoke { source, .. }
            | EngineError::Global { source, .. } => Some(source),
            EngineError::OpenRejected { .. } | EngineError::Decode { .. } => None,
        }
    }

    pub fn is_session_fatal(&self) -> bool {
        self.rpc_error().is_some_and(RpcError::is_session_fatal)
    }
}

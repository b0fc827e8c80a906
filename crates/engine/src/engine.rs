//! The engine's session/app vocabulary on top of `RpcClient`.

use crate::error::{ConnectError, EngineError, RpcError};
use crate::rpc::{GLOBAL_HANDLE, Notification, RpcClient};
use crate::transport::{TransportSession, TransportSettings};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use retainer_core::endpoint::Endpoint;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct SessionToken {
    pub engine_version: String,
    pub session_state: Option<String>,
    pub opened_at: DateTime<Utc>,
}

/// An app opened within the session. Not `Clone`: whoever opened it closes it.
#[derive(Debug, PartialEq, Eq)]
pub struct AppHandle {
    pub app_id: String,
    pub handle: i64,
    pub opened_at: DateTime<Utc>,
}

/// A method and its positional params, issued against an app handle.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MethodCall {
    pub method: String,
    #[serde(default)]
    pub params: Vec<Value>,
    #[serde(skip)]
    pub timeout: Option<Duration>,
}

impl MethodCall {
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            params: Vec::new(),
            timeout: None,
        }
    }

    pub fn with_params(mut self, params: Vec<Value>) -> Self {
        self.params = params;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// One entry of the engine's document list.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DocEntry {
    #[serde(rename = "qDocName")]
    pub doc_name: String,
    #[serde(rename = "qDocId")]
    pub doc_id: String,
    #[serde(rename = "qTitle", default)]
    pub title: Option<String>,
    #[serde(rename = "qFileSize", default)]
    pub file_size: f64,
    #[serde(rename = "qLastReloadTime", default)]
    pub last_reload_time: Option<String>,
    #[serde(rename = "qMeta", default)]
    pub meta: DocMeta,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct DocMeta {
    #[serde(default)]
    pub published: bool,
}

/// The operations the truncation run needs from an engine session.
#[async_trait]
pub trait AppEngine: Send + Sync {
    async fn open_session(&self) -> Result<SessionToken, EngineError>;

    async fn open_app(&self, app_id: &str) -> Result<AppHandle, EngineError>;

    async fn invoke(&self, app: &AppHandle, call: &MethodCall) -> Result<Value, EngineError>;

    /// Best effort; never fails.
    async fn close_app(&self, app: AppHandle);

    async fn close_session(&self);
}

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub transport: TransportSettings,
    pub call_timeout: Duration,
    /// Open apps without loading their data model.
    pub open_without_data: bool,
    /// Method issued on an app handle to release it. `None` releases locally.
    pub close_method: Option<String>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            transport: TransportSettings::default(),
            call_timeout: Duration::from_secs(60),
            open_without_data: true,
            close_method: None,
        }
    }
}

#[derive(Default)]
struct SessionEvents {
    state: Option<String>,
}

pub struct EngineHandle {
    rpc: RpcClient,
    settings: EngineSettings,
    events: Arc<Mutex<SessionEvents>>,
    listener: JoinHandle<()>,
    session_closed: AtomicBool,
}

impl EngineHandle {
    pub async fn connect(endpoint: &Endpoint, settings: EngineSettings) -> Result<Self, ConnectError> {
        let session = TransportSession::open(endpoint, &settings.transport).await?;
        Ok(Self::over(session, settings))
    }

    /// Wraps an already established transport.
    pub fn over(session: TransportSession, settings: EngineSettings) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let rpc = RpcClient::start(session, Some(tx));
        let events = Arc::new(Mutex::new(SessionEvents::default()));
        let listener = tokio::spawn(listen(rx, events.clone()));
        Self {
            rpc,
            settings,
            events,
            listener,
            session_closed: AtomicBool::new(false),
        }
    }

    pub fn rpc(&self) -> &RpcClient {
        &self.rpc
    }

    pub async fn doc_list(&self) -> Result<Vec<DocEntry>, EngineError> {
        let method = "GetDocList";
        let result = self.global_call(method, json!([])).await?;
        let list = result.get("qDocList").cloned().unwrap_or(Value::Array(Vec::new()));
        serde_json::from_value(list).map_err(|e| EngineError::Decode {
            method: method.to_string(),
            detail: e.to_string(),
        })
    }

    async fn global_call(&self, method: &str, params: Value) -> Result<Value, EngineError> {
        self.rpc
            .call_on(Some(GLOBAL_HANDLE), method, params, self.settings.call_timeout)
            .await
            .map_err(|source| EngineError::Global {
                method: method.to_string(),
                source,
            })
    }
}

#[async_trait]
impl AppEngine for EngineHandle {
    async fn open_session(&self) -> Result<SessionToken, EngineError> {
        let result = self
            .rpc
            .call_on(Some(GLOBAL_HANDLE), "EngineVersion", json!([]), self.settings.call_timeout)
            .await
            .map_err(EngineError::Session)?;

        let engine_version = result
            .pointer("/qVersion/qComponentVersion")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string();
        let session_state = self.events.lock().await.state.clone();

        info!("🤝 Engine session open (engine {})", engine_version);
        Ok(SessionToken {
            engine_version,
            session_state,
            opened_at: Utc::now(),
        })
    }

    async fn open_app(&self, app_id: &str) -> Result<AppHandle, EngineError> {
        let params = json!([app_id, "", "", "", self.settings.open_without_data]);
        let result = self
            .rpc
            .call_on(Some(GLOBAL_HANDLE), "OpenDoc", params, self.settings.call_timeout)
            .await
            .map_err(|source| EngineError::Open {
                app_id: app_id.to_string(),
                source,
            })?;

        let kind = result.pointer("/qReturn/qType").and_then(Value::as_str);
        let handle = result.pointer("/qReturn/qHandle").and_then(Value::as_i64);
        match (kind, handle) {
            (Some("Doc"), Some(handle)) => {
                // handle numbers are reused once the engine frees them
                self.rpc.forget_closed(handle).await;
                debug!("📂 Opened {} as handle {}", app_id, handle);
                Ok(AppHandle {
                    app_id: app_id.to_string(),
                    handle,
                    opened_at: Utc::now(),
                })
            }
            _ => Err(EngineError::OpenRejected {
                app_id: app_id.to_string(),
                detail: format!("expected a Doc handle, got {}", result),
            }),
        }
    }

    async fn invoke(&self, app: &AppHandle, call: &MethodCall) -> Result<Value, EngineError> {
        let timeout = call.timeout.unwrap_or(self.settings.call_timeout);
        self.rpc
            .call_on(Some(app.handle), &call.method, Value::Array(call.params.clone()), timeout)
            .await
            .map_err(|source| EngineError::Invoke {
                app_id: app.app_id.clone(),
                method: call.method.clone(),
                source,
            })
    }

    async fn close_app(&self, app: AppHandle) {
        if self.rpc.take_closed(app.handle).await {
            debug!("App {} (handle {}) was already closed by the engine", app.app_id, app.handle);
            return;
        }

        let Some(method) = &self.settings.close_method else {
            debug!("🔓 Released handle {} for {}", app.handle, app.app_id);
            return;
        };

        match self
            .rpc
            .call_on(Some(app.handle), method, json!([]), self.settings.call_timeout)
            .await
        {
            Ok(_) => debug!("🔓 Closed {} (handle {})", app.app_id, app.handle),
            Err(RpcError::Remote { code, message, .. }) => {
                warn!("⚠️ Engine declined to close {}: {} ({})", app.app_id, message, code)
            }
            Err(e) => warn!("⚠️ Closing {} failed: {}", app.app_id, e),
        }
    }

    async fn close_session(&self) {
        if self.session_closed.swap(true, Ordering::SeqCst) {
            debug!("Engine session already closed");
            return;
        }
        self.rpc.close().await;
        self.listener.abort();
    }
}

async fn listen(mut rx: mpsc::UnboundedReceiver<Notification>, events: Arc<Mutex<SessionEvents>>) {
    while let Some(note) = rx.recv().await {
        let mut events = events.lock().await;
        if note.method.as_deref() == Some("OnConnected") {
            let state = note
                .params
                .get("qSessionState")
                .and_then(Value::as_str)
                .map(str::to_string);
            debug!("Engine reports session state {:?}", state);
            events.state = state;
        } else if let Some(id) = note.late_id {
            debug!("Late reply for abandoned request {} ignored", id);
        } else if let Some(method) = &note.method {
            debug!("Engine notification {}", method);
        }
        if !note.closed_handles.is_empty() {
            debug!("Engine closed handles {:?}", note.closed_handles);
        }
    }
}

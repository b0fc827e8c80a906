//! JSON-RPC framing and response correlation over a `TransportSession`.
//!
//! Every call registers a `PendingCall` under a fresh id before its request
//! is written. A single receive loop owns the read half and completes pending
//! calls by id. Anything it cannot correlate is a notification.

use crate::error::{CloseReason, ClosedError, RpcError};
use crate::transport::{FrameSink, FrameStream, TransportSession};
use serde::Serialize;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Object handle of the engine's global context.
pub const GLOBAL_HANDLE: i64 = -1;

#[derive(Serialize)]
struct RequestEnvelope<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    handle: Option<i64>,
    params: &'a Value,
}

/// An inbound message that did not complete a pending call.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub method: Option<String>,
    pub params: Value,
    /// Set when this is a response whose call had already given up.
    pub late_id: Option<u64>,
    /// Handles the engine reports as closed.
    pub closed_handles: Vec<i64>,
}

impl Notification {
    fn from_message(message: &Value, late_id: Option<u64>) -> Self {
        Self {
            method: message.get("method").and_then(Value::as_str).map(str::to_string),
            params: message.get("params").cloned().unwrap_or(Value::Null),
            late_id,
            closed_handles: closed_handles(message),
        }
    }
}

fn closed_handles(message: &Value) -> Vec<i64> {
    message
        .get("close")
        .and_then(Value::as_array)
        .map(|handles| handles.iter().filter_map(Value::as_i64).collect())
        .unwrap_or_default()
}

struct PendingCall {
    method: String,
    issued_at: Instant,
    slot: oneshot::Sender<Result<Value, RpcError>>,
}

#[derive(Default)]
struct PendingTable {
    calls: HashMap<u64, PendingCall>,
    closed: Option<ClosedError>,
    /// Object handles the engine reported closed, recorded in arrival order
    /// with the replies so a reused handle number is never confused.
    closed_handles: HashSet<i64>,
}

struct Shared {
    sink: Mutex<Box<dyn FrameSink>>,
    pending: Mutex<PendingTable>,
    next_id: AtomicU64,
}

pub struct RpcClient {
    shared: Arc<Shared>,
    reader: JoinHandle<()>,
}

impl RpcClient {
    /// Takes ownership of the session and starts the receive loop.
    /// Uncorrelated messages go to `notifications` when given.
    pub fn start(
        session: TransportSession,
        notifications: Option<mpsc::UnboundedSender<Notification>>,
    ) -> Self {
        let (sink, stream) = session.into_parts();
        let shared = Arc::new(Shared {
            sink: Mutex::new(sink),
            pending: Mutex::new(PendingTable::default()),
            next_id: AtomicU64::new(1),
        });
        let reader = tokio::spawn(receive_loop(shared.clone(), stream, notifications));
        Self { shared, reader }
    }

    /// Calls a method that targets no object handle.
    pub async fn call(&self, method: &str, params: Value, timeout: Duration) -> Result<Value, RpcError> {
        self.call_on(None, method, params, timeout).await
    }

    /// Calls `method` on an object handle and waits for the correlated reply.
    pub async fn call_on(
        &self,
        handle: Option<i64>,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value, RpcError> {
        let id = self.shared.next_id.fetch_add(1, Ordering::SeqCst);
        let frame = serde_json::to_string(&RequestEnvelope {
            jsonrpc: "2.0",
            id,
            method,
            handle,
            params: &params,
        })
        .map_err(|e| RpcError::Protocol(format!("could not encode {method}: {e}")))?;

        let deadline = tokio::time::Instant::now() + timeout;
        let (slot, mut completion) = oneshot::channel();
        {
            let mut table = self.shared.pending.lock().await;
            if let Some(closed) = &table.closed {
                return Err(closed.clone().into());
            }
            table.calls.insert(
                id,
                PendingCall {
                    method: method.to_string(),
                    issued_at: Instant::now(),
                    slot,
                },
            );
        }

        debug!("➡️ [{}] {} (handle {:?})", id, method, handle);

        let sent = tokio::time::timeout_at(deadline, async {
            let mut sink = self.shared.sink.lock().await;
            sink.send(frame).await
        })
        .await;
        match sent {
            Ok(Ok(())) => {}
            Ok(Err(closed)) => {
                self.shared.pending.lock().await.calls.remove(&id);
                return Err(closed.into());
            }
            Err(_) => return self.abandon(id, method, timeout, &mut completion).await,
        }

        match tokio::time::timeout_at(deadline, &mut completion).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(self.closed_error().await.into()),
            Err(_) => self.abandon(id, method, timeout, &mut completion).await,
        }
    }

    /// Gives up on a call whose deadline passed. If the receive loop won the
    /// race and already completed the slot, that result stands.
    async fn abandon(
        &self,
        id: u64,
        method: &str,
        timeout: Duration,
        completion: &mut oneshot::Receiver<Result<Value, RpcError>>,
    ) -> Result<Value, RpcError> {
        let removed = self.shared.pending.lock().await.calls.remove(&id);
        if removed.is_some() {
            warn!("⏱️ [{}] {} timed out after {:?}", id, method, timeout);
            return Err(RpcError::Timeout {
                method: method.to_string(),
                after: timeout,
            });
        }
        match completion.try_recv() {
            Ok(result) => result,
            Err(_) => Err(self.closed_error().await.into()),
        }
    }

    async fn closed_error(&self) -> ClosedError {
        self.shared
            .pending
            .lock()
            .await
            .closed
            .clone()
            .unwrap_or_else(|| ClosedError::new(CloseReason::LocalClose))
    }

    pub async fn is_closed(&self) -> bool {
        self.shared.pending.lock().await.closed.is_some()
    }

    /// True (once) if the engine has reported `handle` closed.
    pub async fn take_closed(&self, handle: i64) -> bool {
        self.shared.pending.lock().await.closed_handles.remove(&handle)
    }

    /// Forgets an earlier close report, for a handle number the engine has
    /// just handed out again.
    pub async fn forget_closed(&self, handle: i64) {
        self.shared.pending.lock().await.closed_handles.remove(&handle);
    }

    /// Number of calls currently waiting for a reply.
    pub async fn outstanding(&self) -> usize {
        self.shared.pending.lock().await.calls.len()
    }

    /// Closes the transport and fails every outstanding call. Idempotent.
    pub async fn close(&self) {
        self.shared.sink.lock().await.close().await;
        self.shared
            .shut_down(ClosedError::new(CloseReason::LocalClose))
            .await;
        self.reader.abort();
    }
}

impl Drop for RpcClient {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

async fn receive_loop(
    shared: Arc<Shared>,
    mut stream: Box<dyn FrameStream>,
    notifications: Option<mpsc::UnboundedSender<Notification>>,
) {
    let reason = loop {
        match stream.receive().await {
            Ok(frame) => shared.dispatch(&frame, notifications.as_ref()).await,
            Err(closed) => break closed,
        }
    };
    shared.shut_down(reason).await;
}

impl Shared {
    async fn dispatch(&self, frame: &str, notifications: Option<&mpsc::UnboundedSender<Notification>>) {
        let message: Value = match serde_json::from_str(frame) {
            Ok(value) => value,
            Err(e) => {
                warn!("⚠️ Skipping malformed frame from engine: {}", e);
                return;
            }
        };

        let closed = closed_handles(&message);
        let id = message.get("id").and_then(Value::as_u64);
        if let Some(id) = id {
            let call = {
                let mut table = self.pending.lock().await;
                table.closed_handles.extend(closed.iter().copied());
                table.calls.remove(&id)
            };
            if let Some(call) = call {
                let outcome = match message.get("error") {
                    Some(error) => Err(RpcError::remote(&call.method, error)),
                    None => Ok(message.get("result").cloned().unwrap_or(Value::Null)),
                };
                debug!("⬅️ [{}] {} answered in {:?}", id, call.method, call.issued_at.elapsed());
                if call.slot.send(outcome).is_err() {
                    debug!("Caller for [{}] went away before the reply", id);
                }

                if !closed.is_empty() {
                    deliver(
                        notifications,
                        Notification {
                            method: None,
                            params: Value::Null,
                            late_id: None,
                            closed_handles: closed,
                        },
                    );
                }
                return;
            }
            debug!("📭 Reply for unknown or abandoned request {}", id);
        } else if !closed.is_empty() {
            self.pending.lock().await.closed_handles.extend(closed.iter().copied());
        }

        deliver(notifications, Notification::from_message(&message, id));
    }

    /// First caller wins: records the close reason and fails all pending calls.
    async fn shut_down(&self, reason: ClosedError) {
        let mut table = self.pending.lock().await;
        if table.closed.is_none() {
            match &reason.reason {
                CloseReason::LocalClose => info!("🔒 Engine session closed"),
                other => warn!("🔌 Engine session lost: {}", other),
            }
            table.closed = Some(reason.clone());
        }
        let closed = table.closed.clone().unwrap_or(reason);
        for (id, call) in table.calls.drain() {
            debug!("Failing [{}] {}: {}", id, call.method, closed);
            let _ = call.slot.send(Err(closed.clone().into()));
        }
    }
}

fn deliver(notifications: Option<&mpsc::UnboundedSender<Notification>>, notification: Notification) {
    match notifications {
        Some(tx) => {
            if tx.send(notification).is_err() {
                debug!("Notification sink dropped; discarding");
            }
        }
        None => debug!("Discarding notification {:?}", notification.method),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::loopback;
    use serde_json::json;

    fn client() -> (RpcClient, crate::transport::LoopbackPeer, mpsc::UnboundedReceiver<Notification>) {
        let (session, peer) = loopback(None);
        let (tx, rx) = mpsc::unbounded_channel();
        (RpcClient::start(session, Some(tx)), peer, rx)
    }

    #[tokio::test]
    async fn test_request_envelope_shape() {
        let (rpc, mut peer, _notes) = client();
        let call = tokio::spawn(async move {
            rpc.call_on(Some(GLOBAL_HANDLE), "GetDocList", json!([]), Duration::from_secs(1))
                .await
        });

        let request = peer.recv_json().await.unwrap();
        assert_eq!(request["jsonrpc"], "2.0");
        assert_eq!(request["id"], 1);
        assert_eq!(request["method"], "GetDocList");
        assert_eq!(request["handle"], -1);
        assert_eq!(request["params"], json!([]));

        peer.send_json(&json!({"jsonrpc": "2.0", "id": 1, "result": {"qDocList": []}}));
        assert_eq!(call.await.unwrap().unwrap(), json!({"qDocList": []}));
    }

    #[tokio::test]
    async fn test_handle_omitted_for_plain_calls() {
        let (rpc, mut peer, _notes) = client();
        let call = tokio::spawn(async move { rpc.call("Ping", json!([]), Duration::from_secs(1)).await });

        let request = peer.recv_json().await.unwrap();
        assert!(request.get("handle").is_none());
        peer.send_json(&json!({"id": request["id"], "result": null}));
        assert_eq!(call.await.unwrap().unwrap(), Value::Null);
    }

    #[tokio::test]
    async fn test_ids_strictly_increase() {
        let (rpc, mut peer, _notes) = client();
        let rpc = Arc::new(rpc);

        let mut seen = Vec::new();
        for _ in 0..3 {
            let rpc = rpc.clone();
            let call = tokio::spawn(async move { rpc.call("Ping", json!([]), Duration::from_secs(1)).await });
            let request = peer.recv_json().await.unwrap();
            let id = request["id"].as_u64().unwrap();
            peer.send_json(&json!({"id": id, "result": {}}));
            call.await.unwrap().unwrap();
            seen.push(id);
        }
        assert_eq!(seen, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_unsolicited_message_goes_to_sink() {
        let (rpc, peer, mut notes) = client();
        peer.send_json(&json!({
            "jsonrpc": "2.0",
            "method": "OnConnected",
            "params": {"qSessionState": "SESSION_CREATED"}
        }));

        let note = notes.recv().await.unwrap();
        assert_eq!(note.method.as_deref(), Some("OnConnected"));
        assert_eq!(note.params["qSessionState"], "SESSION_CREATED");
        assert_eq!(note.late_id, None);
        assert_eq!(rpc.outstanding().await, 0);
    }

    #[tokio::test]
    async fn test_malformed_frames_are_skipped() {
        let (rpc, mut peer, _notes) = client();
        let call = tokio::spawn(async move { rpc.call("Ping", json!([]), Duration::from_secs(1)).await });

        let request = peer.recv_json().await.unwrap();
        peer.send("not json {");
        peer.send_json(&json!({"id": request["id"], "result": {"ok": true}}));
        assert_eq!(call.await.unwrap().unwrap(), json!({"ok": true}));
    }

    #[tokio::test]
    async fn test_piggybacked_close_is_forwarded() {
        let (rpc, mut peer, mut notes) = client();
        let call = tokio::spawn(async move { rpc.call("Ping", json!([]), Duration::from_secs(1)).await });

        let request = peer.recv_json().await.unwrap();
        peer.send_json(&json!({"id": request["id"], "result": {}, "close": [3]}));
        call.await.unwrap().unwrap();

        let note = notes.recv().await.unwrap();
        assert_eq!(note.closed_handles, vec![3]);
    }

    #[tokio::test]
    async fn test_closed_handles_are_recorded_before_the_reply_completes() {
        let (rpc, mut peer, _notes) = client();
        let rpc = Arc::new(rpc);
        let caller = rpc.clone();
        let call = tokio::spawn(async move { caller.call("DoSave", json!([]), Duration::from_secs(1)).await });

        let request = peer.recv_json().await.unwrap();
        peer.send_json(&json!({"id": request["id"], "result": {}, "close": [3]}));
        call.await.unwrap().unwrap();

        assert!(rpc.take_closed(3).await);
        assert!(!rpc.take_closed(3).await);

        peer.send_json(&json!({"method": "OnObjectClosed", "close": [4]}));
        let call = {
            let caller = rpc.clone();
            tokio::spawn(async move { caller.call("Ping", json!([]), Duration::from_secs(1)).await })
        };
        let request = peer.recv_json().await.unwrap();
        peer.send_json(&json!({"id": request["id"], "result": {}, "close": [5]}));
        call.await.unwrap().unwrap();

        assert!(rpc.take_closed(4).await);
        rpc.forget_closed(5).await;
        assert!(!rpc.take_closed(5).await);
    }

    #[tokio::test]
    async fn test_calls_fail_after_close() {
        let (rpc, _peer, _notes) = client();
        rpc.close().await;
        rpc.close().await;

        assert!(rpc.is_closed().await);
        let err = rpc.call("Ping", json!([]), Duration::from_secs(1)).await.unwrap_err();
        match err {
            RpcError::Closed(closed) => assert_eq!(closed.reason, CloseReason::LocalClose),
            other => panic!("unexpected {:?}", other),
        }
    }
}

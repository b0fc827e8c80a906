#![allow(dead_code)]

use retainer_engine::transport::{TransportSession, loopback};
use serde_json::{Value, json};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;

/// What the scripted engine does with one request.
pub enum Reply {
    Result(Value),
    Error(i64, &'static str),
    /// Full envelope; the request id is filled in.
    With(Value),
    Silent,
    HangUp,
}

#[derive(Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<(String, Option<i64>)>>>);

impl CallLog {
    pub fn methods(&self) -> Vec<String> {
        self.0.lock().unwrap().iter().map(|(m, _)| m.clone()).collect()
    }

    pub fn calls(&self) -> Vec<(String, Option<i64>)> {
        self.0.lock().unwrap().clone()
    }
}

/// Serves requests from a loopback session with `respond` until the client
/// closes or a `Reply::HangUp` is produced.
pub fn scripted_engine<F>(respond: F) -> (TransportSession, CallLog, JoinHandle<()>)
where
    F: Fn(&Value) -> Reply + Send + 'static,
{
    let (session, mut peer) = loopback(None);
    let log = CallLog::default();
    let recorded = log.clone();

    let task = tokio::spawn(async move {
        peer.send_json(&json!({
            "jsonrpc": "2.0",
            "method": "OnConnected",
            "params": {"qSessionState": "SESSION_CREATED"}
        }));
        while let Some(request) = peer.recv_json().await {
            let method = request["method"].as_str().unwrap_or_default().to_string();
            recorded
                .0
                .lock()
                .unwrap()
                .push((method, request["handle"].as_i64()));
            match respond(&request) {
                Reply::Result(result) => {
                    peer.send_json(&json!({"jsonrpc": "2.0", "id": request["id"], "result": result}));
                }
                Reply::Error(code, message) => {
                    peer.send_json(&json!({
                        "jsonrpc": "2.0",
                        "id": request["id"],
                        "error": {"code": code, "message": message}
                    }));
                }
                Reply::With(mut envelope) => {
                    envelope["id"] = request["id"].clone();
                    peer.send_json(&envelope);
                }
                Reply::Silent => {}
                Reply::HangUp => {
                    peer.hang_up();
                    return;
                }
            }
        }
    });
    (session, log, task)
}

pub fn doc_reply(handle: i64) -> Reply {
    Reply::Result(json!({"qReturn": {"qType": "Doc", "qHandle": handle, "qGenericId": "x"}}))
}

pub fn version_reply() -> Reply {
    Reply::Result(json!({"qVersion": {"qComponentVersion": "12.1477.4"}}))
}

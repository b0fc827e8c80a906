//! In-process transport. Drives the RPC and engine layers without a network;
//! the `LoopbackPeer` plays the server.

use super::{FrameSink, FrameStream, TransportSession};
use crate::error::{CloseReason, ClosedError};
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tokio::sync::mpsc;

pub fn loopback(idle_timeout: Option<Duration>) -> (TransportSession, LoopbackPeer) {
    let (to_peer, from_client) = mpsc::unbounded_channel();
    let (to_client, from_peer) = mpsc::unbounded_channel();

    let session = TransportSession::from_parts(
        Box::new(LoopbackSink { tx: Some(to_peer) }),
        Box::new(LoopbackStream { rx: from_peer }),
        idle_timeout,
    );
    let peer = LoopbackPeer {
        to_client: Some(to_client),
        from_client,
    };
    (session, peer)
}

struct LoopbackSink {
    tx: Option<mpsc::UnboundedSender<String>>,
}

#[async_trait]
impl FrameSink for LoopbackSink {
    async fn send(&mut self, frame: String) -> Result<(), ClosedError> {
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| ClosedError::new(CloseReason::LocalClose))?;
        tx.send(frame)
            .map_err(|_| ClosedError::new(CloseReason::PeerClosed))
    }

    async fn close(&mut self) {
        self.tx = None;
    }
}

struct LoopbackStream {
    rx: mpsc::UnboundedReceiver<String>,
}

#[async_trait]
impl FrameStream for LoopbackStream {
    async fn receive(&mut self) -> Result<String, ClosedError> {
        self.rx
            .recv()
            .await
            .ok_or_else(|| ClosedError::new(CloseReason::PeerClosed))
    }
}

/// The server side of a loopback session.
pub struct LoopbackPeer {
    to_client: Option<mpsc::UnboundedSender<String>>,
    from_client: mpsc::UnboundedReceiver<String>,
}

impl LoopbackPeer {
    /// Next frame from the client, `None` once the client closed.
    pub async fn recv(&mut self) -> Option<String> {
        self.from_client.recv().await
    }

    /// Next frame from the client parsed as JSON. Malformed frames are skipped.
    pub async fn recv_json(&mut self) -> Option<Value> {
        loop {
            let frame = self.recv().await?;
            if let Ok(value) = serde_json::from_str(&frame) {
                return Some(value);
            }
        }
    }

    pub fn send(&self, frame: impl Into<String>) -> bool {
        match &self.to_client {
            Some(tx) => tx.send(frame.into()).is_ok(),
            None => false,
        }
    }

    pub fn send_json(&self, value: &Value) -> bool {
        self.send(value.to_string())
    }

    /// Closes the server-to-client direction; the client sees `PeerClosed`.
    pub fn hang_up(&mut self) {
        self.to_client = None;
    }
}

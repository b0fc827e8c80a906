//! Message channel to the engine.
//!
//! A `TransportSession` moves whole JSON text frames. It can be split into a
//! `FrameSink` and a `FrameStream` so one task owns reading while callers
//! share the writer.

use crate::error::{CloseReason, ClosedError, ConnectError};
use async_trait::async_trait;
use retainer_core::endpoint::Endpoint;
use std::time::Duration;

pub mod loopback;
pub mod websocket;

pub use loopback::{LoopbackPeer, loopback};

#[async_trait]
pub trait FrameSink: Send {
    async fn send(&mut self, frame: String) -> Result<(), ClosedError>;

    /// Idempotent.
    async fn close(&mut self);
}

#[async_trait]
pub trait FrameStream: Send {
    /// Waits for the next complete text frame.
    async fn receive(&mut self) -> Result<String, ClosedError>;
}

#[derive(Debug, Clone)]
pub struct TransportSettings {
    pub connect_timeout: Duration,
    pub idle_timeout: Option<Duration>,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            idle_timeout: Some(Duration::from_secs(600)),
        }
    }
}

pub struct TransportSession {
    sink: Box<dyn FrameSink>,
    stream: Box<dyn FrameStream>,
}

impl TransportSession {
    /// Opens a mutual-TLS WebSocket to the endpoint.
    pub async fn open(endpoint: &Endpoint, settings: &TransportSettings) -> Result<Self, ConnectError> {
        websocket::connect(endpoint, settings).await
    }

    pub fn from_parts(
        sink: Box<dyn FrameSink>,
        stream: Box<dyn FrameStream>,
        idle_timeout: Option<Duration>,
    ) -> Self {
        let stream: Box<dyn FrameStream> = match idle_timeout {
            Some(idle) => Box::new(IdleBounded { inner: stream, idle }),
            None => stream,
        };
        Self { sink, stream }
    }

    pub async fn send(&mut self, frame: String) -> Result<(), ClosedError> {
        self.sink.send(frame).await
    }

    pub async fn receive(&mut self) -> Result<String, ClosedError> {
        self.stream.receive().await
    }

    pub async fn close(&mut self) {
        self.sink.close().await;
    }

    pub fn into_parts(self) -> (Box<dyn FrameSink>, Box<dyn FrameStream>) {
        (self.sink, self.stream)
    }
}

struct IdleBounded {
    inner: Box<dyn FrameStream>,
    idle: Duration,
}

#[async_trait]
impl FrameStream for IdleBounded {
    async fn receive(&mut self) -> Result<String, ClosedError> {
        match tokio::time::timeout(self.idle, self.inner.receive()).await {
            Ok(result) => result,
            Err(_) => Err(ClosedError::new(CloseReason::IdleTimeout(self.idle))),
        }
    }
}

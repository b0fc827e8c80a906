//! Retainer Engine - secure RPC session layer for the Qlik Sense Engine API
//!
//! - transport: mutual-TLS WebSocket (and an in-process loopback)
//! - rpc: JSON-RPC framing, id correlation, timeouts
//! - engine: session/app operations behind the `AppEngine` trait

pub mod engine;
pub mod error;
pub mod rpc;
pub mod tls;
pub mod transport;

pub use engine::{AppEngine, AppHandle, DocEntry, EngineHandle, EngineSettings, MethodCall, SessionToken};
pub use error::{CloseReason, ClosedError, ConnectError, EngineError, RpcError};
pub use rpc::{Notification, RpcClient};
pub use transport::{TransportSession, TransportSettings};

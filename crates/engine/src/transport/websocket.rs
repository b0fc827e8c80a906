use super::{FrameSink, FrameStream, TransportSession, TransportSettings};
use crate::error::{CloseReason, ClosedError, ConnectError};
use crate::tls;
use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use retainer_core::endpoint::Endpoint;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{Connector, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

const USER_HEADER: &str = "X-Qlik-User";

pub(super) async fn connect(
    endpoint: &Endpoint,
    settings: &TransportSettings,
) -> Result<TransportSession, ConnectError> {
    let tls = tls::client_config(&endpoint.credentials)?;
    let url = endpoint.url();

    let mut request = url
        .as_str()
        .into_client_request()
        .map_err(|e| ConnectError::InvalidEndpoint {
            url: url.clone(),
            reason: e.to_string(),
        })?;
    let user = HeaderValue::from_str(&endpoint.user.header_value()).map_err(|e| {
        ConnectError::InvalidEndpoint {
            url: url.clone(),
            reason: format!("bad user header: {e}"),
        }
    })?;
    request.headers_mut().insert(USER_HEADER, user);

    info!("🔌 Connecting to {} as {}", url, endpoint.user.header_value());

    let connecting = tokio_tungstenite::connect_async_tls_with_config(
        request,
        None,
        true,
        Some(Connector::Rustls(tls)),
    );
    let (socket, response) = match tokio::time::timeout(settings.connect_timeout, connecting).await {
        Ok(Ok(pair)) => pair,
        Ok(Err(e)) => return Err(classify(&url, e)),
        Err(_) => {
            return Err(ConnectError::Timeout {
                url,
                after: settings.connect_timeout,
            });
        }
    };

    info!("✅ Engine session established ({} {})", url, response.status());

    let (sink, stream) = socket.split();
    Ok(TransportSession::from_parts(
        Box::new(WsSink { inner: sink, closed: false }),
        Box::new(WsFrames { inner: stream }),
        settings.idle_timeout,
    ))
}

fn classify(url: &str, err: WsError) -> ConnectError {
    let url = url.to_string();
    match err {
        WsError::Io(e) => ConnectError::Network {
            url,
            reason: e.to_string(),
        },
        WsError::Url(e) => ConnectError::InvalidEndpoint {
            url,
            reason: e.to_string(),
        },
        WsError::Http(response) => ConnectError::Handshake {
            url,
            reason: format!("upgrade rejected with HTTP {}", response.status()),
        },
        other => ConnectError::Handshake {
            url,
            reason: other.to_string(),
        },
    }
}

struct WsSink {
    inner: SplitSink<Socket, Message>,
    closed: bool,
}

#[async_trait]
impl FrameSink for WsSink {
    async fn send(&mut self, frame: String) -> Result<(), ClosedError> {
        if self.closed {
            return Err(ClosedError::new(CloseReason::LocalClose));
        }
        self.inner
            .send(Message::Text(frame.into()))
            .await
            .map_err(ClosedError::io)
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Err(e) = self.inner.close().await {
            debug!("Socket close reported: {}", e);
        }
    }
}

struct WsFrames {
    inner: SplitStream<Socket>,
}

#[async_trait]
impl FrameStream for WsFrames {
    async fn receive(&mut self) -> Result<String, ClosedError> {
        loop {
            match self.inner.next().await {
                Some(Ok(Message::Text(text))) => return Ok(text.to_string()),
                Some(Ok(Message::Close(frame))) => {
                    debug!("Engine sent close frame: {:?}", frame);
                    return Err(ClosedError::new(CloseReason::PeerClosed));
                }
                Some(Ok(other)) => {
                    debug!("Skipping non-text frame ({} bytes)", other.len());
                }
                Some(Err(e)) => return Err(ClosedError::io(e)),
                None => return Err(ClosedError::new(CloseReason::PeerClosed)),
            }
        }
    }
}

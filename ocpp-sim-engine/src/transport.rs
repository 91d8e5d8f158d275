//! WebSocket transport
//!
//! Owns the connection to the central system: connect with the OCPP
//! subprotocol, serialized sends, a read half handed to the receive loop, and
//! close. It knows nothing about the protocol beyond text frames.

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::{
    connect_async_with_config,
    tungstenite::{
        client::IntoClientRequest,
        http::{header, HeaderValue},
        protocol::WebSocketConfig,
        Message,
    },
    MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, info, warn};

use crate::config::OCPP_SUBPROTOCOL;
use crate::error::OcppError;
use crate::ocpp::OcppMessage;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;

/// Connection lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Closing,
}

/// Engine-lifetime handle on the (re)established connection
pub struct Transport {
    url: String,
    state: RwLock<ConnectionState>,
    sink: Mutex<Option<WsSink>>,
}

/// Read half of one connection
pub struct FrameStream {
    inner: SplitStream<WsStream>,
}

impl FrameStream {
    /// Next text frame. `Ok(None)` means the peer closed the connection.
    pub async fn next_text(&mut self) -> Result<Option<String>, OcppError> {
        loop {
            match self.inner.next().await {
                Some(Ok(Message::Text(text))) => {
                    let text = text.as_str().to_string();
                    debug!(at = %chrono::Utc::now().to_rfc3339(), "<< {}", text);
                    return Ok(Some(text));
                }
                Some(Ok(Message::Close(frame))) => {
                    info!("WebSocket closed by server: {:?}", frame);
                    return Ok(None);
                }
                Some(Ok(Message::Binary(_))) => {
                    warn!("Ignoring binary frame");
                }
                Some(Ok(_)) => {
                    // Ping/Pong are answered by tungstenite
                }
                Some(Err(e)) => return Err(OcppError::WebSocket(e)),
                None => {
                    info!("WebSocket stream ended");
                    return Ok(None);
                }
            }
        }
    }
}

impl Transport {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            state: RwLock::new(ConnectionState::Disconnected),
            sink: Mutex::new(None),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    /// Whether a send has a chance of reaching the wire
    pub fn is_usable(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    fn set_state(&self, next: ConnectionState) {
        let prev = std::mem::replace(&mut *self.state.write(), next);
        if prev != next {
            debug!("Connection state {:?} -> {:?}", prev, next);
        }
    }

    /// Open the WebSocket and keep the write half. Returns the read half.
    pub async fn connect(&self) -> Result<FrameStream, OcppError> {
        self.set_state(ConnectionState::Connecting);

        match self.open().await {
            Ok((sink, stream)) => {
                *self.sink.lock().await = Some(sink);
                self.set_state(ConnectionState::Connected);
                info!("WebSocket connected to {}", self.url);
                Ok(FrameStream { inner: stream })
            }
            Err(e) => {
                self.set_state(ConnectionState::Disconnected);
                Err(e)
            }
        }
    }

    async fn open(&self) -> Result<(WsSink, SplitStream<WsStream>), OcppError> {
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| OcppError::InvalidUrl(format!("{}: {}", self.url, e)))?;
        request.headers_mut().insert(
            header::SEC_WEBSOCKET_PROTOCOL,
            HeaderValue::from_static(OCPP_SUBPROTOCOL),
        );

        let ws_config = WebSocketConfig {
            max_message_size: Some(64 * 1024),
            max_frame_size: Some(16 * 1024),
            ..Default::default()
        };

        let (ws_stream, response) = connect_async_with_config(request, Some(ws_config), false).await?;

        let accepted_protocol = response
            .headers()
            .get(header::SEC_WEBSOCKET_PROTOCOL)
            .and_then(|v| v.to_str().ok());

        if accepted_protocol != Some(OCPP_SUBPROTOCOL) {
            warn!(
                "Central system did not accept {} subprotocol, got: {:?}",
                OCPP_SUBPROTOCOL, accepted_protocol
            );
        }

        Ok(ws_stream.split())
    }

    /// Send one message. Concurrent callers are serialized on the sink lock.
    pub async fn send(&self, msg: &OcppMessage) -> Result<(), OcppError> {
        if !self.is_usable() {
            return Err(OcppError::NotConnected);
        }

        let text = msg.to_text();
        let mut guard = self.sink.lock().await;
        let sink = guard.as_mut().ok_or(OcppError::NotConnected)?;

        debug!(at = %chrono::Utc::now().to_rfc3339(), ">> {}", text);
        sink.send(Message::Text(text.into())).await?;
        Ok(())
    }

    /// Close the write half if still open. Close-time errors are only logged.
    pub async fn close(&self) {
        if self.state() == ConnectionState::Disconnected {
            return;
        }
        self.set_state(ConnectionState::Closing);

        if let Some(mut sink) = self.sink.lock().await.take() {
            if let Err(e) = sink.close().await {
                debug!("Ignoring error while closing WebSocket: {}", e);
            }
        }

        self.set_state(ConnectionState::Disconnected);
    }
}

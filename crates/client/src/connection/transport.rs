//! Stream transports.
//!
//! A [`StreamConnector`] opens a bidirectional message stream and hands it
//! back as a pair of channels. The session connection never sees the socket
//! itself: dropping the [`TransportStream`] closes the transport, and the
//! incoming channel ending means the transport closed.

use std::future::Future;
use std::pin::Pin;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{
        client::IntoClientRequest,
        http::{header::COOKIE, HeaderValue},
        Message as WsMessage,
    },
};
use url::Url;

use crate::error::{ClientError, ClientResult};

/// Channel capacity in each direction.
const CHANNEL_CAPACITY: usize = 256;

/// A message on the session stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireMessage {
    Text(String),
    Binary(Vec<u8>),
}

/// Everything needed to open a session stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamRequest {
    /// `ws://` or `wss://` URL including any token query parameter.
    pub url: Url,
    /// `Cookie` header value for the handshake, if any.
    pub cookie: Option<String>,
}

/// An open stream.
#[derive(Debug)]
pub struct TransportStream {
    /// Messages to send to the server.
    pub outgoing: mpsc::Sender<WireMessage>,
    /// Messages received from the server; yields `None` once closed.
    pub incoming: mpsc::Receiver<WireMessage>,
}

/// Opens session streams.
///
/// This trait abstracts the transport, allowing for different
/// implementations (WebSocket, in-memory for testing).
pub trait StreamConnector: Send + Sync {
    /// Opens a stream. Resolves once the transport is open.
    fn connect(
        &self,
        request: StreamRequest,
    ) -> Pin<Box<dyn Future<Output = ClientResult<TransportStream>> + Send + '_>>;
}

/// WebSocket transport built on `tokio-tungstenite`.
#[derive(Debug, Default, Clone, Copy)]
pub struct WebSocketConnector;

impl WebSocketConnector {
    pub fn new() -> Self {
        Self
    }

    async fn connect_internal(&self, request: StreamRequest) -> ClientResult<TransportStream> {
        let host = request.url.host_str().unwrap_or_default().to_string();
        let connectivity = |message: String| ClientError::Connectivity {
            endpoint: host.clone(),
            message,
        };

        let mut ws_request = request
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| connectivity(e.to_string()))?;
        if let Some(cookie) = &request.cookie {
            let value = HeaderValue::from_str(cookie)
                .map_err(|e| ClientError::InvalidInput(format!("invalid cookie: {}", e)))?;
            ws_request.headers_mut().insert(COOKIE, value);
        }

        tracing::debug!(
            "Opening stream to {}://{}{}",
            request.url.scheme(),
            host,
            request.url.path()
        );

        let (ws_stream, _) = connect_async(ws_request)
            .await
            .map_err(|e| connectivity(format!("WebSocket connection failed: {}", e)))?;

        let (mut ws_sink, mut ws_source) = ws_stream.split();

        let (outgoing_tx, mut outgoing_rx) = mpsc::channel::<WireMessage>(CHANNEL_CAPACITY);
        let (incoming_tx, incoming_rx) = mpsc::channel::<WireMessage>(CHANNEL_CAPACITY);

        // Writer: runs until every sender is dropped, then closes the socket.
        tokio::spawn(async move {
            while let Some(message) = outgoing_rx.recv().await {
                let frame = match message {
                    WireMessage::Text(text) => WsMessage::Text(text),
                    WireMessage::Binary(bytes) => WsMessage::Binary(bytes),
                };
                if let Err(e) = ws_sink.send(frame).await {
                    tracing::debug!("failed to send stream message: {}", e);
                    break;
                }
            }
            let _ = ws_sink.close().await;
        });

        // Reader: dropping `incoming_tx` signals the close.
        tokio::spawn(async move {
            while let Some(result) = ws_source.next().await {
                let message = match result {
                    Ok(WsMessage::Text(text)) => WireMessage::Text(text),
                    Ok(WsMessage::Binary(bytes)) => WireMessage::Binary(bytes),
                    Ok(WsMessage::Close(frame)) => {
                        tracing::debug!("server closed stream: {:?}", frame);
                        break;
                    }
                    Ok(_) => continue,
                    Err(e) => {
                        tracing::debug!("stream error: {}", e);
                        break;
                    }
                };
                if incoming_tx.send(message).await.is_err() {
                    break;
                }
            }
        });

        Ok(TransportStream {
            outgoing: outgoing_tx,
            incoming: incoming_rx,
        })
    }
}

impl StreamConnector for WebSocketConnector {
    fn connect(
        &self,
        request: StreamRequest,
    ) -> Pin<Box<dyn Future<Output = ClientResult<TransportStream>> + Send + '_>> {
        Box::pin(self.connect_internal(request))
    }
}

//! Transport - one WebSocket to the browser's debugging endpoint
//!
//! Framing is the WebSocket message: one text message carries exactly one
//! JSON message. Fragmented frames are reassembled by tungstenite before we
//! see them. Binary messages are accepted only if they are valid UTF-8.

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::error::ProtocolError;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async_with_config, MaybeTlsStream, WebSocketStream};
use url::Url;

use crate::error::{Error, Result};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// printToPDF payloads are base64 in a single message and easily exceed
/// tungstenite's defaults.
const MAX_MESSAGE_SIZE: usize = 512 << 20;

/// Write half of a connection.
pub struct FrameSink {
    inner: SplitSink<WsStream, Message>,
}

/// Read half of a connection. Owned by the dispatch loop.
pub struct FrameStream {
    inner: SplitStream<WsStream>,
}

/// Open a connection to a `ws://` or `wss://` debugging endpoint.
pub async fn connect(endpoint: &str) -> Result<(FrameSink, FrameStream)> {
    let url = Url::parse(endpoint).map_err(|e| Error::ConnectionFailed {
        endpoint: endpoint.to_string(),
        reason: e.to_string(),
    })?;
    if !matches!(url.scheme(), "ws" | "wss") {
        return Err(Error::ConnectionFailed {
            endpoint: endpoint.to_string(),
            reason: format!("unsupported scheme '{}'", url.scheme()),
        });
    }

    let mut config = WebSocketConfig::default();
    config.max_message_size = Some(MAX_MESSAGE_SIZE);
    config.max_frame_size = Some(MAX_MESSAGE_SIZE);

    let (ws, _) = connect_async_with_config(url.as_str(), Some(config), false)
        .await
        .map_err(|e| connect_error(endpoint, e))?;
    tracing::debug!(endpoint, "Transport connected");

    let (sink, stream) = ws.split();
    Ok((FrameSink { inner: sink }, FrameStream { inner: stream }))
}

fn connect_error(endpoint: &str, e: tungstenite::Error) -> Error {
    match e {
        tungstenite::Error::Io(io) if io.kind() == std::io::ErrorKind::ConnectionRefused => {
            Error::ConnectionRefused(endpoint.to_string())
        }
        other => Error::ConnectionFailed {
            endpoint: endpoint.to_string(),
            reason: other.to_string(),
        },
    }
}

impl FrameSink {
    pub async fn send(&mut self, frame: String) -> Result<()> {
        tracing::trace!(len = frame.len(), "-> frame");
        self.inner
            .send(Message::Text(frame))
            .await
            .map_err(|e| Error::WriteError(e.to_string()))
    }

    pub async fn close(&mut self) -> Result<()> {
        match self.inner.close().await {
            // The peer may have hung up first
            Ok(())
            | Err(tungstenite::Error::ConnectionClosed)
            | Err(tungstenite::Error::AlreadyClosed)
            | Err(tungstenite::Error::Io(_))
            | Err(tungstenite::Error::Protocol(ProtocolError::SendAfterClosing)) => Ok(()),
            Err(e) => Err(Error::WriteError(e.to_string())),
        }
    }
}

impl FrameStream {
    /// Next complete frame, or `None` once the peer has closed.
    pub async fn next_frame(&mut self) -> Result<Option<String>> {
        loop {
            match self.inner.next().await {
                Some(Ok(Message::Text(text))) => {
                    tracing::trace!(len = text.len(), "<- frame");
                    return Ok(Some(text));
                }
                Some(Ok(Message::Binary(bytes))) => {
                    return String::from_utf8(bytes)
                        .map(Some)
                        .map_err(|e| Error::ProtocolError(format!("binary frame: {}", e)));
                }
                Some(Ok(Message::Close(_))) | None => return Ok(None),
                // Ping/pong are answered by tungstenite itself
                Some(Ok(_)) => continue,
                Some(Err(
                    tungstenite::Error::ConnectionClosed
                    | tungstenite::Error::AlreadyClosed
                    | tungstenite::Error::Io(_),
                )) => return Ok(None),
                Some(Err(e)) => return Err(Error::ProtocolError(e.to_string())),
            }
        }
    }
}

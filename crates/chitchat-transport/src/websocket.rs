//! WebSocket transport implementation.
//!
//! Adapts an upgraded axum `WebSocket` to the [`Connection`] contract.

use async_trait::async_trait;
use axum::extract::ws::{self, Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use tracing::{debug, trace};

use crate::traits::{CloseFrame, Connection, FrameReader, FrameWriter, InboundFrame, TransportError};

/// An upgraded WebSocket connection.
pub struct WebSocketConnection {
    socket: WebSocket,
    remote_addr: Option<SocketAddr>,
}

impl WebSocketConnection {
    /// Wrap an upgraded socket.
    #[must_use]
    pub fn new(socket: WebSocket) -> Self {
        Self {
            socket,
            remote_addr: None,
        }
    }

    /// Record the peer address for logging.
    #[must_use]
    pub fn with_remote_addr(mut self, addr: SocketAddr) -> Self {
        self.remote_addr = Some(addr);
        self
    }
}

impl Connection for WebSocketConnection {
    type Reader = WebSocketReader;
    type Writer = WebSocketWriter;

    fn split(self) -> (Self::Reader, Self::Writer) {
        let (sink, stream) = self.socket.split();
        (WebSocketReader { stream }, WebSocketWriter { sink })
    }

    fn remote_addr(&self) -> Option<String> {
        self.remote_addr.map(|a| a.to_string())
    }
}

/// Receiving half of a [`WebSocketConnection`].
pub struct WebSocketReader {
    stream: SplitStream<WebSocket>,
}

#[async_trait]
impl FrameReader for WebSocketReader {
    async fn recv(&mut self) -> Result<Option<InboundFrame>, TransportError> {
        match self.stream.next().await {
            Some(Ok(Message::Text(text))) => Ok(Some(InboundFrame::Text(text))),
            Some(Ok(Message::Binary(data))) => Ok(Some(InboundFrame::Binary(data))),
            // axum answers pings on our behalf
            Some(Ok(Message::Ping(_))) => Ok(Some(InboundFrame::Ping)),
            Some(Ok(Message::Pong(_))) => Ok(Some(InboundFrame::Pong)),
            Some(Ok(Message::Close(frame))) => {
                let frame = frame.map(|f| CloseFrame::new(f.code, f.reason.into_owned()));
                debug!(close = ?frame, "Received close frame");
                Ok(Some(InboundFrame::Close(frame)))
            }
            Some(Err(e)) => Err(TransportError::ReceiveFailed(e.to_string())),
            None => {
                debug!("WebSocket stream ended");
                Ok(None)
            }
        }
    }
}

/// Sending half of a [`WebSocketConnection`].
pub struct WebSocketWriter {
    sink: SplitSink<WebSocket, Message>,
}

#[async_trait]
impl FrameWriter for WebSocketWriter {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        self.sink
            .send(Message::Text(text))
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    async fn ping(&mut self) -> Result<(), TransportError> {
        trace!("Sending ping");
        self.sink
            .send(Message::Ping(Vec::new()))
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    async fn close(&mut self, frame: CloseFrame) -> Result<(), TransportError> {
        let close = ws::CloseFrame {
            code: frame.code,
            reason: frame.reason.into(),
        };
        self.sink
            .send(Message::Close(Some(close)))
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }
}

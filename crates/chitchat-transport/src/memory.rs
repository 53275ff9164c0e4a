//! In-memory connection pair.
//!
//! [`pair`] returns a server-side [`MemoryConnection`] to hand to a session
//! and a [`MemoryPeer`] that plays the client. Dropping the peer looks like
//! an abrupt disconnect to the session.

use async_trait::async_trait;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;

use crate::traits::{CloseFrame, Connection, FrameReader, FrameWriter, InboundFrame, TransportError};

/// A frame written by the server side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundFrame {
    /// Text data frame.
    Text(String),
    /// Ping control frame.
    Ping,
    /// Close frame.
    Close(CloseFrame),
}

type Inbound = Result<InboundFrame, String>;

/// Error every server-side write returns once set.
type WriteFault = Arc<Mutex<Option<String>>>;

/// Create a connected server/client pair.
#[must_use]
pub fn pair() -> (MemoryConnection, MemoryPeer) {
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let fault = WriteFault::default();
    (
        MemoryConnection {
            inbound: inbound_rx,
            outbound: outbound_tx,
            fault: Arc::clone(&fault),
        },
        MemoryPeer {
            inbound: inbound_tx,
            outbound: outbound_rx,
            fault,
        },
    )
}

/// Server side of an in-memory connection.
pub struct MemoryConnection {
    inbound: mpsc::UnboundedReceiver<Inbound>,
    outbound: mpsc::UnboundedSender<OutboundFrame>,
    fault: WriteFault,
}

impl Connection for MemoryConnection {
    type Reader = MemoryReader;
    type Writer = MemoryWriter;

    fn split(self) -> (Self::Reader, Self::Writer) {
        (
            MemoryReader {
                inbound: self.inbound,
            },
            MemoryWriter {
                outbound: self.outbound,
                fault: self.fault,
                closed: false,
            },
        )
    }

    fn remote_addr(&self) -> Option<String> {
        Some("memory".to_string())
    }
}

/// Receiving half of a [`MemoryConnection`].
pub struct MemoryReader {
    inbound: mpsc::UnboundedReceiver<Inbound>,
}

#[async_trait]
impl FrameReader for MemoryReader {
    async fn recv(&mut self) -> Result<Option<InboundFrame>, TransportError> {
        match self.inbound.recv().await {
            Some(Ok(frame)) => Ok(Some(frame)),
            Some(Err(e)) => Err(TransportError::ReceiveFailed(e)),
            None => Ok(None),
        }
    }
}

/// Sending half of a [`MemoryConnection`].
pub struct MemoryWriter {
    outbound: mpsc::UnboundedSender<OutboundFrame>,
    fault: WriteFault,
    closed: bool,
}

impl MemoryWriter {
    fn push(&mut self, frame: OutboundFrame) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::ConnectionClosed);
        }
        let fault = self.fault.lock().unwrap_or_else(PoisonError::into_inner).clone();
        if let Some(e) = fault {
            return Err(TransportError::SendFailed(e));
        }
        self.outbound
            .send(frame)
            .map_err(|_| TransportError::ConnectionClosed)
    }
}

#[async_trait]
impl FrameWriter for MemoryWriter {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        self.push(OutboundFrame::Text(text))
    }

    async fn ping(&mut self) -> Result<(), TransportError> {
        self.push(OutboundFrame::Ping)
    }

    async fn close(&mut self, frame: CloseFrame) -> Result<(), TransportError> {
        let result = self.push(OutboundFrame::Close(frame));
        self.closed = true;
        result
    }
}

/// Client side of an in-memory connection.
pub struct MemoryPeer {
    inbound: mpsc::UnboundedSender<Inbound>,
    outbound: mpsc::UnboundedReceiver<OutboundFrame>,
    fault: WriteFault,
}

impl MemoryPeer {
    /// Send a frame to the server side.
    ///
    /// # Errors
    ///
    /// Returns an error if the server side has been dropped.
    pub fn send(&self, frame: InboundFrame) -> Result<(), TransportError> {
        self.inbound
            .send(Ok(frame))
            .map_err(|_| TransportError::ConnectionClosed)
    }

    /// Send a text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the server side has been dropped.
    pub fn send_text(&self, text: impl Into<String>) -> Result<(), TransportError> {
        self.send(InboundFrame::Text(text.into()))
    }

    /// Send a close frame with the given status.
    ///
    /// # Errors
    ///
    /// Returns an error if the server side has been dropped.
    pub fn close(&self, code: u16, reason: impl Into<String>) -> Result<(), TransportError> {
        self.send(InboundFrame::Close(Some(CloseFrame::new(code, reason))))
    }

    /// Make the server's next read fail with `error`.
    ///
    /// # Errors
    ///
    /// Returns an error if the server side has been dropped.
    pub fn fail(&self, error: impl Into<String>) -> Result<(), TransportError> {
        self.inbound
            .send(Err(error.into()))
            .map_err(|_| TransportError::ConnectionClosed)
    }

    /// Make every later server-side write fail with `error`. Reads are unaffected.
    pub fn fail_writes(&self, error: impl Into<String>) {
        *self.fault.lock().unwrap_or_else(PoisonError::into_inner) = Some(error.into());
    }

    /// Receive the next frame written by the server.
    ///
    /// Returns `None` once the server side is gone and all frames are drained.
    pub async fn recv(&mut self) -> Option<OutboundFrame> {
        self.outbound.recv().await
    }

    /// Receive the next text frame, skipping pings.
    ///
    /// Returns `None` on close or once the server side is gone.
    pub async fn recv_text(&mut self) -> Option<String> {
        loop {
            match self.outbound.recv().await? {
                OutboundFrame::Text(text) => return Some(text),
                OutboundFrame::Ping => continue,
                OutboundFrame::Close(_) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::close_code;

    #[tokio::test]
    async fn test_memory_pair_roundtrip() {
        let (conn, mut peer) = pair();
        let (mut reader, mut writer) = conn.split();

        peer.send_text("hi").unwrap();
        assert_eq!(
            reader.recv().await.unwrap(),
            Some(InboundFrame::Text("hi".into()))
        );

        writer.ping().await.unwrap();
        writer.send_text("hello".into()).await.unwrap();
        assert_eq!(peer.recv_text().await.as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn test_memory_writer_rejects_after_close() {
        let (conn, mut peer) = pair();
        let (_reader, mut writer) = conn.split();

        writer
            .close(CloseFrame::new(close_code::GOING_AWAY, "shutdown"))
            .await
            .unwrap();
        assert!(matches!(
            writer.send_text("late".into()).await,
            Err(TransportError::ConnectionClosed)
        ));
        assert_eq!(
            peer.recv().await,
            Some(OutboundFrame::Close(CloseFrame::new(1001, "shutdown")))
        );
    }

    #[tokio::test]
    async fn test_memory_fail_writes_keeps_reads() {
        let (conn, peer) = pair();
        let (mut reader, mut writer) = conn.split();

        writer.send_text("before".into()).await.unwrap();
        peer.fail_writes("boom");
        assert!(matches!(
            writer.send_text("after".into()).await,
            Err(TransportError::SendFailed(e)) if e == "boom"
        ));
        assert!(writer.ping().await.is_err());

        peer.send_text("still open").unwrap();
        assert_eq!(
            reader.recv().await.unwrap(),
            Some(InboundFrame::Text("still open".into()))
        );
    }

    #[tokio::test]
    async fn test_memory_peer_drop_ends_stream() {
        let (conn, peer) = pair();
        let (mut reader, mut writer) = conn.split();

        peer.fail("reset by peer").unwrap();
        drop(peer);

        assert!(matches!(
            reader.recv().await,
            Err(TransportError::ReceiveFailed(_))
        ));
        assert_eq!(reader.recv().await.unwrap(), None);
        assert!(writer.send_text("x".into()).await.is_err());
    }
}

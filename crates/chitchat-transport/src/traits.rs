//! Transport abstraction traits for ChitChat.
//!
//! These traits define what a session needs from a client connection,
//! allowing the session to be transport-agnostic.

use async_trait::async_trait;
use std::fmt;
use thiserror::Error;

/// WebSocket close status codes used by the gateway.
pub mod close_code {
    /// Normal closure.
    pub const NORMAL: u16 = 1000;
    /// Endpoint is going away (server shutdown, browser tab closed).
    pub const GOING_AWAY: u16 = 1001;
    /// No status code was present in the close frame.
    pub const NO_STATUS: u16 = 1005;
    /// Message exceeded the size limit.
    pub const MESSAGE_TOO_BIG: u16 = 1009;
    /// Server hit an unexpected condition.
    pub const INTERNAL_ERROR: u16 = 1011;

    /// Close codes that end a session without indicating a fault.
    #[must_use]
    pub fn is_expected(code: u16) -> bool {
        matches!(code, NORMAL | GOING_AWAY | NO_STATUS)
    }
}

/// A close frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseFrame {
    /// Status code.
    pub code: u16,
    /// Close reason, may be empty.
    pub reason: String,
}

impl CloseFrame {
    /// Create a close frame.
    #[must_use]
    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    /// Whether this close frame carries an expected status code.
    #[must_use]
    pub fn is_expected(&self) -> bool {
        close_code::is_expected(self.code)
    }
}

impl fmt::Display for CloseFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.reason.is_empty() {
            write!(f, "{}", self.code)
        } else {
            write!(f, "{} ({})", self.code, self.reason)
        }
    }
}

/// A frame received from the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundFrame {
    /// Text data frame.
    Text(String),
    /// Binary data frame.
    Binary(Vec<u8>),
    /// Ping control frame. Transports answer pings themselves.
    Ping,
    /// Pong control frame.
    Pong,
    /// Close frame, with its status if the peer sent one.
    Close(Option<CloseFrame>),
}

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection was closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Write did not finish before its deadline.
    #[error("Connection timed out")]
    Timeout,

    /// Failed to send data.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Failed to receive data.
    #[error("Receive failed: {0}")]
    ReceiveFailed(String),
}

/// The receiving half of a connection.
#[async_trait]
pub trait FrameReader: Send {
    /// Receive the next frame.
    ///
    /// Returns `None` if the underlying stream ended without a close frame.
    async fn recv(&mut self) -> Result<Option<InboundFrame>, TransportError>;
}

/// The sending half of a connection.
#[async_trait]
pub trait FrameWriter: Send {
    /// Send a text frame.
    async fn send_text(&mut self, text: String) -> Result<(), TransportError>;

    /// Send a ping control frame.
    async fn ping(&mut self) -> Result<(), TransportError>;

    /// Send a close frame.
    async fn close(&mut self, frame: CloseFrame) -> Result<(), TransportError>;
}

/// An upgraded, message-framed client connection.
pub trait Connection: Send + 'static {
    /// Receiving half.
    type Reader: FrameReader + 'static;
    /// Sending half.
    type Writer: FrameWriter + 'static;

    /// Split into independently owned halves.
    fn split(self) -> (Self::Reader, Self::Writer);

    /// Get the remote address of the connection, if available.
    fn remote_addr(&self) -> Option<String> {
        None
    }
}

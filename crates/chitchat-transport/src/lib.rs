//! # chitchat-transport
//!
//! Connection abstraction for ChitChat sessions.
//!
//! A session needs an already-upgraded, message-framed, full-duplex
//! connection. This crate describes that contract as traits and provides:
//!
//! - **WebSocket** - adapter over an axum `WebSocket`
//! - **Memory** - an in-process connection pair for tests and embedding
//!
//! ## Connection Split
//!
//! Every connection splits into a reader and a writer so the read pump can
//! run on its own task while the session loop remains the only writer.
//!
//! ```rust,ignore
//! use chitchat_transport::{Connection, FrameReader, FrameWriter};
//!
//! async fn echo(conn: impl Connection) {
//!     let (mut reader, mut writer) = conn.split();
//!     while let Ok(Some(frame)) = reader.recv().await {
//!         // Process frame
//!     }
//! }
//! ```

pub mod memory;
pub mod traits;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use traits::{
    close_code, CloseFrame, Connection, FrameReader, FrameWriter, InboundFrame, TransportError,
};

#[cfg(feature = "websocket")]
pub use websocket::WebSocketConnection;

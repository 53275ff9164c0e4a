//! # chitchat-protocol
//!
//! Wire protocol definitions for the ChitChat channel gateway.
//!
//! This crate defines what travels over a client connection and what is
//! appended to the channel log:
//!
//! - `ChannelMessage` - chat text and presence transitions (`message`, `join`, `leave`)
//! - `Identity` - the author attached to every message
//! - `Subject` - log subject naming (`CHITCHAT.<channel>.message`, ...)
//! - HTTP response bodies for the history and roster queries
//!
//! ## Example
//!
//! ```rust
//! use chitchat_protocol::{codec, ChannelMessage, Identity};
//! use chrono::Utc;
//!
//! let jon = Identity::new("u-1", "Jon Snow");
//! let message = ChannelMessage::text(jon, Utc::now(), "Winter is coming");
//!
//! let encoded = codec::encode(&message).unwrap();
//! let decoded = codec::decode(&encoded).unwrap();
//! assert_eq!(decoded, message);
//! ```

pub mod codec;
pub mod message;
pub mod response;
pub mod subject;

pub use codec::{decode, decode_identity, encode, encode_identity, ProtocolError};
pub use message::{ChannelMessage, Identity, MessageKind};
pub use response::{ErrorResponse, HistoryResponse, UsersResponse};
pub use subject::{validate_channel_name, Subject, STREAM_NAME};

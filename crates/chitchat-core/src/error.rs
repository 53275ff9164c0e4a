//! Gateway error type.

use chitchat_protocol::ProtocolError;
use thiserror::Error;

use crate::bus::BusError;
use crate::hub::HubError;

/// Errors surfaced by sessions, presence tracking and queries.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Invalid channel name.
    #[error("Invalid channel name: {0}")]
    InvalidChannel(&'static str),

    /// Bus operation failed.
    #[error(transparent)]
    Bus(#[from] BusError),

    /// Payload could not be encoded or decoded.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Session hub is gone.
    #[error(transparent)]
    Hub(#[from] HubError),
}

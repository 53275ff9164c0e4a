//! HTTP response bodies for the history and roster queries.

use serde::{Deserialize, Serialize};

use crate::message::{ChannelMessage, Identity};

/// Body of the history query.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryResponse {
    /// Messages in publish order.
    pub messages: Vec<ChannelMessage>,
}

/// Body of the roster query.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsersResponse {
    /// Identities currently present in the channel.
    pub users: Vec<Identity>,
}

/// Body returned alongside a non-2xx status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Human readable error.
    pub error: String,
}

impl ErrorResponse {
    /// Create an error body.
    #[must_use]
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}

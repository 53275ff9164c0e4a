//! Message types exchanged on a channel.
//!
//! Every frame delivered to a client is one JSON-encoded [`ChannelMessage`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The author of a message.
///
/// Produced by the identity provider in front of the gateway; the gateway
/// only looks at `id`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    /// Stable identity key.
    pub id: String,
    /// Human readable name.
    #[serde(rename = "name")]
    pub display_name: String,
    /// Avatar image URL.
    #[serde(rename = "avatar", default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

impl Identity {
    /// Create an identity without an avatar.
    #[must_use]
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            avatar_url: None,
        }
    }

    /// Attach an avatar URL.
    #[must_use]
    pub fn with_avatar(mut self, avatar_url: impl Into<String>) -> Self {
        self.avatar_url = Some(avatar_url.into());
        self
    }
}

/// The kind of a channel message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    /// Chat text typed by a client.
    Message,
    /// First session of an identity opened in the channel.
    Join,
    /// Last session of an identity closed in the channel.
    Leave,
}

impl MessageKind {
    /// Wire name of this kind.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Message => "message",
            MessageKind::Join => "join",
            MessageKind::Leave => "leave",
        }
    }

    /// Whether this kind is a presence transition.
    #[must_use]
    pub fn is_presence(&self) -> bool {
        matches!(self, MessageKind::Join | MessageKind::Leave)
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A message appended to a channel log and delivered to clients.
///
/// `text` is only ever present for [`MessageKind::Message`]; the
/// constructors uphold this and [`crate::codec::decode`] rejects payloads
/// that break it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelMessage {
    /// Message kind.
    #[serde(rename = "type")]
    pub kind: MessageKind,
    /// Author.
    pub from_user: Identity,
    /// When the gateway accepted the message.
    pub sent_at: DateTime<Utc>,
    /// Chat text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl ChannelMessage {
    /// Create a chat text message.
    #[must_use]
    pub fn text(from_user: Identity, sent_at: DateTime<Utc>, text: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::Message,
            from_user,
            sent_at,
            text: Some(text.into()),
        }
    }

    /// Create a join transition.
    #[must_use]
    pub fn join(from_user: Identity, sent_at: DateTime<Utc>) -> Self {
        Self::presence(MessageKind::Join, from_user, sent_at)
    }

    /// Create a leave transition.
    #[must_use]
    pub fn leave(from_user: Identity, sent_at: DateTime<Utc>) -> Self {
        Self::presence(MessageKind::Leave, from_user, sent_at)
    }

    /// Create a presence transition of the given kind.
    ///
    /// # Panics
    ///
    /// Panics in debug builds if `kind` is [`MessageKind::Message`].
    #[must_use]
    pub fn presence(kind: MessageKind, from_user: Identity, sent_at: DateTime<Utc>) -> Self {
        debug_assert!(kind.is_presence());
        Self {
            kind,
            from_user,
            sent_at,
            text: None,
        }
    }

    /// Check the text/kind invariant.
    #[must_use]
    pub fn is_well_formed(&self) -> bool {
        match self.kind {
            MessageKind::Message => self.text.is_some(),
            MessageKind::Join | MessageKind::Leave => self.text.is_none(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn jon() -> Identity {
        Identity::new("u-1", "Jon Snow").with_avatar("https://example.test/jon.png")
    }

    #[test]
    fn test_text_message_shape() {
        let at = Utc.with_ymd_and_hms(2022, 7, 27, 12, 0, 0).unwrap();
        let msg = ChannelMessage::text(jon(), at, "hello");

        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "message",
                "from_user": {"id": "u-1", "name": "Jon Snow", "avatar": "https://example.test/jon.png"},
                "sent_at": "2022-07-27T12:00:00Z",
                "text": "hello",
            })
        );
    }

    #[test]
    fn test_presence_message_omits_text() {
        let msg = ChannelMessage::leave(Identity::new("u-2", "Arya"), Utc::now());

        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], "leave");
        assert!(value.get("text").is_none());
        assert!(value["from_user"].get("avatar").is_none());
        assert!(msg.is_well_formed());
    }

    #[test]
    fn test_well_formed() {
        let mut msg = ChannelMessage::join(jon(), Utc::now());
        assert!(msg.is_well_formed());

        msg.text = Some("sneaky".into());
        assert!(!msg.is_well_formed());

        let mut text = ChannelMessage::text(jon(), Utc::now(), "");
        assert!(text.is_well_formed());
        text.text = None;
        assert!(!text.is_well_formed());
    }

    #[test]
    fn test_kind_display() {
        assert_eq!(MessageKind::Join.to_string(), "join");
        assert!(MessageKind::Leave.is_presence());
        assert!(!MessageKind::Message.is_presence());
    }
}

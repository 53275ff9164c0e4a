//! Presence tracking.
//!
//! An identity is present in a channel while it has at least one session
//! there. The tracker turns session opens and closes into at most one
//! `join`/`leave` per identity transition by counting live subscription
//! descriptors on the bus, and keeps the durable presence store in sync.
//!
//! The check is a read followed by a publish and is not atomic: two
//! sessions of the same identity opening (or closing) at the same instant
//! may both observe "no other session" and both publish.

use chitchat_protocol::{codec, ChannelMessage, Identity, MessageKind, Subject};
use chrono::Utc;
use std::sync::Arc;
use tracing::debug;

use crate::bus::{Bus, BusError};
use crate::error::GatewayError;

/// What a presence transition check did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceOutcome {
    /// The transition event was published.
    Published,
    /// Another session of the identity is live; nothing was published.
    Suppressed,
}

/// Computes join/leave transitions for a channel.
#[derive(Clone)]
pub struct PresenceTracker {
    bus: Arc<dyn Bus>,
}

impl PresenceTracker {
    /// Create a tracker over the given bus.
    #[must_use]
    pub fn new(bus: Arc<dyn Bus>) -> Self {
        Self { bus }
    }

    /// Run the join half: called once a session is registered, before it
    /// subscribes.
    ///
    /// # Errors
    ///
    /// Returns an error if the bus cannot be queried or written.
    pub async fn join(
        &self,
        channel: &str,
        identity: &Identity,
    ) -> Result<PresenceOutcome, GatewayError> {
        self.transition(MessageKind::Join, channel, identity).await
    }

    /// Run the leave half: called once a session released its subscription.
    ///
    /// # Errors
    ///
    /// Returns an error if the bus cannot be queried or written.
    pub async fn leave(
        &self,
        channel: &str,
        identity: &Identity,
    ) -> Result<PresenceOutcome, GatewayError> {
        self.transition(MessageKind::Leave, channel, identity).await
    }

    async fn transition(
        &self,
        kind: MessageKind,
        channel: &str,
        identity: &Identity,
    ) -> Result<PresenceOutcome, GatewayError> {
        // The transitioning session is not subscribed at this point, so any
        // matching descriptor belongs to another session of the identity.
        let descriptors = self.bus.list_live_descriptors(channel).await?;
        if descriptors.iter().any(|d| *d == identity.id) {
            debug!(
                channel = %channel,
                identity = %identity.id,
                kind = %kind,
                "Presence transition suppressed"
            );
            return Ok(PresenceOutcome::Suppressed);
        }

        let event = ChannelMessage::presence(kind, identity.clone(), Utc::now());
        self.bus
            .publish(&Subject::presence(channel), codec::encode(&event)?)
            .await?;

        match kind {
            MessageKind::Join => {
                let value = codec::encode_identity(identity)?;
                match self.bus.presence_create(channel, &identity.id, value).await {
                    Ok(()) => {}
                    Err(BusError::KeyExists(_)) => {
                        debug!(channel = %channel, identity = %identity.id, "Presence entry already exists");
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            MessageKind::Leave => {
                self.bus.presence_purge(channel, &identity.id).await?;
            }
            MessageKind::Message => {}
        }

        debug!(channel = %channel, identity = %identity.id, kind = %kind, "Presence transition published");
        Ok(PresenceOutcome::Published)
    }
}

//! Gateway façade.
//!
//! Bundles the bus, the session hub and configuration behind one cloneable
//! handle for the outer surfaces (HTTP handlers, embedding applications).

use chitchat_protocol::{validate_channel_name, ChannelMessage, Identity};
use chitchat_transport::{close_code, CloseFrame, Connection, FrameWriter};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::bus::Bus;
use crate::error::GatewayError;
use crate::history::{self, DEFAULT_READ_TIMEOUT};
use crate::hub::{HubError, HubHandle, SessionHub, SessionInfo};
use crate::session::{CloseReason, Session, SessionConfig};

/// Gateway configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Limits applied to every session.
    pub session: SessionConfig,
    /// Per-entry wait when replaying history.
    pub history_read_timeout: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            session: SessionConfig::default(),
            history_read_timeout: DEFAULT_READ_TIMEOUT,
        }
    }
}

/// Entry point for sessions and queries.
#[derive(Clone)]
pub struct Gateway {
    bus: Arc<dyn Bus>,
    hub: HubHandle,
    config: GatewayConfig,
}

impl Gateway {
    /// Create a gateway and start its session hub on the current runtime.
    #[must_use]
    pub fn new(bus: Arc<dyn Bus>, config: GatewayConfig) -> Self {
        info!("Creating gateway with config: {:?}", config);
        Self {
            bus,
            hub: SessionHub::spawn(),
            config,
        }
    }

    /// Create an unregistered session for `identity` in `channel`.
    ///
    /// # Errors
    ///
    /// Returns an error if the channel name is invalid.
    pub fn open_session(
        &self,
        channel: &str,
        identity: Identity,
    ) -> Result<Session, GatewayError> {
        validate_channel_name(channel).map_err(GatewayError::InvalidChannel)?;
        Ok(Session::new(
            channel.to_string(),
            identity,
            Arc::clone(&self.bus),
            self.hub.clone(),
            self.config.session.clone(),
        ))
    }

    /// Run a full session on `conn` and return why it ended.
    pub async fn run_session<C: Connection>(
        &self,
        channel: &str,
        identity: Identity,
        conn: C,
    ) -> CloseReason {
        match self.open_session(channel, identity) {
            Ok(session) => session.run(conn).await,
            Err(e) => {
                let (_reader, mut writer) = conn.split();
                let frame = CloseFrame::new(close_code::INTERNAL_ERROR, "invalid channel");
                let deadline = self.config.session.write_timeout;
                let _ = tokio::time::timeout(deadline, writer.close(frame)).await;
                CloseReason::RegisterFailed(e.to_string())
            }
        }
    }

    /// Chat messages of `channel`, optionally only those sent at or after `since`.
    ///
    /// # Errors
    ///
    /// Returns an error if the bus fails or an entry cannot be decoded.
    pub async fn fetch_history(
        &self,
        channel: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<ChannelMessage>, GatewayError> {
        history::fetch_history(
            self.bus.as_ref(),
            channel,
            since,
            self.config.history_read_timeout,
        )
        .await
    }

    /// Identities currently recorded as present in `channel`.
    ///
    /// # Errors
    ///
    /// Returns an error if the bus fails or an entry cannot be decoded.
    pub async fn list_present_users(&self, channel: &str) -> Result<Vec<Identity>, GatewayError> {
        history::list_present_users(self.bus.as_ref(), channel).await
    }

    /// Live sessions known to the hub.
    ///
    /// # Errors
    ///
    /// Returns an error if the hub is not running.
    pub async fn sessions(&self) -> Result<Vec<SessionInfo>, HubError> {
        self.hub.sessions().await
    }

    /// Ask every live session to close.
    ///
    /// # Errors
    ///
    /// Returns an error if the hub is not running.
    pub fn shutdown(&self) -> Result<(), HubError> {
        info!("Shutting down gateway sessions");
        self.hub.shutdown()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBus;
    use chitchat_transport::memory;

    fn gateway() -> Gateway {
        Gateway::new(
            Arc::new(MemoryBus::new()),
            GatewayConfig {
                history_read_timeout: Duration::from_millis(20),
                ..GatewayConfig::default()
            },
        )
    }

    async fn wait_for_sessions(gateway: &Gateway, count: usize) {
        while gateway.sessions().await.unwrap().len() != count {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_open_session_validates_channel() {
        let gateway = gateway();
        assert!(matches!(
            gateway.open_session("bad*channel", Identity::new("alice", "Alice")),
            Err(GatewayError::InvalidChannel(_))
        ));
        assert!(gateway
            .open_session("general", Identity::new("alice", "Alice"))
            .is_ok());
    }

    #[tokio::test]
    async fn test_session_messages_show_up_in_history_and_roster() {
        let gateway = gateway();
        let (conn, mut peer) = memory::pair();
        let runner = gateway.clone();
        let handle = tokio::spawn(async move {
            runner
                .run_session("general", Identity::new("alice", "Alice"), conn)
                .await
        });

        // The echo proves the session is subscribed.
        peer.send_text("first").unwrap();
        assert!(peer.recv_text().await.is_some());
        peer.send_text("second").unwrap();
        assert!(peer.recv_text().await.is_some());

        let history = gateway.fetch_history("general", None).await.unwrap();
        let texts: Vec<_> = history.iter().filter_map(|m| m.text.clone()).collect();
        assert_eq!(texts, vec!["first", "second"]);

        let users = gateway.list_present_users("general").await.unwrap();
        assert_eq!(users, vec![Identity::new("alice", "Alice")]);

        gateway.shutdown().unwrap();
        assert_eq!(handle.await.unwrap(), CloseReason::Shutdown);
        assert!(gateway.list_present_users("general").await.unwrap().is_empty());
        wait_for_sessions(&gateway, 0).await;
    }

    #[tokio::test]
    async fn test_run_session_invalid_channel() {
        let gateway = gateway();
        let (conn, mut peer) = memory::pair();
        let reason = gateway
            .run_session("", Identity::new("alice", "Alice"), conn)
            .await;
        assert!(matches!(reason, CloseReason::RegisterFailed(_)));
        assert!(matches!(
            peer.recv().await,
            Some(memory::OutboundFrame::Close(CloseFrame { code: 1011, .. }))
        ));
    }
}

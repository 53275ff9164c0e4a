//! Per-connection session state machine.
//!
//! ```text
//! Created ──register──▶ Registered ──listen──▶ Listening ──▶ Closing ──▶ Closed
//! ```
//!
//! [`Session::register`] adds the session to the hub and runs the join half
//! of presence tracking. [`RegisteredSession::listen`] subscribes to the
//! channel from now on and races four triggers in one select loop: the read
//! pump finishing, a delivery from the bus, a keepalive tick and the hub's
//! shutdown signal. Whichever ends the loop, the session goes through the
//! same closing path exactly once: release the subscription, unregister,
//! run the leave half of presence tracking.

use bytes::Bytes;
use chitchat_protocol::{codec, ChannelMessage, Identity, Subject};
use chitchat_transport::{
    close_code, CloseFrame, Connection, FrameReader, FrameWriter, InboundFrame, TransportError,
};
use chrono::Utc;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::bus::{Bus, LiveSubscription};
use crate::error::GatewayError;
use crate::hub::{HubHandle, SessionEntry};
use crate::presence::PresenceTracker;

/// Unique identifier for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Generate a random session ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Session lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created,
    Registered,
    Listening,
    Closing,
    Closed,
}

/// Per-session timing and size limits.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Interval between keepalive pings. Zero disables pings.
    pub ping_interval: Duration,
    /// Deadline for every write to the connection.
    pub write_timeout: Duration,
    /// Close the session when nothing arrives for this long.
    pub read_timeout: Option<Duration>,
    /// Largest accepted inbound message in bytes.
    pub max_message_size: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(10),
            write_timeout: Duration::from_secs(10),
            read_timeout: None,
            max_message_size: 64 * 1024,
        }
    }
}

/// Why a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The hub broadcast a shutdown.
    Shutdown,
    /// The client sent a close frame.
    ClientClosed(Option<CloseFrame>),
    /// The stream ended without a close frame.
    ConnectionLost,
    /// Reading from the connection failed.
    ReadFailed(String),
    /// Nothing was received within the read timeout.
    IdleTimeout,
    /// The client sent a message over the size limit.
    MessageTooLarge(usize),
    /// Inbound text could not be appended to the log.
    PublishFailed(String),
    /// Writing a delivery to the connection failed.
    WriteFailed(String),
    /// Writing a keepalive ping failed.
    PingFailed(String),
    /// The bus dropped the live subscription.
    SubscriptionEnded,
    /// The live subscription could not be created.
    SubscribeFailed(String),
    /// The session could not be registered.
    RegisterFailed(String),
}

impl CloseReason {
    /// Short label for metrics.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            CloseReason::Shutdown => "shutdown",
            CloseReason::ClientClosed(_) => "client_closed",
            CloseReason::ConnectionLost => "connection_lost",
            CloseReason::ReadFailed(_) => "read_failed",
            CloseReason::IdleTimeout => "idle_timeout",
            CloseReason::MessageTooLarge(_) => "message_too_large",
            CloseReason::PublishFailed(_) => "publish_failed",
            CloseReason::WriteFailed(_) => "write_failed",
            CloseReason::PingFailed(_) => "ping_failed",
            CloseReason::SubscriptionEnded => "subscription_ended",
            CloseReason::SubscribeFailed(_) => "subscribe_failed",
            CloseReason::RegisterFailed(_) => "register_failed",
        }
    }

    /// Whether this ending indicates a fault rather than a normal disconnect.
    #[must_use]
    pub fn is_error(&self) -> bool {
        match self {
            CloseReason::Shutdown | CloseReason::ConnectionLost => false,
            CloseReason::ClientClosed(frame) => frame.as_ref().is_some_and(|f| !f.is_expected()),
            _ => true,
        }
    }

    /// Close frame the server should send, if the connection is still writable.
    fn close_frame(&self) -> Option<CloseFrame> {
        match self {
            CloseReason::Shutdown => Some(CloseFrame::new(
                close_code::GOING_AWAY,
                "server shutting down",
            )),
            CloseReason::IdleTimeout => Some(CloseFrame::new(close_code::GOING_AWAY, "idle timeout")),
            CloseReason::MessageTooLarge(_) => {
                Some(CloseFrame::new(close_code::MESSAGE_TOO_BIG, "message too large"))
            }
            CloseReason::PublishFailed(_)
            | CloseReason::SubscriptionEnded
            | CloseReason::SubscribeFailed(_)
            | CloseReason::RegisterFailed(_) => {
                Some(CloseFrame::new(close_code::INTERNAL_ERROR, "internal error"))
            }
            CloseReason::ClientClosed(_)
            | CloseReason::ConnectionLost
            | CloseReason::ReadFailed(_)
            | CloseReason::WriteFailed(_)
            | CloseReason::PingFailed(_) => None,
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::ClientClosed(Some(frame)) => write!(f, "client closed: {frame}"),
            CloseReason::ClientClosed(None) => f.write_str("client closed"),
            CloseReason::MessageTooLarge(size) => write!(f, "message too large: {size} bytes"),
            CloseReason::ReadFailed(e)
            | CloseReason::PublishFailed(e)
            | CloseReason::WriteFailed(e)
            | CloseReason::PingFailed(e)
            | CloseReason::SubscribeFailed(e)
            | CloseReason::RegisterFailed(e) => write!(f, "{}: {e}", self.label()),
            other => f.write_str(other.label()),
        }
    }
}

/// State shared by every phase of a session.
struct SessionCore {
    id: SessionId,
    channel: String,
    identity: Identity,
    bus: Arc<dyn Bus>,
    hub: HubHandle,
    presence: PresenceTracker,
    config: SessionConfig,
    shutdown: CancellationToken,
    state: SessionState,
}

impl SessionCore {
    fn transition(&mut self, to: SessionState) {
        trace!(session = %self.id, from = ?self.state, to = ?to, "Session transition");
        self.state = to;
    }

    /// Closing → Closed. Consumes the core so it can only happen once.
    async fn finish(mut self, subscription: Option<LiveSubscription>, reason: &CloseReason) {
        self.transition(SessionState::Closing);

        if let Some(subscription) = subscription {
            subscription.release();
        }
        if let Err(e) = self.hub.unregister(self.id) {
            warn!(session = %self.id, error = %e, "Failed to unregister session");
        }
        if let Err(e) = self.presence.leave(&self.channel, &self.identity).await {
            warn!(session = %self.id, channel = %self.channel, error = %e, "Leave transition failed");
        }

        self.transition(SessionState::Closed);
        if reason.is_error() {
            warn!(session = %self.id, channel = %self.channel, reason = %reason, "Session closed");
        } else {
            debug!(session = %self.id, channel = %self.channel, reason = %reason, "Session closed");
        }
    }
}

/// A session that has not been registered yet.
pub struct Session {
    core: SessionCore,
}

impl Session {
    pub(crate) fn new(
        channel: String,
        identity: Identity,
        bus: Arc<dyn Bus>,
        hub: HubHandle,
        config: SessionConfig,
    ) -> Self {
        let presence = PresenceTracker::new(Arc::clone(&bus));
        Self {
            core: SessionCore {
                id: SessionId::generate(),
                channel,
                identity,
                bus,
                hub,
                presence,
                config,
                shutdown: CancellationToken::new(),
                state: SessionState::Created,
            },
        }
    }

    /// Session identifier.
    #[must_use]
    pub fn id(&self) -> SessionId {
        self.core.id
    }

    /// Channel the session belongs to.
    #[must_use]
    pub fn channel(&self) -> &str {
        &self.core.channel
    }

    /// Owner of the session.
    #[must_use]
    pub fn identity(&self) -> &Identity {
        &self.core.identity
    }

    /// Created → Registered.
    ///
    /// Ensures the channel log exists, adds the session to the hub and runs
    /// the join half of presence tracking.
    ///
    /// # Errors
    ///
    /// Returns an error if any bus operation fails or the hub is gone. The
    /// session is removed from the hub again before the error is returned.
    pub async fn register(self) -> Result<RegisteredSession, GatewayError> {
        let mut core = self.core;
        core.bus.ensure_channel(&core.channel).await?;
        core.hub.register(SessionEntry {
            id: core.id,
            channel: core.channel.clone(),
            identity_id: core.identity.id.clone(),
            shutdown: core.shutdown.clone(),
        })?;
        core.transition(SessionState::Registered);

        if let Err(e) = core.presence.join(&core.channel, &core.identity).await {
            let _ = core.hub.unregister(core.id);
            return Err(e);
        }

        info!(
            session = %core.id,
            channel = %core.channel,
            identity = %core.identity.id,
            "Session registered"
        );
        Ok(RegisteredSession { core })
    }

    /// Register, then listen on `conn` until the session ends.
    pub async fn run<C: Connection>(self, conn: C) -> CloseReason {
        let id = self.core.id;
        let write_timeout = self.core.config.write_timeout;
        match self.register().await {
            Ok(registered) => registered.listen(conn).await,
            Err(e) => {
                let reason = CloseReason::RegisterFailed(e.to_string());
                warn!(session = %id, error = %e, "Session registration failed");
                let (_reader, mut writer) = conn.split();
                if let Some(frame) = reason.close_frame() {
                    let _ = with_deadline(write_timeout, writer.close(frame)).await;
                }
                reason
            }
        }
    }
}

/// A session that is in the hub and ready to listen.
pub struct RegisteredSession {
    core: SessionCore,
}

impl RegisteredSession {
    /// Session identifier.
    #[must_use]
    pub fn id(&self) -> SessionId {
        self.core.id
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.core.state
    }

    /// Registered → Listening → Closing → Closed.
    ///
    /// Returns once the session has fully closed.
    pub async fn listen<C: Connection>(self, conn: C) -> CloseReason {
        let mut core = self.core;
        let remote = conn.remote_addr();
        let (reader, mut writer) = conn.split();

        let subscription = core
            .bus
            .subscribe_live(&Subject::channel(&core.channel), &core.identity.id)
            .await;
        let mut subscription = match subscription {
            Ok(subscription) => subscription,
            Err(e) => {
                let reason = CloseReason::SubscribeFailed(e.to_string());
                send_close(&mut writer, &reason, core.config.write_timeout).await;
                core.finish(None, &reason).await;
                return reason;
            }
        };
        core.transition(SessionState::Listening);
        debug!(session = %core.id, remote = ?remote, "Session listening");

        let read_pump = tokio::spawn(read_pump(
            reader,
            Publisher {
                bus: Arc::clone(&core.bus),
                subject: Subject::message(&core.channel),
                identity: core.identity.clone(),
                max_message_size: core.config.max_message_size,
                read_timeout: core.config.read_timeout,
            },
        ));

        let reason = pump(&core, &mut writer, &mut subscription, read_pump).await;
        send_close(&mut writer, &reason, core.config.write_timeout).await;
        core.finish(Some(subscription), &reason).await;
        reason
    }
}

/// Run the select loop until one trigger ends the session.
async fn pump<W: FrameWriter>(
    core: &SessionCore,
    writer: &mut W,
    subscription: &mut LiveSubscription,
    mut read_pump: JoinHandle<CloseReason>,
) -> CloseReason {
    let mut keepalive = keepalive(core.config.ping_interval);

    let reason = loop {
        tokio::select! {
            biased;

            _ = core.shutdown.cancelled() => break CloseReason::Shutdown,

            outcome = &mut read_pump => {
                break outcome.unwrap_or_else(|e| CloseReason::ReadFailed(e.to_string()));
            }

            // Ahead of deliveries so a busy channel cannot starve pings.
            () = tick(&mut keepalive) => {
                if let Err(e) = with_deadline(core.config.write_timeout, writer.ping()).await {
                    break CloseReason::PingFailed(e.to_string());
                }
            }

            delivery = subscription.recv() => {
                let Some(envelope) = delivery else {
                    break CloseReason::SubscriptionEnded;
                };
                if let Err(e) = deliver(writer, envelope.payload, core.config.write_timeout).await {
                    break CloseReason::WriteFailed(e.to_string());
                }
            }
        }
    };

    read_pump.abort();
    reason
}

fn keepalive(period: Duration) -> Option<Interval> {
    if period.is_zero() {
        return None;
    }
    let mut interval = interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    Some(interval)
}

async fn tick(keepalive: &mut Option<Interval>) {
    match keepalive {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// Write one log payload to the client.
async fn deliver<W: FrameWriter>(
    writer: &mut W,
    payload: Bytes,
    deadline: Duration,
) -> Result<(), TransportError> {
    match std::str::from_utf8(&payload) {
        Ok(text) => with_deadline(deadline, writer.send_text(text.to_owned())).await,
        Err(e) => {
            warn!(error = %e, "Skipping non UTF-8 payload");
            Ok(())
        }
    }
}

async fn send_close<W: FrameWriter>(writer: &mut W, reason: &CloseReason, deadline: Duration) {
    if let Some(frame) = reason.close_frame() {
        if let Err(e) = with_deadline(deadline, writer.close(frame)).await {
            trace!(error = %e, "Close frame not delivered");
        }
    }
}

async fn with_deadline<F>(deadline: Duration, write: F) -> Result<(), TransportError>
where
    F: Future<Output = Result<(), TransportError>>,
{
    tokio::time::timeout(deadline, write)
        .await
        .map_err(|_| TransportError::Timeout)?
}

/// Everything the read pump needs to turn inbound text into log entries.
struct Publisher {
    bus: Arc<dyn Bus>,
    subject: Subject,
    identity: Identity,
    max_message_size: usize,
    read_timeout: Option<Duration>,
}

/// Read inbound frames and publish each data frame as a chat message.
async fn read_pump<R: FrameReader>(mut reader: R, publisher: Publisher) -> CloseReason {
    loop {
        let next = match publisher.read_timeout {
            Some(limit) => match tokio::time::timeout(limit, reader.recv()).await {
                Ok(next) => next,
                Err(_) => return CloseReason::IdleTimeout,
            },
            None => reader.recv().await,
        };

        let text = match next {
            Ok(Some(InboundFrame::Text(text))) => text,
            Ok(Some(InboundFrame::Binary(data))) => String::from_utf8_lossy(&data).into_owned(),
            Ok(Some(InboundFrame::Ping | InboundFrame::Pong)) => continue,
            Ok(Some(InboundFrame::Close(frame))) => return CloseReason::ClientClosed(frame),
            Ok(None) => return CloseReason::ConnectionLost,
            Err(e) => return CloseReason::ReadFailed(e.to_string()),
        };

        if text.len() > publisher.max_message_size {
            return CloseReason::MessageTooLarge(text.len());
        }

        let message = ChannelMessage::text(publisher.identity.clone(), Utc::now(), text);
        let published = match codec::encode(&message) {
            Ok(payload) => publisher
                .bus
                .publish(&publisher.subject, payload)
                .await
                .map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };
        if let Err(e) = published {
            return CloseReason::PublishFailed(e);
        }
    }
}

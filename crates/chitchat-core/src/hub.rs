//! Process-wide session registry.
//!
//! The hub owns the set of live sessions. Every mutation goes through one
//! control loop, so membership changes are totally ordered and the set
//! needs no lock. Sessions only hold a [`HubHandle`] and their own
//! [`SessionId`].

use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::session::SessionId;

/// Hub errors.
#[derive(Debug, Error)]
pub enum HubError {
    /// The control loop is no longer running.
    #[error("Session hub is not running")]
    Closed,
}

/// The hub's record of a live session.
#[derive(Debug, Clone)]
pub struct SessionEntry {
    /// Session identifier.
    pub id: SessionId,
    /// Channel the session is connected to.
    pub channel: String,
    /// Identity key of the session owner.
    pub identity_id: String,
    /// Cancelled to ask the session to shut down.
    pub shutdown: CancellationToken,
}

/// Snapshot of a registered session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    /// Session identifier.
    pub id: SessionId,
    /// Channel the session is connected to.
    pub channel: String,
    /// Identity key of the session owner.
    pub identity_id: String,
}

impl From<&SessionEntry> for SessionInfo {
    fn from(entry: &SessionEntry) -> Self {
        Self {
            id: entry.id,
            channel: entry.channel.clone(),
            identity_id: entry.identity_id.clone(),
        }
    }
}

enum Command {
    Register(SessionEntry),
    Unregister(SessionId),
    Shutdown,
    Snapshot(oneshot::Sender<Vec<SessionInfo>>),
}

/// The hub control loop.
pub struct SessionHub {
    sessions: HashMap<SessionId, SessionEntry>,
    commands: mpsc::UnboundedReceiver<Command>,
    shutting_down: bool,
}

impl SessionHub {
    /// Start the control loop on the current runtime.
    ///
    /// The loop runs until every [`HubHandle`] has been dropped.
    #[must_use]
    pub fn spawn() -> HubHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let hub = Self {
            sessions: HashMap::new(),
            commands: rx,
            shutting_down: false,
        };
        tokio::spawn(hub.run());
        HubHandle { commands: tx }
    }

    async fn run(mut self) {
        debug!("Session hub started");
        while let Some(command) = self.commands.recv().await {
            self.handle(command);
        }
        debug!(remaining = self.sessions.len(), "Session hub stopped");
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Register(entry) => {
                if self.shutting_down {
                    entry.shutdown.cancel();
                }
                debug!(
                    session = %entry.id,
                    channel = %entry.channel,
                    identity = %entry.identity_id,
                    live = self.sessions.len() + 1,
                    "Session registered"
                );
                self.sessions.insert(entry.id, entry);
            }
            Command::Unregister(id) => {
                if self.sessions.remove(&id).is_some() {
                    debug!(session = %id, live = self.sessions.len(), "Session unregistered");
                }
            }
            Command::Shutdown => {
                self.shutting_down = true;
                info!(sessions = self.sessions.len(), "Broadcasting shutdown to sessions");
                for entry in self.sessions.values() {
                    entry.shutdown.cancel();
                }
            }
            Command::Snapshot(reply) => {
                let _ = reply.send(self.sessions.values().map(SessionInfo::from).collect());
            }
        }
    }
}

/// Cloneable handle to the hub control loop.
#[derive(Debug, Clone)]
pub struct HubHandle {
    commands: mpsc::UnboundedSender<Command>,
}

impl HubHandle {
    fn send(&self, command: Command) -> Result<(), HubError> {
        self.commands.send(command).map_err(|_| HubError::Closed)
    }

    /// Add a session to the live set.
    ///
    /// # Errors
    ///
    /// Returns an error if the hub is not running.
    pub fn register(&self, entry: SessionEntry) -> Result<(), HubError> {
        self.send(Command::Register(entry))
    }

    /// Remove a session from the live set. Removing an unknown session is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if the hub is not running.
    pub fn unregister(&self, id: SessionId) -> Result<(), HubError> {
        self.send(Command::Unregister(id))
    }

    /// Ask every live session to shut down. Does not wait for them.
    ///
    /// # Errors
    ///
    /// Returns an error if the hub is not running.
    pub fn shutdown(&self) -> Result<(), HubError> {
        self.send(Command::Shutdown)
    }

    /// Snapshot of the live set, taken after every command sent before it.
    ///
    /// # Errors
    ///
    /// Returns an error if the hub is not running.
    pub async fn sessions(&self) -> Result<Vec<SessionInfo>, HubError> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Snapshot(tx))?;
        rx.await.map_err(|_| HubError::Closed)
    }

    /// Number of live sessions.
    ///
    /// # Errors
    ///
    /// Returns an error if the hub is not running.
    pub async fn len(&self) -> Result<usize, HubError> {
        Ok(self.sessions().await?.len())
    }
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Command::Register(entry) => write!(f, "Register({})", entry.id),
            Command::Unregister(id) => write!(f, "Unregister({id})"),
            Command::Shutdown => f.write_str("Shutdown"),
            Command::Snapshot(_) => f.write_str("Snapshot"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(channel: &str, identity: &str) -> SessionEntry {
        SessionEntry {
            id: SessionId::generate(),
            channel: channel.to_string(),
            identity_id: identity.to_string(),
            shutdown: CancellationToken::new(),
        }
    }

    #[tokio::test]
    async fn test_register_unregister() {
        let hub = SessionHub::spawn();
        let a = entry("general", "alice");
        let b = entry("general", "bob");

        hub.register(a.clone()).unwrap();
        hub.register(b.clone()).unwrap();
        assert_eq!(hub.len().await.unwrap(), 2);

        hub.unregister(a.id).unwrap();
        let live = hub.sessions().await.unwrap();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].identity_id, "bob");
    }

    #[tokio::test]
    async fn test_unregister_idempotent() {
        let hub = SessionHub::spawn();
        let a = entry("general", "alice");

        hub.register(a.clone()).unwrap();
        hub.unregister(a.id).unwrap();
        hub.unregister(a.id).unwrap();
        hub.unregister(SessionId::generate()).unwrap();
        assert_eq!(hub.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_cancels_live_sessions() {
        let hub = SessionHub::spawn();
        let a = entry("general", "alice");
        let b = entry("random", "bob");
        let gone = entry("general", "carol");

        hub.register(a.clone()).unwrap();
        hub.register(b.clone()).unwrap();
        hub.register(gone.clone()).unwrap();
        hub.unregister(gone.id).unwrap();
        hub.shutdown().unwrap();
        hub.sessions().await.unwrap();

        assert!(a.shutdown.is_cancelled());
        assert!(b.shutdown.is_cancelled());
        assert!(!gone.shutdown.is_cancelled());
    }

    #[tokio::test]
    async fn test_register_after_shutdown_is_cancelled() {
        let hub = SessionHub::spawn();
        hub.shutdown().unwrap();

        let late = entry("general", "dave");
        hub.register(late.clone()).unwrap();
        hub.sessions().await.unwrap();
        assert!(late.shutdown.is_cancelled());
    }

    #[tokio::test]
    async fn test_concurrent_registration() {
        let hub = SessionHub::spawn();
        let mut tasks = Vec::new();
        for i in 0..32 {
            let hub = hub.clone();
            tasks.push(tokio::spawn(async move {
                let e = entry("general", &format!("user-{i}"));
                hub.register(e.clone()).unwrap();
                if i % 2 == 0 {
                    hub.unregister(e.id).unwrap();
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(hub.len().await.unwrap(), 16);
    }
}

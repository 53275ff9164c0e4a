//! # chitchat-core
//!
//! Sessions, presence and the channel log for the ChitChat gateway.
//!
//! This crate provides the fundamental building blocks:
//!
//! - **Bus** - Ordered, subject-addressable pub/sub log with a presence store
//! - **SessionHub** - Single-writer registry of live sessions
//! - **Session** - Per-connection state machine tying a connection to the log
//! - **Presence** - Join/leave detection per identity
//! - **Gateway** - Façade used by the server and embedders
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │  Connection │◀───▶│   Session   │◀───▶│     Bus     │
//! └─────────────┘     └─────────────┘     └─────────────┘
//!                        │       │               ▲
//!                        ▼       ▼               │
//!               ┌─────────────┐ ┌─────────────┐  │
//!               │ SessionHub  │ │  Presence   │──┘
//!               └─────────────┘ └─────────────┘
//! ```

pub mod bus;
pub mod error;
pub mod gateway;
pub mod history;
pub mod hub;
pub mod memory;
pub mod presence;
pub mod session;

pub use bus::{Bus, BusError, Envelope, LiveSubscription, ReplayCursor, ReplayStart};
pub use error::GatewayError;
pub use gateway::{Gateway, GatewayConfig};
pub use hub::{HubError, HubHandle, SessionHub, SessionInfo};
pub use memory::{MemoryBus, MemoryBusConfig};
pub use presence::{PresenceOutcome, PresenceTracker};
pub use session::{CloseReason, RegisteredSession, Session, SessionConfig, SessionId, SessionState};

//! Append-only log abstraction.
//!
//! The bus is an ordered, subject-addressable publish/subscribe log plus a
//! per-channel key-value presence store. Sessions tail it live; history
//! queries replay it.

use async_trait::async_trait;
use bytes::Bytes;
use chitchat_protocol::Subject;
use chrono::{DateTime, Utc};
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

/// Bus errors.
#[derive(Debug, Error)]
pub enum BusError {
    /// Invalid channel name.
    #[error("Invalid channel name: {0}")]
    InvalidChannel(&'static str),

    /// No log exists for the channel.
    #[error("Channel not found: {0}")]
    ChannelNotFound(String),

    /// Subject does not address a channel.
    #[error("Invalid subject: {0}")]
    InvalidSubject(String),

    /// Presence key is already present.
    #[error("Presence key already exists: {0}")]
    KeyExists(String),

    /// Backend failure.
    #[error("Bus unavailable: {0}")]
    Unavailable(String),
}

/// A message as stored in the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Concrete subject the payload was published to.
    pub subject: String,
    /// Position in the channel log, starting at 1.
    pub sequence: u64,
    /// Raw payload.
    pub payload: Bytes,
    /// When the log accepted the append.
    pub appended_at: DateTime<Utc>,
}

/// Where a replay cursor starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayStart {
    /// Oldest retained entry.
    Beginning,
    /// First entry appended at or after the given instant.
    Time(DateTime<Utc>),
}

/// A live, push-based subscription.
///
/// Delivers only entries appended after the subscription was created, in
/// append order. The subscription is released on [`LiveSubscription::release`]
/// or on drop, whichever comes first.
pub struct LiveSubscription {
    subject: Subject,
    descriptor: String,
    receiver: mpsc::UnboundedReceiver<Envelope>,
    release: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl LiveSubscription {
    /// Create a subscription handle.
    ///
    /// `release` is invoked exactly once to detach the subscription from
    /// the backend.
    pub fn new(
        subject: Subject,
        descriptor: impl Into<String>,
        receiver: mpsc::UnboundedReceiver<Envelope>,
        release: impl FnOnce() + Send + Sync + 'static,
    ) -> Self {
        Self {
            subject,
            descriptor: descriptor.into(),
            receiver,
            release: Some(Box::new(release)),
        }
    }

    /// Subject this subscription tails.
    #[must_use]
    pub fn subject(&self) -> &Subject {
        &self.subject
    }

    /// Descriptor tag of this subscription.
    #[must_use]
    pub fn descriptor(&self) -> &str {
        &self.descriptor
    }

    /// Wait for the next delivered entry.
    ///
    /// Returns `None` once the backend has dropped the subscription.
    pub async fn recv(&mut self) -> Option<Envelope> {
        self.receiver.recv().await
    }

    /// Detach the subscription.
    pub fn release(mut self) {
        self.release_now();
    }

    fn release_now(&mut self) {
        if let Some(release) = self.release.take() {
            release();
            self.receiver.close();
        }
    }
}

impl Drop for LiveSubscription {
    fn drop(&mut self) {
        self.release_now();
    }
}

impl fmt::Debug for LiveSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LiveSubscription")
            .field("subject", &self.subject)
            .field("descriptor", &self.descriptor)
            .field("released", &self.release.is_none())
            .finish()
    }
}

/// A pull cursor over historical entries.
#[async_trait]
pub trait ReplayCursor: Send {
    /// Fetch the next matching entry.
    ///
    /// Waits up to `timeout` for an entry to become available and returns
    /// `None` if none did.
    async fn next(&mut self, timeout: Duration) -> Result<Option<Envelope>, BusError>;

    /// Fetch the next matching entry with a sequence number no greater than `last`.
    ///
    /// Returns `None` once the cursor has moved past `last`, or if nothing
    /// arrived within `timeout`. Implementations that track their position
    /// should return without waiting when every entry up to `last` has been
    /// scanned.
    async fn next_until(
        &mut self,
        last: u64,
        timeout: Duration,
    ) -> Result<Option<Envelope>, BusError> {
        Ok(self
            .next(timeout)
            .await?
            .filter(|envelope| envelope.sequence <= last))
    }

    /// Release the cursor.
    fn release(self: Box<Self>);
}

/// The append-only log and presence store the gateway is built on.
#[async_trait]
pub trait Bus: Send + Sync {
    /// Create the log for a channel. Succeeds if it already exists.
    async fn ensure_channel(&self, channel: &str) -> Result<(), BusError>;

    /// Append a payload to a concrete subject.
    ///
    /// Returns the sequence number assigned to the entry.
    async fn publish(&self, subject: &Subject, payload: Bytes) -> Result<u64, BusError>;

    /// Tail a subject from now on, tagging the subscription with `descriptor`.
    async fn subscribe_live(
        &self,
        subject: &Subject,
        descriptor: &str,
    ) -> Result<LiveSubscription, BusError>;

    /// Open a replay cursor over a subject.
    async fn subscribe_replay(
        &self,
        subject: &Subject,
        start: ReplayStart,
    ) -> Result<Box<dyn ReplayCursor>, BusError>;

    /// Open a replay cursor at the first entry appended at or after `since`.
    async fn subscribe_from_time(
        &self,
        subject: &Subject,
        since: DateTime<Utc>,
    ) -> Result<Box<dyn ReplayCursor>, BusError> {
        self.subscribe_replay(subject, ReplayStart::Time(since)).await
    }

    /// Latest sequence number assigned in the channel log (0 when empty).
    async fn last_sequence_number(&self, channel: &str) -> Result<u64, BusError>;

    /// Descriptors of every live subscription currently tailing the channel.
    ///
    /// This is a point-in-time snapshot.
    async fn list_live_descriptors(&self, channel: &str) -> Result<Vec<String>, BusError>;

    /// Create a presence entry. Never overwrites an existing key.
    async fn presence_create(&self, channel: &str, key: &str, value: Bytes)
        -> Result<(), BusError>;

    /// Read a presence entry.
    async fn presence_get(&self, channel: &str, key: &str) -> Result<Option<Bytes>, BusError>;

    /// Remove a presence entry. Removing a missing key succeeds.
    async fn presence_purge(&self, channel: &str, key: &str) -> Result<(), BusError>;

    /// Snapshot of the presence keys in a channel.
    async fn presence_keys(&self, channel: &str) -> Result<Vec<String>, BusError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_live_subscription_releases_once() {
        let released = Arc::new(AtomicUsize::new(0));
        let counter = released.clone();
        let (tx, rx) = mpsc::unbounded_channel();

        let mut sub = LiveSubscription::new(Subject::channel("general"), "u-1", rx, move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(sub.descriptor(), "u-1");

        tx.send(Envelope {
            subject: "CHITCHAT.general.message".into(),
            sequence: 1,
            payload: Bytes::from_static(b"{}"),
            appended_at: Utc::now(),
        })
        .unwrap();
        assert_eq!(sub.recv().await.unwrap().sequence, 1);

        sub.release();
        assert_eq!(released.load(Ordering::SeqCst), 1);
        assert!(tx.is_closed());
    }

    #[test]
    fn test_live_subscription_releases_on_drop() {
        let released = Arc::new(AtomicUsize::new(0));
        let counter = released.clone();
        let (_tx, rx) = mpsc::unbounded_channel();

        drop(LiveSubscription::new(
            Subject::channel("general"),
            "u-1",
            rx,
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
            },
        ));
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }
}

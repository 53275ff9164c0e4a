//! In-process implementation of the [`Bus`].
//!
//! Each channel owns one ordered log. Appends, live fan-out and live
//! subscription (un)registration for a channel all happen under the
//! channel's lock, which is what makes per-subject ordering hold for every
//! subscriber and makes "from now" subscriptions exact.

use async_trait::async_trait;
use bytes::Bytes;
use chitchat_protocol::{validate_channel_name, Subject};
use chrono::Utc;
use dashmap::DashMap;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tracing::{debug, info, trace};

use crate::bus::{Bus, BusError, Envelope, LiveSubscription, ReplayCursor, ReplayStart};

/// Memory bus configuration.
#[derive(Debug, Clone, Default)]
pub struct MemoryBusConfig {
    /// Oldest entries beyond this count are discarded. `None` keeps everything.
    pub max_messages_per_channel: Option<usize>,
}

/// A live subscription registered on a channel log.
struct Tap {
    subject: Subject,
    descriptor: String,
    sender: mpsc::UnboundedSender<Envelope>,
}

#[derive(Default)]
struct LogState {
    entries: VecDeque<Envelope>,
    last_sequence: u64,
    taps: HashMap<u64, Tap>,
}

impl LogState {
    /// Sequence of the oldest retained entry, or the next one to be assigned.
    fn first_sequence(&self) -> u64 {
        self.entries
            .front()
            .map_or(self.last_sequence + 1, |e| e.sequence)
    }
}

/// One channel's ordered log.
struct ChannelLog {
    name: String,
    state: Mutex<LogState>,
    appended: Notify,
}

impl ChannelLog {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(LogState::default()),
            appended: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LogState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn append(&self, subject: &Subject, payload: Bytes, retention: Option<usize>) -> u64 {
        let mut state = self.lock();
        state.last_sequence += 1;
        let envelope = Envelope {
            subject: subject.as_str().to_string(),
            sequence: state.last_sequence,
            payload,
            appended_at: Utc::now(),
        };

        state.taps.retain(|id, tap| {
            if !tap.subject.matches(&envelope.subject) {
                return true;
            }
            let delivered = tap.sender.send(envelope.clone()).is_ok();
            if !delivered {
                trace!(channel = %self.name, tap = id, "Dropping closed subscription");
            }
            delivered
        });

        let sequence = envelope.sequence;
        state.entries.push_back(envelope);
        if let Some(max) = retention {
            while state.entries.len() > max {
                state.entries.pop_front();
            }
        }
        drop(state);

        self.appended.notify_waiters();
        sequence
    }

    /// Find the first entry at or after `*next` matching `subject` and advance `*next` past it.
    fn next_matching(&self, subject: &Subject, next: &mut u64) -> Option<Envelope> {
        let state = self.lock();
        let start = state.entries.partition_point(|e| e.sequence < *next);
        let found = state
            .entries
            .iter()
            .skip(start)
            .find(|e| subject.matches(&e.subject))
            .cloned();
        *next = match &found {
            Some(envelope) => envelope.sequence + 1,
            None => state.last_sequence + 1,
        };
        found
    }

    fn start_sequence(&self, start: ReplayStart) -> u64 {
        let state = self.lock();
        match start {
            ReplayStart::Beginning => state.first_sequence(),
            ReplayStart::Time(since) => state
                .entries
                .iter()
                .find(|e| e.appended_at >= since)
                .map_or(state.last_sequence + 1, |e| e.sequence),
        }
    }
}

/// An in-process, ordered pub/sub log with per-channel presence stores.
pub struct MemoryBus {
    logs: DashMap<String, Arc<ChannelLog>>,
    presence: DashMap<String, DashMap<String, Bytes>>,
    next_tap: AtomicU64,
    config: MemoryBusConfig,
}

impl MemoryBus {
    /// Create a bus with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(MemoryBusConfig::default())
    }

    /// Create a bus with custom configuration.
    #[must_use]
    pub fn with_config(config: MemoryBusConfig) -> Self {
        info!("Creating memory bus with config: {:?}", config);
        Self {
            logs: DashMap::new(),
            presence: DashMap::new(),
            next_tap: AtomicU64::new(1),
            config,
        }
    }

    /// Number of channel logs.
    #[must_use]
    pub fn channel_count(&self) -> usize {
        self.logs.len()
    }

    fn log(&self, channel: &str) -> Result<Arc<ChannelLog>, BusError> {
        self.logs
            .get(channel)
            .map(|log| Arc::clone(log.value()))
            .ok_or_else(|| BusError::ChannelNotFound(channel.to_string()))
    }

    fn log_for(&self, subject: &Subject) -> Result<Arc<ChannelLog>, BusError> {
        let channel = subject
            .channel_name()
            .ok_or_else(|| BusError::InvalidSubject(subject.to_string()))?;
        self.log(channel)
    }
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Bus for MemoryBus {
    async fn ensure_channel(&self, channel: &str) -> Result<(), BusError> {
        validate_channel_name(channel).map_err(BusError::InvalidChannel)?;
        self.logs.entry(channel.to_string()).or_insert_with(|| {
            debug!(channel = %channel, "Creating channel log");
            Arc::new(ChannelLog::new(channel))
        });
        Ok(())
    }

    async fn publish(&self, subject: &Subject, payload: Bytes) -> Result<u64, BusError> {
        if subject.is_wildcard() {
            return Err(BusError::InvalidSubject(subject.to_string()));
        }
        let log = self.log_for(subject)?;
        let sequence = log.append(subject, payload, self.config.max_messages_per_channel);
        trace!(subject = %subject, sequence, "Appended");
        Ok(sequence)
    }

    async fn subscribe_live(
        &self,
        subject: &Subject,
        descriptor: &str,
    ) -> Result<LiveSubscription, BusError> {
        let log = self.log_for(subject)?;
        let id = self.next_tap.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::unbounded_channel();

        log.lock().taps.insert(
            id,
            Tap {
                subject: subject.clone(),
                descriptor: descriptor.to_string(),
                sender,
            },
        );
        debug!(subject = %subject, descriptor = %descriptor, tap = id, "Live subscription created");

        let weak: Weak<ChannelLog> = Arc::downgrade(&log);
        Ok(LiveSubscription::new(
            subject.clone(),
            descriptor,
            receiver,
            move || {
                if let Some(log) = weak.upgrade() {
                    if log.lock().taps.remove(&id).is_some() {
                        debug!(channel = %log.name, tap = id, "Live subscription released");
                    }
                }
            },
        ))
    }

    async fn subscribe_replay(
        &self,
        subject: &Subject,
        start: ReplayStart,
    ) -> Result<Box<dyn ReplayCursor>, BusError> {
        let log = self.log_for(subject)?;
        let next = log.start_sequence(start);
        trace!(subject = %subject, start = ?start, next, "Replay cursor opened");
        Ok(Box::new(MemoryCursor {
            log,
            subject: subject.clone(),
            next,
        }))
    }

    async fn last_sequence_number(&self, channel: &str) -> Result<u64, BusError> {
        Ok(self.log(channel)?.lock().last_sequence)
    }

    async fn list_live_descriptors(&self, channel: &str) -> Result<Vec<String>, BusError> {
        let log = self.log(channel)?;
        let descriptors = log
            .lock()
            .taps
            .values()
            .map(|t| t.descriptor.clone())
            .collect();
        Ok(descriptors)
    }

    async fn presence_create(
        &self,
        channel: &str,
        key: &str,
        value: Bytes,
    ) -> Result<(), BusError> {
        validate_channel_name(channel).map_err(BusError::InvalidChannel)?;
        let store = self.presence.entry(channel.to_string()).or_default();
        let created = match store.entry(key.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(BusError::KeyExists(key.to_string())),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(value);
                Ok(())
            }
        };
        created
    }

    async fn presence_get(&self, channel: &str, key: &str) -> Result<Option<Bytes>, BusError> {
        let Some(store) = self.presence.get(channel) else {
            return Ok(None);
        };
        let value = store.get(key).map(|v| v.value().clone());
        Ok(value)
    }

    async fn presence_purge(&self, channel: &str, key: &str) -> Result<(), BusError> {
        if let Some(store) = self.presence.get(channel) {
            store.remove(key);
        }
        Ok(())
    }

    async fn presence_keys(&self, channel: &str) -> Result<Vec<String>, BusError> {
        let mut keys: Vec<String> = self
            .presence
            .get(channel)
            .map(|store| store.iter().map(|e| e.key().clone()).collect())
            .unwrap_or_default();
        keys.sort();
        Ok(keys)
    }
}

/// Replay cursor over a [`ChannelLog`].
struct MemoryCursor {
    log: Arc<ChannelLog>,
    subject: Subject,
    next: u64,
}

#[async_trait]
impl ReplayCursor for MemoryCursor {
    async fn next(&mut self, timeout: Duration) -> Result<Option<Envelope>, BusError> {
        self.next_until(u64::MAX, timeout).await
    }

    async fn next_until(
        &mut self,
        last: u64,
        timeout: Duration,
    ) -> Result<Option<Envelope>, BusError> {
        let deadline = tokio::time::Instant::now() + timeout;
        let log = Arc::clone(&self.log);
        loop {
            let appended = log.appended.notified();
            tokio::pin!(appended);
            appended.as_mut().enable();

            if let Some(envelope) = log.next_matching(&self.subject, &mut self.next) {
                return Ok((envelope.sequence <= last).then_some(envelope));
            }
            if self.next > last {
                return Ok(None);
            }
            if tokio::time::timeout_at(deadline, appended).await.is_err() {
                return Ok(None);
            }
        }
    }

    fn release(self: Box<Self>) {
        trace!(subject = %self.subject, next = self.next, "Replay cursor released");
    }
}

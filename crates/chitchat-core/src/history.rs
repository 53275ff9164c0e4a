//! History and roster queries.

use chitchat_protocol::{codec, ChannelMessage, Identity, Subject};
use chrono::{DateTime, Utc};
use std::time::Duration;
use tracing::{debug, trace, warn};

use crate::bus::{Bus, ReplayStart};
use crate::error::GatewayError;

/// Default wait for each history entry before treating the log as drained.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(1);

/// Read the channel's chat messages in publish order.
///
/// Without `since` the whole retained log is replayed; with `since` only
/// messages sent at or after it are returned. Either way the replay stops at
/// the sequence number observed when the query started, or earlier if no
/// entry arrives within `read_timeout`. Presence entries at the tail of the
/// log do not cost a timeout.
///
/// # Errors
///
/// Returns an error if the channel name is invalid, the bus fails, or a
/// stored entry cannot be decoded.
pub async fn fetch_history(
    bus: &dyn Bus,
    channel: &str,
    since: Option<DateTime<Utc>>,
    read_timeout: Duration,
) -> Result<Vec<ChannelMessage>, GatewayError> {
    bus.ensure_channel(channel).await?;
    let subject = Subject::message(channel);
    let mut cursor = match since {
        Some(since) => bus.subscribe_from_time(&subject, since).await?,
        None => bus.subscribe_replay(&subject, ReplayStart::Beginning).await?,
    };
    let watermark = match bus.last_sequence_number(channel).await {
        Ok(watermark) => watermark,
        Err(e) => {
            cursor.release();
            return Err(e.into());
        }
    };

    let mut messages = Vec::new();
    let mut outcome: Result<(), GatewayError> = Ok(());
    while watermark > 0 {
        let envelope = match cursor.next_until(watermark, read_timeout).await {
            Ok(Some(envelope)) => envelope,
            Ok(None) => {
                trace!(channel = %channel, watermark, "History drained");
                break;
            }
            Err(e) => {
                outcome = Err(e.into());
                break;
            }
        };

        match codec::decode(&envelope.payload) {
            Ok(message) => {
                if since.map_or(true, |since| message.sent_at >= since) {
                    messages.push(message);
                }
            }
            Err(e) => {
                outcome = Err(e.into());
                break;
            }
        }
        if envelope.sequence == watermark {
            break;
        }
    }
    cursor.release();
    outcome?;

    debug!(channel = %channel, count = messages.len(), since = ?since, "History fetched");
    Ok(messages)
}

/// Identities recorded in the channel's presence store, ordered by id.
///
/// Keys removed between the snapshot and the read are skipped.
///
/// # Errors
///
/// Returns an error if the bus fails or a stored identity cannot be decoded.
pub async fn list_present_users(bus: &dyn Bus, channel: &str) -> Result<Vec<Identity>, GatewayError> {
    let keys = bus.presence_keys(channel).await?;
    let mut users = Vec::with_capacity(keys.len());
    for key in keys {
        match bus.presence_get(channel, &key).await? {
            Some(value) => users.push(codec::decode_identity(&value)?),
            None => warn!(channel = %channel, key = %key, "Presence entry vanished during read"),
        }
    }
    Ok(users)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBus;
    use bytes::Bytes;
    use chitchat_protocol::MessageKind;

    const SHORT: Duration = Duration::from_millis(20);

    async fn say(bus: &MemoryBus, sent_at: DateTime<Utc>, text: &str) {
        let message = ChannelMessage::text(Identity::new("alice", "Alice"), sent_at, text);
        bus.publish(&Subject::message("general"), codec::encode(&message).unwrap())
            .await
            .unwrap();
    }

    async fn setup() -> MemoryBus {
        let bus = MemoryBus::new();
        bus.ensure_channel("general").await.unwrap();
        bus
    }

    fn texts(messages: &[ChannelMessage]) -> Vec<&str> {
        messages.iter().filter_map(|m| m.text.as_deref()).collect()
    }

    #[tokio::test]
    async fn test_history_empty_channel() {
        let bus = MemoryBus::new();
        let history = fetch_history(&bus, "fresh", None, SHORT).await.unwrap();
        assert!(history.is_empty());
        assert_eq!(bus.channel_count(), 1);
    }

    #[tokio::test]
    async fn test_history_skips_presence() {
        let bus = setup().await;
        let now = Utc::now();
        say(&bus, now, "M1").await;
        let join = ChannelMessage::join(Identity::new("bob", "Bob"), now);
        bus.publish(&Subject::presence("general"), codec::encode(&join).unwrap())
            .await
            .unwrap();
        say(&bus, now, "M2").await;
        say(&bus, now, "M3").await;

        let history = fetch_history(&bus, "general", None, SHORT).await.unwrap();
        assert_eq!(texts(&history), vec!["M1", "M2", "M3"]);
        assert!(history.iter().all(|m| m.kind == MessageKind::Message));
    }

    #[tokio::test]
    async fn test_history_since() {
        let bus = setup().await;
        let base = Utc::now() - chrono::Duration::minutes(10);
        say(&bus, base, "old").await;
        say(&bus, base + chrono::Duration::minutes(5), "middle").await;
        say(&bus, base + chrono::Duration::minutes(9), "recent").await;

        let since = base + chrono::Duration::minutes(5);
        let history = fetch_history(&bus, "general", Some(since), SHORT)
            .await
            .unwrap();
        assert_eq!(texts(&history), vec!["middle", "recent"]);
    }

    #[tokio::test]
    async fn test_history_stops_at_watermark() {
        let bus = setup().await;
        for i in 1..=3 {
            say(&bus, Utc::now(), &format!("M{i}")).await;
        }

        // Returns at the watermark without waiting out the read timeout.
        let history = fetch_history(&bus, "general", None, Duration::from_secs(30))
            .await
            .unwrap();
        assert_eq!(texts(&history), vec!["M1", "M2", "M3"]);
    }

    #[tokio::test]
    async fn test_history_presence_tail_does_not_wait() {
        let bus = setup().await;
        say(&bus, Utc::now(), "hello").await;
        let join = ChannelMessage::join(Identity::new("bob", "Bob"), Utc::now());
        bus.publish(&Subject::presence("general"), codec::encode(&join).unwrap())
            .await
            .unwrap();

        let started = std::time::Instant::now();
        let history = fetch_history(&bus, "general", None, Duration::from_secs(30))
            .await
            .unwrap();
        assert_eq!(texts(&history), vec!["hello"]);
        assert!(started.elapsed() < Duration::from_secs(5));

        let since = Utc::now();
        let history = fetch_history(&bus, "general", Some(since), Duration::from_secs(30))
            .await
            .unwrap();
        assert!(history.is_empty());
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_history_rejects_garbage() {
        let bus = setup().await;
        bus.publish(&Subject::message("general"), Bytes::from_static(b"not json"))
            .await
            .unwrap();
        assert!(matches!(
            fetch_history(&bus, "general", None, SHORT).await,
            Err(GatewayError::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn test_history_invalid_channel() {
        let bus = MemoryBus::new();
        assert!(matches!(
            fetch_history(&bus, "a.b", None, SHORT).await,
            Err(GatewayError::Bus(_))
        ));
    }

    #[tokio::test]
    async fn test_list_present_users() {
        let bus = setup().await;
        for identity in [
            Identity::new("bob", "Bob"),
            Identity::new("alice", "Alice").with_avatar("https://example.com/a.png"),
        ] {
            bus.presence_create("general", &identity.id, codec::encode_identity(&identity).unwrap())
                .await
                .unwrap();
        }

        let users = list_present_users(&bus, "general").await.unwrap();
        assert_eq!(users.len(), 2);
        assert_eq!(users[0].id, "alice");
        assert_eq!(users[0].avatar_url.as_deref(), Some("https://example.com/a.png"));
        assert_eq!(users[1].display_name, "Bob");
        assert!(list_present_users(&bus, "empty").await.unwrap().is_empty());
    }
}

//! Event envelope and subscription filters.

use std::time::{SystemTime, UNIX_EPOCH};

use hush_crypto::hash::sha256_hex;
use hush_crypto::transcript::{tags, Transcript};
use hush_crypto::PublicId;
use serde::{Deserialize, Serialize};

/// Event kind used for remote-signer traffic.
pub const SIGNER_EVENT_KIND: u32 = 24133;

const EVENT_ID_DOMAIN: &str = "hush_event_v1";

/// A relay-routed event. `content` is opaque to the relay.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Hex SHA-256 over the remaining fields.
    pub id: String,
    pub sender: PublicId,
    pub recipient: PublicId,
    pub kind: u32,
    /// Unix seconds.
    pub created_at: u64,
    pub content: String,
}

impl Event {
    pub fn new(
        sender: PublicId,
        recipient: PublicId,
        kind: u32,
        created_at: u64,
        content: impl Into<String>,
    ) -> Self {
        let content = content.into();
        let id = compute_id(&sender, &recipient, kind, created_at, &content);
        Self {
            id,
            sender,
            recipient,
            kind,
            created_at,
            content,
        }
    }

    /// Build an event stamped with the current time.
    pub fn now(sender: PublicId, recipient: PublicId, kind: u32, content: impl Into<String>) -> Self {
        Self::new(sender, recipient, kind, unix_now(), content)
    }

    /// Whether `id` matches the content. Relays are untrusted, so receivers
    /// should drop events where this is false.
    pub fn has_valid_id(&self) -> bool {
        compute_id(
            &self.sender,
            &self.recipient,
            self.kind,
            self.created_at,
            &self.content,
        ) == self.id
    }
}

fn compute_id(sender: &PublicId, recipient: &PublicId, kind: u32, created_at: u64, content: &str) -> String {
    let mut t = Transcript::new(EVENT_ID_DOMAIN);
    t.append_bytes(tags::SENDER, sender.as_bytes())
        .append_bytes(tags::RECIPIENT, recipient.as_bytes())
        .append_u64(tags::KIND, kind as u64)
        .append_u64(tags::TIMESTAMP, created_at)
        .append_str(tags::CONTENT, content);
    sha256_hex(t.as_bytes())
}

/// Current unix time in seconds.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Subscription filter. Empty lists match anything.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filter {
    #[serde(default)]
    pub recipients: Vec<PublicId>,
    #[serde(default)]
    pub kinds: Vec<u32>,
    #[serde(default)]
    pub since: Option<u64>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn recipient(mut self, id: PublicId) -> Self {
        self.recipients.push(id);
        self
    }

    pub fn kind(mut self, kind: u32) -> Self {
        self.kinds.push(kind);
        self
    }

    pub fn since(mut self, ts: u64) -> Self {
        self.since = Some(ts);
        self
    }

    pub fn matches(&self, event: &Event) -> bool {
        (self.recipients.is_empty() || self.recipients.contains(&event.recipient))
            && (self.kinds.is_empty() || self.kinds.contains(&event.kind))
            && self.since.map_or(true, |since| event.created_at >= since)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(b: u8) -> PublicId {
        PublicId::from_bytes([b; 32])
    }

    #[test]
    fn test_event_id_is_deterministic() {
        let a = Event::new(id(1), id(2), SIGNER_EVENT_KIND, 100, "payload");
        let b = Event::new(id(1), id(2), SIGNER_EVENT_KIND, 100, "payload");
        assert_eq!(a.id, b.id);
        assert_eq!(a.id.len(), 64);

        let c = Event::new(id(1), id(2), SIGNER_EVENT_KIND, 101, "payload");
        assert_ne!(a.id, c.id);
    }

    #[test]
    fn test_tampered_event_fails_id_check() {
        let mut event = Event::new(id(1), id(2), SIGNER_EVENT_KIND, 100, "payload");
        assert!(event.has_valid_id());
        event.content.push('!');
        assert!(!event.has_valid_id());
    }

    #[test]
    fn test_filter_matching() {
        let event = Event::new(id(1), id(2), SIGNER_EVENT_KIND, 100, "x");

        assert!(Filter::new().matches(&event));
        assert!(Filter::new().recipient(id(2)).matches(&event));
        assert!(!Filter::new().recipient(id(3)).matches(&event));
        assert!(!Filter::new().kind(1).matches(&event));
        assert!(Filter::new().since(100).matches(&event));
        assert!(!Filter::new().since(101).matches(&event));
    }

    #[test]
    fn test_event_json_round_trip() {
        let event = Event::new(id(1), id(2), SIGNER_EVENT_KIND, 100, "x");
        let json = serde_json::to_string(&event).unwrap();
        let back: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
        assert!(back.has_valid_id());
    }
}

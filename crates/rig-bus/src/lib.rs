//! In-process topic bus shared by console contexts.
//!
//! Every context that writes durable state publishes a [`StorageChange`] on
//! [`TOPIC_STORAGE_CHANGE`]; every other context subscribed to the same bus
//! re-reads the affected collection. Payloads travel as JSON envelopes of the
//! form `{"type": <kind>, "payload": <value>}`.

use std::collections::HashMap;
use std::fmt;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;
use uuid::Uuid;

pub const TOPIC_STORAGE_CHANGE: &str = "rig.storage.change";

const STORAGE_CHANGE_KIND: &str = "storage_change";
const DEFAULT_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    pub topic: String,
    pub payload: Bytes,
}

#[derive(Debug, Error)]
pub enum BusError {
    #[error("bus channel closed")]
    Closed,
    #[error("failed to encode bus envelope: {0}")]
    Encode(String),
    #[error("failed to decode bus envelope: {0}")]
    Decode(String),
    #[error("unexpected envelope kind {found}, expected {expected}")]
    UnexpectedKind { expected: String, found: String },
}

pub type BusResult<T> = Result<T, BusError>;

pub trait Bus: Send + Sync {
    fn subscribe(&self, topic: &str) -> broadcast::Receiver<BusMessage>;

    /// Publishes to every current subscriber of `topic` and returns how many
    /// received it. Zero subscribers is not an error: a lone context has no
    /// one to notify.
    fn publish(&self, topic: &str, payload: Bytes) -> BusResult<usize>;
}

/// Identity of one console context (the analog of a browser tab).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContextId(Uuid);

impl ContextId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ContextId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Notification that `key` was overwritten in durable storage by `origin`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageChange {
    pub key: String,
    pub origin: ContextId,
}

#[derive(Debug, Serialize, Deserialize)]
struct Envelope<T> {
    #[serde(rename = "type")]
    kind: String,
    payload: T,
}

pub fn encode_envelope<T: Serialize>(kind: &str, payload: &T) -> BusResult<Bytes> {
    let bytes = serde_json::to_vec(&Envelope {
        kind: kind.to_string(),
        payload,
    })
    .map_err(|err| BusError::Encode(err.to_string()))?;
    Ok(Bytes::from(bytes))
}

pub fn decode_envelope<T: DeserializeOwned>(expected_kind: &str, payload: &[u8]) -> BusResult<T> {
    // Check the kind before committing to a payload shape.
    let envelope: Envelope<serde_json::Value> =
        serde_json::from_slice(payload).map_err(|err| BusError::Decode(err.to_string()))?;
    if envelope.kind != expected_kind {
        return Err(BusError::UnexpectedKind {
            expected: expected_kind.to_string(),
            found: envelope.kind,
        });
    }
    serde_json::from_value(envelope.payload).map_err(|err| BusError::Decode(err.to_string()))
}

pub fn publish_storage_change<B: Bus + ?Sized>(bus: &B, change: &StorageChange) -> BusResult<usize> {
    let payload = encode_envelope(STORAGE_CHANGE_KIND, change)?;
    bus.publish(TOPIC_STORAGE_CHANGE, payload)
}

pub fn decode_storage_change(message: &BusMessage) -> BusResult<StorageChange> {
    decode_envelope(STORAGE_CHANGE_KIND, &message.payload)
}

/// Broadcast-backed bus for contexts living in one process.
#[derive(Debug)]
pub struct LocalBus {
    capacity: usize,
    topics: parking_lot::RwLock<HashMap<String, broadcast::Sender<BusMessage>>>,
}

impl LocalBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// `capacity` bounds how many unread messages a slow subscriber may fall
    /// behind before it observes `RecvError::Lagged`.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            topics: parking_lot::RwLock::new(HashMap::new()),
        }
    }

    fn sender_for(&self, topic: &str) -> broadcast::Sender<BusMessage> {
        if let Some(sender) = self.topics.read().get(topic) {
            return sender.clone();
        }
        let mut guard = self.topics.write();
        guard
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new()
    }
}

impl Bus for LocalBus {
    fn subscribe(&self, topic: &str) -> broadcast::Receiver<BusMessage> {
        self.sender_for(topic).subscribe()
    }

    fn publish(&self, topic: &str, payload: Bytes) -> BusResult<usize> {
        let sender = self.sender_for(topic);
        if sender.receiver_count() == 0 {
            return Ok(0);
        }
        sender
            .send(BusMessage {
                topic: topic.to_string(),
                payload,
            })
            .map_err(|_| BusError::Closed)
    }
}

//! # Messages flowing through trackers.
//!
//! A [`Message`] is an opaque JSON object owned by the host. The crate only reads
//! three reserved fields:
//!
//! - [`MSG_ID`] (`_msgid`): the host-assigned message id, used when no id property is configured;
//! - [`RESTORE_MARKER`] (`_ack_cached_tod`): absolute deadline (epoch ms) on persisted and restored messages;
//! - [`EVENT_FIELD`] (`_event`): the channel an acknowledgment signal was published on.
//!
//! Everything else is carried verbatim so a timed-out or restored message can be replayed unchanged.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Field holding the host-assigned message id.
pub const MSG_ID: &str = "_msgid";
/// Field holding the absolute deadline of a cached message.
pub const RESTORE_MARKER: &str = "_ack_cached_tod";
/// Field stamped by [`AckClear`](crate::AckClear) with the channel it published on.
pub const EVENT_FIELD: &str = "_event";

/// JSON object message with a guaranteed `_msgid` when built through the constructors.
///
/// Deserialization is transparent and does not add an id.
///
/// ## Example
/// ```rust
/// use ackvisor::Message;
/// use serde_json::json;
///
/// let msg = Message::from_value(json!({ "orderId": "X1", "payload": { "qty": 2 } }));
/// assert!(msg.id().is_some());
/// assert_eq!(msg.lookup("payload.qty"), Some(&json!(2)));
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Message(Map<String, Value>);

impl Message {
    /// Creates an empty message with a fresh `_msgid`.
    pub fn new() -> Self {
        Self::from_map(Map::new())
    }

    /// Wraps a JSON object, assigning a `_msgid` if it has none.
    ///
    /// Non-object values are stored under `payload`.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(map) => Self::from_map(map),
            other => {
                let mut map = Map::new();
                map.insert("payload".to_string(), other);
                Self::from_map(map)
            }
        }
    }

    /// Wraps a JSON map, assigning a `_msgid` if it has none.
    pub fn from_map(mut map: Map<String, Value>) -> Self {
        if !map.contains_key(MSG_ID) {
            map.insert(MSG_ID.to_string(), Value::String(generate_msgid()));
        }
        Self(map)
    }

    /// Returns the host-assigned message id, if present and a string.
    pub fn id(&self) -> Option<&str> {
        self.0.get(MSG_ID).and_then(Value::as_str)
    }

    /// Returns a top-level property.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// True if the message has the top-level property `key`.
    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Inserts a top-level property, returning the previous value.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(key.into(), value.into())
    }

    /// Builder-style [`insert`](Self::insert).
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    /// Removes a top-level property.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    /// Resolves a dotted property path (`payload.order.id`).
    ///
    /// Array segments are addressed by index (`items.0`).
    pub fn lookup(&self, path: &str) -> Option<&Value> {
        let mut parts = path.split('.');
        let mut cur = self.0.get(parts.next()?)?;
        for part in parts {
            cur = match cur {
                Value::Object(map) => map.get(part)?,
                Value::Array(items) => items.get(part.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(cur)
    }

    /// Returns the absolute deadline carried by a restored message.
    pub fn restored_deadline(&self) -> Option<i64> {
        let v = self.0.get(RESTORE_MARKER)?;
        v.as_i64().or_else(|| v.as_f64().map(|f| f as i64))
    }

    pub(crate) fn mark_restored(&mut self, deadline_ms: i64) {
        self.0
            .insert(RESTORE_MARKER.to_string(), Value::from(deadline_ms));
    }

    /// Borrow the underlying JSON map.
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Converts into a JSON value.
    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

impl Default for Message {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Value> for Message {
    fn from(value: Value) -> Self {
        Self::from_value(value)
    }
}

impl From<Map<String, Value>> for Message {
    fn from(map: Map<String, Value>) -> Self {
        Self::from_map(map)
    }
}

/// Random 16 hex digit id, the shape hosts use for `_msgid`.
fn generate_msgid() -> String {
    format!("{:016x}", rand::random::<u64>())
}

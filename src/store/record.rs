//! # Persisted record layout.
//!
//! A record is stored as the JSON of its message with the absolute deadline
//! injected under [`RESTORE_MARKER`](crate::message::RESTORE_MARKER):
//!
//! ```text
//! ack_msg_cache/<scope>/<id>   →   {"orderId":"X1","_msgid":"…","_ack_cached_tod":1700000000123}
//! ```
//!
//! The id is the object key, not a field; decoding takes it from the key.

use crate::error::StoreError;
use crate::message::Message;

/// On-disk form of a tracked entry.
#[derive(Clone, Debug, PartialEq)]
pub struct PersistedRecord {
    /// Tracked id (object key).
    pub id: String,
    /// Absolute deadline in epoch milliseconds.
    pub deadline_ms: i64,
    /// The message as submitted.
    pub payload: Message,
}

impl PersistedRecord {
    pub fn new(id: impl Into<String>, deadline_ms: i64, payload: Message) -> Self {
        Self {
            id: id.into(),
            deadline_ms,
            payload,
        }
    }

    /// Serializes the payload with the deadline marker injected.
    pub fn encode(&self) -> Result<Vec<u8>, StoreError> {
        let mut msg = self.payload.clone();
        msg.mark_restored(self.deadline_ms);
        serde_json::to_vec(&msg).map_err(|e| StoreError::Corrupt {
            id: self.id.clone(),
            reason: e.to_string(),
        })
    }

    /// Decodes a stored object; the deadline marker is required.
    pub fn decode(id: &str, bytes: &[u8]) -> Result<Self, StoreError> {
        let corrupt = |reason: String| StoreError::Corrupt {
            id: id.to_string(),
            reason,
        };
        let payload: Message = serde_json::from_slice(bytes).map_err(|e| corrupt(e.to_string()))?;
        let deadline_ms = payload
            .restored_deadline()
            .ok_or_else(|| corrupt("missing deadline marker".to_string()))?;
        Ok(Self {
            id: id.to_string(),
            deadline_ms,
            payload,
        })
    }

    /// The message to resubmit: the stored payload, marker included.
    pub fn into_restored_message(self) -> Message {
        let mut msg = self.payload;
        msg.mark_restored(self.deadline_ms);
        msg
    }
}

/// Result of loading one scope.
#[derive(Debug, Default)]
pub struct ScopeLoad {
    /// Records that decoded.
    pub records: Vec<PersistedRecord>,
    /// Records that could not be read, by key.
    pub failures: Vec<(String, StoreError)>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::RESTORE_MARKER;
    use serde_json::json;

    #[test]
    fn encoded_form_is_message_plus_marker() {
        let payload = Message::from_value(json!({ "_msgid": "m1", "orderId": "X1" }));
        let rec = PersistedRecord::new("X1", 1_000, payload.clone());
        let bytes = rec.encode().unwrap();

        let raw: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(raw["orderId"], json!("X1"));
        assert_eq!(raw[RESTORE_MARKER], json!(1_000));
        // the caller's payload is left untouched
        assert!(!payload.contains(RESTORE_MARKER));

        let back = PersistedRecord::decode("X1", &bytes).unwrap();
        assert_eq!(back.deadline_ms, 1_000);
        assert_eq!(back.id, "X1");
    }

    #[test]
    fn decode_requires_marker_and_json() {
        assert!(matches!(
            PersistedRecord::decode("a", br#"{"orderId":"a"}"#),
            Err(StoreError::Corrupt { .. })
        ));
        assert!(matches!(
            PersistedRecord::decode("b", b"not json"),
            Err(StoreError::Corrupt { .. })
        ));
    }
}

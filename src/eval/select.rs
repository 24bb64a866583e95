//! # Tracked-id selection.
//!
//! [`KeySelector`] evaluates the configured key expression to a **property name**
//! and reads that top-level property from the message. When the message has no
//! such property the host-assigned `_msgid` is used instead.
//!
//! [`MessageIdSelector`] always uses `_msgid` with `.` characters stripped; it is
//! the degenerate configuration for instances without an id property.
//!
//! Selectors do not validate ids; trackers reject ids that would escape their
//! storage scope.

use serde_json::Value;

use crate::config::DeadlineSettings;
use crate::error::TrackerError;
use crate::eval::EvaluatorRef;
use crate::message::Message;

/// Id-selector collaborator.
pub trait SelectId: Send + Sync + 'static {
    /// Resolves the tracked id of `msg`.
    fn select_id(&self, msg: &Message) -> Result<String, TrackerError>;
}

/// Selects `msg[key]`, falling back to `_msgid`.
pub struct KeySelector {
    key: String,
    key_type: String,
    evaluator: EvaluatorRef,
}

impl KeySelector {
    /// Selector for an explicit key expression.
    pub fn new(key: impl Into<String>, key_type: impl Into<String>, evaluator: EvaluatorRef) -> Self {
        Self {
            key: key.into(),
            key_type: key_type.into(),
            evaluator,
        }
    }

    /// Selector for the key configured in `settings`.
    pub fn from_settings(settings: &DeadlineSettings, evaluator: EvaluatorRef) -> Self {
        Self::new(settings.key.clone(), settings.key_type.clone(), evaluator)
    }
}

impl SelectId for KeySelector {
    fn select_id(&self, msg: &Message) -> Result<String, TrackerError> {
        let key = self
            .evaluator
            .evaluate(&self.key, &self.key_type, msg)
            .map_err(|source| TrackerError::Evaluation { field: "key", source })?;

        let property = match &key {
            Value::String(name) => msg.get(name),
            Value::Null => None,
            other => msg.get(&render(other)),
        };

        match property {
            Some(v) => Ok(render(v)),
            None => Ok(msg.id().unwrap_or_default().to_string()),
        }
    }
}

/// Selects `_msgid` with `.` removed.
#[derive(Clone, Copy, Debug, Default)]
pub struct MessageIdSelector;

impl SelectId for MessageIdSelector {
    fn select_id(&self, msg: &Message) -> Result<String, TrackerError> {
        Ok(msg.id().unwrap_or_default().replace('.', ""))
    }
}

/// Strings are used as-is; everything else is rendered as JSON.
fn render(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::PropertyEvaluator;
    use serde_json::json;
    use std::sync::Arc;

    fn selector(key: &str, kind: &str) -> KeySelector {
        KeySelector::new(key, kind, Arc::new(PropertyEvaluator::default()))
    }

    #[test]
    fn reads_named_property() {
        let msg = Message::from_value(json!({ "orderId": "X1" }));
        assert_eq!(selector("orderId", "str").select_id(&msg).unwrap(), "X1");
    }

    #[test]
    fn numeric_ids_are_stringified() {
        let msg = Message::from_value(json!({ "orderId": 17 }));
        assert_eq!(selector("orderId", "str").select_id(&msg).unwrap(), "17");
    }

    #[test]
    fn missing_property_falls_back_to_msgid() {
        let msg = Message::from_value(json!({ "_msgid": "m-1" }));
        assert_eq!(selector("orderId", "str").select_id(&msg).unwrap(), "m-1");
        assert_eq!(selector("", "str").select_id(&msg).unwrap(), "m-1");
    }

    #[test]
    fn key_can_come_from_the_message() {
        let msg = Message::from_value(json!({ "idField": "sku", "sku": "A-9" }));
        assert_eq!(selector("idField", "msg").select_id(&msg).unwrap(), "A-9");
    }

    #[test]
    fn evaluation_failures_surface() {
        let msg = Message::new();
        let err = selector("x", "nope").select_id(&msg).unwrap_err();
        assert_eq!(err.as_label(), "evaluation_failed");
    }

    #[test]
    fn message_id_selector_strips_dots() {
        let msg = Message::from_value(json!({ "_msgid": "4f2a.91c" }));
        assert_eq!(MessageIdSelector.select_id(&msg).unwrap(), "4f2a91c");
    }
}

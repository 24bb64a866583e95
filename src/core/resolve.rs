//! Per-message resolution of the tracked id and its TTL.

use serde_json::Value;

use crate::config::{DeadlineSettings, Units};
use crate::error::TrackerError;
use crate::eval::{EvaluatorRef, SelectorRef, parse_number};
use crate::message::Message;
use crate::store::check_key;

/// Evaluates id and TTL expressions of one instance.
pub(crate) struct Resolver {
    settings: DeadlineSettings,
    evaluator: EvaluatorRef,
    selector: SelectorRef,
}

impl Resolver {
    pub(crate) fn new(
        settings: DeadlineSettings,
        evaluator: EvaluatorRef,
        selector: SelectorRef,
    ) -> Self {
        Self {
            settings,
            evaluator,
            selector,
        }
    }

    /// Resolves the id; ids that would escape the storage scope are rejected.
    pub(crate) fn id(&self, msg: &Message) -> Result<String, TrackerError> {
        let id = self.selector.select_id(msg)?;
        if check_key(&id).is_err() {
            return Err(TrackerError::InvalidId { id });
        }
        Ok(id)
    }

    /// Resolves the TTL in milliseconds.
    ///
    /// Positive fractions round up, so a positive TTL always arms a timer.
    pub(crate) fn ttl_ms(&self, msg: &Message) -> Result<i64, TrackerError> {
        let s = &self.settings;
        let ttl = self
            .evaluator
            .evaluate(&s.ttl, &s.ttl_type, msg)
            .map_err(|source| TrackerError::Evaluation { field: "ttl", source })?;
        let amount = as_number(&ttl).ok_or_else(|| TrackerError::InvalidTtl {
            value: ttl.to_string(),
        })?;

        let units = self
            .evaluator
            .evaluate(&s.units, &s.units_type, msg)
            .map_err(|source| TrackerError::Evaluation {
                field: "units",
                source,
            })?;

        let ms = amount * Units::from_value(&units).millis();
        if !ms.is_finite() {
            return Err(TrackerError::InvalidTtl {
                value: ttl.to_string(),
            });
        }
        let ms = if ms > 0.0 { ms.ceil() } else { ms.trunc() };
        Ok(ms as i64)
    }
}

/// Numbers and numeric strings; everything else is not a TTL.
fn as_number(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => parse_number(s).and_then(|n| n.as_f64()),
        _ => None,
    }
    .filter(|f| f.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::{KeySelector, PropertyEvaluator};
    use serde_json::json;
    use std::sync::Arc;

    fn resolver(settings: DeadlineSettings) -> Resolver {
        let evaluator: EvaluatorRef = Arc::new(PropertyEvaluator::default());
        let selector = Arc::new(KeySelector::from_settings(&settings, evaluator.clone()));
        Resolver::new(settings, evaluator, selector)
    }

    fn settings(ttl: &str, ttl_type: &str, units: &str) -> DeadlineSettings {
        DeadlineSettings {
            ttl: ttl.to_string(),
            ttl_type: ttl_type.to_string(),
            units: units.to_string(),
            key: "orderId".to_string(),
            ..DeadlineSettings::default()
        }
    }

    #[test]
    fn normalizes_units() {
        let m = Message::new();
        assert_eq!(resolver(settings("200", "num", "milliseconds")).ttl_ms(&m).unwrap(), 200);
        assert_eq!(resolver(settings("1.5", "num", "seconds")).ttl_ms(&m).unwrap(), 1_500);
        assert_eq!(resolver(settings("2", "num", "minutes")).ttl_ms(&m).unwrap(), 120_000);
        assert_eq!(resolver(settings("1", "num", "Hours")).ttl_ms(&m).unwrap(), 3_600_000);
        assert_eq!(resolver(settings("3", "num", "weeks")).ttl_ms(&m).unwrap(), 3_000);
    }

    #[test]
    fn sub_millisecond_ttl_still_arms() {
        let m = Message::new();
        assert_eq!(resolver(settings("0.5", "num", "milliseconds")).ttl_ms(&m).unwrap(), 1);
        assert_eq!(resolver(settings("0", "num", "milliseconds")).ttl_ms(&m).unwrap(), 0);
        assert_eq!(resolver(settings("-2.5", "num", "milliseconds")).ttl_ms(&m).unwrap(), -2);
    }

    #[test]
    fn ttl_from_message_property() {
        let m = Message::from_value(json!({ "deadline": "250" }));
        let r = resolver(settings("deadline", "msg", "milliseconds"));
        assert_eq!(r.ttl_ms(&m).unwrap(), 250);

        let missing = Message::new();
        assert!(matches!(r.ttl_ms(&missing), Err(TrackerError::InvalidTtl { .. })));
    }

    #[test]
    fn non_numeric_ttl_is_rejected() {
        let m = Message::new();
        let err = resolver(settings("soon", "num", "seconds")).ttl_ms(&m).unwrap_err();
        assert_eq!(err.as_label(), "invalid_ttl");
    }

    #[test]
    fn ids_with_separators_are_rejected() {
        let r = resolver(DeadlineSettings {
            key: "orderId".to_string(),
            ..DeadlineSettings::default()
        });
        assert_eq!(r.id(&Message::new().with("orderId", "X1")).unwrap(), "X1");
        for bad in ["a/b", "a\\b", "..", "."] {
            let err = r.id(&Message::new().with("orderId", bad)).unwrap_err();
            assert!(matches!(err, TrackerError::InvalidId { .. }), "{bad}");
        }
    }
}

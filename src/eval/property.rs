//! # Built-in expression evaluator.
//!
//! | type   | result                                                   |
//! |--------|----------------------------------------------------------|
//! | `str`  | the expression text                                      |
//! | `num`  | the expression parsed as a number (kept as text if not)  |
//! | `bool` | `true` iff the expression is `"true"`                    |
//! | `json` | the expression parsed as JSON                            |
//! | `msg`  | the message property at the dotted path                  |
//! | `env`  | the environment variable (`Null` when unset)             |
//! | `date` | the current epoch milliseconds                           |
//!
//! A `num` expression that is not a number evaluates to its text so the caller
//! can report `InvalidTtl` with the offending value.

use serde_json::{Number, Value};

use crate::clock::{ClockRef, SystemClock};
use crate::error::EvalError;
use crate::eval::Evaluate;
use crate::message::Message;

/// Evaluator for the standard property types.
pub struct PropertyEvaluator {
    clock: ClockRef,
}

impl PropertyEvaluator {
    /// Evaluator whose `date` type reads `clock`.
    pub fn new(clock: ClockRef) -> Self {
        Self { clock }
    }
}

impl Default for PropertyEvaluator {
    fn default() -> Self {
        Self::new(std::sync::Arc::new(SystemClock))
    }
}

impl Evaluate for PropertyEvaluator {
    fn evaluate(&self, expr: &str, kind: &str, msg: &Message) -> Result<Value, EvalError> {
        match kind {
            "" | "str" => Ok(Value::String(expr.to_string())),
            "num" => Ok(parse_number(expr).unwrap_or_else(|| Value::String(expr.to_string()))),
            "bool" => Ok(Value::Bool(expr.trim() == "true")),
            "json" => serde_json::from_str(expr).map_err(|e| EvalError::Invalid {
                kind: kind.to_string(),
                expr: expr.to_string(),
                reason: e.to_string(),
            }),
            "msg" => Ok(msg.lookup(expr).cloned().unwrap_or(Value::Null)),
            "env" => Ok(std::env::var(expr)
                .map(Value::String)
                .unwrap_or(Value::Null)),
            "date" => Ok(Value::from(self.clock.now_millis())),
            other => Err(EvalError::UnknownType {
                kind: other.to_string(),
            }),
        }
    }
}

/// Parses an integer or float literal.
pub(crate) fn parse_number(s: &str) -> Option<Value> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(i) = s.parse::<i64>() {
        return Some(Value::from(i));
    }
    s.parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
        .map(Value::Number)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::TokioClock;
    use serde_json::json;
    use std::sync::Arc;

    fn eval(expr: &str, kind: &str, msg: &Message) -> Result<Value, EvalError> {
        PropertyEvaluator::default().evaluate(expr, kind, msg)
    }

    #[test]
    fn literal_types() {
        let m = Message::new();
        assert_eq!(eval("orderId", "str", &m).unwrap(), json!("orderId"));
        assert_eq!(eval("250", "num", &m).unwrap(), json!(250));
        assert_eq!(eval("1.5", "num", &m).unwrap(), json!(1.5));
        assert_eq!(eval("abc", "num", &m).unwrap(), json!("abc"));
        assert_eq!(eval("true", "bool", &m).unwrap(), json!(true));
        assert_eq!(eval(r#"{"a":1}"#, "json", &m).unwrap(), json!({ "a": 1 }));
    }

    #[test]
    fn msg_type_reads_dotted_paths() {
        let m = Message::from_value(json!({ "cfg": { "ttl": 3 } }));
        assert_eq!(eval("cfg.ttl", "msg", &m).unwrap(), json!(3));
        assert_eq!(eval("cfg.missing", "msg", &m).unwrap(), Value::Null);
    }

    #[test]
    fn unset_env_is_null() {
        let m = Message::new();
        let v = eval("ACKVISOR_SURELY_UNSET_VARIABLE", "env", &m).unwrap();
        assert_eq!(v, Value::Null);
    }

    #[test]
    fn malformed_json_and_unknown_types_fail() {
        let m = Message::new();
        assert!(matches!(eval("{", "json", &m), Err(EvalError::Invalid { .. })));
        assert!(matches!(eval("x", "jsonata", &m), Err(EvalError::UnknownType { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn date_reads_injected_clock() {
        let ev = PropertyEvaluator::new(Arc::new(TokioClock::starting_at(42)));
        assert_eq!(ev.evaluate("", "date", &Message::new()).unwrap(), json!(42));
    }
}

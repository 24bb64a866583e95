//! # Runtime and per-instance configuration.
//!
//! Provides:
//! - [`RuntimeConfig`] process-wide settings (cache location, restore grace, bus capacity);
//! - [`TrackerConfig`], [`RequesterConfig`], [`FailListenerConfig`] per-instance settings,
//!   deserializable from the host's flow JSON (camelCase field names);
//! - [`DeadlineSettings`] the TTL/unit/id-property expressions shared by trackers and requesters;
//! - [`Units`] TTL unit normalization.
//!
//! ## Sentinel values
//! - `restore_grace = 0s` → cached messages are resubmitted without waiting
//! - `working_dir = None` → `cache_dir` is used as given (relative to the process cwd)
//! - an empty `key` never names a message property → the id falls back to `_msgid`

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Default directory name for persisted messages.
pub const DEFAULT_CACHE_DIR: &str = "ack_msg_cache";

/// Process-wide runtime configuration.
///
/// ## Field semantics
/// - `cache_dir`: Root of the filesystem store (one sub-directory per tracker scope)
/// - `working_dir`: Optional base directory `cache_dir` is joined onto
/// - `restore_grace`: Delay before cached messages are resubmitted at startup
/// - `bus_capacity`: Lifecycle event bus ring buffer size (min 1; clamped by Bus)
#[derive(Clone, Debug)]
pub struct RuntimeConfig {
    /// Root directory name (or path) for persisted messages.
    pub cache_dir: PathBuf,

    /// Base directory the cache directory is resolved against.
    pub working_dir: Option<PathBuf>,

    /// Grace delay applied before restored messages are resubmitted.
    ///
    /// Gives sibling instances (acknowledgers, downstream consumers) time to
    /// finish initializing before restored outputs start flowing.
    pub restore_grace: Duration,

    /// Capacity of the lifecycle event bus.
    pub bus_capacity: usize,
}

impl RuntimeConfig {
    /// Returns the resolved cache root.
    pub fn cache_root(&self) -> PathBuf {
        match &self.working_dir {
            Some(base) => base.join(&self.cache_dir),
            None => self.cache_dir.clone(),
        }
    }

    /// Returns a bus capacity clamped to a minimum of 1.
    #[inline]
    pub fn bus_capacity_clamped(&self) -> usize {
        self.bus_capacity.max(1)
    }
}

impl Default for RuntimeConfig {
    /// Default configuration:
    ///
    /// - `cache_dir = "ack_msg_cache"`
    /// - `working_dir = None`
    /// - `restore_grace = 100ms`
    /// - `bus_capacity = 1024`
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from(DEFAULT_CACHE_DIR),
            working_dir: None,
            restore_grace: Duration::from_millis(100),
            bus_capacity: 1024,
        }
    }
}

/// TTL unit.
///
/// Anything unrecognised (including an absent value) is treated as seconds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Units {
    Milliseconds,
    #[default]
    Seconds,
    Minutes,
    Hours,
}

impl Units {
    /// Parses a unit name case-insensitively.
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "milliseconds" => Units::Milliseconds,
            "minutes" => Units::Minutes,
            "hours" => Units::Hours,
            _ => Units::Seconds,
        }
    }

    /// Parses an evaluated unit value; non-strings are seconds.
    pub fn from_value(v: &Value) -> Self {
        v.as_str().map(Self::parse).unwrap_or_default()
    }

    /// Milliseconds per unit.
    pub fn millis(self) -> f64 {
        match self {
            Units::Milliseconds => 1.0,
            Units::Seconds => 1_000.0,
            Units::Minutes => 60_000.0,
            Units::Hours => 3_600_000.0,
        }
    }
}

/// Expressions evaluated per message to find the tracked id and its deadline.
///
/// Each value is paired with an expression type understood by the
/// [`Evaluate`](crate::Evaluate) collaborator (`num`, `str`, `msg`, `env`, ...).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DeadlineSettings {
    /// TTL expression.
    #[serde(deserialize_with = "expr_string")]
    pub ttl: String,
    /// TTL expression type.
    pub ttl_type: String,
    /// Unit expression.
    pub units: String,
    /// Unit expression type.
    pub units_type: String,
    /// Expression naming the message property that holds the id.
    #[serde(deserialize_with = "expr_string")]
    pub key: String,
    /// Key expression type.
    pub key_type: String,
}

impl Default for DeadlineSettings {
    /// `ttl = 10` (`num`), `units = seconds` (`str`), empty `key` (`str`).
    fn default() -> Self {
        Self {
            ttl: "10".to_string(),
            ttl_type: "num".to_string(),
            units: "seconds".to_string(),
            units_type: "str".to_string(),
            key: String::new(),
            key_type: "str".to_string(),
        }
    }
}

/// Configuration of one tracker (`ack-start`) instance.
///
/// ## Example
/// ```rust
/// use ackvisor::TrackerConfig;
///
/// let cfg: TrackerConfig = serde_json::from_str(r#"{
///     "id": "a1.b2", "ttl": 200, "ttlType": "num", "units": "milliseconds",
///     "key": "orderId", "links": ["c3"], "persist": true
/// }"#).unwrap();
/// assert_eq!(cfg.scope_id(), "a1b2");
/// assert_eq!(cfg.deadline.ttl, "200");
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TrackerConfig {
    /// Instance id (host node id).
    pub id: String,
    /// Acknowledger instances whose channels this tracker listens on.
    pub links: Vec<String>,
    /// Persist pending messages so they survive restarts.
    pub persist: bool,
    /// TTL / unit / id-property expressions.
    #[serde(flatten)]
    pub deadline: DeadlineSettings,
}

impl TrackerConfig {
    /// New non-persistent config with default expressions.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    /// Sets a numeric TTL and a unit.
    pub fn with_ttl(mut self, ttl: impl ToString, units: Units) -> Self {
        self.deadline.ttl = ttl.to_string();
        self.deadline.ttl_type = "num".to_string();
        self.deadline.units = units_name(units).to_string();
        self.deadline.units_type = "str".to_string();
        self
    }

    /// Sets the message property holding the id.
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.deadline.key = key.into();
        self.deadline.key_type = "str".to_string();
        self
    }

    /// Adds an acknowledger link.
    pub fn with_link(mut self, link: impl Into<String>) -> Self {
        self.links.push(link.into());
        self
    }

    /// Sets persistence.
    pub fn persistent(mut self, persist: bool) -> Self {
        self.persist = persist;
        self
    }

    /// Storage scope of this instance: the id with its first `.` removed.
    pub fn scope_id(&self) -> String {
        crate::store::scope_id(&self.id)
    }
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            id: String::new(),
            links: Vec::new(),
            persist: false,
            deadline: DeadlineSettings::default(),
        }
    }
}

/// Configuration of one request (`ack-req`) instance.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct RequesterConfig {
    /// Instance id; failures are published on `fail:<id>`.
    pub id: String,
    /// Acknowledger instances whose channels this requester listens on.
    pub links: Vec<String>,
    /// TTL / unit / id-property expressions.
    #[serde(flatten)]
    pub deadline: DeadlineSettings,
}

impl RequesterConfig {
    /// New config with default expressions.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    /// Sets a numeric TTL and a unit.
    pub fn with_ttl(mut self, ttl: impl ToString, units: Units) -> Self {
        self.deadline.ttl = ttl.to_string();
        self.deadline.ttl_type = "num".to_string();
        self.deadline.units = units_name(units).to_string();
        self.deadline.units_type = "str".to_string();
        self
    }

    /// Sets the message property holding the id.
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.deadline.key = key.into();
        self.deadline.key_type = "str".to_string();
        self
    }

    /// Adds an acknowledger link.
    pub fn with_link(mut self, link: impl Into<String>) -> Self {
        self.links.push(link.into());
        self
    }
}

/// Configuration of one failure listener (`ack-fail`) instance.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct FailListenerConfig {
    /// Instance id.
    pub id: String,
    /// Requester instances whose failure channels this listener follows.
    pub links: Vec<String>,
}

fn units_name(units: Units) -> &'static str {
    match units {
        Units::Milliseconds => "milliseconds",
        Units::Seconds => "seconds",
        Units::Minutes => "minutes",
        Units::Hours => "hours",
    }
}

/// Accepts JSON strings, numbers and booleans for expression fields.
fn expr_string<'de, D>(de: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(de)? {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn units_parse_case_insensitively_and_default_to_seconds() {
        assert_eq!(Units::parse("Minutes"), Units::Minutes);
        assert_eq!(Units::parse("HOURS"), Units::Hours);
        assert_eq!(Units::parse("milliseconds"), Units::Milliseconds);
        assert_eq!(Units::parse("fortnights"), Units::Seconds);
        assert_eq!(Units::from_value(&Value::Null), Units::Seconds);
        assert_eq!(Units::Minutes.millis(), 60_000.0);
    }

    #[test]
    fn tracker_config_fills_defaults() {
        let cfg: TrackerConfig = serde_json::from_str(r#"{ "id": "n1" }"#).unwrap();
        assert!(!cfg.persist);
        assert!(cfg.links.is_empty());
        assert_eq!(cfg.deadline, DeadlineSettings::default());
    }

    #[test]
    fn builder_helpers_set_expressions() {
        let cfg = TrackerConfig::new("n.1")
            .with_ttl(200, Units::Milliseconds)
            .with_key("orderId")
            .with_link("clear")
            .persistent(true);
        assert_eq!(cfg.deadline.ttl, "200");
        assert_eq!(cfg.deadline.units, "milliseconds");
        assert_eq!(cfg.scope_id(), "n1");
        assert_eq!(cfg.links, vec!["clear".to_string()]);
    }

    #[test]
    fn cache_root_joins_working_dir() {
        let mut rt = RuntimeConfig::default();
        assert_eq!(rt.cache_root(), PathBuf::from("ack_msg_cache"));
        rt.working_dir = Some(PathBuf::from("/var/lib/flows"));
        assert_eq!(rt.cache_root(), PathBuf::from("/var/lib/flows/ack_msg_cache"));
        rt.bus_capacity = 0;
        assert_eq!(rt.bus_capacity_clamped(), 1);
    }
}

//! Hook-delivered tool-use events
//!
//! An [`Event`] is an open JSON object: whatever the agent hook posted,
//! plus two server-assigned fields:
//!
//! | Field | Meaning |
//! |-------|---------|
//! | `id` | `evt_<unix ms>_<6 lowercase alphanumerics>` |
//! | `timestamp` | Arrival time in unix milliseconds |
//!
//! Server fields always override caller-supplied values of the same name.
//! The store only looks at a handful of optional keys (`tool_name`,
//! `tool_input.file_path`, `transcript_path`); everything else passes
//! through to viewers untouched.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Tool name recorded when an event carries no usable `tool_name`
pub const UNKNOWN_TOOL: &str = "unknown";

/// Prefix of every server-assigned event id
pub const ID_PREFIX: &str = "evt_";

/// Length of the random part of an event id
const ID_SUFFIX_LEN: usize = 6;

/// One tool-invocation record ingested from the agent hook.
///
/// Immutable once constructed; the store and every viewer channel share it
/// behind an `Arc`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Event(Map<String, Value>);

impl Event {
    /// Build an event from a hook request body, stamping `timestamp` and `id`.
    ///
    /// Returns `None` when the body is not a JSON object.
    pub fn ingest(body: Value) -> Option<Self> {
        let now_ms = Utc::now().timestamp_millis();
        Self::ingest_at(body, now_ms)
    }

    /// Same as [`Event::ingest`] with an explicit arrival time.
    pub fn ingest_at(body: Value, now_ms: i64) -> Option<Self> {
        let Value::Object(mut fields) = body else {
            return None;
        };

        fields.insert("timestamp".to_string(), Value::from(now_ms));
        fields.insert("id".to_string(), Value::String(make_id(now_ms)));
        Some(Self(fields))
    }

    /// Server-assigned identity
    pub fn id(&self) -> Option<&str> {
        self.0.get("id").and_then(Value::as_str)
    }

    /// Server-assigned arrival time (unix ms)
    pub fn timestamp(&self) -> Option<i64> {
        self.0.get("timestamp").and_then(Value::as_i64)
    }

    /// `tool_name` if present and a string
    pub fn tool_name(&self) -> Option<&str> {
        self.0.get("tool_name").and_then(Value::as_str)
    }

    /// `tool_input.file_path` if present, a string, and non-empty
    pub fn tool_input_file_path(&self) -> Option<&str> {
        self.0
            .get("tool_input")
            .and_then(Value::as_object)
            .and_then(|input| input.get("file_path"))
            .and_then(Value::as_str)
            .filter(|p| !p.is_empty())
    }

    /// `transcript_path` if present, a string, and non-empty
    pub fn transcript_path(&self) -> Option<&str> {
        self.0
            .get("transcript_path")
            .and_then(Value::as_str)
            .filter(|p| !p.is_empty())
    }

    /// Raw field access
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Borrow the underlying JSON object
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }
}

impl From<Map<String, Value>> for Event {
    fn from(fields: Map<String, Value>) -> Self {
        Self(fields)
    }
}

/// Generate an event id: `evt_<ms>_<suffix>`.
///
/// The suffix comes from a v4 UUID's simple (lowercase hex) form, so it is
/// always drawn from `[a-z0-9]`.
pub fn make_id(now_ms: i64) -> String {
    let random = uuid::Uuid::new_v4().simple().to_string();
    format!("{ID_PREFIX}{now_ms}_{}", &random[..ID_SUFFIX_LEN])
}

/// Check whether `id` has the shape produced by [`make_id`].
pub fn is_valid_id(id: &str) -> bool {
    let Some(rest) = id.strip_prefix(ID_PREFIX) else {
        return false;
    };
    let Some((ms, suffix)) = rest.split_once('_') else {
        return false;
    };

    !ms.is_empty()
        && ms.bytes().all(|b| b.is_ascii_digit())
        && suffix.len() == ID_SUFFIX_LEN
        && suffix
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit())
}

//! Reconstructed user/assistant conversation
//!
//! Lines that become entries:
//! - `type == "user"`, `message.role == "user"`, non-empty string `message.content`
//! - `message.role == "assistant"` with list content; non-empty `text` blocks
//!   are joined with a blank line
//!
//! The transcript may rewrite a message in place by repeating its `uuid` on a
//! later line, so the last line per `uuid` wins. Entries without a `uuid` are
//! kept as they are. The result is sorted by `timestamp` (string order; ties
//! keep file order) and a final pass drops any repeated `uuid`.

use super::TranscriptView;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};

/// Separator between assistant text blocks of one message
const BLOCK_SEPARATOR: &str = "\n\n";

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct RawRecord {
    uuid: Option<String>,
    #[serde(rename = "type")]
    record_type: Option<String>,
    timestamp: Option<String>,
    message: Option<RawMessage>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct RawMessage {
    role: Option<String>,
    content: Option<RawContent>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawContent {
    Text(String),
    Blocks(Vec<Value>),
    Other(Value),
}

/// One message in the reconstructed conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConversationEntry {
    /// `user` or `assistant`
    pub role: String,
    pub text: String,
    /// Source timestamp string (empty when the line had none)
    pub timestamp: String,
    pub uuid: Option<String>,
}

/// Ordered conversation served by `/api/conversation`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Conversation {
    pub messages: Vec<ConversationEntry>,
}

impl Conversation {
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

impl TranscriptView for Conversation {
    const KIND: &'static str = "conversation";

    fn ingest_line(&mut self, record: &Value) {
        let Ok(record) = RawRecord::deserialize(record) else {
            return;
        };
        if let Some(entry) = entry_from_record(record) {
            self.messages.push(entry);
        }
    }

    fn finish(&mut self) {
        self.messages = supersede_and_sort(std::mem::take(&mut self.messages));
    }
}

fn entry_from_record(record: RawRecord) -> Option<ConversationEntry> {
    let message = record.message?;
    let role = message.role?;

    let text = match (role.as_str(), message.content?) {
        ("user", RawContent::Text(text)) if record.record_type.as_deref() == Some("user") => text,
        ("assistant", RawContent::Blocks(blocks)) => join_text_blocks(&blocks),
        _ => return None,
    };

    if text.is_empty() {
        return None;
    }

    Some(ConversationEntry {
        role,
        text,
        timestamp: record.timestamp.unwrap_or_default(),
        uuid: record.uuid,
    })
}

fn join_text_blocks(blocks: &[Value]) -> String {
    blocks
        .iter()
        .filter(|b| b.get("type").and_then(Value::as_str) == Some("text"))
        .filter_map(|b| b.get("text").and_then(Value::as_str))
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(BLOCK_SEPARATOR)
}

/// Keep the last entry per uuid plus every uuid-less entry, sort by
/// timestamp (stable), then drop any uuid seen earlier in the sorted order.
fn supersede_and_sort(entries: Vec<ConversationEntry>) -> Vec<ConversationEntry> {
    let mut last_index: HashMap<String, usize> = HashMap::new();
    for (index, entry) in entries.iter().enumerate() {
        if let Some(uuid) = &entry.uuid {
            last_index.insert(uuid.clone(), index);
        }
    }

    let mut kept: Vec<ConversationEntry> = entries
        .into_iter()
        .enumerate()
        .filter(|(index, entry)| match &entry.uuid {
            Some(uuid) => last_index.get(uuid) == Some(index),
            None => true,
        })
        .map(|(_, entry)| entry)
        .collect();

    kept.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));

    let mut seen: HashSet<String> = HashSet::new();
    kept.retain(|entry| match &entry.uuid {
        Some(uuid) => seen.insert(uuid.clone()),
        None => true,
    });
    kept
}

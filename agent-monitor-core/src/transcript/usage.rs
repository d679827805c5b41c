//! Token usage totals

use super::TranscriptView;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct RawUsage {
    input_tokens: Option<u64>,
    output_tokens: Option<u64>,
    cache_creation_input_tokens: Option<u64>,
    cache_read_input_tokens: Option<u64>,
}

/// Sum of `message.usage` counters across the transcript.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UsageTotals {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_creation_input_tokens: u64,
    pub cache_read_input_tokens: u64,
    /// All four counters combined
    pub total_tokens: u64,
    /// Lines that carried a usage object
    pub api_messages: u64,
    /// Last `message.model` seen
    pub model: Option<String>,
}

impl TranscriptView for UsageTotals {
    const KIND: &'static str = "usage";

    fn ingest_line(&mut self, record: &Value) {
        let Some(message) = record.get("message").and_then(Value::as_object) else {
            return;
        };

        if let Some(model) = message.get("model").and_then(Value::as_str) {
            self.model = Some(model.to_string());
        }

        let Some(raw) = message.get("usage").filter(|u| u.is_object()) else {
            return;
        };
        // Non-numeric counters count as absent
        let usage: RawUsage = serde_json::from_value(raw.clone()).unwrap_or_default();

        let add = |total: &mut u64, count: Option<u64>| {
            *total = total.saturating_add(count.unwrap_or(0));
        };
        add(&mut self.input_tokens, usage.input_tokens);
        add(&mut self.output_tokens, usage.output_tokens);
        add(&mut self.cache_creation_input_tokens, usage.cache_creation_input_tokens);
        add(&mut self.cache_read_input_tokens, usage.cache_read_input_tokens);
        self.api_messages = self.api_messages.saturating_add(1);
    }

    fn finish(&mut self) {
        self.total_tokens = self
            .input_tokens
            .saturating_add(self.output_tokens)
            .saturating_add(self.cache_creation_input_tokens)
            .saturating_add(self.cache_read_input_tokens);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transcript::parse_reader;

    fn parse(input: &str) -> UsageTotals {
        parse_reader(input.as_bytes()).unwrap()
    }

    #[test]
    fn test_sums_usage_lines() {
        let totals = parse(concat!(
            r#"{"message":{"usage":{"input_tokens":10}}}"#,
            "\n",
            r#"{"message":{"usage":{"input_tokens":5,"output_tokens":2}}}"#,
            "\n",
        ));

        assert_eq!(totals.input_tokens, 15);
        assert_eq!(totals.output_tokens, 2);
        assert_eq!(totals.api_messages, 2);
        assert_eq!(totals.total_tokens, 17);
        assert_eq!(totals.model, None);
    }

    #[test]
    fn test_cache_counters_and_model() {
        let totals = parse(concat!(
            r#"{"type":"assistant","message":{"role":"assistant","model":"claude-sonnet-4","usage":{"input_tokens":3,"output_tokens":4,"cache_creation_input_tokens":100,"cache_read_input_tokens":200}}}"#,
            "\n",
            r#"{"type":"user","message":{"role":"user","content":"hi"}}"#,
            "\n",
            r#"{"type":"assistant","message":{"role":"assistant","model":"claude-opus-4","usage":{"input_tokens":1,"cache_read_input_tokens":50}}}"#,
            "\n",
        ));

        assert_eq!(totals.input_tokens, 4);
        assert_eq!(totals.output_tokens, 4);
        assert_eq!(totals.cache_creation_input_tokens, 100);
        assert_eq!(totals.cache_read_input_tokens, 250);
        assert_eq!(totals.total_tokens, 358);
        assert_eq!(totals.api_messages, 2);
        assert_eq!(totals.model.as_deref(), Some("claude-opus-4"));
    }

    #[test]
    fn test_odd_shapes_are_tolerated() {
        let totals = parse(concat!(
            r#"{"message":"plain string"}"#,
            "\n",
            r#"{"message":{"usage":null}}"#,
            "\n",
            r#"{"message":{"usage":{"input_tokens":"lots"}}}"#,
            "\n",
            r#"[1,2,3]"#,
            "\n",
            r#"{"message":{"usage":{"output_tokens":7}}}"#,
            "\n",
        ));

        // The string-valued counter line still counts as a usage line
        assert_eq!(totals.api_messages, 2);
        assert_eq!(totals.output_tokens, 7);
        assert_eq!(totals.input_tokens, 0);
    }

    #[test]
    fn test_huge_counters_saturate() {
        let line = format!(
            r#"{{"message":{{"usage":{{"input_tokens":{max},"output_tokens":{max}}}}}}}"#,
            max = u64::MAX
        );
        let totals = parse(&format!("{line}\n{line}\n"));

        assert_eq!(totals.input_tokens, u64::MAX);
        assert_eq!(totals.output_tokens, u64::MAX);
        assert_eq!(totals.total_tokens, u64::MAX);
        assert_eq!(totals.api_messages, 2);
    }

    #[test]
    fn test_serialized_shape() {
        let totals = parse(r#"{"message":{"model":"m","usage":{"input_tokens":1}}}"#);
        let value = serde_json::to_value(&totals).unwrap();

        for key in [
            "input_tokens",
            "output_tokens",
            "cache_creation_input_tokens",
            "cache_read_input_tokens",
            "total_tokens",
            "api_messages",
            "model",
        ] {
            assert!(value.get(key).is_some(), "missing {key}");
        }
        assert_eq!(value["model"], "m");
    }
}

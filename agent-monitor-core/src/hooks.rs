//! Agent hook installation
//!
//! Registers `PreToolUse` and `PostToolUse` command hooks in the agent's
//! `settings.json` so every tool call is POSTed to `/event`. Re-running
//! updates the existing entries in place instead of adding duplicates.
//!
//! Entries look like:
//!
//! ```json
//! { "matcher": "*", "hooks": [ { "type": "command", "command": "curl ... # agent-monitor" } ] }
//! ```

use crate::config::home_dir;
use crate::error::{Error, Result};
use serde_json::{json, Map, Value};
use std::path::{Path, PathBuf};

/// Hook events that receive the monitor command
pub const HOOK_TYPES: [&str; 2] = ["PreToolUse", "PostToolUse"];

/// Trailing marker identifying commands owned by this tool
pub const HOOK_MARKER: &str = "# agent-monitor";

/// What happened to one hook type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookChange {
    Added,
    Updated,
}

/// Summary of an install run.
#[derive(Debug, Clone)]
pub struct InstallReport {
    pub settings_path: PathBuf,
    /// The settings file existed and parsed
    pub existing: bool,
    /// The settings file existed but was not valid JSON; it was replaced
    pub replaced_invalid: bool,
    pub changes: Vec<(&'static str, HookChange)>,
}

/// `~/.claude/settings.json`
pub fn default_settings_path() -> PathBuf {
    home_dir().join(".claude").join("settings.json")
}

/// Shell command the agent runs for each hook; the hook payload arrives on stdin.
pub fn hook_command(port: u16) -> String {
    format!(
        "curl -s -m 2 -X POST -H 'Content-Type: application/json' --data-binary @- \
         http://localhost:{port}/event >/dev/null 2>&1 || true {HOOK_MARKER}"
    )
}

/// Add or refresh the monitor hooks in `settings_path`.
pub fn install_hooks(settings_path: &Path, port: u16) -> Result<InstallReport> {
    let settings_err = |message: String| Error::Settings {
        path: settings_path.display().to_string(),
        message,
    };

    let (mut settings, existing, replaced_invalid) = match std::fs::read_to_string(settings_path)
    {
        Ok(content) => match serde_json::from_str::<Value>(&content) {
            Ok(Value::Object(map)) => (map, true, false),
            Ok(_) | Err(_) => {
                tracing::warn!(path = %settings_path.display(), "Settings file is not a JSON object, starting fresh");
                (Map::new(), false, true)
            }
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => (Map::new(), false, false),
        Err(e) => return Err(e.into()),
    };

    let changes = merge_hooks(&mut settings, &hook_command(port)).map_err(settings_err)?;

    if let Some(parent) = settings_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut content = serde_json::to_string_pretty(&Value::Object(settings))?;
    content.push('\n');
    std::fs::write(settings_path, content)?;

    tracing::info!(path = %settings_path.display(), port, "Hooks installed");

    Ok(InstallReport {
        settings_path: settings_path.to_path_buf(),
        existing,
        replaced_invalid,
        changes,
    })
}

/// Ensure each hook type holds exactly one entry running `command`.
fn merge_hooks(
    settings: &mut Map<String, Value>,
    command: &str,
) -> std::result::Result<Vec<(&'static str, HookChange)>, String> {
    let hooks = settings
        .entry("hooks")
        .or_insert_with(|| Value::Object(Map::new()))
        .as_object_mut()
        .ok_or_else(|| "\"hooks\" is not an object".to_string())?;

    let mut changes = Vec::with_capacity(HOOK_TYPES.len());

    for hook_type in HOOK_TYPES {
        let entries = hooks
            .entry(hook_type)
            .or_insert_with(|| Value::Array(Vec::new()))
            .as_array_mut()
            .ok_or_else(|| format!("\"hooks.{hook_type}\" is not an array"))?;

        let existing = entries
            .iter_mut()
            .filter_map(|entry| entry.get_mut("hooks").and_then(Value::as_array_mut))
            .flat_map(|inner| inner.iter_mut())
            .find(|hook| {
                hook.get("command")
                    .and_then(Value::as_str)
                    .is_some_and(|c| c.contains(HOOK_MARKER))
            });

        match existing {
            Some(hook) => {
                hook["command"] = Value::String(command.to_string());
                changes.push((hook_type, HookChange::Updated));
            }
            None => {
                entries.push(json!({
                    "matcher": "*",
                    "hooks": [{ "type": "command", "command": command }],
                }));
                changes.push((hook_type, HookChange::Added));
            }
        }
    }

    Ok(changes)
}

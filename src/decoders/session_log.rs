//! Decoder for agent session logs: one newline-delimited JSON object per
//! line, matching the shape `~/.claude/projects/**/*.jsonl` files have.
//!
//! Grounded on `src/connectors/claude_code.rs` for the overall scan/parse
//! shape and `original_source/daemon/jsonl_parser.py` for exact field
//! semantics (conversation id fallback, project-from-parent-dir, content
//! block flattening, message-type filter).

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::Utc;
use serde_json::Value;

use super::common::{decode_project_path, flatten_content, parse_timestamp, DecodeMetrics};
use crate::model::{Conversation, Message, MessageRole, SourceKind};

fn role_from_type(type_field: &str) -> Option<MessageRole> {
    match type_field {
        "user" => Some(MessageRole::User),
        "assistant" => Some(MessageRole::Assistant),
        _ => None,
    }
}

/// Parses a single `.jsonl` session log file into one [`Conversation`].
/// Only `type in {"user", "assistant"}` lines contribute messages;
/// `cwd`/`git_branch`/the conversation id are taken from the first valid
/// line, matching the original's "session metadata from first message
/// only" rule.
pub fn parse_session_log(path: &Path) -> Result<(Conversation, DecodeMetrics)> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("reading session log {}", path.display()))?;

    let project = path
        .parent()
        .and_then(|p| p.file_name())
        .map(|n| decode_project_path(&n.to_string_lossy()))
        .unwrap_or_default();

    let mut conversation_id = None;
    let mut cwd = None;
    let mut git_branch = None;
    let mut messages = Vec::new();
    let mut metrics = DecodeMetrics::default();
    let mut conversation_timestamp = None;

    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let value: Value = match serde_json::from_str(line) {
            Ok(v) => v,
            Err(_) => {
                metrics.schema_errors += 1;
                continue;
            }
        };

        let type_field = value
            .get("type")
            .and_then(Value::as_str)
            .or_else(|| value.get("role").and_then(Value::as_str));
        let Some(type_field) = type_field else {
            metrics.schema_errors += 1;
            continue;
        };
        let Some(role) = role_from_type(type_field) else {
            continue;
        };

        if conversation_id.is_none() {
            conversation_id = value
                .get("sessionId")
                .and_then(Value::as_str)
                .map(String::from);
            cwd = value.get("cwd").and_then(Value::as_str).map(String::from);
            git_branch = value
                .get("gitBranch")
                .and_then(Value::as_str)
                .map(String::from);
        }

        let raw_ts = value
            .get("timestamp")
            .or_else(|| value.get("time"))
            .and_then(Value::as_str)
            .unwrap_or("");
        let timestamp = parse_timestamp(raw_ts);
        if conversation_timestamp.is_none() {
            conversation_timestamp = Some(timestamp);
        }

        let content_value = value
            .get("message")
            .and_then(|m| m.get("content"))
            .or_else(|| value.get("content"))
            .or_else(|| value.get("text"));
        let content = match content_value {
            Some(v) => flatten_content(v),
            None => continue,
        };

        if content.trim().is_empty() {
            continue;
        }

        messages.push(Message {
            role,
            content,
            timestamp,
        });
        metrics.total_messages += 1;
    }

    let conversation_id = conversation_id.unwrap_or_else(|| {
        path.file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string())
    });

    metrics.total_conversations = 1;
    if messages.is_empty() {
        metrics.failed_conversations = 1;
    }

    Ok((
        Conversation {
            id: conversation_id,
            timestamp: conversation_timestamp.unwrap_or_else(Utc::now),
            messages,
            project: if project.is_empty() { None } else { Some(project) },
            source: SourceKind::Agent,
            cwd,
            git_branch,
        },
        metrics,
    ))
}

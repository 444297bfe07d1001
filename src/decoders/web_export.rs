//! Decoder for web-export ZIP archives containing a top-level
//! `conversations.json`.
//!
//! Grounded on `original_source/daemon/claude_web_parser.py`: the archive
//! must contain `conversations.json` (its absence is a hard decode
//! failure, not a per-conversation one); each conversation's messages are
//! deduplicated by their own `uuid` within the conversation; roles are
//! validated against the fixed set `{human, user, assistant, ai}`.

use std::fs::File;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde_json::Value;
use std::collections::HashSet;

use super::common::{flatten_content, parse_timestamp, DecodeMetrics};
use crate::model::{Conversation, Message, MessageRole, SourceKind};

fn role_from_sender(sender: &str) -> Option<MessageRole> {
    match sender.to_ascii_lowercase().as_str() {
        "human" | "user" => Some(MessageRole::User),
        "assistant" | "ai" => Some(MessageRole::Assistant),
        _ => None,
    }
}

/// Parses a web-export ZIP archive into its conversations.
pub fn parse_web_export(path: &Path) -> Result<(Vec<Conversation>, DecodeMetrics)> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let mut archive =
        zip::ZipArchive::new(file).with_context(|| format!("reading zip {}", path.display()))?;

    let mut entry = match archive.by_name("conversations.json") {
        Ok(entry) => entry,
        Err(_) => bail!("no conversations.json found in {}", path.display()),
    };
    let conversations_data: Value =
        serde_json::from_reader(&mut entry).context("parsing conversations.json")?;
    drop(entry);

    let Value::Array(items) = conversations_data else {
        bail!("conversations.json is not a JSON array");
    };

    let mut metrics = DecodeMetrics {
        total_conversations: items.len(),
        ..Default::default()
    };
    let mut conversations = Vec::new();

    for conv_data in items {
        match parse_conversation(&conv_data, &mut metrics) {
            Some(conv) => conversations.push(conv),
            None => metrics.failed_conversations += 1,
        }
    }

    Ok((conversations, metrics))
}

fn parse_conversation(data: &Value, metrics: &mut DecodeMetrics) -> Option<Conversation> {
    let conv_id = data
        .get("uuid")
        .and_then(Value::as_str)
        .unwrap_or("unknown_conv")
        .to_string();

    let chat_messages = data.get("chat_messages").and_then(Value::as_array);
    let Some(chat_messages) = chat_messages.filter(|m| !m.is_empty()) else {
        metrics.schema_errors += 1;
        return None;
    };

    let mut seen_ids = HashSet::new();
    let mut messages = Vec::new();
    let mut conversation_timestamp = None;

    for raw_msg in chat_messages {
        let Some(msg_id) = raw_msg.get("uuid").and_then(Value::as_str) else {
            continue;
        };
        if !seen_ids.insert(msg_id.to_string()) {
            continue;
        }

        let Some(sender) = raw_msg.get("sender").and_then(Value::as_str) else {
            continue;
        };
        let Some(role) = role_from_sender(sender) else {
            continue;
        };

        let content = raw_msg
            .get("text")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .unwrap_or_else(|| {
                raw_msg
                    .get("content")
                    .map(flatten_content)
                    .unwrap_or_default()
            });

        if content.trim().is_empty() {
            continue;
        }

        let raw_ts = raw_msg
            .get("created_at")
            .and_then(Value::as_str)
            .unwrap_or("");
        let timestamp = parse_timestamp(raw_ts);
        if conversation_timestamp.is_none() {
            conversation_timestamp = Some(timestamp);
        }

        messages.push(Message {
            role,
            content,
            timestamp,
        });
        metrics.total_messages += 1;
    }

    if messages.is_empty() {
        return None;
    }

    Some(Conversation {
        id: conv_id,
        timestamp: conversation_timestamp.unwrap_or_else(chrono::Utc::now),
        messages,
        project: None,
        source: SourceKind::Web,
        cwd: None,
        git_branch: None,
    })
}

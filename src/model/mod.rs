//! Core data model: the normalized shape every decoder produces and every
//! downstream component (lexical index, vector worker, planner) consumes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Role of a single message within a conversation.
///
/// Unlike the teacher's connector layer, which ingests a long tail of
/// third-party agent formats and keeps an `Other(String)` catch-all role,
/// the three decoders this crate implements only ever emit these four —
/// anything else is a decoder-level skip, not a stored value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
    Tool,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::System => "system",
            MessageRole::Tool => "tool",
        }
    }
}

/// Where a conversation originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Agent,
    Web,
    Memory,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Agent => "agent",
            SourceKind::Web => "web",
            SourceKind::Memory => "memory",
        }
    }
}

/// The two index partitions. Agent and memory sources land in `Alpha`;
/// web-export sources land in `Beta`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Collection {
    Alpha,
    Beta,
}

impl Collection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::Alpha => "alpha",
            Collection::Beta => "beta",
        }
    }

    pub fn for_source(source: SourceKind) -> Self {
        match source {
            SourceKind::Agent | SourceKind::Memory => Collection::Alpha,
            SourceKind::Web => Collection::Beta,
        }
    }
}

impl std::str::FromStr for Collection {
    type Err = crate::error::PlannerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "alpha" => Ok(Collection::Alpha),
            "beta" => Ok(Collection::Beta),
            other => Err(crate::error::PlannerError::UnknownCollection(
                other.to_string(),
            )),
        }
    }
}

impl std::fmt::Display for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub messages: Vec<Message>,
    pub project: Option<String>,
    pub source: SourceKind,
    pub cwd: Option<String>,
    pub git_branch: Option<String>,
}

/// Flat metadata carried alongside indexed text. Missing optionals
/// serialize as empty strings rather than being omitted, so every
/// document has the same metadata shape regardless of source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub conversation_id: String,
    pub role: MessageRole,
    pub timestamp: DateTime<Utc>,
    pub project: String,
    pub source: SourceKind,
    pub cwd: String,
    pub git_branch: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub doc_id: String,
    pub text: String,
    pub metadata: DocumentMetadata,
    pub collection: Collection,
}

/// Deterministic 128-bit document identity: the first 16 bytes of
/// `SHA-256("{conversation_id}:{ordinal}:{content[..200]}")`, hex-encoded.
///
/// See DESIGN.md Open Question 1 for why this fixes the digest width at
/// exactly 128 bits rather than mirroring the original prototype's
/// 36-hex-char truncation.
pub fn doc_id(conversation_id: &str, ordinal: usize, content: &str) -> String {
    let cutoff = content
        .char_indices()
        .map(|(i, c)| i + c.len_utf8())
        .take_while(|&end| end <= 200)
        .last()
        .unwrap_or(0);
    let input = format!("{conversation_id}:{ordinal}:{}", &content[..cutoff]);
    let digest = Sha256::digest(input.as_bytes());
    hex::encode(&digest[..16])
}

/// Builds the [`Document`]s for a conversation, one per non-empty message,
/// in message order (the `ordinal` used in `doc_id` is the message's index
/// within the conversation).
pub fn documents_for_conversation(conversation: &Conversation) -> Vec<Document> {
    let collection = Collection::for_source(conversation.source);
    conversation
        .messages
        .iter()
        .enumerate()
        .filter(|(_, m)| !m.content.trim().is_empty())
        .map(|(ordinal, m)| Document {
            doc_id: doc_id(&conversation.id, ordinal, &m.content),
            text: m.content.clone(),
            metadata: DocumentMetadata {
                conversation_id: conversation.id.clone(),
                role: m.role,
                timestamp: m.timestamp,
                project: conversation.project.clone().unwrap_or_default(),
                source: conversation.source,
                cwd: conversation.cwd.clone().unwrap_or_default(),
                git_branch: conversation.git_branch.clone().unwrap_or_default(),
            },
            collection,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn conv() -> Conversation {
        Conversation {
            id: "conv-1".into(),
            timestamp: Utc::now(),
            messages: vec![
                Message {
                    role: MessageRole::User,
                    content: "hello".into(),
                    timestamp: Utc::now(),
                },
                Message {
                    role: MessageRole::Assistant,
                    content: "  ".into(),
                    timestamp: Utc::now(),
                },
            ],
            project: Some("myproj".into()),
            source: SourceKind::Agent,
            cwd: None,
            git_branch: None,
        }
    }

    #[test]
    fn doc_id_is_deterministic_and_128_bit() {
        let a = doc_id("c", 0, "hello");
        let b = doc_id("c", 0, "hello");
        assert_eq!(a, b);
        assert_eq!(a.len(), 32); // 16 bytes hex-encoded
    }

    #[test]
    fn doc_id_changes_with_ordinal() {
        assert_ne!(doc_id("c", 0, "hello"), doc_id("c", 1, "hello"));
    }

    #[test]
    fn blank_messages_are_skipped() {
        let docs = documents_for_conversation(&conv());
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].collection, Collection::Alpha);
        assert_eq!(docs[0].metadata.project, "myproj");
    }

    #[test]
    fn collection_routing_matches_source() {
        assert_eq!(Collection::for_source(SourceKind::Agent), Collection::Alpha);
        assert_eq!(
            Collection::for_source(SourceKind::Memory),
            Collection::Alpha
        );
        assert_eq!(Collection::for_source(SourceKind::Web), Collection::Beta);
    }

    proptest::proptest! {
        /// doc_id is a pure function of its three inputs: same inputs, same
        /// id, no matter how many times it's recomputed (spec.md §8
        /// property 2).
        #[test]
        fn doc_id_is_pure(conv_id in "[a-zA-Z0-9_-]{0,40}", ordinal in 0usize..10_000, content in ".{0,400}") {
            let a = doc_id(&conv_id, ordinal, &content);
            let b = doc_id(&conv_id, ordinal, &content);
            prop_assert_eq!(a, b);
        }

        /// Only the first 200 bytes of content can affect the id — content
        /// that diverges after that point must still collide.
        #[test]
        fn doc_id_ignores_content_past_200_bytes(conv_id in "[a-zA-Z0-9_-]{1,20}", ordinal in 0usize..1000, prefix in "[a-zA-Z0-9 ]{200,250}", suffix_a in "[a-zA-Z0-9]{0,20}", suffix_b in "[a-zA-Z0-9]{0,20}") {
            let content_a = format!("{prefix}{suffix_a}");
            let content_b = format!("{prefix}{suffix_b}");
            prop_assert_eq!(doc_id(&conv_id, ordinal, &content_a), doc_id(&conv_id, ordinal, &content_b));
        }
    }
}

//! Lexical index: one Tantivy instance per collection, upserted by `doc_id`
//! and queried through a sanitized boolean-OR expression.
//!
//! Grounded on `examples/rawwerks.../src/search/tantivy.rs` for the
//! schema/writer/reader shape and `src/search/query.rs::sanitize_query` for
//! the punctuation-stripping idiom (extended here to spec.md §4.3's wider
//! punctuation list) and on `original_source/daemon/knowledge_db_dual.py::
//! _build_fts_query` for the quoted-OR join and the 5x over-fetch
//! discipline (the multiplier itself lives in the planner, not here).

use std::path::Path;

use anyhow::{Context, Result};
use tantivy::collector::TopDocs;
use tantivy::query::QueryParser;
use tantivy::schema::{self, STORED, STRING, Schema, TEXT, Value as _};
use tantivy::{Index, IndexWriter, TantivyDocument, Term};

use crate::model::{Collection, Document, DocumentMetadata, MessageRole, SourceKind};

/// Punctuation the planner strips before building a lexical query, per
/// spec.md §4.3: `* " ( ) { } [ ] ^ ~ : + -`.
const RESERVED_PUNCTUATION: &[char] = &[
    '*', '"', '(', ')', '{', '}', '[', ']', '^', '~', ':', '+', '-',
];

/// Replaces every FTS-reserved character with a space so the result can
/// never be interpreted as query syntax by Tantivy's parser.
pub fn sanitize_query(raw: &str) -> String {
    raw.chars()
        .map(|c| if RESERVED_PUNCTUATION.contains(&c) { ' ' } else { c })
        .collect()
}

/// Builds the `"tok1" OR "tok2" ...` boolean expression Tantivy's query
/// parser accepts, from already-sanitized text. Each token is individually
/// quoted so no leftover character sequence can be read as query syntax.
fn boolean_or_expression(sanitized: &str) -> Option<String> {
    let tokens: Vec<&str> = sanitized.split_whitespace().collect();
    if tokens.is_empty() {
        return None;
    }
    Some(
        tokens
            .iter()
            .map(|t| format!("\"{t}\""))
            .collect::<Vec<_>>()
            .join(" OR "),
    )
}

#[derive(Clone, Copy)]
struct Fields {
    doc_id: schema::Field,
    conversation_id: schema::Field,
    role: schema::Field,
    timestamp: schema::Field,
    project: schema::Field,
    source: schema::Field,
    cwd: schema::Field,
    git_branch: schema::Field,
    content: schema::Field,
}

fn build_schema() -> (Schema, Fields) {
    let mut builder = Schema::builder();
    let doc_id = builder.add_text_field("doc_id", STRING | STORED);
    let conversation_id = builder.add_text_field("conversation_id", TEXT | STORED);
    let role = builder.add_text_field("role", STRING | STORED);
    let timestamp = builder.add_i64_field("timestamp", schema::INDEXED | STORED);
    let project = builder.add_text_field("project", TEXT | STORED);
    let source = builder.add_text_field("source", STRING | STORED);
    let cwd = builder.add_text_field("cwd", TEXT | STORED);
    let git_branch = builder.add_text_field("git_branch", TEXT | STORED);
    let content = builder.add_text_field("content", TEXT | STORED);
    let schema = builder.build();
    (
        schema,
        Fields {
            doc_id,
            conversation_id,
            role,
            timestamp,
            project,
            source,
            cwd,
            git_branch,
            content,
        },
    )
}

fn role_from_str(s: &str) -> MessageRole {
    match s {
        "assistant" => MessageRole::Assistant,
        "system" => MessageRole::System,
        "tool" => MessageRole::Tool,
        _ => MessageRole::User,
    }
}

fn source_from_str(s: &str) -> SourceKind {
    match s {
        "web" => SourceKind::Web,
        "memory" => SourceKind::Memory,
        _ => SourceKind::Agent,
    }
}

/// One result row from a lexical query, already mapped into the
/// lower-is-better distance space the planner fuses against vector hits.
#[derive(Debug, Clone, PartialEq)]
pub struct LexicalHit {
    pub doc_id: String,
    pub text: String,
    pub metadata: DocumentMetadata,
    pub distance: f32,
}

/// A single collection's on-disk Tantivy partition. The orchestrator holds
/// `&mut` handles for writing; query paths open a fresh reader per call,
/// matching spec.md §4.3's "read-only connection mode for query paths."
pub struct LexicalIndex {
    index: Index,
    writer: IndexWriter,
    fields: Fields,
    collection: Collection,
}

impl LexicalIndex {
    pub fn open_or_create(dir: &Path, collection: Collection) -> Result<Self> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("creating lexical index dir {}", dir.display()))?;
        let (schema, fields) = build_schema();
        let index = if dir.join("meta.json").exists() {
            Index::open_in_dir(dir)
                .with_context(|| format!("opening lexical index {}", dir.display()))?
        } else {
            Index::create_in_dir(dir, schema)
                .with_context(|| format!("creating lexical index {}", dir.display()))?
        };
        let writer = index
            .writer(50_000_000)
            .context("opening lexical index writer")?;
        Ok(Self { index, writer, fields, collection })
    }

    /// Upsert-by-`doc_id`: Tantivy has no native update, so this deletes
    /// any existing document with the same id and re-adds it in the same
    /// writer generation. Call [`LexicalIndex::commit`] to make it visible
    /// to readers — callers typically batch several upserts per commit.
    pub fn upsert(&mut self, document: &Document) -> Result<()> {
        let term = Term::from_field_text(self.fields.doc_id, &document.doc_id);
        self.writer.delete_term(term);

        let mut doc = TantivyDocument::default();
        doc.add_text(self.fields.doc_id, &document.doc_id);
        doc.add_text(self.fields.conversation_id, &document.metadata.conversation_id);
        doc.add_text(self.fields.role, document.metadata.role.as_str());
        doc.add_i64(self.fields.timestamp, document.metadata.timestamp.timestamp_millis());
        doc.add_text(self.fields.project, &document.metadata.project);
        doc.add_text(self.fields.source, document.metadata.source.as_str());
        doc.add_text(self.fields.cwd, &document.metadata.cwd);
        doc.add_text(self.fields.git_branch, &document.metadata.git_branch);
        doc.add_text(self.fields.content, &document.text);
        self.writer.add_document(doc)?;
        Ok(())
    }

    pub fn commit(&mut self) -> Result<()> {
        self.writer.commit()?;
        Ok(())
    }

    /// Document count for this collection, read straight from the
    /// searcher's metadata — never touches the vector worker (spec.md §8
    /// property 7 / §6 "MUST NOT call into the vector worker").
    pub fn count(&self) -> Result<usize> {
        let reader = self.index.reader()?;
        Ok(reader.searcher().num_docs() as usize)
    }

    /// Runs a sanitized boolean-OR query over `query_text`, returning up
    /// to `limit` hits ranked by ascending distance. An all-punctuation or
    /// empty query yields zero hits rather than an error (spec.md §8
    /// property 5: sanitization must never raise).
    pub fn search(&self, query_text: &str, limit: usize) -> Result<Vec<LexicalHit>> {
        let sanitized = sanitize_query(query_text);
        let Some(expr) = boolean_or_expression(&sanitized) else {
            return Ok(Vec::new());
        };

        let reader = self.index.reader()?;
        let searcher = reader.searcher();
        let parser = QueryParser::for_index(&self.index, vec![self.fields.content]);
        let query = parser
            .parse_query(&expr)
            .with_context(|| format!("parsing sanitized lexical query {expr:?}"))?;

        let top_docs = searcher.search(&query, &TopDocs::with_limit(limit))?;
        let mut hits = Vec::with_capacity(top_docs.len());
        for (score, address) in top_docs {
            let doc: TantivyDocument = searcher.doc(address)?;
            let get_text = |field: schema::Field| -> String {
                doc.get_first(field)
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string()
            };
            let doc_id = get_text(self.fields.doc_id);
            let content = get_text(self.fields.content);
            let role = role_from_str(&get_text(self.fields.role));
            let source = source_from_str(&get_text(self.fields.source));
            let timestamp_millis = doc
                .get_first(self.fields.timestamp)
                .and_then(|v| v.as_i64())
                .unwrap_or_default();
            let timestamp = chrono::DateTime::from_timestamp_millis(timestamp_millis)
                .unwrap_or_else(chrono::Utc::now);

            hits.push(LexicalHit {
                doc_id,
                text: content,
                metadata: DocumentMetadata {
                    conversation_id: get_text(self.fields.conversation_id),
                    role,
                    timestamp,
                    project: get_text(self.fields.project),
                    source,
                    cwd: get_text(self.fields.cwd),
                    git_branch: get_text(self.fields.git_branch),
                },
                // Tantivy's BM25 score is a similarity (higher is better);
                // fold it into the same lower-is-better distance space the
                // vector backend reports, so the planner can rank-union
                // both result streams without comparing incommensurable
                // scales directly.
                distance: 1.0 / (1.0 + score.max(0.0)),
            });
        }
        Ok(hits)
    }

    pub fn collection(&self) -> Collection {
        self.collection
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Collection, Document, DocumentMetadata, MessageRole, SourceKind};
    use chrono::Utc;
    use tempfile::tempdir;

    fn doc(id: &str, text: &str) -> Document {
        Document {
            doc_id: id.to_string(),
            text: text.to_string(),
            metadata: DocumentMetadata {
                conversation_id: "c1".into(),
                role: MessageRole::User,
                timestamp: Utc::now(),
                project: "proj".into(),
                source: SourceKind::Agent,
                cwd: String::new(),
                git_branch: String::new(),
            },
            collection: Collection::Alpha,
        }
    }

    #[test]
    fn sanitize_strips_reserved_punctuation() {
        let s = sanitize_query("type:system +weird* (foo)");
        assert!(!s.contains(':'));
        assert!(!s.contains('+'));
        assert!(!s.contains('*'));
        assert!(!s.contains('('));
    }

    #[test]
    fn upsert_then_commit_makes_document_searchable() {
        let dir = tempdir().unwrap();
        let mut idx = LexicalIndex::open_or_create(dir.path(), Collection::Alpha).unwrap();
        idx.upsert(&doc("d1", "Use A* pathfinding")).unwrap();
        idx.commit().unwrap();

        assert_eq!(idx.count().unwrap(), 1);
        let hits = idx.search("pathfinding", 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].doc_id, "d1");
    }

    #[test]
    fn upsert_is_idempotent_by_doc_id() {
        let dir = tempdir().unwrap();
        let mut idx = LexicalIndex::open_or_create(dir.path(), Collection::Alpha).unwrap();
        idx.upsert(&doc("d1", "hello world")).unwrap();
        idx.commit().unwrap();
        idx.upsert(&doc("d1", "hello world")).unwrap();
        idx.commit().unwrap();
        assert_eq!(idx.count().unwrap(), 1);
    }

    #[test]
    fn query_with_all_reserved_punctuation_returns_empty_without_erroring() {
        let dir = tempdir().unwrap();
        let mut idx = LexicalIndex::open_or_create(dir.path(), Collection::Alpha).unwrap();
        idx.upsert(&doc("d1", "hello world")).unwrap();
        idx.commit().unwrap();

        let hits = idx.search("***:::+++", 10).unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn search_is_safe_against_query_syntax_injection() {
        let dir = tempdir().unwrap();
        let mut idx = LexicalIndex::open_or_create(dir.path(), Collection::Alpha).unwrap();
        idx.upsert(&doc("d1", "deploy docker containers")).unwrap();
        idx.commit().unwrap();

        let hits = idx.search("type:system +weird*", 10).unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn reopening_an_existing_index_preserves_documents() {
        let dir = tempdir().unwrap();
        {
            let mut idx = LexicalIndex::open_or_create(dir.path(), Collection::Alpha).unwrap();
            idx.upsert(&doc("d1", "persisted content")).unwrap();
            idx.commit().unwrap();
        }
        let idx = LexicalIndex::open_or_create(dir.path(), Collection::Alpha).unwrap();
        assert_eq!(idx.count().unwrap(), 1);
    }
}

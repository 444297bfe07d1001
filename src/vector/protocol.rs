//! Wire format for the parent-to-worker RPC: newline-delimited UTF-8 JSON
//! in both directions, exactly spec.md §4.4/§6.
//!
//! Grounded verbatim on `examples/original_source/daemon/chroma_worker.py`'s
//! docstring and `_handle_query`/`_handle_index` — request/response shape,
//! method names, and the synthetic `__init__` ready handshake.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::model::{Collection, Document, DocumentMetadata};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub id: String,
    pub method: String,
    pub params: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// The `result` of the synthetic `__init__` response. Plain `"ready"`
/// means every collection opened cleanly (`Ready`); the object form
/// reports collections the worker explicitly skipped at startup
/// (`Degraded` — spec.md §4.4's "one collection too large to open
/// safely").
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ReadyResult {
    Simple(String),
    WithSkips {
        status: String,
        #[serde(default)]
        skipped_collections: Vec<Collection>,
    },
}

impl ReadyResult {
    pub fn skipped_collections(&self) -> Vec<Collection> {
        match self {
            ReadyResult::Simple(_) => Vec::new(),
            ReadyResult::WithSkips { skipped_collections, .. } => skipped_collections.clone(),
        }
    }
}

pub const INIT_ID: &str = "__init__";

/// Params for the `index` method: the documents derived from one
/// conversation, upserted into a single collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexParams {
    pub collection: Collection,
    pub documents: Vec<Document>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexResult {
    pub indexed: bool,
    #[serde(default)]
    pub count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryParams {
    pub query_text: String,
    pub n_results: usize,
    pub collections: Vec<Collection>,
    #[serde(default)]
    pub project_filter: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorHit {
    pub id: String,
    pub document: String,
    pub metadata: DocumentMetadata,
    pub distance: f32,
    pub collection: Collection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResult {
    pub results: Vec<VectorHit>,
    pub total_matches: usize,
}

//! In-process logic of the vector worker: one lazily created HNSW graph
//! per collection, a pluggable embedder, and the `ping`/`query`/`index`
//! handlers the child process's request loop dispatches into.
//!
//! Grounded on `examples/rawwerks.../src/search/ann_index.rs` for the HNSW
//! parameter constants (`M=16`, `ef_construction=200`, `ef_search=100`)
//! and on `examples/original_source/daemon/chroma_worker.py` for the
//! request-handling semantics (lazy per-collection index, upsert-by-id,
//! ascending-distance query union, startup collection skip list). Graph
//! persistence (dump on every `index` commit, reload at startup) is
//! grounded on `hnsw_rs::hnswio::HnswIo::load_hnsw` /
//! `Hnsw::file_dump`, the way `other_examples/.../HeraldStack`'s
//! `query::load_index_and_metadata` pairs them with a JSON metadata
//! sidecar next to the graph files.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use fxhash::FxHashMap;
use hnsw_rs::hnswio::HnswIo;
use hnsw_rs::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::model::{Collection, Document, DocumentMetadata};
use crate::vector::protocol::VectorHit;

pub const DEFAULT_M: usize = 16;
pub const DEFAULT_EF_CONSTRUCTION: usize = 200;
pub const DEFAULT_EF_SEARCH: usize = 100;
pub const DEFAULT_MAX_LAYER: usize = 16;

/// The embedding model itself is out of scope (spec.md §1): this crate
/// only needs *a* pure function from text to a fixed-dimension unit
/// vector, so the worker depends on this trait rather than a concrete
/// model loader.
pub trait Embedder: Send + Sync {
    fn embed(&self, text: &str) -> Vec<f32>;
    fn dimension(&self) -> usize;
}

/// FNV-1a feature-hashed bag-of-words embedder: deterministic, dependency-free,
/// and a reasonable stand-in for a real model in tests and as the default
/// `embedding_model_name = "hash-fnv-256"`.
pub struct HashEmbedder {
    dimension: usize,
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    pub fn default_dimension() -> Self {
        Self::new(256)
    }

    fn fnv1a(bytes: &[u8]) -> u64 {
        const OFFSET_BASIS: u64 = 0xcbf29ce484222325;
        const PRIME: u64 = 0x100000001b3;
        bytes.iter().fold(OFFSET_BASIS, |hash, &b| {
            (hash ^ b as u64).wrapping_mul(PRIME)
        })
    }
}

impl Embedder for HashEmbedder {
    fn embed(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0f32; self.dimension];
        for token in text.split_whitespace() {
            let h = Self::fnv1a(token.as_bytes());
            let idx = (h as usize) % self.dimension;
            let sign = if h & 1 == 0 { 1.0 } else { -1.0 };
            v[idx] += sign;
        }
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in v.iter_mut() {
                *x /= norm;
            }
        }
        v
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

#[derive(Serialize, Deserialize)]
struct Row {
    doc_id: String,
    text: String,
    metadata: DocumentMetadata,
}

struct CollectionIndex {
    hnsw: Hnsw<'static, f32, DistDot>,
    rows: Vec<Row>,
    doc_id_to_row: FxHashMap<String, usize>,
}

impl CollectionIndex {
    fn new(dimension: usize) -> Self {
        let _ = dimension; // HNSW itself is dimension-agnostic; kept for clarity at call sites.
        Self {
            hnsw: Hnsw::new(DEFAULT_M, 100_000, DEFAULT_MAX_LAYER, DEFAULT_EF_CONSTRUCTION, DistDot),
            rows: Vec::new(),
            doc_id_to_row: FxHashMap::default(),
        }
    }

    fn basename(collection: Collection) -> String {
        format!("hnsw-{}", collection.as_str())
    }

    fn rows_path(data_dir: &Path, collection: Collection) -> PathBuf {
        data_dir.join(format!("{}.rows.json", Self::basename(collection)))
    }

    /// Dumps the HNSW graph plus a JSON sidecar of `rows` (the graph
    /// itself carries no text/metadata, only vectors keyed by row index)
    /// to `data_dir`, so a freshly spawned worker can reload exactly what
    /// was indexed before it exited — the vector index is persisted state
    /// (spec.md §1/§6), not rebuilt from the source files on every start.
    fn save(&self, data_dir: &Path, collection: Collection) -> anyhow::Result<()> {
        std::fs::create_dir_all(data_dir)?;
        self.hnsw.file_dump(data_dir, &Self::basename(collection))?;
        let raw = serde_json::to_vec(&self.rows)?;
        std::fs::write(Self::rows_path(data_dir, collection), raw)?;
        Ok(())
    }

    /// Reloads a previously dumped graph and its rows sidecar. `None` if
    /// either file is absent or unreadable — the caller falls back to a
    /// fresh empty index, the same "readers tolerate absence and
    /// corruption" policy the manifest and journal already follow.
    fn load(data_dir: &Path, collection: Collection) -> Option<Self> {
        let raw = std::fs::read(Self::rows_path(data_dir, collection)).ok()?;
        let rows: Vec<Row> = match serde_json::from_slice(&raw) {
            Ok(rows) => rows,
            Err(e) => {
                warn!(%collection, error = %e, "vector rows sidecar corrupt, rebuilding index from scratch");
                return None;
            }
        };

        let basename = Self::basename(collection);
        let mut loader = HnswIo::new(data_dir, &basename);
        let loaded: Hnsw<'_, f32, DistDot> = match loader.load_hnsw() {
            Ok(h) => h,
            Err(e) => {
                warn!(%collection, error = %e, "HNSW graph file missing or unreadable, rebuilding index from scratch");
                return None;
            }
        };
        // SAFETY: the reloaded graph owns its vector data once loaded off
        // disk; nothing continues to borrow from `loader` past this point.
        let hnsw: Hnsw<'static, f32, DistDot> = unsafe { std::mem::transmute(loaded) };

        let doc_id_to_row = rows
            .iter()
            .enumerate()
            .map(|(idx, row)| (row.doc_id.clone(), idx))
            .collect();

        Some(Self { hnsw, rows, doc_id_to_row })
    }

    /// Upserts by `doc_id`. HNSW graphs have no in-place update, so a
    /// re-ingested `doc_id` is treated as a no-op: the eventual-convergence
    /// Non-goal (spec.md §1) makes this an acceptable tradeoff, and it is
    /// what gives upsert idempotence (spec.md §8 property 1) without a
    /// full graph rebuild on every re-ingest. Returns `true` if this was a
    /// new document.
    fn upsert(&mut self, document: &Document, vector: Vec<f32>) -> bool {
        if self.doc_id_to_row.contains_key(&document.doc_id) {
            return false;
        }
        let row_idx = self.rows.len();
        let vector_static: &'static [f32] = Box::leak(vector.into_boxed_slice());
        self.hnsw.insert((vector_static, row_idx));
        self.rows.push(Row {
            doc_id: document.doc_id.clone(),
            text: document.text.clone(),
            metadata: document.metadata.clone(),
        });
        self.doc_id_to_row.insert(document.doc_id.clone(), row_idx);
        true
    }

    fn len(&self) -> usize {
        self.rows.len()
    }

    fn search(&self, query: &[f32], k: usize, ef: usize) -> Vec<(usize, f32)> {
        if self.rows.is_empty() || k == 0 {
            return Vec::new();
        }
        self.hnsw
            .search(query, k, ef)
            .into_iter()
            .map(|n| (n.d_id, n.distance))
            .collect()
    }
}

/// Owns every collection's HNSW graph. `skip_collections` are never
/// opened, matching the `Degraded` startup behavior (spec.md §4.4).
pub struct VectorWorker {
    collections: HashMap<Collection, CollectionIndex>,
    skip: Vec<Collection>,
    embedder: Box<dyn Embedder>,
    data_dir: Option<PathBuf>,
}

impl VectorWorker {
    /// In-memory only: no graph is ever dumped to or reloaded from disk.
    /// Used by the worker's own unit tests, which have no interest in
    /// surviving a restart.
    pub fn new(skip: Vec<Collection>, embedder: Box<dyn Embedder>) -> Self {
        Self {
            collections: HashMap::new(),
            skip,
            embedder,
            data_dir: None,
        }
    }

    /// Reloads every usable collection's graph from `data_dir` if a prior
    /// dump exists there, then persists new dumps there after every
    /// subsequent `index` commit. This is what the worker binary actually
    /// constructs, so that a crash-and-restart (or any other process
    /// restart) picks back up from the last committed state instead of
    /// starting the vector partition over empty.
    pub fn open(data_dir: PathBuf, skip: Vec<Collection>, embedder: Box<dyn Embedder>) -> Self {
        let _ = std::fs::create_dir_all(&data_dir);
        let mut collections = HashMap::new();
        for collection in [Collection::Alpha, Collection::Beta] {
            if skip.contains(&collection) {
                continue;
            }
            if let Some(loaded) = CollectionIndex::load(&data_dir, collection) {
                collections.insert(collection, loaded);
            }
        }
        Self {
            collections,
            skip,
            embedder,
            data_dir: Some(data_dir),
        }
    }

    pub fn usable_collections(&self) -> Vec<Collection> {
        [Collection::Alpha, Collection::Beta]
            .into_iter()
            .filter(|c| !self.skip.contains(c))
            .collect()
    }

    pub fn skipped_collections(&self) -> Vec<Collection> {
        self.skip.clone()
    }

    /// Handles an `index` RPC: embeds and upserts every document into its
    /// collection's graph, then dumps the graph back to disk if this
    /// worker was opened with a `data_dir` (spec.md §1's persisted vector
    /// index, not an in-memory-only one). Returns the number of newly
    /// inserted documents.
    pub fn handle_index(&mut self, collection: Collection, documents: &[Document]) -> Result<usize, String> {
        if self.skip.contains(&collection) {
            return Err(format!("collection {collection} is skipped on this worker"));
        }
        // Embed before touching `self.collections` mutably: `self.embedder`
        // and `self.collections` are disjoint fields, but a method call
        // through `&mut self` can't see that, so the embed pass is done
        // up front against the `&self.embedder` borrow alone.
        let vectors: Vec<Vec<f32>> = documents.iter().map(|d| self.embedder.embed(&d.text)).collect();

        let dimension = self.embedder.dimension();
        let idx = self
            .collections
            .entry(collection)
            .or_insert_with(|| CollectionIndex::new(dimension));
        let mut inserted = 0;
        for (doc, vector) in documents.iter().zip(vectors) {
            if idx.upsert(doc, vector) {
                inserted += 1;
            }
        }

        if let Some(data_dir) = &self.data_dir {
            if let Err(e) = idx.save(data_dir, collection) {
                warn!(%collection, error = %e, "failed to persist vector index after commit");
            }
        }

        Ok(inserted)
    }

    /// Handles a `query` RPC: embeds the query text once, runs ANN search
    /// against every requested, usable collection, and unions the results
    /// sorted by ascending distance (spec.md §4.4's query shape exactly).
    pub fn handle_query(
        &self,
        query_text: &str,
        n_results: usize,
        collections: &[Collection],
        project_filter: Option<&str>,
    ) -> (Vec<VectorHit>, usize) {
        let query_vector = self.embedder.embed(query_text);
        let mut hits = Vec::new();
        for &collection in collections {
            if self.skip.contains(&collection) {
                continue;
            }
            let Some(idx) = self.collections.get(&collection) else {
                continue;
            };
            for (row_idx, distance) in idx.search(&query_vector, n_results, DEFAULT_EF_SEARCH) {
                let row = &idx.rows[row_idx];
                if let Some(filter) = project_filter {
                    if row.metadata.project != filter {
                        continue;
                    }
                }
                hits.push(VectorHit {
                    id: row.doc_id.clone(),
                    document: row.text.clone(),
                    metadata: row.metadata.clone(),
                    distance,
                    collection,
                });
            }
        }
        hits.sort_by(|a, b| a.distance.partial_cmp(&b.distance).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(n_results);
        let total = hits.len();
        (hits, total)
    }

    pub fn collection_len(&self, collection: Collection) -> usize {
        self.collections.get(&collection).map(CollectionIndex::len).unwrap_or(0)
    }
}

/// True if no rows sidecar exists yet for `collection` under `data_dir`, or
/// it exists but is empty. Reads a local file rather than calling into a
/// running worker process, so the orchestrator can use it in its self-heal
/// check without reintroducing an RPC into a count path (spec.md §8
/// property 7 keeps counting out of the worker's request loop entirely).
pub fn collection_is_empty_on_disk(data_dir: &Path, collection: Collection) -> bool {
    let path = CollectionIndex::rows_path(data_dir, collection);
    match std::fs::read(&path) {
        Ok(raw) => serde_json::from_slice::<Vec<Row>>(&raw)
            .map(|rows| rows.is_empty())
            .unwrap_or(true),
        Err(_) => true,
    }
}

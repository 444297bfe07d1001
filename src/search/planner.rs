//! Hybrid query planner: fuses the lexical and vector result streams by
//! rank-union, not score-blend, since Tantivy's BM25-derived distance and
//! the vector backend's ANN distance are incommensurable scales.
//!
//! Grounded on `examples/original_source/daemon/knowledge_db_dual.py`'s
//! `query_unified`/`_merge_results` for the fusion order and dedup-by-id,
//! and on `examples/rawwerks.../src/search/two_tier_search.rs` for the
//! Rust module shape (the fusion here is rank-union, not that module's
//! score-blend, per spec.md §4.5's explicit rationale).

use std::cmp::Ordering;
use std::collections::HashSet;

use tracing::warn;

use crate::error::PlannerError;
use crate::lexical::LexicalIndex;
use crate::model::{Collection, DocumentMetadata};
use crate::vector::VectorSupervisor;

/// Which backend(s) actually contributed to a unified result set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchType {
    Fts,
    Vector,
    Hybrid,
}

impl SearchType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchType::Fts => "fts",
            SearchType::Vector => "vector",
            SearchType::Hybrid => "hybrid",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResultItem {
    pub doc_id: String,
    pub text: String,
    pub metadata: DocumentMetadata,
    pub distance: f32,
    pub collection: Collection,
}

#[derive(Debug, Clone)]
pub struct UnifiedResult {
    pub items: Vec<ResultItem>,
    pub search_type: SearchType,
}

/// Over-fetch multiplier applied to `n_results` before fusing lexical and
/// vector result streams: widening the lexical candidate pool improves
/// recall of the final, truncated union since dedup can only shrink it.
/// This is the documented default — `Config::lexical_overfetch_multiplier`
/// is the REDESIGN FLAGS parameterization of this constant.
pub const LEXICAL_OVERFETCH_MULTIPLIER: usize = 5;

/// Fuses one collection pair's lexical writers with an optional vector
/// backend. Holds borrows rather than owning its inputs — the caller
/// (the top-level service type) owns the indices and the supervisor for
/// the process lifetime.
pub struct QueryPlanner<'a> {
    alpha: &'a LexicalIndex,
    beta: &'a LexicalIndex,
    vector: Option<&'a VectorSupervisor>,
    overfetch_multiplier: usize,
}

impl<'a> QueryPlanner<'a> {
    pub fn new(
        alpha: &'a LexicalIndex,
        beta: &'a LexicalIndex,
        vector: Option<&'a VectorSupervisor>,
        overfetch_multiplier: usize,
    ) -> Self {
        Self { alpha, beta, vector, overfetch_multiplier }
    }

    fn lexical_for(&self, collection: Collection) -> &LexicalIndex {
        match collection {
            Collection::Alpha => self.alpha,
            Collection::Beta => self.beta,
        }
    }

    /// Runs the hybrid query: over-fetches from the lexical index(es) in
    /// `collections`, queries the vector backend if one is wired in,
    /// unions the two streams by `doc_id` (lexical hits first, so a
    /// document both backends surface keeps its lexical-ranked distance),
    /// then truncates to `n_results`.
    ///
    /// Both backends failing yields [`PlannerError::NoBackend`]. A vector
    /// failure alone degrades silently to `SearchType::Fts`; lexical
    /// failing alone (the in-process index erroring, not merely returning
    /// zero hits) degrades to `SearchType::Vector`.
    pub fn query_unified(
        &self,
        query_text: &str,
        n_results: usize,
        collections: &[Collection],
        project_filter: Option<&str>,
    ) -> Result<UnifiedResult, PlannerError> {
        if query_text.trim().is_empty() {
            return Err(PlannerError::EmptyQuery);
        }
        if collections.is_empty() {
            return Err(PlannerError::UnknownCollection(
                "no collections specified".to_string(),
            ));
        }

        let overfetch = n_results.saturating_mul(self.overfetch_multiplier).max(n_results);

        let mut lexical_items: Vec<ResultItem> = Vec::new();
        let mut lexical_ok = false;
        for &collection in collections {
            match self.lexical_for(collection).search(query_text, overfetch) {
                Ok(hits) => {
                    lexical_ok = true;
                    for hit in hits {
                        if let Some(filter) = project_filter {
                            if hit.metadata.project != filter {
                                continue;
                            }
                        }
                        lexical_items.push(ResultItem {
                            doc_id: hit.doc_id,
                            text: hit.text,
                            metadata: hit.metadata,
                            distance: hit.distance,
                            collection,
                        });
                    }
                }
                Err(e) => warn!(error = %e, ?collection, "lexical search failed"),
            }
        }
        lexical_items.sort_by(|a, b| {
            a.distance.partial_cmp(&b.distance).unwrap_or(Ordering::Equal)
        });

        let mut vector_items: Vec<ResultItem> = Vec::new();
        let mut vector_ok = false;
        if let Some(supervisor) = self.vector {
            match supervisor.query(query_text, n_results, collections, project_filter) {
                Ok(result) => {
                    vector_ok = true;
                    for hit in result.results {
                        vector_items.push(ResultItem {
                            doc_id: hit.id,
                            text: hit.document,
                            metadata: hit.metadata,
                            distance: hit.distance,
                            collection: hit.collection,
                        });
                    }
                }
                Err(e) => warn!(error = %e, "vector search unavailable; degrading to lexical-only"),
            }
        }

        if !lexical_ok && !vector_ok {
            return Err(PlannerError::NoBackend(
                "neither the lexical index nor the vector backend could answer".to_string(),
            ));
        }

        let mut seen: HashSet<String> = HashSet::new();
        let mut fused: Vec<ResultItem> = Vec::new();
        for item in lexical_items.into_iter().chain(vector_items) {
            if seen.insert(item.doc_id.clone()) {
                fused.push(item);
            }
        }
        fused.truncate(n_results);

        let search_type = match (lexical_ok, vector_ok) {
            (true, true) => SearchType::Hybrid,
            (true, false) => SearchType::Fts,
            (false, true) => SearchType::Vector,
            (false, false) => unreachable!("checked above"),
        };

        Ok(UnifiedResult { items: fused, search_type })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Collection, Document, DocumentMetadata, MessageRole, SourceKind};
    use chrono::Utc;
    use tempfile::tempdir;

    fn doc(id: &str, text: &str, collection: Collection) -> Document {
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
            collection,
        }
    }

    #[test]
    fn fts_only_query_returns_lexical_hits_and_fts_search_type() {
        let alpha_dir = tempdir().unwrap();
        let beta_dir = tempdir().unwrap();
        let mut alpha = LexicalIndex::open_or_create(alpha_dir.path(), Collection::Alpha).unwrap();
        let beta = LexicalIndex::open_or_create(beta_dir.path(), Collection::Beta).unwrap();

        alpha.upsert(&doc("d1", "rust ownership and borrowing", Collection::Alpha)).unwrap();
        alpha.commit().unwrap();

        let planner = QueryPlanner::new(&alpha, &beta, None, LEXICAL_OVERFETCH_MULTIPLIER);
        let result = planner
            .query_unified("ownership", 10, &[Collection::Alpha], None)
            .unwrap();

        assert_eq!(result.search_type, SearchType::Fts);
        assert_eq!(result.items.len(), 1);
        assert_eq!(result.items[0].doc_id, "d1");
    }

    #[test]
    fn empty_query_text_is_rejected() {
        let alpha_dir = tempdir().unwrap();
        let beta_dir = tempdir().unwrap();
        let alpha = LexicalIndex::open_or_create(alpha_dir.path(), Collection::Alpha).unwrap();
        let beta = LexicalIndex::open_or_create(beta_dir.path(), Collection::Beta).unwrap();

        let planner = QueryPlanner::new(&alpha, &beta, None, LEXICAL_OVERFETCH_MULTIPLIER);
        let err = planner
            .query_unified("   ", 10, &[Collection::Alpha], None)
            .unwrap_err();
        assert!(matches!(err, PlannerError::EmptyQuery));
    }

    #[test]
    fn empty_collections_on_a_fresh_index_returns_ok_with_no_results() {
        let alpha_dir = tempdir().unwrap();
        let beta_dir = tempdir().unwrap();
        let alpha = LexicalIndex::open_or_create(alpha_dir.path(), Collection::Alpha).unwrap();
        let beta = LexicalIndex::open_or_create(beta_dir.path(), Collection::Beta).unwrap();

        let planner = QueryPlanner::new(&alpha, &beta, None, LEXICAL_OVERFETCH_MULTIPLIER);
        let result = planner
            .query_unified("anything", 10, &[Collection::Alpha, Collection::Beta], None)
            .unwrap();

        assert!(result.items.is_empty());
        assert_eq!(result.search_type, SearchType::Fts);
    }

    #[test]
    fn project_filter_excludes_non_matching_hits() {
        let alpha_dir = tempdir().unwrap();
        let beta_dir = tempdir().unwrap();
        let mut alpha = LexicalIndex::open_or_create(alpha_dir.path(), Collection::Alpha).unwrap();
        let beta = LexicalIndex::open_or_create(beta_dir.path(), Collection::Beta).unwrap();

        let mut other_project = doc("d1", "deploy kubernetes cluster", Collection::Alpha);
        other_project.metadata.project = "other".to_string();
        alpha.upsert(&other_project).unwrap();
        alpha.commit().unwrap();

        let planner = QueryPlanner::new(&alpha, &beta, None, LEXICAL_OVERFETCH_MULTIPLIER);
        let result = planner
            .query_unified("kubernetes", 10, &[Collection::Alpha], Some("proj"))
            .unwrap();

        assert!(result.items.is_empty());
    }
}

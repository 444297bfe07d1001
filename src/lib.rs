//! Hybrid lexical + vector search and incremental indexing over chat
//! transcripts.
//!
//! The top-level [`Core`] type wires together the two lexical indices,
//! the vector backend supervisor, and the indexing orchestrator behind a
//! single handle a caller constructs once per process and holds for its
//! lifetime (spec.md §9 "avoid global mutable handlers" — every
//! component here is value-typed and passed by reference, not a
//! `lazy_static`/`OnceCell` singleton).

pub mod config;
pub mod decoders;
pub mod error;
pub mod ingest;
pub mod lexical;
pub mod model;
pub mod orchestrator;
pub mod search;
pub mod vector;

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::warn;
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::lexical::LexicalIndex;
use crate::model::Collection;
use crate::orchestrator::{IngestStats, Orchestrator};
use crate::search::{QueryPlanner, UnifiedResult};
use crate::vector::{SupervisorConfig, VectorSupervisor};

/// Initializes the process-wide `tracing` subscriber from
/// `Config::log_filter`. Safe to call from a binary's `main`; a second
/// call anywhere else in the process is silently ignored rather than
/// panicking, since a library has no business assuming it owns the only
/// subscriber.
pub fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_new(&config.log_filter).unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

/// Per-collection document counts — the external Stats API surface from
/// spec.md §6.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CollectionStats {
    pub alpha_count: usize,
    pub beta_count: usize,
}

/// Owns both lexical indices and the vector backend supervisor for the
/// process lifetime. Constructed once via [`Core::open`]; ingest and
/// query both operate on this handle rather than re-opening any on-disk
/// state per call.
pub struct Core {
    config: Config,
    alpha: LexicalIndex,
    beta: LexicalIndex,
    vector: Option<Arc<VectorSupervisor>>,
}

impl Core {
    /// Opens (or creates) both lexical indices and spawns the vector
    /// worker supervisor. A vector worker that fails to start degrades
    /// the supervisor to `Dead` internally (spec.md §4.4 "MUST NOT fail
    /// the process") — `Core::open` itself only fails if a lexical index
    /// cannot be opened, since lexical is the backend every query and
    /// ingest path can always fall back to.
    pub fn open(config: Config) -> Result<Self> {
        let alpha = LexicalIndex::open_or_create(&config.lexical_dir(Collection::Alpha), Collection::Alpha)
            .context("opening alpha lexical index")?;
        let beta = LexicalIndex::open_or_create(&config.lexical_dir(Collection::Beta), Collection::Beta)
            .context("opening beta lexical index")?;

        let skip_collections: Vec<Collection> = config
            .worker_skip_collections
            .iter()
            .filter_map(|s| s.parse::<Collection>().ok())
            .collect();

        let supervisor_config = SupervisorConfig {
            worker_binary: None,
            worker_data_dir: config.vector_dir(),
            worker_skip_collections: skip_collections,
            ready_timeout: config.worker_ready_timeout,
            call_timeout: config.worker_call_timeout,
        };

        let vector = match VectorSupervisor::new(supervisor_config) {
            Ok(supervisor) => {
                supervisor.start();
                Some(Arc::new(supervisor))
            }
            Err(e) => {
                warn!(error = %e, "failed to construct vector supervisor; continuing lexical-only");
                None
            }
        };

        Ok(Self { config, alpha, beta, vector })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Runs one ingest cycle over the sources named in `Config`.
    pub fn run_once(&mut self) -> Result<IngestStats> {
        let vector = self.vector.as_deref();
        let mut orchestrator = Orchestrator::new(&self.config, &mut self.alpha, &mut self.beta, vector);
        orchestrator.run_once()
    }

    /// Runs a hybrid query across the given collections.
    pub fn query_unified(
        &self,
        query_text: &str,
        n_results: usize,
        collections: &[Collection],
        project_filter: Option<&str>,
    ) -> std::result::Result<UnifiedResult, error::PlannerError> {
        let vector = self.vector.as_deref();
        let planner = QueryPlanner::new(
            &self.alpha,
            &self.beta,
            vector,
            self.config.lexical_overfetch_multiplier,
        );
        planner.query_unified(query_text, n_results, collections, project_filter)
    }

    /// Document counts for both collections. Reads straight from each
    /// Tantivy searcher and never calls into the vector worker (spec.md
    /// §8 property 7), so this is cheap and always available even when
    /// the vector backend is `Dead`.
    pub fn get_collection_stats(&self) -> Result<CollectionStats> {
        Ok(CollectionStats {
            alpha_count: self.alpha.count()?,
            beta_count: self.beta.count()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::io::Write;
    use std::time::Duration;
    use tempfile::tempdir;

    fn test_config(persist: &std::path::Path, projects: &std::path::Path) -> Config {
        Config {
            persist_directory: persist.to_path_buf(),
            embedding_model_name: "hash-fnv-256".into(),
            projects_dir: Some(projects.to_path_buf()),
            exports_dir: None,
            project_filter: None,
            enable_enrichment: false,
            lexical_overfetch_multiplier: 5,
            // Bounded short so a vector worker that never handshakes (the
            // common case in a test binary, which has no sibling
            // `vector-worker` executable next to it) degrades to `Dead`
            // quickly rather than stalling.
            worker_ready_timeout: Duration::from_millis(200),
            worker_call_timeout: Duration::from_millis(200),
            worker_skip_collections: vec![],
            log_filter: "info".into(),
        }
    }

    fn write_session_log(dir: &std::path::Path) {
        let project_dir = dir.join("-home-user-code-demo");
        fs::create_dir_all(&project_dir).unwrap();
        let path = project_dir.join("session-1.jsonl");
        let mut f = fs::File::create(&path).unwrap();
        writeln!(
            f,
            r#"{{"type":"user","sessionId":"s1","timestamp":"2024-01-01T00:00:00Z","message":{{"content":"How do I configure rustfmt"}}}}"#
        )
        .unwrap();
        writeln!(
            f,
            r#"{{"type":"assistant","timestamp":"2024-01-01T00:00:05Z","message":{{"content":"Add a rustfmt.toml at the workspace root"}}}}"#
        )
        .unwrap();
    }

    #[test]
    fn ingest_then_query_round_trips_through_core() {
        let persist = tempdir().unwrap();
        let projects = tempdir().unwrap();
        write_session_log(projects.path());

        let mut core = Core::open(test_config(persist.path(), projects.path())).unwrap();
        let stats = core.run_once().unwrap();
        assert_eq!(stats.conversations, 1);

        let collection_stats = core.get_collection_stats().unwrap();
        assert_eq!(collection_stats.alpha_count, 2);
        assert_eq!(collection_stats.beta_count, 0);

        let result = core
            .query_unified("rustfmt", 10, &[Collection::Alpha], None)
            .unwrap();
        assert!(!result.items.is_empty());
    }

    #[test]
    fn query_on_a_fresh_core_returns_ok_with_no_results() {
        let persist = tempdir().unwrap();
        let projects = tempdir().unwrap();

        let core = Core::open(test_config(persist.path(), projects.path())).unwrap();
        let result = core
            .query_unified("anything", 10, &[Collection::Alpha, Collection::Beta], None)
            .unwrap();
        assert!(result.items.is_empty());
    }
}

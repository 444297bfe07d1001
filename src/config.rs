//! Environment-driven configuration, following the teacher's
//! `DaemonConfig::from_env` / `TwoTierConfig::from_env` idiom: every field
//! has a documented default and is overridable via `CASS_*`-style env vars,
//! loaded through `dotenvy` so a `.env` file works the same as a real
//! environment variable.

use std::path::PathBuf;
use std::time::Duration;

fn env_var(key: &str) -> Option<String> {
    dotenvy::var(key).ok()
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env_var(key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Process-wide configuration for the indexing orchestrator, the lexical
/// index, and the vector backend supervisor.
#[derive(Debug, Clone)]
pub struct Config {
    /// Root directory for all on-disk state (lexical indices, vector
    /// worker data, manifest/journal files).
    pub persist_directory: PathBuf,

    /// Opaque embedding model identifier forwarded to the vector worker.
    pub embedding_model_name: String,

    /// Root of agent session-log directories (e.g. `~/.claude/projects`).
    pub projects_dir: Option<PathBuf>,

    /// Directory containing web-export ZIP archives.
    pub exports_dir: Option<PathBuf>,

    /// Optional project-name filter applied during incremental ingest and
    /// query time.
    pub project_filter: Option<String>,

    /// Toggles the optional LLM enrichment step. Off by default: the
    /// enrichment client itself is out of scope for this crate.
    pub enable_enrichment: bool,

    /// Multiplier applied to `n_results` when over-fetching from the
    /// lexical index before rank-fusing with vector hits.
    pub lexical_overfetch_multiplier: usize,

    /// How long the supervisor waits for the vector worker's ready
    /// handshake before treating startup as failed.
    pub worker_ready_timeout: Duration,

    /// How long the supervisor waits for a single RPC response before
    /// treating the call as crashed.
    pub worker_call_timeout: Duration,

    /// Collections the vector worker should not attempt to open at
    /// startup (see DESIGN.md Open Question 2 — not hardcoded to any
    /// particular collection).
    pub worker_skip_collections: Vec<String>,

    /// `tracing_subscriber::EnvFilter` directive string.
    pub log_filter: String,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let _ = dotenvy::dotenv();

        let persist_directory = env_var("CASS_PERSIST_DIR")
            .map(PathBuf::from)
            .ok_or_else(|| anyhow::anyhow!("CASS_PERSIST_DIR must be set"))?;

        let worker_skip_collections = env_var("CASS_WORKER_SKIP_COLLECTIONS")
            .map(|v| {
                v.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            persist_directory,
            embedding_model_name: env_var("CASS_EMBEDDING_MODEL_NAME")
                .unwrap_or_else(|| "hash-fnv-256".to_string()),
            projects_dir: env_var("CASS_PROJECTS_DIR").map(PathBuf::from),
            exports_dir: env_var("CASS_EXPORTS_DIR").map(PathBuf::from),
            project_filter: env_var("CASS_PROJECT_FILTER"),
            enable_enrichment: env_parse("CASS_ENABLE_ENRICHMENT", false),
            lexical_overfetch_multiplier: env_parse("CASS_LEXICAL_OVERFETCH_MULTIPLIER", 5),
            worker_ready_timeout: Duration::from_secs(env_parse(
                "CASS_WORKER_READY_TIMEOUT_SECS",
                60,
            )),
            worker_call_timeout: Duration::from_secs(env_parse(
                "CASS_WORKER_CALL_TIMEOUT_SECS",
                30,
            )),
            worker_skip_collections,
            log_filter: env_var("CASS_LOG_FILTER").unwrap_or_else(|| "info".to_string()),
        })
    }

    /// Path to the lexical Tantivy index directory for a given collection.
    pub fn lexical_dir(&self, collection: crate::model::Collection) -> PathBuf {
        self.persist_directory
            .join("lexical")
            .join(collection.as_str())
    }

    pub fn vector_dir(&self) -> PathBuf {
        self.persist_directory.join("vector")
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.persist_directory.join("alpha_index_manifest.json")
    }

    pub fn journal_path(&self) -> PathBuf {
        self.persist_directory.join("beta_import_state.json")
    }
}

//! Indexing orchestrator: drives the three decoders, obeys the
//! manifest/journal skip disciplines (with the self-heal override, which
//! also fires when the vector backend's on-disk state has fallen behind
//! the lexical index), commits `(document, metadata, id)` triples to the
//! lexical index directly and to the vector backend best-effort, then
//! persists manifest/journal state.
//!
//! Grounded on `examples/original_source/daemon/indexer.py`'s
//! `ConversationIndexer` (`index_claude_projects_jsonl`,
//! `index_anthropic_export`, `index_memory_files`) for the per-source
//! control flow, and on the teacher's deleted `src/indexer/mod.rs` for the
//! Rust-shaped producer/consumer-over-`crossbeam_channel` streaming
//! pattern, adapted down to the three decoders this crate implements.

use std::path::{Path, PathBuf};

use anyhow::Result;
use crossbeam_channel::bounded;
use rayon::prelude::*;
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::config::Config;
use crate::decoders::{memory_file, session_log, web_export};
use crate::ingest::{journal, manifest};
use crate::lexical::LexicalIndex;
use crate::model::{Collection, Conversation, documents_for_conversation};
use crate::vector::VectorSupervisor;

/// Aggregate counters for one `run_once` cycle, surfaced to callers mostly
/// for logging and tests.
#[derive(Debug, Default, Clone)]
pub struct IngestStats {
    pub files_scanned: usize,
    pub files_committed: usize,
    pub files_skipped_unchanged: usize,
    pub files_failed: usize,
    pub conversations: usize,
    pub messages_indexed: usize,
    pub vector_warnings: usize,
}

enum DecodeEvent {
    Ok { path: PathBuf, mtime: f64, conversation: Conversation, messages: usize },
    Failed { path: PathBuf },
}

/// Drives one ingest cycle over the sources named in `Config`. Holds
/// exclusive `&mut` access to both collections' lexical writers — spec.md
/// §5's "single writer connection at a time" is upheld simply by there
/// being exactly one `Orchestrator` per process driving ingest.
pub struct Orchestrator<'a> {
    config: &'a Config,
    alpha: &'a mut LexicalIndex,
    beta: &'a mut LexicalIndex,
    vector: Option<&'a VectorSupervisor>,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        config: &'a Config,
        alpha: &'a mut LexicalIndex,
        beta: &'a mut LexicalIndex,
        vector: Option<&'a VectorSupervisor>,
    ) -> Self {
        Self { config, alpha, beta, vector }
    }

    /// Runs exactly one ingest cycle: session logs and memory files into
    /// Alpha, web-export archives into Beta. Retries are not attempted
    /// within a cycle (spec.md §4.6) — a failed file is logged and
    /// skipped; the next cycle re-evaluates it since the manifest was
    /// never updated for it.
    pub fn run_once(&mut self) -> Result<IngestStats> {
        let mut stats = IngestStats::default();

        if let Some(projects_dir) = self.config.projects_dir.clone() {
            let alpha_empty =
                self.alpha.count()? == 0 || self.vector_collection_diverged(Collection::Alpha);
            let manifest_path = self.config.manifest_path();
            let mut manifest = if alpha_empty {
                manifest::IngestManifest::default()
            } else {
                manifest::IngestManifest::load(&manifest_path)
            };

            self.ingest_session_logs(&projects_dir, &mut manifest, &manifest_path, &mut stats)?;
            self.ingest_memory_files(&projects_dir, &mut manifest, &manifest_path, &mut stats)?;
        }

        if let Some(exports_dir) = self.config.exports_dir.clone() {
            self.ingest_web_exports(&exports_dir, &mut stats)?;
        }

        info!(
            files_committed = stats.files_committed,
            files_skipped = stats.files_skipped_unchanged,
            files_failed = stats.files_failed,
            conversations = stats.conversations,
            "ingest cycle complete"
        );
        Ok(stats)
    }

    fn lexical_mut(&mut self, collection: Collection) -> &mut LexicalIndex {
        match collection {
            Collection::Alpha => self.alpha,
            Collection::Beta => self.beta,
        }
    }

    /// Upserts every document of `conversation` into its collection's
    /// lexical index (always) and, best-effort, into the vector backend
    /// via the supervisor. A vector failure is a warning, never a cycle
    /// failure (spec.md §4.6).
    fn commit_conversation(&mut self, conversation: &Conversation, stats: &mut IngestStats) -> Result<()> {
        let documents = documents_for_conversation(conversation);
        if documents.is_empty() {
            return Ok(());
        }
        let collection = documents[0].collection;

        let lexical = self.lexical_mut(collection);
        for document in &documents {
            lexical.upsert(document)?;
        }
        lexical.commit()?;

        if let Some(vector) = self.vector {
            if let Err(e) = vector.index(collection, &documents) {
                warn!(error = %e, conversation_id = %conversation.id, "vector upsert failed; lexical-only ingest for this conversation");
                stats.vector_warnings += 1;
            }
        }
        Ok(())
    }

    /// Scans `projects_dir` for `*.jsonl` session logs, decoding eligible
    /// files in parallel (rayon) while feeding a bounded channel that the
    /// caller's single lexical writer drains sequentially — a
    /// producer/consumer split so decode CPU work overlaps with the
    /// serialized commit path.
    fn ingest_session_logs(
        &mut self,
        projects_dir: &Path,
        manifest: &mut manifest::IngestManifest,
        manifest_path: &Path,
        stats: &mut IngestStats,
    ) -> Result<()> {
        let candidates: Vec<PathBuf> = WalkDir::new(projects_dir)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter(|e| e.path().extension().and_then(|s| s.to_str()) == Some("jsonl"))
            .map(|e| e.path().to_path_buf())
            .collect();

        let eligible: Vec<(PathBuf, f64)> = candidates
            .into_iter()
            .filter_map(|path| {
                stats.files_scanned += 1;
                let mtime = manifest::mtime_secs(&path).ok()?;
                if manifest.is_up_to_date(&path, mtime) {
                    None
                } else {
                    Some((path, mtime))
                }
            })
            .collect();
        stats.files_skipped_unchanged += stats.files_scanned - eligible.len();

        let (tx, rx) = bounded::<DecodeEvent>(64);
        std::thread::scope(|scope| {
            scope.spawn(|| {
                eligible.into_par_iter().for_each_with(tx, |tx, (path, mtime)| {
                    let event = match session_log::parse_session_log(&path) {
                        Ok((conversation, metrics)) => DecodeEvent::Ok {
                            path,
                            mtime,
                            conversation,
                            messages: metrics.total_messages,
                        },
                        Err(e) => {
                            warn!(path = %path.display(), error = %e, "session log decode failed");
                            DecodeEvent::Failed { path }
                        }
                    };
                    let _ = tx.send(event);
                });
            });

            for event in rx.iter() {
                match event {
                    DecodeEvent::Ok { path, mtime, conversation, messages } => {
                        if !self.project_matches(&conversation) {
                            manifest.record(&path, mtime);
                            continue;
                        }
                        match self.commit_conversation(&conversation, stats) {
                            Ok(()) => {
                                manifest.record(&path, mtime);
                                let _ = manifest.save(manifest_path);
                                stats.files_committed += 1;
                                stats.conversations += 1;
                                stats.messages_indexed += messages;
                            }
                            Err(e) => {
                                warn!(path = %path.display(), error = %e, "commit failed");
                                stats.files_failed += 1;
                            }
                        }
                    }
                    DecodeEvent::Failed { .. } => stats.files_failed += 1,
                }
            }
        });

        Ok(())
    }

    fn ingest_memory_files(
        &mut self,
        projects_dir: &Path,
        manifest: &mut manifest::IngestManifest,
        manifest_path: &Path,
        stats: &mut IngestStats,
    ) -> Result<()> {
        for path in memory_file::scan_memory_files(projects_dir) {
            stats.files_scanned += 1;
            let mtime = match manifest::mtime_secs(&path) {
                Ok(m) => m,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "stat failed");
                    stats.files_failed += 1;
                    continue;
                }
            };
            if manifest.is_up_to_date(&path, mtime) {
                stats.files_skipped_unchanged += 1;
                continue;
            }

            match memory_file::parse_memory_file(&path) {
                Ok(conversation) => {
                    if self.project_matches(&conversation) {
                        if let Err(e) = self.commit_conversation(&conversation, stats) {
                            warn!(path = %path.display(), error = %e, "commit failed");
                            stats.files_failed += 1;
                            continue;
                        }
                        stats.conversations += 1;
                        stats.messages_indexed += 1;
                    }
                    manifest.record(&path, mtime);
                    let _ = manifest.save(manifest_path);
                    stats.files_committed += 1;
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "memory file decode failed");
                    stats.files_failed += 1;
                }
            }
        }
        Ok(())
    }

    /// Scans `exports_dir` for `*.zip` web-export archives, applying the
    /// whole-archive hash journal skip discipline (with the self-heal
    /// override, re-checked before every archive since a commit changes
    /// the Beta count mid-loop).
    fn ingest_web_exports(&mut self, exports_dir: &Path, stats: &mut IngestStats) -> Result<()> {
        let journal_path = self.config.journal_path();
        let mut entry = journal::load(&journal_path);

        let archives: Vec<PathBuf> = WalkDir::new(exports_dir)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter(|e| e.path().extension().and_then(|s| s.to_str()) == Some("zip"))
            .map(|e| e.path().to_path_buf())
            .collect();

        for archive in archives {
            stats.files_scanned += 1;
            let beta_count = self.beta.count()?;
            let hash = match journal::content_hash(&archive) {
                Ok(h) => h,
                Err(e) => {
                    warn!(path = %archive.display(), error = %e, "hashing archive failed");
                    stats.files_failed += 1;
                    continue;
                }
            };
            if journal::should_skip(entry.as_ref(), &hash, beta_count)
                && !self.vector_collection_diverged(Collection::Beta)
            {
                stats.files_skipped_unchanged += 1;
                continue;
            }

            match web_export::parse_web_export(&archive) {
                Ok((conversations, metrics)) => {
                    for conversation in &conversations {
                        if !self.project_matches(conversation) {
                            continue;
                        }
                        self.commit_conversation(conversation, stats)?;
                    }
                    stats.conversations += conversations.len();
                    stats.messages_indexed += metrics.total_messages;
                    stats.files_committed += 1;

                    let new_entry = journal::ImportJournalEntry {
                        last_archive_name: archive
                            .file_name()
                            .map(|n| n.to_string_lossy().to_string())
                            .unwrap_or_default(),
                        content_hash: hash,
                        imported_at: chrono::Utc::now(),
                        conversations: conversations.len(),
                        messages: metrics.total_messages,
                    };
                    journal::save(&journal_path, &new_entry)?;
                    entry = Some(new_entry);
                }
                Err(e) => {
                    warn!(path = %archive.display(), error = %e, "web export decode failed");
                    stats.files_failed += 1;
                }
            }
        }
        Ok(())
    }

    fn project_matches(&self, conversation: &Conversation) -> bool {
        match &self.config.project_filter {
            None => true,
            Some(filter) => conversation.project.as_deref() == Some(filter.as_str()),
        }
    }

    /// True if the vector backend is configured to serve `collection` but
    /// has no documents persisted for it on disk — the case left behind
    /// when the vector backend was unavailable for an entire prior run (not
    /// just a single restart, which graph persistence already survives):
    /// the lexical count alone wouldn't catch this, since lexical ingest
    /// already succeeded and the manifest/journal consider the source
    /// files up to date. Reads the rows sidecar directly rather than
    /// calling the worker, matching spec.md §8 property 7's "no RPC in a
    /// count path" rule.
    fn vector_collection_diverged(&self, collection: Collection) -> bool {
        let Some(vector) = self.vector else {
            return false;
        };
        if !vector.usable_collections().contains(&collection) {
            return false;
        }
        crate::vector::worker::collection_is_empty_on_disk(&self.config.vector_dir(), collection)
    }
}

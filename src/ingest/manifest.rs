//! Ingest manifest: a flat `source_path -> mtime` map used to skip
//! unchanged files on repeat ingest cycles of the Alpha collection.
//!
//! Grounded on `original_source/daemon/indexer.py::_load_index_manifest`/
//! `_save_index_manifest`. There is no equivalent named abstraction in the
//! teacher's Rust tree — it tracks per-row state via `external_id` upserts
//! instead — so this is new code written in the teacher's plain-JSON-file
//! persistence idiom (see `search/tantivy.rs`'s own `meta.json` handling).

use std::collections::HashMap;
use std::path::Path;
use std::time::UNIX_EPOCH;

use anyhow::Result;
use tracing::warn;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct IngestManifest {
    entries: HashMap<String, f64>,
}

impl IngestManifest {
    /// Loads the manifest from `path`. A missing or corrupt file is
    /// treated as an empty manifest rather than an error (§5: "readers
    /// tolerate absence and corruption").
    pub fn load(path: &Path) -> Self {
        let Ok(raw) = std::fs::read_to_string(path) else {
            return Self::default();
        };
        match serde_json::from_str(&raw) {
            Ok(entries) => Self { entries },
            Err(e) => {
                warn!(path = %path.display(), error = %e, "ingest manifest corrupt, treating as empty");
                Self::default()
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let raw = serde_json::to_string_pretty(&self.entries)?;
        std::fs::write(path, raw)?;
        Ok(())
    }

    /// True if `source_path` has not changed since the last recorded
    /// mtime for it.
    pub fn is_up_to_date(&self, source_path: &Path, mtime: f64) -> bool {
        let key = source_path.to_string_lossy().to_string();
        matches!(self.entries.get(&key), Some(&recorded) if recorded >= mtime)
    }

    pub fn record(&mut self, source_path: &Path, mtime: f64) {
        self.entries
            .insert(source_path.to_string_lossy().to_string(), mtime);
    }
}

/// Returns the file's modification time as Unix seconds, matching the
/// float mtime the original manifest stores.
pub fn mtime_secs(path: &Path) -> Result<f64> {
    let modified = std::fs::metadata(path)?.modified()?;
    Ok(modified.duration_since(UNIX_EPOCH)?.as_secs_f64())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_manifest_is_empty() {
        let dir = tempdir().unwrap();
        let manifest = IngestManifest::load(&dir.path().join("missing.json"));
        assert!(!manifest.is_up_to_date(Path::new("/a"), 1.0));
    }

    #[test]
    fn corrupt_manifest_is_treated_as_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("manifest.json");
        std::fs::write(&path, "not json").unwrap();
        let manifest = IngestManifest::load(&path);
        assert!(!manifest.is_up_to_date(Path::new("/a"), 1.0));
    }

    #[test]
    fn round_trips_through_save_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("manifest.json");
        let mut manifest = IngestManifest::default();
        manifest.record(Path::new("/a/b.jsonl"), 100.0);
        manifest.save(&path).unwrap();

        let loaded = IngestManifest::load(&path);
        assert!(loaded.is_up_to_date(Path::new("/a/b.jsonl"), 100.0));
        assert!(loaded.is_up_to_date(Path::new("/a/b.jsonl"), 50.0));
        assert!(!loaded.is_up_to_date(Path::new("/a/b.jsonl"), 150.0));
        assert!(!loaded.is_up_to_date(Path::new("/other"), 1.0));
    }
}

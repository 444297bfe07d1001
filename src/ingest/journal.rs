//! Import-state journal: a single record tracking the most recently
//! imported web-export archive, used to skip a full re-import of the Beta
//! collection when the archive hasn't changed.
//!
//! Grounded on `original_source/daemon/indexer.py::index_anthropic_export`
//! (MD5 content hash, self-heal-on-empty-collection check, the exact
//! `{last_archive_name, content_hash, imported_at, conversations,
//! messages}` record shape named in spec.md §3).

use std::io::Read;
use std::path::Path;

use anyhow::Result;
use chrono::{DateTime, Utc};
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportJournalEntry {
    pub last_archive_name: String,
    pub content_hash: String,
    pub imported_at: DateTime<Utc>,
    pub conversations: usize,
    pub messages: usize,
}

/// Loads the journal entry from `path`. Missing or corrupt is `None`,
/// treated the same as "never imported" by the caller.
pub fn load(path: &Path) -> Option<ImportJournalEntry> {
    let raw = std::fs::read_to_string(path).ok()?;
    match serde_json::from_str(&raw) {
        Ok(entry) => Some(entry),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "import journal corrupt, treating as absent");
            None
        }
    }
}

pub fn save(path: &Path, entry: &ImportJournalEntry) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let raw = serde_json::to_string_pretty(entry)?;
    std::fs::write(path, raw)?;
    Ok(())
}

/// Hex-encoded MD5 of the archive's bytes, matching the original's
/// whole-file content hash used to detect a replaced archive even when
/// the filename is unchanged.
pub fn content_hash(archive_path: &Path) -> Result<String> {
    let mut file = std::fs::File::open(archive_path)?;
    let mut hasher = Md5::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// True if `archive_path` matches the journal's recorded hash AND the
/// Beta collection is already non-empty. The self-heal precondition: a
/// zero-count collection always forces reimport regardless of what the
/// journal says (spec.md §3 invariant, §8 property 4).
pub fn should_skip(
    entry: Option<&ImportJournalEntry>,
    archive_hash: &str,
    beta_collection_count: usize,
) -> bool {
    if beta_collection_count == 0 {
        return false;
    }
    matches!(entry, Some(e) if e.content_hash == archive_hash)
}

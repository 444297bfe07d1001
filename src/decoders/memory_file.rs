//! Decoder for memory markdown files living at `<projects_dir>/<project>/
//! memory/*.md`: each file becomes a single-message conversation.
//!
//! Grounded on `original_source/daemon/memory_parser.py`: conversation id
//! is a stable hash of the file path (`"memory-" + md5(path)[..12]`),
//! project name comes from the file's grandparent directory, and the
//! file's mtime stands in for a timestamp.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use md5::{Digest, Md5};

use super::common::decode_project_path;
use crate::model::{Conversation, Message, MessageRole, SourceKind};

pub fn memory_conversation_id(path: &Path) -> String {
    let digest = Md5::digest(path.to_string_lossy().as_bytes());
    format!("memory-{}", &hex::encode(digest)[..12])
}

fn file_mtime(path: &Path) -> Result<DateTime<Utc>> {
    let metadata = fs::metadata(path)?;
    let modified = metadata.modified()?;
    Ok(DateTime::<Utc>::from(modified))
}

pub fn parse_memory_file(path: &Path) -> Result<Conversation> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("reading memory file {}", path.display()))?;

    let project = path
        .parent() // memory/
        .and_then(|p| p.parent()) // <project>/
        .and_then(|p| p.file_name())
        .map(|n| decode_project_path(&n.to_string_lossy()));

    let timestamp = file_mtime(path).unwrap_or_else(|_| Utc::now());

    Ok(Conversation {
        id: memory_conversation_id(path),
        timestamp,
        messages: vec![Message {
            role: MessageRole::Assistant,
            content,
            timestamp,
        }],
        project,
        source: SourceKind::Memory,
        cwd: None,
        git_branch: None,
    })
}

/// Finds memory markdown files under `<projects_dir>/*/memory/*.md`,
/// matching `original_source/daemon/memory_parser.py::scan_memory_files`.
pub fn scan_memory_files(projects_dir: &Path) -> Vec<std::path::PathBuf> {
    let mut found = Vec::new();
    let Ok(project_dirs) = fs::read_dir(projects_dir) else {
        return found;
    };
    for project_entry in project_dirs.flatten() {
        let memory_dir = project_entry.path().join("memory");
        let Ok(files) = fs::read_dir(&memory_dir) else {
            continue;
        };
        for file_entry in files.flatten() {
            let path = file_entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("md") {
                found.push(path);
            }
        }
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn memory_conversation_id_is_stable() {
        let path = Path::new("/home/user/projects/foo/memory/notes.md");
        assert_eq!(memory_conversation_id(path), memory_conversation_id(path));
        assert!(memory_conversation_id(path).starts_with("memory-"));
        assert_eq!(memory_conversation_id(path).len(), "memory-".len() + 12);
    }

    #[test]
    fn parses_single_message_conversation_with_project_from_grandparent() {
        let dir = tempdir().unwrap();
        let memory_dir = dir.path().join("my-project").join("memory");
        fs::create_dir_all(&memory_dir).unwrap();
        let file_path = memory_dir.join("notes.md");
        fs::write(&file_path, "remember this").unwrap();

        let conv = parse_memory_file(&file_path).unwrap();
        assert_eq!(conv.messages.len(), 1);
        assert_eq!(conv.messages[0].content, "remember this");
        assert_eq!(conv.project.as_deref(), Some("my-project"));
        assert_eq!(conv.source, SourceKind::Memory);
    }

    #[test]
    fn scan_finds_markdown_files_under_memory_subdirs() {
        let dir = tempdir().unwrap();
        let memory_dir = dir.path().join("proj").join("memory");
        fs::create_dir_all(&memory_dir).unwrap();
        fs::write(memory_dir.join("a.md"), "x").unwrap();
        fs::write(memory_dir.join("b.txt"), "y").unwrap();

        let found = scan_memory_files(dir.path());
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].file_name().unwrap(), "a.md");
    }
}

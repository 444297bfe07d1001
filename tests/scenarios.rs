//! End-to-end scenarios over the public [`transcript_hybrid_search::Core`]
//! API: ingest from real decoder input, then query, across both
//! collections and both backends.

use std::fs;
use std::io::Write;
use std::time::Duration;

use tempfile::tempdir;
use transcript_hybrid_search::config::Config;
use transcript_hybrid_search::model::Collection;
use transcript_hybrid_search::Core;

fn test_config(persist: &std::path::Path, projects: Option<&std::path::Path>, exports: Option<&std::path::Path>) -> Config {
    Config {
        persist_directory: persist.to_path_buf(),
        embedding_model_name: "hash-fnv-256".into(),
        projects_dir: projects.map(|p| p.to_path_buf()),
        exports_dir: exports.map(|p| p.to_path_buf()),
        project_filter: None,
        enable_enrichment: false,
        lexical_overfetch_multiplier: 5,
        worker_ready_timeout: Duration::from_millis(200),
        worker_call_timeout: Duration::from_millis(200),
        worker_skip_collections: vec![],
        log_filter: "warn".into(),
    }
}

fn write_session_log(projects_dir: &std::path::Path, project_dirname: &str, file_name: &str, lines: &[&str]) {
    let project_dir = projects_dir.join(project_dirname);
    fs::create_dir_all(&project_dir).unwrap();
    let path = project_dir.join(file_name);
    let mut f = fs::File::create(&path).unwrap();
    for line in lines {
        writeln!(f, "{line}").unwrap();
    }
}

fn write_web_export(exports_dir: &std::path::Path, file_name: &str, conversations_json: &serde_json::Value) {
    use zip::write::{FileOptions, ZipWriter};
    fs::create_dir_all(exports_dir).unwrap();
    let path = exports_dir.join(file_name);
    let file = fs::File::create(&path).unwrap();
    let mut zw = ZipWriter::new(file);
    zw.start_file::<_, ()>("conversations.json", FileOptions::default()).unwrap();
    zw.write_all(conversations_json.to_string().as_bytes()).unwrap();
    zw.finish().unwrap();
}

/// S1: a fresh session log is ingested, its messages become queryable,
/// and document identity is stable.
#[test]
fn s1_ingest_session_log_then_query() {
    let persist = tempdir().unwrap();
    let projects = tempdir().unwrap();
    write_session_log(
        projects.path(),
        "-home-user-code-widgets",
        "session-a.jsonl",
        &[
            r#"{"type":"user","sessionId":"sess-a","timestamp":"2024-02-01T10:00:00Z","message":{"content":"How should I structure the widget factory module"}}"#,
            r#"{"type":"assistant","timestamp":"2024-02-01T10:00:05Z","message":{"content":"Split it into a trait plus per-kind implementations"}}"#,
        ],
    );

    let mut core = Core::open(test_config(persist.path(), Some(projects.path()), None)).unwrap();
    let stats = core.run_once().unwrap();
    assert_eq!(stats.conversations, 1);
    assert_eq!(stats.messages_indexed, 2);

    let result = core
        .query_unified("widget factory", 10, &[Collection::Alpha], None)
        .unwrap();
    assert_eq!(result.items.len(), 1);
    assert!(result.items[0].text.contains("widget factory"));
}

/// S2: re-ingesting an unchanged directory does not reprocess the file or
/// grow the collection (manifest mtime skip discipline).
#[test]
fn s2_reingest_of_unchanged_tree_is_a_no_op() {
    let persist = tempdir().unwrap();
    let projects = tempdir().unwrap();
    write_session_log(
        projects.path(),
        "-home-user-code-widgets",
        "session-a.jsonl",
        &[
            r#"{"type":"user","sessionId":"sess-a","timestamp":"2024-02-01T10:00:00Z","message":{"content":"hello"}}"#,
            r#"{"type":"assistant","timestamp":"2024-02-01T10:00:05Z","message":{"content":"hi there"}}"#,
        ],
    );

    let mut core = Core::open(test_config(persist.path(), Some(projects.path()), None)).unwrap();
    core.run_once().unwrap();
    let second = core.run_once().unwrap();

    assert_eq!(second.files_committed, 0);
    assert_eq!(second.files_skipped_unchanged, 1);
    let stats = core.get_collection_stats().unwrap();
    assert_eq!(stats.alpha_count, 2);
}

/// S3 (web-export self-heal): if the Beta collection is wiped out from
/// under an up-to-date journal, the next cycle reimports anyway.
#[test]
fn s3_self_heals_beta_after_collection_is_emptied() {
    let persist = tempdir().unwrap();
    let exports = tempdir().unwrap();
    let conversations = serde_json::json!([
        {
            "uuid": "conv-1",
            "chat_messages": [
                {"uuid": "m1", "sender": "human", "text": "what's the deploy process", "created_at": "2024-03-01T00:00:00Z"},
                {"uuid": "m2", "sender": "assistant", "text": "push to main, CI ships it", "created_at": "2024-03-01T00:00:05Z"}
            ]
        }
    ]);
    write_web_export(exports.path(), "export-1.zip", &conversations);

    let config = test_config(persist.path(), None, Some(exports.path()));
    {
        let mut core = Core::open(config.clone()).unwrap();
        core.run_once().unwrap();
        assert_eq!(core.get_collection_stats().unwrap().beta_count, 2);
    }

    std::fs::remove_dir_all(config.lexical_dir(Collection::Beta)).unwrap();

    let mut core = Core::open(config).unwrap();
    let stats = core.run_once().unwrap();
    assert_eq!(stats.files_skipped_unchanged, 0, "self-heal must force reimport despite the journal");
    assert_eq!(core.get_collection_stats().unwrap().beta_count, 2);
}

/// S4: the vector backend being unavailable degrades queries to
/// lexical-only; stats remain available regardless.
#[test]
fn s4_query_degrades_to_fts_when_vector_backend_is_unavailable() {
    let persist = tempdir().unwrap();
    let projects = tempdir().unwrap();
    write_session_log(
        projects.path(),
        "-home-user-code-widgets",
        "session-a.jsonl",
        &[
            r#"{"type":"user","sessionId":"sess-a","timestamp":"2024-02-01T10:00:00Z","message":{"content":"explain the retry backoff policy"}}"#,
            r#"{"type":"assistant","timestamp":"2024-02-01T10:00:05Z","message":{"content":"exponential backoff with jitter"}}"#,
        ],
    );

    // This test binary has no sibling `vector-worker` executable next to
    // it, so the supervisor's handshake always fails within its short
    // deadline and the backend settles into `Dead` — exercising exactly
    // the degraded path spec.md §4.4 requires callers to tolerate.
    let mut core = Core::open(test_config(persist.path(), Some(projects.path()), None)).unwrap();
    core.run_once().unwrap();

    let result = core
        .query_unified("retry backoff", 10, &[Collection::Alpha], None)
        .unwrap();
    assert_eq!(result.search_type, transcript_hybrid_search::search::SearchType::Fts);
    assert!(!result.items.is_empty());

    let stats = core.get_collection_stats().unwrap();
    assert_eq!(stats.alpha_count, 2);
}

/// S5: query-syntax injection in the raw query text never raises and
/// never returns unrelated results.
#[test]
fn s5_query_syntax_injection_is_sanitized() {
    let persist = tempdir().unwrap();
    let projects = tempdir().unwrap();
    write_session_log(
        projects.path(),
        "-home-user-code-widgets",
        "session-a.jsonl",
        &[
            r#"{"type":"user","sessionId":"sess-a","timestamp":"2024-02-01T10:00:00Z","message":{"content":"deploy docker containers to staging"}}"#,
            r#"{"type":"assistant","timestamp":"2024-02-01T10:00:05Z","message":{"content":"use the staging compose file"}}"#,
        ],
    );

    let mut core = Core::open(test_config(persist.path(), Some(projects.path()), None)).unwrap();
    core.run_once().unwrap();

    let result = core
        .query_unified("type:system +weird* (foo)", 10, &[Collection::Alpha], None)
        .unwrap();
    assert!(result.items.is_empty());
}

/// S6: a query spanning both collections unions hits without duplicates
/// and ranks lexical-sourced distance first.
#[test]
fn s6_hybrid_query_spans_both_collections_without_duplicates() {
    let persist = tempdir().unwrap();
    let projects = tempdir().unwrap();
    let exports = tempdir().unwrap();

    write_session_log(
        projects.path(),
        "-home-user-code-widgets",
        "session-a.jsonl",
        &[
            r#"{"type":"user","sessionId":"sess-a","timestamp":"2024-02-01T10:00:00Z","message":{"content":"incident review process for outages"}}"#,
            r#"{"type":"assistant","timestamp":"2024-02-01T10:00:05Z","message":{"content":"write a postmortem within 48 hours"}}"#,
        ],
    );
    write_web_export(
        exports.path(),
        "export-1.zip",
        &serde_json::json!([
            {
                "uuid": "conv-2",
                "chat_messages": [
                    {"uuid": "m1", "sender": "human", "text": "incident review checklist", "created_at": "2024-03-01T00:00:00Z"},
                    {"uuid": "m2", "sender": "assistant", "text": "include timeline and action items", "created_at": "2024-03-01T00:00:05Z"}
                ]
            }
        ]),
    );

    let mut core = Core::open(test_config(persist.path(), Some(projects.path()), Some(exports.path()))).unwrap();
    core.run_once().unwrap();

    let result = core
        .query_unified("incident review", 10, &[Collection::Alpha, Collection::Beta], None)
        .unwrap();

    let mut seen = std::collections::HashSet::new();
    for item in &result.items {
        assert!(seen.insert(item.doc_id.clone()), "duplicate doc_id in unified result");
    }
    assert!(result.items.len() >= 2);
}

/// S7: a query against completely empty, freshly opened collections
/// succeeds with zero results rather than erroring.
#[test]
fn s7_query_on_empty_collections_is_ok_with_no_results() {
    let persist = tempdir().unwrap();
    let core = Core::open(test_config(persist.path(), None, None)).unwrap();

    let result = core
        .query_unified("anything at all", 10, &[Collection::Alpha, Collection::Beta], None)
        .unwrap();
    assert!(result.items.is_empty());
}

//! The vector worker child process: owns the HNSW index, isolating any
//! native-memory fault in the ANN library from the parent process that
//! the supervisor runs in.
//!
//! Grounded on `examples/original_source/daemon/chroma_worker.py`'s
//! request loop (read a line, dispatch, write a line) and ready
//! handshake.

use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use transcript_hybrid_search::model::Collection;
use transcript_hybrid_search::vector::protocol::{
    INIT_ID, IndexParams, IndexResult, QueryParams, QueryResult, ReadyResult, Request, Response,
};
use transcript_hybrid_search::vector::worker::{HashEmbedder, VectorWorker};

fn parse_skip_collections(raw: &str) -> Vec<Collection> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.parse::<Collection>().ok())
        .collect()
}

fn read_arg(args: &[String], flag: &str) -> Option<String> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .cloned()
}

fn handle_request(worker: &mut VectorWorker, request: Request) -> Response {
    let result = match request.method.as_str() {
        "ping" => Ok(serde_json::json!("pong")),
        "index" => serde_json::from_value::<IndexParams>(request.params)
            .map_err(|e| format!("invalid index params: {e}"))
            .and_then(|params| {
                worker
                    .handle_index(params.collection, &params.documents)
                    .map(|count| IndexResult { indexed: true, count })
            })
            .and_then(|r| serde_json::to_value(r).map_err(|e| e.to_string())),
        "query" => serde_json::from_value::<QueryParams>(request.params)
            .map_err(|e| format!("invalid query params: {e}"))
            .map(|params| {
                let (results, total_matches) = worker.handle_query(
                    &params.query_text,
                    params.n_results,
                    &params.collections,
                    params.project_filter.as_deref(),
                );
                QueryResult { results, total_matches }
            })
            .and_then(|r| serde_json::to_value(r).map_err(|e| e.to_string())),
        other => Err(format!("unknown method: {other}")),
    };

    match result {
        Ok(value) => Response { id: request.id, result: Some(value), error: None },
        Err(e) => Response { id: request.id, result: None, error: Some(e) },
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args: Vec<String> = std::env::args().collect();
    let skip_collections = read_arg(&args, "--skip-collections")
        .map(|v| parse_skip_collections(&v))
        .unwrap_or_default();
    let data_dir = read_arg(&args, "--data-dir").map(PathBuf::from);
    let mut worker = match data_dir {
        Some(dir) => VectorWorker::open(dir, skip_collections, Box::new(HashEmbedder::default_dimension())),
        None => VectorWorker::new(skip_collections, Box::new(HashEmbedder::default_dimension())),
    };

    let stdout = io::stdout();
    let mut out = stdout.lock();

    let ready = if worker.skipped_collections().is_empty() {
        ReadyResult::Simple("ready".to_string())
    } else {
        ReadyResult::WithSkips {
            status: "ready".to_string(),
            skipped_collections: worker.skipped_collections(),
        }
    };
    let ready_response = Response {
        id: INIT_ID.to_string(),
        result: Some(serde_json::to_value(ready)?),
        error: None,
    };
    writeln!(out, "{}", serde_json::to_string(&ready_response)?)?;
    out.flush()?;

    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let response = match serde_json::from_str::<Request>(&line) {
            Ok(request) => handle_request(&mut worker, request),
            Err(e) => Response {
                id: "unknown".to_string(),
                result: None,
                error: Some(format!("malformed request: {e}")),
            },
        };
        writeln!(out, "{}", serde_json::to_string(&response)?)?;
        out.flush()?;
    }

    Ok(())
}

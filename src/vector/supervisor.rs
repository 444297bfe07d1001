//! Process-isolation supervisor for the vector worker.
//!
//! Grounded on `examples/original_source/daemon/knowledge_db_dual.py::
//! ChromaWorkerClient` for the restart/retry/disable state machine and
//! exact 60s/30s timeouts, and on `examples/rawwerks.../src/daemon/
//! client.rs` for the Rust spawn/mutex/availability shape (the default
//! worker path resolves a sibling binary next to `current_exe()`, the way
//! `spawn_daemon` falls back to `current_exe()` when no explicit binary
//! path is configured). The wire protocol is newline-delimited JSON,
//! grounded on `chroma_worker.py` directly (not the teacher's own
//! MessagePack-over-UDS daemon protocol, which is a different component).

use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command as TokioCommand};
use tokio::time::timeout;
use tracing::{info, warn};

use crate::error::SupervisorError;
use crate::model::Collection;
use crate::vector::protocol::{
    INIT_ID, IndexParams, IndexResult, QueryParams, QueryResult, ReadyResult, Request, Response,
};

/// Lifecycle states from spec.md §4.4, backed by an `AtomicU8` so readers
/// never need to lock the child-process mutex just to check availability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AvailabilityState {
    Uninitialized,
    Ready,
    Degraded,
    Dead,
}

impl AvailabilityState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => AvailabilityState::Ready,
            2 => AvailabilityState::Degraded,
            3 => AvailabilityState::Dead,
            _ => AvailabilityState::Uninitialized,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            AvailabilityState::Uninitialized => 0,
            AvailabilityState::Ready => 1,
            AvailabilityState::Degraded => 2,
            AvailabilityState::Dead => 3,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Path to the worker binary. Defaults to the `vector-worker` binary
    /// installed alongside the current executable (same `cargo build`
    /// output directory), resolved via `current_exe().with_file_name`.
    pub worker_binary: Option<std::path::PathBuf>,
    pub worker_data_dir: std::path::PathBuf,
    pub worker_skip_collections: Vec<Collection>,
    pub ready_timeout: Duration,
    pub call_timeout: Duration,
}

struct ChildHandle {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

enum CallFailure {
    Crash(String),
    AppError(String),
}

/// Owns the worker child process and mediates every call to it. A
/// `parking_lot::Mutex` guards the `(stdin, stdout)` pair so calls are
/// strictly serialized, matching spec.md §5's "query handlers MUST NOT
/// hold any supervisor lock across the vector response read" — here the
/// mutex *is* what linearizes that read.
pub struct VectorSupervisor {
    config: SupervisorConfig,
    runtime: tokio::runtime::Runtime,
    handle: Mutex<Option<ChildHandle>>,
    state: AtomicU8,
    usable: Mutex<Vec<Collection>>,
    next_id: AtomicU64,
}

impl VectorSupervisor {
    pub fn new(config: SupervisorConfig) -> anyhow::Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        Ok(Self {
            config,
            runtime,
            handle: Mutex::new(None),
            state: AtomicU8::new(AvailabilityState::Uninitialized.as_u8()),
            usable: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        })
    }

    pub fn state(&self) -> AvailabilityState {
        AvailabilityState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn usable_collections(&self) -> Vec<Collection> {
        self.usable.lock().clone()
    }

    fn next_request_id(&self) -> String {
        format!("req-{}", self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    fn worker_binary(&self) -> anyhow::Result<std::path::PathBuf> {
        if let Some(path) = &self.config.worker_binary {
            return Ok(path.clone());
        }
        let current = std::env::current_exe()?;
        Ok(current.with_file_name(format!("vector-worker{}", std::env::consts::EXE_SUFFIX)))
    }

    /// Spawns the worker and waits for its ready handshake, up to
    /// `ready_timeout`. Startup failure (early exit, closed stdout, or
    /// timeout) sets the backend `Dead` but never propagates an error to
    /// the caller — spec.md §4.4: "MUST NOT fail the process."
    pub fn start(&self) {
        let mut guard = self.handle.lock();
        match self.spawn_and_handshake() {
            Ok((child_handle, ready)) => {
                let skipped = ready.skipped_collections();
                let usable: Vec<Collection> = [Collection::Alpha, Collection::Beta]
                    .into_iter()
                    .filter(|c| !skipped.contains(c))
                    .collect();
                let state = if skipped.is_empty() {
                    AvailabilityState::Ready
                } else {
                    AvailabilityState::Degraded
                };
                info!(?state, ?usable, "vector worker ready");
                *self.usable.lock() = usable;
                self.state.store(state.as_u8(), Ordering::SeqCst);
                *guard = Some(child_handle);
            }
            Err(e) => {
                warn!(error = %e, "vector worker failed to start; disabling vector backend");
                self.state.store(AvailabilityState::Dead.as_u8(), Ordering::SeqCst);
                *guard = None;
            }
        }
    }

    fn spawn_and_handshake(&self) -> anyhow::Result<(ChildHandle, ReadyResult)> {
        let binary = self.worker_binary()?;
        let skip_arg = self
            .config
            .worker_skip_collections
            .iter()
            .map(|c| c.as_str())
            .collect::<Vec<_>>()
            .join(",");

        self.runtime.block_on(async {
            let mut cmd = TokioCommand::new(&binary);
            cmd.arg("--data-dir")
                .arg(&self.config.worker_data_dir)
                .arg("--skip-collections")
                .arg(&skip_arg)
                .stdin(Stdio::piped())
                .stdout(Stdio::piped())
                .stderr(Stdio::inherit());
            let mut child = cmd.spawn()?;
            let stdin = child.stdin.take().expect("piped stdin");
            let stdout = child.stdout.take().expect("piped stdout");
            let mut reader = BufReader::new(stdout);

            let mut line = String::new();
            let read = timeout(self.config.ready_timeout, reader.read_line(&mut line)).await;
            let n = match read {
                Ok(Ok(n)) => n,
                Ok(Err(e)) => anyhow::bail!("reading worker ready handshake: {e}"),
                Err(_) => anyhow::bail!("worker did not become ready within deadline"),
            };
            if n == 0 {
                anyhow::bail!("worker closed stdout before becoming ready");
            }

            let response: Response = serde_json::from_str(line.trim())
                .map_err(|e| anyhow::anyhow!("malformed ready handshake: {e}"))?;
            if response.id != INIT_ID {
                anyhow::bail!("expected {INIT_ID} handshake, got {}", response.id);
            }
            let result = response
                .result
                .ok_or_else(|| anyhow::anyhow!("ready handshake carried no result"))?;
            let ready: ReadyResult = serde_json::from_value(result)?;

            Ok((
                ChildHandle {
                    child,
                    stdin,
                    stdout: reader,
                },
                ready,
            ))
        })
    }

    fn kill_locked(&self, guard: &mut Option<ChildHandle>) {
        if let Some(mut handle) = guard.take() {
            let _ = handle.child.start_kill();
        }
    }

    fn respawn_locked(&self, guard: &mut Option<ChildHandle>) -> anyhow::Result<()> {
        let (handle, ready) = self.spawn_and_handshake()?;
        let skipped = ready.skipped_collections();
        let usable: Vec<Collection> = [Collection::Alpha, Collection::Beta]
            .into_iter()
            .filter(|c| !skipped.contains(c))
            .collect();
        *self.usable.lock() = usable;
        *guard = Some(handle);
        Ok(())
    }

    /// One request/response round-trip, holding the mutex for its whole
    /// duration (spec.md §5: "the supervisor mutex already linearizes
    /// this").
    fn try_call(
        &self,
        guard: &mut Option<ChildHandle>,
        method: &str,
        params: &Value,
    ) -> Result<Value, CallFailure> {
        let handle = guard
            .as_mut()
            .ok_or_else(|| CallFailure::Crash("no worker process".to_string()))?;

        let request = Request {
            id: self.next_request_id(),
            method: method.to_string(),
            params: params.clone(),
        };
        let mut line = serde_json::to_string(&request)
            .map_err(|e| CallFailure::Crash(format!("encoding request: {e}")))?;
        line.push('\n');

        let call_timeout = self.config.call_timeout;
        self.runtime.block_on(async {
            if let Err(e) = timeout(call_timeout, handle.stdin.write_all(line.as_bytes())).await {
                return Err(CallFailure::Crash(format!("write timed out: {e}")));
            }
            if let Err(e) = timeout(call_timeout, handle.stdin.flush()).await {
                return Err(CallFailure::Crash(format!("flush timed out: {e}")));
            }

            let mut response_line = String::new();
            let read = timeout(call_timeout, handle.stdout.read_line(&mut response_line)).await;
            let n = match read {
                Ok(Ok(n)) => n,
                Ok(Err(e)) => return Err(CallFailure::Crash(format!("reading response: {e}"))),
                Err(_) => return Err(CallFailure::Crash("response timed out".to_string())),
            };
            if n == 0 {
                return Err(CallFailure::Crash("worker closed stdout".to_string()));
            }

            let response: Response = serde_json::from_str(response_line.trim())
                .map_err(|e| CallFailure::Crash(format!("malformed response: {e}")))?;
            if let Some(err) = response.error {
                return Err(CallFailure::AppError(err));
            }
            response
                .result
                .ok_or_else(|| CallFailure::Crash("response carried neither result nor error".to_string()))
        })
    }

    /// Dispatches one RPC. On a crash (timeout, disconnect, parse
    /// failure) the worker is killed, restarted once, and the call
    /// retried once; a second failure disables the backend permanently
    /// until the next process restart (spec.md §4.4 exactly). An
    /// application-level `{id, error}` response is returned directly —
    /// it is not a crash and does not trigger a restart.
    pub fn call(&self, method: &str, params: Value) -> Result<Value, SupervisorError> {
        if self.state() == AvailabilityState::Dead {
            return Err(SupervisorError::BackendUnavailable(
                "vector backend permanently disabled".to_string(),
            ));
        }

        let mut guard = self.handle.lock();
        match self.try_call(&mut guard, method, &params) {
            Ok(v) => Ok(v),
            Err(CallFailure::AppError(e)) => Err(SupervisorError::Protocol(e)),
            Err(CallFailure::Crash(reason)) => {
                warn!(error = %reason, method, "vector worker call failed, restarting once");
                self.kill_locked(&mut guard);
                if self.respawn_locked(&mut guard).is_err() {
                    self.state.store(AvailabilityState::Dead.as_u8(), Ordering::SeqCst);
                    return Err(SupervisorError::BackendUnavailable(
                        "vector worker failed to restart".to_string(),
                    ));
                }
                match self.try_call(&mut guard, method, &params) {
                    Ok(v) => Ok(v),
                    Err(CallFailure::AppError(e)) => Err(SupervisorError::Protocol(e)),
                    Err(CallFailure::Crash(reason)) => {
                        self.state.store(AvailabilityState::Dead.as_u8(), Ordering::SeqCst);
                        self.kill_locked(&mut guard);
                        Err(SupervisorError::BackendTransient(reason))
                    }
                }
            }
        }
    }

    pub fn ping(&self) -> Result<(), SupervisorError> {
        self.call("ping", serde_json::json!({}))?;
        Ok(())
    }

    pub fn index(&self, collection: Collection, documents: &[crate::model::Document]) -> Result<IndexResult, SupervisorError> {
        let params = IndexParams {
            collection,
            documents: documents.to_vec(),
        };
        let value = self.call("index", serde_json::to_value(params).unwrap())?;
        serde_json::from_value(value).map_err(|e| SupervisorError::Protocol(e.to_string()))
    }

    pub fn query(
        &self,
        query_text: &str,
        n_results: usize,
        collections: &[Collection],
        project_filter: Option<&str>,
    ) -> Result<QueryResult, SupervisorError> {
        let params = QueryParams {
            query_text: query_text.to_string(),
            n_results,
            collections: collections.to_vec(),
            project_filter: project_filter.map(str::to_string),
        };
        let value = self.call("query", serde_json::to_value(params).unwrap())?;
        serde_json::from_value(value).map_err(|e| SupervisorError::Protocol(e.to_string()))
    }
}

impl Drop for VectorSupervisor {
    fn drop(&mut self) {
        let mut guard = self.handle.lock();
        self.kill_locked(&mut guard);
    }
}

/// Convenience constructor matching the teacher's `Arc`-wrapped shared
/// handle idiom for components queried from multiple threads.
pub fn shared(config: SupervisorConfig) -> anyhow::Result<Arc<VectorSupervisor>> {
    Ok(Arc::new(VectorSupervisor::new(config)?))
}

//! Error types for the component boundaries a caller is expected to match on.
//!
//! Decode-time and persistence-time failures travel as `anyhow::Error` with
//! `.context(..)` chains instead — those are the "tell me what went wrong"
//! boundary, while the types here are the "decide what to do next" boundary.

use thiserror::Error;

/// Failure modes of a call through the [`crate::vector::VectorSupervisor`].
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// The worker process could not be started, or has been permanently
    /// disabled after exhausting its restart budget.
    #[error("vector backend unavailable: {0}")]
    BackendUnavailable(String),

    /// A single call failed (timeout, crash) but the supervisor may still
    /// recover on a subsequent call.
    #[error("vector backend call failed: {0}")]
    BackendTransient(String),

    #[error("vector backend returned malformed response: {0}")]
    Protocol(String),
}

/// Failure modes of [`crate::search::QueryPlanner::query_unified`].
#[derive(Debug, Error)]
pub enum PlannerError {
    #[error("query text must not be empty")]
    EmptyQuery,

    #[error("unknown collection: {0}")]
    UnknownCollection(String),

    /// Both the lexical index and the vector backend failed to answer.
    #[error("no search backend could answer the query: {0}")]
    NoBackend(String),
}

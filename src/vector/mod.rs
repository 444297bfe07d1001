//! The vector backend: a supervisor that owns a child worker process
//! hosting an HNSW index, isolating native-library crashes from the
//! parent, plus the worker-side logic shared with `src/bin/vector_worker.rs`.

pub mod protocol;
pub mod supervisor;
pub mod worker;

pub use protocol::{IndexParams, IndexResult, QueryParams, QueryResult, ReadyResult, Request, Response, VectorHit};
pub use supervisor::{AvailabilityState, SupervisorConfig, VectorSupervisor};
pub use worker::{Embedder, HashEmbedder, VectorWorker};

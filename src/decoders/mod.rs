//! Record decoders: turn raw inputs (JSONL session logs, web-export ZIPs,
//! memory markdown files) into normalized [`crate::model::Conversation`]s.

pub mod common;
pub mod memory_file;
pub mod session_log;
pub mod web_export;

pub use common::DecodeMetrics;

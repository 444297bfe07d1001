//! Search layer facade: the hybrid query planner that fuses the lexical
//! index (`crate::lexical`) with the vector backend (`crate::vector`).

pub mod planner;

pub use planner::{LEXICAL_OVERFETCH_MULTIPLIER, QueryPlanner, ResultItem, SearchType, UnifiedResult};

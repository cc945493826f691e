//! §3 "Physical graph data outlives a single query" / §4.7, §4.9: the
//! process-wide virtual graph catalog (`store`) and the per-query traversal
//! engine that reads from it (`matcher`).

pub mod matcher;
pub mod store;

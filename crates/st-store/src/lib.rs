//! # st-store
//!
//! Durable memoization for SampleTune trials: a DuckDB-backed result store
//! keyed by canonical configuration, and the seed-scoped directory layout
//! that holds it next to the training snapshot and the attempt archive.

pub mod layout;
pub mod result_store;

pub use layout::{ArchiveStats, SeedLayout, DEFAULT_CACHE_ROOT};
pub use result_store::{RecordHandle, ResultRecord, ResultStore};

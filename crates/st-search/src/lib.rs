//! # st-search
//!
//! The optimizer side of SampleTune: nested search-space definitions,
//! a random search strategy that never re-proposes an already-scored point,
//! and a search driver that warm-starts from replayed results, tracks
//! trials and the best result, and stops on the first fatal error.

mod search;
mod trial;

pub use search::{ParameterDef, ParameterKind, RandomSearch, SearchSpace, SearchStrategy};
pub use trial::{
    ObjectiveDirection, OptimizationConfig, OptimizationId, OptimizationState,
    OptimizationStatus, SearchDriver, Trial, TrialResult, TrialStatus,
};

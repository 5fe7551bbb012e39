use crate::config::{Configuration, MetricMap};
use crate::errors::StResult;

/// The evaluation contract a search driver calls for every proposed point.
///
/// Implementations must run to completion before returning; callers never
/// overlap two evaluations against the same objective.
pub trait Objective {
    /// Name of the metric the search optimizes (e.g. `pass@32`).
    fn metric_name(&self) -> &str;

    /// Score a configuration, returning at least [`Objective::metric_name`].
    fn evaluate(&mut self, config: &Configuration) -> StResult<MetricMap>;
}

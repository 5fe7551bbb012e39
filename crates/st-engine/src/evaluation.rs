//! Functional-correctness evaluator boundary and the k-value policy.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use st_types::{MetricMap, StResult};

/// Label under which the evaluator reports a pass@k score.
pub fn pass_at_label(k: usize) -> String {
    format!("pass@{k}")
}

/// k values requested from the evaluator for a target k.
///
/// Always 1 and the target. One auxiliary threshold is added: 100 when the
/// target exceeds 100, otherwise 10 when the target exceeds 10. The two
/// thresholds are mutually exclusive.
pub fn k_values(target: usize) -> Vec<usize> {
    let mut ks = vec![1];
    if target > 100 {
        ks.push(100);
    } else if target > 10 {
        ks.push(10);
    }
    ks.push(target);
    ks.dedup();
    ks
}

/// One generated completion for a benchmark task, as written to the
/// evaluator's sample file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleRecord {
    pub task_id: String,
    pub completion: String,
}

/// Everything the evaluator needs to score one repetition.
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationRequest {
    /// JSONL file of [`SampleRecord`]s.
    pub sample_file: PathBuf,
    pub k_values: Vec<usize>,
    pub n_workers: usize,
    /// Samples running longer than this are scored as failing.
    pub timeout: Duration,
    /// JSONL snapshot of the problems being scored.
    pub problem_file: PathBuf,
}

/// Scores plus the per-sample results file the evaluator wrote.
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationOutcome {
    /// `"pass@{k}"` → score, for every requested k.
    pub scores: MetricMap,
    pub results_file: PathBuf,
}

/// Runs completions against the reference tests.
///
/// Per-sample timeouts are handled inside the evaluator as failures and
/// never surface as errors; an `Err` means the evaluation itself broke.
pub trait CorrectnessEvaluator {
    fn evaluate(&mut self, request: &EvaluationRequest) -> StResult<EvaluationOutcome>;
}

/// Conventional results-file location next to a sample file.
pub fn results_path_for(sample_file: &std::path::Path) -> PathBuf {
    let mut name = sample_file.as_os_str().to_os_string();
    name.push("_results.jsonl");
    PathBuf::from(name)
}

//! Repetition statistics and the pass@k estimator.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use st_types::{MetricMap, StResult};

use crate::benchmark::read_jsonl;
use crate::evaluation::pass_at_label;

/// Mean and dispersion of one configuration's per-repetition scores.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreSummary {
    pub count: usize,
    pub mean: f64,
    /// Population standard deviation; exactly 0 for a single repetition.
    pub std_dev: f64,
}

impl ScoreSummary {
    pub fn from_scores(scores: &[f64]) -> Option<Self> {
        if scores.is_empty() {
            return None;
        }
        let n = scores.len() as f64;
        let mean = scores.iter().sum::<f64>() / n;
        let std_dev = if scores.len() == 1 {
            0.0
        } else {
            (scores.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / n).sqrt()
        };

        Some(Self {
            count: scores.len(),
            mean,
            std_dev,
        })
    }
}

/// Unbiased estimate of pass@k for a task with `n` samples, `c` of them correct.
pub fn estimate_pass_at_k(n: usize, c: usize, k: usize) -> f64 {
    if n.saturating_sub(c) < k {
        return 1.0;
    }
    // 1 - C(n-c, k) / C(n, k), as a running product to stay in range
    let failing_all: f64 = ((n - c + 1)..=n)
        .map(|i| 1.0 - k as f64 / i as f64)
        .product();
    1.0 - failing_all
}

/// One line of an evaluator results file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredSample {
    pub task_id: String,
    pub completion: String,
    #[serde(default)]
    pub result: String,
    pub passed: bool,
}

/// Recompute pass@k for an archived results file.
///
/// A k is only reported when every task has at least k samples.
pub fn summarize_results<P: AsRef<Path>>(path: P, ks: &[usize]) -> StResult<MetricMap> {
    let samples: Vec<ScoredSample> = read_jsonl(path)?;

    let mut per_task: BTreeMap<&str, (usize, usize)> = BTreeMap::new();
    for sample in &samples {
        let entry = per_task.entry(sample.task_id.as_str()).or_default();
        entry.0 += 1;
        if sample.passed {
            entry.1 += 1;
        }
    }

    let mut scores = MetricMap::new();
    if per_task.is_empty() {
        return Ok(scores);
    }

    for &k in ks {
        if per_task.values().all(|&(n, _)| n >= k) {
            let total: f64 = per_task
                .values()
                .map(|&(n, c)| estimate_pass_at_k(n, c, k))
                .sum();
            scores.insert(pass_at_label(k), total / per_task.len() as f64);
        }
    }

    Ok(scores)
}

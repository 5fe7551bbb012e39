//! SampleTune trial orchestration.
//!
//! Wraps a text-generation engine and a functional-correctness evaluator in
//! an idempotent objective: each distinct sampling configuration is generated,
//! scored over several repetitions and persisted once, with every repetition
//! checkpointed so interrupted work is never lost.

pub mod benchmark;
pub mod evaluation;
pub mod generation;
pub mod orchestrator;
pub mod scoring;
pub mod session;

pub use benchmark::{read_jsonl, write_jsonl, BenchmarkSplit, Problem};
pub use evaluation::{
    k_values, pass_at_label, results_path_for, CorrectnessEvaluator, EvaluationOutcome,
    EvaluationRequest, SampleRecord,
};
pub use generation::TextGenerator;
pub use orchestrator::{AttemptRecord, OrchestratorConfig, TrialDetail, TrialOrchestrator};
pub use scoring::{estimate_pass_at_k, summarize_results, ScoreSummary, ScoredSample};
pub use session::run_search;

//! Trial orchestration: turns an expensive, noisy generate-and-score pipeline
//! into an idempotent, resumable objective backed by the result store.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use st_store::{RecordHandle, ResultRecord, ResultStore, SeedLayout, DEFAULT_CACHE_ROOT};
use st_types::{
    config_error, Configuration, GenerationSettings, MetricMap, Objective, SamplingConfig,
    StResult, StoreError, TrialError,
};

use crate::benchmark::{write_jsonl, Problem};
use crate::evaluation::{
    k_values, pass_at_label, CorrectnessEvaluator, EvaluationRequest, SampleRecord,
};
use crate::generation::TextGenerator;
use crate::scoring::ScoreSummary;

/// Knobs of a tuning run. Defaults match a 24 GB accelerator searching
/// pass@32 over two repetitions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    pub seed: u64,
    pub cache_root: PathBuf,
    /// Target k: completions generated per problem and repetition.
    pub pass_at_k: usize,
    /// Prompts per generator call.
    pub batch_size: usize,
    /// Independent repetitions averaged per configuration.
    pub average_over: usize,
    pub max_new_tokens: usize,
    /// Evaluator worker pool size.
    pub n_workers: usize,
    /// Per-sample evaluator timeout, in seconds.
    pub sample_timeout_s: f64,
    /// Finish the missing repetitions of a partially stored configuration
    /// instead of returning its partial mean.
    pub resume_incomplete: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            cache_root: PathBuf::from(DEFAULT_CACHE_ROOT),
            pass_at_k: 32,
            batch_size: 32,
            average_over: 2,
            max_new_tokens: 512,
            n_workers: 4,
            sample_timeout_s: 3.0,
            resume_incomplete: false,
        }
    }
}

impl OrchestratorConfig {
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_cache_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.cache_root = root.into();
        self
    }

    pub fn with_pass_at_k(mut self, k: usize) -> Self {
        self.pass_at_k = k;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_average_over(mut self, repetitions: usize) -> Self {
        self.average_over = repetitions;
        self
    }

    pub fn with_resume_incomplete(mut self, resume: bool) -> Self {
        self.resume_incomplete = resume;
        self
    }

    pub fn metric_name(&self) -> String {
        pass_at_label(self.pass_at_k)
    }

    pub fn layout(&self) -> SeedLayout {
        SeedLayout::new(&self.cache_root, self.seed)
    }

    pub fn validate(&self) -> StResult<()> {
        if self.average_over == 0 {
            return Err(TrialError::NoRepetitions.into());
        }
        if self.pass_at_k == 0 {
            return Err(config_error!("pass_at_k must be at least 1"));
        }
        if self.batch_size == 0 {
            return Err(config_error!("batch_size must be at least 1"));
        }
        if !(self.sample_timeout_s.is_finite() && self.sample_timeout_s > 0.0) {
            return Err(config_error!(
                "sample timeout must be positive, got {}",
                self.sample_timeout_s
            ));
        }
        Ok(())
    }
}

/// Timings and scores of one repetition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptRecord {
    /// Every pass@k the evaluator reported.
    #[serde(flatten)]
    pub scores: MetricMap,
    pub text_generation_time: f64,
    pub answer_evaluation_time: f64,
}

/// Result payload persisted for a configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrialDetail {
    pub tries: Vec<AttemptRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score_average: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score_standard_deviation: Option<f64>,
    #[serde(default)]
    pub complete: bool,
}

impl TrialDetail {
    /// The optimized metric of every recorded repetition.
    pub fn metric_scores(&self, metric: &str) -> StResult<Vec<f64>> {
        self.tries
            .iter()
            .map(|t| {
                t.scores.get(metric).copied().ok_or_else(|| {
                    TrialError::MissingMetric {
                        metric: metric.to_string(),
                    }
                    .into()
                })
            })
            .collect()
    }

    fn to_value(&self) -> StResult<Value> {
        Ok(serde_json::to_value(self)?)
    }
}

/// Evaluates sampling configurations: generation + correctness scoring,
/// averaged over repetitions and memoized in the result store.
pub struct TrialOrchestrator<G, E> {
    config: OrchestratorConfig,
    metric_name: String,
    layout: SeedLayout,
    store: ResultStore,
    generator: G,
    evaluator: E,
    problems: Vec<Problem>,
}

impl<G: TextGenerator, E: CorrectnessEvaluator> TrialOrchestrator<G, E> {
    /// Build an orchestrator around an already-open store.
    ///
    /// Writes the problem snapshot the evaluator scores against.
    pub fn new(
        config: OrchestratorConfig,
        store: ResultStore,
        generator: G,
        evaluator: E,
        problems: Vec<Problem>,
    ) -> StResult<Self> {
        config.validate()?;
        if problems.is_empty() {
            return Err(TrialError::EmptyBenchmark.into());
        }

        let layout = config.layout();
        layout.ensure()?;
        write_jsonl(layout.training_problems_path(), &problems)?;

        info!(
            "Orchestrating {} over {} problems, {} repetitions (seed {})",
            config.metric_name(),
            problems.len(),
            config.average_over,
            config.seed
        );

        Ok(Self {
            metric_name: config.metric_name(),
            config,
            layout,
            store,
            generator,
            evaluator,
            problems,
        })
    }

    /// Open the seed's own store and build the orchestrator around it.
    pub fn open(
        config: OrchestratorConfig,
        generator: G,
        evaluator: E,
        problems: Vec<Problem>,
    ) -> StResult<Self> {
        let store = config.layout().open_store()?;
        Self::new(config, store, generator, evaluator, problems)
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn layout(&self) -> &SeedLayout {
        &self.layout
    }

    pub fn store(&self) -> &ResultStore {
        &self.store
    }

    /// Hand the store back, e.g. to close it explicitly.
    pub fn into_store(self) -> ResultStore {
        self.store
    }

    /// Score a configuration, reusing any stored result for it.
    pub fn evaluate_config(&mut self, config: &Configuration) -> StResult<MetricMap> {
        if let Some(value) = self.store.lookup(config)? {
            let record = self.stored_record(config)?;
            match self.resumable(record)? {
                Some((handle, detail)) => {
                    info!(
                        "Resuming {} at repetition {} of {}",
                        config,
                        detail.tries.len() + 1,
                        self.config.average_over
                    );
                    let sampling = SamplingConfig::decode(config)?;
                    return self.run_repetitions(config, &sampling, Some(handle), detail);
                }
                None => {
                    debug!("Cache hit for {}: {} = {}", config, self.metric_name, value);
                    return Ok(MetricMap::from([(self.metric_name.clone(), value)]));
                }
            }
        }

        let sampling = SamplingConfig::decode(config)?;
        info!("Evaluating {}", config);
        self.run_repetitions(config, &sampling, None, TrialDetail::default())
    }

    /// The record behind a cache hit, which must have been scored for the
    /// metric this orchestrator reports.
    fn stored_record(&self, config: &Configuration) -> StResult<ResultRecord> {
        let record = self
            .store
            .find(config)?
            .ok_or_else(|| StoreError::Corruption {
                message: format!("lookup hit for {config} but no record was found"),
            })?;

        if record.metric_name != self.metric_name {
            return Err(config_error!(
                "record {} for {} was scored as {} but this run reports {}",
                record.handle,
                config,
                record.metric_name,
                self.metric_name
            ));
        }
        Ok(record)
    }

    /// Stored handle and payload when an incomplete record should be finished.
    fn resumable(&self, record: ResultRecord) -> StResult<Option<(RecordHandle, TrialDetail)>> {
        if !self.config.resume_incomplete || record.complete {
            return Ok(None);
        }

        let detail: TrialDetail =
            serde_json::from_value(record.result).map_err(|e| StoreError::Corruption {
                message: format!("record {} has an unreadable payload: {e}", record.handle),
            })?;
        Ok(Some((record.handle, detail)))
    }

    fn run_repetitions(
        &mut self,
        config: &Configuration,
        sampling: &SamplingConfig,
        mut handle: Option<RecordHandle>,
        mut detail: TrialDetail,
    ) -> StResult<MetricMap> {
        let settings = sampling.generation_settings();
        let mut scores = detail.metric_scores(&self.metric_name)?;

        for repetition in (detail.tries.len() + 1)..=self.config.average_over {
            let attempt = self.run_repetition(&settings, repetition, handle)?;
            let score = attempt.score;
            scores.push(score);
            detail.tries.push(attempt.record);

            let running_mean = scores.iter().sum::<f64>() / scores.len() as f64;
            let payload = detail.to_value()?;
            let current = match handle {
                None => {
                    let h = self
                        .store
                        .insert(config, &payload, &self.metric_name, running_mean)?;
                    handle = Some(h);
                    h
                }
                Some(h) => {
                    self.store.update(h, &payload, running_mean)?;
                    h
                }
            };

            self.archive(attempt.results_file, current, repetition)?;
            info!(
                "Repetition {}/{}: {} = {} (running mean {})",
                repetition, self.config.average_over, self.metric_name, score, running_mean
            );
        }

        let handle = handle.ok_or(TrialError::NoRepetitions)?;
        let summary = ScoreSummary::from_scores(&scores).ok_or(TrialError::NoRepetitions)?;
        detail.score_average = Some(summary.mean);
        detail.score_standard_deviation = Some(summary.std_dev);
        detail.complete = true;
        self.store.complete(handle, &detail.to_value()?, summary.mean)?;

        info!(
            "Finished {}: {} = {} ± {} over {} repetitions",
            config, self.metric_name, summary.mean, summary.std_dev, summary.count
        );
        Ok(MetricMap::from([(self.metric_name.clone(), summary.mean)]))
    }

    /// Generate and score one full pass over the benchmark.
    fn run_repetition(
        &mut self,
        settings: &GenerationSettings,
        repetition: usize,
        handle: Option<RecordHandle>,
    ) -> StResult<Attempt> {
        let started = Instant::now();
        let samples = self.generate_samples(settings, repetition)?;
        let text_generation_time = started.elapsed().as_secs_f64();

        let sample_file = self.layout.scratch_samples_path();
        write_jsonl(&sample_file, &samples)?;

        let request = EvaluationRequest {
            sample_file,
            k_values: k_values(self.config.pass_at_k),
            n_workers: self.config.n_workers,
            timeout: Duration::from_secs_f64(self.config.sample_timeout_s),
            problem_file: self.layout.training_problems_path(),
        };

        let started = Instant::now();
        let outcome = self.evaluator.evaluate(&request);
        let answer_evaluation_time = started.elapsed().as_secs_f64();

        if let Err(e) = std::fs::remove_file(&request.sample_file) {
            warn!("Could not remove {}: {}", request.sample_file.display(), e);
        }
        let outcome = outcome?;

        let score = *outcome
            .scores
            .get(&self.metric_name)
            .ok_or_else(|| TrialError::MissingMetric {
                metric: self.metric_name.clone(),
            })?;

        debug!(
            "Repetition {} for record {:?} scored {:?}",
            repetition, handle, outcome.scores
        );

        Ok(Attempt {
            score,
            record: AttemptRecord {
                scores: outcome.scores,
                text_generation_time,
                answer_evaluation_time,
            },
            results_file: outcome.results_file,
        })
    }

    /// `pass_at_k` completions for every problem, in fixed-size batches.
    fn generate_samples(
        &mut self,
        settings: &GenerationSettings,
        repetition: usize,
    ) -> StResult<Vec<SampleRecord>> {
        let k = self.config.pass_at_k;
        let batch_size = self.config.batch_size;
        let batches = k.div_ceil(batch_size);
        let mut samples = Vec::with_capacity(self.problems.len() * k);

        for (i, problem) in self.problems.iter().enumerate() {
            info!(
                "Repetition {}: working on sample {} ({})",
                repetition, i, problem.task_id
            );
            let prompts = vec![problem.prompt.clone(); batch_size];
            let mut completions = Vec::with_capacity(batches * batch_size);

            for _ in 0..batches {
                self.generator.reset();
                let output =
                    self.generator
                        .generate(&prompts, settings, self.config.max_new_tokens)?;
                if output.len() != batch_size {
                    return Err(TrialError::ShortBatch {
                        expected: batch_size,
                        got: output.len(),
                    }
                    .into());
                }
                completions.extend(output);
            }

            samples.extend(completions.into_iter().take(k).map(|completion| SampleRecord {
                task_id: problem.task_id.clone(),
                completion,
            }));
        }

        Ok(samples)
    }

    fn archive(
        &self,
        results_file: PathBuf,
        handle: RecordHandle,
        repetition: usize,
    ) -> StResult<()> {
        if results_file.exists() {
            self.layout.archive_attempt(&results_file, handle, repetition)?;
        } else {
            warn!(
                "Evaluator results file {} is missing; nothing archived for {}-{}",
                results_file.display(),
                handle,
                repetition
            );
        }
        Ok(())
    }
}

impl<G: TextGenerator, E: CorrectnessEvaluator> Objective for TrialOrchestrator<G, E> {
    fn metric_name(&self) -> &str {
        &self.metric_name
    }

    fn evaluate(&mut self, config: &Configuration) -> StResult<MetricMap> {
        self.evaluate_config(config)
    }
}

struct Attempt {
    score: f64,
    record: AttemptRecord,
    results_file: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::benchmark::read_jsonl;
    use crate::evaluation::{results_path_for, EvaluationOutcome};
    use serde_json::json;
    use st_types::StError;
    use std::cell::RefCell;
    use std::rc::Rc;
    use tempfile::{tempdir, TempDir};

    #[derive(Default)]
    struct Calls {
        generate: usize,
        reset: usize,
        evaluate: usize,
        requests: Vec<EvaluationRequest>,
        sample_counts: Vec<usize>,
    }

    struct EchoGenerator {
        calls: Rc<RefCell<Calls>>,
        short_by: usize,
        out_of_memory: bool,
    }

    impl TextGenerator for EchoGenerator {
        fn reset(&mut self) {
            self.calls.borrow_mut().reset += 1;
        }

        fn generate(
            &mut self,
            prompts: &[String],
            settings: &GenerationSettings,
            _max_new_tokens: usize,
        ) -> StResult<Vec<String>> {
            self.calls.borrow_mut().generate += 1;
            if self.out_of_memory {
                return Err(TrialError::Generation {
                    message: format!("cannot fit {} sequences", prompts.len()),
                }
                .into());
            }
            let n = prompts.len() - self.short_by;
            Ok((0..n)
                .map(|i| format!("return {} # t={}", i, settings.temperature))
                .collect())
        }
    }

    /// Reports scripted scores, one per repetition, and writes a results file.
    /// Call number `fail_on` (1-based) breaks instead.
    struct ScriptedEvaluator {
        calls: Rc<RefCell<Calls>>,
        scores: Vec<f64>,
        fail_on: Option<usize>,
    }

    impl CorrectnessEvaluator for ScriptedEvaluator {
        fn evaluate(&mut self, request: &EvaluationRequest) -> StResult<EvaluationOutcome> {
            let samples: Vec<SampleRecord> = read_jsonl(&request.sample_file)?;
            let mut calls = self.calls.borrow_mut();
            let score = self.scores[calls.evaluate % self.scores.len()];
            calls.evaluate += 1;
            if self.fail_on == Some(calls.evaluate) {
                return Err(TrialError::Evaluation {
                    message: "worker pool died".to_string(),
                }
                .into());
            }
            calls.requests.push(request.clone());
            calls.sample_counts.push(samples.len());

            let results_file = results_path_for(&request.sample_file);
            std::fs::write(&results_file, "{}\n")?;

            let scores = request
                .k_values
                .iter()
                .map(|&k| (pass_at_label(k), score))
                .collect();
            Ok(EvaluationOutcome {
                scores,
                results_file,
            })
        }
    }

    fn problems(n: usize) -> Vec<Problem> {
        (0..n)
            .map(|i| Problem::new(format!("T/{i}"), format!("def f{i}():")))
            .collect()
    }

    fn sampling_config() -> Configuration {
        Configuration::new(json!({
            "temperature_or_top_p": {"temperature": 0.7},
            "mirostat_or_top_k": {"top_k": 40}
        }))
        .unwrap()
    }

    fn orchestrator(
        dir: &TempDir,
        config: OrchestratorConfig,
        scores: Vec<f64>,
    ) -> (
        TrialOrchestrator<EchoGenerator, ScriptedEvaluator>,
        Rc<RefCell<Calls>>,
    ) {
        let calls = Rc::new(RefCell::new(Calls::default()));
        let orchestrator = TrialOrchestrator::open(
            config.with_cache_root(dir.path()),
            EchoGenerator {
                calls: calls.clone(),
                short_by: 0,
                out_of_memory: false,
            },
            ScriptedEvaluator {
                calls: calls.clone(),
                scores,
                fail_on: None,
            },
            problems(3),
        )
        .unwrap();
        (orchestrator, calls)
    }

    #[test]
    fn aggregates_three_repetitions() {
        let dir = tempdir().unwrap();
        let config = OrchestratorConfig::default()
            .with_pass_at_k(1)
            .with_batch_size(1)
            .with_average_over(3);
        let (mut orch, calls) = orchestrator(&dir, config, vec![0.5, 0.6, 0.7]);
        let c = sampling_config();

        let metrics = orch.evaluate_config(&c).unwrap();
        assert!((metrics["pass@1"] - 0.6).abs() < 1e-12);
        assert_eq!(calls.borrow().evaluate, 3);

        let record = orch.store().find(&c).unwrap().unwrap();
        assert!(record.complete);
        assert!((record.metric_value - 0.6).abs() < 1e-12);

        let detail: TrialDetail = serde_json::from_value(record.result).unwrap();
        assert_eq!(detail.tries.len(), 3);
        assert!((detail.score_standard_deviation.unwrap() - 0.081_649_658).abs() < 1e-6);
        assert!((detail.score_average.unwrap() - 0.6).abs() < 1e-12);

        for repetition in 1..=3 {
            assert!(orch.layout().attempt_path(record.handle, repetition).exists());
        }
        assert!(!orch.layout().scratch_samples_path().exists());
    }

    #[test]
    fn single_repetition_has_zero_deviation() {
        let dir = tempdir().unwrap();
        let config = OrchestratorConfig::default()
            .with_pass_at_k(1)
            .with_batch_size(1)
            .with_average_over(1);
        let (mut orch, _) = orchestrator(&dir, config, vec![0.4]);
        let c = sampling_config();

        assert_eq!(orch.evaluate_config(&c).unwrap()["pass@1"], 0.4);
        let record = orch.store().find(&c).unwrap().unwrap();
        let detail: TrialDetail = serde_json::from_value(record.result).unwrap();
        assert_eq!(detail.score_standard_deviation, Some(0.0));
    }

    #[test]
    fn second_call_is_a_cache_hit() {
        let dir = tempdir().unwrap();
        let config = OrchestratorConfig::default()
            .with_pass_at_k(2)
            .with_batch_size(2)
            .with_average_over(2);
        let (mut orch, calls) = orchestrator(&dir, config, vec![0.25, 0.75]);

        let first = orch.evaluate_config(&sampling_config()).unwrap();
        let work_done = calls.borrow().generate;

        let reordered = Configuration::from_json(
            r#"{"mirostat_or_top_k": {"top_k": 40}, "temperature_or_top_p": {"temperature": 0.7}}"#,
        )
        .unwrap();
        let second = orch.evaluate_config(&reordered).unwrap();

        assert_eq!(first, second);
        assert_eq!(calls.borrow().generate, work_done);
        assert_eq!(calls.borrow().evaluate, 2);
    }

    #[test]
    fn batches_cover_target_k() {
        let dir = tempdir().unwrap();
        // 5 per problem from batches of 2 → 3 calls per problem
        let config = OrchestratorConfig::default()
            .with_pass_at_k(5)
            .with_batch_size(2)
            .with_average_over(1);
        let (mut orch, calls) = orchestrator(&dir, config, vec![0.3]);

        orch.evaluate_config(&sampling_config()).unwrap();

        let calls = calls.borrow();
        assert_eq!(calls.generate, 3 * 3);
        assert_eq!(calls.reset, calls.generate);
        assert_eq!(calls.sample_counts, vec![3 * 5]);
        assert_eq!(calls.requests[0].k_values, vec![1, 5]);
        assert_eq!(calls.requests[0].n_workers, 4);
        assert_eq!(calls.requests[0].timeout, Duration::from_secs(3));
    }

    #[test]
    fn partial_progress_is_committed_per_repetition() {
        let dir = tempdir().unwrap();
        let config = OrchestratorConfig::default()
            .with_pass_at_k(1)
            .with_batch_size(1)
            .with_average_over(3);
        let c = sampling_config();

        // The evaluator breaks on the third repetition
        let calls = Rc::new(RefCell::new(Calls::default()));
        let mut orch = TrialOrchestrator::open(
            config.clone().with_cache_root(dir.path()),
            EchoGenerator {
                calls: calls.clone(),
                short_by: 0,
                out_of_memory: false,
            },
            ScriptedEvaluator {
                calls: calls.clone(),
                scores: vec![0.2, 0.4],
                fail_on: Some(3),
            },
            problems(3),
        )
        .unwrap();

        let err = orch.evaluate_config(&c).unwrap_err();
        assert!(matches!(err, StError::Trial(TrialError::Evaluation { .. })));
        assert_eq!(calls.borrow().evaluate, 3);
        assert!(!orch.layout().scratch_samples_path().exists());

        let record = orch.store().find(&c).unwrap().unwrap();
        assert!(!record.complete);
        assert!((record.metric_value - 0.3).abs() < 1e-12);
        let detail: TrialDetail = serde_json::from_value(record.result).unwrap();
        assert_eq!(detail.tries.len(), 2);
        assert_eq!(detail.score_standard_deviation, None);
        assert!(orch.layout().attempt_path(record.handle, 2).exists());
        orch.into_store().close().unwrap();

        // A fresh process sees the two-repetition aggregate
        let calls = Rc::new(RefCell::new(Calls::default()));
        let mut resumed = TrialOrchestrator::open(
            config.with_cache_root(dir.path()).with_resume_incomplete(true),
            EchoGenerator {
                calls: calls.clone(),
                short_by: 0,
                out_of_memory: false,
            },
            ScriptedEvaluator {
                calls: calls.clone(),
                scores: vec![0.9],
                fail_on: None,
            },
            problems(3),
        )
        .unwrap();
        let replay = resumed.store().replay().unwrap();
        assert_eq!(replay.len(), 1);
        assert_eq!(replay[0].0, c);
        assert!((replay[0].1 - 0.3).abs() < 1e-12);

        // Resuming only runs the missing repetition, on the same record
        let metrics = resumed.evaluate_config(&c).unwrap();
        assert_eq!(calls.borrow().evaluate, 1);
        assert!((metrics["pass@1"] - 0.5).abs() < 1e-12);

        let finished = resumed.store().find(&c).unwrap().unwrap();
        assert_eq!(finished.handle, record.handle);
        assert!(finished.complete);
        assert!(resumed.layout().attempt_path(record.handle, 3).exists());
    }

    #[test]
    fn partial_record_is_a_hit_without_resume() {
        let dir = tempdir().unwrap();
        let config = OrchestratorConfig::default()
            .with_pass_at_k(1)
            .with_batch_size(1)
            .with_average_over(2);
        let c = sampling_config();

        let calls = Rc::new(RefCell::new(Calls::default()));
        let mut orch = TrialOrchestrator::open(
            config.with_cache_root(dir.path()),
            EchoGenerator {
                calls: calls.clone(),
                short_by: 0,
                out_of_memory: false,
            },
            ScriptedEvaluator {
                calls: calls.clone(),
                scores: vec![0.6],
                fail_on: Some(2),
            },
            problems(2),
        )
        .unwrap();

        assert!(orch.evaluate_config(&c).is_err());
        let metrics = orch.evaluate_config(&c).unwrap();
        assert_eq!(metrics["pass@1"], 0.6);
        assert_eq!(calls.borrow().evaluate, 2);
        assert!(!orch.store().find(&c).unwrap().unwrap().complete);
    }

    #[test]
    fn hit_for_another_metric_is_rejected() {
        let dir = tempdir().unwrap();
        let c = sampling_config();
        let base = OrchestratorConfig::default()
            .with_batch_size(2)
            .with_average_over(1);

        let (mut orch, _) = orchestrator(&dir, base.clone().with_pass_at_k(1), vec![0.4]);
        orch.evaluate_config(&c).unwrap();
        orch.into_store().close().unwrap();

        let (mut orch, calls) = orchestrator(&dir, base.with_pass_at_k(2), vec![0.4]);
        let err = orch.evaluate_config(&c).unwrap_err();
        assert!(matches!(err, StError::Config(ref m) if m.contains("pass@1")));
        assert_eq!(calls.borrow().generate, 0);
        assert_eq!(orch.store().len().unwrap(), 1);
    }

    #[test]
    fn generation_failure_writes_nothing() {
        let dir = tempdir().unwrap();
        let calls = Rc::new(RefCell::new(Calls::default()));
        let mut orch = TrialOrchestrator::open(
            OrchestratorConfig::default().with_cache_root(dir.path()),
            EchoGenerator {
                calls: calls.clone(),
                short_by: 0,
                out_of_memory: true,
            },
            ScriptedEvaluator {
                calls: calls.clone(),
                scores: vec![0.1],
                fail_on: None,
            },
            problems(2),
        )
        .unwrap();

        let err = orch.evaluate_config(&sampling_config()).unwrap_err();
        assert!(matches!(err, StError::Trial(TrialError::Generation { .. })));
        assert_eq!(calls.borrow().evaluate, 0);
        assert!(orch.store().is_empty().unwrap());
    }

    #[test]
    fn malformed_configuration_is_fatal() {
        let dir = tempdir().unwrap();
        let (mut orch, calls) = orchestrator(&dir, OrchestratorConfig::default(), vec![0.1]);
        let bad =
            Configuration::new(json!({"temperature_or_top_p": {"temperature": 0.7}})).unwrap();

        let err = orch.evaluate_config(&bad).unwrap_err();
        assert!(matches!(err, StError::Sampling(_)));
        assert_eq!(calls.borrow().generate, 0);
        assert!(orch.store().is_empty().unwrap());
    }

    #[test]
    fn short_batch_is_an_error() {
        let dir = tempdir().unwrap();
        let calls = Rc::new(RefCell::new(Calls::default()));
        let mut orch = TrialOrchestrator::open(
            OrchestratorConfig::default()
                .with_cache_root(dir.path())
                .with_batch_size(4),
            EchoGenerator {
                calls: calls.clone(),
                short_by: 1,
                out_of_memory: false,
            },
            ScriptedEvaluator {
                calls: calls.clone(),
                scores: vec![0.1],
                fail_on: None,
            },
            problems(1),
        )
        .unwrap();

        let err = orch.evaluate_config(&sampling_config()).unwrap_err();
        assert!(matches!(
            err,
            StError::Trial(TrialError::ShortBatch { expected: 4, got: 3 })
        ));
        assert!(orch.store().is_empty().unwrap());
    }

    #[test]
    fn preconditions_fail_fast() {
        let dir = tempdir().unwrap();
        let calls = Rc::new(RefCell::new(Calls::default()));
        let make = |config: OrchestratorConfig, problems: Vec<Problem>| {
            TrialOrchestrator::open(
                config.with_cache_root(dir.path()),
                EchoGenerator {
                    calls: calls.clone(),
                    short_by: 0,
                    out_of_memory: false,
                },
                ScriptedEvaluator {
                    calls: calls.clone(),
                    scores: vec![0.1],
                    fail_on: None,
                },
                problems,
            )
        };

        assert!(matches!(
            make(OrchestratorConfig::default().with_average_over(0), problems(1)),
            Err(StError::Trial(TrialError::NoRepetitions))
        ));
        assert!(matches!(
            make(OrchestratorConfig::default(), Vec::new()),
            Err(StError::Trial(TrialError::EmptyBenchmark))
        ));
        assert!(matches!(
            make(OrchestratorConfig::default().with_batch_size(0), problems(1)),
            Err(StError::Config(_))
        ));
    }
}

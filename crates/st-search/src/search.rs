//! Search space definitions and the reference search strategy.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;

use st_types::{Configuration, MIROSTAT_OR_TOP_K, TEMPERATURE_OR_TOP_P};

/// Attempts per suggestion before giving up on finding an unseen point.
const MAX_RESAMPLES: usize = 100;

/// A single named dimension of the search space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterDef {
    pub name: String,
    pub kind: ParameterKind,
}

/// Describes how a parameter is sampled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ParameterKind {
    /// Uniform in [low, high], rounded to a multiple of `q`.
    QUniform { low: f64, high: f64, q: f64 },
    /// Integer in [low, high], rounded to a multiple of `q`.
    QRandInt { low: i64, high: i64, q: i64 },
    /// Exactly one of several nested sub-spaces.
    Choice { options: Vec<SearchSpace> },
}

/// The full search space: an ordered list of (possibly nested) dimensions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchSpace {
    pub parameters: Vec<ParameterDef>,
}

impl SearchSpace {
    pub fn new() -> Self {
        Self {
            parameters: Vec::new(),
        }
    }

    pub fn add_quniform(mut self, name: impl Into<String>, low: f64, high: f64, q: f64) -> Self {
        self.parameters.push(ParameterDef {
            name: name.into(),
            kind: ParameterKind::QUniform { low, high, q },
        });
        self
    }

    pub fn add_qrandint(mut self, name: impl Into<String>, low: i64, high: i64, q: i64) -> Self {
        self.parameters.push(ParameterDef {
            name: name.into(),
            kind: ParameterKind::QRandInt { low, high, q },
        });
        self
    }

    pub fn add_choice(mut self, name: impl Into<String>, options: Vec<SearchSpace>) -> Self {
        self.parameters.push(ParameterDef {
            name: name.into(),
            kind: ParameterKind::Choice { options },
        });
        self
    }

    /// Sampling-parameter space searched over by default.
    pub fn sampling() -> Self {
        SearchSpace::new()
            .add_choice(
                TEMPERATURE_OR_TOP_P,
                vec![
                    SearchSpace::new().add_quniform("temperature", 0.1, 2.0, 0.01),
                    SearchSpace::new().add_quniform("top_p", 0.0, 1.0, 0.01),
                ],
            )
            .add_choice(
                MIROSTAT_OR_TOP_K,
                vec![
                    SearchSpace::new()
                        .add_quniform("mirostat_eta", 0.005, 0.5, 0.005)
                        .add_quniform("mirostat_tau", 1.0, 3.0, 0.1),
                    SearchSpace::new().add_qrandint("top_k", 1, 500, 5),
                ],
            )
    }

    /// Draw one point, recursing into whichever choice option is picked.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Map<String, Value> {
        let mut point = Map::new();

        for param in &self.parameters {
            let value = match &param.kind {
                ParameterKind::QUniform { low, high, q } => {
                    let raw = rng.random_range(*low..=*high);
                    Value::from(quantize_float(raw, *low, *high, *q))
                }
                ParameterKind::QRandInt { low, high, q } => {
                    let raw = rng.random_range(*low..=*high);
                    Value::from(quantize_int(raw, *low, *high, *q))
                }
                ParameterKind::Choice { options } => {
                    if options.is_empty() {
                        continue;
                    }
                    let idx = rng.random_range(0..options.len());
                    Value::Object(options[idx].sample(rng))
                }
            };
            point.insert(param.name.clone(), value);
        }

        point
    }
}

impl Default for SearchSpace {
    fn default() -> Self {
        Self::new()
    }
}

fn decimals_of(q: f64) -> i32 {
    let mut decimals = 0;
    while decimals < 12 && ((q * 10f64.powi(decimals)).fract()).abs() > 1e-9 {
        decimals += 1;
    }
    decimals
}

fn quantize_float(value: f64, low: f64, high: f64, q: f64) -> f64 {
    if q <= 0.0 {
        return value.clamp(low, high);
    }
    let scale = 10f64.powi(decimals_of(q));
    let stepped = (value / q).round() * q;
    ((stepped * scale).round() / scale).clamp(low, high)
}

fn quantize_int(value: i64, low: i64, high: i64, q: i64) -> i64 {
    if q <= 1 {
        return value.clamp(low, high);
    }
    let stepped = ((value as f64 / q as f64).round() as i64) * q;
    stepped.clamp(low, high)
}

// ---------------------------------------------------------------------------
// Search strategies
// ---------------------------------------------------------------------------

/// Common trait for all search strategies.
pub trait SearchStrategy {
    /// Generate the next batch of configurations to evaluate.
    fn suggest(&mut self, count: usize) -> Vec<Configuration>;

    /// Report a scored configuration, including warm-start points.
    fn report(&mut self, _config: &Configuration, _objective: f64) {}

    /// Human-readable strategy name.
    fn name(&self) -> &str;
}

/// Independent random sampling that skips every point already proposed
/// or reported.
#[derive(Debug, Clone)]
pub struct RandomSearch {
    space: SearchSpace,
    rng: StdRng,
    seen: HashSet<String>,
    observations: Vec<(Configuration, f64)>,
}

impl RandomSearch {
    pub fn new(space: SearchSpace) -> Self {
        Self::from_rng(space, StdRng::from_os_rng())
    }

    /// Deterministic sampling for a given seed.
    pub fn with_seed(space: SearchSpace, seed: u64) -> Self {
        Self::from_rng(space, StdRng::seed_from_u64(seed))
    }

    fn from_rng(space: SearchSpace, rng: StdRng) -> Self {
        Self {
            space,
            rng,
            seen: HashSet::new(),
            observations: Vec::new(),
        }
    }

    pub fn observations(&self) -> &[(Configuration, f64)] {
        &self.observations
    }

    fn sample_unseen(&mut self) -> Option<Configuration> {
        for _ in 0..MAX_RESAMPLES {
            let candidate = Configuration::from_map(self.space.sample(&mut self.rng));
            if self.seen.insert(candidate.canonical_key()) {
                return Some(candidate);
            }
        }
        None
    }
}

impl SearchStrategy for RandomSearch {
    fn suggest(&mut self, count: usize) -> Vec<Configuration> {
        (0..count).map_while(|_| self.sample_unseen()).collect()
    }

    fn report(&mut self, config: &Configuration, objective: f64) {
        self.seen.insert(config.canonical_key());
        self.observations.push((config.clone(), objective));
    }

    fn name(&self) -> &str {
        "random"
    }
}

//! Benchmark problems, JSONL helpers and the seeded training split.

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use st_store::SeedLayout;
use st_types::{config_error, StResult, StoreError};

/// A single benchmark task. Fields other than `task_id` and `prompt`
/// (tests, entry point, canonical solution, ...) are carried through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Problem {
    pub task_id: String,
    pub prompt: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Problem {
    pub fn new(task_id: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            prompt: prompt.into(),
            extra: Map::new(),
        }
    }
}

pub fn read_jsonl<T: DeserializeOwned, P: AsRef<Path>>(path: P) -> StResult<Vec<T>> {
    let reader = BufReader::new(File::open(path.as_ref())?);
    let mut items = Vec::new();

    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        items.push(serde_json::from_str(&line)?);
    }

    Ok(items)
}

pub fn write_jsonl<'a, T, I, P>(path: P, items: I) -> StResult<()>
where
    T: Serialize + 'a,
    I: IntoIterator<Item = &'a T>,
    P: AsRef<Path>,
{
    let mut writer = BufWriter::new(File::create(path.as_ref())?);
    for item in items {
        serde_json::to_writer(&mut writer, item)?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;
    Ok(())
}

/// Training / held-out partition of a benchmark, fixed per seed.
#[derive(Debug, Clone, PartialEq)]
pub struct BenchmarkSplit {
    pub training: Vec<Problem>,
    pub held_out: Vec<Problem>,
}

impl BenchmarkSplit {
    /// Reuse the seed's persisted training index, or draw `training_size`
    /// problems with the seed and persist the choice.
    pub fn load_or_create(
        layout: &SeedLayout,
        problems: Vec<Problem>,
        training_size: usize,
    ) -> StResult<Self> {
        let index_path = layout.training_index_path();

        let indices: BTreeSet<usize> = if index_path.exists() {
            let raw = std::fs::read_to_string(&index_path)?;
            let stored: Vec<usize> = serde_json::from_str(&raw)?;
            if let Some(bad) = stored.iter().find(|&&i| i >= problems.len()) {
                return Err(StoreError::Corruption {
                    message: format!(
                        "training index {bad} out of range for {} problems",
                        problems.len()
                    ),
                }
                .into());
            }
            tracing::info!("Reusing training split from {}", index_path.display());
            stored.into_iter().collect()
        } else {
            if training_size > problems.len() {
                return Err(config_error!(
                    "training size {} exceeds the {} available problems",
                    training_size,
                    problems.len()
                ));
            }
            let mut rng = StdRng::seed_from_u64(layout.seed());
            let chosen: BTreeSet<usize> =
                rand::seq::index::sample(&mut rng, problems.len(), training_size)
                    .into_iter()
                    .collect();

            std::fs::create_dir_all(layout.seed_dir())?;
            let listed: Vec<usize> = chosen.iter().copied().collect();
            std::fs::write(&index_path, serde_json::to_string(&listed)?)?;
            chosen
        };

        let (training, held_out): (Vec<_>, Vec<_>) = problems
            .into_iter()
            .enumerate()
            .partition(|(i, _)| indices.contains(i));

        Ok(Self {
            training: training.into_iter().map(|(_, p)| p).collect(),
            held_out: held_out.into_iter().map(|(_, p)| p).collect(),
        })
    }
}

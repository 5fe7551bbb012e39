use std::path::{Path, PathBuf};

use st_types::StResult;

use crate::result_store::{RecordHandle, ResultStore};

pub const DEFAULT_CACHE_ROOT: &str = "./.cache";

const STORE_FILE: &str = "cache.db";
const TRAINING_INDEX_FILE: &str = "training_problems_index.json";
const TRAINING_PROBLEMS_FILE: &str = "training_problems.jsonl";
const ATTEMPTS_DIR: &str = "attempted_solutions";
const SCRATCH_SAMPLES_FILE: &str = "temp.jsonl";

/// On-disk state of one search, scoped by its seed:
///
/// ```text
/// <root>/<seed>/cache.db
/// <root>/<seed>/training_problems_index.json
/// <root>/<seed>/training_problems.jsonl
/// <root>/<seed>/attempted_solutions/<handle>-<repetition>.jsonl
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeedLayout {
    root: PathBuf,
    seed: u64,
}

impl SeedLayout {
    pub fn new<P: AsRef<Path>>(root: P, seed: u64) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            seed,
        }
    }

    /// Create the seed directory and the attempt archive.
    pub fn ensure(&self) -> StResult<()> {
        std::fs::create_dir_all(self.attempts_dir())?;
        Ok(())
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn seed_dir(&self) -> PathBuf {
        self.root.join(self.seed.to_string())
    }

    pub fn store_path(&self) -> PathBuf {
        self.seed_dir().join(STORE_FILE)
    }

    pub fn training_index_path(&self) -> PathBuf {
        self.seed_dir().join(TRAINING_INDEX_FILE)
    }

    pub fn training_problems_path(&self) -> PathBuf {
        self.seed_dir().join(TRAINING_PROBLEMS_FILE)
    }

    pub fn attempts_dir(&self) -> PathBuf {
        self.seed_dir().join(ATTEMPTS_DIR)
    }

    /// Archived results for one repetition (1-based) of a record.
    pub fn attempt_path(&self, handle: RecordHandle, repetition: usize) -> PathBuf {
        self.attempts_dir()
            .join(format!("{}-{}.jsonl", handle, repetition))
    }

    /// Working file the evaluator reads completions from.
    pub fn scratch_samples_path(&self) -> PathBuf {
        self.seed_dir().join(SCRATCH_SAMPLES_FILE)
    }

    /// Open this seed's result store, creating the directory tree if needed.
    pub fn open_store(&self) -> StResult<ResultStore> {
        self.ensure()?;
        ResultStore::open(self.store_path())
    }

    /// Move an evaluator results file into the archive, replacing any
    /// earlier artifact for the same (handle, repetition).
    pub fn archive_attempt(
        &self,
        results_file: &Path,
        handle: RecordHandle,
        repetition: usize,
    ) -> StResult<PathBuf> {
        let target = self.attempt_path(handle, repetition);
        std::fs::create_dir_all(self.attempts_dir())?;
        std::fs::rename(results_file, &target)?;
        tracing::debug!("Archived {} to {}", results_file.display(), target.display());
        Ok(target)
    }

    /// Count and size of archived attempt artifacts.
    pub fn archive_stats(&self) -> StResult<ArchiveStats> {
        let mut stats = ArchiveStats {
            total_files: 0,
            total_size_bytes: 0,
            attempts_dir: self.attempts_dir(),
        };

        if !stats.attempts_dir.exists() {
            return Ok(stats);
        }

        for entry in std::fs::read_dir(&stats.attempts_dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|s| s.to_str()) == Some("jsonl") {
                stats.total_files += 1;
                stats.total_size_bytes += entry.metadata()?.len();
            }
        }

        Ok(stats)
    }
}

/// Attempt archive statistics
#[derive(Debug, Clone)]
pub struct ArchiveStats {
    pub total_files: u64,
    pub total_size_bytes: u64,
    pub attempts_dir: PathBuf,
}

impl ArchiveStats {
    pub fn total_size_mb(&self) -> f64 {
        self.total_size_bytes as f64 / (1024.0 * 1024.0)
    }
}

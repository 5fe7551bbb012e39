use thiserror::Error;

/// Main error type for the SampleTune system
#[derive(Error, Debug)]
pub enum StError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Sampling configuration error: {0}")]
    Sampling(#[from] SamplingError),

    #[error("Trial error: {0}")]
    Trial(#[from] TrialError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result store errors
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database connection failed: {message}")]
    DatabaseConnection { message: String },

    #[error("Query execution failed: {query}, error: {error}")]
    QueryFailed { query: String, error: String },

    #[error("A record already exists for configuration {key}")]
    DuplicateKey { key: String },

    #[error("No record with handle {handle}")]
    UnknownHandle { handle: i64 },

    #[error("Record {handle} is complete and can no longer be updated")]
    Sealed { handle: i64 },

    #[error("Stored record is corrupted: {message}")]
    Corruption { message: String },
}

/// Errors raised while decoding a configuration into sampling settings
#[derive(Error, Debug, PartialEq)]
pub enum SamplingError {
    #[error("Configuration is not a mapping")]
    NotAMapping,

    #[error("Choice group {group} has no recognised branch")]
    MissingChoice { group: String },

    #[error("Choice group {group} populates more than one branch: {keys:?}")]
    AmbiguousChoice { group: String, keys: Vec<String> },

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

/// Trial orchestration errors
#[derive(Error, Debug)]
pub enum TrialError {
    #[error("average_over must be at least 1")]
    NoRepetitions,

    #[error("Benchmark set is empty")]
    EmptyBenchmark,

    #[error("Generator returned {got} completions, expected {expected}")]
    ShortBatch { expected: usize, got: usize },

    #[error("Evaluator did not report metric {metric}")]
    MissingMetric { metric: String },

    #[error("Text generation failed: {message}")]
    Generation { message: String },

    #[error("Correctness evaluation failed: {message}")]
    Evaluation { message: String },
}

/// Result type alias for SampleTune operations
pub type StResult<T> = Result<T, StError>;

/// Macro for creating internal errors
#[macro_export]
macro_rules! internal_error {
    ($($arg:tt)*) => {
        $crate::StError::Internal(format!($($arg)*))
    };
}

/// Macro for creating configuration errors
#[macro_export]
macro_rules! config_error {
    ($($arg:tt)*) => {
        $crate::StError::Config(format!($($arg)*))
    };
}

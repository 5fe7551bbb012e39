use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use duckdb::{params, Connection, Row};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use st_types::{Configuration, StResult, StoreError};

const SCHEMA: &str = "CREATE SEQUENCE IF NOT EXISTS experiment_id_seq START 1;

    CREATE TABLE IF NOT EXISTS experiment (
        id BIGINT PRIMARY KEY DEFAULT nextval('experiment_id_seq'),
        config_key TEXT NOT NULL UNIQUE,
        result TEXT NOT NULL,
        metric_name TEXT NOT NULL,
        metric_value DOUBLE NOT NULL,
        complete BOOLEAN NOT NULL DEFAULT FALSE,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );";

const RECORD_COLUMNS: &str =
    "id, config_key, result, metric_name, metric_value, complete, created_at, updated_at";

/// Opaque identifier of a stored result record.
///
/// Handles are drawn from a persistent sequence: monotonically increasing and
/// never reused, even across process restarts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RecordHandle(i64);

impl RecordHandle {
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    pub fn value(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for RecordHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One persisted row: the scored result for a distinct configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    pub handle: RecordHandle,
    pub config: Configuration,
    pub result: Value,
    pub metric_name: String,
    pub metric_value: f64,
    /// Once set, the record no longer accepts updates.
    pub complete: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Durable configuration → result mapping backed by DuckDB.
///
/// Every write runs in its own auto-committed statement, so a write that
/// returns `Ok` is already durable. The store assumes it is the only writer
/// of its database file.
#[derive(Debug)]
pub struct ResultStore {
    connection: Connection,
    path: Option<PathBuf>,
}

impl ResultStore {
    /// Open (or create) the store at `db_path`.
    pub fn open<P: AsRef<Path>>(db_path: P) -> StResult<Self> {
        let path = db_path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let connection = Connection::open(&path)
            .map_err(|e| StoreError::DatabaseConnection { message: e.to_string() })?;
        Self::initialize(connection, Some(path))
    }

    /// Volatile store, used by tests and dry runs.
    pub fn open_in_memory() -> StResult<Self> {
        let connection = Connection::open_in_memory()
            .map_err(|e| StoreError::DatabaseConnection { message: e.to_string() })?;
        Self::initialize(connection, None)
    }

    fn initialize(connection: Connection, path: Option<PathBuf>) -> StResult<Self> {
        connection
            .execute_batch(SCHEMA)
            .map_err(|e| StoreError::DatabaseConnection { message: e.to_string() })?;

        tracing::debug!(
            "Opened result store at {}",
            path.as_deref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| ":memory:".to_string())
        );
        Ok(Self { connection, path })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Last committed metric value for exactly this configuration.
    pub fn lookup(&self, config: &Configuration) -> StResult<Option<f64>> {
        let query = "SELECT metric_value FROM experiment WHERE config_key = ?";
        let mut stmt = self.connection.prepare(query).map_err(query_failed(query))?;
        let mut rows = stmt
            .query(params![config.canonical_key()])
            .map_err(query_failed(query))?;

        match rows.next().map_err(query_failed(query))? {
            Some(row) => Ok(Some(row.get::<_, f64>(0).map_err(query_failed(query))?)),
            None => Ok(None),
        }
    }

    /// Create the record for a configuration that has never been stored.
    ///
    /// A configuration is inserted exactly once; callers must `lookup` first
    /// and use [`ResultStore::update`] afterwards.
    pub fn insert(
        &mut self,
        config: &Configuration,
        result: &Value,
        metric_name: &str,
        metric_value: f64,
    ) -> StResult<RecordHandle> {
        let key = config.canonical_key();
        if self.lookup(config)?.is_some() {
            return Err(StoreError::DuplicateKey { key }.into());
        }

        let now = Utc::now().to_rfc3339();
        let query = "INSERT INTO experiment
                (config_key, result, metric_name, metric_value, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?)
             RETURNING id";
        let id: i64 = self
            .connection
            .query_row(
                query,
                params![key, result.to_string(), metric_name, metric_value, now, now],
                |row| row.get(0),
            )
            .map_err(query_failed(query))?;

        tracing::debug!("Stored {} = {} as record {}", metric_name, metric_value, id);
        Ok(RecordHandle(id))
    }

    /// Overwrite the payload and metric of an open record.
    pub fn update(
        &mut self,
        handle: RecordHandle,
        result: &Value,
        metric_value: f64,
    ) -> StResult<()> {
        self.write(handle, result, metric_value, false)
    }

    /// Final update: after this the record is immutable.
    pub fn complete(
        &mut self,
        handle: RecordHandle,
        result: &Value,
        metric_value: f64,
    ) -> StResult<()> {
        self.write(handle, result, metric_value, true)
    }

    fn write(
        &mut self,
        handle: RecordHandle,
        result: &Value,
        metric_value: f64,
        complete: bool,
    ) -> StResult<()> {
        let query = "UPDATE experiment
             SET result = ?, metric_value = ?, complete = ?, updated_at = ?
             WHERE id = ? AND NOT complete";
        let changed = self
            .connection
            .execute(
                query,
                params![
                    result.to_string(),
                    metric_value,
                    complete,
                    Utc::now().to_rfc3339(),
                    handle.value()
                ],
            )
            .map_err(query_failed(query))?;

        if changed == 0 {
            return Err(match self.get(handle)? {
                Some(_) => StoreError::Sealed { handle: handle.value() },
                None => StoreError::UnknownHandle { handle: handle.value() },
            }
            .into());
        }

        tracing::debug!(
            "Updated record {} (metric {}, complete: {})",
            handle,
            metric_value,
            complete
        );
        Ok(())
    }

    /// Every stored (configuration, metric value) pair, in handle order.
    pub fn replay(&self) -> StResult<Vec<(Configuration, f64)>> {
        let query = "SELECT config_key, metric_value FROM experiment ORDER BY id";
        let mut stmt = self.connection.prepare(query).map_err(query_failed(query))?;
        let mut rows = stmt.query([]).map_err(query_failed(query))?;

        let mut entries = Vec::new();
        while let Some(row) = rows.next().map_err(query_failed(query))? {
            let key: String = row.get(0).map_err(query_failed(query))?;
            let value: f64 = row.get(1).map_err(query_failed(query))?;
            entries.push((parse_config(&key)?, value));
        }

        tracing::debug!("Replayed {} stored results", entries.len());
        Ok(entries)
    }

    pub fn get(&self, handle: RecordHandle) -> StResult<Option<ResultRecord>> {
        let query = format!("SELECT {RECORD_COLUMNS} FROM experiment WHERE id = ?");
        self.fetch_one(&query, handle.value())
    }

    /// Full record for a configuration, if one exists.
    pub fn find(&self, config: &Configuration) -> StResult<Option<ResultRecord>> {
        let query = format!("SELECT {RECORD_COLUMNS} FROM experiment WHERE config_key = ?");
        self.fetch_one(&query, config.canonical_key())
    }

    pub fn len(&self) -> StResult<usize> {
        let query = "SELECT COUNT(*) FROM experiment";
        let count: i64 = self
            .connection
            .query_row(query, [], |row| row.get(0))
            .map_err(query_failed(query))?;
        Ok(count as usize)
    }

    pub fn is_empty(&self) -> StResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Release the connection, surfacing any error from the final flush.
    pub fn close(self) -> StResult<()> {
        self.connection
            .close()
            .map_err(|(_, e)| StoreError::DatabaseConnection { message: e.to_string() })?;
        Ok(())
    }

    fn fetch_one<P: duckdb::ToSql>(&self, query: &str, param: P) -> StResult<Option<ResultRecord>> {
        let mut stmt = self.connection.prepare(query).map_err(query_failed(query))?;
        let mut rows = stmt.query(params![param]).map_err(query_failed(query))?;

        match rows.next().map_err(query_failed(query))? {
            Some(row) => Ok(Some(record_from_row(row, query)?)),
            None => Ok(None),
        }
    }
}

fn record_from_row(row: &Row<'_>, query: &str) -> StResult<ResultRecord> {
    let id: i64 = row.get(0).map_err(query_failed(query))?;
    let key: String = row.get(1).map_err(query_failed(query))?;
    let result: String = row.get(2).map_err(query_failed(query))?;
    let metric_name: String = row.get(3).map_err(query_failed(query))?;
    let metric_value: f64 = row.get(4).map_err(query_failed(query))?;
    let complete: bool = row.get(5).map_err(query_failed(query))?;
    let created_at: String = row.get(6).map_err(query_failed(query))?;
    let updated_at: String = row.get(7).map_err(query_failed(query))?;

    let result = serde_json::from_str(&result).map_err(|e| StoreError::Corruption {
        message: format!("record {id} has an unreadable result payload: {e}"),
    })?;

    Ok(ResultRecord {
        handle: RecordHandle(id),
        config: parse_config(&key)?,
        result,
        metric_name,
        metric_value,
        complete,
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
    })
}

fn parse_config(key: &str) -> StResult<Configuration> {
    Configuration::from_json(key).map_err(|e| {
        StoreError::Corruption {
            message: format!("stored key {key} is not a configuration: {e}"),
        }
        .into()
    })
}

fn parse_timestamp(raw: &str) -> StResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| {
            StoreError::Corruption {
                message: format!("invalid timestamp {raw}: {e}"),
            }
            .into()
        })
}

fn query_failed(query: &str) -> impl Fn(duckdb::Error) -> StoreError + '_ {
    move |e| StoreError::QueryFailed {
        query: query.to_string(),
        error: e.to_string(),
    }
}

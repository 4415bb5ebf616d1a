use crate::error::{Result, StoreError};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::Connection;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing;

const SAMPLES_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS samples (
    timestamp INTEGER NOT NULL,
    agent_id TEXT NOT NULL,
    name TEXT NOT NULL,
    value REAL NOT NULL,
    labels TEXT NOT NULL DEFAULT '{}'
);
CREATE INDEX IF NOT EXISTS idx_samples_agent_name_time
    ON samples(agent_id, name, timestamp);
CREATE INDEX IF NOT EXISTS idx_samples_time
    ON samples(timestamp);
";

/// One SQLite database file per UTC day. Connections are opened lazily and
/// cached; dropping a connection checkpoints its WAL.
pub struct PartitionManager {
    data_dir: PathBuf,
    connections: Mutex<HashMap<String, Connection>>,
}

impl PartitionManager {
    pub fn new(data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir)?;
        Ok(Self {
            data_dir: data_dir.to_path_buf(),
            connections: Mutex::new(HashMap::new()),
        })
    }

    /// Lock the connections map, recovering from a poisoned Mutex if necessary.
    fn lock_connections(&self) -> MutexGuard<'_, HashMap<String, Connection>> {
        self.connections
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn partition_key(ts: DateTime<Utc>) -> String {
        ts.format("%Y-%m-%d").to_string()
    }

    fn partition_path(&self, key: &str) -> PathBuf {
        self.data_dir.join(format!("{key}.db"))
    }

    pub fn partition_exists(&self, key: &str) -> bool {
        self.partition_path(key).exists()
    }

    pub fn get_or_create(&self, ts: DateTime<Utc>) -> Result<String> {
        let key = Self::partition_key(ts);
        let mut conns = self.lock_connections();
        if !conns.contains_key(&key) {
            let path = self.partition_path(&key);
            let conn = Connection::open(&path)?;
            conn.execute_batch("PRAGMA journal_mode=WAL;")?;
            conn.execute_batch(SAMPLES_SCHEMA)?;
            tracing::info!(partition = %key, "created new sample partition");
            conns.insert(key.clone(), conn);
        }
        Ok(key)
    }

    pub fn with_partition<F, R>(&self, key: &str, f: F) -> Result<R>
    where
        F: FnOnce(&Connection) -> Result<R>,
    {
        let mut conns = self.lock_connections();
        if !conns.contains_key(key) {
            let path = self.partition_path(key);
            if !path.exists() {
                return Err(StoreError::BackendUnavailable(format!(
                    "partition {key} not found"
                )));
            }
            let conn = Connection::open(&path)?;
            conn.execute_batch("PRAGMA journal_mode=WAL;")?;
            conn.execute_batch(SAMPLES_SCHEMA)?;
            conns.insert(key.to_string(), conn);
        }
        let conn = conns
            .get(key)
            .expect("partition connection inserted above");
        f(conn)
    }

    /// Partition keys overlapping `[from, to]`, existing on disk only.
    pub fn partitions_in_range(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<String>> {
        let from_date = from.date_naive();
        let to_date = to.date_naive();
        let mut keys = Vec::new();
        let mut date = from_date;
        while date <= to_date {
            let key = date.format("%Y-%m-%d").to_string();
            if self.partition_path(&key).exists() {
                keys.push(key);
            }
            date = match date.succ_opt() {
                Some(next) => next,
                None => break,
            };
        }
        Ok(keys)
    }

    /// Remove partition files whose entire day lies before `cutoff`.
    /// A partition dated D only holds samples in `[D 00:00, D+1 00:00)`,
    /// so `D < cutoff.date` guarantees every contained sample is expired.
    pub fn drop_expired(&self, cutoff: DateTime<Utc>) -> Result<u32> {
        let cutoff_date = cutoff.date_naive();
        let mut removed = 0u32;

        let mut expired: Vec<(String, PathBuf)> = Vec::new();
        let entries = std::fs::read_dir(&self.data_dir)?;
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            if let Some(date_str) = name.strip_suffix(".db") {
                if let Ok(date) = NaiveDate::parse_from_str(date_str, "%Y-%m-%d") {
                    if date < cutoff_date {
                        expired.push((date_str.to_string(), entry.path()));
                    }
                }
            }
        }

        for (date_str, db_path) in &expired {
            // Drop the cached connection first so the WAL is checkpointed.
            {
                let mut conns = self.lock_connections();
                conns.remove(date_str.as_str());
            }

            if let Err(e) = std::fs::remove_file(db_path) {
                tracing::error!(partition = %date_str, error = %e, "failed to remove partition file");
                continue;
            }
            for suffix in ["-wal", "-shm"] {
                let aux = self.data_dir.join(format!("{date_str}.db{suffix}"));
                if aux.exists() {
                    if let Err(e) = std::fs::remove_file(&aux) {
                        tracing::warn!(path = %aux.display(), error = %e, "failed to remove sqlite aux file");
                    }
                }
            }

            tracing::info!(partition = %date_str, "removed expired partition");
            removed += 1;
        }

        Ok(removed)
    }
}

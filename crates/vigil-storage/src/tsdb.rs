use crate::error::{Result, StoreError};
use crate::partition::PartitionManager;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::time::Duration;
use tracing;
use vigil_common::types::Sample;

/// How values inside one step bucket are reduced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregation {
    Avg,
    Min,
    Max,
    Sum,
    Last,
}

impl std::str::FromStr for Aggregation {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "avg" => Ok(Aggregation::Avg),
            "min" => Ok(Aggregation::Min),
            "max" => Ok(Aggregation::Max),
            "sum" => Ok(Aggregation::Sum),
            "last" => Ok(Aggregation::Last),
            _ => Err(format!("unknown aggregation: {s}")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RangeQuery {
    pub name: String,
    pub probe_id: Option<String>,
    pub label_filters: HashMap<String, String>,
    pub start_ms: i64,
    pub end_ms: i64,
    pub step_ms: i64,
    pub agg: Aggregation,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct SeriesPoint {
    pub timestamp_ms: i64,
    pub value: f64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SweepOutcome {
    pub partitions_removed: u32,
    pub rows_removed: u64,
}

/// Daily-partitioned SQLite sample store.
///
/// Writes are best-effort: a failing batch is retried once after a short
/// backoff when the failure is transient, then dropped by the caller.
pub struct Tsdb {
    partitions: PartitionManager,
}

const WRITE_RETRY_BACKOFF: Duration = Duration::from_millis(200);
const SWEEP_DELETE_BATCH: usize = 1000;

impl Tsdb {
    pub fn new(data_dir: &Path) -> Result<Self> {
        Ok(Self {
            partitions: PartitionManager::new(data_dir)?,
        })
    }

    /// Write a batch of samples. Intra-batch order is preserved within each
    /// partition (one transaction per touched day).
    pub async fn write(&self, samples: &[Sample]) -> Result<()> {
        if samples.is_empty() {
            return Ok(());
        }
        match self.write_once(samples) {
            Ok(()) => Ok(()),
            Err(e) if e.is_transient() => {
                tracing::warn!(error = %e, count = samples.len(), "sample write failed, retrying once");
                tokio::time::sleep(WRITE_RETRY_BACKOFF).await;
                self.write_once(samples)
            }
            Err(e) => Err(e),
        }
    }

    fn write_once(&self, samples: &[Sample]) -> Result<()> {
        // Group by partition day, preserving arrival order within each group.
        let mut by_partition: BTreeMap<String, Vec<&Sample>> = BTreeMap::new();
        for sample in samples {
            let ts = DateTime::from_timestamp_millis(sample.timestamp_ms).ok_or_else(|| {
                StoreError::Malformed(format!(
                    "sample {} has invalid timestamp {}",
                    sample.name, sample.timestamp_ms
                ))
            })?;
            let key = self.partitions.get_or_create(ts)?;
            by_partition.entry(key).or_default().push(sample);
        }

        for (key, group) in by_partition {
            self.partitions.with_partition(&key, |conn| {
                let tx = conn.unchecked_transaction()?;
                {
                    let mut stmt = tx.prepare_cached(
                        "INSERT INTO samples (timestamp, agent_id, name, value, labels)
                         VALUES (?1, ?2, ?3, ?4, ?5)",
                    )?;
                    for sample in &group {
                        let labels_json = serde_json::to_string(&sample.labels)?;
                        stmt.execute(rusqlite::params![
                            sample.timestamp_ms,
                            sample.probe_id(),
                            &sample.name,
                            sample.value,
                            labels_json,
                        ])?;
                    }
                }
                tx.commit()?;
                Ok(())
            })?;
        }
        Ok(())
    }

    /// Range read with step bucketing. Buckets are aligned to
    /// `floor(timestamp / step) * step`; label filters are applied against
    /// the stored label set after the indexed name/agent/time scan.
    pub fn query_range(&self, query: &RangeQuery) -> Result<Vec<SeriesPoint>> {
        if query.step_ms <= 0 {
            return Err(StoreError::Malformed("step must be positive".to_string()));
        }
        if query.end_ms < query.start_ms {
            return Err(StoreError::Malformed("end before start".to_string()));
        }

        let from = DateTime::from_timestamp_millis(query.start_ms)
            .ok_or_else(|| StoreError::Malformed("invalid start timestamp".to_string()))?;
        let to = DateTime::from_timestamp_millis(query.end_ms)
            .ok_or_else(|| StoreError::Malformed("invalid end timestamp".to_string()))?;

        let mut rows: Vec<(i64, f64)> = Vec::new();
        for key in self.partitions.partitions_in_range(from, to)? {
            self.partitions.with_partition(&key, |conn| {
                let mut sql = String::from(
                    "SELECT timestamp, value, labels FROM samples
                     WHERE name = ?1 AND timestamp >= ?2 AND timestamp <= ?3",
                );
                let mut params: Vec<Box<dyn rusqlite::types::ToSql>> = vec![
                    Box::new(query.name.clone()),
                    Box::new(query.start_ms),
                    Box::new(query.end_ms),
                ];
                if let Some(probe_id) = &query.probe_id {
                    params.push(Box::new(probe_id.clone()));
                    sql.push_str(&format!(" AND agent_id = ?{}", params.len()));
                }
                sql.push_str(" ORDER BY timestamp ASC");

                let mut stmt = conn.prepare(&sql)?;
                let param_refs: Vec<&dyn rusqlite::types::ToSql> =
                    params.iter().map(|p| p.as_ref()).collect();
                let mapped = stmt
                    .query_map(param_refs.as_slice(), |row| {
                        Ok((
                            row.get::<_, i64>(0)?,
                            row.get::<_, f64>(1)?,
                            row.get::<_, String>(2)?,
                        ))
                    })?
                    .collect::<rusqlite::Result<Vec<_>>>()?;

                for (ts, value, labels_json) in mapped {
                    if !query.label_filters.is_empty() {
                        let labels: HashMap<String, String> =
                            serde_json::from_str(&labels_json).unwrap_or_default();
                        let matches = query
                            .label_filters
                            .iter()
                            .all(|(k, v)| labels.get(k) == Some(v));
                        if !matches {
                            continue;
                        }
                    }
                    rows.push((ts, value));
                }
                Ok(())
            })?;
        }

        rows.sort_by_key(|(ts, _)| *ts);

        let mut buckets: BTreeMap<i64, Vec<f64>> = BTreeMap::new();
        for (ts, value) in rows {
            let bucket = (ts / query.step_ms) * query.step_ms;
            buckets.entry(bucket).or_default().push(value);
        }

        let points = buckets
            .into_iter()
            .map(|(bucket, values)| {
                let value = match query.agg {
                    Aggregation::Avg => values.iter().sum::<f64>() / values.len() as f64,
                    Aggregation::Min => values.iter().copied().fold(f64::INFINITY, f64::min),
                    Aggregation::Max => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
                    Aggregation::Sum => values.iter().sum(),
                    Aggregation::Last => *values.last().expect("bucket is non-empty"),
                };
                SeriesPoint {
                    timestamp_ms: bucket,
                    value,
                }
            })
            .collect();
        Ok(points)
    }

    /// Delete everything older than `horizon_ms`. Whole expired days are
    /// dropped as partition files; the boundary day is trimmed with batched
    /// row deletes so no sample at or after `now - horizon` is touched.
    pub fn sweep_expired(&self, horizon_ms: i64, now: DateTime<Utc>) -> Result<SweepOutcome> {
        let cutoff = now - ChronoDuration::milliseconds(horizon_ms);
        let cutoff_ms = cutoff.timestamp_millis();

        let mut outcome = SweepOutcome {
            partitions_removed: self.partitions.drop_expired(cutoff)?,
            rows_removed: 0,
        };

        let boundary_key = PartitionManager::partition_key(cutoff);
        if self.partitions.partition_exists(&boundary_key) {
            loop {
                let removed = self.partitions.with_partition(&boundary_key, |conn| {
                    let n = conn.execute(
                        "DELETE FROM samples WHERE rowid IN
                         (SELECT rowid FROM samples WHERE timestamp < ?1 LIMIT ?2)",
                        rusqlite::params![cutoff_ms, SWEEP_DELETE_BATCH as i64],
                    )?;
                    Ok(n)
                })?;
                outcome.rows_removed += removed as u64;
                if removed < SWEEP_DELETE_BATCH {
                    break;
                }
            }
        }

        Ok(outcome)
    }
}

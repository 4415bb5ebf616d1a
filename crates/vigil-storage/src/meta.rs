use anyhow::Result;
use rusqlite::{Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use vigil_common::types::{
    AlertKind, AlertRecord, AlertRule, AlertStatus, HostSnapshot, NotifySettings, Probe,
    RuleScope, Severity,
};

const PROBES_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS probes (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL DEFAULT '',
    os TEXT NOT NULL DEFAULT '',
    arch TEXT NOT NULL DEFAULT '',
    ip TEXT NOT NULL DEFAULT '',
    version TEXT NOT NULL DEFAULT '',
    last_seen_ms INTEGER NOT NULL DEFAULT 0,
    created_at_ms INTEGER NOT NULL
);
";

const HOST_SNAPSHOTS_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS host_snapshots (
    probe_id TEXT PRIMARY KEY,
    hostname TEXT NOT NULL DEFAULT '',
    os TEXT NOT NULL DEFAULT '',
    platform TEXT NOT NULL DEFAULT '',
    platform_version TEXT NOT NULL DEFAULT '',
    kernel_version TEXT NOT NULL DEFAULT '',
    kernel_arch TEXT NOT NULL DEFAULT '',
    uptime_secs INTEGER NOT NULL DEFAULT 0,
    boot_time_secs INTEGER NOT NULL DEFAULT 0,
    procs INTEGER NOT NULL DEFAULT 0,
    virtualization_system TEXT NOT NULL DEFAULT '',
    virtualization_role TEXT NOT NULL DEFAULT '',
    timestamp_ms INTEGER NOT NULL
);
";

const ALERT_RULES_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS alert_rules (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    kind TEXT NOT NULL,
    scope_json TEXT NOT NULL DEFAULT '{\"scope\":\"all\"}',
    threshold REAL NOT NULL,
    duration_secs INTEGER NOT NULL,
    level TEXT NOT NULL DEFAULT 'warning',
    enabled INTEGER NOT NULL DEFAULT 1,
    notify_json TEXT NOT NULL DEFAULT '{}',
    created_at_ms INTEGER NOT NULL,
    updated_at_ms INTEGER NOT NULL
);
";

const ALERT_RECORDS_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS alert_records (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    probe_id TEXT NOT NULL,
    rule_id TEXT NOT NULL,
    rule_name TEXT NOT NULL DEFAULT '',
    kind TEXT NOT NULL,
    message TEXT NOT NULL DEFAULT '',
    threshold REAL NOT NULL,
    actual_value REAL NOT NULL,
    level TEXT NOT NULL,
    status TEXT NOT NULL,
    fired_at_ms INTEGER NOT NULL,
    resolved_at_ms INTEGER,
    updated_at_ms INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_alert_records_probe ON alert_records(probe_id);
CREATE INDEX IF NOT EXISTS idx_alert_records_status ON alert_records(status);
CREATE INDEX IF NOT EXISTS idx_alert_records_fired ON alert_records(fired_at_ms);
";

const AUDIT_RESULTS_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS audit_results (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    probe_id TEXT NOT NULL,
    audit_type TEXT NOT NULL DEFAULT '',
    result TEXT NOT NULL DEFAULT '{}',
    start_time_ms INTEGER NOT NULL DEFAULT 0,
    end_time_ms INTEGER NOT NULL DEFAULT 0,
    created_at_ms INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_audit_results_probe ON audit_results(probe_id);
";

/// Relational store for configuration rows and alert history.
///
/// Time-series samples live in [`crate::tsdb::Tsdb`]; everything else the
/// core persists goes through here.
pub struct MetaStore {
    conn: Mutex<Connection>,
}

impl MetaStore {
    pub fn new(data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir)?;
        let conn = Connection::open(data_dir.join("meta.db"))?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Self::apply_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn apply_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(PROBES_SCHEMA)?;
        conn.execute_batch(HOST_SNAPSHOTS_SCHEMA)?;
        conn.execute_batch(ALERT_RULES_SCHEMA)?;
        conn.execute_batch(ALERT_RECORDS_SCHEMA)?;
        conn.execute_batch(AUDIT_RESULTS_SCHEMA)?;
        migrate(conn);
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // ---- probes ----

    pub fn upsert_probe(
        &self,
        id: &str,
        name: &str,
        os: &str,
        arch: &str,
        ip: &str,
        version: &str,
        now_ms: i64,
    ) -> Result<()> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO probes (id, name, os, arch, ip, version, last_seen_ms, created_at_ms)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)
             ON CONFLICT(id) DO UPDATE SET
                 name = excluded.name,
                 os = excluded.os,
                 arch = excluded.arch,
                 ip = excluded.ip,
                 version = excluded.version,
                 last_seen_ms = MAX(probes.last_seen_ms, excluded.last_seen_ms)",
            rusqlite::params![id, name, os, arch, ip, version, now_ms],
        )?;
        Ok(())
    }

    /// Advance `last_seen_ms`, never moving it backwards.
    pub fn touch_probe(&self, id: &str, now_ms: i64) -> Result<()> {
        let conn = self.lock();
        conn.execute(
            "UPDATE probes SET last_seen_ms = MAX(last_seen_ms, ?2) WHERE id = ?1",
            rusqlite::params![id, now_ms],
        )?;
        Ok(())
    }

    pub fn get_probe(&self, id: &str) -> Result<Option<Probe>> {
        let conn = self.lock();
        let probe = conn
            .query_row(
                "SELECT id, name, os, arch, ip, version, last_seen_ms, created_at_ms
                 FROM probes WHERE id = ?1",
                rusqlite::params![id],
                probe_from_row,
            )
            .optional()?;
        Ok(probe)
    }

    pub fn list_probes(&self) -> Result<Vec<Probe>> {
        let conn = self.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT id, name, os, arch, ip, version, last_seen_ms, created_at_ms
             FROM probes ORDER BY name ASC, id ASC",
        )?;
        let probes = stmt
            .query_map([], probe_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(probes)
    }

    // ---- host snapshots ----

    /// Only the latest snapshot is kept per probe; the previous row is
    /// deleted in the same transaction.
    pub fn save_host_snapshot(&self, snapshot: &HostSnapshot) -> Result<()> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM host_snapshots WHERE probe_id = ?1",
            rusqlite::params![&snapshot.probe_id],
        )?;
        tx.execute(
            "INSERT INTO host_snapshots (probe_id, hostname, os, platform, platform_version,
                 kernel_version, kernel_arch, uptime_secs, boot_time_secs, procs,
                 virtualization_system, virtualization_role, timestamp_ms)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            rusqlite::params![
                &snapshot.probe_id,
                &snapshot.hostname,
                &snapshot.os,
                &snapshot.platform,
                &snapshot.platform_version,
                &snapshot.kernel_version,
                &snapshot.kernel_arch,
                snapshot.uptime_secs as i64,
                snapshot.boot_time_secs as i64,
                snapshot.procs as i64,
                &snapshot.virtualization_system,
                &snapshot.virtualization_role,
                snapshot.timestamp_ms,
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    pub fn get_host_snapshot(&self, probe_id: &str) -> Result<Option<HostSnapshot>> {
        let conn = self.lock();
        let snapshot = conn
            .query_row(
                "SELECT probe_id, hostname, os, platform, platform_version, kernel_version,
                        kernel_arch, uptime_secs, boot_time_secs, procs,
                        virtualization_system, virtualization_role, timestamp_ms
                 FROM host_snapshots WHERE probe_id = ?1",
                rusqlite::params![probe_id],
                |row| {
                    Ok(HostSnapshot {
                        probe_id: row.get(0)?,
                        hostname: row.get(1)?,
                        os: row.get(2)?,
                        platform: row.get(3)?,
                        platform_version: row.get(4)?,
                        kernel_version: row.get(5)?,
                        kernel_arch: row.get(6)?,
                        uptime_secs: row.get::<_, i64>(7)? as u64,
                        boot_time_secs: row.get::<_, i64>(8)? as u64,
                        procs: row.get::<_, i64>(9)? as u64,
                        virtualization_system: row.get(10)?,
                        virtualization_role: row.get(11)?,
                        timestamp_ms: row.get(12)?,
                    })
                },
            )
            .optional()?;
        Ok(snapshot)
    }

    // ---- alert rules ----

    pub fn insert_alert_rule(&self, rule: &AlertRule, now_ms: i64) -> Result<()> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO alert_rules (id, name, kind, scope_json, threshold, duration_secs,
                 level, enabled, notify_json, created_at_ms, updated_at_ms)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)",
            rusqlite::params![
                &rule.id,
                &rule.name,
                rule.kind.as_str(),
                serde_json::to_string(&rule.scope)?,
                rule.threshold,
                rule.duration_secs,
                rule.level.to_string(),
                rule.enabled,
                serde_json::to_string(&rule.notify)?,
                now_ms,
            ],
        )?;
        Ok(())
    }

    pub fn set_rule_enabled(&self, rule_id: &str, enabled: bool, now_ms: i64) -> Result<bool> {
        let conn = self.lock();
        let updated = conn.execute(
            "UPDATE alert_rules SET enabled = ?2, updated_at_ms = ?3 WHERE id = ?1",
            rusqlite::params![rule_id, enabled, now_ms],
        )?;
        Ok(updated > 0)
    }

    pub fn delete_alert_rule(&self, rule_id: &str) -> Result<bool> {
        let conn = self.lock();
        let deleted = conn.execute(
            "DELETE FROM alert_rules WHERE id = ?1",
            rusqlite::params![rule_id],
        )?;
        Ok(deleted > 0)
    }

    pub fn list_alert_rules(&self) -> Result<Vec<AlertRule>> {
        let conn = self.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT id, name, kind, scope_json, threshold, duration_secs, level, enabled, notify_json
             FROM alert_rules ORDER BY created_at_ms ASC",
        )?;
        let mut rules = Vec::new();
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, f64>(4)?,
                row.get::<_, i64>(5)?,
                row.get::<_, String>(6)?,
                row.get::<_, bool>(7)?,
                row.get::<_, String>(8)?,
            ))
        })?;
        for row in rows {
            let (id, name, kind, scope_json, threshold, duration_secs, level, enabled, notify_json) =
                row?;
            let Ok(kind) = kind.parse::<AlertKind>() else {
                tracing::warn!(rule_id = %id, kind = %kind, "skipping rule with unknown kind");
                continue;
            };
            let scope: RuleScope =
                serde_json::from_str(&scope_json).unwrap_or(RuleScope::All);
            let notify: NotifySettings =
                serde_json::from_str(&notify_json).unwrap_or_default();
            rules.push(AlertRule {
                id,
                name,
                kind,
                scope,
                threshold,
                duration_secs: duration_secs as u32,
                level: level.parse().unwrap_or(Severity::Warning),
                enabled,
                notify,
            });
        }
        Ok(rules)
    }

    // ---- alert records ----

    /// Insert a firing record and return its assigned id.
    pub fn insert_alert_record(&self, record: &AlertRecord) -> Result<i64> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO alert_records (probe_id, rule_id, rule_name, kind, message, threshold,
                 actual_value, level, status, fired_at_ms, resolved_at_ms, updated_at_ms)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?10)",
            rusqlite::params![
                &record.probe_id,
                &record.rule_id,
                &record.rule_name,
                record.kind.as_str(),
                &record.message,
                record.threshold,
                record.actual_value,
                record.level.to_string(),
                record.status.to_string(),
                record.fired_at_ms,
                record.resolved_at_ms,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Flip a firing record to resolved. Returns false when the record does
    /// not exist or is already resolved, so a double resolve is a no-op.
    pub fn resolve_alert_record(
        &self,
        record_id: i64,
        actual_value: f64,
        resolved_at_ms: i64,
    ) -> Result<bool> {
        let conn = self.lock();
        let updated = conn.execute(
            "UPDATE alert_records
             SET status = 'resolved', actual_value = ?2, resolved_at_ms = ?3, updated_at_ms = ?3
             WHERE id = ?1 AND status = 'firing'",
            rusqlite::params![record_id, actual_value, resolved_at_ms],
        )?;
        Ok(updated > 0)
    }

    pub fn update_alert_record_value(
        &self,
        record_id: i64,
        actual_value: f64,
        now_ms: i64,
    ) -> Result<()> {
        let conn = self.lock();
        conn.execute(
            "UPDATE alert_records SET actual_value = ?2, updated_at_ms = ?3
             WHERE id = ?1 AND status = 'firing'",
            rusqlite::params![record_id, actual_value, now_ms],
        )?;
        Ok(())
    }

    pub fn get_alert_record(&self, record_id: i64) -> Result<Option<AlertRecord>> {
        let conn = self.lock();
        let record = conn
            .query_row(
                "SELECT id, probe_id, rule_id, rule_name, kind, message, threshold, actual_value,
                        level, status, fired_at_ms, resolved_at_ms
                 FROM alert_records WHERE id = ?1",
                rusqlite::params![record_id],
                record_from_row,
            )
            .optional()?;
        Ok(record)
    }

    pub fn list_alert_records(
        &self,
        probe_id: Option<&str>,
        status: Option<AlertStatus>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<AlertRecord>> {
        let conn = self.lock();
        let mut sql = String::from(
            "SELECT id, probe_id, rule_id, rule_name, kind, message, threshold, actual_value,
                    level, status, fired_at_ms, resolved_at_ms
             FROM alert_records WHERE 1=1",
        );
        let mut params: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();
        if let Some(probe) = probe_id {
            params.push(Box::new(probe.to_string()));
            sql.push_str(&format!(" AND probe_id = ?{}", params.len()));
        }
        if let Some(status) = status {
            params.push(Box::new(status.to_string()));
            sql.push_str(&format!(" AND status = ?{}", params.len()));
        }
        params.push(Box::new(limit as i64));
        sql.push_str(&format!(" ORDER BY fired_at_ms DESC LIMIT ?{}", params.len()));
        params.push(Box::new(offset as i64));
        sql.push_str(&format!(" OFFSET ?{}", params.len()));

        let mut stmt = conn.prepare(&sql)?;
        let param_refs: Vec<&dyn rusqlite::types::ToSql> =
            params.iter().map(|p| p.as_ref()).collect();
        let records = stmt
            .query_map(param_refs.as_slice(), record_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    /// Firing records, used to rebuild evaluator state on boot.
    pub fn unresolved_alert_records(&self) -> Result<Vec<AlertRecord>> {
        let conn = self.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT id, probe_id, rule_id, rule_name, kind, message, threshold, actual_value,
                    level, status, fired_at_ms, resolved_at_ms
             FROM alert_records WHERE status = 'firing' ORDER BY fired_at_ms ASC",
        )?;
        let records = stmt
            .query_map([], record_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    // ---- audit results ----

    pub fn insert_audit_result(
        &self,
        probe_id: &str,
        audit_type: &str,
        result_json: &str,
        start_time_ms: i64,
        end_time_ms: i64,
        now_ms: i64,
    ) -> Result<i64> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO audit_results (probe_id, audit_type, result, start_time_ms, end_time_ms, created_at_ms)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![probe_id, audit_type, result_json, start_time_ms, end_time_ms, now_ms],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn count_audit_results(&self, probe_id: &str) -> Result<u64> {
        let conn = self.lock();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM audit_results WHERE probe_id = ?1",
            rusqlite::params![probe_id],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }
}

fn probe_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Probe> {
    Ok(Probe {
        id: row.get(0)?,
        name: row.get(1)?,
        os: row.get(2)?,
        arch: row.get(3)?,
        ip: row.get(4)?,
        version: row.get(5)?,
        last_seen_ms: row.get(6)?,
        created_at_ms: row.get(7)?,
    })
}

fn record_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<AlertRecord> {
    let kind: String = row.get(4)?;
    let level: String = row.get(8)?;
    let status: String = row.get(9)?;
    Ok(AlertRecord {
        id: row.get(0)?,
        probe_id: row.get(1)?,
        rule_id: row.get(2)?,
        rule_name: row.get(3)?,
        kind: kind.parse().unwrap_or(AlertKind::Cpu),
        message: row.get(5)?,
        threshold: row.get(6)?,
        actual_value: row.get(7)?,
        level: level.parse().unwrap_or(Severity::Warning),
        status: status.parse().unwrap_or(AlertStatus::Firing),
        fired_at_ms: row.get(10)?,
        resolved_at_ms: row.get(11)?,
    })
}

/// Additive column migrations for older databases. `ALTER TABLE ADD COLUMN`
/// fails when the column exists; those errors are ignored.
fn migrate(conn: &Connection) {
    let _ = conn.execute_batch(
        "ALTER TABLE probes ADD COLUMN version TEXT NOT NULL DEFAULT '';",
    );
    let _ = conn.execute_batch(
        "ALTER TABLE host_snapshots ADD COLUMN virtualization_system TEXT NOT NULL DEFAULT '';",
    );
    let _ = conn.execute_batch(
        "ALTER TABLE host_snapshots ADD COLUMN virtualization_role TEXT NOT NULL DEFAULT '';",
    );
    let _ = conn.execute_batch(
        "ALTER TABLE alert_rules ADD COLUMN notify_json TEXT NOT NULL DEFAULT '{}';",
    );
}

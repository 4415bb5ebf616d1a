use crate::meta::MetaStore;
use crate::tsdb::{Aggregation, RangeQuery, Tsdb};
use chrono::{Duration, Utc};
use std::collections::HashMap;
use tempfile::TempDir;
use vigil_common::types::{
    AlertKind, AlertRecord, AlertRule, AlertStatus, HostSnapshot, NotifySettings, RuleScope,
    Sample, Severity,
};

fn setup_tsdb() -> (TempDir, Tsdb) {
    let dir = TempDir::new().unwrap();
    let tsdb = Tsdb::new(dir.path()).unwrap();
    (dir, tsdb)
}

fn setup_meta() -> (TempDir, MetaStore) {
    let dir = TempDir::new().unwrap();
    let meta = MetaStore::new(dir.path()).unwrap();
    (dir, meta)
}

fn make_samples(probe: &str, name: &str, values: &[(f64, i64)]) -> Vec<Sample> {
    let now_ms = Utc::now().timestamp_millis();
    values
        .iter()
        .map(|(value, secs_ago)| Sample::new(name, probe, *value, now_ms - secs_ago * 1000))
        .collect()
}

#[tokio::test]
async fn write_and_query_range() {
    let (_dir, tsdb) = setup_tsdb();

    let samples = make_samples("web-01", "cpu_usage_percent", &[(95.0, 10), (90.0, 5), (85.0, 0)]);
    tsdb.write(&samples).await.unwrap();

    let now_ms = Utc::now().timestamp_millis();
    let points = tsdb
        .query_range(&RangeQuery {
            name: "cpu_usage_percent".into(),
            probe_id: Some("web-01".into()),
            label_filters: HashMap::new(),
            start_ms: now_ms - 60_000,
            end_ms: now_ms + 1000,
            step_ms: 3_600_000,
            agg: Aggregation::Max,
        })
        .unwrap();

    assert_eq!(points.len(), 1);
    assert_eq!(points[0].value, 95.0);
}

#[tokio::test]
async fn query_range_respects_step_buckets_and_aggregation() {
    let (_dir, tsdb) = setup_tsdb();

    // Two samples in bucket 0, one in bucket 10_000.
    let samples = vec![
        Sample::new("memory_usage_percent", "p1", 10.0, 1_000),
        Sample::new("memory_usage_percent", "p1", 30.0, 2_000),
        Sample::new("memory_usage_percent", "p1", 50.0, 12_000),
    ];
    tsdb.write(&samples).await.unwrap();

    let points = tsdb
        .query_range(&RangeQuery {
            name: "memory_usage_percent".into(),
            probe_id: Some("p1".into()),
            label_filters: HashMap::new(),
            start_ms: 0,
            end_ms: 20_000,
            step_ms: 10_000,
            agg: Aggregation::Avg,
        })
        .unwrap();

    assert_eq!(points.len(), 2);
    assert_eq!(points[0].timestamp_ms, 0);
    assert_eq!(points[0].value, 20.0);
    assert_eq!(points[1].timestamp_ms, 10_000);
    assert_eq!(points[1].value, 50.0);
}

#[tokio::test]
async fn query_range_filters_on_labels() {
    let (_dir, tsdb) = setup_tsdb();

    let samples = vec![
        Sample::new("disk_usage_percent", "p1", 40.0, 5_000).with_label("mount_point", "/"),
        Sample::new("disk_usage_percent", "p1", 90.0, 5_000).with_label("mount_point", "/data"),
    ];
    tsdb.write(&samples).await.unwrap();

    let mut filters = HashMap::new();
    filters.insert("mount_point".to_string(), "/data".to_string());
    let points = tsdb
        .query_range(&RangeQuery {
            name: "disk_usage_percent".into(),
            probe_id: Some("p1".into()),
            label_filters: filters,
            start_ms: 0,
            end_ms: 10_000,
            step_ms: 10_000,
            agg: Aggregation::Last,
        })
        .unwrap();

    assert_eq!(points.len(), 1);
    assert_eq!(points[0].value, 90.0);
}

#[tokio::test]
async fn query_range_rejects_bad_step() {
    let (_dir, tsdb) = setup_tsdb();
    let err = tsdb
        .query_range(&RangeQuery {
            name: "cpu_usage_percent".into(),
            probe_id: None,
            label_filters: HashMap::new(),
            start_ms: 0,
            end_ms: 1000,
            step_ms: 0,
            agg: Aggregation::Avg,
        })
        .unwrap_err();
    assert!(!err.is_transient());
}

fn fixed_now() -> chrono::DateTime<Utc> {
    chrono::DateTime::parse_from_rfc3339("2024-06-15T12:00:00Z")
        .unwrap()
        .with_timezone(&Utc)
}

#[tokio::test]
async fn sweep_deletes_only_expired_samples() {
    let (_dir, tsdb) = setup_tsdb();
    let now = fixed_now();
    let horizon_ms = Duration::days(30).num_milliseconds();

    let keep = Sample::new(
        "cpu_usage_percent",
        "p1",
        50.0,
        (now - Duration::days(29)).timestamp_millis(),
    );
    let expired = Sample::new(
        "cpu_usage_percent",
        "p1",
        60.0,
        (now - Duration::days(31)).timestamp_millis(),
    );
    tsdb.write(&[keep, expired]).await.unwrap();

    let outcome = tsdb.sweep_expired(horizon_ms, now).unwrap();
    assert!(outcome.partitions_removed >= 1 || outcome.rows_removed >= 1);

    let points = tsdb
        .query_range(&RangeQuery {
            name: "cpu_usage_percent".into(),
            probe_id: Some("p1".into()),
            label_filters: HashMap::new(),
            start_ms: (now - Duration::days(40)).timestamp_millis(),
            end_ms: now.timestamp_millis(),
            step_ms: 1,
            agg: Aggregation::Last,
        })
        .unwrap();

    assert_eq!(points.len(), 1);
    assert_eq!(points[0].value, 50.0);
}

#[tokio::test]
async fn sweep_trims_boundary_partition_rows() {
    let (_dir, tsdb) = setup_tsdb();
    // now is 12:00 UTC, so the cutoff lands mid-partition and both samples
    // share the boundary day: one just inside the horizon, one just outside.
    let now = fixed_now();
    let horizon_ms = Duration::hours(6).num_milliseconds();
    let cutoff = now - Duration::hours(6);

    let keep = Sample::new(
        "cpu_usage_percent",
        "p1",
        1.0,
        (cutoff + Duration::minutes(1)).timestamp_millis(),
    );
    let expired = Sample::new(
        "cpu_usage_percent",
        "p1",
        2.0,
        (cutoff - Duration::minutes(1)).timestamp_millis(),
    );
    tsdb.write(&[keep, expired]).await.unwrap();

    let outcome = tsdb.sweep_expired(horizon_ms, now).unwrap();
    assert_eq!(outcome.rows_removed, 1);

    let points = tsdb
        .query_range(&RangeQuery {
            name: "cpu_usage_percent".into(),
            probe_id: Some("p1".into()),
            label_filters: HashMap::new(),
            start_ms: (now - Duration::days(2)).timestamp_millis(),
            end_ms: now.timestamp_millis(),
            step_ms: 1,
            agg: Aggregation::Last,
        })
        .unwrap();
    assert_eq!(points.len(), 1);
    assert_eq!(points[0].value, 1.0);
}

#[test]
fn probe_upsert_and_monotonic_last_seen() {
    let (_dir, meta) = setup_meta();

    meta.upsert_probe("p1", "web", "linux", "amd64", "10.0.0.1", "1.0.0", 1000)
        .unwrap();
    meta.touch_probe("p1", 2000).unwrap();
    // A stale touch must not move last_seen backwards.
    meta.touch_probe("p1", 1500).unwrap();

    let probe = meta.get_probe("p1").unwrap().unwrap();
    assert_eq!(probe.last_seen_ms, 2000);
    assert_eq!(probe.name, "web");

    // Re-register updates metadata, keeps created_at.
    meta.upsert_probe("p1", "web-renamed", "linux", "amd64", "10.0.0.2", "1.1.0", 3000)
        .unwrap();
    let probe = meta.get_probe("p1").unwrap().unwrap();
    assert_eq!(probe.name, "web-renamed");
    assert_eq!(probe.created_at_ms, 1000);
    assert_eq!(probe.last_seen_ms, 3000);
}

#[test]
fn host_snapshot_keeps_only_latest() {
    let (_dir, meta) = setup_meta();

    let mut snapshot = HostSnapshot {
        probe_id: "p1".into(),
        hostname: "host-a".into(),
        os: "linux".into(),
        platform: "debian".into(),
        platform_version: "12".into(),
        kernel_version: "6.1".into(),
        kernel_arch: "x86_64".into(),
        uptime_secs: 100,
        boot_time_secs: 1_700_000_000,
        procs: 42,
        virtualization_system: "kvm".into(),
        virtualization_role: "guest".into(),
        timestamp_ms: 1000,
    };
    meta.save_host_snapshot(&snapshot).unwrap();

    snapshot.hostname = "host-b".into();
    snapshot.timestamp_ms = 2000;
    meta.save_host_snapshot(&snapshot).unwrap();

    let loaded = meta.get_host_snapshot("p1").unwrap().unwrap();
    assert_eq!(loaded.hostname, "host-b");
    assert_eq!(loaded.timestamp_ms, 2000);
}

fn sample_rule(id: &str, kind: AlertKind) -> AlertRule {
    AlertRule {
        id: id.into(),
        name: format!("{kind} high"),
        kind,
        scope: RuleScope::All,
        threshold: 80.0,
        duration_secs: 60,
        level: Severity::Warning,
        enabled: true,
        notify: NotifySettings::default(),
    }
}

#[test]
fn alert_rules_round_trip() {
    let (_dir, meta) = setup_meta();

    let mut rule = sample_rule("r1", AlertKind::Cpu);
    rule.scope = RuleScope::Probes(vec!["p1".into(), "p2".into()]);
    rule.notify.ding_talk_enabled = true;
    rule.notify.ding_talk_webhook = "https://example.com/hook".into();
    meta.insert_alert_rule(&rule, 1000).unwrap();
    meta.insert_alert_rule(&sample_rule("r2", AlertKind::Memory), 2000)
        .unwrap();

    let rules = meta.list_alert_rules().unwrap();
    assert_eq!(rules.len(), 2);
    assert_eq!(rules[0].id, "r1");
    assert_eq!(rules[0].scope, RuleScope::Probes(vec!["p1".into(), "p2".into()]));
    assert!(rules[0].notify.ding_talk_enabled);

    assert!(meta.set_rule_enabled("r2", false, 3000).unwrap());
    let rules = meta.list_alert_rules().unwrap();
    assert!(!rules[1].enabled);

    assert!(meta.delete_alert_rule("r2").unwrap());
    assert_eq!(meta.list_alert_rules().unwrap().len(), 1);
}

fn firing_record(probe: &str, rule: &str) -> AlertRecord {
    AlertRecord {
        id: 0,
        probe_id: probe.into(),
        rule_id: rule.into(),
        rule_name: "cpu high".into(),
        kind: AlertKind::Cpu,
        message: "cpu usage over threshold".into(),
        threshold: 80.0,
        actual_value: 91.0,
        level: Severity::Critical,
        status: AlertStatus::Firing,
        fired_at_ms: 1000,
        resolved_at_ms: None,
    }
}

#[test]
fn alert_record_lifecycle() {
    let (_dir, meta) = setup_meta();

    let id = meta.insert_alert_record(&firing_record("p1", "r1")).unwrap();
    assert!(id > 0);

    let unresolved = meta.unresolved_alert_records().unwrap();
    assert_eq!(unresolved.len(), 1);
    assert_eq!(unresolved[0].id, id);

    assert!(meta.resolve_alert_record(id, 75.0, 5000).unwrap());
    // Second resolve on the same record is a no-op.
    assert!(!meta.resolve_alert_record(id, 75.0, 6000).unwrap());

    let record = meta.get_alert_record(id).unwrap().unwrap();
    assert_eq!(record.status, AlertStatus::Resolved);
    assert_eq!(record.resolved_at_ms, Some(5000));
    assert_eq!(record.actual_value, 75.0);

    assert!(meta.unresolved_alert_records().unwrap().is_empty());
}

#[test]
fn alert_record_listing_filters() {
    let (_dir, meta) = setup_meta();

    let a = meta.insert_alert_record(&firing_record("p1", "r1")).unwrap();
    let _b = meta.insert_alert_record(&firing_record("p2", "r1")).unwrap();
    meta.resolve_alert_record(a, 70.0, 2000).unwrap();

    let firing = meta
        .list_alert_records(None, Some(AlertStatus::Firing), 10, 0)
        .unwrap();
    assert_eq!(firing.len(), 1);
    assert_eq!(firing[0].probe_id, "p2");

    let p1_records = meta.list_alert_records(Some("p1"), None, 10, 0).unwrap();
    assert_eq!(p1_records.len(), 1);
    assert_eq!(p1_records[0].status, AlertStatus::Resolved);
}

#[test]
fn audit_results_persist() {
    let (_dir, meta) = setup_meta();
    meta.insert_audit_result("p1", "vps_audit", r#"{"checks":[]}"#, 100, 200, 300)
        .unwrap();
    assert_eq!(meta.count_audit_results("p1").unwrap(), 1);
    assert_eq!(meta.count_audit_results("p2").unwrap(), 0);
}

use crate::convert;
use crate::session::now_ms;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing;
use vigil_alert::Observation;
use vigil_common::proto::{
    AuditResultPayload, Frame, FrameType, HostInfoPayload, MetricKind, MetricsEnvelope,
    RegisterPayload,
};
use vigil_common::types::{AlertKind, HostSnapshot, Sample};
use vigil_storage::{MetaStore, Tsdb};

/// How long the sample store may fail continuously before the single
/// fatal-condition event is raised.
const STORE_FATAL_AFTER_MS: i64 = 60_000;

/// Dispatches parsed inbound frames: persistence, conversion, and the
/// evaluator feed. Downstream failures are logged and never tear the
/// session down.
pub struct IngestHandler {
    meta: Arc<MetaStore>,
    tsdb: Arc<Tsdb>,
    feed: mpsc::Sender<Observation>,
    store_failing_since_ms: std::sync::atomic::AtomicI64,
    store_fatal_raised: std::sync::atomic::AtomicBool,
}

impl IngestHandler {
    pub fn new(meta: Arc<MetaStore>, tsdb: Arc<Tsdb>, feed: mpsc::Sender<Observation>) -> Self {
        Self {
            meta,
            tsdb,
            feed,
            store_failing_since_ms: std::sync::atomic::AtomicI64::new(0),
            store_fatal_raised: std::sync::atomic::AtomicBool::new(false),
        }
    }

    /// Degrade tracking: probes keep being served and alerts keep
    /// evaluating from in-memory values while the store is down; one
    /// fatal-condition event is emitted per outage.
    fn note_store_failure(&self, at_ms: i64) {
        use std::sync::atomic::Ordering;
        let since = self.store_failing_since_ms.load(Ordering::Relaxed);
        if since == 0 {
            self.store_failing_since_ms.store(at_ms, Ordering::Relaxed);
            return;
        }
        if at_ms - since >= STORE_FATAL_AFTER_MS
            && !self.store_fatal_raised.swap(true, Ordering::Relaxed)
        {
            tracing::error!(
                event = "tsdb_backend_down",
                failing_for_ms = at_ms - since,
                "sample store unavailable, dropping metrics while degraded"
            );
        }
    }

    fn note_store_success(&self) {
        use std::sync::atomic::Ordering;
        self.store_failing_since_ms.store(0, Ordering::Relaxed);
        if self.store_fatal_raised.swap(false, Ordering::Relaxed) {
            tracing::info!(event = "tsdb_backend_recovered", "sample store writes succeeding again");
        }
    }

    /// Upsert the probe row from a register payload.
    pub fn handle_register(&self, reg: &RegisterPayload, ip: &str, at_ms: i64) {
        if let Err(e) = self.meta.upsert_probe(
            &reg.id,
            &reg.name,
            &reg.os,
            &reg.arch,
            ip,
            &reg.version,
            at_ms,
        ) {
            tracing::error!(probe_id = %reg.id, error = %e, "failed to upsert probe");
        }
    }

    pub async fn handle_frame(&self, probe_id: &str, frame: Frame, at_ms: i64) {
        if let Err(e) = self.meta.touch_probe(probe_id, at_ms) {
            tracing::error!(probe_id = %probe_id, error = %e, "failed to advance last_seen");
        }

        match frame.frame_type {
            FrameType::Register => {
                // Metadata refresh over an already-registered socket.
                match serde_json::from_value::<RegisterPayload>(frame.data) {
                    Ok(reg) if reg.id == probe_id => self.handle_register(&reg, &reg.ip, at_ms),
                    Ok(reg) => tracing::warn!(
                        probe_id = %probe_id,
                        claimed = %reg.id,
                        "register frame with mismatched probe id, ignoring"
                    ),
                    Err(e) => tracing::warn!(probe_id = %probe_id, error = %e, "bad register payload"),
                }
            }
            FrameType::Heartbeat => {
                // last_seen already advanced above.
            }
            FrameType::Metrics => self.handle_metrics(probe_id, frame.data, at_ms).await,
            FrameType::AuditResult => self.handle_audit_result(probe_id, frame.data),
            FrameType::CommandAck | FrameType::Ping | FrameType::Pong => {
                tracing::debug!(probe_id = %probe_id, kind = frame.frame_type.as_str(), "control frame");
            }
            FrameType::Unknown => {
                tracing::warn!(probe_id = %probe_id, "unknown frame type, ignoring");
            }
        }
    }

    async fn handle_metrics(&self, probe_id: &str, data: Value, at_ms: i64) {
        let envelope: MetricsEnvelope = match serde_json::from_value(data) {
            Ok(env) => env,
            Err(e) => {
                tracing::warn!(probe_id = %probe_id, error = %e, "bad metrics envelope, skipping");
                return;
            }
        };
        let ts_ms = if envelope.timestamp > 0 {
            envelope.timestamp
        } else {
            at_ms
        };

        if envelope.kind == MetricKind::HostInfo {
            self.save_host_snapshot(probe_id, &envelope.data, ts_ms);
            return;
        }

        let samples = convert::convert(probe_id, envelope.kind, &envelope.data, ts_ms);
        if samples.is_empty() {
            return;
        }

        // Feed the primary scalar to the evaluator before the store write:
        // alerting keeps working from in-memory values even when the
        // backend is degraded.
        if let Some((kind, value)) = primary_scalar(envelope.kind, &samples) {
            let obs = Observation {
                probe_id: probe_id.to_string(),
                kind,
                value,
                at_ms: ts_ms,
            };
            if self.feed.send(obs).await.is_err() {
                tracing::warn!(probe_id = %probe_id, "evaluator feed closed, dropping observation");
            }
        }

        let count = samples.len();
        match self.tsdb.write(&samples).await {
            Ok(()) => self.note_store_success(),
            Err(e) => {
                tracing::error!(
                    probe_id = %probe_id,
                    count,
                    error = %e,
                    "failed to write samples, dropping batch"
                );
                self.note_store_failure(at_ms);
            }
        }
    }

    fn save_host_snapshot(&self, probe_id: &str, data: &Value, ts_ms: i64) {
        let payload: HostInfoPayload = match serde_json::from_value(data.clone()) {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(probe_id = %probe_id, error = %e, "bad host_info payload, skipping");
                return;
            }
        };
        let snapshot = HostSnapshot {
            probe_id: probe_id.to_string(),
            hostname: payload.hostname,
            os: payload.os,
            platform: payload.platform,
            platform_version: payload.platform_version,
            kernel_version: payload.kernel_version,
            kernel_arch: payload.kernel_arch,
            uptime_secs: payload.uptime,
            boot_time_secs: payload.boot_time,
            procs: payload.procs,
            virtualization_system: payload.virtualization_system,
            virtualization_role: payload.virtualization_role,
            timestamp_ms: ts_ms,
        };
        if let Err(e) = self.meta.save_host_snapshot(&snapshot) {
            tracing::error!(probe_id = %probe_id, error = %e, "failed to save host snapshot");
        }
    }

    fn handle_audit_result(&self, probe_id: &str, data: Value) {
        let payload: AuditResultPayload = match serde_json::from_value(data) {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(probe_id = %probe_id, error = %e, "bad audit_result payload, skipping");
                return;
            }
        };
        let result_json = payload.result.to_string();
        if let Err(e) = self.meta.insert_audit_result(
            probe_id,
            &payload.audit_type,
            &result_json,
            payload.start_time,
            payload.end_time,
            now_ms(),
        ) {
            tracing::error!(probe_id = %probe_id, error = %e, "failed to persist audit result");
        }
    }
}

/// Extract the per-probe scalar the alert evaluator consumes: cpu and
/// memory usage directly, disk as the worst mount point.
fn primary_scalar(kind: MetricKind, samples: &[Sample]) -> Option<(AlertKind, f64)> {
    match kind {
        MetricKind::Cpu => samples
            .iter()
            .find(|s| s.name == "cpu_usage_percent")
            .map(|s| (AlertKind::Cpu, s.value)),
        MetricKind::Memory => samples
            .iter()
            .find(|s| s.name == "memory_usage_percent")
            .map(|s| (AlertKind::Memory, s.value)),
        MetricKind::Disk => samples
            .iter()
            .filter(|s| s.name == "disk_usage_percent")
            .map(|s| s.value)
            .fold(None, |acc: Option<f64>, v| {
                Some(acc.map_or(v, |a| a.max(v)))
            })
            .map(|v| (AlertKind::Disk, v)),
        _ => None,
    }
}

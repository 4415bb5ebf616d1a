//! Translation of probe-native metric payloads into labelled samples.
//!
//! `convert` is a pure function over its inputs: identical payloads yield
//! identical sample sets. Unknown kinds and undecodable payloads are
//! logged and dropped; unknown fields inside payloads are ignored by the
//! tolerant payload structs.

use serde_json::Value;
use tracing;
use vigil_common::proto::{
    CpuPayload, DiskEntry, DiskIoEntry, GpuEntry, LoadPayload, MemoryPayload, MetricKind,
    MonitorPayload, NetworkConnPayload, NetworkEntry, TemperatureEntry,
};
use vigil_common::types::Sample;

const MIB: u64 = 1024 * 1024;

pub fn convert(probe_id: &str, kind: MetricKind, body: &Value, ts_ms: i64) -> Vec<Sample> {
    match kind {
        MetricKind::Cpu => cpu(probe_id, body, ts_ms),
        MetricKind::Memory => memory(probe_id, body, ts_ms),
        MetricKind::Disk => disk(probe_id, body, ts_ms),
        MetricKind::Network => network(probe_id, body, ts_ms),
        MetricKind::NetworkConn => network_conn(probe_id, body, ts_ms),
        MetricKind::DiskIo => disk_io(probe_id, body, ts_ms),
        MetricKind::Gpu => gpu(probe_id, body, ts_ms),
        MetricKind::Temperature => temperature(probe_id, body, ts_ms),
        MetricKind::Load => load(probe_id, body, ts_ms),
        MetricKind::Monitor => monitor(probe_id, body, ts_ms),
        // host_info is a snapshot upsert, not a sample source.
        MetricKind::HostInfo => Vec::new(),
        MetricKind::Unknown => {
            tracing::warn!(probe_id = %probe_id, "unknown metric kind, dropping payload");
            Vec::new()
        }
    }
}

fn decode<T: serde::de::DeserializeOwned>(probe_id: &str, kind: &str, body: &Value) -> Option<T> {
    match serde_json::from_value(body.clone()) {
        Ok(payload) => Some(payload),
        Err(e) => {
            tracing::warn!(
                probe_id = %probe_id,
                kind = %kind,
                error = %e,
                "failed to decode metric payload, dropping"
            );
            None
        }
    }
}

fn cpu(probe_id: &str, body: &Value, ts: i64) -> Vec<Sample> {
    let Some(p) = decode::<CpuPayload>(probe_id, "cpu", body) else {
        return Vec::new();
    };
    vec![
        Sample::new("cpu_usage_percent", probe_id, p.usage_percent, ts),
        Sample::new("cpu_cores_logical", probe_id, p.logical_cores as f64, ts),
        Sample::new("cpu_cores_physical", probe_id, p.physical_cores as f64, ts),
    ]
}

fn memory(probe_id: &str, body: &Value, ts: i64) -> Vec<Sample> {
    let Some(p) = decode::<MemoryPayload>(probe_id, "memory", body) else {
        return Vec::new();
    };
    vec![
        Sample::new("memory_usage_percent", probe_id, p.usage_percent, ts),
        Sample::new("memory_total_bytes", probe_id, p.total as f64, ts),
        Sample::new("memory_used_bytes", probe_id, p.used as f64, ts),
        Sample::new("memory_available_bytes", probe_id, p.available as f64, ts),
        Sample::new("memory_swap_total_bytes", probe_id, p.swap_total as f64, ts),
        Sample::new("memory_swap_used_bytes", probe_id, p.swap_used as f64, ts),
    ]
}

fn disk(probe_id: &str, body: &Value, ts: i64) -> Vec<Sample> {
    let Some(entries) = decode::<Vec<DiskEntry>>(probe_id, "disk", body) else {
        return Vec::new();
    };
    let mut samples = Vec::with_capacity(entries.len() * 4);
    for e in &entries {
        let mount = e.mount_point.as_str();
        samples.push(
            Sample::new("disk_usage_percent", probe_id, e.usage_percent, ts)
                .with_label("mount_point", mount),
        );
        samples.push(
            Sample::new("disk_total_bytes", probe_id, e.total as f64, ts)
                .with_label("mount_point", mount),
        );
        samples.push(
            Sample::new("disk_used_bytes", probe_id, e.used as f64, ts)
                .with_label("mount_point", mount),
        );
        samples.push(
            Sample::new("disk_free_bytes", probe_id, e.free as f64, ts)
                .with_label("mount_point", mount),
        );
    }
    samples
}

fn network(probe_id: &str, body: &Value, ts: i64) -> Vec<Sample> {
    let Some(entries) = decode::<Vec<NetworkEntry>>(probe_id, "network", body) else {
        return Vec::new();
    };
    let mut samples = Vec::with_capacity(entries.len() * 4);
    for e in &entries {
        let iface = e.interface.as_str();
        samples.push(
            Sample::new("network_sent_bytes_rate", probe_id, e.bytes_sent_rate as f64, ts)
                .with_label("interface", iface),
        );
        samples.push(
            Sample::new("network_recv_bytes_rate", probe_id, e.bytes_recv_rate as f64, ts)
                .with_label("interface", iface),
        );
        samples.push(
            Sample::new("network_sent_bytes_total", probe_id, e.bytes_sent_total as f64, ts)
                .with_label("interface", iface),
        );
        samples.push(
            Sample::new("network_recv_bytes_total", probe_id, e.bytes_recv_total as f64, ts)
                .with_label("interface", iface),
        );
    }
    samples
}

fn network_conn(probe_id: &str, body: &Value, ts: i64) -> Vec<Sample> {
    let Some(p) = decode::<NetworkConnPayload>(probe_id, "network_conn", body) else {
        return Vec::new();
    };
    let total = if p.total > 0 {
        p.total
    } else {
        p.established + p.syn_sent + p.syn_recv + p.time_wait + p.close_wait
    };
    vec![
        Sample::new("network_conn_established", probe_id, p.established as f64, ts),
        Sample::new("network_conn_syn_sent", probe_id, p.syn_sent as f64, ts),
        Sample::new("network_conn_syn_recv", probe_id, p.syn_recv as f64, ts),
        Sample::new("network_conn_time_wait", probe_id, p.time_wait as f64, ts),
        Sample::new("network_conn_close_wait", probe_id, p.close_wait as f64, ts),
        Sample::new("network_conn_total", probe_id, total as f64, ts),
    ]
}

fn disk_io(probe_id: &str, body: &Value, ts: i64) -> Vec<Sample> {
    let Some(entries) = decode::<Vec<DiskIoEntry>>(probe_id, "disk_io", body) else {
        return Vec::new();
    };
    // Summed across devices.
    let read: u64 = entries.iter().map(|e| e.read_bytes_rate).sum();
    let write: u64 = entries.iter().map(|e| e.write_bytes_rate).sum();
    vec![
        Sample::new("disk_read_bytes_rate", probe_id, read as f64, ts),
        Sample::new("disk_write_bytes_rate", probe_id, write as f64, ts),
    ]
}

fn gpu(probe_id: &str, body: &Value, ts: i64) -> Vec<Sample> {
    let Some(entries) = decode::<Vec<GpuEntry>>(probe_id, "gpu", body) else {
        return Vec::new();
    };
    let mut samples = Vec::with_capacity(entries.len() * 5);
    for e in &entries {
        let index = e.index.to_string();
        let with_labels = |s: Sample| s.with_label("gpu_index", &index).with_label("gpu_name", &e.name);
        samples.push(with_labels(Sample::new(
            "gpu_utilization_percent",
            probe_id,
            e.utilization_percent,
            ts,
        )));
        // nvidia-smi reports memory in MiB; samples are bytes.
        samples.push(with_labels(Sample::new(
            "gpu_memory_total_bytes",
            probe_id,
            (e.memory_total_mib * MIB) as f64,
            ts,
        )));
        samples.push(with_labels(Sample::new(
            "gpu_memory_used_bytes",
            probe_id,
            (e.memory_used_mib * MIB) as f64,
            ts,
        )));
        samples.push(with_labels(Sample::new(
            "gpu_temperature_celsius",
            probe_id,
            e.temperature,
            ts,
        )));
        samples.push(with_labels(Sample::new(
            "gpu_power_draw_watts",
            probe_id,
            e.power_draw,
            ts,
        )));
    }
    samples
}

fn temperature(probe_id: &str, body: &Value, ts: i64) -> Vec<Sample> {
    let Some(entries) = decode::<Vec<TemperatureEntry>>(probe_id, "temperature", body) else {
        return Vec::new();
    };
    entries
        .iter()
        .map(|e| {
            Sample::new("temperature_celsius", probe_id, e.temperature, ts)
                .with_label("sensor_label", &e.sensor_label)
        })
        .collect()
}

fn load(probe_id: &str, body: &Value, ts: i64) -> Vec<Sample> {
    let Some(p) = decode::<LoadPayload>(probe_id, "load", body) else {
        return Vec::new();
    };
    vec![
        Sample::new("load_1m", probe_id, p.load1, ts),
        Sample::new("load_5m", probe_id, p.load5, ts),
        Sample::new("load_15m", probe_id, p.load15, ts),
    ]
}

fn monitor(probe_id: &str, body: &Value, ts: i64) -> Vec<Sample> {
    let Some(p) = decode::<MonitorPayload>(probe_id, "monitor", body) else {
        return Vec::new();
    };
    vec![
        Sample::new("monitor_response_time_ms", probe_id, p.response_time_ms, ts)
            .with_label("monitor_id", &p.monitor_id)
            .with_label("monitor_type", &p.monitor_type)
            .with_label("target", &p.target),
    ]
}

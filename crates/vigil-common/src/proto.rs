//! JSON wire protocol spoken by probes over the persistent socket.
//!
//! Every frame is a `{"type": ..., "data": ...}` envelope; `metrics`
//! frames nest a second `{"type": ..., "data": ..., "timestamp": ...}`
//! envelope carrying a kind-specific payload. Payload structs default
//! every field so partial or newer probe payloads never fail to decode.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameType {
    Register,
    Heartbeat,
    Metrics,
    AuditResult,
    CommandAck,
    Ping,
    Pong,
    #[serde(other)]
    Unknown,
}

impl FrameType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FrameType::Register => "register",
            FrameType::Heartbeat => "heartbeat",
            FrameType::Metrics => "metrics",
            FrameType::AuditResult => "audit_result",
            FrameType::CommandAck => "command_ack",
            FrameType::Ping => "ping",
            FrameType::Pong => "pong",
            FrameType::Unknown => "unknown",
        }
    }
}

/// Top-level frame envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    #[serde(rename = "type")]
    pub frame_type: FrameType,
    #[serde(default)]
    pub data: Value,
}

impl Frame {
    pub fn new(frame_type: FrameType, data: Value) -> Self {
        Self { frame_type, data }
    }
}

/// The discriminant inside a `metrics` frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    Cpu,
    Memory,
    Disk,
    Network,
    NetworkConn,
    DiskIo,
    Gpu,
    Temperature,
    Load,
    HostInfo,
    Monitor,
    #[serde(other)]
    Unknown,
}

impl MetricKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Cpu => "cpu",
            MetricKind::Memory => "memory",
            MetricKind::Disk => "disk",
            MetricKind::Network => "network",
            MetricKind::NetworkConn => "network_conn",
            MetricKind::DiskIo => "disk_io",
            MetricKind::Gpu => "gpu",
            MetricKind::Temperature => "temperature",
            MetricKind::Load => "load",
            MetricKind::HostInfo => "host_info",
            MetricKind::Monitor => "monitor",
            MetricKind::Unknown => "unknown",
        }
    }
}

/// Inner envelope of a `metrics` frame. `timestamp` is the probe-side
/// capture time in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsEnvelope {
    #[serde(rename = "type")]
    pub kind: MetricKind,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub timestamp: i64,
}

/// Payload of a `register` frame.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RegisterPayload {
    pub id: String,
    pub name: String,
    pub os: String,
    pub arch: String,
    pub ip: String,
    pub version: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CpuPayload {
    pub usage_percent: f64,
    pub logical_cores: u64,
    pub physical_cores: u64,
    pub model_name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MemoryPayload {
    pub total: u64,
    pub used: u64,
    pub free: u64,
    pub available: u64,
    pub usage_percent: f64,
    pub cached: u64,
    pub buffers: u64,
    pub swap_total: u64,
    pub swap_used: u64,
    pub swap_free: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DiskEntry {
    pub mount_point: String,
    pub device: String,
    pub fstype: String,
    pub total: u64,
    pub used: u64,
    pub free: u64,
    pub usage_percent: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NetworkEntry {
    pub interface: String,
    pub mac_address: String,
    pub bytes_sent_rate: u64,
    pub bytes_recv_rate: u64,
    pub bytes_sent_total: u64,
    pub bytes_recv_total: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NetworkConnPayload {
    pub established: u64,
    pub syn_sent: u64,
    pub syn_recv: u64,
    pub time_wait: u64,
    pub close_wait: u64,
    pub total: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DiskIoEntry {
    pub device: String,
    pub read_bytes_rate: u64,
    pub write_bytes_rate: u64,
}

/// GPU memory figures arrive in MiB (nvidia-smi `nounits` output); the
/// converter normalises them to bytes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GpuEntry {
    pub index: u32,
    pub name: String,
    pub uuid: String,
    pub utilization_percent: f64,
    pub memory_total_mib: u64,
    pub memory_used_mib: u64,
    pub temperature: f64,
    pub power_draw: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TemperatureEntry {
    pub sensor_label: String,
    pub temperature: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoadPayload {
    pub load1: f64,
    pub load5: f64,
    pub load15: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HostInfoPayload {
    pub hostname: String,
    pub os: String,
    pub platform: String,
    pub platform_family: String,
    pub platform_version: String,
    pub kernel_version: String,
    pub kernel_arch: String,
    pub uptime: u64,
    pub boot_time: u64,
    pub procs: u64,
    pub virtualization_system: String,
    pub virtualization_role: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MonitorPayload {
    pub monitor_id: String,
    pub monitor_type: String,
    pub target: String,
    pub response_time_ms: f64,
}

/// Payload of an `audit_result` frame, persisted as-is.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AuditResultPayload {
    #[serde(rename = "type")]
    pub audit_type: String,
    pub result: Value,
    pub start_time: i64,
    pub end_time: i64,
}

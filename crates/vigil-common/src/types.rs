use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A single labelled time-series point. `labels` always carries `agent_id`;
/// kind-specific labels (`mount_point`, `interface`, ...) are added by the
/// metric converter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub name: String,
    pub labels: HashMap<String, String>,
    pub value: f64,
    pub timestamp_ms: i64,
}

impl Sample {
    pub fn new(name: &str, probe_id: &str, value: f64, timestamp_ms: i64) -> Self {
        let mut labels = HashMap::new();
        labels.insert("agent_id".to_string(), probe_id.to_string());
        Self {
            name: name.to_string(),
            labels,
            value,
            timestamp_ms,
        }
    }

    pub fn with_label(mut self, key: &str, value: &str) -> Self {
        self.labels.insert(key.to_string(), value.to_string());
        self
    }

    pub fn probe_id(&self) -> &str {
        self.labels.get("agent_id").map(String::as_str).unwrap_or("")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Info => write!(f, "info"),
            Severity::Warning => write!(f, "warning"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

impl std::str::FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "info" => Ok(Severity::Info),
            "warning" => Ok(Severity::Warning),
            "critical" => Ok(Severity::Critical),
            _ => Err(format!("unknown severity: {s}")),
        }
    }
}

/// The alertable metric categories. Each rule targets exactly one kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    Cpu,
    Memory,
    Disk,
    NetworkDown,
}

impl AlertKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertKind::Cpu => "cpu",
            AlertKind::Memory => "memory",
            AlertKind::Disk => "disk",
            AlertKind::NetworkDown => "network_down",
        }
    }
}

impl std::fmt::Display for AlertKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AlertKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cpu" => Ok(AlertKind::Cpu),
            "memory" => Ok(AlertKind::Memory),
            "disk" => Ok(AlertKind::Disk),
            "network_down" => Ok(AlertKind::NetworkDown),
            _ => Err(format!("unknown alert kind: {s}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    Firing,
    Resolved,
}

impl std::fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlertStatus::Firing => write!(f, "firing"),
            AlertStatus::Resolved => write!(f, "resolved"),
        }
    }
}

impl std::str::FromStr for AlertStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "firing" => Ok(AlertStatus::Firing),
            "resolved" => Ok(AlertStatus::Resolved),
            _ => Err(format!("unknown alert status: {s}")),
        }
    }
}

/// Which probes a rule applies to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "scope", content = "probeIds")]
pub enum RuleScope {
    All,
    Probes(Vec<String>),
}

impl RuleScope {
    pub fn matches(&self, probe_id: &str) -> bool {
        match self {
            RuleScope::All => true,
            RuleScope::Probes(ids) => ids.iter().any(|id| id == probe_id),
        }
    }
}

/// Outbound notification targets for a rule. All sinks are independently
/// enableable; a sink with an empty URL is treated as disabled.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NotifySettings {
    pub ding_talk_enabled: bool,
    pub ding_talk_webhook: String,
    pub ding_talk_secret: String,

    pub we_com_enabled: bool,
    pub we_com_webhook: String,

    pub feishu_enabled: bool,
    pub feishu_webhook: String,

    pub webhook_enabled: bool,
    pub webhook_url: String,
}

/// An operator-defined threshold policy over one alert kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertRule {
    pub id: String,
    pub name: String,
    pub kind: AlertKind,
    pub scope: RuleScope,
    pub threshold: f64,
    pub duration_secs: u32,
    pub level: Severity,
    pub enabled: bool,
    pub notify: NotifySettings,
}

impl AlertRule {
    /// A rule is active against a probe iff it is enabled and the probe is
    /// in scope.
    pub fn applies_to(&self, probe_id: &str) -> bool {
        self.enabled && self.scope.matches(probe_id)
    }
}

/// Persisted, user-visible alert instance. Serialized verbatim into the
/// generic webhook payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertRecord {
    pub id: i64,
    pub probe_id: String,
    pub rule_id: String,
    pub rule_name: String,
    pub kind: AlertKind,
    pub message: String,
    pub threshold: f64,
    pub actual_value: f64,
    pub level: Severity,
    pub status: AlertStatus,
    pub fired_at_ms: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_at_ms: Option<i64>,
}

/// Server-side probe registration row. `last_seen_ms` advances on every
/// inbound frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Probe {
    pub id: String,
    pub name: String,
    pub os: String,
    pub arch: String,
    pub ip: String,
    pub version: String,
    pub last_seen_ms: i64,
    pub created_at_ms: i64,
}

/// Latest host snapshot per probe. Wire payloads carry `uptime` and
/// `boot_time` in seconds and they stay in seconds here.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostSnapshot {
    pub probe_id: String,
    pub hostname: String,
    pub os: String,
    pub platform: String,
    pub platform_version: String,
    pub kernel_version: String,
    pub kernel_arch: String,
    pub uptime_secs: u64,
    pub boot_time_secs: u64,
    pub procs: u64,
    pub virtualization_system: String,
    pub virtualization_role: String,
    pub timestamp_ms: i64,
}

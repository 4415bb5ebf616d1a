use crate::AlertContext;
use chrono::{DateTime, Local};
use vigil_common::types::{AlertKind, AlertStatus, Severity};

fn level_glyph(level: Severity) -> &'static str {
    match level {
        Severity::Info => "\u{2139}\u{fe0f}",
        Severity::Warning => "\u{26a0}\u{fe0f}",
        Severity::Critical => "\u{1f6a8}",
    }
}

fn kind_title(kind: AlertKind) -> &'static str {
    match kind {
        AlertKind::Cpu => "CPU usage alert",
        AlertKind::Memory => "Memory usage alert",
        AlertKind::Disk => "Disk usage alert",
        AlertKind::NetworkDown => "Network down alert",
    }
}

fn format_ms(ts_ms: i64) -> String {
    DateTime::from_timestamp_millis(ts_ms)
        .map(|ts| ts.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| ts_ms.to_string())
}

/// Human-readable text for chat sinks. The generic webhook skips this and
/// receives the raw records instead.
pub fn render(ctx: &AlertContext) -> String {
    let record = &ctx.record;
    let title = kind_title(record.kind);

    match record.status {
        AlertStatus::Firing => format!(
            "{glyph} {title}\n\n\
             Probe: {name} ({id})\n\
             Host: {hostname}\n\
             IP: {ip}\n\
             Kind: {kind}\n\
             Message: {message}\n\
             Threshold: {threshold:.2}\n\
             Current value: {value:.2}\n\
             Fired at: {fired}",
            glyph = level_glyph(record.level),
            title = title,
            name = ctx.probe.name,
            id = ctx.probe.id,
            hostname = ctx.hostname,
            ip = ctx.probe.ip,
            kind = record.kind,
            message = record.message,
            threshold = record.threshold,
            value = record.actual_value,
            fired = format_ms(record.fired_at_ms),
        ),
        AlertStatus::Resolved => format!(
            "\u{2705} {title} resolved\n\n\
             Probe: {name} ({id})\n\
             Host: {hostname}\n\
             IP: {ip}\n\
             Kind: {kind}\n\
             Current value: {value:.2}\n\
             Resolved at: {resolved}",
            title = title,
            name = ctx.probe.name,
            id = ctx.probe.id,
            hostname = ctx.hostname,
            ip = ctx.probe.ip,
            kind = record.kind,
            value = record.actual_value,
            resolved = format_ms(record.resolved_at_ms.unwrap_or(record.fired_at_ms)),
        ),
    }
}

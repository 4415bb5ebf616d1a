use crate::session::{now_ms, StatusEvent};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing;
use vigil_alert::{Decision, Evaluator, Observation};
use vigil_common::types::{AlertKind, AlertRecord, AlertRule, AlertStatus, Probe};
use vigil_notify::{AlertContext, Notifier};
use vigil_storage::MetaStore;

/// Runs the single-owner evaluator: consumes the observation feed and the
/// status-event stream, fires/resolves records, and drives notifications.
/// Rules are reloaded at tick boundaries (the 30 s refresh floor).
pub async fn run_evaluator(
    mut feed: mpsc::Receiver<Observation>,
    mut status_events: mpsc::Receiver<StatusEvent>,
    meta: Arc<MetaStore>,
    notifier: Arc<Notifier>,
    tick_secs: u64,
    cancel: CancellationToken,
) {
    let mut evaluator = Evaluator::new(load_rules(&meta).unwrap_or_default());

    // Rebuild firing state from unresolved records so resolves after a
    // restart land on the original record ids.
    match meta.unresolved_alert_records() {
        Ok(records) => evaluator.rebuild(&records),
        Err(e) => tracing::error!(error = %e, "failed to load unresolved alert records"),
    }

    let mut tick = interval(Duration::from_secs(tick_secs.max(1)));
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("alert evaluator stopped");
                break;
            }
            maybe = feed.recv() => {
                let Some(obs) = maybe else { break };
                let decisions = evaluator.observe(&obs);
                apply(&mut evaluator, decisions, &meta, &notifier).await;
            }
            maybe = status_events.recv() => {
                let Some(event) = maybe else { break };
                let obs = Observation {
                    probe_id: event.probe_id,
                    kind: AlertKind::NetworkDown,
                    value: if event.online { 0.0 } else { 1.0 },
                    at_ms: event.at_ms,
                };
                let decisions = evaluator.observe(&obs);
                apply(&mut evaluator, decisions, &meta, &notifier).await;
            }
            _ = tick.tick() => {
                let decisions = evaluator.tick(now_ms());
                apply(&mut evaluator, decisions, &meta, &notifier).await;
                if let Some(rules) = load_rules(&meta) {
                    evaluator.replace_rules(rules);
                }
            }
        }
    }
}

fn load_rules(meta: &MetaStore) -> Option<Vec<AlertRule>> {
    match meta.list_alert_rules() {
        Ok(rules) => Some(rules),
        Err(e) => {
            tracing::error!(error = %e, "failed to load alert rules, keeping previous set");
            None
        }
    }
}

async fn apply(
    evaluator: &mut Evaluator,
    decisions: Vec<Decision>,
    meta: &Arc<MetaStore>,
    notifier: &Arc<Notifier>,
) {
    for decision in decisions {
        match decision {
            Decision::Fire {
                key,
                rule,
                value,
                at_ms,
            } => {
                let mut record = AlertRecord {
                    id: 0,
                    probe_id: key.0.clone(),
                    rule_id: rule.id.clone(),
                    rule_name: rule.name.clone(),
                    kind: rule.kind,
                    message: fire_message(&rule, value),
                    threshold: rule.threshold,
                    actual_value: value,
                    level: rule.level,
                    status: AlertStatus::Firing,
                    fired_at_ms: at_ms,
                    resolved_at_ms: None,
                };
                match meta.insert_alert_record(&record) {
                    Ok(record_id) => {
                        record.id = record_id;
                        evaluator.mark_firing(&key, record_id);
                        tracing::warn!(
                            probe_id = %record.probe_id,
                            rule = %rule.name,
                            kind = %rule.kind,
                            value,
                            threshold = rule.threshold,
                            record_id,
                            "alert firing"
                        );
                        notify(meta, notifier, &rule, record).await;
                    }
                    Err(e) => {
                        tracing::error!(
                            probe_id = %record.probe_id,
                            rule = %rule.name,
                            error = %e,
                            "failed to persist alert record"
                        );
                    }
                }
            }
            Decision::Refresh {
                record_id,
                value,
                at_ms,
            } => {
                if let Err(e) = meta.update_alert_record_value(record_id, value, at_ms) {
                    tracing::error!(record_id, error = %e, "failed to refresh alert value");
                }
            }
            Decision::Resolve {
                record_id,
                rule,
                probe_id,
                value,
                at_ms,
            } => match meta.resolve_alert_record(record_id, value, at_ms) {
                Ok(true) => {
                    tracing::info!(
                        probe_id = %probe_id,
                        rule = %rule.name,
                        record_id,
                        value,
                        "alert resolved"
                    );
                    match meta.get_alert_record(record_id) {
                        Ok(Some(record)) => notify(meta, notifier, &rule, record).await,
                        Ok(None) => {
                            tracing::warn!(record_id, "resolved record disappeared before notify")
                        }
                        Err(e) => tracing::error!(record_id, error = %e, "failed to reload record"),
                    }
                }
                Ok(false) => {
                    tracing::warn!(record_id, "resolve skipped, record missing or already resolved")
                }
                Err(e) => tracing::error!(record_id, error = %e, "failed to resolve alert record"),
            },
        }
    }
}

fn fire_message(rule: &AlertRule, value: f64) -> String {
    match rule.kind {
        AlertKind::NetworkDown => format!(
            "probe unreachable for more than {}s",
            rule.duration_secs
        ),
        kind => format!(
            "{} at {:.2}, at or above threshold {:.2} for {}s",
            kind, value, rule.threshold, rule.duration_secs
        ),
    }
}

/// The notifier is invoked inline (the evaluator is a single task) but
/// bounds its own I/O with the sink timeout, so a slow webhook delays,
/// never wedges, evaluation.
async fn notify(
    meta: &Arc<MetaStore>,
    notifier: &Arc<Notifier>,
    rule: &AlertRule,
    record: AlertRecord,
) {
    let probe = match meta.get_probe(&record.probe_id) {
        Ok(Some(probe)) => probe,
        _ => Probe {
            id: record.probe_id.clone(),
            name: record.probe_id.clone(),
            os: String::new(),
            arch: String::new(),
            ip: String::new(),
            version: String::new(),
            last_seen_ms: 0,
            created_at_ms: 0,
        },
    };
    let hostname = meta
        .get_host_snapshot(&record.probe_id)
        .ok()
        .flatten()
        .map(|s| s.hostname)
        .unwrap_or_default();

    let ctx = AlertContext {
        probe,
        hostname,
        record,
    };
    notifier.dispatch(&rule.notify, &ctx).await;
}

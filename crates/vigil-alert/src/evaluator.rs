use std::collections::HashMap;
use tracing;
use vigil_common::types::{AlertKind, AlertRecord, AlertRule};

/// State table key: `(probe_id, rule_id, kind)`.
pub type StateKey = (String, String, AlertKind);

/// One scalar fed into the evaluator: the primary per-probe value for an
/// alertable kind, in arrival order per probe.
#[derive(Debug, Clone)]
pub struct Observation {
    pub probe_id: String,
    pub kind: AlertKind,
    pub value: f64,
    pub at_ms: i64,
}

/// Pending or firing breach state. Created lazily on first breach and
/// destroyed on resolve or on a breach that never lasted long enough.
#[derive(Debug, Clone)]
struct BreachState {
    value: f64,
    threshold: f64,
    duration_ms: i64,
    first_breach_ms: i64,
    is_firing: bool,
    last_record_id: Option<i64>,
    last_refresh_ms: i64,
}

/// What the driving task must do next. `Fire` expects a follow-up
/// [`Evaluator::mark_firing`] call carrying the persisted record id.
#[derive(Debug, Clone)]
pub enum Decision {
    Fire {
        key: StateKey,
        rule: AlertRule,
        value: f64,
        at_ms: i64,
    },
    Refresh {
        record_id: i64,
        value: f64,
        at_ms: i64,
    },
    Resolve {
        record_id: i64,
        rule: AlertRule,
        probe_id: String,
        value: f64,
        at_ms: i64,
    },
}

/// Floor between `actual_value` refreshes on a sustained breach.
const VALUE_REFRESH_FLOOR_MS: i64 = 60_000;

/// Single-owner threshold state machine. Not shared: exactly one task
/// drives it through `observe`/`tick`.
pub struct Evaluator {
    rules: Vec<AlertRule>,
    states: HashMap<StateKey, BreachState>,
}

impl Evaluator {
    pub fn new(rules: Vec<AlertRule>) -> Self {
        Self {
            rules,
            states: HashMap::new(),
        }
    }

    pub fn rules(&self) -> &[AlertRule] {
        &self.rules
    }

    pub fn state_count(&self) -> usize {
        self.states.len()
    }

    pub fn is_firing(&self, key: &StateKey) -> bool {
        self.states.get(key).is_some_and(|s| s.is_firing)
    }

    /// Swap in a fresh rule set. State keyed by rules that were removed,
    /// disabled, or descoped is dropped; any firing record is left as-is
    /// rather than auto-resolved.
    pub fn replace_rules(&mut self, rules: Vec<AlertRule>) {
        self.states.retain(|(probe_id, rule_id, _), _| {
            rules
                .iter()
                .any(|r| r.id == *rule_id && r.applies_to(probe_id))
        });
        self.rules = rules;
    }

    /// Rebuild firing state from unresolved records, e.g. after a restart.
    /// Records arrive oldest-first so the most recent one per key wins.
    pub fn rebuild(&mut self, records: &[AlertRecord]) {
        for record in records {
            let key = (record.probe_id.clone(), record.rule_id.clone(), record.kind);
            let duration_ms = self
                .rules
                .iter()
                .find(|r| r.id == record.rule_id)
                .map(|r| i64::from(r.duration_secs) * 1000)
                .unwrap_or(0);
            self.states.insert(
                key,
                BreachState {
                    value: record.actual_value,
                    threshold: record.threshold,
                    duration_ms,
                    first_breach_ms: record.fired_at_ms,
                    is_firing: true,
                    last_record_id: Some(record.id),
                    last_refresh_ms: record.fired_at_ms,
                },
            );
        }
        if !self.states.is_empty() {
            tracing::info!(count = self.states.len(), "rebuilt firing alert state");
        }
    }

    /// Record the persisted record id after a `Fire` decision was acted on.
    pub fn mark_firing(&mut self, key: &StateKey, record_id: i64) {
        if let Some(state) = self.states.get_mut(key) {
            if state.is_firing {
                state.last_record_id = Some(record_id);
            }
        }
    }

    /// Feed one observation through every applicable rule.
    pub fn observe(&mut self, obs: &Observation) -> Vec<Decision> {
        let rules: Vec<AlertRule> = self
            .rules
            .iter()
            .filter(|r| r.kind == obs.kind && r.applies_to(&obs.probe_id))
            .cloned()
            .collect();

        let mut decisions = Vec::new();
        for rule in rules {
            self.eval_rule(&rule, obs, &mut decisions);
        }
        decisions
    }

    fn eval_rule(&mut self, rule: &AlertRule, obs: &Observation, out: &mut Vec<Decision>) {
        let key: StateKey = (obs.probe_id.clone(), rule.id.clone(), rule.kind);
        let duration_ms = i64::from(rule.duration_secs) * 1000;
        let breach = obs.value >= rule.threshold;

        if breach {
            let state = self.states.entry(key.clone()).or_insert_with(|| {
                tracing::debug!(
                    probe_id = %obs.probe_id,
                    rule_id = %rule.id,
                    kind = %rule.kind,
                    value = obs.value,
                    "breach started"
                );
                BreachState {
                    value: obs.value,
                    threshold: rule.threshold,
                    duration_ms,
                    first_breach_ms: obs.at_ms,
                    is_firing: false,
                    last_record_id: None,
                    last_refresh_ms: obs.at_ms,
                }
            });
            state.value = obs.value;
            state.threshold = rule.threshold;
            state.duration_ms = duration_ms;

            if !state.is_firing {
                if obs.at_ms - state.first_breach_ms >= duration_ms {
                    state.is_firing = true;
                    state.last_refresh_ms = obs.at_ms;
                    out.push(Decision::Fire {
                        key,
                        rule: rule.clone(),
                        value: obs.value,
                        at_ms: obs.at_ms,
                    });
                }
            } else if let Some(record_id) = state.last_record_id {
                if obs.at_ms - state.last_refresh_ms >= VALUE_REFRESH_FLOOR_MS {
                    state.last_refresh_ms = obs.at_ms;
                    out.push(Decision::Refresh {
                        record_id,
                        value: obs.value,
                        at_ms: obs.at_ms,
                    });
                }
            }
        } else if let Some(state) = self.states.remove(&key) {
            if state.is_firing {
                match state.last_record_id {
                    Some(record_id) => out.push(Decision::Resolve {
                        record_id,
                        rule: rule.clone(),
                        probe_id: obs.probe_id.clone(),
                        value: obs.value,
                        at_ms: obs.at_ms,
                    }),
                    None => tracing::warn!(
                        probe_id = %obs.probe_id,
                        rule_id = %rule.id,
                        "firing state had no record id, dropping without resolve"
                    ),
                }
            }
            // A breach that never reached the duration is cleared silently.
        }
    }

    /// Periodic pass: fire pending states whose duration has elapsed even
    /// though no fresh sample arrived (the probe may have gone quiet while
    /// still in breach, or the value is a held status like network_down).
    pub fn tick(&mut self, now_ms: i64) -> Vec<Decision> {
        let due: Vec<StateKey> = self
            .states
            .iter()
            .filter(|(_, s)| {
                !s.is_firing && s.value >= s.threshold && now_ms - s.first_breach_ms >= s.duration_ms
            })
            .map(|(key, _)| key.clone())
            .collect();

        let mut decisions = Vec::new();
        for key in due {
            let Some(rule) = self.rules.iter().find(|r| r.id == key.1).cloned() else {
                self.states.remove(&key);
                continue;
            };
            if let Some(state) = self.states.get_mut(&key) {
                state.is_firing = true;
                state.last_refresh_ms = now_ms;
                decisions.push(Decision::Fire {
                    key: key.clone(),
                    rule,
                    value: state.value,
                    at_ms: now_ms,
                });
            }
        }
        decisions
    }
}

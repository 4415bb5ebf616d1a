use crate::evaluator::{Decision, Evaluator, Observation};
use vigil_common::types::{
    AlertKind, AlertRecord, AlertRule, AlertStatus, NotifySettings, RuleScope, Severity,
};

fn cpu_rule(threshold: f64, duration_secs: u32) -> AlertRule {
    AlertRule {
        id: "rule-cpu".into(),
        name: "cpu high".into(),
        kind: AlertKind::Cpu,
        scope: RuleScope::All,
        threshold,
        duration_secs,
        level: Severity::Critical,
        enabled: true,
        notify: NotifySettings::default(),
    }
}

fn obs(probe: &str, kind: AlertKind, value: f64, at_secs: i64) -> Observation {
    Observation {
        probe_id: probe.into(),
        kind,
        value,
        at_ms: at_secs * 1000,
    }
}

fn observe_all(ev: &mut Evaluator, observations: &[Observation]) -> Vec<Decision> {
    let mut out = Vec::new();
    for o in observations {
        out.extend(ev.observe(o));
    }
    out
}

#[test]
fn sustained_breach_fires_after_duration() {
    // Rule: cpu, threshold 80, duration 60s; samples 82,83,81,85 at 0..60s.
    let mut ev = Evaluator::new(vec![cpu_rule(80.0, 60)]);
    let decisions = observe_all(
        &mut ev,
        &[
            obs("p1", AlertKind::Cpu, 82.0, 0),
            obs("p1", AlertKind::Cpu, 83.0, 15),
            obs("p1", AlertKind::Cpu, 81.0, 30),
            obs("p1", AlertKind::Cpu, 85.0, 45),
        ],
    );
    assert!(decisions.is_empty(), "must not fire before the duration");

    let decisions = ev.observe(&obs("p1", AlertKind::Cpu, 85.0, 60));
    assert_eq!(decisions.len(), 1);
    match &decisions[0] {
        Decision::Fire { rule, value, at_ms, key } => {
            assert_eq!(rule.id, "rule-cpu");
            assert_eq!(*value, 85.0);
            assert_eq!(*at_ms, 60_000);
            assert_eq!(key.0, "p1");
        }
        other => panic!("expected Fire, got {other:?}"),
    }
}

#[test]
fn short_breach_clears_without_firing() {
    // 82 at t=0, 75 at t=30: state cleared, nothing emitted.
    let mut ev = Evaluator::new(vec![cpu_rule(80.0, 60)]);
    assert!(ev.observe(&obs("p1", AlertKind::Cpu, 82.0, 0)).is_empty());
    assert_eq!(ev.state_count(), 1);
    assert!(ev.observe(&obs("p1", AlertKind::Cpu, 75.0, 30)).is_empty());
    assert_eq!(ev.state_count(), 0);
}

#[test]
fn resolve_references_the_firing_record() {
    let mut ev = Evaluator::new(vec![cpu_rule(80.0, 60)]);
    ev.observe(&obs("p1", AlertKind::Cpu, 82.0, 0));
    let fired = ev.observe(&obs("p1", AlertKind::Cpu, 85.0, 60));
    let key = match &fired[0] {
        Decision::Fire { key, .. } => key.clone(),
        other => panic!("expected Fire, got {other:?}"),
    };
    ev.mark_firing(&key, 41);

    let decisions = ev.observe(&obs("p1", AlertKind::Cpu, 79.0, 120));
    assert_eq!(decisions.len(), 1);
    match &decisions[0] {
        Decision::Resolve {
            record_id,
            value,
            at_ms,
            ..
        } => {
            assert_eq!(*record_id, 41);
            assert_eq!(*value, 79.0);
            assert_eq!(*at_ms, 120_000);
        }
        other => panic!("expected Resolve, got {other:?}"),
    }
    assert_eq!(ev.state_count(), 0);

    // No duplicate resolve once the state is gone.
    assert!(ev.observe(&obs("p1", AlertKind::Cpu, 70.0, 130)).is_empty());
}

#[test]
fn value_equal_to_threshold_counts_as_breach() {
    let mut ev = Evaluator::new(vec![cpu_rule(80.0, 0)]);
    let decisions = ev.observe(&obs("p1", AlertKind::Cpu, 80.0, 0));
    assert!(matches!(decisions.as_slice(), [Decision::Fire { .. }]));
}

#[test]
fn refresh_has_a_sixty_second_floor() {
    let mut ev = Evaluator::new(vec![cpu_rule(80.0, 0)]);
    let fired = ev.observe(&obs("p1", AlertKind::Cpu, 90.0, 0));
    let key = match &fired[0] {
        Decision::Fire { key, .. } => key.clone(),
        other => panic!("expected Fire, got {other:?}"),
    };
    ev.mark_firing(&key, 7);

    // Sustained breach inside the floor: no refresh.
    assert!(ev.observe(&obs("p1", AlertKind::Cpu, 95.0, 30)).is_empty());

    let decisions = ev.observe(&obs("p1", AlertKind::Cpu, 96.0, 61));
    match decisions.as_slice() {
        [Decision::Refresh {
            record_id, value, ..
        }] => {
            assert_eq!(*record_id, 7);
            assert_eq!(*value, 96.0);
        }
        other => panic!("expected Refresh, got {other:?}"),
    }

    // Floor restarts after a refresh.
    assert!(ev.observe(&obs("p1", AlertKind::Cpu, 97.0, 90)).is_empty());
}

#[test]
fn tick_fires_when_breach_outlives_duration_without_new_samples() {
    // network_down semantics: one offline transition (v=1), then silence.
    let rule = AlertRule {
        id: "rule-net".into(),
        name: "probe offline".into(),
        kind: AlertKind::NetworkDown,
        scope: RuleScope::All,
        threshold: 1.0,
        duration_secs: 120,
        level: Severity::Critical,
        enabled: true,
        notify: NotifySettings::default(),
    };
    let mut ev = Evaluator::new(vec![rule]);

    assert!(ev
        .observe(&obs("p1", AlertKind::NetworkDown, 1.0, 0))
        .is_empty());
    // Too early.
    assert!(ev.tick(60_000).is_empty());

    let decisions = ev.tick(121_000);
    assert!(matches!(decisions.as_slice(), [Decision::Fire { .. }]));

    // Already firing: the next tick stays quiet.
    assert!(ev.tick(150_000).is_empty());

    // Back online resolves through the observation path.
    let key = ("p1".to_string(), "rule-net".to_string(), AlertKind::NetworkDown);
    ev.mark_firing(&key, 9);
    let decisions = ev.observe(&obs("p1", AlertKind::NetworkDown, 0.0, 200));
    assert!(matches!(
        decisions.as_slice(),
        [Decision::Resolve { record_id: 9, .. }]
    ));
}

#[test]
fn rule_removal_drops_state_without_resolving() {
    let mut ev = Evaluator::new(vec![cpu_rule(80.0, 0)]);
    let fired = ev.observe(&obs("p1", AlertKind::Cpu, 90.0, 0));
    let key = match &fired[0] {
        Decision::Fire { key, .. } => key.clone(),
        other => panic!("expected Fire, got {other:?}"),
    };
    ev.mark_firing(&key, 3);
    assert!(ev.is_firing(&key));

    ev.replace_rules(vec![]);
    assert_eq!(ev.state_count(), 0);

    // The value dropping below threshold later emits nothing: the firing
    // record is left for the operator, not auto-resolved.
    assert!(ev.observe(&obs("p1", AlertKind::Cpu, 10.0, 60)).is_empty());
}

#[test]
fn disabled_rule_is_ignored() {
    let mut rule = cpu_rule(80.0, 0);
    rule.enabled = false;
    let mut ev = Evaluator::new(vec![rule]);
    assert!(ev.observe(&obs("p1", AlertKind::Cpu, 99.0, 0)).is_empty());
    assert_eq!(ev.state_count(), 0);
}

#[test]
fn scoped_rule_only_matches_listed_probes() {
    let mut rule = cpu_rule(80.0, 0);
    rule.scope = RuleScope::Probes(vec!["p1".into()]);
    let mut ev = Evaluator::new(vec![rule]);

    assert!(ev.observe(&obs("p2", AlertKind::Cpu, 99.0, 0)).is_empty());
    assert!(matches!(
        ev.observe(&obs("p1", AlertKind::Cpu, 99.0, 0)).as_slice(),
        [Decision::Fire { .. }]
    ));
}

#[test]
fn rebuild_restores_firing_state_from_records() {
    let mut ev = Evaluator::new(vec![cpu_rule(80.0, 60)]);
    ev.rebuild(&[AlertRecord {
        id: 77,
        probe_id: "p1".into(),
        rule_id: "rule-cpu".into(),
        rule_name: "cpu high".into(),
        kind: AlertKind::Cpu,
        message: String::new(),
        threshold: 80.0,
        actual_value: 93.0,
        level: Severity::Critical,
        status: AlertStatus::Firing,
        fired_at_ms: 5_000,
        resolved_at_ms: None,
    }]);

    let key = ("p1".to_string(), "rule-cpu".to_string(), AlertKind::Cpu);
    assert!(ev.is_firing(&key));

    // First below-threshold value resolves against the restored record id.
    let decisions = ev.observe(&obs("p1", AlertKind::Cpu, 50.0, 100));
    assert!(matches!(
        decisions.as_slice(),
        [Decision::Resolve { record_id: 77, .. }]
    ));
}

#[test]
fn independent_probes_keep_independent_state() {
    let mut ev = Evaluator::new(vec![cpu_rule(80.0, 60)]);
    ev.observe(&obs("p1", AlertKind::Cpu, 90.0, 0));
    ev.observe(&obs("p2", AlertKind::Cpu, 90.0, 30));

    let fired = ev.observe(&obs("p1", AlertKind::Cpu, 91.0, 60));
    assert_eq!(fired.len(), 1);
    // p2 has only been in breach for 30s.
    assert!(ev.observe(&obs("p2", AlertKind::Cpu, 91.0, 60)).is_empty());
}

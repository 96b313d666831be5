//! Negotiation observer — structured event stream and anomaly alerts.
//!
//! The observer records every turn lifecycle event and compares each new
//! turn against rolling history to raise repetition, token-spike, timeout
//! and cost alerts. Alerts are advisory: halting is the engine's call after
//! consulting the guard. Listener fan-out is synchronous, in registration
//! order, and panic-isolated per listener.

use std::panic::{catch_unwind, AssertUnwindSafe};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use tracing::warn;

use crate::persona::Role;
use crate::session::DebateTurn;

/// Kind of a recorded negotiation event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    TurnStart,
    TurnEnd,
    GateResult,
    BudgetWarning,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TurnStart => write!(f, "turn_start"),
            Self::TurnEnd => write!(f, "turn_end"),
            Self::GateResult => write!(f, "gate_result"),
            Self::BudgetWarning => write!(f, "budget_warning"),
        }
    }
}

/// One entry in the append-only event log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebateEvent {
    pub kind: EventKind,
    pub session_id: String,
    pub data: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

/// Anomaly category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    /// Same role repeating near-identical content.
    InfiniteLoop,
    /// Turn token usage far above the session mean.
    TokenSpike,
    /// Debate approaching its wall-clock ceiling.
    TimeoutApproaching,
    /// Accumulated cost approaching the budget ceiling.
    CostSpike,
}

impl std::fmt::Display for AlertKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InfiniteLoop => write!(f, "infinite_loop"),
            Self::TokenSpike => write!(f, "token_spike"),
            Self::TimeoutApproaching => write!(f, "timeout_approaching"),
            Self::CostSpike => write!(f, "cost_spike"),
        }
    }
}

/// Alert severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Warning,
    Critical,
}

/// An anomaly raised while observing the negotiation. Streamed, not stored
/// by the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalyAlert {
    pub kind: AlertKind,
    pub severity: AlertSeverity,
    pub message: String,
    pub data: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

type EventListener = Box<dyn Fn(&DebateEvent) + Send + Sync>;
type AlertListener = Box<dyn Fn(&AnomalyAlert) + Send + Sync>;

/// Prefix length hashed for repetition detection.
const LOOP_HASH_PREFIX_CHARS: usize = 500;
/// Occurrences of the same (role, hash) pair that flag a loop.
const LOOP_THRESHOLD: u32 = 3;
/// Prior turns required before spike detection activates.
const SPIKE_MIN_HISTORY: usize = 3;
/// Multiple of the prior mean that counts as a spike.
const SPIKE_RATIO: f64 = 2.0;
/// Budget consumption ratio that triggers a proximity warning.
const PROXIMITY_WARN: f64 = 0.8;
/// Budget consumption ratio that escalates the warning to critical.
const PROXIMITY_CRITICAL: f64 = 0.95;

/// Per-session observer. Owns the event log and the anomaly state.
pub struct DebateObserver {
    session_id: String,
    cost_budget_usd: f64,
    timeout_secs: u64,
    started_at: DateTime<Utc>,
    events: Vec<DebateEvent>,
    content_hashes: BTreeMap<(Role, String), u32>,
    token_history: Vec<u64>,
    event_listeners: Vec<EventListener>,
    alert_listeners: Vec<AlertListener>,
}

impl DebateObserver {
    /// Observer for one session with its cost and time ceilings.
    pub fn new(session_id: &str, cost_budget_usd: f64, timeout_secs: u64) -> Self {
        Self {
            session_id: session_id.to_string(),
            cost_budget_usd,
            timeout_secs,
            started_at: Utc::now(),
            events: Vec::new(),
            content_hashes: BTreeMap::new(),
            token_history: Vec::new(),
            event_listeners: Vec::new(),
            alert_listeners: Vec::new(),
        }
    }

    /// Register a generic event listener. Fire-and-forget.
    pub fn on_event(&mut self, listener: impl Fn(&DebateEvent) + Send + Sync + 'static) {
        self.event_listeners.push(Box::new(listener));
    }

    /// Register an anomaly alert listener. Fire-and-forget.
    pub fn on_alert(&mut self, listener: impl Fn(&AnomalyAlert) + Send + Sync + 'static) {
        self.alert_listeners.push(Box::new(listener));
    }

    /// The append-only event log, oldest first.
    pub fn events(&self) -> &[DebateEvent] {
        &self.events
    }

    /// Record the start of a turn.
    pub fn on_turn_start(&mut self, role: Role, turn_number: u32) {
        self.emit(
            EventKind::TurnStart,
            json!({ "role": role.to_string(), "turn": turn_number }),
        );
    }

    /// Record a completed turn and run the anomaly checks against rolling
    /// history. Returns any alerts raised; none of them halt execution.
    pub fn on_turn_end(&mut self, turn: &DebateTurn, accumulated_cost_usd: f64) -> Vec<AnomalyAlert> {
        self.emit(
            EventKind::TurnEnd,
            json!({
                "role": turn.role.to_string(),
                "turn": turn.number,
                "turn_type": turn.turn_type.to_string(),
                "tokens": turn.tokens.total(),
                "cost_usd": accumulated_cost_usd,
            }),
        );

        let mut alerts = Vec::new();
        if let Some(a) = self.check_repetition(turn) {
            alerts.push(a);
        }
        if let Some(a) = self.check_token_spike(turn) {
            alerts.push(a);
        }
        self.token_history.push(turn.tokens.total());
        if let Some(a) = self.check_timeout_proximity() {
            alerts.push(a);
        }
        if let Some(a) = self.check_cost_proximity(accumulated_cost_usd) {
            alerts.push(a);
        }

        for alert in &alerts {
            self.fan_out_alert(alert);
        }
        alerts
    }

    /// Record a verification gate result. Informational only.
    pub fn on_gate_result(&mut self, gate: &str, passed: bool) {
        self.emit(
            EventKind::GateResult,
            json!({ "gate": gate, "passed": passed }),
        );
    }

    /// Record a budget warning surfaced by the caller. Informational only.
    pub fn on_budget_warning(&mut self, message: &str) {
        self.emit(EventKind::BudgetWarning, json!({ "message": message }));
    }

    fn emit(&mut self, kind: EventKind, data: serde_json::Value) {
        let event = DebateEvent {
            kind,
            session_id: self.session_id.clone(),
            data,
            timestamp: Utc::now(),
        };
        for listener in &self.event_listeners {
            if catch_unwind(AssertUnwindSafe(|| listener(&event))).is_err() {
                warn!(session_id = %self.session_id, kind = %event.kind, "event listener panicked");
            }
        }
        self.events.push(event);
    }

    fn fan_out_alert(&self, alert: &AnomalyAlert) {
        for listener in &self.alert_listeners {
            if catch_unwind(AssertUnwindSafe(|| listener(alert))).is_err() {
                warn!(session_id = %self.session_id, kind = %alert.kind, "alert listener panicked");
            }
        }
    }

    /// Cheap content-prefix hash; collision quality only needs to be good
    /// enough to spot verbatim repetition.
    fn prefix_hash(content: &str) -> String {
        let prefix: String = content.chars().take(LOOP_HASH_PREFIX_CHARS).collect();
        blake3::hash(prefix.as_bytes()).to_hex().to_string()
    }

    fn check_repetition(&mut self, turn: &DebateTurn) -> Option<AnomalyAlert> {
        let hash = Self::prefix_hash(&turn.content);
        let count = {
            let entry = self
                .content_hashes
                .entry((turn.role, hash.clone()))
                .or_insert(0);
            *entry += 1;
            *entry
        };
        if count >= LOOP_THRESHOLD {
            return Some(self.alert(
                AlertKind::InfiniteLoop,
                AlertSeverity::Critical,
                format!(
                    "role {} produced near-identical content {} times",
                    turn.role, count
                ),
                json!({ "role": turn.role.to_string(), "occurrences": count, "hash": hash }),
            ));
        }
        None
    }

    fn check_token_spike(&self, turn: &DebateTurn) -> Option<AnomalyAlert> {
        if self.token_history.len() < SPIKE_MIN_HISTORY {
            return None;
        }
        let mean =
            self.token_history.iter().sum::<u64>() as f64 / self.token_history.len() as f64;
        let current = turn.tokens.total() as f64;
        if mean > 0.0 && current > SPIKE_RATIO * mean {
            return Some(self.alert(
                AlertKind::TokenSpike,
                AlertSeverity::Warning,
                format!(
                    "turn {} used {} tokens, {:.1}x the prior mean of {:.0}",
                    turn.number,
                    turn.tokens.total(),
                    current / mean,
                    mean
                ),
                json!({ "turn": turn.number, "tokens": turn.tokens.total(), "prior_mean": mean }),
            ));
        }
        None
    }

    fn check_timeout_proximity(&self) -> Option<AnomalyAlert> {
        if self.timeout_secs == 0 {
            return None;
        }
        let elapsed = (Utc::now() - self.started_at).num_seconds().max(0) as f64;
        let ratio = elapsed / self.timeout_secs as f64;
        if ratio >= PROXIMITY_WARN {
            let severity = if ratio >= PROXIMITY_CRITICAL {
                AlertSeverity::Critical
            } else {
                AlertSeverity::Warning
            };
            return Some(self.alert(
                AlertKind::TimeoutApproaching,
                severity,
                format!(
                    "{:.0}% of the {}s debate timeout consumed",
                    ratio * 100.0,
                    self.timeout_secs
                ),
                json!({ "elapsed_secs": elapsed, "timeout_secs": self.timeout_secs }),
            ));
        }
        None
    }

    fn check_cost_proximity(&self, accumulated_cost_usd: f64) -> Option<AnomalyAlert> {
        if self.cost_budget_usd <= 0.0 {
            return None;
        }
        let ratio = accumulated_cost_usd / self.cost_budget_usd;
        if ratio >= PROXIMITY_WARN {
            let severity = if ratio >= PROXIMITY_CRITICAL {
                AlertSeverity::Critical
            } else {
                AlertSeverity::Warning
            };
            return Some(self.alert(
                AlertKind::CostSpike,
                severity,
                format!(
                    "${:.4} of ${:.4} cost budget consumed ({:.0}%)",
                    accumulated_cost_usd,
                    self.cost_budget_usd,
                    ratio * 100.0
                ),
                json!({ "cost_usd": accumulated_cost_usd, "budget_usd": self.cost_budget_usd }),
            ));
        }
        None
    }

    fn alert(
        &self,
        kind: AlertKind,
        severity: AlertSeverity,
        message: String,
        data: serde_json::Value,
    ) -> AnomalyAlert {
        AnomalyAlert {
            kind,
            severity,
            message,
            data,
            timestamp: Utc::now(),
        }
    }

    #[cfg(test)]
    pub(crate) fn backdate_start(&mut self, secs: i64) {
        self.started_at -= chrono::Duration::seconds(secs);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{TokenUsage, TurnType};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn turn(number: u32, role: Role, content: &str, tokens: u64) -> DebateTurn {
        DebateTurn {
            number,
            role,
            turn_type: TurnType::Supplement,
            content: content.to_string(),
            artifacts: vec![],
            tokens: TokenUsage {
                input: tokens / 2,
                output: tokens - tokens / 2,
            },
            model: "test".into(),
            duration_ms: 0,
            timestamp: Utc::now(),
        }
    }

    fn observer() -> DebateObserver {
        DebateObserver::new("s-1", 10.0, 3_600)
    }

    #[test]
    fn test_event_log_records_lifecycle() {
        let mut obs = observer();
        obs.on_turn_start(Role::Architect, 1);
        obs.on_turn_end(&turn(1, Role::Architect, "framing", 100), 0.01);
        obs.on_gate_result("cargo_test", true);
        obs.on_budget_warning("80% of cost budget consumed");

        let kinds: Vec<EventKind> = obs.events().iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![
                EventKind::TurnStart,
                EventKind::TurnEnd,
                EventKind::GateResult,
                EventKind::BudgetWarning
            ]
        );
    }

    #[test]
    fn test_repetition_alert_on_third_occurrence() {
        let mut obs = observer();
        let content = "The answer is to shard the queue.";

        let a1 = obs.on_turn_end(&turn(1, Role::Implementer, content, 100), 0.01);
        assert!(a1.is_empty());
        let a2 = obs.on_turn_end(&turn(2, Role::Implementer, content, 100), 0.02);
        assert!(a2.is_empty());
        let a3 = obs.on_turn_end(&turn(3, Role::Implementer, content, 100), 0.03);
        assert_eq!(a3.len(), 1);
        assert_eq!(a3[0].kind, AlertKind::InfiniteLoop);
        assert_eq!(a3[0].severity, AlertSeverity::Critical);
    }

    #[test]
    fn test_repetition_is_per_role() {
        let mut obs = observer();
        let content = "Same text.";
        obs.on_turn_end(&turn(1, Role::Implementer, content, 100), 0.0);
        obs.on_turn_end(&turn(2, Role::Reviewer, content, 100), 0.0);
        let a = obs.on_turn_end(&turn(3, Role::Sre, content, 100), 0.0);
        assert!(a.is_empty());
    }

    #[test]
    fn test_repetition_compares_prefix_only() {
        let mut obs = observer();
        let long_a = format!("{}{}", "x".repeat(600), "tail one");
        let long_b = format!("{}{}", "x".repeat(600), "tail two");
        obs.on_turn_end(&turn(1, Role::Implementer, &long_a, 100), 0.0);
        obs.on_turn_end(&turn(2, Role::Implementer, &long_b, 100), 0.0);
        let a = obs.on_turn_end(&turn(3, Role::Implementer, &long_a, 100), 0.0);
        // Prefixes are identical past 500 chars, so this is the third hit.
        assert_eq!(a.len(), 1);
        assert_eq!(a[0].kind, AlertKind::InfiniteLoop);
    }

    #[test]
    fn test_token_spike_needs_history() {
        let mut obs = observer();
        let a1 = obs.on_turn_end(&turn(1, Role::Implementer, "a", 100), 0.0);
        let a2 = obs.on_turn_end(&turn(2, Role::Reviewer, "b", 100), 0.0);
        // Only 2 prior turns — a large turn must not alert yet.
        let a3 = obs.on_turn_end(&turn(3, Role::Sre, "c", 900), 0.0);
        assert!(a1.is_empty() && a2.is_empty() && a3.is_empty());
    }

    #[test]
    fn test_token_spike_over_double_mean() {
        let mut obs = observer();
        obs.on_turn_end(&turn(1, Role::Implementer, "a", 100), 0.0);
        obs.on_turn_end(&turn(2, Role::Reviewer, "b", 100), 0.0);
        obs.on_turn_end(&turn(3, Role::Sre, "c", 100), 0.0);
        // Mean of priors is 100; 250 > 2x.
        let alerts = obs.on_turn_end(&turn(4, Role::Product, "d", 250), 0.0);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].kind, AlertKind::TokenSpike);
        assert_eq!(alerts[0].severity, AlertSeverity::Warning);
    }

    #[test]
    fn test_token_at_exactly_double_mean_is_quiet() {
        let mut obs = observer();
        obs.on_turn_end(&turn(1, Role::Implementer, "a", 100), 0.0);
        obs.on_turn_end(&turn(2, Role::Reviewer, "b", 100), 0.0);
        obs.on_turn_end(&turn(3, Role::Sre, "c", 100), 0.0);
        let alerts = obs.on_turn_end(&turn(4, Role::Product, "d", 200), 0.0);
        assert!(alerts.is_empty());
    }

    #[test]
    fn test_timeout_proximity_warning_then_critical() {
        let mut obs = DebateObserver::new("s-1", 10.0, 100);
        obs.backdate_start(85);
        let alerts = obs.on_turn_end(&turn(1, Role::Implementer, "a", 100), 0.0);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].kind, AlertKind::TimeoutApproaching);
        assert_eq!(alerts[0].severity, AlertSeverity::Warning);

        obs.backdate_start(11);
        let alerts = obs.on_turn_end(&turn(2, Role::Reviewer, "b", 100), 0.0);
        assert!(alerts
            .iter()
            .any(|a| a.kind == AlertKind::TimeoutApproaching
                && a.severity == AlertSeverity::Critical));
    }

    #[test]
    fn test_cost_proximity_thresholds() {
        let mut obs = DebateObserver::new("s-1", 1.0, 3_600);
        let quiet = obs.on_turn_end(&turn(1, Role::Implementer, "a", 100), 0.5);
        assert!(quiet.is_empty());

        let warning = obs.on_turn_end(&turn(2, Role::Reviewer, "b", 100), 0.85);
        assert_eq!(warning.len(), 1);
        assert_eq!(warning[0].kind, AlertKind::CostSpike);
        assert_eq!(warning[0].severity, AlertSeverity::Warning);

        let critical = obs.on_turn_end(&turn(3, Role::Sre, "c", 100), 0.97);
        assert!(critical
            .iter()
            .any(|a| a.kind == AlertKind::CostSpike && a.severity == AlertSeverity::Critical));
    }

    #[test]
    fn test_listeners_run_in_registration_order() {
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let mut obs = observer();
        let o1 = Arc::clone(&order);
        obs.on_event(move |_| o1.lock().unwrap().push(1));
        let o2 = Arc::clone(&order);
        obs.on_event(move |_| o2.lock().unwrap().push(2));

        obs.on_turn_start(Role::Architect, 1);
        assert_eq!(*order.lock().unwrap(), vec![1, 2]);
    }

    #[test]
    fn test_panicking_listener_does_not_block_others() {
        let hits = Arc::new(AtomicUsize::new(0));
        let mut obs = observer();
        obs.on_event(|_| panic!("listener bug"));
        let h = Arc::clone(&hits);
        obs.on_event(move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });

        obs.on_turn_start(Role::Architect, 1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(obs.events().len(), 1);
    }

    #[test]
    fn test_alert_listener_fan_out() {
        let hits = Arc::new(AtomicUsize::new(0));
        let mut obs = observer();
        let h = Arc::clone(&hits);
        obs.on_alert(move |a| {
            assert_eq!(a.kind, AlertKind::InfiniteLoop);
            h.fetch_add(1, Ordering::SeqCst);
        });

        let content = "Loop body.";
        obs.on_turn_end(&turn(1, Role::Implementer, content, 100), 0.0);
        obs.on_turn_end(&turn(2, Role::Implementer, content, 100), 0.0);
        obs.on_turn_end(&turn(3, Role::Implementer, content, 100), 0.0);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}

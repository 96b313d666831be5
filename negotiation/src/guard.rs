//! Execution guard — budget accounting and per-role tool capability checks.
//!
//! One guard instance is scoped to exactly one session. Counters only ever
//! increase; a new session gets a new guard. Expected resource boundaries
//! are reported as returned [`Violation`] values, never as panics or errors.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::warn;

use crate::config::{BudgetConfig, BudgetOverrides};
use crate::persona::Role;

/// Category of a guard violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    /// Accumulated cost reached the ceiling.
    BudgetExceeded,
    /// Accumulated turns reached the ceiling.
    TurnLimit,
    /// Retry counter exceeded the ceiling.
    RetryLimit,
    /// Debate wall-clock ceiling reached.
    Timeout,
    /// Role attempted a tool outside its allowlist.
    ToolDenied,
}

impl std::fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BudgetExceeded => write!(f, "budget_exceeded"),
            Self::TurnLimit => write!(f, "turn_limit"),
            Self::RetryLimit => write!(f, "retry_limit"),
            Self::Timeout => write!(f, "timeout"),
            Self::ToolDenied => write!(f, "tool_denied"),
        }
    }
}

/// A structured, typed refusal returned when a resource or capability
/// boundary is hit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Violation {
    pub kind: ViolationKind,
    pub message: String,
    /// Structured context for dashboards and alerting.
    pub details: serde_json::Value,
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Tool capability policy for one role.
///
/// The permissive case is an explicit variant rather than an absent map
/// entry, so "this role may call anything" is a visible choice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Allowlist {
    /// Role may invoke any tool.
    Unrestricted,
    /// Role may only invoke the listed tool identifiers.
    Restricted(BTreeSet<String>),
}

impl Allowlist {
    /// Build a restricted allowlist from tool identifiers.
    pub fn restricted<I, S>(tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Restricted(tools.into_iter().map(Into::into).collect())
    }

    fn permits(&self, tool_id: &str) -> bool {
        match self {
            Self::Unrestricted => true,
            Self::Restricted(set) => set.contains(tool_id),
        }
    }
}

/// Read-only snapshot of what remains of the budget.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemainingBudget {
    pub cost_remaining_usd: f64,
    pub turns_remaining: u32,
    pub retries_remaining: u32,
    pub time_remaining_secs: i64,
    /// Percent of the cost budget consumed, in [0, 100+].
    pub cost_pct_used: f64,
}

/// Per-session budget accountant and capability enforcer.
///
/// Pure state and arithmetic; the guard performs no I/O.
#[derive(Debug)]
pub struct ExecutionGuard {
    session_id: String,
    budget: BudgetConfig,
    tools: BTreeMap<Role, Allowlist>,
    tokens_used: u64,
    cost_used_usd: f64,
    turns_taken: u32,
    retries: u32,
    started_at: DateTime<Utc>,
}

impl ExecutionGuard {
    /// Construct a guard with process defaults, optional overrides, and a
    /// per-role tool allowlist.
    ///
    /// Roles absent from `tools` behave as [`Allowlist::Unrestricted`]. This
    /// preserves the historical default-allow policy; flip to default-deny by
    /// supplying an explicit `Restricted` entry per role.
    pub fn new(
        session_id: &str,
        overrides: Option<&BudgetOverrides>,
        tools: BTreeMap<Role, Allowlist>,
    ) -> Self {
        let mut budget = BudgetConfig::default();
        if let Some(o) = overrides {
            budget = budget.merged(o);
        }
        Self {
            session_id: session_id.to_string(),
            budget,
            tools,
            tokens_used: 0,
            cost_used_usd: 0.0,
            turns_taken: 0,
            retries: 0,
            started_at: Utc::now(),
        }
    }

    /// The session this guard is scoped to.
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Effective budget after override merge.
    pub fn budget(&self) -> &BudgetConfig {
        &self.budget
    }

    /// Whether `role` may invoke `tool_id`. No side effects.
    pub fn check_tool_access(&self, role: Role, tool_id: &str) -> Option<Violation> {
        match self.tools.get(&role) {
            None | Some(Allowlist::Unrestricted) => None,
            Some(list) if list.permits(tool_id) => None,
            Some(Allowlist::Restricted(allowed)) => Some(Violation {
                kind: ViolationKind::ToolDenied,
                message: format!("role {} may not invoke tool {}", role, tool_id),
                details: json!({
                    "session_id": self.session_id,
                    "role": role.to_string(),
                    "tool": tool_id,
                    "allowed": allowed.iter().collect::<Vec<_>>(),
                }),
            }),
        }
    }

    /// Account one completed turn. Cost is checked before the turn count.
    pub fn record_turn(&mut self, tokens: u64, cost_usd: f64) -> Option<Violation> {
        self.tokens_used += tokens;
        self.cost_used_usd += cost_usd;
        self.turns_taken += 1;

        if self.cost_used_usd >= self.budget.max_total_cost_usd {
            warn!(
                session_id = %self.session_id,
                cost = self.cost_used_usd,
                ceiling = self.budget.max_total_cost_usd,
                "cost budget exhausted"
            );
            return Some(Violation {
                kind: ViolationKind::BudgetExceeded,
                message: format!(
                    "accumulated cost ${:.4} reached ceiling ${:.4}",
                    self.cost_used_usd, self.budget.max_total_cost_usd
                ),
                details: json!({
                    "session_id": self.session_id,
                    "cost_usd": self.cost_used_usd,
                    "ceiling_usd": self.budget.max_total_cost_usd,
                    "turns_taken": self.turns_taken,
                }),
            });
        }

        if self.turns_taken >= self.budget.max_turns {
            warn!(
                session_id = %self.session_id,
                turns = self.turns_taken,
                ceiling = self.budget.max_turns,
                "turn budget exhausted"
            );
            return Some(Violation {
                kind: ViolationKind::TurnLimit,
                message: format!(
                    "turn {} reached ceiling {}",
                    self.turns_taken, self.budget.max_turns
                ),
                details: json!({
                    "session_id": self.session_id,
                    "turns_taken": self.turns_taken,
                    "ceiling": self.budget.max_turns,
                }),
            });
        }

        None
    }

    /// Stateless check that one turn's token sum fits the per-turn ceiling.
    /// Does not mutate accumulators.
    pub fn check_turn_tokens(&self, tokens: u64) -> Option<Violation> {
        if tokens > self.budget.max_tokens_per_turn {
            return Some(Violation {
                kind: ViolationKind::BudgetExceeded,
                message: format!(
                    "turn used {} tokens, per-turn ceiling is {}",
                    tokens, self.budget.max_tokens_per_turn
                ),
                details: json!({
                    "session_id": self.session_id,
                    "tokens": tokens,
                    "ceiling": self.budget.max_tokens_per_turn,
                }),
            });
        }
        None
    }

    /// Account one retry. Exactly `max_retries` retries are permitted; the
    /// next one trips the limit.
    pub fn record_retry(&mut self) -> Option<Violation> {
        self.retries += 1;
        if self.retries > self.budget.max_retries {
            warn!(
                session_id = %self.session_id,
                retries = self.retries,
                ceiling = self.budget.max_retries,
                "retry budget exhausted"
            );
            return Some(Violation {
                kind: ViolationKind::RetryLimit,
                message: format!(
                    "retry {} exceeds ceiling {}",
                    self.retries, self.budget.max_retries
                ),
                details: json!({
                    "session_id": self.session_id,
                    "retries": self.retries,
                    "ceiling": self.budget.max_retries,
                }),
            });
        }
        None
    }

    /// Whether the debate wall-clock ceiling has been reached.
    pub fn check_debate_timeout(&self) -> Option<Violation> {
        let elapsed = (Utc::now() - self.started_at).num_seconds();
        if elapsed >= self.budget.debate_timeout_secs as i64 {
            return Some(Violation {
                kind: ViolationKind::Timeout,
                message: format!(
                    "debate ran {}s, ceiling is {}s",
                    elapsed, self.budget.debate_timeout_secs
                ),
                details: json!({
                    "session_id": self.session_id,
                    "elapsed_secs": elapsed,
                    "ceiling_secs": self.budget.debate_timeout_secs,
                }),
            });
        }
        None
    }

    /// Read-only snapshot of remaining budget.
    pub fn remaining_budget(&self) -> RemainingBudget {
        let elapsed = (Utc::now() - self.started_at).num_seconds();
        let pct = if self.budget.max_total_cost_usd > 0.0 {
            (self.cost_used_usd / self.budget.max_total_cost_usd) * 100.0
        } else {
            100.0
        };
        RemainingBudget {
            cost_remaining_usd: (self.budget.max_total_cost_usd - self.cost_used_usd).max(0.0),
            turns_remaining: self.budget.max_turns.saturating_sub(self.turns_taken),
            retries_remaining: self.budget.max_retries.saturating_sub(self.retries),
            time_remaining_secs: (self.budget.debate_timeout_secs as i64 - elapsed).max(0),
            cost_pct_used: pct,
        }
    }

    /// Turns accounted so far.
    pub fn turns_taken(&self) -> u32 {
        self.turns_taken
    }

    /// Cost accounted so far.
    pub fn cost_used_usd(&self) -> f64 {
        self.cost_used_usd
    }

    /// Tokens accounted so far.
    pub fn tokens_used(&self) -> u64 {
        self.tokens_used
    }

    #[cfg(test)]
    pub(crate) fn backdate_start(&mut self, secs: i64) {
        self.started_at -= chrono::Duration::seconds(secs);
    }
}

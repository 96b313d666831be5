//! Process-level budget defaults.
//!
//! Every ceiling can be overridden per session via [`BudgetOverrides`], and
//! per process via environment variables. Unparseable env values fall back
//! to the compiled defaults rather than failing at load.

use serde::{Deserialize, Serialize};

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Resource ceilings for one negotiation session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetConfig {
    /// Maximum tokens (input + output) a single turn may consume.
    pub max_tokens_per_turn: u64,
    /// Maximum accumulated cost in USD across the session.
    pub max_total_cost_usd: f64,
    /// Maximum turns across the session.
    pub max_turns: u32,
    /// Maximum code-generation retries.
    pub max_retries: u32,
    /// Wall-clock ceiling for one code-generation attempt.
    pub codegen_timeout_secs: u64,
    /// Wall-clock ceiling for the whole debate.
    pub debate_timeout_secs: u64,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            max_tokens_per_turn: env_or("NEGOTIATION_MAX_TOKENS_PER_TURN", 8_000),
            max_total_cost_usd: env_or("NEGOTIATION_MAX_COST_USD", 5.0),
            max_turns: env_or("NEGOTIATION_MAX_TURNS", 20),
            max_retries: env_or("NEGOTIATION_MAX_RETRIES", 3),
            codegen_timeout_secs: env_or("NEGOTIATION_CODEGEN_TIMEOUT_SECS", 600),
            debate_timeout_secs: env_or("NEGOTIATION_DEBATE_TIMEOUT_SECS", 1_800),
        }
    }
}

impl BudgetConfig {
    /// Apply per-session overrides on top of these defaults.
    pub fn merged(mut self, overrides: &BudgetOverrides) -> Self {
        if let Some(v) = overrides.max_tokens_per_turn {
            self.max_tokens_per_turn = v;
        }
        if let Some(v) = overrides.max_total_cost_usd {
            self.max_total_cost_usd = v;
        }
        if let Some(v) = overrides.max_turns {
            self.max_turns = v;
        }
        if let Some(v) = overrides.max_retries {
            self.max_retries = v;
        }
        if let Some(v) = overrides.codegen_timeout_secs {
            self.codegen_timeout_secs = v;
        }
        if let Some(v) = overrides.debate_timeout_secs {
            self.debate_timeout_secs = v;
        }
        self
    }
}

/// Optional per-session ceiling overrides. `None` fields keep the default.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BudgetOverrides {
    pub max_tokens_per_turn: Option<u64>,
    pub max_total_cost_usd: Option<f64>,
    pub max_turns: Option<u32>,
    pub max_retries: Option<u32>,
    pub codegen_timeout_secs: Option<u64>,
    pub debate_timeout_secs: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merged_keeps_defaults_for_none() {
        let base = BudgetConfig {
            max_tokens_per_turn: 8_000,
            max_total_cost_usd: 5.0,
            max_turns: 20,
            max_retries: 3,
            codegen_timeout_secs: 600,
            debate_timeout_secs: 1_800,
        };
        let merged = base.clone().merged(&BudgetOverrides::default());
        assert_eq!(merged.max_turns, base.max_turns);
        assert_eq!(merged.max_retries, base.max_retries);
    }

    #[test]
    fn test_merged_applies_overrides() {
        let base = BudgetConfig {
            max_tokens_per_turn: 8_000,
            max_total_cost_usd: 5.0,
            max_turns: 20,
            max_retries: 3,
            codegen_timeout_secs: 600,
            debate_timeout_secs: 1_800,
        };
        let merged = base.merged(&BudgetOverrides {
            max_turns: Some(6),
            max_total_cost_usd: Some(0.5),
            ..Default::default()
        });
        assert_eq!(merged.max_turns, 6);
        assert!((merged.max_total_cost_usd - 0.5).abs() < f64::EPSILON);
        assert_eq!(merged.max_retries, 3);
    }
}

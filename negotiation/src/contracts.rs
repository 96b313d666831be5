//! Boundary traits for external capabilities.
//!
//! The engine never talks to a model API, a database, or a sandbox directly.
//! Everything external comes in through the traits here, so the negotiation
//! logic stays deterministic under test and swappable in production.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::session::{DebateOutcome, DebateTurn, TokenUsage};

/// Parameters for one completion call.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    /// Persona and negotiation-rule framing.
    pub system_prompt: String,
    /// Output token ceiling for this call.
    pub max_tokens: u32,
    /// Sampling temperature.
    pub temperature: f64,
}

/// Result of one completion call.
#[derive(Debug, Clone)]
pub struct CompletionResponse {
    /// Raw model output.
    pub text: String,
    /// Model identifier actually served.
    pub model: String,
    /// Token accounting reported by the provider.
    pub tokens: TokenUsage,
    /// Provider finish reason (e.g. "stop", "length").
    pub finish_reason: String,
}

/// A model backend capable of producing one agent turn.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn complete(
        &self,
        prompt: &str,
        request: &CompletionRequest,
    ) -> anyhow::Result<CompletionResponse>;
}

/// Converts token usage into USD.
pub trait CostModel: Send + Sync {
    fn calculate_cost(&self, input_tokens: u64, output_tokens: u64, model: &str) -> f64;
}

/// Per-model USD rates per 1K tokens.
#[derive(Debug, Clone, Copy)]
struct ModelRate {
    input_per_1k: f64,
    output_per_1k: f64,
}

/// Static rate table keyed by model name substring, with a conservative
/// fallback for unknown models.
#[derive(Debug, Clone, Default)]
pub struct StaticRateTable;

impl StaticRateTable {
    const RATES: &'static [(&'static str, ModelRate)] = &[
        (
            "gemini-3-pro",
            ModelRate {
                input_per_1k: 0.002,
                output_per_1k: 0.012,
            },
        ),
        (
            "claude-opus-4-5",
            ModelRate {
                input_per_1k: 0.005,
                output_per_1k: 0.025,
            },
        ),
        (
            "gpt-5.2",
            ModelRate {
                input_per_1k: 0.00175,
                output_per_1k: 0.014,
            },
        ),
    ];

    const FALLBACK: ModelRate = ModelRate {
        input_per_1k: 0.005,
        output_per_1k: 0.025,
    };

    fn rate_for(model: &str) -> ModelRate {
        Self::RATES
            .iter()
            .find(|(name, _)| model.contains(name))
            .map(|(_, rate)| *rate)
            .unwrap_or(Self::FALLBACK)
    }
}

impl CostModel for StaticRateTable {
    fn calculate_cost(&self, input_tokens: u64, output_tokens: u64, model: &str) -> f64 {
        let rate = Self::rate_for(model);
        (input_tokens as f64 / 1_000.0) * rate.input_per_1k
            + (output_tokens as f64 / 1_000.0) * rate.output_per_1k
    }
}

/// Persistence for sessions. Failures here never abort a running debate.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Persist a freshly created session.
    async fn save(&self, session: &crate::session::DebateSession) -> anyhow::Result<()>;

    /// Update the turn history and running totals after each turn.
    async fn update_turns(
        &self,
        session_id: &str,
        turns: &[DebateTurn],
        total_tokens: u64,
        total_cost_usd: f64,
    ) -> anyhow::Result<()>;

    /// Record the terminal outcome.
    async fn complete(
        &self,
        session_id: &str,
        outcome: &DebateOutcome,
        duration_ms: u64,
    ) -> anyhow::Result<()>;
}

/// One code generation request handed to a sandboxed coding agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodegenTask {
    /// Directory the agent operates in.
    pub working_dir: String,
    /// Full instruction text, including any corrective feedback.
    pub instructions: String,
}

/// Result reported by the coding agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodegenResult {
    pub success: bool,
    /// Agent's own summary of what it did.
    pub output: String,
    pub files_changed: Vec<String>,
    pub tokens_used: u64,
    pub cost_usd: f64,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Executes one codegen attempt.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CodegenRunner: Send + Sync {
    async fn run(&self, task: &CodegenTask) -> anyhow::Result<CodegenResult>;
}

/// Outcome of one verification gate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateResult {
    /// Gate identifier (e.g. "cargo_test", "clippy").
    pub name: String,
    pub passed: bool,
    /// Raw gate output, used verbatim in corrective feedback.
    pub output: String,
}

/// Runs the verification gate suite against the working directory.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait GateRunner: Send + Sync {
    async fn run_all(&self, working_dir: &str) -> anyhow::Result<Vec<GateResult>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_model_rates() {
        let table = StaticRateTable;
        let cost = table.calculate_cost(1_000, 1_000, "gemini-3-pro");
        assert!((cost - 0.014).abs() < 1e-9);
    }

    #[test]
    fn test_model_match_is_substring() {
        let table = StaticRateTable;
        let exact = table.calculate_cost(2_000, 500, "claude-opus-4-5");
        let suffixed = table.calculate_cost(2_000, 500, "claude-opus-4-5-20251101");
        assert!((exact - suffixed).abs() < 1e-12);
    }

    #[test]
    fn test_unknown_model_uses_fallback() {
        let table = StaticRateTable;
        let cost = table.calculate_cost(1_000, 0, "some-local-model");
        assert!((cost - 0.005).abs() < 1e-9);
    }

    #[test]
    fn test_zero_tokens_cost_nothing() {
        let table = StaticRateTable;
        assert_eq!(table.calculate_cost(0, 0, "gpt-5.2"), 0.0);
    }
}

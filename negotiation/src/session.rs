//! Negotiation data model — config, turns, sessions, and outcomes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::persona::Role;

/// Structured domain facts supplied by the caller alongside the topic.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DomainContext {
    /// Environment tag (e.g. "production", "staging").
    pub environment: String,
    /// Originating ticket identifier.
    pub ticket_id: String,
    /// Short summary of the work item.
    pub summary: String,
    /// Optional design notes relevant to the decision.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub design_notes: Option<String>,
    /// Optional code snippets or file references.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_refs: Option<String>,
    /// Optional prior decisions that constrain this one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prior_decisions: Option<String>,
}

/// Immutable configuration for one debate, supplied by the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebateConfig {
    /// The decision being negotiated.
    pub topic: String,
    /// Domain facts for prompt assembly.
    pub context: DomainContext,
    /// Ordered participant roles. Order is the speaking order.
    pub participants: Vec<Role>,
    /// Designated moderator. Must be a member of `participants`.
    pub moderator: Role,
    /// Maximum turn count for the session.
    pub max_turns: u32,
    /// Cost ceiling in USD for the session.
    pub budget_usd: f64,
}

impl DebateConfig {
    /// Build a config, validating the participant roster.
    pub fn new(
        topic: impl Into<String>,
        context: DomainContext,
        participants: Vec<Role>,
        moderator: Role,
        max_turns: u32,
        budget_usd: f64,
    ) -> Result<Self, ConfigError> {
        if participants.is_empty() {
            return Err(ConfigError::NoParticipants);
        }
        if !participants.contains(&moderator) {
            return Err(ConfigError::ModeratorNotParticipant { moderator });
        }
        if participants.len() < 2 {
            return Err(ConfigError::NoDebaters);
        }
        Ok(Self {
            topic: topic.into(),
            context,
            participants,
            moderator,
            max_turns,
            budget_usd,
        })
    }

    /// Participants excluding the moderator, in config order.
    pub fn debaters(&self) -> Vec<Role> {
        self.participants
            .iter()
            .copied()
            .filter(|r| *r != self.moderator)
            .collect()
    }
}

/// Invalid debate configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Participant list is empty.
    NoParticipants,
    /// Moderator is not in the participant list.
    ModeratorNotParticipant { moderator: Role },
    /// No non-moderator participants to debate.
    NoDebaters,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoParticipants => write!(f, "participant list is empty"),
            Self::ModeratorNotParticipant { moderator } => {
                write!(f, "moderator {} is not a participant", moderator)
            }
            Self::NoDebaters => write!(f, "need at least one non-moderator participant"),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Phase-specific type of a single turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnType {
    /// Framing or initial position.
    Proposal,
    /// Reasoned objection with a mandatory alternative.
    Counter,
    /// Supportive addition to the current direction.
    Supplement,
    /// Moderator consensus summary with review checkpoints.
    Consensus,
    /// Moderator final decision when the debate stalls.
    Decision,
}

impl std::fmt::Display for TurnType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Proposal => write!(f, "proposal"),
            Self::Counter => write!(f, "counter"),
            Self::Supplement => write!(f, "supplement"),
            Self::Consensus => write!(f, "consensus"),
            Self::Decision => write!(f, "decision"),
        }
    }
}

/// A structured artifact extracted from a turn's free text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    /// Artifact type tag (e.g. "design_doc", "task_list").
    #[serde(rename = "type")]
    pub kind: String,
    /// Human-readable title.
    pub title: String,
    /// Artifact body.
    pub content: String,
    /// Optional format hint (e.g. "markdown", "json").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
}

/// Token counts for one completion call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input: u64,
    pub output: u64,
}

impl TokenUsage {
    pub fn total(self) -> u64 {
        self.input + self.output
    }
}

/// One role's single contribution to a debate. Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebateTurn {
    /// Monotonic, 1-based turn number.
    pub number: u32,
    /// The role that produced this turn.
    pub role: Role,
    /// Phase-specific turn type.
    pub turn_type: TurnType,
    /// Free-text content of the turn.
    pub content: String,
    /// Artifacts extracted from the content.
    pub artifacts: Vec<Artifact>,
    /// Token usage for the underlying completion call.
    pub tokens: TokenUsage,
    /// Model identifier reported by the completion capability.
    pub model: String,
    /// Wall-clock duration of the completion call.
    pub duration_ms: u64,
    /// When the turn completed.
    pub timestamp: DateTime<Utc>,
}

/// Terminal status of a completed debate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DebateStatus {
    /// Participants converged on their own.
    Consensus,
    /// Moderator decided after a stalemate.
    ModeratorDecided,
    /// Cost or time budget exhausted.
    BudgetExceeded,
    /// Turn or round ceiling reached without convergence.
    MaxTurnsReached,
    /// Unexpected execution failure.
    Error,
}

impl std::fmt::Display for DebateStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Consensus => write!(f, "consensus"),
            Self::ModeratorDecided => write!(f, "moderator_decided"),
            Self::BudgetExceeded => write!(f, "budget_exceeded"),
            Self::MaxTurnsReached => write!(f, "max_turns_reached"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// A dissenting role's last-stated view, captured at moderator decision time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DissentingView {
    pub role: Role,
    /// Verbatim (truncated) excerpt of the role's last turn.
    pub view: String,
}

/// Terminal outcome of a debate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebateOutcome {
    pub status: DebateStatus,
    /// The agreed or imposed decision text.
    pub decision: String,
    /// Artifacts flattened from all turns, in turn order.
    pub artifacts: Vec<Artifact>,
    /// Populated only for moderator-decided outcomes.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dissenting_views: Vec<DissentingView>,
    /// Populated only for error outcomes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Error from mutating a session in an invalid way.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// A turn was appended after the outcome was set.
    SessionClosed,
    /// Turn number breaks the contiguous 1-based sequence.
    NonContiguousTurn { expected: u32, got: u32 },
    /// A second outcome was set.
    OutcomeAlreadySet,
}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SessionClosed => write!(f, "session already has an outcome"),
            Self::NonContiguousTurn { expected, got } => {
                write!(f, "turn number {} breaks sequence (expected {})", got, expected)
            }
            Self::OutcomeAlreadySet => write!(f, "outcome already set"),
        }
    }
}

impl std::error::Error for SessionError {}

/// The aggregate root: one negotiation from creation to outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebateSession {
    /// Unique session identifier.
    pub id: String,
    /// Originating workflow identifier.
    pub workflow_id: String,
    /// Immutable configuration.
    pub config: DebateConfig,
    /// Ordered turn history. Insertion order is negotiation order.
    pub turns: Vec<DebateTurn>,
    /// Running total of input tokens across turns.
    pub total_tokens_input: u64,
    /// Running total of output tokens across turns.
    pub total_tokens_output: u64,
    /// Running total cost in USD across turns.
    pub total_cost_usd: f64,
    /// Wall-clock duration, set at completion.
    pub duration_ms: u64,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Terminal outcome, set exactly once.
    pub outcome: Option<DebateOutcome>,
    /// Completion time, set with the outcome.
    pub completed_at: Option<DateTime<Utc>>,
}

impl DebateSession {
    /// Create a fresh session for a workflow.
    pub fn new(workflow_id: &str, config: DebateConfig) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            workflow_id: workflow_id.to_string(),
            config,
            turns: Vec::new(),
            total_tokens_input: 0,
            total_tokens_output: 0,
            total_cost_usd: 0.0,
            duration_ms: 0,
            created_at: Utc::now(),
            outcome: None,
            completed_at: None,
        }
    }

    /// The number the next appended turn must carry.
    pub fn next_turn_number(&self) -> u32 {
        self.turns.len() as u32 + 1
    }

    /// Append a turn, updating running totals.
    pub fn record_turn(&mut self, turn: DebateTurn, cost_usd: f64) -> Result<(), SessionError> {
        if self.outcome.is_some() {
            return Err(SessionError::SessionClosed);
        }
        let expected = self.next_turn_number();
        if turn.number != expected {
            return Err(SessionError::NonContiguousTurn {
                expected,
                got: turn.number,
            });
        }
        self.total_tokens_input += turn.tokens.input;
        self.total_tokens_output += turn.tokens.output;
        self.total_cost_usd += cost_usd;
        self.turns.push(turn);
        Ok(())
    }

    /// Set the terminal outcome. The session is immutable afterwards.
    pub fn set_outcome(&mut self, outcome: DebateOutcome) -> Result<(), SessionError> {
        if self.outcome.is_some() {
            return Err(SessionError::OutcomeAlreadySet);
        }
        let now = Utc::now();
        self.duration_ms = (now - self.created_at).num_milliseconds().max(0) as u64;
        self.completed_at = Some(now);
        self.outcome = Some(outcome);
        Ok(())
    }

    /// Whether the session has a terminal outcome.
    pub fn is_complete(&self) -> bool {
        self.outcome.is_some()
    }

    /// Combined token totals.
    pub fn total_tokens(&self) -> u64 {
        self.total_tokens_input + self.total_tokens_output
    }

    /// Whether running totals match the sum over turns. Token totals must
    /// match exactly; cost is checked only by the engine, which owns the
    /// per-turn cost values.
    pub fn token_totals_consistent(&self) -> bool {
        let input: u64 = self.turns.iter().map(|t| t.tokens.input).sum();
        let output: u64 = self.turns.iter().map(|t| t.tokens.output).sum();
        input == self.total_tokens_input && output == self.total_tokens_output
    }

    /// All artifacts across all turns, in turn order.
    pub fn collect_artifacts(&self) -> Vec<Artifact> {
        self.turns
            .iter()
            .flat_map(|t| t.artifacts.iter().cloned())
            .collect()
    }

    /// Last turn produced by the given role, if any.
    pub fn last_turn_of(&self, role: Role) -> Option<&DebateTurn> {
        self.turns.iter().rev().find(|t| t.role == role)
    }

    /// Human-readable markdown transcript for tickets and dashboards.
    pub fn transcript(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("# Negotiation: {}\n\n", self.config.topic));
        for turn in &self.turns {
            out.push_str(&format!(
                "## Turn {} — {} ({})\n\n{}\n\n",
                turn.number, turn.role, turn.turn_type, turn.content
            ));
        }
        if let Some(outcome) = &self.outcome {
            out.push_str(&format!(
                "## Outcome: {}\n\n{}\n",
                outcome.status, outcome.decision
            ));
        }
        out
    }

    /// Compact status line for logs.
    pub fn status_line(&self) -> String {
        format!(
            "[{}] {} turns | {} tokens | ${:.4} | ticket={}",
            self.outcome
                .as_ref()
                .map(|o| o.status.to_string())
                .unwrap_or_else(|| "running".to_string()),
            self.turns.len(),
            self.total_tokens(),
            self.total_cost_usd,
            self.config.context.ticket_id
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_config() -> DebateConfig {
        DebateConfig::new(
            "Split the billing service?",
            DomainContext {
                environment: "production".into(),
                ticket_id: "DEL-101".into(),
                summary: "Billing latency regressions".into(),
                ..Default::default()
            },
            vec![Role::Architect, Role::Implementer, Role::Reviewer],
            Role::Architect,
            10,
            2.0,
        )
        .unwrap()
    }

    fn make_turn(number: u32, role: Role, content: &str) -> DebateTurn {
        DebateTurn {
            number,
            role,
            turn_type: TurnType::Proposal,
            content: content.to_string(),
            artifacts: vec![],
            tokens: TokenUsage {
                input: 100,
                output: 50,
            },
            model: "test-model".to_string(),
            duration_ms: 10,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_config_validates_moderator() {
        let err = DebateConfig::new(
            "t",
            DomainContext::default(),
            vec![Role::Implementer, Role::Reviewer],
            Role::Architect,
            10,
            1.0,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::ModeratorNotParticipant { .. }));
    }

    #[test]
    fn test_config_rejects_empty_roster() {
        let err =
            DebateConfig::new("t", DomainContext::default(), vec![], Role::Architect, 10, 1.0)
                .unwrap_err();
        assert_eq!(err, ConfigError::NoParticipants);
    }

    #[test]
    fn test_config_rejects_moderator_only() {
        let err = DebateConfig::new(
            "t",
            DomainContext::default(),
            vec![Role::Architect],
            Role::Architect,
            10,
            1.0,
        )
        .unwrap_err();
        assert_eq!(err, ConfigError::NoDebaters);
    }

    #[test]
    fn test_debaters_excludes_moderator() {
        let config = make_config();
        let debaters = config.debaters();
        assert_eq!(debaters, vec![Role::Implementer, Role::Reviewer]);
    }

    #[test]
    fn test_record_turn_updates_totals() {
        let mut session = DebateSession::new("wf-1", make_config());
        session
            .record_turn(make_turn(1, Role::Architect, "framing"), 0.01)
            .unwrap();
        session
            .record_turn(make_turn(2, Role::Implementer, "proposal"), 0.02)
            .unwrap();

        assert_eq!(session.total_tokens_input, 200);
        assert_eq!(session.total_tokens_output, 100);
        assert!((session.total_cost_usd - 0.03).abs() < 1e-9);
        assert!(session.token_totals_consistent());
    }

    #[test]
    fn test_record_turn_rejects_gap() {
        let mut session = DebateSession::new("wf-1", make_config());
        let err = session
            .record_turn(make_turn(3, Role::Architect, "skip"), 0.0)
            .unwrap_err();
        assert_eq!(
            err,
            SessionError::NonContiguousTurn {
                expected: 1,
                got: 3
            }
        );
    }

    #[test]
    fn test_no_turns_after_outcome() {
        let mut session = DebateSession::new("wf-1", make_config());
        session
            .record_turn(make_turn(1, Role::Architect, "framing"), 0.0)
            .unwrap();
        session
            .set_outcome(DebateOutcome {
                status: DebateStatus::Error,
                decision: String::new(),
                artifacts: vec![],
                dissenting_views: vec![],
                error: Some("boom".into()),
            })
            .unwrap();

        let err = session
            .record_turn(make_turn(2, Role::Implementer, "late"), 0.0)
            .unwrap_err();
        assert_eq!(err, SessionError::SessionClosed);
    }

    #[test]
    fn test_outcome_set_once() {
        let mut session = DebateSession::new("wf-1", make_config());
        let outcome = DebateOutcome {
            status: DebateStatus::MaxTurnsReached,
            decision: "none".into(),
            artifacts: vec![],
            dissenting_views: vec![],
            error: None,
        };
        session.set_outcome(outcome.clone()).unwrap();
        let err = session.set_outcome(outcome).unwrap_err();
        assert_eq!(err, SessionError::OutcomeAlreadySet);
        assert!(session.is_complete());
        assert!(session.completed_at.is_some());
    }

    #[test]
    fn test_last_turn_of() {
        let mut session = DebateSession::new("wf-1", make_config());
        session
            .record_turn(make_turn(1, Role::Architect, "first"), 0.0)
            .unwrap();
        session
            .record_turn(make_turn(2, Role::Implementer, "second"), 0.0)
            .unwrap();
        session
            .record_turn(make_turn(3, Role::Architect, "third"), 0.0)
            .unwrap();

        assert_eq!(session.last_turn_of(Role::Architect).unwrap().content, "third");
        assert!(session.last_turn_of(Role::Sre).is_none());
    }

    #[test]
    fn test_collect_artifacts_preserves_order() {
        let mut session = DebateSession::new("wf-1", make_config());
        let mut t1 = make_turn(1, Role::Architect, "a");
        t1.artifacts.push(Artifact {
            kind: "design_doc".into(),
            title: "one".into(),
            content: "x".into(),
            format: None,
        });
        let mut t2 = make_turn(2, Role::Implementer, "b");
        t2.artifacts.push(Artifact {
            kind: "task_list".into(),
            title: "two".into(),
            content: "y".into(),
            format: Some("markdown".into()),
        });
        session.record_turn(t1, 0.0).unwrap();
        session.record_turn(t2, 0.0).unwrap();

        let artifacts = session.collect_artifacts();
        assert_eq!(artifacts.len(), 2);
        assert_eq!(artifacts[0].title, "one");
        assert_eq!(artifacts[1].title, "two");
    }

    #[test]
    fn test_transcript_and_status_line() {
        let mut session = DebateSession::new("wf-1", make_config());
        session
            .record_turn(make_turn(1, Role::Architect, "framing text"), 0.0)
            .unwrap();
        let transcript = session.transcript();
        assert!(transcript.contains("Turn 1"));
        assert!(transcript.contains("framing text"));

        let line = session.status_line();
        assert!(line.contains("[running]"));
        assert!(line.contains("DEL-101"));
    }

    #[test]
    fn test_turn_type_display() {
        assert_eq!(TurnType::Proposal.to_string(), "proposal");
        assert_eq!(TurnType::Counter.to_string(), "counter");
        assert_eq!(TurnType::Supplement.to_string(), "supplement");
        assert_eq!(TurnType::Consensus.to_string(), "consensus");
        assert_eq!(TurnType::Decision.to_string(), "decision");
    }

    #[test]
    fn test_status_serde() {
        let json = serde_json::to_string(&DebateStatus::ModeratorDecided).unwrap();
        assert_eq!(json, "\"moderator_decided\"");
    }

    #[test]
    fn test_session_json_roundtrip() {
        let mut session = DebateSession::new("wf-1", make_config());
        session
            .record_turn(make_turn(1, Role::Architect, "framing"), 0.05)
            .unwrap();
        let json = serde_json::to_string(&session).unwrap();
        let parsed: DebateSession = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.turns.len(), 1);
        assert_eq!(parsed.workflow_id, "wf-1");
        assert!(parsed.token_totals_consistent());
    }
}

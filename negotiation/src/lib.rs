//! Agent negotiation and execution-safety core.
//!
//! This library runs structured multi-agent debates over engineering
//! decisions and keeps the surrounding automation inside hard resource
//! boundaries:
//!
//! - **Debate engine**: framing, proposing, and consensus-checked iteration
//!   rounds across a fixed roster of role personas, driven by per-role
//!   completion providers.
//! - **Consensus detector**: bilingual keyword stance classification with
//!   stalemate detection, behind a pluggable classifier trait.
//! - **Execution guard**: per-session cost, turn, retry, and timeout
//!   budgets plus per-role tool allowlists, returning typed violations
//!   instead of panicking.
//! - **Observer**: append-only event log with repetition, token-spike, and
//!   budget-proximity anomaly alerts fanned out to listeners.
//! - **Gate-retry executor**: code generation verified by external gates,
//!   retried with corrective context until the retry budget runs out.
//!
//! Everything external (model APIs, persistence, sandboxes, gates) enters
//! through the traits in [`contracts`]; the core owns no network, file, or
//! CLI surface.

pub mod codegen;
pub mod config;
pub mod consensus;
pub mod contracts;
pub mod engine;
pub mod guard;
pub mod observer;
pub mod persona;
pub mod session;
pub mod turn;

pub use codegen::{GateRetryExecutor, GateRetryOutcome};
pub use config::{BudgetConfig, BudgetOverrides};
pub use consensus::{
    ConsensusDetector, ConsensusResult, ConsensusStatus, KeywordStanceClassifier, Stance,
    StanceClassifier,
};
pub use contracts::{
    CodegenResult, CodegenRunner, CodegenTask, CompletionProvider, CompletionRequest,
    CompletionResponse, CostModel, GateResult, GateRunner, SessionStore, StaticRateTable,
};
pub use engine::{DebateEngine, EngineError};
pub use guard::{Allowlist, ExecutionGuard, RemainingBudget, Violation, ViolationKind};
pub use observer::{
    AlertKind, AlertSeverity, AnomalyAlert, DebateEvent, DebateObserver, EventKind,
};
pub use persona::{Persona, Role};
pub use session::{
    Artifact, ConfigError, DebateConfig, DebateOutcome, DebateSession, DebateStatus, DebateTurn,
    DissentingView, DomainContext, SessionError, TokenUsage, TurnType,
};
pub use turn::{TurnError, TurnExecutor, TurnRequest};

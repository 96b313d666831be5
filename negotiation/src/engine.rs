//! Debate engine — the negotiation state machine.
//!
//! Phases: framing (moderator), proposing (each debater once), iterating
//! (consensus-checked rounds), resolved. Every turn goes through the same
//! fixed pipeline: timeout guard, execution, cost accounting, anomaly pass,
//! incremental persist, optional callback. `run()` always returns a session
//! with an outcome; unexpected failures become `DebateStatus::Error` with
//! the partial history preserved.

use std::collections::BTreeMap;
use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};

use crate::config::BudgetOverrides;
use crate::consensus::{ConsensusDetector, ConsensusStatus, Stance};
use crate::contracts::{CostModel, SessionStore};
use crate::guard::{Allowlist, ExecutionGuard, Violation, ViolationKind};
use crate::observer::DebateObserver;
use crate::persona::Role;
use crate::session::{
    ConfigError, DebateConfig, DebateOutcome, DebateSession, DebateStatus, DebateTurn,
    DissentingView, SessionError, TurnType,
};
use crate::turn::{TurnError, TurnExecutor, TurnRequest};

/// Dissenting views are captured verbatim but bounded.
const DISSENT_EXCERPT_CHARS: usize = 500;

/// Unexpected engine failure. Converted to an `Error` outcome at the top of
/// `run()`; callers never see this type escape.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Turn(#[from] TurnError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

type TurnCallback = Box<dyn Fn(&DebateTurn) + Send + Sync>;

/// Orchestrates debates. One engine may run many sessions; each `run()`
/// call builds fresh per-session guard, observer, and detector state.
pub struct DebateEngine {
    executor: TurnExecutor,
    store: Arc<dyn SessionStore>,
    cost_model: Arc<dyn CostModel>,
    overrides: BudgetOverrides,
    tools: BTreeMap<Role, Allowlist>,
    on_turn: Option<TurnCallback>,
}

impl DebateEngine {
    pub fn new(
        executor: TurnExecutor,
        store: Arc<dyn SessionStore>,
        cost_model: Arc<dyn CostModel>,
    ) -> Self {
        Self {
            executor,
            store,
            cost_model,
            overrides: BudgetOverrides::default(),
            tools: BTreeMap::new(),
            on_turn: None,
        }
    }

    /// Budget overrides applied to every session this engine runs, below
    /// the per-config `max_turns`/`budget_usd` which always win.
    pub fn with_overrides(mut self, overrides: BudgetOverrides) -> Self {
        self.overrides = overrides;
        self
    }

    /// Per-role tool allowlists handed to each session's guard.
    pub fn with_tools(mut self, tools: BTreeMap<Role, Allowlist>) -> Self {
        self.tools = tools;
        self
    }

    /// Callback invoked after each recorded turn, for progress streaming.
    pub fn on_turn(mut self, callback: impl Fn(&DebateTurn) + Send + Sync + 'static) -> Self {
        self.on_turn = Some(Box::new(callback));
        self
    }

    /// Run one debate to a terminal outcome. Always returns the session
    /// with `outcome` populated.
    ///
    /// Persistence failures never propagate as errors: a failed initial
    /// `save` terminates immediately with `DebateStatus::Error` and the
    /// store's error text in `outcome.error`; later incremental persist
    /// failures are logged and swallowed.
    pub async fn run(&self, workflow_id: &str, config: DebateConfig) -> DebateSession {
        let mut session = DebateSession::new(workflow_id, config);
        info!(
            session_id = %session.id,
            workflow_id,
            topic = %session.config.topic,
            participants = session.config.participants.len(),
            "debate started"
        );

        if let Err(e) = self.store.save(&session).await {
            warn!(session_id = %session.id, error = %e, "initial session save failed");
            self.finish(
                &mut session,
                DebateOutcome {
                    status: DebateStatus::Error,
                    decision: String::new(),
                    artifacts: vec![],
                    dissenting_views: vec![],
                    error: Some(format!("session could not be persisted: {e}")),
                },
            )
            .await;
            return session;
        }

        let mut overrides = self.overrides.clone();
        overrides.max_turns = Some(session.config.max_turns);
        overrides.max_total_cost_usd = Some(session.config.budget_usd);
        let mut guard = ExecutionGuard::new(&session.id, Some(&overrides), self.tools.clone());
        let mut observer = DebateObserver::new(
            &session.id,
            session.config.budget_usd,
            guard.budget().debate_timeout_secs,
        );

        let outcome = match self
            .run_phases(&mut session, &mut guard, &mut observer)
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(session_id = %session.id, error = %e, "debate failed");
                DebateOutcome {
                    status: DebateStatus::Error,
                    decision: String::new(),
                    artifacts: session.collect_artifacts(),
                    dissenting_views: vec![],
                    error: Some(e.to_string()),
                }
            }
        };

        self.finish(&mut session, outcome).await;
        info!(session_id = %session.id, "{}", session.status_line());
        session
    }

    async fn run_phases(
        &self,
        session: &mut DebateSession,
        guard: &mut ExecutionGuard,
        observer: &mut DebateObserver,
    ) -> Result<DebateOutcome, EngineError> {
        let moderator = session.config.moderator;
        let debaters = session.config.debaters();
        if debaters.is_empty() {
            // Config fields are public, so the constructor's roster check
            // can be bypassed by a struct literal.
            return Err(EngineError::Config(ConfigError::NoDebaters));
        }
        let mut detector = ConsensusDetector::new();

        // Framing: the moderator always takes turn 1.
        if let Some(v) = self
            .guarded_turn(session, guard, observer, moderator, TurnType::Proposal)
            .await?
        {
            return Ok(self.violation_outcome(session, &v));
        }

        // Proposing: each debater states an initial position.
        for role in &debaters {
            if let Some(v) = self
                .guarded_turn(session, guard, observer, *role, TurnType::Proposal)
                .await?
            {
                return Ok(self.violation_outcome(session, &v));
            }
        }

        // Iterating: consensus-checked rounds until convergence or budget.
        let remaining = session.config.max_turns.saturating_sub(guard.turns_taken());
        let max_rounds = remaining.div_ceil(debaters.len() as u32);
        for round in 0..max_rounds {
            let result = detector.analyze(&session.turns, &debaters);
            info!(
                session_id = %session.id,
                round,
                rate = result.rate,
                status = %result.status,
                "consensus check"
            );

            if result.is_stalemate {
                if let Some(v) = self
                    .guarded_turn(session, guard, observer, moderator, TurnType::Decision)
                    .await?
                {
                    return Ok(self.violation_outcome(session, &v));
                }
                let decision = session
                    .last_turn_of(moderator)
                    .map(|t| t.content.clone())
                    .unwrap_or_default();
                let dissenting_views = result
                    .dissenting_roles()
                    .into_iter()
                    .filter_map(|role| {
                        session.last_turn_of(role).map(|t| DissentingView {
                            role,
                            view: truncate_chars(&t.content, DISSENT_EXCERPT_CHARS),
                        })
                    })
                    .collect();
                return Ok(DebateOutcome {
                    status: DebateStatus::ModeratorDecided,
                    decision,
                    artifacts: session.collect_artifacts(),
                    dissenting_views,
                    error: None,
                });
            }

            if result.status == ConsensusStatus::Consensus {
                if let Some(v) = self
                    .guarded_turn(session, guard, observer, moderator, TurnType::Consensus)
                    .await?
                {
                    return Ok(self.violation_outcome(session, &v));
                }
                let decision = session
                    .last_turn_of(moderator)
                    .map(|t| t.content.clone())
                    .unwrap_or_default();
                return Ok(DebateOutcome {
                    status: DebateStatus::Consensus,
                    decision,
                    artifacts: session.collect_artifacts(),
                    dissenting_views: vec![],
                    error: None,
                });
            }

            for role in &debaters {
                let turn_type = if result.stance_of(*role) == Stance::Disagree {
                    TurnType::Counter
                } else {
                    TurnType::Supplement
                };
                if let Some(v) = self
                    .guarded_turn(session, guard, observer, *role, turn_type)
                    .await?
                {
                    return Ok(self.violation_outcome(session, &v));
                }
            }
        }

        Ok(DebateOutcome {
            status: DebateStatus::MaxTurnsReached,
            decision: format!(
                "no consensus within {} turns; last consensus rate history exhausted the round budget",
                session.turns.len()
            ),
            artifacts: session.collect_artifacts(),
            dissenting_views: vec![],
            error: None,
        })
    }

    /// The fixed per-turn pipeline. Returns the guard violation, if any,
    /// after the turn has been recorded and persisted.
    async fn guarded_turn(
        &self,
        session: &mut DebateSession,
        guard: &mut ExecutionGuard,
        observer: &mut DebateObserver,
        role: Role,
        turn_type: TurnType,
    ) -> Result<Option<Violation>, EngineError> {
        if let Some(v) = guard.check_debate_timeout() {
            warn!(session_id = %session.id, "{}", v);
            return Ok(Some(v));
        }

        let number = session.next_turn_number();
        observer.on_turn_start(role, number);

        let turn = self
            .executor
            .execute_turn(TurnRequest {
                role,
                turn_type,
                number,
                topic: &session.config.topic,
                context: &session.config.context,
                history: &session.turns,
            })
            .await?;

        let cost = self
            .cost_model
            .calculate_cost(turn.tokens.input, turn.tokens.output, &turn.model);

        if let Some(v) = guard.check_turn_tokens(turn.tokens.total()) {
            observer.on_budget_warning(&v.message);
        }
        let violation = guard.record_turn(turn.tokens.total(), cost);
        observer.on_turn_end(&turn, guard.cost_used_usd());

        session.record_turn(turn, cost)?;
        if let Err(e) = self
            .store
            .update_turns(
                &session.id,
                &session.turns,
                session.total_tokens(),
                session.total_cost_usd,
            )
            .await
        {
            warn!(session_id = %session.id, error = %e, "incremental turn persist failed");
        }
        if let (Some(callback), Some(turn)) = (&self.on_turn, session.turns.last()) {
            callback(turn);
        }

        Ok(violation)
    }

    fn violation_outcome(&self, session: &DebateSession, violation: &Violation) -> DebateOutcome {
        DebateOutcome {
            status: violation_status(violation.kind),
            decision: format!("debate halted: {}", violation),
            artifacts: session.collect_artifacts(),
            dissenting_views: vec![],
            error: None,
        }
    }

    async fn finish(&self, session: &mut DebateSession, outcome: DebateOutcome) {
        let persisted = outcome.clone();
        if let Err(e) = session.set_outcome(outcome) {
            warn!(session_id = %session.id, error = %e, "outcome already set");
            return;
        }
        if let Err(e) = self
            .store
            .complete(&session.id, &persisted, session.duration_ms)
            .await
        {
            warn!(session_id = %session.id, error = %e, "completion persist failed");
        }
    }
}

/// Time is treated as a budget; the outcome's decision text still names
/// the specific violation.
fn violation_status(kind: ViolationKind) -> DebateStatus {
    match kind {
        ViolationKind::BudgetExceeded | ViolationKind::Timeout => DebateStatus::BudgetExceeded,
        ViolationKind::TurnLimit => DebateStatus::MaxTurnsReached,
        ViolationKind::RetryLimit | ViolationKind::ToolDenied => DebateStatus::Error,
    }
}

fn truncate_chars(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        text.to_string()
    } else {
        text.chars().take(limit).collect()
    }
}

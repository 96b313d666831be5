//! Gate-retry executor — generate, verify, retry with corrective context.
//!
//! Each attempt runs the code generator, then the verification gate suite.
//! Failing-gate output is excerpted into the next prompt. The guard's retry
//! budget bounds the loop; exhaustion returns the last real results, never
//! a synthetic success.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::contracts::{CodegenResult, CodegenRunner, CodegenTask, GateResult, GateRunner};
use crate::guard::{ExecutionGuard, Violation};
use crate::observer::DebateObserver;

/// Gate output excerpt length fed back as corrective context.
const GATE_EXCERPT_CHARS: usize = 1_000;

/// Terminal result of a gate-retry run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateRetryOutcome {
    /// Whether generation succeeded and every gate passed.
    pub success: bool,
    /// Attempts made, including the final one.
    pub attempts: u32,
    /// Last real generation result, if any attempt produced one.
    pub generation: Option<CodegenResult>,
    /// Gate results from the last verified attempt.
    pub gates: Vec<GateResult>,
    /// Violation that stopped the loop, when not successful.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub halted_by: Option<Violation>,
}

/// Drives codegen attempts through the verification gates.
pub struct GateRetryExecutor {
    runner: Arc<dyn CodegenRunner>,
    gates: Arc<dyn GateRunner>,
}

impl GateRetryExecutor {
    pub fn new(runner: Arc<dyn CodegenRunner>, gates: Arc<dyn GateRunner>) -> Self {
        Self { runner, gates }
    }

    /// Run the generate/verify loop until success or retry exhaustion.
    ///
    /// Generation failures retry with the prompt unchanged and without
    /// running gates. Gate failures append excerpts of each failing gate's
    /// output before retrying.
    pub async fn run(
        &self,
        task: CodegenTask,
        guard: &mut ExecutionGuard,
        mut observer: Option<&mut DebateObserver>,
    ) -> GateRetryOutcome {
        let mut instructions = task.instructions.clone();
        let mut attempts = 0u32;
        let mut last_generation: Option<CodegenResult> = None;
        let mut last_gates: Vec<GateResult> = Vec::new();

        loop {
            attempts += 1;
            let attempt_task = CodegenTask {
                working_dir: task.working_dir.clone(),
                instructions: instructions.clone(),
            };

            let generation = match self.runner.run(&attempt_task).await {
                Ok(result) => {
                    last_generation = Some(result.clone());
                    if result.success {
                        Some(result)
                    } else {
                        warn!(
                            attempt = attempts,
                            error = result.error.as_deref().unwrap_or("unknown"),
                            "code generation reported failure"
                        );
                        None
                    }
                }
                Err(e) => {
                    warn!(attempt = attempts, error = %e, "code generation call failed");
                    None
                }
            };

            if let Some(generation) = generation {
                match self.gates.run_all(&task.working_dir).await {
                    Ok(results) => {
                        if let Some(obs) = observer.as_deref_mut() {
                            for gate in &results {
                                obs.on_gate_result(&gate.name, gate.passed);
                            }
                        }
                        let failing: Vec<&GateResult> =
                            results.iter().filter(|g| !g.passed).collect();
                        if failing.is_empty() {
                            info!(attempts, "all verification gates passed");
                            return GateRetryOutcome {
                                success: true,
                                attempts,
                                generation: Some(generation),
                                gates: results,
                                halted_by: None,
                            };
                        }
                        instructions.push_str(
                            "\n\n## Corrective context from failed verification\n",
                        );
                        for gate in &failing {
                            instructions.push_str(&format!(
                                "### Gate `{}` failed\n{}\n",
                                gate.name,
                                excerpt(&gate.output)
                            ));
                        }
                        last_gates = results;
                    }
                    Err(e) => {
                        // Gate infrastructure failure counts as a failed
                        // attempt with the prompt unchanged.
                        warn!(attempt = attempts, error = %e, "gate suite failed to run");
                        last_gates = Vec::new();
                    }
                }
            }

            if let Some(violation) = guard.record_retry() {
                warn!(attempts, "{}", violation);
                return GateRetryOutcome {
                    success: false,
                    attempts,
                    generation: last_generation,
                    gates: last_gates,
                    halted_by: Some(violation),
                };
            }
        }
    }
}

fn excerpt(output: &str) -> String {
    if output.chars().count() <= GATE_EXCERPT_CHARS {
        output.to_string()
    } else {
        output.chars().take(GATE_EXCERPT_CHARS).collect()
    }
}

//! End-to-end gate-retry scenarios against scripted runners.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use negotiation::{
    BudgetOverrides, CodegenResult, CodegenRunner, CodegenTask, ExecutionGuard, GateResult,
    GateRetryExecutor, GateRunner, ViolationKind,
};

/// Runner that replays scripted results and records every instruction set
/// it was invoked with.
#[derive(Default)]
struct ScriptedRunner {
    results: Mutex<VecDeque<anyhow::Result<CodegenResult>>>,
    instructions_seen: Mutex<Vec<String>>,
}

impl ScriptedRunner {
    fn with_results(results: Vec<anyhow::Result<CodegenResult>>) -> Self {
        Self {
            results: Mutex::new(results.into()),
            instructions_seen: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl CodegenRunner for ScriptedRunner {
    async fn run(&self, task: &CodegenTask) -> anyhow::Result<CodegenResult> {
        self.instructions_seen
            .lock()
            .unwrap()
            .push(task.instructions.clone());
        self.results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(anyhow::anyhow!("script exhausted")))
    }
}

#[derive(Default)]
struct ScriptedGates {
    results: Mutex<VecDeque<Vec<GateResult>>>,
}

impl ScriptedGates {
    fn with_results(results: Vec<Vec<GateResult>>) -> Self {
        Self {
            results: Mutex::new(results.into()),
        }
    }
}

#[async_trait]
impl GateRunner for ScriptedGates {
    async fn run_all(&self, _working_dir: &str) -> anyhow::Result<Vec<GateResult>> {
        self.results
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| anyhow::anyhow!("gate script exhausted"))
    }
}

fn guard(max_retries: u32) -> ExecutionGuard {
    ExecutionGuard::new(
        "cg-1",
        Some(&BudgetOverrides {
            max_retries: Some(max_retries),
            ..Default::default()
        }),
        BTreeMap::new(),
    )
}

fn task() -> CodegenTask {
    CodegenTask {
        working_dir: "/tmp/work".into(),
        instructions: "Implement the rate limiter per the agreed design.".into(),
    }
}

fn generation_ok() -> CodegenResult {
    CodegenResult {
        success: true,
        output: "implemented".into(),
        files_changed: vec!["src/limiter.rs".into()],
        tokens_used: 2_000,
        cost_usd: 0.04,
        duration_ms: 1_200,
        error: None,
    }
}

fn gate(name: &str, passed: bool, output: &str) -> GateResult {
    GateResult {
        name: name.into(),
        passed,
        output: output.into(),
    }
}

#[tokio::test]
async fn test_clean_first_attempt() {
    let runner = Arc::new(ScriptedRunner::with_results(vec![Ok(generation_ok())]));
    let gates = Arc::new(ScriptedGates::with_results(vec![vec![
        gate("cargo_build", true, "ok"),
        gate("cargo_test", true, "ok"),
    ]]));

    let executor = GateRetryExecutor::new(runner.clone() as Arc<dyn CodegenRunner>, gates);
    let mut g = guard(3);
    let outcome = executor.run(task(), &mut g, None).await;

    assert!(outcome.success);
    assert_eq!(outcome.attempts, 1);
    assert_eq!(outcome.gates.len(), 2);
    assert_eq!(runner.instructions_seen.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_corrective_prompt_grows_across_attempts() {
    let runner = Arc::new(ScriptedRunner::with_results(vec![
        Ok(generation_ok()),
        Ok(generation_ok()),
        Ok(generation_ok()),
    ]));
    let gates = Arc::new(ScriptedGates::with_results(vec![
        vec![gate("cargo_test", false, "test limiter_burst ... FAILED")],
        vec![gate("clippy", false, "error: this loop never loops")],
        vec![gate("cargo_test", true, "ok"), gate("clippy", true, "ok")],
    ]));

    let executor = GateRetryExecutor::new(runner.clone() as Arc<dyn CodegenRunner>, gates);
    let mut g = guard(5);
    let outcome = executor.run(task(), &mut g, None).await;

    assert!(outcome.success);
    assert_eq!(outcome.attempts, 3);

    let seen = runner.instructions_seen.lock().unwrap();
    assert!(!seen[0].contains("Corrective context"));
    assert!(seen[1].contains("Gate `cargo_test` failed"));
    assert!(seen[1].contains("limiter_burst"));
    // Second retry carries both rounds of feedback.
    assert!(seen[2].contains("limiter_burst"));
    assert!(seen[2].contains("Gate `clippy` failed"));
    assert!(seen[2].len() > seen[1].len());
}

#[tokio::test]
async fn test_exhaustion_keeps_last_real_results() {
    let runner = Arc::new(ScriptedRunner::with_results(vec![
        Ok(generation_ok()),
        Ok(generation_ok()),
    ]));
    let gates = Arc::new(ScriptedGates::with_results(vec![
        vec![gate("cargo_test", false, "2 tests failed")],
        vec![gate("cargo_test", false, "1 test failed")],
    ]));

    let executor = GateRetryExecutor::new(runner.clone() as Arc<dyn CodegenRunner>, gates);
    let mut g = guard(1);
    let outcome = executor.run(task(), &mut g, None).await;

    assert!(!outcome.success);
    assert_eq!(outcome.attempts, 2);
    assert!(outcome.generation.is_some());
    assert_eq!(outcome.gates[0].output, "1 test failed");
    assert_eq!(
        outcome.halted_by.as_ref().unwrap().kind,
        ViolationKind::RetryLimit
    );
}

#[tokio::test]
async fn test_generation_failure_retries_without_gates() {
    let runner = Arc::new(ScriptedRunner::with_results(vec![
        Err(anyhow::anyhow!("sandbox boot failed")),
        Ok(generation_ok()),
    ]));
    let gates = Arc::new(ScriptedGates::with_results(vec![vec![gate(
        "cargo_test",
        true,
        "ok",
    )]]));

    let executor = GateRetryExecutor::new(runner.clone() as Arc<dyn CodegenRunner>, gates);
    let mut g = guard(3);
    let outcome = executor.run(task(), &mut g, None).await;

    assert!(outcome.success);
    assert_eq!(outcome.attempts, 2);

    // The retry after a generation failure keeps the prompt unchanged.
    let seen = runner.instructions_seen.lock().unwrap();
    assert_eq!(seen[0], seen[1]);
}

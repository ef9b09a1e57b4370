//! Evaluation orchestrator.
//!
//! Drives a submission through the governor, the execution backend and
//! the comparator, emitting lifecycle events as each test case
//! resolves. A whole run occupies exactly one governor slot: its test
//! cases execute strictly in order and are never interleaved with
//! another run's cases at the backend-call level.

pub mod stream;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::assets;
use crate::compare;
use crate::config::{Config, LimitsConfig};
use crate::governor::{self, Admitter};
use crate::retry::RetryPolicy;
use crate::sandbox::{
    self, ExecutionRequest, ExecutionResult, ExitClassification, FileAssets, SandboxBackend,
};
use stream::{EvaluationStream, EventSink, RunEvent};

/// One test case, as supplied by the question store. Read-only here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestCase {
    pub input: String,
    pub expected_output: String,
    /// Per-test file overrides; take precedence over question-level
    /// assets.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_assets: Option<FileAssets>,
}

/// Result of one test case within a run.
#[derive(Debug, Clone, Serialize)]
pub struct TestOutcome {
    pub input: String,
    pub expected: String,
    pub actual: String,
    pub error: Option<String>,
    pub passed: bool,
}

/// Failures the dispatcher raises to its callers. Execution outcomes
/// of the submitted program itself (wrong answer, crash, timeout) are
/// reported as data in [`TestOutcome`], never through this enum.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("failed to generate test inputs: {0}")]
    InputGenerationFailed(String),
    #[error("execution service unavailable: {0}")]
    ServiceUnavailable(String),
    #[error("execution backend is throttling requests")]
    Throttled,
    #[error("execution timed out")]
    Timeout,
    #[error("memory limit exceeded")]
    MemoryExceeded,
    #[error("failed to start sandboxed process: {0}")]
    SpawnFailure(String),
    #[error("{0}")]
    Unknown(String),
}

impl DispatchError {
    /// Escalates an infrastructure-flavored result into a hard error,
    /// for callers that cannot treat it as a graded outcome.
    /// Program-level results (`Success`, `NonZeroExit`) map to `None`.
    pub fn from_result(result: &ExecutionResult) -> Option<DispatchError> {
        let message = || result.error.clone().unwrap_or_default();
        match result.classification {
            ExitClassification::Success | ExitClassification::NonZeroExit => None,
            ExitClassification::TimedOut => Some(DispatchError::Timeout),
            ExitClassification::MemoryExceeded => Some(DispatchError::MemoryExceeded),
            ExitClassification::ServiceUnavailable => {
                Some(DispatchError::ServiceUnavailable(message()))
            }
            ExitClassification::Throttled => Some(DispatchError::Throttled),
            ExitClassification::SpawnFailure => Some(DispatchError::SpawnFailure(message())),
        }
    }
}

/// Orchestrates evaluation runs. Cheap to clone per submission via the
/// shared backend and admitter handles.
#[derive(Clone)]
pub struct Evaluator {
    backend: Arc<dyn SandboxBackend>,
    admitter: Arc<dyn Admitter>,
    limits: LimitsConfig,
    retry: RetryPolicy,
}

impl Evaluator {
    pub fn new(
        backend: Arc<dyn SandboxBackend>,
        admitter: Arc<dyn Admitter>,
        limits: LimitsConfig,
    ) -> Self {
        Self {
            backend,
            admitter,
            limits,
            retry: RetryPolicy::default(),
        }
    }

    /// Wires up backend and governor from config.
    pub fn from_config(config: &Config) -> Self {
        let backend = sandbox::from_config(&config.backend, &config.limits);
        let admitter = governor::from_config(&config.governor);
        info!(
            "evaluator ready: backend {}, admission {}",
            backend.description(),
            admitter.description()
        );
        Self::new(backend, admitter, config.limits.clone())
    }

    /// Evaluates a submission against a full test suite.
    ///
    /// Emits `Queued` immediately — before queue admission — so the
    /// caller sees feedback even while waiting behind other work. The
    /// run itself executes inside one admitted task; dropping the
    /// returned stream does not cancel it.
    pub fn evaluate(
        &self,
        source_code: String,
        test_cases: Vec<TestCase>,
        global_assets: FileAssets,
    ) -> EvaluationStream {
        let (sink, out) = EventSink::channel();
        let run_id = Uuid::new_v4();
        info!(%run_id, tests = test_cases.len(), "submission queued");
        sink.emit(RunEvent::Queued);

        let backend = self.backend.clone();
        let admitter = self.admitter.clone();
        let limits = self.limits.clone();
        let retry = self.retry;
        tokio::spawn(async move {
            let admitted = governor::admit(admitter.as_ref(), move || {
                run_suite(
                    backend,
                    limits,
                    retry,
                    run_id,
                    source_code,
                    test_cases,
                    global_assets,
                    sink,
                )
            })
            .await;
            if let Err(e) = admitted {
                // The sink was dropped with the unexecuted task, which
                // already delivered the terminal error to the caller.
                error!(%run_id, "evaluation never ran: {e}");
            }
        });

        out
    }

    /// Runs code once against raw stdin — the "try it" path.
    ///
    /// Same lifecycle as [`evaluate`](Self::evaluate) with exactly one
    /// implicit test case. With no expected output to compare against,
    /// `passed` means the program completed without error and stdout is
    /// passed through untrimmed; normalization belongs to grading.
    pub fn run_single(&self, source_code: String, stdin: String) -> EvaluationStream {
        let (sink, out) = EventSink::channel();
        let run_id = Uuid::new_v4();
        info!(%run_id, "single execution queued");
        sink.emit(RunEvent::Queued);

        let backend = self.backend.clone();
        let admitter = self.admitter.clone();
        let timeout = self.limits.run_timeout();
        let retry = self.retry;
        tokio::spawn(async move {
            let admitted = governor::admit(admitter.as_ref(), move || async move {
                sink.emit(RunEvent::Processing);
                let request = ExecutionRequest::new(source_code, stdin.clone(), timeout);
                let result = sandbox::execute_with_retry(backend.as_ref(), &request, &retry).await;
                let outcome = TestOutcome {
                    input: stdin,
                    expected: String::new(),
                    actual: result.stdout,
                    passed: result.error.is_none(),
                    error: result.error,
                };
                sink.emit(RunEvent::TestCaseCompleted {
                    index: 0,
                    outcome: outcome.clone(),
                });
                sink.completed(vec![outcome]);
            })
            .await;
            if let Err(e) = admitted {
                error!(%run_id, "single execution never ran: {e}");
            }
        });

        out
    }

    /// Runs an input-generation script under the longer assist budget
    /// and parses its stdout into a list of test inputs: a JSON string
    /// array first, falling back to one input per non-empty line.
    pub async fn generate_inputs(&self, script: String) -> Result<Vec<String>, DispatchError> {
        let backend = self.backend.clone();
        let retry = self.retry;
        let request = ExecutionRequest::new(script, "", self.limits.generation_timeout());

        let result = governor::admit(self.admitter.as_ref(), move || async move {
            sandbox::execute_with_retry(backend.as_ref(), &request, &retry).await
        })
        .await
        .map_err(|e| DispatchError::Unknown(e.to_string()))?;

        if let Some(error) = result.error {
            return Err(DispatchError::InputGenerationFailed(error));
        }

        let inputs = parse_generated_inputs(&result.stdout);
        if inputs.is_empty() {
            return Err(DispatchError::InputGenerationFailed(
                "script produced no usable inputs".to_string(),
            ));
        }
        Ok(inputs)
    }
}

/// Body of one admitted suite run. Holds the governor slot from
/// `Processing` until the terminal event.
///
/// A panic anywhere in here drops `sink`, which emits the `Error`
/// terminal and skips the remaining test cases — fail-fast, with the
/// already-emitted outcomes still valid to the caller.
#[allow(clippy::too_many_arguments)]
async fn run_suite(
    backend: Arc<dyn SandboxBackend>,
    limits: LimitsConfig,
    retry: RetryPolicy,
    run_id: Uuid,
    source_code: String,
    test_cases: Vec<TestCase>,
    global_assets: FileAssets,
    sink: EventSink,
) {
    sink.emit(RunEvent::Processing);
    debug!(%run_id, "run admitted, executing {} test case(s)", test_cases.len());

    let mut outcomes = Vec::with_capacity(test_cases.len());
    for (index, test_case) in test_cases.iter().enumerate() {
        let resolved = assets::resolve(
            &test_case.input,
            test_case.file_assets.as_ref(),
            &global_assets,
        );
        let request = ExecutionRequest {
            source_code: source_code.clone(),
            stdin: resolved.stdin,
            file_assets: resolved.file_assets,
            timeout: limits.run_timeout(),
        };

        let result = sandbox::execute_with_retry(backend.as_ref(), &request, &retry).await;
        let outcome = build_outcome(test_case, result);
        if !outcome.passed {
            debug!(%run_id, index, error = ?outcome.error, "test case failed");
        }

        sink.emit(RunEvent::TestCaseCompleted {
            index,
            outcome: outcome.clone(),
        });
        outcomes.push(outcome);
    }

    let all_passed = outcomes.iter().all(|o| o.passed);
    info!(%run_id, all_passed, "run completed");
    sink.completed(outcomes);
}

/// Grades one execution result against its test case. An execution
/// error forces failure regardless of output content.
fn build_outcome(test_case: &TestCase, result: ExecutionResult) -> TestOutcome {
    let actual = result.stdout.trim().to_string();
    let expected = test_case.expected_output.trim().to_string();
    let passed = result.error.is_none() && compare::outputs_match(&actual, &expected);
    TestOutcome {
        input: test_case.input.clone(),
        expected,
        actual,
        error: result.error,
        passed,
    }
}

fn parse_generated_inputs(output: &str) -> Vec<String> {
    let trimmed = output.trim();
    if let Ok(values) = serde_json::from_str::<Vec<String>>(trimmed) {
        return values;
    }
    warn!("input script output is not a JSON string array, falling back to line split");
    trimmed
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(String::from)
        .collect()
}

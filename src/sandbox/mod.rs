//! Execution backend abstraction.
//!
//! A `SandboxBackend` performs one execution of untrusted code and
//! reports the result as data: every failure mode is an
//! [`ExitClassification`], never an `Err`. "The student's program
//! crashed" is a normal, expected result, not a system error.
//!
//! The backend is selected from config, like any other provider seam:
//! a remote Piston-compatible service for real deployments, or a local
//! unsandboxed spawn for development.

pub mod local;
pub mod piston;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::config::{BackendConfig, LimitsConfig};
use crate::retry::RetryPolicy;

/// Named files presented to the sandboxed program, keyed by filename.
/// `BTreeMap` keeps the wire-level file ordering deterministic.
pub type FileAssets = BTreeMap<String, String>;

/// One execution of one piece of source code. Immutable once built.
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub source_code: String,
    pub stdin: String,
    pub file_assets: FileAssets,
    pub timeout: Duration,
}

impl ExecutionRequest {
    pub fn new(source_code: impl Into<String>, stdin: impl Into<String>, timeout: Duration) -> Self {
        Self {
            source_code: source_code.into(),
            stdin: stdin.into(),
            file_assets: FileAssets::new(),
            timeout,
        }
    }
}

/// How an execution terminated, in the dispatcher's taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitClassification {
    Success,
    NonZeroExit,
    TimedOut,
    MemoryExceeded,
    /// Backend unreachable, or it stopped honoring its own deadline.
    ServiceUnavailable,
    /// Backend rejected the call rate (HTTP 429 semantics).
    Throttled,
    /// The sandboxed process could not be started at all.
    SpawnFailure,
}

/// Produced exactly once per [`ExecutionRequest`].
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub stdout: String,
    pub error: Option<String>,
    pub classification: ExitClassification,
}

impl ExecutionResult {
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            error: None,
            classification: ExitClassification::Success,
        }
    }

    pub fn failure(
        classification: ExitClassification,
        stdout: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            stdout: stdout.into(),
            error: Some(error.into()),
            classification,
        }
    }

    pub fn is_throttled(&self) -> bool {
        self.classification == ExitClassification::Throttled
    }
}

/// Abstraction over execution backends (Piston, local spawn, etc.).
///
/// Each backend translates the request into its own invocation format
/// and normalizes the result back into [`ExecutionResult`]. Backends
/// are stateless between calls.
#[async_trait]
pub trait SandboxBackend: Send + Sync {
    /// Runs the request to completion, timeout, or backend-reported
    /// termination. Never hangs: implementations carry their own
    /// host-side deadline.
    async fn execute(&self, request: &ExecutionRequest) -> ExecutionResult;

    /// Human-readable description of the backend, for status output.
    fn description(&self) -> String;
}

/// Builds the backend selected by config.
pub fn from_config(backend: &BackendConfig, limits: &LimitsConfig) -> Arc<dyn SandboxBackend> {
    match backend {
        BackendConfig::Piston {
            endpoint,
            language,
            version,
        } => Arc::new(piston::PistonBackend::new(
            endpoint, language, version, limits,
        )),
        BackendConfig::Local { interpreter } => {
            warn!("local backend selected: executions are NOT isolated");
            Arc::new(local::LocalBackend::new(interpreter))
        }
    }
}

/// Executes `request`, retrying only throttled results.
///
/// Sleeps through the policy's schedule (1s, 2s, 4s by default)
/// between attempts. Once the budget is spent the final throttled
/// result is returned as data; the caller decides whether to
/// re-submit. Every other classification is terminal on the first
/// attempt.
pub async fn execute_with_retry(
    backend: &dyn SandboxBackend,
    request: &ExecutionRequest,
    policy: &RetryPolicy,
) -> ExecutionResult {
    let mut result = backend.execute(request).await;
    let mut attempt = 0;

    while result.is_throttled() {
        attempt += 1;
        let Some(delay) = policy.delay_before(attempt) else {
            warn!(
                "backend still throttling after {} retries, giving up",
                policy.max_retries
            );
            break;
        };
        debug!("backend throttled, retrying in {delay:?} (attempt {attempt})");
        tokio::time::sleep(delay).await;
        result = backend.execute(request).await;
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tokio::time::Instant;

    /// Backend that replays a scripted sequence of results.
    struct ScriptedBackend {
        results: Mutex<Vec<ExecutionResult>>,
    }

    impl ScriptedBackend {
        fn new(results: Vec<ExecutionResult>) -> Self {
            Self {
                results: Mutex::new(results),
            }
        }
    }

    #[async_trait]
    impl SandboxBackend for ScriptedBackend {
        async fn execute(&self, _request: &ExecutionRequest) -> ExecutionResult {
            let mut results = self.results.lock().unwrap();
            assert!(!results.is_empty(), "backend called more times than scripted");
            results.remove(0)
        }

        fn description(&self) -> String {
            "scripted".to_string()
        }
    }

    fn throttled() -> ExecutionResult {
        ExecutionResult::failure(ExitClassification::Throttled, "", "too many requests")
    }

    fn request() -> ExecutionRequest {
        ExecutionRequest::new("print(1)", "", Duration::from_secs(5))
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_recovers_after_two_throttles() {
        let backend = ScriptedBackend::new(vec![
            throttled(),
            throttled(),
            ExecutionResult::success("ok\n"),
        ]);
        let start = Instant::now();

        let result =
            execute_with_retry(&backend, &request(), &RetryPolicy::default()).await;

        assert_eq!(result.classification, ExitClassification::Success);
        assert_eq!(result.stdout, "ok\n");
        // slept 1s then 2s between the three attempts
        assert_eq!(start.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_budget_exhausted_returns_throttled() {
        // 1 initial attempt + 3 retries, all throttled
        let backend = ScriptedBackend::new(vec![
            throttled(),
            throttled(),
            throttled(),
            throttled(),
        ]);

        let result =
            execute_with_retry(&backend, &request(), &RetryPolicy::default()).await;

        // terminal result, not a panic or an error
        assert!(result.is_throttled());
        assert!(result.error.is_some());
        assert!(backend.results.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_non_throttle_failures_are_not_retried() {
        let backend = ScriptedBackend::new(vec![ExecutionResult::failure(
            ExitClassification::ServiceUnavailable,
            "",
            "connection refused",
        )]);

        let result =
            execute_with_retry(&backend, &request(), &RetryPolicy::default()).await;

        assert_eq!(
            result.classification,
            ExitClassification::ServiceUnavailable
        );
        // only one scripted result existed, so a retry would have panicked
    }

    #[tokio::test]
    async fn test_success_passes_through() {
        let backend = ScriptedBackend::new(vec![ExecutionResult::success("42\n")]);
        let result =
            execute_with_retry(&backend, &request(), &RetryPolicy::default()).await;
        assert_eq!(result.classification, ExitClassification::Success);
        assert!(result.error.is_none());
    }
}

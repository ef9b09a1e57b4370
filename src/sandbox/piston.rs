//! Remote Piston execution backend.
//!
//! Calls `POST <endpoint>` with the source bundle and stdin; the
//! service compiles and runs the code under its own isolation and
//! returns captured output, exit code and kill signal. Responses are
//! normalized into the dispatcher's classification taxonomy.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{ExecutionRequest, ExecutionResult, ExitClassification, SandboxBackend};
use crate::config::LimitsConfig;

// ── Piston API types ─────────────────────────────────────

/// Piston `/execute` request body.
#[derive(Serialize)]
struct ExecuteRequest<'a> {
    language: &'a str,
    version: &'a str,
    files: Vec<FileEntry<'a>>,
    stdin: &'a str,
    /// Milliseconds.
    run_timeout: u64,
    compile_timeout: u64,
}

/// One file in the bundle. The primary source file goes first and is
/// unnamed; named assets follow.
#[derive(Serialize)]
struct FileEntry<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<&'a str>,
    content: &'a str,
}

/// Piston `/execute` response.
#[derive(Deserialize)]
pub(super) struct ExecuteResponse {
    pub run: RunStage,
}

/// Result of the run stage.
#[derive(Deserialize, Default)]
pub(super) struct RunStage {
    #[serde(default)]
    pub output: String,
    pub stderr: Option<String>,
    pub code: Option<i64>,
    pub signal: Option<String>,
    pub message: Option<String>,
}

// ── PistonBackend ────────────────────────────────────────

pub struct PistonBackend {
    client: Client,
    endpoint: String,
    language: String,
    version: String,
    compile_timeout: Duration,
    deadline_grace: Duration,
}

impl PistonBackend {
    pub fn new(endpoint: &str, language: &str, version: &str, limits: &LimitsConfig) -> Self {
        Self {
            client: Client::new(),
            endpoint: normalize_endpoint(endpoint),
            language: language.to_string(),
            version: version.to_string(),
            compile_timeout: limits.compile_timeout(),
            deadline_grace: limits.deadline_grace(),
        }
    }

    async fn send(&self, request: &ExecutionRequest) -> ExecutionResult {
        let mut files = vec![FileEntry {
            name: None,
            content: &request.source_code,
        }];
        for (name, content) in &request.file_assets {
            files.push(FileEntry {
                name: Some(name),
                content,
            });
        }

        let body = ExecuteRequest {
            language: &self.language,
            version: &self.version,
            files,
            stdin: &request.stdin,
            run_timeout: request.timeout.as_millis() as u64,
            compile_timeout: self.compile_timeout.as_millis() as u64,
        };

        debug!(
            "Calling execution backend at {} ({} file(s), timeout {:?})",
            self.endpoint,
            body.files.len(),
            request.timeout
        );

        let response = match self.client.post(&self.endpoint).json(&body).send().await {
            Ok(response) => response,
            Err(e) => {
                warn!("execution backend unreachable: {e}");
                return ExecutionResult::failure(
                    ExitClassification::ServiceUnavailable,
                    "",
                    format!("execution service unavailable: {e}"),
                );
            }
        };

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return ExecutionResult::failure(
                ExitClassification::Throttled,
                "",
                "too many requests",
            );
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return ExecutionResult::failure(
                ExitClassification::ServiceUnavailable,
                "",
                format!("execution backend returned {status}: {body}"),
            );
        }

        match response.json::<ExecuteResponse>().await {
            Ok(parsed) => classify_run(parsed.run),
            Err(e) => ExecutionResult::failure(
                ExitClassification::ServiceUnavailable,
                "",
                format!("malformed backend response: {e}"),
            ),
        }
    }
}

#[async_trait]
impl SandboxBackend for PistonBackend {
    async fn execute(&self, request: &ExecutionRequest) -> ExecutionResult {
        // The backend enforces run_timeout itself; the outer deadline
        // only fires if it stops honoring it, so the caller never hangs.
        let deadline = request.timeout + self.deadline_grace;
        match tokio::time::timeout(deadline, self.send(request)).await {
            Ok(result) => result,
            Err(_) => {
                warn!("backend missed its own run timeout by {:?}", self.deadline_grace);
                ExecutionResult::failure(
                    ExitClassification::ServiceUnavailable,
                    "",
                    "execution backend did not respond within the deadline",
                )
            }
        }
    }

    fn description(&self) -> String {
        format!(
            "piston ({} {}) at {}",
            self.language, self.version, self.endpoint
        )
    }
}

/// A configured URL ending in `/execute` is used verbatim; anything
/// else is treated as a base URL and gets the standard v2 path.
fn normalize_endpoint(raw: &str) -> String {
    if raw.ends_with("/execute") {
        raw.to_string()
    } else {
        format!("{}/api/v2/execute", raw.trim_end_matches('/'))
    }
}

/// Maps a run stage onto the classification taxonomy, kill signals
/// taking priority over the exit code.
fn classify_run(run: RunStage) -> ExecutionResult {
    if let Some(signal) = run.signal.as_deref() {
        if signal == "SIGKILL" || signal == "SIGTERM" {
            let memory_kill = run
                .message
                .as_deref()
                .is_some_and(|m| m.to_ascii_lowercase().contains("memory"));
            return if memory_kill {
                ExecutionResult::failure(
                    ExitClassification::MemoryExceeded,
                    run.output,
                    "memory limit exceeded",
                )
            } else {
                ExecutionResult::failure(
                    ExitClassification::TimedOut,
                    run.output,
                    "execution timed out or was terminated",
                )
            };
        }
    }

    match run.code {
        // A missing exit code only means success when no signal fired;
        // signal-killed runs (SIGSEGV and friends) report `code: null`.
        Some(0) => ExecutionResult::success(run.output),
        None if run.signal.is_none() => ExecutionResult::success(run.output),
        _ => {
            let stderr = run.stderr.filter(|s| !s.trim().is_empty());
            let error = stderr.unwrap_or_else(|| match run.code {
                Some(code) => format!("exited with code {code}"),
                None => format!(
                    "killed by signal {}",
                    run.signal.as_deref().unwrap_or("unknown")
                ),
            });
            ExecutionResult::failure(ExitClassification::NonZeroExit, run.output, error)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_full_execute_url() {
        assert_eq!(
            normalize_endpoint("https://emkc.org/api/v2/piston/execute"),
            "https://emkc.org/api/v2/piston/execute"
        );
    }

    #[test]
    fn test_normalize_base_url() {
        assert_eq!(
            normalize_endpoint("http://piston.internal:2000"),
            "http://piston.internal:2000/api/v2/execute"
        );
        // trailing slash is stripped before appending
        assert_eq!(
            normalize_endpoint("http://piston.internal:2000/"),
            "http://piston.internal:2000/api/v2/execute"
        );
    }

    #[test]
    fn test_classify_success() {
        let run = RunStage {
            output: "42\n".to_string(),
            code: Some(0),
            ..RunStage::default()
        };
        let result = classify_run(run);
        assert_eq!(result.classification, ExitClassification::Success);
        assert_eq!(result.stdout, "42\n");
        assert!(result.error.is_none());
    }

    #[test]
    fn test_classify_nonzero_exit_uses_stderr() {
        let run = RunStage {
            output: "".to_string(),
            stderr: Some("ZeroDivisionError: division by zero\n".to_string()),
            code: Some(1),
            ..RunStage::default()
        };
        let result = classify_run(run);
        assert_eq!(result.classification, ExitClassification::NonZeroExit);
        assert!(result
            .error
            .as_deref()
            .unwrap()
            .contains("ZeroDivisionError"));
    }

    #[test]
    fn test_classify_nonzero_exit_synthesizes_message() {
        let run = RunStage {
            stderr: Some("   ".to_string()),
            code: Some(3),
            ..RunStage::default()
        };
        let result = classify_run(run);
        assert_eq!(result.error.as_deref(), Some("exited with code 3"));
    }

    #[test]
    fn test_classify_sigkill_is_timeout() {
        let run = RunStage {
            output: "partial".to_string(),
            signal: Some("SIGKILL".to_string()),
            code: None,
            ..RunStage::default()
        };
        let result = classify_run(run);
        assert_eq!(result.classification, ExitClassification::TimedOut);
        assert_eq!(result.stdout, "partial");
    }

    #[test]
    fn test_classify_sigterm_is_timeout() {
        let run = RunStage {
            signal: Some("SIGTERM".to_string()),
            ..RunStage::default()
        };
        assert_eq!(
            classify_run(run).classification,
            ExitClassification::TimedOut
        );
    }

    #[test]
    fn test_classify_memory_kill() {
        let run = RunStage {
            signal: Some("SIGKILL".to_string()),
            message: Some("Out of memory".to_string()),
            ..RunStage::default()
        };
        assert_eq!(
            classify_run(run).classification,
            ExitClassification::MemoryExceeded
        );
    }

    #[test]
    fn test_signal_takes_priority_over_exit_code() {
        let run = RunStage {
            signal: Some("SIGKILL".to_string()),
            code: Some(137),
            ..RunStage::default()
        };
        assert_eq!(
            classify_run(run).classification,
            ExitClassification::TimedOut
        );
    }

    #[test]
    fn test_signal_without_exit_code_is_a_crash() {
        let run = RunStage {
            output: "partial".to_string(),
            signal: Some("SIGSEGV".to_string()),
            code: None,
            ..RunStage::default()
        };
        let result = classify_run(run);
        assert_eq!(result.classification, ExitClassification::NonZeroExit);
        assert!(result.error.as_deref().unwrap().contains("SIGSEGV"));
        assert_eq!(result.stdout, "partial");
    }

    #[test]
    fn test_missing_exit_code_without_signal_is_success() {
        let run = RunStage {
            output: "ok\n".to_string(),
            code: None,
            signal: None,
            ..RunStage::default()
        };
        let result = classify_run(run);
        assert_eq!(result.classification, ExitClassification::Success);
        assert!(result.error.is_none());
    }

    #[test]
    fn test_other_signals_fall_through_to_exit_code() {
        let run = RunStage {
            signal: Some("SIGSEGV".to_string()),
            code: Some(139),
            stderr: None,
            ..RunStage::default()
        };
        let result = classify_run(run);
        assert_eq!(result.classification, ExitClassification::NonZeroExit);
        assert_eq!(result.error.as_deref(), Some("exited with code 139"));
    }

    #[test]
    fn test_response_parsing() {
        let json = r#"{
            "run": {
                "output": "hello\n",
                "stderr": "",
                "code": 0,
                "signal": null
            }
        }"#;
        let parsed: ExecuteResponse = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.run.output, "hello\n");
        assert_eq!(parsed.run.code, Some(0));
        assert!(parsed.run.signal.is_none());
    }

    #[test]
    fn test_request_serialization_orders_files() {
        let body = ExecuteRequest {
            language: "python",
            version: "3.10.0",
            files: vec![
                FileEntry {
                    name: None,
                    content: "print(open('data.txt').read())",
                },
                FileEntry {
                    name: Some("data.txt"),
                    content: "A",
                },
            ],
            stdin: "",
            run_timeout: 5000,
            compile_timeout: 10000,
        };
        let json = serde_json::to_value(&body).unwrap();
        let files = json["files"].as_array().unwrap();
        // primary file first, unnamed; assets after, named
        assert!(files[0].get("name").is_none());
        assert_eq!(files[1]["name"], "data.txt");
        assert_eq!(json["run_timeout"], 5000);
    }
}

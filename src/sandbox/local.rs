//! Local spawn backend — development fallback.
//!
//! Writes the source bundle into a scratch directory and runs the
//! configured interpreter directly, with stdin piped in and a kill
//! timer matching the request timeout. There is NO isolation here;
//! never point untrusted traffic at this backend in production.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use super::{ExecutionRequest, ExecutionResult, ExitClassification, SandboxBackend};

/// Name of the primary source file inside the scratch directory.
const SOURCE_FILE: &str = "main.py";

pub struct LocalBackend {
    interpreter: String,
}

impl LocalBackend {
    pub fn new(interpreter: &str) -> Self {
        Self {
            interpreter: interpreter.to_string(),
        }
    }
}

#[async_trait]
impl SandboxBackend for LocalBackend {
    async fn execute(&self, request: &ExecutionRequest) -> ExecutionResult {
        let dir = match tempfile::tempdir() {
            Ok(dir) => dir,
            Err(e) => {
                return ExecutionResult::failure(
                    ExitClassification::SpawnFailure,
                    "",
                    format!("failed to create scratch directory: {e}"),
                )
            }
        };

        let source_path = dir.path().join(SOURCE_FILE);
        if let Err(e) = std::fs::write(&source_path, &request.source_code) {
            return ExecutionResult::failure(
                ExitClassification::SpawnFailure,
                "",
                format!("failed to write source file: {e}"),
            );
        }
        for (name, content) in &request.file_assets {
            if let Err(e) = std::fs::write(dir.path().join(name), content) {
                return ExecutionResult::failure(
                    ExitClassification::SpawnFailure,
                    "",
                    format!("failed to write asset {name}: {e}"),
                );
            }
        }

        debug!(
            "spawning {} {} ({} asset(s))",
            self.interpreter,
            source_path.display(),
            request.file_assets.len()
        );

        let mut child = match Command::new(&self.interpreter)
            .arg(&source_path)
            .current_dir(dir.path())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                return ExecutionResult::failure(
                    ExitClassification::SpawnFailure,
                    "",
                    format!("failed to spawn {}: {e}", self.interpreter),
                )
            }
        };

        // The stdin feed runs under the same deadline as the wait: a
        // child that never drains a full pipe must not stall past the
        // request timeout.
        let stdin_pipe = child.stdin.take();
        let run = async {
            let feed = async {
                if let Some(mut pipe) = stdin_pipe {
                    // The child may exit without reading; a broken pipe is fine.
                    let _ = pipe.write_all(request.stdin.as_bytes()).await;
                }
            };
            let (_, output) = tokio::join!(feed, child.wait_with_output());
            output
        };

        let output = match tokio::time::timeout(request.timeout, run).await {
            // kill_on_drop reaps the abandoned child
            Err(_) => {
                return ExecutionResult::failure(
                    ExitClassification::TimedOut,
                    "",
                    format!("execution timed out after {:?}", request.timeout),
                )
            }
            Ok(Err(e)) => {
                return ExecutionResult::failure(
                    ExitClassification::SpawnFailure,
                    "",
                    format!("failed to collect process output: {e}"),
                )
            }
            Ok(Ok(output)) => output,
        };

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if output.status.success() {
            return ExecutionResult::success(stdout);
        }

        match output.status.code() {
            Some(code) => {
                let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
                let error = if stderr.trim().is_empty() {
                    format!("exited with code {code}")
                } else {
                    stderr
                };
                ExecutionResult::failure(ExitClassification::NonZeroExit, stdout, error)
            }
            // killed by a signal without an exit code
            None => ExecutionResult::failure(
                ExitClassification::TimedOut,
                stdout,
                "execution timed out or was terminated",
            ),
        }
    }

    fn description(&self) -> String {
        format!("local spawn ({}, unsandboxed)", self.interpreter)
    }
}

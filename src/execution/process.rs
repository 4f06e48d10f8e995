//! Subprocess-backed command executor.
//!
//! [`ProcessCommandExecutor`] shells out to an agent runner CLI. The runner
//! is invoked as `<program> run <command>` with optional `--arguments`,
//! `--model`, and `--max-budget-usd` flags, and is expected to print a JSON
//! report as its final stdout line:
//!
//! ```json
//! {"success": true, "cost_usd": 0.04, "duration_ms": 5300, "session_id": "abc"}
//! ```
//!
//! A runner that prints no report is judged by its exit status. The
//! configured timeout is enforced here; on expiry the child process is
//! killed.

use async_trait::async_trait;
use serde::Deserialize;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;

use super::executor::{
    CommandExecutor, ExecutionReport, ExecutionRequest, ExecutorError, ExecutorEvent,
    SharedObserver,
};

/// The JSON report printed by the runner.
#[derive(Debug, Deserialize)]
struct RunnerReport {
    success: bool,
    #[serde(default)]
    cost_usd: Option<f64>,
    #[serde(default)]
    duration_ms: Option<u64>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    session_id: Option<String>,
}

/// Executes commands by spawning an agent runner subprocess.
pub struct ProcessCommandExecutor {
    program: PathBuf,
}

impl ProcessCommandExecutor {
    /// Create an executor that spawns the given runner binary.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn build_command(&self, request: &ExecutionRequest) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.arg("run").arg(&request.command);

        if let Some(arguments) = &request.arguments {
            cmd.arg("--arguments").arg(arguments);
        }
        if let Some(model) = &request.model {
            cmd.arg("--model").arg(model);
        }
        if let Some(budget) = request.max_budget_usd {
            cmd.arg("--max-budget-usd").arg(budget.to_string());
        }

        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl CommandExecutor for ProcessCommandExecutor {
    async fn run(
        &self,
        request: ExecutionRequest,
        observer: Option<SharedObserver>,
    ) -> Result<ExecutionReport, ExecutorError> {
        let mut cmd = self.build_command(&request);

        let child = cmd
            .spawn()
            .map_err(|e| ExecutorError::Transport(format!("failed to spawn runner: {}", e)))?;

        let output_fut = child.wait_with_output();
        let output = match request.timeout {
            // The child has kill_on_drop set, so an expired timeout tears
            // the runner down with the dropped future.
            Some(limit) => tokio::time::timeout(limit, output_fut)
                .await
                .map_err(|_| ExecutorError::Timeout(limit))?,
            None => output_fut.await,
        }
        .map_err(|e| ExecutorError::Transport(format!("failed to collect runner output: {}", e)))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let report_line = stdout.lines().rev().find(|line| !line.trim().is_empty());

        if let Some(parsed) = report_line
            .and_then(|line| serde_json::from_str::<RunnerReport>(line.trim()).ok())
        {
            if let (Some(observer), Some(session_id)) = (&observer, &parsed.session_id) {
                observer
                    .on_event(ExecutorEvent::SessionStarted {
                        session_id: session_id.clone(),
                    })
                    .await;
            }

            return Ok(ExecutionReport {
                success: parsed.success,
                cost_usd: parsed.cost_usd,
                duration_ms: parsed.duration_ms,
                error: parsed.error,
            });
        }

        // No report line; fall back to the exit status.
        if output.status.success() {
            Ok(ExecutionReport {
                success: true,
                ..Default::default()
            })
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let message = stderr
                .lines()
                .last()
                .filter(|line| !line.trim().is_empty())
                .map(|line| line.trim().to_string())
                .unwrap_or_else(|| format!("runner exited with {}", output.status));
            Ok(ExecutionReport {
                success: false,
                error: Some(message),
                ..Default::default()
            })
        }
    }
}

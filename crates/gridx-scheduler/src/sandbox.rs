use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, warn};

use gridx_core::constants::{DEFAULT_SANDBOX_CPU_CORES, DEFAULT_SANDBOX_MEMORY_MIB};
use gridx_core::task::Task;

/// What happened to a payload inside the sandbox. The adapter never mutates
/// task state; the scheduler persists whichever outcome comes back.
#[derive(Debug, Clone)]
pub enum SandboxOutcome {
    Completed { output: String, duration_secs: f64 },
    Failed { error: String, duration_secs: f64 },
    TimedOut { duration_secs: f64 },
}

/// Resource requests a payload may carry; anything missing falls back to the
/// defaults (1 core, 512 MiB).
#[derive(Debug, Clone, Deserialize)]
struct PayloadSpec {
    command: String,
    #[serde(default = "default_cpu")]
    cpu_cores: u32,
    #[serde(default = "default_memory")]
    memory_mib: u64,
}

fn default_cpu() -> u32 {
    DEFAULT_SANDBOX_CPU_CORES
}

fn default_memory() -> u64 {
    DEFAULT_SANDBOX_MEMORY_MIB
}

/// Execution backends behind one surface.
pub enum Sandbox {
    Process(ProcessSandbox),
    /// Deterministic outcomes for tests and nodes with no executor.
    Mock(MockSandbox),
}

impl Sandbox {
    pub async fn execute(&self, task: &Task) -> SandboxOutcome {
        match self {
            Sandbox::Process(s) => s.execute(task).await,
            Sandbox::Mock(s) => s.execute(task),
        }
    }
}

// ── Process sandbox ──────────────────────────────────────────────────────────

/// Runs a payload command in a child process with a cleared environment, a
/// throwaway working directory, captured stdio, a memory/CPU rlimit applied
/// through the launching shell, and a hard wall-clock cut-off at the task's
/// `max_execution_time`.
pub struct ProcessSandbox;

impl ProcessSandbox {
    pub async fn execute(&self, task: &Task) -> SandboxOutcome {
        let started = Instant::now();
        let spec: PayloadSpec = match serde_json::from_str(&task.payload) {
            Ok(spec) => spec,
            Err(e) => {
                return SandboxOutcome::Failed {
                    error: format!("invalid payload: {e}"),
                    duration_secs: started.elapsed().as_secs_f64(),
                };
            }
        };

        let workdir = match self.make_workdir(task) {
            Ok(dir) => dir,
            Err(e) => {
                return SandboxOutcome::Failed {
                    error: format!("creating sandbox workdir: {e}"),
                    duration_secs: started.elapsed().as_secs_f64(),
                };
            }
        };

        // Memory cap via the shell's rlimit (KiB); CPU-seconds cap scales
        // with the core request. Wall clock is enforced below regardless.
        let memory_kib = spec.memory_mib * 1024;
        let cpu_seconds = task.max_execution_time * spec.cpu_cores.max(1) as u64;
        let script = format!(
            "ulimit -v {memory_kib} 2>/dev/null; ulimit -t {cpu_seconds} 2>/dev/null; exec {}",
            spec.command
        );

        let child = Command::new("sh")
            .arg("-c")
            .arg(&script)
            .current_dir(&workdir)
            .env_clear()
            .env("PATH", "/usr/bin:/bin")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();

        let child = match child {
            Ok(child) => child,
            Err(e) => {
                self.cleanup(&workdir);
                return SandboxOutcome::Failed {
                    error: format!("spawning sandbox: {e}"),
                    duration_secs: started.elapsed().as_secs_f64(),
                };
            }
        };

        let budget = Duration::from_secs(task.max_execution_time);
        let outcome = match tokio::time::timeout(budget, child.wait_with_output()).await {
            // Dropping the wait future kills the child (kill_on_drop).
            Err(_) => {
                warn!(task_id = %task.task_id, "sandbox wall-clock cut-off hit");
                SandboxOutcome::TimedOut { duration_secs: started.elapsed().as_secs_f64() }
            }
            Ok(Err(e)) => SandboxOutcome::Failed {
                error: format!("waiting for sandbox: {e}"),
                duration_secs: started.elapsed().as_secs_f64(),
            },
            Ok(Ok(output)) => {
                let duration_secs = started.elapsed().as_secs_f64();
                let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
                let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
                if output.status.success() {
                    debug!(task_id = %task.task_id, duration_secs, "sandbox completed");
                    SandboxOutcome::Completed { output: stdout, duration_secs }
                } else {
                    let error = if stderr.is_empty() { stdout } else { stderr };
                    SandboxOutcome::Failed { error, duration_secs }
                }
            }
        };
        self.cleanup(&workdir);
        outcome
    }

    fn make_workdir(&self, task: &Task) -> std::io::Result<PathBuf> {
        let dir = std::env::temp_dir().join(format!("gridx_sandbox_{}", task.task_id));
        std::fs::create_dir_all(&dir)?;
        std::fs::write(dir.join("payload.json"), task.payload.as_bytes())?;
        Ok(dir)
    }

    fn cleanup(&self, dir: &PathBuf) {
        let _ = std::fs::remove_dir_all(dir);
    }
}

// ── Mock sandbox ─────────────────────────────────────────────────────────────

/// Reads the outcome straight from the payload:
/// `{"mock": "ok", "output": "..."}`, `{"mock": "fail", "error": "..."}`,
/// or `{"mock": "timeout"}`.
pub struct MockSandbox;

impl MockSandbox {
    pub fn execute(&self, task: &Task) -> SandboxOutcome {
        let payload: serde_json::Value =
            serde_json::from_str(&task.payload).unwrap_or(serde_json::Value::Null);
        let mode = payload.get("mock").and_then(|v| v.as_str()).unwrap_or("ok");
        match mode {
            "fail" => SandboxOutcome::Failed {
                error: payload
                    .get("error")
                    .and_then(|v| v.as_str())
                    .unwrap_or("mock failure")
                    .to_string(),
                duration_secs: 0.01,
            },
            "timeout" => SandboxOutcome::TimedOut { duration_secs: task.max_execution_time as f64 },
            _ => SandboxOutcome::Completed {
                output: payload
                    .get("output")
                    .and_then(|v| v.as_str())
                    .unwrap_or("ok")
                    .to_string(),
                duration_secs: 0.01,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridx_core::currency::{Amount, Currency};
    use gridx_core::task::{TaskPriority, TaskStatus};
    use gridx_core::types::TaskId;
    use std::collections::BTreeSet;

    fn task_with_payload(payload: &str, max_secs: u64) -> Task {
        Task {
            task_id: TaskId::generate(),
            task_type: "shell".into(),
            payload: payload.into(),
            priority: TaskPriority::Normal,
            max_execution_time: max_secs,
            required_capabilities: BTreeSet::new(),
            reward: Amount::parse("1", Currency::Flop).unwrap(),
            submitter_id: "u1".into(),
            escrow_id: None,
            assigned_node_id: None,
            status: TaskStatus::Running,
            result: None,
            error_message: None,
            created_at: 0,
            updated_at: 0,
            started_at: Some(0),
            completed_at: None,
        }
    }

    #[tokio::test]
    async fn process_sandbox_captures_stdout() {
        let sandbox = ProcessSandbox;
        let task = task_with_payload(r#"{"command": "echo sandboxed"}"#, 10);
        match sandbox.execute(&task).await {
            SandboxOutcome::Completed { output, .. } => assert_eq!(output.trim(), "sandboxed"),
            other => panic!("expected completion, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn process_sandbox_nonzero_exit_fails_with_stderr() {
        let sandbox = ProcessSandbox;
        let task = task_with_payload(r#"{"command": "echo boom >&2; exit 3"}"#, 10);
        match sandbox.execute(&task).await {
            SandboxOutcome::Failed { error, .. } => assert_eq!(error.trim(), "boom"),
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn process_sandbox_enforces_wall_clock() {
        let sandbox = ProcessSandbox;
        let task = task_with_payload(r#"{"command": "sleep 30"}"#, 1);
        let started = Instant::now();
        match sandbox.execute(&task).await {
            SandboxOutcome::TimedOut { .. } => {}
            other => panic!("expected timeout, got {other:?}"),
        }
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn process_sandbox_rejects_malformed_payload() {
        let sandbox = ProcessSandbox;
        let task = task_with_payload("not json", 5);
        assert!(matches!(
            sandbox.execute(&task).await,
            SandboxOutcome::Failed { .. }
        ));
    }

    #[test]
    fn mock_sandbox_follows_payload() {
        let mock = MockSandbox;
        assert!(matches!(
            mock.execute(&task_with_payload(r#"{"mock": "ok", "output": "42"}"#, 5)),
            SandboxOutcome::Completed { output, .. } if output == "42"
        ));
        assert!(matches!(
            mock.execute(&task_with_payload(r#"{"mock": "fail"}"#, 5)),
            SandboxOutcome::Failed { .. }
        ));
        assert!(matches!(
            mock.execute(&task_with_payload(r#"{"mock": "timeout"}"#, 5)),
            SandboxOutcome::TimedOut { .. }
        ));
    }
}

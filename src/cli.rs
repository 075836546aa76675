//! One-shot runs of the gateway CLI
//!
//! The CLI is started with the inherited environment, its output captured in
//! full, and the result folded into a single [`CliOutcome`].

use crate::process::{signal_name, ChildExit};
use regex::Regex;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::OnceLock;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Reported when the CLI finds a gateway already running
pub const ALREADY_RUNNING_MESSAGE: &str = "Gateway is already running; no new process started.";

/// Program, arguments and working directory of the CLI
#[derive(Debug, Clone)]
pub struct CliCommand {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
}

impl CliCommand {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            working_dir: None,
        }
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }
}

/// Why a CLI run did not succeed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CliFailureKind {
    /// The program could not be started
    SpawnFailed,
    /// Killed by a signal
    Signaled(i32),
    /// Exited with a non-zero code
    ExitCode(i32),
    /// Exited with neither a code nor a signal
    NoExitCode,
    /// Exited non-zero because another gateway already holds the port or lock
    AlreadyRunning,
}

/// Result of one CLI run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CliOutcome {
    /// Exit code 0; `output` is stdout
    Success { output: String },
    /// Anything else; `detail` is stderr, or the spawn error
    Failure { kind: CliFailureKind, detail: String },
}

impl CliOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, CliOutcome::Success { .. })
    }

    /// Short description of a failure, matching the API's `error` field
    pub fn summary(&self) -> Option<String> {
        match self {
            CliOutcome::Success { .. } => None,
            CliOutcome::Failure { kind, .. } => Some(match kind {
                CliFailureKind::SpawnFailed => "Failed to start CLI".to_string(),
                CliFailureKind::Signaled(signal) => {
                    format!("CLI terminated with signal {}", signal_name(*signal))
                }
                CliFailureKind::ExitCode(code) => format!("CLI exited with code {}", code),
                CliFailureKind::NoExitCode => "CLI exited without an exit code".to_string(),
                CliFailureKind::AlreadyRunning => ALREADY_RUNNING_MESSAGE.to_string(),
            }),
        }
    }
}

/// Case-insensitive markers the CLI prints when another gateway holds the port or lock
static ALREADY_RUNNING_PATTERN: OnceLock<Regex> = OnceLock::new();

fn already_running_pattern() -> &'static Regex {
    ALREADY_RUNNING_PATTERN.get_or_init(|| {
        Regex::new(r"(?i)already running|gateway already running|Port .+ is already in use|lock timeout")
            .expect("already-running pattern is a valid regex")
    })
}

/// Does stderr say a gateway is already up?
pub fn is_already_running(stderr: &str) -> bool {
    already_running_pattern().is_match(stderr)
}

/// Fold an exit status and captured output into an outcome
pub fn classify_exit(exit: ChildExit, stdout: String, stderr: String) -> CliOutcome {
    if let Some(signal) = exit.signal {
        return CliOutcome::Failure {
            kind: CliFailureKind::Signaled(signal),
            detail: stderr,
        };
    }

    match exit.code {
        Some(0) => CliOutcome::Success { output: stdout },
        code => {
            let kind = if is_already_running(&stderr) {
                CliFailureKind::AlreadyRunning
            } else {
                code.map_or(CliFailureKind::NoExitCode, CliFailureKind::ExitCode)
            };
            CliOutcome::Failure { kind, detail: stderr }
        }
    }
}

/// Run the CLI to completion
pub async fn run_cli(command: &CliCommand) -> CliOutcome {
    let mut cmd = Command::new(&command.program);
    cmd.args(&command.args);
    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());
    cmd.kill_on_drop(true);

    if let Some(ref dir) = command.working_dir {
        cmd.current_dir(dir);
    }

    info!(program = %command.program, args = ?command.args, "Running CLI");

    let output = match cmd.output().await {
        Ok(output) => output,
        Err(e) => {
            warn!(program = %command.program, error = %e, "Failed to start CLI");
            return CliOutcome::Failure {
                kind: CliFailureKind::SpawnFailed,
                detail: e.to_string(),
            };
        }
    };

    let exit = ChildExit::from_status(output.status);
    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

    debug!(
        code = ?exit.code,
        signal = ?exit.signal,
        stdout_len = stdout.len(),
        stderr_len = stderr.len(),
        "CLI finished"
    );

    classify_exit(exit, stdout, stderr)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str) -> CliCommand {
        CliCommand::new("sh", vec!["-c".to_string(), script.to_string()])
    }

    #[test]
    fn test_already_running_patterns() {
        assert!(is_already_running("Error: gateway already running (pid 42)"));
        assert!(is_already_running("ALREADY RUNNING"));
        assert!(is_already_running("Port 18789 is already in use"));
        assert!(is_already_running("error: port 127.0.0.1:18789 is already in use\n"));
        assert!(is_already_running("Lock timeout after 5000ms"));

        assert!(!is_already_running(""));
        assert!(!is_already_running("port is already in use"));
        assert!(!is_already_running("Error: missing config"));
        assert!(!is_already_running("something is already in use"));
        assert!(!is_already_running("port\n18789 is already in use"));
    }

    #[test]
    fn test_classify_missing_exit_code() {
        let outcome = classify_exit(
            ChildExit { code: None, signal: None },
            String::new(),
            "stopped".to_string(),
        );
        assert_eq!(
            outcome,
            CliOutcome::Failure {
                kind: CliFailureKind::NoExitCode,
                detail: "stopped".to_string()
            }
        );
        assert_eq!(outcome.summary().unwrap(), "CLI exited without an exit code");
    }

    #[test]
    fn test_classify_success() {
        let outcome = classify_exit(
            ChildExit { code: Some(0), signal: None },
            "started\n".to_string(),
            "warning\n".to_string(),
        );
        assert_eq!(
            outcome,
            CliOutcome::Success {
                output: "started\n".to_string()
            }
        );
        assert!(outcome.summary().is_none());
    }

    #[test]
    fn test_classify_exit_code() {
        let outcome = classify_exit(
            ChildExit { code: Some(2), signal: None },
            String::new(),
            "bad flag".to_string(),
        );
        assert_eq!(
            outcome,
            CliOutcome::Failure {
                kind: CliFailureKind::ExitCode(2),
                detail: "bad flag".to_string()
            }
        );
        assert_eq!(outcome.summary().unwrap(), "CLI exited with code 2");
    }

    #[test]
    fn test_classify_already_running() {
        let outcome = classify_exit(
            ChildExit { code: Some(1), signal: None },
            String::new(),
            "gateway already running".to_string(),
        );
        assert!(matches!(
            outcome,
            CliOutcome::Failure {
                kind: CliFailureKind::AlreadyRunning,
                ..
            }
        ));
    }

    #[test]
    fn test_signal_wins_over_stderr() {
        let outcome = classify_exit(
            ChildExit { code: None, signal: Some(9) },
            String::new(),
            "already running".to_string(),
        );
        assert!(matches!(
            outcome,
            CliOutcome::Failure {
                kind: CliFailureKind::Signaled(9),
                ..
            }
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_cli_success() {
        let outcome = run_cli(&sh("echo hello")).await;
        assert_eq!(
            outcome,
            CliOutcome::Success {
                output: "hello\n".to_string()
            }
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_cli_failure_captures_stderr() {
        let outcome = run_cli(&sh("echo oops >&2; exit 4")).await;
        assert_eq!(
            outcome,
            CliOutcome::Failure {
                kind: CliFailureKind::ExitCode(4),
                detail: "oops\n".to_string()
            }
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_cli_already_running() {
        let outcome = run_cli(&sh("echo 'Port 18789 is already in use' >&2; exit 1")).await;
        assert!(matches!(
            outcome,
            CliOutcome::Failure {
                kind: CliFailureKind::AlreadyRunning,
                ..
            }
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_cli_working_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("marker.txt"), "here").unwrap();

        let outcome = run_cli(&sh("cat marker.txt").with_working_dir(dir.path())).await;
        assert_eq!(
            outcome,
            CliOutcome::Success {
                output: "here".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_run_cli_spawn_failure() {
        let outcome = run_cli(&CliCommand::new("/nonexistent/openclaw", Vec::new())).await;
        match outcome {
            CliOutcome::Failure {
                kind: CliFailureKind::SpawnFailed,
                detail,
            } => assert!(!detail.is_empty()),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }
}

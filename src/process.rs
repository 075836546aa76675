use crate::config::{UpstreamConfig, GATEWAY_BIND_ENV, GATEWAY_BIND_LOOPBACK, GATEWAY_PORT_ENV};
use crate::error::FrontDoorError;
use std::fmt;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::process::{Child, Command};
use tracing::{debug, error, info, warn};

/// Lifecycle of the supervised gateway.
///
/// `NotStarted → Spawning → Running → Exited`, or `Spawning → SpawnFailed`.
/// Both terminal states end the front door.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    NotStarted,
    Spawning,
    Running,
    Exited,
    SpawnFailed,
}

impl SupervisorState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SupervisorState::Exited | SupervisorState::SpawnFailed)
    }
}

/// How a child process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChildExit {
    /// Exit code, if the process exited normally
    pub code: Option<i32>,
    /// Terminating signal, if the process was killed by one
    pub signal: Option<i32>,
}

impl ChildExit {
    pub fn from_status(status: ExitStatus) -> Self {
        #[cfg(unix)]
        let signal = {
            use std::os::unix::process::ExitStatusExt;
            status.signal()
        };
        #[cfg(not(unix))]
        let signal = None;

        Self {
            code: status.code(),
            signal,
        }
    }

    /// Exit status the front door propagates: the child's code when known and
    /// non-zero, 1 otherwise.
    pub fn exit_code(&self) -> i32 {
        match self.code {
            Some(code) if code != 0 => code,
            _ => 1,
        }
    }
}

impl fmt::Display for ChildExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "code {}", code),
            (None, Some(signal)) => write!(f, "signal {}", signal_name(signal)),
            (None, None) => write!(f, "unknown status"),
        }
    }
}

/// Conventional name for a signal number
pub fn signal_name(signal: i32) -> String {
    #[cfg(unix)]
    {
        let name = match signal {
            libc::SIGHUP => "SIGHUP",
            libc::SIGINT => "SIGINT",
            libc::SIGQUIT => "SIGQUIT",
            libc::SIGABRT => "SIGABRT",
            libc::SIGKILL => "SIGKILL",
            libc::SIGSEGV => "SIGSEGV",
            libc::SIGPIPE => "SIGPIPE",
            libc::SIGTERM => "SIGTERM",
            _ => return signal.to_string(),
        };
        name.to_string()
    }

    #[cfg(not(unix))]
    {
        signal.to_string()
    }
}

/// Build the gateway command: inherited environment and stdio, port and
/// loopback bind mode forced through the environment.
pub fn build_command(config: &UpstreamConfig) -> Command {
    let mut cmd = Command::new(&config.command);
    cmd.args(config.resolved_args());
    cmd.stdin(Stdio::inherit());
    cmd.stdout(Stdio::inherit());
    cmd.stderr(Stdio::inherit());
    cmd.kill_on_drop(true);

    if let Some(ref working_dir) = config.working_dir {
        cmd.current_dir(working_dir);
    }

    for (key, value) in &config.env {
        cmd.env(key, value);
    }

    // Set after the extra env so configuration cannot expose the gateway
    cmd.env(GATEWAY_PORT_ENV, config.port.to_string());
    cmd.env(GATEWAY_BIND_ENV, GATEWAY_BIND_LOOPBACK);

    cmd
}

/// Launches the gateway and ties the front door's lifetime to it.
///
/// There is no restart policy: once the child is gone the caller is expected
/// to exit with [`ChildExit::exit_code`].
pub struct Supervisor {
    config: UpstreamConfig,
    state: SupervisorState,
    child: Option<Child>,
}

impl Supervisor {
    pub fn new(config: UpstreamConfig) -> Self {
        Self {
            config,
            state: SupervisorState::NotStarted,
            child: None,
        }
    }

    pub fn state(&self) -> SupervisorState {
        self.state
    }

    /// Process id of the running gateway
    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().and_then(|c| c.id())
    }

    /// Spawn the gateway. A failure moves the supervisor to `SpawnFailed`.
    pub fn spawn(&mut self) -> Result<(), FrontDoorError> {
        if self.state != SupervisorState::NotStarted {
            debug!(state = ?self.state, "Gateway already spawned");
            return Ok(());
        }

        self.state = SupervisorState::Spawning;
        info!(
            command = %self.config.command,
            args = ?self.config.resolved_args(),
            port = self.config.port,
            "Starting gateway process"
        );

        match build_command(&self.config).spawn() {
            Ok(child) => {
                let pid = child.id().unwrap_or(0);
                self.child = Some(child);
                self.state = SupervisorState::Running;
                info!(pid, port = self.config.port, "Gateway process spawned");
                Ok(())
            }
            Err(e) => {
                self.state = SupervisorState::SpawnFailed;
                error!(command = %self.config.command, error = %e, "Gateway spawn error");
                Err(FrontDoorError::UpstreamSpawnFailure(e))
            }
        }
    }

    /// Resolve once the gateway has exited.
    ///
    /// Cancel-safe: dropping the future leaves the child running.
    pub async fn wait(&mut self) -> ChildExit {
        let child = match self.child.as_mut() {
            Some(child) => child,
            None => return ChildExit { code: None, signal: None },
        };

        let exit = match child.wait().await {
            Ok(status) => ChildExit::from_status(status),
            Err(e) => {
                error!(error = %e, "Failed to wait for gateway process");
                ChildExit { code: None, signal: None }
            }
        };

        self.child = None;
        self.state = SupervisorState::Exited;
        error!(code = ?exit.code, signal = ?exit.signal, "Gateway exited");
        exit
    }

    /// Send SIGTERM to the gateway, escalating to SIGKILL after `grace_period`
    pub async fn shutdown(&mut self, grace_period: Duration) -> Option<ChildExit> {
        let mut child = self.child.take()?;

        if let Some(pid) = child.id() {
            info!(pid, "Sending SIGTERM to gateway");

            #[cfg(unix)]
            unsafe {
                libc::kill(pid as i32, libc::SIGTERM);
            }

            #[cfg(not(unix))]
            {
                let _ = child.start_kill();
            }
        }

        let exit = match tokio::time::timeout(grace_period, child.wait()).await {
            Ok(Ok(status)) => {
                info!(?status, "Gateway exited gracefully");
                Some(ChildExit::from_status(status))
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Error waiting for gateway to exit");
                None
            }
            Err(_) => {
                warn!(
                    grace_period_secs = grace_period.as_secs(),
                    "Grace period exceeded, sending SIGKILL"
                );
                let _ = child.kill().await;
                child.wait().await.ok().map(ChildExit::from_status)
            }
        };

        self.state = SupervisorState::Exited;
        exit
    }
}

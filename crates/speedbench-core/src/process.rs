//! Subprocess helpers
//!
//! Every subprocess the pipeline stops goes through [`shutdown`]: interrupt,
//! bounded wait, then a forceful kill. Also hosts the one-shot build step that
//! runs before a sweep.

use crate::error::{BenchError, Result};
use serde::{Deserialize, Serialize};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::process::{Child, Command};

/// A program plus its leading arguments
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
    /// Executable name or path
    pub program: String,
    /// Arguments placed before any generated flags
    #[serde(default)]
    pub args: Vec<String>,
}

impl CommandSpec {
    /// Create a command spec
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// With leading arguments
    #[must_use]
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Shell-style rendering for logs
    #[must_use]
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub(crate) fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        cmd
    }
}

/// How a subprocess is stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownPolicy {
    /// Wait after the interrupt before killing
    pub timeout: Duration,
}

impl Default for ShutdownPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
        }
    }
}

/// How a stopped process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shutdown {
    /// Exited on its own after the interrupt
    Graceful(ExitStatus),
    /// Did not exit in time and was killed
    Killed,
    /// Had already exited before the interrupt was sent
    AlreadyExited(ExitStatus),
}

/// Send SIGINT to a child
///
/// A child that is already gone is not an error.
#[cfg(unix)]
pub fn interrupt(child: &Child) -> Result<()> {
    use nix::errno::Errno;
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let Some(pid) = child.id() else {
        return Ok(());
    };
    let Ok(raw) = i32::try_from(pid) else {
        return Ok(());
    };
    match kill(Pid::from_raw(raw), Signal::SIGINT) {
        Ok(()) => Ok(()),
        Err(Errno::ESRCH) => {
            tracing::debug!(pid, "interrupt not delivered, process already gone");
            Ok(())
        }
        Err(e) => Err(BenchError::io("sending SIGINT", e.into())),
    }
}

/// No interrupt signal exists here; [`shutdown`] falls through to the kill
#[cfg(not(unix))]
pub fn interrupt(_child: &Child) -> Result<()> {
    Ok(())
}

/// Interrupt, wait up to `policy.timeout`, then kill
pub async fn shutdown(child: &mut Child, policy: ShutdownPolicy) -> Result<Shutdown> {
    if let Some(status) = child
        .try_wait()
        .map_err(|e| BenchError::io("polling child status", e))?
    {
        return Ok(Shutdown::AlreadyExited(status));
    }

    interrupt(child)?;

    match tokio::time::timeout(policy.timeout, child.wait()).await {
        Ok(Ok(status)) => Ok(Shutdown::Graceful(status)),
        Ok(Err(e)) => Err(BenchError::io("waiting for child", e)),
        Err(_) => {
            tracing::warn!(
                pid = child.id(),
                timeout_ms = policy.timeout.as_millis() as u64,
                "process ignored interrupt, killing"
            );
            child
                .kill()
                .await
                .map_err(|e| BenchError::io("killing child", e))?;
            Ok(Shutdown::Killed)
        }
    }
}

/// Run the benchmark project's build once
///
/// # Errors
/// - `BenchError::Spawn` if the build tool cannot be started
/// - `BenchError::BuildFailed` with combined stdout and stderr on non-zero exit
pub async fn run_build(command: &CommandSpec) -> Result<()> {
    tracing::info!(command = %command.display(), "building benchmark");

    let output = command
        .to_command()
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|e| BenchError::Spawn {
            program: command.program.clone(),
            source: e,
        })?;

    if output.status.success() {
        tracing::info!("build succeeded");
        return Ok(());
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    Err(BenchError::BuildFailed {
        status: output.status.to_string(),
        output: format!("{stdout}\n{stderr}"),
    })
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn sh(script: &str) -> CommandSpec {
        CommandSpec::new("sh").with_args(["-c", script])
    }

    #[tokio::test]
    async fn build_success() {
        run_build(&sh("exit 0")).await.unwrap();
    }

    #[tokio::test]
    async fn build_failure_surfaces_both_streams() {
        let err = run_build(&sh("echo compiling; echo 'error CS1002' >&2; exit 3"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Build);
        let text = err.to_string();
        assert!(text.contains("compiling"));
        assert!(text.contains("error CS1002"));
    }

    #[tokio::test]
    async fn build_missing_tool_is_spawn_error() {
        let err = run_build(&CommandSpec::new("/nonexistent/speedbench-build"))
            .await
            .unwrap_err();
        assert!(matches!(err, BenchError::Spawn { .. }));
    }

    #[tokio::test]
    async fn shutdown_interrupts_cooperative_child() {
        let mut child = sh("trap 'exit 0' INT; while :; do sleep 0.05; done")
            .to_command()
            .spawn()
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        let outcome = shutdown(&mut child, ShutdownPolicy::default()).await.unwrap();
        assert!(matches!(outcome, Shutdown::Graceful(_)));
    }

    #[tokio::test]
    async fn interrupt_delivers_sigint() {
        let mut child = sh("trap 'exit 7' INT; while :; do sleep 0.05; done")
            .to_command()
            .spawn()
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        interrupt(&child).unwrap();
        let status = child.wait().await.unwrap();
        assert_eq!(status.code(), Some(7));
        // reaped child has no pid left to signal
        interrupt(&child).unwrap();
    }

    #[tokio::test]
    async fn shutdown_kills_stubborn_child() {
        let mut child = sh("trap '' INT; while :; do sleep 0.05; done")
            .to_command()
            .spawn()
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        let policy = ShutdownPolicy {
            timeout: Duration::from_millis(300),
        };
        let outcome = shutdown(&mut child, policy).await.unwrap();
        assert_eq!(outcome, Shutdown::Killed);
    }

    #[tokio::test]
    async fn shutdown_of_exited_child() {
        let mut child = sh("exit 0").to_command().spawn().unwrap();
        child.wait().await.unwrap();
        let outcome = shutdown(&mut child, ShutdownPolicy::default()).await.unwrap();
        assert!(matches!(outcome, Shutdown::AlreadyExited(_)));
    }
}

//! Remote command runner.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::ExecError;
use crate::tlw::{Access, RunRequest, RunResult};

/// Exit code reported for a command that ran out of time.
pub const TIMEOUT_EXIT_CODE: i32 = 124;

/// Runs shell commands on one resource through [`Access`].
#[derive(Clone)]
pub struct Runner {
    access: Arc<dyn Access>,
    resource: String,
    cancel: CancellationToken,
    deadline: Option<Instant>,
    background: bool,
}

impl Runner {
    pub fn new(access: Arc<dyn Access>, resource: impl Into<String>) -> Self {
        Self {
            access,
            resource: resource.into(),
            cancel: CancellationToken::new(),
            deadline: None,
            background: false,
        }
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Cap every command at the time left until `deadline`.
    pub fn with_deadline(mut self, deadline: Option<Instant>) -> Self {
        self.deadline = deadline;
        self
    }

    /// Return once the command is dispatched, without waiting for it.
    pub fn background(mut self) -> Self {
        self.background = true;
        self
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// Run `cmd` joined with `args` and return its stdout with trailing
    /// whitespace removed.
    ///
    /// A non-zero exit code is classified into error tags; the captured
    /// stdout stays available through [`ExecError::output`].
    pub async fn run(
        &self,
        timeout: Duration,
        cmd: &str,
        args: &[&str],
    ) -> Result<String, ExecError> {
        if self.cancel.is_cancelled() {
            return Err(ExecError::cancelled(format!(
                "run {cmd:?} on {:?}: cancelled",
                self.resource
            )));
        }
        let timeout = self.budget(timeout, cmd)?;
        let mut req = RunRequest::new(self.resource.clone(), cmd).with_timeout(timeout);
        req.args = args.iter().map(|a| a.to_string()).collect();
        if self.background {
            req = req.in_background();
        }
        let full_command = req.full_command();
        debug!("Run {:?} on {:?} (timeout {:?})", full_command, self.resource, timeout);

        let result = tokio::select! {
            _ = self.cancel.cancelled() => {
                return Err(ExecError::cancelled(format!(
                    "run {full_command:?} on {:?}: cancelled",
                    self.resource
                )));
            }
            res = tokio::time::timeout(timeout, self.access.run(req)) => match res {
                Ok(result) => result,
                Err(_) => RunResult {
                    command: full_command.clone(),
                    exit_code: TIMEOUT_EXIT_CODE,
                    stdout: String::new(),
                    stderr: format!("timed out after {timeout:?}"),
                },
            },
        };
        self.classify(&full_command, result)
    }

    fn budget(&self, timeout: Duration, cmd: &str) -> Result<Duration, ExecError> {
        let Some(deadline) = self.deadline else {
            return Ok(timeout);
        };
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(ExecError::deadline_exceeded(format!(
                "run {cmd:?} on {:?}: run deadline exceeded",
                self.resource
            )));
        }
        Ok(timeout.min(remaining))
    }

    fn classify(&self, full_command: &str, result: RunResult) -> Result<String, ExecError> {
        let stdout = result.stdout.trim_end().to_string();
        if result.exit_code == 0 {
            return Ok(stdout);
        }
        let stderr = result.stderr.trim();
        let message = if stderr.is_empty() {
            format!(
                "run {full_command:?} on {:?}: exit code {}",
                self.resource, result.exit_code
            )
        } else {
            format!(
                "run {full_command:?} on {:?}: exit code {}: {stderr}",
                self.resource, result.exit_code
            )
        };
        Err(ExecError::from_exit_code(result.exit_code, message).with_output(stdout))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorTag;
    use crate::tlw::MockAccess;

    fn runner(access: &MockAccess) -> Runner {
        Runner::new(Arc::new(access.clone()), "dut-1")
    }

    #[tokio::test]
    async fn test_stdout_is_trimmed() {
        let access = MockAccess::new();
        access
            .expect_run("dut-1", "cat /etc/lsb-release")
            .returns_stdout("board=octopus\n\n")
            .finish();
        let out = runner(&access)
            .run(Duration::from_secs(5), "cat", &["/etc/lsb-release"])
            .await
            .unwrap();
        assert_eq!(out, "board=octopus");
    }

    #[tokio::test]
    async fn test_output_kept_on_error() {
        let access = MockAccess::new();
        access
            .expect_run("dut-1", "check")
            .returns_exit_code(3)
            .returns_stdout("partial  \n")
            .returns_stderr("bad state")
            .finish();
        let err = runner(&access)
            .run(Duration::from_secs(5), "check", &[])
            .await
            .unwrap_err();
        assert_eq!(err.exit_code(), Some(3));
        assert_eq!(err.output(), Some("partial"));
        assert!(err.message().ends_with("bad state"));
        assert!(ErrorTag::GeneralError.is_in(&err));
    }

    #[tokio::test]
    async fn test_slow_command_times_out() {
        let access = MockAccess::new();
        access
            .expect_run("dut-1", "sleep 10")
            .delay(Duration::from_secs(10))
            .finish();
        let err = runner(&access)
            .run(Duration::from_millis(20), "sleep", &["10"])
            .await
            .unwrap_err();
        assert!(ErrorTag::SshErrorLinuxTimeout.is_in(&err));
    }

    #[tokio::test]
    async fn test_background_returns_immediately() {
        let access = MockAccess::new();
        access
            .expect_run("dut-1", "reboot")
            .delay(Duration::from_secs(30))
            .finish();
        let out = runner(&access)
            .background()
            .run(Duration::from_secs(1), "reboot", &[])
            .await
            .unwrap();
        assert!(out.is_empty());
        assert!(access.run_history()[0].in_background);
    }

    #[tokio::test]
    async fn test_expired_deadline() {
        let access = MockAccess::new();
        let err = runner(&access)
            .with_deadline(Some(Instant::now()))
            .run(Duration::from_secs(5), "true", &[])
            .await
            .unwrap_err();
        assert!(ErrorTag::DeadlineExceeded.is_in(&err));
        assert!(access.run_history().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_runner() {
        let access = MockAccess::new();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = runner(&access)
            .with_cancel(cancel)
            .run(Duration::from_secs(5), "true", &[])
            .await
            .unwrap_err();
        assert!(err.is_fatal());
    }
}

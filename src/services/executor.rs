//! Command execution with timeout, retry and exponential backoff.
//!
//! Commands are structured argument vectors ([`CommandSpec`]), never shell
//! strings. The actual spawn happens behind the [`CommandRunner`] trait so the
//! pipelines can be driven by a simulated runner in tests.

use crate::metrics::InstallMetrics;
use crate::models::Privilege;
use async_trait::async_trait;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::process::Command;

/// Programs whose failures warrant a package-database cleanup before retrying
const PACKAGE_MANAGER_TOOLS: [&str; 4] = ["apt-get", "apt", "dpkg", "dpkg-query"];

/// Timeout for each individual cleanup command
const CLEANUP_TIMEOUT: Duration = Duration::from_secs(60);

/// Pause between killing stray package-manager processes and repairing dpkg
const DEFAULT_CLEANUP_SETTLE: Duration = Duration::from_secs(2);

/// A command to run, as a program plus argument vector
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,

    /// Needs root; gains a `sudo` prefix when the process is unprivileged
    pub elevate: bool,

    /// Run as this (non-privileged) user instead of the process owner
    pub run_as: Option<String>,

    pub env: Vec<(String, String)>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            elevate: false,
            run_as: None,
            env: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn elevated(mut self) -> Self {
        self.elevate = true;
        self
    }

    pub fn as_user(mut self, user: impl Into<String>) -> Self {
        self.run_as = Some(user.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn touches_package_manager(&self) -> bool {
        let program = self.program.rsplit('/').next().unwrap_or(&self.program);
        PACKAGE_MANAGER_TOOLS.contains(&program)
    }

    /// Final argv after applying privilege changes
    pub fn argv(&self, privilege: Privilege) -> Vec<String> {
        let mut argv = Vec::with_capacity(self.args.len() + 5);

        if let Some(user) = &self.run_as {
            argv.extend(["sudo", "-u", user.as_str(), "-H"].map(String::from));
        } else if self.elevate && privilege == Privilege::Unprivileged {
            argv.push("sudo".to_string());
        }

        argv.push(self.program.clone());
        argv.extend(self.args.iter().cloned());
        argv
    }

    /// Human-readable rendering for logs and error messages
    pub fn display(&self) -> String {
        std::iter::once(&self.program)
            .chain(self.args.iter())
            .map(|part| {
                if part.is_empty() || part.contains(char::is_whitespace) {
                    format!("'{}'", part)
                } else {
                    part.clone()
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Captured result of a finished process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code; -1 when the process was killed by a signal
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
    pub elapsed: Duration,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == 0
    }

    /// Convenience constructor for simulated runners
    pub fn with_code(code: i32) -> Self {
        Self {
            code,
            stdout: String::new(),
            stderr: String::new(),
            elapsed: Duration::ZERO,
        }
    }

    pub fn with_stdout(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            ..Self::with_code(0)
        }
    }
}

/// Errors that can occur while running a command
#[derive(Error, Debug)]
pub enum CommandError {
    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` timed out after {timeout:?}")]
    Timeout { command: String, timeout: Duration },

    #[error("`{command}` failed with exit code {code}")]
    NonZeroExit {
        command: String,
        code: i32,
        stderr: String,
    },
}

impl CommandError {
    /// Timeouts and non-zero exits are transient; spawn failures are not
    pub fn is_retryable(&self) -> bool {
        !matches!(self, CommandError::Spawn { .. })
    }
}

/// Spawns a [`CommandSpec`] and waits for it under a timeout.
///
/// Implementations return `Ok` for any process that ran to completion,
/// whatever its exit code. Interpreting the code is the executor's job.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, spec: &CommandSpec, timeout: Duration)
    -> Result<CommandOutput, CommandError>;
}

/// Runs commands on the real host with `tokio::process`
#[derive(Debug, Clone)]
pub struct SystemRunner {
    privilege: Privilege,
}

impl SystemRunner {
    pub fn new(privilege: Privilege) -> Self {
        Self { privilege }
    }
}

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(
        &self,
        spec: &CommandSpec,
        timeout: Duration,
    ) -> Result<CommandOutput, CommandError> {
        let argv = spec.argv(self.privilege);
        let (program, args) = argv.split_first().ok_or_else(|| CommandError::Spawn {
            command: spec.display(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty argv"),
        })?;

        let mut cmd = Command::new(program);
        cmd.args(args)
            .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let start = Instant::now();
        let child = cmd.spawn().map_err(|source| CommandError::Spawn {
            command: spec.display(),
            source,
        })?;

        // Dropping the wait future on timeout drops the child, which kills it.
        let output = tokio::time::timeout(timeout, child.wait_with_output())
            .await
            .map_err(|_| CommandError::Timeout {
                command: spec.display(),
                timeout,
            })?
            .map_err(|source| CommandError::Spawn {
                command: spec.display(),
                source,
            })?;

        Ok(CommandOutput {
            code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            elapsed: start.elapsed(),
        })
    }
}

/// Delay before 0-indexed attempt `attempt`: `2^(attempt-1)` seconds, none before the first
pub fn backoff_delay(attempt: u32) -> Duration {
    if attempt == 0 {
        Duration::ZERO
    } else {
        Duration::from_secs(2u64.saturating_pow(attempt - 1))
    }
}

/// Retrying command executor.
///
/// Each call is independent; the only shared state is the metrics counters,
/// so one executor can serve concurrent install workers behind an `Arc`.
pub struct CommandExecutor<R> {
    runner: R,
    metrics: Arc<InstallMetrics>,
    default_timeout: Duration,
    default_attempts: u32,
    cleanup_settle: Duration,
}

impl<R: CommandRunner> CommandExecutor<R> {
    pub fn new(runner: R, default_timeout: Duration, default_attempts: u32) -> Self {
        Self {
            runner,
            metrics: Arc::new(InstallMetrics::new()),
            default_timeout,
            default_attempts: default_attempts.max(1),
            cleanup_settle: DEFAULT_CLEANUP_SETTLE,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<InstallMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_cleanup_settle(mut self, settle: Duration) -> Self {
        self.cleanup_settle = settle;
        self
    }

    pub fn metrics(&self) -> &Arc<InstallMetrics> {
        &self.metrics
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Run with the configured timeout and attempt ceiling
    pub async fn execute(
        &self,
        spec: &CommandSpec,
        description: &str,
    ) -> Result<CommandOutput, CommandError> {
        self.execute_with(spec, description, None, None).await
    }

    /// Run `spec` until it exits 0, retrying timeouts and non-zero exits.
    ///
    /// Before 0-indexed attempt *k* (k ≥ 1) the executor sleeps `2^(k-1)`
    /// seconds. Package-manager commands get a best-effort cleanup between
    /// attempts. When the ceiling is reached the last failure is returned.
    /// Spawn failures are returned immediately.
    pub async fn execute_with(
        &self,
        spec: &CommandSpec,
        description: &str,
        timeout: Option<Duration>,
        max_attempts: Option<u32>,
    ) -> Result<CommandOutput, CommandError> {
        let timeout = timeout.unwrap_or(self.default_timeout);
        let max_attempts = max_attempts.unwrap_or(self.default_attempts).max(1);

        tracing::debug!("Executing: {}", spec.display());

        let mut attempt = 0;
        loop {
            if attempt > 0 {
                let delay = backoff_delay(attempt);
                tracing::debug!("Backing off for {:?} before retry", delay);
                tokio::time::sleep(delay).await;
            }

            self.metrics.record_attempt(attempt);

            let failure = match self.runner.run(spec, timeout).await {
                Ok(output) if output.success() => {
                    tracing::info!(
                        "{} (took {:.2}s)",
                        description,
                        output.elapsed.as_secs_f64()
                    );
                    self.metrics.record_success();
                    return Ok(output);
                }
                Ok(output) => {
                    tracing::warn!(
                        "Command failed (attempt {}/{}): {} (exit code {})",
                        attempt + 1,
                        max_attempts,
                        spec.display(),
                        output.code
                    );
                    if !output.stderr.trim().is_empty() {
                        tracing::debug!("stderr: {}", tail(&output.stderr, 20));
                    }
                    CommandError::NonZeroExit {
                        command: spec.display(),
                        code: output.code,
                        stderr: tail(&output.stderr, 20),
                    }
                }
                Err(err @ CommandError::Timeout { .. }) => {
                    tracing::warn!(
                        "Command timed out (attempt {}/{}): {}",
                        attempt + 1,
                        max_attempts,
                        spec.display()
                    );
                    self.metrics.record_timeout();
                    err
                }
                Err(err) => {
                    tracing::error!("{}: {}", description, err);
                    self.metrics.record_failure();
                    return Err(err);
                }
            };

            attempt += 1;
            if attempt >= max_attempts || !failure.is_retryable() {
                self.metrics.record_failure();
                return Err(failure);
            }

            if spec.touches_package_manager() {
                self.cleanup_package_manager().await;
            }
        }
    }

    /// Single attempt that reports the exit code instead of failing on it.
    ///
    /// Used for queries (`dpkg --print-architecture`, `docker info`) where a
    /// non-zero exit is an answer rather than an error.
    pub async fn query(
        &self,
        spec: &CommandSpec,
        timeout: Duration,
    ) -> Result<CommandOutput, CommandError> {
        tracing::debug!("Probing: {}", spec.display());
        self.metrics.record_attempt(0);
        let output = self.runner.run(spec, timeout).await?;
        tracing::debug!("Probe `{}` exited {}", spec.display(), output.code);
        Ok(output)
    }

    /// Kill stray apt/dpkg processes and repair an interrupted dpkg database.
    ///
    /// Every step is best-effort; failures are logged and ignored.
    pub async fn cleanup_package_manager(&self) {
        tracing::info!("Cleaning up package management processes...");
        self.metrics.record_cleanup();

        for tool in ["apt-get", "dpkg"] {
            let kill = CommandSpec::new("pkill").args(["-f", tool]).elevated();
            if let Err(e) = self.runner.run(&kill, CLEANUP_TIMEOUT).await {
                tracing::warn!("Failed to stop stray {} processes: {}", tool, e);
            }
        }

        tokio::time::sleep(self.cleanup_settle).await;

        let repair = CommandSpec::new("dpkg")
            .args(["--configure", "-a"])
            .env("DEBIAN_FRONTEND", "noninteractive")
            .elevated();
        match self.runner.run(&repair, CLEANUP_TIMEOUT).await {
            Ok(output) if output.success() => {
                tracing::info!("Package management cleanup completed")
            }
            Ok(output) => tracing::warn!(
                "dpkg --configure -a exited {} during cleanup",
                output.code
            ),
            Err(e) => tracing::warn!("Failed to repair dpkg state: {}", e),
        }
    }
}

/// Last `lines` lines of a process stream
fn tail(text: &str, lines: usize) -> String {
    let all: Vec<&str> = text.lines().collect();
    let start = all.len().saturating_sub(lines);
    all[start..].join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::predicate::*;
    use mockall::Sequence;

    fn executor(runner: MockCommandRunner, attempts: u32) -> CommandExecutor<MockCommandRunner> {
        CommandExecutor::new(runner, Duration::from_secs(5), attempts)
            .with_cleanup_settle(Duration::ZERO)
    }

    #[test]
    fn test_backoff_delay_sequence() {
        assert_eq!(backoff_delay(0), Duration::ZERO);
        assert_eq!(backoff_delay(1), Duration::from_secs(1));
        assert_eq!(backoff_delay(2), Duration::from_secs(2));
        assert_eq!(backoff_delay(3), Duration::from_secs(4));
        assert_eq!(backoff_delay(6), Duration::from_secs(32));
    }

    #[test]
    fn test_argv_privilege_handling() {
        let spec = CommandSpec::new("apt-get").args(["install", "-y", "curl"]).elevated();
        assert_eq!(spec.argv(Privilege::Root), vec!["apt-get", "install", "-y", "curl"]);
        assert_eq!(
            spec.argv(Privilege::Unprivileged),
            vec!["sudo", "apt-get", "install", "-y", "curl"]
        );

        let as_user = CommandSpec::new("rosdep").arg("update").as_user("alice");
        assert_eq!(
            as_user.argv(Privilege::Root),
            vec!["sudo", "-u", "alice", "-H", "rosdep", "update"]
        );
    }

    #[test]
    fn test_touches_package_manager() {
        assert!(CommandSpec::new("apt-get").arg("update").touches_package_manager());
        assert!(CommandSpec::new("/usr/bin/dpkg").arg("-l").touches_package_manager());
        assert!(!CommandSpec::new("docker").arg("info").touches_package_manager());
    }

    #[test]
    fn test_display_quotes_whitespace() {
        let spec = CommandSpec::new("bash").args(["-c", "source \"$1\" && ros2 --help"]);
        assert_eq!(spec.display(), "bash -c 'source \"$1\" && ros2 --help'");
    }

    #[tokio::test]
    async fn test_success_on_first_attempt() {
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .times(1)
            .returning(|_, _| Ok(CommandOutput::with_code(0)));

        let executor = executor(runner, 3);
        let spec = CommandSpec::new("true");
        assert!(executor.execute(&spec, "noop").await.is_ok());
        assert_eq!(executor.metrics().retries.load(std::sync::atomic::Ordering::Relaxed), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_then_succeeds() {
        let mut runner = MockCommandRunner::new();
        let mut seq = Sequence::new();
        runner
            .expect_run()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(CommandOutput::with_code(1)));
        runner
            .expect_run()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|spec, timeout| {
                Err(CommandError::Timeout {
                    command: spec.display(),
                    timeout,
                })
            });
        runner
            .expect_run()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(CommandOutput::with_code(0)));

        let executor = executor(runner, 3);
        let result = executor.execute(&CommandSpec::new("flaky"), "flaky").await;

        assert!(result.is_ok());
        let metrics = executor.metrics();
        assert_eq!(metrics.attempts.load(std::sync::atomic::Ordering::Relaxed), 3);
        assert_eq!(metrics.timeouts.load(std::sync::atomic::Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_spawn_failure_not_retried() {
        let mut runner = MockCommandRunner::new();
        runner.expect_run().times(1).returning(|spec, _| {
            Err(CommandError::Spawn {
                command: spec.display(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
            })
        });

        let executor = executor(runner, 5);
        let err = executor
            .execute(&CommandSpec::new("missing-binary"), "missing")
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::Spawn { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_package_manager_failure_triggers_cleanup() {
        let mut runner = MockCommandRunner::new();
        let apt_calls = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = apt_calls.clone();

        runner
            .expect_run()
            .with(function(|spec: &CommandSpec| spec.program == "apt-get"), always())
            .returning(move |_, _| {
                let n = counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                Ok(CommandOutput::with_code(if n == 0 { 100 } else { 0 }))
            });
        runner
            .expect_run()
            .with(function(|spec: &CommandSpec| spec.program == "pkill"), always())
            .times(2)
            .returning(|_, _| Ok(CommandOutput::with_code(1)));
        runner
            .expect_run()
            .with(function(|spec: &CommandSpec| spec.program == "dpkg"), always())
            .times(1)
            .returning(|_, _| Ok(CommandOutput::with_code(0)));

        let executor = executor(runner, 3);
        let spec = CommandSpec::new("apt-get").args(["install", "-y", "curl"]);
        executor.execute(&spec, "Installing curl").await.unwrap();

        assert_eq!(apt_calls.load(std::sync::atomic::Ordering::SeqCst), 2);
        assert_eq!(executor.metrics().cleanups.load(std::sync::atomic::Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_query_returns_nonzero_output() {
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .with(eq(CommandSpec::new("docker").arg("info")), always())
            .times(1)
            .returning(|_, _| Ok(CommandOutput::with_code(1)));

        let executor = executor(runner, 3);
        let output = executor
            .query(&CommandSpec::new("docker").arg("info"), Duration::from_secs(5))
            .await
            .unwrap();
        assert!(!output.success());
    }
}

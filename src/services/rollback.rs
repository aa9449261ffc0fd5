//! Failure-triggered unwind for the native pipeline.
//!
//! The guard snapshots the journal before the protected work starts. If the
//! work fails, packages that appeared in the journal since the snapshot are
//! removed with a single package-manager command and every recorded backup is
//! renamed back over its original. The removal gets the executor's full retry
//! ceiling and dpkg cleanup, since it usually follows a failed apt call.
//! Repository and key files are left in place.

use crate::error::InstallerError;
use crate::journal::{Journal, JournalState};
use crate::services::executor::{CommandExecutor, CommandRunner};
use crate::services::packages::apt_remove;
use crate::services::profile::original_path;
use crate::services::validator::Elevated;
use camino::Utf8PathBuf;
use std::fs;
use std::future::Future;
use std::sync::Arc;

/// What the rollback managed to undo
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RollbackReport {
    /// Packages a removal was requested for
    pub removed: Vec<String>,

    /// Original files restored from a backup
    pub restored: Vec<Utf8PathBuf>,

    /// Rollback sub-steps that failed
    pub warnings: Vec<String>,
}

/// The protected work's error, together with the rollback that followed it
#[derive(Debug)]
pub struct RollbackFailure {
    pub source: InstallerError,
    pub report: RollbackReport,
}

pub struct RollbackGuard<R> {
    executor: Arc<CommandExecutor<R>>,
    journal: Journal,
    _elevated: Elevated,
}

impl<R: CommandRunner> RollbackGuard<R> {
    pub fn new(executor: Arc<CommandExecutor<R>>, journal: Journal, elevated: Elevated) -> Self {
        Self {
            executor,
            journal,
            _elevated: elevated,
        }
    }

    /// Run `work`, rolling back on failure.
    ///
    /// The original error is always returned unchanged in
    /// [`RollbackFailure::source`]; rollback problems only add warnings.
    pub async fn protect<F, T>(&self, work: F) -> Result<T, RollbackFailure>
    where
        F: Future<Output = Result<T, InstallerError>>,
    {
        let before = self.journal.snapshot();

        match work.await {
            Ok(value) => Ok(value),
            Err(source) => {
                tracing::error!("Installation failed: {}", source);
                let report = self.rollback(&before).await;
                Err(RollbackFailure { source, report })
            }
        }
    }

    /// Undo everything recorded since `before`
    pub async fn rollback(&self, before: &JournalState) -> RollbackReport {
        tracing::warn!("Rolling back installation...");
        let after = self.journal.snapshot();
        let mut report = RollbackReport::default();

        let packages = after.packages_since(before);
        if !packages.is_empty() {
            tracing::info!("Removing {} packages installed during this run", packages.len());
            let spec = apt_remove(&packages);
            match self
                .executor
                .execute(&spec, "Removing installed packages")
                .await
            {
                Ok(_) => report.removed = packages,
                Err(e) => report
                    .warnings
                    .push(format!("Failed to remove packages during rollback: {}", e)),
            }
        }

        for backup in &after.backup_files {
            let Some(original) = original_path(backup) else {
                report
                    .warnings
                    .push(format!("Cannot derive original path for backup {}", backup));
                continue;
            };

            match fs::rename(backup, &original) {
                Ok(()) => {
                    tracing::info!("Restored {} from {}", original, backup);
                    report.restored.push(original);
                }
                Err(e) => report
                    .warnings
                    .push(format!("Failed to restore {} from {}: {}", original, backup, e)),
            }
        }

        for warning in &report.warnings {
            tracing::warn!("{}", warning);
        }
        tracing::info!("Rollback completed");

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{HostKind, Privilege, SystemSnapshot};
    use crate::services::executor::{CommandOutput, MockCommandRunner};
    use crate::services::validator::elevation;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;

    fn root_token() -> Elevated {
        let snapshot = SystemSnapshot {
            host: HostKind::Linux("ubuntu".to_string()),
            privilege: Privilege::Root,
            ..SystemSnapshot::unknown()
        };
        elevation(&snapshot).unwrap()
    }

    fn guard(runner: MockCommandRunner, journal: &Journal) -> RollbackGuard<MockCommandRunner> {
        let executor = CommandExecutor::new(runner, Duration::from_secs(5), 3)
            .with_cleanup_settle(Duration::ZERO);
        RollbackGuard::new(Arc::new(executor), journal.clone(), root_token())
    }

    #[tokio::test]
    async fn test_success_does_not_roll_back() {
        let mut runner = MockCommandRunner::new();
        runner.expect_run().never();

        let journal = Journal::new();
        let guard = guard(runner, &journal);
        let value = guard
            .protect(async {
                journal.record_package("ros-kilted-ros-core");
                Ok::<_, InstallerError>(42)
            })
            .await
            .unwrap();

        assert_eq!(value, 42);
        assert_eq!(journal.package_count(), 1);
    }

    #[tokio::test]
    async fn test_only_new_packages_are_removed() {
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .withf(|spec, _| {
                spec.program == "apt-get" && spec.args == ["remove", "-y", "ros-kilted-ros2cli"]
            })
            .times(1)
            .returning(|_, _| Ok(CommandOutput::with_code(0)));

        let journal = Journal::new();
        journal.record_package("ros-kilted-ros-core");
        let guard = guard(runner, &journal);

        let failure = guard
            .protect(async {
                journal.record_package("ros-kilted-ros2cli");
                Err::<(), _>(InstallerError::installation("step failed"))
            })
            .await
            .unwrap_err();

        assert_eq!(failure.source.to_string(), "Installation error: step failed");
        assert_eq!(failure.report.removed, vec!["ros-kilted-ros2cli"]);
        assert!(failure.report.warnings.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rollback_problems_become_warnings() {
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .withf(|spec, _| spec.program == "apt-get")
            .times(3)
            .returning(|_, _| Ok(CommandOutput::with_code(100)));
        runner
            .expect_run()
            .withf(|spec, _| spec.program == "pkill" || spec.program == "dpkg")
            .returning(|_, _| Ok(CommandOutput::with_code(0)));

        let temp_dir = TempDir::new().unwrap();
        let dir = Utf8PathBuf::try_from(temp_dir.path().to_path_buf()).unwrap();
        let missing_backup = dir.join(".bashrc.backup.abcd1234");

        let journal = Journal::new();
        let guard = guard(runner, &journal);
        let failure = guard
            .protect(async {
                journal.record_package("ros-kilted-desktop");
                journal.record_backup(&missing_backup);
                Err::<(), _>(InstallerError::installation("verify failed"))
            })
            .await
            .unwrap_err();

        assert!(failure.source.to_string().contains("verify failed"));
        assert!(failure.report.removed.is_empty());
        assert!(failure.report.restored.is_empty());
        assert_eq!(failure.report.warnings.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_removal_retried_after_dpkg_lock() {
        let removals = Arc::new(AtomicUsize::new(0));
        let cleanups = Arc::new(AtomicUsize::new(0));

        let mut runner = MockCommandRunner::new();
        let seen = removals.clone();
        runner
            .expect_run()
            .withf(|spec, _| spec.program == "apt-get")
            .returning(move |_, _| {
                // First attempt hits the lock left by the failed install
                let code = if seen.fetch_add(1, Ordering::SeqCst) == 0 { 100 } else { 0 };
                Ok(CommandOutput::with_code(code))
            });
        let cleaned = cleanups.clone();
        runner
            .expect_run()
            .withf(|spec, _| spec.program == "dpkg" && spec.args == ["--configure", "-a"])
            .returning(move |_, _| {
                cleaned.fetch_add(1, Ordering::SeqCst);
                Ok(CommandOutput::with_code(0))
            });
        runner
            .expect_run()
            .withf(|spec, _| spec.program == "pkill")
            .returning(|_, _| Ok(CommandOutput::with_code(0)));

        let journal = Journal::new();
        let guard = guard(runner, &journal);
        let failure = guard
            .protect(async {
                journal.record_package("ros-kilted-ros-core");
                Err::<(), _>(InstallerError::installation("install failed"))
            })
            .await
            .unwrap_err();

        assert_eq!(removals.load(Ordering::SeqCst), 2);
        assert_eq!(cleanups.load(Ordering::SeqCst), 1);
        assert_eq!(failure.report.removed, vec!["ros-kilted-ros-core"]);
        assert!(failure.report.warnings.is_empty());
    }
}

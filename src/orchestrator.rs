//! Top-level sequencing of one installer run.
//!
//! validate → select strategy → confirm → pipeline → [`InstallResult`].
//! Every fatal error is caught here, logged with the elapsed time and folded
//! into the result; nothing escapes as a panic or an `Err`.

use crate::error::{InstallerError, InstallerResult};
use crate::journal::Journal;
use crate::models::{HostLayout, InstallResult, InstallerConfig, PackageSet, RosDistro, RunId, SystemSnapshot};
use crate::services::container::{base_image, ContainerPipeline};
use crate::services::executor::{CommandExecutor, CommandRunner};
use crate::services::native::NativePipeline;
use crate::services::packages::{PackageCatalog, DEV_TOOLS};
use crate::services::rollback::RollbackGuard;
use crate::services::strategy::{self, Strategy};
use crate::services::validator::{self, ValidationReport};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tracing::Instrument;

/// What a run would install, shown before confirmation and by `--dry-run`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallPlan {
    pub strategy: Strategy,
    pub distro: RosDistro,
    pub tier: PackageSet,
    pub packages: Vec<String>,

    /// Installed best-effort; failures are warnings
    pub optional_packages: Vec<String>,

    /// Image tag and base image in containerized mode
    pub image: Option<(String, String)>,
}

impl InstallPlan {
    pub fn new(config: &InstallerConfig, strategy: Strategy) -> Self {
        let distro = config.installation.ros_distro;
        let tier = config.installation.package_set;
        let catalog = PackageCatalog::new(distro);

        let mut optional_packages = catalog.extension_packages(tier);
        optional_packages.extend(DEV_TOOLS.iter().map(|p| p.to_string()));

        let image = match strategy {
            Strategy::Native => None,
            Strategy::Containerized => Some((
                config.docker.image_tag(distro),
                base_image(distro, tier),
            )),
        };

        Self {
            strategy,
            distro,
            tier,
            packages: catalog.tier_packages(tier),
            optional_packages,
            image,
        }
    }
}

impl fmt::Display for InstallPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Installation plan ({} mode):", self.strategy)?;
        writeln!(f, "  ROS2 distribution: {}", self.distro)?;
        writeln!(f, "  Package set: {}", self.tier)?;
        if let Some((tag, base)) = &self.image {
            writeln!(f, "  Image: {} (from {})", tag, base)?;
        }
        writeln!(f, "  Packages: {}", self.packages.join(", "))?;
        write!(f, "  Optional: {}", self.optional_packages.join(", "))
    }
}

pub struct Orchestrator<R> {
    executor: Arc<CommandExecutor<R>>,
    config: Arc<InstallerConfig>,
    layout: HostLayout,
    run_id: RunId,
}

impl<R: CommandRunner + 'static> Orchestrator<R> {
    pub fn new(executor: Arc<CommandExecutor<R>>, config: Arc<InstallerConfig>, run_id: RunId) -> Self {
        Self {
            executor,
            config,
            layout: HostLayout::system(),
            run_id,
        }
    }

    /// Re-root every host path (tests)
    pub fn with_layout(mut self, layout: HostLayout) -> Self {
        self.layout = layout;
        self
    }

    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    /// Validate the snapshot and log the findings inside the run span
    /// (`--validate-only`, `--dry-run`)
    pub fn preflight(&self, snapshot: &SystemSnapshot) -> ValidationReport {
        self.span().in_scope(|| self.check(snapshot))
    }

    fn check(&self, snapshot: &SystemSnapshot) -> ValidationReport {
        let report = validator::validate(snapshot, &self.config);
        report.log();
        report
    }

    /// Execute a full run. `confirm` receives the plan after validation
    /// passes; resolving to `false` cancels before anything is mutated.
    /// An interactive prompt must not block the runtime thread while it waits.
    pub async fn run<C, F>(&self, snapshot: &SystemSnapshot, confirm: C) -> InstallResult
    where
        C: FnOnce(InstallPlan) -> F,
        F: Future<Output = bool>,
    {
        self.run_inner(snapshot, confirm).instrument(self.span()).await
    }

    /// Span tagging every log line of this run with its id
    pub fn span(&self) -> tracing::Span {
        tracing::info_span!("install", run_id = %self.run_id)
    }

    async fn run_inner<C, F>(&self, snapshot: &SystemSnapshot, confirm: C) -> InstallResult
    where
        C: FnOnce(InstallPlan) -> F,
        F: Future<Output = bool>,
    {
        let start = Instant::now();
        let journal = Journal::new();
        let mut warnings = Vec::new();
        let mut removed = 0;

        tracing::info!(
            "Starting ROS2 {} installation ({})",
            self.config.installation.ros_distro.title(),
            self.config.installation.package_set
        );

        let outcome = self
            .install(snapshot, confirm, &journal, &mut warnings, &mut removed)
            .await;

        let duration = start.elapsed();
        let errors = match &outcome {
            Ok(()) => {
                tracing::info!(
                    "Installation completed successfully in {:.2} seconds",
                    duration.as_secs_f64()
                );
                Vec::new()
            }
            Err(InstallerError::Cancelled) => {
                tracing::info!("Installation cancelled by user");
                vec![InstallerError::Cancelled.to_string()]
            }
            Err(e) => {
                tracing::error!(
                    "Installation failed after {:.2} seconds: {}",
                    duration.as_secs_f64(),
                    e
                );
                vec![e.to_string()]
            }
        };

        if self.config.security.audit_logging {
            journal.log_audit_trail();
        }
        self.executor.metrics().log_summary();

        InstallResult {
            success: outcome.is_ok(),
            duration,
            packages_installed: journal.package_count().saturating_sub(removed),
            errors,
            warnings,
            run_id: self.run_id.clone(),
        }
    }

    async fn install<C, F>(
        &self,
        snapshot: &SystemSnapshot,
        confirm: C,
        journal: &Journal,
        warnings: &mut Vec<String>,
        removed: &mut usize,
    ) -> InstallerResult<()>
    where
        C: FnOnce(InstallPlan) -> F,
        F: Future<Output = bool>,
    {
        let report = self.check(snapshot);
        warnings.extend(report.warnings.iter().cloned());
        if !report.is_ok() {
            return Err(InstallerError::Validation(report.issues.join("; ")));
        }

        let strategy = strategy::select(snapshot);
        tracing::info!("Selected {} installation strategy", strategy);

        let plan = InstallPlan::new(&self.config, strategy);
        if !confirm(plan).await {
            return Err(InstallerError::Cancelled);
        }

        match strategy {
            Strategy::Native => {
                let elevated = validator::elevation(snapshot).ok_or_else(|| {
                    InstallerError::Validation("Native installation requires root privileges".to_string())
                })?;

                let mut pipeline = NativePipeline::new(
                    self.executor.clone(),
                    self.config.clone(),
                    self.layout.clone(),
                    journal.clone(),
                    self.run_id.clone(),
                    snapshot.invoking_user.clone(),
                );
                let guard = RollbackGuard::new(self.executor.clone(), journal.clone(), elevated);
                let outcome = guard.protect(pipeline.run(elevated)).await;
                warnings.extend(pipeline.into_warnings());

                outcome.map_err(|failure| {
                    *removed = failure.report.removed.len();
                    warnings.extend(failure.report.warnings);
                    failure.source
                })
            }
            Strategy::Containerized => {
                let mut pipeline = ContainerPipeline::new(
                    self.executor.clone(),
                    self.config.clone(),
                    snapshot.clone(),
                    self.layout.clone(),
                    journal.clone(),
                    self.run_id.clone(),
                );
                let outcome = pipeline.run().await;
                warnings.extend(pipeline.into_warnings());
                outcome
            }
        }
    }
}

/// Race `work` against `interrupt`, checking the interrupt first on every
/// poll. `None` means the interrupt fired and `work` was dropped.
///
/// With `tokio::signal::ctrl_c()` as the interrupt, the signal handler is
/// installed on the first poll, before `work` runs at all.
pub async fn interruptible<W, I>(work: W, interrupt: I) -> Option<W::Output>
where
    W: Future,
    I: Future,
{
    tokio::pin!(work);
    tokio::pin!(interrupt);

    tokio::select! {
        biased;
        _ = &mut interrupt => None,
        output = &mut work => Some(output),
    }
}

//! Native install pipeline: mutates the host package database directly.
//!
//! Steps run strictly in order. Every mutation lands in the shared
//! [`Journal`] as soon as it succeeds, so the rollback guard wrapping
//! [`NativePipeline::run`] sees exactly what was done before a failure.

use crate::error::{InstallerError, InstallerResult, StepPolicy};
use crate::journal::Journal;
use crate::models::{HostLayout, InstallerConfig, RunId};
use crate::services::executor::{CommandExecutor, CommandRunner, CommandSpec};
use crate::services::packages::{
    apt_get, apt_install, apt_remove, installed_packages_query, package_status_query,
    PackageCatalog, DEV_TOOLS, PREREQUISITES,
};
use crate::services::profile::{append_block_once, ProfileBlock, ProfileEdit};
use crate::services::validator::Elevated;
use camino::Utf8Path;
use std::fs;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Signing key for packages.ros.org
pub const ROS_KEY_URL: &str = "https://raw.githubusercontent.com/ros/rosdistro/master/ros.key";

const ROS_APT_MIRROR: &str = "http://packages.ros.org/ros2/ubuntu";

/// Timeout for sourcing the environment and running `ros2 --help`
const VERIFY_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout for short host queries (architecture, codename, package status)
const QUERY_TIMEOUT: Duration = Duration::from_secs(30);

/// `deb` line for the ROS 2 apt repository
pub fn repository_line(arch: &str, keyring: &Utf8Path, codename: &str) -> String {
    format!(
        "deb [arch={} signed-by={}] {} {} main",
        arch, keyring, ROS_APT_MIRROR, codename
    )
}

/// Shell check that the installed environment works. The setup script is
/// passed as a positional parameter, never spliced into the script text.
pub fn environment_check(setup_script: &Utf8Path) -> CommandSpec {
    CommandSpec::new("bash").args([
        "-c",
        "source \"$1\" && ros2 --help",
        "bash",
        setup_script.as_str(),
    ])
}

pub struct NativePipeline<R> {
    executor: Arc<CommandExecutor<R>>,
    config: Arc<InstallerConfig>,
    layout: HostLayout,
    journal: Journal,
    run_id: RunId,
    invoking_user: Option<String>,
    catalog: PackageCatalog,
    warnings: Vec<String>,
}

impl<R: CommandRunner + 'static> NativePipeline<R> {
    pub fn new(
        executor: Arc<CommandExecutor<R>>,
        config: Arc<InstallerConfig>,
        layout: HostLayout,
        journal: Journal,
        run_id: RunId,
        invoking_user: Option<String>,
    ) -> Self {
        let catalog = PackageCatalog::new(config.installation.ros_distro);
        Self {
            executor,
            config,
            layout,
            journal,
            run_id,
            invoking_user,
            catalog,
            warnings: Vec::new(),
        }
    }

    /// Warnings accumulated by best-effort steps so far
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn into_warnings(self) -> Vec<String> {
        self.warnings
    }

    /// Run steps 1 through 7
    pub async fn run(&mut self, _elevated: Elevated) -> InstallerResult<()> {
        self.update_system().await?;
        if self.config.installation.uninstall_existing {
            self.remove_prior_installs().await?;
        }
        self.setup_repositories().await?;
        self.install_packages().await?;
        self.setup_dev_tools().await?;
        self.configure_environment().await?;
        self.verify().await?;
        Ok(())
    }

    async fn required(&self, spec: &CommandSpec, step: &str) -> InstallerResult<()> {
        self.executor
            .execute(spec, step)
            .await
            .map(|_| ())
            .map_err(|e| InstallerError::command(step, e))
    }

    /// Step 1: refresh the package index and install prerequisite tooling
    async fn update_system(&mut self) -> InstallerResult<()> {
        if !self.config.system.update_system {
            tracing::info!("Skipping system update");
            return Ok(());
        }

        tracing::info!("Updating system packages...");
        self.required(&apt_get(["update"]), "Updating package index")
            .await?;

        if self.config.system.install_dependencies {
            self.required(&apt_install(&PREREQUISITES[..]), "Installing essential packages")
                .await?;
        }
        Ok(())
    }

    /// Step 2: remove packages left by any known ROS release
    async fn remove_prior_installs(&mut self) -> InstallerResult<()> {
        tracing::info!("Checking for existing ROS installations...");

        let listing = match self
            .executor
            .query(&installed_packages_query(), QUERY_TIMEOUT)
            .await
        {
            Ok(output) if output.success() => output.stdout,
            Ok(output) => {
                let warning = format!(
                    "Could not check for existing ROS installations: dpkg-query exited {}",
                    output.code
                );
                tracing::warn!("{}", warning);
                self.warnings.push(warning);
                return Ok(());
            }
            Err(e) => {
                let warning = format!("Could not check for existing ROS installations: {}", e);
                tracing::warn!("{}", warning);
                self.warnings.push(warning);
                return Ok(());
            }
        };

        let prior = self.catalog.prior_installs(&listing);
        if prior.is_empty() {
            tracing::info!("No existing ROS installations found");
            return Ok(());
        }

        tracing::info!("Found {} existing ROS packages, removing...", prior.len());
        self.required(&apt_remove(&prior), "Removing ROS packages")
            .await?;
        self.required(&apt_get(["autoremove", "-y"]), "Cleaning up dependencies")
            .await
    }

    /// Step 3: signing key, repository definition, index refresh
    async fn setup_repositories(&mut self) -> InstallerResult<()> {
        if !self.config.system.add_repositories {
            tracing::info!("Skipping repository setup");
            return Ok(());
        }

        tracing::info!("Setting up ROS2 repositories...");

        let keyring = self.layout.keyring_path.clone();
        let fetch_key = CommandSpec::new("curl")
            .args(["-sSL", ROS_KEY_URL, "-o", keyring.as_str()])
            .elevated();
        self.required(&fetch_key, "Adding ROS2 GPG key").await?;
        self.journal.record_file_modified(&keyring);

        let arch = self
            .query_value(CommandSpec::new("dpkg").arg("--print-architecture"))
            .await?;
        let codename = self
            .query_value(CommandSpec::new("lsb_release").arg("-cs"))
            .await?;

        let repo_file = self.layout.repository_file();
        let line = repository_line(&arch, &keyring, &codename);
        self.write_system_file(&repo_file, &format!("{}\n", line))?;
        self.journal.record_repository(&repo_file);
        tracing::info!("Added ROS2 repository: {}", line);

        self.required(
            &apt_get(["update"]),
            "Updating package index with ROS2 repository",
        )
        .await
    }

    /// Trimmed stdout of a query that must succeed and print something
    async fn query_value(&self, spec: CommandSpec) -> InstallerResult<String> {
        let output = self
            .executor
            .query(&spec, QUERY_TIMEOUT)
            .await
            .map_err(|e| InstallerError::command("Querying host", e))?;

        let value = output.stdout.trim();
        if !output.success() || value.is_empty() {
            return Err(InstallerError::Installation(format!(
                "`{}` returned no value (exit code {})",
                spec.display(),
                output.code
            )));
        }
        Ok(value.to_string())
    }

    fn write_system_file(&self, path: &Utf8Path, content: &str) -> InstallerResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                InstallerError::Installation(format!("Failed to create {}: {}", parent, e))
            })?;
        }
        fs::write(path, content)
            .map_err(|e| InstallerError::Installation(format!("Failed to write {}: {}", path, e)))?;

        if self.config.security.secure_permissions {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(path, fs::Permissions::from_mode(0o644)).map_err(|e| {
                InstallerError::Installation(format!("Failed to set permissions on {}: {}", path, e))
            })?;
        }
        Ok(())
    }

    /// Step 4: tier packages, then best-effort extensions
    async fn install_packages(&mut self) -> InstallerResult<()> {
        let tier = self.config.installation.package_set;
        let distro = self.config.installation.ros_distro;
        tracing::info!("Installing ROS2 {} {} packages...", distro, tier);

        let packages = self.catalog.tier_packages(tier);
        let timeout = PackageCatalog::tier_timeout(tier, self.executor.default_timeout());
        let step = format!("Installing {} packages", tier);

        let started = Instant::now();
        self.executor
            .execute_with(&apt_install(&packages), &step, Some(timeout), None)
            .await
            .map_err(|e| InstallerError::command(step.as_str(), e))?;
        self.executor.metrics().record_install_time(started.elapsed());
        self.journal.record_packages(packages);

        let extensions = self.catalog.extension_packages(tier);
        if extensions.is_empty() {
            return Ok(());
        }

        if self.config.performance.parallel_installs {
            self.install_parallel(extensions).await;
        } else {
            for package in extensions {
                self.install_optional(&package).await;
            }
        }
        Ok(())
    }

    /// Install one package on its own; failure becomes a warning
    async fn install_optional(&mut self, package: &str) {
        let step = format!("Installing {}", package);
        let outcome = self
            .executor
            .execute(&apt_install(&[package]), &step)
            .await
            .map_err(|e| InstallerError::command(format!("Optional package {}", package), e));

        if let Ok(Some(_)) = StepPolicy::BestEffort.apply(outcome, &mut self.warnings) {
            self.journal.record_package(package);
        }
    }

    /// Install independent packages across a bounded worker pool
    async fn install_parallel(&mut self, packages: Vec<String>) {
        let workers = self.config.installation.parallel_jobs.min(packages.len()).max(1);
        let semaphore = Arc::new(Semaphore::new(workers));

        tracing::info!(
            "Installing {} optional packages (max concurrent: {})",
            packages.len(),
            workers
        );

        let mut tasks = JoinSet::new();
        for package in packages {
            let semaphore = semaphore.clone();
            let executor = self.executor.clone();
            let journal = self.journal.clone();

            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await.map_err(|e| {
                    InstallerError::Installation(format!("Optional package {}: {}", package, e))
                })?;

                let step = format!("Installing {}", package);
                executor
                    .execute(&apt_install(&[package.as_str()]), &step)
                    .await
                    .map_err(|e| {
                        InstallerError::command(format!("Optional package {}", package), e)
                    })?;
                journal.record_package(&package);
                Ok::<_, InstallerError>(())
            });
        }

        while let Some(joined) = tasks.join_next().await {
            let outcome = joined
                .map_err(|e| InstallerError::Installation(format!("Install task failed: {}", e)))
                .and_then(|result| result);
            // Best-effort steps never return Err
            let _ = StepPolicy::BestEffort.apply(outcome, &mut self.warnings);
        }
    }

    /// Step 5: developer tooling and the rosdep cache
    async fn setup_dev_tools(&mut self) -> InstallerResult<()> {
        tracing::info!("Setting up development tools...");

        for package in DEV_TOOLS {
            self.install_optional(package).await;
        }

        if !self.layout.rosdep_default_list.exists() {
            let init = CommandSpec::new("rosdep").arg("init").elevated();
            let outcome = self
                .executor
                .execute(&init, "Initializing rosdep")
                .await
                .map_err(|e| InstallerError::command("Initializing rosdep", e));
            StepPolicy::BestEffort.apply(outcome, &mut self.warnings)?;
        }

        match self.invoking_user.clone() {
            Some(user) => {
                let update = CommandSpec::new("rosdep").arg("update").as_user(user);
                let outcome = self
                    .executor
                    .execute(&update, "Updating rosdep database")
                    .await
                    .map_err(|e| InstallerError::command("Updating rosdep database", e));
                StepPolicy::BestEffort.apply(outcome, &mut self.warnings)?;
            }
            None => tracing::info!("No invoking user; skipping rosdep update"),
        }
        Ok(())
    }

    /// Step 6: append the environment block to the invoking user's `.bashrc`
    async fn configure_environment(&mut self) -> InstallerResult<()> {
        tracing::info!("Configuring environment...");

        let Some(user) = self.invoking_user.clone() else {
            let warning = "Could not determine original user for environment setup".to_string();
            tracing::warn!("{}", warning);
            self.warnings.push(warning);
            return Ok(());
        };

        let distro = self.config.installation.ros_distro;
        let profile = self.layout.user_home(&user).join(".bashrc");
        let block = ProfileBlock::ros_setup(distro, &HostLayout::system().setup_script(distro));
        let backup = self.config.system.backup_configs.then_some(&self.run_id);

        let edit = append_block_once(&profile, &block, backup, &self.journal)
            .map_err(|e| InstallerError::Installation(format!("{:#}", e)))?;

        if let ProfileEdit::Appended { .. } = edit {
            let owner = format!("{}:{}", user, user);
            let chown = CommandSpec::new("chown")
                .args([owner.as_str(), profile.as_str()])
                .elevated();
            self.required(&chown, "Setting .bashrc ownership").await?;
        }
        Ok(())
    }

    /// Step 7: install root, working `ros2` command, key packages
    async fn verify(&mut self) -> InstallerResult<()> {
        tracing::info!("Verifying installation...");
        let started = Instant::now();
        let distro = self.config.installation.ros_distro;

        let ros_root = self.layout.distro_root(distro);
        if !ros_root.is_dir() {
            return Err(InstallerError::Installation(format!(
                "ROS2 directory not found: {}",
                ros_root
            )));
        }

        let check = environment_check(&self.layout.setup_script(distro));
        self.executor
            .execute_with(&check, "Testing ROS2 command", Some(VERIFY_TIMEOUT), None)
            .await
            .map_err(|e| InstallerError::Installation(format!("ROS2 command test failed: {}", e)))?;

        for package in self.catalog.key_packages() {
            let outcome = match self
                .executor
                .query(&package_status_query(&package), QUERY_TIMEOUT)
                .await
            {
                Ok(output) if output.success() && output.stdout.contains("install ok installed") => {
                    tracing::info!("Package verified: {}", package);
                    Ok(())
                }
                Ok(_) => Err(InstallerError::Installation(format!(
                    "Package not found: {}",
                    package
                ))),
                Err(e) => Err(InstallerError::command(format!("Checking {}", package), e)),
            };
            StepPolicy::BestEffort.apply(outcome, &mut self.warnings)?;
        }

        self.executor
            .metrics()
            .record_verification_time(started.elapsed());
        tracing::info!("Installation verification completed successfully");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repository_line() {
        let line = repository_line(
            "amd64",
            Utf8Path::new("/usr/share/keyrings/ros-archive-keyring.gpg"),
            "noble",
        );
        assert_eq!(
            line,
            "deb [arch=amd64 signed-by=/usr/share/keyrings/ros-archive-keyring.gpg] \
             http://packages.ros.org/ros2/ubuntu noble main"
        );
    }

    #[test]
    fn test_environment_check_passes_script_as_argument() {
        let spec = environment_check(Utf8Path::new("/opt/ros/kilted/setup.bash"));
        assert_eq!(spec.program, "bash");
        assert_eq!(spec.args[1], "source \"$1\" && ros2 --help");
        assert_eq!(spec.args.last().unwrap(), "/opt/ros/kilted/setup.bash");
    }
}

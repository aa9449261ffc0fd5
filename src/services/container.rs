//! Containerized install pipeline for hosts without native packages.
//!
//! Builds an image from a synthesized Dockerfile, creates one persistent
//! container, and installs a host-side `ros2` wrapper that forwards into it.
//! Nothing here touches the host package database beyond installing the
//! container runtime itself, so there is no rollback: a failure leaves the
//! partial image or container in place for inspection.

use crate::error::{InstallerError, InstallerResult, StepPolicy};
use crate::journal::Journal;
use crate::models::{HostKind, HostLayout, InstallerConfig, PackageSet, RosDistro, RunId, SystemSnapshot};
use crate::services::executor::{CommandExecutor, CommandRunner, CommandSpec};
use crate::services::native::environment_check;
use crate::services::packages::{PackageCatalog, DEV_TOOLS};
use crate::services::profile::{append_block_once, ProfileBlock};
use camino::{Utf8Path, Utf8PathBuf};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::sync::Arc;
use std::time::Duration;

/// Container runtime CLI
pub const RUNTIME: &str = "docker";

/// Timeout for runtime queries and start/stop commands
const RUNTIME_QUERY_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout for the in-container `ros2 --help` check
const VERIFY_TIMEOUT: Duration = Duration::from_secs(60);

/// Mount point of the host workspace inside the container
const CONTAINER_WORKSPACE: &str = "/workspace";

/// Base image for a tier. The headless tiers use the official images, the
/// desktop tiers the OSRF images that ship the GUI stack.
pub fn base_image(distro: RosDistro, tier: PackageSet) -> String {
    match tier {
        PackageSet::Minimal => format!("ros:{}-ros-core", distro),
        PackageSet::Base => format!("ros:{}-ros-base", distro),
        PackageSet::Desktop => format!("osrf/ros:{}-desktop", distro),
        PackageSet::DesktopFull => format!("osrf/ros:{}-desktop-full", distro),
    }
}

/// Synthesize the Dockerfile for a distribution and tier.
///
/// Developer tools are required. Extension packages are installed one at a
/// time and skipped on failure, matching native mode.
pub fn build_manifest(distro: RosDistro, tier: PackageSet) -> String {
    let catalog = PackageCatalog::new(distro);
    let mut manifest = format!(
        "# ROS2 {} ({}) image - generated by ros2-installer\n\
         FROM {}\n\
         ENV DEBIAN_FRONTEND=noninteractive\n\
         RUN apt-get update \\\n    && apt-get install -y --no-install-recommends {} \\\n    && rm -rf /var/lib/apt/lists/*\n",
        distro.title(),
        tier,
        base_image(distro, tier),
        DEV_TOOLS.join(" ")
    );

    let extensions = catalog.extension_packages(tier);
    if !extensions.is_empty() {
        manifest.push_str(&format!(
            "RUN apt-get update \\\n    && for pkg in {}; do apt-get install -y \"$pkg\" || echo \"Skipping $pkg\"; done \\\n    && rm -rf /var/lib/apt/lists/*\n",
            extensions.join(" ")
        ));
    }

    manifest.push_str(&format!(
        "RUN echo \"source /opt/ros/{}/setup.bash\" >> /root/.bashrc\n\
         WORKDIR {}\n\
         CMD [\"bash\"]\n",
        distro, CONTAINER_WORKSPACE
    ));
    manifest
}

/// Host-side forwarding script. With no arguments it opens an interactive
/// shell in the container; otherwise it runs `ros2 <args>` there.
pub fn wrapper_script(container: &str, distro: RosDistro) -> String {
    format!(
        r#"#!/usr/bin/env bash
# ROS2 {title} container wrapper - generated by ros2-installer
set -e
CONTAINER="{container}"
SETUP="/opt/ros/{distro}/setup.bash"

if [ "$({runtime} inspect -f '{{{{.State.Running}}}}' "$CONTAINER" 2>/dev/null)" != "true" ]; then
    {runtime} start "$CONTAINER" > /dev/null
fi

TTY_FLAG=""
if [ -t 0 ]; then
    TTY_FLAG="-t"
fi

if [ $# -eq 0 ]; then
    exec {runtime} exec -i $TTY_FLAG "$CONTAINER" bash -c 'source "$1" && exec bash' bash "$SETUP"
fi

exec {runtime} exec -i $TTY_FLAG "$CONTAINER" bash -c 'source "$1" && shift && ros2 "$@"' bash "$SETUP" "$@"
"#,
        title = distro.title(),
        container = container,
        distro = distro,
        runtime = RUNTIME,
    )
}

/// Command that installs the container runtime with the host's package family
pub fn runtime_install_command(host: &HostKind) -> Option<CommandSpec> {
    let spec = match host {
        HostKind::MacOs => CommandSpec::new("brew").args(["install", "--cask", "docker"]),
        HostKind::Linux(distro) => match distro.as_str() {
            "debian" | "ubuntu" | "linuxmint" | "pop" | "raspbian" => {
                CommandSpec::new("apt-get")
                    .args(["install", "-y", "docker.io"])
                    .env("DEBIAN_FRONTEND", "noninteractive")
                    .elevated()
            }
            "fedora" | "rhel" | "centos" | "rocky" | "almalinux" => {
                CommandSpec::new("dnf").args(["install", "-y", "moby-engine"]).elevated()
            }
            "arch" | "manjaro" | "endeavouros" => CommandSpec::new("pacman")
                .args(["-S", "--noconfirm", "docker"])
                .elevated(),
            "opensuse" | "opensuse-leap" | "opensuse-tumbleweed" | "sles" => {
                CommandSpec::new("zypper")
                    .args(["--non-interactive", "install", "docker"])
                    .elevated()
            }
            _ => return None,
        },
        HostKind::Other(_) => return None,
    };
    Some(spec)
}

/// Command that asks the host to start the runtime's background service
pub fn daemon_start_command(host: &HostKind) -> Option<CommandSpec> {
    match host {
        HostKind::MacOs => Some(CommandSpec::new("open").args(["-a", "Docker"])),
        HostKind::Linux(_) => Some(
            CommandSpec::new("systemctl")
                .args(["start", RUNTIME])
                .elevated(),
        ),
        HostKind::Other(_) => None,
    }
}

/// Expand a leading `~` against `home`
pub fn expand_home(path: &str, home: Option<&Utf8Path>) -> InstallerResult<Utf8PathBuf> {
    let Some(rest) = path.strip_prefix('~') else {
        return Ok(Utf8PathBuf::from(path));
    };

    let home = home.ok_or_else(|| {
        InstallerError::Installation(format!("Cannot expand {}: home directory unknown", path))
    })?;
    Ok(home.join(rest.trim_start_matches('/')))
}

pub struct ContainerPipeline<R> {
    executor: Arc<CommandExecutor<R>>,
    config: Arc<InstallerConfig>,
    snapshot: SystemSnapshot,
    layout: HostLayout,
    journal: Journal,
    run_id: RunId,
    warnings: Vec<String>,
}

impl<R: CommandRunner> ContainerPipeline<R> {
    pub fn new(
        executor: Arc<CommandExecutor<R>>,
        config: Arc<InstallerConfig>,
        snapshot: SystemSnapshot,
        layout: HostLayout,
        journal: Journal,
        run_id: RunId,
    ) -> Self {
        Self {
            executor,
            config,
            snapshot,
            layout,
            journal,
            run_id,
            warnings: Vec::new(),
        }
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn into_warnings(self) -> Vec<String> {
        self.warnings
    }

    /// Run steps 1 through 6
    pub async fn run(&mut self) -> InstallerResult<()> {
        self.ensure_runtime().await?;
        self.ensure_daemon().await?;
        let tag = self.build_image().await?;
        self.create_container(&tag).await?;
        self.install_wrapper().await?;
        self.verify().await
    }

    async fn required(
        &self,
        spec: &CommandSpec,
        step: &str,
        timeout: Option<Duration>,
    ) -> InstallerResult<()> {
        self.executor
            .execute_with(spec, step, timeout, None)
            .await
            .map(|_| ())
            .map_err(|e| InstallerError::command(step, e))
    }

    fn home(&self) -> Option<&Utf8Path> {
        self.snapshot.home_dir.as_deref()
    }

    /// Step 1: install the runtime if it is not on PATH
    async fn ensure_runtime(&mut self) -> InstallerResult<()> {
        if let Some(path) = &self.snapshot.container_runtime {
            tracing::info!("Container runtime found at {}", path);
            return Ok(());
        }

        tracing::info!("Container runtime not found, installing...");
        let install = runtime_install_command(&self.snapshot.host).ok_or_else(|| {
            InstallerError::Installation(format!(
                "No supported way to install {} on {}; install it manually",
                RUNTIME, self.snapshot.host
            ))
        })?;
        self.required(&install, "Installing container runtime", None)
            .await
    }

    /// Step 2: wait until the daemon answers `docker info`
    async fn ensure_daemon(&mut self) -> InstallerResult<()> {
        let info = CommandSpec::new(RUNTIME).arg("info");
        if self.daemon_reachable(&info).await {
            tracing::info!("Container daemon is running");
            return Ok(());
        }

        if let Some(start) = daemon_start_command(&self.snapshot.host) {
            tracing::info!("Starting container daemon...");
            match self.executor.query(&start, RUNTIME_QUERY_TIMEOUT).await {
                Ok(output) if output.success() => {}
                Ok(output) => tracing::warn!("`{}` exited {}", start.display(), output.code),
                Err(e) => tracing::warn!("Failed to start container daemon: {}", e),
            }
        }

        let docker = &self.config.docker;
        let deadline = tokio::time::Instant::now() + Duration::from_secs(docker.daemon_timeout_seconds);
        let interval = Duration::from_secs(docker.poll_interval_seconds);

        while tokio::time::Instant::now() < deadline {
            tokio::time::sleep(interval).await;
            if self.daemon_reachable(&info).await {
                tracing::info!("Container daemon is running");
                return Ok(());
            }
            tracing::debug!("Waiting for container daemon...");
        }

        Err(InstallerError::Installation(format!(
            "Container daemon not reachable after {}s",
            docker.daemon_timeout_seconds
        )))
    }

    async fn daemon_reachable(&self, info: &CommandSpec) -> bool {
        self.executor
            .query(info, RUNTIME_QUERY_TIMEOUT)
            .await
            .map(|output| output.success())
            .unwrap_or(false)
    }

    /// Step 3: write the Dockerfile and build the image
    async fn build_image(&mut self) -> InstallerResult<String> {
        let distro = self.config.installation.ros_distro;
        let tier = self.config.installation.package_set;
        let build_dir = expand_home(&self.config.docker.build_dir, self.home())?;
        let dockerfile = build_dir.join("Dockerfile");

        fs::create_dir_all(&build_dir).map_err(|e| {
            InstallerError::Installation(format!("Failed to create {}: {}", build_dir, e))
        })?;
        fs::write(&dockerfile, build_manifest(distro, tier)).map_err(|e| {
            InstallerError::Installation(format!("Failed to write {}: {}", dockerfile, e))
        })?;
        self.journal.record_file_modified(&dockerfile);
        tracing::info!("Wrote build manifest to {}", dockerfile);

        let tag = self.config.docker.image_tag(distro);
        let build = CommandSpec::new(RUNTIME).args(["build", "-t", tag.as_str(), build_dir.as_str()]);
        let timeout = PackageCatalog::tier_timeout(tier, self.executor.default_timeout());
        self.required(&build, &format!("Building image {}", tag), Some(timeout))
            .await?;
        Ok(tag)
    }

    /// Step 4: replace any container of the same name with a fresh one
    async fn create_container(&mut self, tag: &str) -> InstallerResult<()> {
        let name = self.config.docker.container_name.clone();

        let remove = CommandSpec::new(RUNTIME).args(["rm", "-f", name.as_str()]);
        match self.executor.query(&remove, RUNTIME_QUERY_TIMEOUT).await {
            Ok(output) if output.success() => tracing::info!("Removed existing container {}", name),
            Ok(_) => tracing::debug!("No existing container named {}", name),
            Err(e) => tracing::warn!("Could not remove existing container {}: {}", name, e),
        }

        let workspace = expand_home(&self.config.docker.workspace, self.home())?;
        fs::create_dir_all(&workspace).map_err(|e| {
            InstallerError::Installation(format!("Failed to create workspace {}: {}", workspace, e))
        })?;

        let create = CommandSpec::new(RUNTIME).args([
            "create".to_string(),
            "--name".to_string(),
            name.clone(),
            "--network".to_string(),
            "host".to_string(),
            "-e".to_string(),
            "DISPLAY".to_string(),
            "-v".to_string(),
            "/tmp/.X11-unix:/tmp/.X11-unix:rw".to_string(),
            "-v".to_string(),
            format!("{}:{}", workspace, CONTAINER_WORKSPACE),
            "-w".to_string(),
            CONTAINER_WORKSPACE.to_string(),
            tag.to_string(),
            "tail".to_string(),
            "-f".to_string(),
            "/dev/null".to_string(),
        ]);
        self.required(&create, &format!("Creating container {}", name), None)
            .await
    }

    /// Step 5: install the forwarding wrapper and export its directory
    async fn install_wrapper(&mut self) -> InstallerResult<()> {
        let bin_dir = if self.snapshot.is_root() {
            self.layout.system_bin_dir.clone()
        } else {
            let home = self.home().ok_or_else(|| {
                InstallerError::Installation("Cannot install wrapper: home directory unknown".to_string())
            })?;
            home.join(".local/bin")
        };

        let wrapper = bin_dir.join(&self.config.docker.wrapper_name);
        let script = wrapper_script(
            &self.config.docker.container_name,
            self.config.installation.ros_distro,
        );

        fs::create_dir_all(&bin_dir).map_err(|e| {
            InstallerError::Installation(format!("Failed to create {}: {}", bin_dir, e))
        })?;
        fs::write(&wrapper, script).map_err(|e| {
            InstallerError::Installation(format!("Failed to write {}: {}", wrapper, e))
        })?;
        fs::set_permissions(&wrapper, fs::Permissions::from_mode(0o755)).map_err(|e| {
            InstallerError::Installation(format!("Failed to make {} executable: {}", wrapper, e))
        })?;
        self.journal.record_file_modified(&wrapper);
        tracing::info!("Installed wrapper {}", wrapper);

        if self.snapshot.on_search_path(&bin_dir) {
            return Ok(());
        }

        let outcome = self.export_path(&bin_dir);
        StepPolicy::BestEffort.apply(outcome, &mut self.warnings)?;
        Ok(())
    }

    fn export_path(&self, bin_dir: &Utf8Path) -> InstallerResult<()> {
        let home = self.home().ok_or_else(|| {
            InstallerError::Installation(format!(
                "{} is not on PATH and the home directory is unknown",
                bin_dir
            ))
        })?;

        let uses_zsh = self
            .snapshot
            .shell
            .as_deref()
            .is_some_and(|shell| shell.ends_with("zsh"));
        let profile = home.join(if uses_zsh { ".zshrc" } else { ".bashrc" });
        let backup = self.config.system.backup_configs.then_some(&self.run_id);

        append_block_once(&profile, &ProfileBlock::path_export(bin_dir), backup, &self.journal)
            .map(|_| ())
            .map_err(|e| InstallerError::Installation(format!("Failed to export PATH: {:#}", e)))
    }

    /// Step 6: start the container and run `ros2 --help` inside it
    async fn verify(&mut self) -> InstallerResult<()> {
        tracing::info!("Verifying containerized installation...");
        let name = self.config.docker.container_name.clone();
        let distro = self.config.installation.ros_distro;

        let start = CommandSpec::new(RUNTIME).args(["start", name.as_str()]);
        self.required(&start, &format!("Starting container {}", name), Some(RUNTIME_QUERY_TIMEOUT))
            .await?;

        let check = environment_check(&HostLayout::system().setup_script(distro));
        let exec = CommandSpec::new(RUNTIME)
            .args(["exec", name.as_str()])
            .arg(check.program)
            .args(check.args);
        self.executor
            .execute_with(&exec, "Testing ROS2 command in container", Some(VERIFY_TIMEOUT), None)
            .await
            .map_err(|e| {
                InstallerError::Installation(format!("ROS2 command test failed in container: {}", e))
            })?;

        tracing::info!("Containerized installation verified");
        Ok(())
    }
}

//! ros2-installer - command-line entry point.
//!
//! # Execution Flow
//!
//! 1. Parse arguments, load `config.yaml` (written with defaults if absent)
//! 2. Apply CLI overrides and re-check limits
//! 3. Initialize logging → configured file, or a per-run fallback file
//! 4. Capture the system snapshot
//! 5. `--validate-only` / `--dry-run` stop here; otherwise confirm and run
//! 6. Print the summary and exit 0 on success, 1 on any failure
//!
//! Ctrl-C at any point after the snapshot, the confirmation prompt included,
//! aborts immediately with exit code 1. Steps that already completed are not
//! rolled back in that case.

use anyhow::{Context, Result};
use camino::Utf8PathBuf;
use clap::Parser;
use ros2_installer::config::validate_limits;
use ros2_installer::models::{LogLevel, PackageSet, RosDistro};
use ros2_installer::services::system_info;
use ros2_installer::services::{CommandExecutor, SystemRunner};
use ros2_installer::{
    APP_NAME, ConfigManager, InstallPlan, InstallResult, InstallerConfig, Orchestrator, RunId,
    VERSION, interruptible,
};
use std::io::{self, BufRead, Write};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "ros2-installer", version, about = "ROS2 professional installer")]
#[command(after_help = "Examples:
  sudo ros2-installer
  sudo ros2-installer --config custom_config.yaml
  sudo ros2-installer --package-set base
  sudo ros2-installer --silent --log-level ERROR
  ros2-installer --validate-only")]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "config.yaml")]
    config: Utf8PathBuf,

    /// Package set to install (minimal, base, desktop, desktop-full)
    #[arg(short, long)]
    package_set: Option<PackageSet>,

    /// ROS2 distribution (kilted, jazzy, iron, humble, rolling)
    #[arg(short = 'd', long)]
    ros_distro: Option<RosDistro>,

    /// Log level (DEBUG, INFO, WARNING, ERROR, CRITICAL)
    #[arg(short, long)]
    log_level: Option<LogLevel>,

    /// Run without the confirmation prompt
    #[arg(short, long)]
    silent: bool,

    /// Only validate the system, do not install
    #[arg(long)]
    validate_only: bool,

    /// Validate and print the installation plan without changing anything
    #[arg(long)]
    dry_run: bool,

    /// Print the effective configuration and exit
    #[arg(long)]
    show_config: bool,

    /// Worker pool size for parallel installs
    #[arg(short = 'j', long)]
    parallel_jobs: Option<usize>,
}

impl Cli {
    fn apply_overrides(&self, config: &mut InstallerConfig) {
        if let Some(tier) = self.package_set {
            config.installation.package_set = tier;
        }
        if let Some(distro) = self.ros_distro {
            config.installation.ros_distro = distro;
        }
        if let Some(level) = self.log_level {
            config.logging.level = level;
        }
        if let Some(jobs) = self.parallel_jobs {
            config.installation.parallel_jobs = jobs;
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Fatal error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    let mut config = ConfigManager::new(&cli.config).load()?;
    cli.apply_overrides(&mut config);
    validate_limits(&config)?;

    if cli.show_config {
        print!("{}", ConfigManager::render(&config)?);
        return Ok(ExitCode::SUCCESS);
    }

    let run_id = RunId::generate();
    let (_guard, log_path) = ros2_installer::logging::setup_logging(&config.logging, &run_id)?;

    tracing::info!("Starting {} v{} (run {})", APP_NAME, VERSION, run_id);
    tracing::info!("Log file: {}", log_path);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("ros2-installer-worker")
        .build()
        .context("Failed to create tokio runtime")?;

    let snapshot = tracing::info_span!("install", run_id = %run_id).in_scope(|| {
        let snapshot = system_info::gather();
        system_info::log_system_info(&snapshot);
        snapshot
    });

    let config = Arc::new(config);
    let executor = CommandExecutor::new(
        SystemRunner::new(snapshot.privilege),
        Duration::from_secs(config.installation.timeout_seconds),
        config.installation.retry_attempts,
    );
    let orchestrator = Orchestrator::new(Arc::new(executor), config.clone(), run_id);

    if cli.validate_only || cli.dry_run {
        let report = orchestrator.preflight(&snapshot);
        if !report.is_ok() {
            println!("System validation failed:");
            for issue in &report.issues {
                println!("  - {}", issue);
            }
            return Ok(ExitCode::FAILURE);
        }

        println!("System validation passed");
        if cli.dry_run {
            let strategy = ros2_installer::services::strategy::select(&snapshot);
            println!("{}", InstallPlan::new(&config, strategy));
        }
        return Ok(ExitCode::SUCCESS);
    }

    let silent = cli.silent;
    let result = runtime.block_on(interruptible(
        orchestrator.run(&snapshot, |plan| async move {
            if silent {
                return true;
            }
            tokio::task::spawn_blocking(move || confirm(&plan))
                .await
                .unwrap_or(false)
        }),
        async {
            if tokio::signal::ctrl_c().await.is_err() {
                tracing::warn!("Could not listen for Ctrl-C");
                std::future::pending::<()>().await;
            }
        },
    ));

    // A prompt may still be blocked on stdin
    runtime.shutdown_background();

    let Some(result) = result else {
        tracing::warn!("Installation cancelled by user");
        println!("\nInstallation cancelled by user");
        return Ok(ExitCode::FAILURE);
    };

    print_summary(&result);
    Ok(ExitCode::from(result.exit_code() as u8))
}

/// Show the plan and ask before changing the host
fn confirm(plan: &InstallPlan) -> bool {
    println!("\n{}", plan);
    print!("\nProceed with installation? [y/N]: ");
    if io::stdout().flush().is_err() {
        return false;
    }

    let mut answer = String::new();
    match io::stdin().lock().read_line(&mut answer) {
        Ok(_) => matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"),
        Err(_) => false,
    }
}

fn print_summary(result: &InstallResult) {
    println!();
    if result.success {
        println!("Installation completed successfully");
    } else {
        println!("Installation failed");
    }
    println!("  Run id: {}", result.run_id);
    println!("  Duration: {:.2}s", result.duration.as_secs_f64());
    println!("  Packages installed: {}", result.packages_installed);

    if !result.warnings.is_empty() {
        println!("  Warnings:");
        for warning in &result.warnings {
            println!("    - {}", warning);
        }
    }
    if !result.errors.is_empty() {
        println!("  Errors:");
        for error in &result.errors {
            println!("    - {}", error);
        }
    }
}

use crate::error::{InstallerError, InstallerResult};
use crate::models::InstallerConfig;
use camino::{Utf8Path, Utf8PathBuf};
use config::{Config, Environment, File, FileFormat};
use std::fs;

/// Sections that must be present in every configuration document
pub const REQUIRED_SECTIONS: [&str; 2] = ["installation", "logging"];

/// Prefix for environment overrides (`ROS2_INSTALLER__INSTALLATION__PACKAGE_SET=base`)
pub const ENV_PREFIX: &str = "ROS2_INSTALLER";

/// Default document written when no configuration file exists.
///
/// Must deserialize to `InstallerConfig::default()`.
pub const DEFAULT_CONFIG_YAML: &str = r#"# ROS 2 installer configuration
#
# `installation` and `logging` are required. Other sections fall back to the
# values shown here when omitted. Unknown keys are ignored.

installation:
  # One of: kilted, jazzy, iron, humble, rolling
  ros_distro: kilted
  # One of: minimal, base, desktop, desktop-full
  package_set: desktop-full
  # Remove ROS packages from earlier distributions before installing
  uninstall_existing: true
  # Worker pool size for parallel installs
  parallel_jobs: 4
  # Attempts per command before the step fails
  retry_attempts: 3
  # Per-command timeout in seconds
  timeout_seconds: 300

system:
  update_system: true
  install_dependencies: true
  # Copy shell profiles before editing them
  backup_configs: true
  # Warn when the Ubuntu release differs from validation.required_ubuntu_version
  verify_compatibility: true
  add_repositories: true

logging:
  # DEBUG, INFO, WARNING, ERROR or CRITICAL
  level: INFO
  file: /tmp/ros2_installation.log
  console: true

validation:
  min_disk_space_gb: 4.0
  min_memory_gb: 2.0
  required_ubuntu_version: '24.04'
  supported_architectures:
    - amd64
    - arm64
    - aarch64
    - x86_64

performance:
  # Install optional extension packages concurrently (bounded by parallel_jobs)
  parallel_installs: false

security:
  # Write the mutation journal to the log at the end of the run
  audit_logging: true
  # Explicit file modes on written files (0644 config, 0755 wrapper)
  secure_permissions: true

docker:
  image_name: ros2
  container_name: ros2-dev
  workspace: ~/ros2_ws
  build_dir: ~/.ros2_docker
  wrapper_name: ros2
  daemon_timeout_seconds: 60
  poll_interval_seconds: 2
"#;

/// Loads, layers and validates the installer configuration.
///
/// Sources, lowest precedence first:
/// - the configuration file (YAML, or JSON when the extension is `.json`)
/// - `ROS2_INSTALLER__*` environment variables
#[derive(Debug, Clone)]
pub struct ConfigManager {
    config_path: Utf8PathBuf,
    use_environment: bool,
}

impl ConfigManager {
    /// Create a manager for the given configuration file path.
    pub fn new<P: AsRef<Utf8Path>>(config_path: P) -> Self {
        Self {
            config_path: config_path.as_ref().to_path_buf(),
            use_environment: true,
        }
    }

    /// Skip environment overrides (tests, `--show-config` of the raw file)
    pub fn without_environment(mut self) -> Self {
        self.use_environment = false;
        self
    }

    pub fn config_path(&self) -> &Utf8Path {
        &self.config_path
    }

    /// Load the configuration, generating the documented default if the file is absent.
    ///
    /// Fails with [`InstallerError::Configuration`] when the document is
    /// malformed, lacks a required section, or carries an out-of-range value.
    /// A failed load never writes to the configuration file.
    pub fn load(&self) -> InstallerResult<InstallerConfig> {
        if !self.config_path.exists() {
            tracing::warn!(
                "Config file not found at {}, writing defaults",
                self.config_path
            );
            self.write_default()?;
        }

        // Sections must come from the file itself, not from env overrides
        let file_settings = self.build_sources(false)?;
        for section in REQUIRED_SECTIONS {
            if file_settings.get_table(section).is_err() {
                return Err(InstallerError::Configuration(format!(
                    "Missing required section: {}",
                    section
                )));
            }
        }

        let settings = if self.use_environment {
            self.build_sources(true)?
        } else {
            file_settings
        };

        let config: InstallerConfig = settings.try_deserialize().map_err(|e| {
            InstallerError::Configuration(format!(
                "Failed to parse configuration {}: {}",
                self.config_path, e
            ))
        })?;

        validate_limits(&config)?;

        tracing::info!("Loaded configuration from {}", self.config_path);
        Ok(config)
    }

    /// Serialize a configuration as YAML (used by `--show-config`).
    pub fn render(config: &InstallerConfig) -> InstallerResult<String> {
        serde_yaml_ng::to_string(config).map_err(|e| {
            InstallerError::Configuration(format!("Failed to serialize configuration: {}", e))
        })
    }

    fn build_sources(&self, with_environment: bool) -> InstallerResult<Config> {
        let mut builder = Config::builder().add_source(
            File::from(self.config_path.as_std_path()).format(self.file_format()),
        );

        if with_environment {
            builder = builder.add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            );
        }

        builder.build().map_err(|e| {
            InstallerError::Configuration(format!(
                "Failed to load configuration {}: {}",
                self.config_path, e
            ))
        })
    }

    fn file_format(&self) -> FileFormat {
        match self.config_path.extension() {
            Some("json") => FileFormat::Json,
            _ => FileFormat::Yaml,
        }
    }

    fn write_default(&self) -> InstallerResult<()> {
        if let Some(parent) = self.config_path.parent() {
            if !parent.as_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).map_err(|e| {
                    InstallerError::Configuration(format!(
                        "Failed to create config directory {}: {}",
                        parent, e
                    ))
                })?;
            }
        }

        fs::write(&self.config_path, DEFAULT_CONFIG_YAML).map_err(|e| {
            InstallerError::Configuration(format!(
                "Failed to write default config {}: {}",
                self.config_path, e
            ))
        })?;

        tracing::info!("Wrote default configuration to {}", self.config_path);
        Ok(())
    }
}

/// Range checks that serde cannot express. Also re-run after CLI overrides.
pub fn validate_limits(config: &InstallerConfig) -> InstallerResult<()> {
    let installation = &config.installation;

    if installation.retry_attempts == 0 {
        return Err(InstallerError::Configuration(
            "installation.retry_attempts must be at least 1".to_string(),
        ));
    }
    if installation.timeout_seconds == 0 {
        return Err(InstallerError::Configuration(
            "installation.timeout_seconds must be at least 1".to_string(),
        ));
    }
    if installation.parallel_jobs == 0 {
        return Err(InstallerError::Configuration(
            "installation.parallel_jobs must be at least 1".to_string(),
        ));
    }
    if config.docker.poll_interval_seconds == 0 {
        return Err(InstallerError::Configuration(
            "docker.poll_interval_seconds must be at least 1".to_string(),
        ));
    }
    if config.validation.supported_architectures.is_empty() {
        return Err(InstallerError::Configuration(
            "validation.supported_architectures must not be empty".to_string(),
        ));
    }

    Ok(())
}

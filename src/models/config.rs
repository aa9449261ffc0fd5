use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Supported ROS 2 distributions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RosDistro {
    Kilted,
    Jazzy,
    Iron,
    Humble,
    Rolling,
}

impl RosDistro {
    pub const ALL: [RosDistro; 5] = [
        RosDistro::Kilted,
        RosDistro::Jazzy,
        RosDistro::Iron,
        RosDistro::Humble,
        RosDistro::Rolling,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            RosDistro::Kilted => "kilted",
            RosDistro::Jazzy => "jazzy",
            RosDistro::Iron => "iron",
            RosDistro::Humble => "humble",
            RosDistro::Rolling => "rolling",
        }
    }

    /// Capitalized name used in human-facing banners ("Kilted")
    pub fn title(self) -> String {
        let name = self.as_str();
        let mut chars = name.chars();
        match chars.next() {
            Some(first) => first.to_uppercase().chain(chars).collect(),
            None => String::new(),
        }
    }
}

impl fmt::Display for RosDistro {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RosDistro {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.to_ascii_lowercase();
        RosDistro::ALL
            .into_iter()
            .find(|distro| distro.as_str() == wanted)
            .ok_or_else(|| {
                let names: Vec<_> = RosDistro::ALL.iter().map(|d| d.as_str()).collect();
                format!("unknown ROS2 distribution '{}' (expected one of: {})", s, names.join(", "))
            })
    }
}

/// Package-set tier: a named bundle size mapping to a fixed package list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PackageSet {
    Minimal,
    Base,
    Desktop,
    DesktopFull,
}

impl PackageSet {
    pub fn as_str(self) -> &'static str {
        match self {
            PackageSet::Minimal => "minimal",
            PackageSet::Base => "base",
            PackageSet::Desktop => "desktop",
            PackageSet::DesktopFull => "desktop-full",
        }
    }

    /// The top two tiers also pull the optional extension packages
    pub fn includes_extensions(self) -> bool {
        matches!(self, PackageSet::Desktop | PackageSet::DesktopFull)
    }
}

impl fmt::Display for PackageSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PackageSet {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "minimal" => Ok(PackageSet::Minimal),
            "base" => Ok(PackageSet::Base),
            "desktop" => Ok(PackageSet::Desktop),
            "desktop-full" => Ok(PackageSet::DesktopFull),
            _ => Err(format!(
                "unknown package set '{}' (expected one of: minimal, base, desktop, desktop-full)",
                s
            )),
        }
    }
}

/// Log levels accepted in the `logging.level` key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Debug,
    Info,
    #[serde(alias = "WARN")]
    Warning,
    Error,
    Critical,
}

impl LogLevel {
    /// Directive understood by `tracing_subscriber::EnvFilter`
    pub fn as_filter(self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warning => "warn",
            LogLevel::Error | LogLevel::Critical => "error",
        }
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "DEBUG" => Ok(LogLevel::Debug),
            "INFO" => Ok(LogLevel::Info),
            "WARNING" | "WARN" => Ok(LogLevel::Warning),
            "ERROR" => Ok(LogLevel::Error),
            "CRITICAL" => Ok(LogLevel::Critical),
            _ => Err(format!("unknown log level '{}'", s)),
        }
    }
}

/// Complete, typed installer configuration.
///
/// `installation` and `logging` are required sections; every other section
/// falls back to its defaults when absent. Unknown keys are ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstallerConfig {
    pub installation: InstallationSettings,

    #[serde(default)]
    pub system: SystemSettings,

    pub logging: LoggingSettings,

    #[serde(default)]
    pub validation: ValidationSettings,

    #[serde(default)]
    pub performance: PerformanceSettings,

    #[serde(default)]
    pub security: SecuritySettings,

    #[serde(default)]
    pub docker: DockerSettings,
}

impl Default for InstallerConfig {
    fn default() -> Self {
        Self {
            installation: InstallationSettings::default(),
            system: SystemSettings::default(),
            logging: LoggingSettings::default(),
            validation: ValidationSettings::default(),
            performance: PerformanceSettings::default(),
            security: SecuritySettings::default(),
            docker: DockerSettings::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstallationSettings {
    #[serde(default = "default_distro")]
    pub ros_distro: RosDistro,

    #[serde(default = "default_package_set")]
    pub package_set: PackageSet,

    #[serde(default = "default_true")]
    pub uninstall_existing: bool,

    #[serde(default = "default_parallel_jobs")]
    pub parallel_jobs: usize,

    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

impl Default for InstallationSettings {
    fn default() -> Self {
        Self {
            ros_distro: default_distro(),
            package_set: default_package_set(),
            uninstall_existing: true,
            parallel_jobs: default_parallel_jobs(),
            retry_attempts: default_retry_attempts(),
            timeout_seconds: default_timeout_seconds(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemSettings {
    #[serde(default = "default_true")]
    pub update_system: bool,

    #[serde(default = "default_true")]
    pub install_dependencies: bool,

    #[serde(default = "default_true")]
    pub backup_configs: bool,

    #[serde(default = "default_true")]
    pub verify_compatibility: bool,

    #[serde(default = "default_true")]
    pub add_repositories: bool,
}

impl Default for SystemSettings {
    fn default() -> Self {
        Self {
            update_system: true,
            install_dependencies: true,
            backup_configs: true,
            verify_compatibility: true,
            add_repositories: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingSettings {
    #[serde(default = "default_log_level")]
    pub level: LogLevel,

    #[serde(default = "default_log_file")]
    pub file: Utf8PathBuf,

    #[serde(default = "default_true")]
    pub console: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: default_log_file(),
            console: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationSettings {
    #[serde(default = "default_min_disk")]
    pub min_disk_space_gb: f64,

    #[serde(default = "default_min_memory")]
    pub min_memory_gb: f64,

    #[serde(default = "default_required_version")]
    pub required_ubuntu_version: String,

    #[serde(default = "default_architectures")]
    pub supported_architectures: Vec<String>,
}

impl Default for ValidationSettings {
    fn default() -> Self {
        Self {
            min_disk_space_gb: default_min_disk(),
            min_memory_gb: default_min_memory(),
            required_ubuntu_version: default_required_version(),
            supported_architectures: default_architectures(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSettings {
    /// Install independent optional packages across a bounded worker pool
    #[serde(default)]
    pub parallel_installs: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecuritySettings {
    /// Dump the mutation journal to the log when the run finishes
    #[serde(default = "default_true")]
    pub audit_logging: bool,

    /// Set explicit modes on files the installer writes
    #[serde(default = "default_true")]
    pub secure_permissions: bool,
}

impl Default for SecuritySettings {
    fn default() -> Self {
        Self {
            audit_logging: true,
            secure_permissions: true,
        }
    }
}

/// Container-mode parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DockerSettings {
    #[serde(default = "default_image_name")]
    pub image_name: String,

    #[serde(default = "default_container_name")]
    pub container_name: String,

    /// Host directory bound into the container at /workspace (`~` expands to home)
    #[serde(default = "default_workspace")]
    pub workspace: String,

    /// Where the build manifest is synthesized (`~` expands to home)
    #[serde(default = "default_build_dir")]
    pub build_dir: String,

    #[serde(default = "default_wrapper_name")]
    pub wrapper_name: String,

    #[serde(default = "default_daemon_timeout")]
    pub daemon_timeout_seconds: u64,

    #[serde(default = "default_poll_interval")]
    pub poll_interval_seconds: u64,
}

impl Default for DockerSettings {
    fn default() -> Self {
        Self {
            image_name: default_image_name(),
            container_name: default_container_name(),
            workspace: default_workspace(),
            build_dir: default_build_dir(),
            wrapper_name: default_wrapper_name(),
            daemon_timeout_seconds: default_daemon_timeout(),
            poll_interval_seconds: default_poll_interval(),
        }
    }
}

impl DockerSettings {
    /// Deterministic image tag derived from the distribution ("ros2:kilted")
    pub fn image_tag(&self, distro: RosDistro) -> String {
        format!("{}:{}", self.image_name, distro)
    }
}

fn default_true() -> bool {
    true
}

fn default_distro() -> RosDistro {
    RosDistro::Kilted
}

fn default_package_set() -> PackageSet {
    PackageSet::DesktopFull
}

fn default_parallel_jobs() -> usize {
    4
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_timeout_seconds() -> u64 {
    300
}

fn default_log_level() -> LogLevel {
    LogLevel::Info
}

fn default_log_file() -> Utf8PathBuf {
    Utf8PathBuf::from("/tmp/ros2_installation.log")
}

fn default_min_disk() -> f64 {
    4.0
}

fn default_min_memory() -> f64 {
    2.0
}

fn default_required_version() -> String {
    "24.04".to_string()
}

fn default_architectures() -> Vec<String> {
    ["amd64", "arm64", "aarch64", "x86_64"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_image_name() -> String {
    "ros2".to_string()
}

fn default_container_name() -> String {
    "ros2-dev".to_string()
}

fn default_workspace() -> String {
    "~/ros2_ws".to_string()
}

fn default_build_dir() -> String {
    "~/.ros2_docker".to_string()
}

fn default_wrapper_name() -> String {
    "ros2".to_string()
}

fn default_daemon_timeout() -> u64 {
    60
}

fn default_poll_interval() -> u64 {
    2
}

//! Data models for the installer.
//!
//! - [`InstallerConfig`]: typed configuration loaded by [`ConfigManager`](crate::config::ConfigManager)
//! - [`SystemSnapshot`]: host facts captured once per run
//! - [`HostLayout`]: every absolute path a pipeline writes to or checks
//! - [`InstallResult`]: the single, immutable outcome of a run
//!
//! None of these types perform I/O.

pub mod config;
pub mod result;
pub mod system;

pub use config::{
    DockerSettings, InstallationSettings, InstallerConfig, LogLevel, LoggingSettings, PackageSet,
    PerformanceSettings, RosDistro, SecuritySettings, SystemSettings, ValidationSettings,
};
pub use result::{InstallResult, RunId};
pub use system::{HostKind, HostLayout, PlatformFamily, Privilege, SystemSnapshot};

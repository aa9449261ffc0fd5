// ros2-installer - ROS 2 installation orchestrator
//
// This is the library crate containing the installer core.
// The binary crate (main.rs) provides the command-line entry point.

pub mod config;
pub mod error;
pub mod journal;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod orchestrator;
pub mod services;

// Re-export commonly used types for convenience
pub use config::ConfigManager;
pub use error::{InstallerError, InstallerResult, StepPolicy};
pub use journal::{Journal, JournalState};
pub use models::{HostLayout, InstallResult, InstallerConfig, RunId, SystemSnapshot};
pub use orchestrator::{InstallPlan, Orchestrator, interruptible};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");

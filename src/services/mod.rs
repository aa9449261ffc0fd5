//! Services module - the installation machinery.
//!
//! Everything here is independent of the CLI. Each service takes its inputs
//! explicitly (configuration, snapshot, journal, executor) so it can be driven
//! by a simulated [`CommandRunner`] in tests.
//!
//! # Components
//!
//! - [`CommandExecutor`]: runs [`CommandSpec`]s under a timeout with retry,
//!   exponential backoff and package-manager cleanup between attempts.
//! - [`system_info`]: captures the run's [`SystemSnapshot`](crate::models::SystemSnapshot).
//! - [`validator`]: pure precondition checks; mints the [`Elevated`] capability.
//! - [`strategy`]: picks [`Strategy::Native`] or [`Strategy::Containerized`].
//! - [`NativePipeline`]: the seven host-mutating steps, run under a [`RollbackGuard`].
//! - [`ContainerPipeline`]: the six container steps; no rollback.
//! - [`packages`] and [`profile`]: static package lists and idempotent
//!   shell-profile edits shared by both pipelines.
//!
//! # Usage Example
//!
//! ```ignore
//! use ros2_installer::services::{CommandExecutor, SystemRunner};
//!
//! let executor = CommandExecutor::new(
//!     SystemRunner::new(snapshot.privilege),
//!     Duration::from_secs(300),
//!     3,
//! );
//! let output = executor
//!     .execute(&CommandSpec::new("apt-get").arg("update").elevated(), "Updating package index")
//!     .await?;
//! ```

pub mod container;
pub mod executor;
pub mod native;
pub mod packages;
pub mod profile;
pub mod rollback;
pub mod strategy;
pub mod system_info;
pub mod validator;

pub use container::ContainerPipeline;
pub use executor::{
    CommandError, CommandExecutor, CommandOutput, CommandRunner, CommandSpec, SystemRunner,
};
pub use native::NativePipeline;
pub use packages::PackageCatalog;
pub use rollback::{RollbackFailure, RollbackGuard, RollbackReport};
pub use strategy::Strategy;
pub use validator::{Elevated, ValidationReport};

//! Error taxonomy for an installation run.
//!
//! Configuration and validation errors are raised before any host mutation.
//! Installation errors are raised by a pipeline step after its retries are
//! exhausted; in native mode they trigger the rollback guard.

use crate::services::executor::CommandError;
use thiserror::Error;

/// Fatal errors surfaced by the orchestrator
#[derive(Error, Debug)]
pub enum InstallerError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Installation error: {0}")]
    Installation(String),

    #[error("{step}: {source}")]
    Command {
        step: String,
        #[source]
        source: CommandError,
    },

    #[error("Installation cancelled by user")]
    Cancelled,
}

impl InstallerError {
    /// Wrap a terminal command failure with the pipeline step it belongs to
    pub fn command(step: impl Into<String>, source: CommandError) -> Self {
        Self::Command {
            step: step.into(),
            source,
        }
    }

    /// Shorthand for an installation failure built from a displayable cause
    pub fn installation(message: impl std::fmt::Display) -> Self {
        Self::Installation(message.to_string())
    }

    /// True for errors raised before anything on the host was touched
    pub fn is_pre_mutation(&self) -> bool {
        matches!(
            self,
            Self::Configuration(_) | Self::Validation(_) | Self::Cancelled
        )
    }
}

pub type InstallerResult<T> = std::result::Result<T, InstallerError>;

/// How a step's failure affects the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepPolicy {
    /// Failure aborts the pipeline
    Required,
    /// Failure is logged and recorded as a run warning
    BestEffort,
}

impl StepPolicy {
    /// Settle a step outcome: `Ok(None)` means a best-effort step failed and
    /// its error was moved into `warnings`.
    pub fn apply<T>(
        self,
        outcome: InstallerResult<T>,
        warnings: &mut Vec<String>,
    ) -> InstallerResult<Option<T>> {
        match (self, outcome) {
            (_, Ok(value)) => Ok(Some(value)),
            (StepPolicy::Required, Err(e)) => Err(e),
            (StepPolicy::BestEffort, Err(e)) => {
                tracing::warn!("{}", e);
                warnings.push(e.to_string());
                Ok(None)
            }
        }
    }
}

use crate::models::{LoggingSettings, RunId};
use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use std::fs::{self, File, OpenOptions};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Open the log file, falling back when the configured location is unwritable.
///
/// Order: `primary`, then `$HOME/ros2_installation_<run_id>.log`, then the
/// same name in the system temp directory.
pub fn open_log_file(
    primary: &Utf8Path,
    run_id: &RunId,
    home: Option<&Utf8Path>,
) -> Result<(File, Utf8PathBuf)> {
    let fallback_name = format!("ros2_installation_{}.log", run_id);
    let temp_dir = Utf8PathBuf::try_from(std::env::temp_dir())
        .context("System temp directory is not valid UTF-8")?;

    let mut candidates = vec![primary.to_path_buf()];
    if let Some(home) = home {
        candidates.push(home.join(&fallback_name));
    }
    candidates.push(temp_dir.join(&fallback_name));

    let mut last_error = None;
    for candidate in candidates {
        match append_to(&candidate) {
            Ok(file) => return Ok((file, candidate)),
            Err(e) => {
                eprintln!("Cannot write log file {}: {:#}", candidate, e);
                last_error = Some(e);
            }
        }
    }

    Err(last_error.unwrap_or_else(|| anyhow::anyhow!("No log file location available")))
}

fn append_to(path: &Utf8Path) -> Result<File> {
    if let Some(parent) = path.parent() {
        if !parent.as_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create log directory: {}", parent))?;
        }
    }

    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open log file: {}", path))
}

/// Setup logging to a file and, if configured, the console.
///
/// The file layer writes through a non-blocking appender. Lines are tagged
/// with the run id by the orchestrator's `install` span, not by a global.
///
/// # Returns
/// The appender guard, which must be held for the duration of the program,
/// and the path actually used for the log file
pub fn setup_logging(settings: &LoggingSettings, run_id: &RunId) -> Result<(WorkerGuard, Utf8PathBuf)> {
    let home = std::env::var("HOME").ok().map(Utf8PathBuf::from);
    let (file, log_path) = open_log_file(&settings.file, run_id, home.as_deref())?;
    let (non_blocking, guard) = tracing_appender::non_blocking(file);

    let env_filter = EnvFilter::new(settings.level.as_filter());

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    let console_layer = settings.console.then(|| {
        tracing_subscriber::fmt::layer()
            .with_ansi(true)
            .with_target(false)
    });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(console_layer)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    tracing::info!(
        "Logging initialized: file={}, level={:?}, console={}",
        log_path,
        settings.level,
        settings.console
    );

    Ok((guard, log_path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn utf8_dir(temp_dir: &TempDir) -> Utf8PathBuf {
        Utf8PathBuf::try_from(temp_dir.path().to_path_buf()).unwrap()
    }

    #[test]
    fn test_primary_log_file_used_when_writable() {
        let temp_dir = TempDir::new().unwrap();
        let primary = utf8_dir(&temp_dir).join("logs/installer.log");

        let (_file, path) = open_log_file(&primary, &RunId::from("abcd1234"), None).unwrap();

        assert_eq!(path, primary);
        assert!(primary.exists());
    }

    #[test]
    fn test_falls_back_to_home() {
        let temp_dir = TempDir::new().unwrap();
        let dir = utf8_dir(&temp_dir);

        // A regular file cannot act as a parent directory
        let blocker = dir.join("blocker");
        fs::write(&blocker, "").unwrap();
        let primary = blocker.join("installer.log");

        let home = dir.join("home");
        fs::create_dir_all(&home).unwrap();

        let (_file, path) = open_log_file(&primary, &RunId::from("abcd1234"), Some(&home)).unwrap();
        assert_eq!(path, home.join("ros2_installation_abcd1234.log"));
    }
}

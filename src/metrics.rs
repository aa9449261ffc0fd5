// Run metrics
//
// Lightweight counters for the command executor and pipelines

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Install-run metrics
///
/// Uses atomic operations so concurrent install workers can record without
/// locks. Logged once as a summary when the run finishes.
#[derive(Debug)]
pub struct InstallMetrics {
    /// Commands that succeeded (including after retries)
    pub commands_succeeded: AtomicU64,

    /// Commands that failed terminally
    pub commands_failed: AtomicU64,

    /// Every spawn attempt, first tries and retries alike
    pub attempts: AtomicU64,

    /// Attempts beyond the first
    pub retries: AtomicU64,

    /// Attempts that hit the per-command timeout
    pub timeouts: AtomicU64,

    /// Package-manager cleanups run between retries
    pub cleanups: AtomicU64,

    /// Time spent inside package install commands, in milliseconds
    pub install_time_ms: AtomicU64,

    /// Time spent verifying the installation, in milliseconds
    pub verification_time_ms: AtomicU64,

    start_time: Instant,
}

impl InstallMetrics {
    pub fn new() -> Self {
        Self {
            commands_succeeded: AtomicU64::new(0),
            commands_failed: AtomicU64::new(0),
            attempts: AtomicU64::new(0),
            retries: AtomicU64::new(0),
            timeouts: AtomicU64::new(0),
            cleanups: AtomicU64::new(0),
            install_time_ms: AtomicU64::new(0),
            verification_time_ms: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    /// Record one spawn attempt (0-indexed)
    pub fn record_attempt(&self, attempt: u32) {
        self.attempts.fetch_add(1, Ordering::Relaxed);
        if attempt > 0 {
            self.retries.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_success(&self) {
        self.commands_succeeded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.commands_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_timeout(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cleanup(&self) {
        self.cleanups.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_install_time(&self, duration: Duration) {
        self.install_time_ms
            .fetch_add(duration.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn record_verification_time(&self, duration: Duration) {
        self.verification_time_ms
            .fetch_add(duration.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Log metrics summary
    pub fn log_summary(&self) {
        tracing::info!("=== Installation Metrics ===");
        tracing::info!("Elapsed: {:.2}s", self.uptime().as_secs_f64());
        tracing::info!(
            "Commands: {} succeeded, {} failed ({} attempts, {} retries, {} timeouts, {} cleanups)",
            self.commands_succeeded.load(Ordering::Relaxed),
            self.commands_failed.load(Ordering::Relaxed),
            self.attempts.load(Ordering::Relaxed),
            self.retries.load(Ordering::Relaxed),
            self.timeouts.load(Ordering::Relaxed),
            self.cleanups.load(Ordering::Relaxed)
        );
        tracing::info!(
            "Install time: {:.2}s, verification time: {:.2}s",
            self.install_time_ms.load(Ordering::Relaxed) as f64 / 1000.0,
            self.verification_time_ms.load(Ordering::Relaxed) as f64 / 1000.0
        );
    }
}

impl Default for InstallMetrics {
    fn default() -> Self {
        Self::new()
    }
}

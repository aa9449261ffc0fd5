// Mutation journal
//
// Append-only, run-scoped record of every host change. Shared between the
// orchestrator, parallel install workers and the rollback guard.

use camino::{Utf8Path, Utf8PathBuf};
use indexmap::IndexSet;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// The four append-only sequences recorded during a run
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct JournalState {
    pub packages_installed: Vec<String>,
    pub repositories_added: Vec<Utf8PathBuf>,
    pub files_modified: Vec<Utf8PathBuf>,
    pub backup_files: Vec<Utf8PathBuf>,
}

impl JournalState {
    /// Packages recorded here but not in `before`, in install order, deduplicated
    pub fn packages_since(&self, before: &JournalState) -> Vec<String> {
        let previous: IndexSet<&str> = before
            .packages_installed
            .iter()
            .map(String::as_str)
            .collect();

        let fresh: IndexSet<&str> = self
            .packages_installed
            .iter()
            .map(String::as_str)
            .filter(|pkg| !previous.contains(pkg))
            .collect();

        fresh.into_iter().map(str::to_string).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.packages_installed.is_empty()
            && self.repositories_added.is_empty()
            && self.files_modified.is_empty()
            && self.backup_files.is_empty()
    }
}

/// Thread-safe handle to the run's journal.
///
/// Cloning the handle shares the underlying record. Appends are synchronized
/// so parallel install workers can record packages concurrently. There is no
/// removal operation; rollback works from a before/after diff.
#[derive(Clone, Debug, Default)]
pub struct Journal {
    state: Arc<RwLock<JournalState>>,
}

impl Journal {
    /// Create an empty journal
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a copy of the current record
    pub fn snapshot(&self) -> JournalState {
        self.read_guard().clone()
    }

    /// Execute a function with read access to the record
    ///
    /// # Example
    /// ```ignore
    /// let count = journal.read(|state| state.packages_installed.len());
    /// ```
    pub fn read<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&JournalState) -> R,
    {
        f(&self.read_guard())
    }

    pub fn record_package(&self, package: impl Into<String>) {
        let package = package.into();
        tracing::debug!("journal: package {}", package);
        self.write_guard().packages_installed.push(package);
    }

    pub fn record_packages<I, S>(&self, packages: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut state = self.write_guard();
        for package in packages {
            state.packages_installed.push(package.into());
        }
    }

    pub fn record_repository(&self, path: impl AsRef<Utf8Path>) {
        let path = path.as_ref().to_path_buf();
        tracing::debug!("journal: repository {}", path);
        self.write_guard().repositories_added.push(path);
    }

    pub fn record_file_modified(&self, path: impl AsRef<Utf8Path>) {
        let path = path.as_ref().to_path_buf();
        tracing::debug!("journal: modified {}", path);
        self.write_guard().files_modified.push(path);
    }

    pub fn record_backup(&self, path: impl AsRef<Utf8Path>) {
        let path = path.as_ref().to_path_buf();
        tracing::debug!("journal: backup {}", path);
        self.write_guard().backup_files.push(path);
    }

    pub fn package_count(&self) -> usize {
        self.read(|state| state.packages_installed.len())
    }

    /// Log the full record (security.audit_logging)
    pub fn log_audit_trail(&self) {
        self.read(|state| {
            tracing::info!(
                "Journal: {} packages, {} repositories, {} files modified, {} backups",
                state.packages_installed.len(),
                state.repositories_added.len(),
                state.files_modified.len(),
                state.backup_files.len()
            );
            for package in &state.packages_installed {
                tracing::info!("  installed {}", package);
            }
            for repo in &state.repositories_added {
                tracing::info!("  repository {}", repo);
            }
            for file in &state.files_modified {
                tracing::info!("  modified {}", file);
            }
            for backup in &state.backup_files {
                tracing::info!("  backup {}", backup);
            }
        });
    }

    // A panicking writer cannot leave a half-pushed Vec behind, so a poisoned
    // lock still guards a consistent record.
    fn read_guard(&self) -> RwLockReadGuard<'_, JournalState> {
        self.state.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_guard(&self) -> RwLockWriteGuard<'_, JournalState> {
        self.state.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

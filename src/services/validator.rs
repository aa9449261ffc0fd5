//! Host precondition checks.
//!
//! [`validate`] is a pure function of the snapshot and configuration. It never
//! touches the host; everything it needs was captured in the snapshot.

use crate::models::{InstallerConfig, PlatformFamily, SystemSnapshot};

/// Outcome of validation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidationReport {
    /// Hard failures; the run may proceed only when this is empty
    pub issues: Vec<String>,

    /// Mismatches worth reporting that do not block the run
    pub warnings: Vec<String>,

    /// Informational findings
    pub notes: Vec<String>,
}

impl ValidationReport {
    pub fn is_ok(&self) -> bool {
        self.issues.is_empty()
    }

    /// Log every finding at its level
    pub fn log(&self) {
        for note in &self.notes {
            tracing::info!("{}", note);
        }
        for warning in &self.warnings {
            tracing::warn!("{}", warning);
        }
        for issue in &self.issues {
            tracing::error!("{}", issue);
        }
        if self.is_ok() {
            tracing::info!("System validation passed");
        }
    }
}

/// Capability required by every operation that mutates the host package
/// database. Only [`elevation`] can mint one.
#[derive(Debug, Clone, Copy)]
pub struct Elevated {
    _private: (),
}

/// Issue the elevation capability when the process runs as root
pub fn elevation(snapshot: &SystemSnapshot) -> Option<Elevated> {
    snapshot.is_root().then_some(Elevated { _private: () })
}

/// Check the snapshot against the configured minimums.
///
/// Each check appends independently, so one report lists every problem.
pub fn validate(snapshot: &SystemSnapshot, config: &InstallerConfig) -> ValidationReport {
    let mut report = ValidationReport::default();
    let limits = &config.validation;

    if snapshot.disk_space_gb < limits.min_disk_space_gb {
        report.issues.push(format!(
            "Insufficient disk space: {:.1}GB < {}GB",
            snapshot.disk_space_gb, limits.min_disk_space_gb
        ));
    }

    if snapshot.memory_gb < limits.min_memory_gb {
        report.issues.push(format!(
            "Insufficient memory: {:.1}GB < {}GB",
            snapshot.memory_gb, limits.min_memory_gb
        ));
    }

    if !limits
        .supported_architectures
        .iter()
        .any(|arch| arch == &snapshot.architecture)
    {
        report.issues.push(format!(
            "Unsupported architecture: {}",
            snapshot.architecture
        ));
    }

    match snapshot.platform_family() {
        PlatformFamily::NativeCapable => {
            if !snapshot.is_root() {
                report
                    .issues
                    .push("Installer must be run with root privileges (sudo)".to_string());
            }

            if config.system.verify_compatibility
                && !snapshot.os_version.contains(&limits.required_ubuntu_version)
            {
                report.warnings.push(format!(
                    "Ubuntu version mismatch: {} != {}",
                    snapshot.os_version, limits.required_ubuntu_version
                ));
            }
        }
        PlatformFamily::ContainerRequired => {
            report.notes.push(format!(
                "Host {} is not supported natively; using containerized install",
                snapshot.host
            ));
            if snapshot.container_runtime.is_none() {
                report
                    .notes
                    .push("Container runtime not found; it will be installed".to_string());
            }
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{HostKind, Privilege};
    use camino::Utf8PathBuf;

    fn compliant_ubuntu() -> SystemSnapshot {
        SystemSnapshot {
            os_name: "Ubuntu".to_string(),
            os_version: "24.04".to_string(),
            architecture: "x86_64".to_string(),
            memory_gb: 16.0,
            disk_space_gb: 100.0,
            cpu_cores: 8,
            host: HostKind::Linux("ubuntu".to_string()),
            privilege: Privilege::Root,
            ..SystemSnapshot::unknown()
        }
    }

    #[test]
    fn test_compliant_host_passes() {
        let report = validate(&compliant_ubuntu(), &InstallerConfig::default());
        assert!(report.is_ok(), "{:?}", report.issues);
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn test_every_failed_check_is_reported() {
        let mut snapshot = compliant_ubuntu();
        snapshot.disk_space_gb = 1.0;
        snapshot.memory_gb = 0.5;
        snapshot.architecture = "riscv64".to_string();
        snapshot.privilege = Privilege::Unprivileged;

        let report = validate(&snapshot, &InstallerConfig::default());
        assert_eq!(report.issues.len(), 4);
        assert!(report.issues[0].starts_with("Insufficient disk space"));
        assert!(report.issues[1].starts_with("Insufficient memory"));
        assert!(report.issues[2].contains("riscv64"));
    }

    #[test]
    fn test_version_mismatch_is_warning_only() {
        let mut snapshot = compliant_ubuntu();
        snapshot.os_version = "22.04".to_string();

        let report = validate(&snapshot, &InstallerConfig::default());
        assert!(report.is_ok());
        assert_eq!(report.warnings.len(), 1);

        let mut config = InstallerConfig::default();
        config.system.verify_compatibility = false;
        assert!(validate(&snapshot, &config).warnings.is_empty());
    }

    #[test]
    fn test_container_host_without_runtime_is_informational() {
        let mut snapshot = compliant_ubuntu();
        snapshot.host = HostKind::MacOs;
        snapshot.privilege = Privilege::Unprivileged;
        snapshot.architecture = "aarch64".to_string();

        let report = validate(&snapshot, &InstallerConfig::default());
        assert!(report.is_ok());
        assert!(report.notes.iter().any(|n| n.contains("will be installed")));

        snapshot.container_runtime = Some(Utf8PathBuf::from("/usr/local/bin/docker"));
        let report = validate(&snapshot, &InstallerConfig::default());
        assert!(!report.notes.iter().any(|n| n.contains("will be installed")));
    }

    #[test]
    fn test_elevation_requires_root() {
        let mut snapshot = compliant_ubuntu();
        assert!(elevation(&snapshot).is_some());
        snapshot.privilege = Privilege::Unprivileged;
        assert!(elevation(&snapshot).is_none());
    }
}

//! Host inspection: builds the run's [`SystemSnapshot`].
//!
//! The snapshot is captured once, after configuration load, and never
//! refreshed during the run.

use crate::models::{HostKind, Privilege, SystemSnapshot};
use camino::{Utf8Path, Utf8PathBuf};
use std::env;
use std::path::Path;
use sysinfo::{Disks, System};

const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Container runtime binary looked up on PATH
pub const CONTAINER_RUNTIME: &str = "docker";

/// Gather facts about the current host.
///
/// Never fails: if the memory or disk figures cannot be read they are left
/// at zero, which the validator then rejects.
pub fn gather() -> SystemSnapshot {
    let mut sys = System::new();
    sys.refresh_memory();
    sys.refresh_cpu();

    let os_name = System::name().unwrap_or_else(|| "Unknown".to_string());
    let os_version = System::os_version().unwrap_or_else(|| "Unknown".to_string());
    let host = classify_host(env::consts::OS, &System::distribution_id());

    let disks = Disks::new_with_refreshed_list();
    let disk_space_gb = root_available_space(
        disks
            .list()
            .iter()
            .map(|disk| (disk.mount_point(), disk.available_space())),
    )
    .map(|bytes| bytes as f64 / BYTES_PER_GB)
    .unwrap_or_else(|| {
        tracing::warn!("Could not determine free disk space for /");
        0.0
    });

    let search_path = search_path_entries(env::var("PATH").ok().as_deref());
    let container_runtime = find_on_path(CONTAINER_RUNTIME, &search_path);

    let snapshot = SystemSnapshot {
        os_name,
        os_version,
        architecture: env::consts::ARCH.to_string(),
        memory_gb: sys.total_memory() as f64 / BYTES_PER_GB,
        disk_space_gb,
        cpu_cores: sys.cpus().len().max(1),
        host,
        privilege: current_privilege(),
        invoking_user: env::var("SUDO_USER").ok().filter(|u| !u.is_empty()),
        home_dir: env::var("HOME").ok().map(Utf8PathBuf::from),
        shell: env::var("SHELL").ok(),
        container_runtime,
        search_path,
    };

    tracing::debug!("Captured system snapshot: {:?}", snapshot);
    snapshot
}

/// Log the snapshot in the installer's summary format
pub fn log_system_info(snapshot: &SystemSnapshot) {
    tracing::info!("System Information:");
    tracing::info!("  OS: {} {}", snapshot.os_name, snapshot.os_version);
    tracing::info!("  Platform: {}", snapshot.host);
    tracing::info!("  Architecture: {}", snapshot.architecture);
    tracing::info!("  Memory: {:.1} GB", snapshot.memory_gb);
    tracing::info!("  Disk Space: {:.1} GB", snapshot.disk_space_gb);
    tracing::info!("  CPU Cores: {}", snapshot.cpu_cores);
}

fn current_privilege() -> Privilege {
    if nix::unistd::geteuid().is_root() {
        Privilege::Root
    } else {
        Privilege::Unprivileged
    }
}

/// Map the OS family and distro id reported by the host to a [`HostKind`]
pub fn classify_host(os: &str, distribution_id: &str) -> HostKind {
    match os {
        "linux" => HostKind::Linux(distribution_id.trim().to_lowercase()),
        "macos" => HostKind::MacOs,
        other => HostKind::Other(other.to_string()),
    }
}

/// Available bytes on the filesystem holding `/`: the mount point that is the
/// longest prefix of the root path
pub fn root_available_space<'a, I>(mounts: I) -> Option<u64>
where
    I: IntoIterator<Item = (&'a Path, u64)>,
{
    let root = Path::new("/");
    mounts
        .into_iter()
        .filter(|(mount, _)| root.starts_with(mount))
        .max_by_key(|(mount, _)| mount.as_os_str().len())
        .map(|(_, available)| available)
}

pub fn search_path_entries(path_var: Option<&str>) -> Vec<Utf8PathBuf> {
    path_var
        .map(|value| {
            value
                .split(':')
                .filter(|entry| !entry.is_empty())
                .map(Utf8PathBuf::from)
                .collect()
        })
        .unwrap_or_default()
}

pub fn find_on_path(binary: &str, search_path: &[Utf8PathBuf]) -> Option<Utf8PathBuf> {
    search_path
        .iter()
        .map(|dir| dir.join(binary))
        .find(|candidate| is_executable_file(candidate))
}

fn is_executable_file(path: &Utf8Path) -> bool {
    use std::os::unix::fs::PermissionsExt;

    path.metadata()
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_classify_host() {
        assert_eq!(
            classify_host("linux", "Ubuntu\n"),
            HostKind::Linux("ubuntu".to_string())
        );
        assert_eq!(classify_host("macos", ""), HostKind::MacOs);
        assert_eq!(
            classify_host("windows", ""),
            HostKind::Other("windows".to_string())
        );
    }

    #[test]
    fn test_root_available_space_picks_root_mount() {
        let mounts = vec![
            (Path::new("/boot"), 100),
            (Path::new("/"), 5_000),
            (Path::new("/home"), 9_000),
        ];
        assert_eq!(root_available_space(mounts), Some(5_000));
        assert_eq!(root_available_space(Vec::<(&Path, u64)>::new()), None);
    }

    #[test]
    fn test_search_path_entries() {
        let entries = search_path_entries(Some("/usr/local/bin::/usr/bin"));
        assert_eq!(entries, vec![Utf8PathBuf::from("/usr/local/bin"), Utf8PathBuf::from("/usr/bin")]);
        assert!(search_path_entries(None).is_empty());
    }

    #[test]
    fn test_find_on_path_requires_executable_bit() {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = TempDir::new().unwrap();
        let dir = Utf8PathBuf::try_from(temp_dir.path().to_path_buf()).unwrap();
        let binary = dir.join("docker");
        fs::write(&binary, "#!/bin/sh\n").unwrap();
        fs::set_permissions(&binary, fs::Permissions::from_mode(0o644)).unwrap();

        assert_eq!(find_on_path("docker", &[dir.clone()]), None);

        fs::set_permissions(&binary, fs::Permissions::from_mode(0o755)).unwrap();
        assert_eq!(find_on_path("docker", &[dir]), Some(binary));
    }
}

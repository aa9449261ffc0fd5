use camino::{Utf8Path, Utf8PathBuf};
use crate::models::RosDistro;
use std::fmt;

/// Whether ROS 2 can be installed directly with the host package manager
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlatformFamily {
    NativeCapable,
    ContainerRequired,
}

/// Coarse host classification used to pick install commands
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostKind {
    /// Linux, tagged with the lowercase distro id ("ubuntu", "fedora", ...)
    Linux(String),
    MacOs,
    Other(String),
}

impl fmt::Display for HostKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostKind::Linux(distro) => write!(f, "linux({})", distro),
            HostKind::MacOs => f.write_str("macos"),
            HostKind::Other(name) => write!(f, "other({})", name),
        }
    }
}

/// Effective privilege of the installer process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Privilege {
    Root,
    Unprivileged,
}

/// Point-in-time description of the host, captured once per run.
#[derive(Debug, Clone, PartialEq)]
pub struct SystemSnapshot {
    pub os_name: String,
    pub os_version: String,
    pub architecture: String,
    pub memory_gb: f64,
    pub disk_space_gb: f64,
    pub cpu_cores: usize,
    pub host: HostKind,
    pub privilege: Privilege,

    /// The non-privileged user who invoked the installer through sudo
    pub invoking_user: Option<String>,

    /// Home directory of the process owner
    pub home_dir: Option<Utf8PathBuf>,

    /// Login shell of the process owner
    pub shell: Option<String>,

    /// Path to the container runtime binary, if one is on PATH
    pub container_runtime: Option<Utf8PathBuf>,

    /// PATH entries, used to decide whether the wrapper directory needs exporting
    pub search_path: Vec<Utf8PathBuf>,
}

impl SystemSnapshot {
    /// Degraded snapshot used when host inspection fails
    pub fn unknown() -> Self {
        Self {
            os_name: "Unknown".to_string(),
            os_version: "Unknown".to_string(),
            architecture: "Unknown".to_string(),
            memory_gb: 0.0,
            disk_space_gb: 0.0,
            cpu_cores: 1,
            host: HostKind::Other("unknown".to_string()),
            privilege: Privilege::Unprivileged,
            invoking_user: None,
            home_dir: None,
            shell: None,
            container_runtime: None,
            search_path: Vec::new(),
        }
    }

    pub fn platform_family(&self) -> PlatformFamily {
        match &self.host {
            HostKind::Linux(distro) if distro == "ubuntu" => PlatformFamily::NativeCapable,
            _ => PlatformFamily::ContainerRequired,
        }
    }

    pub fn is_root(&self) -> bool {
        self.privilege == Privilege::Root
    }

    pub fn on_search_path(&self, dir: &Utf8Path) -> bool {
        self.search_path.iter().any(|entry| entry == dir)
    }
}

/// Every absolute host path the pipelines touch.
///
/// `HostLayout::system()` describes the real host; `HostLayout::rooted()`
/// re-roots everything below a prefix so tests can run against a temp dir.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostLayout {
    pub keyring_path: Utf8PathBuf,
    pub apt_sources_dir: Utf8PathBuf,
    pub ros_root: Utf8PathBuf,
    pub rosdep_default_list: Utf8PathBuf,
    pub home_root: Utf8PathBuf,
    pub root_home: Utf8PathBuf,
    pub system_bin_dir: Utf8PathBuf,
}

impl HostLayout {
    pub fn system() -> Self {
        Self::rooted(Utf8Path::new("/"))
    }

    pub fn rooted(prefix: &Utf8Path) -> Self {
        Self {
            keyring_path: prefix.join("usr/share/keyrings/ros-archive-keyring.gpg"),
            apt_sources_dir: prefix.join("etc/apt/sources.list.d"),
            ros_root: prefix.join("opt/ros"),
            rosdep_default_list: prefix.join("etc/ros/rosdep/sources.list.d/20-default.list"),
            home_root: prefix.join("home"),
            root_home: prefix.join("root"),
            system_bin_dir: prefix.join("usr/local/bin"),
        }
    }

    pub fn repository_file(&self) -> Utf8PathBuf {
        self.apt_sources_dir.join("ros2.list")
    }

    pub fn distro_root(&self, distro: RosDistro) -> Utf8PathBuf {
        self.ros_root.join(distro.as_str())
    }

    pub fn setup_script(&self, distro: RosDistro) -> Utf8PathBuf {
        self.distro_root(distro).join("setup.bash")
    }

    pub fn user_home(&self, user: &str) -> Utf8PathBuf {
        if user == "root" {
            self.root_home.clone()
        } else {
            self.home_root.join(user)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_family_from_host() {
        let mut snapshot = SystemSnapshot::unknown();
        assert_eq!(snapshot.platform_family(), PlatformFamily::ContainerRequired);

        snapshot.host = HostKind::Linux("ubuntu".to_string());
        assert_eq!(snapshot.platform_family(), PlatformFamily::NativeCapable);

        snapshot.host = HostKind::Linux("fedora".to_string());
        assert_eq!(snapshot.platform_family(), PlatformFamily::ContainerRequired);

        snapshot.host = HostKind::MacOs;
        assert_eq!(snapshot.platform_family(), PlatformFamily::ContainerRequired);
    }

    #[test]
    fn test_rooted_layout() {
        let layout = HostLayout::rooted(Utf8Path::new("/tmp/fake"));
        assert_eq!(layout.repository_file(), "/tmp/fake/etc/apt/sources.list.d/ros2.list");
        assert_eq!(layout.setup_script(RosDistro::Jazzy), "/tmp/fake/opt/ros/jazzy/setup.bash");
        assert_eq!(layout.user_home("alice"), "/tmp/fake/home/alice");
        assert_eq!(layout.user_home("root"), "/tmp/fake/root");
    }

    #[test]
    fn test_system_layout_paths() {
        let layout = HostLayout::system();
        assert_eq!(layout.keyring_path, "/usr/share/keyrings/ros-archive-keyring.gpg");
        assert_eq!(layout.system_bin_dir, "/usr/local/bin");
    }
}

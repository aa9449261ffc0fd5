use crate::models::{PackageSet, RosDistro};
use crate::services::executor::CommandSpec;
use regex::Regex;
use std::time::Duration;

/// Host tooling needed before the ROS repository can be added
pub const PREREQUISITES: [&str; 7] = [
    "software-properties-common",
    "curl",
    "wget",
    "gnupg2",
    "lsb-release",
    "apt-transport-https",
    "ca-certificates",
];

/// Developer tooling, each installed independently
pub const DEV_TOOLS: [&str; 6] = [
    "python3-rosdep",
    "python3-colcon-common-extensions",
    "python3-vcstool",
    "python3-argcomplete",
    "python3-flake8",
    "python3-pytest",
];

/// Distribution-independent packages whose absence is reported after install
const KEY_TOOL_PACKAGES: [&str; 2] = ["python3-rosdep", "python3-colcon-common-extensions"];

/// Extension package suffixes pulled by the desktop tiers
const EXTENSION_SUFFIXES: [&str; 5] = [
    "gazebo-ros-pkgs",
    "navigation2",
    "moveit",
    "slam-toolbox",
    "robot-localization",
];

/// ROS 1 and ROS 2 release tags recognized as a prior installation
const PRIOR_RELEASE_TAGS: [&str; 8] = [
    "melodic", "noetic", "foxy", "galactic", "humble", "iron", "jazzy", "kilted",
];

/// `desktop-full` pulls several gigabytes; give it at least 20 minutes
const DESKTOP_FULL_MIN_TIMEOUT: Duration = Duration::from_secs(1200);

/// Static package lists for one distribution
#[derive(Debug, Clone)]
pub struct PackageCatalog {
    distro: RosDistro,

    /// Matches installed package names from any known ROS release
    prior_install_pattern: Regex,
}

impl PackageCatalog {
    pub fn new(distro: RosDistro) -> Self {
        let pattern = format!(r"^ros-({})-", PRIOR_RELEASE_TAGS.join("|"));
        Self {
            distro,
            prior_install_pattern: Regex::new(&pattern).expect("Invalid prior install regex"),
        }
    }

    pub fn distro(&self) -> RosDistro {
        self.distro
    }

    fn ros_package(&self, suffix: &str) -> String {
        format!("ros-{}-{}", self.distro, suffix)
    }

    /// Package names for a tier
    pub fn tier_packages(&self, tier: PackageSet) -> Vec<String> {
        let suffixes: &[&str] = match tier {
            PackageSet::Minimal => &["ros-core", "ros2cli"],
            PackageSet::Base => &["ros-base", "ros2cli", "demo-nodes-cpp", "demo-nodes-py"],
            PackageSet::Desktop => &["desktop", "rviz2"],
            PackageSet::DesktopFull => &["desktop-full"],
        };
        suffixes.iter().map(|s| self.ros_package(s)).collect()
    }

    /// Best-effort extras for tiers where [`PackageSet::includes_extensions`] holds
    pub fn extension_packages(&self, tier: PackageSet) -> Vec<String> {
        if !tier.includes_extensions() {
            return Vec::new();
        }
        EXTENSION_SUFFIXES
            .iter()
            .map(|s| self.ros_package(s))
            .collect()
    }

    /// Packages checked in the package database after install
    pub fn key_packages(&self) -> Vec<String> {
        std::iter::once(self.ros_package("ros2cli"))
            .chain(KEY_TOOL_PACKAGES.iter().map(|s| s.to_string()))
            .collect()
    }

    /// Install timeout for a tier's main package command
    pub fn tier_timeout(tier: PackageSet, default: Duration) -> Duration {
        match tier {
            PackageSet::DesktopFull => default.max(DESKTOP_FULL_MIN_TIMEOUT),
            _ => default,
        }
    }

    /// Filter `dpkg-query` output (one package name per line) down to prior ROS packages
    pub fn prior_installs(&self, installed: &str) -> Vec<String> {
        installed
            .lines()
            .map(str::trim)
            .filter(|name| self.prior_install_pattern.is_match(name))
            .map(str::to_string)
            .collect()
    }
}

/// `apt-get <args>` run non-interactively as root
pub fn apt_get<I, S>(args: I) -> CommandSpec
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    CommandSpec::new("apt-get")
        .args(args)
        .env("DEBIAN_FRONTEND", "noninteractive")
        .elevated()
}

/// `apt-get install -y <packages>`
pub fn apt_install<S: AsRef<str>>(packages: &[S]) -> CommandSpec {
    apt_get(["install", "-y"]).args(packages.iter().map(|p| p.as_ref().to_string()))
}

/// `apt-get remove -y <packages>`
pub fn apt_remove<S: AsRef<str>>(packages: &[S]) -> CommandSpec {
    apt_get(["remove", "-y"]).args(packages.iter().map(|p| p.as_ref().to_string()))
}

/// Query listing every installed package name, one per line
pub fn installed_packages_query() -> CommandSpec {
    CommandSpec::new("dpkg-query").args(["-W", "-f=${Package}\\n"])
}

/// Query whether a single package is installed
pub fn package_status_query(package: &str) -> CommandSpec {
    CommandSpec::new("dpkg-query").args(["-W", "-f=${Status}", package])
}

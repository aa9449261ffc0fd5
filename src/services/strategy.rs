use crate::models::{PlatformFamily, SystemSnapshot};
use std::fmt;

/// The two mutually exclusive ways of installing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Mutate the host package database directly
    Native,
    /// Build an image, create a persistent container, install a forwarding wrapper
    Containerized,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Strategy::Native => f.write_str("native"),
            Strategy::Containerized => f.write_str("containerized"),
        }
    }
}

/// Pick the strategy from the platform family alone
pub fn select(snapshot: &SystemSnapshot) -> Strategy {
    match snapshot.platform_family() {
        PlatformFamily::NativeCapable => Strategy::Native,
        PlatformFamily::ContainerRequired => Strategy::Containerized,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::HostKind;

    #[test]
    fn test_select_by_platform() {
        let mut snapshot = SystemSnapshot::unknown();

        snapshot.host = HostKind::Linux("ubuntu".to_string());
        assert_eq!(select(&snapshot), Strategy::Native);

        snapshot.host = HostKind::Linux("arch".to_string());
        assert_eq!(select(&snapshot), Strategy::Containerized);

        snapshot.host = HostKind::MacOs;
        assert_eq!(select(&snapshot), Strategy::Containerized);
    }

    #[test]
    fn test_select_ignores_resources() {
        let mut snapshot = SystemSnapshot::unknown();
        snapshot.host = HostKind::Linux("ubuntu".to_string());
        snapshot.memory_gb = 0.0;
        assert_eq!(select(&snapshot), Strategy::Native);
    }
}

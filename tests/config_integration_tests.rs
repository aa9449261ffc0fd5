//! Integration tests for ConfigManager and configuration file handling
//!
//! These tests verify:
//! - Default configuration generation
//! - Required sections and enumerated values
//! - Rejected loads never touch the file
//! - JSON documents and environment overrides

use camino::Utf8PathBuf;
use ros2_installer::config::DEFAULT_CONFIG_YAML;
use ros2_installer::models::{LogLevel, PackageSet, RosDistro};
use ros2_installer::{ConfigManager, InstallerConfig, InstallerError};
use std::fs;
use tempfile::TempDir;

fn create_test_config_dir() -> (TempDir, Utf8PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let config_dir = Utf8PathBuf::try_from(temp_dir.path().to_path_buf()).unwrap();
    (temp_dir, config_dir)
}

fn write_config(dir: &Utf8PathBuf, name: &str, content: &str) -> Utf8PathBuf {
    let path = dir.join(name);
    fs::write(&path, content).unwrap();
    path
}

fn load(path: &Utf8PathBuf) -> Result<InstallerConfig, InstallerError> {
    ConfigManager::new(path).without_environment().load()
}

const MINIMAL_SECTIONS: &str = "\
installation:
  ros_distro: jazzy
  package_set: base
logging:
  level: DEBUG
";

#[test]
fn test_missing_file_generates_default() {
    let (_temp_dir, dir) = create_test_config_dir();
    let path = dir.join("nested/config.yaml");

    let config = load(&path).unwrap();

    assert_eq!(config, InstallerConfig::default());
    assert_eq!(fs::read_to_string(&path).unwrap(), DEFAULT_CONFIG_YAML);
}

#[test]
fn test_required_sections_only() {
    let (_temp_dir, dir) = create_test_config_dir();
    let path = write_config(&dir, "config.yaml", MINIMAL_SECTIONS);

    let config = load(&path).unwrap();

    assert_eq!(config.installation.ros_distro, RosDistro::Jazzy);
    assert_eq!(config.installation.package_set, PackageSet::Base);
    assert_eq!(config.installation.retry_attempts, 3);
    assert_eq!(config.logging.level, LogLevel::Debug);
    assert!(config.system.backup_configs);
    assert_eq!(config.docker.container_name, "ros2-dev");
    assert!(!config.performance.parallel_installs);
}

#[test]
fn test_missing_required_section_fails_without_mutation() {
    let (_temp_dir, dir) = create_test_config_dir();

    for (name, content) in [
        ("no_installation.yaml", "logging:\n  level: INFO\n"),
        ("no_logging.yaml", "installation:\n  ros_distro: kilted\n"),
    ] {
        let path = write_config(&dir, name, content);
        let before = fs::metadata(&path).unwrap().modified().unwrap();

        let err = load(&path).unwrap_err();

        assert!(matches!(err, InstallerError::Configuration(_)), "{}", err);
        assert!(err.to_string().contains("Missing required section"));
        assert_eq!(fs::read_to_string(&path).unwrap(), content);
        assert_eq!(fs::metadata(&path).unwrap().modified().unwrap(), before);
    }
}

#[test]
fn test_unknown_distribution_rejected() {
    let (_temp_dir, dir) = create_test_config_dir();
    let path = write_config(
        &dir,
        "config.yaml",
        "installation:\n  ros_distro: noetic\nlogging:\n  level: INFO\n",
    );

    let err = load(&path).unwrap_err();
    assert!(matches!(err, InstallerError::Configuration(_)));
}

#[test]
fn test_unknown_package_set_rejected() {
    let (_temp_dir, dir) = create_test_config_dir();
    let path = write_config(
        &dir,
        "config.yaml",
        "installation:\n  package_set: everything\nlogging:\n  level: INFO\n",
    );

    assert!(load(&path).is_err());
}

#[test]
fn test_unknown_keys_ignored() {
    let (_temp_dir, dir) = create_test_config_dir();
    let content = format!("{}  color_output: true\nextras:\n  anything: 1\n", MINIMAL_SECTIONS);
    let path = write_config(&dir, "config.yaml", &content);

    let config = load(&path).unwrap();
    assert_eq!(config.installation.ros_distro, RosDistro::Jazzy);
}

#[test]
fn test_out_of_range_limits_rejected() {
    let (_temp_dir, dir) = create_test_config_dir();
    let path = write_config(
        &dir,
        "config.yaml",
        "installation:\n  timeout_seconds: 0\nlogging:\n  level: INFO\n",
    );

    let err = load(&path).unwrap_err();
    assert!(err.to_string().contains("timeout_seconds"));
}

#[test]
fn test_json_config() {
    let (_temp_dir, dir) = create_test_config_dir();
    let path = write_config(
        &dir,
        "config.json",
        r#"{
            "installation": {"ros_distro": "humble", "package_set": "desktop", "parallel_jobs": 8},
            "logging": {"level": "WARNING", "console": false},
            "docker": {"container_name": "humble-dev"}
        }"#,
    );

    let config = load(&path).unwrap();
    assert_eq!(config.installation.ros_distro, RosDistro::Humble);
    assert_eq!(config.installation.parallel_jobs, 8);
    assert_eq!(config.logging.level, LogLevel::Warning);
    assert!(!config.logging.console);
    assert_eq!(config.docker.container_name, "humble-dev");
    assert_eq!(config.docker.image_name, "ros2");
}

#[test]
fn test_environment_override() {
    let (_temp_dir, dir) = create_test_config_dir();
    let path = write_config(&dir, "config.yaml", MINIMAL_SECTIONS);

    // Only the environment tests read it; every other test opts out.
    unsafe {
        std::env::set_var("ROS2_INSTALLER__INSTALLATION__PACKAGE_SET", "minimal");
    }
    let config = ConfigManager::new(&path).load();
    unsafe {
        std::env::remove_var("ROS2_INSTALLER__INSTALLATION__PACKAGE_SET");
    }

    let config = config.unwrap();
    assert_eq!(config.installation.package_set, PackageSet::Minimal);
    assert_eq!(config.installation.ros_distro, RosDistro::Jazzy);
}

#[test]
fn test_environment_cannot_supply_required_section() {
    let (_temp_dir, dir) = create_test_config_dir();
    let content = "installation:\n  ros_distro: kilted\n";
    let path = write_config(&dir, "config.yaml", content);

    unsafe {
        std::env::set_var("ROS2_INSTALLER__LOGGING__LEVEL", "INFO");
    }
    let result = ConfigManager::new(&path).load();
    unsafe {
        std::env::remove_var("ROS2_INSTALLER__LOGGING__LEVEL");
    }

    let err = result.unwrap_err();
    assert!(matches!(err, InstallerError::Configuration(_)), "{}", err);
    assert!(err.to_string().contains("Missing required section: logging"));
    assert_eq!(fs::read_to_string(&path).unwrap(), content);
}

#[test]
fn test_render_round_trip() {
    let mut config = InstallerConfig::default();
    config.installation.ros_distro = RosDistro::Rolling;

    let yaml = ConfigManager::render(&config).unwrap();
    let (_temp_dir, dir) = create_test_config_dir();
    let path = write_config(&dir, "rendered.yaml", &yaml);

    assert_eq!(load(&path).unwrap(), config);
}

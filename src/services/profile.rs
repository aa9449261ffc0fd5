//! Idempotent shell-profile edits.
//!
//! A block is identified by a signature line; if the profile already contains
//! that line the edit is skipped without touching the file.

use crate::journal::Journal;
use crate::models::{RosDistro, RunId};
use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use std::fs;
use std::io::Write;

/// Marker inserted between a file name and the run id of its backup
pub const BACKUP_MARKER: &str = ".backup";

/// Outcome of [`append_block_once`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProfileEdit {
    Appended { backup: Option<Utf8PathBuf> },
    AlreadyPresent,
}

/// A block of lines to append, keyed by its signature line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileBlock {
    pub signature: String,
    pub body: String,
}

impl ProfileBlock {
    /// Environment setup appended to the invoking user's `.bashrc` in native mode
    pub fn ros_setup(distro: RosDistro, setup_script: &Utf8Path) -> Self {
        let signature = format!("source {}", setup_script);
        let body = format!(
            "\n# ROS2 {} Setup - Added by ros2-installer\n\
             {}\n\
             export ROS_DOMAIN_ID=0\n\
             export ROS_LOCALHOST_ONLY=0\n\
             source /usr/share/colcon_argcomplete/hook/colcon-argcomplete.bash\n",
            distro.title(),
            signature
        );
        Self { signature, body }
    }

    /// Single PATH export for a directory missing from the search path
    pub fn path_export(dir: &Utf8Path) -> Self {
        let signature = format!("export PATH=\"{}:$PATH\"", dir);
        let body = format!("\n# Added by ros2-installer\n{}\n", signature);
        Self { signature, body }
    }
}

/// Backup location for `file` in run `run_id`
pub fn backup_path(file: &Utf8Path, run_id: &RunId) -> Utf8PathBuf {
    Utf8PathBuf::from(format!("{}{}.{}", file, BACKUP_MARKER, run_id))
}

/// Recover the original path from a backup path by cutting at the last marker
pub fn original_path(backup: &Utf8Path) -> Option<Utf8PathBuf> {
    let text = backup.as_str();
    let idx = text.rfind(BACKUP_MARKER)?;
    (idx > 0).then(|| Utf8PathBuf::from(&text[..idx]))
}

/// Append `block` to `profile` unless its signature line is already present.
///
/// With `backup` set and the profile existing, the profile is copied to
/// [`backup_path`] first and the copy recorded in the journal. The profile
/// itself is recorded as modified after a successful append.
pub fn append_block_once(
    profile: &Utf8Path,
    block: &ProfileBlock,
    backup: Option<&RunId>,
    journal: &Journal,
) -> Result<ProfileEdit> {
    let existing = match fs::read_to_string(profile) {
        Ok(content) => Some(content),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
        Err(e) => return Err(e).with_context(|| format!("Failed to read {}", profile)),
    };

    if let Some(content) = &existing {
        if content.lines().any(|line| line.trim() == block.signature) {
            tracing::info!("Setup already present in {}", profile);
            return Ok(ProfileEdit::AlreadyPresent);
        }
    }

    let mut backup_file = None;
    if let (Some(run_id), Some(_)) = (backup, &existing) {
        let target = backup_path(profile, run_id);
        fs::copy(profile, &target)
            .with_context(|| format!("Failed to back up {} to {}", profile, target))?;
        tracing::info!("Backed up {} to {}", profile, target);
        journal.record_backup(&target);
        backup_file = Some(target);
    }

    if let Some(parent) = profile.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent))?;
    }

    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(profile)
        .with_context(|| format!("Failed to open {} for append", profile))?;
    file.write_all(block.body.as_bytes())
        .with_context(|| format!("Failed to write {}", profile))?;

    journal.record_file_modified(profile);
    tracing::info!("Updated {}", profile);

    Ok(ProfileEdit::Appended { backup: backup_file })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn temp_profile() -> (TempDir, Utf8PathBuf) {
        let temp_dir = TempDir::new().unwrap();
        let dir = Utf8PathBuf::try_from(temp_dir.path().to_path_buf()).unwrap();
        (temp_dir, dir.join(".bashrc"))
    }

    #[test]
    fn test_backup_path_round_trip() {
        let run_id = RunId::from("abcd1234");
        let backup = backup_path(Utf8Path::new("/home/alice/.bashrc"), &run_id);
        assert_eq!(backup, "/home/alice/.bashrc.backup.abcd1234");
        assert_eq!(original_path(&backup).unwrap(), "/home/alice/.bashrc");
    }

    #[test]
    fn test_original_path_uses_last_marker() {
        let backup = Utf8Path::new("/srv/site.backup/.bashrc.backup.ffff0000");
        assert_eq!(original_path(backup).unwrap(), "/srv/site.backup/.bashrc");
        assert_eq!(original_path(Utf8Path::new("/home/alice/.bashrc")), None);
    }

    #[test]
    fn test_ros_setup_block() {
        let block = ProfileBlock::ros_setup(RosDistro::Kilted, Utf8Path::new("/opt/ros/kilted/setup.bash"));
        assert_eq!(block.signature, "source /opt/ros/kilted/setup.bash");
        assert!(block.body.contains("# ROS2 Kilted Setup"));
        assert!(block.body.contains("export ROS_DOMAIN_ID=0"));
    }

    #[test]
    fn test_append_creates_missing_profile_without_backup() {
        let (_guard, profile) = temp_profile();
        let journal = Journal::new();
        let block = ProfileBlock::path_export(Utf8Path::new("/home/alice/.local/bin"));

        let edit = append_block_once(&profile, &block, Some(&RunId::from("r1")), &journal).unwrap();

        assert_eq!(edit, ProfileEdit::Appended { backup: None });
        assert!(fs::read_to_string(&profile).unwrap().contains(&block.signature));
        assert!(journal.snapshot().backup_files.is_empty());
        assert_eq!(journal.snapshot().files_modified, vec![profile]);
    }

    #[test]
    fn test_second_append_is_noop() {
        let (_guard, profile) = temp_profile();
        fs::write(&profile, "alias ll='ls -l'\n").unwrap();
        let journal = Journal::new();
        let block = ProfileBlock::ros_setup(RosDistro::Jazzy, Utf8Path::new("/opt/ros/jazzy/setup.bash"));
        let run_id = RunId::from("abcd1234");

        let first = append_block_once(&profile, &block, Some(&run_id), &journal).unwrap();
        let after_first = fs::read_to_string(&profile).unwrap();
        let second = append_block_once(&profile, &block, Some(&run_id), &journal).unwrap();

        assert!(matches!(first, ProfileEdit::Appended { backup: Some(_) }));
        assert_eq!(second, ProfileEdit::AlreadyPresent);
        assert_eq!(fs::read_to_string(&profile).unwrap(), after_first);
        assert_eq!(after_first.matches(&block.signature).count(), 1);

        let backup = backup_path(&profile, &run_id);
        assert_eq!(fs::read_to_string(backup).unwrap(), "alias ll='ls -l'\n");
        assert_eq!(journal.snapshot().backup_files.len(), 1);
    }
}

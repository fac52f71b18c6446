//! Mounting and unmounting.

use std::io;
use std::path::{Path, PathBuf};

use fuser::{BackgroundSession, MountOption};
use thiserror::Error;
use tracing::info;

use crate::bridge::VaporFilesystem;
use crate::fs::FileSystem;

/// Mount failures.
#[derive(Debug, Error)]
pub enum MountError {
    /// The mount point could not be created.
    #[error("failed to create mount point {path}: {source}")]
    MountPoint {
        /// The path that could not be created.
        path: PathBuf,
        /// The underlying error.
        source: io::Error,
    },

    /// The FUSE session could not be established.
    #[error("mount failed: {0}")]
    Mount(#[source] io::Error),
}

/// Mount configuration.
#[derive(Debug, Clone)]
pub struct MountConfig {
    /// Where to mount.
    pub mount_point: PathBuf,
    /// Name reported for the filesystem.
    pub fs_name: String,
    /// Allow other users to access the mount.
    pub allow_other: bool,
    /// Mount read-only.
    pub read_only: bool,
    /// Unmount automatically when the process exits.
    pub auto_unmount: bool,
}

impl Default for MountConfig {
    fn default() -> Self {
        Self {
            mount_point: PathBuf::from("./mnt"),
            fs_name: "vapor".to_string(),
            allow_other: false,
            read_only: false,
            auto_unmount: true,
        }
    }
}

impl MountConfig {
    fn options(&self) -> Vec<MountOption> {
        let mut options = vec![
            if self.read_only {
                MountOption::RO
            } else {
                MountOption::RW
            },
            MountOption::FSName(self.fs_name.clone()),
        ];
        if self.auto_unmount {
            options.push(MountOption::AutoUnmount);
        }
        if self.allow_other {
            options.push(MountOption::AllowOther);
        }
        options
    }
}

fn prepare_mount_point(path: &Path) -> Result<(), MountError> {
    if !path.exists() {
        std::fs::create_dir_all(path).map_err(|source| MountError::MountPoint {
            path: path.to_path_buf(),
            source,
        })?;
    }
    Ok(())
}

/// Mounts `fs` and blocks until the session ends.
pub fn mount(fs: FileSystem, config: &MountConfig) -> Result<(), MountError> {
    prepare_mount_point(&config.mount_point)?;
    info!(mount_point = %config.mount_point.display(), "mounting");
    fuser::mount2(
        VaporFilesystem::new(fs),
        &config.mount_point,
        &config.options(),
    )
    .map_err(MountError::Mount)
}

/// Mounts `fs` in a background session. Dropping the returned session
/// unmounts; the tree is discarded with it.
pub fn spawn_mount(fs: FileSystem, config: &MountConfig) -> Result<BackgroundSession, MountError> {
    prepare_mount_point(&config.mount_point)?;
    info!(mount_point = %config.mount_point.display(), "mounting in background");
    fuser::spawn_mount2(
        VaporFilesystem::new(fs),
        &config.mount_point,
        &config.options(),
    )
    .map_err(MountError::Mount)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = MountConfig::default();
        assert_eq!(config.mount_point, PathBuf::from("./mnt"));
        assert!(!config.allow_other);
        assert!(!config.read_only);
    }

    #[test]
    fn test_options_reflect_config() {
        let config = MountConfig {
            read_only: true,
            allow_other: true,
            ..Default::default()
        };
        let options = config.options();
        assert!(options.contains(&MountOption::RO));
        assert!(options.contains(&MountOption::AllowOther));
        assert!(!options.contains(&MountOption::RW));

        let default_options = MountConfig::default().options();
        assert!(default_options.contains(&MountOption::RW));
        assert!(default_options.contains(&MountOption::AutoUnmount));
    }
}

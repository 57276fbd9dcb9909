//! Mount configuration and entry points.

use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use taskfs_core::DEFAULT_MOUNT_POINT;
use tokio::runtime::Handle;
use tracing::info;

use crate::node::NodeRef;
use crate::vfs::TaskFilesystem;
use crate::FsError;

/// Mount configuration.
#[derive(Debug, Clone)]
pub struct MountConfig {
    /// Mount point path
    pub mount_point: PathBuf,
    /// Allow other users to access
    pub allow_other: bool,
    /// Unmount when the process exits
    pub auto_unmount: bool,
    /// How long the kernel may cache attributes
    pub attr_ttl: Duration,
    /// How long the kernel may cache name lookups
    pub entry_ttl: Duration,
    /// Deadline for backend calls made on behalf of one kernel request
    pub request_timeout: Duration,
    /// Owner reported for every file; defaults to the mount point's owner
    pub uid: Option<u32>,
    /// Group reported for every file; defaults to the mount point's group
    pub gid: Option<u32>,
}

impl Default for MountConfig {
    fn default() -> Self {
        Self {
            mount_point: PathBuf::from(DEFAULT_MOUNT_POINT),
            allow_other: false,
            auto_unmount: false,
            attr_ttl: Duration::from_secs(1),
            entry_ttl: Duration::from_secs(1),
            request_timeout: Duration::from_secs(30),
            uid: None,
            gid: None,
        }
    }
}

impl MountConfig {
    /// Creates a configuration for `mount_point` with default settings.
    pub fn new(mount_point: impl Into<PathBuf>) -> Self {
        Self {
            mount_point: mount_point.into(),
            ..Default::default()
        }
    }

    /// Returns the FUSE mount options.
    pub fn mount_options(&self) -> Vec<fuser::MountOption> {
        let mut options = vec![
            fuser::MountOption::FSName("taskfs".to_string()),
            fuser::MountOption::Subtype("taskfs".to_string()),
            fuser::MountOption::DefaultPermissions,
            fuser::MountOption::NoDev,
            fuser::MountOption::NoSuid,
        ];
        if self.allow_other {
            options.push(fuser::MountOption::AllowOther);
        }
        if self.auto_unmount {
            options.push(fuser::MountOption::AutoUnmount);
        }
        options
    }
}

/// Mounts `root` and serves kernel requests until the filesystem is unmounted.
///
/// Backend calls run on `runtime`; this thread blocks in the FUSE session loop.
pub fn mount(root: NodeRef, runtime: Handle, mut config: MountConfig) -> Result<(), FsError> {
    let mount_point = config.mount_point.clone();
    if !mount_point.exists() {
        std::fs::create_dir_all(&mount_point)
            .map_err(|e| FsError::Mount(format!("Failed to create mount point: {}", e)))?;
    }

    let meta = std::fs::metadata(&mount_point)?;
    config.uid.get_or_insert(meta.uid());
    config.gid.get_or_insert(meta.gid());

    let options = config.mount_options();
    let fs = TaskFilesystem::new(root, runtime, config);

    info!(mount_point = %mount_point.display(), "Mounting taskfs");
    fuser::mount2(fs, &mount_point, &options)
        .map_err(|e| FsError::Mount(format!("FUSE mount failed: {}", e)))?;
    info!(mount_point = %mount_point.display(), "Unmounted");

    Ok(())
}

/// Unmounts a filesystem.
pub fn unmount(mount_point: &Path) -> Result<(), FsError> {
    let output = Command::new("fusermount")
        .arg("-u")
        .arg(mount_point)
        .output()
        .map_err(|e| FsError::Unmount(format!("Failed to run fusermount: {}", e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(FsError::Unmount(format!("fusermount failed: {}", stderr)));
    }

    Ok(())
}

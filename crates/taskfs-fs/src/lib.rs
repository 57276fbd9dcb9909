//! taskfs filesystem - the synthetic task tree and its FUSE bindings.
//!
//! - A lazily populated, cached node tree built from backend listings
//! - Line-oriented control files that register services and force refreshes
//! - An adapter projecting the tree onto kernel filesystem requests

#![warn(missing_docs, rust_2018_idioms)]

pub mod ctl;
pub mod info;
pub mod inode;
pub mod mount;
pub mod node;
pub mod registry;
pub mod root;
pub mod vfs;

pub use ctl::{CommandHandler, ControlFile};
pub use info::FileInfo;
pub use inode::{Inode, InodeId, InodeTable};
pub use mount::{mount, unmount, MountConfig};
pub use node::{Node, NodeRef, Snapshot};
pub use registry::{Factory, Registry};
pub use root::RootDir;
pub use vfs::{DirEntry, TaskFilesystem};

use taskfs_core::ServiceError;
use thiserror::Error;

/// Filesystem errors.
#[derive(Debug, Error)]
pub enum FsError {
    /// Directory operation on a file or file operation on a directory.
    /// Never reachable through the kernel bridge.
    #[error("protocol botch")]
    Protocol,

    /// Not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Not a directory
    #[error("Not a directory")]
    NotDirectory,

    /// Is a directory
    #[error("Is a directory")]
    IsDirectory,

    /// Permission denied
    #[error("Permission denied")]
    PermissionDenied,

    /// Wrong number of arguments to a control command
    #[error("invalid {0} command")]
    InvalidCommand(String),

    /// Control verb not offered by this control file
    #[error("unknown control command")]
    UnknownCommand(String),

    /// `add` named a kind with no registered factory
    #[error("unsupported service type: {0}")]
    UnsupportedService(String),

    /// A factory was registered twice for the same kind
    #[error("duplicate service register: {0}")]
    DuplicateKind(String),

    /// Backend failure
    #[error(transparent)]
    Backend(#[from] ServiceError),

    /// The request deadline passed before the backend answered
    #[error("Backend request timed out")]
    Timeout,

    /// Unknown file handle
    #[error("Bad file handle: {0}")]
    BadHandle(u64),

    /// Mount failed
    #[error("Mount failed: {0}")]
    Mount(String),

    /// Unmount failed
    #[error("Unmount failed: {0}")]
    Unmount(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl FsError {
    /// Kernel errno reported for this error.
    pub fn errno(&self) -> i32 {
        match self {
            FsError::Protocol => libc::EIO,
            FsError::NotFound(_) => libc::ENOENT,
            FsError::NotDirectory => libc::ENOTDIR,
            FsError::IsDirectory => libc::EISDIR,
            FsError::PermissionDenied => libc::EACCES,
            FsError::InvalidCommand(_)
            | FsError::UnknownCommand(_)
            | FsError::UnsupportedService(_)
            | FsError::DuplicateKind(_) => libc::EINVAL,
            FsError::Backend(ServiceError::Config(_)) => libc::EINVAL,
            FsError::Backend(ServiceError::Auth(_)) => libc::EACCES,
            FsError::Backend(_) => libc::EIO,
            FsError::Timeout => libc::ETIMEDOUT,
            FsError::BadHandle(_) => libc::EBADF,
            FsError::Mount(_) | FsError::Unmount(_) => libc::EIO,
            FsError::Io(e) => e.raw_os_error().unwrap_or(libc::EIO),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_errno_mapping() {
        assert_eq!(FsError::NotFound("x".into()).errno(), libc::ENOENT);
        assert_eq!(FsError::UnknownCommand("bogus".into()).errno(), libc::EINVAL);
        assert_eq!(FsError::Timeout.errno(), libc::ETIMEDOUT);
        let err = FsError::from(ServiceError::Transport("reset".into()));
        assert_eq!(err.errno(), libc::EIO);
        let err = FsError::from(ServiceError::Config("base url is missing".into()));
        assert_eq!(err.errno(), libc::EINVAL);
    }

    #[test]
    fn test_messages() {
        assert_eq!(FsError::Protocol.to_string(), "protocol botch");
        assert_eq!(
            FsError::UnknownCommand("bogus".into()).to_string(),
            "unknown control command"
        );
        assert_eq!(
            FsError::UnsupportedService("jira".into()).to_string(),
            "unsupported service type: jira"
        );
        assert_eq!(FsError::InvalidCommand("add".into()).to_string(), "invalid add command");
    }
}

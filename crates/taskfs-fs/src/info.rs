//! File metadata attached to every node.

use taskfs_core::Timestamp;

/// Directory type bit, as in `st_mode`.
pub const MODE_DIR: u32 = libc::S_IFDIR as u32;

/// Regular file type bit, as in `st_mode`.
pub const MODE_FILE: u32 = libc::S_IFREG as u32;

/// Permissions of synthetic directories.
pub const DIR_PERM: u32 = 0o755;

/// Permissions of synthetic files, control files included.
pub const FILE_PERM: u32 = 0o644;

/// Metadata of a node.
///
/// The type bits are fixed at construction: a node built as a directory
/// stays one for its whole life.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    name: String,
    size: u64,
    mode: u32,
    creation: Timestamp,
    last_mod: Timestamp,
}

impl FileInfo {
    /// Metadata for a directory.
    pub fn dir(name: impl Into<String>, creation: Timestamp, last_mod: Timestamp) -> Self {
        Self::new(name.into(), 0, MODE_DIR | DIR_PERM, creation, last_mod)
    }

    /// Metadata for a regular file of `size` bytes.
    pub fn file(
        name: impl Into<String>,
        size: u64,
        creation: Timestamp,
        last_mod: Timestamp,
    ) -> Self {
        Self::new(name.into(), size, MODE_FILE | FILE_PERM, creation, last_mod)
    }

    fn new(name: String, size: u64, mode: u32, creation: Timestamp, last_mod: Timestamp) -> Self {
        debug_assert!(!name.contains('/'), "entry name {name:?} contains a separator");
        Self {
            name,
            size,
            mode,
            creation,
            last_mod,
        }
    }

    /// Entry name, unique within the parent.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Size in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Type and permission bits.
    pub fn mode(&self) -> u32 {
        self.mode
    }

    /// Permission bits only.
    pub fn perm(&self) -> u16 {
        (self.mode & 0o7777) as u16
    }

    /// Creation time.
    pub fn creation(&self) -> Timestamp {
        self.creation
    }

    /// Last modification time.
    pub fn last_mod(&self) -> Timestamp {
        self.last_mod
    }

    /// Returns true if this describes a directory.
    pub fn is_dir(&self) -> bool {
        self.mode & MODE_DIR == MODE_DIR
    }
}

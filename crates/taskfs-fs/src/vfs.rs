//! Kernel bridge: FUSE requests answered from the node tree.
//!
//! Every request is served by a plain method (`get_attr`, `read_dir`,
//! `lookup_child`, `open_file`, ...) that returns a `Result`; the
//! [`Filesystem`] impl only translates those results into replies. Backend
//! calls run on the tokio runtime under the configured request deadline.

use std::collections::HashMap;
use std::ffi::OsStr;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

use bytes::Bytes;
use fuser::{
    FileAttr, FileType, Filesystem, ReplyAttr, ReplyData, ReplyDirectory, ReplyEmpty, ReplyEntry,
    ReplyOpen, ReplyWrite, Request, TimeOrNow,
};
use parking_lot::RwLock;
use tokio::runtime::Handle;
use tracing::{debug, warn};

use crate::info::FileInfo;
use crate::inode::{Inode, InodeId, InodeTable};
use crate::mount::MountConfig;
use crate::node::NodeRef;
use crate::FsError;

/// One directory entry as reported to the kernel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    /// Inode number
    pub ino: u64,
    /// Entry type
    pub kind: FileType,
    /// Entry name
    pub name: String,
}

/// An open file or directory.
enum OpenHandle {
    File {
        node: NodeRef,
        data: Bytes,
        write: bool,
    },
    Dir {
        entries: Vec<DirEntry>,
    },
}

/// taskfs FUSE filesystem implementation.
pub struct TaskFilesystem {
    /// Inode table
    inodes: InodeTable,
    /// Runtime executing backend calls
    runtime: Handle,
    /// Mount configuration
    config: MountConfig,
    /// Open file handles
    handles: RwLock<HashMap<u64, OpenHandle>>,
    /// Next file handle
    next_handle: AtomicU64,
}

fn file_type(info: &FileInfo) -> FileType {
    if info.is_dir() {
        FileType::Directory
    } else {
        FileType::RegularFile
    }
}

impl TaskFilesystem {
    /// Creates a bridge serving the tree under `root`.
    pub fn new(root: NodeRef, runtime: Handle, config: MountConfig) -> Self {
        Self {
            inodes: InodeTable::new(root),
            runtime,
            config,
            handles: RwLock::new(HashMap::new()),
            next_handle: AtomicU64::new(1),
        }
    }

    /// Returns the inode table.
    pub fn inodes(&self) -> &InodeTable {
        &self.inodes
    }

    /// Returns the mount configuration.
    pub fn config(&self) -> &MountConfig {
        &self.config
    }

    /// Runs a tree operation to completion under the request deadline.
    ///
    /// Dropping the future on timeout cancels the backend call in flight.
    fn run<T>(&self, fut: impl Future<Output = Result<T, FsError>>) -> Result<T, FsError> {
        let deadline = self.config.request_timeout;
        self.runtime.block_on(async move {
            tokio::time::timeout(deadline, fut)
                .await
                .unwrap_or(Err(FsError::Timeout))
        })
    }

    fn inode(&self, ino: u64) -> Result<Inode, FsError> {
        self.inodes
            .get(InodeId(ino))
            .ok_or_else(|| FsError::NotFound(format!("inode {ino}")))
    }

    fn attr_of(&self, inode: &Inode) -> FileAttr {
        inode.to_file_attr(self.config.uid.unwrap_or(0), self.config.gid.unwrap_or(0))
    }

    fn allocate_handle(&self, handle: OpenHandle) -> u64 {
        let fh = self.next_handle.fetch_add(1, Ordering::Relaxed);
        self.handles.write().insert(fh, handle);
        fh
    }

    /// Returns the attributes of `ino`.
    pub fn get_attr(&self, ino: u64) -> Result<FileAttr, FsError> {
        let inode = self.inode(ino)?;
        Ok(self.attr_of(&inode))
    }

    /// Lists the children of `ino`, registering an inode for each.
    pub fn read_dir(&self, ino: u64) -> Result<Vec<DirEntry>, FsError> {
        let inode = self.inode(ino)?;
        if !inode.is_dir() {
            return Err(FsError::NotDirectory);
        }

        let node = inode.node.clone();
        let children = self.run(async move { node.list_children().await })?;
        let ids = self.inodes.register_children(inode.id, &children);

        Ok(children
            .iter()
            .zip(ids)
            .map(|(child, id)| DirEntry {
                ino: id.0,
                kind: file_type(child.stat()),
                name: child.stat().name().to_string(),
            })
            .collect())
    }

    /// Resolves `name` under `parent`.
    ///
    /// Lists the parent first so the inode table reflects its current
    /// generation. A successful lookup counts against the inode until the
    /// kernel forgets it.
    pub fn lookup_child(&self, parent: u64, name: &str) -> Result<FileAttr, FsError> {
        self.read_dir(parent)?;
        let id = self
            .inodes
            .lookup(InodeId(parent), name)
            .ok_or_else(|| FsError::NotFound(name.to_string()))?;
        let attr = self.get_attr(id.0)?;
        self.inodes.remember(id);
        Ok(attr)
    }

    /// Releases `nlookup` lookups of `ino` taken by [`lookup_child`](Self::lookup_child).
    pub fn forget_inode(&self, ino: u64, nlookup: u64) {
        self.inodes.forget(InodeId(ino), nlookup);
    }

    fn listing(&self, ino: u64) -> Result<Vec<DirEntry>, FsError> {
        let inode = self.inode(ino)?;
        let mut entries = vec![
            DirEntry {
                ino,
                kind: FileType::Directory,
                name: ".".to_string(),
            },
            DirEntry {
                ino: inode.parent.0,
                kind: FileType::Directory,
                name: "..".to_string(),
            },
        ];
        entries.extend(self.read_dir(ino)?);
        Ok(entries)
    }

    /// Opens a directory, capturing its listing for the handle's lifetime.
    pub fn open_dir(&self, ino: u64) -> Result<u64, FsError> {
        let entries = self.listing(ino)?;
        Ok(self.allocate_handle(OpenHandle::Dir { entries }))
    }

    /// Returns the entries captured by [`open_dir`](Self::open_dir), or a
    /// fresh listing when `fh` is not a directory handle.
    pub fn dir_entries(&self, ino: u64, fh: u64) -> Result<Vec<DirEntry>, FsError> {
        if let Some(OpenHandle::Dir { entries }) = self.handles.read().get(&fh) {
            return Ok(entries.clone());
        }
        self.listing(ino)
    }

    /// Opens a file, returning the handle and FUSE open flags.
    ///
    /// Only control files may be opened for writing.
    pub fn open_file(&self, ino: u64, flags: i32) -> Result<(u64, u32), FsError> {
        let inode = self.inode(ino)?;
        if inode.is_dir() {
            return Err(FsError::IsDirectory);
        }

        let write = (flags & libc::O_ACCMODE) != libc::O_RDONLY;
        let control = inode.node.is_control();
        if write && !control {
            return Err(FsError::PermissionDenied);
        }

        let data = inode.node.read_content()?;
        let fh = self.allocate_handle(OpenHandle::File {
            node: inode.node.clone(),
            data,
            write,
        });
        let open_flags = if control {
            fuser::consts::FOPEN_DIRECT_IO
        } else {
            0
        };
        Ok((fh, open_flags))
    }

    /// Reads up to `size` bytes at `offset` from an open file.
    pub fn read_file(&self, fh: u64, offset: i64, size: u32) -> Result<Bytes, FsError> {
        match self.handles.read().get(&fh) {
            Some(OpenHandle::File { data, .. }) => {
                let start = usize::try_from(offset).unwrap_or(0).min(data.len());
                let end = start.saturating_add(size as usize).min(data.len());
                Ok(data.slice(start..end))
            }
            Some(OpenHandle::Dir { .. }) => Err(FsError::IsDirectory),
            None => Err(FsError::BadHandle(fh)),
        }
    }

    /// Writes to an open control file; each write is one command batch.
    pub fn write_file(&self, fh: u64, data: &[u8]) -> Result<u32, FsError> {
        let node = match self.handles.read().get(&fh) {
            Some(OpenHandle::File {
                node, write: true, ..
            }) => node.clone(),
            Some(OpenHandle::File { .. }) => return Err(FsError::BadHandle(fh)),
            Some(OpenHandle::Dir { .. }) => return Err(FsError::IsDirectory),
            None => return Err(FsError::BadHandle(fh)),
        };
        self.run(async move { node.write_content(data).await })?;
        Ok(data.len() as u32)
    }

    /// Applies an attribute change. Only control files accept one, and only
    /// as a no-op so that truncating opens succeed.
    pub fn set_attr(&self, ino: u64) -> Result<FileAttr, FsError> {
        let inode = self.inode(ino)?;
        if !inode.node.is_control() {
            return Err(FsError::PermissionDenied);
        }
        Ok(self.attr_of(&inode))
    }

    /// Closes a handle.
    pub fn release_handle(&self, fh: u64) -> Result<(), FsError> {
        self.handles
            .write()
            .remove(&fh)
            .map(|_| ())
            .ok_or(FsError::BadHandle(fh))
    }
}

impl Filesystem for TaskFilesystem {
    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let name = name.to_string_lossy();
        debug!(parent = parent, name = %name, "lookup");

        match self.lookup_child(parent, &name) {
            Ok(attr) => reply.entry(&self.config.entry_ttl, &attr, 0),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn forget(&mut self, _req: &Request<'_>, ino: u64, nlookup: u64) {
        debug!(ino = ino, nlookup = nlookup, "forget");
        self.forget_inode(ino, nlookup);
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, _fh: Option<u64>, reply: ReplyAttr) {
        debug!(ino = ino, "getattr");

        match self.get_attr(ino) {
            Ok(attr) => reply.attr(&self.config.attr_ttl, &attr),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn setattr(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _mode: Option<u32>,
        _uid: Option<u32>,
        _gid: Option<u32>,
        size: Option<u64>,
        _atime: Option<TimeOrNow>,
        _mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        _fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        debug!(ino = ino, size = ?size, "setattr");

        match self.set_attr(ino) {
            Ok(attr) => reply.attr(&self.config.attr_ttl, &attr),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn opendir(&mut self, _req: &Request<'_>, ino: u64, _flags: i32, reply: ReplyOpen) {
        debug!(ino = ino, "opendir");

        match self.open_dir(ino) {
            Ok(fh) => reply.opened(fh, 0),
            Err(e) => {
                warn!(ino = ino, error = %e, "opendir failed");
                reply.error(e.errno());
            }
        }
    }

    fn readdir(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        debug!(ino = ino, fh = fh, offset = offset, "readdir");

        let entries = match self.dir_entries(ino, fh) {
            Ok(entries) => entries,
            Err(e) => {
                reply.error(e.errno());
                return;
            }
        };

        let start = usize::try_from(offset).unwrap_or(0);
        for (i, entry) in entries.into_iter().enumerate().skip(start) {
            if reply.add(entry.ino, (i + 1) as i64, entry.kind, &entry.name) {
                break;
            }
        }

        reply.ok();
    }

    fn releasedir(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        _flags: i32,
        reply: ReplyEmpty,
    ) {
        debug!(ino = ino, fh = fh, "releasedir");

        match self.release_handle(fh) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn open(&mut self, _req: &Request<'_>, ino: u64, flags: i32, reply: ReplyOpen) {
        debug!(ino = ino, flags = flags, "open");

        match self.open_file(ino, flags) {
            Ok((fh, open_flags)) => reply.opened(fh, open_flags),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn read(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        debug!(ino = ino, fh = fh, offset = offset, size = size, "read");

        match self.read_file(fh, offset, size) {
            Ok(data) => reply.data(&data),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn write(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        debug!(ino = ino, fh = fh, offset = offset, size = data.len(), "write");

        match self.write_file(fh, data) {
            Ok(written) => reply.written(written),
            Err(e) => {
                warn!(ino = ino, error = %e, "control write failed");
                reply.error(e.errno());
            }
        }
    }

    fn release(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        debug!(ino = ino, fh = fh, "release");

        match self.release_handle(fh) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.errno()),
        }
    }
}

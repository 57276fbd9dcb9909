//! Inode management for the kernel bridge.
//!
//! The kernel names files by inode number; the tree names them by node.
//! The table binds the two, keyed by `(parent, name)`, and is filled as
//! directories are listed. A record lives while its name is linked or the
//! kernel still holds lookups on it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::node::NodeRef;

/// Inode identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InodeId(pub u64);

impl InodeId {
    /// Root inode ID (FUSE convention).
    pub const ROOT: InodeId = InodeId(1);
}

impl From<u64> for InodeId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl From<InodeId> for u64 {
    fn from(id: InodeId) -> u64 {
        id.0
    }
}

/// Inode representing a registered node.
#[derive(Clone)]
pub struct Inode {
    /// Inode ID
    pub id: InodeId,
    /// Parent inode ID
    pub parent: InodeId,
    /// Entry name
    pub name: String,
    /// Node currently bound to this inode
    pub node: NodeRef,
    /// Children in listing order (for directories)
    pub children: Vec<InodeId>,
    /// Lookups the kernel has not forgotten yet
    pub lookups: u64,
}

impl Inode {
    /// Returns true if this is a directory.
    pub fn is_dir(&self) -> bool {
        self.node.stat().is_dir()
    }

    /// Converts to FUSE file attributes.
    ///
    /// Access and modification times both come from the node's last
    /// modification time.
    pub fn to_file_attr(&self, uid: u32, gid: u32) -> fuser::FileAttr {
        use fuser::FileType;

        let info = self.node.stat();
        let (kind, nlink) = if info.is_dir() {
            (FileType::Directory, 2)
        } else {
            (FileType::RegularFile, 1)
        };
        let mtime = info.last_mod().to_system_time();

        fuser::FileAttr {
            ino: self.id.0,
            size: info.size(),
            blocks: info.size().div_ceil(512),
            atime: mtime,
            mtime,
            ctime: mtime,
            crtime: info.creation().to_system_time(),
            kind,
            perm: info.perm(),
            nlink,
            uid,
            gid,
            rdev: 0,
            blksize: 4096,
            flags: 0,
        }
    }
}

#[derive(Default)]
struct Tables {
    inodes: HashMap<InodeId, Inode>,
    names: HashMap<(InodeId, String), InodeId>,
}

impl Tables {
    fn is_linked(&self, id: InodeId) -> bool {
        match self.inodes.get(&id) {
            Some(inode) => self.names.get(&(inode.parent, inode.name.clone())) == Some(&id),
            None => false,
        }
    }

    /// Removes the name of `id` and drops the record if nothing references it.
    fn unlink(&mut self, id: InodeId) {
        let Some(inode) = self.inodes.get(&id) else {
            return;
        };
        let key = (inode.parent, inode.name.clone());
        let lookups = inode.lookups;
        if self.names.get(&key) == Some(&id) {
            self.names.remove(&key);
        }
        if lookups == 0 {
            self.reclaim(id);
        }
    }

    /// Drops `id` together with every descendant the kernel no longer holds.
    ///
    /// Descendants still looked up lose their names and wait for `forget`.
    fn reclaim(&mut self, id: InodeId) {
        let mut pending = vec![id];
        while let Some(id) = pending.pop() {
            if id == InodeId::ROOT {
                continue;
            }
            let Some(inode) = self.inodes.remove(&id) else {
                continue;
            };
            for child in inode.children {
                if let Some(entry) = self.inodes.get(&child) {
                    self.names.remove(&(id, entry.name.clone()));
                    if entry.lookups == 0 {
                        pending.push(child);
                    }
                }
            }
        }
    }
}

/// Inode table managing all registered nodes.
pub struct InodeTable {
    tables: RwLock<Tables>,
    next_id: AtomicU64,
}

impl InodeTable {
    /// Creates a new inode table with `root` bound to [`InodeId::ROOT`].
    pub fn new(root: NodeRef) -> Self {
        let mut tables = Tables::default();
        tables.inodes.insert(
            InodeId::ROOT,
            Inode {
                id: InodeId::ROOT,
                parent: InodeId::ROOT,
                name: String::new(),
                node: root,
                children: Vec::new(),
                lookups: 0,
            },
        );

        Self {
            tables: RwLock::new(tables),
            next_id: AtomicU64::new(InodeId::ROOT.0 + 1),
        }
    }

    /// Gets an inode by ID.
    pub fn get(&self, id: InodeId) -> Option<Inode> {
        self.tables.read().inodes.get(&id).cloned()
    }

    /// Looks up an inode by name in a parent directory.
    pub fn lookup(&self, parent: InodeId, name: &str) -> Option<InodeId> {
        self.tables
            .read()
            .names
            .get(&(parent, name.to_string()))
            .copied()
    }

    /// Records the latest listing of `parent`, returning one inode per child.
    ///
    /// A name already registered under `parent` keeps its inode number. If
    /// the listing carries the same node the entry is left untouched; a node
    /// from a newer generation is re-bound to the existing inode. Names that
    /// no longer appear are unlinked from `parent`; their records are dropped
    /// at once unless the kernel still holds lookups on them.
    pub fn register_children(&self, parent: InodeId, children: &[NodeRef]) -> Vec<InodeId> {
        let mut tables = self.tables.write();
        let Tables { inodes, names } = &mut *tables;

        let mut ids = Vec::with_capacity(children.len());
        for child in children {
            let name = child.stat().name().to_string();
            let key = (parent, name.clone());
            let id = match names.get(&key) {
                Some(&id) => {
                    if let Some(inode) = inodes.get_mut(&id) {
                        if !Arc::ptr_eq(&inode.node, child) {
                            inode.node = child.clone();
                        }
                    }
                    id
                }
                None => {
                    let id = InodeId(self.next_id.fetch_add(1, Ordering::Relaxed));
                    inodes.insert(
                        id,
                        Inode {
                            id,
                            parent,
                            name,
                            node: child.clone(),
                            children: Vec::new(),
                            lookups: 0,
                        },
                    );
                    names.insert(key, id);
                    id
                }
            };
            ids.push(id);
        }

        let stale: Vec<InodeId> = match inodes.get_mut(&parent) {
            Some(parent_inode) => {
                let stale = parent_inode
                    .children
                    .iter()
                    .filter(|id| !ids.contains(id))
                    .copied()
                    .collect();
                parent_inode.children = ids.clone();
                stale
            }
            None => Vec::new(),
        };
        for id in stale {
            tables.unlink(id);
        }

        ids
    }

    /// Counts one kernel lookup of `id`.
    pub fn remember(&self, id: InodeId) {
        if let Some(inode) = self.tables.write().inodes.get_mut(&id) {
            inode.lookups += 1;
        }
    }

    /// Releases `nlookup` kernel lookups of `id`.
    ///
    /// An unlinked inode is dropped once its count reaches zero. The root is
    /// never dropped.
    pub fn forget(&self, id: InodeId, nlookup: u64) {
        let mut tables = self.tables.write();
        let lookups = match tables.inodes.get_mut(&id) {
            Some(inode) => {
                inode.lookups = inode.lookups.saturating_sub(nlookup);
                inode.lookups
            }
            None => return,
        };
        if lookups == 0 && id != InodeId::ROOT && !tables.is_linked(id) {
            tables.reclaim(id);
        }
    }

    /// Lists children of a directory as last registered.
    pub fn list_children(&self, parent: InodeId) -> Vec<Inode> {
        let tables = self.tables.read();
        match tables.inodes.get(&parent) {
            Some(parent_inode) => parent_inode
                .children
                .iter()
                .filter_map(|id| tables.inodes.get(id).cloned())
                .collect(),
            None => Vec::new(),
        }
    }

    /// Returns the number of inodes, the root included.
    pub fn len(&self) -> usize {
        self.tables.read().inodes.len()
    }

    /// Returns true if only the root is registered.
    pub fn is_empty(&self) -> bool {
        self.len() <= 1
    }
}

//! The synthetic node tree.
//!
//! ```text
//! /                     RootDir
//!   <service>/          ServiceDir, one per active service
//!     <task>/           TaskDir, one per listed task
//!       subject         LeafFile
//!       message         LeafFile
//!       url             LeafFile
//!       1, 2, ...       comment LeafFiles, fetch order
//!     ctl               ControlFile: refresh
//!   ctl                 ControlFile: add
//! ```
//!
//! Directory listings are snapshots. A snapshot is built in one piece from
//! one backend call and handed out by reference until it is invalidated, so
//! repeated listings of one generation return the very same child nodes.

use std::fmt;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use bytes::Bytes;
use taskfs_core::{
    escape_name, NameAllocator, ServiceRef, TaskRef, Timestamp, CTL_FILE, MESSAGE_FILE,
    SUBJECT_FILE, URL_FILE,
};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::ctl::{CommandHandler, ControlFile};
use crate::info::FileInfo;
use crate::root::RootDir;
use crate::FsError;

/// Shared reference to a node. Pointer identity is node identity.
pub type NodeRef = Arc<Node>;

/// One generation of a directory's children.
pub type Snapshot = Arc<Vec<NodeRef>>;

/// A file or directory of the tree.
pub enum Node {
    /// Mount root
    Root(RootDir),
    /// One backend
    Service(ServiceDir),
    /// One task
    Task(TaskDir),
    /// Fixed task field (`subject`, `message`, `url`)
    Leaf(LeafFile),
    /// One comment body
    Comment(LeafFile),
    /// Command file
    Control(ControlFile),
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            Node::Root(_) => "Root",
            Node::Service(_) => "Service",
            Node::Task(_) => "Task",
            Node::Leaf(_) => "Leaf",
            Node::Comment(_) => "Comment",
            Node::Control(_) => "Control",
        };
        f.debug_tuple(kind).field(&self.stat().name()).finish()
    }
}

impl Node {
    /// Returns the node's metadata.
    pub fn stat(&self) -> &FileInfo {
        match self {
            Node::Root(dir) => dir.stat(),
            Node::Service(dir) => &dir.info,
            Node::Task(dir) => &dir.info,
            Node::Leaf(file) | Node::Comment(file) => &file.info,
            Node::Control(ctl) => ctl.stat(),
        }
    }

    /// Lists the children of a directory node.
    ///
    /// May call into the backend when the directory has no loaded snapshot.
    /// Files answer with [`FsError::Protocol`], never with an empty listing.
    pub async fn list_children(&self) -> Result<Snapshot, FsError> {
        match self {
            Node::Root(dir) => Ok(dir.list_children()),
            Node::Service(dir) => dir.list_children().await,
            Node::Task(dir) => dir.list_children().await,
            Node::Leaf(_) | Node::Comment(_) | Node::Control(_) => Err(FsError::Protocol),
        }
    }

    /// Returns the content of a file node.
    pub fn read_content(&self) -> Result<Bytes, FsError> {
        match self {
            Node::Leaf(file) | Node::Comment(file) => Ok(file.data.clone()),
            Node::Control(ctl) => Ok(ctl.read_content()),
            Node::Root(_) | Node::Service(_) | Node::Task(_) => Err(FsError::Protocol),
        }
    }

    /// Writes to a control file, running the commands it contains.
    pub async fn write_content(&self, data: &[u8]) -> Result<(), FsError> {
        match self {
            Node::Control(ctl) => ctl.write_content(data).await,
            _ => Err(FsError::PermissionDenied),
        }
    }

    /// Returns true for control files, the only writable nodes.
    pub fn is_control(&self) -> bool {
        matches!(self, Node::Control(_))
    }

    /// Returns the root directory, if this is one.
    pub fn as_root(&self) -> Option<&RootDir> {
        match self {
            Node::Root(dir) => Some(dir),
            _ => None,
        }
    }

    /// Returns the service directory, if this is one.
    pub fn as_service(&self) -> Option<&ServiceDir> {
        match self {
            Node::Service(dir) => Some(dir),
            _ => None,
        }
    }

    /// Returns the task directory, if this is one.
    pub fn as_task(&self) -> Option<&TaskDir> {
        match self {
            Node::Task(dir) => Some(dir),
            _ => None,
        }
    }
}

/// Cache state of a lazily listed directory.
#[derive(Default)]
pub(crate) enum Generation {
    /// Never listed, or the last attempt failed
    #[default]
    Unloaded,
    /// Snapshot of the current generation
    Loaded(Snapshot),
    /// Discarded by `refresh`; the next listing fetches again
    Invalidated,
}

impl Generation {
    fn snapshot(&self) -> Option<&Snapshot> {
        match self {
            Generation::Loaded(snapshot) => Some(snapshot),
            Generation::Unloaded | Generation::Invalidated => None,
        }
    }
}

/// Directory of one backend service.
pub struct ServiceDir {
    info: FileInfo,
    service: ServiceRef,
    cache: Arc<Mutex<Generation>>,
}

impl ServiceDir {
    /// Wraps `service` as a directory called `name`.
    pub fn new(name: impl Into<String>, service: ServiceRef) -> Self {
        let now = Timestamp::now();
        Self {
            info: FileInfo::dir(name, now, now),
            service,
            cache: Arc::new(Mutex::new(Generation::Unloaded)),
        }
    }

    /// Returns the wrapped service.
    pub fn service(&self) -> &ServiceRef {
        &self.service
    }

    /// Lists one directory per task plus the `ctl` file.
    ///
    /// The cache lock is held across the backend call so concurrent callers
    /// wait for the fill in progress instead of producing a second snapshot.
    pub async fn list_children(&self) -> Result<Snapshot, FsError> {
        let mut cache = self.cache.lock().await;
        if let Some(snapshot) = cache.snapshot() {
            return Ok(snapshot.clone());
        }

        let tasks = match self.service.list().await {
            Ok(tasks) => tasks,
            Err(e) => {
                warn!(service = self.info.name(), error = %e, "Task listing failed");
                return Err(e.into());
            }
        };

        let mut names = NameAllocator::with_reserved([CTL_FILE]);
        let mut children: Vec<NodeRef> = Vec::with_capacity(tasks.len() + 1);
        for task in tasks {
            let name = names.claim(&escape_name(task.key()));
            children.push(Arc::new(Node::Task(TaskDir::new(name, task))));
        }
        let refresh: Arc<dyn CommandHandler> = Arc::new(Refresh {
            service: self.info.name().to_string(),
            cache: Arc::downgrade(&self.cache),
        });
        children.push(Arc::new(Node::Control(ControlFile::new([(
            "refresh", refresh,
        )]))));

        debug!(service = self.info.name(), tasks = children.len() - 1, "Loaded task listing");
        let snapshot = Arc::new(children);
        *cache = Generation::Loaded(snapshot.clone());
        Ok(snapshot)
    }

    /// Discards the cached listing.
    pub async fn refresh(&self) {
        invalidate(&self.cache).await;
        info!(service = self.info.name(), "Task listing invalidated");
    }

    /// Returns true if a snapshot is currently cached.
    pub async fn is_loaded(&self) -> bool {
        self.cache.lock().await.snapshot().is_some()
    }
}

async fn invalidate(cache: &Mutex<Generation>) {
    *cache.lock().await = Generation::Invalidated;
}

/// `refresh` command of a service directory's control file.
///
/// Holds the cache weakly: the control file lives inside the snapshot the
/// cache owns.
struct Refresh {
    service: String,
    cache: Weak<Mutex<Generation>>,
}

#[async_trait]
impl CommandHandler for Refresh {
    async fn call(&self, _args: &[String]) -> Result<(), FsError> {
        if let Some(cache) = self.cache.upgrade() {
            invalidate(&cache).await;
            info!(service = %self.service, "Task listing invalidated");
        }
        Ok(())
    }
}

/// Directory of one task.
pub struct TaskDir {
    info: FileInfo,
    task: TaskRef,
    cache: Mutex<Generation>,
}

impl TaskDir {
    /// Wraps `task` as a directory called `name`.
    pub fn new(name: impl Into<String>, task: TaskRef) -> Self {
        Self {
            info: FileInfo::dir(name, task.creation(), task.last_mod()),
            task,
            cache: Mutex::new(Generation::Unloaded),
        }
    }

    /// Returns the wrapped task.
    pub fn task(&self) -> &TaskRef {
        &self.task
    }

    /// Lists `subject`, `message`, `url` and one numbered file per comment.
    ///
    /// Loaded once; comments are not re-fetched for the life of this node.
    pub async fn list_children(&self) -> Result<Snapshot, FsError> {
        let mut cache = self.cache.lock().await;
        if let Some(snapshot) = cache.snapshot() {
            return Ok(snapshot.clone());
        }

        let comments = match self.task.comments().await {
            Ok(comments) => comments,
            Err(e) => {
                warn!(task = self.info.name(), error = %e, "Comment listing failed");
                return Err(e.into());
            }
        };

        let task = &self.task;
        let mut children: Vec<NodeRef> = Vec::with_capacity(comments.len() + 3);
        for (name, text) in [
            (SUBJECT_FILE, task.subject()),
            (MESSAGE_FILE, task.message()),
            (URL_FILE, task.permalink()),
        ] {
            let file = LeafFile::new(name, text, task.creation(), task.last_mod());
            children.push(Arc::new(Node::Leaf(file)));
        }
        for (i, comment) in comments.iter().enumerate() {
            let file = LeafFile::new(
                (i + 1).to_string(),
                comment.message(),
                comment.creation(),
                comment.last_mod(),
            );
            children.push(Arc::new(Node::Comment(file)));
        }

        debug!(task = self.info.name(), comments = comments.len(), "Loaded task files");
        let snapshot = Arc::new(children);
        *cache = Generation::Loaded(snapshot.clone());
        Ok(snapshot)
    }

    /// Returns true if the task files are currently cached.
    pub async fn is_loaded(&self) -> bool {
        self.cache.lock().await.snapshot().is_some()
    }
}

/// Immutable file content.
pub struct LeafFile {
    info: FileInfo,
    data: Bytes,
}

impl LeafFile {
    /// Creates a file holding `data` verbatim.
    pub fn new(
        name: impl Into<String>,
        data: impl Into<String>,
        creation: Timestamp,
        last_mod: Timestamp,
    ) -> Self {
        let data = Bytes::from(data.into());
        Self {
            info: FileInfo::file(name, data.len() as u64, creation, last_mod),
            data,
        }
    }

    /// Returns the content.
    pub fn data(&self) -> &Bytes {
        &self.data
    }
}

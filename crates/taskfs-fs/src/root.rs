//! The mount root and its `add` command.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use taskfs_core::{escape_name, NameAllocator, ServiceConfig, Timestamp, CTL_FILE};
use tracing::info;

use crate::ctl::{CommandHandler, ControlFile};
use crate::info::FileInfo;
use crate::node::{Node, NodeRef, ServiceDir, Snapshot};
use crate::registry::Registry;
use crate::FsError;

/// Top-level directory.
///
/// Owns the registry of service kinds and the active service directories.
/// Service directories live until the process exits; adding a service whose
/// name is already active replaces the old directory.
pub struct RootDir {
    info: FileInfo,
    services: Arc<ServiceTable>,
    ctl: NodeRef,
}

/// Active services keyed by the name each service reports.
struct ServiceTable {
    registry: Arc<Registry>,
    active: RwLock<BTreeMap<String, NodeRef>>,
}

impl RootDir {
    /// Creates an empty root using `registry` to construct services.
    pub fn new(registry: Arc<Registry>) -> Self {
        let now = Timestamp::now();
        let services = Arc::new(ServiceTable {
            registry,
            active: RwLock::new(BTreeMap::new()),
        });
        let add: Arc<dyn CommandHandler> = Arc::new(AddService {
            services: services.clone(),
        });
        Self {
            info: FileInfo::dir("", now, now),
            services,
            ctl: Arc::new(Node::Control(ControlFile::new([("add", add)]))),
        }
    }

    /// Wraps a new root in a node.
    pub fn into_node(self) -> NodeRef {
        Arc::new(Node::Root(self))
    }

    /// Returns the root's metadata.
    pub fn stat(&self) -> &FileInfo {
        &self.info
    }

    /// Returns the registry of service kinds.
    pub fn registry(&self) -> &Arc<Registry> {
        &self.services.registry
    }

    /// Lists one directory per active service, then `ctl`.
    pub fn list_children(&self) -> Snapshot {
        let active = self.services.active.read();
        let mut children: Vec<NodeRef> = Vec::with_capacity(active.len() + 1);
        children.extend(active.values().cloned());
        children.push(self.ctl.clone());
        Arc::new(children)
    }

    /// Runs `add` with positional arguments `kind token [baseURL]`.
    pub async fn add_service(&self, args: &[String]) -> Result<(), FsError> {
        self.services.add(args).await
    }

    /// Returns the names of the active services, sorted.
    pub fn service_names(&self) -> Vec<String> {
        self.services.active.read().keys().cloned().collect()
    }

    /// Returns the directory of the service reporting `name`.
    pub fn service(&self, name: &str) -> Option<NodeRef> {
        self.services.active.read().get(name).cloned()
    }
}

impl ServiceTable {
    async fn add(&self, args: &[String]) -> Result<(), FsError> {
        let (kind, token, base_url) = match args {
            [kind, token] => (kind, token, None),
            [kind, token, url] => (kind, token, Some(url.clone())),
            _ => return Err(FsError::InvalidCommand("add".to_string())),
        };
        let service = self
            .registry
            .create(kind, ServiceConfig::new(token.clone(), base_url))
            .await?;

        let name = service.name().to_string();
        let mut active = self.active.write();
        // A replaced directory gives up its entry name; every other one keeps its own.
        let mut names = NameAllocator::with_reserved(
            active
                .iter()
                .filter(|(key, _)| **key != name)
                .map(|(_, dir)| dir.stat().name())
                .chain([CTL_FILE]),
        );
        let dir_name = names.claim(&escape_name(&name));
        let dir = Arc::new(Node::Service(ServiceDir::new(dir_name.clone(), service)));
        let replaced = active.insert(name.clone(), dir).is_some();
        drop(active);
        info!(kind = kind.as_str(), service = %name, dir = %dir_name, replaced, "Service added");
        Ok(())
    }
}

/// `add` command of the root control file.
struct AddService {
    services: Arc<ServiceTable>,
}

#[async_trait]
impl CommandHandler for AddService {
    async fn call(&self, args: &[String]) -> Result<(), FsError> {
        self.services.add(args).await
    }
}

//! A root directory wired to mock service kinds.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use taskfs_core::{ServiceConfig, ServiceError, ServiceRef, CTL_FILE};
use taskfs_fs::{FsError, MountConfig, NodeRef, Registry, RootDir, TaskFilesystem};
use tokio::runtime::Handle;
use tracing::info;

use crate::mock::MockService;

type Backends = Arc<Mutex<HashMap<String, Arc<MockService>>>>;

/// A taskfs tree backed by [`MockService`]s.
///
/// Every registered kind builds a service named after the base URL given to
/// `add`, or `<kind>.test` without one. Services of the same name share one
/// backend, so tests can seed tasks before or after the `add`.
pub struct TestTree {
    /// Registry holding the mock kinds
    pub registry: Arc<Registry>,
    /// Root node
    pub root: NodeRef,
    backends: Backends,
    configs: Arc<Mutex<Vec<(String, ServiceConfig)>>>,
}

impl TestTree {
    /// Creates a tree with mock `github`, `gitlab` and `backlog` kinds.
    pub fn new() -> Self {
        Self::with_kinds(&["github", "gitlab", "backlog"])
    }

    /// Creates a tree with the given mock kinds.
    pub fn with_kinds(kinds: &[&str]) -> Self {
        let registry = Arc::new(Registry::new());
        let backends: Backends = Arc::new(Mutex::new(HashMap::new()));
        let configs = Arc::new(Mutex::new(Vec::new()));

        for &name in kinds {
            let kind = name.to_string();
            let backends = backends.clone();
            let configs = configs.clone();
            registry
                .register(name, move |config: ServiceConfig| {
                    let name = config
                        .base_url
                        .clone()
                        .unwrap_or_else(|| format!("{kind}.test"));
                    configs.lock().push((kind.clone(), config));
                    let service: ServiceRef = backend(&backends, &name);
                    async move { Ok::<ServiceRef, ServiceError>(service) }
                })
                .unwrap();
        }

        info!(kinds = ?kinds, "Built test tree");
        let root = RootDir::new(registry.clone()).into_node();
        Self {
            registry,
            root,
            backends,
            configs,
        }
    }

    /// Returns the backend serving services called `name`, creating it.
    pub fn backend(&self, name: &str) -> Arc<MockService> {
        backend(&self.backends, name)
    }

    /// Returns the configurations handed to factories, in call order.
    pub fn configs(&self) -> Vec<(String, ServiceConfig)> {
        self.configs.lock().clone()
    }

    /// Returns the root directory.
    pub fn root_dir(&self) -> &RootDir {
        self.root.as_root().unwrap()
    }

    /// Writes `data` to the root control file.
    pub async fn write_root_ctl(&self, data: &str) -> Result<(), FsError> {
        let ctl = child(&self.root, CTL_FILE).await.unwrap();
        ctl.write_content(data.as_bytes()).await
    }

    /// Writes `data` to the control file of service directory `service`.
    pub async fn write_service_ctl(&self, service: &str, data: &str) -> Result<(), FsError> {
        let dir = child(&self.root, service).await.unwrap();
        let ctl = child(&dir, CTL_FILE).await.unwrap();
        ctl.write_content(data.as_bytes()).await
    }

    /// Builds a kernel bridge over this tree.
    pub fn bridge(&self, runtime: Handle, config: MountConfig) -> TaskFilesystem {
        TaskFilesystem::new(self.root.clone(), runtime, config)
    }
}

impl Default for TestTree {
    fn default() -> Self {
        Self::new()
    }
}

fn backend(backends: &Backends, name: &str) -> Arc<MockService> {
    backends
        .lock()
        .entry(name.to_string())
        .or_insert_with(|| Arc::new(MockService::new(name)))
        .clone()
}

/// Lists `dir` and returns the child called `name`.
pub async fn child(dir: &NodeRef, name: &str) -> Option<NodeRef> {
    let children = dir.list_children().await.ok()?;
    children.iter().find(|c| c.stat().name() == name).cloned()
}

/// Lists `dir` and returns the child names in listing order.
pub async fn names(dir: &NodeRef) -> Vec<String> {
    dir.list_children()
        .await
        .unwrap()
        .iter()
        .map(|c| c.stat().name().to_string())
        .collect()
}

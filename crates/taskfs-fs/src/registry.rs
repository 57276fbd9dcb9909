//! Backend registry: service kind name to constructor.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use parking_lot::RwLock;
use taskfs_core::{ServiceConfig, ServiceError, ServiceRef};
use tracing::debug;

use crate::FsError;

/// Constructor for one kind of service.
pub type Factory =
    Arc<dyn Fn(ServiceConfig) -> BoxFuture<'static, Result<ServiceRef, ServiceError>> + Send + Sync>;

/// Maps service kinds (`github`, `gitlab`, ...) to their constructors.
#[derive(Default)]
pub struct Registry {
    factories: RwLock<HashMap<String, Factory>>,
}

impl Registry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the constructor for `kind`.
    ///
    /// A kind can be registered once; a second registration is rejected and
    /// leaves the first in place.
    pub fn register<F, Fut>(&self, kind: &str, build: F) -> Result<(), FsError>
    where
        F: Fn(ServiceConfig) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ServiceRef, ServiceError>> + Send + 'static,
    {
        let mut factories = self.factories.write();
        if factories.contains_key(kind) {
            return Err(FsError::DuplicateKind(kind.to_string()));
        }
        let factory: Factory = Arc::new(
            move |config: ServiceConfig| -> BoxFuture<'static, Result<ServiceRef, ServiceError>> {
                Box::pin(build(config))
            },
        );
        factories.insert(kind.to_string(), factory);
        debug!(kind, "Registered service kind");
        Ok(())
    }

    /// Returns the constructor for `kind`.
    pub fn get(&self, kind: &str) -> Option<Factory> {
        self.factories.read().get(kind).cloned()
    }

    /// Returns the registered kinds, sorted.
    pub fn kinds(&self) -> Vec<String> {
        let mut kinds: Vec<String> = self.factories.read().keys().cloned().collect();
        kinds.sort();
        kinds
    }

    /// Constructs a service of `kind`.
    pub async fn create(&self, kind: &str, config: ServiceConfig) -> Result<ServiceRef, FsError> {
        // Clone the factory out so the lock is not held across the await.
        let factory = self
            .get(kind)
            .ok_or_else(|| FsError::UnsupportedService(kind.to_string()))?;
        Ok(factory(config).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use taskfs_core::{Service, TaskRef};

    struct Named(String);

    #[async_trait]
    impl Service for Named {
        fn name(&self) -> &str {
            &self.0
        }
        async fn list(&self) -> Result<Vec<TaskRef>, ServiceError> {
            Ok(Vec::new())
        }
    }

    fn named(config: ServiceConfig) -> impl Future<Output = Result<ServiceRef, ServiceError>> {
        async move {
            let name = config.base_url.unwrap_or_else(|| "default".to_string());
            Ok(Arc::new(Named(name)) as ServiceRef)
        }
    }

    #[tokio::test]
    async fn test_register_and_create() {
        let registry = Registry::new();
        registry.register("mock", named).unwrap();

        let svc = registry
            .create("mock", ServiceConfig::new("tok", Some("example.com".into())))
            .await
            .unwrap();
        assert_eq!(svc.name(), "example.com");
        assert_eq!(registry.kinds(), vec!["mock".to_string()]);
    }

    #[test]
    fn test_duplicate_kind_rejected() {
        let registry = Registry::new();
        registry.register("mock", named).unwrap();
        let err = registry.register("mock", named).unwrap_err();
        assert!(matches!(err, FsError::DuplicateKind(ref k) if k == "mock"));
    }

    #[tokio::test]
    async fn test_unknown_kind() {
        let registry = Registry::new();
        let err = match registry.create("jira", ServiceConfig::default()).await {
            Err(e) => e,
            Ok(_) => panic!("expected failure"),
        };
        assert_eq!(err.to_string(), "unsupported service type: jira");
    }

    #[tokio::test]
    async fn test_factory_error_propagates() {
        let registry = Registry::new();
        registry
            .register("broken", |_config| async {
                Err::<ServiceRef, _>(ServiceError::Config("base url is missing".into()))
            })
            .unwrap();
        let err = match registry.create("broken", ServiceConfig::default()).await {
            Err(e) => e,
            Ok(_) => panic!("expected failure"),
        };
        assert!(matches!(err, FsError::Backend(ServiceError::Config(_))));
    }
}

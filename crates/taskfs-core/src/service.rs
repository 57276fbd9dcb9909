//! Backend contract.
//!
//! A tracker client is exposed to the filesystem through three traits:
//! a [`Service`] lists the [`Task`]s visible to the configured account, and
//! each task lists its [`Comment`]s. Listing calls are network round trips
//! and may fail; every other accessor is a plain field read on data the
//! backend already fetched.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::time::Timestamp;

/// Errors reported by backend clients.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Rejected at construction time, before any network call
    #[error("{0}")]
    Config(String),

    /// Connection or protocol failure
    #[error("transport error: {0}")]
    Transport(String),

    /// Credentials rejected by the tracker
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Non-success HTTP status
    #[error("unexpected status {code}: {message}")]
    Status {
        /// HTTP status code
        code: u16,
        /// Response body or reason
        message: String,
    },

    /// Response body did not have the expected shape
    #[error("decode error: {0}")]
    Decode(String),

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Shared handle to a service.
pub type ServiceRef = Arc<dyn Service>;

/// Shared handle to a task.
pub type TaskRef = Arc<dyn Task>;

/// Shared handle to a comment.
pub type CommentRef = Arc<dyn Comment>;

/// A remote tracker account.
#[async_trait]
pub trait Service: Send + Sync {
    /// Name of the service; becomes the service directory name.
    fn name(&self) -> &str;

    /// Lists the tasks visible to this account, in backend order.
    async fn list(&self) -> Result<Vec<TaskRef>, ServiceError>;
}

/// A work item.
#[async_trait]
pub trait Task: Send + Sync {
    /// Identifier unique within the service; becomes the task directory name.
    fn key(&self) -> &str;

    /// One-line summary.
    fn subject(&self) -> &str;

    /// Description body.
    fn message(&self) -> &str;

    /// Web URL of the task.
    fn permalink(&self) -> &str;

    /// Creation time.
    fn creation(&self) -> Timestamp;

    /// Last modification time.
    fn last_mod(&self) -> Timestamp;

    /// Fetches the task's comments, oldest first.
    async fn comments(&self) -> Result<Vec<CommentRef>, ServiceError>;
}

/// A comment on a task.
pub trait Comment: Send + Sync {
    /// Backend identifier. Not used for file naming.
    fn key(&self) -> &str;

    /// Comment body.
    fn message(&self) -> &str;

    /// Creation time.
    fn creation(&self) -> Timestamp;

    /// Last modification time.
    fn last_mod(&self) -> Timestamp;
}

/// Arguments of the `add` control command, handed to a service factory.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ServiceConfig {
    /// Access token or API key
    pub token: String,
    /// Base URL of the tracker, when not the public default
    pub base_url: Option<String>,
}

impl ServiceConfig {
    /// Creates a configuration.
    pub fn new(token: impl Into<String>, base_url: Option<String>) -> Self {
        Self {
            token: token.into(),
            base_url,
        }
    }
}

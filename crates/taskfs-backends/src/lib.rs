//! taskfs backends - issue tracker clients.
//!
//! Each module implements the `Service`/`Task`/`Comment` contract from
//! `taskfs-core` over a tracker's REST API:
//! - `github`: issues assigned to the authenticated user
//! - `gitlab`: issues created by the authenticated user
//! - `backlog`: open, in-progress and resolved issues assigned to the API key owner

#![warn(missing_docs, rust_2018_idioms)]

pub mod backlog;
pub mod github;
pub mod gitlab;
mod http;

use std::sync::Arc;

use taskfs_core::{ServiceError, ServiceRef};
use taskfs_fs::{FsError, Registry};

pub use backlog::BacklogService;
pub use github::GithubService;
pub use gitlab::GitlabService;

/// Registers the `github`, `gitlab` and `backlog` kinds.
pub fn register_builtin(registry: &Registry) -> Result<(), FsError> {
    registry.register(github::KIND, |config| async move {
        let service = GithubService::new(&config)?;
        Ok::<ServiceRef, ServiceError>(Arc::new(service))
    })?;
    registry.register(gitlab::KIND, |config| async move {
        let service = GitlabService::new(&config)?;
        Ok::<ServiceRef, ServiceError>(Arc::new(service))
    })?;
    registry.register(backlog::KIND, |config| async move {
        let service = BacklogService::connect(&config).await?;
        Ok::<ServiceRef, ServiceError>(Arc::new(service))
    })?;
    Ok(())
}

//! GitHub issues assigned to the authenticated user.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use taskfs_core::{Comment, CommentRef, Service, ServiceConfig, ServiceError, Task, TaskRef, Timestamp};
use tracing::debug;

use crate::http::{next_link, Api, Auth};

/// Kind name used by `add github ...`.
pub const KIND: &str = "github";

const DEFAULT_BASE_URL: &str = "https://api.github.com/";
const DEFAULT_NAME: &str = "github.com";
const PER_PAGE: &str = "100";

#[derive(Debug, Deserialize)]
struct Login {
    login: String,
}

#[derive(Debug, Deserialize)]
struct RepositoryJson {
    name: String,
    owner: Login,
    #[serde(default)]
    organization: Option<Login>,
}

#[derive(Debug, Deserialize)]
struct IssueJson {
    number: u64,
    title: String,
    #[serde(default)]
    body: Option<String>,
    html_url: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    repository: RepositoryJson,
}

#[derive(Debug, Deserialize)]
struct CommentJson {
    id: u64,
    #[serde(default)]
    body: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

/// A GitHub account.
pub struct GithubService {
    api: Arc<Api>,
    name: String,
}

impl GithubService {
    /// Creates a client. An empty token means anonymous access.
    ///
    /// The service is named `github.com`, or after the host of a custom
    /// base URL.
    pub fn new(config: &ServiceConfig) -> Result<Self, ServiceError> {
        let auth = if config.token.is_empty() {
            Auth::None
        } else {
            Auth::Bearer(config.token.clone())
        };

        match config.base_url.as_deref().filter(|u| !u.is_empty()) {
            Some(base) => {
                let api = Api::new(base, auth)?;
                let name = api.host().to_string();
                Ok(Self {
                    api: Arc::new(api),
                    name,
                })
            }
            None => Ok(Self {
                api: Arc::new(Api::new(DEFAULT_BASE_URL, auth)?),
                name: DEFAULT_NAME.to_string(),
            }),
        }
    }
}

#[async_trait]
impl Service for GithubService {
    fn name(&self) -> &str {
        &self.name
    }

    async fn list(&self) -> Result<Vec<TaskRef>, ServiceError> {
        let mut tasks: Vec<TaskRef> = Vec::new();
        let mut url = self.api.url("issues")?;
        let mut query = vec![("per_page", PER_PAGE.to_string())];

        loop {
            let (page, headers): (Vec<IssueJson>, _) = self.api.get_json(url, &query).await?;
            tasks.extend(
                page.into_iter()
                    .map(|issue| Arc::new(GithubIssue::new(self.api.clone(), issue)) as TaskRef),
            );
            match next_link(&headers) {
                // The next link already carries every query parameter.
                Some(next) => {
                    url = next;
                    query.clear();
                }
                None => break,
            }
        }

        debug!(service = %self.name, count = tasks.len(), "Listed issues");
        Ok(tasks)
    }
}

/// A GitHub issue.
pub struct GithubIssue {
    api: Arc<Api>,
    key: String,
    owner: String,
    repo: String,
    number: u64,
    subject: String,
    message: String,
    permalink: String,
    creation: Timestamp,
    last_mod: Timestamp,
}

impl GithubIssue {
    fn new(api: Arc<Api>, issue: IssueJson) -> Self {
        let owner = issue
            .repository
            .organization
            .map(|org| org.login)
            .unwrap_or(issue.repository.owner.login);
        let repo = issue.repository.name;
        Self {
            api,
            key: format!("{}@{}#{}", repo, owner, issue.number),
            owner,
            repo,
            number: issue.number,
            subject: issue.title,
            message: issue.body.unwrap_or_default(),
            permalink: issue.html_url,
            creation: issue.created_at.into(),
            last_mod: issue.updated_at.into(),
        }
    }
}

#[async_trait]
impl Task for GithubIssue {
    fn key(&self) -> &str {
        &self.key
    }

    fn subject(&self) -> &str {
        &self.subject
    }

    fn message(&self) -> &str {
        &self.message
    }

    fn permalink(&self) -> &str {
        &self.permalink
    }

    fn creation(&self) -> Timestamp {
        self.creation
    }

    fn last_mod(&self) -> Timestamp {
        self.last_mod
    }

    async fn comments(&self) -> Result<Vec<CommentRef>, ServiceError> {
        let path = format!("repos/{}/{}/issues/{}/comments", self.owner, self.repo, self.number);
        let mut url = self.api.url(&path)?;
        let mut query = vec![("per_page", PER_PAGE.to_string())];
        let mut comments: Vec<CommentRef> = Vec::new();

        loop {
            let (page, headers): (Vec<CommentJson>, _) = self.api.get_json(url, &query).await?;
            comments.extend(
                page.into_iter()
                    .map(|c| Arc::new(GithubComment::from(c)) as CommentRef),
            );
            match next_link(&headers) {
                Some(next) => {
                    url = next;
                    query.clear();
                }
                None => break,
            }
        }

        Ok(comments)
    }
}

/// A comment on a GitHub issue.
pub struct GithubComment {
    key: String,
    message: String,
    creation: Timestamp,
    last_mod: Timestamp,
}

impl From<CommentJson> for GithubComment {
    fn from(c: CommentJson) -> Self {
        Self {
            key: c.id.to_string(),
            message: c.body.unwrap_or_default(),
            creation: c.created_at.into(),
            last_mod: c.updated_at.into(),
        }
    }
}

impl Comment for GithubComment {
    fn key(&self) -> &str {
        &self.key
    }

    fn message(&self) -> &str {
        &self.message
    }

    fn creation(&self) -> Timestamp {
        self.creation
    }

    fn last_mod(&self) -> Timestamp {
        self.last_mod
    }
}

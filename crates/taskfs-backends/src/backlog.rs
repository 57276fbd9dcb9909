//! Backlog issues assigned to the API key owner.
//!
//! Only issues in the Open, In Progress and Resolved states are listed.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use taskfs_core::{Comment, CommentRef, Service, ServiceConfig, ServiceError, Task, TaskRef, Timestamp};
use tracing::{debug, info};

use crate::http::{Api, Auth};

/// Kind name used by `add backlog ...`.
pub const KIND: &str = "backlog";

const API_KEY_PARAM: &str = "apiKey";
const COUNT: usize = 100;

/// Open, In Progress, Resolved.
const STATUSES: [u32; 3] = [1, 2, 3];

#[derive(Debug, Deserialize)]
struct UserJson {
    id: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IssueJson {
    issue_key: String,
    summary: String,
    #[serde(default)]
    description: Option<String>,
    created: DateTime<Utc>,
    #[serde(default)]
    updated: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct CommentJson {
    id: u64,
    #[serde(default)]
    content: Option<String>,
    created: DateTime<Utc>,
    #[serde(default)]
    updated: Option<DateTime<Utc>>,
}

/// A Backlog space, seen through one user's API key.
pub struct BacklogService {
    api: Arc<Api>,
    name: String,
    user_id: u64,
}

impl BacklogService {
    /// Connects to the space at the configured base URL and resolves the
    /// API key's owner.
    pub async fn connect(config: &ServiceConfig) -> Result<Self, ServiceError> {
        let base = config
            .base_url
            .as_deref()
            .filter(|u| !u.is_empty())
            .ok_or_else(|| ServiceError::Config("base url is missing".to_string()))?;
        let api = Api::new(base, Auth::Query(API_KEY_PARAM, config.token.clone()))?;
        let name = api.host().to_string();

        let url = api.url("api/v2/users/myself")?;
        let (user, _): (UserJson, _) = api.get_json(url, &[]).await?;
        info!(space = %name, user_id = user.id, "Connected to Backlog");

        Ok(Self {
            api: Arc::new(api),
            name,
            user_id: user.id,
        })
    }

    fn issue_query(&self, offset: usize) -> Vec<(&'static str, String)> {
        let mut query = vec![("assigneeId[]", self.user_id.to_string())];
        query.extend(STATUSES.iter().map(|s| ("statusId[]", s.to_string())));
        query.push(("count", COUNT.to_string()));
        query.push(("offset", offset.to_string()));
        query
    }
}

#[async_trait]
impl Service for BacklogService {
    fn name(&self) -> &str {
        &self.name
    }

    async fn list(&self) -> Result<Vec<TaskRef>, ServiceError> {
        let mut tasks: Vec<TaskRef> = Vec::new();

        loop {
            let url = self.api.url("api/v2/issues")?;
            let query = self.issue_query(tasks.len());
            let (issues, _): (Vec<IssueJson>, _) = self.api.get_json(url, &query).await?;
            let last = issues.len() < COUNT;
            tasks.extend(
                issues
                    .into_iter()
                    .map(|i| Arc::new(BacklogIssue::new(self.api.clone(), &self.name, i)) as TaskRef),
            );
            if last {
                break;
            }
        }

        debug!(service = %self.name, count = tasks.len(), "Listed issues");
        Ok(tasks)
    }
}

/// A Backlog issue.
pub struct BacklogIssue {
    api: Arc<Api>,
    key: String,
    subject: String,
    message: String,
    permalink: String,
    creation: Timestamp,
    last_mod: Timestamp,
}

impl BacklogIssue {
    fn new(api: Arc<Api>, host: &str, issue: IssueJson) -> Self {
        let creation = Timestamp::from(issue.created);
        Self {
            api,
            permalink: format!("https://{}/view/{}", host, issue.issue_key),
            key: issue.issue_key,
            subject: issue.summary,
            message: issue.description.unwrap_or_default(),
            creation,
            last_mod: issue.updated.map(Timestamp::from).unwrap_or(creation),
        }
    }
}

#[async_trait]
impl Task for BacklogIssue {
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
        let path = format!("api/v2/issues/{}/comments", self.key);
        let mut comments: Vec<CommentRef> = Vec::new();
        let mut min_id: Option<u64> = None;

        loop {
            let url = self.api.url(&path)?;
            let mut query = vec![("order", "asc".to_string()), ("count", COUNT.to_string())];
            if let Some(id) = min_id {
                query.push(("minId", id.to_string()));
            }
            let (page, _): (Vec<CommentJson>, _) = self.api.get_json(url, &query).await?;
            let last = page.len() < COUNT;

            // minId may be inclusive; drop anything already seen.
            let fresh: Vec<CommentJson> = page
                .into_iter()
                .filter(|c| min_id.map_or(true, |id| c.id > id))
                .collect();
            if fresh.is_empty() {
                break;
            }
            min_id = fresh.iter().map(|c| c.id).max();
            comments.extend(fresh.into_iter().map(|c| Arc::new(BacklogComment::from(c)) as CommentRef));
            if last {
                break;
            }
        }

        Ok(comments)
    }
}

/// A comment on a Backlog issue.
pub struct BacklogComment {
    key: String,
    message: String,
    creation: Timestamp,
    last_mod: Timestamp,
}

impl From<CommentJson> for BacklogComment {
    fn from(c: CommentJson) -> Self {
        let creation = Timestamp::from(c.created);
        Self {
            key: c.id.to_string(),
            message: c.content.unwrap_or_default(),
            creation,
            last_mod: c.updated.map(Timestamp::from).unwrap_or(creation),
        }
    }
}

impl Comment for BacklogComment {
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

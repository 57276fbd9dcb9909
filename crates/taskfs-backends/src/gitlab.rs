//! GitLab issues created by the authenticated user.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Deserialize;
use taskfs_core::{Comment, CommentRef, Service, ServiceConfig, ServiceError, Task, TaskRef, Timestamp};
use tracing::debug;

use crate::http::{next_page, Api, Auth};

/// Kind name used by `add gitlab ...`.
pub const KIND: &str = "gitlab";

const DEFAULT_BASE_URL: &str = "https://gitlab.com";
const TOKEN_HEADER: &str = "PRIVATE-TOKEN";
const NEXT_PAGE_HEADER: &str = "x-next-page";
const PER_PAGE: &str = "100";

#[derive(Debug, Deserialize)]
struct IssueJson {
    iid: u64,
    project_id: u64,
    title: String,
    #[serde(default)]
    description: Option<String>,
    web_url: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct NamespaceJson {
    name: String,
}

#[derive(Debug, Deserialize)]
struct ProjectJson {
    name: String,
    namespace: NamespaceJson,
}

#[derive(Debug, Deserialize)]
struct NoteJson {
    id: u64,
    #[serde(default)]
    body: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

/// A GitLab account.
pub struct GitlabService {
    api: Arc<Api>,
    name: String,
    /// Projects already fetched, by id
    projects: Mutex<HashMap<u64, Arc<ProjectJson>>>,
}

impl GitlabService {
    /// Creates a client for `gitlab.com` or a self-hosted instance.
    pub fn new(config: &ServiceConfig) -> Result<Self, ServiceError> {
        let base = config
            .base_url
            .as_deref()
            .filter(|u| !u.is_empty())
            .unwrap_or(DEFAULT_BASE_URL);
        let api = Api::new(base, Auth::Header(TOKEN_HEADER, config.token.clone()))?;
        let name = api.host().to_string();
        Ok(Self {
            api: Arc::new(api),
            name,
            projects: Mutex::new(HashMap::new()),
        })
    }

    async fn project(&self, id: u64) -> Result<Arc<ProjectJson>, ServiceError> {
        let cached = self.projects.lock().get(&id).cloned();
        if let Some(project) = cached {
            return Ok(project);
        }

        let url = self.api.url(&format!("api/v4/projects/{id}"))?;
        let (project, _): (ProjectJson, _) = self.api.get_json(url, &[]).await?;
        let project = Arc::new(project);
        self.projects.lock().insert(id, project.clone());
        Ok(project)
    }
}

#[async_trait]
impl Service for GitlabService {
    fn name(&self) -> &str {
        &self.name
    }

    async fn list(&self) -> Result<Vec<TaskRef>, ServiceError> {
        let mut tasks: Vec<TaskRef> = Vec::new();
        let mut page = 1;

        loop {
            let url = self.api.url("api/v4/issues")?;
            let query = [
                ("per_page", PER_PAGE.to_string()),
                ("page", page.to_string()),
            ];
            let (issues, headers): (Vec<IssueJson>, _) = self.api.get_json(url, &query).await?;
            for issue in issues {
                let project = self.project(issue.project_id).await?;
                tasks.push(Arc::new(GitlabIssue::new(self.api.clone(), &project, issue)));
            }
            match next_page(&headers, NEXT_PAGE_HEADER) {
                Some(next) => page = next,
                None => break,
            }
        }

        debug!(service = %self.name, count = tasks.len(), "Listed issues");
        Ok(tasks)
    }
}

/// A GitLab issue.
pub struct GitlabIssue {
    api: Arc<Api>,
    key: String,
    project_id: u64,
    iid: u64,
    subject: String,
    message: String,
    permalink: String,
    creation: Timestamp,
    last_mod: Timestamp,
}

impl GitlabIssue {
    fn new(api: Arc<Api>, project: &ProjectJson, issue: IssueJson) -> Self {
        Self {
            api,
            key: format!("{}@{}#{}", project.namespace.name, project.name, issue.iid),
            project_id: issue.project_id,
            iid: issue.iid,
            subject: issue.title,
            message: issue.description.unwrap_or_default(),
            permalink: issue.web_url,
            creation: issue.created_at.into(),
            last_mod: issue.updated_at.into(),
        }
    }
}

#[async_trait]
impl Task for GitlabIssue {
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
        let path = format!("api/v4/projects/{}/issues/{}/notes", self.project_id, self.iid);
        let mut comments: Vec<CommentRef> = Vec::new();
        let mut page = 1;

        loop {
            let url = self.api.url(&path)?;
            let query = [
                ("sort", "asc".to_string()),
                ("per_page", PER_PAGE.to_string()),
                ("page", page.to_string()),
            ];
            let (notes, headers): (Vec<NoteJson>, _) = self.api.get_json(url, &query).await?;
            comments.extend(notes.into_iter().map(|n| Arc::new(GitlabNote::from(n)) as CommentRef));
            match next_page(&headers, NEXT_PAGE_HEADER) {
                Some(next) => page = next,
                None => break,
            }
        }

        Ok(comments)
    }
}

/// A note on a GitLab issue.
pub struct GitlabNote {
    key: String,
    message: String,
    creation: Timestamp,
    last_mod: Timestamp,
}

impl From<NoteJson> for GitlabNote {
    fn from(n: NoteJson) -> Self {
        Self {
            key: n.id.to_string(),
            message: n.body.unwrap_or_default(),
            creation: n.created_at.into(),
            last_mod: n.updated_at.into(),
        }
    }
}

impl Comment for GitlabNote {
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_issue_from_json() {
        let issue: IssueJson = serde_json::from_str(
            r#"{
                "id": 900,
                "iid": 12,
                "project_id": 5,
                "title": "Flaky pipeline",
                "description": "It fails on Tuesdays",
                "web_url": "https://gitlab.com/tools/ci/-/issues/12",
                "created_at": "2023-05-01T10:00:00.000Z",
                "updated_at": "2023-05-02T10:00:00.000Z"
            }"#,
        )
        .unwrap();
        let project: ProjectJson = serde_json::from_str(
            r#"{"id": 5, "name": "ci", "namespace": {"id": 1, "name": "tools"}}"#,
        )
        .unwrap();

        let api = Arc::new(Api::new(DEFAULT_BASE_URL, Auth::None).unwrap());
        let issue = GitlabIssue::new(api, &project, issue);
        assert_eq!(issue.key(), "tools@ci#12");
        assert_eq!(issue.message(), "It fails on Tuesdays");
        assert_eq!(issue.permalink(), "https://gitlab.com/tools/ci/-/issues/12");
    }

    #[test]
    fn test_note_without_body() {
        let note: NoteJson = serde_json::from_str(
            r#"{"id": 3, "body": null, "created_at": "2023-05-01T10:00:00Z", "updated_at": "2023-05-01T11:00:00Z"}"#,
        )
        .unwrap();
        let note = GitlabNote::from(note);
        assert_eq!(note.message(), "");
        assert!(note.creation() < note.last_mod());
    }

    #[test]
    fn test_service_name() {
        let service = GitlabService::new(&ServiceConfig::new("t", None)).unwrap();
        assert_eq!(service.name(), "gitlab.com");
    }
}

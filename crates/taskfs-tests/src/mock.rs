//! In-memory backend for tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use taskfs_core::{Comment, CommentRef, Service, ServiceError, Task, TaskRef, Timestamp};
use tracing::debug;

/// A comment with fixed content.
#[derive(Debug, Clone)]
pub struct MockComment {
    key: String,
    message: String,
    creation: Timestamp,
    last_mod: Timestamp,
}

impl MockComment {
    /// Creates a comment.
    pub fn new(key: impl Into<String>, message: impl Into<String>, at: Timestamp) -> Self {
        Self {
            key: key.into(),
            message: message.into(),
            creation: at,
            last_mod: at,
        }
    }
}

impl Comment for MockComment {
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

/// A task with fixed fields and comments.
pub struct MockTask {
    key: String,
    subject: String,
    message: String,
    permalink: String,
    creation: Timestamp,
    last_mod: Timestamp,
    comments: Vec<MockComment>,
    /// Number of `comments()` calls
    comment_calls: AtomicUsize,
    /// When set, `comments()` fails
    failing: AtomicBool,
}

impl MockTask {
    /// Creates a task without comments.
    pub fn new(key: impl Into<String>, subject: impl Into<String>, message: impl Into<String>) -> Self {
        let key = key.into();
        Self {
            permalink: format!("https://tracker.test/{key}"),
            key,
            subject: subject.into(),
            message: message.into(),
            creation: Timestamp::new(1_700_000_000_000),
            last_mod: Timestamp::new(1_700_000_600_000),
            comments: Vec::new(),
            comment_calls: AtomicUsize::new(0),
            failing: AtomicBool::new(false),
        }
    }

    /// Adds a comment.
    pub fn with_comment(mut self, message: impl Into<String>) -> Self {
        let n = self.comments.len() + 1;
        let at = Timestamp::new(self.last_mod.as_millis() + n as i64 * 1000);
        self.comments.push(MockComment::new(format!("c{n}"), message, at));
        self
    }

    /// Overrides the permalink.
    pub fn with_permalink(mut self, permalink: impl Into<String>) -> Self {
        self.permalink = permalink.into();
        self
    }

    /// Makes subsequent comment fetches fail or succeed.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Returns how many times comments were fetched.
    pub fn comment_calls(&self) -> usize {
        self.comment_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Task for MockTask {
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
        let calls = self.comment_calls.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(task = %self.key, calls, "Mock comment fetch");
        if self.failing.load(Ordering::SeqCst) {
            return Err(ServiceError::Transport("connection reset".to_string()));
        }
        Ok(self
            .comments
            .iter()
            .cloned()
            .map(|c| Arc::new(c) as CommentRef)
            .collect())
    }
}

/// A service serving a replaceable list of tasks.
pub struct MockService {
    name: String,
    tasks: Mutex<Vec<Arc<MockTask>>>,
    /// Number of `list()` calls
    list_calls: AtomicUsize,
    /// When set, `list()` fails
    failing: AtomicBool,
    /// Artificial latency of `list()`
    delay: Mutex<Option<Duration>>,
}

impl MockService {
    /// Creates a service with no tasks.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tasks: Mutex::new(Vec::new()),
            list_calls: AtomicUsize::new(0),
            failing: AtomicBool::new(false),
            delay: Mutex::new(None),
        }
    }

    /// Replaces the tasks served by the next listing.
    pub fn set_tasks(&self, tasks: Vec<MockTask>) {
        *self.tasks.lock() = tasks.into_iter().map(Arc::new).collect();
    }

    /// Returns the task currently served under `key`.
    pub fn task(&self, key: &str) -> Option<Arc<MockTask>> {
        self.tasks.lock().iter().find(|t| t.key() == key).cloned()
    }

    /// Makes subsequent listings fail or succeed.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Delays subsequent listings.
    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.lock() = delay;
    }

    /// Returns how many times tasks were listed.
    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Service for MockService {
    fn name(&self) -> &str {
        &self.name
    }

    async fn list(&self) -> Result<Vec<TaskRef>, ServiceError> {
        let calls = self.list_calls.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(service = %self.name, calls, "Mock listing");

        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(ServiceError::Transport("connection refused".to_string()));
        }

        Ok(self
            .tasks
            .lock()
            .iter()
            .map(|t| t.clone() as TaskRef)
            .collect())
    }
}

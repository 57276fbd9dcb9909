//! Node tree integration tests.
//!
//! Tests for the synthetic tree including:
//! - Root listings over the active services
//! - Snapshot identity and backend call counts in service directories
//! - Refresh generations
//! - Task directory layout and content

use std::sync::Arc;
use std::time::Duration;

use taskfs_fs::{FsError, Node};
use taskfs_tests::harness::{child, names};
use taskfs_tests::{MockTask, TestTree};

/// Initialize tracing for tests.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("taskfs_tests=debug,taskfs_fs=debug")
        .with_test_writer()
        .try_init();
}

fn sample_tasks() -> Vec<MockTask> {
    vec![
        MockTask::new("widget@acme#1", "Crash on start", "Stack trace attached.\n")
            .with_comment("Reproduced.")
            .with_comment("Fixed in main."),
        MockTask::new("widget@acme#2", "  padded subject  ", ""),
    ]
}

#[tokio::test]
async fn test_root_lists_services_and_ctl() {
    init_tracing();

    let tree = TestTree::new();
    assert_eq!(names(&tree.root).await, vec!["ctl"]);

    tree.write_root_ctl("add github tok\nadd gitlab tok\n").await.unwrap();
    tree.write_root_ctl("add backlog key https://space.example.com\n")
        .await
        .unwrap();

    let mut listed = names(&tree.root).await;
    assert_eq!(listed.pop().as_deref(), Some("ctl"));
    listed.sort();
    assert_eq!(listed, vec!["github.test", "gitlab.test", "https:%2F%2Fspace.example.com"]);

    // Listing twice yields the same set.
    let mut again = names(&tree.root).await;
    again.pop();
    again.sort();
    assert_eq!(again, listed);
}

#[tokio::test]
async fn test_service_listing_is_cached() {
    init_tracing();

    let tree = TestTree::new();
    let backend = tree.backend("github.test");
    backend.set_tasks(sample_tasks());
    tree.write_root_ctl("add github tok\n").await.unwrap();

    let dir = child(&tree.root, "github.test").await.unwrap();
    let first = dir.list_children().await.unwrap();
    let second = dir.list_children().await.unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    for (a, b) in first.iter().zip(second.iter()) {
        assert!(Arc::ptr_eq(a, b));
    }
    assert_eq!(backend.list_calls(), 1);

    let listed: Vec<&str> = first.iter().map(|c| c.stat().name()).collect();
    assert_eq!(listed, vec!["widget@acme#1", "widget@acme#2", "ctl"]);
    assert!(first[2].is_control());
}

#[tokio::test]
async fn test_refresh_starts_new_generation() {
    init_tracing();

    let tree = TestTree::new();
    let backend = tree.backend("github.test");
    backend.set_tasks(sample_tasks());
    tree.write_root_ctl("add github tok\n").await.unwrap();

    let dir = child(&tree.root, "github.test").await.unwrap();
    let first = dir.list_children().await.unwrap();

    tree.write_service_ctl("github.test", "refresh\n").await.unwrap();
    assert!(!dir.as_service().unwrap().is_loaded().await);

    let second = dir.list_children().await.unwrap();
    assert_eq!(backend.list_calls(), 2);
    assert!(!Arc::ptr_eq(&first, &second));
    assert!(!Arc::ptr_eq(&first[0], &second[0]));
    assert_eq!(first.len(), second.len());

    // Arguments to refresh are ignored.
    tree.write_service_ctl("github.test", "refresh now please\n").await.unwrap();
    dir.list_children().await.unwrap();
    assert_eq!(backend.list_calls(), 3);
}

#[tokio::test]
async fn test_refresh_picks_up_new_tasks() {
    init_tracing();

    let tree = TestTree::new();
    let backend = tree.backend("gitlab.test");
    tree.write_root_ctl("add gitlab tok\n").await.unwrap();

    let dir = child(&tree.root, "gitlab.test").await.unwrap();
    assert_eq!(names(&dir).await, vec!["ctl"]);

    backend.set_tasks(sample_tasks());
    assert_eq!(names(&dir).await, vec!["ctl"]);

    dir.as_service().unwrap().refresh().await;
    assert_eq!(names(&dir).await, vec!["widget@acme#1", "widget@acme#2", "ctl"]);
}

#[tokio::test]
async fn test_failed_listing_is_not_cached() {
    init_tracing();

    let tree = TestTree::new();
    let backend = tree.backend("github.test");
    backend.set_tasks(sample_tasks());
    backend.set_failing(true);
    tree.write_root_ctl("add github tok\n").await.unwrap();

    let dir = child(&tree.root, "github.test").await.unwrap();
    let err = match dir.list_children().await {
        Err(err) => err,
        Ok(children) => panic!("listing succeeded: {children:?}"),
    };
    assert!(matches!(err, FsError::Backend(_)));
    assert_eq!(err.errno(), libc::EIO);
    assert!(!dir.as_service().unwrap().is_loaded().await);

    backend.set_failing(false);
    let children = dir.list_children().await.unwrap();
    assert_eq!(children.len(), 3);
    assert_eq!(backend.list_calls(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_listing_builds_one_snapshot() {
    init_tracing();

    let tree = TestTree::new();
    let backend = tree.backend("github.test");
    backend.set_tasks(sample_tasks());
    backend.set_delay(Some(Duration::from_millis(50)));
    tree.write_root_ctl("add github tok\n").await.unwrap();

    let dir = child(&tree.root, "github.test").await.unwrap();
    let listings = futures::future::join_all((0..8).map(|_| {
        let dir = dir.clone();
        tokio::spawn(async move { dir.list_children().await.unwrap() })
    }))
    .await;

    let first = listings[0].as_ref().unwrap().clone();
    for listing in &listings {
        assert!(Arc::ptr_eq(&first, listing.as_ref().unwrap()));
    }
    assert_eq!(backend.list_calls(), 1);
}

#[tokio::test]
async fn test_task_directory_layout() {
    init_tracing();

    let tree = TestTree::new();
    let backend = tree.backend("github.test");
    backend.set_tasks(sample_tasks());
    tree.write_root_ctl("add github tok\n").await.unwrap();

    let service = child(&tree.root, "github.test").await.unwrap();
    let task = child(&service, "widget@acme#1").await.unwrap();
    assert_eq!(names(&task).await, vec!["subject", "message", "url", "1", "2"]);

    let read = |node: Option<Arc<Node>>| node.unwrap().read_content().unwrap();
    assert_eq!(&read(child(&task, "subject").await)[..], b"Crash on start");
    assert_eq!(&read(child(&task, "message").await)[..], b"Stack trace attached.\n");
    assert_eq!(
        &read(child(&task, "url").await)[..],
        b"https://tracker.test/widget@acme#1"
    );
    assert_eq!(&read(child(&task, "1").await)[..], b"Reproduced.");
    assert_eq!(&read(child(&task, "2").await)[..], b"Fixed in main.");

    // Comments are fetched once per task directory.
    names(&task).await;
    assert_eq!(backend.task("widget@acme#1").unwrap().comment_calls(), 1);
}

#[tokio::test]
async fn test_failed_comment_fetch_is_not_cached() {
    init_tracing();

    let tree = TestTree::new();
    let backend = tree.backend("github.test");
    backend.set_tasks(sample_tasks());
    tree.write_root_ctl("add github tok\n").await.unwrap();

    let service = child(&tree.root, "github.test").await.unwrap();
    let task = child(&service, "widget@acme#1").await.unwrap();
    let mock = backend.task("widget@acme#1").unwrap();
    mock.set_failing(true);

    let Err(err) = task.list_children().await else {
        panic!("comment fetch should fail");
    };
    assert!(matches!(err, FsError::Backend(_)));
    assert_eq!(err.errno(), libc::EIO);
    assert!(!task.as_task().unwrap().is_loaded().await);

    mock.set_failing(false);
    assert_eq!(names(&task).await, vec!["subject", "message", "url", "1", "2"]);
    assert!(task.as_task().unwrap().is_loaded().await);
    assert_eq!(mock.comment_calls(), 2);

    // The service listing was not touched by the task failure.
    assert_eq!(backend.list_calls(), 1);
}

#[tokio::test]
async fn test_content_is_verbatim() {
    init_tracing();

    let tree = TestTree::new();
    tree.backend("github.test").set_tasks(sample_tasks());
    tree.write_root_ctl("add github tok\n").await.unwrap();

    let service = child(&tree.root, "github.test").await.unwrap();
    let task = child(&service, "widget@acme#2").await.unwrap();
    assert_eq!(names(&task).await, vec!["subject", "message", "url"]);

    let subject = child(&task, "subject").await.unwrap();
    assert_eq!(&subject.read_content().unwrap()[..], b"  padded subject  ");
    assert_eq!(subject.stat().size(), 18);

    let message = child(&task, "message").await.unwrap();
    assert!(message.read_content().unwrap().is_empty());
    assert_eq!(message.stat().perm(), 0o644);
}

#[tokio::test]
async fn test_colliding_task_keys() {
    init_tracing();

    let tree = TestTree::new();
    tree.backend("github.test").set_tasks(vec![
        MockTask::new("dup", "first", ""),
        MockTask::new("dup", "second", ""),
        MockTask::new("ctl", "reserved", ""),
        MockTask::new("a/b", "slash", ""),
    ]);
    tree.write_root_ctl("add github tok\n").await.unwrap();

    let service = child(&tree.root, "github.test").await.unwrap();
    assert_eq!(names(&service).await, vec!["dup", "dup~2", "ctl~2", "a%2Fb", "ctl"]);

    let second = child(&service, "dup~2").await.unwrap();
    let subject = child(&second, "subject").await.unwrap();
    assert_eq!(&subject.read_content().unwrap()[..], b"second");
}

#[tokio::test]
async fn test_files_have_no_children() {
    init_tracing();

    let tree = TestTree::new();
    tree.backend("github.test").set_tasks(sample_tasks());
    tree.write_root_ctl("add github tok\n").await.unwrap();

    let service = child(&tree.root, "github.test").await.unwrap();
    let task = child(&service, "widget@acme#1").await.unwrap();
    let subject = child(&task, "subject").await.unwrap();

    assert!(matches!(subject.list_children().await, Err(FsError::Protocol)));
    assert!(matches!(task.read_content(), Err(FsError::Protocol)));
    assert!(matches!(
        subject.write_content(b"x").await,
        Err(FsError::PermissionDenied)
    ));
}

//! Control file integration tests.
//!
//! Tests for the line protocol including:
//! - Verb dispatch and unknown verbs
//! - Blank-line batch termination
//! - `add` argument validation and last-write-wins replacement

use std::sync::Arc;

use taskfs_core::ServiceConfig;
use taskfs_fs::FsError;
use taskfs_tests::harness::{child, names};
use taskfs_tests::{MockTask, TestTree};

/// Initialize tracing for tests.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("taskfs_tests=debug,taskfs_fs=debug")
        .with_test_writer()
        .try_init();
}

#[tokio::test]
async fn test_unknown_verb() {
    init_tracing();

    let tree = TestTree::new();
    let err = tree.write_root_ctl("bogus\n").await.unwrap_err();
    assert!(matches!(err, FsError::UnknownCommand(ref verb) if verb == "bogus"));
    assert_eq!(err.to_string(), "unknown control command");
    assert!(tree.root_dir().service_names().is_empty());

    // `refresh` belongs to service directories only.
    let err = tree.write_root_ctl("refresh\n").await.unwrap_err();
    assert!(matches!(err, FsError::UnknownCommand(_)));
}

#[tokio::test]
async fn test_blank_line_ends_batch() {
    init_tracing();

    let tree = TestTree::new();
    tree.write_root_ctl("add github tok\n\nadd gitlab tok2\n")
        .await
        .unwrap();

    assert_eq!(tree.root_dir().service_names(), vec!["github.test"]);
    let configs = tree.configs();
    assert_eq!(configs.len(), 1);
    assert_eq!(configs[0].0, "github");
    assert_eq!(configs[0].1, ServiceConfig::new("tok", None));
}

#[tokio::test]
async fn test_whitespace_only_line_ends_batch() {
    init_tracing();

    let tree = TestTree::new();
    tree.write_root_ctl("add github tok\n \t \nadd gitlab tok2")
        .await
        .unwrap();
    assert_eq!(tree.root_dir().service_names(), vec!["github.test"]);
}

#[tokio::test]
async fn test_lines_run_in_order() {
    init_tracing();

    let tree = TestTree::new();
    tree.write_root_ctl("add github tok\n  add   gitlab\ttok2  https://git.example.com \n")
        .await
        .unwrap();

    let configs = tree.configs();
    assert_eq!(configs[0].0, "github");
    assert_eq!(configs[1].0, "gitlab");
    assert_eq!(
        configs[1].1,
        ServiceConfig::new("tok2", Some("https://git.example.com".to_string()))
    );
}

#[tokio::test]
async fn test_failure_aborts_remaining_lines() {
    init_tracing();

    let tree = TestTree::new();
    let err = tree
        .write_root_ctl("add github tok\nadd jira tok\nadd gitlab tok\n")
        .await
        .unwrap_err();

    assert!(matches!(err, FsError::UnsupportedService(ref kind) if kind == "jira"));
    assert_eq!(err.to_string(), "unsupported service type: jira");
    // The line before the failure stays applied.
    assert_eq!(tree.root_dir().service_names(), vec!["github.test"]);
}

#[tokio::test]
async fn test_add_argument_count() {
    init_tracing();

    let tree = TestTree::new();
    for line in ["add\n", "add github\n", "add github tok url extra\n"] {
        let err = tree.write_root_ctl(line).await.unwrap_err();
        assert!(matches!(err, FsError::InvalidCommand(_)), "{line:?}");
        assert_eq!(err.to_string(), "invalid add command");
        assert_eq!(err.errno(), libc::EINVAL);
    }
    assert!(tree.root_dir().service_names().is_empty());
    assert!(tree.configs().is_empty());
}

#[tokio::test]
async fn test_unsupported_kind_leaves_services() {
    init_tracing();

    let tree = TestTree::new();
    tree.write_root_ctl("add github tok\n").await.unwrap();
    let before = names(&tree.root).await;

    let err = tree.write_root_ctl("add unknownkind tok\n").await.unwrap_err();
    assert!(matches!(err, FsError::UnsupportedService(_)));
    assert_eq!(names(&tree.root).await, before);
}

#[tokio::test]
async fn test_duplicate_add_replaces_service() {
    init_tracing();

    let tree = TestTree::new();
    let url = "https://example.com";
    tree.backend(url).set_tasks(vec![MockTask::new("BLG-1", "first", "")]);

    tree.write_root_ctl(&format!("add backlog tok {url}\n")).await.unwrap();
    let first = tree.root_dir().service(url).unwrap();
    first.list_children().await.unwrap();

    tree.write_root_ctl(&format!("add backlog tok2 {url}\n")).await.unwrap();
    let second = tree.root_dir().service(url).unwrap();

    assert!(!Arc::ptr_eq(&first, &second));
    assert_eq!(tree.root_dir().service_names(), vec![url]);
    assert_eq!(tree.configs()[1].1.token, "tok2");

    // The replacement starts without a cached listing.
    assert!(!second.as_service().unwrap().is_loaded().await);
    let root_names = names(&tree.root).await;
    assert_eq!(root_names, vec!["https:%2F%2Fexample.com", "ctl"]);
}

#[tokio::test]
async fn test_service_named_ctl() {
    init_tracing();

    let tree = TestTree::new();
    tree.write_root_ctl("add github tok ctl\n").await.unwrap();
    assert_eq!(names(&tree.root).await, vec!["ctl~2", "ctl"]);

    let dir = child(&tree.root, "ctl~2").await.unwrap();
    assert!(dir.as_service().is_some());
    assert_eq!(dir.as_service().unwrap().service().name(), "ctl");
}

#[tokio::test]
async fn test_suffixed_service_names_do_not_collide() {
    init_tracing();

    let tree = TestTree::new();
    tree.write_root_ctl("add github tok ctl\nadd github tok ctl~2\n")
        .await
        .unwrap();
    assert_eq!(names(&tree.root).await, vec!["ctl~2", "ctl~2~2", "ctl"]);

    let first = child(&tree.root, "ctl~2").await.unwrap();
    assert_eq!(first.as_service().unwrap().service().name(), "ctl");
    let second = child(&tree.root, "ctl~2~2").await.unwrap();
    assert_eq!(second.as_service().unwrap().service().name(), "ctl~2");
}

#[tokio::test]
async fn test_ctl_reads_empty() {
    init_tracing();

    let tree = TestTree::new();
    let ctl = child(&tree.root, "ctl").await.unwrap();
    assert!(ctl.read_content().unwrap().is_empty());
    assert_eq!(ctl.stat().size(), 0);
    assert_eq!(ctl.stat().perm(), 0o644);
}

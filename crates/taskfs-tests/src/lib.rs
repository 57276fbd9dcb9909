//! Integration tests for taskfs.
//!
//! This crate provides:
//! - In-memory mock services with call counters and failure injection
//! - A harness wiring mock kinds into a registry and a root directory
//! - Integration tests for the node tree, control files and the kernel bridge

pub mod harness;
pub mod mock;

pub use harness::TestTree;
pub use mock::{MockComment, MockService, MockTask};

//! taskfs core - types and traits shared by the taskfs crates.
//!
//! This crate provides:
//! - The backend contract (`Service`, `Task`, `Comment`) every tracker client implements
//! - `Timestamp`, the time representation carried by every file
//! - Filesystem-safe escaping of backend-provided names
//! - Fixed names of the synthetic files

#![deny(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

pub mod name;
pub mod service;
pub mod time;

pub use name::{escape_name, NameAllocator};
pub use service::{Comment, CommentRef, Service, ServiceConfig, ServiceError, ServiceRef, Task, TaskRef};
pub use time::Timestamp;

/// Name of the control file found in the root and in every service directory.
pub const CTL_FILE: &str = "ctl";

/// File holding a task's subject line.
pub const SUBJECT_FILE: &str = "subject";

/// File holding a task's description.
pub const MESSAGE_FILE: &str = "message";

/// File holding a task's permalink.
pub const URL_FILE: &str = "url";

/// Default mount point when none is given on the command line.
pub const DEFAULT_MOUNT_POINT: &str = "/mnt/taskfs";

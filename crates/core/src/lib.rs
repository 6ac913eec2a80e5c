pub mod domain;
pub mod error;

pub use domain::branch::{slugify, BranchPattern, DEFAULT_BRANCH_PATTERN};
pub use domain::task::{validate_task_key, Priority, TaskBatch, TaskDescriptor};
pub use error::{CoreError, Result};

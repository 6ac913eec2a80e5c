pub mod error;
pub mod git;
pub mod provisioner;
pub mod shadow;
pub mod traits;

pub use error::{Result, VcsError};
pub use git::GitVcs;
pub use provisioner::{workspace_path, ProvisionRequest, Provisioner, RemoveOutcome};
pub use shadow::CopyMethod;
pub use traits::{Workspace, WorkspaceMode};

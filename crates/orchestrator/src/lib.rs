pub mod artifacts;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod fleet;
pub mod launcher;
pub mod lifecycle;
pub mod locks;
pub mod paths;
pub mod runner;
pub mod session;
pub mod state;
pub mod state_store;

pub use artifacts::{
    read_completion_status, CompletionRead, CompletionState, CompletionStatus, TaskContext,
};
pub use config::{
    FleetConfig, ResolvedConfig, SessionSettings, TaskConfigOverrides, WorkspaceSettings,
};
pub use coordinator::{Coordinator, WorkspacePlan};
pub use error::{OrchestratorError, Result};
pub use fleet::Fleet;
pub use launcher::{LaunchFailure, LaunchOutcome, LaunchResult, PreparedTask, SessionLauncher};
pub use lifecycle::{
    CleanupReport, LifecycleManager, ResourceFailure, RunStatusReport, RunSummary, TaskStatusReport,
};
pub use locks::{FileLockRegistry, LockEntry, LockRegistry};
pub use paths::{CoordinationDir, COORDINATION_DIR};
pub use runner::{BatchReport, Orchestrator, RunOptions};
pub use session::{
    session_name, BackendChoice, BackendKind, ProcessBackend, SessionBackend, TmuxBackend,
};
pub use state::{FailureStage, OrchestrationState, OrchestrationStatus, SessionRecord, TaskOutcome};
pub use state_store::{generate_session_id, StateStore};

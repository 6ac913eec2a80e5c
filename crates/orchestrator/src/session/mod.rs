//! Session backends: where a specialist process runs once launched.

mod backend;
mod process;
mod tmux;

pub use backend::{
    backend_for_kind, select_backend, session_name, BackendChoice, BackendKind, SessionBackend,
};
pub use process::ProcessBackend;
pub use tmux::TmuxBackend;

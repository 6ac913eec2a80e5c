pub mod branch;
pub mod task;

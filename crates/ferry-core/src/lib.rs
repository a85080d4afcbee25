//! Core types for ferry.
//!
//! Everything a scheduler or filesystem backend needs to agree on lives here:
//! the job description handed to backends, the generic job state, the two
//! backend traits and the on-disk layout every backend leaves behind.

pub mod description;
pub mod error;
pub mod filesystem;
pub mod layout;
pub mod scheduler;
pub mod state;

pub use description::JobDescription;
pub use error::{FileSystemError, SchedulerError};
pub use filesystem::FileSystem;
pub use layout::{KILLED_RETURNCODE, RETURNCODE_FILE, STDERR_FILE, STDOUT_FILE};
pub use scheduler::Scheduler;
pub use state::State;

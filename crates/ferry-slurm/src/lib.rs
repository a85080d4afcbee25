//! Slurm integration for ferry.
//!
//! Submit with sbatch, query with squeue and sacct, cancel with scancel. The
//! commands run through a [`ferry_runner::CommandRunner`], so they work the same
//! on a login node reached over SSH as on the local host.

pub mod sacct;
pub mod scheduler;
pub mod script;
pub mod squeue;
pub mod types;

pub use scheduler::SlurmScheduler;
pub use script::{SlurmConfig, render_script};
pub use types::{SLURM_STATES, SlurmJob, map_slurm_state};

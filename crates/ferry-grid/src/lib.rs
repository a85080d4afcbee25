//! Grid backends for ferry.
//!
//! Jobs go to a grid workload management system and their files to grid
//! storage, both through the DIRAC command line client. The client is run on
//! this host or, for the scheduler, on a configured host over SSH.

pub mod jdl;
pub mod scheduler;
pub mod status;
pub mod storage;
pub mod types;

pub use jdl::{GridConfig, render_jdl, render_job_script};
pub use scheduler::GridScheduler;
pub use status::{parse_job_status, query_job_status};
pub use storage::{GridStorage, GridStorageConfig, INPUT_ARCHIVE, OUTPUT_ARCHIVE};
pub use types::{GRID_STATES, GridJob, map_grid_state};

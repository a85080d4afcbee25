//! Scheduler backends that execute jobs on this host.
//!
//! - [`MemoryScheduler`]: a fixed pool of worker tasks fed by one FIFO.
//! - [`EagerScheduler`]: runs the job inside `submit`, guarded by host load.
//! - [`QueueScheduler`]: hands jobs to a durable queue drained by
//!   [`run_queue_worker`] in a separate process.
//!
//! All three run the command with [`run_job_process`], which leaves the
//! standard stdout/stderr/returncode files in the job directory.

pub mod eager;
pub mod memory;
pub mod process;
pub mod queue;
pub mod redis_queue;

pub use eager::{EagerConfig, EagerScheduler};
pub use memory::{MemoryConfig, MemoryScheduler};
pub use process::{Outcome, run_job_process};
pub use queue::{
    JobQueue, JobResult, QueueConfig, QueueError, QueueScheduler, QueueStatus, QueuedJob,
    run_queue_worker,
};
pub use redis_queue::RedisJobQueue;

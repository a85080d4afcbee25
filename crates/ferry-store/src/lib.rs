//! Job records and where they are kept.

pub mod store;
pub mod types;

pub use store::{JobStore, JsonJobStore, MemoryJobStore, StoreError};
pub use types::{JobRecord, JobsState};

//! Dispatching jobs to destinations.
//!
//! Loads the destination config, picks a destination for each new job,
//! submits it there and keeps the stored job state in step with what the
//! destination's scheduler reports. Output is copied back by a single
//! background staging consumer so request handling never waits on a download.

pub mod config;
pub mod context;
pub mod destination;
pub mod error;
pub mod picker;
pub mod reconcile;
pub mod staging;
pub mod submit;

#[cfg(test)]
pub(crate) mod testing;

pub use config::{
    ApplicationConfig, Config, ConfigError, DestinationConfig, DestinationsConfig,
    FileSystemConfig, SchedulerConfig,
};
pub use context::Context;
pub use destination::{Destination, Destinations};
pub use error::DispatchError;
pub use picker::{DestinationPicker, PickError, PickFirst, PickRoundRobin, PickerKind};
pub use reconcile::{sync_state, sync_states};
pub use staging::{DownloadHandler, StagingCommand, StagingHandler, StagingQueue};
pub use submit::{cancel_job, render_command, submit};

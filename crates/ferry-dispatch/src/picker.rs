//! Choosing a destination for a new job.

use crate::destination::Destinations;
use camino::Utf8Path;
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, PoisonError};
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum PickError {
    #[error("No destination is configured")]
    NoDestination,
}

/// Picks the destination a job is sent to.
pub trait DestinationPicker: Send + Sync {
    fn pick(
        &self,
        job_dir: &Utf8Path,
        application: &str,
        submitter: Option<&str>,
        destinations: &Destinations,
    ) -> Result<String, PickError>;
}

/// Always the first destination in the config.
#[derive(Debug, Default)]
pub struct PickFirst;

impl DestinationPicker for PickFirst {
    fn pick(
        &self,
        _job_dir: &Utf8Path,
        _application: &str,
        _submitter: Option<&str>,
        destinations: &Destinations,
    ) -> Result<String, PickError> {
        destinations
            .names()
            .first()
            .map(|name| name.to_string())
            .ok_or(PickError::NoDestination)
    }
}

/// Each destination in turn, wrapping around.
#[derive(Debug, Default)]
pub struct PickRoundRobin {
    cursor: Mutex<usize>,
}

impl DestinationPicker for PickRoundRobin {
    fn pick(
        &self,
        _job_dir: &Utf8Path,
        _application: &str,
        _submitter: Option<&str>,
        destinations: &Destinations,
    ) -> Result<String, PickError> {
        let names = destinations.names();
        if names.is_empty() {
            return Err(PickError::NoDestination);
        }
        let mut cursor = self.cursor.lock().unwrap_or_else(PoisonError::into_inner);
        let name = names[*cursor % names.len()].to_string();
        *cursor = (*cursor + 1) % names.len();
        Ok(name)
    }
}

/// Picker named in the config.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PickerKind {
    #[default]
    First,
    RoundRobin,
}

impl PickerKind {
    pub fn build(self) -> Box<dyn DestinationPicker> {
        match self {
            Self::First => Box::new(PickFirst),
            Self::RoundRobin => Box::new(PickRoundRobin::default()),
        }
    }
}

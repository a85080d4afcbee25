//! Generic job state shared by every backend.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Job state.
///
/// Jobs move forward through `New → Queued → Running → StagingOut → Ok | Error`
/// and never backward. `Ok` and `Error` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum State {
    /// Created, not yet submitted
    New,
    /// Waiting in a scheduler queue
    Queued,
    /// Executing
    Running,
    /// Finished on the scheduler, output not yet copied back
    StagingOut,
    /// Finished successfully
    Ok,
    /// Finished with a failure
    Error,
}

impl State {
    /// Terminal states are never left again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Ok | Self::Error)
    }

    /// Whether a scheduler reporting this state is done with the job.
    pub fn is_completed(&self) -> bool {
        self.is_terminal()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Queued => "queued",
            Self::Running => "running",
            Self::StagingOut => "staging_out",
            Self::Ok => "ok",
            Self::Error => "error",
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Self::New => 0,
            Self::Queued => 1,
            Self::Running => 2,
            Self::StagingOut => 3,
            Self::Ok | Self::Error => 4,
        }
    }

    /// Whether moving from `self` to `next` keeps the forward-only order.
    pub fn can_advance_to(&self, next: State) -> bool {
        !self.is_terminal() && next.rank() >= self.rank()
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error for unparseable state names.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown job state: {0}")]
pub struct UnknownState(pub String);

impl FromStr for State {
    type Err = UnknownState;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new" => Ok(Self::New),
            "queued" => Ok(Self::Queued),
            "running" => Ok(Self::Running),
            "staging_out" => Ok(Self::StagingOut),
            "ok" => Ok(Self::Ok),
            "error" => Ok(Self::Error),
            other => Err(UnknownState(other.to_string())),
        }
    }
}

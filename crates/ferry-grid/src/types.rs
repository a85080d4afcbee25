//! Grid job types.

use ferry_core::State;

/// Every grid job status ferry knows, with the generic state it maps to.
pub const GRID_STATES: &[(&str, State)] = &[
    ("Received", State::Queued),
    ("Checking", State::Queued),
    ("Staging", State::Queued),
    ("Waiting", State::Queued),
    ("Matched", State::Queued),
    ("Rescheduled", State::Queued),
    ("Running", State::Running),
    ("Completing", State::Running),
    ("Done", State::Ok),
    ("Failed", State::Error),
    ("Killed", State::Error),
    ("Deleted", State::Error),
    ("Stalled", State::Error),
];

/// Map a grid status to a generic state. Unknown statuses are failures.
pub fn map_grid_state(raw: &str) -> State {
    let raw = raw.trim();
    match GRID_STATES
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(raw))
    {
        Some((_, state)) => *state,
        None => {
            tracing::warn!("Unmapped grid status {:?}, treating as error", raw);
            State::Error
        }
    }
}

/// One line of job status output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GridJob {
    pub job_id: String,
    pub status: String,
}

impl GridJob {
    pub fn generic_state(&self) -> State {
        map_grid_state(&self.status)
    }
}

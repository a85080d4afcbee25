//! SLURM job types.

use ferry_core::State;

/// Every SLURM job state code ferry knows, with the generic state it maps to.
///
/// Codes are the long names printed by `squeue --format=%T` and `sacct`.
pub const SLURM_STATES: &[(&str, State)] = &[
    ("PENDING", State::Queued),
    ("CONFIGURING", State::Queued),
    ("REQUEUED", State::Queued),
    ("REQUEUE_FED", State::Queued),
    ("REQUEUE_HOLD", State::Queued),
    ("RESV_DEL_HOLD", State::Queued),
    ("RUNNING", State::Running),
    ("COMPLETING", State::Running),
    ("SUSPENDED", State::Running),
    ("RESIZING", State::Running),
    ("SIGNALING", State::Running),
    ("STAGE_OUT", State::Running),
    ("COMPLETED", State::Ok),
    ("FAILED", State::Error),
    ("CANCELLED", State::Error),
    ("TIMEOUT", State::Error),
    ("NODE_FAIL", State::Error),
    ("PREEMPTED", State::Error),
    ("BOOT_FAIL", State::Error),
    ("DEADLINE", State::Error),
    ("OUT_OF_MEMORY", State::Error),
    ("REVOKED", State::Error),
    ("SPECIAL_EXIT", State::Error),
    ("STOPPED", State::Error),
];

/// Map a raw SLURM state to a generic state.
///
/// sacct can append detail ("CANCELLED by 1234"), so only the first token
/// counts. Unknown codes are treated as failures.
pub fn map_slurm_state(raw: &str) -> State {
    let code = raw.split_whitespace().next().unwrap_or("").to_uppercase();
    match SLURM_STATES.iter().find(|(name, _)| *name == code) {
        Some((_, state)) => *state,
        None => {
            tracing::warn!("Unmapped SLURM state {:?}, treating as error", raw);
            State::Error
        }
    }
}

/// SLURM job information from squeue/sacct.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlurmJob {
    /// SLURM job ID
    pub job_id: String,

    /// Raw state code
    pub state: String,
}

impl SlurmJob {
    pub fn generic_state(&self) -> State {
        map_slurm_state(&self.state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_every_code_maps_once() {
        let mut seen = HashSet::new();
        for (code, state) in SLURM_STATES {
            assert!(seen.insert(*code), "duplicate code {code}");
            assert_eq!(map_slurm_state(code), *state);
            assert_ne!(*state, State::New);
            assert_ne!(*state, State::StagingOut);
        }
    }

    #[test]
    fn test_known_codes() {
        assert_eq!(map_slurm_state("PENDING"), State::Queued);
        assert_eq!(map_slurm_state("RUNNING"), State::Running);
        assert_eq!(map_slurm_state("COMPLETED"), State::Ok);
        assert_eq!(map_slurm_state("OUT_OF_MEMORY"), State::Error);
    }

    #[test]
    fn test_sacct_suffix_and_case() {
        assert_eq!(map_slurm_state("CANCELLED by 12345"), State::Error);
        assert_eq!(map_slurm_state("running"), State::Running);
    }

    #[test]
    fn test_unknown_code_is_error() {
        assert_eq!(map_slurm_state("LAUNCH_FAILED_SOMEHOW"), State::Error);
        assert_eq!(map_slurm_state(""), State::Error);
    }
}

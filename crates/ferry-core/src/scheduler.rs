//! Scheduler backend contract.

use crate::description::JobDescription;
use crate::error::SchedulerError;
use crate::state::State;
use async_trait::async_trait;

/// A batch scheduler that can run job descriptions.
///
/// External ids are opaque strings assigned by the backend. A backend may
/// forget a job once it has reported a terminal state for it, so callers must
/// not rely on polling a finished job twice.
#[async_trait]
pub trait Scheduler: Send + Sync {
    /// Hand a job to the backend and return its external id.
    ///
    /// Returns once the job is enqueued (or, for synchronous backends, run).
    async fn submit(&self, description: &JobDescription) -> Result<String, SchedulerError>;

    /// Current state of one job.
    async fn state(&self, job_id: &str) -> Result<State, SchedulerError>;

    /// Current states of several jobs, in the order of `job_ids`.
    ///
    /// Backends with a batch query should override this.
    async fn states(&self, job_ids: &[String]) -> Result<Vec<State>, SchedulerError> {
        let mut states = Vec::with_capacity(job_ids.len());
        for job_id in job_ids {
            states.push(self.state(job_id).await?);
        }
        Ok(states)
    }

    /// Best-effort cancel. Unknown or finished ids are ignored.
    async fn cancel(&self, job_id: &str) -> Result<(), SchedulerError>;

    /// Stop accepting work and release connections. Safe to call twice.
    async fn close(&self) -> Result<(), SchedulerError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    struct FixedScheduler {
        states: HashMap<String, State>,
        calls: Mutex<usize>,
    }

    #[async_trait]
    impl Scheduler for FixedScheduler {
        async fn submit(&self, _description: &JobDescription) -> Result<String, SchedulerError> {
            Err(SchedulerError::Submission("read only".to_string()))
        }

        async fn state(&self, job_id: &str) -> Result<State, SchedulerError> {
            *self.calls.lock().unwrap() += 1;
            self.states
                .get(job_id)
                .copied()
                .ok_or_else(|| SchedulerError::NotFound(job_id.to_string()))
        }

        async fn cancel(&self, _job_id: &str) -> Result<(), SchedulerError> {
            Ok(())
        }

        async fn close(&self) -> Result<(), SchedulerError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_default_states_loops_over_state() {
        let scheduler = FixedScheduler {
            states: HashMap::from([
                ("a".to_string(), State::Running),
                ("b".to_string(), State::Ok),
            ]),
            calls: Mutex::new(0),
        };

        let states = scheduler
            .states(&["b".to_string(), "a".to_string()])
            .await
            .unwrap();
        assert_eq!(states, vec![State::Ok, State::Running]);
        assert_eq!(*scheduler.calls.lock().unwrap(), 2);

        let missing = scheduler.states(&["c".to_string()]).await;
        assert!(matches!(missing, Err(SchedulerError::NotFound(_))));
    }
}

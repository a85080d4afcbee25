use crate::store::StoreError;
use chrono::{DateTime, Utc};
use ferry_core::State;
use serde::{Deserialize, Serialize};

/// A submitted job as the request layer sees it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: u64,

    /// Human readable name
    pub name: String,

    /// Application the job runs
    pub application: String,

    /// Who submitted the job
    pub submitter: Option<String>,

    /// Id assigned by the destination's scheduler, once submitted
    pub external_id: Option<String>,

    /// Destination the job was sent to. Never changes once set.
    pub destination: Option<String>,

    pub state: State,

    pub created_on: DateTime<Utc>,

    pub updated_on: DateTime<Utc>,
}

impl JobRecord {
    pub fn new(id: u64, name: String, application: String, submitter: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            name,
            application,
            submitter,
            external_id: None,
            destination: None,
            state: State::New,
            created_on: now,
            updated_on: now,
        }
    }

    /// Move to `state`, refusing to leave a terminal state or go backward.
    pub fn advance(&mut self, state: State) -> Result<(), StoreError> {
        if self.state.is_terminal() {
            return Err(StoreError::Terminal(self.id));
        }
        if !self.state.can_advance_to(state) {
            return Err(StoreError::Backward {
                id: self.id,
                from: self.state,
                to: state,
            });
        }
        self.state = state;
        self.updated_on = Utc::now();
        Ok(())
    }
}

/// Every job record, plus the id counter.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobsState {
    pub next_id: u64,
    pub jobs: Vec<JobRecord>,
}

impl JobsState {
    pub fn create_job(
        &mut self,
        name: String,
        application: String,
        submitter: Option<String>,
    ) -> JobRecord {
        self.next_id += 1;
        let job = JobRecord::new(self.next_id, name, application, submitter);
        self.jobs.push(job.clone());
        job
    }

    pub fn get_job(&self, id: u64) -> Option<&JobRecord> {
        self.jobs.iter().find(|j| j.id == id)
    }

    fn get_job_mut(&mut self, id: u64) -> Result<&mut JobRecord, StoreError> {
        self.jobs
            .iter_mut()
            .find(|j| j.id == id)
            .ok_or(StoreError::NotFound(id))
    }

    pub fn update_state(&mut self, id: u64, state: State) -> Result<JobRecord, StoreError> {
        let job = self.get_job_mut(id)?;
        job.advance(state)?;
        Ok(job.clone())
    }

    pub fn update_external_id_and_destination(
        &mut self,
        id: u64,
        external_id: String,
        destination: String,
        state: State,
    ) -> Result<JobRecord, StoreError> {
        let job = self.get_job_mut(id)?;
        if let Some(existing) = &job.destination
            && *existing != destination
        {
            return Err(StoreError::DestinationFixed {
                id,
                destination: existing.clone(),
            });
        }
        job.advance(state)?;
        job.external_id = Some(external_id);
        job.destination = Some(destination);
        Ok(job.clone())
    }
}

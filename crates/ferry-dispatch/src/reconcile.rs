//! Bringing stored job state in line with the schedulers.
//!
//! A scheduler may forget a job as soon as it has reported it finished, so a
//! completed state is recorded right away as `staging_out` and the final state
//! is only written by the staging consumer once the output is back.

use crate::context::Context;
use crate::error::DispatchError;
use crate::staging::StagingCommand;
use ferry_core::{SchedulerError, State};
use ferry_store::JobRecord;
use std::collections::BTreeMap;

/// External id and destination of a job that should be polled.
fn pollable(job: &JobRecord) -> Option<(&str, &str)> {
    if job.state.is_terminal() || job.state == State::StagingOut {
        return None;
    }
    Some((job.external_id.as_deref()?, job.destination.as_deref()?))
}

/// Record a state reported by the scheduler and return the stored state.
async fn apply(ctx: &Context, job: &JobRecord, reported: State) -> Result<State, DispatchError> {
    if reported == job.state {
        return Ok(job.state);
    }
    if !job.state.can_advance_to(reported) {
        tracing::warn!(
            "Ignoring {} reported for job {}, which is already {}",
            reported,
            job.id,
            job.state
        );
        return Ok(job.state);
    }

    if !reported.is_completed() {
        ctx.store().update_state(job.id, reported).await?;
        tracing::info!("Job {} is {}", job.id, reported);
        return Ok(reported);
    }

    let destination = job.destination.clone().unwrap_or_default();
    ctx.store().update_state(job.id, State::StagingOut).await?;
    tracing::info!("Job {} finished as {}, staging out", job.id, reported);
    ctx.staging().enqueue(StagingCommand {
        job_id: job.id,
        destination,
        target_state: reported,
    })?;
    Ok(State::StagingOut)
}

/// Poll the scheduler for one job and record any change.
///
/// Terminal jobs, jobs already staging out and jobs never submitted are left
/// alone. Polling errors are returned and the stored state is not touched.
pub async fn sync_state(ctx: &Context, job: &JobRecord) -> Result<State, DispatchError> {
    let Some((external_id, destination)) = pollable(job) else {
        return Ok(job.state);
    };
    let scheduler = ctx
        .destinations()
        .get(destination)
        .ok_or_else(|| DispatchError::UnknownDestination(destination.to_string()))?
        .scheduler();

    let reported = scheduler.state(external_id).await?;
    apply(ctx, job, reported).await
}

/// Poll many jobs with one batch query per destination.
///
/// A failing destination does not hold up the others. When a batch query
/// fails its jobs are polled one at a time, so every report that can be read
/// is recorded. All failures are logged and the first one is returned once
/// every destination has been tried.
pub async fn sync_states(ctx: &Context, jobs: &[JobRecord]) -> Result<(), DispatchError> {
    let mut by_destination: BTreeMap<&str, Vec<(&JobRecord, &str)>> = BTreeMap::new();
    for job in jobs {
        if let Some((external_id, destination)) = pollable(job) {
            by_destination
                .entry(destination)
                .or_default()
                .push((job, external_id));
        }
    }

    let mut first_error = None;
    for (destination, group) in by_destination {
        if let Err(e) = sync_destination(ctx, destination, &group).await {
            tracing::warn!("Reconciling {} failed: {}", destination, e);
            first_error.get_or_insert(e);
        }
    }
    first_error.map_or(Ok(()), Err)
}

async fn sync_destination(
    ctx: &Context,
    destination: &str,
    group: &[(&JobRecord, &str)],
) -> Result<(), DispatchError> {
    let scheduler = ctx
        .destinations()
        .get(destination)
        .ok_or_else(|| DispatchError::UnknownDestination(destination.to_string()))?
        .scheduler();
    let ids: Vec<String> = group.iter().map(|(_, id)| id.to_string()).collect();
    tracing::debug!("Polling {} jobs on {}", ids.len(), destination);

    let reports: Vec<Result<State, SchedulerError>> = match scheduler.states(&ids).await {
        Ok(states) => states.into_iter().map(Ok).collect(),
        Err(e) => {
            tracing::debug!("Batch query on {} failed, polling one by one: {}", destination, e);
            let mut reports = Vec::with_capacity(ids.len());
            for id in &ids {
                reports.push(scheduler.state(id).await);
            }
            reports
        }
    };

    let mut first_error = None;
    for ((job, external_id), report) in group.iter().zip(reports) {
        let result = match report {
            Ok(state) => apply(ctx, job, state).await.map(|_| ()),
            Err(e) => Err(e.into()),
        };
        if let Err(e) = result {
            tracing::warn!("Job {} ({}) not reconciled: {}", job.id, external_id, e);
            first_error.get_or_insert(e);
        }
    }
    first_error.map_or(Ok(()), Err)
}

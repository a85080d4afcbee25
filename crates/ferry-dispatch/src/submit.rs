//! Sending new jobs to a destination.

use crate::context::Context;
use crate::error::DispatchError;
use camino::Utf8Path;
use ferry_core::{JobDescription, State};
use ferry_runner::shell_quote;
use ferry_store::JobRecord;
use std::collections::BTreeMap;
use tinytemplate::TinyTemplate;

/// Render an application's command template.
///
/// Every payload value is shell-quoted before it is substituted, so values
/// always reach the command as single words.
pub fn render_command(
    application: &str,
    template: &str,
    payload: &BTreeMap<String, String>,
) -> Result<String, DispatchError> {
    let template_error = |e: tinytemplate::error::Error| DispatchError::Template {
        application: application.to_string(),
        message: e.to_string(),
    };

    let mut tt = TinyTemplate::new();
    tt.set_default_formatter(&tinytemplate::format_unescaped);
    tt.add_template("command", template).map_err(template_error)?;

    let quoted: BTreeMap<&str, String> = payload
        .iter()
        .map(|(key, value)| (key.as_str(), shell_quote(value)))
        .collect();
    tt.render("command", &quoted).map_err(template_error)
}

/// Submit job `job_id`, whose input is already in `job_dir`.
///
/// `job_dir` has to be the job's own directory under the job root, since
/// output is staged back there. On success the job is stored as `queued` with its external id and
/// destination. On failure it stays `new`.
pub async fn submit(
    ctx: &Context,
    job_id: u64,
    job_dir: &Utf8Path,
    payload: &BTreeMap<String, String>,
    application: &str,
    submitter: Option<&str>,
) -> Result<String, DispatchError> {
    let expected = ctx.job_dir(job_id);
    if job_dir != expected.as_path() {
        return Err(DispatchError::JobDir {
            job_id,
            job_dir: job_dir.to_string(),
            expected: expected.to_string(),
        });
    }
    let app = ctx
        .application(application)
        .ok_or_else(|| DispatchError::UnknownApplication(application.to_string()))?;
    let command = render_command(application, &app.command_template, payload)?;

    let mut description = JobDescription::new(job_dir, command).with_application(application);
    if let Some(submitter) = submitter {
        description = description.with_submitter(submitter);
    }

    let name = ctx
        .picker()
        .pick(job_dir, application, submitter, ctx.destinations())?;
    let destination = ctx
        .destinations()
        .get(&name)
        .ok_or_else(|| DispatchError::UnknownDestination(name.clone()))?;

    let remote = destination
        .filesystem()
        .localize_description(&description, ctx.job_root_dir());
    tracing::debug!("Job {} runs in {} on {}", job_id, remote.job_dir, name);
    destination.filesystem().upload(&description, &remote).await?;

    let external_id = destination.scheduler().submit(&remote).await?;
    ctx.store()
        .update_external_id_and_destination(job_id, &external_id, &name, State::Queued)
        .await?;
    tracing::info!("Submitted job {} to {} as {}", job_id, name, external_id);
    Ok(external_id)
}

/// Cancel a job and record it as failed.
///
/// Jobs that already finished, including those staging out, are returned
/// unchanged.
pub async fn cancel_job(ctx: &Context, job_id: u64) -> Result<JobRecord, DispatchError> {
    let job = ctx.store().get_job(job_id).await?;
    if job.state.is_terminal() || job.state == State::StagingOut {
        return Ok(job);
    }

    if let (Some(external_id), Some(name)) = (&job.external_id, &job.destination) {
        let destination = ctx
            .destinations()
            .get(name)
            .ok_or_else(|| DispatchError::UnknownDestination(name.clone()))?;
        destination.scheduler().cancel(external_id).await?;
    }

    let job = ctx.store().update_state(job_id, State::Error).await?;
    tracing::info!("Cancelled job {}", job_id);
    Ok(job)
}

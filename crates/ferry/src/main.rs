//! Ferry - dispatch jobs to local, Slurm, queue and grid destinations.

mod polling;

use camino::Utf8Path;
use clap::Parser;
use ferry_cli::{Args, Command, SubmitArgs};
use ferry_core::State;
use ferry_dispatch::{Config, Context, SchedulerConfig, cancel_job, submit, sync_state, sync_states};
use ferry_store::{JobRecord, JobStore, JsonJobStore, MemoryJobStore};
use ferry_worker::{RedisJobQueue, run_queue_worker};
use miette::{IntoDiagnostic, Result, miette};
use polling::{PollingConfig, PollingService};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = Config::load(&args.config).into_diagnostic()?;

    match args.command {
        Command::CheckConfig => check_config(&config).await,
        Command::Submit(submit_args) => run_submit(&config, submit_args).await,
        Command::Status { job_id } => run_status(&config, job_id).await,
        Command::Cancel { job_id } => run_cancel(&config, job_id).await,
        Command::Serve { poll_interval } => run_serve(&config, poll_interval).await,
        Command::Worker { destination } => run_worker(&config, &destination).await,
    }
}

/// Build the context on top of the configured JSON job store.
async fn open_context(config: &Config) -> Result<Arc<Context>> {
    let store = JsonJobStore::open(config.state_file())
        .await
        .into_diagnostic()?;
    let ctx = Context::from_config(config, Arc::new(store)).into_diagnostic()?;
    Ok(Arc::new(ctx))
}

async fn check_config(config: &Config) -> Result<()> {
    let ctx = Context::from_config(config, Arc::new(MemoryJobStore::new())).into_diagnostic()?;
    for destination in ctx.destinations().iter() {
        println!(
            "{}: entry {}",
            destination.name(),
            destination.filesystem().entry()
        );
    }
    if ctx.destinations().is_empty() {
        println!("No destinations configured");
    }
    ctx.shutdown().await;
    Ok(())
}

/// Copy the contents of `src` into `target`, creating directories as needed.
fn copy_dir(src: &Utf8Path, target: &Utf8Path) -> Result<()> {
    for entry in walkdir::WalkDir::new(src).sort_by_file_name() {
        let entry = entry.into_diagnostic()?;
        let relative = entry
            .path()
            .strip_prefix(src.as_std_path())
            .into_diagnostic()?;
        let destination = target.as_std_path().join(relative);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&destination).into_diagnostic()?;
        } else {
            std::fs::copy(entry.path(), &destination).into_diagnostic()?;
        }
    }
    Ok(())
}

async fn run_submit(config: &Config, args: SubmitArgs) -> Result<()> {
    if !args.job_dir.is_dir() {
        return Err(miette!("Input directory {} does not exist", args.job_dir));
    }
    let ctx = open_context(config).await?;
    let name = args.name.as_deref().unwrap_or(&args.application);
    let job = ctx
        .store()
        .create_job(name, &args.application, args.submitter.as_deref())
        .await
        .into_diagnostic()?;

    let job_dir = ctx.job_dir(job.id);
    copy_dir(&args.job_dir, &job_dir)?;
    let payload: BTreeMap<String, String> = args.params.into_iter().collect();

    let result = submit(
        &ctx,
        job.id,
        &job_dir,
        &payload,
        &args.application,
        args.submitter.as_deref(),
    )
    .await;
    let external_id = match result {
        Ok(external_id) => external_id,
        Err(e) => {
            ctx.shutdown().await;
            return Err(e).into_diagnostic();
        }
    };
    println!("Job {} submitted as {}", job.id, external_id);

    if args.wait {
        let interval = Duration::from_secs(args.poll_interval.max(1));
        let state = wait_for_job(&ctx, job.id, interval).await;
        match state {
            Ok(state) => println!("Job {} finished: {}", job.id, state),
            Err(e) => {
                ctx.shutdown().await;
                return Err(e);
            }
        }
    }

    ctx.shutdown().await;
    Ok(())
}

/// Reconcile one job until its stored state is terminal.
async fn wait_for_job(ctx: &Context, job_id: u64, interval: Duration) -> Result<State> {
    loop {
        let job = ctx.store().get_job(job_id).await.into_diagnostic()?;
        if job.state.is_terminal() {
            return Ok(job.state);
        }
        sync_state(ctx, &job).await.into_diagnostic()?;
        tokio::time::sleep(interval).await;
    }
}

fn print_job(job: &JobRecord) {
    println!(
        "{:>6}  {:<12}  {:<16}  {:<12}  {:<24}  {}",
        job.id,
        job.state.as_str(),
        job.application,
        job.destination.as_deref().unwrap_or("-"),
        job.external_id.as_deref().unwrap_or("-"),
        job.updated_on.format("%Y-%m-%d %H:%M:%S"),
    );
}

async fn run_status(config: &Config, job_id: Option<u64>) -> Result<()> {
    let ctx = open_context(config).await?;
    let jobs = match job_id {
        Some(id) => vec![ctx.store().get_job(id).await.into_diagnostic()?],
        None => ctx.store().list_jobs().await.into_diagnostic()?,
    };

    if let Err(e) = sync_states(&ctx, &jobs).await {
        tracing::warn!("Could not reconcile every job: {}", e);
    }
    // Let downloads queued by this pass finish before printing.
    ctx.staging().finish().await;
    ctx.shutdown().await;

    for job in &jobs {
        print_job(&ctx.store().get_job(job.id).await.into_diagnostic()?);
    }
    Ok(())
}

async fn run_cancel(config: &Config, job_id: u64) -> Result<()> {
    let ctx = open_context(config).await?;
    let result = cancel_job(&ctx, job_id).await;
    ctx.shutdown().await;
    let job = result.into_diagnostic()?;
    print_job(&job);
    Ok(())
}

async fn run_serve(config: &Config, poll_interval: u64) -> Result<()> {
    let ctx = open_context(config).await?;
    let shutdown = CancellationToken::new();
    let poller = PollingService::new(
        ctx.clone(),
        PollingConfig {
            poll_interval: Duration::from_secs(poll_interval.max(1)),
        },
        shutdown.clone(),
    )
    .start();

    tracing::info!("Serving, reconciling every {}s", poll_interval.max(1));
    tokio::signal::ctrl_c().await.into_diagnostic()?;
    tracing::info!("Shutting down");

    shutdown.cancel();
    if let Err(e) = poller.await {
        tracing::error!("Polling service failed: {}", e);
    }
    ctx.shutdown().await;
    Ok(())
}

async fn run_worker(config: &Config, destination: &str) -> Result<()> {
    let destination_config = config
        .destinations
        .get(destination)
        .ok_or_else(|| miette!("Unknown destination {destination}"))?;
    let SchedulerConfig::Queue(queue_config) = &destination_config.scheduler else {
        return Err(miette!("Destination {destination} does not use a queue scheduler"));
    };

    let queue = Arc::new(RedisJobQueue::new(queue_config).into_diagnostic()?);
    let shutdown = CancellationToken::new();
    let mut worker = tokio::spawn(run_queue_worker(
        queue,
        queue_config.clone(),
        shutdown.clone(),
    ));

    tokio::select! {
        result = &mut worker => return result.into_diagnostic()?.into_diagnostic(),
        result = tokio::signal::ctrl_c() => {
            result.into_diagnostic()?;
            tracing::info!("Stopping queue worker");
            shutdown.cancel();
        }
    }

    worker.await.into_diagnostic()?.into_diagnostic()
}

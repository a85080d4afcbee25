//! In-process worker pool scheduler.
//!
//! A fixed number of worker tasks pull job ids from one shared FIFO. The
//! bookkeeping map is the source of truth: a job cancelled while queued is
//! just removed from the map and skipped when a worker reaches it.
//!
//! Entries are forgotten once a caller has seen their terminal state, through
//! either `state` or `cancel`. A second `state` call for the same id reports
//! [`SchedulerError::NotFound`]; callers have to poll promptly and remember
//! what they saw.

use crate::process::run_job_process;
use async_trait::async_trait;
use ferry_core::{JobDescription, Scheduler, SchedulerError, State};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

fn default_slots() -> usize {
    1
}

/// Settings for a memory destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Number of jobs run at the same time
    #[serde(default = "default_slots")]
    pub slots: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            slots: default_slots(),
        }
    }
}

impl MemoryConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.slots == 0 {
            return Err("a memory scheduler needs at least one slot".to_string());
        }
        Ok(())
    }
}

#[derive(Debug)]
struct MemoryJob {
    description: JobDescription,
    state: State,
    /// Kills this job's process, while it runs
    cancel: Option<CancellationToken>,
}

/// State shared between the scheduler handle and its workers.
struct Shared {
    jobs: Mutex<HashMap<String, MemoryJob>>,
    queue: Mutex<UnboundedReceiver<String>>,
    /// Signalled whenever a worker records a job's final state
    finished: Notify,
}

struct Worker {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl Worker {
    fn spawn(slot: usize, shared: Arc<Shared>) -> Self {
        let token = CancellationToken::new();
        let handle = tokio::spawn(worker_loop(slot, shared, token.clone()));
        Self { token, handle }
    }

    /// Cancel the worker and wait until it has recorded its job's final state.
    async fn stop(&mut self, slot: usize) {
        self.token.cancel();
        if let Err(e) = (&mut self.handle).await {
            tracing::error!("Worker {} panicked: {}", slot, e);
        }
    }
}

async fn next_job(shared: &Shared, token: &CancellationToken) -> Option<String> {
    tokio::select! {
        _ = token.cancelled() => None,
        id = async { shared.queue.lock().await.recv().await } => id,
    }
}

async fn worker_loop(slot: usize, shared: Arc<Shared>, token: CancellationToken) {
    while let Some(job_id) = next_job(&shared, &token).await {
        let (description, cancel) = {
            let mut jobs = shared.jobs.lock().await;
            let Some(job) = jobs.get_mut(&job_id) else {
                tracing::debug!("Skipping cancelled job {}", job_id);
                continue;
            };
            let cancel = token.child_token();
            job.state = State::Running;
            job.cancel = Some(cancel.clone());
            (job.description.clone(), cancel)
        };

        tracing::info!("Worker {} running job {}", slot, job_id);
        let state = match run_job_process(&description, &cancel, None).await {
            Ok(outcome) => outcome.state(),
            Err(e) => {
                tracing::error!("Job {} could not be run: {}", job_id, e);
                State::Error
            }
        };

        if let Some(job) = shared.jobs.lock().await.get_mut(&job_id) {
            job.state = state;
            job.cancel = None;
        }
        shared.finished.notify_waiters();
        tracing::info!("Job {} finished as {}", job_id, state);

        if token.is_cancelled() {
            break;
        }
    }
    tracing::debug!("Worker {} stopped", slot);
}

/// Runs jobs on a fixed pool of tokio tasks.
pub struct MemoryScheduler {
    shared: Arc<Shared>,
    sender: std::sync::Mutex<Option<UnboundedSender<String>>>,
    workers: Mutex<Vec<Worker>>,
    closed: AtomicBool,
}

impl MemoryScheduler {
    /// Start `config.slots` workers. Must be called inside a tokio runtime.
    pub fn new(config: &MemoryConfig) -> Self {
        let (sender, receiver) = unbounded_channel();
        let shared = Arc::new(Shared {
            jobs: Mutex::new(HashMap::new()),
            queue: Mutex::new(receiver),
            finished: Notify::new(),
        });
        let workers = (0..config.slots)
            .map(|slot| Worker::spawn(slot, shared.clone()))
            .collect();

        Self {
            shared,
            sender: std::sync::Mutex::new(Some(sender)),
            workers: Mutex::new(workers),
            closed: AtomicBool::new(false),
        }
    }

    fn enqueue(&self, job_id: String) -> Result<(), SchedulerError> {
        let sender = self.sender.lock().map_err(|_| SchedulerError::Closed)?;
        sender
            .as_ref()
            .ok_or(SchedulerError::Closed)?
            .send(job_id)
            .map_err(|_| SchedulerError::Closed)
    }
}

#[async_trait]
impl Scheduler for MemoryScheduler {
    async fn submit(&self, description: &JobDescription) -> Result<String, SchedulerError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SchedulerError::Closed);
        }
        let job_id = Uuid::new_v4().to_string();
        self.shared.jobs.lock().await.insert(
            job_id.clone(),
            MemoryJob {
                description: description.clone(),
                state: State::Queued,
                cancel: None,
            },
        );
        if let Err(e) = self.enqueue(job_id.clone()) {
            self.shared.jobs.lock().await.remove(&job_id);
            return Err(e);
        }
        tracing::info!("Queued job {} in {}", job_id, description.job_dir);
        Ok(job_id)
    }

    async fn state(&self, job_id: &str) -> Result<State, SchedulerError> {
        let mut jobs = self.shared.jobs.lock().await;
        let state = jobs
            .get(job_id)
            .map(|job| job.state)
            .ok_or_else(|| SchedulerError::NotFound(job_id.to_string()))?;
        if state.is_terminal() {
            jobs.remove(job_id);
        }
        Ok(state)
    }

    async fn states(&self, job_ids: &[String]) -> Result<Vec<State>, SchedulerError> {
        let mut jobs = self.shared.jobs.lock().await;
        let states = job_ids
            .iter()
            .map(|id| {
                jobs.get(id)
                    .map(|job| job.state)
                    .ok_or_else(|| SchedulerError::NotFound(id.clone()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        // Only forget once the whole batch has been read.
        for (id, state) in job_ids.iter().zip(&states) {
            if state.is_terminal() {
                jobs.remove(id);
            }
        }
        Ok(states)
    }

    async fn cancel(&self, job_id: &str) -> Result<(), SchedulerError> {
        {
            let mut jobs = self.shared.jobs.lock().await;
            match jobs.get(job_id) {
                None => return Ok(()),
                Some(MemoryJob {
                    state: State::Running,
                    cancel: Some(cancel),
                    ..
                }) => {
                    tracing::info!("Killing running job {}", job_id);
                    cancel.cancel();
                }
                Some(job) => {
                    // Queued: the worker skips it. Terminal: forgotten.
                    if job.state == State::Queued {
                        tracing::info!("Cancelled queued job {}", job_id);
                    }
                    jobs.remove(job_id);
                    return Ok(());
                }
            }
        }

        // Wait for the worker to record the killed job's final state.
        loop {
            let finished = self.shared.finished.notified();
            let running = matches!(
                self.shared.jobs.lock().await.get(job_id),
                Some(job) if job.state == State::Running
            );
            if !running {
                return Ok(());
            }
            finished.await;
        }
    }

    async fn close(&self) -> Result<(), SchedulerError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if let Ok(mut sender) = self.sender.lock() {
            sender.take();
        }
        let mut workers = self.workers.lock().await;
        for (slot, worker) in workers.iter_mut().enumerate() {
            worker.stop(slot).await;
        }
        workers.clear();
        tracing::info!("Memory scheduler closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino::Utf8Path;
    use ferry_core::{RETURNCODE_FILE, STDOUT_FILE};
    use std::time::Duration;
    use tempfile::TempDir;

    fn job(temp: &TempDir, command: &str) -> JobDescription {
        JobDescription::new(Utf8Path::from_path(temp.path()).unwrap(), command)
    }

    fn read(temp: &TempDir, name: &str) -> String {
        std::fs::read_to_string(temp.path().join(name)).unwrap()
    }

    /// Poll until the job reaches `target` (or any terminal state).
    async fn wait_for(scheduler: &MemoryScheduler, job_id: &str, target: State) -> State {
        for _ in 0..500 {
            let state = scheduler.state(job_id).await.unwrap();
            if state == target || state.is_terminal() {
                return state;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("job {job_id} never reached {target}");
    }

    #[test]
    fn test_config_defaults_and_validation() {
        assert_eq!(MemoryConfig::default().slots, 1);
        assert!(MemoryConfig { slots: 0 }.validate().is_err());
        assert!(MemoryConfig { slots: 4 }.validate().is_ok());
    }

    #[tokio::test]
    async fn test_echo_hello() {
        let temp = TempDir::new().unwrap();
        let scheduler = MemoryScheduler::new(&MemoryConfig::default());

        let job_id = scheduler.submit(&job(&temp, "echo -n hello")).await.unwrap();
        assert_eq!(wait_for(&scheduler, &job_id, State::Ok).await, State::Ok);
        assert_eq!(read(&temp, STDOUT_FILE), "hello");
        assert_eq!(read(&temp, RETURNCODE_FILE), "0");

        scheduler.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_failing_command() {
        let temp = TempDir::new().unwrap();
        let scheduler = MemoryScheduler::new(&MemoryConfig::default());

        let job_id = scheduler.submit(&job(&temp, "exit 42")).await.unwrap();
        assert_eq!(wait_for(&scheduler, &job_id, State::Error).await, State::Error);
        assert_eq!(read(&temp, RETURNCODE_FILE), "42");
    }

    #[tokio::test]
    async fn test_terminal_state_is_forgotten() {
        let temp = TempDir::new().unwrap();
        let scheduler = MemoryScheduler::new(&MemoryConfig::default());

        let job_id = scheduler.submit(&job(&temp, "true")).await.unwrap();
        assert_eq!(wait_for(&scheduler, &job_id, State::Ok).await, State::Ok);
        assert!(matches!(
            scheduler.state(&job_id).await,
            Err(SchedulerError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_extra_jobs_wait_for_a_slot() {
        let busy = TempDir::new().unwrap();
        let waiting = TempDir::new().unwrap();
        let scheduler = MemoryScheduler::new(&MemoryConfig { slots: 1 });

        let first = scheduler.submit(&job(&busy, "sleep 0.5")).await.unwrap();
        let second = scheduler.submit(&job(&waiting, "echo -n next")).await.unwrap();

        assert_eq!(wait_for(&scheduler, &first, State::Running).await, State::Running);
        assert_eq!(scheduler.state(&second).await.unwrap(), State::Queued);

        assert_eq!(wait_for(&scheduler, &first, State::Ok).await, State::Ok);
        assert_eq!(wait_for(&scheduler, &second, State::Ok).await, State::Ok);
        assert_eq!(read(&waiting, STDOUT_FILE), "next");
    }

    #[tokio::test]
    async fn test_cancel_queued_job() {
        let busy = TempDir::new().unwrap();
        let waiting = TempDir::new().unwrap();
        let scheduler = MemoryScheduler::new(&MemoryConfig { slots: 1 });

        let first = scheduler.submit(&job(&busy, "sleep 0.3")).await.unwrap();
        let second = scheduler.submit(&job(&waiting, "echo -n never")).await.unwrap();
        scheduler.cancel(&second).await.unwrap();

        assert!(matches!(
            scheduler.state(&second).await,
            Err(SchedulerError::NotFound(_))
        ));
        assert_eq!(wait_for(&scheduler, &first, State::Ok).await, State::Ok);
        assert!(!waiting.path().join(STDOUT_FILE).exists());
    }

    #[tokio::test]
    async fn test_cancel_running_job_keeps_capacity() {
        let long = TempDir::new().unwrap();
        let after = TempDir::new().unwrap();
        let scheduler = MemoryScheduler::new(&MemoryConfig { slots: 1 });

        let job_id = scheduler.submit(&job(&long, "sleep 30")).await.unwrap();
        assert_eq!(wait_for(&scheduler, &job_id, State::Running).await, State::Running);

        scheduler.cancel(&job_id).await.unwrap();
        assert_eq!(scheduler.state(&job_id).await.unwrap(), State::Error);
        assert_eq!(read(&long, RETURNCODE_FILE), "130");

        let next = scheduler.submit(&job(&after, "echo -n again")).await.unwrap();
        assert_eq!(wait_for(&scheduler, &next, State::Ok).await, State::Ok);
        assert_eq!(read(&after, STDOUT_FILE), "again");
    }

    #[tokio::test]
    async fn test_cancel_unknown_is_noop() {
        let scheduler = MemoryScheduler::new(&MemoryConfig::default());
        scheduler.cancel("no-such-job").await.unwrap();
    }

    #[tokio::test]
    async fn test_close_kills_work_and_rejects_submissions() {
        let temp = TempDir::new().unwrap();
        let scheduler = MemoryScheduler::new(&MemoryConfig::default());

        let job_id = scheduler.submit(&job(&temp, "sleep 30")).await.unwrap();
        wait_for(&scheduler, &job_id, State::Running).await;

        scheduler.close().await.unwrap();
        scheduler.close().await.unwrap();
        assert_eq!(read(&temp, RETURNCODE_FILE), "130");
        assert!(matches!(
            scheduler.submit(&job(&temp, "true")).await,
            Err(SchedulerError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_failed_batch_forgets_nothing() {
        let temp = TempDir::new().unwrap();
        let scheduler = MemoryScheduler::new(&MemoryConfig::default());

        let job_id = scheduler.submit(&job(&temp, "true")).await.unwrap();
        for _ in 0..500 {
            if scheduler.shared.jobs.lock().await[&job_id].state == State::Ok {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        let batch = [job_id.clone(), "no-such-job".to_string()];
        assert!(matches!(
            scheduler.states(&batch).await,
            Err(SchedulerError::NotFound(id)) if id == "no-such-job"
        ));
        assert_eq!(
            scheduler.states(&[job_id.clone()]).await.unwrap(),
            vec![State::Ok]
        );
        assert!(matches!(
            scheduler.state(&job_id).await,
            Err(SchedulerError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_cancel_finished_job_spares_next_job_in_slot() {
        let first = TempDir::new().unwrap();
        let second = TempDir::new().unwrap();
        let scheduler = MemoryScheduler::new(&MemoryConfig { slots: 1 });

        let done = scheduler.submit(&job(&first, "true")).await.unwrap();
        let next = scheduler
            .submit(&job(&second, "sleep 0.3; echo -n survived"))
            .await
            .unwrap();
        assert_eq!(wait_for(&scheduler, &next, State::Running).await, State::Running);

        scheduler.cancel(&done).await.unwrap();
        assert_eq!(wait_for(&scheduler, &next, State::Ok).await, State::Ok);
        assert_eq!(read(&second, STDOUT_FILE), "survived");
    }
}

use itertools::Itertools;
use parking_lot::Mutex as SyncMutex;
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::error::{ContentError, Result};
use crate::logic::events::EventBus;
use crate::logic::migration::MigrationEngine;
use crate::model::{
    EventPayload, EventTopic, Id, Job, JobDetails, JobStatus, MigrationEventModel,
};
use crate::store::GraphStore;

/// Sending half of the job queue. Enqueueing hands a job uuid to the worker pool.
#[derive(Debug, Clone)]
pub struct JobQueue {
    sender: mpsc::UnboundedSender<Id>,
}

/// Receiving half, shared by all workers of a pool
pub type JobReceiver = Arc<Mutex<mpsc::UnboundedReceiver<Id>>>;

impl JobQueue {
    pub fn channel() -> (JobQueue, JobReceiver) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (JobQueue { sender }, Arc::new(Mutex::new(receiver)))
    }

    pub fn enqueue(&self, job_uuid: Id) -> Result<()> {
        self.sender.send(job_uuid).map_err(|e| ContentError::Store {
            message: format!("job queue is closed, job {} not dispatched", e.0),
            transient: false,
        })
    }
}

/// Executes jobs: status transitions, migration run and start/finished events
pub struct JobRunner<S: GraphStore> {
    store: Arc<S>,
    engine: MigrationEngine<S>,
    events: EventBus,
    origin: String,
    active: SyncMutex<HashSet<Id>>,
    finished: Arc<Notify>,
}

/// Removes a job from the active set when processing ends
struct ActiveJob<'a> {
    active: &'a SyncMutex<HashSet<Id>>,
    uuid: Id,
}

impl Drop for ActiveJob<'_> {
    fn drop(&mut self) {
        self.active.lock().remove(&self.uuid);
    }
}

impl<S: GraphStore> JobRunner<S> {
    pub fn new(store: Arc<S>, engine: MigrationEngine<S>, events: EventBus, origin: String) -> Self {
        Self {
            store,
            engine,
            events,
            origin,
            active: SyncMutex::new(HashSet::new()),
            finished: Arc::new(Notify::new()),
        }
    }

    /// Whether a worker of this process is running the job right now
    pub fn is_active(&self, job_uuid: &str) -> bool {
        self.active.lock().contains(job_uuid)
    }

    /// Signalled every time a job reaches its end, recorded or not
    pub fn finished_signal(&self) -> Arc<Notify> {
        self.finished.clone()
    }

    /// Process one job. Returns the job in its final state, or `None` when
    /// another worker is already processing it or it is already terminal.
    ///
    /// Once the job has started a finished event is always published. If the
    /// outcome cannot be stored the event reports FAILED and the error is
    /// returned; the stored job stays RUNNING and can be retried.
    pub async fn process(&self, job_uuid: &Id) -> Result<Option<Job>> {
        if !self.active.lock().insert(job_uuid.clone()) {
            log::debug!("Job {} is already being processed", job_uuid);
            return Ok(None);
        }
        let _guard = ActiveJob {
            active: &self.active,
            uuid: job_uuid.clone(),
        };

        let job = self
            .engine
            .retry_policy()
            .run(&format!("starting job {}", job_uuid), || {
                let uuid = job_uuid.clone();
                self.store.write(move |graph| {
                    let job = graph.job_mut(&uuid)?;
                    if job.status.is_terminal() {
                        return Ok(None);
                    }
                    job.mark_running();
                    Ok(Some(job.clone()))
                })
            })
            .await?;
        let job = match job {
            Some(job) => job,
            None => {
                log::debug!("Job {} already finished, skipping", job_uuid);
                return Ok(None);
            }
        };

        log::info!(
            "Starting {:?} job {} (attempt {})",
            job.job_type,
            job.uuid,
            job.attempts
        );
        self.publish(&job, EventTopic::migration_start(job.job_type)).await;

        let outcome = self.engine.run(&job).await;
        match &outcome {
            Ok(report) => log::info!(
                "Job {} completed: {} migrated, {} skipped",
                job.uuid,
                report.migrated,
                report.skipped
            ),
            Err(e) => log::error!("Job {} failed: {}", job.uuid, e),
        }

        let cause = outcome.err().map(|e| e.to_string());
        let recorded = self
            .engine
            .retry_policy()
            .run(&format!("recording outcome of job {}", job.uuid), || {
                let uuid = job.uuid.clone();
                let cause = cause.clone();
                self.store.write(move |graph| {
                    let job = graph.job_mut(&uuid)?;
                    match cause {
                        Some(cause) => job.mark_failed(cause),
                        None => job.mark_completed(),
                    }
                    Ok(job.clone())
                })
            })
            .await;

        let (finished, unrecorded) = match recorded {
            Ok(finished) => (finished, None),
            Err(e) => {
                log::error!("Outcome of job {} could not be stored: {}", job.uuid, e);
                let mut finished = job.clone();
                finished.mark_failed(format!("job outcome could not be stored: {}", e));
                (finished, Some(e))
            }
        };

        self.finished.notify_one();
        self.publish(&finished, EventTopic::migration_finished(finished.job_type))
            .await;
        match unrecorded {
            Some(e) => Err(e),
            None => Ok(Some(finished)),
        }
    }

    /// Reset a job and dispatch it again.
    ///
    /// FAILED jobs can always be retried. A RUNNING job qualifies when no
    /// worker of this process holds it, which is what an aborted worker or an
    /// unrecorded outcome leaves behind.
    pub async fn retry(&self, queue: &JobQueue, job_uuid: &Id) -> Result<Job> {
        let uuid = job_uuid.clone();
        let active = self.is_active(job_uuid);
        let job = self
            .store
            .write(move |graph| {
                let job = graph.job_mut(&uuid)?;
                match job.status {
                    JobStatus::Failed => {}
                    JobStatus::Running if !active => {
                        log::warn!("Job {} was left running, resetting it", job.uuid);
                    }
                    status => {
                        return Err(ContentError::Precondition(format!(
                            "job {} is {:?} and cannot be retried",
                            job.uuid, status
                        )))
                    }
                }
                job.reset();
                Ok(job.clone())
            })
            .await?;
        queue.enqueue(job.uuid.clone())?;
        log::info!("Job {} queued for retry", job.uuid);
        Ok(job)
    }

    async fn publish(&self, job: &Job, topic: EventTopic) {
        let details = job.details.clone();
        let refs = self
            .store
            .read(move |graph| {
                let project = graph.project(details.project_uuid())?.reference();
                let branch = graph.branch(details.branch_uuid())?.reference();
                let schema = match &details {
                    JobDetails::Schema { to_version, .. } => {
                        Some(graph.schema_version(to_version)?.reference())
                    }
                    JobDetails::Branch { .. } => None,
                };
                Ok((project, branch, schema))
            })
            .await;

        let (project, branch, schema) = match refs {
            Ok((project, branch, schema)) => (Some(project), Some(branch), schema),
            Err(e) => {
                log::warn!("Publishing event of job {} without references: {}", job.uuid, e);
                (None, None, None)
            }
        };

        self.events.publish(
            topic,
            EventPayload::Migration(MigrationEventModel {
                event: topic,
                status: job.status,
                job: job.uuid.clone(),
                branch,
                project,
                schema,
                origin: self.origin.clone(),
                cause: job.error_cause.clone(),
            }),
        );
    }
}

/// Fixed set of tasks draining the job queue, plus an optional maintenance task
pub struct JobWorkerPool {
    workers: Vec<JoinHandle<()>>,
    maintenance: Option<JoinHandle<()>>,
}

impl JobWorkerPool {
    pub fn start<S: GraphStore + 'static>(runner: Arc<JobRunner<S>>, receiver: JobReceiver, size: usize) -> Self {
        let workers = (0..size.max(1))
            .map(|worker| {
                let runner = runner.clone();
                let receiver = receiver.clone();
                tokio::spawn(async move {
                    loop {
                        let next = receiver.lock().await.recv().await;
                        let job_uuid = match next {
                            Some(job_uuid) => job_uuid,
                            None => break,
                        };
                        log::debug!("Worker {} picked job {}", worker, job_uuid);
                        if let Err(e) = runner.process(&job_uuid).await {
                            log::error!("Worker {} could not process job {}: {}", worker, job_uuid, e);
                        }
                    }
                    log::debug!("Worker {} stopped", worker);
                })
            })
            .collect_vec();
        log::info!("Started {} job workers", workers.len());
        Self {
            workers,
            maintenance: None,
        }
    }

    /// Run `tick` every `interval` and whenever `wake` is notified.
    /// Replaces a maintenance task started earlier.
    pub fn spawn_maintenance<F, Fut>(&mut self, interval: Duration, wake: Arc<Notify>, mut tick: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let period = interval.max(Duration::from_millis(1));
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = wake.notified() => {}
                }
                tick().await;
            }
        });
        if let Some(previous) = self.maintenance.replace(handle) {
            previous.abort();
        }
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Stop all tasks; jobs in flight stay RUNNING and can be retried
    pub fn shutdown(self) {
        for worker in self.workers {
            worker.abort();
        }
        if let Some(maintenance) = self.maintenance {
            maintenance.abort();
        }
    }
}

/// Administrative job queries
pub struct JobOperations;

impl JobOperations {
    /// All jobs, oldest first
    pub async fn list_jobs<S: GraphStore>(store: &S) -> Result<Vec<Job>> {
        store
            .read(|graph| {
                Ok(graph
                    .jobs
                    .values()
                    .cloned()
                    .sorted_by(|a, b| a.created_at.cmp(&b.created_at))
                    .collect_vec())
            })
            .await
    }

    /// Jobs that have not reached a terminal status, oldest first
    pub async fn unfinished_jobs<S: GraphStore>(store: &S) -> Result<Vec<Job>> {
        Ok(Self::list_jobs(store)
            .await?
            .into_iter()
            .filter(|job| !job.status.is_terminal())
            .collect())
    }

    pub async fn get_job<S: GraphStore>(store: &S, job_uuid: &Id) -> Result<Job> {
        let uuid = job_uuid.clone();
        store.read(move |graph| Ok(graph.job(&uuid)?.clone())).await
    }
}

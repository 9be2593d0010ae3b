//! Fixed-size worker pool fed by bounded job and result channels.

use crate::config::{JobsConfig, DEFAULT_MAX_WORKERS};
use crate::error::{JobError, JobResult};
use crate::processor::{panic_message, JobExecutor};
use crate::record::JobRecord;
use futures::future::join_all;
use futures::FutureExt;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::SendTimeoutError};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, warn, Instrument};
use uuid::Uuid;

/// Channel capacity per worker.
const CHANNEL_SLOTS_PER_WORKER: usize = 10;

/// Timeouts bounding every suspension point of the pool.
#[derive(Debug, Clone, Copy)]
pub struct PoolTimeouts {
    /// Per-job wait for room in the job channel.
    pub send: Duration,

    /// Per-result wait while collecting a batch.
    pub result: Duration,

    /// Worker wait for room in the result channel.
    pub result_send: Duration,
}

impl Default for PoolTimeouts {
    fn default() -> Self {
        Self::from(&JobsConfig::default())
    }
}

impl From<&JobsConfig> for PoolTimeouts {
    fn from(config: &JobsConfig) -> Self {
        Self {
            send: config.send_timeout(),
            result: config.result_timeout(),
            result_send: config.result_send_timeout(),
        }
    }
}

/// A queued job tagged with the batch that submitted it.
#[derive(Debug)]
struct JobEnvelope {
    batch: u64,
    record: JobRecord,
}

/// Result reported by a worker for one job.
#[derive(Debug)]
pub(crate) struct JobOutcome {
    batch: u64,
    job_id: String,
    result: JobResult<()>,
}

struct PoolState {
    shutdown: bool,
    job_tx: Option<mpsc::Sender<JobEnvelope>>,
}

/// Worker pool for concurrent job processing.
///
/// Workers live for the lifetime of the pool and are reused across batches.
pub struct WorkerPool {
    /// Unique pool ID.
    id: String,

    size: usize,

    timeouts: PoolTimeouts,

    /// Shutdown flag and job sender, guarded apart from the channels.
    state: Mutex<PoolState>,

    /// Held for the duration of a batch so results are never interleaved.
    results: tokio::sync::Mutex<mpsc::Receiver<JobOutcome>>,

    /// Sequence number handed to the next batch.
    batches: AtomicU64,

    /// Secondary stop signal sent when shutdown misses its deadline.
    quit_tx: broadcast::Sender<()>,

    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Starts `max_workers` workers; zero falls back to the default size.
    ///
    /// Must be called within a Tokio runtime.
    pub(crate) fn new(executor: JobExecutor, max_workers: usize, timeouts: PoolTimeouts) -> Self {
        let size = if max_workers == 0 {
            DEFAULT_MAX_WORKERS
        } else {
            max_workers
        };
        let capacity = size * CHANNEL_SLOTS_PER_WORKER;

        let (job_tx, job_rx) = mpsc::channel(capacity);
        let (result_tx, result_rx) = mpsc::channel(capacity);
        let (quit_tx, _) = broadcast::channel(1);

        let id = format!("worker-pool-{}", Uuid::new_v4());
        let job_rx = Arc::new(tokio::sync::Mutex::new(job_rx));

        let handles = (0..size)
            .map(|worker_id| {
                let worker = Worker {
                    id: worker_id,
                    executor: executor.clone(),
                    jobs: job_rx.clone(),
                    results: result_tx.clone(),
                    quit: quit_tx.subscribe(),
                    result_send_timeout: timeouts.result_send,
                };
                tokio::spawn(
                    worker
                        .run()
                        .instrument(tracing::info_span!("worker", pool_id = %id, worker_id)),
                )
            })
            .collect();

        info!(pool_id = %id, workers = size, capacity, "Worker pool started");

        Self {
            id,
            size,
            timeouts,
            state: Mutex::new(PoolState {
                shutdown: false,
                job_tx: Some(job_tx),
            }),
            results: tokio::sync::Mutex::new(result_rx),
            batches: AtomicU64::new(0),
            quit_tx,
            handles: Mutex::new(handles),
        }
    }

    /// Processes a batch, returning one result per record in input order.
    ///
    /// Per-job failures, including enqueue and result timeouts, stay in that
    /// job's slot. Concurrent batches are serialized.
    pub async fn process_jobs(&self, records: Vec<JobRecord>) -> Vec<JobResult<()>> {
        if records.is_empty() {
            return Vec::new();
        }

        if self.is_shutdown() {
            return self.reject(&records);
        }

        let mut result_rx = self.results.lock().await;

        // shutdown may have begun while an earlier batch held the results
        let job_tx = {
            let state = self.state.lock();
            if state.shutdown {
                None
            } else {
                state.job_tx.clone()
            }
        };
        let Some(job_tx) = job_tx else {
            return self.reject(&records);
        };
        let batch = self.batches.fetch_add(1, Ordering::Relaxed);

        let total = records.len();
        let mut slots: Vec<Option<JobResult<()>>> = (0..total).map(|_| None).collect();
        let mut pending: HashMap<String, VecDeque<usize>> = HashMap::new();
        let mut outstanding = 0usize;

        for (index, record) in records.into_iter().enumerate() {
            let job_id = record.id.clone();
            match job_tx
                .send_timeout(JobEnvelope { batch, record }, self.timeouts.send)
                .await
            {
                Ok(()) => {
                    pending.entry(job_id).or_default().push_back(index);
                    outstanding += 1;
                }
                Err(SendTimeoutError::Timeout(_)) => {
                    warn!(pool_id = %self.id, job_id = %job_id, "Timed out enqueueing job");
                    slots[index] = Some(Err(JobError::EnqueueTimeout {
                        job_id,
                        timeout_secs: self.timeouts.send.as_secs(),
                    }));
                }
                Err(SendTimeoutError::Closed(_)) => {
                    slots[index] = Some(Err(JobError::PoolShutdown));
                }
            }
        }
        drop(job_tx);

        if outstanding == 0 {
            return finish(slots, || JobError::PoolShutdown);
        }

        while outstanding > 0 {
            match timeout(self.timeouts.result, result_rx.recv()).await {
                Ok(Some(outcome)) if outcome.batch != batch => {
                    warn!(
                        pool_id = %self.id,
                        job_id = %outcome.job_id,
                        batch = outcome.batch,
                        "Discarding late result from an earlier batch"
                    );
                }
                Ok(Some(outcome)) => {
                    match pending.get_mut(&outcome.job_id).and_then(VecDeque::pop_front) {
                        Some(index) => {
                            slots[index] = Some(outcome.result);
                            outstanding -= 1;
                        }
                        None => {
                            warn!(
                                pool_id = %self.id,
                                job_id = %outcome.job_id,
                                "Discarding result for a job outside this batch"
                            );
                        }
                    }
                }
                Ok(None) => {
                    warn!(pool_id = %self.id, "All workers exited while collecting results");
                    break;
                }
                Err(_) => {
                    // a timeout cannot be tied to a specific job; charge the earliest one still open
                    if let Some(index) = take_first_pending(&mut pending) {
                        warn!(pool_id = %self.id, slot = index, "Timed out waiting for job result");
                        slots[index] = Some(Err(JobError::ResultTimeout(
                            self.timeouts.result.as_secs(),
                        )));
                    }
                    outstanding -= 1;
                }
            }
        }
        drop(result_rx);

        let result_timeout_secs = self.timeouts.result.as_secs();
        let results = finish(slots, || JobError::ResultTimeout(result_timeout_secs));
        let failed = results.iter().filter(|r| r.is_err()).count();
        debug!(
            pool_id = %self.id,
            total_jobs = total,
            successful = total - failed,
            failed,
            "Batch processed"
        );

        results
    }

    fn reject(&self, records: &[JobRecord]) -> Vec<JobResult<()>> {
        warn!(pool_id = %self.id, jobs = records.len(), "Rejecting batch, pool is shutdown");
        records.iter().map(|_| Err(JobError::PoolShutdown)).collect()
    }

    /// Stops accepting jobs and waits for workers to drain the channel.
    ///
    /// A second call is a no-op. If workers are still busy at the deadline
    /// they are told to quit after their current job and an error is returned.
    pub async fn shutdown(&self, deadline: Duration) -> JobResult<()> {
        {
            let mut state = self.state.lock();
            if state.shutdown {
                return Ok(());
            }
            state.shutdown = true;
            // closes the channel once in-flight batches release their clones
            drop(state.job_tx.take());
        }

        info!(pool_id = %self.id, deadline = ?deadline, "Shutting down worker pool");
        let handles = std::mem::take(&mut *self.handles.lock());

        match timeout(deadline, join_all(handles)).await {
            Ok(joined) => {
                for result in joined {
                    if let Err(e) = result {
                        error!(pool_id = %self.id, error = %e, "Worker task ended abnormally");
                    }
                }
                info!(pool_id = %self.id, "Worker pool stopped");
                Ok(())
            }
            Err(_) => {
                let _ = self.quit_tx.send(());
                warn!(pool_id = %self.id, deadline = ?deadline, "Worker pool shutdown deadline exceeded");
                Err(JobError::ShutdownDeadline(deadline))
            }
        }
    }

    /// Returns true once shutdown has begun.
    pub fn is_shutdown(&self) -> bool {
        self.state.lock().shutdown
    }

    /// Number of workers.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Get the pool ID.
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("id", &self.id)
            .field("size", &self.size)
            .field("shutdown", &self.is_shutdown())
            .finish_non_exhaustive()
    }
}

/// Removes and returns the lowest input index still awaiting a result.
fn take_first_pending(pending: &mut HashMap<String, VecDeque<usize>>) -> Option<usize> {
    let (job_id, _) = pending
        .iter()
        .filter_map(|(id, indices)| indices.front().map(|index| (id, *index)))
        .min_by_key(|(_, index)| *index)?;
    let job_id = job_id.clone();
    pending.get_mut(&job_id).and_then(VecDeque::pop_front)
}

fn finish(
    slots: Vec<Option<JobResult<()>>>,
    unresolved: impl Fn() -> JobError,
) -> Vec<JobResult<()>> {
    slots
        .into_iter()
        .map(|slot| slot.unwrap_or_else(|| Err(unresolved())))
        .collect()
}

/// A long-lived execution unit pulling from the shared job channel.
struct Worker {
    id: usize,
    executor: JobExecutor,
    jobs: Arc<tokio::sync::Mutex<mpsc::Receiver<JobEnvelope>>>,
    results: mpsc::Sender<JobOutcome>,
    quit: broadcast::Receiver<()>,
    result_send_timeout: Duration,
}

impl Worker {
    async fn run(self) {
        let Worker {
            id,
            executor,
            jobs,
            results,
            mut quit,
            result_send_timeout,
        } = self;

        debug!("Worker started");

        loop {
            let next = tokio::select! {
                record = async { jobs.lock().await.recv().await } => record,
                _ = quit.recv() => {
                    debug!("Worker received quit signal");
                    break;
                }
            };

            // channel closed and drained
            let Some(JobEnvelope { batch, mut record }) = next else {
                break;
            };

            let job_id = record.id.clone();
            let result = match AssertUnwindSafe(executor.run(&mut record, Some(id)))
                .catch_unwind()
                .await
            {
                Ok(result) => result,
                Err(panic) => {
                    let message = panic_message(panic.as_ref());
                    error!(job_id = %job_id, panic = %message, "Job lifecycle panicked");
                    Err(JobError::Panicked(message))
                }
            };

            let outcome = JobOutcome {
                batch,
                job_id: job_id.clone(),
                result,
            };
            if let Err(e) = results.send_timeout(outcome, result_send_timeout).await {
                let reason = match e {
                    SendTimeoutError::Timeout(_) => "result channel full",
                    SendTimeoutError::Closed(_) => "result channel closed",
                };
                error!(job_id = %job_id, reason, "Failed to deliver job result");
            }
        }

        debug!("Worker stopped");
    }
}

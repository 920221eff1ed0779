//! Parallel tile scheduling.
//!
//! A fixed-size worker pool runs one acquisition job per tile. Results are
//! collected in completion order; successes are recorded in the ledger
//! immediately, so a crash mid-run loses at most the jobs still in flight.
//! Worker faults (panics) are resubmitted up to a cap; application-level
//! failures are not, because the acquisition strategy has already spent
//! its own retry budget by the time it reports one.

use std::future::Future;
use std::sync::Arc;

use futures::stream::{FuturesUnordered, StreamExt};
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, error, info, warn};

use crate::acquire::{AcquireError, AcquireOutcome, TileOutput};
use crate::ledger::{JobLedger, LedgerError};
use crate::tiler::Tile;

/// Errors that abort a scheduler run.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("fatal acquisition fault on tile {tile_id}: {source}")]
    Fatal {
        tile_id: String,
        #[source]
        source: AcquireError,
    },
}

/// Aggregate result of a scheduler run.
#[derive(Debug, Default)]
pub struct RunSummary {
    /// Tiles written during this run, in completion order.
    pub succeeded: Vec<TileOutput>,
    /// Tiles that permanently failed.
    pub failed: Vec<String>,
    /// Tiles skipped: already in the ledger, or with no source coverage.
    pub skipped: Vec<String>,
}

impl RunSummary {
    pub fn total(&self) -> usize {
        self.succeeded.len() + self.failed.len() + self.skipped.len()
    }
}

/// What happened to a pooled task.
#[derive(Debug)]
pub enum PoolOutcome<T> {
    Finished(T),
    Cancelled,
}

/// Lifecycle of one tile's acquisition within a scheduler run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    InProgress,
    Succeeded,
    Failed,
}

/// Scheduling state for one tile.
#[derive(Debug)]
pub struct AcquisitionJob {
    tile: Tile,
    status: JobStatus,
    submissions: u32,
}

impl AcquisitionJob {
    fn new(tile: Tile) -> Self {
        Self {
            tile,
            status: JobStatus::Pending,
            submissions: 0,
        }
    }

    pub fn tile(&self) -> &Tile {
        &self.tile
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    /// Number of times this job has been handed to the pool.
    pub fn submissions(&self) -> u32 {
        self.submissions
    }

    fn submit(&mut self) {
        self.submissions += 1;
        self.status = JobStatus::InProgress;
    }
}

/// Semaphore-bounded task pool.
///
/// Tasks are spawned eagerly but each waits for a permit before doing any
/// work, so at most `workers` jobs run concurrently. Closing the pool
/// cancels every task still waiting for a permit.
pub struct WorkerPool {
    semaphore: Arc<Semaphore>,
}

impl WorkerPool {
    pub fn new(workers: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(workers.max(1))),
        }
    }

    /// Spawns a future onto the pool.
    pub fn spawn<T, Fut>(&self, fut: Fut) -> JoinHandle<PoolOutcome<T>>
    where
        T: Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
    {
        let semaphore = Arc::clone(&self.semaphore);
        tokio::spawn(async move {
            let _permit = match semaphore.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return PoolOutcome::Cancelled,
            };
            PoolOutcome::Finished(fut.await)
        })
    }

    /// Closes the pool; queued tasks resolve to [`PoolOutcome::Cancelled`]
    /// without running.
    pub fn close(&self) {
        self.semaphore.close();
    }
}

/// Runs acquisition jobs across a worker pool and folds the results into
/// a [`RunSummary`].
pub struct ParallelScheduler {
    pool: WorkerPool,
    ledger: Arc<JobLedger>,
    resubmission_cap: u32,
}

impl ParallelScheduler {
    /// # Arguments
    ///
    /// * `workers` - Concurrent job limit
    /// * `resubmission_cap` - Extra submissions allowed after a worker fault
    /// * `ledger` - Completion ledger shared with previous runs
    pub fn new(workers: usize, resubmission_cap: u32, ledger: Arc<JobLedger>) -> Self {
        Self {
            pool: WorkerPool::new(workers),
            ledger,
            resubmission_cap,
        }
    }

    /// Schedules one job per tile and drains them in completion order.
    ///
    /// Tiles already present in the ledger are never submitted. The run
    /// continues past per-tile failures and aborts only on ledger or
    /// storage faults.
    pub async fn run<F, Fut>(&self, tiles: Vec<Tile>, job: F) -> Result<RunSummary, SchedulerError>
    where
        F: Fn(Tile) -> Fut,
        Fut: Future<Output = Result<AcquireOutcome, AcquireError>> + Send + 'static,
    {
        let mut summary = RunSummary::default();
        let mut jobs: Vec<AcquisitionJob> = tiles.into_iter().map(AcquisitionJob::new).collect();
        let mut in_flight = FuturesUnordered::new();

        for (index, entry) in jobs.iter_mut().enumerate() {
            let tile = entry.tile();
            if self.ledger.has_completed(tile.id()) {
                debug!(tile_id = tile.id(), "already in ledger, skipping");
                summary.skipped.push(tile.id().to_string());
                continue;
            }
            let fut = self.pool.spawn(job(tile.clone()));
            entry.submit();
            in_flight.push(track(index, fut));
        }
        info!(
            submitted = in_flight.len(),
            skipped = summary.skipped.len(),
            "scheduling tile jobs"
        );

        while let Some((index, joined)) = in_flight.next().await {
            let entry = &mut jobs[index];
            let tile_id = entry.tile().id().to_string();
            match joined {
                // Worker fault: the task itself died, not the acquisition.
                Err(join_err) => {
                    if entry.submissions() <= self.resubmission_cap {
                        let fut = self.pool.spawn(job(entry.tile().clone()));
                        entry.submit();
                        warn!(
                            tile_id = %tile_id,
                            submission = entry.submissions(),
                            error = %join_err,
                            "worker fault, resubmitting"
                        );
                        in_flight.push(track(index, fut));
                    } else {
                        error!(
                            tile_id = %tile_id,
                            error = %join_err,
                            "worker fault, resubmission cap reached"
                        );
                        entry.status = JobStatus::Failed;
                        summary.failed.push(tile_id);
                    }
                }
                Ok(PoolOutcome::Cancelled) => {
                    entry.status = JobStatus::Failed;
                    summary.failed.push(tile_id);
                }
                Ok(PoolOutcome::Finished(Ok(AcquireOutcome::Output(output)))) => {
                    if let Err(e) = self.ledger.record_completed(&output.tile_id, &output.path) {
                        self.pool.close();
                        return Err(e.into());
                    }
                    entry.status = JobStatus::Succeeded;
                    summary.succeeded.push(output);
                }
                Ok(PoolOutcome::Finished(Ok(AcquireOutcome::Skipped { tile_id }))) => {
                    entry.status = JobStatus::Succeeded;
                    summary.skipped.push(tile_id);
                }
                Ok(PoolOutcome::Finished(Err(e))) if e.is_fatal() => {
                    self.pool.close();
                    return Err(SchedulerError::Fatal {
                        tile_id,
                        source: e,
                    });
                }
                Ok(PoolOutcome::Finished(Err(e))) => {
                    warn!(tile_id = %tile_id, error = %e, "tile permanently failed");
                    entry.status = JobStatus::Failed;
                    summary.failed.push(tile_id);
                }
            }
        }

        info!(
            succeeded = summary.succeeded.len(),
            failed = summary.failed.len(),
            skipped = summary.skipped.len(),
            "scheduler run complete"
        );
        Ok(summary)
    }
}

/// Tags a join handle with its tile index so the collection loop can find
/// the originating tile after completion-order draining.
fn track<T>(
    index: usize,
    handle: JoinHandle<T>,
) -> impl Future<Output = (usize, Result<T, JoinError>)> {
    async move { (index, handle.await) }
}

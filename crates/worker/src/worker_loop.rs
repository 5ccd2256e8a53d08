//! Claim-and-run loop for one worker.
//!
//! Claims the oldest eligible job, runs the pipeline on it with a lease
//! renewal task alongside, then goes straight back to claiming. An
//! empty pool backs off exponentially with jitter so an idle fleet does
//! not hammer the database in lockstep.

use std::sync::Arc;
use std::time::Duration;

use sqlx::PgPool;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use hlsforge_core::backoff::idle_backoff;
use hlsforge_core::lease::busy_tick_interval;
use hlsforge_db::models::job::RetryDisposition;
use hlsforge_db::repositories::{JobRepo, WorkerRepo};
use hlsforge_pipeline::runner::{PipelineRunner, RunOutcome};

use crate::cancel::CancellationRegistry;

/// The claim/run half of a worker process.
pub struct WorkerLoop {
    pool: PgPool,
    worker_id: Uuid,
    capabilities: Vec<String>,
    lease_secs: u64,
    runner: Arc<PipelineRunner>,
    registry: CancellationRegistry,
}

impl WorkerLoop {
    pub fn new(
        pool: PgPool,
        worker_id: Uuid,
        capabilities: Vec<String>,
        lease_secs: u64,
        runner: Arc<PipelineRunner>,
        registry: CancellationRegistry,
    ) -> Self {
        Self {
            pool,
            worker_id,
            capabilities,
            lease_secs,
            runner,
            registry,
        }
    }

    /// Run until `shutdown` fires. A job in flight when shutdown hits
    /// is interrupted at its next boundary and released.
    pub async fn run(&self, shutdown: CancellationToken) {
        let mut consecutive_idle = 0u32;
        loop {
            if shutdown.is_cancelled() {
                break;
            }
            match self.poll_once(&shutdown).await {
                Ok(Some(_)) => consecutive_idle = 0,
                Ok(None) => {
                    consecutive_idle += 1;
                    let backoff = idle_backoff(consecutive_idle);
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(backoff) => {}
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "claim poll failed");
                    consecutive_idle += 1;
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(idle_backoff(consecutive_idle)) => {}
                    }
                }
            }
        }
        tracing::info!("worker loop stopped");
    }

    /// Claim and run at most one job. `Ok(None)` means the pool was
    /// empty.
    pub async fn poll_once(
        &self,
        shutdown: &CancellationToken,
    ) -> Result<Option<RunOutcome>, sqlx::Error> {
        let claimed = JobRepo::claim_next(
            &self.pool,
            self.worker_id,
            &self.capabilities,
            self.lease_secs as f64,
        )
        .await?;
        let Some(job) = claimed else {
            WorkerRepo::heartbeat(&self.pool, self.worker_id, None).await?;
            return Ok(None);
        };
        tracing::info!(
            job_id = job.id,
            video_id = job.video_id,
            attempt = job.attempt_number,
            max_attempts = job.max_attempts,
            "claimed job"
        );

        let token = shutdown.child_token();
        self.registry.register(job.id, token.clone());
        let renewal = tokio::spawn(renew_and_heartbeat(
            self.pool.clone(),
            job.id,
            self.worker_id,
            self.lease_secs,
            token.clone(),
        ));

        let outcome = match self.runner.run(&job, &token).await {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                tracing::warn!(job_id = job.id, error = %e, "attempt errored; requeueing");
                match JobRepo::requeue_for_retry(&self.pool, job.id, self.worker_id, &e.to_string())
                    .await
                {
                    Ok(RetryDisposition::Requeued) => Some(RunOutcome::Requeued),
                    Ok(RetryDisposition::Exhausted) => Some(RunOutcome::Failed),
                    Ok(RetryDisposition::Conflict) => Some(RunOutcome::Aborted),
                    Err(e) => {
                        tracing::warn!(job_id = job.id, error = %e, "requeue failed");
                        None
                    }
                }
            }
        };

        renewal.abort();
        self.registry.remove(job.id);
        let _ = WorkerRepo::heartbeat(&self.pool, self.worker_id, None).await;
        tracing::info!(job_id = job.id, ?outcome, "attempt finished");
        Ok(outcome.or(Some(RunOutcome::Aborted)))
    }
}

/// Renew the claim and heartbeat the worker row, ticking often enough
/// for both: at least once per heartbeat interval, so a long lease
/// never leaves the worker looking silent while it transcodes. A
/// renewal that comes back `false` means the lease was lost; the
/// runner's token is fired so it aborts at its next boundary.
async fn renew_and_heartbeat(
    pool: PgPool,
    job_id: i64,
    worker_id: Uuid,
    lease_secs: u64,
    token: CancellationToken,
) {
    let mut ticker = tokio::time::interval(busy_tick_interval(Duration::from_secs(lease_secs)));
    ticker.tick().await; // the first tick is immediate; the claim is fresh

    // Liveness and current_job_id are fresh from the moment of claim.
    let _ = WorkerRepo::heartbeat(&pool, worker_id, Some(job_id)).await;

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {}
        }
        match JobRepo::renew_lease(&pool, job_id, worker_id, lease_secs as f64).await {
            Ok(true) => {
                let _ = WorkerRepo::heartbeat(&pool, worker_id, Some(job_id)).await;
            }
            Ok(false) => {
                tracing::warn!(job_id, "lease lost; interrupting attempt");
                token.cancel();
                break;
            }
            // Transient: the next tick retries well inside the lease.
            Err(e) => tracing::warn!(job_id, error = %e, "lease renewal errored"),
        }
    }
}

//! Repository for the `jobs` table.
//!
//! Claiming uses compare-and-swap conditional updates (and
//! `FOR UPDATE SKIP LOCKED` for selection) so any number of worker
//! processes can compete for the same rows without double-processing.
//! Uses the status enums from `models::status` for all transitions —
//! no magic numbers.

use hlsforge_core::lease::DEFAULT_MAX_ATTEMPTS;
use hlsforge_core::types::DbId;
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::job::{
    CancelDisposition, CheckpointOutcome, Job, RetryDisposition, SubmitJob,
};
use crate::models::quality::QualityUpdate;
use crate::models::status::{JobStatus, JobStep, VideoStatus, WorkerStatus};
use crate::repositories::QualityRepo;

/// Column list for `jobs` queries.
const COLUMNS: &str = "\
    id, video_id, status_id, current_step_id, worker_id, required_capability, \
    claimed_at, claim_expires_at, progress_percent, attempt_number, max_attempts, \
    last_error, cancel_requested, \
    source_duration_secs, source_width, source_height, source_codec, source_has_audio, \
    started_at, last_checkpoint_at, completed_at, \
    processed_by_worker_id, processed_by_worker_name, \
    created_at, updated_at";

/// Eligibility predicate shared by `try_claim` and `claim_next`:
/// not terminal, with retry budget left, and with no live lease.
/// Callers append their own status filter.
const CLAIMABLE: &str = "\
    completed_at IS NULL \
    AND attempt_number < max_attempts \
    AND (claim_expires_at IS NULL OR claim_expires_at < NOW())";

/// How many jobs were swept by one reclaim pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReclaimStats {
    /// Stale claims cleared; jobs returned to the claimable pool.
    pub requeued: u64,
    /// Stale jobs whose retry budget was exhausted; failed permanently.
    pub failed: u64,
}

/// Provides CRUD plus the atomic claim/checkpoint operations for jobs.
pub struct JobRepo;

impl JobRepo {
    // ── Creation / lookup ────────────────────────────────────────────────

    /// Create a pending job for a video.
    ///
    /// Returns `None` when the video already has a job (the unique
    /// index on `video_id` enforces at most one job per video).
    pub async fn submit(pool: &PgPool, input: &SubmitJob) -> Result<Option<Job>, sqlx::Error> {
        let query = format!(
            "INSERT INTO jobs (video_id, required_capability, max_attempts) \
             VALUES ($1, $2, COALESCE($3, $4)) \
             ON CONFLICT (video_id) DO NOTHING \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Job>(&query)
            .bind(input.video_id)
            .bind(&input.required_capability)
            .bind(input.max_attempts)
            .bind(DEFAULT_MAX_ATTEMPTS)
            .fetch_optional(pool)
            .await
    }

    /// Find a job by its ID.
    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<Job>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM jobs WHERE id = $1");
        sqlx::query_as::<_, Job>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Find the job for a video, if one exists.
    pub async fn find_by_video_id(
        pool: &PgPool,
        video_id: DbId,
    ) -> Result<Option<Job>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM jobs WHERE video_id = $1");
        sqlx::query_as::<_, Job>(&query)
            .bind(video_id)
            .fetch_optional(pool)
            .await
    }

    // ── Claiming ─────────────────────────────────────────────────────────

    /// Atomically claim a specific job for a worker with a lease.
    ///
    /// Succeeds only if the job is claimable right now: not terminal,
    /// pending or stale-running, and with no unexpired lease. This is a
    /// single conditional UPDATE, so of any number of concurrent
    /// callers at most one wins.
    pub async fn try_claim(
        pool: &PgPool,
        job_id: DbId,
        worker_id: Uuid,
        lease_secs: f64,
    ) -> Result<bool, sqlx::Error> {
        let query = format!(
            "UPDATE jobs \
             SET worker_id = $2, \
                 claimed_at = NOW(), \
                 claim_expires_at = NOW() + make_interval(secs => $3), \
                 status_id = $4, \
                 attempt_number = attempt_number + 1, \
                 started_at = COALESCE(started_at, NOW()) \
             WHERE id = $1 AND {CLAIMABLE} AND status_id IN ($5, $4)"
        );
        let result = sqlx::query(&query)
            .bind(job_id)
            .bind(worker_id)
            .bind(lease_secs)
            .bind(JobStatus::Running.id())
            .bind(JobStatus::Pending.id())
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Claim the oldest eligible job for a worker.
    ///
    /// Eligible means pending, or running with an expired lease (its
    /// worker died). Jobs demanding a capability the worker lacks are
    /// skipped. `FOR UPDATE SKIP LOCKED` keeps concurrent claimers from
    /// serialising on (or double-claiming) the same row.
    pub async fn claim_next(
        pool: &PgPool,
        worker_id: Uuid,
        capabilities: &[String],
        lease_secs: f64,
    ) -> Result<Option<Job>, sqlx::Error> {
        let query = format!(
            "UPDATE jobs \
             SET worker_id = $1, \
                 claimed_at = NOW(), \
                 claim_expires_at = NOW() + make_interval(secs => $2), \
                 status_id = $3, \
                 attempt_number = attempt_number + 1, \
                 started_at = COALESCE(started_at, NOW()) \
             WHERE id = ( \
                 SELECT id FROM jobs \
                 WHERE {CLAIMABLE} \
                   AND status_id IN ($4, $3) \
                   AND (required_capability IS NULL OR required_capability = ANY($5)) \
                 ORDER BY created_at ASC \
                 LIMIT 1 \
                 FOR UPDATE SKIP LOCKED \
             ) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Job>(&query)
            .bind(worker_id)
            .bind(lease_secs)
            .bind(JobStatus::Running.id())
            .bind(JobStatus::Pending.id())
            .bind(capabilities)
            .fetch_optional(pool)
            .await
    }

    /// Extend the caller's lease.
    ///
    /// Returns `false` when the lease is no longer held by `worker_id`
    /// (stolen after expiry, or the job finished elsewhere); the caller
    /// must abort its attempt.
    pub async fn renew_lease(
        pool: &PgPool,
        job_id: DbId,
        worker_id: Uuid,
        lease_secs: f64,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE jobs \
             SET claim_expires_at = NOW() + make_interval(secs => $3) \
             WHERE id = $1 AND worker_id = $2 AND completed_at IS NULL",
        )
        .bind(job_id)
        .bind(worker_id)
        .bind(lease_secs)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Release a claim without touching checkpoint progress.
    pub async fn release(
        pool: &PgPool,
        job_id: DbId,
        worker_id: Uuid,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE jobs \
             SET worker_id = NULL, claimed_at = NULL, claim_expires_at = NULL \
             WHERE id = $1 AND worker_id = $2 AND completed_at IS NULL",
        )
        .bind(job_id)
        .bind(worker_id)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    // ── Checkpointing ────────────────────────────────────────────────────

    /// Durably record pipeline progress: job step + percent and any
    /// per-quality rows, in one transaction.
    ///
    /// Idempotent — re-delivering the same checkpoint leaves the same
    /// state (`GREATEST` keeps the percent monotonic, quality rows are
    /// upserts keyed by `(job_id, quality)`). Returns
    /// [`CheckpointOutcome::Conflict`] when `worker_id` no longer holds
    /// the claim, so a superseded runner aborts instead of overwriting
    /// a newer attempt's progress.
    pub async fn checkpoint(
        pool: &PgPool,
        job_id: DbId,
        worker_id: Uuid,
        step: JobStep,
        progress_percent: i16,
        quality_updates: &[QualityUpdate],
    ) -> Result<CheckpointOutcome, sqlx::Error> {
        let mut tx = pool.begin().await?;

        let result = sqlx::query(
            "UPDATE jobs \
             SET current_step_id = $3, \
                 progress_percent = GREATEST(progress_percent, $4), \
                 last_checkpoint_at = NOW() \
             WHERE id = $1 AND worker_id = $2 AND completed_at IS NULL",
        )
        .bind(job_id)
        .bind(worker_id)
        .bind(step.id())
        .bind(progress_percent)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            // Lease stolen or job finished elsewhere; drop the tx.
            return Ok(CheckpointOutcome::Conflict);
        }

        for update in quality_updates {
            QualityRepo::upsert(&mut tx, job_id, update).await?;
        }

        tx.commit().await?;
        Ok(CheckpointOutcome::Applied)
    }

    /// Persist probe results on the job row so a resumed attempt never
    /// re-probes the source.
    pub async fn record_source_info(
        pool: &PgPool,
        job_id: DbId,
        worker_id: Uuid,
        info: &hlsforge_core::ffmpeg::SourceInfo,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE jobs \
             SET source_duration_secs = $3, source_width = $4, source_height = $5, \
                 source_codec = $6, source_has_audio = $7 \
             WHERE id = $1 AND worker_id = $2 AND completed_at IS NULL",
        )
        .bind(job_id)
        .bind(worker_id)
        .bind(info.duration_secs)
        .bind(info.width as i32)
        .bind(info.height as i32)
        .bind(&info.video_codec)
        .bind(info.has_audio)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    // ── Terminal transitions ─────────────────────────────────────────────

    /// Mark a job completed: audit who finished it, release the claim,
    /// and set the parent video ready (or failed when no quality made
    /// it, per the caller's `video_status`).
    pub async fn complete(
        pool: &PgPool,
        job_id: DbId,
        worker_id: Uuid,
        worker_name: &str,
        video_status: VideoStatus,
    ) -> Result<bool, sqlx::Error> {
        let mut tx = pool.begin().await?;

        let video_id: Option<DbId> = sqlx::query_scalar(
            "UPDATE jobs \
             SET status_id = $3, current_step_id = $4, progress_percent = 100, \
                 completed_at = NOW(), \
                 processed_by_worker_id = worker_id, \
                 processed_by_worker_name = $5, \
                 worker_id = NULL, claimed_at = NULL, claim_expires_at = NULL \
             WHERE id = $1 AND worker_id = $2 AND completed_at IS NULL \
             RETURNING video_id",
        )
        .bind(job_id)
        .bind(worker_id)
        .bind(JobStatus::Completed.id())
        .bind(JobStep::Done.id())
        .bind(worker_name)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(video_id) = video_id else {
            return Ok(false);
        };

        sqlx::query("UPDATE videos SET status_id = $2 WHERE id = $1")
            .bind(video_id)
            .bind(video_status.id())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(true)
    }

    /// Mark a job permanently failed and the parent video failed.
    ///
    /// When `worker_id` is `Some`, the update is guarded on still
    /// holding the claim; `None` is for system-initiated failures
    /// (probe of an unreadable file, reclaim exhaustion).
    pub async fn fail(
        pool: &PgPool,
        job_id: DbId,
        worker_id: Option<Uuid>,
        error: &str,
    ) -> Result<bool, sqlx::Error> {
        let mut tx = pool.begin().await?;

        let video_id: Option<DbId> = sqlx::query_scalar(
            "UPDATE jobs \
             SET status_id = $3, completed_at = NOW(), last_error = $4, \
                 worker_id = NULL, claimed_at = NULL, claim_expires_at = NULL \
             WHERE id = $1 AND completed_at IS NULL \
               AND ($2::uuid IS NULL OR worker_id = $2) \
             RETURNING video_id",
        )
        .bind(job_id)
        .bind(worker_id)
        .bind(JobStatus::Failed.id())
        .bind(error)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(video_id) = video_id else {
            return Ok(false);
        };

        sqlx::query("UPDATE videos SET status_id = $2 WHERE id = $1")
            .bind(video_id)
            .bind(VideoStatus::Failed.id())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(true)
    }

    /// Requeue after a transient failure, or fail permanently once the
    /// retry budget is spent. Attempt counting happens at claim time,
    /// so this only compares and transitions.
    pub async fn requeue_for_retry(
        pool: &PgPool,
        job_id: DbId,
        worker_id: Uuid,
        error: &str,
    ) -> Result<RetryDisposition, sqlx::Error> {
        let status_id: Option<i16> = sqlx::query_scalar(
            "UPDATE jobs \
             SET status_id = CASE WHEN attempt_number >= max_attempts THEN $3 ELSE $4 END, \
                 completed_at = CASE WHEN attempt_number >= max_attempts THEN NOW() END, \
                 last_error = $5, \
                 worker_id = NULL, claimed_at = NULL, claim_expires_at = NULL \
             WHERE id = $1 AND worker_id = $2 AND completed_at IS NULL \
             RETURNING status_id",
        )
        .bind(job_id)
        .bind(worker_id)
        .bind(JobStatus::Failed.id())
        .bind(JobStatus::Pending.id())
        .bind(error)
        .fetch_optional(pool)
        .await?;

        match status_id {
            None => Ok(RetryDisposition::Conflict),
            Some(id) if id == JobStatus::Failed.id() => {
                // Budget exhausted: surface on the video as well.
                sqlx::query(
                    "UPDATE videos SET status_id = $2 \
                     WHERE id = (SELECT video_id FROM jobs WHERE id = $1)",
                )
                .bind(job_id)
                .bind(VideoStatus::Failed.id())
                .execute(pool)
                .await?;
                Ok(RetryDisposition::Exhausted)
            }
            Some(_) => Ok(RetryDisposition::Requeued),
        }
    }

    // ── Cancellation / retranscode ───────────────────────────────────────

    /// Request cancellation of a job.
    ///
    /// Unclaimed jobs are cancelled on the spot. Claimed jobs get the
    /// persistent flag set; the owning runner observes it at its next
    /// checkpoint boundary (and the coordinator fires the in-process
    /// token when the runner is local).
    pub async fn request_cancel(
        pool: &PgPool,
        job_id: DbId,
    ) -> Result<CancelDisposition, sqlx::Error> {
        let row: Option<(Option<Uuid>, Option<chrono::DateTime<chrono::Utc>>)> = sqlx::query_as(
            "UPDATE jobs SET cancel_requested = TRUE \
             WHERE id = $1 AND completed_at IS NULL \
             RETURNING worker_id, claim_expires_at",
        )
        .bind(job_id)
        .fetch_optional(pool)
        .await?;

        match row {
            None => Ok(CancelDisposition::AlreadyTerminal),
            Some((Some(worker), Some(expires))) if expires > chrono::Utc::now() => {
                Ok(CancelDisposition::FlaggedRunning(worker))
            }
            Some(_) => {
                Self::cancel(pool, job_id).await?;
                Ok(CancelDisposition::CancelledImmediately)
            }
        }
    }

    /// Move a job to the terminal `cancelled` state and release any claim.
    /// Distinct from `failed`: cancellation is not an error.
    pub async fn cancel(pool: &PgPool, job_id: DbId) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE jobs \
             SET status_id = $2, completed_at = NOW(), \
                 worker_id = NULL, claimed_at = NULL, claim_expires_at = NULL \
             WHERE id = $1 AND completed_at IS NULL",
        )
        .bind(job_id)
        .bind(JobStatus::Cancelled.id())
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Re-open a finished or idle job to redo the named qualities.
    ///
    /// The selected qualities reset to pending (others keep their
    /// completed checkpoints), the job rewinds to the transcode step,
    /// and it re-enters the claimable pool with a fresh retry budget.
    /// Refused (returns `false`) while another worker holds the claim;
    /// cancel first in that case.
    pub async fn reset_for_retranscode(
        pool: &PgPool,
        job_id: DbId,
        qualities: &[String],
    ) -> Result<bool, sqlx::Error> {
        let mut tx = pool.begin().await?;

        let video_id: Option<DbId> = sqlx::query_scalar(
            "UPDATE jobs \
             SET status_id = $2, current_step_id = $3, completed_at = NULL, \
                 progress_percent = 0, attempt_number = 0, \
                 cancel_requested = FALSE, last_error = NULL, \
                 worker_id = NULL, claimed_at = NULL, claim_expires_at = NULL, \
                 processed_by_worker_id = NULL, processed_by_worker_name = NULL \
             WHERE id = $1 \
               AND (worker_id IS NULL OR claim_expires_at < NOW()) \
             RETURNING video_id",
        )
        .bind(job_id)
        .bind(JobStatus::Pending.id())
        .bind(JobStep::Transcode.id())
        .fetch_optional(&mut *tx)
        .await?;

        let Some(video_id) = video_id else {
            return Ok(false);
        };

        sqlx::query(
            "UPDATE job_qualities \
             SET status_id = $3, segments_total = 0, segments_completed = 0, \
                 progress_percent = 0, started_at = NULL, completed_at = NULL, \
                 error_message = NULL \
             WHERE job_id = $1 AND quality = ANY($2)",
        )
        .bind(job_id)
        .bind(qualities)
        .bind(crate::models::status::QualityStatus::Pending.id())
        .execute(&mut *tx)
        .await?;

        sqlx::query("UPDATE videos SET status_id = $2 WHERE id = $1")
            .bind(video_id)
            .bind(VideoStatus::Processing.id())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(true)
    }

    // ── Reclamation ──────────────────────────────────────────────────────

    /// Sweep stale claims: jobs whose lease expired, plus jobs held by
    /// workers marked offline (no need to wait out their lease).
    ///
    /// Jobs with retry budget left go back to pending with the claim
    /// cleared; jobs that already burned every attempt fail
    /// permanently. Per-quality checkpoint rows are never touched, so
    /// the next claimer resumes instead of restarting.
    pub async fn reclaim_stale(pool: &PgPool) -> Result<ReclaimStats, sqlx::Error> {
        const STALE: &str = "\
            completed_at IS NULL AND worker_id IS NOT NULL \
            AND (claim_expires_at < NOW() \
                 OR worker_id IN (SELECT id FROM workers WHERE status_id = $1))";

        let mut tx = pool.begin().await?;

        // Exhausted: fail the job and its video rather than looping forever.
        let failed_videos: Vec<DbId> = sqlx::query_scalar(&format!(
            "UPDATE jobs \
             SET status_id = $2, completed_at = NOW(), \
                 last_error = COALESCE(last_error, 'worker lost and retry budget exhausted'), \
                 worker_id = NULL, claimed_at = NULL, claim_expires_at = NULL \
             WHERE {STALE} AND attempt_number >= max_attempts \
             RETURNING video_id"
        ))
        .bind(WorkerStatus::Offline.id())
        .bind(JobStatus::Failed.id())
        .fetch_all(&mut *tx)
        .await?;

        if !failed_videos.is_empty() {
            sqlx::query("UPDATE videos SET status_id = $2 WHERE id = ANY($1)")
                .bind(&failed_videos)
                .bind(VideoStatus::Failed.id())
                .execute(&mut *tx)
                .await?;
        }

        // The rest re-enter the claimable pool; checkpoints intact.
        let requeued = sqlx::query(&format!(
            "UPDATE jobs \
             SET status_id = $2, \
                 worker_id = NULL, claimed_at = NULL, claim_expires_at = NULL \
             WHERE {STALE} AND attempt_number < max_attempts"
        ))
        .bind(WorkerStatus::Offline.id())
        .bind(JobStatus::Pending.id())
        .execute(&mut *tx)
        .await?
        .rows_affected();

        tx.commit().await?;
        Ok(ReclaimStats {
            requeued,
            failed: failed_videos.len() as u64,
        })
    }
}

//! Repository for the `job_qualities` table.

use hlsforge_core::types::DbId;
use sqlx::{PgPool, Postgres, Transaction};

use crate::models::quality::{JobQuality, QualityUpdate};
use crate::models::status::QualityStatus;

/// Column list for `job_qualities` queries.
const COLUMNS: &str = "\
    id, job_id, quality, status_id, segments_total, segments_completed, \
    progress_percent, started_at, completed_at, error_message, \
    created_at, updated_at";

/// Provides per-quality progress rows for a job's ladder.
pub struct QualityRepo;

impl QualityRepo {
    /// Upsert one rung's state, keyed by `(job_id, quality)`.
    ///
    /// Runs inside the checkpoint transaction so the job row and its
    /// quality rows move together. `started_at`/`completed_at` are
    /// stamped once on the first transition in/out and then kept, so
    /// re-delivering the same checkpoint never rewrites history.
    pub async fn upsert(
        tx: &mut Transaction<'_, Postgres>,
        job_id: DbId,
        update: &QualityUpdate,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO job_qualities \
                 (job_id, quality, status_id, segments_total, segments_completed, \
                  progress_percent, started_at, completed_at, error_message) \
             VALUES ($1, $2, $3, $4, $5, $6, \
                     CASE WHEN $7 THEN NOW() END, \
                     CASE WHEN $8 THEN NOW() END, \
                     $9) \
             ON CONFLICT (job_id, quality) DO UPDATE SET \
                 status_id = EXCLUDED.status_id, \
                 segments_total = EXCLUDED.segments_total, \
                 segments_completed = EXCLUDED.segments_completed, \
                 progress_percent = GREATEST(job_qualities.progress_percent, EXCLUDED.progress_percent), \
                 started_at = COALESCE(job_qualities.started_at, EXCLUDED.started_at), \
                 completed_at = COALESCE(job_qualities.completed_at, EXCLUDED.completed_at), \
                 error_message = EXCLUDED.error_message",
        )
        .bind(job_id)
        .bind(&update.quality)
        .bind(update.status.id())
        .bind(update.segments_total)
        .bind(update.segments_completed)
        .bind(update.progress_percent)
        .bind(update.status != QualityStatus::Pending)
        .bind(update.status.is_terminal())
        .bind(&update.error_message)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    /// All quality rows for a job, highest-resolution naming order not
    /// guaranteed; callers sort via the preset table.
    pub async fn list_for_job(
        pool: &PgPool,
        job_id: DbId,
    ) -> Result<Vec<JobQuality>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM job_qualities WHERE job_id = $1 ORDER BY id");
        sqlx::query_as::<_, JobQuality>(&query)
            .bind(job_id)
            .fetch_all(pool)
            .await
    }

    /// One rung by its `(job_id, quality)` key.
    pub async fn find(
        pool: &PgPool,
        job_id: DbId,
        quality: &str,
    ) -> Result<Option<JobQuality>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM job_qualities WHERE job_id = $1 AND quality = $2");
        sqlx::query_as::<_, JobQuality>(&query)
            .bind(job_id)
            .bind(quality)
            .fetch_optional(pool)
            .await
    }
}

//! Repository for the `workers` table.

use sqlx::PgPool;
use uuid::Uuid;

use hlsforge_core::types::DbId;

use crate::models::status::WorkerStatus;
use crate::models::worker::{RegisterWorker, Worker};

/// Column list for `workers` queries.
const COLUMNS: &str = "\
    id, name, hostname, status_id, capabilities, current_job_id, \
    last_heartbeat_at, registered_at, created_at, updated_at";

/// Provides worker fleet registration, heartbeats, and liveness sweeps.
pub struct WorkerRepo;

impl WorkerRepo {
    /// Register a worker at process startup.
    ///
    /// Upserts by the unique `name`, so a restarted worker keeps its
    /// row (and its UUID); the freshly generated `id` is only used for
    /// a name never seen before. Returns the row actually stored.
    pub async fn register(
        pool: &PgPool,
        id: Uuid,
        input: &RegisterWorker,
    ) -> Result<Worker, sqlx::Error> {
        let query = format!(
            "INSERT INTO workers (id, name, hostname, status_id, capabilities, last_heartbeat_at) \
             VALUES ($1, $2, $3, $4, $5, NOW()) \
             ON CONFLICT (name) DO UPDATE SET \
                 hostname = EXCLUDED.hostname, \
                 status_id = EXCLUDED.status_id, \
                 capabilities = EXCLUDED.capabilities, \
                 current_job_id = NULL, \
                 last_heartbeat_at = NOW(), \
                 registered_at = NOW() \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Worker>(&query)
            .bind(id)
            .bind(&input.name)
            .bind(&input.hostname)
            .bind(WorkerStatus::Active.id())
            .bind(serde_json::json!(input.capabilities))
            .fetch_one(pool)
            .await
    }

    /// Record a heartbeat and the job currently held (if any).
    ///
    /// Returns `false` for an unknown or disabled worker; the caller
    /// should stop claiming work.
    pub async fn heartbeat(
        pool: &PgPool,
        worker_id: Uuid,
        current_job_id: Option<DbId>,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE workers \
             SET last_heartbeat_at = NOW(), current_job_id = $2, status_id = $3 \
             WHERE id = $1 AND status_id <> $4",
        )
        .bind(worker_id)
        .bind(current_job_id)
        .bind(WorkerStatus::Active.id())
        .bind(WorkerStatus::Disabled.id())
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Mark active workers with no heartbeat inside the timeout as
    /// offline. Returns how many flipped; their claims get swept by the
    /// job reclaimer on its next pass.
    pub async fn mark_stale_offline(
        pool: &PgPool,
        timeout_secs: f64,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE workers \
             SET status_id = $1, current_job_id = NULL \
             WHERE status_id = $2 \
               AND (last_heartbeat_at IS NULL \
                    OR last_heartbeat_at < NOW() - make_interval(secs => $3))",
        )
        .bind(WorkerStatus::Offline.id())
        .bind(WorkerStatus::Active.id())
        .bind(timeout_secs)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Find a worker by its ID.
    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Worker>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM workers WHERE id = $1");
        sqlx::query_as::<_, Worker>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// All registered workers, most recently heard-from first.
    pub async fn list(pool: &PgPool) -> Result<Vec<Worker>, sqlx::Error> {
        let query =
            format!("SELECT {COLUMNS} FROM workers ORDER BY last_heartbeat_at DESC NULLS LAST");
        sqlx::query_as::<_, Worker>(&query).fetch_all(pool).await
    }
}

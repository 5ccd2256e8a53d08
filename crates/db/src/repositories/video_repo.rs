//! Repository for the `videos` table (the scheduler's slice of it).

use hlsforge_core::types::DbId;
use sqlx::PgPool;

use crate::models::status::VideoStatus;
use crate::models::video::Video;

/// Column list for `videos` queries.
const COLUMNS: &str = "id, source_path, status_id, created_at, updated_at";

/// Provides video rows for intake and status rollups.
pub struct VideoRepo;

impl VideoRepo {
    /// Create a video for a newly discovered source file.
    ///
    /// Returns `None` when the path is already registered, so intake
    /// re-scans never double-submit.
    pub async fn create(pool: &PgPool, source_path: &str) -> Result<Option<Video>, sqlx::Error> {
        let query = format!(
            "INSERT INTO videos (source_path) VALUES ($1) \
             ON CONFLICT (source_path) DO NOTHING \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Video>(&query)
            .bind(source_path)
            .fetch_optional(pool)
            .await
    }

    /// Find a video by its ID.
    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<Video>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM videos WHERE id = $1");
        sqlx::query_as::<_, Video>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Find a video by its registered source path.
    pub async fn find_by_source_path(
        pool: &PgPool,
        source_path: &str,
    ) -> Result<Option<Video>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM videos WHERE source_path = $1");
        sqlx::query_as::<_, Video>(&query)
            .bind(source_path)
            .fetch_optional(pool)
            .await
    }

    /// Move a video through its lifecycle.
    pub async fn set_status(
        pool: &PgPool,
        id: DbId,
        status: VideoStatus,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("UPDATE videos SET status_id = $2 WHERE id = $1")
            .bind(id)
            .bind(status.id())
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

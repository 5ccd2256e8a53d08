//! Per-quality progress entity model and checkpoint DTO.

use hlsforge_core::types::{DbId, Timestamp};
use serde::Serialize;
use sqlx::FromRow;

use super::status::{QualityStatus, StatusId};

/// A row from the `job_qualities` table: one rung of one job's ladder.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct JobQuality {
    pub id: DbId,
    pub job_id: DbId,
    pub quality: String,
    pub status_id: StatusId,
    pub segments_total: i32,
    pub segments_completed: i32,
    pub progress_percent: i16,
    pub started_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
    pub error_message: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl JobQuality {
    pub fn status(&self) -> Option<QualityStatus> {
        QualityStatus::from_id(self.status_id)
    }
}

/// One quality's state as carried inside a checkpoint write.
///
/// Upserted keyed by `(job_id, quality)` so re-delivery of the same
/// checkpoint is harmless.
#[derive(Debug, Clone)]
pub struct QualityUpdate {
    pub quality: String,
    pub status: QualityStatus,
    pub segments_total: i32,
    pub segments_completed: i32,
    pub progress_percent: i16,
    pub error_message: Option<String>,
}

impl QualityUpdate {
    /// A fresh pending rung, as enumerated when the transcode step starts.
    pub fn pending(quality: impl Into<String>) -> Self {
        Self {
            quality: quality.into(),
            status: QualityStatus::Pending,
            segments_total: 0,
            segments_completed: 0,
            progress_percent: 0,
            error_message: None,
        }
    }
}

//! Job entity model and DTOs for the transcoding scheduler.

use hlsforge_core::types::{DbId, Timestamp};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::status::{JobStatus, JobStep, StatusId};

/// A row from the `jobs` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Job {
    pub id: DbId,
    pub video_id: DbId,
    pub status_id: StatusId,
    pub current_step_id: StatusId,
    pub worker_id: Option<Uuid>,
    pub required_capability: Option<String>,
    pub claimed_at: Option<Timestamp>,
    pub claim_expires_at: Option<Timestamp>,
    pub progress_percent: i16,
    pub attempt_number: i16,
    pub max_attempts: i16,
    pub last_error: Option<String>,
    pub cancel_requested: bool,
    pub source_duration_secs: Option<f64>,
    pub source_width: Option<i32>,
    pub source_height: Option<i32>,
    pub source_codec: Option<String>,
    pub source_has_audio: Option<bool>,
    pub started_at: Option<Timestamp>,
    pub last_checkpoint_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
    pub processed_by_worker_id: Option<Uuid>,
    pub processed_by_worker_name: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Job {
    pub fn status(&self) -> Option<JobStatus> {
        JobStatus::from_id(self.status_id)
    }

    pub fn current_step(&self) -> Option<JobStep> {
        JobStep::from_id(self.current_step_id)
    }

    /// Terminal jobs are never reclaimed or re-run.
    pub fn is_terminal(&self) -> bool {
        self.completed_at.is_some()
    }

    /// Probe metadata persisted from an earlier attempt, if any.
    /// Present iff the probe step has completed, letting resume skip
    /// re-probing entirely.
    pub fn source_info(&self) -> Option<hlsforge_core::ffmpeg::SourceInfo> {
        match (self.source_width, self.source_height) {
            (Some(w), Some(h)) if w > 0 && h > 0 => Some(hlsforge_core::ffmpeg::SourceInfo {
                duration_secs: self.source_duration_secs.unwrap_or(0.0),
                width: w as u32,
                height: h as u32,
                video_codec: self.source_codec.clone().unwrap_or_default(),
                has_audio: self.source_has_audio.unwrap_or(false),
            }),
            _ => None,
        }
    }
}

/// DTO for creating a job when an upload is detected.
#[derive(Debug, Clone, Deserialize)]
pub struct SubmitJob {
    pub video_id: DbId,
    /// Capability tag a worker must hold to claim this job, if any.
    pub required_capability: Option<String>,
    /// Override of the default retry bound, if any.
    pub max_attempts: Option<i16>,
}

/// Outcome of a checkpoint write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointOutcome {
    /// The checkpoint was durably applied.
    Applied,
    /// The caller no longer holds the claim (lease stolen or job
    /// terminal); the runner must abort without retrying.
    Conflict,
}

/// Outcome of asking for a retry after a transient failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    /// The job went back to the claimable pool.
    Requeued,
    /// The retry budget is exhausted; job and video are now failed.
    Exhausted,
    /// The caller no longer held the claim.
    Conflict,
}

/// Outcome of a cancellation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelDisposition {
    /// Job was unclaimed; it is cancelled right now.
    CancelledImmediately,
    /// A worker holds the job; the flag is set and its runner will
    /// observe it at the next checkpoint boundary.
    FlaggedRunning(Uuid),
    /// The job was already terminal; nothing to do.
    AlreadyTerminal,
}

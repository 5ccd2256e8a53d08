//! Cancellation and retranscode coordination.
//!
//! Cancellation is cross-process: the persistent `cancel_requested`
//! flag reaches whichever worker holds the claim at its next checkpoint
//! boundary. When the job happens to run in this process, the local
//! registry also fires its `CancellationToken` so the encode stops
//! immediately instead of at the boundary.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use sqlx::PgPool;
use std::path::Path;
use tokio_util::sync::CancellationToken;

use hlsforge_core::layout;
use hlsforge_core::lease::lease_expired;
use hlsforge_core::types::DbId;
use hlsforge_db::models::job::CancelDisposition;
use hlsforge_db::repositories::JobRepo;

/// Maps locally running job ids to their cancellation tokens.
#[derive(Clone, Default)]
pub struct CancellationRegistry {
    inner: Arc<Mutex<HashMap<DbId, CancellationToken>>>,
}

impl CancellationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a job the local worker just started running.
    pub fn register(&self, job_id: DbId, token: CancellationToken) {
        self.inner.lock().unwrap().insert(job_id, token);
    }

    /// Stop tracking a job once its attempt ends.
    pub fn remove(&self, job_id: DbId) {
        self.inner.lock().unwrap().remove(&job_id);
    }

    /// Fire the token for a locally running job. Returns `false` when
    /// the job is not running here.
    pub fn fire(&self, job_id: DbId) -> bool {
        match self.inner.lock().unwrap().get(&job_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }
}

/// Request cancellation of a job, wherever it runs.
pub async fn request_cancel(
    pool: &PgPool,
    registry: &CancellationRegistry,
    job_id: DbId,
) -> Result<CancelDisposition, sqlx::Error> {
    let disposition = JobRepo::request_cancel(pool, job_id).await?;
    if let CancelDisposition::FlaggedRunning(_) = disposition {
        if registry.fire(job_id) {
            tracing::info!(job_id, "fired local cancellation token");
        }
    }
    tracing::info!(job_id, ?disposition, "cancellation requested");
    Ok(disposition)
}

/// Redo specific qualities of an idle or finished job.
///
/// The chosen rungs' output directories are deleted first, then the
/// job rewinds to the transcode step with those rungs reset to pending.
/// In that order: the moment the reset lands the job is claimable, and
/// a fresh attempt must never write segments into a directory still
/// being removed. Refused while another worker holds a live claim.
pub async fn request_retranscode(
    pool: &PgPool,
    media_root: &Path,
    job_id: DbId,
    qualities: &[String],
) -> Result<bool, sqlx::Error> {
    let Some(job) = JobRepo::find_by_id(pool, job_id).await? else {
        return Ok(false);
    };
    if job.worker_id.is_some() && !lease_expired(job.claim_expires_at, Utc::now()) {
        tracing::warn!(job_id, "retranscode refused: job is claimed");
        return Ok(false);
    }

    for quality in qualities {
        if let Err(e) = layout::remove_quality_dir(media_root, job.video_id, quality).await {
            tracing::warn!(job_id, quality, error = %e, "could not remove quality dir");
            return Ok(false);
        }
    }

    // The reset re-checks the claim atomically; a claim that slipped in
    // after the pre-check refuses here and nothing re-enters the pool.
    let accepted = JobRepo::reset_for_retranscode(pool, job_id, qualities).await?;
    if !accepted {
        tracing::warn!(job_id, "retranscode refused: job is claimed");
        return Ok(false);
    }
    tracing::info!(job_id, qualities = qualities.len(), "retranscode queued");
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fire_hits_only_registered_jobs() {
        let registry = CancellationRegistry::new();
        let token = CancellationToken::new();
        registry.register(7, token.clone());

        assert!(!registry.fire(8));
        assert!(!token.is_cancelled());

        assert!(registry.fire(7));
        assert!(token.is_cancelled());

        registry.remove(7);
        assert!(!registry.fire(7));
    }
}

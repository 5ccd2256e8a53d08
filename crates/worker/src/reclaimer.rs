//! Stale-job reclaimer.
//!
//! Every worker runs this sweep; the statements are conditional
//! updates, so overlapping sweeps from several workers are harmless.

use std::time::Duration;

use sqlx::PgPool;
use tokio_util::sync::CancellationToken;

use hlsforge_db::repositories::{JobRepo, WorkerRepo};

/// Sweep loop: mark silent workers offline, then requeue or fail their
/// jobs and any job whose lease lapsed. Runs until `shutdown` fires.
pub async fn run_reclaimer(
    pool: PgPool,
    interval_secs: u64,
    heartbeat_timeout_secs: u64,
    shutdown: CancellationToken,
) {
    let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }
        if let Err(e) = sweep(&pool, heartbeat_timeout_secs).await {
            tracing::warn!(error = %e, "reclaim sweep failed");
        }
    }
    tracing::debug!("reclaimer stopped");
}

async fn sweep(pool: &PgPool, heartbeat_timeout_secs: u64) -> Result<(), sqlx::Error> {
    let offlined = WorkerRepo::mark_stale_offline(pool, heartbeat_timeout_secs as f64).await?;
    if offlined > 0 {
        tracing::warn!(offlined, "marked silent workers offline");
    }

    let stats = JobRepo::reclaim_stale(pool).await?;
    if stats.requeued > 0 || stats.failed > 0 {
        tracing::info!(
            requeued = stats.requeued,
            failed = stats.failed,
            "reclaimed stale jobs"
        );
    }
    Ok(())
}

//! Integration tests for checkpoint persistence.
//!
//! - Checkpoint writes are guarded on claim ownership
//! - Progress is monotonic under re-delivery
//! - Per-quality rows upsert idempotently with stable timestamps
//! - Probe metadata round-trips through the job row

use sqlx::PgPool;
use uuid::Uuid;

use hlsforge_core::ffmpeg::SourceInfo;
use hlsforge_db::models::job::{CheckpointOutcome, Job, SubmitJob};
use hlsforge_db::models::quality::QualityUpdate;
use hlsforge_db::models::status::{JobStep, QualityStatus};
use hlsforge_db::models::worker::RegisterWorker;
use hlsforge_db::repositories::{JobRepo, QualityRepo, VideoRepo, WorkerRepo};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

async fn claimed_job(pool: &PgPool) -> (Job, Uuid) {
    let video = VideoRepo::create(pool, "/in/a.mp4").await.unwrap().unwrap();
    let job = JobRepo::submit(
        pool,
        &SubmitJob {
            video_id: video.id,
            required_capability: None,
            max_attempts: None,
        },
    )
    .await
    .unwrap()
    .unwrap();
    let worker = WorkerRepo::register(
        pool,
        Uuid::new_v4(),
        &RegisterWorker {
            name: "w1".to_string(),
            hostname: "test-host".to_string(),
            capabilities: vec![],
        },
    )
    .await
    .unwrap();
    assert!(JobRepo::try_claim(pool, job.id, worker.id, 600.0)
        .await
        .unwrap());
    (job, worker.id)
}

fn in_progress(quality: &str, done: i32, total: i32, percent: i16) -> QualityUpdate {
    QualityUpdate {
        quality: quality.to_string(),
        status: QualityStatus::InProgress,
        segments_total: total,
        segments_completed: done,
        progress_percent: percent,
        error_message: None,
    }
}

// ---------------------------------------------------------------------------
// Test: checkpoint persists step, percent, and quality rows atomically
// ---------------------------------------------------------------------------

#[sqlx::test]
async fn test_checkpoint_persists_step_and_qualities(pool: PgPool) {
    let (job, worker) = claimed_job(&pool).await;

    let outcome = JobRepo::checkpoint(
        &pool,
        job.id,
        worker,
        JobStep::Transcode,
        40,
        &[
            in_progress("1080p", 12, 60, 20),
            QualityUpdate::pending("720p"),
        ],
    )
    .await
    .unwrap();
    assert_eq!(outcome, CheckpointOutcome::Applied);

    let reloaded = JobRepo::find_by_id(&pool, job.id).await.unwrap().unwrap();
    assert_eq!(reloaded.current_step(), Some(JobStep::Transcode));
    assert_eq!(reloaded.progress_percent, 40);
    assert!(reloaded.last_checkpoint_at.is_some());

    let rungs = QualityRepo::list_for_job(&pool, job.id).await.unwrap();
    assert_eq!(rungs.len(), 2);
    let top = QualityRepo::find(&pool, job.id, "1080p").await.unwrap().unwrap();
    assert_eq!(top.status(), Some(QualityStatus::InProgress));
    assert_eq!(top.segments_completed, 12);
    assert!(top.started_at.is_some());
    assert!(top.completed_at.is_none());
}

// ---------------------------------------------------------------------------
// Test: re-delivery never moves progress backwards
// ---------------------------------------------------------------------------

#[sqlx::test]
async fn test_checkpoint_progress_is_monotonic(pool: PgPool) {
    let (job, worker) = claimed_job(&pool).await;

    JobRepo::checkpoint(
        &pool,
        job.id,
        worker,
        JobStep::Transcode,
        40,
        &[in_progress("1080p", 24, 60, 40)],
    )
    .await
    .unwrap();

    // A stale duplicate of an earlier checkpoint arrives afterwards.
    let outcome = JobRepo::checkpoint(
        &pool,
        job.id,
        worker,
        JobStep::Transcode,
        25,
        &[in_progress("1080p", 15, 60, 25)],
    )
    .await
    .unwrap();
    assert_eq!(outcome, CheckpointOutcome::Applied);

    let reloaded = JobRepo::find_by_id(&pool, job.id).await.unwrap().unwrap();
    assert_eq!(reloaded.progress_percent, 40);
    let top = QualityRepo::find(&pool, job.id, "1080p").await.unwrap().unwrap();
    assert_eq!(top.progress_percent, 40);
}

// ---------------------------------------------------------------------------
// Test: a superseded worker cannot checkpoint over a newer attempt
// ---------------------------------------------------------------------------

#[sqlx::test]
async fn test_checkpoint_conflict_after_losing_claim(pool: PgPool) {
    let (job, worker) = claimed_job(&pool).await;

    let outcome = JobRepo::checkpoint(
        &pool,
        job.id,
        Uuid::new_v4(),
        JobStep::Transcode,
        90,
        &[],
    )
    .await
    .unwrap();
    assert_eq!(outcome, CheckpointOutcome::Conflict);

    // The rightful owner still writes fine.
    let outcome = JobRepo::checkpoint(&pool, job.id, worker, JobStep::Probe, 5, &[])
        .await
        .unwrap();
    assert_eq!(outcome, CheckpointOutcome::Applied);
}

// ---------------------------------------------------------------------------
// Test: quality rows keep their first started_at across updates
// ---------------------------------------------------------------------------

#[sqlx::test]
async fn test_quality_timestamps_are_write_once(pool: PgPool) {
    let (job, worker) = claimed_job(&pool).await;

    JobRepo::checkpoint(
        &pool,
        job.id,
        worker,
        JobStep::Transcode,
        10,
        &[in_progress("720p", 1, 40, 2)],
    )
    .await
    .unwrap();
    let first = QualityRepo::find(&pool, job.id, "720p").await.unwrap().unwrap();
    let started = first.started_at.unwrap();

    JobRepo::checkpoint(
        &pool,
        job.id,
        worker,
        JobStep::Transcode,
        30,
        &[QualityUpdate {
            quality: "720p".to_string(),
            status: QualityStatus::Completed,
            segments_total: 40,
            segments_completed: 40,
            progress_percent: 100,
            error_message: None,
        }],
    )
    .await
    .unwrap();

    let done = QualityRepo::find(&pool, job.id, "720p").await.unwrap().unwrap();
    assert_eq!(done.status(), Some(QualityStatus::Completed));
    assert_eq!(done.started_at, Some(started));
    assert!(done.completed_at.is_some());
}

// ---------------------------------------------------------------------------
// Test: probe metadata persists and round-trips
// ---------------------------------------------------------------------------

#[sqlx::test]
async fn test_record_source_info_round_trips(pool: PgPool) {
    let (job, worker) = claimed_job(&pool).await;

    let info = SourceInfo {
        duration_secs: 93.5,
        width: 1920,
        height: 1080,
        video_codec: "h264".to_string(),
        has_audio: true,
    };
    assert!(JobRepo::record_source_info(&pool, job.id, worker, &info)
        .await
        .unwrap());

    let reloaded = JobRepo::find_by_id(&pool, job.id).await.unwrap().unwrap();
    let stored = reloaded.source_info().unwrap();
    assert_eq!(stored.width, 1920);
    assert_eq!(stored.height, 1080);
    assert_eq!(stored.video_codec, "h264");
    assert!(stored.has_audio);
    assert!((stored.duration_secs - 93.5).abs() < f64::EPSILON);
}

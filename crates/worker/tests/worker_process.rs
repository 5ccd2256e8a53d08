//! Integration tests for the worker-side plumbing: the claim/run loop,
//! intake registration, and the cancellation/retranscode coordinator.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use sqlx::PgPool;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use hlsforge_core::ffmpeg::SourceInfo;
use hlsforge_core::quality::{default_presets, QualityPreset};
use hlsforge_db::models::job::{CancelDisposition, SubmitJob};
use hlsforge_db::models::status::{JobStatus, JobStep, QualityStatus, VideoStatus};
use hlsforge_db::models::worker::{RegisterWorker, Worker};
use hlsforge_db::repositories::{JobRepo, QualityRepo, VideoRepo, WorkerRepo};
use hlsforge_pipeline::executor::{SegmentProgress, TranscodeOutcome, Transcoder};
use hlsforge_pipeline::runner::{PipelineRunner, RunOutcome};
use hlsforge_worker::cancel::{self, CancellationRegistry};
use hlsforge_worker::intake;
use hlsforge_worker::worker_loop::WorkerLoop;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Transcoder that writes a playlist and succeeds immediately.
struct InstantTranscoder;

#[async_trait]
impl Transcoder for InstantTranscoder {
    async fn transcode(
        &self,
        _source: &Path,
        _preset: &QualityPreset,
        out_dir: &Path,
        _duration_secs: f64,
        _cancel: CancellationToken,
        _progress: mpsc::Sender<SegmentProgress>,
    ) -> TranscodeOutcome {
        tokio::fs::create_dir_all(out_dir).await.unwrap();
        tokio::fs::write(out_dir.join("index.m3u8"), "#EXTM3U\n")
            .await
            .unwrap();
        TranscodeOutcome::Success { segments: 10 }
    }
}

async fn seed_worker(pool: &PgPool) -> Worker {
    WorkerRepo::register(
        pool,
        Uuid::new_v4(),
        &RegisterWorker {
            name: "w1".to_string(),
            hostname: "test-host".to_string(),
            capabilities: vec![],
        },
    )
    .await
    .unwrap()
}

async fn seed_probed_job(pool: &PgPool, worker_id: Uuid) -> i64 {
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

    // Probe metadata needs an owner to record; claim, record, release.
    assert!(JobRepo::try_claim(pool, job.id, worker_id, 600.0).await.unwrap());
    let info = SourceInfo {
        duration_secs: 60.0,
        width: 1920,
        height: 1080,
        video_codec: "h264".to_string(),
        has_audio: true,
    };
    assert!(JobRepo::record_source_info(pool, job.id, worker_id, &info)
        .await
        .unwrap());
    assert!(JobRepo::release(pool, job.id, worker_id).await.unwrap());
    job.id
}

fn make_loop(pool: &PgPool, worker: &Worker, media_root: &Path) -> WorkerLoop {
    let runner = Arc::new(PipelineRunner::new(
        pool.clone(),
        worker.id,
        worker.name.clone(),
        media_root,
        default_presets(),
        Arc::new(InstantTranscoder),
    ));
    WorkerLoop::new(
        pool.clone(),
        worker.id,
        vec![],
        600,
        runner,
        CancellationRegistry::new(),
    )
}

// ---------------------------------------------------------------------------
// Test: poll_once claims, runs, and finalises one job
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../db/migrations")]
async fn test_poll_once_runs_one_job(pool: PgPool) {
    let media = tempfile::tempdir().unwrap();
    let worker = seed_worker(&pool).await;
    let job_id = seed_probed_job(&pool, worker.id).await;

    let worker_loop = make_loop(&pool, &worker, media.path());
    let shutdown = CancellationToken::new();

    let outcome = worker_loop.poll_once(&shutdown).await.unwrap();
    assert_eq!(outcome, Some(RunOutcome::Completed));

    let done = JobRepo::find_by_id(&pool, job_id).await.unwrap().unwrap();
    assert_eq!(done.status(), Some(JobStatus::Completed));
    assert_eq!(done.current_step(), Some(JobStep::Done));

    // Idle after the pool drains, with a fresh heartbeat.
    let outcome = worker_loop.poll_once(&shutdown).await.unwrap();
    assert_eq!(outcome, None);
    let refreshed = WorkerRepo::find_by_id(&pool, worker.id).await.unwrap().unwrap();
    assert!(refreshed.current_job_id.is_none());
    assert!(refreshed.last_heartbeat_at.is_some());
}

// ---------------------------------------------------------------------------
// Test: cancellation coordinator flags remote jobs, fires local tokens
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../db/migrations")]
async fn test_request_cancel_fires_local_token(pool: PgPool) {
    let worker = seed_worker(&pool).await;
    let job_id = seed_probed_job(&pool, worker.id).await;
    assert!(JobRepo::try_claim(&pool, job_id, worker.id, 600.0).await.unwrap());

    let registry = CancellationRegistry::new();
    let token = CancellationToken::new();
    registry.register(job_id, token.clone());

    let disposition = cancel::request_cancel(&pool, &registry, job_id).await.unwrap();
    assert_eq!(disposition, CancelDisposition::FlaggedRunning(worker.id));
    assert!(token.is_cancelled());

    let flagged = JobRepo::find_by_id(&pool, job_id).await.unwrap().unwrap();
    assert!(flagged.cancel_requested);
}

// ---------------------------------------------------------------------------
// Test: retranscode deletes the reset rungs' output
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../db/migrations")]
async fn test_retranscode_deletes_output_dirs(pool: PgPool) {
    let media = tempfile::tempdir().unwrap();
    let worker = seed_worker(&pool).await;
    let job_id = seed_probed_job(&pool, worker.id).await;

    // Run the job to completion so there is output to redo.
    let worker_loop = make_loop(&pool, &worker, media.path());
    let shutdown = CancellationToken::new();
    assert_eq!(
        worker_loop.poll_once(&shutdown).await.unwrap(),
        Some(RunOutcome::Completed)
    );

    let job = JobRepo::find_by_id(&pool, job_id).await.unwrap().unwrap();
    let video_dir = media.path().join(job.video_id.to_string());
    assert!(video_dir.join("720p").join("index.m3u8").exists());

    let accepted = cancel::request_retranscode(
        &pool,
        media.path(),
        job_id,
        &["720p".to_string()],
    )
    .await
    .unwrap();
    assert!(accepted);

    assert!(!video_dir.join("720p").exists());
    assert!(video_dir.join("1080p").join("index.m3u8").exists());

    let reopened = JobRepo::find_by_id(&pool, job_id).await.unwrap().unwrap();
    assert_eq!(reopened.status(), Some(JobStatus::Pending));
    assert_eq!(reopened.current_step(), Some(JobStep::Transcode));
    let rung = QualityRepo::find(&pool, job_id, "720p").await.unwrap().unwrap();
    assert_eq!(rung.status(), Some(QualityStatus::Pending));
}

// ---------------------------------------------------------------------------
// Test: retranscode on a claimed job is refused with output untouched
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../db/migrations")]
async fn test_retranscode_on_claimed_job_keeps_output(pool: PgPool) {
    let media = tempfile::tempdir().unwrap();
    let worker = seed_worker(&pool).await;
    let job_id = seed_probed_job(&pool, worker.id).await;

    let worker_loop = make_loop(&pool, &worker, media.path());
    let shutdown = CancellationToken::new();
    assert_eq!(
        worker_loop.poll_once(&shutdown).await.unwrap(),
        Some(RunOutcome::Completed)
    );

    // Redo one rung, then let a worker claim the reopened job.
    assert!(cancel::request_retranscode(&pool, media.path(), job_id, &["720p".to_string()])
        .await
        .unwrap());
    assert!(JobRepo::try_claim(&pool, job_id, worker.id, 600.0).await.unwrap());

    // While claimed, a second retranscode must refuse before it deletes
    // anything; the in-flight attempt may be writing these segments.
    let job = JobRepo::find_by_id(&pool, job_id).await.unwrap().unwrap();
    let rung_playlist = media
        .path()
        .join(job.video_id.to_string())
        .join("1080p")
        .join("index.m3u8");
    assert!(rung_playlist.exists());

    let accepted = cancel::request_retranscode(
        &pool,
        media.path(),
        job_id,
        &["1080p".to_string()],
    )
    .await
    .unwrap();
    assert!(!accepted);
    assert!(rung_playlist.exists());
    let rung = QualityRepo::find(&pool, job_id, "1080p").await.unwrap().unwrap();
    assert_eq!(rung.status(), Some(QualityStatus::Completed));
}

// ---------------------------------------------------------------------------
// Test: intake rescan registers each source exactly once
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../db/migrations")]
async fn test_intake_rescan_is_idempotent(pool: PgPool) {
    let intake_dir = tempfile::tempdir().unwrap();
    tokio::fs::write(intake_dir.path().join("a.mp4"), b"x").await.unwrap();
    tokio::fs::write(intake_dir.path().join("b.MOV"), b"x").await.unwrap();
    tokio::fs::write(intake_dir.path().join("notes.txt"), b"x").await.unwrap();

    let registered = intake::rescan(&pool, intake_dir.path()).await.unwrap();
    assert_eq!(registered, 2);

    // Nothing new the second time around.
    let registered = intake::rescan(&pool, intake_dir.path()).await.unwrap();
    assert_eq!(registered, 0);

    let video = VideoRepo::find_by_source_path(
        &pool,
        &intake_dir.path().join("a.mp4").to_string_lossy(),
    )
    .await
    .unwrap()
    .unwrap();
    assert_eq!(video.status_id, VideoStatus::Uploaded.id());
    assert!(JobRepo::find_by_video_id(&pool, video.id)
        .await
        .unwrap()
        .is_some());
}

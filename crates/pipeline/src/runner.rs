//! The per-job pipeline state machine.
//!
//! Probing → GeneratingThumbnail → Transcoding → BuildingMasterPlaylist
//! → Finalizing. Every transition is persisted through
//! `JobRepo::checkpoint`, so a job reclaimed from a dead worker resumes
//! at its last completed step and skips already-finished quality rungs
//! instead of restarting.

use std::path::PathBuf;
use std::sync::Arc;

use sqlx::PgPool;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use hlsforge_core::ffmpeg::{self, FfmpegError};
use hlsforge_core::hls;
use hlsforge_core::layout;
use hlsforge_core::progress::{overall_percent, step_floor, transcode_fraction, PipelineStep};
use hlsforge_core::quality::{select_ladder, QualityPreset};
use hlsforge_core::types::DbId;
use hlsforge_db::models::job::{CheckpointOutcome, Job, RetryDisposition};
use hlsforge_db::models::quality::QualityUpdate;
use hlsforge_db::models::status::{JobStep, QualityStatus, VideoStatus};
use hlsforge_db::repositories::{JobRepo, QualityRepo, VideoRepo};

use crate::error::PipelineError;
use crate::executor::{segment_count, FailureReason, TranscodeOutcome, Transcoder};

/// How one attempt at a job ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// The job finished; at least one quality succeeded, video ready.
    Completed,
    /// The job failed permanently.
    Failed,
    /// A cancellation request was observed and finalised.
    Cancelled,
    /// Transient failure; the job went back to the pool for another
    /// attempt from its last checkpoint.
    Requeued,
    /// The claim was lost mid-run; nothing further was written.
    Aborted,
}

/// Result of running one quality rung.
enum QualityRun {
    Completed,
    Failed(String),
    Cancelled,
    Aborted,
}

/// Runs claimed jobs end to end for one worker.
pub struct PipelineRunner {
    pool: PgPool,
    worker_id: Uuid,
    worker_name: String,
    media_root: PathBuf,
    presets: Vec<QualityPreset>,
    transcoder: Arc<dyn Transcoder>,
}

impl PipelineRunner {
    pub fn new(
        pool: PgPool,
        worker_id: Uuid,
        worker_name: impl Into<String>,
        media_root: impl Into<PathBuf>,
        presets: Vec<QualityPreset>,
        transcoder: Arc<dyn Transcoder>,
    ) -> Self {
        Self {
            pool,
            worker_id,
            worker_name: worker_name.into(),
            media_root: media_root.into(),
            presets,
            transcoder,
        }
    }

    /// Run one claimed job until a terminal outcome for this attempt.
    ///
    /// The caller owns the claim and its renewal; `cancel` is fired by
    /// the cancellation coordinator or by a failed lease renewal.
    pub async fn run(
        &self,
        job: &Job,
        cancel: &CancellationToken,
    ) -> Result<RunOutcome, PipelineError> {
        let video = VideoRepo::find_by_id(&self.pool, job.video_id)
            .await?
            .ok_or(PipelineError::OrphanedJob(job.id))?;
        let source = PathBuf::from(&video.source_path);
        let mut step = job.current_step().unwrap_or(JobStep::Probe);

        if let Some(outcome) = self.check_interrupt(job.id, cancel).await? {
            return Ok(outcome);
        }

        // ── Probe ────────────────────────────────────────────────────
        // Probe metadata persists on the job row, so a resumed attempt
        // reuses it instead of re-probing.
        let info = match job.source_info() {
            Some(info) => info,
            None => match ffmpeg::probe_source(&source).await {
                Ok(info) => {
                    if !JobRepo::record_source_info(&self.pool, job.id, self.worker_id, &info)
                        .await?
                    {
                        return Ok(RunOutcome::Aborted);
                    }
                    info
                }
                Err(
                    e @ (FfmpegError::SourceNotFound(_)
                    | FfmpegError::NoVideoStream(_)
                    | FfmpegError::ExecutionFailed { .. }
                    | FfmpegError::ParseError(_)),
                ) => {
                    // The source itself is bad; retrying cannot help.
                    tracing::error!(job_id = job.id, error = %e, "source failed probe");
                    JobRepo::fail(&self.pool, job.id, Some(self.worker_id), &format!("probe: {e}"))
                        .await?;
                    return Ok(RunOutcome::Failed);
                }
                Err(e) => return Err(e.into()),
            },
        };
        if step == JobStep::Probe {
            if !self.checkpoint(job.id, JobStep::Thumbnail, &[]).await? {
                return Ok(RunOutcome::Aborted);
            }
            step = JobStep::Thumbnail;
        }

        let ladder = select_ladder(&self.presets, info.width, info.height);

        // ── Thumbnail (non-fatal) ────────────────────────────────────
        if step == JobStep::Thumbnail {
            let thumb = layout::thumbnail_path(&self.media_root, job.video_id);
            if let Some(parent) = thumb.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            if let Err(e) = ffmpeg::extract_poster_frame(&source, &thumb, info.duration_secs).await
            {
                tracing::warn!(job_id = job.id, error = %e, "thumbnail failed; continuing");
            }
            if !self.checkpoint(job.id, JobStep::Transcode, &[]).await? {
                return Ok(RunOutcome::Aborted);
            }
            step = JobStep::Transcode;
        }

        // ── Transcode ladder ─────────────────────────────────────────
        if step == JobStep::Transcode {
            let existing = QualityRepo::list_for_job(&self.pool, job.id).await?;
            let seed: Vec<QualityUpdate> = ladder
                .iter()
                .filter(|p| !existing.iter().any(|q| q.quality == p.name))
                .map(|p| QualityUpdate::pending(&p.name))
                .collect();
            if !self.checkpoint(job.id, JobStep::Transcode, &seed).await? {
                return Ok(RunOutcome::Aborted);
            }

            let total = ladder.len();
            let mut done = existing
                .iter()
                .filter(|q| {
                    q.status() == Some(QualityStatus::Completed)
                        && ladder.iter().any(|p| p.name == q.quality)
                })
                .count();
            let mut last_failure: Option<String> = None;

            for preset in &ladder {
                if let Some(outcome) = self.check_interrupt(job.id, cancel).await? {
                    return Ok(outcome);
                }
                // Resume: completed rungs stay done; failed ones retry.
                let prior = existing.iter().find(|q| q.quality == preset.name);
                if prior.map(|q| q.status()) == Some(Some(QualityStatus::Completed)) {
                    continue;
                }

                match self
                    .run_quality(job, preset, &source, info.duration_secs, done, total, cancel)
                    .await?
                {
                    QualityRun::Completed => done += 1,
                    QualityRun::Failed(detail) => last_failure = Some(detail),
                    QualityRun::Cancelled => {
                        // No partial output survives an interruption.
                        layout::remove_quality_dir(&self.media_root, job.video_id, &preset.name)
                            .await?;
                        let outcome = self.check_interrupt(job.id, cancel).await?;
                        return Ok(outcome.unwrap_or(RunOutcome::Aborted));
                    }
                    QualityRun::Aborted => return Ok(RunOutcome::Aborted),
                }
            }

            if done == 0 {
                let error =
                    last_failure.unwrap_or_else(|| "no quality produced output".to_string());
                let disposition =
                    JobRepo::requeue_for_retry(&self.pool, job.id, self.worker_id, &error).await?;
                return Ok(match disposition {
                    RetryDisposition::Requeued => RunOutcome::Requeued,
                    RetryDisposition::Exhausted => RunOutcome::Failed,
                    RetryDisposition::Conflict => RunOutcome::Aborted,
                });
            }
            if !self.checkpoint(job.id, JobStep::MasterPlaylist, &[]).await? {
                return Ok(RunOutcome::Aborted);
            }
            step = JobStep::MasterPlaylist;
        }

        // ── Master playlist ──────────────────────────────────────────
        if step == JobStep::MasterPlaylist {
            let rows = QualityRepo::list_for_job(&self.pool, job.id).await?;
            let completed: Vec<QualityPreset> = ladder
                .iter()
                .filter(|p| {
                    rows.iter().any(|q| {
                        q.quality == p.name && q.status() == Some(QualityStatus::Completed)
                    })
                })
                .cloned()
                .collect();
            if completed.is_empty() {
                JobRepo::fail(
                    &self.pool,
                    job.id,
                    Some(self.worker_id),
                    "no completed qualities to publish",
                )
                .await?;
                return Ok(RunOutcome::Failed);
            }

            let manifest = hls::master_playlist(&completed);
            let path = layout::master_playlist_path(&self.media_root, job.video_id);
            layout::publish_file(&path, &manifest).await?;
            tracing::info!(
                job_id = job.id,
                qualities = completed.len(),
                "master playlist published"
            );
            if !self.checkpoint(job.id, JobStep::Finalize, &[]).await? {
                return Ok(RunOutcome::Aborted);
            }
        }

        // ── Finalize ─────────────────────────────────────────────────
        let finished = JobRepo::complete(
            &self.pool,
            job.id,
            self.worker_id,
            &self.worker_name,
            VideoStatus::Ready,
        )
        .await?;
        Ok(if finished {
            RunOutcome::Completed
        } else {
            RunOutcome::Aborted
        })
    }

    /// Transcode one rung, checkpointing progress as it streams in.
    async fn run_quality(
        &self,
        job: &Job,
        preset: &QualityPreset,
        source: &std::path::Path,
        duration_secs: f64,
        done: usize,
        total: usize,
        cancel: &CancellationToken,
    ) -> Result<QualityRun, PipelineError> {
        let segments_total = segment_count(duration_secs, preset.segment_secs);
        let start = QualityUpdate {
            quality: preset.name.clone(),
            status: QualityStatus::InProgress,
            segments_total,
            segments_completed: 0,
            progress_percent: 0,
            error_message: None,
        };
        if !self
            .checkpoint_at(job.id, JobStep::Transcode, done, total, 0.0, &[start])
            .await?
        {
            return Ok(QualityRun::Aborted);
        }
        tracing::info!(job_id = job.id, quality = %preset.name, "transcoding");

        let out_dir = layout::quality_dir(&self.media_root, job.video_id, &preset.name);
        let (tx, mut rx) = mpsc::channel(16);
        // A child token lets a lost claim stop the encode without
        // looking like a user cancellation.
        let local = cancel.child_token();
        let fut = self.transcoder.transcode(
            source,
            preset,
            &out_dir,
            duration_secs,
            local.clone(),
            tx,
        );
        tokio::pin!(fut);

        let mut conflicted = false;
        let outcome = loop {
            tokio::select! {
                outcome = &mut fut => break outcome,
                Some(p) = rx.recv() => {
                    let frac = if p.segments_total > 0 {
                        f64::from(p.segments_completed) / f64::from(p.segments_total)
                    } else {
                        0.0
                    };
                    let update = QualityUpdate {
                        quality: preset.name.clone(),
                        status: QualityStatus::InProgress,
                        segments_total: p.segments_total,
                        segments_completed: p.segments_completed,
                        progress_percent: (frac * 100.0) as i16,
                        error_message: None,
                    };
                    if !conflicted
                        && !self
                            .checkpoint_at(job.id, JobStep::Transcode, done, total, frac, &[update])
                            .await?
                    {
                        conflicted = true;
                        local.cancel();
                    }
                }
            }
        };
        if conflicted {
            return Ok(QualityRun::Aborted);
        }

        match outcome {
            TranscodeOutcome::Success { segments } => {
                let update = QualityUpdate {
                    quality: preset.name.clone(),
                    status: QualityStatus::Completed,
                    segments_total: segments,
                    segments_completed: segments,
                    progress_percent: 100,
                    error_message: None,
                };
                if !self
                    .checkpoint_at(job.id, JobStep::Transcode, done + 1, total, 0.0, &[update])
                    .await?
                {
                    return Ok(QualityRun::Aborted);
                }
                Ok(QualityRun::Completed)
            }
            TranscodeOutcome::Failure {
                reason: FailureReason::Cancelled,
                ..
            } => {
                if local.is_cancelled() && !cancel.is_cancelled() {
                    // Only the claim-loss token fired.
                    return Ok(QualityRun::Aborted);
                }
                Ok(QualityRun::Cancelled)
            }
            TranscodeOutcome::Failure { reason, detail } => {
                tracing::warn!(
                    job_id = job.id,
                    quality = %preset.name,
                    %reason,
                    "quality failed; continuing ladder"
                );
                let message = format!("{reason}: {detail}");
                let update = QualityUpdate {
                    quality: preset.name.clone(),
                    status: QualityStatus::Failed,
                    segments_total,
                    segments_completed: 0,
                    progress_percent: 0,
                    error_message: Some(message.clone()),
                };
                if !self
                    .checkpoint_at(job.id, JobStep::Transcode, done, total, 0.0, &[update])
                    .await?
                {
                    return Ok(QualityRun::Aborted);
                }
                Ok(QualityRun::Failed(format!("{}: {message}", preset.name)))
            }
        }
    }

    /// Checkpoint at a step's floor percent.
    async fn checkpoint(
        &self,
        job_id: DbId,
        step: JobStep,
        updates: &[QualityUpdate],
    ) -> Result<bool, PipelineError> {
        let percent = step_floor(weight_step(step));
        self.apply_checkpoint(job_id, step, percent, updates).await
    }

    /// Checkpoint mid-transcode with ladder-weighted percent.
    async fn checkpoint_at(
        &self,
        job_id: DbId,
        step: JobStep,
        done: usize,
        total: usize,
        fraction: f64,
        updates: &[QualityUpdate],
    ) -> Result<bool, PipelineError> {
        let percent =
            overall_percent(weight_step(step), transcode_fraction(done, total, fraction));
        self.apply_checkpoint(job_id, step, percent, updates).await
    }

    async fn apply_checkpoint(
        &self,
        job_id: DbId,
        step: JobStep,
        percent: i16,
        updates: &[QualityUpdate],
    ) -> Result<bool, PipelineError> {
        let outcome =
            JobRepo::checkpoint(&self.pool, job_id, self.worker_id, step, percent, updates)
                .await?;
        match outcome {
            CheckpointOutcome::Applied => Ok(true),
            CheckpointOutcome::Conflict => {
                tracing::warn!(job_id, "checkpoint conflict; claim lost, aborting attempt");
                Ok(false)
            }
        }
    }

    /// Poll for interruption at a step or quality boundary.
    ///
    /// The persistent `cancel_requested` flag means a real cancellation
    /// (possibly requested on another node) and finalises the job as
    /// cancelled. A fired token without the flag is shutdown or a lost
    /// lease: the claim is handed back so another worker resumes from
    /// the checkpoint.
    async fn check_interrupt(
        &self,
        job_id: DbId,
        cancel: &CancellationToken,
    ) -> Result<Option<RunOutcome>, PipelineError> {
        let Some(current) = JobRepo::find_by_id(&self.pool, job_id).await? else {
            return Ok(Some(RunOutcome::Aborted));
        };
        if current.cancel_requested {
            tracing::info!(job_id, "cancellation observed; finalising");
            JobRepo::cancel(&self.pool, job_id).await?;
            return Ok(Some(RunOutcome::Cancelled));
        }
        if cancel.is_cancelled() {
            tracing::info!(job_id, "attempt interrupted; releasing claim");
            let released = JobRepo::release(&self.pool, job_id, self.worker_id).await?;
            return Ok(Some(if released {
                RunOutcome::Requeued
            } else {
                RunOutcome::Aborted
            }));
        }
        Ok(None)
    }
}

fn weight_step(step: JobStep) -> PipelineStep {
    match step {
        JobStep::Probe => PipelineStep::Probe,
        JobStep::Thumbnail => PipelineStep::Thumbnail,
        JobStep::Transcode => PipelineStep::Transcode,
        JobStep::MasterPlaylist => PipelineStep::MasterPlaylist,
        JobStep::Finalize | JobStep::Done => PipelineStep::Finalize,
    }
}

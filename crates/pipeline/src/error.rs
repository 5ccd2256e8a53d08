//! Pipeline error types.

use hlsforge_core::ffmpeg::FfmpegError;
use hlsforge_core::types::DbId;
use thiserror::Error;

/// Infrastructure failures inside a pipeline run.
///
/// Tool-level failures (ffmpeg exiting badly, unreadable sources) are
/// not errors here; the executor classifies those into
/// [`crate::executor::FailureReason`] and the runner records them as
/// checkpoint state. An `Err` from the runner means the attempt could
/// not proceed and should be requeued.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Ffmpeg(#[from] FfmpegError),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("job {0} is missing its video row")]
    OrphanedJob(DbId),
}

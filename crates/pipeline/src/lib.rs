//! Transcode pipeline: the per-job state machine and the ffmpeg
//! executor it drives.
//!
//! [`runner::PipelineRunner`] takes a claimed job through probe,
//! thumbnail, per-quality transcode, master playlist, and finalize,
//! checkpointing after every step so a different worker can resume the
//! job mid-ladder. [`executor::TranscodeExecutor`] owns the ffmpeg
//! child process for one quality rung.

pub mod error;
pub mod executor;
pub mod runner;

pub use error::PipelineError;
pub use executor::{FailureReason, SegmentProgress, TranscodeExecutor, TranscodeOutcome, Transcoder};
pub use runner::{PipelineRunner, RunOutcome};

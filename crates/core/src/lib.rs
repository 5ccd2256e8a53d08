//! Pure domain logic for the HLSForge transcoding scheduler.
//!
//! This crate has zero internal dependencies so it can be used by the
//! persistence layer, the pipeline, the worker binary, and any future
//! CLI tooling alike.

pub mod backoff;
pub mod ffmpeg;
pub mod hls;
pub mod layout;
pub mod lease;
pub mod progress;
pub mod quality;
pub mod types;

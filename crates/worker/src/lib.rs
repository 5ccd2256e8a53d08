//! Worker process: claims transcode jobs, runs the pipeline, sweeps
//! stale claims, and feeds the queue from the intake directory.

pub mod cancel;
pub mod config;
pub mod intake;
pub mod reclaimer;
pub mod worker_loop;

pub use cancel::CancellationRegistry;
pub use config::WorkerConfig;
pub use worker_loop::WorkerLoop;

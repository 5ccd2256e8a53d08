//! Repository layer.
//!
//! Each repository is a zero-sized struct providing async methods that
//! accept `&PgPool` as the first argument. The claim/checkpoint/renew
//! operations on [`JobRepo`] are the only coordination primitives
//! workers share; each is a single conditional statement (or one
//! transaction) so concurrent workers can never corrupt each other.

pub mod job_repo;
pub mod quality_repo;
pub mod video_repo;
pub mod worker_repo;

pub use job_repo::JobRepo;
pub use quality_repo::QualityRepo;
pub use video_repo::VideoRepo;
pub use worker_repo::WorkerRepo;

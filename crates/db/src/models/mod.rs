//! Domain model structs and DTOs.
//!
//! Each submodule contains a `FromRow` + `Serialize` entity struct
//! matching the database row plus the DTOs its repository needs.

pub mod job;
pub mod quality;
pub mod status;
pub mod video;
pub mod worker;

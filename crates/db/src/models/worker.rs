//! Worker fleet entity model and DTOs.

use hlsforge_core::types::{DbId, Timestamp};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::status::StatusId;

/// A worker row from the `workers` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Worker {
    pub id: Uuid,
    pub name: String,
    pub hostname: String,
    pub status_id: StatusId,
    /// JSONB array of capability tags, e.g. `["hwaccel"]`.
    pub capabilities: serde_json::Value,
    pub current_job_id: Option<DbId>,
    pub last_heartbeat_at: Option<Timestamp>,
    pub registered_at: Timestamp,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Worker {
    /// Capability tags as strings, ignoring malformed entries.
    pub fn capability_tags(&self) -> Vec<String> {
        self.capabilities
            .as_array()
            .map(|a| {
                a.iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// DTO for registering a worker at process startup.
#[derive(Debug, Clone, Deserialize)]
pub struct RegisterWorker {
    pub name: String,
    pub hostname: String,
    pub capabilities: Vec<String>,
}

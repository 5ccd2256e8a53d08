//! Worker configuration loaded from environment variables.

use std::path::PathBuf;

use hlsforge_core::lease::{
    DEFAULT_LEASE_SECS, HEARTBEAT_TIMEOUT_SECS, RECLAIM_INTERVAL_SECS,
};

/// Configuration for one worker process.
///
/// All fields except `DATABASE_URL` have defaults suitable for local
/// development. In production, override via environment variables.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Postgres connection string.
    pub database_url: String,
    /// Root directory for HLS output (one subdirectory per video).
    pub media_root: PathBuf,
    /// Directory watched for newly uploaded source files.
    pub intake_dir: PathBuf,
    /// Stable worker name; identity is keyed on this across restarts.
    pub worker_name: String,
    /// Capability tags this worker advertises, e.g. `hwaccel`.
    pub capabilities: Vec<String>,
    /// Claim lease duration in seconds.
    pub lease_secs: u64,
    /// Interval between reclaimer sweeps in seconds.
    pub reclaim_interval_secs: u64,
    /// Heartbeat silence after which a worker counts as offline.
    pub heartbeat_timeout_secs: u64,
    /// Interval between full intake-directory rescans in seconds.
    pub rescan_interval_secs: u64,
}

impl WorkerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                        | Default               |
    /// |--------------------------------|-----------------------|
    /// | `DATABASE_URL`                 | (required)            |
    /// | `HLSFORGE_MEDIA_ROOT`          | `./media`             |
    /// | `HLSFORGE_INTAKE_DIR`          | `./intake`            |
    /// | `HLSFORGE_WORKER_NAME`         | `<hostname>-<pid>`    |
    /// | `HLSFORGE_CAPABILITIES`        | (empty)               |
    /// | `HLSFORGE_LEASE_SECS`          | `600`                 |
    /// | `HLSFORGE_RECLAIM_INTERVAL_SECS` | `60`                |
    /// | `HLSFORGE_HEARTBEAT_TIMEOUT_SECS` | `120`              |
    /// | `HLSFORGE_RESCAN_INTERVAL_SECS`   | `300`              |
    pub fn from_env() -> Self {
        let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");

        let media_root = std::env::var("HLSFORGE_MEDIA_ROOT")
            .unwrap_or_else(|_| "./media".into())
            .into();
        let intake_dir = std::env::var("HLSFORGE_INTAKE_DIR")
            .unwrap_or_else(|_| "./intake".into())
            .into();

        let worker_name = std::env::var("HLSFORGE_WORKER_NAME")
            .unwrap_or_else(|_| default_worker_name());

        let capabilities = parse_capabilities(
            &std::env::var("HLSFORGE_CAPABILITIES").unwrap_or_default(),
        );

        Self {
            database_url,
            media_root,
            intake_dir,
            worker_name,
            capabilities,
            lease_secs: env_u64("HLSFORGE_LEASE_SECS", DEFAULT_LEASE_SECS),
            reclaim_interval_secs: env_u64(
                "HLSFORGE_RECLAIM_INTERVAL_SECS",
                RECLAIM_INTERVAL_SECS,
            ),
            heartbeat_timeout_secs: env_u64(
                "HLSFORGE_HEARTBEAT_TIMEOUT_SECS",
                HEARTBEAT_TIMEOUT_SECS,
            ),
            rescan_interval_secs: env_u64("HLSFORGE_RESCAN_INTERVAL_SECS", 300),
        }
    }

    pub fn hostname() -> String {
        std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".into())
    }
}

fn default_worker_name() -> String {
    format!("{}-{}", WorkerConfig::hostname(), std::process::id())
}

fn env_u64(name: &str, default: u64) -> u64 {
    match std::env::var(name) {
        Ok(v) => v
            .parse()
            .unwrap_or_else(|_| panic!("{name} must be a valid u64")),
        Err(_) => default,
    }
}

fn parse_capabilities(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capabilities_parse_from_comma_list() {
        assert_eq!(
            parse_capabilities("hwaccel, hdr ,"),
            vec!["hwaccel".to_string(), "hdr".to_string()]
        );
        assert!(parse_capabilities("").is_empty());
        assert!(parse_capabilities(" , ").is_empty());
    }

    #[test]
    fn default_name_carries_pid() {
        assert!(default_worker_name().ends_with(&std::process::id().to_string()));
    }
}

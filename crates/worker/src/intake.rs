//! Upload intake: turns files appearing in the intake directory into
//! videos with pending jobs.
//!
//! Two discovery paths feed the same idempotent registration: a
//! debounced `notify` watcher for promptness, and a periodic full
//! rescan as the fallback for events lost while the worker was down.

use std::path::{Path, PathBuf};
use std::time::Duration;

use notify_debouncer_mini::new_debouncer;
use sqlx::PgPool;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use hlsforge_core::types::DbId;
use hlsforge_db::models::job::SubmitJob;
use hlsforge_db::repositories::{JobRepo, VideoRepo};

/// Debounce window for filesystem events, long enough for uploads
/// written in bursts to settle.
const DEBOUNCE: Duration = Duration::from_millis(2000);

const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mov", "mkv", "webm", "avi", "m4v", "ts", "mts"];

fn is_video_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| VIDEO_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Register one source file: a video row plus a pending job.
///
/// Idempotent on the source path; re-discovery of a known file returns
/// `None` without touching existing rows.
pub async fn register_source(pool: &PgPool, path: &Path) -> Result<Option<DbId>, sqlx::Error> {
    let source_path = path.to_string_lossy().to_string();
    let Some(video) = VideoRepo::create(pool, &source_path).await? else {
        tracing::debug!(path = %source_path, "source already registered");
        return Ok(None);
    };

    let job = JobRepo::submit(
        pool,
        &SubmitJob {
            video_id: video.id,
            required_capability: None,
            max_attempts: None,
        },
    )
    .await?;
    match job {
        Some(job) => {
            tracing::info!(video_id = video.id, job_id = job.id, path = %source_path, "job submitted");
            Ok(Some(job.id))
        }
        None => Ok(None),
    }
}

/// Walk the intake directory once and register every video file.
pub async fn rescan(pool: &PgPool, intake_dir: &Path) -> Result<usize, sqlx::Error> {
    let mut registered = 0;
    let mut entries = match tokio::fs::read_dir(intake_dir).await {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!(dir = %intake_dir.display(), error = %e, "intake rescan skipped");
            return Ok(0);
        }
    };
    loop {
        let entry = match entries.next_entry().await {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(error = %e, "intake rescan read error");
                break;
            }
        };
        let path = entry.path();
        if path.is_file() && is_video_file(&path) && register_source(pool, &path).await?.is_some()
        {
            registered += 1;
        }
    }
    Ok(registered)
}

/// Run the intake loop until `shutdown` fires.
pub async fn run_intake(
    pool: PgPool,
    intake_dir: PathBuf,
    rescan_interval_secs: u64,
    shutdown: CancellationToken,
) {
    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<PathBuf>();

    // The debouncer delivers on a std channel from its own thread;
    // bridge it into the async world.
    let watcher_guard = start_watcher(&intake_dir, event_tx, shutdown.clone());
    if watcher_guard.is_none() {
        tracing::warn!(dir = %intake_dir.display(), "intake watcher unavailable; rescan only");
    }

    let mut ticker =
        tokio::time::interval(Duration::from_secs(rescan_interval_secs.max(1)));

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                match rescan(&pool, &intake_dir).await {
                    Ok(n) if n > 0 => tracing::info!(registered = n, "intake rescan"),
                    Ok(_) => {}
                    Err(e) => tracing::warn!(error = %e, "intake rescan failed"),
                }
            }
            Some(path) = event_rx.recv() => {
                if let Err(e) = register_source(&pool, &path).await {
                    tracing::warn!(path = %path.display(), error = %e, "intake registration failed");
                }
            }
        }
    }
    tracing::debug!("intake stopped");
}

/// Start the debounced filesystem watcher. Returns `None` when the
/// watch cannot be established (missing directory, inotify limits).
fn start_watcher(
    intake_dir: &Path,
    event_tx: mpsc::UnboundedSender<PathBuf>,
    shutdown: CancellationToken,
) -> Option<std::thread::JoinHandle<()>> {
    let (tx, rx) = std::sync::mpsc::channel();
    let mut debouncer = match new_debouncer(DEBOUNCE, tx) {
        Ok(d) => d,
        Err(e) => {
            tracing::warn!(error = %e, "could not create intake debouncer");
            return None;
        }
    };
    if let Err(e) = debouncer
        .watcher()
        .watch(intake_dir, notify::RecursiveMode::NonRecursive)
    {
        tracing::warn!(dir = %intake_dir.display(), error = %e, "could not watch intake dir");
        return None;
    }

    let handle = std::thread::spawn(move || {
        // Keep the debouncer alive for the watcher's lifetime.
        let _debouncer = debouncer;
        loop {
            if shutdown.is_cancelled() {
                break;
            }
            match rx.recv_timeout(Duration::from_millis(500)) {
                Ok(Ok(events)) => {
                    for event in events {
                        if event.path.is_file() && is_video_file(&event.path) {
                            if event_tx.send(event.path).is_err() {
                                return;
                            }
                        }
                    }
                }
                Ok(Err(e)) => tracing::warn!(error = %e, "intake watch error"),
                Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {}
                Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => break,
            }
        }
    });
    Some(handle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_filter_is_case_insensitive() {
        assert!(is_video_file(Path::new("/in/a.mp4")));
        assert!(is_video_file(Path::new("/in/a.MOV")));
        assert!(!is_video_file(Path::new("/in/a.srt")));
        assert!(!is_video_file(Path::new("/in/noext")));
        assert!(!is_video_file(Path::new("/in/.mp4.partial")));
    }
}

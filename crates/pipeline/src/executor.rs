//! ffmpeg executor for one quality rung.
//!
//! Spawns ffmpeg with `-progress pipe:1`, parses the key/value stream
//! it emits on stdout, and reports segment-level progress over a
//! channel. The variant playlist is written under a temp name and only
//! renamed into place on success, so a playlist on disk never
//! references segments that were still being written when the encode
//! died.

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use hlsforge_core::hls::VARIANT_PLAYLIST_NAME;
use hlsforge_core::quality::QualityPreset;

/// How long a cancelled ffmpeg child gets to die before we stop waiting.
const KILL_GRACE: Duration = Duration::from_secs(5);

/// Minimum spacing between progress reports.
const DEFAULT_PROGRESS_INTERVAL: Duration = Duration::from_secs(2);

/// Why a transcode did not produce a playable rendition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    /// The source file is missing, truncated, or not a video.
    SourceUnreadable,
    /// ffmpeg died on a signal or could not be spawned.
    ToolCrashed,
    /// The output volume ran out of space.
    DiskFull,
    /// The cancellation token fired mid-encode.
    Cancelled,
    Unknown,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::SourceUnreadable => "source unreadable",
            Self::ToolCrashed => "tool crashed",
            Self::DiskFull => "disk full",
            Self::Cancelled => "cancelled",
            Self::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Segment-level progress for one rung.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentProgress {
    pub segments_completed: i32,
    pub segments_total: i32,
}

/// Terminal result of one rung's encode.
#[derive(Debug, Clone)]
pub enum TranscodeOutcome {
    Success { segments: i32 },
    Failure { reason: FailureReason, detail: String },
}

/// Seam between the runner and the encoder, so pipeline behaviour is
/// testable without ffmpeg on the box.
#[async_trait]
pub trait Transcoder: Send + Sync {
    async fn transcode(
        &self,
        source: &Path,
        preset: &QualityPreset,
        out_dir: &Path,
        duration_secs: f64,
        cancel: CancellationToken,
        progress: mpsc::Sender<SegmentProgress>,
    ) -> TranscodeOutcome;
}

/// Drives a real ffmpeg binary.
#[derive(Debug, Clone)]
pub struct TranscodeExecutor {
    ffmpeg_path: PathBuf,
    progress_interval: Duration,
}

impl Default for TranscodeExecutor {
    fn default() -> Self {
        Self {
            ffmpeg_path: PathBuf::from("ffmpeg"),
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
        }
    }
}

impl TranscodeExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a specific binary instead of whatever `ffmpeg` resolves to
    /// on `PATH`.
    pub fn with_binary(path: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg_path: path.into(),
            ..Self::default()
        }
    }
}

/// Number of HLS segments a source of this duration produces.
pub fn segment_count(duration_secs: f64, segment_secs: u32) -> i32 {
    if duration_secs <= 0.0 || segment_secs == 0 {
        return 0;
    }
    (duration_secs / f64::from(segment_secs)).ceil() as i32
}

#[async_trait]
impl Transcoder for TranscodeExecutor {
    async fn transcode(
        &self,
        source: &Path,
        preset: &QualityPreset,
        out_dir: &Path,
        duration_secs: f64,
        cancel: CancellationToken,
        progress: mpsc::Sender<SegmentProgress>,
    ) -> TranscodeOutcome {
        if !source.exists() {
            return TranscodeOutcome::Failure {
                reason: FailureReason::SourceUnreadable,
                detail: format!("source does not exist: {}", source.display()),
            };
        }
        if let Err(e) = tokio::fs::create_dir_all(out_dir).await {
            return TranscodeOutcome::Failure {
                reason: classify_io(&e),
                detail: format!("creating {}: {e}", out_dir.display()),
            };
        }

        let playlist = out_dir.join(VARIANT_PLAYLIST_NAME);
        let playlist_tmp = playlist.with_extension("m3u8.tmp");
        let args = build_args(source, preset, out_dir, &playlist_tmp);

        let mut child = match tokio::process::Command::new(&self.ffmpeg_path)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                return TranscodeOutcome::Failure {
                    reason: FailureReason::ToolCrashed,
                    detail: format!("spawning {}: {e}", self.ffmpeg_path.display()),
                }
            }
        };

        // Keep the stderr tail around for failure classification.
        let stderr_task = child.stderr.take().map(|mut err| {
            tokio::spawn(async move {
                let mut buf = String::new();
                let _ = err.read_to_string(&mut buf).await;
                buf
            })
        });

        let total = segment_count(duration_secs, preset.segment_secs);
        let mut completed = 0i32;
        let mut last_emit: Option<Instant> = None;

        let stdout = child.stdout.take();
        let mut cancelled = false;
        if let Some(stdout) = stdout {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                let line = tokio::select! {
                    _ = cancel.cancelled() => {
                        cancelled = true;
                        break;
                    }
                    line = lines.next_line() => line,
                };
                match line {
                    Ok(Some(line)) => {
                        if let Some(value) = line.strip_prefix("out_time_ms=") {
                            // Microseconds, despite the key name.
                            let us: i64 = value.trim().parse().unwrap_or(0);
                            let secs = us as f64 / 1_000_000.0;
                            // Only whole segments count as done.
                            let done = if preset.segment_secs > 0 {
                                (secs / f64::from(preset.segment_secs)).floor() as i32
                            } else {
                                0
                            };
                            completed = done.clamp(0, total);
                        } else if line.starts_with("progress=") {
                            let due = last_emit
                                .is_none_or(|t| t.elapsed() >= self.progress_interval);
                            if due {
                                last_emit = Some(Instant::now());
                                let _ = progress.try_send(SegmentProgress {
                                    segments_completed: completed,
                                    segments_total: total,
                                });
                            }
                        }
                    }
                    _ => break,
                }
            }
        }

        if cancelled {
            let _ = child.start_kill();
            let _ = tokio::time::timeout(KILL_GRACE, child.wait()).await;
            let _ = tokio::fs::remove_file(&playlist_tmp).await;
            return TranscodeOutcome::Failure {
                reason: FailureReason::Cancelled,
                detail: "cancelled mid-encode".to_string(),
            };
        }

        let status = match child.wait().await {
            Ok(status) => status,
            Err(e) => {
                return TranscodeOutcome::Failure {
                    reason: FailureReason::ToolCrashed,
                    detail: format!("waiting on ffmpeg: {e}"),
                }
            }
        };
        let stderr_tail = match stderr_task {
            Some(task) => tail(&task.await.unwrap_or_default(), 4000),
            None => String::new(),
        };

        if !status.success() {
            let _ = tokio::fs::remove_file(&playlist_tmp).await;
            return TranscodeOutcome::Failure {
                reason: classify_failure(status.code(), &stderr_tail),
                detail: stderr_tail,
            };
        }

        // Publish the playlist only now that every segment is on disk.
        if let Err(e) = tokio::fs::rename(&playlist_tmp, &playlist).await {
            return TranscodeOutcome::Failure {
                reason: classify_io(&e),
                detail: format!("publishing {}: {e}", playlist.display()),
            };
        }

        let _ = progress.try_send(SegmentProgress {
            segments_completed: total,
            segments_total: total,
        });
        TranscodeOutcome::Success { segments: total }
    }
}

fn build_args(
    source: &Path,
    preset: &QualityPreset,
    out_dir: &Path,
    playlist_tmp: &Path,
) -> Vec<String> {
    vec![
        "-y".into(),
        "-hide_banner".into(),
        "-nostdin".into(),
        "-i".into(),
        source.to_string_lossy().into_owned(),
        "-vf".into(),
        format!("scale={}:{}", preset.width, preset.height),
        "-c:v".into(),
        "libx264".into(),
        "-preset".into(),
        "veryfast".into(),
        "-b:v".into(),
        format!("{}k", preset.video_bitrate_kbps),
        "-maxrate".into(),
        format!("{}k", preset.video_bitrate_kbps * 107 / 100),
        "-bufsize".into(),
        format!("{}k", preset.video_bitrate_kbps * 2),
        "-c:a".into(),
        "aac".into(),
        "-b:a".into(),
        format!("{}k", preset.audio_bitrate_kbps),
        "-f".into(),
        "hls".into(),
        "-hls_time".into(),
        preset.segment_secs.to_string(),
        "-hls_playlist_type".into(),
        "vod".into(),
        "-hls_segment_filename".into(),
        out_dir
            .join("segment_%05d.ts")
            .to_string_lossy()
            .into_owned(),
        "-progress".into(),
        "pipe:1".into(),
        "-nostats".into(),
        "-loglevel".into(),
        "error".into(),
        playlist_tmp.to_string_lossy().into_owned(),
    ]
}

/// Map an ffmpeg exit into a failure class, using the stderr tail.
fn classify_failure(exit_code: Option<i32>, stderr: &str) -> FailureReason {
    if stderr.contains("No space left on device") {
        return FailureReason::DiskFull;
    }
    if stderr.contains("No such file or directory")
        || stderr.contains("Invalid data found")
        || stderr.contains("does not contain any stream")
        || stderr.contains("Permission denied")
    {
        return FailureReason::SourceUnreadable;
    }
    match exit_code {
        // Killed by a signal.
        None => FailureReason::ToolCrashed,
        Some(_) => FailureReason::Unknown,
    }
}

fn classify_io(e: &std::io::Error) -> FailureReason {
    // ENOSPC
    if e.raw_os_error() == Some(28) {
        FailureReason::DiskFull
    } else {
        FailureReason::Unknown
    }
}

fn tail(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.trim().to_string();
    }
    let start = s.len() - max;
    let start = s
        .char_indices()
        .map(|(i, _)| i)
        .find(|&i| i >= start)
        .unwrap_or(0);
    s[start..].trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use hlsforge_core::quality::default_presets;

    #[test]
    fn segment_count_rounds_up() {
        assert_eq!(segment_count(60.0, 6), 10);
        assert_eq!(segment_count(61.0, 6), 11);
        assert_eq!(segment_count(0.5, 6), 1);
        assert_eq!(segment_count(0.0, 6), 0);
        assert_eq!(segment_count(10.0, 0), 0);
    }

    #[test]
    fn classify_prefers_stderr_evidence() {
        assert_eq!(
            classify_failure(Some(1), "x.mp4: No such file or directory"),
            FailureReason::SourceUnreadable
        );
        assert_eq!(
            classify_failure(Some(1), "av_interleaved_write_frame(): No space left on device"),
            FailureReason::DiskFull
        );
        assert_eq!(
            classify_failure(Some(1), "Invalid data found when processing input"),
            FailureReason::SourceUnreadable
        );
        assert_eq!(classify_failure(None, ""), FailureReason::ToolCrashed);
        assert_eq!(classify_failure(Some(1), "some noise"), FailureReason::Unknown);
    }

    #[test]
    fn args_segment_and_publish_through_temp_playlist() {
        let preset = &default_presets()[2]; // 1080p
        let args = build_args(
            Path::new("/in/a.mp4"),
            preset,
            Path::new("/media/7/1080p"),
            Path::new("/media/7/1080p/index.m3u8.tmp"),
        );
        assert!(args.contains(&"-progress".to_string()));
        assert!(args.contains(&"pipe:1".to_string()));
        assert!(args.contains(&"scale=1920:1080".to_string()));
        assert!(args.contains(&"5000k".to_string()));
        assert!(args.contains(&"/media/7/1080p/segment_%05d.ts".to_string()));
        // The real playlist name only ever appears via rename-on-success.
        assert_eq!(args.last().unwrap(), "/media/7/1080p/index.m3u8.tmp");
    }

    #[test]
    fn tail_keeps_the_end() {
        let s = "a".repeat(10) + "ERROR";
        assert!(tail(&s, 5).ends_with("ERROR"));
        assert_eq!(tail("short", 4000), "short");
    }
}

//! FFprobe/FFmpeg helpers shared by the pipeline and tooling.
//!
//! Probing and poster-frame extraction are short synchronous subprocess
//! calls; the long-running segmented transcode lives in the pipeline
//! crate's executor.

use std::path::Path;

use serde::Deserialize;

/// Error type for ffprobe/ffmpeg invocations.
#[derive(Debug, thiserror::Error)]
pub enum FfmpegError {
    #[error("ffprobe/ffmpeg binary not found: {0}")]
    NotFound(std::io::Error),

    #[error("ffprobe/ffmpeg execution failed (exit code {exit_code:?}): {stderr}")]
    ExecutionFailed {
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("failed to parse ffprobe output: {0}")]
    ParseError(String),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("source file not found: {0}")]
    SourceNotFound(String),

    #[error("source has no video stream: {0}")]
    NoVideoStream(String),
}

/// What the probe step learns about a source file.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceInfo {
    pub duration_secs: f64,
    pub width: u32,
    pub height: u32,
    pub video_codec: String,
    pub has_audio: bool,
}

// ---------------------------------------------------------------------------
// ffprobe JSON output structures
// ---------------------------------------------------------------------------

/// Top-level ffprobe JSON output (`-print_format json -show_format -show_streams`).
#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    streams: Vec<FfprobeStream>,
    format: FfprobeFormat,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_name: Option<String>,
    codec_type: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Run `ffprobe` on a source file and return duration, resolution,
/// video codec, and audio presence.
pub async fn probe_source(path: &Path) -> Result<SourceInfo, FfmpegError> {
    if !path.exists() {
        return Err(FfmpegError::SourceNotFound(
            path.to_string_lossy().to_string(),
        ));
    }

    let output = tokio::process::Command::new("ffprobe")
        .args([
            "-v",
            "quiet",
            "-print_format",
            "json",
            "-show_format",
            "-show_streams",
        ])
        .arg(path)
        .output()
        .await
        .map_err(FfmpegError::NotFound)?;

    if !output.status.success() {
        return Err(FfmpegError::ExecutionFailed {
            exit_code: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        });
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let probe: FfprobeOutput = serde_json::from_str(&stdout)
        .map_err(|e| FfmpegError::ParseError(format!("{e}: {stdout}")))?;

    parse_source_info(&probe, path)
}

/// Extract one representative frame as a JPEG poster image.
///
/// The frame is taken a short way into the video so title cards and
/// black lead-ins are skipped when the video is long enough.
pub async fn extract_poster_frame(
    source_path: &Path,
    output_path: &Path,
    duration_secs: f64,
) -> Result<(), FfmpegError> {
    if !source_path.exists() {
        return Err(FfmpegError::SourceNotFound(
            source_path.to_string_lossy().to_string(),
        ));
    }

    let timestamp = poster_timestamp(duration_secs);

    let output = tokio::process::Command::new("ffmpeg")
        .args(["-y", "-ss", &format!("{timestamp:.3}"), "-i"])
        .arg(source_path)
        .args(["-vframes", "1", "-q:v", "2"])
        .arg(output_path)
        .output()
        .await
        .map_err(FfmpegError::NotFound)?;

    if !output.status.success() {
        return Err(FfmpegError::ExecutionFailed {
            exit_code: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        });
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Parsing helpers
// ---------------------------------------------------------------------------

fn parse_source_info(probe: &FfprobeOutput, path: &Path) -> Result<SourceInfo, FfmpegError> {
    let video = probe
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"))
        .ok_or_else(|| FfmpegError::NoVideoStream(path.to_string_lossy().to_string()))?;

    let (width, height) = match (video.width, video.height) {
        (Some(w), Some(h)) if w > 0 && h > 0 => (w, h),
        _ => {
            return Err(FfmpegError::ParseError(
                "video stream missing dimensions".to_string(),
            ))
        }
    };

    // Prefer the format-level duration; fall back to the video stream's.
    let duration_secs = probe
        .format
        .duration
        .as_deref()
        .or(video.duration.as_deref())
        .and_then(|d| d.parse::<f64>().ok())
        .unwrap_or(0.0);

    let has_audio = probe
        .streams
        .iter()
        .any(|s| s.codec_type.as_deref() == Some("audio"));

    Ok(SourceInfo {
        duration_secs,
        width,
        height,
        video_codec: video.codec_name.clone().unwrap_or_default(),
        has_audio,
    })
}

/// Where to grab the poster frame: 10% in, capped at 10 seconds.
fn poster_timestamp(duration_secs: f64) -> f64 {
    if duration_secs <= 0.0 {
        return 0.0;
    }
    (duration_secs * 0.1).min(10.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_probe(json: &str) -> FfprobeOutput {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn parses_video_and_audio_streams() {
        let probe = sample_probe(
            r#"{
                "streams": [
                    {"codec_name": "h264", "codec_type": "video", "width": 1920, "height": 1080},
                    {"codec_name": "aac", "codec_type": "audio"}
                ],
                "format": {"duration": "93.5"}
            }"#,
        );
        let info = parse_source_info(&probe, Path::new("a.mp4")).unwrap();
        assert_eq!(info.width, 1920);
        assert_eq!(info.height, 1080);
        assert_eq!(info.video_codec, "h264");
        assert!(info.has_audio);
        assert!((info.duration_secs - 93.5).abs() < f64::EPSILON);
    }

    #[test]
    fn missing_video_stream_is_an_error() {
        let probe = sample_probe(
            r#"{"streams": [{"codec_name": "aac", "codec_type": "audio"}], "format": {}}"#,
        );
        let err = parse_source_info(&probe, Path::new("a.mp3")).unwrap_err();
        assert!(matches!(err, FfmpegError::NoVideoStream(_)));
    }

    #[test]
    fn stream_duration_used_when_format_lacks_one() {
        let probe = sample_probe(
            r#"{
                "streams": [
                    {"codec_name": "vp9", "codec_type": "video", "width": 640, "height": 360, "duration": "12.0"}
                ],
                "format": {}
            }"#,
        );
        let info = parse_source_info(&probe, Path::new("a.webm")).unwrap();
        assert!((info.duration_secs - 12.0).abs() < f64::EPSILON);
        assert!(!info.has_audio);
    }

    #[test]
    fn zero_dimensions_rejected() {
        let probe = sample_probe(
            r#"{
                "streams": [{"codec_type": "video", "width": 0, "height": 0}],
                "format": {}
            }"#,
        );
        assert!(parse_source_info(&probe, Path::new("a.mp4")).is_err());
    }

    #[test]
    fn poster_timestamp_ten_percent_capped() {
        assert!((poster_timestamp(60.0) - 6.0).abs() < f64::EPSILON);
        assert!((poster_timestamp(600.0) - 10.0).abs() < f64::EPSILON);
        assert_eq!(poster_timestamp(0.0), 0.0);
    }
}

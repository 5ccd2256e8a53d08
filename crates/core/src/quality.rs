//! Quality presets and ladder selection.
//!
//! The ladder for a source video is the subset of configured presets
//! whose target resolution fits within the source. Selection is pure so
//! both the pipeline runner and status tooling agree on the ladder.

use serde::{Deserialize, Serialize};

/// Default HLS segment duration in seconds.
pub const DEFAULT_SEGMENT_SECS: u32 = 6;

/// A single output rung: resolution, bitrates, and segmenting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityPreset {
    /// Stable name used as the checkpoint key, e.g. `"1080p"`.
    pub name: String,
    pub width: u32,
    pub height: u32,
    /// Target video bitrate in kbit/s.
    pub video_bitrate_kbps: u32,
    /// Target audio bitrate in kbit/s.
    pub audio_bitrate_kbps: u32,
    /// HLS segment duration in seconds.
    pub segment_secs: u32,
}

impl QualityPreset {
    /// Total bandwidth in bits per second, as advertised in the master
    /// playlist (`BANDWIDTH` attribute).
    pub fn bandwidth_bps(&self) -> u64 {
        u64::from(self.video_bitrate_kbps + self.audio_bitrate_kbps) * 1000
    }
}

/// The built-in preset ladder, highest quality first.
pub fn default_presets() -> Vec<QualityPreset> {
    fn preset(name: &str, w: u32, h: u32, video: u32, audio: u32) -> QualityPreset {
        QualityPreset {
            name: name.to_string(),
            width: w,
            height: h,
            video_bitrate_kbps: video,
            audio_bitrate_kbps: audio,
            segment_secs: DEFAULT_SEGMENT_SECS,
        }
    }

    vec![
        preset("2160p", 3840, 2160, 14000, 192),
        preset("1440p", 2560, 1440, 8000, 192),
        preset("1080p", 1920, 1080, 5000, 160),
        preset("720p", 1280, 720, 2800, 128),
        preset("480p", 854, 480, 1400, 128),
        preset("360p", 640, 360, 800, 96),
    ]
}

/// Select the ladder for a source resolution.
///
/// Keeps every preset whose target height fits the source height. A
/// ladder is never empty: when the source is smaller than the lowest
/// preset, a single rung at the source's own resolution is produced
/// (bitrates borrowed from the lowest preset).
pub fn select_ladder(
    presets: &[QualityPreset],
    source_width: u32,
    source_height: u32,
) -> Vec<QualityPreset> {
    let mut ladder: Vec<QualityPreset> = presets
        .iter()
        .filter(|p| p.height <= source_height)
        .cloned()
        .collect();

    if ladder.is_empty() {
        if let Some(lowest) = presets.iter().min_by_key(|p| p.height) {
            let mut rung = lowest.clone();
            rung.name = format!("{source_height}p");
            rung.width = even(source_width);
            rung.height = even(source_height);
            ladder.push(rung);
        }
    }

    // Highest quality first; stable order regardless of preset input order.
    ladder.sort_by(|a, b| b.height.cmp(&a.height));
    ladder
}

/// Round down to the nearest even dimension (encoder requirement).
fn even(dim: u32) -> u32 {
    dim & !1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ladder_for_1080p_source() {
        let ladder = select_ladder(&default_presets(), 1920, 1080);
        let names: Vec<&str> = ladder.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["1080p", "720p", "480p", "360p"]);
    }

    #[test]
    fn ladder_for_4k_source_includes_everything() {
        let ladder = select_ladder(&default_presets(), 3840, 2160);
        assert_eq!(ladder.len(), default_presets().len());
        assert_eq!(ladder[0].name, "2160p");
    }

    #[test]
    fn tiny_source_gets_single_rung_at_source_resolution() {
        let ladder = select_ladder(&default_presets(), 426, 240);
        assert_eq!(ladder.len(), 1);
        assert_eq!(ladder[0].name, "240p");
        assert_eq!(ladder[0].height, 240);
        assert_eq!(ladder[0].width, 426);
        // Bitrates borrowed from the lowest configured preset.
        assert_eq!(ladder[0].video_bitrate_kbps, 800);
    }

    #[test]
    fn odd_source_dimensions_rounded_down_to_even() {
        let ladder = select_ladder(&default_presets(), 427, 241);
        assert_eq!(ladder[0].width, 426);
        assert_eq!(ladder[0].height, 240);
    }

    #[test]
    fn ladder_sorted_highest_first() {
        let mut presets = default_presets();
        presets.reverse();
        let ladder = select_ladder(&presets, 1920, 1080);
        assert_eq!(ladder[0].name, "1080p");
        assert_eq!(ladder.last().unwrap().name, "360p");
    }

    #[test]
    fn bandwidth_includes_audio() {
        let p = &default_presets()[2]; // 1080p
        assert_eq!(p.bandwidth_bps(), (5000 + 160) * 1000);
    }

    #[test]
    fn exact_height_match_included() {
        let ladder = select_ladder(&default_presets(), 1280, 720);
        let names: Vec<&str> = ladder.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["720p", "480p", "360p"]);
    }
}

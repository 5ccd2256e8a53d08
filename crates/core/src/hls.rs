//! HLS master-playlist generation.
//!
//! Only the adaptive-bitrate master manifest is built here; the
//! per-quality variant playlists are written by ffmpeg itself during
//! transcode.

use crate::quality::QualityPreset;

/// Filename of the master playlist inside a video's output directory.
pub const MASTER_PLAYLIST_NAME: &str = "master.m3u8";

/// Filename of a quality's variant playlist inside its quality directory.
pub const VARIANT_PLAYLIST_NAME: &str = "index.m3u8";

/// Relative URI of a quality's variant playlist from the master playlist.
pub fn variant_uri(quality_name: &str) -> String {
    format!("{quality_name}/{VARIANT_PLAYLIST_NAME}")
}

/// Build the master playlist text for the qualities that completed.
///
/// Variants are listed in descending bandwidth order so players pick
/// the best rendition first. The caller passes only successful
/// qualities; failed or skipped rungs must never appear here.
pub fn master_playlist(completed: &[QualityPreset]) -> String {
    let mut variants: Vec<&QualityPreset> = completed.iter().collect();
    variants.sort_by(|a, b| b.bandwidth_bps().cmp(&a.bandwidth_bps()));

    let mut out = String::from("#EXTM3U\n#EXT-X-VERSION:3\n");
    for v in variants {
        out.push_str(&format!(
            "#EXT-X-STREAM-INF:BANDWIDTH={},RESOLUTION={}x{}\n{}\n",
            v.bandwidth_bps(),
            v.width,
            v.height,
            variant_uri(&v.name),
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quality::default_presets;

    fn by_name(name: &str) -> QualityPreset {
        default_presets()
            .into_iter()
            .find(|p| p.name == name)
            .unwrap()
    }

    #[test]
    fn master_lists_variants_descending_by_bandwidth() {
        let completed = vec![by_name("360p"), by_name("1080p"), by_name("720p")];
        let m3u8 = master_playlist(&completed);

        let pos_1080 = m3u8.find("1080p/index.m3u8").unwrap();
        let pos_720 = m3u8.find("720p/index.m3u8").unwrap();
        let pos_360 = m3u8.find("360p/index.m3u8").unwrap();
        assert!(pos_1080 < pos_720);
        assert!(pos_720 < pos_360);
    }

    #[test]
    fn master_contains_only_given_qualities() {
        let completed = vec![by_name("720p")];
        let m3u8 = master_playlist(&completed);
        assert!(m3u8.contains("720p/index.m3u8"));
        assert!(!m3u8.contains("1080p"));
        assert!(!m3u8.contains("480p"));
    }

    #[test]
    fn master_starts_with_extm3u_header() {
        let m3u8 = master_playlist(&[by_name("480p")]);
        assert!(m3u8.starts_with("#EXTM3U\n"));
        assert!(m3u8.contains("#EXT-X-VERSION:3"));
    }

    #[test]
    fn stream_inf_carries_bandwidth_and_resolution() {
        let m3u8 = master_playlist(&[by_name("720p")]);
        assert!(m3u8.contains("BANDWIDTH=2928000"));
        assert!(m3u8.contains("RESOLUTION=1280x720"));
    }

    #[test]
    fn empty_input_yields_header_only() {
        let m3u8 = master_playlist(&[]);
        assert_eq!(m3u8, "#EXTM3U\n#EXT-X-VERSION:3\n");
    }
}

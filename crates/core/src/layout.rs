//! Output directory layout and atomic publish discipline.
//!
//! All output for a video lives under `<media_root>/<video_id>/`, one
//! subdirectory per quality plus the master playlist and thumbnail.
//! Files that must never be observed half-written (playlists) are
//! written to a temp name and renamed into place.

use std::path::{Path, PathBuf};

use crate::types::DbId;

/// Directory holding all output for one video.
pub fn video_dir(media_root: &Path, video_id: DbId) -> PathBuf {
    media_root.join(video_id.to_string())
}

/// Directory holding one quality's segments and variant playlist.
/// Written only by the current lease holder, so no cross-worker races.
pub fn quality_dir(media_root: &Path, video_id: DbId, quality_name: &str) -> PathBuf {
    video_dir(media_root, video_id).join(quality_name)
}

/// Path of the master playlist for a video.
pub fn master_playlist_path(media_root: &Path, video_id: DbId) -> PathBuf {
    video_dir(media_root, video_id).join(crate::hls::MASTER_PLAYLIST_NAME)
}

/// Path of the poster thumbnail for a video.
pub fn thumbnail_path(media_root: &Path, video_id: DbId) -> PathBuf {
    video_dir(media_root, video_id).join("poster.jpg")
}

/// Write `contents` to `path` atomically: write a `.tmp` sibling, then
/// rename over the final name. Readers either see the old file or the
/// complete new one.
pub async fn publish_file(path: &Path, contents: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, contents).await?;
    tokio::fs::rename(&tmp, path).await
}

/// Remove one quality's output directory, ignoring it not existing.
/// Used on cancellation and retranscode so stale segments never
/// survive under new segment numbering.
pub async fn remove_quality_dir(
    media_root: &Path,
    video_id: DbId,
    quality_name: &str,
) -> std::io::Result<()> {
    let dir = quality_dir(media_root, video_id, quality_name);
    match tokio::fs::remove_dir_all(&dir).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_nest_under_video_id() {
        let root = Path::new("/media");
        assert_eq!(video_dir(root, 7), PathBuf::from("/media/7"));
        assert_eq!(
            quality_dir(root, 7, "720p"),
            PathBuf::from("/media/7/720p")
        );
        assert_eq!(
            master_playlist_path(root, 7),
            PathBuf::from("/media/7/master.m3u8")
        );
        assert_eq!(thumbnail_path(root, 7), PathBuf::from("/media/7/poster.jpg"));
    }

    #[tokio::test]
    async fn publish_file_creates_parents_and_leaves_no_tmp() {
        let tmp = tempfile::tempdir().unwrap();
        let target = tmp.path().join("42").join("master.m3u8");

        publish_file(&target, "#EXTM3U\n").await.unwrap();

        let written = tokio::fs::read_to_string(&target).await.unwrap();
        assert_eq!(written, "#EXTM3U\n");
        assert!(!target.with_extension("tmp").exists());
    }

    #[tokio::test]
    async fn publish_file_replaces_existing() {
        let tmp = tempfile::tempdir().unwrap();
        let target = tmp.path().join("master.m3u8");

        publish_file(&target, "old").await.unwrap();
        publish_file(&target, "new").await.unwrap();

        assert_eq!(tokio::fs::read_to_string(&target).await.unwrap(), "new");
    }

    #[tokio::test]
    async fn remove_quality_dir_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = quality_dir(tmp.path(), 7, "720p");
        tokio::fs::create_dir_all(&dir).await.unwrap();
        tokio::fs::write(dir.join("seg_000.ts"), b"x").await.unwrap();

        remove_quality_dir(tmp.path(), 7, "720p").await.unwrap();
        assert!(!dir.exists());

        // Second removal of a missing dir is fine.
        remove_quality_dir(tmp.path(), 7, "720p").await.unwrap();
    }
}

use std::collections::HashMap;
use std::path::Path;

use color_eyre::{Result, eyre::Context};
use tokio_util::sync::CancellationToken;

use crate::catalog::Track;
use crate::ports::music_service::MusicService;
use crate::progress::Progress;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LyricsSummary {
    pub checked: usize,
    pub updated: usize,
    pub failed: usize,
}

/// Write `contents` to `path` unless the file already holds exactly that.
///
/// Returns whether the file was written.
pub async fn write_if_changed(path: &Path, contents: &str) -> Result<bool> {
    if let Ok(existing) = tokio::fs::read_to_string(path).await
        && existing == contents
    {
        return Ok(false);
    }
    tokio::fs::write(path, contents)
        .await
        .wrap_err(format!("Failed to write lyric: {}", path.display()))?;
    Ok(true)
}

/// Keep `<display_name>.lrc` next to every track in sync with the service.
///
/// `overrides` maps a track id to the id whose lyric should be used instead.
/// A lyric that cannot be fetched is reported and skipped.
pub async fn sync_lyrics<S: MusicService>(
    service: &S,
    tracks: &[Track],
    directory: &Path,
    overrides: &HashMap<u64, u64>,
    progress: &dyn Progress,
    cancel: &CancellationToken,
) -> Result<LyricsSummary> {
    let total = tracks.len();
    let mut summary = LyricsSummary::default();

    for (i, track) in tracks.iter().enumerate() {
        if cancel.is_cancelled() {
            break;
        }
        let file_name = format!("{}.lrc", track.display_name);
        progress.item(i + 1, total, &format!("Checking {}", file_name));
        summary.checked += 1;

        let lyric_id = overrides.get(&track.id).copied().unwrap_or(track.id);
        let lyric = match service.lyric(lyric_id).await {
            Ok(lyric) => lyric,
            Err(e) => {
                progress.warn(&format!("Could not fetch lyric for {}: {:#}", track.display_name, e));
                summary.failed += 1;
                continue;
            }
        };

        let Some(lyric) = lyric else {
            log::debug!("No lyric for track {} ({})", track.id, lyric_id);
            continue;
        };
        if write_if_changed(&directory.join(&file_name), &lyric).await? {
            progress.line("Updated");
            summary.updated += 1;
        }
    }

    Ok(summary)
}

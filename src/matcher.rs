use crate::catalog::Track;
use crate::inventory::Inventory;

/// Name-based pass over the catalog.
///
/// A track with a stored file name only matches that exact name. Any other track
/// matches the first `display_name + extension` present in the inventory, trying
/// `extensions` in order. Matched names are claimed so no other track can take them.
///
/// Returns the number of tracks found locally.
pub fn match_by_name(tracks: &mut [Track], inventory: &mut Inventory, extensions: &[String]) -> usize {
    let mut matched = 0;

    for track in tracks.iter_mut() {
        let found = match &track.stored_file_name {
            Some(file_name) => inventory.contains(file_name).then(|| file_name.clone()),
            None => extensions
                .iter()
                .map(|ext| format!("{}{}", track.display_name, ext))
                .find(|candidate| inventory.contains(candidate)),
        };

        match found {
            Some(file_name) => {
                inventory.claim(&file_name);
                log::debug!("Track {} found locally as {}", track.id, file_name);
                track.stored_file_name = Some(file_name);
                track.need_download = false;
                matched += 1;
            }
            None => {
                track.need_download = true;
            }
        }
    }

    log::info!(
        "{} of {} tracks found by name, {} local files unclaimed",
        matched,
        tracks.len(),
        inventory.len()
    );
    matched
}

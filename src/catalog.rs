use std::collections::HashMap;

use crate::ports::music_service::{CloudEntry, PlaylistTrack};

/// Characters that are not allowed in file names on common filesystems,
/// paired with their full-width lookalikes.
const RESERVED_CHARS: [(char, char); 9] = [
    ('\\', '＼'),
    ('/', '／'),
    ('?', '？'),
    (':', '：'),
    ('*', '＊'),
    ('"', '＂'),
    ('<', '＜'),
    ('>', '＞'),
    ('|', '｜'),
];

#[derive(Debug, Clone)]
pub struct NameOptions {
    pub artist_separator: String,
    pub max_name_bytes: Option<usize>,
}

impl Default for NameOptions {
    fn default() -> Self {
        Self {
            artist_separator: ",".to_string(),
            max_name_bytes: None,
        }
    }
}

/// A playlist entry being reconciled against the local directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Track {
    pub id: u64,
    /// Sanitized `artists - name`, used as the file stem
    pub display_name: String,
    /// Exact local file name, known up front for cloud uploads and set by the matcher otherwise
    pub stored_file_name: Option<String>,
    /// Uploaded to the account cloud; resolved with the main account cookie
    pub in_cloud: bool,
    pub need_download: bool,
    pub artists: Vec<String>,
}

impl Track {
    pub fn new(id: u64, display_name: impl Into<String>) -> Self {
        Self {
            id,
            display_name: display_name.into(),
            stored_file_name: None,
            in_cloud: false,
            need_download: true,
            artists: Vec::new(),
        }
    }
}

pub fn replace_reserved_chars(name: &str) -> String {
    name.chars()
        .map(|c| {
            RESERVED_CHARS
                .iter()
                .find(|(reserved, _)| *reserved == c)
                .map(|(_, replacement)| *replacement)
                .unwrap_or(c)
        })
        .collect()
}

/// Build `artist1<sep>artist2 - title`.
///
/// When the result is longer than `max_name_bytes`, artists are dropped from the end
/// and replaced by `...(N)` until the name fits or no artist is left.
pub fn song_name(artists: &[String], title: &str, options: &NameOptions) -> String {
    let build = |parts: &[String]| {
        replace_reserved_chars(&format!(
            "{} - {}",
            parts.join(&options.artist_separator),
            title
        ))
    };

    let mut name = build(artists);
    let Some(max_bytes) = options.max_name_bytes else {
        return name;
    };

    let mut kept = artists.len();
    while name.len() > max_bytes && kept > 0 {
        kept -= 1;
        let mut parts = artists[..kept].to_vec();
        parts.push(format!("...({})", artists.len()));
        name = build(&parts);
    }
    name
}

/// Strip the last extension, `song.mp3` -> `song`
pub fn remove_extension(file_name: &str) -> &str {
    match file_name.rfind('.') {
        Some(index) => &file_name[..index],
        None => file_name,
    }
}

/// Combine the playlist with the account's cloud uploads into the ordered track list.
pub fn build_tracks(
    playlist: &[PlaylistTrack],
    cloud: &[CloudEntry],
    options: &NameOptions,
) -> Vec<Track> {
    let cloud_by_id: HashMap<u64, &CloudEntry> =
        cloud.iter().map(|entry| (entry.song_id, entry)).collect();

    playlist
        .iter()
        .map(|entry| {
            let mut track = Track::new(entry.id, song_name(&entry.artists, &entry.name, options));
            track.artists = entry.artists.clone();
            if let Some(cloud_entry) = cloud_by_id.get(&entry.id) {
                track.in_cloud = true;
                track.display_name = remove_extension(&cloud_entry.file_name).to_string();
                track.stored_file_name = Some(cloud_entry.file_name.clone());
            }
            track
        })
        .collect()
}

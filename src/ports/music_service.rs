use color_eyre::eyre::Result;

/// Decoupled representation of a playlist entry from the API.
#[derive(Debug, Clone)]
pub struct PlaylistTrack {
    pub id: u64,
    pub name: String,
    pub artists: Vec<String>,
}

/// A file the account uploaded to its cloud drive.
#[derive(Debug, Clone)]
pub struct CloudEntry {
    pub song_id: u64,
    pub file_name: String,
}

/// Where and how to fetch a single track, as reported by the resolver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchDescriptor {
    pub track_id: u64,
    pub url: Option<String>,
    /// Lowercase hex MD5 of the file behind `url`
    pub checksum: Option<String>,
    pub bitrate: u64,
    /// File extension without the dot, e.g. `flac`
    pub media_type: Option<String>,
    pub status: i64,
}

/// Port trait wrapping the music service capabilities used by the sync pipeline.
///
/// Implementations live in `services::ncm_client` (production) or test mocks.
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait MusicService: Send + Sync {
    async fn playlist_tracks(&self, playlist_id: u64, cookie: &str) -> Result<Vec<PlaylistTrack>>;

    async fn cloud_entries(&self, cookie: &str) -> Result<Vec<CloudEntry>>;

    async fn song_urls(&self, ids: &[u64], cookie: &str) -> Result<Vec<FetchDescriptor>>;

    /// `None` when the track has no lyric
    async fn lyric(&self, id: u64) -> Result<Option<String>>;
}

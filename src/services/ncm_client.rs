use color_eyre::eyre::Result;
use reqwest::Client;
use url::Url;

use crate::ncm_rs::cloud::get_all_cloud_items;
use crate::ncm_rs::lyric::get_lyric;
use crate::ncm_rs::playlist::get_playlist_detail;
use crate::ncm_rs::song_url::{SongUrl, get_song_urls};
use crate::ports::music_service::{CloudEntry, FetchDescriptor, MusicService, PlaylistTrack};

pub struct NcmHttpAdapter {
    client: Client,
    base_url: Url,
}

impl NcmHttpAdapter {
    pub fn new(base_url: Url) -> Self {
        Self {
            client: Client::new(),
            base_url,
        }
    }
}

impl From<SongUrl> for FetchDescriptor {
    fn from(song: SongUrl) -> Self {
        FetchDescriptor {
            track_id: song.id,
            url: song.url.filter(|url| !url.is_empty()),
            checksum: song.md5.map(|md5| md5.to_lowercase()),
            bitrate: song.bitrate,
            media_type: song.media_type,
            status: song.code,
        }
    }
}

#[async_trait::async_trait]
impl MusicService for NcmHttpAdapter {
    async fn playlist_tracks(&self, playlist_id: u64, cookie: &str) -> Result<Vec<PlaylistTrack>> {
        let playlist = get_playlist_detail(&self.client, &self.base_url, cookie, playlist_id).await?;
        Ok(playlist
            .tracks
            .into_iter()
            .map(|track| PlaylistTrack {
                id: track.id,
                name: track.name,
                artists: track
                    .artists
                    .into_iter()
                    .filter_map(|artist| artist.name)
                    .collect(),
            })
            .collect())
    }

    async fn cloud_entries(&self, cookie: &str) -> Result<Vec<CloudEntry>> {
        let items = get_all_cloud_items(&self.client, &self.base_url, cookie).await?;
        Ok(items
            .into_iter()
            .map(|item| CloudEntry {
                song_id: item.song_id,
                file_name: item.file_name,
            })
            .collect())
    }

    async fn song_urls(&self, ids: &[u64], cookie: &str) -> Result<Vec<FetchDescriptor>> {
        let urls = get_song_urls(&self.client, &self.base_url, cookie, ids).await?;
        Ok(urls.into_iter().map(FetchDescriptor::from).collect())
    }

    async fn lyric(&self, id: u64) -> Result<Option<String>> {
        Ok(get_lyric(&self.client, &self.base_url, id).await?.into_lyric())
    }
}

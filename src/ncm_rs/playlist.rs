use color_eyre::eyre::{Result, WrapErr};
use reqwest::Client;
use serde::Deserialize;
use url::Url;

use super::with_cookie;

#[derive(Debug, Clone, Deserialize)]
pub struct PlaylistDetailResponse {
    pub playlist: PlaylistDetail,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlaylistDetail {
    pub id: u64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub tracks: Vec<NcmTrack>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NcmTrack {
    pub id: u64,
    pub name: String,
    #[serde(rename = "ar", default)]
    pub artists: Vec<NcmArtist>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NcmArtist {
    #[serde(default)]
    pub name: Option<String>,
}

/// Fetch a playlist with its tracks
///
/// Endpoint: `GET /playlist/detail?id={playlist_id}`
pub async fn get_playlist_detail(
    client: &Client,
    base_url: &Url,
    cookie: &str,
    playlist_id: u64,
) -> Result<PlaylistDetail> {
    let mut url = base_url.join("playlist/detail")?;
    url.query_pairs_mut()
        .append_pair("id", &playlist_id.to_string());

    let res = with_cookie(client.get(url), cookie)
        .send()
        .await?
        .error_for_status()?
        .json::<PlaylistDetailResponse>()
        .await
        .wrap_err("Failed to deserialize playlist detail response")?;

    log::debug!(
        "Playlist {} ({}) has {} tracks",
        res.playlist.id,
        res.playlist.name.as_deref().unwrap_or("unnamed"),
        res.playlist.tracks.len()
    );
    Ok(res.playlist)
}

use color_eyre::eyre::{Result, WrapErr};
use reqwest::Client;
use serde::Deserialize;
use url::Url;

use super::with_cookie;

#[derive(Debug, Clone, Deserialize)]
pub struct SongUrlResponse {
    #[serde(default)]
    pub data: Vec<SongUrl>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SongUrl {
    pub id: u64,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(rename = "br", default)]
    pub bitrate: u64,
    #[serde(default)]
    pub md5: Option<String>,
    #[serde(rename = "type", default)]
    pub media_type: Option<String>,
    pub code: i64,
}

/// Resolve download urls for a batch of tracks
///
/// Endpoint: `GET /song/url?id={id1,id2,...}`
pub async fn get_song_urls(
    client: &Client,
    base_url: &Url,
    cookie: &str,
    ids: &[u64],
) -> Result<Vec<SongUrl>> {
    let joined = ids
        .iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(",");
    let mut url = base_url.join("song/url")?;
    url.query_pairs_mut().append_pair("id", &joined);

    let res = with_cookie(client.get(url), cookie)
        .send()
        .await?
        .error_for_status()?
        .json::<SongUrlResponse>()
        .await
        .wrap_err("Failed to deserialize song url response")?;

    Ok(res.data)
}

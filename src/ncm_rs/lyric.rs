use color_eyre::eyre::{Result, WrapErr};
use reqwest::Client;
use serde::Deserialize;
use url::Url;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LyricResponse {
    #[serde(default)]
    pub nolyric: bool,
    #[serde(default)]
    pub uncollected: bool,
    #[serde(default)]
    pub lrc: Option<LyricBody>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LyricBody {
    #[serde(default)]
    pub lyric: Option<String>,
}

impl LyricResponse {
    /// The LRC text, if the track has a usable one
    pub fn into_lyric(self) -> Option<String> {
        if self.nolyric || self.uncollected {
            return None;
        }
        self.lrc
            .and_then(|body| body.lyric)
            .filter(|lyric| !lyric.is_empty())
    }
}

/// Fetch the lyric of a track
///
/// Endpoint: `GET /lyric?id={id}`
pub async fn get_lyric(client: &Client, base_url: &Url, id: u64) -> Result<LyricResponse> {
    let mut url = base_url.join("lyric")?;
    url.query_pairs_mut().append_pair("id", &id.to_string());

    client
        .get(url)
        .send()
        .await?
        .error_for_status()?
        .json::<LyricResponse>()
        .await
        .wrap_err("Failed to deserialize lyric response")
}

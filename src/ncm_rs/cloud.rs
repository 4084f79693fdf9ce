use color_eyre::eyre::{Result, WrapErr};
use reqwest::Client;
use serde::Deserialize;
use url::Url;

use super::with_cookie;

const PAGE_SIZE: u32 = 200;

#[derive(Debug, Clone, Deserialize)]
pub struct CloudResponse {
    #[serde(default)]
    pub data: Vec<CloudItem>,
    #[serde(rename = "hasMore", default)]
    pub has_more: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CloudItem {
    #[serde(rename = "songId")]
    pub song_id: u64,
    #[serde(rename = "fileName")]
    pub file_name: String,
}

/// Fetch one page of the account's cloud uploads
///
/// Endpoint: `GET /user/cloud?limit={limit}&offset={offset}`
pub async fn get_cloud_page(
    client: &Client,
    base_url: &Url,
    cookie: &str,
    offset: u32,
    limit: u32,
) -> Result<CloudResponse> {
    let mut url = base_url.join("user/cloud")?;
    url.query_pairs_mut()
        .append_pair("limit", &limit.to_string())
        .append_pair("offset", &offset.to_string());

    with_cookie(client.get(url), cookie)
        .send()
        .await?
        .error_for_status()?
        .json::<CloudResponse>()
        .await
        .wrap_err("Failed to deserialize cloud response")
}

/// Fetch every cloud upload, following pagination
pub async fn get_all_cloud_items(
    client: &Client,
    base_url: &Url,
    cookie: &str,
) -> Result<Vec<CloudItem>> {
    let mut items = Vec::new();
    let mut offset = 0;

    loop {
        let page = get_cloud_page(client, base_url, cookie, offset, PAGE_SIZE).await?;
        let fetched = page.data.len() as u32;
        items.extend(page.data);

        if !page.has_more || fetched == 0 {
            break;
        }
        offset += fetched;
    }

    log::debug!("Account cloud holds {} files", items.len());
    Ok(items)
}

use std::path::Path;

use color_eyre::eyre::{Result, WrapErr};
use futures::StreamExt;
use reqwest::Client;
use tokio::io::{AsyncWriteExt, BufWriter};

use crate::ports::transfer::Transfer;

/// Streams HTTP response bodies to disk without buffering them in memory.
pub struct HttpTransfer {
    client: Client,
}

impl HttpTransfer {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }
}

impl Default for HttpTransfer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Transfer for HttpTransfer {
    async fn fetch(&self, url: &str, destination: &Path) -> Result<u64> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .wrap_err(format!("Failed to request {}", url))?
            .error_for_status()?;

        let file = tokio::fs::File::create(destination)
            .await
            .wrap_err(format!("Failed to create {}", destination.display()))?;
        let mut writer = BufWriter::with_capacity(64 * 1024, file);

        let mut written = 0u64;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.wrap_err(format!("Failed to read body of {}", url))?;
            writer
                .write_all(&chunk)
                .await
                .wrap_err(format!("Failed to write {}", destination.display()))?;
            written += chunk.len() as u64;
        }
        writer
            .flush()
            .await
            .wrap_err(format!("Failed to flush {}", destination.display()))?;

        log::debug!("Wrote {} bytes from {} to {}", written, url, destination.display());
        Ok(written)
    }
}

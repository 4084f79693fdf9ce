use std::path::Path;

use color_eyre::eyre::Result;

/// Port trait for moving remote bytes onto the local filesystem.
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait Transfer: Send + Sync {
    /// Stream `url` into `destination`, truncating it first. Returns the number of bytes written.
    async fn fetch(&self, url: &str, destination: &Path) -> Result<u64>;
}

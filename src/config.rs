use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use color_eyre::{
    Result,
    eyre::{Context, eyre},
};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::catalog::NameOptions;
use crate::downloader::RetryPolicy;
use crate::hash_pool::HashPoolOptions;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory the playlist is mirrored into
    directory: String,
    playlist_id: u64,
    #[serde(default = "default_api_base_url")]
    api_base_url: String,
    #[serde(default)]
    main_cookie: Option<String>,
    #[serde(default)]
    download_cookie: Option<String>,
    #[serde(default = "default_extensions")]
    extensions: Vec<String>,
    #[serde(default = "default_true")]
    use_checksum: bool,
    #[serde(default = "default_true")]
    download_songs: bool,
    #[serde(default = "default_true")]
    download_lyrics: bool,
    #[serde(default = "default_artist_separator")]
    artist_separator: String,
    #[serde(default)]
    max_name_bytes: Option<usize>,
    #[serde(default)]
    lyric_overrides: Vec<LyricOverride>,
    #[serde(default)]
    hashing: HashingConfig,
    #[serde(default)]
    retry: RetryConfig,
}

/// Fetch the lyric of `lyric_id` when syncing lyrics for `track_id`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LyricOverride {
    pub track_id: u64,
    pub lyric_id: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HashingConfig {
    /// Defaults to the available parallelism of the machine
    #[serde(default)]
    pub workers: Option<usize>,
    #[serde(default = "default_hash_timeout")]
    pub timeout: String,
}

impl Default for HashingConfig {
    fn default() -> Self {
        Self {
            workers: None,
            timeout: default_hash_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,
    #[serde(default = "default_min_delay")]
    pub min_delay: String,
    #[serde(default = "default_max_delay")]
    pub max_delay: String,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            min_delay: default_min_delay(),
            max_delay: default_max_delay(),
        }
    }
}

fn default_api_base_url() -> String {
    "http://localhost:3000/".to_string()
}

fn default_extensions() -> Vec<String> {
    vec![".mp3".to_string(), ".flac".to_string()]
}

fn default_true() -> bool {
    true
}

fn default_artist_separator() -> String {
    ",".to_string()
}

fn default_hash_timeout() -> String {
    "2m".to_string()
}

fn default_max_attempts() -> usize {
    5
}

fn default_min_delay() -> String {
    "1s".to_string()
}

fn default_max_delay() -> String {
    "30s".to_string()
}

fn parse_duration(field: &str, value: &str) -> Result<Duration> {
    humantime::parse_duration(value)
        .with_context(|| format!("Invalid duration for `{}`: {}", field, value))
}

impl Config {
    /// Load config from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .context(format!("Failed to read config file: {}", path.display()))?;
        Self::from_toml(&contents)
            .context(format!("Failed to parse config file: {}", path.display()))
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)?;
        if config.extensions.is_empty() {
            return Err(eyre!("`extensions` must list at least one extension"));
        }
        Ok(config)
    }

    /// Get the default config file path
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|path| path.join("playlist-sync").join("config.toml"))
    }

    /// Load config from the default location
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path().ok_or(eyre!("Config file not found"))?;

        Self::from_file(&config_path)
    }

    /// Write a commented-out starter config to the default location, if none exists yet
    pub fn create_default() -> Result<PathBuf> {
        let config_path = Self::config_path().ok_or(eyre!("No config directory available"))?;
        if config_path.exists() {
            log::info!("Config already exists at: {}", config_path.display());
            return Ok(config_path);
        }

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)
                .context(format!("Failed to create directory: {}", parent.display()))?;
        }
        std::fs::write(&config_path, DEFAULT_CONFIG)
            .context(format!("Failed to write config file: {}", config_path.display()))?;
        Ok(config_path)
    }

    /// Expand ~ to home directory
    fn expand_path(&self, path: &str) -> PathBuf {
        if let Some(rest) = path.strip_prefix("~/")
            && let Some(home) = dirs::home_dir()
        {
            return home.join(rest);
        }
        PathBuf::from(path)
    }

    /// Get expanded directory path
    pub fn directory_path(&self) -> PathBuf {
        self.expand_path(&self.directory)
    }

    pub fn playlist_id(&self) -> u64 {
        self.playlist_id
    }

    pub fn api_base_url(&self) -> Result<Url> {
        let mut raw = self.api_base_url.clone();
        if !raw.ends_with('/') {
            raw.push('/');
        }
        Url::parse(&raw).context(format!("Invalid api_base_url: {}", self.api_base_url))
    }

    /// Returns `(main, download)` cookies. Either one falls back to the other when missing.
    pub fn cookies(&self) -> (String, String) {
        let main = self
            .main_cookie
            .clone()
            .or_else(|| self.download_cookie.clone())
            .unwrap_or_default();
        let download = self
            .download_cookie
            .clone()
            .or_else(|| self.main_cookie.clone())
            .unwrap_or_default();
        (main, download)
    }

    pub fn extensions(&self) -> &[String] {
        &self.extensions
    }

    pub fn use_checksum(&self) -> bool {
        self.use_checksum
    }

    pub fn download_songs(&self) -> bool {
        self.download_songs
    }

    pub fn download_lyrics(&self) -> bool {
        self.download_lyrics
    }

    pub fn lyric_overrides(&self) -> HashMap<u64, u64> {
        self.lyric_overrides
            .iter()
            .map(|o| (o.track_id, o.lyric_id))
            .collect()
    }

    pub fn name_options(&self) -> NameOptions {
        NameOptions {
            artist_separator: self.artist_separator.clone(),
            max_name_bytes: self.max_name_bytes,
        }
    }

    pub fn hash_pool_options(&self) -> Result<HashPoolOptions> {
        let workers = match self.hashing.workers {
            Some(0) => return Err(eyre!("`hashing.workers` must be greater than zero")),
            Some(workers) => workers,
            None => std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
        };
        Ok(HashPoolOptions {
            workers,
            timeout: parse_duration("hashing.timeout", &self.hashing.timeout)?,
        })
    }

    pub fn retry_policy(&self) -> Result<RetryPolicy> {
        if self.retry.max_attempts == 0 {
            return Err(eyre!("`retry.max_attempts` must be greater than zero"));
        }
        Ok(RetryPolicy {
            max_attempts: self.retry.max_attempts,
            min_delay: parse_duration("retry.min_delay", &self.retry.min_delay)?,
            max_delay: parse_duration("retry.max_delay", &self.retry.max_delay)?,
        })
    }
}

const DEFAULT_CONFIG: &str = r#"# Directory the playlist is mirrored into
directory = "~/Music/playlist"
playlist_id = 0

# NeteaseCloudMusicApi compatible server
api_base_url = "http://localhost:3000/"

# Cookies of already logged-in accounts. If only one is given it is used for both.
# main_cookie = ""
# download_cookie = ""

extensions = [".mp3", ".flac"]
use_checksum = true
download_songs = true
download_lyrics = true
artist_separator = ","
# max_name_bytes = 200

# [[lyric_overrides]]
# track_id = 1
# lyric_id = 2

[hashing]
# workers = 4
timeout = "2m"

[retry]
max_attempts = 5
min_delay = "1s"
max_delay = "30s"
"#;

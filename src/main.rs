mod catalog;
mod config;
mod downloader;
mod file_hash;
mod hash_pool;
mod inventory;
mod logging;
mod lyrics;
mod matcher;
mod ncm_rs;
mod ports;
mod progress;
mod services;
mod sync;
#[cfg(test)]
mod test_utils;

use std::path::PathBuf;
use std::time::Instant;

use clap::{Parser, Subcommand};
use color_eyre::{Result, eyre::Context};
use tokio_util::sync::CancellationToken;

use crate::{
    config::Config,
    downloader::DownloadOutcome,
    logging::setup_logging,
    progress::{ConsoleProgress, Progress},
    services::{http_transfer::HttpTransfer, ncm_client::NcmHttpAdapter},
    sync::{SyncReport, SyncService, SyncSettings},
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// The config file to use
    #[arg(short, long, env = "PLAYLIST_SYNC_CONFIG")]
    config: Option<PathBuf>,

    /// Console log level (default: off)
    #[arg(long, default_value = "off", global = true, env = "LOG_LEVEL")]
    log_level: log::LevelFilter,

    /// File log level (default: debug)
    #[arg(long, default_value = "debug", global = true)]
    log_file_level: log::LevelFilter,

    /// Path to log file
    #[arg(long, env = "PLAYLIST_SYNC_LOG_FILE", global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

fn is_directory(s: &str) -> Result<PathBuf, String> {
    let p: PathBuf = s.into();
    if p.is_dir() {
        Ok(p)
    } else {
        Err(format!("`{}` is not an existing directory", s))
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Bring the local directory in line with the playlist
    Sync {
        /// Use this directory instead of the configured one
        #[arg(short, long, value_parser = is_directory)]
        directory: Option<PathBuf>,

        /// Only list the tracks that would be downloaded
        #[arg(long)]
        no_download: bool,

        /// Skip updating lyric files
        #[arg(long)]
        no_lyrics: bool,
    },
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Subcommand, Debug)]
enum ConfigCommands {
    /// Create a default config file, if it doesn't exist
    CreateDefault,
    /// Print the path to the config file
    Path,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = Args::parse();
    setup_logging(args.log_level, args.log_file.clone(), args.log_file_level)?;

    log::debug!("Playlist sync starting");

    match args.command {
        Commands::Sync {
            directory,
            no_download,
            no_lyrics,
        } => {
            let config = match &args.config {
                Some(path) => Config::from_file(path),
                None => Config::load(),
            }
            .with_context(|| "Failed to load playlist-sync config")?;

            let mut settings = SyncSettings::from_config(&config)?;
            if let Some(directory) = directory {
                settings.directory = directory;
            }
            settings.download_songs &= !no_download;
            settings.download_lyrics &= !no_lyrics;
            log::debug!(
                "Syncing playlist {} into {}",
                settings.playlist_id,
                settings.directory.display()
            );

            let cancel = CancellationToken::new();
            let ctrl_c = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    log::warn!("Interrupted, stopping after the current file");
                    ctrl_c.cancel();
                }
            });

            let service = NcmHttpAdapter::new(config.api_base_url()?);
            let started = Instant::now();
            let progress = ConsoleProgress;
            let report = SyncService::new(service, HttpTransfer::new(), settings)
                .run(&progress, &cancel)
                .await?;
            print_summary(&progress, &report, started);
        }
        Commands::Config(config_commands) => match config_commands {
            ConfigCommands::CreateDefault => {
                log::debug!("Creating default config");
                let path = Config::create_default()?;
                println!("{}", path.display());
            }
            ConfigCommands::Path => match Config::config_path() {
                Some(path) => println!("{}", path.display()),
                None => println!("No default config path found"),
            },
        },
    }

    Ok(())
}

fn print_summary(progress: &dyn Progress, report: &SyncReport, started: Instant) {
    // whole seconds are enough for a summary line
    let elapsed = std::time::Duration::from_secs(started.elapsed().as_secs());
    progress.step(&format!("Done in {}", humantime::format_duration(elapsed)));
    progress.line(&format!(
        "{} tracks, {} already present, {} downloaded, {} renamed, {} skipped, {} failed",
        report.tracks,
        report.matched_by_name,
        report.downloaded(),
        report.renamed(),
        report.rejected(),
        report.failed()
    ));
    for outcome in &report.downloads {
        if let DownloadOutcome::Failed { name, error, .. } = outcome {
            progress.line(&format!("  failed: {} ({})", name, error));
        }
    }
    if !report.missing.is_empty() {
        progress.line(&format!("{} tracks not downloaded", report.missing.len()));
    }
    if let Some(lyrics) = &report.lyrics {
        progress.line(&format!(
            "{} lyrics checked, {} updated, {} failed",
            lyrics.checked, lyrics.updated, lyrics.failed
        ));
    }
    if !report.hash_failures.is_empty() {
        progress.warn(&format!(
            "{} local files could not be hashed",
            report.hash_failures.len()
        ));
    }
    if !report.leftovers.is_empty() {
        progress.line(&format!("{} local files are not in the playlist", report.leftovers.len()));
    }
    if report.cancelled {
        progress.warn("Interrupted before finishing; run again to continue");
    }
}

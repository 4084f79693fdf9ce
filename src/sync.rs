use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use color_eyre::eyre::{Result, WrapErr};
use tokio_util::sync::CancellationToken;

use crate::catalog::{self, NameOptions, Track};
use crate::config::Config;
use crate::downloader::{DownloadOutcome, DownloadRun, DownloadTask, Downloader, RetryPolicy};
use crate::hash_pool::{self, HashFailure, HashPoolOptions, HashRecord};
use crate::inventory::{self, Inventory};
use crate::lyrics::{self, LyricsSummary};
use crate::matcher;
use crate::ports::music_service::{FetchDescriptor, MusicService};
use crate::ports::transfer::Transfer;
use crate::progress::Progress;

/// Everything a run needs besides its collaborators.
#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub directory: PathBuf,
    pub playlist_id: u64,
    pub main_cookie: String,
    pub download_cookie: String,
    pub extensions: Vec<String>,
    pub use_checksum: bool,
    pub download_songs: bool,
    pub download_lyrics: bool,
    pub lyric_overrides: HashMap<u64, u64>,
    pub names: NameOptions,
    pub hashing: HashPoolOptions,
    pub retry: RetryPolicy,
}

impl SyncSettings {
    pub fn from_config(config: &Config) -> Result<Self> {
        let (main_cookie, download_cookie) = config.cookies();
        Ok(Self {
            directory: config.directory_path(),
            playlist_id: config.playlist_id(),
            main_cookie,
            download_cookie,
            extensions: config.extensions().to_vec(),
            use_checksum: config.use_checksum(),
            download_songs: config.download_songs(),
            download_lyrics: config.download_lyrics(),
            lyric_overrides: config.lyric_overrides(),
            names: config.name_options(),
            hashing: config.hash_pool_options()?,
            retry: config.retry_policy()?,
        })
    }
}

#[derive(Debug, Default)]
pub struct SyncReport {
    pub tracks: usize,
    pub matched_by_name: usize,
    pub downloads: Vec<DownloadOutcome>,
    /// Tracks still missing when downloading is disabled
    pub missing: Vec<String>,
    pub hash_failures: Vec<HashFailure>,
    pub lyrics: Option<LyricsSummary>,
    /// Hashed local files no track asked for
    pub leftovers: Vec<PathBuf>,
    pub cancelled: bool,
}

impl SyncReport {
    pub fn downloaded(&self) -> usize {
        self.count(|outcome| matches!(outcome, DownloadOutcome::Downloaded { .. }))
    }

    pub fn renamed(&self) -> usize {
        self.count(|outcome| matches!(outcome, DownloadOutcome::Renamed { .. }))
    }

    pub fn rejected(&self) -> usize {
        self.count(|outcome| matches!(outcome, DownloadOutcome::Rejected { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(|outcome| matches!(outcome, DownloadOutcome::Failed { .. }))
    }

    fn count(&self, predicate: impl Fn(&DownloadOutcome) -> bool) -> usize {
        self.downloads.iter().filter(|outcome| predicate(outcome)).count()
    }
}

pub struct SyncService<S: MusicService, T: Transfer> {
    service: S,
    transfer: T,
    settings: SyncSettings,
}

impl<S: MusicService, T: Transfer> SyncService<S, T> {
    pub fn new(service: S, transfer: T, settings: SyncSettings) -> Self {
        Self {
            service,
            transfer,
            settings,
        }
    }

    pub async fn run(&self, progress: &dyn Progress, cancel: &CancellationToken) -> Result<SyncReport> {
        let settings = &self.settings;
        let mut report = SyncReport::default();

        progress.step("Fetching playlist");
        let mut tracks = self.load_tracks().await?;
        report.tracks = tracks.len();

        progress.step("Comparing local files");
        let files = inventory::list_files(&settings.directory).await?;
        let mut inventory = Inventory::new(files);
        report.matched_by_name = matcher::match_by_name(&mut tracks, &mut inventory, &settings.extensions);
        // the name pass is done; hashing only ever sees what it left behind
        let unclaimed = inventory.snapshot();

        let mut hashes = HashRecord::new();
        let mut duplicates = Vec::new();
        if settings.download_songs && settings.use_checksum && !inventory.is_empty() {
            let candidates = hash_pool::hash_candidates(&settings.directory, &unclaimed, &settings.extensions);
            if !candidates.is_empty() {
                progress.step("Hashing unknown local files");
                let outcome = hash_pool::hash_files(candidates, &settings.hashing, progress, cancel).await?;
                hashes = outcome.record;
                duplicates = outcome.duplicates;
                report.hash_failures = outcome.failures;
            }
        }

        if settings.download_songs {
            let run = self.download_missing(&tracks, &mut hashes, progress, cancel).await?;
            report.downloads = run.outcomes;
            report.cancelled = run.cancelled;
        } else {
            let missing: Vec<String> = tracks
                .iter()
                .filter(|track| track.need_download)
                .map(|track| track.display_name.clone())
                .collect();
            if !missing.is_empty() {
                progress.step("Missing tracks");
                for name in &missing {
                    progress.line(name);
                }
            }
            report.missing = missing;
        }

        if settings.download_lyrics && !report.cancelled && !cancel.is_cancelled() {
            progress.step("Updating lyrics");
            let summary = lyrics::sync_lyrics(
                &self.service,
                &tracks,
                &settings.directory,
                &settings.lyric_overrides,
                progress,
                cancel,
            )
            .await?;
            report.lyrics = Some(summary);
        }

        // a duplicate lost its record entry to a twin, so no track can claim it either
        let mut leftovers: Vec<PathBuf> = hashes.into_values().chain(duplicates).collect();
        leftovers.sort();
        if !leftovers.is_empty() {
            progress.step("Leftover local files");
            for path in &leftovers {
                let name = path
                    .file_name()
                    .map(|name| name.to_string_lossy().into_owned())
                    .unwrap_or_else(|| path.display().to_string());
                progress.line(&name);
            }
        }
        report.leftovers = leftovers;
        report.cancelled |= cancel.is_cancelled();

        Ok(report)
    }

    async fn load_tracks(&self) -> Result<Vec<Track>> {
        let settings = &self.settings;
        let playlist = self
            .service
            .playlist_tracks(settings.playlist_id, &settings.main_cookie)
            .await
            .wrap_err(format!("Failed to fetch playlist {}", settings.playlist_id))?;
        let cloud = self
            .service
            .cloud_entries(&settings.main_cookie)
            .await
            .wrap_err("Failed to fetch cloud uploads")?;

        let tracks = catalog::build_tracks(&playlist, &cloud, &settings.names);
        log::info!(
            "Playlist {} has {} tracks, {} of them uploaded to the cloud",
            settings.playlist_id,
            tracks.len(),
            tracks.iter().filter(|track| track.in_cloud).count()
        );
        Ok(tracks)
    }

    /// Resolve urls for every track not found by name and hand them to the downloader.
    ///
    /// Cloud uploads are only visible to the main account; everything else goes through
    /// the download account.
    async fn download_missing(
        &self,
        tracks: &[Track],
        hashes: &mut HashRecord,
        progress: &dyn Progress,
        cancel: &CancellationToken,
    ) -> Result<DownloadRun> {
        let settings = &self.settings;
        let (by_main, by_download): (Vec<&Track>, Vec<&Track>) = tracks
            .iter()
            .filter(|track| track.need_download)
            .partition(|track| track.in_cloud);

        if by_main.is_empty() && by_download.is_empty() {
            return Ok(Default::default());
        }

        progress.step("Resolving download urls");
        let mut descriptors: Vec<FetchDescriptor> = Vec::new();
        for (batch, cookie) in [
            (&by_main, &settings.main_cookie),
            (&by_download, &settings.download_cookie),
        ] {
            if batch.is_empty() {
                continue;
            }
            let ids: Vec<u64> = batch.iter().map(|track| track.id).collect();
            let resolved = self
                .service
                .song_urls(&ids, cookie)
                .await
                .wrap_err("Failed to resolve download urls")?;
            descriptors.extend(resolved);
        }

        let by_id: HashMap<u64, &Track> = tracks.iter().map(|track| (track.id, track)).collect();
        let mut tasks = Vec::with_capacity(descriptors.len());
        for descriptor in descriptors {
            match by_id.get(&descriptor.track_id) {
                Some(track) if track.need_download => tasks.push(DownloadTask {
                    track: *track,
                    descriptor,
                }),
                _ => log::warn!(
                    "Resolver returned unexpected track {}, ignoring",
                    descriptor.track_id
                ),
            }
        }

        let resolved: HashSet<u64> = tasks.iter().map(|task| task.track.id).collect();
        let unresolved: Vec<DownloadOutcome> = by_main
            .iter()
            .chain(by_download.iter())
            .filter(|track| !resolved.contains(&track.id))
            .map(|track| {
                let reason = "not returned by the resolver".to_string();
                progress.warn(&format!("Skipping {}: {}", track.display_name, reason));
                DownloadOutcome::Rejected {
                    track_id: track.id,
                    name: track.display_name.clone(),
                    reason,
                }
            })
            .collect();

        progress.step("Downloading missing tracks");
        let mut run = Downloader::new(&self.transfer, &settings.directory, &settings.retry, progress, cancel)
            .run(tasks, hashes)
            .await?;
        run.outcomes.extend(unresolved);
        Ok(run)
    }
}

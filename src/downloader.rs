use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};
use color_eyre::{Result, eyre::Context};
use tokio_util::sync::CancellationToken;

use crate::catalog::Track;
use crate::file_hash;
use crate::hash_pool::HashRecord;
use crate::ports::music_service::FetchDescriptor;
use crate::ports::transfer::Transfer;
use crate::progress::Progress;

/// Suffix of in-flight downloads. A file carrying it is never treated as complete.
pub const PART_SUFFIX: &str = ".part";

/// Bounded exponential backoff for transfers that fail verification.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total number of transfers attempted per track, including the first
    pub max_attempts: usize,
    pub min_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    fn backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(self.min_delay)
            .with_max_delay(self.max_delay)
            .with_max_times(self.max_attempts.saturating_sub(1))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            min_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    #[error("checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("transfer failed: {0}")]
    Transfer(String),

    #[error("filesystem error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cancelled")]
    Cancelled,
}

impl DownloadError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DownloadError::ChecksumMismatch { .. } | DownloadError::Transfer(_)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadOutcome {
    Downloaded {
        track_id: u64,
        file_name: String,
        attempts: usize,
    },
    /// Satisfied by renaming a local file with the same checksum
    Renamed {
        track_id: u64,
        from: PathBuf,
        file_name: String,
    },
    Rejected {
        track_id: u64,
        name: String,
        reason: String,
    },
    Failed {
        track_id: u64,
        name: String,
        error: String,
    },
    Cancelled {
        track_id: u64,
    },
}

#[derive(Debug)]
pub struct DownloadTask<'t> {
    pub track: &'t Track,
    pub descriptor: FetchDescriptor,
}

#[derive(Debug, Default)]
pub struct DownloadRun {
    pub outcomes: Vec<DownloadOutcome>,
    pub cancelled: bool,
}

/// Name the track is stored under once fetched.
///
/// Cloud uploads keep their uploaded file name, everything else is
/// `display_name.media_type`.
pub fn final_file_name(track: &Track, descriptor: &FetchDescriptor) -> Option<String> {
    if track.in_cloud
        && let Some(file_name) = &track.stored_file_name
    {
        return Some(file_name.clone());
    }
    descriptor
        .media_type
        .as_deref()
        .filter(|media_type| !media_type.is_empty())
        .map(|media_type| format!("{}.{}", track.display_name, media_type.to_lowercase()))
}

fn rejection_reason(descriptor: &FetchDescriptor) -> Option<String> {
    match descriptor.status {
        200 => None,
        401 | 403 => Some("no permission to download".to_string()),
        status => Some(format!("unavailable (status {})", status)),
    }
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

pub struct Downloader<'a, T: Transfer> {
    transfer: &'a T,
    directory: &'a Path,
    retry: &'a RetryPolicy,
    progress: &'a dyn Progress,
    cancel: &'a CancellationToken,
}

impl<'a, T: Transfer> Downloader<'a, T> {
    pub fn new(
        transfer: &'a T,
        directory: &'a Path,
        retry: &'a RetryPolicy,
        progress: &'a dyn Progress,
        cancel: &'a CancellationToken,
    ) -> Self {
        Self {
            transfer,
            directory,
            retry,
            progress,
            cancel,
        }
    }

    /// Process every task in order, one track at a time.
    ///
    /// Checksums used to satisfy a track by rename are removed from `hashes`; whatever
    /// is left afterwards was never asked for. Filesystem errors while promoting a file
    /// abort the run.
    pub async fn run(&self, tasks: Vec<DownloadTask<'_>>, hashes: &mut HashRecord) -> Result<DownloadRun> {
        let total = tasks.len();
        let mut run = DownloadRun::default();

        for (i, task) in tasks.iter().enumerate() {
            if self.cancel.is_cancelled() {
                run.cancelled = true;
                break;
            }

            let outcome = self.process(i + 1, total, task, hashes).await?;
            if matches!(outcome, DownloadOutcome::Cancelled { .. }) {
                run.cancelled = true;
                break;
            }
            run.outcomes.push(outcome);
        }

        Ok(run)
    }

    async fn process(
        &self,
        index: usize,
        total: usize,
        task: &DownloadTask<'_>,
        hashes: &mut HashRecord,
    ) -> Result<DownloadOutcome> {
        let track = task.track;
        let descriptor = &task.descriptor;
        let final_name = final_file_name(track, descriptor);

        // a local copy needs no download rights
        if let Some(final_name) = &final_name
            && let Some(checksum) = &descriptor.checksum
            && let Some(existing) = hashes.remove(&checksum.to_lowercase())
        {
            let final_path = self.directory.join(final_name);
            self.rename_local(index, total, &existing, &final_path).await?;
            return Ok(DownloadOutcome::Renamed {
                track_id: track.id,
                from: existing,
                file_name: final_name.clone(),
            });
        }

        if let Some(reason) = rejection_reason(descriptor) {
            return Ok(self.reject(track, reason));
        }
        let Some(final_name) = final_name else {
            return Ok(self.reject(track, "no media type reported".to_string()));
        };
        let final_path = self.directory.join(&final_name);

        let Some(url) = descriptor.url.as_deref() else {
            return Ok(self.reject(track, "no download url".to_string()));
        };
        self.transfer_verified(index, total, track, descriptor, url, &final_name, &final_path)
            .await
    }

    fn reject(&self, track: &Track, reason: String) -> DownloadOutcome {
        self.progress
            .warn(&format!("Skipping {}: {}", track.display_name, reason));
        DownloadOutcome::Rejected {
            track_id: track.id,
            name: track.display_name.clone(),
            reason,
        }
    }

    async fn rename_local(&self, index: usize, total: usize, from: &Path, to: &Path) -> Result<()> {
        self.progress.item(
            index,
            total,
            &format!("Renaming {} to {}", file_name_of(from), file_name_of(to)),
        );
        tokio::fs::rename(from, to).await.wrap_err(format!(
            "Failed to rename {} to {}",
            from.display(),
            to.display()
        ))?;

        let old_lyric = from.with_extension("lrc");
        if tokio::fs::try_exists(&old_lyric).await.unwrap_or(false) {
            let new_lyric = to.with_extension("lrc");
            self.progress.item(
                index,
                total,
                &format!(
                    "Renaming {} to {}",
                    file_name_of(&old_lyric),
                    file_name_of(&new_lyric)
                ),
            );
            if let Err(e) = tokio::fs::rename(&old_lyric, &new_lyric).await {
                self.progress.warn(&format!(
                    "Could not rename lyric {}: {}",
                    old_lyric.display(),
                    e
                ));
            }
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn transfer_verified(
        &self,
        index: usize,
        total: usize,
        track: &Track,
        descriptor: &FetchDescriptor,
        url: &str,
        final_name: &str,
        final_path: &Path,
    ) -> Result<DownloadOutcome> {
        let part_path = self.directory.join(format!("{}{}", final_name, PART_SUFFIX));
        let part_path = part_path.as_path();
        let expected = descriptor.checksum.as_deref();
        let bitrate = descriptor.bitrate;
        let attempts = AtomicUsize::new(0);
        let attempts_ref = &attempts;

        let retried = (move || async move {
            let attempt = attempts_ref.fetch_add(1, Ordering::SeqCst) + 1;
            log::debug!("Transfer attempt {} for {}", attempt, final_name);
            self.progress.item(
                index,
                total,
                &format!("Downloading [{} bit/s] {}", bitrate, final_name),
            );
            self.attempt(url, part_path, final_path, expected).await
        })
        .retry(self.retry.backoff())
        .when(|e: &DownloadError| e.is_retryable() && !self.cancel.is_cancelled())
        .notify(|e: &DownloadError, delay: Duration| {
            self.progress.warn(&format!(
                "{}: {}, retrying in {}",
                final_name,
                e,
                humantime::format_duration(delay)
            ));
        });

        // the backoff sleep is not cancellation aware on its own
        let result = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(DownloadError::Cancelled),
            result = retried => result,
        };

        let attempts = attempts.load(Ordering::SeqCst);
        match result {
            Ok(()) => Ok(DownloadOutcome::Downloaded {
                track_id: track.id,
                file_name: final_name.to_string(),
                attempts,
            }),
            // the partial file stays behind, it is never mistaken for a finished one
            Err(DownloadError::Cancelled) => Ok(DownloadOutcome::Cancelled { track_id: track.id }),
            Err(e) if e.is_retryable() && self.cancel.is_cancelled() => {
                log::debug!("Not retrying {} after cancel: {}", final_name, e);
                Ok(DownloadOutcome::Cancelled { track_id: track.id })
            }
            Err(e @ DownloadError::Io { .. }) => Err(e.into()),
            Err(e) => {
                self.progress.error(&format!(
                    "Giving up on {} after {} attempts: {}",
                    final_name, attempts, e
                ));
                if let Err(remove_err) = tokio::fs::remove_file(part_path).await
                    && remove_err.kind() != std::io::ErrorKind::NotFound
                {
                    self.progress.warn(&format!(
                        "Could not remove {}: {}",
                        part_path.display(),
                        remove_err
                    ));
                }
                Ok(DownloadOutcome::Failed {
                    track_id: track.id,
                    name: track.display_name.clone(),
                    error: e.to_string(),
                })
            }
        }
    }

    /// One transfer into the `.part` file, verified and promoted on success.
    async fn attempt(
        &self,
        url: &str,
        part_path: &Path,
        final_path: &Path,
        expected: Option<&str>,
    ) -> std::result::Result<(), DownloadError> {
        let bytes = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(DownloadError::Cancelled),
            fetched = self.transfer.fetch(url, part_path) => {
                fetched.map_err(|e| DownloadError::Transfer(format!("{:#}", e)))?
            }
        };
        log::debug!("Fetched {} bytes into {}", bytes, part_path.display());
        if self.cancel.is_cancelled() {
            return Err(DownloadError::Cancelled);
        }

        if let Some(expected) = expected {
            let actual = file_hash::md5_file(part_path.to_path_buf())
                .await
                .map_err(|e| DownloadError::Transfer(format!("{:#}", e)))?;
            if !actual.eq_ignore_ascii_case(expected) {
                return Err(DownloadError::ChecksumMismatch {
                    expected: expected.to_string(),
                    actual,
                });
            }
        }

        tokio::fs::rename(part_path, final_path)
            .await
            .map_err(|source| DownloadError::Io {
                path: final_path.to_path_buf(),
                source,
            })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::transfer::MockTransfer;
    use crate::test_utils::{RecordingProgress, dir_listing, md5_hex, write_file};
    use std::sync::Arc;

    fn fast_retry(max_attempts: usize) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            min_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        }
    }

    fn descriptor(track_id: u64, content: &[u8]) -> FetchDescriptor {
        FetchDescriptor {
            track_id,
            url: Some(format!("http://cdn.example/{}.mp3", track_id)),
            checksum: Some(md5_hex(content)),
            bitrate: 320000,
            media_type: Some("mp3".to_string()),
            status: 200,
        }
    }

    /// Transfer mock that serves `bodies` in order, repeating the last one.
    fn serving(bodies: Vec<&'static str>) -> (MockTransfer, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let mut transfer = MockTransfer::new();
        transfer.expect_fetch().returning(move |_url, destination| {
            let call = counter.fetch_add(1, Ordering::SeqCst);
            let body = bodies[call.min(bodies.len() - 1)].as_bytes();
            std::fs::write(destination, body).unwrap();
            Ok(body.len() as u64)
        });
        (transfer, calls)
    }

    #[tokio::test]
    async fn test_hash_match_renames_instead_of_transfer() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "old.mp3", b"song two");
        write_file(dir.path(), "old.lrc", b"[00:00] la");
        let mut hashes = HashRecord::new();
        hashes.insert(md5_hex(b"song two"), dir.path().join("old.mp3"));

        let mut transfer = MockTransfer::new();
        transfer.expect_fetch().never();
        let track = Track::new(2, "B - Song2");
        let progress = RecordingProgress::default();
        let retry = fast_retry(3);
        let cancel = CancellationToken::new();
        let downloader = Downloader::new(&transfer, dir.path(), &retry, &progress, &cancel);

        let run = downloader
            .run(
                vec![DownloadTask {
                    track: &track,
                    descriptor: descriptor(2, b"song two"),
                }],
                &mut hashes,
            )
            .await
            .unwrap();

        assert_eq!(
            run.outcomes,
            vec![DownloadOutcome::Renamed {
                track_id: 2,
                from: dir.path().join("old.mp3"),
                file_name: "B - Song2.mp3".to_string(),
            }]
        );
        assert!(hashes.is_empty());
        assert_eq!(
            dir_listing(dir.path()),
            vec!["B - Song2.lrc".to_string(), "B - Song2.mp3".to_string()]
        );
        assert_eq!(
            progress.lines(),
            vec![
                "(1/1) Renaming old.mp3 to B - Song2.mp3".to_string(),
                "(1/1) Renaming old.lrc to B - Song2.lrc".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_uppercase_checksum_still_matches_record() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "old.mp3", b"song two");
        let mut hashes = HashRecord::new();
        hashes.insert(md5_hex(b"song two"), dir.path().join("old.mp3"));

        let mut transfer = MockTransfer::new();
        transfer.expect_fetch().never();
        let track = Track::new(2, "B - Song2");
        let mut fetch = descriptor(2, b"song two");
        fetch.checksum = fetch.checksum.map(|c| c.to_uppercase());
        let progress = RecordingProgress::default();
        let retry = fast_retry(3);
        let cancel = CancellationToken::new();

        let run = Downloader::new(&transfer, dir.path(), &retry, &progress, &cancel)
            .run(vec![DownloadTask { track: &track, descriptor: fetch }], &mut hashes)
            .await
            .unwrap();

        assert!(matches!(run.outcomes[0], DownloadOutcome::Renamed { .. }));
        assert_eq!(dir_listing(dir.path()), vec!["B - Song2.mp3".to_string()]);
    }

    #[tokio::test]
    async fn test_forbidden_is_rejected_without_transfer() {
        let dir = tempfile::tempdir().unwrap();
        let mut transfer = MockTransfer::new();
        transfer.expect_fetch().never();
        let track = Track::new(3, "C - Song3");
        let mut fetch = descriptor(3, b"x");
        fetch.status = 403;
        fetch.url = None;
        let progress = RecordingProgress::default();
        let retry = fast_retry(3);
        let cancel = CancellationToken::new();

        let run = Downloader::new(&transfer, dir.path(), &retry, &progress, &cancel)
            .run(vec![DownloadTask { track: &track, descriptor: fetch }], &mut HashRecord::new())
            .await
            .unwrap();

        assert_eq!(
            run.outcomes,
            vec![DownloadOutcome::Rejected {
                track_id: 3,
                name: "C - Song3".to_string(),
                reason: "no permission to download".to_string(),
            }]
        );
        assert!(dir_listing(dir.path()).is_empty());
        assert_eq!(
            progress.lines(),
            vec!["warning: Skipping C - Song3: no permission to download".to_string()]
        );
    }

    #[tokio::test]
    async fn test_missing_url_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut transfer = MockTransfer::new();
        transfer.expect_fetch().never();
        let track = Track::new(4, "D - Song4");
        let mut fetch = descriptor(4, b"x");
        fetch.url = None;
        let progress = RecordingProgress::default();
        let retry = fast_retry(3);
        let cancel = CancellationToken::new();

        let run = Downloader::new(&transfer, dir.path(), &retry, &progress, &cancel)
            .run(vec![DownloadTask { track: &track, descriptor: fetch }], &mut HashRecord::new())
            .await
            .unwrap();

        assert!(matches!(
            &run.outcomes[0],
            DownloadOutcome::Rejected { reason, .. } if reason == "no download url"
        ));
    }

    #[tokio::test]
    async fn test_verified_transfer_is_promoted() {
        let dir = tempfile::tempdir().unwrap();
        let (transfer, calls) = serving(vec!["song one"]);
        let track = Track::new(1, "A - Song1");
        let progress = RecordingProgress::default();
        let retry = fast_retry(3);
        let cancel = CancellationToken::new();

        let run = Downloader::new(&transfer, dir.path(), &retry, &progress, &cancel)
            .run(
                vec![DownloadTask {
                    track: &track,
                    descriptor: descriptor(1, b"song one"),
                }],
                &mut HashRecord::new(),
            )
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            run.outcomes,
            vec![DownloadOutcome::Downloaded {
                track_id: 1,
                file_name: "A - Song1.mp3".to_string(),
                attempts: 1,
            }]
        );
        assert_eq!(dir_listing(dir.path()), vec!["A - Song1.mp3".to_string()]);
        assert_eq!(
            progress.lines(),
            vec!["(1/1) Downloading [320000 bit/s] A - Song1.mp3".to_string()]
        );
    }

    #[tokio::test]
    async fn test_mismatch_then_match_retries_once() {
        let dir = tempfile::tempdir().unwrap();
        let (transfer, calls) = serving(vec!["corrupted", "song one"]);
        let track = Track::new(1, "A - Song1");
        let progress = RecordingProgress::default();
        let retry = fast_retry(3);
        let cancel = CancellationToken::new();

        let run = Downloader::new(&transfer, dir.path(), &retry, &progress, &cancel)
            .run(
                vec![DownloadTask {
                    track: &track,
                    descriptor: descriptor(1, b"song one"),
                }],
                &mut HashRecord::new(),
            )
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(matches!(
            run.outcomes[0],
            DownloadOutcome::Downloaded { attempts: 2, .. }
        ));
        assert_eq!(dir_listing(dir.path()), vec!["A - Song1.mp3".to_string()]);
        assert_eq!(
            std::fs::read(dir.path().join("A - Song1.mp3")).unwrap(),
            b"song one"
        );
        assert!(
            progress
                .lines()
                .iter()
                .any(|line| line.starts_with("warning: A - Song1.mp3: checksum mismatch"))
        );
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let dir = tempfile::tempdir().unwrap();
        let (transfer, calls) = serving(vec!["corrupted"]);
        let track = Track::new(1, "A - Song1");
        let progress = RecordingProgress::default();
        let retry = fast_retry(3);
        let cancel = CancellationToken::new();

        let run = Downloader::new(&transfer, dir.path(), &retry, &progress, &cancel)
            .run(
                vec![DownloadTask {
                    track: &track,
                    descriptor: descriptor(1, b"song one"),
                }],
                &mut HashRecord::new(),
            )
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(matches!(
            &run.outcomes[0],
            DownloadOutcome::Failed { track_id: 1, error, .. } if error.starts_with("checksum mismatch")
        ));
        assert!(dir_listing(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn test_transport_errors_are_retried() {
        let dir = tempfile::tempdir().unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let mut transfer = MockTransfer::new();
        transfer.expect_fetch().returning(move |_url, destination| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                return Err(color_eyre::eyre::eyre!("connection reset"));
            }
            std::fs::write(destination, b"song one").unwrap();
            Ok(8)
        });
        let track = Track::new(1, "A - Song1");
        let progress = RecordingProgress::default();
        let retry = fast_retry(3);
        let cancel = CancellationToken::new();

        let run = Downloader::new(&transfer, dir.path(), &retry, &progress, &cancel)
            .run(
                vec![DownloadTask {
                    track: &track,
                    descriptor: descriptor(1, b"song one"),
                }],
                &mut HashRecord::new(),
            )
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(matches!(
            run.outcomes[0],
            DownloadOutcome::Downloaded { attempts: 2, .. }
        ));
    }

    #[tokio::test]
    async fn test_missing_checksum_accepts_transfer() {
        let dir = tempfile::tempdir().unwrap();
        let (transfer, _calls) = serving(vec!["anything"]);
        let track = Track::new(1, "A - Song1");
        let mut fetch = descriptor(1, b"unused");
        fetch.checksum = None;
        fetch.media_type = Some("FLAC".to_string());
        let progress = RecordingProgress::default();
        let retry = fast_retry(3);
        let cancel = CancellationToken::new();

        let run = Downloader::new(&transfer, dir.path(), &retry, &progress, &cancel)
            .run(vec![DownloadTask { track: &track, descriptor: fetch }], &mut HashRecord::new())
            .await
            .unwrap();

        assert!(matches!(run.outcomes[0], DownloadOutcome::Downloaded { .. }));
        assert_eq!(dir_listing(dir.path()), vec!["A - Song1.flac".to_string()]);
    }

    #[tokio::test]
    async fn test_cloud_track_keeps_uploaded_name() {
        let dir = tempfile::tempdir().unwrap();
        let (transfer, _calls) = serving(vec!["live"]);
        let mut track = Track::new(5, "E - Live");
        track.in_cloud = true;
        track.stored_file_name = Some("E - Live.wav".to_string());
        let progress = RecordingProgress::default();
        let retry = fast_retry(3);
        let cancel = CancellationToken::new();

        Downloader::new(&transfer, dir.path(), &retry, &progress, &cancel)
            .run(
                vec![DownloadTask {
                    track: &track,
                    descriptor: descriptor(5, b"live"),
                }],
                &mut HashRecord::new(),
            )
            .await
            .unwrap();

        assert_eq!(dir_listing(dir.path()), vec!["E - Live.wav".to_string()]);
    }

    #[tokio::test]
    async fn test_cancelled_run_processes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mut transfer = MockTransfer::new();
        transfer.expect_fetch().never();
        let track = Track::new(1, "A - Song1");
        let progress = RecordingProgress::default();
        let retry = fast_retry(3);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let run = Downloader::new(&transfer, dir.path(), &retry, &progress, &cancel)
            .run(
                vec![DownloadTask {
                    track: &track,
                    descriptor: descriptor(1, b"song one"),
                }],
                &mut HashRecord::new(),
            )
            .await
            .unwrap();

        assert!(run.cancelled);
        assert!(run.outcomes.is_empty());
    }

    #[tokio::test]
    async fn test_forbidden_track_with_local_copy_is_renamed() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "old.mp3", b"song three");
        let mut hashes = HashRecord::new();
        hashes.insert(md5_hex(b"song three"), dir.path().join("old.mp3"));

        let mut transfer = MockTransfer::new();
        transfer.expect_fetch().never();
        let track = Track::new(3, "C - Song3");
        let mut fetch = descriptor(3, b"song three");
        fetch.status = 403;
        fetch.url = None;
        let progress = RecordingProgress::default();
        let retry = fast_retry(3);
        let cancel = CancellationToken::new();

        let run = Downloader::new(&transfer, dir.path(), &retry, &progress, &cancel)
            .run(vec![DownloadTask { track: &track, descriptor: fetch }], &mut hashes)
            .await
            .unwrap();

        assert!(matches!(run.outcomes[0], DownloadOutcome::Renamed { track_id: 3, .. }));
        assert_eq!(dir_listing(dir.path()), vec!["C - Song3.mp3".to_string()]);
    }

    #[tokio::test]
    async fn test_sidecar_rename_failure_only_warns() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "old.mp3", b"song two");
        write_file(dir.path(), "old.lrc", b"[00:00] la");
        // a directory in the way makes the lyric rename fail
        std::fs::create_dir(dir.path().join("B - Song2.lrc")).unwrap();
        let mut hashes = HashRecord::new();
        hashes.insert(md5_hex(b"song two"), dir.path().join("old.mp3"));

        let mut transfer = MockTransfer::new();
        transfer.expect_fetch().never();
        let track = Track::new(2, "B - Song2");
        let progress = RecordingProgress::default();
        let retry = fast_retry(3);
        let cancel = CancellationToken::new();

        let run = Downloader::new(&transfer, dir.path(), &retry, &progress, &cancel)
            .run(
                vec![DownloadTask {
                    track: &track,
                    descriptor: descriptor(2, b"song two"),
                }],
                &mut hashes,
            )
            .await
            .unwrap();

        assert!(matches!(run.outcomes[0], DownloadOutcome::Renamed { .. }));
        assert!(dir.path().join("B - Song2.mp3").is_file());
        assert!(dir.path().join("old.lrc").is_file());
        assert!(
            progress
                .lines()
                .iter()
                .any(|line| line.starts_with("warning: Could not rename lyric"))
        );
    }

    #[tokio::test]
    async fn test_cancel_during_transfer_keeps_part_file() {
        let dir = tempfile::tempdir().unwrap();
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let mut transfer = MockTransfer::new();
        transfer.expect_fetch().times(1).returning(move |_url, destination| {
            std::fs::write(destination, b"song one").unwrap();
            token.cancel();
            Ok(8)
        });
        let track = Track::new(1, "A - Song1");
        let progress = RecordingProgress::default();
        let retry = fast_retry(3);

        let run = Downloader::new(&transfer, dir.path(), &retry, &progress, &cancel)
            .run(
                vec![DownloadTask {
                    track: &track,
                    descriptor: descriptor(1, b"song one"),
                }],
                &mut HashRecord::new(),
            )
            .await
            .unwrap();

        assert!(run.cancelled);
        assert!(run.outcomes.is_empty());
        assert_eq!(dir_listing(dir.path()), vec!["A - Song1.mp3.part".to_string()]);
    }

    #[tokio::test]
    async fn test_cancel_interrupts_backoff() {
        let dir = tempfile::tempdir().unwrap();
        let (transfer, calls) = serving(vec!["corrupted"]);
        let track = Track::new(1, "A - Song1");
        let progress = RecordingProgress::default();
        let retry = RetryPolicy {
            max_attempts: 3,
            min_delay: Duration::from_secs(10),
            max_delay: Duration::from_secs(10),
        };
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            token.cancel();
        });

        let started = std::time::Instant::now();
        let run = Downloader::new(&transfer, dir.path(), &retry, &progress, &cancel)
            .run(
                vec![DownloadTask {
                    track: &track,
                    descriptor: descriptor(1, b"song one"),
                }],
                &mut HashRecord::new(),
            )
            .await
            .unwrap();

        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(run.cancelled);
        assert_eq!(dir_listing(dir.path()), vec!["A - Song1.mp3.part".to_string()]);
    }

    #[test]
    fn test_final_file_name_requires_media_type() {
        let track = Track::new(1, "A - Song1");
        let mut fetch = descriptor(1, b"x");
        fetch.media_type = None;
        assert_eq!(final_file_name(&track, &fetch), None);
    }
}

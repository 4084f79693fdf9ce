use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use color_eyre::{
    Result,
    eyre::{Context, eyre},
};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::file_hash;
use crate::inventory::dotted_extension;
use crate::progress::Progress;

/// Content checksum -> local file. Later files with the same checksum replace earlier ones.
pub type HashRecord = HashMap<String, PathBuf>;

#[derive(Debug, Clone)]
pub struct HashPoolOptions {
    pub workers: usize,
    /// Upper bound for hashing a single file
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashFailure {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct HashOutcome {
    pub record: HashRecord,
    pub failures: Vec<HashFailure>,
    /// Files displaced from `record` by a later file with the same checksum
    pub duplicates: Vec<PathBuf>,
}

#[derive(Debug)]
struct HashJob {
    index: usize,
    path: PathBuf,
}

#[derive(Debug)]
struct HashResult {
    index: usize,
    path: PathBuf,
    checksum: std::result::Result<String, String>,
}

/// Paths of the unclaimed files worth hashing: those with a configured media extension.
pub fn hash_candidates(directory: &Path, unclaimed: &[String], extensions: &[String]) -> Vec<PathBuf> {
    unclaimed
        .iter()
        .filter(|name| {
            dotted_extension(name)
                .map(|ext| extensions.contains(&ext))
                .unwrap_or(false)
        })
        .map(|name| directory.join(name))
        .collect()
}

/// Hash every file on a fixed set of workers pulling from a shared queue.
///
/// The pool runs `min(files, options.workers)` workers. A file that fails or exceeds
/// `options.timeout` is reported in [`HashOutcome::failures`] and skipped. When two
/// files share a checksum the later one stays in the record and the earlier one is
/// listed in [`HashOutcome::duplicates`].
pub async fn hash_files(
    files: Vec<PathBuf>,
    options: &HashPoolOptions,
    progress: &dyn Progress,
    cancel: &CancellationToken,
) -> Result<HashOutcome> {
    let total = files.len();
    if total == 0 {
        return Ok(HashOutcome::default());
    }

    let worker_count = options.workers.clamp(1, total);
    log::debug!("Hashing {} files on {} workers", total, worker_count);

    let (job_tx, job_rx) = mpsc::channel::<HashJob>(total);
    for (index, path) in files.into_iter().enumerate() {
        job_tx
            .send(HashJob { index, path })
            .await
            .wrap_err("Failed to queue hash job")?;
    }
    // workers exit once the queue is drained
    drop(job_tx);

    let job_rx = Arc::new(Mutex::new(job_rx));
    let (result_tx, mut result_rx) = mpsc::channel::<HashResult>(worker_count * 2);

    let mut workers = JoinSet::new();
    for worker_id in 0..worker_count {
        workers.spawn(hash_worker(
            worker_id,
            job_rx.clone(),
            result_tx.clone(),
            options.timeout,
            cancel.clone(),
        ));
    }
    drop(result_tx);

    let collected = collect_results(&mut result_rx, total, progress, cancel).await;
    if collected.is_err() {
        workers.abort_all();
    }
    while workers.join_next().await.is_some() {}

    collected
}

/// Count down `total` results, printing one `(i/total)` line per file.
async fn collect_results(
    results: &mut mpsc::Receiver<HashResult>,
    total: usize,
    progress: &dyn Progress,
    cancel: &CancellationToken,
) -> Result<HashOutcome> {
    let mut outcome = HashOutcome::default();
    let mut completed = 0;
    while completed < total {
        let result = tokio::select! {
            _ = cancel.cancelled() => {
                return Err(eyre!("Hashing cancelled after {} of {} files", completed, total));
            }
            result = results.recv() => result,
        };

        let Some(result) = result else {
            return Err(eyre!(
                "Hash workers exited after {} of {} files",
                completed,
                total
            ));
        };
        completed += 1;

        let file_name = display_name(&result.path);
        match result.checksum {
            Ok(checksum) => {
                log::debug!("Job {} hashed {}: {}", result.index, file_name, checksum);
                progress.item(completed, total, &format!("Hashed {}", file_name));
                if let Some(displaced) = outcome.record.insert(checksum, result.path) {
                    outcome.duplicates.push(displaced);
                }
            }
            Err(reason) => {
                log::warn!("Job {} could not hash {}: {}", result.index, file_name, reason);
                progress.item(
                    completed,
                    total,
                    &format!("Could not hash {}: {}", file_name, reason),
                );
                outcome.failures.push(HashFailure {
                    path: result.path,
                    reason,
                });
            }
        }
    }

    Ok(outcome)
}

async fn hash_worker(
    worker_id: usize,
    jobs: Arc<Mutex<mpsc::Receiver<HashJob>>>,
    results: mpsc::Sender<HashResult>,
    timeout: Duration,
    cancel: CancellationToken,
) {
    loop {
        if cancel.is_cancelled() {
            break;
        }
        let job = {
            let mut rx = jobs.lock().await;
            rx.recv().await
        };
        let Some(job) = job else {
            break;
        };

        let checksum = match tokio::time::timeout(timeout, file_hash::md5_file(job.path.clone())).await {
            Ok(Ok(checksum)) => Ok(checksum),
            Ok(Err(e)) => Err(format!("{:#}", e)),
            Err(_) => Err(format!(
                "timed out after {}",
                humantime::format_duration(timeout)
            )),
        };

        let result = HashResult {
            index: job.index,
            path: job.path,
            checksum,
        };
        if results.send(result).await.is_err() {
            break;
        }
    }
    log::trace!("Hash worker {} finished", worker_id);
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

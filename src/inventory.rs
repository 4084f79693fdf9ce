use std::collections::HashSet;
use std::path::Path;

use color_eyre::{Result, eyre::Context};
use futures::TryStreamExt;
use tokio::fs::DirEntry;
use tokio_stream::wrappers::ReadDirStream;

/// List the names of regular files directly inside `directory`.
///
/// Not recursive, no ordering guarantee. Symlinks are not followed.
pub async fn list_files(directory: &Path) -> Result<Vec<String>> {
    let entries: Vec<DirEntry> = ReadDirStream::new(
        tokio::fs::read_dir(directory)
            .await
            .wrap_err(format!("Failed to read directory: {}", directory.display()))?,
    )
    .try_collect()
    .await
    .wrap_err(format!("Failed to list directory: {}", directory.display()))?;

    let mut files = Vec::with_capacity(entries.len());
    for entry in entries {
        let file_type = entry
            .file_type()
            .await
            .wrap_err(format!("Failed to stat: {}", entry.path().display()))?;
        if !file_type.is_file() {
            continue;
        }
        match entry.file_name().into_string() {
            Ok(name) => files.push(name),
            Err(name) => log::warn!("Skipping file with non UTF-8 name: {:?}", name),
        }
    }

    log::debug!("Found {} files in {}", files.len(), directory.display());
    Ok(files)
}

/// Extension including the leading dot, `song.mp3` -> `.mp3`
pub fn dotted_extension(file_name: &str) -> Option<String> {
    Path::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| format!(".{}", ext))
}

/// The shrinking set of local file names not yet claimed by a track.
#[derive(Debug, Clone, Default)]
pub struct Inventory {
    files: HashSet<String>,
}

impl Inventory {
    pub fn new(files: impl IntoIterator<Item = String>) -> Self {
        Self {
            files: files.into_iter().collect(),
        }
    }

    pub fn contains(&self, file_name: &str) -> bool {
        self.files.contains(file_name)
    }

    /// Remove `file_name` from further consideration. Returns false if it was not present.
    pub fn claim(&mut self, file_name: &str) -> bool {
        self.files.remove(file_name)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Sorted copy of the unclaimed names
    pub fn snapshot(&self) -> Vec<String> {
        let mut files: Vec<String> = self.files.iter().cloned().collect();
        files.sort();
        files
    }
}

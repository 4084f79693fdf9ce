use color_eyre::{Result, eyre::Context};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

/// Compute the MD5 digest of a file as lowercase hex
pub fn compute_md5(path: &Path) -> Result<String> {
    log::debug!("Computing MD5 for: {}", path.display());

    let mut file = File::open(path).context(format!("Failed to open file: {}", path.display()))?;

    let mut context = md5::Context::new();
    let mut buffer = vec![0u8; 64 * 1024];

    loop {
        let bytes_read = file
            .read(&mut buffer)
            .context(format!("Failed to read file: {}", path.display()))?;

        if bytes_read == 0 {
            break;
        }

        context.consume(&buffer[..bytes_read]);
    }

    let digest = format!("{:x}", context.compute());
    log::debug!("MD5 of {}: {}", path.display(), digest);
    Ok(digest)
}

/// [`compute_md5`] on the blocking pool
pub async fn md5_file(path: PathBuf) -> Result<String> {
    tokio::task::spawn_blocking(move || compute_md5(&path))
        .await
        .wrap_err("MD5 task panicked")?
}

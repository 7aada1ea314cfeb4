//! Content digests used for change detection.

use crate::error::FingerprintError;
use crate::types::Digest;
use md5::{Digest as _, Md5};
use std::path::Path;

/// Computes the MD5 digest of exactly the bytes given.
///
/// No re-canonicalization happens here: callers must pass a stable
/// serialization, in practice the raw response body. Hashing runs on the
/// blocking pool so large documents don't stall the runtime.
pub async fn fingerprint(content: &[u8]) -> Result<Digest, FingerprintError> {
    let content = content.to_vec();

    tokio::task::spawn_blocking(move || digest_bytes(&content))
        .await
        .map_err(|e| FingerprintError::Task(format!("Task join error: {}", e)))
}

/// Computes the MD5 digest of a file, reading it in chunks.
///
/// # Arguments
///
/// * `path` - Path to the file
///
/// # Returns
///
/// The digest, or an error if the file cannot be read.
pub async fn fingerprint_file(path: &Path) -> Result<Digest, FingerprintError> {
    let path = path.to_path_buf();

    tokio::task::spawn_blocking(move || {
        use std::io::Read;

        let file = std::fs::File::open(&path)?;
        let mut reader = std::io::BufReader::with_capacity(1024 * 1024, file);

        let mut hasher = Md5::new();
        let mut buffer = vec![0u8; 1024 * 1024];

        loop {
            let n = reader.read(&mut buffer)?;
            if n == 0 {
                break;
            }
            hasher.update(&buffer[..n]);
        }

        Ok::<Digest, FingerprintError>(Digest(format!("{:x}", hasher.finalize())))
    })
    .await
    .map_err(|e| FingerprintError::Task(format!("Task join error: {}", e)))?
}

fn digest_bytes(content: &[u8]) -> Digest {
    let mut hasher = Md5::new();
    hasher.update(content);
    Digest(format!("{:x}", hasher.finalize()))
}

//! Overwrite-before-unlink.
//!
//! A single pass of random bytes over the file's current extent, flushed to
//! the device. On flash media with wear levelling, or on copy-on-write
//! filesystems, the old blocks may survive anyway; this lowers recoverability,
//! it does not guarantee erasure.

use std::{io, path::Path};

use rand::{rngs::OsRng, RngCore};
use tokio::io::AsyncWriteExt;

const CHUNK_LEN: usize = 64 * 1024;

/// Overwrite the whole of `path` with random bytes and return how many were written.
/// The file keeps its length. A failure part-way leaves a partially overwritten file.
pub async fn overwrite_with_random(path: &Path) -> io::Result<u64> {
    let len = tokio::fs::metadata(path).await?.len();
    let mut file = tokio::fs::OpenOptions::new().write(true).open(path).await?;

    let mut chunk = vec![0u8; CHUNK_LEN.min(len as usize)];
    let mut remaining = len;
    while remaining > 0 {
        let take = remaining.min(chunk.len() as u64) as usize;
        OsRng.fill_bytes(&mut chunk[..take]);
        file.write_all(&chunk[..take]).await?;
        remaining -= take as u64;
    }
    file.flush().await?;
    file.sync_all().await?;
    Ok(len)
}

/// Overwrite then remove `path`. Missing files are not an error.
pub async fn shred_file(path: &Path) -> io::Result<bool> {
    match tokio::fs::metadata(path).await {
        Ok(_) => {}
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(err) => return Err(err),
    }
    overwrite_with_random(path).await?;
    tokio::fs::remove_file(path).await?;
    Ok(true)
}

//! 64-bit content fingerprints.
//!
//! Fingerprints are the first 8 bytes of a BLAKE3 hash, read little-endian.
//! They key the hash-to-path side of the index and let peers recognize moved
//! or duplicated content without re-reading it. Directories have no content,
//! so they carry a placeholder derived from their path under a separate key
//! derivation context.

use std::io::{self, Read};

/// Fingerprint of an in-memory buffer.
pub fn fingerprint_bytes(bytes: &[u8]) -> u64 {
    truncate(&blake3::hash(bytes))
}

/// Fingerprint of a reader, streamed without buffering the whole input.
pub fn fingerprint_reader<R: Read>(mut reader: R) -> io::Result<u64> {
    let mut hasher = blake3::Hasher::new();
    io::copy(&mut reader, &mut hasher)?;
    Ok(truncate(&hasher.finalize()))
}

/// Placeholder fingerprint for a directory, derived from its relative path.
///
/// Uses a derivation context so a directory path can never collide with file
/// content that happens to spell the same bytes.
pub fn fingerprint_path(path: &str) -> u64 {
    let mut hasher = blake3::Hasher::new_derive_key("lansync 2024-06-01 directory path");
    hasher.update(path.as_bytes());
    truncate(&hasher.finalize())
}

fn truncate(hash: &blake3::Hash) -> u64 {
    let mut first = [0u8; 8];
    first.copy_from_slice(&hash.as_bytes()[..8]);
    u64::from_le_bytes(first)
}

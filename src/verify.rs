//! Streaming SHA-256 verification of cache files.
//!
//! Files are read in 64 KiB chunks. Read errors never propagate: a missing
//! or unreadable file is a short read and therefore a mismatch.

use std::path::Path;

use sha2::{Digest, Sha256};
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tracing::{debug, trace};

/// Read chunk size.
pub const BUF_SIZE: usize = 1 << 16;

/// Size and digest of a file as read from disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHash {
    /// Bytes read before EOF or the first error.
    pub bytes: u64,
    /// Lowercase hex digest, `None` when reading failed part-way.
    pub digest: Option<String>,
}

/// Outcome of checking a file against an expected digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashCheck {
    /// Whether the file is intact.
    pub matched: bool,
    /// Bytes actually read.
    pub bytes: u64,
    /// Computed digest, `None` when reading failed.
    pub digest: Option<String>,
}

/// Streams `path` through SHA-256.
pub async fn hash_file(path: &Path) -> FileHash {
    let mut file = match File::open(path).await {
        Ok(file) => file,
        Err(e) => {
            trace!(path = %path.display(), error = %e, "cannot open file for hashing");
            return FileHash {
                bytes: 0,
                digest: None,
            };
        }
    };

    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; BUF_SIZE];
    let mut bytes: u64 = 0;

    loop {
        match file.read(&mut buffer).await {
            Ok(0) => break,
            Ok(n) => {
                hasher.update(&buffer[..n]);
                bytes += n as u64;
            }
            Err(e) => {
                debug!(path = %path.display(), bytes, error = %e, "read failed while hashing");
                return FileHash {
                    bytes,
                    digest: None,
                };
            }
        }
    }

    FileHash {
        bytes,
        digest: Some(hex::encode(hasher.finalize())),
    }
}

/// Checks `path` against `expected` (lowercase hex).
///
/// An empty `expected` means the digest is unknown: any fully readable file
/// is trusted.
pub async fn check_file_hash(path: &Path, expected: &str) -> HashCheck {
    let FileHash { bytes, digest } = hash_file(path).await;
    let matched = match &digest {
        Some(actual) => expected.is_empty() || actual.eq_ignore_ascii_case(expected),
        None => false,
    };
    HashCheck {
        matched,
        bytes,
        digest,
    }
}

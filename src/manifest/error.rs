//! Error types for the manifest module.

use std::path::PathBuf;

use thiserror::Error;

use crate::collection::CacheMode;

/// Errors raised while loading, validating or saving manifest files.
///
/// All of these are configuration errors: they abort the run before any
/// operation begins.
#[derive(Debug, Error)]
pub enum ManifestError {
    /// Reading or writing a manifest file failed.
    #[error("IO error accessing {path}: {source}")]
    Io {
        /// File being accessed.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// A manifest file is not valid JSON for its schema.
    #[error("malformed JSON in {path}: {source}")]
    Parse {
        /// File being parsed.
        path: PathBuf,
        /// The underlying parse error.
        #[source]
        source: serde_json::Error,
    },

    /// In-memory JSON (de)serialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The requested version is not present in the manifest.
    #[error("unknown cache version: {version}")]
    UnknownVersion {
        /// Requested version name.
        version: String,
    },

    /// A selected mode has no local root configured.
    #[error("no local root configured for {mode} caches")]
    MissingRoot {
        /// The mode lacking a root.
        mode: CacheMode,
    },
}

impl ManifestError {
    /// Creates an IO error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Creates a parse error.
    pub fn parse(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        Self::Parse {
            path: path.into(),
            source,
        }
    }
}

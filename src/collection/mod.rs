//! Cache collections and the file records they track.
//!
//! A collection is one `(version, mode)` pair: a local root directory, a
//! remote [`Origin`] the files come from, a curation flag and the list of
//! [`FileRecord`]s already known from the manifest.

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use url::Url;

mod swap;

pub use swap::{LAST_VERSION_FILE, SWAP_DIR_NAME, swapped_path};

/// Delivery mode of a cache collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheMode {
    /// Cache used when playing online.
    Playable,
    /// Full offline cache.
    Offline,
}

impl CacheMode {
    /// Every mode, in the order collections are built for `--cache-mode all`.
    pub const ALL: [CacheMode; 2] = [CacheMode::Offline, CacheMode::Playable];

    /// Lowercase name used in the manifest and progress snapshots.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Playable => "playable",
            Self::Offline => "offline",
        }
    }
}

impl fmt::Display for CacheMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifies a collection: one version in one delivery mode.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CollectionKey {
    /// Cache version name, e.g. `beta-20100104`.
    pub version: String,
    /// Delivery mode.
    pub mode: CacheMode,
}

impl CollectionKey {
    /// Creates a key for `version` in `mode`.
    pub fn new(version: impl Into<String>, mode: CacheMode) -> Self {
        Self {
            version: version.into(),
            mode,
        }
    }
}

impl fmt::Display for CollectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.version, self.mode)
    }
}

/// Location files are fetched from: an HTTP directory tree or a local one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Origin {
    /// HTTP(S) URL. Directory origins end with `/`.
    Http(Url),
    /// Local filesystem path.
    Local(PathBuf),
}

impl Origin {
    /// Parses an origin root as given on the command line.
    ///
    /// `http://` and `https://` roots become [`Origin::Http`]; `file://` URLs
    /// and anything else become [`Origin::Local`].
    ///
    /// # Errors
    ///
    /// Returns [`url::ParseError`] if an `http(s)://` root is not a valid URL.
    pub fn parse(root: &str) -> Result<Self, url::ParseError> {
        let trimmed = root.trim();
        let lower = trimmed.to_ascii_lowercase();
        if lower.starts_with("http://") || lower.starts_with("https://") {
            let url = Url::parse(trimmed)?;
            return Ok(Self::Http(with_segments(&url, "", true)));
        }
        if lower.starts_with("file://")
            && let Ok(url) = Url::parse(trimmed)
            && let Ok(path) = url.to_file_path()
        {
            return Ok(Self::Local(path));
        }
        Ok(Self::Local(PathBuf::from(trimmed)))
    }

    /// Returns the origin of the subdirectory at `rel_path`.
    #[must_use]
    pub fn join_dir(&self, rel_path: &str) -> Self {
        match self {
            Self::Http(url) => Self::Http(with_segments(url, rel_path, true)),
            Self::Local(path) => Self::Local(join_segments(path, rel_path)),
        }
    }

    /// Returns the origin of the file at `rel_path`.
    #[must_use]
    pub fn join_file(&self, rel_path: &str) -> Self {
        match self {
            Self::Http(url) => Self::Http(with_segments(url, rel_path, false)),
            Self::Local(path) => Self::Local(join_segments(path, rel_path)),
        }
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Http(url) => write!(f, "{url}"),
            Self::Local(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Appends the `/`-separated segments of `rel_path` to `base`, percent-encoding each.
fn with_segments(base: &Url, rel_path: &str, trailing_slash: bool) -> Url {
    let mut url = base.clone();
    if let Ok(mut segments) = url.path_segments_mut() {
        segments.pop_if_empty();
        segments.extend(rel_path.split('/').filter(|s| !s.is_empty()));
        if trailing_slash {
            segments.push("");
        }
    }
    url
}

fn join_segments(base: &Path, rel_path: &str) -> PathBuf {
    rel_path
        .split('/')
        .filter(|s| !s.is_empty())
        .fold(base.to_path_buf(), |acc, segment| acc.join(segment))
}

/// Returns true when `rel_path` stays inside its root: no absolute paths,
/// no `.`/`..` segments, no backslashes and at least one segment.
#[must_use]
pub fn is_safe_relative_path(rel_path: &str) -> bool {
    if rel_path.starts_with('/') || rel_path.contains('\\') || rel_path.contains(':') {
        return false;
    }
    let mut segments = rel_path.split('/').filter(|s| !s.is_empty()).peekable();
    if segments.peek().is_none() {
        return false;
    }
    segments.all(|s| s != "." && s != "..")
}

/// One tracked file of a collection.
///
/// Records are immutable; discovered files get fresh records from
/// [`Collection::record`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    key: CollectionKey,
    rel_path: String,
    local_path: PathBuf,
    source: Origin,
    expected_digest: String,
}

impl FileRecord {
    /// Collection this record belongs to.
    #[must_use]
    pub fn key(&self) -> &CollectionKey {
        &self.key
    }

    /// Path relative to the collection root, `/`-separated.
    #[must_use]
    pub fn rel_path(&self) -> &str {
        &self.rel_path
    }

    /// Absolute local destination.
    #[must_use]
    pub fn local_path(&self) -> &Path {
        &self.local_path
    }

    /// Where the file is fetched from.
    #[must_use]
    pub fn source(&self) -> &Origin {
        &self.source
    }

    /// Expected lowercase hex SHA-256, empty when unknown.
    #[must_use]
    pub fn expected_digest(&self) -> &str {
        &self.expected_digest
    }

    /// Whether an expected digest is recorded.
    #[must_use]
    pub fn has_expected_digest(&self) -> bool {
        !self.expected_digest.is_empty()
    }
}

/// One `(version, mode)` cache collection.
#[derive(Debug, Clone)]
pub struct Collection {
    key: CollectionKey,
    local_root: PathBuf,
    remote_root: Origin,
    curated: bool,
    records: Vec<FileRecord>,
}

impl Collection {
    /// Creates a collection with no known records.
    pub fn new(
        key: CollectionKey,
        local_root: impl Into<PathBuf>,
        remote_root: Origin,
        curated: bool,
    ) -> Self {
        Self {
            key,
            local_root: local_root.into(),
            remote_root,
            curated,
            records: Vec::new(),
        }
    }

    /// Builds a record for `rel_path` rooted in this collection.
    ///
    /// Returns `None` when `rel_path` would escape the collection root.
    #[must_use]
    pub fn record(&self, rel_path: &str, expected_digest: &str) -> Option<FileRecord> {
        if !is_safe_relative_path(rel_path) {
            return None;
        }
        let rel_path = rel_path
            .split('/')
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("/");
        Some(FileRecord {
            key: self.key.clone(),
            local_path: join_segments(&self.local_root, &rel_path),
            source: self.remote_root.join_file(&rel_path),
            expected_digest: expected_digest.trim().to_ascii_lowercase(),
            rel_path,
        })
    }

    /// Adds a known record. Returns false if the path is unsafe.
    pub fn track(&mut self, rel_path: &str, expected_digest: &str) -> bool {
        match self.record(rel_path, expected_digest) {
            Some(record) => {
                self.records.push(record);
                true
            }
            None => false,
        }
    }

    /// Collection key.
    #[must_use]
    pub fn key(&self) -> &CollectionKey {
        &self.key
    }

    /// Local root directory.
    #[must_use]
    pub fn local_root(&self) -> &Path {
        &self.local_root
    }

    /// Remote root directory.
    #[must_use]
    pub fn remote_root(&self) -> &Origin {
        &self.remote_root
    }

    /// Whether the manifest is the complete, authoritative file list.
    #[must_use]
    pub fn is_curated(&self) -> bool {
        self.curated
    }

    /// Known records from the manifest.
    #[must_use]
    pub fn records(&self) -> &[FileRecord] {
        &self.records
    }

    /// Has at least one known record.
    #[must_use]
    pub fn is_registered(&self) -> bool {
        !self.records.is_empty()
    }

    /// Trusts filesystem/remote discovery in addition to the manifest.
    #[must_use]
    pub fn is_crawl_eligible(&self) -> bool {
        !self.curated
    }

    /// Absolute local paths of every known record.
    #[must_use]
    pub fn known_paths(&self) -> HashSet<PathBuf> {
        self.records
            .iter()
            .map(|record| record.local_path.clone())
            .collect()
    }
}

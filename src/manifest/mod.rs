//! Persisted manifest of expected cache contents.
//!
//! The manifest file (`hashes.json`) maps each version to its recorded
//! sizes and per-mode `relative path -> hex digest` tables:
//!
//! ```json
//! {
//!     "beta-20100104": {
//!         "playable_size": 1024,
//!         "offline_size": 0,
//!         "playable": { "data/a.pak": "9f86d08..." },
//!         "offline": {}
//!     }
//! }
//! ```
//!
//! Key order is preserved on load so curated sections are written back as
//! they were read; non-curated sections are sorted on save.

mod builder;
mod error;

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, instrument};

use crate::collection::{CacheMode, CollectionKey};

pub use builder::{ModeSelection, Selection, VersionSelection, build_collections};
pub use error::ManifestError;

/// File name of the manifest inside the user dir.
pub const MANIFEST_FILE: &str = "hashes.json";

/// File name of the version list inside the user dir.
pub const VERSION_LIST_FILE: &str = "versions.json";

/// Ordered `relative path -> hex digest` table for one collection.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct DigestMap(Map<String, Value>);

impl DigestMap {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Iterates `(path, digest)` pairs in stored order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0
            .iter()
            .map(|(path, digest)| (path.as_str(), digest.as_str().unwrap_or_default()))
    }

    /// Looks up the digest recorded for `path`.
    #[must_use]
    pub fn get(&self, path: &str) -> Option<&str> {
        self.0.get(path).and_then(Value::as_str)
    }

    /// Inserts or replaces the digest for `path`, keeping its position if present.
    pub fn insert(&mut self, path: impl Into<String>, digest: impl Into<String>) {
        self.0.insert(path.into(), Value::String(digest.into()));
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Removes every entry.
    pub fn clear(&mut self) {
        self.0.clear();
    }

    /// Returns a copy with keys in lexicographic order.
    #[must_use]
    pub fn sorted(&self) -> Self {
        let mut entries: Vec<_> = self.0.iter().collect();
        entries.sort_by(|(a, _), (b, _)| a.cmp(b));
        Self(
            entries
                .into_iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        )
    }
}

impl<'de> Deserialize<'de> for DigestMap {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let map = Map::<String, Value>::deserialize(deserializer)?;
        if let Some((path, _)) = map.iter().find(|(_, digest)| !digest.is_string()) {
            return Err(serde::de::Error::custom(format!(
                "digest for {path:?} must be a string"
            )));
        }
        Ok(Self(map))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for DigestMap {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), Value::String(v.into())))
                .collect(),
        )
    }
}

/// Manifest section for one version.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VersionEntry {
    /// Recorded total size of the playable cache in bytes.
    #[serde(default)]
    pub playable_size: u64,
    /// Recorded total size of the offline cache in bytes.
    #[serde(default)]
    pub offline_size: u64,
    /// Playable cache digests.
    #[serde(default)]
    pub playable: DigestMap,
    /// Offline cache digests.
    #[serde(default)]
    pub offline: DigestMap,
}

impl VersionEntry {
    /// Recorded size for `mode`.
    #[must_use]
    pub fn size(&self, mode: CacheMode) -> u64 {
        match mode {
            CacheMode::Playable => self.playable_size,
            CacheMode::Offline => self.offline_size,
        }
    }

    /// Digest table for `mode`.
    #[must_use]
    pub fn digests(&self, mode: CacheMode) -> &DigestMap {
        match mode {
            CacheMode::Playable => &self.playable,
            CacheMode::Offline => &self.offline,
        }
    }

    fn parts_mut(&mut self, mode: CacheMode) -> (&mut u64, &mut DigestMap) {
        match mode {
            CacheMode::Playable => (&mut self.playable_size, &mut self.playable),
            CacheMode::Offline => (&mut self.offline_size, &mut self.offline),
        }
    }
}

/// In-memory manifest with a dirty flag gating the end-of-run rewrite.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Manifest {
    versions: Vec<(String, VersionEntry)>,
    dirty: bool,
}

impl Manifest {
    /// Creates an empty manifest.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads and validates a manifest file.
    ///
    /// # Errors
    ///
    /// Returns [`ManifestError::Io`] if the file cannot be read and
    /// [`ManifestError::Parse`] if it does not match the schema.
    #[instrument(fields(path = %path.display()))]
    pub fn load(path: &Path) -> Result<Self, ManifestError> {
        let text = fs::read_to_string(path).map_err(|e| ManifestError::io(path, e))?;
        let manifest = Self::parse(&text).map_err(|e| match e {
            ManifestError::Json(source) => ManifestError::parse(path, source),
            other => other,
        })?;
        debug!(versions = manifest.versions.len(), "manifest loaded");
        Ok(manifest)
    }

    /// Parses manifest JSON, preserving version and path order.
    ///
    /// # Errors
    ///
    /// Returns [`ManifestError::Json`] on malformed input.
    pub fn parse(text: &str) -> Result<Self, ManifestError> {
        let raw: Map<String, Value> = serde_json::from_str(text)?;
        let versions = raw
            .into_iter()
            .map(|(name, value)| Ok((name, serde_json::from_value(value)?)))
            .collect::<Result<Vec<(String, VersionEntry)>, serde_json::Error>>()?;
        Ok(Self {
            versions,
            dirty: false,
        })
    }

    /// Serializes with a 4-space indent.
    ///
    /// Sections of versions not in `curated` have their digest tables sorted
    /// by path; curated sections keep their loaded order.
    ///
    /// # Errors
    ///
    /// Returns [`ManifestError::Json`] if serialization fails.
    pub fn to_json_pretty(&self, curated: &HashSet<String>) -> Result<String, ManifestError> {
        let mut root = Map::new();
        for (name, entry) in &self.versions {
            let value = if curated.contains(name) {
                serde_json::to_value(entry)?
            } else {
                serde_json::to_value(VersionEntry {
                    playable: entry.playable.sorted(),
                    offline: entry.offline.sorted(),
                    ..entry.clone()
                })?
            };
            root.insert(name.clone(), value);
        }

        let mut buffer = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut serializer = serde_json::Serializer::with_formatter(&mut buffer, formatter);
        root.serialize(&mut serializer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }

    /// Writes the manifest to `path` (see [`Manifest::to_json_pretty`]).
    ///
    /// # Errors
    ///
    /// Returns [`ManifestError::Io`] if the file cannot be written.
    #[instrument(skip(self, curated), fields(path = %path.display()))]
    pub fn save(&self, path: &Path, curated: &HashSet<String>) -> Result<(), ManifestError> {
        let text = self.to_json_pretty(curated)?;
        fs::write(path, text).map_err(|e| ManifestError::io(path, e))?;
        debug!("manifest saved");
        Ok(())
    }

    /// Whether any mutation happened since load.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Version names in stored order.
    pub fn versions(&self) -> impl Iterator<Item = &str> {
        self.versions.iter().map(|(name, _)| name.as_str())
    }

    /// Section for `version`.
    #[must_use]
    pub fn entry(&self, version: &str) -> Option<&VersionEntry> {
        self.versions
            .iter()
            .find(|(name, _)| name == version)
            .map(|(_, entry)| entry)
    }

    fn entry_mut(&mut self, version: &str) -> &mut VersionEntry {
        let index = match self.versions.iter().position(|(name, _)| name == version) {
            Some(index) => index,
            None => {
                self.versions
                    .push((version.to_string(), VersionEntry::default()));
                self.versions.len() - 1
            }
        };
        &mut self.versions[index].1
    }

    /// Inserts an empty section for every listed version not yet present.
    ///
    /// Returns true (and marks the manifest dirty) if anything was added.
    pub fn merge_versions(&mut self, list: &VersionList) -> bool {
        let mut added = false;
        for name in list.names() {
            if self.entry(name).is_none() {
                debug!(version = name, "adding empty manifest section");
                self.entry_mut(name);
                added = true;
            }
        }
        self.dirty |= added;
        added
    }

    /// Records a discovered file: stores its digest and adds its size.
    pub fn register(&mut self, key: &CollectionKey, rel_path: &str, digest: &str, bytes: u64) {
        let (size, digests) = self.entry_mut(&key.version).parts_mut(key.mode);
        *size = size.saturating_add(bytes);
        digests.insert(rel_path, digest);
        self.dirty = true;
    }

    /// Empties a collection's section and zeroes its recorded size.
    pub fn clear_collection(&mut self, key: &CollectionKey) {
        let (size, digests) = self.entry_mut(&key.version).parts_mut(key.mode);
        *size = 0;
        digests.clear();
        self.dirty = true;
    }
}

/// One entry of the version list file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct VersionInfo {
    /// Version name.
    pub name: String,
}

/// Version list file (`versions.json`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct VersionList {
    /// Known versions.
    pub versions: Vec<VersionInfo>,
}

impl VersionList {
    /// Loads the version list file.
    ///
    /// # Errors
    ///
    /// Returns [`ManifestError::Io`] or [`ManifestError::Parse`].
    pub fn load(path: &Path) -> Result<Self, ManifestError> {
        let text = fs::read_to_string(path).map_err(|e| ManifestError::io(path, e))?;
        serde_json::from_str(&text).map_err(|e| ManifestError::parse(path, e))
    }

    /// Version names in listed order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.versions.iter().map(|info| info.name.as_str())
    }
}

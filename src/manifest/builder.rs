//! Builds in-memory collections from the manifest and the run selection.

use std::collections::HashSet;
use std::path::PathBuf;

use tracing::{debug, warn};

use super::{Manifest, ManifestError};
use crate::collection::{CacheMode, Collection, CollectionKey, Origin, swapped_path};

/// Which delivery modes a run covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeSelection {
    /// Offline and playable.
    All,
    /// A single mode.
    Only(CacheMode),
}

impl ModeSelection {
    fn modes(self) -> Vec<CacheMode> {
        match self {
            Self::All => CacheMode::ALL.to_vec(),
            Self::Only(mode) => vec![mode],
        }
    }
}

/// Which versions a run covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionSelection {
    /// Every version in the manifest.
    All,
    /// A single named version.
    Only(String),
}

/// Everything needed to turn manifest sections into collections.
#[derive(Debug, Clone)]
pub struct Selection {
    /// Selected modes.
    pub modes: ModeSelection,
    /// Selected versions.
    pub versions: VersionSelection,
    /// Local root for playable caches.
    pub playable_root: Option<PathBuf>,
    /// Local root for offline caches.
    pub offline_root: Option<PathBuf>,
    /// User dir holding the swap marker.
    pub user_dir: PathBuf,
    /// Origin root; each version lives under `<origin>/<version>/`.
    pub origin: Origin,
    /// Curated version names.
    pub curated: HashSet<String>,
}

/// Builds one collection per selected `(version, mode)` pair.
///
/// Manifest paths that would escape the collection root are skipped.
///
/// # Errors
///
/// Returns [`ManifestError::UnknownVersion`] if a requested version is not in
/// the manifest and [`ManifestError::MissingRoot`] if a selected mode has no
/// local root.
pub fn build_collections(
    manifest: &Manifest,
    selection: &Selection,
) -> Result<Vec<Collection>, ManifestError> {
    let versions: Vec<String> = match &selection.versions {
        VersionSelection::All => manifest.versions().map(str::to_string).collect(),
        VersionSelection::Only(version) => {
            if manifest.entry(version).is_none() {
                return Err(ManifestError::UnknownVersion {
                    version: version.clone(),
                });
            }
            vec![version.clone()]
        }
    };

    let mut collections = Vec::new();
    for version in &versions {
        let Some(entry) = manifest.entry(version) else {
            continue;
        };
        for mode in selection.modes.modes() {
            let local_base = match mode {
                CacheMode::Playable => selection.playable_root.as_deref(),
                CacheMode::Offline => selection.offline_root.as_deref(),
            }
            .ok_or(ManifestError::MissingRoot { mode })?;

            let local_root = match mode {
                CacheMode::Playable => swapped_path(local_base, &selection.user_dir, version),
                CacheMode::Offline => local_base.join(version),
            };

            let mut collection = Collection::new(
                CollectionKey::new(version.clone(), mode),
                local_root,
                selection.origin.join_dir(version),
                selection.curated.contains(version),
            );
            for (rel_path, digest) in entry.digests(mode).iter() {
                if !collection.track(rel_path, digest) {
                    warn!(version, %mode, rel_path, "skipping manifest path outside collection root");
                }
            }

            debug!(
                collection = %collection.key(),
                root = %collection.local_root().display(),
                records = collection.records().len(),
                curated = collection.is_curated(),
                "collection built"
            );
            collections.push(collection);
        }
    }

    Ok(collections)
}

//! Legacy shared install directory ("swap directory") resolution.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

/// Name of the unversioned legacy install directory.
pub const SWAP_DIR_NAME: &str = "FusionFall";

/// Marker file in the user dir holding the most recently active version name.
pub const LAST_VERSION_FILE: &str = ".lastver";

/// Resolves the local root of a playable collection.
///
/// The legacy `<local_root>/FusionFall` directory stands in for
/// `<local_root>/<version>` when the named directory does not exist yet,
/// the legacy directory does, and the swap marker names `version`.
#[must_use]
pub fn swapped_path(local_root: &Path, user_dir: &Path, version: &str) -> PathBuf {
    let current_cache = local_root.join(SWAP_DIR_NAME);
    let named_cache = local_root.join(version);
    let record_path = user_dir.join(LAST_VERSION_FILE);

    if !named_cache.is_dir()
        && current_cache.is_dir()
        && record_path.is_file()
        && fs::read_to_string(&record_path).is_ok_and(|last| last == version)
    {
        debug!(
            version,
            path = %current_cache.display(),
            "using swap directory for playable cache"
        );
        return current_cache;
    }

    named_cache
}

//! Deleting collections from disk.

use std::collections::BTreeSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::collection::Collection;

/// Deletes each known record's file, then removes ancestor directories up
/// to and including the collection root once they are empty.
///
/// Files that are already missing are skipped; other deletion failures are
/// logged and leave the file in place.
///
/// # Returns
///
/// The number of files deleted.
pub(super) async fn purge_records(collection: &Collection) -> usize {
    let root = collection.local_root();
    let mut dirs = BTreeSet::new();
    let mut removed = 0usize;

    for record in collection.records() {
        let path = record.local_path();
        match tokio::fs::remove_file(path).await {
            Ok(()) => removed += 1,
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => {
                warn!(path = %path.display(), error = %e, "cannot delete cache file");
            }
        }
        dirs.extend(ancestors_within(path, root));
    }

    // Deepest first so children are gone before their parents are tried.
    let mut dirs: Vec<PathBuf> = dirs.into_iter().collect();
    dirs.sort_by_key(|dir| std::cmp::Reverse(dir.components().count()));
    for dir in dirs {
        // Fails for non-empty or already removed directories
        if tokio::fs::remove_dir(&dir).await.is_ok() {
            debug!(dir = %dir.display(), "removed empty directory");
        }
    }

    debug!(collection = %collection.key(), removed, "records purged");
    removed
}

/// Deletes the whole collection root.
///
/// A root that does not exist counts as already deleted.
pub(super) async fn purge_root(root: &Path) -> std::io::Result<()> {
    match tokio::fs::remove_dir_all(root).await {
        Err(e) if e.kind() != ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

/// Parent directories of `path` from its immediate parent up to `root`.
fn ancestors_within(path: &Path, root: &Path) -> Vec<PathBuf> {
    path.ancestors()
        .skip(1)
        .take_while(|dir| dir.starts_with(root))
        .map(Path::to_path_buf)
        .collect()
}

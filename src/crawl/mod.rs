//! Discovery of files under a collection root that the manifest does not know.
//!
//! The [`Crawler`] walks a directory tree through a [`DirectoryListing`]
//! (local `read_dir` or HTTP autoindex) and hands every file whose resolved
//! local path is not already tracked to a [`DiscoveryHandler`]. Handling is
//! interleaved with listing: a directory's files are handled while its
//! subdirectories are being listed.

use std::collections::HashSet;
use std::path::PathBuf;

use async_trait::async_trait;
use futures_util::FutureExt;
use futures_util::future::{BoxFuture, join, join_all};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::collection::{Collection, FileRecord, Origin};
use crate::download::DownloadError;

mod listing;

pub use listing::{
    AutoindexListing, DirectoryListing, EntryKind, ListingEntry, LocalListing, parse_autoindex,
};

/// Default depth cap for HTTP crawls.
pub const DEFAULT_HTTP_CRAWL_DEPTH: usize = 3;

/// Errors raised while listing directories.
#[derive(Debug, Error)]
pub enum CrawlError {
    /// Reading a local directory failed.
    #[error("cannot list {path}: {source}")]
    Io {
        /// Directory being listed.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// Fetching an autoindex page failed.
    #[error("cannot fetch listing: {0}")]
    Listing(#[from] DownloadError),

    /// The listing cannot handle this kind of origin.
    #[error("listing does not support origin {origin}")]
    UnsupportedOrigin {
        /// The rejected origin.
        origin: String,
    },
}

impl CrawlError {
    /// Creates an IO error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Receives each undiscovered file as soon as it is found.
#[async_trait]
pub trait DiscoveryHandler: Send + Sync {
    /// Handles one file that is not among the collection's known records.
    ///
    /// The record carries no expected digest.
    async fn on_file(&self, record: FileRecord);
}

/// Recursive tree walker.
pub struct Crawler<'a> {
    listing: &'a dyn DirectoryListing,
    max_depth: Option<usize>,
}

struct WalkContext<'a> {
    collection: &'a Collection,
    known: HashSet<PathBuf>,
    handler: &'a dyn DiscoveryHandler,
}

impl<'a> Crawler<'a> {
    /// Creates an unbounded crawler.
    #[must_use]
    pub fn new(listing: &'a dyn DirectoryListing) -> Self {
        Self {
            listing,
            max_depth: None,
        }
    }

    /// Stops descending into directories more than `max_depth` levels below
    /// the root.
    #[must_use]
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = Some(max_depth);
        self
    }

    /// Walks `root` and hands every file unknown to `collection` to `handler`.
    ///
    /// Paths are resolved relative to `root` and mapped onto the
    /// collection's local root to decide whether they are known.
    ///
    /// # Returns
    ///
    /// The number of files handed to `handler`.
    ///
    /// # Errors
    ///
    /// Returns [`CrawlError`] only if `root` itself cannot be listed;
    /// failures below the root are logged and that subtree is skipped.
    #[instrument(skip(self, collection, handler), fields(collection = %collection.key(), root = %root))]
    pub async fn crawl(
        &self,
        collection: &Collection,
        root: &Origin,
        handler: &dyn DiscoveryHandler,
    ) -> Result<usize, CrawlError> {
        let ctx = WalkContext {
            collection,
            known: collection.known_paths(),
            handler,
        };
        let discovered = self.walk(&ctx, root.clone(), String::new(), 0).await?;
        info!(discovered, "crawl complete");
        Ok(discovered)
    }

    fn walk<'s>(
        &'s self,
        ctx: &'s WalkContext<'s>,
        dir: Origin,
        prefix: String,
        depth: usize,
    ) -> BoxFuture<'s, Result<usize, CrawlError>> {
        async move {
            let entries = match self.listing.list(&dir).await {
                Ok(entries) => entries,
                Err(e) if depth == 0 => return Err(e),
                Err(e) => {
                    warn!(dir = %dir, error = %e, "skipping directory that cannot be listed");
                    return Ok(0);
                }
            };

            let mut files = Vec::new();
            let mut subdirs = Vec::new();
            for entry in entries {
                let rel_path = if prefix.is_empty() {
                    entry.name.clone()
                } else {
                    format!("{prefix}/{}", entry.name)
                };
                match entry.kind {
                    EntryKind::File => {
                        let Some(record) = ctx.collection.record(&rel_path, "") else {
                            continue;
                        };
                        if !ctx.known.contains(record.local_path()) {
                            files.push(record);
                        }
                    }
                    EntryKind::Directory => {
                        if self.max_depth.is_some_and(|max| depth >= max) {
                            debug!(dir = %rel_path, depth, "depth cap reached, not descending");
                            continue;
                        }
                        subdirs.push(self.walk(ctx, dir.join_dir(&entry.name), rel_path, depth + 1));
                    }
                }
            }

            let discovered = files.len();
            if discovered > 0 {
                debug!(dir = %dir, discovered, "undiscovered files found");
            }
            let handle_files = join_all(files.into_iter().map(|record| ctx.handler.on_file(record)));
            let (_, nested) = join(handle_files, join_all(subdirs)).await;

            Ok(discovered + nested.into_iter().map(|n| n.unwrap_or(0)).sum::<usize>())
        }
        .boxed()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::collection::{CacheMode, CollectionKey};
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Listing backed by an in-memory map of `origin -> children`.
    struct FixtureListing {
        dirs: HashMap<String, Vec<ListingEntry>>,
    }

    #[async_trait]
    impl DirectoryListing for FixtureListing {
        async fn list(&self, dir: &Origin) -> Result<Vec<ListingEntry>, CrawlError> {
            self.dirs
                .get(&dir.to_string())
                .cloned()
                .ok_or_else(|| CrawlError::io(dir.to_string(), std::io::ErrorKind::Other.into()))
        }
    }

    #[derive(Default)]
    struct RecordingHandler {
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl DiscoveryHandler for RecordingHandler {
        async fn on_file(&self, record: FileRecord) {
            assert!(!record.has_expected_digest());
            self.seen.lock().unwrap().push(record.rel_path().to_string());
        }
    }

    impl RecordingHandler {
        fn sorted(&self) -> Vec<String> {
            let mut seen = self.seen.lock().unwrap().clone();
            seen.sort();
            seen
        }
    }

    fn root() -> Origin {
        Origin::parse("http://cdn.example.com/big/v1/").unwrap()
    }

    fn collection() -> Collection {
        let mut collection = Collection::new(
            CollectionKey::new("v1", CacheMode::Playable),
            "/cache/v1",
            root(),
            false,
        );
        collection.track("known.pak", "00");
        collection.track("data/known.pak", "00");
        collection
    }

    fn tree() -> FixtureListing {
        let base = "http://cdn.example.com/big/v1/";
        let dirs = HashMap::from([
            (
                base.to_string(),
                vec![
                    ListingEntry::file("known.pak"),
                    ListingEntry::file("new.pak"),
                    ListingEntry::directory("data"),
                ],
            ),
            (
                format!("{base}data/"),
                vec![
                    ListingEntry::file("known.pak"),
                    ListingEntry::file("extra.pak"),
                    ListingEntry::directory("deep"),
                ],
            ),
            (
                format!("{base}data/deep/"),
                vec![ListingEntry::file("deeper.pak")],
            ),
        ]);
        FixtureListing { dirs }
    }

    #[tokio::test]
    async fn test_crawl_reports_only_unknown_files() {
        let listing = tree();
        let handler = RecordingHandler::default();

        let discovered = Crawler::new(&listing)
            .crawl(&collection(), &root(), &handler)
            .await
            .unwrap();

        assert_eq!(discovered, 3);
        assert_eq!(
            handler.sorted(),
            vec!["data/deep/deeper.pak", "data/extra.pak", "new.pak"]
        );
    }

    #[tokio::test]
    async fn test_crawl_depth_cap_stops_descent() {
        let listing = tree();
        let handler = RecordingHandler::default();

        let discovered = Crawler::new(&listing)
            .with_max_depth(1)
            .crawl(&collection(), &root(), &handler)
            .await
            .unwrap();

        assert_eq!(discovered, 2);
        assert_eq!(handler.sorted(), vec!["data/extra.pak", "new.pak"]);
    }

    #[tokio::test]
    async fn test_crawl_zero_depth_lists_root_only() {
        let listing = tree();
        let handler = RecordingHandler::default();

        Crawler::new(&listing)
            .with_max_depth(0)
            .crawl(&collection(), &root(), &handler)
            .await
            .unwrap();

        assert_eq!(handler.sorted(), vec!["new.pak"]);
    }

    #[tokio::test]
    async fn test_crawl_root_failure_is_error() {
        let listing = FixtureListing {
            dirs: HashMap::new(),
        };
        let handler = RecordingHandler::default();

        let result = Crawler::new(&listing)
            .crawl(&collection(), &root(), &handler)
            .await;

        assert!(matches!(result, Err(CrawlError::Io { .. })));
    }

    #[tokio::test]
    async fn test_crawl_subdirectory_failure_is_skipped() {
        let mut listing = tree();
        listing
            .dirs
            .remove("http://cdn.example.com/big/v1/data/");
        let handler = RecordingHandler::default();

        let discovered = Crawler::new(&listing)
            .crawl(&collection(), &root(), &handler)
            .await
            .unwrap();

        assert_eq!(discovered, 1);
        assert_eq!(handler.sorted(), vec!["new.pak"]);
    }

    #[tokio::test]
    async fn test_crawl_local_tree() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("a/b/c/d")).unwrap();
        std::fs::write(dir.path().join("a/b/c/d/leaf.pak"), b"x").unwrap();
        std::fs::write(dir.path().join("top.pak"), b"x").unwrap();
        let mut collection = Collection::new(
            CollectionKey::new("v1", CacheMode::Offline),
            dir.path(),
            root(),
            false,
        );
        collection.track("top.pak", "00");
        let handler = RecordingHandler::default();

        let discovered = Crawler::new(&LocalListing)
            .crawl(
                &collection,
                &Origin::Local(dir.path().to_path_buf()),
                &handler,
            )
            .await
            .unwrap();

        assert_eq!(discovered, 1);
        assert_eq!(handler.sorted(), vec!["a/b/c/d/leaf.pak"]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_crawl_local_tree_does_not_follow_directory_symlink_cycles() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("data")).unwrap();
        std::fs::write(dir.path().join("data/a.pak"), b"x").unwrap();
        std::os::unix::fs::symlink(dir.path(), dir.path().join("data/up")).unwrap();
        std::os::unix::fs::symlink(dir.path().join("data"), dir.path().join("loop")).unwrap();
        let collection = Collection::new(
            CollectionKey::new("v1", CacheMode::Offline),
            dir.path(),
            root(),
            false,
        );
        let handler = RecordingHandler::default();

        let discovered = Crawler::new(&LocalListing)
            .crawl(
                &collection,
                &Origin::Local(dir.path().to_path_buf()),
                &handler,
            )
            .await
            .unwrap();

        assert_eq!(discovered, 1);
        assert_eq!(handler.sorted(), vec!["data/a.pak"]);
    }
}

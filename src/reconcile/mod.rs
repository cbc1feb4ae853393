//! Dispatching verify / sync / purge per collection class.
//!
//! Each collection falls into one or both classes:
//!
//! | Class | Condition | verify | sync | purge |
//! |---|---|---|---|---|
//! | Registered | has known records | hash-check each record | fetch each record | delete each record, then empty ancestors |
//! | Crawl-eligible | not curated | crawl local root, register new files | crawl remote root, fetch and register new files | delete the whole root, reset tally and manifest section |
//!
//! Purge uses exactly one of the two algorithms, chosen by the curation flag.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::{join, join_all};
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

use crate::collection::{Collection, FileRecord, Origin};
use crate::crawl::{AutoindexListing, Crawler, DirectoryListing, DiscoveryHandler, LocalListing};
use crate::download::{FetchEngine, Verdict, push_progress};
use crate::progress::{ProgressError, ProgressReporter};
use crate::state::{RunState, TallyBucket};
use crate::verify::hash_file;

mod purge;

/// Requested operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Hash-check local files, registering untracked ones.
    Verify,
    /// Download missing or altered files, discovering untracked ones remotely.
    Sync,
    /// Delete local files.
    Purge,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Verify => "verify",
            Self::Sync => "sync",
            Self::Purge => "purge",
        })
    }
}

/// Errors that abort an operation.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// A non-curated collection root could not be deleted.
    #[error("failed to delete collection root {path}: {source}")]
    Purge {
        /// The root that could not be removed.
        path: std::path::PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The final progress push or channel shutdown failed.
    #[error(transparent)]
    Progress(#[from] ProgressError),
}

/// Runs one operation over a set of collections.
///
/// Owns the run's shared state for its duration and hands it to every file
/// task by reference.
pub struct Reconciler {
    engine: FetchEngine,
    state: Arc<RunState>,
    reporter: Arc<ProgressReporter>,
    http_crawl_depth: usize,
}

impl Reconciler {
    /// Creates a reconciler.
    #[must_use]
    pub fn new(
        engine: FetchEngine,
        state: Arc<RunState>,
        reporter: Arc<ProgressReporter>,
        http_crawl_depth: usize,
    ) -> Self {
        Self {
            engine,
            state,
            reporter,
            http_crawl_depth,
        }
    }

    /// Shared run state.
    #[must_use]
    pub fn state(&self) -> &Arc<RunState> {
        &self.state
    }

    /// Runs `operation` over `collections`.
    ///
    /// Per-file failures only affect tallies. Callers must follow up with
    /// [`finish`](Self::finish) whether or not this returns an error.
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError::Purge`] if a non-curated root could not be
    /// removed. The remaining collections are still purged first.
    #[instrument(skip(self, collections), fields(collections = collections.len()))]
    pub async fn run(
        &self,
        operation: Operation,
        collections: &[Collection],
    ) -> Result<(), ReconcileError> {
        info!(%operation, "starting operation");
        match operation {
            Operation::Verify => {
                self.verify(collections).await;
                Ok(())
            }
            Operation::Sync => {
                self.sync(collections).await;
                Ok(())
            }
            Operation::Purge => self.purge(collections).await,
        }
    }

    /// Pushes the final snapshot and closes the progress channel.
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError::Progress`] if the push or shutdown fails.
    pub async fn finish(&self) -> Result<(), ReconcileError> {
        let pushed = self.reporter.push(&self.state).await;
        let closed = self.reporter.close().await;
        pushed?;
        closed?;
        debug!(pushes = self.reporter.push_count(), "final progress pushed");
        Ok(())
    }

    async fn verify(&self, collections: &[Collection]) {
        let records = registered_records(collections);
        let registered = self
            .engine
            .verify_batch(records, &self.state, &self.reporter);

        let handler = VerifyDiscovery {
            state: &self.state,
            reporter: &self.reporter,
        };
        let crawls = join_all(
            collections
                .iter()
                .filter(|c| c.is_crawl_eligible())
                .map(|c| {
                    let root = Origin::Local(c.local_root().to_path_buf());
                    crawl_logged(Crawler::new(&LocalListing), c, root, &handler)
                }),
        );

        join(registered, crawls).await;
    }

    async fn sync(&self, collections: &[Collection]) {
        let records = registered_records(collections);
        let registered = self
            .engine
            .fetch_batch(records, &self.state, &self.reporter);

        let autoindex = AutoindexListing::new(self.engine.client().clone())
            .with_limiter(self.engine.connection_limiter());
        let handler = SyncDiscovery {
            engine: &self.engine,
            state: &self.state,
            reporter: &self.reporter,
        };
        let crawls = join_all(
            collections
                .iter()
                .filter(|c| c.is_crawl_eligible())
                .map(|c| {
                    let root = c.remote_root().clone();
                    let crawler = match root {
                        Origin::Http(_) => Crawler::new(&autoindex as &dyn DirectoryListing)
                            .with_max_depth(self.http_crawl_depth),
                        Origin::Local(_) => Crawler::new(&LocalListing),
                    };
                    crawl_logged(crawler, c, root, &handler)
                }),
        );

        join(registered, crawls).await;
    }

    async fn purge(&self, collections: &[Collection]) -> Result<(), ReconcileError> {
        let mut first_error = None;

        for collection in collections {
            if collection.is_curated() {
                purge::purge_records(collection).await;
                continue;
            }
            let root = collection.local_root();
            match purge::purge_root(root).await {
                Ok(()) => {
                    self.state.unregister_collection(collection.key());
                    info!(collection = %collection.key(), root = %root.display(), "collection root deleted");
                }
                Err(source) => {
                    error!(collection = %collection.key(), root = %root.display(), error = %source, "cannot delete collection root");
                    first_error.get_or_insert(ReconcileError::Purge {
                        path: root.to_path_buf(),
                        source,
                    });
                }
            }
        }

        push_progress(&self.reporter, &self.state).await;
        first_error.map_or(Ok(()), Err)
    }
}

fn registered_records(collections: &[Collection]) -> Vec<FileRecord> {
    collections
        .iter()
        .filter(|c| c.is_registered())
        .flat_map(|c| c.records().iter().cloned())
        .collect()
}

async fn crawl_logged(
    crawler: Crawler<'_>,
    collection: &Collection,
    root: Origin,
    handler: &dyn DiscoveryHandler,
) {
    if let Err(e) = crawler.crawl(collection, &root, handler).await {
        warn!(collection = %collection.key(), root = %root, error = %e, "crawl failed");
    }
}

/// Hashes each discovered local file and registers it as intact.
struct VerifyDiscovery<'a> {
    state: &'a RunState,
    reporter: &'a ProgressReporter,
}

#[async_trait]
impl DiscoveryHandler for VerifyDiscovery<'_> {
    async fn on_file(&self, record: FileRecord) {
        let hash = hash_file(record.local_path()).await;
        match hash.digest {
            Some(digest) => self.state.register(&record, hash.bytes, &digest),
            None => {
                warn!(path = %record.local_path().display(), "discovered file unreadable");
                self.state.tally(&record, TallyBucket::Altered, hash.bytes);
            }
        }
        push_progress(self.reporter, self.state).await;
    }
}

/// Fetches each discovered remote file and registers it once written.
struct SyncDiscovery<'a> {
    engine: &'a FetchEngine,
    state: &'a RunState,
    reporter: &'a ProgressReporter,
}

#[async_trait]
impl DiscoveryHandler for SyncDiscovery<'_> {
    async fn on_file(&self, record: FileRecord) {
        let outcome = self.engine.fetch(&record).await;
        match (outcome.verdict, outcome.digest) {
            (Verdict::Intact, Some(digest)) => {
                self.state.register(&record, outcome.bytes, &digest);
            }
            _ => self.state.tally(&record, TallyBucket::Altered, outcome.bytes),
        }
        push_progress(self.reporter, self.state).await;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::collection::{CacheMode, CollectionKey};
    use crate::download::{HttpClient, RetryPolicy};
    use crate::manifest::Manifest;
    use crate::state::Tally;
    use sha2::{Digest, Sha256};
    use std::path::Path;
    use std::time::Duration;
    use tempfile::TempDir;

    fn digest(bytes: &[u8]) -> String {
        hex::encode(Sha256::digest(bytes))
    }

    fn reconciler(state: RunState) -> (Reconciler, Arc<ProgressReporter>) {
        let engine = FetchEngine::new(
            HttpClient::new().unwrap(),
            5,
            RetryPolicy::new(2, Duration::from_millis(1)),
            50,
        )
        .unwrap();
        let reporter = Arc::new(ProgressReporter::sink());
        let reconciler = Reconciler::new(engine, Arc::new(state), Arc::clone(&reporter), 3);
        (reconciler, reporter)
    }

    fn collection(local: &Path, origin: &Path, curated: bool) -> Collection {
        Collection::new(
            CollectionKey::new("v1", CacheMode::Offline),
            local,
            Origin::Local(origin.to_path_buf()),
            curated,
        )
    }

    #[test]
    fn test_operation_display() {
        assert_eq!(Operation::Verify.to_string(), "verify");
        assert_eq!(Operation::Purge.to_string(), "purge");
    }

    #[tokio::test]
    async fn test_sync_local_origin_fetches_known_and_discovers_new() {
        let origin = TempDir::new().unwrap();
        let local = TempDir::new().unwrap();
        std::fs::create_dir_all(origin.path().join("sub")).unwrap();
        std::fs::write(origin.path().join("known.pak"), b"known").unwrap();
        std::fs::write(origin.path().join("sub/new.pak"), b"brand new").unwrap();

        let mut c = collection(local.path(), origin.path(), false);
        c.track("known.pak", &digest(b"known"));
        let state = RunState::new(Manifest::new(), std::slice::from_ref(&c));
        let (reconciler, reporter) = reconciler(state);

        reconciler.run(Operation::Sync, &[c.clone()]).await.unwrap();

        let tally = reconciler.state().tallies().get(c.key()).unwrap();
        assert_eq!(tally.intact, 5 + 9);
        assert_eq!(tally.altered, 0);
        assert_eq!(tally.total, 9);
        assert_eq!(std::fs::read(local.path().join("sub/new.pak")).unwrap(), b"brand new");
        let manifest = reconciler.state().manifest_snapshot();
        let digest_new = digest(b"brand new");
        assert_eq!(
            manifest.entry("v1").unwrap().offline.get("sub/new.pak"),
            Some(digest_new.as_str())
        );
        assert_eq!(reporter.push_count(), 2);
    }

    #[tokio::test]
    async fn test_curated_collection_is_never_crawled() {
        let origin = TempDir::new().unwrap();
        let local = TempDir::new().unwrap();
        std::fs::write(local.path().join("stray.pak"), b"stray").unwrap();

        let c = collection(local.path(), origin.path(), true);
        let state = RunState::new(Manifest::new(), std::slice::from_ref(&c));
        let (reconciler, reporter) = reconciler(state);

        reconciler.run(Operation::Verify, &[c.clone()]).await.unwrap();

        assert_eq!(
            reconciler.state().tallies().get(c.key()),
            Some(Tally::default())
        );
        assert!(!reconciler.state().is_manifest_dirty());
        assert_eq!(reporter.push_count(), 0);
    }

    #[tokio::test]
    async fn test_finish_pushes_once_and_closes() {
        let state = RunState::new(Manifest::new(), &[]);
        let (reconciler, reporter) = reconciler(state);

        reconciler.finish().await.unwrap();

        assert_eq!(reporter.push_count(), 1);
        assert!(matches!(
            reconciler.finish().await,
            Err(ReconcileError::Progress(ProgressError::Closed))
        ));
    }
}

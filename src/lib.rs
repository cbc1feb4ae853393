//! Cache Synchronization Core Library
//!
//! This library verifies, downloads and deletes the local copies of game
//! client cache collections against a manifest of expected content digests,
//! streaming progress to a parent launcher process over a loopback socket.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`collection`] - Cache modes, collection keys, file records and origins
//! - [`manifest`] - Persisted path/digest manifest, version list and collection building
//! - [`state`] - Per-collection tallies and manifest registration shared by all tasks
//! - [`verify`] - Streaming SHA-256 file verification
//! - [`download`] - Fetch engine with bounded concurrency and linear backoff
//! - [`crawl`] - Discovery of untracked files under local or autoindex roots
//! - [`progress`] - Newline-delimited JSON snapshots pushed to the parent
//! - [`reconcile`] - Verify / sync / purge dispatch per collection class
//! - [`config`] - Resolved tuning values for a run

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod collection;
pub mod config;
pub mod crawl;
pub mod download;
pub mod manifest;
pub mod progress;
pub mod reconcile;
pub mod state;
pub mod verify;

mod user_agent;

// Re-export commonly used types
pub use collection::{CacheMode, Collection, CollectionKey, FileRecord, Origin};
pub use config::{ConfigError, SyncConfig};
pub use crawl::{
    AutoindexListing, CrawlError, Crawler, DirectoryListing, DiscoveryHandler, EntryKind,
    ListingEntry, LocalListing, parse_autoindex,
};
pub use download::{
    BatchStats, DEFAULT_MAX_CONNECTIONS, DEFAULT_MAX_RETRIES, DEFAULT_UPDATE_FREQ, DownloadError,
    EngineError, FetchEngine, FetchOutcome, HttpClient, RetryPolicy, Verdict,
};
pub use manifest::{
    DigestMap, Manifest, ManifestError, ModeSelection, Selection, VersionEntry, VersionList,
    VersionSelection, build_collections,
};
pub use progress::{ProgressError, ProgressReporter};
pub use reconcile::{Operation, ReconcileError, Reconciler};
pub use state::{RunState, Tally, TallyBucket, TallyStore};
pub use verify::{FileHash, HashCheck, check_file_hash, hash_file};

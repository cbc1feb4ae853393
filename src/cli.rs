//! CLI argument definitions using clap derive macros.

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};

use cachesync_core::{
    CacheMode, ConfigError, DEFAULT_MAX_CONNECTIONS, DEFAULT_MAX_RETRIES, ModeSelection,
    Operation, SyncConfig, VersionSelection,
};

/// Default origin root.
pub const DEFAULT_CDN_ROOT: &str = "http://cdn.dexlabs.systems/ff/big";

/// Verify, download or delete game client cache collections.
///
/// Progress is streamed as JSON lines to a loopback listener owned by the
/// launcher.
#[derive(Parser, Debug)]
#[command(name = "cachesync")]
#[command(author, version, about)]
pub struct Args {
    /// Operation to run
    #[arg(long, alias = "mode", value_enum)]
    pub operation: OperationArg,

    /// Local root holding playable caches
    #[arg(long)]
    pub playable_root: Option<PathBuf>,

    /// Local root holding offline caches
    #[arg(long)]
    pub offline_root: Option<PathBuf>,

    /// Directory holding hashes.json, versions.json and .lastver
    #[arg(long)]
    pub user_dir: PathBuf,

    /// Origin root URL or local mirror path
    #[arg(long, default_value = DEFAULT_CDN_ROOT)]
    pub cdn_root: String,

    /// Delivery modes to process
    #[arg(long, value_enum, default_value_t = CacheModeArg::All)]
    pub cache_mode: CacheModeArg,

    /// Version to process, or `all`
    #[arg(long, default_value = "all")]
    pub cache_version: String,

    /// Loopback port of the launcher's progress listener
    #[arg(long)]
    pub port: u16,

    /// Versions whose manifest entries are authoritative
    #[arg(long, num_args = 0.., value_name = "VERSION")]
    pub official_caches: Vec<String>,

    /// Maximum simultaneous origin connections (1-100)
    #[arg(long, default_value_t = DEFAULT_MAX_CONNECTIONS as u8, value_parser = clap::value_parser!(u8).range(1..=100))]
    pub max_connections: u8,

    /// Download attempts per file (1-20)
    #[arg(long, default_value_t = DEFAULT_MAX_RETRIES as u8, value_parser = clap::value_parser!(u8).range(1..=20))]
    pub max_retries: u8,

    /// Hash checks between progress updates (1-10000)
    #[arg(long, default_value_t = 50, value_parser = clap::value_parser!(u16).range(1..=10000))]
    pub update_freq: u16,

    /// Backoff time unit in milliseconds
    #[arg(long, default_value_t = 1000)]
    pub backoff_ms: u64,

    /// Maximum directory depth followed when crawling HTTP origins
    #[arg(long, default_value_t = 3)]
    pub crawl_depth: usize,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,
}

/// `--operation` values, accepting the launcher's historical names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OperationArg {
    #[value(alias = "hash-check")]
    Verify,
    #[value(alias = "download")]
    Sync,
    #[value(alias = "delete")]
    Purge,
}

impl From<OperationArg> for Operation {
    fn from(arg: OperationArg) -> Self {
        match arg {
            OperationArg::Verify => Self::Verify,
            OperationArg::Sync => Self::Sync,
            OperationArg::Purge => Self::Purge,
        }
    }
}

/// `--cache-mode` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CacheModeArg {
    All,
    Playable,
    Offline,
}

impl From<CacheModeArg> for ModeSelection {
    fn from(arg: CacheModeArg) -> Self {
        match arg {
            CacheModeArg::All => Self::All,
            CacheModeArg::Playable => Self::Only(CacheMode::Playable),
            CacheModeArg::Offline => Self::Only(CacheMode::Offline),
        }
    }
}

impl Args {
    /// Version filter.
    pub fn version_selection(&self) -> VersionSelection {
        if self.cache_version == "all" {
            VersionSelection::All
        } else {
            VersionSelection::Only(self.cache_version.clone())
        }
    }

    /// Curated version names.
    pub fn curated(&self) -> HashSet<String> {
        self.official_caches.iter().cloned().collect()
    }

    /// Tuning values.
    pub fn sync_config(&self) -> Result<SyncConfig, ConfigError> {
        Ok(SyncConfig::default()
            .with_max_connections(usize::from(self.max_connections))?
            .with_max_retries(u32::from(self.max_retries))?
            .with_update_freq(usize::from(self.update_freq))?
            .with_backoff_unit(Duration::from_millis(self.backoff_ms))
            .with_http_crawl_depth(self.crawl_depth))
    }
}

//! CLI entry point for the cache synchronization helper.

use std::sync::Arc;

use anyhow::{Context, Result};
use cachesync_core::manifest::{MANIFEST_FILE, VERSION_LIST_FILE};
use cachesync_core::{
    FetchEngine, HttpClient, Manifest, Operation, Origin, ProgressReporter, Reconciler, RunState,
    Selection, VersionList, build_collections,
};
use clap::Parser;
use tracing::{debug, info};

mod cli;

use cli::Args;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    debug!(?args, "CLI arguments parsed");

    let config = args.sync_config()?;
    let operation = Operation::from(args.operation);
    let curated = args.curated();

    // Configuration errors abort before the launcher is contacted
    let manifest_path = args.user_dir.join(MANIFEST_FILE);
    let mut manifest = Manifest::load(&manifest_path)?;
    let versions = VersionList::load(&args.user_dir.join(VERSION_LIST_FILE))?;
    if manifest.merge_versions(&versions) {
        debug!("manifest extended from version list");
    }

    let origin = Origin::parse(&args.cdn_root)
        .with_context(|| format!("invalid origin root '{}'", args.cdn_root))?;
    let selection = Selection {
        modes: args.cache_mode.into(),
        versions: args.version_selection(),
        playable_root: args.playable_root.clone(),
        offline_root: args.offline_root.clone(),
        user_dir: args.user_dir.clone(),
        origin,
        curated: curated.clone(),
    };
    let collections = build_collections(&manifest, &selection)?;

    let client = HttpClient::with_timeouts(config.connect_timeout_secs(), config.read_timeout_secs())?;
    let engine = FetchEngine::new(
        client,
        config.max_connections(),
        config.retry_policy(),
        config.update_freq(),
    )?;

    let reporter = Arc::new(ProgressReporter::connect(args.port).await?);

    info!(
        %operation,
        collections = collections.len(),
        curated = curated.len(),
        "cachesync starting"
    );

    let state = Arc::new(RunState::new(manifest, &collections));
    let reconciler = Reconciler::new(
        engine,
        Arc::clone(&state),
        reporter,
        config.http_crawl_depth(),
    );

    let outcome = reconciler.run(operation, &collections).await;
    let finished = reconciler.finish().await;

    if state.is_manifest_dirty() {
        state
            .manifest_snapshot()
            .save(&manifest_path, &curated)?;
        info!(path = %manifest_path.display(), "manifest saved");
    }

    outcome?;
    finished?;

    info!(%operation, "cachesync finished");
    Ok(())
}

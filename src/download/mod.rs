//! Fetching cache files from their origin with bounded retries.
//!
//! This module streams files from HTTP origins (or copies them from local
//! mirrors), verifies them against their expected digest and runs whole
//! batches concurrently under a connection limit.
//!
//! # Features
//!
//! - Streaming downloads (memory-efficient for large files)
//! - Linear backoff between attempts, no backoff after the last one
//! - Configurable timeouts (30s connect, 5min read by default)
//! - Structured error types with full context
//!
//! # Example
//!
//! ```no_run
//! use cachesync_core::collection::Origin;
//! use cachesync_core::download::HttpClient;
//! use std::path::Path;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = HttpClient::new()?;
//! let source = Origin::parse("http://cdn.example.com/ff/big/beta-20100104/main.unity3d")?;
//! let bytes = client
//!     .fetch_to_file(&source, Path::new("./cache/main.unity3d"))
//!     .await?;
//! println!("Fetched {bytes} bytes");
//! # Ok(())
//! # }
//! ```

mod client;
mod constants;
mod engine;
mod error;
mod retry;

pub use client::HttpClient;
pub use constants::{CONNECT_TIMEOUT_SECS, READ_TIMEOUT_SECS};
pub use engine::{
    AttemptOutcome, BatchStats, DEFAULT_MAX_CONNECTIONS, DEFAULT_UPDATE_FREQ, EngineError,
    FetchEngine, FetchOutcome, Verdict,
};
pub(crate) use engine::push_progress;
pub use error::DownloadError;
pub use retry::{
    DEFAULT_BACKOFF_UNIT, DEFAULT_MAX_RETRIES, FailureType, RetryDecision, RetryPolicy,
    classify_error,
};

//! Fetch engine for concurrent cache downloads and verifications.
//!
//! This module provides the [`FetchEngine`] which fetches single files with
//! bounded retries and runs whole batches of fetches or hash checks,
//! updating the shared [`RunState`] and pushing progress as files complete.
//!
//! # Per-file algorithm
//!
//! 1. If the record has an expected digest and the file on disk matches it,
//!    the file is intact and no request is made.
//! 2. Otherwise up to `max_attempts` attempts are made. Each attempt streams
//!    the origin into the destination, then re-hashes it. Failed attempts
//!    sleep `1, 2, ...` backoff units before the next one.
//! 3. Only the final verdict is tallied.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use cachesync_core::download::{FetchEngine, HttpClient, RetryPolicy};
//! use cachesync_core::{Manifest, ProgressReporter, RunState};
//!
//! # async fn example(records: Vec<cachesync_core::FileRecord>) -> Result<(), Box<dyn std::error::Error>> {
//! let engine = FetchEngine::new(HttpClient::new()?, 5, RetryPolicy::default(), 50)?;
//! let state = Arc::new(RunState::new(Manifest::new(), &[]));
//! let reporter = Arc::new(ProgressReporter::sink());
//! let stats = engine.fetch_batch(records, &state, &reporter).await;
//! println!("intact: {}, altered: {}", stats.intact(), stats.altered());
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use rand::seq::SliceRandom;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, instrument, warn};

use super::retry::{FailureType, RetryDecision, RetryPolicy, classify_error};
use super::{DownloadError, HttpClient};
use crate::collection::FileRecord;
use crate::progress::ProgressReporter;
use crate::state::{RunState, TallyBucket};
use crate::verify::{HashCheck, check_file_hash};

/// Minimum allowed connection limit.
const MIN_CONNECTIONS: usize = 1;

/// Maximum allowed connection limit.
const MAX_CONNECTIONS: usize = 100;

/// Default number of simultaneous origin connections.
pub const DEFAULT_MAX_CONNECTIONS: usize = 5;

/// Default number of hash-check completions between progress pushes.
pub const DEFAULT_UPDATE_FREQ: usize = 50;

/// Error type for fetch engine construction.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Invalid connection limit provided.
    #[error(
        "invalid connection limit {value}: must be between {MIN_CONNECTIONS} and {MAX_CONNECTIONS}"
    )]
    InvalidConcurrency {
        /// The invalid value that was provided.
        value: usize,
    },

    /// Invalid progress batch size provided.
    #[error("invalid update frequency {value}: must be at least 1")]
    InvalidUpdateFreq {
        /// The invalid value that was provided.
        value: usize,
    },
}

/// Final classification of one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Content matches (or was freshly fetched when no digest is known).
    Intact,
    /// Content mismatched or every attempt failed.
    Altered,
}

impl Verdict {
    /// Tally bucket for this verdict.
    #[must_use]
    pub fn bucket(self) -> TallyBucket {
        match self {
            Self::Intact => TallyBucket::Intact,
            Self::Altered => TallyBucket::Altered,
        }
    }
}

/// Result of a single fetch attempt.
#[derive(Debug)]
pub enum AttemptOutcome {
    /// The origin was written to the destination.
    Written(u64),
    /// Failed, a retry may help.
    Retryable(DownloadError),
    /// Failed, retrying would not help.
    Fatal(DownloadError),
}

impl From<Result<u64, DownloadError>> for AttemptOutcome {
    fn from(result: Result<u64, DownloadError>) -> Self {
        match result {
            Ok(bytes) => Self::Written(bytes),
            Err(e) => match classify_error(&e) {
                FailureType::Transient => Self::Retryable(e),
                FailureType::Permanent => Self::Fatal(e),
            },
        }
    }
}

/// Per-file summary returned by [`FetchEngine::fetch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchOutcome {
    /// Final classification.
    pub verdict: Verdict,
    /// Bytes read by the last verification.
    pub bytes: u64,
    /// Digest computed by the last verification, if the read completed.
    pub digest: Option<String>,
    /// Origin attempts made; 0 when the file was already intact.
    pub attempts: u32,
    /// Backoff delays slept between attempts, in order.
    pub backoffs: Vec<Duration>,
}

impl FetchOutcome {
    fn from_check(check: HashCheck, verdict: Verdict, attempts: u32, backoffs: Vec<Duration>) -> Self {
        Self {
            verdict,
            bytes: check.bytes,
            digest: check.digest,
            attempts,
            backoffs,
        }
    }
}

/// Counts of verdicts from one batch.
#[derive(Debug, Default)]
pub struct BatchStats {
    intact: AtomicUsize,
    altered: AtomicUsize,
}

impl BatchStats {
    /// Creates a new stats tracker with zero counts.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Files classified intact.
    #[must_use]
    pub fn intact(&self) -> usize {
        self.intact.load(Ordering::SeqCst)
    }

    /// Files classified altered.
    #[must_use]
    pub fn altered(&self) -> usize {
        self.altered.load(Ordering::SeqCst)
    }

    /// Files processed.
    #[must_use]
    pub fn total(&self) -> usize {
        self.intact() + self.altered()
    }

    /// Records one verdict.
    pub fn record(&self, verdict: Verdict) {
        match verdict {
            Verdict::Intact => self.intact.fetch_add(1, Ordering::SeqCst),
            Verdict::Altered => self.altered.fetch_add(1, Ordering::SeqCst),
        };
    }
}

/// Fetch engine for concurrent downloads with retry support.
///
/// # Concurrency Model
///
/// - Each file runs in its own Tokio task; batch order is shuffled first
/// - A semaphore permit is held for the duration of each origin attempt,
///   bounding simultaneous connections; backoff sleeps and hash checks run
///   without a permit
/// - One file's failure never cancels its siblings
#[derive(Debug, Clone)]
pub struct FetchEngine {
    client: HttpClient,
    semaphore: Arc<Semaphore>,
    max_connections: usize,
    retry_policy: RetryPolicy,
    update_freq: usize,
}

impl FetchEngine {
    /// Creates an engine.
    ///
    /// # Arguments
    ///
    /// * `client` - Shared HTTP client
    /// * `max_connections` - Maximum simultaneous origin attempts (1-100)
    /// * `retry_policy` - Attempts and backoff per file
    /// * `update_freq` - Hash-check completions between progress pushes (>= 1)
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] if a limit is out of range.
    #[instrument(level = "debug", skip(client, retry_policy))]
    pub fn new(
        client: HttpClient,
        max_connections: usize,
        retry_policy: RetryPolicy,
        update_freq: usize,
    ) -> Result<Self, EngineError> {
        if !(MIN_CONNECTIONS..=MAX_CONNECTIONS).contains(&max_connections) {
            return Err(EngineError::InvalidConcurrency {
                value: max_connections,
            });
        }
        if update_freq == 0 {
            return Err(EngineError::InvalidUpdateFreq { value: update_freq });
        }

        debug!(
            max_connections,
            max_attempts = retry_policy.max_attempts(),
            backoff_ms = retry_policy.backoff_unit().as_millis(),
            update_freq,
            "creating fetch engine"
        );

        Ok(Self {
            client,
            semaphore: Arc::new(Semaphore::new(max_connections)),
            max_connections,
            retry_policy,
            update_freq,
        })
    }

    /// Returns the configured connection limit.
    #[must_use]
    pub fn max_connections(&self) -> usize {
        self.max_connections
    }

    /// Returns the configured retry policy.
    #[must_use]
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    /// Returns the shared HTTP client.
    #[must_use]
    pub fn client(&self) -> &HttpClient {
        &self.client
    }

    /// Semaphore capping simultaneous origin connections.
    ///
    /// Shared with directory listing so page requests count against the
    /// same limit as file attempts.
    #[must_use]
    pub fn connection_limiter(&self) -> Arc<Semaphore> {
        Arc::clone(&self.semaphore)
    }

    /// Fetches one file, retrying until it verifies or attempts run out.
    ///
    /// Does not touch the tallies; callers decide how the outcome is counted.
    ///
    /// A failed attempt leaves whatever it wrote in place. The next attempt
    /// truncates the destination when it opens it, but if that attempt fails
    /// before opening, the following hash check sees the earlier partial
    /// content.
    #[instrument(skip(self, record), fields(collection = %record.key(), path = record.rel_path()))]
    pub async fn fetch(&self, record: &FileRecord) -> FetchOutcome {
        if record.has_expected_digest() {
            let check = check_file_hash(record.local_path(), record.expected_digest()).await;
            if check.matched {
                debug!(bytes = check.bytes, "already intact, skipping download");
                return FetchOutcome::from_check(check, Verdict::Intact, 0, Vec::new());
            }
        }

        let mut backoffs = Vec::new();
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            debug!(attempt, "attempting fetch");

            let outcome = self.attempt(record).await;
            let check = check_file_hash(record.local_path(), record.expected_digest()).await;

            // With no expected digest only a completed write is trusted.
            let written = matches!(outcome, AttemptOutcome::Written(_));
            if check.matched && (written || record.has_expected_digest()) {
                debug!(attempt, bytes = check.bytes, "fetch verified");
                return FetchOutcome::from_check(check, Verdict::Intact, attempt, backoffs);
            }

            let (failure_type, error) = match outcome {
                AttemptOutcome::Written(bytes) => {
                    debug!(attempt, bytes, "digest mismatch after download");
                    if attempt >= self.retry_policy.max_attempts() {
                        return give_up(record, check, attempt, backoffs);
                    }
                    continue;
                }
                AttemptOutcome::Retryable(e) => (FailureType::Transient, e),
                AttemptOutcome::Fatal(e) => (FailureType::Permanent, e),
            };

            match self.retry_policy.should_retry(failure_type, attempt) {
                RetryDecision::Retry { delay, attempt: next_attempt } => {
                    info!(
                        source = %record.source(),
                        attempt = next_attempt,
                        max_attempts = self.retry_policy.max_attempts(),
                        delay_ms = delay.as_millis(),
                        error = %error,
                        "retrying fetch"
                    );
                    backoffs.push(delay);
                    tokio::time::sleep(delay).await;
                }
                RetryDecision::DoNotRetry { reason } => {
                    debug!(%reason, error = %error, "not retrying fetch");
                    return give_up(record, check, attempt, backoffs);
                }
            }
        }
    }

    async fn attempt(&self, record: &FileRecord) -> AttemptOutcome {
        let Ok(_permit) = self.semaphore.acquire().await else {
            return AttemptOutcome::Fatal(DownloadError::LimiterClosed);
        };
        self.client
            .fetch_to_file(record.source(), record.local_path())
            .await
            .into()
    }

    /// Fetches every record concurrently, tallying each verdict and pushing
    /// progress after every completion.
    #[instrument(skip_all, fields(files = records.len()))]
    pub async fn fetch_batch(
        &self,
        mut records: Vec<FileRecord>,
        state: &Arc<RunState>,
        reporter: &Arc<ProgressReporter>,
    ) -> BatchStats {
        records.shuffle(&mut rand::thread_rng());
        let stats = BatchStats::new();
        let mut tasks = JoinSet::new();

        info!("starting fetch batch");

        for record in records {
            let engine = self.clone();
            let state = Arc::clone(state);
            let reporter = Arc::clone(reporter);
            tasks.spawn(async move {
                let outcome = engine.fetch(&record).await;
                state.tally(&record, outcome.verdict.bucket(), outcome.bytes);
                push_progress(&reporter, &state).await;
                outcome.verdict
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(verdict) => stats.record(verdict),
                // A panicked task is logged but does not fail the batch
                Err(e) => warn!(error = %e, "fetch task panicked"),
            }
        }

        info!(
            intact = stats.intact(),
            altered = stats.altered(),
            "fetch batch complete"
        );
        stats
    }

    /// Hash-checks every record concurrently without touching the network,
    /// pushing progress every `update_freq` completions and once more for
    /// any remainder.
    #[instrument(skip_all, fields(files = records.len()))]
    pub async fn verify_batch(
        &self,
        mut records: Vec<FileRecord>,
        state: &Arc<RunState>,
        reporter: &Arc<ProgressReporter>,
    ) -> BatchStats {
        records.shuffle(&mut rand::thread_rng());
        let stats = BatchStats::new();
        let mut tasks = JoinSet::new();

        for record in records {
            let state = Arc::clone(state);
            tasks.spawn(async move {
                let check = check_file_hash(record.local_path(), record.expected_digest()).await;
                let verdict = if check.matched {
                    Verdict::Intact
                } else {
                    Verdict::Altered
                };
                state.tally(&record, verdict.bucket(), check.bytes);
                verdict
            });
        }

        let mut since_push = 0usize;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(verdict) => stats.record(verdict),
                Err(e) => warn!(error = %e, "verify task panicked"),
            }
            since_push += 1;
            if since_push == self.update_freq {
                push_progress(reporter, state).await;
                since_push = 0;
            }
        }
        if since_push > 0 {
            push_progress(reporter, state).await;
        }

        info!(
            intact = stats.intact(),
            altered = stats.altered(),
            "verify batch complete"
        );
        stats
    }
}

fn give_up(
    record: &FileRecord,
    check: HashCheck,
    attempts: u32,
    backoffs: Vec<Duration>,
) -> FetchOutcome {
    warn!(
        source = %record.source(),
        attempts,
        bytes = check.bytes,
        "fetch failed after all attempts"
    );
    FetchOutcome::from_check(check, Verdict::Altered, attempts, backoffs)
}

/// Pushes progress from inside a file task. A broken channel is logged and
/// otherwise ignored so it cannot abort sibling tasks.
pub(crate) async fn push_progress(reporter: &ProgressReporter, state: &RunState) {
    if let Err(e) = reporter.push(state).await {
        warn!(error = %e, "progress push failed");
    }
}

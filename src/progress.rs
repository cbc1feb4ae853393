//! Progress reporting to the parent launcher process.
//!
//! Each push writes the full tally snapshot as one line of JSON over an
//! already-open loopback connection and flushes before returning. The
//! channel is write-only; the parent treats the latest line as authoritative.
//!
//! ```text
//! {"beta-20100104":{"playable":{"intact":1024,"altered":0,"total":4096}}}\n
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};

use thiserror::Error;
use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, instrument, trace};

use crate::state::RunState;

/// Errors raised by the progress channel.
#[derive(Debug, Error)]
pub enum ProgressError {
    /// The parent's listener could not be reached.
    #[error("cannot connect to progress listener on port {port}: {source}")]
    Connect {
        /// Loopback port.
        port: u16,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// Writing or flushing a snapshot failed.
    #[error("failed to write progress snapshot: {0}")]
    Write(#[from] std::io::Error),

    /// Snapshot serialization failed.
    #[error("failed to serialize progress snapshot: {0}")]
    Serialize(#[from] serde_json::Error),

    /// The channel was already closed.
    #[error("progress channel is closed")]
    Closed,
}

type SnapshotWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Pushes tally snapshots to the parent.
pub struct ProgressReporter {
    writer: Mutex<Option<BufWriter<SnapshotWriter>>>,
    pushes: AtomicUsize,
}

impl std::fmt::Debug for ProgressReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressReporter")
            .field("pushes", &self.push_count())
            .finish_non_exhaustive()
    }
}

impl ProgressReporter {
    /// Connects to the parent's listener at `localhost:<port>`.
    ///
    /// # Errors
    ///
    /// Returns [`ProgressError::Connect`] if the connection is refused.
    #[instrument]
    pub async fn connect(port: u16) -> Result<Self, ProgressError> {
        let stream = TcpStream::connect(("localhost", port))
            .await
            .map_err(|source| ProgressError::Connect { port, source })?;
        // Snapshots are small and latency matters more than batching.
        if let Err(e) = stream.set_nodelay(true) {
            debug!(error = %e, "could not disable Nagle on progress socket");
        }
        debug!(port, "connected to progress listener");
        Ok(Self::from_writer(stream))
    }

    /// Reports to an arbitrary writer.
    pub fn from_writer<W>(writer: W) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            writer: Mutex::new(Some(BufWriter::new(Box::new(writer)))),
            pushes: AtomicUsize::new(0),
        }
    }

    /// Reporter that discards snapshots but still counts pushes.
    #[must_use]
    pub fn sink() -> Self {
        Self::from_writer(tokio::io::sink())
    }

    /// Number of snapshots pushed so far.
    #[must_use]
    pub fn push_count(&self) -> usize {
        self.pushes.load(Ordering::SeqCst)
    }

    /// Serializes the current tallies and writes them as one line.
    ///
    /// The snapshot is taken while holding the channel so lines leave in
    /// the order their snapshots were taken.
    ///
    /// # Errors
    ///
    /// Returns [`ProgressError::Closed`] after [`close`](Self::close), or
    /// [`ProgressError::Write`] if the parent hung up.
    pub async fn push(&self, state: &RunState) -> Result<(), ProgressError> {
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(ProgressError::Closed)?;

        let mut message = serde_json::to_vec(&state.snapshot())?;
        message.push(b'\n');
        writer.write_all(&message).await?;
        writer.flush().await?;

        let count = self.pushes.fetch_add(1, Ordering::SeqCst) + 1;
        trace!(count, bytes = message.len(), "progress pushed");
        Ok(())
    }

    /// Flushes and shuts down the channel. Later pushes fail with
    /// [`ProgressError::Closed`]; closing twice is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`ProgressError::Write`] if the shutdown fails.
    pub async fn close(&self) -> Result<(), ProgressError> {
        let Some(mut writer) = self.writer.lock().await.take() else {
            return Ok(());
        };
        writer.flush().await?;
        writer.shutdown().await?;
        debug!(pushes = self.push_count(), "progress channel closed");
        Ok(())
    }
}

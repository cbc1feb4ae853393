//! HTTP client wrapper for fetching cache files and directory listings.
//!
//! This module provides the `HttpClient` struct which streams origin files
//! to disk (or copies them from a local origin) and fetches autoindex pages.

use std::io::ErrorKind;
use std::path::Path;
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::Client;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, instrument};
use url::Url;

use super::constants::{CONNECT_TIMEOUT_SECS, READ_TIMEOUT_SECS};
use super::error::DownloadError;
use crate::collection::Origin;
use crate::user_agent;

/// HTTP client for fetching files with streaming support.
///
/// Created once per run and shared by every fetch task, taking advantage of
/// connection pooling.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
}

impl HttpClient {
    /// Creates a client with default timeouts.
    ///
    /// Default configuration:
    /// - Connect timeout: 30 seconds
    /// - Read timeout: 5 minutes between body chunks
    /// - Gzip decompression: enabled
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::ClientBuild`] if the TLS backend or system
    /// configuration cannot be initialized.
    pub fn new() -> Result<Self, DownloadError> {
        Self::with_timeouts(CONNECT_TIMEOUT_SECS, READ_TIMEOUT_SECS)
    }

    /// Creates a client with explicit timeout values.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::ClientBuild`] if the client cannot be built.
    #[instrument(level = "debug")]
    pub fn with_timeouts(
        connect_timeout_secs: u64,
        read_timeout_secs: u64,
    ) -> Result<Self, DownloadError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(connect_timeout_secs))
            .read_timeout(Duration::from_secs(read_timeout_secs))
            .gzip(true)
            .user_agent(user_agent::default_user_agent())
            .build()
            .map_err(DownloadError::ClientBuild)?;
        Ok(Self { client })
    }

    /// Fetches `source` into `dest`, creating parent directories first.
    ///
    /// HTTP origins are streamed with a GET; local origins are copied. The
    /// destination is truncated when the attempt starts and is left as-is
    /// if the attempt fails part-way.
    ///
    /// # Returns
    ///
    /// The number of bytes written.
    ///
    /// # Errors
    ///
    /// Returns `DownloadError` if:
    /// - The request fails (network error, timeout) or returns a non-2xx status
    /// - A local origin file is missing
    /// - Creating or writing the destination fails
    #[instrument(skip(self), fields(source = %source, dest = %dest.display()))]
    pub async fn fetch_to_file(&self, source: &Origin, dest: &Path) -> Result<u64, DownloadError> {
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| DownloadError::io(parent, e))?;
        }

        match source {
            Origin::Http(url) => self.download(url, dest).await,
            Origin::Local(path) => copy_local(path, dest).await,
        }
    }

    /// Fetches a page as text (used for autoindex listings).
    ///
    /// # Errors
    ///
    /// Returns `DownloadError` on network failure or a non-2xx status.
    #[instrument(skip(self), fields(url = %url))]
    pub async fn get_text(&self, url: &Url) -> Result<String, DownloadError> {
        let response = self.send_get(url).await?;
        response
            .text()
            .await
            .map_err(|e| DownloadError::network(url.as_str(), e))
    }

    async fn download(&self, url: &Url, dest: &Path) -> Result<u64, DownloadError> {
        debug!("starting download");
        let response = self.send_get(url).await?;

        let mut file = File::create(dest)
            .await
            .map_err(|e| DownloadError::io(dest, e))?;
        let bytes = stream_to_file(&mut file, response, url.as_str(), dest).await?;

        debug!(bytes, "download complete");
        Ok(bytes)
    }

    async fn send_get(&self, url: &Url) -> Result<reqwest::Response, DownloadError> {
        let response = self.client.get(url.clone()).send().await.map_err(|e| {
            if e.is_timeout() {
                DownloadError::timeout(url.as_str())
            } else if e.is_builder() {
                DownloadError::invalid_url(url.as_str())
            } else {
                DownloadError::network(url.as_str(), e)
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::http_status(url.as_str(), status.as_u16()));
        }
        Ok(response)
    }
}

/// Streams response body to file, returning bytes written.
async fn stream_to_file(
    file: &mut File,
    response: reqwest::Response,
    url: &str,
    file_path: &Path,
) -> Result<u64, DownloadError> {
    let mut writer = BufWriter::new(file);
    let mut stream = response.bytes_stream();
    let mut bytes_written: u64 = 0;

    while let Some(chunk_result) = stream.next().await {
        let chunk = chunk_result.map_err(|e| {
            if e.is_timeout() {
                DownloadError::timeout(url)
            } else {
                DownloadError::network(url, e)
            }
        })?;

        writer
            .write_all(&chunk)
            .await
            .map_err(|e| DownloadError::io(file_path, e))?;

        bytes_written += chunk.len() as u64;
    }

    writer
        .flush()
        .await
        .map_err(|e| DownloadError::io(file_path, e))?;

    Ok(bytes_written)
}

async fn copy_local(source: &Path, dest: &Path) -> Result<u64, DownloadError> {
    match tokio::fs::copy(source, dest).await {
        Ok(bytes) => Ok(bytes),
        Err(e) if e.kind() == ErrorKind::NotFound && !source.exists() => {
            Err(DownloadError::source_missing(source))
        }
        Err(e) => Err(DownloadError::io(source, e)),
    }
}

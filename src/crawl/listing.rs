//! Directory listing seam: local filesystem walk and HTTP autoindex parse.

use std::io::ErrorKind;
use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use regex::Regex;
use tokio::sync::Semaphore;
use url::Url;
use tracing::{debug, trace, warn};

use super::CrawlError;
use crate::collection::Origin;
use crate::download::{DownloadError, HttpClient};

/// Kind of a listed child.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    /// Regular file.
    File,
    /// Subdirectory.
    Directory,
}

/// One child of a listed directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingEntry {
    /// Single path segment, already percent-decoded.
    pub name: String,
    /// File or subdirectory.
    pub kind: EntryKind,
}

impl ListingEntry {
    /// A file entry.
    pub fn file(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: EntryKind::File,
        }
    }

    /// A subdirectory entry.
    pub fn directory(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: EntryKind::Directory,
        }
    }
}

/// Lists the immediate children of a directory origin.
#[async_trait]
pub trait DirectoryListing: Send + Sync {
    /// Returns the children of `dir`.
    ///
    /// A directory that does not exist lists as empty.
    async fn list(&self, dir: &Origin) -> Result<Vec<ListingEntry>, CrawlError>;
}

/// Walks local directories with `tokio::fs::read_dir`.
///
/// Symlinks to files are listed as files. Symlinks to directories are not
/// followed.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalListing;

#[async_trait]
impl DirectoryListing for LocalListing {
    async fn list(&self, dir: &Origin) -> Result<Vec<ListingEntry>, CrawlError> {
        let Origin::Local(path) = dir else {
            return Err(CrawlError::UnsupportedOrigin {
                origin: dir.to_string(),
            });
        };

        let mut read_dir = match tokio::fs::read_dir(path).await {
            Ok(read_dir) => read_dir,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                trace!(dir = %path.display(), "directory missing, nothing to list");
                return Ok(Vec::new());
            }
            Err(e) => return Err(CrawlError::io(path, e)),
        };

        let mut entries = Vec::new();
        while let Some(entry) = read_dir
            .next_entry()
            .await
            .map_err(|e| CrawlError::io(path, e))?
        {
            let Ok(name) = entry.file_name().into_string() else {
                warn!(path = %entry.path().display(), "skipping non UTF-8 file name");
                continue;
            };
            let file_type = match entry.file_type().await {
                Ok(file_type) => file_type,
                Err(e) => {
                    debug!(path = %entry.path().display(), error = %e, "skipping unreadable entry");
                    continue;
                }
            };
            if file_type.is_dir() {
                entries.push(ListingEntry::directory(name));
            } else if file_type.is_file() {
                entries.push(ListingEntry::file(name));
            } else if file_type.is_symlink() {
                // Linked files are listed; linked directories could form a cycle
                match tokio::fs::metadata(entry.path()).await {
                    Ok(target) if target.is_file() => entries.push(ListingEntry::file(name)),
                    Ok(target) if target.is_dir() => {
                        debug!(path = %entry.path().display(), "skipping symlinked directory");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        debug!(path = %entry.path().display(), error = %e, "skipping dangling symlink");
                    }
                }
            }
        }
        Ok(entries)
    }
}

static HREF_RE: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r#"(?i)<a\s[^>]*href\s*=\s*"([^"]*)""#));

fn compile_static_regex(pattern: &str) -> Regex {
    Regex::new(pattern).unwrap_or_else(|e| panic!("invalid static regex '{pattern}': {e}"))
}

/// Extracts child entries from an NGINX-style autoindex page.
///
/// Hrefs ending in `/` are subdirectories, everything else is a file.
/// Parent and self links, query/fragment/absolute links and anything that
/// does not decode to a single path segment are skipped.
#[must_use]
pub fn parse_autoindex(html: &str) -> Vec<ListingEntry> {
    let mut entries = Vec::new();
    for captures in HREF_RE.captures_iter(html) {
        let Some(href) = captures.get(1).map(|m| m.as_str().trim()) else {
            continue;
        };
        if href.is_empty()
            || href.starts_with(['?', '#', '/'])
            || href.starts_with("../")
            || href.starts_with("./")
            || href.contains("://")
        {
            continue;
        }

        let (raw, kind) = match href.strip_suffix('/') {
            Some(dir) => (dir, EntryKind::Directory),
            None => (href, EntryKind::File),
        };
        let Ok(name) = urlencoding::decode(raw) else {
            trace!(href, "skipping href that is not valid UTF-8 once decoded");
            continue;
        };
        if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']) {
            continue;
        }
        entries.push(ListingEntry {
            name: name.into_owned(),
            kind,
        });
    }
    entries
}

/// Lists HTTP directories by fetching and parsing their autoindex page.
///
/// With a limiter attached, each page request holds one permit, so listing
/// shares the connection cap with file downloads.
#[derive(Debug, Clone)]
pub struct AutoindexListing {
    client: HttpClient,
    limiter: Option<Arc<Semaphore>>,
}

impl AutoindexListing {
    /// Creates an unlimited listing backed by `client`.
    #[must_use]
    pub fn new(client: HttpClient) -> Self {
        Self {
            client,
            limiter: None,
        }
    }

    /// Holds a permit from `limiter` for every page request.
    #[must_use]
    pub fn with_limiter(mut self, limiter: Arc<Semaphore>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    async fn fetch_page(&self, url: &Url) -> Result<String, DownloadError> {
        let _permit = match &self.limiter {
            Some(limiter) => Some(
                limiter
                    .acquire()
                    .await
                    .map_err(|_| DownloadError::LimiterClosed)?,
            ),
            None => None,
        };
        self.client.get_text(url).await
    }
}

#[async_trait]
impl DirectoryListing for AutoindexListing {
    async fn list(&self, dir: &Origin) -> Result<Vec<ListingEntry>, CrawlError> {
        let Origin::Http(url) = dir else {
            return Err(CrawlError::UnsupportedOrigin {
                origin: dir.to_string(),
            });
        };
        let html = match self.fetch_page(url).await {
            Ok(html) => html,
            Err(DownloadError::HttpStatus { status: 404, .. }) => {
                trace!(url = %url, "directory missing, nothing to list");
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };
        let entries = parse_autoindex(&html);
        trace!(url = %url, entries = entries.len(), "autoindex parsed");
        Ok(entries)
    }
}

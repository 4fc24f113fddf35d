//! Download cache for content archives injected into the shell.

use std::{
    fmt, fs,
    io::{Read, Write},
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{anyhow, Context, Result};
use reqwest::blocking::Client;
use tempfile::NamedTempFile;
use tracing::{debug, info};

const USER_AGENT: &str = concat!("shellpack-store/", env!("CARGO_PKG_VERSION"));
// Archives can be large and mirrors slow; a transfer runs until the server
// closes it.
const REQUEST_TIMEOUT: Option<Duration> = None;
const CACHE_DIR: &str = ".apps";
const ARCHIVE_EXTENSION: &str = "zip";

/// Archive cache rooted at a shell checkout (`<root>/.apps/<project>.zip`).
///
/// Entries are never evicted; a file present at its cache path is treated
/// as complete because downloads are staged and renamed into place.
#[derive(Debug, Clone)]
pub struct ContentCache {
    root: PathBuf,
}

impl ContentCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn dir(&self) -> PathBuf {
        self.root.join(CACHE_DIR)
    }

    #[must_use]
    pub fn archive_path(&self, project_id: &str) -> PathBuf {
        self.dir().join(format!("{project_id}.{ARCHIVE_EXTENSION}"))
    }
}

/// Context attached when the cache itself cannot be written, so callers can
/// tell local disk failures apart from transfer failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheWriteError {
    pub path: PathBuf,
}

impl CacheWriteError {
    fn at(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }
}

impl fmt::Display for CacheWriteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to write cache entry {}", self.path.display())
    }
}

/// Result of ensuring an archive exists on disk.
#[derive(Debug, Clone)]
pub struct FetchedArchive {
    pub path: PathBuf,
    pub size: u64,
    pub cache_hit: bool,
}

/// Ensure `dest` exists, downloading `url` into it when absent.
///
/// # Errors
/// Returns an error when the request fails, the server answers with a
/// non-success status, or the staged file cannot be written or persisted.
/// No file is left at `dest` on failure.
pub fn ensure_downloaded(url: &str, dest: &Path) -> Result<FetchedArchive> {
    if dest.is_file() {
        let size = fs::metadata(dest)
            .with_context(|| CacheWriteError::at(dest))?
            .len();
        debug!(path = %dest.display(), size, "archive already cached");
        return Ok(FetchedArchive {
            path: dest.to_path_buf(),
            size,
            cache_hit: true,
        });
    }

    let client = http_client()?;
    let fetched = download_once(&client, url, dest)?;
    info!(url, path = %dest.display(), size = fetched.size, "downloaded archive");
    Ok(fetched)
}

fn download_once(client: &Client, url: &str, dest: &Path) -> Result<FetchedArchive> {
    let parent = dest
        .parent()
        .ok_or_else(|| anyhow!("cache path {} has no parent directory", dest.display()))?;
    fs::create_dir_all(parent).with_context(|| CacheWriteError::at(parent))?;

    let mut response = client
        .get(url)
        .send()
        .with_context(|| format!("failed to fetch {url}"))?
        .error_for_status()
        .with_context(|| format!("unexpected response for {url}"))?;

    // Dropping the temp file on any early return removes the partial download.
    let mut tmp = NamedTempFile::new_in(parent).with_context(|| CacheWriteError::at(parent))?;
    let mut written: u64 = 0;
    let mut buffer = [0u8; 64 * 1024];
    loop {
        let read = response
            .read(&mut buffer)
            .with_context(|| format!("stream error for {url}"))?;
        if read == 0 {
            break;
        }
        tmp.write_all(&buffer[..read])
            .with_context(|| CacheWriteError::at(tmp.path()))?;
        written += read as u64;
    }
    tmp.as_file()
        .sync_all()
        .with_context(|| CacheWriteError::at(tmp.path()))?;

    tmp.persist(dest)
        .map_err(|err| err.error)
        .with_context(|| CacheWriteError::at(dest))?;
    Ok(FetchedArchive {
        path: dest.to_path_buf(),
        size: written,
        cache_hit: false,
    })
}

fn http_client() -> Result<Client> {
    Client::builder()
        .user_agent(USER_AGENT)
        .timeout(REQUEST_TIMEOUT)
        .no_proxy()
        .build()
        .context("failed to build http client")
}

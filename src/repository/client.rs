// src/repository/client.rs

//! HTTP client for mirror downloads
//!
//! Each call is a single attempt bounded by the configured timeout. The
//! mirror list is the retry dimension, so there is no retry loop here.

use super::Fetcher;
use crate::error::{Error, Result};
use reqwest::blocking::Client;
use std::fs::{self, File};
use std::io;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

/// Blocking HTTP fetcher
pub struct HttpFetcher {
    client: Client,
    timeout: Duration,
}

impl HttpFetcher {
    /// Create a fetcher whose every request gives up after `timeout`
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(|e| Error::DownloadError(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self { client, timeout })
    }

    /// Check that `url` answers at all (any HTTP status counts)
    pub fn probe(&self, url: &Url) -> Result<()> {
        debug!("Probing {}", url);
        self.client.head(url.as_str()).send().map_err(|e| {
            Error::Preflight(format!(
                "{} unreachable within {}s: {e}",
                url,
                self.timeout.as_secs()
            ))
        })?;
        Ok(())
    }
}

impl Fetcher for HttpFetcher {
    fn fetch(&self, url: &Url, dest: &Path) -> Result<u64> {
        debug!("Downloading {} to {}", url, dest.display());

        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                Error::IoError(format!("Failed to create directory {}: {e}", parent.display()))
            })?;
        }

        let mut response = self
            .client
            .get(url.as_str())
            .send()
            .map_err(|e| Error::TransientFetch(format!("Failed to fetch {}: {e}", url)))?;

        if !response.status().is_success() {
            return Err(Error::TransientFetch(format!(
                "HTTP {} from {}",
                response.status(),
                url
            )));
        }

        let mut file = File::create(dest).map_err(|e| {
            Error::IoError(format!("Failed to create file {}: {e}", dest.display()))
        })?;

        let written = io::copy(&mut response, &mut file)
            .map_err(|e| Error::TransientFetch(format!("Failed to read body of {}: {e}", url)))?;

        info!("Downloaded {} bytes from {}", written, url);
        Ok(written)
    }
}

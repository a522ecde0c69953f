//! HTTP image server client
//!
//! Fetches frames that a remote camera host publishes over HTTP and stores
//! them under a per-night directory on this machine.

use crate::device_ops::{DeviceResult, Frame, ImageServerOps};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use reqwest::Client;
use std::path::{Path, PathBuf};

/// Directory for the night containing `now`.
///
/// The date rolls over at 12:00 UT so one observing night keeps a single
/// directory across midnight.
pub fn night_directory(images_root: &Path, now: DateTime<Utc>) -> PathBuf {
    let night = (now - Duration::hours(12)).date_naive();
    images_root.join(night.format("%Y%m%d").to_string())
}

pub struct HttpImageServer {
    client: Client,
    images_root: PathBuf,
}

impl HttpImageServer {
    pub fn new(images_root: impl Into<PathBuf>) -> Self {
        Self::with_client(Client::new(), images_root)
    }

    pub fn with_client(client: Client, images_root: impl Into<PathBuf>) -> Self {
        Self {
            client,
            images_root: images_root.into(),
        }
    }
}

#[async_trait]
impl ImageServerOps for HttpImageServer {
    fn default_night_dir(&self) -> PathBuf {
        night_directory(&self.images_root, Utc::now())
    }

    async fn download(&self, frame: &Frame, destination: &Path) -> DeviceResult<bool> {
        let Some(url) = frame.url.as_deref() else {
            tracing::warn!("Frame {} is not published by any image server", frame.path);
            return Ok(false);
        };

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| format!("GET {} failed: {}", url, e))?;

        let status = response.status();
        if !status.is_success() {
            tracing::warn!("Image server returned {} for {}", status, url);
            return Ok(false);
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| format!("Reading {} failed: {}", url, e))?;

        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| format!("Cannot create {}: {}", parent.display(), e))?;
        }
        tokio::fs::write(destination, &body)
            .await
            .map_err(|e| format!("Cannot write {}: {}", destination.display(), e))?;

        tracing::debug!("Downloaded {} bytes from {}", body.len(), url);
        Ok(true)
    }

    async fn release(&self, frame: &Frame) -> DeviceResult<()> {
        // Frames are plain files on the server; nothing is held open
        tracing::trace!("Released {}", frame.path);
        Ok(())
    }
}

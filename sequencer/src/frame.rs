//! Single-frame acquisition and sky level measurement
//!
//! One call exposes one frame, brings it to local disk if the camera host
//! is another machine, reduces it to a mean pixel value, and releases it.
//! Nothing is retried here; failures go back to the session.

use crate::config::AcquisitionConfig;
use crate::device_ops::{ExposureRequest, Frame, Shutter, SkyFlatDevices};
use crate::error::AcquisitionError;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::time::Instant;

/// Outcome of one measured flat
#[derive(Debug, Clone, PartialEq)]
pub struct ExposureResult {
    pub frame: Frame,
    /// Local copy that was measured
    pub file_path: PathBuf,
    /// Mean pixel value
    pub sky_level: f64,
}

/// Expand a frame name template.
///
/// `$DATE` becomes the UT timestamp `YYYYMMDD-HHMMSS`. `.fits` is appended
/// when the result has no extension.
pub fn make_filename(template: &str, now: DateTime<Utc>) -> String {
    let mut name = template.replace("$DATE", &now.format("%Y%m%d-%H%M%S").to_string());
    if Path::new(&name).extension().is_none() {
        name.push_str(".fits");
    }
    name
}

/// File name part of a path reported by a possibly remote host.
///
/// Paths containing a drive separator (`C:\...`) are split on both slash
/// kinds, anything else on `/` only.
pub fn remote_basename(path: &str) -> &str {
    let name = if path.contains(":\\") {
        path.rsplit(|c: char| c == '\\' || c == '/').next()
    } else {
        path.rsplit('/').next()
    };
    name.unwrap_or(path)
}

/// `path` if free, otherwise the first of `stem-0001.ext`, `stem-0002.ext`, ...
/// that does not exist yet
pub fn unique_path(path: &Path) -> PathBuf {
    if !path.exists() {
        return path.to_path_buf();
    }

    let parent = path.parent().unwrap_or_else(|| Path::new(""));
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let extension = path.extension().map(|e| e.to_string_lossy().into_owned());

    (1u32..)
        .map(|n| {
            let name = match &extension {
                Some(ext) => format!("{}-{:04}.{}", stem, n, ext),
                None => format!("{}-{:04}", stem, n),
            };
            parent.join(name)
        })
        .find(|candidate| !candidate.exists())
        .unwrap_or_else(|| path.to_path_buf())
}

/// Mean pixel value of a FITS file on local disk
pub fn measure_sky_level(path: &Path) -> Result<f64, AcquisitionError> {
    let (image, _header) =
        skyflat_imaging::read_fits(path).map_err(|e| AcquisitionError::FrameRead {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
    image
        .mean()
        .ok_or_else(|| AcquisitionError::EmptyFrame(path.to_path_buf()))
}

/// Takes and measures flats for one session
pub struct FrameAcquisition<'a> {
    devices: &'a SkyFlatDevices,
    config: &'a AcquisitionConfig,
}

impl<'a> FrameAcquisition<'a> {
    pub fn new(devices: &'a SkyFlatDevices, config: &'a AcquisitionConfig) -> Self {
        Self { devices, config }
    }

    /// Take one flat and return its mean level. Errors are logged before
    /// being returned.
    pub async fn acquire_sky_level(&self, exposure_secs: f64) -> Result<f64, AcquisitionError> {
        self.set_side_of_pier().await;

        match self.take_sky_flat(exposure_secs).await {
            Ok(result) => Ok(result.sky_level),
            Err(e) => {
                tracing::error!("Can't take sky flat ({:.1}s): {}", exposure_secs, e);
                Err(e)
            }
        }
    }

    /// Expose, fetch and measure one frame
    pub async fn take_sky_flat(
        &self,
        exposure_secs: f64,
    ) -> Result<ExposureResult, AcquisitionError> {
        self.select_filter().await?;

        let request = ExposureRequest {
            exposure_secs,
            frames: 1,
            shutter: Shutter::Open,
            filename: make_filename(&self.config.filename_template, self.devices.site.ut()),
        };

        tracing::debug!("Start frame: {:.1}s -> {}", exposure_secs, request.filename);
        let frames = self
            .devices
            .camera
            .expose(&request)
            .await
            .map_err(AcquisitionError::Camera)?;
        tracing::debug!("End frame");

        let frame = frames.into_iter().next().ok_or(AcquisitionError::NoFrame)?;

        let measured = self.fetch_and_measure(&frame, &request.filename).await;

        if let Err(e) = self.devices.image_server.release(&frame).await {
            tracing::warn!("Failed to release frame {}: {}", frame.path, e);
        }

        let (file_path, sky_level) = measured?;
        tracing::debug!("Sky level {:.1} in {}", sky_level, file_path.display());

        Ok(ExposureResult {
            frame,
            file_path,
            sky_level,
        })
    }

    async fn fetch_and_measure(
        &self,
        frame: &Frame,
        requested_name: &str,
    ) -> Result<(PathBuf, f64), AcquisitionError> {
        let path = self.resolve_local_path(frame, requested_name).await?;
        let level = measure_sky_level(&path)?;
        Ok((path, level))
    }

    async fn select_filter(&self) -> Result<(), AcquisitionError> {
        let (Some(filter_wheel), Some(filter)) = (&self.devices.filter_wheel, &self.config.filter)
        else {
            return Ok(());
        };

        tracing::debug!("Selecting filter {}", filter);
        filter_wheel
            .set_filter(filter)
            .await
            .map_err(|reason| AcquisitionError::FilterWheel {
                filter: filter.clone(),
                reason,
            })
    }

    async fn set_side_of_pier(&self) {
        let Some(side) = self.config.side_of_pier else {
            return;
        };

        if let Err(e) = self.devices.telescope.set_side_of_pier(side).await {
            tracing::warn!("Error setting side of pier to {:?}: {}", side, e);
        }
    }

    /// Local path of the frame, downloading it into tonight's directory when
    /// the reported path is not reachable from here
    async fn resolve_local_path(
        &self,
        frame: &Frame,
        requested_name: &str,
    ) -> Result<PathBuf, AcquisitionError> {
        let reported = Path::new(&frame.path);
        if reported.exists() {
            return Ok(reported.to_path_buf());
        }

        let name = match remote_basename(&frame.path) {
            "" => requested_name,
            name => name,
        };
        let destination = unique_path(&self.devices.image_server.default_night_dir().join(name));
        let source_url = frame.url.clone().unwrap_or_else(|| frame.path.clone());

        tracing::debug!("Downloading image from server to {}", destination.display());
        let started = Instant::now();

        match self.devices.image_server.download(frame, &destination).await {
            Ok(true) => {
                tracing::debug!(
                    "Finished download. Took {:.2} seconds",
                    started.elapsed().as_secs_f64()
                );
                Ok(destination)
            }
            Ok(false) => Err(AcquisitionError::DownloadFailed {
                source_url,
                destination,
                reason: "image server did not transfer the frame".to_string(),
            }),
            Err(reason) => Err(AcquisitionError::DownloadFailed {
                source_url,
                destination,
                reason,
            }),
        }
    }
}

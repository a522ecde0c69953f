//! Device Operations Traits
//!
//! This module defines the interfaces to the hardware services the sky flat
//! sequencer drives. Each service is a separate port so a session can be
//! wired to real drivers, a remote observatory manager, or test fakes.
//! The sequencer calls these methods without knowing the implementation details.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Result type for device operations
pub type DeviceResult<T> = Result<T, String>;

/// Side of the pier for a German equatorial mount
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PierSide {
    East,
    West,
}

/// Shutter state requested for an exposure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Shutter {
    /// Sky flats always expose with the shutter open
    Open,
}

/// Exposure parameters passed to the camera
#[derive(Debug, Clone, PartialEq)]
pub struct ExposureRequest {
    pub exposure_secs: f64,
    pub frames: u32,
    pub shutter: Shutter,
    /// Base name for the file the camera host writes
    pub filename: String,
}

/// A frame produced by the camera host
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Path as reported by the camera host, which may be another machine
    /// (and another OS)
    pub path: String,
    /// Where the image server publishes the frame, if it does
    pub url: Option<String>,
}

// =========================================================================
// SITE / EPHEMERIS
// =========================================================================

/// Observatory site and solar ephemeris
pub trait SiteOps: Send + Sync {
    /// Current UT
    fn ut(&self) -> DateTime<Utc>;

    /// Current solar altitude in degrees
    fn sun_altitude(&self) -> f64;

    /// Solar altitude in degrees at an arbitrary instant
    fn sun_altitude_at(&self, time: DateTime<Utc>) -> f64;
}

// =========================================================================
// TELESCOPE
// =========================================================================

#[async_trait]
pub trait TelescopeOps: Send + Sync {
    /// Slew to horizontal coordinates (degrees)
    async fn slew_to_alt_az(&self, altitude: f64, azimuth: f64) -> DeviceResult<()>;

    /// Stop sidereal tracking
    async fn stop_tracking(&self) -> DeviceResult<()>;

    /// Resume sidereal tracking
    async fn start_tracking(&self) -> DeviceResult<()>;

    /// Put the mount on the given side of the pier
    async fn set_side_of_pier(&self, side: PierSide) -> DeviceResult<()>;
}

// =========================================================================
// CAMERA
// =========================================================================

#[async_trait]
pub trait CameraOps: Send + Sync {
    /// Take exposures and return the produced frames (possibly none)
    async fn expose(&self, request: &ExposureRequest) -> DeviceResult<Vec<Frame>>;
}

// =========================================================================
// FILTER WHEEL
// =========================================================================

#[async_trait]
pub trait FilterWheelOps: Send + Sync {
    /// Select a filter by name
    async fn set_filter(&self, filter: &str) -> DeviceResult<()>;
}

// =========================================================================
// IMAGE SERVER
// =========================================================================

/// Storage and transfer of produced frames
#[async_trait]
pub trait ImageServerOps: Send + Sync {
    /// Local directory where tonight's frames are stored
    fn default_night_dir(&self) -> PathBuf;

    /// Copy a remote frame to `destination`. `Ok(false)` means the server
    /// answered but the transfer did not happen.
    async fn download(&self, frame: &Frame, destination: &Path) -> DeviceResult<bool>;

    /// Release any resource the host holds for this frame
    async fn release(&self, frame: &Frame) -> DeviceResult<()>;
}

pub type SharedSite = Arc<dyn SiteOps>;
pub type SharedTelescope = Arc<dyn TelescopeOps>;
pub type SharedCamera = Arc<dyn CameraOps>;
pub type SharedFilterWheel = Arc<dyn FilterWheelOps>;
pub type SharedImageServer = Arc<dyn ImageServerOps>;

/// The set of devices a sky flat session runs against
#[derive(Clone)]
pub struct SkyFlatDevices {
    pub site: SharedSite,
    pub telescope: SharedTelescope,
    pub camera: SharedCamera,
    /// `None` when no filter wheel is installed
    pub filter_wheel: Option<SharedFilterWheel>,
    pub image_server: SharedImageServer,
}

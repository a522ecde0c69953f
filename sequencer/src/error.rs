//! Error types for sky flat sessions
//!
//! Hardware-control failures (slew, tracking, side of pier) never appear
//! here: they are logged where they happen and the session carries on.
//! Everything in this module aborts the session.

use std::path::PathBuf;
use thiserror::Error;

/// Failure while taking or measuring a single frame
#[derive(Error, Debug)]
pub enum AcquisitionError {
    #[error("No frame returned by camera")]
    NoFrame,

    #[error("Camera exposure failed: {0}")]
    Camera(String),

    #[error("Failed to select filter {filter}: {reason}")]
    FilterWheel { filter: String, reason: String },

    #[error("Download failed: {source_url} -> {}: {reason}", destination.display())]
    DownloadFailed {
        source_url: String,
        destination: PathBuf,
        reason: String,
    },

    #[error("Failed to read frame {}: {reason}", path.display())]
    FrameRead { path: PathBuf, reason: String },

    #[error("Frame {} contains no pixels", .0.display())]
    EmptyFrame(PathBuf),
}

/// Session-level error returned by the controller
#[derive(Error, Debug)]
pub enum SkyFlatError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to parse configuration: {0}")]
    ConfigParse(#[from] serde_json::Error),

    #[error("Failed to read configuration {}: {source}", path.display())]
    ConfigIo {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Acquisition failed: {0}")]
    Acquisition(#[from] AcquisitionError),

    #[error("Sky flat session cancelled")]
    Cancelled,
}

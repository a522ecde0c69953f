//! Sky Flat Sequencer
//!
//! Automated twilight flat-field acquisition. A session waits for the Sun to
//! enter a configured altitude band, primes a sky level with one exposure,
//! parks the telescope at the flat pointing and then keeps exposing while
//! the Sun stays in the band, predicting each exposure time from a
//! sky-brightness model.
//!
//! All hardware is reached through the ports in [`device_ops`].

pub mod config;
pub mod device_ops;
pub mod error;
pub mod estimator;
pub mod frame;
pub mod image_server;
pub mod phase_gate;
pub mod sky_flat;
pub mod sky_model;

#[cfg(test)]
mod test_support;

pub use config::{AcquisitionConfig, DEFAULT_FILENAME_TEMPLATE};
pub use device_ops::{
    CameraOps, DeviceResult, ExposureRequest, FilterWheelOps, Frame, ImageServerOps, PierSide,
    Shutter, SiteOps, SkyFlatDevices, TelescopeOps,
};
pub use error::{AcquisitionError, SkyFlatError};
pub use estimator::{integrate_exposure_time, ExposureEstimator};
pub use frame::{ExposureResult, FrameAcquisition};
pub use image_server::HttpImageServer;
pub use phase_gate::{wait_for_acquisition_window, AltitudeBand, SUN_POLL_INTERVAL};
pub use sky_flat::{SessionState, SessionSummary, SkyFlatController};
pub use sky_model::SkyModelParameters;

use std::sync::atomic::{AtomicBool, Ordering};

pub(crate) fn is_cancelled(cancellation_token: Option<&AtomicBool>) -> bool {
    cancellation_token.is_some_and(|token| token.load(Ordering::Relaxed))
}

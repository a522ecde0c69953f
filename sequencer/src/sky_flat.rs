//! Sky Flat Controller
//!
//! Runs one twilight flat session:
//! 1. Waits until the Sun is inside the configured altitude band
//! 2. Takes a priming exposure at the default exposure time
//! 3. Slews to the flat pointing and stops tracking
//! 4. Exposes repeatedly while the Sun stays in the band, predicting each
//!    exposure time from the sky model
//! 5. Resumes tracking
//!
//! Telescope failures are logged and the session carries on. Acquisition
//! failures abort the session.

use crate::config::AcquisitionConfig;
use crate::device_ops::SkyFlatDevices;
use crate::error::{AcquisitionError, SkyFlatError};
use crate::estimator::ExposureEstimator;
use crate::frame::FrameAcquisition;
use crate::phase_gate::wait_for_acquisition_window;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tokio::sync::watch;

/// Where a session currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Waiting for the Sun to enter the altitude band
    WaitingEntry,
    /// Taking the baseline exposure and parking the telescope
    Priming,
    /// Taking flats
    Exposing,
    /// Session finished and tracking resumed
    Done,
}

/// Outcome of a completed session
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionSummary {
    /// Flats taken in the exposing loop, not counting the priming frame
    pub flats_taken: u32,
    /// Mean level of the last frame measured
    pub last_sky_level: f64,
}

pub struct SkyFlatController {
    devices: SkyFlatDevices,
    cancellation_token: Option<Arc<AtomicBool>>,
    state: watch::Sender<SessionState>,
}

impl SkyFlatController {
    pub fn new(devices: SkyFlatDevices) -> Self {
        let (state, _) = watch::channel(SessionState::WaitingEntry);
        Self {
            devices,
            cancellation_token: None,
            state,
        }
    }

    /// Abort the session at the next poll or exposure boundary once `token`
    /// is set
    pub fn with_cancellation(mut self, token: Arc<AtomicBool>) -> Self {
        self.cancellation_token = Some(token);
        self
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Receiver that observes every state change
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Predicted exposure time for a flat starting now
    pub fn compute_exposure_time(
        &self,
        config: &AcquisitionConfig,
        sky_level: f64,
        current_altitude: f64,
    ) -> f64 {
        ExposureEstimator::from_config(self.devices.site.as_ref(), config)
            .compute_exposure_time(sky_level, current_altitude)
    }

    /// Take one flat and return its mean level
    pub async fn acquire_sky_level(
        &self,
        config: &AcquisitionConfig,
        exposure_secs: f64,
    ) -> Result<f64, AcquisitionError> {
        FrameAcquisition::new(&self.devices, config)
            .acquire_sky_level(exposure_secs)
            .await
    }

    /// Run a complete session. Returns once the Sun has left the band.
    ///
    /// Each call is independent; nothing carries over between sessions.
    pub async fn run_session(
        &self,
        config: &AcquisitionConfig,
    ) -> Result<SessionSummary, SkyFlatError> {
        config.validate()?;
        let band = config.altitude_band();

        self.set_state(SessionState::WaitingEntry);
        wait_for_acquisition_window(self.devices.site.as_ref(), band, self.cancellation()).await?;

        self.set_state(SessionState::Priming);
        self.check_cancelled()?;
        let mut sky_level = self
            .acquire_sky_level(config, config.default_exposure_time)
            .await?;
        let mut altitude = self.devices.site.sun_altitude();
        tracing::info!(
            "Priming sky level {:.1}, Sun at {:.3}°",
            sky_level,
            altitude
        );

        self.move_scope(config.flat_altitude, config.flat_azimuth).await;
        self.stop_tracking().await;

        self.set_state(SessionState::Exposing);
        let result = self
            .exposing_loop(config, &mut sky_level, &mut altitude)
            .await;

        // Tracking comes back whatever happened in the loop
        self.start_tracking().await;

        let flats_taken = result?;
        self.set_state(SessionState::Done);
        tracing::info!(
            "Sky flats done: {} flats, Sun at {:.3}° left {}",
            flats_taken,
            altitude,
            band
        );

        Ok(SessionSummary {
            flats_taken,
            last_sky_level: sky_level,
        })
    }

    async fn exposing_loop(
        &self,
        config: &AcquisitionConfig,
        sky_level: &mut f64,
        altitude: &mut f64,
    ) -> Result<u32, SkyFlatError> {
        let band = config.altitude_band();
        let mut flats_taken = 0u32;

        while band.contains(*altitude) {
            self.check_cancelled()?;

            let exposure_time = self.compute_exposure_time(config, *sky_level, *altitude);
            *sky_level = self.acquire_sky_level(config, exposure_time).await?;
            flats_taken += 1;

            *altitude = self.devices.site.sun_altitude();
            tracing::info!(
                "Flat {}: {:.0}s, sky level {:.1}, Sun at {:.3}°",
                flats_taken,
                exposure_time,
                sky_level,
                altitude
            );
        }

        Ok(flats_taken)
    }

    async fn move_scope(&self, altitude: f64, azimuth: f64) {
        tracing::debug!("Slewing to alt {:.2}°, az {:.2}°", altitude, azimuth);
        if let Err(e) = self.devices.telescope.slew_to_alt_az(altitude, azimuth).await {
            tracing::warn!("Error moving scope, continuing from current pointing: {}", e);
        }
    }

    async fn stop_tracking(&self) {
        if let Err(e) = self.devices.telescope.stop_tracking().await {
            tracing::warn!("Error stopping tracking: {}", e);
        }
    }

    async fn start_tracking(&self) {
        if let Err(e) = self.devices.telescope.start_tracking().await {
            tracing::warn!("Error starting tracking: {}", e);
        }
    }

    fn cancellation(&self) -> Option<&AtomicBool> {
        self.cancellation_token.as_deref()
    }

    fn check_cancelled(&self) -> Result<(), SkyFlatError> {
        if crate::is_cancelled(self.cancellation()) {
            tracing::warn!("Sky flat session cancelled");
            return Err(SkyFlatError::Cancelled);
        }
        Ok(())
    }

    fn set_state(&self, state: SessionState) {
        tracing::debug!("Sky flat session: {:?}", state);
        self.state.send_replace(state);
    }
}

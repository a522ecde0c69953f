//! Exposure time prediction for twilight flats
//!
//! The sky brightens or fades noticeably during a single flat, so the rate
//! at shutter-open is not enough to pick an exposure time. Instead the count
//! rate is integrated forward one second at a time along the predicted solar
//! altitude until the accumulated counts reach the target.
//!
//! The loop has no iteration cap. With a positive bias term the integral
//! always reaches any finite target; a model whose rate can fall to zero or
//! below will not converge. The session loop bounds how often the estimator
//! runs, not how long a single estimate may take.

use crate::config::AcquisitionConfig;
use crate::device_ops::SiteOps;
use crate::sky_model::SkyModelParameters;

/// Integration step in seconds
pub const INTEGRATION_STEP_SECS: u64 = 1;

/// Integrate the model until `ideal_counts` is reached.
///
/// `altitude_at(elapsed)` returns the solar altitude in degrees `elapsed`
/// seconds after the exposure starts. Returns a whole number of seconds,
/// at least one step.
pub fn integrate_exposure_time<F>(
    model: &SkyModelParameters,
    ideal_counts: f64,
    mut altitude_at: F,
) -> f64
where
    F: FnMut(u64) -> f64,
{
    let mut integrated_counts = 0.0;
    let mut exposure_time: u64 = 0;

    loop {
        let altitude = altitude_at(exposure_time);
        let sky_counts = model.rate_at_degrees(altitude) * INTEGRATION_STEP_SECS as f64;
        integrated_counts += sky_counts;
        exposure_time += INTEGRATION_STEP_SECS;

        tracing::trace!(
            "Exposure integration t={}s alt={:.4}° sky_counts={:.1} integrated={:.1}",
            exposure_time,
            altitude,
            sky_counts,
            integrated_counts
        );

        if integrated_counts >= ideal_counts {
            return exposure_time as f64;
        }
    }
}

/// Predicts flat exposure times from the site ephemeris
pub struct ExposureEstimator<'a> {
    site: &'a dyn SiteOps,
    model: SkyModelParameters,
    ideal_counts: f64,
}

impl<'a> ExposureEstimator<'a> {
    pub fn new(site: &'a dyn SiteOps, model: SkyModelParameters, ideal_counts: f64) -> Self {
        Self {
            site,
            model,
            ideal_counts,
        }
    }

    pub fn from_config(site: &'a dyn SiteOps, config: &AcquisitionConfig) -> Self {
        Self::new(site, config.sky_model, config.ideal_counts)
    }

    /// Exposure time in seconds for a flat starting now with the Sun at
    /// `current_altitude` degrees.
    ///
    /// `sky_level` is the mean of the previous frame. The model alone drives
    /// the prediction; the level is only reported.
    pub fn compute_exposure_time(&self, sky_level: f64, current_altitude: f64) -> f64 {
        let start = self.site.ut();
        let exposure_time = integrate_exposure_time(&self.model, self.ideal_counts, |elapsed| {
            if elapsed == 0 {
                current_altitude
            } else {
                let offset = chrono::Duration::seconds(elapsed as i64);
                self.site.sun_altitude_at(start + offset)
            }
        });

        tracing::debug!(
            "Exposure time {:.0}s for {:.0} counts (Sun at {:.3}°, last sky level {:.1})",
            exposure_time,
            self.ideal_counts,
            current_altitude,
            sky_level
        );

        exposure_time
    }
}

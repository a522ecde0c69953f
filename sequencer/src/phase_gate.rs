//! Twilight wait
//!
//! Blocks until the Sun enters the altitude band where sky flats can be taken.
//! There is deliberately no timeout: waiting out the twilight is the job.

use crate::device_ops::SiteOps;
use crate::error::SkyFlatError;
use std::fmt;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

/// Interval between solar altitude polls
pub const SUN_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Closed solar altitude interval `[low, high]` in degrees
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AltitudeBand {
    pub low: f64,
    pub high: f64,
}

impl AltitudeBand {
    pub fn new(low: f64, high: f64) -> Self {
        Self { low, high }
    }

    /// Both edges count as inside. NaN is never inside.
    pub fn contains(&self, altitude: f64) -> bool {
        altitude >= self.low && altitude <= self.high
    }
}

impl fmt::Display for AltitudeBand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:.2}°, {:.2}°]", self.low, self.high)
    }
}

/// Poll the site until the Sun is inside `band`, returning the altitude that
/// satisfied it.
///
/// The cancellation flag, when given, is checked before every sleep.
pub async fn wait_for_acquisition_window(
    site: &dyn SiteOps,
    band: AltitudeBand,
    cancellation_token: Option<&AtomicBool>,
) -> Result<f64, SkyFlatError> {
    let mut altitude = site.sun_altitude();
    tracing::info!(
        "Starting sky flats: Sun altitude is {:.3}°, flat band {}",
        altitude,
        band
    );

    while !band.contains(altitude) {
        if crate::is_cancelled(cancellation_token) {
            tracing::warn!("Sky flat wait cancelled with Sun at {:.3}°", altitude);
            return Err(SkyFlatError::Cancelled);
        }

        tokio::time::sleep(SUN_POLL_INTERVAL).await;
        altitude = site.sun_altitude();
        tracing::debug!(
            "Sun altitude is {:.3}°, waiting to be within {}",
            altitude,
            band
        );
    }

    Ok(altitude)
}

//! Sky flat session configuration
//!
//! Loaded from JSON. Field aliases accept the legacy controller keys
//! (`sun_alt_hi`, `defaultExptime`, `idealCounts`, ...) so older
//! configuration files keep working.

use crate::device_ops::PierSide;
use crate::error::SkyFlatError;
use crate::phase_gate::AltitudeBand;
use crate::sky_model::SkyModelParameters;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default template for frame file names
pub const DEFAULT_FILENAME_TEMPLATE: &str = "skyflat-$DATE";

/// Configuration for one sky flat session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcquisitionConfig {
    /// Upper edge of the solar altitude band (degrees)
    #[serde(default = "default_sun_altitude_high", alias = "sun_alt_hi")]
    pub sun_altitude_high: f64,

    /// Lower edge of the solar altitude band (degrees)
    #[serde(default = "default_sun_altitude_low", alias = "sun_alt_low")]
    pub sun_altitude_low: f64,

    /// Exposure used for the first frame, before any sky level is known (seconds)
    #[serde(default = "default_exposure_time", alias = "defaultExptime")]
    pub default_exposure_time: f64,

    /// Target mean counts per flat
    #[serde(default = "default_ideal_counts", alias = "idealCounts")]
    pub ideal_counts: f64,

    /// Filter name; ignored when no filter wheel is installed
    #[serde(default = "default_filter")]
    pub filter: Option<String>,

    /// Side of pier to request before each exposure, `None` to leave the mount alone
    #[serde(default = "default_side_of_pier")]
    pub side_of_pier: Option<PierSide>,

    /// Flat field pointing altitude (degrees)
    #[serde(default = "default_flat_altitude", alias = "flat_alt")]
    pub flat_altitude: f64,

    /// Flat field pointing azimuth (degrees)
    #[serde(default, alias = "flat_az")]
    pub flat_azimuth: f64,

    /// Brightness model coefficients for the configured filter
    #[serde(default)]
    pub sky_model: SkyModelParameters,

    /// Frame name template, `$DATE` expands to the UT timestamp
    #[serde(default = "default_filename_template")]
    pub filename_template: String,
}

fn default_sun_altitude_high() -> f64 {
    -5.0
}

fn default_sun_altitude_low() -> f64 {
    -10.0
}

fn default_exposure_time() -> f64 {
    1.0
}

fn default_ideal_counts() -> f64 {
    25_000.0
}

fn default_filter() -> Option<String> {
    Some("R".to_string())
}

fn default_side_of_pier() -> Option<PierSide> {
    Some(PierSide::East)
}

fn default_flat_altitude() -> f64 {
    89.0
}

fn default_filename_template() -> String {
    DEFAULT_FILENAME_TEMPLATE.to_string()
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            sun_altitude_high: default_sun_altitude_high(),
            sun_altitude_low: default_sun_altitude_low(),
            default_exposure_time: default_exposure_time(),
            ideal_counts: default_ideal_counts(),
            filter: default_filter(),
            side_of_pier: default_side_of_pier(),
            flat_altitude: default_flat_altitude(),
            flat_azimuth: 0.0,
            sky_model: SkyModelParameters::default(),
            filename_template: default_filename_template(),
        }
    }
}

impl AcquisitionConfig {
    /// Parse and validate a JSON document
    pub fn from_json_str(json: &str) -> Result<Self, SkyFlatError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON configuration file
    pub fn load(path: &Path) -> Result<Self, SkyFlatError> {
        let json = std::fs::read_to_string(path).map_err(|source| SkyFlatError::ConfigIo {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<(), SkyFlatError> {
        if !self.sun_altitude_high.is_finite() || !self.sun_altitude_low.is_finite() {
            return Err(SkyFlatError::InvalidConfig(
                "sun altitude limits must be finite".to_string(),
            ));
        }
        if self.sun_altitude_high <= self.sun_altitude_low {
            return Err(SkyFlatError::InvalidConfig(format!(
                "sun_altitude_high ({}) must be above sun_altitude_low ({})",
                self.sun_altitude_high, self.sun_altitude_low
            )));
        }
        if !(self.ideal_counts.is_finite() && self.ideal_counts > 0.0) {
            return Err(SkyFlatError::InvalidConfig(format!(
                "ideal_counts must be positive, got {}",
                self.ideal_counts
            )));
        }
        if !(self.default_exposure_time.is_finite() && self.default_exposure_time >= 0.0) {
            return Err(SkyFlatError::InvalidConfig(format!(
                "default_exposure_time must be non-negative, got {}",
                self.default_exposure_time
            )));
        }
        if !self.sky_model.is_finite() {
            return Err(SkyFlatError::InvalidConfig(
                "sky model coefficients must be finite".to_string(),
            ));
        }
        // The rate is monotonic in altitude, so the band edges bound it
        let peak_rate = self
            .sky_model
            .rate_at_degrees(self.sun_altitude_low)
            .max(self.sky_model.rate_at_degrees(self.sun_altitude_high));
        if peak_rate.is_nan() || peak_rate <= 0.0 {
            return Err(SkyFlatError::InvalidConfig(format!(
                "sky model gives no counts between {}° and {}°",
                self.sun_altitude_low, self.sun_altitude_high
            )));
        }
        if self.filename_template.trim().is_empty() {
            return Err(SkyFlatError::InvalidConfig(
                "filename_template is empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Solar altitude band in which flats are taken
    pub fn altitude_band(&self) -> AltitudeBand {
        AltitudeBand::new(self.sun_altitude_low, self.sun_altitude_high)
    }
}

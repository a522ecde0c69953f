//! Twilight sky brightness model
//!
//! Sky count rate as a function of solar altitude:
//!
//! ```text
//! rate(alt) = scale * exp(slope * alt_radians) + bias
//! ```
//!
//! The coefficients depend on filter and detector and are fixed for a session.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SkyModelParameters {
    #[serde(alias = "Scale")]
    pub scale: f64,
    #[serde(alias = "Slope")]
    pub slope: f64,
    #[serde(alias = "Bias")]
    pub bias: f64,
}

impl Default for SkyModelParameters {
    fn default() -> Self {
        Self {
            scale: 2_000_000.0,
            slope: 68.0,
            bias: 17.0,
        }
    }
}

impl SkyModelParameters {
    /// Counts per second for a solar altitude in radians
    pub fn rate(&self, altitude_radians: f64) -> f64 {
        self.scale * (self.slope * altitude_radians).exp() + self.bias
    }

    /// Counts per second for a solar altitude in degrees
    pub fn rate_at_degrees(&self, altitude_degrees: f64) -> f64 {
        self.rate(altitude_degrees.to_radians())
    }

    pub fn is_finite(&self) -> bool {
        self.scale.is_finite() && self.slope.is_finite() && self.bias.is_finite()
    }
}

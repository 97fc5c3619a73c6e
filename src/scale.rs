use serde::{Deserialize, Serialize};

/// Pixels per millimeter for an object `depth_m` meters away.
///
/// Apparent size scales inversely with distance, so the reference scale measured at
/// `reference_distance_m` is rescaled by `reference_distance_m / depth_m`. Returns
/// `None` for an absent or non-positive depth reading.
pub fn estimate_scale(
    depth_m: f64,
    reference_pixels_per_mm: f64,
    reference_distance_m: f64,
) -> Option<f64> {
    if !depth_m.is_finite() || depth_m <= 0. {
        return None;
    }

    Some(reference_pixels_per_mm * (reference_distance_m / depth_m))
}

/// The empirical reference pair for one camera, lens and resolution combination.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScaleCalibration {
    pub reference_pixels_per_mm: f64,
    pub reference_distance_m: f64,
}

impl Default for ScaleCalibration {
    fn default() -> Self {
        ScaleCalibration {
            reference_pixels_per_mm: 2.45,
            reference_distance_m: 0.25,
        }
    }
}

impl ScaleCalibration {
    pub fn new(reference_pixels_per_mm: f64, reference_distance_m: f64) -> Self {
        ScaleCalibration {
            reference_pixels_per_mm,
            reference_distance_m,
        }
    }

    /// Derives a calibration from one image of a part with a known diameter.
    pub fn from_measurement(
        known_diameter_mm: f64,
        measured_radius_px: f64,
        distance_m: f64,
    ) -> Option<Self> {
        let valid = |value: f64| value.is_finite() && value > 0.;

        if !(valid(known_diameter_mm) && valid(measured_radius_px) && valid(distance_m)) {
            return None;
        }

        Some(ScaleCalibration {
            reference_pixels_per_mm: 2. * measured_radius_px / known_diameter_mm,
            reference_distance_m: distance_m,
        })
    }

    pub fn pixels_per_mm(&self, depth_m: f64) -> Option<f64> {
        estimate_scale(
            depth_m,
            self.reference_pixels_per_mm,
            self.reference_distance_m,
        )
    }

    pub fn diameter_mm(&self, radius_px: f64, depth_m: f64) -> Option<f64> {
        self.pixels_per_mm(depth_m)
            .map(|pixels_per_mm| 2. * radius_px / pixels_per_mm)
    }
}

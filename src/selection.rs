use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    detection::ContourDetector,
    scale::ScaleCalibration,
    types::{Circle, Contour},
};

/// Exclusive bounds on contour area over enclosing-circle area.
pub const MIN_CIRCULARITY: f64 = 0.7;
pub const MAX_CIRCULARITY: f64 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SelectionConfig {
    pub calibration: ScaleCalibration,
    pub min_diameter_mm: f64,
    pub max_diameter_mm: f64,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        SelectionConfig {
            calibration: ScaleCalibration::default(),
            min_diameter_mm: 40.,
            max_diameter_mm: 180.,
        }
    }
}

/// A contour that passed the circularity and size screens.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub contour: Contour,
    pub circle: Circle,
    pub circularity: f64,
    pub depth_m: f64,
    pub pixels_per_mm: f64,
    pub diameter_mm: f64,
}

/// Why a frame produced no candidate. Each is a retry-next-frame condition.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Rejection {
    NoContours,
    NotCircular { circularity: f64 },
    NoDepth,
    DiameterOutOfRange { diameter_mm: f64 },
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::NoContours => write!(f, "no contours found"),
            Rejection::NotCircular { circularity } => {
                write!(f, "not circular enough (circularity {:.3})", circularity)
            }
            Rejection::NoDepth => write!(f, "no depth at the contour center"),
            Rejection::DiameterOutOfRange { diameter_mm } => {
                write!(f, "diameter out of range ({:.2} mm)", diameter_mm)
            }
        }
    }
}

pub fn is_circular(circularity: f64) -> bool {
    circularity > MIN_CIRCULARITY && circularity < MAX_CIRCULARITY
}

/// Index of the contour with the largest enclosed area, first one on ties.
pub fn largest_contour<D: ContourDetector + ?Sized>(
    contours: &[Contour],
    detector: &D,
) -> Option<(usize, f64)> {
    contours
        .iter()
        .enumerate()
        .fold(None, |best, (idx, contour)| {
            let area = detector.contour_area(contour);

            match best {
                Some((_, best_area)) if area <= best_area => best,
                _ => Some((idx, area)),
            }
        })
}

/// Picks the largest contour and screens it as a gear.
///
/// Only the largest contour is ever considered; when it fails a check the frame is
/// rejected and the caller retries on the next frame. `depth_at` returns the depth
/// in meters at a pixel.
pub fn select_candidate<D, F>(
    contours: Vec<Contour>,
    depth_at: F,
    detector: &D,
    config: &SelectionConfig,
) -> Result<Candidate, Rejection>
where
    D: ContourDetector + ?Sized,
    F: Fn(i64, i64) -> f64,
{
    let (idx, area) = largest_contour(&contours, detector).ok_or_else(|| {
        debug!("no contours found");
        Rejection::NoContours
    })?;

    let contour = contours.into_iter().nth(idx).ok_or(Rejection::NoContours)?;

    let circle = match detector.min_enclosing_circle(&contour) {
        Some(circle) if circle.radius > 0. => circle,
        _ => {
            debug!("contour has no extent");
            return Err(Rejection::NotCircular { circularity: 0. });
        }
    };

    let circularity = area / circle.area();
    if !is_circular(circularity) {
        debug!(circularity, "contour not circular enough");
        return Err(Rejection::NotCircular { circularity });
    }

    let (center_x, center_y) = circle.center_pixel();
    let depth_m = depth_at(center_x, center_y);

    let pixels_per_mm = match config.calibration.pixels_per_mm(depth_m) {
        Some(pixels_per_mm) => pixels_per_mm,
        None => {
            debug!(depth_m, center_x, center_y, "no valid depth at contour center");
            return Err(Rejection::NoDepth);
        }
    };

    let diameter_mm = 2. * circle.radius / pixels_per_mm;
    if diameter_mm < config.min_diameter_mm || diameter_mm > config.max_diameter_mm {
        debug!(
            diameter_mm,
            min = config.min_diameter_mm,
            max = config.max_diameter_mm,
            "diameter out of range"
        );
        return Err(Rejection::DiameterOutOfRange { diameter_mm });
    }

    Ok(Candidate {
        contour,
        circle,
        circularity,
        depth_m,
        pixels_per_mm,
        diameter_mm,
    })
}

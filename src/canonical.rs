use serde::{Deserialize, Serialize};

use crate::{
    selection::Candidate,
    types::{Contour, Point},
};

/// Start points whose angle falls in this band landed on the far side of the part.
pub const HALF_TURN_BAND: (f64, f64) = (170., 190.);

/// How the first point of the canonical contour is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StartPointMode {
    /// The point nearest the vertical line through the center.
    #[default]
    VerticalProximity,
    /// The point with the largest pixel `y`.
    Extremal,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PolarPoint {
    pub distance_mm: f64,
    pub angle_deg: f64,
}

/// A candidate's boundary as center-relative polar coordinates, starting at the
/// designated start point and keeping the source traversal order.
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalContour {
    pub points: Vec<PolarPoint>,
    /// Source pixels in the rotated order, index-aligned with `points`.
    pub pixels: Vec<Point>,
    pub start_index: usize,
    pub start_pixel: Point,
    /// Angle of the start point before any half-turn correction.
    pub first_angle_deg: f64,
    pub shifted: bool,
}

impl CanonicalContour {
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn distances(&self) -> Vec<f64> {
        self.points.iter().map(|point| point.distance_mm).collect()
    }

    pub fn angles(&self) -> Vec<f64> {
        self.points.iter().map(|point| point.angle_deg).collect()
    }
}

/// Reduces an angle into `[0, 360)`.
pub fn normalize_degrees(angle_deg: f64) -> f64 {
    let reduced = angle_deg.rem_euclid(360.);

    // rem_euclid can round up to exactly 360 for tiny negative inputs.
    if reduced >= 360. {
        0.
    } else {
        reduced
    }
}

/// Projects a pixel into millimeters around `center`, with 0° pointing up in the
/// image and angles increasing clockwise on screen.
pub fn project(point: Point, center: (f64, f64), pixels_per_mm: f64) -> PolarPoint {
    let mm_x = (point.x as f64 - center.0) / pixels_per_mm;
    let mm_y = (point.y as f64 - center.1) / pixels_per_mm;

    PolarPoint {
        distance_mm: mm_x.hypot(mm_y),
        angle_deg: normalize_degrees(mm_y.atan2(mm_x).to_degrees() + 90.),
    }
}

pub fn needs_half_turn(first_angle_deg: f64) -> bool {
    first_angle_deg >= HALF_TURN_BAND.0 && first_angle_deg <= HALF_TURN_BAND.1
}

/// Index of the start point in traversal order; the first occurrence wins ties.
pub fn find_start_index(contour: &Contour, center_x: f64, mode: StartPointMode) -> Option<usize> {
    let (first_idx, _) = contour.iter().enumerate().fold(None, |best, (idx, point)| {
        let key = match mode {
            StartPointMode::VerticalProximity => -(point.x as f64 - center_x).abs(),
            StartPointMode::Extremal => point.y as f64,
        };

        match best {
            Some((_, best_key)) if key <= best_key => best,
            _ => Some((idx, key)),
        }
    })?;

    Some(first_idx)
}

/// Rotates the candidate's contour to its start point and projects every point.
///
/// The half-turn correction is decided once from the start point's uncorrected
/// angle, so re-running this on the same candidate gives the same output.
pub fn canonicalize(candidate: &Candidate, mode: StartPointMode) -> CanonicalContour {
    let center = (candidate.circle.cx, candidate.circle.cy);
    let scale = candidate.pixels_per_mm;

    let start_index = match find_start_index(&candidate.contour, center.0, mode) {
        Some(idx) => idx,
        None => {
            let (x, y) = candidate.circle.center_pixel();
            return CanonicalContour {
                points: Vec::new(),
                pixels: Vec::new(),
                start_index: 0,
                start_pixel: Point::new(x as i32, y as i32),
                first_angle_deg: 0.,
                shifted: false,
            };
        }
    };

    let mut pixels = candidate.contour.points.clone();
    pixels.rotate_left(start_index);

    let start_pixel = pixels[0];
    let first_angle_deg = project(start_pixel, center, scale).angle_deg;
    let shifted = needs_half_turn(first_angle_deg);

    let points = pixels
        .iter()
        .map(|&pixel| {
            let polar = project(pixel, center, scale);

            if shifted {
                PolarPoint {
                    angle_deg: normalize_degrees(polar.angle_deg + 180.),
                    ..polar
                }
            } else {
                polar
            }
        })
        .collect();

    CanonicalContour {
        points,
        pixels,
        start_index,
        start_pixel,
        first_angle_deg,
        shifted,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{selection::tests::regular_polygon, types::Circle};
    use approx::assert_relative_eq;

    fn candidate(contour: Contour, circle: Circle, pixels_per_mm: f64) -> Candidate {
        Candidate {
            contour,
            circle,
            circularity: 0.9,
            depth_m: 0.25,
            pixels_per_mm,
            diameter_mm: 2. * circle.radius / pixels_per_mm,
        }
    }

    /// Angular-order circle starting at 3 o'clock, clockwise on screen.
    fn circle_contour(radius: f64, center: (f64, f64), count: usize) -> Contour {
        regular_polygon(count, radius, center)
    }

    #[test]
    fn projection_puts_zero_degrees_at_the_top() {
        let center = (100., 100.);

        assert_relative_eq!(project(Point::new(100, 50), center, 1.).angle_deg, 0.);
        assert_relative_eq!(project(Point::new(150, 100), center, 1.).angle_deg, 90.);
        assert_relative_eq!(project(Point::new(100, 150), center, 1.).angle_deg, 180.);
        assert_relative_eq!(project(Point::new(50, 100), center, 1.).angle_deg, 270.);
        assert_relative_eq!(project(Point::new(130, 140), center, 2.).distance_mm, 25.);
    }

    #[test]
    fn normalized_angles_stay_below_360() {
        assert_eq!(normalize_degrees(360.), 0.);
        assert_eq!(normalize_degrees(-1e-20), 0.);
        assert_relative_eq!(normalize_degrees(-90.), 270.);
        assert_relative_eq!(normalize_degrees(450.), 90.);
    }

    #[test]
    fn rotation_preserves_order_and_points() {
        let contour = circle_contour(60., (200., 150.), 48);
        let cand = candidate(contour.clone(), Circle::new(200., 150., 60.), 2.45);

        let canonical = canonicalize(&cand, StartPointMode::VerticalProximity);
        assert_eq!(canonical.len(), contour.len());

        let start = canonical.start_index;
        for (offset, pixel) in canonical.pixels.iter().enumerate() {
            assert_eq!(*pixel, contour[(start + offset) % contour.len()]);
        }

        let mut original = contour.points.clone();
        let mut rotated = canonical.pixels.clone();
        original.sort_by_key(|p| (p.x, p.y));
        rotated.sort_by_key(|p| (p.x, p.y));
        assert_eq!(original, rotated);
    }

    #[test]
    fn vertical_proximity_picks_the_first_point_on_the_center_line() {
        // Points 12 (bottom, angle 180) and 36 (top, angle 0) both sit on x = 200.
        let contour = circle_contour(60., (200., 150.), 48);
        let cand = candidate(contour.clone(), Circle::new(200., 150., 60.), 2.45);

        let canonical = canonicalize(&cand, StartPointMode::VerticalProximity);

        assert_eq!(canonical.start_index, 12);
        assert_eq!(canonical.start_pixel, Point::new(200, 210));
        assert_relative_eq!(canonical.first_angle_deg, 180.);
        assert!(canonical.shifted);
        assert_relative_eq!(canonical.points[0].angle_deg, 0.);
    }

    #[test]
    fn start_on_the_near_side_is_not_shifted() {
        let mut points = circle_contour(60., (200., 150.), 48).points;
        // Begin the traversal at the top so the top point is found first.
        points.rotate_left(30);
        let cand = candidate(Contour::new(points), Circle::new(200., 150., 60.), 2.45);

        let canonical = canonicalize(&cand, StartPointMode::VerticalProximity);

        assert_eq!(canonical.start_pixel, Point::new(200, 90));
        assert!(!canonical.shifted);
        assert_relative_eq!(canonical.points[0].angle_deg, 0.);
    }

    #[test]
    fn extremal_mode_starts_at_the_largest_y() {
        let contour = Contour::new(vec![
            Point::new(10, 0),
            Point::new(20, 10),
            Point::new(10, 20),
            Point::new(0, 10),
            Point::new(11, 20),
        ]);
        let cand = candidate(contour, Circle::new(10., 10., 10.), 1.);

        let canonical = canonicalize(&cand, StartPointMode::Extremal);

        assert_eq!(canonical.start_index, 2);
        assert_eq!(canonical.pixels[0], Point::new(10, 20));
        assert_eq!(canonical.pixels[4], Point::new(20, 10));
        assert!(canonical.shifted);
    }

    #[test]
    fn half_turn_is_applied_once() {
        let contour = circle_contour(60., (200., 150.), 48);
        let cand = candidate(contour, Circle::new(200., 150., 60.), 2.45);

        let first = canonicalize(&cand, StartPointMode::VerticalProximity);
        let second = canonicalize(&cand, StartPointMode::VerticalProximity);
        assert_eq!(first, second);

        // Every angle moved by exactly 180 degrees relative to the raw projection.
        for (pixel, point) in first.pixels.iter().zip(&first.points) {
            let raw = project(*pixel, (200., 150.), 2.45).angle_deg;
            let delta = normalize_degrees(point.angle_deg - raw);
            assert_relative_eq!(delta, 180., epsilon = 1e-9);
        }
    }

    #[test]
    fn perfect_circle_round_trip() {
        let radius = 80.;
        let pixels_per_mm = 2.;
        // Integer-exact points on a circle: the 3-4-5 family scaled by 16.
        let offsets = [
            (80, 0),
            (64, 48),
            (48, 64),
            (0, 80),
            (-48, 64),
            (-64, 48),
            (-80, 0),
            (-64, -48),
            (-48, -64),
            (0, -80),
            (48, -64),
            (64, -48),
        ];
        let contour: Contour = offsets
            .iter()
            .map(|&(dx, dy)| Point::new(300 + dx, 200 + dy))
            .collect();
        let cand = candidate(contour, Circle::new(300., 200., radius), pixels_per_mm);

        let canonical = canonicalize(&cand, StartPointMode::VerticalProximity);

        for point in &canonical.points {
            assert_relative_eq!(point.distance_mm, radius / pixels_per_mm, epsilon = 1e-9);
            assert!(point.angle_deg >= 0. && point.angle_deg < 360.);
        }

        let wraps = canonical
            .points
            .windows(2)
            .filter(|pair| pair[1].angle_deg < pair[0].angle_deg)
            .count();
        assert!(wraps <= 1, "angles wrapped {} times", wraps);
    }

    #[test]
    fn empty_contour_yields_empty_canonical_form() {
        let cand = candidate(Contour::default(), Circle::new(5.2, 7.8, 1.), 1.);
        let canonical = canonicalize(&cand, StartPointMode::Extremal);

        assert!(canonical.is_empty());
        assert_eq!(canonical.start_pixel, Point::new(5, 8));
    }
}

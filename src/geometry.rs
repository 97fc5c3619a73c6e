//! Planar helpers for closed pixel contours.

use nalgebra::{Point2, Vector2};
use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};

use crate::types::{Circle, Point};

const CONTAINMENT_EPSILON: f64 = 1e-7;
const SHUFFLE_SEED: u64 = 4904;

/// Signed shoelace area, positive for counter-clockwise traversal in a y-up frame.
pub fn signed_area(points: &[Point]) -> f64 {
    let num_points = points.len();
    if num_points < 3 {
        return 0.;
    }

    let twice_area = (0..num_points).fold(0., |acc, idx| {
        let p0 = points[idx];
        let p1 = points[(idx + 1) % num_points];

        acc + p0.x as f64 * p1.y as f64 - p1.x as f64 * p0.y as f64
    });

    twice_area / 2.
}

/// Enclosed area of the closed polygon through `points`.
pub fn contour_area(points: &[Point]) -> f64 {
    signed_area(points).abs()
}

/// Smallest circle containing every point, or `None` for an empty slice.
///
/// Welzl's incremental algorithm over a shuffled copy of the points. The shuffle is
/// seeded so the result does not depend on run order.
pub fn min_enclosing_circle(points: &[Point]) -> Option<Circle> {
    let mut points: Vec<Point2<f64>> = points
        .iter()
        .map(|point| Point2::new(point.x as f64, point.y as f64))
        .collect();

    let first = *points.first()?;
    points.shuffle(&mut StdRng::seed_from_u64(SHUFFLE_SEED));

    let mut circle = Disc::single(first);

    for i in 0..points.len() {
        if circle.contains(&points[i]) {
            continue;
        }

        circle = Disc::single(points[i]);
        for j in 0..i {
            if circle.contains(&points[j]) {
                continue;
            }

            circle = Disc::diametral(points[i], points[j]);
            for k in 0..j {
                if !circle.contains(&points[k]) {
                    circle = Disc::through(points[i], points[j], points[k]);
                }
            }
        }
    }

    Some(Circle::new(circle.center.x, circle.center.y, circle.radius))
}

#[derive(Debug, Clone, Copy)]
struct Disc {
    center: Point2<f64>,
    radius: f64,
}

impl Disc {
    fn single(center: Point2<f64>) -> Self {
        Disc { center, radius: 0. }
    }

    fn diametral(a: Point2<f64>, b: Point2<f64>) -> Self {
        Disc {
            center: nalgebra::center(&a, &b),
            radius: (b - a).norm() / 2.,
        }
    }

    fn through(a: Point2<f64>, b: Point2<f64>, c: Point2<f64>) -> Self {
        let ab: Vector2<f64> = b - a;
        let ac: Vector2<f64> = c - a;
        let det = 2. * (ab.x * ac.y - ab.y * ac.x);

        if det.abs() < f64::EPSILON {
            // Collinear: the widest pair spans the other point.
            return [
                Disc::diametral(a, b),
                Disc::diametral(a, c),
                Disc::diametral(b, c),
            ]
            .into_iter()
            .fold(Disc::single(a), |widest, disc| {
                if disc.radius > widest.radius {
                    disc
                } else {
                    widest
                }
            });
        }

        let ab_sq = ab.norm_squared();
        let ac_sq = ac.norm_squared();
        let offset = Vector2::new(
            (ac.y * ab_sq - ab.y * ac_sq) / det,
            (ab.x * ac_sq - ac.x * ab_sq) / det,
        );

        Disc {
            center: a + offset,
            radius: offset.norm(),
        }
    }

    fn contains(&self, point: &Point2<f64>) -> bool {
        (point - self.center).norm() <= self.radius + CONTAINMENT_EPSILON * self.radius.max(1.)
    }
}

use std::ops::Index;

use image::RgbImage;
use ndarray::Array2;
use serde::{Deserialize, Serialize};

/// Integer pixel coordinate, `x` to the right and `y` down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub const fn new(x: i32, y: i32) -> Self {
        Point { x, y }
    }
}

impl From<(i32, i32)> for Point {
    fn from((x, y): (i32, i32)) -> Self {
        Point { x, y }
    }
}

/// A closed boundary in traversal order. The last point connects back to the first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Contour {
    pub points: Vec<Point>,
}

impl Contour {
    pub fn new(points: Vec<Point>) -> Self {
        Contour { points }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Point> {
        self.points.iter()
    }
}

impl Index<usize> for Contour {
    type Output = Point;

    fn index(&self, index: usize) -> &Point {
        &self.points[index]
    }
}

impl FromIterator<Point> for Contour {
    fn from_iter<T: IntoIterator<Item = Point>>(iter: T) -> Self {
        Contour {
            points: iter.into_iter().collect(),
        }
    }
}

impl From<Vec<Point>> for Contour {
    fn from(points: Vec<Point>) -> Self {
        Contour { points }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Circle {
    pub cx: f64,
    pub cy: f64,
    pub radius: f64,
}

impl Circle {
    pub const fn new(cx: f64, cy: f64, radius: f64) -> Self {
        Circle { cx, cy, radius }
    }

    pub fn area(&self) -> f64 {
        std::f64::consts::PI * self.radius * self.radius
    }

    /// Center rounded to the nearest pixel.
    pub fn center_pixel(&self) -> (i64, i64) {
        (self.cx.round() as i64, self.cy.round() as i64)
    }
}

/// Color and depth captured at the same instant.
///
/// Depth is stored in meters, indexed `[row, col]`. A reading of zero (or any
/// non-finite or negative value) means the sensor had no valid depth there.
#[derive(Debug, Clone)]
pub struct Frame {
    pub sequence: u64,
    pub color: RgbImage,
    pub depth: Array2<f32>,
}

impl Frame {
    pub fn new(sequence: u64, color: RgbImage, depth: Array2<f32>) -> Self {
        Frame {
            sequence,
            color,
            depth,
        }
    }

    /// Builds a frame whose depth reads `depth_m` everywhere.
    pub fn with_uniform_depth(sequence: u64, color: RgbImage, depth_m: f32) -> Self {
        let (width, height) = color.dimensions();
        let depth = Array2::from_elem((height as usize, width as usize), depth_m);

        Frame::new(sequence, color, depth)
    }

    pub fn width(&self) -> u32 {
        self.color.width()
    }

    pub fn height(&self) -> u32 {
        self.color.height()
    }

    /// Distance in meters at pixel `(x, y)`, `0.0` when absent or out of bounds.
    pub fn distance_at(&self, x: i64, y: i64) -> f32 {
        if x < 0 || y < 0 {
            return 0.;
        }

        self.depth
            .get((y as usize, x as usize))
            .copied()
            .filter(|depth| depth.is_finite() && *depth > 0.)
            .unwrap_or(0.)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distance_at_handles_bounds_and_invalid_readings() {
        let mut frame = Frame::with_uniform_depth(0, RgbImage::new(4, 3), 0.3);
        frame.depth[[1, 2]] = f32::NAN;
        frame.depth[[2, 0]] = -1.;

        assert_eq!(frame.distance_at(0, 0), 0.3);
        assert_eq!(frame.distance_at(2, 1), 0.);
        assert_eq!(frame.distance_at(0, 2), 0.);
        assert_eq!(frame.distance_at(4, 0), 0.);
        assert_eq!(frame.distance_at(-1, 0), 0.);
    }

    #[test]
    fn circle_center_rounds_to_nearest_pixel() {
        assert_eq!(Circle::new(10.6, 3.4, 1.).center_pixel(), (11, 3));
    }
}

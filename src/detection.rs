use image::{imageops, GrayImage, RgbImage};
use imageproc::{
    contours::{self, BorderType},
    edges, filter,
};
use tracing::trace;

use crate::{
    geometry,
    types::{Circle, Contour, Point},
};

#[cfg(feature = "opencv")]
mod opencv_backend;

#[cfg(feature = "opencv")]
pub use opencv_backend::OpenCvContourDetector;

/// The perception primitives the acquisition loop relies on.
///
/// Implementors turn a color image into the outermost boundaries of the edges
/// found in it. The circle fit and area default to the pure-Rust versions in
/// [`geometry`]; a backend with its own primitives may override them.
pub trait ContourDetector {
    fn find_external_contours(&self, image: &RgbImage) -> Vec<Contour>;

    fn min_enclosing_circle(&self, contour: &Contour) -> Option<Circle> {
        geometry::min_enclosing_circle(&contour.points)
    }

    fn contour_area(&self, contour: &Contour) -> f64 {
        geometry::contour_area(&contour.points)
    }
}

impl<D: ContourDetector + ?Sized> ContourDetector for Box<D> {
    fn find_external_contours(&self, image: &RgbImage) -> Vec<Contour> {
        (**self).find_external_contours(image)
    }

    fn min_enclosing_circle(&self, contour: &Contour) -> Option<Circle> {
        (**self).min_enclosing_circle(contour)
    }

    fn contour_area(&self, contour: &Contour) -> f64 {
        (**self).contour_area(contour)
    }
}

/// The detector this build prefers: OpenCV when the `opencv` feature is on.
#[cfg(feature = "opencv")]
pub fn default_detector(
    edge_low: f32,
    edge_high: f32,
    blur_sigma: f32,
) -> Box<dyn ContourDetector> {
    Box::new(
        OpenCvContourDetector::new(edge_low as f64, edge_high as f64).with_blur(blur_sigma as f64),
    )
}

#[cfg(not(feature = "opencv"))]
pub fn default_detector(
    edge_low: f32,
    edge_high: f32,
    blur_sigma: f32,
) -> Box<dyn ContourDetector> {
    Box::new(EdgeContourDetector::new(edge_low, edge_high).with_blur(blur_sigma))
}

/// Grayscale, optional blur, Canny, then outer-border tracing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EdgeContourDetector {
    edge_low: f32,
    edge_high: f32,
    blur_sigma: f32,
}

impl EdgeContourDetector {
    pub fn new(edge_low: f32, edge_high: f32) -> Self {
        EdgeContourDetector {
            edge_low,
            edge_high,
            blur_sigma: 0.,
        }
    }

    /// Blur before edge detection. A sigma of zero disables the blur.
    pub fn with_blur(self, blur_sigma: f32) -> Self {
        EdgeContourDetector { blur_sigma, ..self }
    }

    pub fn edges(&self, image: &RgbImage) -> GrayImage {
        let gray = imageops::grayscale(image);

        let smoothed = if self.blur_sigma > 0. {
            filter::gaussian_blur_f32(&gray, self.blur_sigma)
        } else {
            gray
        };

        edges::canny(&smoothed, self.edge_low, self.edge_high)
    }
}

impl ContourDetector for EdgeContourDetector {
    fn find_external_contours(&self, image: &RgbImage) -> Vec<Contour> {
        let edge_image = self.edges(image);

        let external: Vec<Contour> = contours::find_contours::<i32>(&edge_image)
            .into_iter()
            .filter(|contour| contour.parent.is_none() && contour.border_type == BorderType::Outer)
            .map(|contour| {
                contour
                    .points
                    .iter()
                    .map(|point| Point::new(point.x, point.y))
                    .collect()
            })
            .collect();

        trace!(count = external.len(), "traced external contours");

        external
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn disc_image(width: u32, height: u32, center: (f64, f64), radius: f64) -> RgbImage {
        RgbImage::from_fn(width, height, |x, y| {
            let dx = x as f64 - center.0;
            let dy = y as f64 - center.1;

            if (dx * dx + dy * dy).sqrt() <= radius {
                Rgb([210, 210, 210])
            } else {
                Rgb([20, 20, 20])
            }
        })
    }

    #[test]
    fn blank_image_has_no_contours() {
        let detector = EdgeContourDetector::new(25., 150.);
        let image = RgbImage::from_pixel(64, 48, Rgb([90, 90, 90]));

        assert!(detector.find_external_contours(&image).is_empty());
    }

    #[test]
    fn disc_boundary_is_traced_as_one_circular_contour() {
        let detector = EdgeContourDetector::new(25., 150.);
        let image = disc_image(120, 110, (60., 55.), 35.);

        let contours = detector.find_external_contours(&image);
        let largest = contours
            .iter()
            .max_by(|a, b| {
                detector
                    .contour_area(a)
                    .partial_cmp(&detector.contour_area(b))
                    .unwrap()
            })
            .unwrap();

        let circle = detector.min_enclosing_circle(largest).unwrap();
        assert!((circle.cx - 60.).abs() < 2., "center x {}", circle.cx);
        assert!((circle.cy - 55.).abs() < 2., "center y {}", circle.cy);
        assert!((circle.radius - 35.).abs() < 3., "radius {}", circle.radius);

        let circularity = detector.contour_area(largest) / circle.area();
        assert!(circularity > 0.8 && circularity < 1.0, "{}", circularity);
    }

    #[test]
    fn blur_keeps_the_boundary() {
        let detector = EdgeContourDetector::new(25., 150.).with_blur(1.0);
        let image = disc_image(100, 100, (50., 50.), 30.);

        assert!(!detector.find_external_contours(&image).is_empty());
    }
}

use image::{imageops, RgbImage};
use opencv::{
    core::{Mat, Point as CvPoint, Point2f, Scalar, Size, Vector, CV_8UC1},
    imgproc,
    prelude::*,
};
use tracing::warn;

use super::ContourDetector;
use crate::types::{Circle, Contour, Point};

/// The same edge-and-trace steps as [`super::EdgeContourDetector`], run through OpenCV.
pub struct OpenCvContourDetector {
    edge_low: f64,
    edge_high: f64,
    blur_sigma: f64,
}

impl OpenCvContourDetector {
    pub fn new(edge_low: f64, edge_high: f64) -> Self {
        OpenCvContourDetector {
            edge_low,
            edge_high,
            blur_sigma: 0.,
        }
    }

    pub fn with_blur(self, blur_sigma: f64) -> Self {
        OpenCvContourDetector { blur_sigma, ..self }
    }

    fn gray_mat(image: &RgbImage) -> opencv::Result<Mat> {
        let gray = imageops::grayscale(image);
        let mut mat = Mat::new_rows_cols_with_default(
            gray.height() as i32,
            gray.width() as i32,
            CV_8UC1,
            Scalar::all(0.),
        )?;
        mat.data_bytes_mut()?.copy_from_slice(gray.as_raw());

        Ok(mat)
    }

    fn find_contours(&self, image: &RgbImage) -> opencv::Result<Vector<Vector<CvPoint>>> {
        let gray = Self::gray_mat(image)?;

        let smoothed = if self.blur_sigma > 0. {
            let mut blurred = Mat::default();
            imgproc::gaussian_blur_def(&gray, &mut blurred, Size::new(0, 0), self.blur_sigma)?;
            blurred
        } else {
            gray
        };

        let mut edges = Mat::default();
        imgproc::canny(&smoothed, &mut edges, self.edge_low, self.edge_high, 3, false)?;

        let mut contours = Vector::<Vector<CvPoint>>::new();
        imgproc::find_contours(
            &edges,
            &mut contours,
            imgproc::RETR_EXTERNAL,
            imgproc::CHAIN_APPROX_NONE,
            CvPoint::new(0, 0),
        )?;

        Ok(contours)
    }

    fn to_cv(contour: &Contour) -> Vector<CvPoint> {
        contour
            .iter()
            .map(|point| CvPoint::new(point.x, point.y))
            .collect()
    }
}

impl ContourDetector for OpenCvContourDetector {
    fn find_external_contours(&self, image: &RgbImage) -> Vec<Contour> {
        match self.find_contours(image) {
            Ok(contours) => contours
                .iter()
                .map(|contour| {
                    contour
                        .iter()
                        .map(|point| Point::new(point.x, point.y))
                        .collect()
                })
                .collect(),
            Err(err) => {
                warn!(%err, "OpenCV contour extraction failed");
                Vec::new()
            }
        }
    }

    fn min_enclosing_circle(&self, contour: &Contour) -> Option<Circle> {
        if contour.is_empty() {
            return None;
        }

        let mut center = Point2f::default();
        let mut radius = 0f32;

        match imgproc::min_enclosing_circle(&Self::to_cv(contour), &mut center, &mut radius) {
            Ok(()) => Some(Circle::new(center.x as f64, center.y as f64, radius as f64)),
            Err(err) => {
                warn!(%err, "OpenCV enclosing circle fit failed");
                None
            }
        }
    }

    fn contour_area(&self, contour: &Contour) -> f64 {
        imgproc::contour_area(&Self::to_cv(contour), false).unwrap_or_else(|err| {
            warn!(%err, "OpenCV contour area failed");
            0.
        })
    }
}

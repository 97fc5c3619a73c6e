use std::time::Duration;

use tracing::{debug, warn};

use crate::{
    canonical::{canonicalize, CanonicalContour, StartPointMode},
    detection::ContourDetector,
    error::SensorError,
    selection::{select_candidate, Candidate, Rejection, SelectionConfig},
    sensor::Sensor,
    types::Frame,
};

/// A screened gear and its canonical contour.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub candidate: Candidate,
    pub contour: CanonicalContour,
}

/// What one pass over the pipeline produced.
#[derive(Debug, Clone, PartialEq)]
pub enum FrameOutcome {
    NoFrame,
    Rejected(Rejection),
    Accepted(Detection),
}

/// Contours, selection and canonicalization for a single frame.
pub fn analyze_frame<D: ContourDetector + ?Sized>(
    frame: &Frame,
    detector: &D,
    selection: &SelectionConfig,
    mode: StartPointMode,
) -> Result<Detection, Rejection> {
    let contours = detector.find_external_contours(&frame.color);
    debug!(frame = frame.sequence, contours = contours.len(), "contours extracted");

    let candidate = select_candidate(
        contours,
        |x, y| frame.distance_at(x, y) as f64,
        detector,
        selection,
    )?;
    let contour = canonicalize(&candidate, mode);

    Ok(Detection { candidate, contour })
}

pub struct VisionPipeline<S, D> {
    sensor: S,
    detector: D,
    selection: SelectionConfig,
    mode: StartPointMode,
    frame_timeout: Duration,
}

impl<S, D> VisionPipeline<S, D>
where
    S: Sensor,
    D: ContourDetector,
{
    pub fn new(
        sensor: S,
        detector: D,
        selection: SelectionConfig,
        mode: StartPointMode,
        frame_timeout: Duration,
    ) -> Self {
        VisionPipeline {
            sensor,
            detector,
            selection,
            mode,
            frame_timeout,
        }
    }

    pub fn open(&mut self) -> Result<(), SensorError> {
        self.sensor.open()
    }

    pub fn close(&mut self) {
        self.sensor.close()
    }

    /// Reads one frame pair and analyzes it. Sensor errors are logged and count
    /// as a missing frame.
    pub fn run(&mut self) -> FrameOutcome {
        let frame = match self.sensor.read_frame_pair(self.frame_timeout) {
            Ok(Some(frame)) => frame,
            Ok(None) => return FrameOutcome::NoFrame,
            Err(err) => {
                warn!(%err, "failed to read frame pair");
                return FrameOutcome::NoFrame;
            }
        };

        match analyze_frame(&frame, &self.detector, &self.selection, self.mode) {
            Ok(detection) => FrameOutcome::Accepted(detection),
            Err(rejection) => FrameOutcome::Rejected(rejection),
        }
    }
}

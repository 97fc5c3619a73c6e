use std::{
    fs::File,
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

use tracing::debug;

use crate::{canonical::CanonicalContour, error::HandoffError};

pub const HEADER: &str = "Distance (mm),Angle (degrees)";

/// The coordinate file overwritten after every successful detection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsvArtifact {
    path: PathBuf,
}

impl CsvArtifact {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        CsvArtifact { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write(&self, contour: &CanonicalContour) -> Result<(), HandoffError> {
        let wrap = |source| HandoffError::Artifact {
            path: self.path.clone(),
            source,
        };

        let mut out = BufWriter::new(File::create(&self.path).map_err(wrap)?);
        writeln!(out, "{}", HEADER).map_err(wrap)?;
        for point in &contour.points {
            writeln!(out, "{},{}", point.distance_mm, point.angle_deg).map_err(wrap)?;
        }
        out.flush().map_err(wrap)?;

        debug!(path = %self.path.display(), rows = contour.len(), "coordinate file written");
        Ok(())
    }
}

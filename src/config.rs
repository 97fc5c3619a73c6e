use std::{fs, path::Path, path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{
    acquisition::AcquisitionSettings,
    canonical::StartPointMode,
    error::ConfigError,
    handoff::ControllerVariables,
    scale::ScaleCalibration,
    selection::SelectionConfig,
    sensor::SimulationConfig,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    pub address: String,
    pub local_port: u16,
    pub response_timeout_ms: u64,
    pub variables: ControllerVariables,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        ControllerConfig {
            address: "127.0.0.1:4826".to_string(),
            local_port: 0,
            response_timeout_ms: 500,
            variables: ControllerVariables::default(),
        }
    }
}

/// Everything the acquisition service reads from `config.json`. Missing keys take
/// their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub edge_low: f32,
    pub edge_high: f32,
    /// Gaussian blur before edge detection; 0 disables it.
    pub blur_sigma: f32,
    pub reference_pixels_per_mm: f64,
    pub reference_distance_m: f64,
    pub min_diameter_mm: f64,
    pub max_diameter_mm: f64,
    pub search_timeout_s: f64,
    pub start_point_mode: StartPointMode,
    pub trigger_poll_interval_ms: u64,
    pub frame_timeout_ms: u64,
    pub artifact_path: Option<PathBuf>,
    pub controller: ControllerConfig,
    pub simulation: SimulationConfig,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            edge_low: 25.,
            edge_high: 150.,
            blur_sigma: 0.,
            reference_pixels_per_mm: 2.45,
            reference_distance_m: 0.25,
            min_diameter_mm: 40.,
            max_diameter_mm: 180.,
            search_timeout_s: 10.,
            start_point_mode: StartPointMode::VerticalProximity,
            trigger_poll_interval_ms: 100,
            frame_timeout_ms: 5000,
            artifact_path: Some(PathBuf::from("contour_coordinates_mm_degrees.csv")),
            controller: ControllerConfig::default(),
            simulation: SimulationConfig::default(),
        }
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        Self::from_json_str(&text)
    }

    pub fn from_json_str(text: &str) -> Result<Config, ConfigError> {
        let config: Config = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |field, reason: &str| {
            Err(ConfigError::Invalid {
                field,
                reason: reason.to_string(),
            })
        };

        if !(self.edge_low >= 0. && self.edge_low <= self.edge_high) {
            return invalid("edge_low", "must be non-negative and at most edge_high");
        }
        if !(self.blur_sigma >= 0.) {
            return invalid("blur_sigma", "must be non-negative");
        }
        if !(self.reference_pixels_per_mm > 0. && self.reference_pixels_per_mm.is_finite()) {
            return invalid("reference_pixels_per_mm", "must be positive");
        }
        if !(self.reference_distance_m > 0. && self.reference_distance_m.is_finite()) {
            return invalid("reference_distance_m", "must be positive");
        }
        if !(self.min_diameter_mm >= 0. && self.min_diameter_mm <= self.max_diameter_mm) {
            return invalid("min_diameter_mm", "must be non-negative and at most max_diameter_mm");
        }
        if !(self.search_timeout_s > 0.) || Duration::try_from_secs_f64(self.search_timeout_s).is_err() {
            return invalid("search_timeout_s", "must be positive and representable as a duration");
        }
        if self.trigger_poll_interval_ms == 0 {
            return invalid("trigger_poll_interval_ms", "must be positive");
        }
        if self.frame_timeout_ms == 0 {
            return invalid("frame_timeout_ms", "must be positive");
        }
        if !(0. ..=1.).contains(&self.simulation.drop_rate) {
            return invalid("simulation.drop_rate", "must be within [0, 1]");
        }
        if !(0. ..=1.).contains(&self.simulation.invalid_depth_rate) {
            return invalid("simulation.invalid_depth_rate", "must be within [0, 1]");
        }

        Ok(())
    }

    pub fn calibration(&self) -> ScaleCalibration {
        ScaleCalibration::new(self.reference_pixels_per_mm, self.reference_distance_m)
    }

    pub fn selection(&self) -> SelectionConfig {
        SelectionConfig {
            calibration: self.calibration(),
            min_diameter_mm: self.min_diameter_mm,
            max_diameter_mm: self.max_diameter_mm,
        }
    }

    pub fn search_timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.search_timeout_s).unwrap_or(Duration::MAX)
    }

    pub fn frame_timeout(&self) -> Duration {
        Duration::from_millis(self.frame_timeout_ms)
    }

    pub fn acquisition_settings(&self) -> AcquisitionSettings {
        AcquisitionSettings {
            search_timeout: self.search_timeout(),
            trigger_poll_interval: Duration::from_millis(self.trigger_poll_interval_ms),
        }
    }
}

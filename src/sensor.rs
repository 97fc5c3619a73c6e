use std::{f64::consts::PI, time::Duration};

use image::{Rgb, RgbImage};
use ndarray::Array2;
use rand::{rngs::StdRng, Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{clock::Clock, error::SensorError, types::Frame};

/// A color+depth camera.
pub trait Sensor {
    fn open(&mut self) -> Result<(), SensorError>;

    /// Waits up to `timeout` for the next frame pair. `Ok(None)` means nothing
    /// usable arrived and the caller should simply try again.
    fn read_frame_pair(&mut self, timeout: Duration) -> Result<Option<Frame>, SensorError>;

    fn close(&mut self);
}

impl<S: Sensor + ?Sized> Sensor for Box<S> {
    fn open(&mut self) -> Result<(), SensorError> {
        (**self).open()
    }

    fn read_frame_pair(&mut self, timeout: Duration) -> Result<Option<Frame>, SensorError> {
        (**self).read_frame_pair(timeout)
    }

    fn close(&mut self) {
        (**self).close()
    }
}

/// Scene parameters for [`SimulatedSensor`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub width: u32,
    pub height: u32,
    /// Gear center in pixels; the image center when absent.
    pub gear_center: Option<[f64; 2]>,
    /// Radius at the tooth tips.
    pub gear_radius_px: f64,
    pub teeth: u32,
    pub tooth_depth_px: f64,
    pub gear_visible: bool,
    pub gear_depth_m: f32,
    pub background_depth_m: f32,
    pub depth_noise_m: f32,
    pub pixel_noise: f32,
    /// Probability that a read yields no frame.
    pub drop_rate: f64,
    /// Probability that a frame's depth image is entirely invalid.
    pub invalid_depth_rate: f64,
    pub frame_interval_ms: u64,
    pub seed: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        SimulationConfig {
            width: 640,
            height: 480,
            gear_center: None,
            gear_radius_px: 100.,
            teeth: 24,
            tooth_depth_px: 8.,
            gear_visible: true,
            gear_depth_m: 0.3,
            background_depth_m: 0.45,
            depth_noise_m: 0.002,
            pixel_noise: 3.,
            drop_rate: 0.05,
            invalid_depth_rate: 0.05,
            frame_interval_ms: 33,
            seed: 4904,
        }
    }
}

impl SimulationConfig {
    pub fn center(&self) -> (f64, f64) {
        match self.gear_center {
            Some([x, y]) => (x, y),
            None => (self.width as f64 / 2., self.height as f64 / 2.),
        }
    }

    /// Boundary radius of the gear at `theta` radians, square teeth.
    pub fn profile_radius(&self, theta: f64) -> f64 {
        if self.teeth == 0 {
            return self.gear_radius_px;
        }

        let phase = (theta.rem_euclid(2. * PI) / (2. * PI) * self.teeth as f64).fract();
        if phase < 0.5 {
            self.gear_radius_px
        } else {
            self.gear_radius_px - self.tooth_depth_px
        }
    }

    pub fn contains(&self, x: f64, y: f64) -> bool {
        if !self.gear_visible {
            return false;
        }

        let (cx, cy) = self.center();
        let dx = x - cx;
        let dy = y - cy;

        dx.hypot(dy) <= self.profile_radius(dy.atan2(dx))
    }
}

/// Renders a bright gear on a dark table, with noise, dropped frames and depth
/// dropouts drawn from a seeded generator. Each read takes one frame interval on
/// the supplied clock.
pub struct SimulatedSensor<K> {
    config: SimulationConfig,
    clock: K,
    rng: StdRng,
    is_open: bool,
    sequence: u64,
}

impl<K: Clock> SimulatedSensor<K> {
    pub fn new(config: SimulationConfig, clock: K) -> Self {
        let rng = StdRng::seed_from_u64(config.seed);

        SimulatedSensor {
            config,
            clock,
            rng,
            is_open: false,
            sequence: 0,
        }
    }

    pub fn set_gear_visible(&mut self, visible: bool) {
        self.config.gear_visible = visible;
    }

    fn render(&mut self) -> Frame {
        let SimulationConfig {
            width,
            height,
            gear_depth_m,
            background_depth_m,
            depth_noise_m,
            pixel_noise,
            invalid_depth_rate,
            ..
        } = self.config;

        let pixel_noise = Normal::new(0., pixel_noise).ok().filter(|_| pixel_noise > 0.);
        let depth_noise = Normal::new(0., depth_noise_m)
            .ok()
            .filter(|_| depth_noise_m > 0.);
        let depth_dropout = self.rng.gen_bool(invalid_depth_rate.clamp(0., 1.));

        let mut color = RgbImage::new(width, height);
        let mut depth = Array2::<f32>::zeros((height as usize, width as usize));

        for y in 0..height {
            for x in 0..width {
                let inside = self.config.contains(x as f64, y as f64);

                let base: f32 = if inside { 200. } else { 35. };
                let noise = pixel_noise.map_or(0., |n| n.sample(&mut self.rng));
                let value = (base + noise).clamp(0., 255.) as u8;
                color.put_pixel(x, y, Rgb([value, value, value]));

                if !depth_dropout {
                    let reading = if inside { gear_depth_m } else { background_depth_m };
                    let noise = depth_noise.map_or(0., |n| n.sample(&mut self.rng));
                    depth[[y as usize, x as usize]] = (reading + noise).max(0.);
                }
            }
        }

        self.sequence += 1;
        Frame::new(self.sequence, color, depth)
    }
}

impl<K: Clock> Sensor for SimulatedSensor<K> {
    fn open(&mut self) -> Result<(), SensorError> {
        if self.config.width == 0 || self.config.height == 0 {
            return Err(SensorError::Device {
                message: format!(
                    "invalid stream size {}x{}",
                    self.config.width, self.config.height
                ),
            });
        }

        info!(
            width = self.config.width,
            height = self.config.height,
            "simulated sensor streaming"
        );
        self.is_open = true;
        Ok(())
    }

    fn read_frame_pair(&mut self, timeout: Duration) -> Result<Option<Frame>, SensorError> {
        if !self.is_open {
            return Err(SensorError::NotOpen);
        }

        let interval = Duration::from_millis(self.config.frame_interval_ms);
        if interval > timeout {
            self.clock.sleep(timeout);
            return Ok(None);
        }
        self.clock.sleep(interval);

        if self.rng.gen_bool(self.config.drop_rate.clamp(0., 1.)) {
            debug!("simulated frame dropped");
            return Ok(None);
        }

        Ok(Some(self.render()))
    }

    fn close(&mut self) {
        if self.is_open {
            info!(frames = self.sequence, "simulated sensor stopped");
        }
        self.is_open = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn small_scene() -> SimulationConfig {
        SimulationConfig {
            width: 160,
            height: 120,
            gear_radius_px: 40.,
            tooth_depth_px: 4.,
            teeth: 12,
            drop_rate: 0.,
            invalid_depth_rate: 0.,
            pixel_noise: 0.,
            depth_noise_m: 0.,
            frame_interval_ms: 100,
            ..SimulationConfig::default()
        }
    }

    #[test]
    fn reading_before_open_fails() {
        let mut sensor = SimulatedSensor::new(small_scene(), ManualClock::new());

        assert!(matches!(
            sensor.read_frame_pair(Duration::from_secs(1)),
            Err(SensorError::NotOpen)
        ));
    }

    #[test]
    fn frames_carry_gear_color_and_depth() {
        let clock = ManualClock::new();
        let mut sensor = SimulatedSensor::new(small_scene(), clock.clone());
        sensor.open().unwrap();

        let frame = sensor
            .read_frame_pair(Duration::from_secs(1))
            .unwrap()
            .unwrap();

        assert_eq!(clock.now(), Duration::from_millis(100));
        assert_eq!((frame.width(), frame.height()), (160, 120));
        assert_eq!(frame.color.get_pixel(80, 60)[0], 200);
        assert_eq!(frame.color.get_pixel(2, 2)[0], 35);
        assert_eq!(frame.distance_at(80, 60), 0.3);
        assert_eq!(frame.distance_at(2, 2), 0.45);
    }

    #[test]
    fn slow_frames_time_out_without_a_frame() {
        let clock = ManualClock::new();
        let mut sensor = SimulatedSensor::new(small_scene(), clock.clone());
        sensor.open().unwrap();

        let frame = sensor.read_frame_pair(Duration::from_millis(40)).unwrap();

        assert!(frame.is_none());
        assert_eq!(clock.now(), Duration::from_millis(40));
    }

    #[test]
    fn depth_dropout_zeroes_the_whole_frame() {
        let scene = SimulationConfig {
            invalid_depth_rate: 1.,
            ..small_scene()
        };
        let mut sensor = SimulatedSensor::new(scene, ManualClock::new());
        sensor.open().unwrap();

        let frame = sensor
            .read_frame_pair(Duration::from_secs(1))
            .unwrap()
            .unwrap();
        assert_eq!(frame.distance_at(80, 60), 0.);
    }

    #[test]
    fn hidden_gear_renders_an_empty_table() {
        let mut sensor = SimulatedSensor::new(small_scene(), ManualClock::new());
        sensor.set_gear_visible(false);
        sensor.open().unwrap();

        let frame = sensor
            .read_frame_pair(Duration::from_secs(1))
            .unwrap()
            .unwrap();
        assert!(frame.color.pixels().all(|pixel| pixel[0] == 35));
    }
}

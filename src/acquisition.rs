//! The trigger-driven search loop.
//!
//! Each session waits for the controller's start pulse, then reads frames until a
//! gear is accepted, the search times out, or the operator re-triggers. Results
//! are handed off before the ready flag is raised, so the controller never sees
//! "ready" ahead of the coordinates it belongs to.

use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use tracing::{debug, info};

use crate::{
    clock::Clock,
    detection::ContourDetector,
    error::SensorError,
    handoff::{Controller, Handoff},
    pipeline::{Detection, FrameOutcome, VisionPipeline},
    sensor::Sensor,
};

pub const STATUS_SEARCHING: &str = "Searching for gear";
pub const STATUS_RESTARTING: &str = "Restarting process";
pub const STATUS_TIMED_OUT: &str = "Timeout occurred. No gear found.";
pub const STATUS_FOUND: &str = "Gear found";
pub const STATUS_SENDING: &str = "Sending coordinates";
pub const STATUS_SENT: &str = "Coordinates successfully sent";
pub const STATUS_COMPLETED: &str = "Process completed";

pub const ACTION_WAITING: &str = "Waiting for start pulse...";
pub const ACTION_IDLE: &str = "Idle";
pub const ACTION_READY: &str = "Ready for new input";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquisitionState {
    Idle,
    Waiting,
    Searching,
    Succeeded,
    TimedOut,
    Restarting,
    Stopped,
}

impl fmt::Display for AcquisitionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AcquisitionSettings {
    pub search_timeout: Duration,
    pub trigger_poll_interval: Duration,
}

impl Default for AcquisitionSettings {
    fn default() -> Self {
        AcquisitionSettings {
            search_timeout: Duration::from_secs(10),
            trigger_poll_interval: Duration::from_millis(100),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionReport {
    pub diameter_mm: f64,
    pub pixels_per_mm: f64,
    pub depth_m: f64,
    pub point_count: usize,
    pub shifted: bool,
    /// Frames analyzed, the accepted one included.
    pub attempts: u32,
    pub elapsed: Duration,
    pub coordinates_sent: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionOutcome {
    Succeeded(SessionReport),
    TimedOut { attempts: u32 },
    Restarted { attempts: u32 },
    Stopped,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub sessions: usize,
    pub succeeded: usize,
    pub timed_out: usize,
    pub restarted: usize,
    pub stopped: bool,
}

impl RunSummary {
    fn record(&mut self, outcome: &SessionOutcome) {
        match outcome {
            SessionOutcome::Succeeded(_) => self.succeeded += 1,
            SessionOutcome::TimedOut { .. } => self.timed_out += 1,
            SessionOutcome::Restarted { .. } => self.restarted += 1,
            SessionOutcome::Stopped => {
                self.stopped = true;
                return;
            }
        }
        self.sessions += 1;
    }
}

/// Asks a running loop to wind down. Safe to trigger from another thread.
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub struct AcquisitionLoop<S, D, C, K> {
    pipeline: VisionPipeline<S, D>,
    handoff: Handoff<C>,
    clock: K,
    settings: AcquisitionSettings,
    state: AcquisitionState,
    stop: StopHandle,
}

impl<S, D, C, K> AcquisitionLoop<S, D, C, K>
where
    S: Sensor,
    D: ContourDetector,
    C: Controller,
    K: Clock,
{
    pub fn new(
        pipeline: VisionPipeline<S, D>,
        handoff: Handoff<C>,
        clock: K,
        settings: AcquisitionSettings,
    ) -> Self {
        AcquisitionLoop {
            pipeline,
            handoff,
            clock,
            settings,
            state: AcquisitionState::Idle,
            stop: StopHandle::new(),
        }
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn state(&self) -> AcquisitionState {
        self.state
    }

    fn transition(&mut self, next: AcquisitionState) {
        if self.state != next {
            info!(from = %self.state, to = %next, "acquisition state");
        }
        self.state = next;
    }

    /// Opens the sensor and lowers the ready flag.
    pub fn start(&mut self) -> Result<(), SensorError> {
        self.pipeline.open()?;
        self.handoff.ready_for_restart(false);
        self.transition(AcquisitionState::Idle);
        Ok(())
    }

    /// Polls until the start signal is seen and consumed. Returns `false` if the
    /// loop was stopped first.
    pub fn wait_for_trigger(&mut self) -> bool {
        self.transition(AcquisitionState::Waiting);
        self.handoff.next_action(ACTION_WAITING);

        loop {
            if self.stop.is_stopped() {
                return false;
            }
            if self.handoff.start_requested() {
                self.handoff.acknowledge_start();
                return true;
            }
            self.clock.sleep(self.settings.trigger_poll_interval);
        }
    }

    /// Searches for a gear until success, timeout, re-trigger or stop.
    pub fn search(&mut self) -> SessionOutcome {
        self.transition(AcquisitionState::Searching);
        self.handoff.ready_for_restart(false);
        self.handoff.coordinates_received(false);
        self.handoff.status(STATUS_SEARCHING);
        self.handoff.next_action(ACTION_IDLE);

        let started = self.clock.now();
        let mut attempts = 0;

        loop {
            if self.stop.is_stopped() {
                return SessionOutcome::Stopped;
            }

            if self.handoff.start_requested() {
                self.handoff.acknowledge_start();
                self.transition(AcquisitionState::Restarting);
                self.handoff.status(STATUS_RESTARTING);
                return SessionOutcome::Restarted { attempts };
            }

            let elapsed = self.clock.now().saturating_sub(started);
            if elapsed > self.settings.search_timeout {
                self.transition(AcquisitionState::TimedOut);
                self.handoff.status(STATUS_TIMED_OUT);
                return SessionOutcome::TimedOut { attempts };
            }

            match self.pipeline.run() {
                FrameOutcome::NoFrame => continue,
                FrameOutcome::Rejected(rejection) => {
                    attempts += 1;
                    debug!(attempts, %rejection, "frame rejected");
                }
                FrameOutcome::Accepted(detection) => {
                    attempts += 1;
                    let elapsed = self.clock.now().saturating_sub(started);
                    let report = self.hand_off(detection, attempts, elapsed);
                    return SessionOutcome::Succeeded(report);
                }
            }
        }
    }

    fn hand_off(&mut self, detection: Detection, attempts: u32, elapsed: Duration) -> SessionReport {
        let Detection { candidate, contour } = detection;

        self.transition(AcquisitionState::Succeeded);
        info!(
            diameter_mm = candidate.diameter_mm,
            points = contour.len(),
            attempts,
            "gear accepted"
        );

        self.handoff.status(STATUS_FOUND);
        self.handoff.persist(&contour);
        self.handoff.status(STATUS_SENDING);
        let coordinates_sent = self.handoff.send_coordinates(&contour);
        if coordinates_sent {
            self.handoff.status(STATUS_SENT);
        }
        self.handoff.status(STATUS_COMPLETED);
        self.handoff.next_action(ACTION_READY);
        self.handoff.coordinates_received(coordinates_sent);
        self.handoff.ready_for_restart(true);

        SessionReport {
            diameter_mm: candidate.diameter_mm,
            pixels_per_mm: candidate.pixels_per_mm,
            depth_m: candidate.depth_m,
            point_count: contour.len(),
            shifted: contour.shifted,
            attempts,
            elapsed,
            coordinates_sent,
        }
    }

    /// One trigger-to-result cycle.
    pub fn run_session(&mut self) -> SessionOutcome {
        if !self.wait_for_trigger() {
            return SessionOutcome::Stopped;
        }
        self.search()
    }

    /// Runs sessions until stopped or `max_sessions` have completed, then shuts down.
    pub fn run(&mut self, max_sessions: Option<usize>) -> Result<RunSummary, SensorError> {
        self.start()?;

        let mut summary = RunSummary::default();
        while max_sessions.map_or(true, |max| summary.sessions < max) {
            let outcome = self.run_session();
            summary.record(&outcome);
            if summary.stopped {
                break;
            }
        }

        self.shutdown();
        info!(?summary, "acquisition loop finished");
        Ok(summary)
    }

    pub fn shutdown(&mut self) {
        self.pipeline.close();
        self.handoff.close();
        self.transition(AcquisitionState::Stopped);
    }
}

//! The boundary to the machine controller.
//!
//! The controller is addressed as a table of named variables. [`Controller`] is the
//! set of operations the acquisition loop needs; [`VariableController`] maps them
//! onto variable reads and writes over any [`VariableTransport`]. [`Handoff`] sits
//! on top and turns every transport failure into a logged warning, so a flaky link
//! never stops the loop.

use std::{cell::RefCell, collections::HashMap, io, rc::Rc, time::Duration};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{
    artifact::CsvArtifact, canonical::CanonicalContour, clock::Clock, error::HandoffError,
};

/// Array writes beyond this many entries are dropped.
pub const MAX_COORDINATES: usize = 9999;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Bool(bool),
    Real(f64),
    Text(String),
    RealArray(Vec<f64>),
}

impl Value {
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Bool(_) => "bool",
            Value::Real(_) => "real",
            Value::Text(_) => "text",
            Value::RealArray(_) => "real array",
        }
    }
}

/// Controller variable names for each channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerVariables {
    pub start_signal: String,
    pub status: String,
    pub next_action: String,
    pub ready_for_restart: String,
    pub coordinates_received: String,
    pub distances: String,
    pub angles: String,
}

impl Default for ControllerVariables {
    fn default() -> Self {
        ControllerVariables {
            start_signal: "Main.startprocess".to_string(),
            status: "Main.status_message".to_string(),
            next_action: "Main.next_move".to_string(),
            ready_for_restart: "Main.restart".to_string(),
            coordinates_received: "Main.coordinatesreceived".to_string(),
            distances: "Main.x_coords".to_string(),
            angles: "Main.y_coords".to_string(),
        }
    }
}

/// Name of one element of a 1-based controller array.
pub fn element_name(array: &str, index: usize) -> String {
    format!("{}[{}]", array, index)
}

/// Named-variable access to a controller.
pub trait VariableTransport {
    fn write(&mut self, name: &str, value: Value) -> Result<(), HandoffError>;

    /// Writes `values` to consecutive elements of `name`, the first at `first_index`.
    fn write_reals(
        &mut self,
        name: &str,
        first_index: usize,
        values: &[f64],
    ) -> Result<(), HandoffError>;

    fn read(&mut self, name: &str) -> Result<Value, HandoffError>;

    fn close(&mut self) -> Result<(), HandoffError> {
        Ok(())
    }
}

/// What the acquisition loop needs from the controller.
pub trait Controller {
    fn read_start_signal(&mut self) -> Result<bool, HandoffError>;

    fn clear_start_signal(&mut self) -> Result<(), HandoffError>;

    fn send_coordinates(&mut self, distances: &[f64], angles: &[f64]) -> Result<(), HandoffError>;

    fn send_status(&mut self, text: &str) -> Result<(), HandoffError>;

    fn send_next_action(&mut self, text: &str) -> Result<(), HandoffError>;

    fn signal_ready_for_restart(&mut self, ready: bool) -> Result<(), HandoffError>;

    fn signal_coordinates_received(&mut self, received: bool) -> Result<(), HandoffError>;

    fn close(&mut self) -> Result<(), HandoffError> {
        Ok(())
    }
}

pub struct VariableController<T> {
    transport: T,
    variables: ControllerVariables,
}

impl<T: VariableTransport> VariableController<T> {
    pub fn new(transport: T, variables: ControllerVariables) -> Self {
        VariableController {
            transport,
            variables,
        }
    }
}

impl<T: VariableTransport> Controller for VariableController<T> {
    fn read_start_signal(&mut self) -> Result<bool, HandoffError> {
        let name = &self.variables.start_signal;

        match self.transport.read(name)? {
            Value::Bool(value) => Ok(value),
            other => Err(HandoffError::TypeMismatch {
                name: name.clone(),
                expected: "bool",
                found: other.kind(),
            }),
        }
    }

    fn clear_start_signal(&mut self) -> Result<(), HandoffError> {
        self.transport
            .write(&self.variables.start_signal, Value::Bool(false))
    }

    fn send_coordinates(&mut self, distances: &[f64], angles: &[f64]) -> Result<(), HandoffError> {
        let count = distances.len().min(angles.len());
        let capped = count.min(MAX_COORDINATES);

        if capped < count {
            warn!(
                count,
                cap = MAX_COORDINATES,
                "contour longer than controller arrays, dropping the tail"
            );
        }

        self.transport
            .write_reals(&self.variables.distances, 1, &distances[..capped])?;
        self.transport
            .write_reals(&self.variables.angles, 1, &angles[..capped])?;

        debug!(count = capped, "coordinates written");
        Ok(())
    }

    fn send_status(&mut self, text: &str) -> Result<(), HandoffError> {
        self.transport
            .write(&self.variables.status, Value::Text(text.to_string()))
    }

    fn send_next_action(&mut self, text: &str) -> Result<(), HandoffError> {
        self.transport
            .write(&self.variables.next_action, Value::Text(text.to_string()))
    }

    fn signal_ready_for_restart(&mut self, ready: bool) -> Result<(), HandoffError> {
        self.transport
            .write(&self.variables.ready_for_restart, Value::Bool(ready))
    }

    fn signal_coordinates_received(&mut self, received: bool) -> Result<(), HandoffError> {
        self.transport
            .write(&self.variables.coordinates_received, Value::Bool(received))
    }

    fn close(&mut self) -> Result<(), HandoffError> {
        self.transport.close()
    }
}

/// A controller's variable table.
///
/// A table built with [`VariableTable::recording`] also appends every write to a
/// log so the order of a session's handoff can be inspected afterwards.
#[derive(Debug, Clone, Default)]
pub struct VariableTable {
    values: HashMap<String, Value>,
    log: Option<Vec<(String, Value)>>,
}

impl VariableTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn recording() -> Self {
        VariableTable {
            log: Some(Vec::new()),
            ..Self::default()
        }
    }

    fn record(&mut self, name: String, value: Value) {
        if let Some(log) = &mut self.log {
            log.push((name, value));
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn bool(&self, name: &str) -> bool {
        matches!(self.values.get(name), Some(Value::Bool(true)))
    }

    pub fn text(&self, name: &str) -> Option<&str> {
        match self.values.get(name) {
            Some(Value::Text(text)) => Some(text),
            _ => None,
        }
    }

    pub fn real(&self, name: &str) -> Option<f64> {
        match self.values.get(name) {
            Some(Value::Real(value)) => Some(*value),
            _ => None,
        }
    }

    /// Sets a variable as the controller itself would, without logging.
    pub fn set(&mut self, name: &str, value: Value) {
        self.values.insert(name.to_string(), value);
    }

    pub fn write(&mut self, name: &str, value: Value) -> Result<(), HandoffError> {
        if self.log.is_some() {
            self.record(name.to_string(), value.clone());
        }
        self.values.insert(name.to_string(), value);
        Ok(())
    }

    pub fn write_reals(
        &mut self,
        name: &str,
        first_index: usize,
        values: &[f64],
    ) -> Result<(), HandoffError> {
        if self.log.is_some() {
            self.record(element_name(name, first_index), Value::RealArray(values.to_vec()));
        }
        for (offset, value) in values.iter().enumerate() {
            self.values
                .insert(element_name(name, first_index + offset), Value::Real(*value));
        }
        Ok(())
    }

    pub fn read(&self, name: &str) -> Result<Value, HandoffError> {
        self.values
            .get(name)
            .cloned()
            .ok_or_else(|| HandoffError::UnknownVariable {
                name: name.to_string(),
            })
    }

    /// Every logged write, oldest first. Empty unless the table is recording.
    pub fn log(&self) -> &[(String, Value)] {
        self.log.as_deref().unwrap_or(&[])
    }

    /// Logged text writes to `name`, oldest first.
    pub fn texts_written(&self, name: &str) -> Vec<String> {
        self.log()
            .iter()
            .filter(|(written, _)| written == name)
            .filter_map(|(_, value)| match value {
                Value::Text(text) => Some(text.clone()),
                _ => None,
            })
            .collect()
    }

    /// Reals stored in `array[1..]`, stopping at the first missing element.
    pub fn reals(&self, array: &str) -> Vec<f64> {
        (1..)
            .map_while(|index| self.real(&element_name(array, index)))
            .collect()
    }
}

/// An in-process controller over a recording table. Clones of the [`Rc`] table
/// handle see every write.
///
/// Start pulses can be scheduled against a clock; each fires the first time the
/// start signal is read at or after its time.
pub struct MemoryTransport {
    table: Rc<RefCell<VariableTable>>,
    pulses: Vec<Duration>,
    pulse_variable: String,
    clock: Option<Box<dyn Clock>>,
    offline: bool,
}

impl MemoryTransport {
    pub fn new(variables: &ControllerVariables) -> Self {
        let mut table = VariableTable::recording();
        table.set(&variables.start_signal, Value::Bool(false));

        MemoryTransport {
            table: Rc::new(RefCell::new(table)),
            pulses: Vec::new(),
            pulse_variable: variables.start_signal.clone(),
            clock: None,
            offline: false,
        }
    }

    /// Refuses every write, as a controller that dropped off the network would.
    /// Reads still succeed.
    pub fn offline(mut self) -> Self {
        self.offline = true;
        self
    }

    fn check_online(&self) -> Result<(), HandoffError> {
        if self.offline {
            return Err(io::Error::new(io::ErrorKind::ConnectionRefused, "controller offline").into());
        }
        Ok(())
    }

    pub fn table(&self) -> Rc<RefCell<VariableTable>> {
        Rc::clone(&self.table)
    }

    pub fn with_pulses(mut self, clock: impl Clock + 'static, mut at: Vec<Duration>) -> Self {
        at.sort();
        self.pulses = at;
        self.clock = Some(Box::new(clock));
        self
    }

    fn fire_due_pulses(&mut self) {
        let now = match &self.clock {
            Some(clock) => clock.now(),
            None => return,
        };

        let due = self.pulses.iter().take_while(|at| **at <= now).count();
        if due > 0 {
            self.pulses.drain(..due);
            debug!(?now, "controller start pulse");
            self.table
                .borrow_mut()
                .set(&self.pulse_variable, Value::Bool(true));
        }
    }
}

impl VariableTransport for MemoryTransport {
    fn write(&mut self, name: &str, value: Value) -> Result<(), HandoffError> {
        self.check_online()?;
        self.table.borrow_mut().write(name, value)
    }

    fn write_reals(
        &mut self,
        name: &str,
        first_index: usize,
        values: &[f64],
    ) -> Result<(), HandoffError> {
        self.check_online()?;
        self.table.borrow_mut().write_reals(name, first_index, values)
    }

    fn read(&mut self, name: &str) -> Result<Value, HandoffError> {
        if name == self.pulse_variable {
            self.fire_due_pulses();
        }

        self.table.borrow().read(name)
    }
}

/// Applies the non-fatal policy to a [`Controller`] and owns the coordinate file.
pub struct Handoff<C> {
    controller: C,
    artifact: Option<CsvArtifact>,
}

impl<C: Controller> Handoff<C> {
    pub fn new(controller: C, artifact: Option<CsvArtifact>) -> Self {
        Handoff {
            controller,
            artifact,
        }
    }

    /// Whether the start signal is set. A failed read counts as not set.
    pub fn start_requested(&mut self) -> bool {
        self.controller.read_start_signal().unwrap_or_else(|err| {
            warn!(%err, "failed to read start signal");
            false
        })
    }

    pub fn acknowledge_start(&mut self) {
        if let Err(err) = self.controller.clear_start_signal() {
            warn!(%err, "failed to reset start signal");
        }
    }

    pub fn status(&mut self, text: &str) {
        info!(status = text);
        if let Err(err) = self.controller.send_status(text) {
            warn!(%err, status = text, "failed to send status");
        }
    }

    pub fn next_action(&mut self, text: &str) {
        if let Err(err) = self.controller.send_next_action(text) {
            warn!(%err, next_action = text, "failed to send next action");
        }
    }

    pub fn ready_for_restart(&mut self, ready: bool) {
        if let Err(err) = self.controller.signal_ready_for_restart(ready) {
            warn!(%err, ready, "failed to set restart flag");
        }
    }

    pub fn coordinates_received(&mut self, received: bool) {
        if let Err(err) = self.controller.signal_coordinates_received(received) {
            warn!(%err, received, "failed to set coordinates flag");
        }
    }

    /// Overwrites the coordinate file, if one is configured.
    pub fn persist(&mut self, contour: &CanonicalContour) -> bool {
        match &self.artifact {
            Some(artifact) => match artifact.write(contour) {
                Ok(()) => true,
                Err(err) => {
                    warn!(%err, "failed to write coordinate file");
                    false
                }
            },
            None => false,
        }
    }

    /// Sends the contour's coordinates. Returns whether the controller took them.
    pub fn send_coordinates(&mut self, contour: &CanonicalContour) -> bool {
        match self
            .controller
            .send_coordinates(&contour.distances(), &contour.angles())
        {
            Ok(()) => true,
            Err(err) => {
                warn!(%err, count = contour.len(), "failed to send coordinates");
                false
            }
        }
    }

    pub fn close(&mut self) {
        if let Err(err) = self.controller.close() {
            warn!(%err, "failed to close controller connection");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn memory_controller() -> (VariableController<MemoryTransport>, Rc<RefCell<VariableTable>>) {
        let variables = ControllerVariables::default();
        let transport = MemoryTransport::new(&variables);
        let table = transport.table();

        (VariableController::new(transport, variables), table)
    }

    #[test]
    fn coordinates_are_written_one_based() {
        let (mut controller, table) = memory_controller();

        controller
            .send_coordinates(&[10., 11., 12.], &[0., 90., 180.])
            .unwrap();

        let table = table.borrow();
        assert_eq!(table.real("Main.x_coords[1]"), Some(10.));
        assert_eq!(table.real("Main.y_coords[3]"), Some(180.));
        assert_eq!(table.get("Main.x_coords[0]"), None);
        assert_eq!(table.reals("Main.y_coords"), vec![0., 90., 180.]);
    }

    #[test]
    fn coordinates_beyond_the_cap_are_dropped() {
        let (mut controller, table) = memory_controller();
        let distances = vec![1.; MAX_COORDINATES + 25];
        let angles = vec![2.; MAX_COORDINATES + 25];

        controller.send_coordinates(&distances, &angles).unwrap();

        let table = table.borrow();
        assert_eq!(table.reals("Main.x_coords").len(), MAX_COORDINATES);
        assert_eq!(table.reals("Main.y_coords").len(), MAX_COORDINATES);
    }

    #[test]
    fn start_signal_must_be_a_bool() {
        let (mut controller, table) = memory_controller();
        table
            .borrow_mut()
            .set("Main.startprocess", Value::Text("yes".into()));

        assert!(matches!(
            controller.read_start_signal(),
            Err(HandoffError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn scheduled_pulses_fire_once_when_due() {
        let clock = ManualClock::new();
        let variables = ControllerVariables::default();
        let transport = MemoryTransport::new(&variables)
            .with_pulses(clock.clone(), vec![Duration::from_secs(1)]);
        let mut controller = VariableController::new(transport, variables);

        assert!(!controller.read_start_signal().unwrap());
        clock.advance(Duration::from_secs(1));
        assert!(controller.read_start_signal().unwrap());

        controller.clear_start_signal().unwrap();
        clock.advance(Duration::from_secs(5));
        assert!(!controller.read_start_signal().unwrap());
    }

    #[test]
    fn handoff_swallows_transport_failures() {
        let variables = ControllerVariables::default();
        let transport = MemoryTransport::new(&variables).offline();
        let table = transport.table();
        let mut handoff = Handoff::new(VariableController::new(transport, variables), None);

        handoff.status("Gear found");
        handoff.ready_for_restart(true);
        let contour = CanonicalContour {
            points: Vec::new(),
            pixels: Vec::new(),
            start_index: 0,
            start_pixel: crate::types::Point::new(0, 0),
            first_angle_deg: 0.,
            shifted: false,
        };
        assert!(!handoff.send_coordinates(&contour));
        assert!(!handoff.persist(&contour));
        assert!(table.borrow().log().is_empty());
    }

    #[test]
    fn unreadable_start_signal_counts_as_not_set() {
        let variables = ControllerVariables {
            start_signal: "Main.missing".into(),
            ..ControllerVariables::default()
        };
        let transport = MemoryTransport::new(&ControllerVariables::default());
        let mut handoff = Handoff::new(VariableController::new(transport, variables), None);

        assert!(!handoff.start_requested());
    }

    #[test]
    fn only_recording_tables_keep_a_write_log() {
        let mut plain = VariableTable::new();
        let mut recording = VariableTable::recording();

        for table in [&mut plain, &mut recording] {
            table.write("Main.restart", Value::Bool(true)).unwrap();
            table.write_reals("Main.x_coords", 1, &[1., 2.]).unwrap();
        }

        assert!(plain.bool("Main.restart"));
        assert!(plain.log().is_empty());
        assert_eq!(recording.log().len(), 2);
        assert_eq!(recording.log()[0], ("Main.restart".to_string(), Value::Bool(true)));
    }
}

//! Collaborator interfaces
//!
//! The interpreter drives hardware through these traits only. Real firmware
//! backs them with the stepper planner, heater control and probe pins; the
//! [`crate::sim`] module provides simulated versions for tests and the host
//! binary.

use printcore_core::{ActuatorPosition, AxisFlags};
use printcore_settings::MotionLimits;

/// One straight move in actuator space
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlannerMove {
    /// Actuator target
    pub target: ActuatorPosition,
    /// Extruder target in logical millimetres
    pub e: f64,
    /// Feedrate in mm/s, multiplier already applied
    pub feedrate_mm_s: f64,
    /// Active tool
    pub extruder: usize,
    /// Volumetric and flow scaling applied to E steps
    pub extrude_factor: f64,
}

/// Which switches stop a move
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StopMode {
    /// Moves run to completion
    #[default]
    None,
    /// Axis endstops stop the axis that hits them
    Endstops,
    /// The bed probe stops the move
    Probe,
}

/// Motion planner and stepper interface
pub trait Planner: Send {
    /// Append a move
    fn buffer_line(&mut self, mv: PlannerMove);

    /// Declare the current actuator and extruder position without moving
    fn set_position(&mut self, actuator: ActuatorPosition, e: f64);

    /// Declare the extruder position only
    fn set_e_position(&mut self, e: f64);

    /// Actuator position as the steppers report it
    fn position(&self) -> ActuatorPosition;

    /// Moves are still being executed
    fn is_busy(&self) -> bool;

    /// Free slots in the move buffer
    fn free_blocks(&self) -> usize;

    fn set_stop_mode(&mut self, mode: StopMode);

    /// Endstop of actuator `axis` is pressed
    fn endstop_triggered(&self, axis: usize) -> bool;

    fn enable_steppers(&mut self);

    /// Disable the drivers of the given axes
    fn disable_steppers(&mut self, axes: AxisFlags);

    fn steppers_enabled(&self) -> bool;

    /// Discard every planned move and stop immediately
    fn quick_stop(&mut self);

    /// New acceleration, feedrate and jerk limits
    fn apply_limits(&mut self, limits: &MotionLimits);
}

/// A heater
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Heater {
    Tool(usize),
    Bed,
}

/// Temperature control interface
pub trait Thermal: Send {
    fn tool_count(&self) -> usize;

    fn has_bed(&self) -> bool;

    /// Measured temperature in °C
    fn current(&self, heater: Heater) -> f64;

    /// Target temperature in °C
    fn target(&self, heater: Heater) -> f64;

    fn set_target(&mut self, heater: Heater, celsius: f64);

    fn fan_speed(&self) -> u8;

    fn set_fan_speed(&mut self, speed: u8);

    /// Run the control loop
    fn tick(&mut self, now_ms: u64);

    /// Fault raised since the last call, if any
    fn take_fault(&mut self) -> Option<String>;

    fn disable_all(&mut self) {
        for tool in 0..self.tool_count() {
            self.set_target(Heater::Tool(tool), 0.0);
        }
        if self.has_bed() {
            self.set_target(Heater::Bed, 0.0);
        }
        self.set_fan_speed(0);
    }
}

/// Bed probe interface
pub trait ProbeDevice: Send {
    /// Bring the probe into position
    fn deploy(&mut self) -> Result<(), String>;

    fn stow(&mut self) -> Result<(), String>;

    fn is_deployed(&self) -> bool;

    /// Probe switch state
    fn is_triggered(&self) -> bool;
}

/// Millisecond time source
pub trait Clock: Send {
    fn now_ms(&self) -> u64;

    /// Let time pass while waiting
    fn tick(&mut self);
}

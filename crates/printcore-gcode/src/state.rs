//! Interpreter state
//!
//! Everything the dispatcher remembers between commands: positions, modal
//! distance and unit modes, the active tool, feedrate and multipliers,
//! homing knowledge, soft endstops and firmware retraction state.

use printcore_core::{Axis, AxisFlags, LinearUnit, Position, TemperatureUnit, XYZ, XYZE};
use printcore_settings::MachineConfig;
use std::fmt;

/// M111 debug flag set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DebugFlags(pub u8);

impl DebugFlags {
    pub const ECHO: u8 = 1;
    pub const INFO: u8 = 2;
    pub const ERRORS: u8 = 4;
    pub const DRYRUN: u8 = 8;
    pub const COMMUNICATION: u8 = 16;

    const NAMES: [(u8, &'static str); 5] = [
        (Self::ECHO, "ECHO"),
        (Self::INFO, "INFO"),
        (Self::ERRORS, "ERRORS"),
        (Self::DRYRUN, "DRYRUN"),
        (Self::COMMUNICATION, "COMMUNICATION"),
    ];

    pub fn contains(&self, flag: u8) -> bool {
        self.0 & flag != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for DebugFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "OFF");
        }
        let names: Vec<&str> = Self::NAMES
            .iter()
            .filter(|(bit, _)| self.contains(*bit))
            .map(|(_, name)| *name)
            .collect();
        write!(f, "{}", names.join(","))
    }
}

/// Interpreter state owned by the dispatcher context
#[derive(Debug, Clone, PartialEq)]
pub struct InterpreterState {
    /// Position the machine is at, logical millimetres
    pub current_position: Position,
    /// Target of the move being prepared
    pub destination: Position,
    /// G91 in effect for every axis
    pub relative_mode: bool,
    /// Per-axis relative flag (M83 sets E)
    pub axis_relative: [bool; XYZE],
    /// Last commanded feedrate, mm/min
    pub feedrate_mm_min: f64,
    /// Feedrate saved around homing and probing
    pub saved_feedrate_mm_min: f64,
    /// M220 percentage
    pub feed_multiplier: f64,
    /// M221 percentage per tool
    pub extruder_multiplier: Vec<f64>,
    /// Volumetric factor per tool (M200)
    pub volumetric_multiplier: Vec<f64>,
    pub active_tool: usize,
    pub linear_unit: LinearUnit,
    pub temperature_unit: TemperatureUnit,
    pub debug: DebugFlags,
    /// Axes homed since power-up or the last stepper disable
    pub homed: AxisFlags,
    /// Accumulated G92 shift per positional axis
    pub position_shift: [f64; XYZ],
    /// Soft endstop bounds, logical millimetres
    pub soft_min: [f64; XYZ],
    pub soft_max: [f64; XYZ],
    /// Endstops checked during every move (M120/M121)
    pub endstops_always_on: bool,
    /// Firmware retraction state per tool
    pub retracted: Vec<bool>,
    pub retracted_swap: Vec<bool>,
    /// Z before the retract hop
    pub hop_height: f64,
    /// False after a soft stop until M999
    pub running: bool,
    /// Last accepted line number when the soft stop happened
    pub stopped_last_line: i64,
    /// M117 status text
    pub status_message: String,
}

impl InterpreterState {
    /// Power-up state for a machine
    pub fn new(config: &MachineConfig) -> Self {
        let tools = config.extruders.count;
        let mut state = Self {
            current_position: Position::default(),
            destination: Position::default(),
            relative_mode: false,
            axis_relative: [false; XYZE],
            feedrate_mm_min: config.motion.default_feedrate_mm_min,
            saved_feedrate_mm_min: config.motion.default_feedrate_mm_min,
            feed_multiplier: 100.0,
            extruder_multiplier: vec![100.0; tools],
            volumetric_multiplier: vec![1.0; tools],
            active_tool: 0,
            linear_unit: LinearUnit::Millimeters,
            temperature_unit: TemperatureUnit::Celsius,
            debug: DebugFlags::default(),
            homed: AxisFlags::default(),
            position_shift: [0.0; XYZ],
            soft_min: [0.0; XYZ],
            soft_max: [0.0; XYZ],
            endstops_always_on: false,
            retracted: vec![false; tools],
            retracted_swap: vec![false; tools],
            hop_height: 0.0,
            running: true,
            stopped_last_line: 0,
            status_message: String::new(),
        };
        state.update_volumetric(config);
        for axis in 0..XYZ {
            state.update_software_endstops(config, axis);
        }
        state
    }

    /// Axis interprets coordinates as offsets
    pub fn is_relative(&self, axis: Axis) -> bool {
        self.relative_mode || self.axis_relative[axis.index()]
    }

    /// Recompute the soft endstops of positional axis `axis`
    ///
    /// Bounds follow the travel limits shifted by the home offset and any
    /// G92 shift.
    pub fn update_software_endstops(&mut self, config: &MachineConfig, axis: usize) {
        let settings = config.axis(axis);
        let offset = config.homing.home_offset[axis] + self.position_shift[axis];
        self.soft_min[axis] = settings.min_pos + offset;
        self.soft_max[axis] = settings.max_pos + offset;
    }

    /// Clamp `target` to the soft endstops
    pub fn clamp_to_software_endstops(&self, target: &mut Position) {
        for axis in Axis::XYZ {
            let i = axis.index();
            target[axis] = target[axis].max(self.soft_min[i]).min(self.soft_max[i]);
        }
    }

    /// Refresh the per-tool volumetric factors from the filament diameters
    pub fn update_volumetric(&mut self, config: &MachineConfig) {
        let ext = &config.extruders;
        self.volumetric_multiplier = ext
            .filament_diameter
            .iter()
            .map(|d| {
                if ext.volumetric_enabled && *d > 0.0 {
                    let r = d * 0.5;
                    1.0 / (std::f64::consts::PI * r * r)
                } else {
                    1.0
                }
            })
            .collect();
    }

    /// E scaling for the active tool: flow percentage times volumetric factor
    pub fn extrude_factor(&self) -> f64 {
        let tool = self.active_tool;
        let flow = self.extruder_multiplier.get(tool).copied().unwrap_or(100.0) / 100.0;
        let volumetric = self.volumetric_multiplier.get(tool).copied().unwrap_or(1.0);
        flow * volumetric
    }

    /// Forget all homing, e.g. after the steppers lost power
    pub fn clear_homed(&mut self, axes: AxisFlags) {
        for axis in Axis::XYZ {
            if axes.get(axis) {
                self.homed.set(axis, false);
            }
        }
    }

    /// Convert a parameter value in the active linear unit to millimetres
    pub fn to_mm(&self, value: f64) -> f64 {
        self.linear_unit.to_mm(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_flags_display() {
        assert_eq!(DebugFlags(0).to_string(), "OFF");
        assert_eq!(
            DebugFlags(DebugFlags::ECHO | DebugFlags::INFO).to_string(),
            "ECHO,INFO"
        );
        assert_eq!(DebugFlags(DebugFlags::DRYRUN).to_string(), "DRYRUN");
    }

    #[test]
    fn test_soft_endstops_follow_home_offset_and_shift() {
        let mut config = MachineConfig::default();
        config.homing.home_offset = [5.0, 0.0, 0.0];
        let mut state = InterpreterState::new(&config);
        assert_eq!(state.soft_min[0], 5.0);
        assert_eq!(state.soft_max[0], 205.0);

        state.position_shift[1] = -10.0;
        state.update_software_endstops(&config, 1);
        assert_eq!(state.soft_min[1], -10.0);
        assert_eq!(state.soft_max[1], 190.0);
    }

    #[test]
    fn test_clamp_is_idempotent() {
        let state = InterpreterState::new(&MachineConfig::default());
        let mut p = Position::new(-5.0, 250.0, 100.0, 3.0);
        state.clamp_to_software_endstops(&mut p);
        assert_eq!(p, Position::new(0.0, 200.0, 100.0, 3.0));
        let once = p;
        state.clamp_to_software_endstops(&mut p);
        assert_eq!(p, once);
    }

    #[test]
    fn test_relative_modes() {
        let mut state = InterpreterState::new(&MachineConfig::default());
        assert!(!state.is_relative(Axis::E));
        state.axis_relative[Axis::E.index()] = true;
        assert!(state.is_relative(Axis::E));
        assert!(!state.is_relative(Axis::X));
        state.relative_mode = true;
        assert!(state.is_relative(Axis::X));
    }

    #[test]
    fn test_extrude_factor() {
        let mut config = MachineConfig::default();
        config.extruders.volumetric_enabled = true;
        config.extruders.filament_diameter = vec![2.0];
        let mut state = InterpreterState::new(&config);
        state.extruder_multiplier[0] = 50.0;
        let expected = 0.5 / std::f64::consts::PI;
        assert!((state.extrude_factor() - expected).abs() < 1e-12);
    }
}

//! Simulated collaborators
//!
//! A machine model good enough to run the interpreter without hardware:
//! moves complete instantly, endstops sit where the homing procedure
//! expects them and a probe triggers against a configurable bed plane.
//! Every simulated device shares its state through a [`ThreadSafe`] handle,
//! so tests and the host binary can inspect what the interpreter did.

use crate::devices::{Clock, Heater, Planner, PlannerMove, ProbeDevice, StopMode, Thermal};
use printcore_core::{
    thread_safe, ActuatorPosition, AxisFlags, KinematicsError, Position, ThreadSafe, XYZ,
};
use printcore_kinematics::Kinematics;
use printcore_settings::{GeometryKind, MachineConfig, MotionLimits};
use std::time::{Duration, Instant};

const BLOCK_BUFFER_SIZE: usize = 16;
const PROBE_SAMPLES: usize = 64;
const BISECT_STEPS: usize = 48;
const SWITCH_EPSILON: f64 = 1e-6;

/// Physical bed surface `z = a·x + b·y + d`
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BedPlane {
    pub a: f64,
    pub b: f64,
    pub d: f64,
}

impl BedPlane {
    /// Level bed at height `d`
    pub fn flat(d: f64) -> Self {
        Self { a: 0.0, b: 0.0, d }
    }

    pub fn z_at(&self, x: f64, y: f64) -> f64 {
        self.a * x + self.b * y + self.d
    }
}

#[derive(Debug, Clone, Copy)]
struct Endstop {
    position: f64,
    direction: f64,
}

/// Physical state behind the simulated planner and probe
#[derive(Debug)]
pub struct MachineState {
    kinematics: Box<dyn Kinematics>,
    endstops: [Endstop; XYZ],
    physical: ActuatorPosition,
    /// Physical actuator position minus the planner's step counts
    offset: [f64; XYZ],
    e: f64,
    moves: Vec<PlannerMove>,
    stop_mode: StopMode,
    steppers_enabled: bool,
    probe_deployed: bool,
    probe_offset: [f64; XYZ],
    bed: BedPlane,
    limits: MotionLimits,
    quick_stops: usize,
}

impl MachineState {
    fn new(config: &MachineConfig) -> Result<Self, KinematicsError> {
        let kinematics = printcore_kinematics::build(config)?;

        let mut home = Position::new(
            config.axes.x.base_home_pos(),
            config.axes.y.base_home_pos(),
            config.axes.z.base_home_pos(),
            0.0,
        );
        if config.geometry == GeometryKind::Scara {
            let [a, b] = config.scara.home_angles;
            let arm = kinematics.forward(&ActuatorPosition::new(a, b, home.z))?;
            home.x = arm.x;
            home.y = arm.y;
        }
        let at_home = kinematics.inverse(&home)?;
        let endstops = std::array::from_fn(|i| Endstop {
            position: at_home[i],
            direction: f64::from(config.axis(i).home_dir.signum()),
        });

        let start = match config.geometry {
            GeometryKind::Delta => Position::new(0.0, 0.0, config.axes.z.max_pos / 2.0, 0.0),
            _ => {
                let mid = |i: usize| (config.axis(i).min_pos + config.axis(i).max_pos) / 2.0;
                Position::new(mid(0), mid(1), mid(2), 0.0)
            }
        };
        let physical = kinematics.inverse(&start)?;
        let counts = kinematics.inverse(&Position::default())?;
        let offset = std::array::from_fn(|i| physical[i] - counts[i]);

        Ok(Self {
            kinematics,
            endstops,
            physical,
            offset,
            e: 0.0,
            moves: Vec::new(),
            stop_mode: StopMode::None,
            steppers_enabled: false,
            probe_deployed: false,
            probe_offset: [
                config.probe.x_offset,
                config.probe.y_offset,
                config.probe.z_offset,
            ],
            bed: BedPlane::default(),
            limits: config.motion.clone(),
            quick_stops: 0,
        })
    }

    fn counts(&self) -> ActuatorPosition {
        let mut counts = self.physical;
        for i in 0..XYZ {
            counts[i] -= self.offset[i];
        }
        counts
    }

    fn endstop_hit(&self, axis: usize, physical: &ActuatorPosition) -> bool {
        let stop = self.endstops[axis];
        stop.direction * (physical[axis] - stop.position) >= -SWITCH_EPSILON
    }

    fn probe_triggered_at(&self, physical: &ActuatorPosition) -> bool {
        let Ok(nozzle) = self.kinematics.forward(physical) else {
            return false;
        };
        let tip_x = nozzle.x + self.probe_offset[0];
        let tip_y = nozzle.y + self.probe_offset[1];
        let tip_z = nozzle.z + self.probe_offset[2];
        tip_z <= self.bed.z_at(tip_x, tip_y) + 1e-9
    }

    fn execute(&mut self, mv: PlannerMove) {
        let mut target = mv.target;
        for i in 0..XYZ {
            target[i] += self.offset[i];
        }

        self.physical = match self.stop_mode {
            StopMode::None => target,
            StopMode::Endstops => self.stop_at_endstops(target),
            StopMode::Probe => self.stop_at_probe(target),
        };
        self.e = mv.e;
        self.steppers_enabled = true;
        self.moves.push(mv);
    }

    fn stop_at_endstops(&self, mut target: ActuatorPosition) -> ActuatorPosition {
        for i in 0..XYZ {
            let stop = self.endstops[i];
            let start = self.physical[i];
            let toward = stop.direction * (target[i] - start) > 0.0;
            if toward && stop.direction * (target[i] - stop.position) > 0.0 {
                target[i] = if stop.direction * (start - stop.position) > 0.0 {
                    start
                } else {
                    stop.position
                };
            }
        }
        target
    }

    fn stop_at_probe(&self, target: ActuatorPosition) -> ActuatorPosition {
        let start = self.physical;
        if self.probe_triggered_at(&start) {
            return start;
        }
        let point = |t: f64| {
            let mut p = start;
            for i in 0..XYZ {
                p[i] = start[i] + (target[i] - start[i]) * t;
            }
            p
        };

        let mut previous = 0.0;
        for k in 1..=PROBE_SAMPLES {
            let t = k as f64 / PROBE_SAMPLES as f64;
            if self.probe_triggered_at(&point(t)) {
                let (mut lo, mut hi) = (previous, t);
                for _ in 0..BISECT_STEPS {
                    let mid = (lo + hi) / 2.0;
                    if self.probe_triggered_at(&point(mid)) {
                        hi = mid;
                    } else {
                        lo = mid;
                    }
                }
                return point(hi);
            }
            previous = t;
        }
        target
    }
}

/// Simulated mechanics: planner, steppers, endstops and probe
#[derive(Debug, Clone)]
pub struct SimulatedMachine {
    state: ThreadSafe<MachineState>,
}

impl SimulatedMachine {
    /// Machine parked mid-travel with unknown position
    pub fn new(config: &MachineConfig) -> Result<Self, KinematicsError> {
        Ok(Self {
            state: thread_safe(MachineState::new(config)?),
        })
    }

    pub fn planner(&self) -> SimulatedPlanner {
        SimulatedPlanner {
            state: self.state.clone(),
        }
    }

    pub fn probe(&self) -> SimulatedProbe {
        SimulatedProbe {
            state: self.state.clone(),
        }
    }

    /// Every move submitted so far
    pub fn moves(&self) -> Vec<PlannerMove> {
        self.state.lock().moves.clone()
    }

    /// Moves submitted since the last call
    pub fn take_moves(&self) -> Vec<PlannerMove> {
        std::mem::take(&mut self.state.lock().moves)
    }

    /// True actuator position
    pub fn physical(&self) -> ActuatorPosition {
        self.state.lock().physical
    }

    /// True nozzle position
    pub fn nozzle(&self) -> Option<Position> {
        let state = self.state.lock();
        state.kinematics.forward(&state.physical).ok()
    }

    pub fn extruder_position(&self) -> f64 {
        self.state.lock().e
    }

    pub fn set_bed(&self, bed: BedPlane) {
        self.state.lock().bed = bed;
    }

    pub fn probe_deployed(&self) -> bool {
        self.state.lock().probe_deployed
    }

    pub fn steppers_enabled(&self) -> bool {
        self.state.lock().steppers_enabled
    }

    pub fn stop_mode(&self) -> StopMode {
        self.state.lock().stop_mode
    }

    /// Limits last handed to the planner
    pub fn limits(&self) -> MotionLimits {
        self.state.lock().limits.clone()
    }

    pub fn quick_stops(&self) -> usize {
        self.state.lock().quick_stops
    }
}

/// [`Planner`] view of a [`SimulatedMachine`]
#[derive(Debug, Clone)]
pub struct SimulatedPlanner {
    state: ThreadSafe<MachineState>,
}

impl Planner for SimulatedPlanner {
    fn buffer_line(&mut self, mv: PlannerMove) {
        tracing::trace!("Planner move to {} E{:.3} F{:.2}", mv.target, mv.e, mv.feedrate_mm_s);
        self.state.lock().execute(mv);
    }

    fn set_position(&mut self, actuator: ActuatorPosition, e: f64) {
        let mut state = self.state.lock();
        for i in 0..XYZ {
            state.offset[i] = state.physical[i] - actuator[i];
        }
        state.e = e;
    }

    fn set_e_position(&mut self, e: f64) {
        self.state.lock().e = e;
    }

    fn position(&self) -> ActuatorPosition {
        self.state.lock().counts()
    }

    fn is_busy(&self) -> bool {
        false
    }

    fn free_blocks(&self) -> usize {
        BLOCK_BUFFER_SIZE - 1
    }

    fn set_stop_mode(&mut self, mode: StopMode) {
        self.state.lock().stop_mode = mode;
    }

    fn endstop_triggered(&self, axis: usize) -> bool {
        let state = self.state.lock();
        axis < XYZ && state.endstop_hit(axis, &state.physical)
    }

    fn enable_steppers(&mut self) {
        self.state.lock().steppers_enabled = true;
    }

    fn disable_steppers(&mut self, axes: AxisFlags) {
        if axes.any_xyz() {
            self.state.lock().steppers_enabled = false;
        }
    }

    fn steppers_enabled(&self) -> bool {
        self.state.lock().steppers_enabled
    }

    fn quick_stop(&mut self) {
        self.state.lock().quick_stops += 1;
    }

    fn apply_limits(&mut self, limits: &MotionLimits) {
        self.state.lock().limits = limits.clone();
    }
}

/// [`ProbeDevice`] view of a [`SimulatedMachine`]
#[derive(Debug, Clone)]
pub struct SimulatedProbe {
    state: ThreadSafe<MachineState>,
}

impl ProbeDevice for SimulatedProbe {
    fn deploy(&mut self) -> Result<(), String> {
        self.state.lock().probe_deployed = true;
        Ok(())
    }

    fn stow(&mut self) -> Result<(), String> {
        self.state.lock().probe_deployed = false;
        Ok(())
    }

    fn is_deployed(&self) -> bool {
        self.state.lock().probe_deployed
    }

    fn is_triggered(&self) -> bool {
        let state = self.state.lock();
        state.probe_triggered_at(&state.physical)
    }
}

const AMBIENT_C: f64 = 20.0;

#[derive(Debug)]
struct ThermalState {
    tools: Vec<(f64, f64)>,
    bed: Option<(f64, f64)>,
    fan: u8,
    heat_rate: f64,
    cool_rate: f64,
    last_ms: Option<u64>,
    fault: Option<String>,
}

/// Heaters that approach their target at a fixed rate
#[derive(Debug, Clone)]
pub struct SimulatedThermal {
    state: ThreadSafe<ThermalState>,
}

impl SimulatedThermal {
    /// Heaters at ambient temperature; 5 °C/s heating, 2 °C/s cooling
    pub fn new(tool_count: usize, has_bed: bool) -> Self {
        Self {
            state: thread_safe(ThermalState {
                tools: vec![(AMBIENT_C, 0.0); tool_count],
                bed: has_bed.then_some((AMBIENT_C, 0.0)),
                fan: 0,
                heat_rate: 5.0,
                cool_rate: 2.0,
                last_ms: None,
                fault: None,
            }),
        }
    }

    /// Degrees per second while heating and cooling
    pub fn set_rates(&self, heat: f64, cool: f64) {
        let mut state = self.state.lock();
        state.heat_rate = heat;
        state.cool_rate = cool;
    }

    /// Force the measured temperature of a heater
    pub fn set_current(&self, heater: Heater, celsius: f64) {
        let mut state = self.state.lock();
        match heater {
            Heater::Tool(i) => {
                if let Some(tool) = state.tools.get_mut(i) {
                    tool.0 = celsius;
                }
            }
            Heater::Bed => {
                if let Some(bed) = state.bed.as_mut() {
                    bed.0 = celsius;
                }
            }
        }
    }

    /// Raise a fault on the next tick
    pub fn inject_fault(&self, message: &str) {
        self.state.lock().fault = Some(message.to_string());
    }

    fn slot(state: &mut ThermalState, heater: Heater) -> Option<&mut (f64, f64)> {
        match heater {
            Heater::Tool(i) => state.tools.get_mut(i),
            Heater::Bed => state.bed.as_mut(),
        }
    }
}

impl Thermal for SimulatedThermal {
    fn tool_count(&self) -> usize {
        self.state.lock().tools.len()
    }

    fn has_bed(&self) -> bool {
        self.state.lock().bed.is_some()
    }

    fn current(&self, heater: Heater) -> f64 {
        let mut state = self.state.lock();
        Self::slot(&mut state, heater).map_or(0.0, |h| h.0)
    }

    fn target(&self, heater: Heater) -> f64 {
        let mut state = self.state.lock();
        Self::slot(&mut state, heater).map_or(0.0, |h| h.1)
    }

    fn set_target(&mut self, heater: Heater, celsius: f64) {
        let mut state = self.state.lock();
        if let Some(h) = Self::slot(&mut state, heater) {
            h.1 = celsius;
        }
    }

    fn fan_speed(&self) -> u8 {
        self.state.lock().fan
    }

    fn set_fan_speed(&mut self, speed: u8) {
        self.state.lock().fan = speed;
    }

    fn tick(&mut self, now_ms: u64) {
        let mut state = self.state.lock();
        let elapsed_s = match state.last_ms {
            Some(last) => now_ms.saturating_sub(last) as f64 / 1000.0,
            None => 0.0,
        };
        state.last_ms = Some(now_ms);
        let (heat, cool) = (state.heat_rate * elapsed_s, state.cool_rate * elapsed_s);

        let approach = |h: &mut (f64, f64)| {
            let goal = h.1.max(AMBIENT_C);
            if h.0 < goal {
                h.0 = (h.0 + heat).min(goal);
            } else if h.0 > goal {
                h.0 = (h.0 - cool).max(goal);
            }
        };
        state.tools.iter_mut().for_each(approach);
        if let Some(bed) = state.bed.as_mut() {
            approach(bed);
        }
    }

    fn take_fault(&mut self) -> Option<String> {
        self.state.lock().fault.take()
    }
}

/// Clock that only moves when told to; each wait tick advances it by a step
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: ThreadSafe<u64>,
    step_ms: u64,
}

impl ManualClock {
    pub fn new(step_ms: u64) -> Self {
        Self {
            now: thread_safe(0),
            step_ms,
        }
    }

    pub fn advance(&self, ms: u64) {
        *self.now.lock() += ms;
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        *self.now.lock()
    }

    fn tick(&mut self) {
        *self.now.lock() += self.step_ms;
    }
}

/// Wall clock; each tick sleeps a millisecond
#[derive(Debug, Clone)]
pub struct SystemClock {
    start: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }

    fn tick(&mut self) {
        std::thread::sleep(Duration::from_millis(1));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn linear_move(target: ActuatorPosition) -> PlannerMove {
        PlannerMove {
            target,
            e: 0.0,
            feedrate_mm_s: 50.0,
            extruder: 0,
            extrude_factor: 1.0,
        }
    }

    #[test]
    fn test_endstop_stops_axis() {
        let machine = SimulatedMachine::new(&MachineConfig::default()).unwrap();
        let mut planner = machine.planner();
        planner.set_stop_mode(StopMode::Endstops);
        let start = planner.position();
        planner.buffer_line(linear_move(ActuatorPosition::new(
            start[0] - 500.0,
            start[1],
            start[2],
        )));
        assert!(planner.endstop_triggered(0));
        assert!(!planner.endstop_triggered(1));
        assert!((machine.physical()[0] - 0.0).abs() < 1e-9);
        // Counts moved by the distance actually travelled.
        assert!((planner.position()[0] - (start[0] - 100.0)).abs() < 1e-9);
    }

    #[test]
    fn test_endstops_ignored_without_stop_mode() {
        let machine = SimulatedMachine::new(&MachineConfig::default()).unwrap();
        let mut planner = machine.planner();
        planner.buffer_line(linear_move(ActuatorPosition::new(-500.0, 0.0, 0.0)));
        assert_eq!(machine.moves().len(), 1);
        assert!(machine.physical()[0] < -100.0);
    }

    #[test]
    fn test_probe_triggers_on_bed() {
        let mut config = MachineConfig::default();
        config.probe.enabled = true;
        config.probe.z_offset = -1.0;
        let machine = SimulatedMachine::new(&config).unwrap();
        machine.set_bed(BedPlane::flat(2.0));
        let mut planner = machine.planner();
        planner.set_position(ActuatorPosition::from_xyz(&Position::new(100.0, 100.0, 100.0, 0.0)), 0.0);
        planner.set_stop_mode(StopMode::Probe);
        planner.buffer_line(linear_move(ActuatorPosition::new(100.0, 100.0, -10.0)));
        let nozzle = machine.nozzle().unwrap();
        // Probe tip is 1 mm below the nozzle.
        assert!((nozzle.z - 3.0).abs() < 1e-6);
        assert!(machine.probe().is_triggered());
    }

    #[test]
    fn test_thermal_approaches_target() {
        let mut thermal = SimulatedThermal::new(1, true);
        thermal.set_target(Heater::Tool(0), 200.0);
        thermal.tick(0);
        thermal.tick(10_000);
        assert!((thermal.current(Heater::Tool(0)) - 70.0).abs() < 1e-9);
        thermal.tick(100_000);
        assert_eq!(thermal.current(Heater::Tool(0)), 200.0);
        assert_eq!(thermal.current(Heater::Bed), AMBIENT_C);

        thermal.disable_all();
        thermal.tick(101_000);
        assert_eq!(thermal.current(Heater::Tool(0)), 198.0);
    }

    #[test]
    fn test_thermal_fault_is_taken_once() {
        let mut thermal = SimulatedThermal::new(1, false);
        thermal.inject_fault("MAXTEMP triggered");
        assert_eq!(thermal.take_fault().as_deref(), Some("MAXTEMP triggered"));
        assert_eq!(thermal.take_fault(), None);
    }

    #[test]
    fn test_manual_clock() {
        let mut clock = ManualClock::new(50);
        let observer = clock.clone();
        clock.tick();
        clock.advance(100);
        assert_eq!(observer.now_ms(), 150);
    }
}

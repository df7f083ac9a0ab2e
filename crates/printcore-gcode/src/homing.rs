//! Homing
//!
//! Every axis is homed in actuator space: a coarse seek of one and a half
//! travel lengths towards the endstop, a back-off by the bump distance and a
//! slow second approach. Delta machines raise all three carriages together
//! first and always home every tower; SCARA homes both arm joints together.

use crate::context::Context;
use crate::devices::{PlannerMove, StopMode};
use printcore_core::{Axis, AxisFlags, GcodeError, XYZ};
use printcore_settings::GeometryKind;

impl Context {
    /// Stop mode the planner returns to once homing or probing is done
    pub fn idle_stop_mode(&self) -> StopMode {
        if self.state.endstops_always_on {
            StopMode::Endstops
        } else {
            StopMode::None
        }
    }

    /// Relative move of raw actuator positions, waiting for completion
    pub(crate) fn actuator_move(
        &mut self,
        delta: [f64; XYZ],
        feedrate_mm_min: f64,
    ) -> Result<(), GcodeError> {
        let mut target = self.planner.position();
        for (i, d) in delta.iter().enumerate() {
            target[i] += d;
        }
        self.planner.buffer_line(PlannerMove {
            target,
            e: self.state.current_position.e,
            feedrate_mm_s: feedrate_mm_min / 60.0,
            extruder: self.state.active_tool,
            extrude_factor: self.state.extrude_factor(),
        });
        self.synchronize()
    }

    fn single_axis_move(&mut self, axis: usize, distance: f64, feedrate_mm_min: f64) -> Result<(), GcodeError> {
        let mut delta = [0.0; XYZ];
        delta[axis] = distance;
        self.actuator_move(delta, feedrate_mm_min)
    }

    /// Declare the planner's count for one actuator
    fn set_actuator_count(&mut self, axis: usize, value: f64) {
        let mut position = self.planner.position();
        position[axis] = value;
        self.planner
            .set_position(position, self.state.current_position.e);
    }

    /// Seek, back off and re-seek the endstop of one actuator
    pub fn home_actuator(&mut self, axis: usize) -> Result<(), GcodeError> {
        let settings = self.config.axis(axis).clone();
        let dir = f64::from(settings.home_dir.signum());
        let feedrate = settings.homing_feedrate_mm_min;
        tracing::debug!("Homing actuator {}", axis);

        self.planner.set_stop_mode(StopMode::Endstops);
        self.set_actuator_count(axis, 0.0);
        self.single_axis_move(axis, 1.5 * settings.max_length() * dir, feedrate)?;

        self.set_actuator_count(axis, 0.0);
        self.single_axis_move(axis, -settings.home_bump_mm * dir, feedrate)?;
        self.single_axis_move(
            axis,
            2.0 * settings.home_bump_mm * dir,
            feedrate / settings.home_bump_divisor,
        )?;

        if !self.planner.endstop_triggered(axis) {
            return Err(GcodeError::Halted {
                reason: format!("Homing failed on {}", Axis::XYZ[axis]),
            });
        }

        if self.config.geometry == GeometryKind::Delta {
            let adj = self.config.delta.endstop_adj[axis];
            if adj * dir < 0.0 {
                self.planner.set_stop_mode(StopMode::None);
                self.single_axis_move(axis, adj, feedrate)?;
                self.planner.set_stop_mode(StopMode::Endstops);
            }
        }
        Ok(())
    }

    /// Declare a logical axis to be at its home position
    pub fn set_axis_is_at_home(&mut self, axis: Axis) -> Result<(), GcodeError> {
        let i = axis.index();
        self.state.position_shift[i] = 0.0;
        self.state.update_software_endstops(&self.config, i);

        let home = self.config.axis(i).base_home_pos() + self.config.homing.home_offset[i];
        self.state.current_position[axis] = home;

        if self.config.geometry == GeometryKind::Scara && axis != Axis::Z {
            let [a, b] = self.config.scara.home_angles;
            let arm = self
                .kinematics
                .forward(&printcore_core::ActuatorPosition::new(a, b, 0.0))?;
            self.state.current_position.x = arm.x + self.config.homing.home_offset[0];
            self.state.current_position.y = arm.y + self.config.homing.home_offset[1];
        }

        self.state.homed.set(axis, true);
        tracing::debug!("{} homed at {:.3}", axis, self.state.current_position[axis]);
        Ok(())
    }

    /// G28: home the requested axes, or all of them when none is named
    pub fn home_axes(&mut self, requested: AxisFlags) -> Result<(), GcodeError> {
        let home_all = !requested.any_xyz();
        let wants = |axis: Axis| home_all || requested.get(axis);

        self.leveling.reset();
        self.set_current_from_steppers()?;
        self.sync_plan_position()?;
        self.state.destination = self.state.current_position;
        let saved_feedrate = self.state.feedrate_mm_min;

        let result = match self.config.geometry {
            GeometryKind::Delta => self.home_delta(),
            GeometryKind::Scara => self.home_scara(wants(Axis::X) || wants(Axis::Y), wants(Axis::Z)),
            _ => self.home_linear(wants(Axis::X), wants(Axis::Y), wants(Axis::Z)),
        };

        self.planner.set_stop_mode(self.idle_stop_mode());
        self.state.feedrate_mm_min = saved_feedrate;
        self.state.destination = self.state.current_position;
        self.refresh_cmd_timeout();
        result?;

        tracing::info!("Homed: {}", self.state.current_position);
        Ok(())
    }

    fn home_delta(&mut self) -> Result<(), GcodeError> {
        let z = self.config.axes.z.clone();
        let raise = 3.0 * z.max_pos * f64::from(z.home_dir.signum());

        self.planner.set_stop_mode(StopMode::Endstops);
        for axis in 0..XYZ {
            self.set_actuator_count(axis, 0.0);
        }
        self.actuator_move([raise; XYZ], z.homing_feedrate_mm_min)?;

        for axis in 0..XYZ {
            self.home_actuator(axis)?;
        }
        for axis in Axis::XYZ {
            self.set_axis_is_at_home(axis)?;
        }
        self.sync_plan_position()
    }

    fn home_scara(&mut self, arms: bool, z: bool) -> Result<(), GcodeError> {
        if z && self.config.axes.z.home_dir > 0 {
            self.home_axis(Axis::Z)?;
        }
        if arms {
            self.raise_before_homing()?;
            self.home_actuator(0)?;
            self.home_actuator(1)?;
            self.set_axis_is_at_home(Axis::X)?;
            self.set_axis_is_at_home(Axis::Y)?;
            self.sync_plan_position()?;
        }
        if z && self.config.axes.z.home_dir < 0 {
            self.home_axis(Axis::Z)?;
        }
        Ok(())
    }

    fn home_linear(&mut self, x: bool, y: bool, z: bool) -> Result<(), GcodeError> {
        if z && self.config.axes.z.home_dir > 0 {
            self.home_axis(Axis::Z)?;
        }
        if x || y {
            self.raise_before_homing()?;
        }
        if x {
            self.home_axis(Axis::X)?;
        }
        if y {
            self.home_axis(Axis::Y)?;
        }
        if z && self.config.axes.z.home_dir < 0 {
            if self.config.homing.z_safe_homing {
                self.move_to_safe_homing_point()?;
            }
            self.home_axis(Axis::Z)?;
        }
        Ok(())
    }

    fn home_axis(&mut self, axis: Axis) -> Result<(), GcodeError> {
        self.home_actuator(axis.index())?;
        self.set_axis_is_at_home(axis)?;
        self.sync_plan_position()
    }

    /// Lift Z clear of the bed before X or Y travel towards the endstops
    fn raise_before_homing(&mut self) -> Result<(), GcodeError> {
        let height = self.config.homing.z_raise_before_homing;
        if height > 0.0 && self.config.axes.z.home_dir < 0 && self.state.current_position.z < height {
            let feedrate = self.config.axes.z.homing_feedrate_mm_min;
            self.do_blocking_move_to_z(height, feedrate)?;
        }
        Ok(())
    }

    /// Put the probe over the bed center before homing Z against it
    fn move_to_safe_homing_point(&mut self) -> Result<(), GcodeError> {
        let homed = self.state.homed;
        if !(homed.get(Axis::X) && homed.get(Axis::Y)) {
            return Err(GcodeError::NotHomed {
                axes: "X/Y".to_string(),
            });
        }
        let center = |i: usize| (self.config.axis(i).min_pos + self.config.axis(i).max_pos) / 2.0;
        let x = center(0) - self.config.probe.x_offset;
        let y = center(1) - self.config.probe.y_offset;
        let z = self.state.current_position.z;
        let feedrate = self.config.probe.travel_feedrate_mm_min;
        self.do_blocking_move_to(x, y, z, feedrate)
    }

    /// Forget homing after the steppers lost holding torque
    pub fn disable_steppers(&mut self, axes: AxisFlags) {
        self.planner.disable_steppers(axes);
        self.state.clear_homed(axes);
    }
}

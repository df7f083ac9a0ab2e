//! Motion preparation
//!
//! Turns a logical destination and feedrate into planner moves:
//!
//! 1. clamp to the soft endstops
//! 2. refuse unhomed axes and targets outside a Delta's printable disk
//! 3. freeze E for cold or over-long extrusion
//! 4. split the move: by time on Delta and SCARA, at mesh cell boundaries
//!    when a mesh is active, not at all otherwise
//! 5. run every segment end through the leveled inverse transform
//!
//! All actuator targets of a move are computed before the first one reaches
//! the planner, so a failing transform leaves the planner and
//! `current_position` untouched.

use crate::context::Context;
use crate::devices::{Heater, PlannerMove};
use crate::state::DebugFlags;
use printcore_core::{ActuatorPosition, Axis, AxisFlags, GcodeError, KinematicsError, Position};
use printcore_kinematics::MeshGrid;

/// Smallest E change treated as a firmware retract by auto-retract
pub const MIN_RETRACT: f64 = 0.1;

const REACH_EPSILON: f64 = 1e-6;
const MIN_MOVE_MM: f64 = 1e-6;
const ARC_CLOSE_EPSILON: f64 = 1e-9;
/// Per-segment sweep (rad) above which every arc point is computed exactly
const ARC_MAX_LINEARIZED_ANGLE: f64 = 0.1;

/// Parameter-free part of an arc request
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ArcRequest {
    /// Arc end point
    pub target: Position,
    /// Center relative to the start point (I, J)
    pub offset: [f64; 2],
    pub clockwise: bool,
}

impl ArcRequest {
    /// Center offset for the `R` form
    ///
    /// A negative radius selects the longer of the two arcs.
    pub fn from_radius(
        start: &Position,
        target: Position,
        radius: f64,
        clockwise: bool,
    ) -> Result<Self, GcodeError> {
        let (x1, y1, x2, y2) = (start.x, start.y, target.x, target.y);
        if radius == 0.0 || (x1 == x2 && y1 == y2) {
            return Err(GcodeError::invalid('R', "G2/G3 bad parameters"));
        }
        let e = if clockwise ^ (radius < 0.0) { -1.0 } else { 1.0 };
        let (dx, dy) = (x2 - x1, y2 - y1);
        let d = dx.hypot(dy);
        let h = (radius * radius - (d * 0.5) * (d * 0.5)).sqrt();
        if !h.is_finite() {
            return Err(GcodeError::invalid('R', "radius too small for the end point"));
        }
        let (mx, my) = ((x1 + x2) * 0.5, (y1 + y2) * 0.5);
        let (sx, sy) = (-dy / d, dx / d);
        let (cx, cy) = (mx + e * h * sx, my + e * h * sy);
        Ok(Self {
            target,
            offset: [cx - x1, cy - y1],
            clockwise,
        })
    }
}

/// Sorted interior crossing parameters of the segment `from → to` with the
/// mesh grid lines
fn mesh_crossings(mesh: &MeshGrid, from: &Position, to: &Position) -> Vec<f64> {
    let mut ts = Vec::new();
    let mut cross = |a: f64, b: f64, line: f64| {
        if (b - a).abs() > f64::EPSILON {
            let t = (line - a) / (b - a);
            if t > 1e-9 && t < 1.0 - 1e-9 {
                ts.push(t);
            }
        }
    };
    for ix in 0..mesh.nx() {
        cross(from.x, to.x, mesh.x_at(ix));
    }
    for iy in 0..mesh.ny() {
        cross(from.y, to.y, mesh.y_at(iy));
    }
    ts.sort_by(|a, b| a.total_cmp(b));
    ts.dedup_by(|a, b| (*a - *b).abs() < 1e-12);
    ts
}

impl Context {
    /// Declare the current logical position to the planner
    pub fn sync_plan_position(&mut self) -> Result<(), GcodeError> {
        let actuator = self
            .kinematics
            .inverse_leveled(&self.state.current_position, &self.leveling)?;
        self.planner
            .set_position(actuator, self.state.current_position.e);
        Ok(())
    }

    /// Declare the current E position to the planner
    pub fn sync_plan_position_e(&mut self) {
        self.planner.set_e_position(self.state.current_position.e);
    }

    /// Read X, Y and Z back from the steppers
    pub fn set_current_from_steppers(&mut self) -> Result<(), GcodeError> {
        let p = self
            .kinematics
            .forward_leveled(&self.planner.position(), &self.leveling)?;
        let current = &mut self.state.current_position;
        current.x = p.x;
        current.y = p.y;
        current.z = p.z;
        Ok(())
    }

    /// Move to `state.destination` at the modal feedrate
    pub fn prepare_move_to_destination(&mut self) -> Result<(), GcodeError> {
        let destination = self.state.destination;
        let feedrate = self.state.feedrate_mm_min;
        self.prepare_move(destination, feedrate)
    }

    /// Full motion preparation for one straight move
    ///
    /// On success `current_position == destination`. On failure nothing was
    /// sent to the planner and the position is unchanged, except that a
    /// frozen extrusion still moves the logical E.
    pub fn prepare_move(
        &mut self,
        destination: Position,
        feedrate_mm_min: f64,
    ) -> Result<(), GcodeError> {
        self.refresh_cmd_timeout();
        if !destination.is_finite() {
            return Err(KinematicsError::Unreachable {
                x: destination.x,
                y: destination.y,
                z: destination.z,
            }
            .into());
        }

        let mut dest = destination;
        if self.config.motion.soft_endstops {
            self.state.clamp_to_software_endstops(&mut dest);
        }
        self.check_homed_for(&dest)?;
        self.check_reach(&dest)?;
        self.guard_extrusion(&mut dest);

        let from = self.state.current_position;
        let targets = self.segment_targets(&from, &dest, feedrate_mm_min)?;
        self.submit(&targets, feedrate_mm_min);

        self.state.current_position = dest;
        self.state.destination = dest;
        Ok(())
    }

    /// Refuse moves of unhomed axes when homing is required
    fn check_homed_for(&self, dest: &Position) -> Result<(), GcodeError> {
        if !self.config.motion.require_homing_before_move {
            return Ok(());
        }
        let mut ok = AxisFlags::ALL;
        for axis in Axis::XYZ {
            let moves = dest[axis] != self.state.current_position[axis];
            ok.set(axis, !moves || self.state.homed.get(axis));
        }
        if ok.all_xyz() {
            Ok(())
        } else {
            Err(GcodeError::NotHomed {
                axes: ok.missing_xyz(),
            })
        }
    }

    fn check_reach(&self, dest: &Position) -> Result<(), GcodeError> {
        match self.kinematics.printable_radius() {
            Some(radius) if dest.radius_xy() > radius + REACH_EPSILON => {
                tracing::debug!("Rejected move to X{:.3} Y{:.3}: out of reach", dest.x, dest.y);
                Err(GcodeError::OutOfReach {
                    x: dest.x,
                    y: dest.y,
                })
            }
            _ => Ok(()),
        }
    }

    /// Freeze E for dry runs, cold hotends and over-long extrusions
    fn guard_extrusion(&mut self, dest: &mut Position) {
        let current_e = self.state.current_position.e;
        if dest.e == current_e {
            return;
        }
        let safety = &self.config.safety;
        let message = if self.state.debug.contains(DebugFlags::DRYRUN) {
            None
        } else if safety.prevent_cold_extrusion
            && self.thermal.current(Heater::Tool(self.state.active_tool)) < safety.min_extrude_temp
        {
            Some(" cold extrusion prevented")
        } else if safety.prevent_lengthy_extrusion
            && (dest.e - current_e).abs() > safety.extrude_max_length
        {
            Some(" too long extrusion prevented")
        } else {
            return;
        };

        if let Some(message) = message {
            tracing::warn!("Extrusion frozen:{}", message);
            self.echo(message);
        }
        self.state.current_position.e = dest.e;
        self.sync_plan_position_e();
    }

    /// Actuator targets and E values for a straight logical move
    fn segment_targets(
        &self,
        from: &Position,
        to: &Position,
        feedrate_mm_min: f64,
    ) -> Result<Vec<(ActuatorPosition, f64)>, GcodeError> {
        let point = |t: f64| if t >= 1.0 { *to } else { from.lerp(to, t) };

        let ts: Vec<f64> = if let Some(seg) = self.kinematics.segmentation() {
            let mut length = from.distance_xyz(to);
            if length < MIN_MOVE_MM {
                length = (to.e - from.e).abs();
            }
            if length < MIN_MOVE_MM {
                return Ok(Vec::new());
            }
            let n = seg.segment_count(length, feedrate_mm_min, self.state.feed_multiplier);
            (1..=n).map(|i| i as f64 / n as f64).collect()
        } else if let Some(mesh) = self.leveling.active_mesh() {
            let mut ts = mesh_crossings(mesh, from, to);
            ts.push(1.0);
            ts
        } else {
            vec![1.0]
        };

        ts.into_iter()
            .map(|t| {
                let p = point(t);
                let actuator = self.kinematics.inverse_leveled(&p, &self.leveling)?;
                Ok((actuator, p.e))
            })
            .collect()
    }

    fn submit(&mut self, targets: &[(ActuatorPosition, f64)], feedrate_mm_min: f64) {
        let feedrate_mm_s = feedrate_mm_min / 60.0 * self.state.feed_multiplier / 100.0;
        let extruder = self.state.active_tool;
        let extrude_factor = self.state.extrude_factor();
        for (target, e) in targets {
            self.planner.buffer_line(PlannerMove {
                target: *target,
                e: *e,
                feedrate_mm_s,
                extruder,
                extrude_factor,
            });
        }
    }

    /// Move without clamping or extrusion guards and wait for it (homing,
    /// probing, tool change)
    pub fn do_blocking_move_to(
        &mut self,
        x: f64,
        y: f64,
        z: f64,
        feedrate_mm_min: f64,
    ) -> Result<(), GcodeError> {
        let from = self.state.current_position;
        let to = Position::new(x, y, z, from.e);
        let targets = self.segment_targets(&from, &to, feedrate_mm_min)?;
        let saved_multiplier = self.state.feed_multiplier;
        self.state.feed_multiplier = 100.0;
        self.submit(&targets, feedrate_mm_min);
        self.state.feed_multiplier = saved_multiplier;
        self.state.current_position = to;
        self.state.destination = to;
        self.synchronize()
    }

    pub fn do_blocking_move_to_z(&mut self, z: f64, feedrate_mm_min: f64) -> Result<(), GcodeError> {
        let p = self.state.current_position;
        self.do_blocking_move_to(p.x, p.y, z, feedrate_mm_min)
    }

    /// Arc move in the XY plane with linear Z and E interpolation
    ///
    /// A start equal to the end point is a full circle. Segments are at most
    /// `mm_per_arc_segment` long; the radius vector is rotated incrementally
    /// and recomputed exactly every `n_arc_correction` segments, or on every
    /// segment when the per-segment sweep is too coarse for the small-angle
    /// rotation.
    pub fn plan_arc(&mut self, arc: ArcRequest, feedrate_mm_min: f64) -> Result<(), GcodeError> {
        self.refresh_cmd_timeout();
        let start = self.state.current_position;
        let mut end = arc.target;
        if !end.is_finite() || !arc.offset.iter().all(|v| v.is_finite()) {
            return Err(GcodeError::invalid('I', "G2/G3 bad parameters"));
        }
        if self.config.motion.soft_endstops {
            self.state.clamp_to_software_endstops(&mut end);
        }

        let [ox, oy] = arc.offset;
        let radius = ox.hypot(oy);
        let (cx, cy) = (start.x + ox, start.y + oy);
        let linear_travel = end.z - start.z;
        let extruder_travel = end.e - start.e;
        let (mut rx, mut ry) = (-ox, -oy);
        let (rtx, rty) = (end.x - cx, end.y - cy);

        let tau = std::f64::consts::TAU;
        let mut angular_travel = (rx * rty - ry * rtx).atan2(rx * rtx + ry * rty);
        if angular_travel < 0.0 {
            angular_travel += tau;
        }
        if arc.clockwise {
            angular_travel -= tau;
        }
        // Closed arcs are full turns; atan2 leaves a rounding residue there.
        if (end.x - start.x).hypot(end.y - start.y) < ARC_CLOSE_EPSILON {
            angular_travel = if arc.clockwise { -tau } else { tau };
        }

        let mm_of_travel = (angular_travel * radius).hypot(linear_travel.abs());
        if mm_of_travel < 0.001 {
            return Ok(());
        }
        let segments = ((mm_of_travel / self.config.motion.mm_per_arc_segment).floor() as usize).max(1);
        let theta_per_segment = angular_travel / segments as f64;
        let linear_per_segment = linear_travel / segments as f64;
        let extruder_per_segment = extruder_travel / segments as f64;
        let cos_t = 1.0 - 0.5 * theta_per_segment * theta_per_segment;
        let sin_t = theta_per_segment;
        let correction = if theta_per_segment.abs() > ARC_MAX_LINEARIZED_ANGLE {
            1
        } else {
            self.config.motion.n_arc_correction.max(1) as usize
        };

        let mut points = Vec::with_capacity(segments);
        let mut arc_target = start;
        let mut count = 0;
        for i in 1..segments {
            count += 1;
            if count < correction {
                let r_new_y = rx * sin_t + ry * cos_t;
                rx = rx * cos_t - ry * sin_t;
                ry = r_new_y;
            } else {
                let angle = i as f64 * theta_per_segment;
                let (sin_ti, cos_ti) = angle.sin_cos();
                rx = -ox * cos_ti + oy * sin_ti;
                ry = -ox * sin_ti - oy * cos_ti;
                count = 0;
            }
            arc_target.x = cx + rx;
            arc_target.y = cy + ry;
            arc_target.z += linear_per_segment;
            arc_target.e += extruder_per_segment;
            let mut p = arc_target;
            if self.config.motion.soft_endstops {
                self.state.clamp_to_software_endstops(&mut p);
            }
            points.push(p);
        }
        points.push(end);

        self.check_homed_for(&end)?;
        for p in &points {
            self.check_reach(p)?;
        }
        let mut targets = Vec::new();
        let mut previous = start;
        for p in &points {
            targets.extend(self.segment_targets(&previous, p, feedrate_mm_min)?);
            previous = *p;
        }

        let start_e = start.e;
        self.guard_extrusion(&mut end);
        if end.e != start_e && self.state.current_position.e == end.e {
            // E frozen: the arc runs without extrusion
            for t in &mut targets {
                t.1 = end.e;
            }
        }
        self.submit(&targets, feedrate_mm_min);

        self.state.current_position = end;
        self.state.destination = end;
        tracing::trace!("Arc of {} segments to {}", segments, end);
        Ok(())
    }

    /// Firmware retract or recover for the active tool (G10/G11)
    pub fn retract(&mut self, retracting: bool, swapping: bool) -> Result<(), GcodeError> {
        let tool = self.state.active_tool;
        if self.state.retracted.get(tool).copied() == Some(retracting) {
            return Ok(());
        }
        let r = self.config.retract.clone();
        let volumetric = self.state.volumetric_multiplier.get(tool).copied().unwrap_or(1.0);
        let old_feedrate = self.state.feedrate_mm_min;
        self.state.destination = self.state.current_position;

        if retracting {
            self.state.feedrate_mm_min = r.feedrate_mm_s * 60.0;
            let length = if swapping { r.swap_length } else { r.length };
            self.state.current_position.e += length / volumetric;
            self.sync_plan_position_e();
            self.prepare_move_to_destination()?;
            if r.zlift > 0.01 {
                self.state.hop_height = self.state.current_position.z;
                self.state.current_position.z -= r.zlift;
                self.sync_plan_position()?;
                self.prepare_move_to_destination()?;
            }
        } else {
            if r.zlift > 0.01 && self.state.hop_height <= self.state.current_position.z {
                self.state.current_position.z += r.zlift;
                self.sync_plan_position()?;
            }
            self.state.feedrate_mm_min = r.recover_feedrate_mm_s * 60.0;
            let length = if swapping {
                r.swap_length + r.swap_recover_length
            } else {
                r.length + r.recover_length
            };
            self.state.current_position.e -= length / volumetric;
            self.sync_plan_position_e();
            self.prepare_move_to_destination()?;
        }

        self.state.feedrate_mm_min = old_feedrate;
        if let Some(flag) = self.state.retracted.get_mut(tool) {
            *flag = retracting;
        }
        if let Some(flag) = self.state.retracted_swap.get_mut(tool) {
            *flag = retracting && swapping;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_radius_form_center() {
        let start = Position::new(0.0, 0.0, 0.0, 0.0);
        let target = Position::new(20.0, 0.0, 0.0, 0.0);
        let arc = ArcRequest::from_radius(&start, target, 10.0, true).unwrap();
        assert!((arc.offset[0] - 10.0).abs() < 1e-12);
        assert!(arc.offset[1].abs() < 1e-12);

        let arc = ArcRequest::from_radius(&start, Position::new(10.0, 10.0, 0.0, 0.0), 10.0, false)
            .unwrap();
        // Counter-clockwise quarter circle with the center on the left.
        assert!((arc.offset[0] - 0.0).abs() < 1e-9);
        assert!((arc.offset[1] - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_radius_form_rejects_short_radius() {
        let start = Position::default();
        let err = ArcRequest::from_radius(&start, Position::new(30.0, 0.0, 0.0, 0.0), 10.0, true)
            .unwrap_err();
        assert!(matches!(err, GcodeError::InvalidParameter { param: 'R', .. }));
    }

    #[test]
    fn test_mesh_crossings_are_sorted() {
        let mesh = MeshGrid::new(3, 3, [0.0, 0.0], [100.0, 100.0]).unwrap();
        let from = Position::new(10.0, 10.0, 0.0, 0.0);
        let to = Position::new(90.0, 70.0, 0.0, 0.0);
        let ts = mesh_crossings(&mesh, &from, &to);
        // x = 50 at t = 0.5, y = 50 at t = 2/3.
        assert_eq!(ts.len(), 2);
        assert!((ts[0] - 0.5).abs() < 1e-12);
        assert!((ts[1] - 2.0 / 3.0).abs() < 1e-12);
    }
}

//! Z probing and bed leveling
//!
//! A probe sample lowers the carriage in actuator space until the probe
//! triggers, backs off and approaches again at a quarter of the speed. The
//! bed height at the probe tip is the nozzle height plus the probe's Z
//! offset. G29 builds one of three corrections from the samples: a
//! least-squares plane, the plane through three points, or a mesh of Z
//! offsets.

use crate::context::Context;
use crate::devices::StopMode;
use printcore_core::{GcodeError, XYZ};
use printcore_kinematics::{
    fit_plane_least_squares, plane_through_points, BedLevel, MeshGrid, PlaneCorrection, PlaneFit,
};
use printcore_settings::{GeometryKind, LevelingKind};

/// One probed bed height
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProbeSample {
    /// Probe tip X
    pub x: f64,
    /// Probe tip Y
    pub y: f64,
    /// Bed height
    pub z: f64,
}

impl ProbeSample {
    pub fn report(&self) -> String {
        format!("Bed X: {:.3} Y: {:.3} Z: {:.3}", self.x, self.y, self.z)
    }
}

fn probe_error(reason: String) -> GcodeError {
    GcodeError::ProbeFailed { reason }
}

impl Context {
    fn require_probe(&self) -> Result<(), GcodeError> {
        if self.config.probe.enabled && self.probe.is_some() {
            Ok(())
        } else {
            Err(GcodeError::Unsupported {
                feature: "Z probe".to_string(),
            })
        }
    }

    fn require_xyz_homed(&self) -> Result<(), GcodeError> {
        if self.state.homed.all_xyz() {
            Ok(())
        } else {
            Err(GcodeError::NotHomed {
                axes: self.state.homed.missing_xyz(),
            })
        }
    }

    /// M401
    pub fn deploy_probe(&mut self) -> Result<(), GcodeError> {
        self.require_probe()?;
        let Some(probe) = self.probe.as_mut() else {
            return Ok(());
        };
        if !probe.is_deployed() {
            probe.deploy().map_err(probe_error)?;
            tracing::debug!("Probe deployed");
        }
        Ok(())
    }

    /// M402
    pub fn stow_probe(&mut self) -> Result<(), GcodeError> {
        self.require_probe()?;
        let Some(probe) = self.probe.as_mut() else {
            return Ok(());
        };
        if probe.is_deployed() {
            probe.stow().map_err(probe_error)?;
            tracing::debug!("Probe stowed");
        }
        Ok(())
    }

    pub(crate) fn probe_triggered(&self) -> bool {
        self.probe.as_ref().is_some_and(|p| p.is_triggered())
    }

    /// Vertical move of the carriage by `dz` in actuator space
    fn actuator_z_move(&mut self, dz: f64, feedrate_mm_min: f64) -> Result<(), GcodeError> {
        let delta = if self.config.geometry == GeometryKind::Delta {
            [dz; XYZ]
        } else {
            [0.0, 0.0, dz]
        };
        self.actuator_move(delta, feedrate_mm_min)
    }

    /// Lower until the probe triggers; returns the nozzle Z at the trigger
    ///
    /// A probe that never triggers is fatal.
    pub fn run_z_probe(&mut self) -> Result<f64, GcodeError> {
        let feedrate = self.config.probe.feedrate_mm_min;
        let depth = 1.5 * self.config.axes.z.max_length();
        let bump = self.config.axes.z.home_bump_mm;

        self.planner.set_stop_mode(StopMode::Probe);
        self.actuator_z_move(-depth, feedrate)?;
        if !self.probe_triggered() {
            self.planner.set_stop_mode(self.idle_stop_mode());
            return Err(probe_error("Z probe did not trigger".to_string()));
        }

        self.planner.set_stop_mode(StopMode::None);
        self.actuator_z_move(bump, feedrate)?;
        self.planner.set_stop_mode(StopMode::Probe);
        self.actuator_z_move(-2.0 * bump, feedrate / 4.0)?;
        let triggered = self.probe_triggered();
        self.planner.set_stop_mode(self.idle_stop_mode());
        if !triggered {
            return Err(probe_error("Z probe did not trigger on the second approach".to_string()));
        }

        self.set_current_from_steppers()?;
        self.sync_plan_position()?;
        self.state.destination = self.state.current_position;
        Ok(self.state.current_position.z)
    }

    /// Raise Z to at least `height`
    fn raise_to(&mut self, height: f64) -> Result<(), GcodeError> {
        if self.state.current_position.z < height {
            let feedrate = self.config.axes.z.homing_feedrate_mm_min;
            self.do_blocking_move_to_z(height, feedrate)?;
        }
        Ok(())
    }

    /// Put the probe tip over (x, y) and sample the bed
    pub fn probe_point(&mut self, x: f64, y: f64, clearance: f64) -> Result<ProbeSample, GcodeError> {
        let nozzle_x = x - self.config.probe.x_offset;
        let nozzle_y = y - self.config.probe.y_offset;
        if !self.probe_reachable(nozzle_x, nozzle_y) {
            return Err(GcodeError::ProbeOutOfBounds);
        }

        self.raise_to(clearance)?;
        let z = self.state.current_position.z;
        let feedrate = self.config.probe.travel_feedrate_mm_min;
        self.do_blocking_move_to(nozzle_x, nozzle_y, z, feedrate)?;
        self.deploy_probe()?;
        let nozzle_z = self.run_z_probe()?;

        let sample = ProbeSample {
            x,
            y,
            z: nozzle_z + self.config.probe.z_offset,
        };
        tracing::debug!("{}", sample.report());
        self.raise_to(nozzle_z + self.config.probe.z_raise_between_probings)?;
        Ok(sample)
    }

    /// Nozzle position (x, y) is inside the machine envelope
    fn probe_reachable(&self, x: f64, y: f64) -> bool {
        match self.kinematics.printable_radius() {
            Some(radius) => x.hypot(y) <= radius + 1e-6,
            None => {
                let inside = |axis: usize, v: f64| {
                    v >= self.state.soft_min[axis] - 1e-6 && v <= self.state.soft_max[axis] + 1e-6
                };
                inside(0, x) && inside(1, y)
            }
        }
    }

    /// G30: probe the bed under the current position
    pub fn single_probe(&mut self) -> Result<ProbeSample, GcodeError> {
        self.require_probe()?;
        self.require_xyz_homed()?;
        let x = self.state.current_position.x + self.config.probe.x_offset;
        let y = self.state.current_position.y + self.config.probe.y_offset;
        let clearance = self.config.probe.z_raise_between_probings;
        let sample = self.probe_point(x, y, clearance);
        let stowed = self.stow_probe();
        let sample = sample?;
        stowed?;
        Ok(sample)
    }

    /// G29 probing pass: sample the configured points and install the
    /// correction
    ///
    /// Samples are reported when `verbose` is at least 3.
    pub fn level_bed(&mut self, verbose: u8) -> Result<(), GcodeError> {
        let kind = self.config.leveling.kind;
        if kind == LevelingKind::None {
            return Err(GcodeError::Unsupported {
                feature: "Bed leveling".to_string(),
            });
        }
        self.require_probe()?;
        self.require_xyz_homed()?;

        self.leveling.reset();
        self.set_current_from_steppers()?;
        self.sync_plan_position()?;

        let result = self.probe_and_build(kind, verbose);
        let stowed = self.stow_probe();
        let model = result?;
        stowed?;

        let description = match &model {
            BedLevel::Identity => "identity".to_string(),
            BedLevel::Plane(_) => "plane".to_string(),
            BedLevel::Mesh(mesh) => format!("{}x{} mesh", mesh.nx(), mesh.ny()),
        };
        self.leveling.set(model);
        self.set_current_from_steppers()?;
        self.sync_plan_position()?;
        self.state.destination = self.state.current_position;
        tracing::info!("Bed leveling installed: {}", description);
        Ok(())
    }

    fn probe_and_build(&mut self, kind: LevelingKind, verbose: u8) -> Result<BedLevel, GcodeError> {
        let delta = self.config.geometry == GeometryKind::Delta;
        match kind {
            LevelingKind::ThreePoint if !delta => {
                let mut points = [[0.0; XYZ]; 3];
                let configured = self.config.leveling.three_points;
                for (i, [x, y]) in configured.into_iter().enumerate() {
                    let sample = self.probe_next(x, y, i, verbose)?;
                    points[i] = [sample.x, sample.y, sample.z];
                }
                let plane = plane_through_points(points)?;
                self.plane_model(&plane)
            }
            LevelingKind::PlaneGrid if !delta => {
                let samples = self.probe_grid(verbose)?;
                let points: Vec<[f64; XYZ]> = samples
                    .iter()
                    .flatten()
                    .flatten()
                    .map(|s| [s.x, s.y, s.z])
                    .collect();
                let plane = fit_plane_least_squares(&points)?;
                if verbose >= 1 {
                    self.echo(format!(
                        "Eqn coefficients: a: {:.8} b: {:.8} d: {:.8}",
                        plane.a, plane.b, plane.d
                    ));
                }
                self.plane_model(&plane)
            }
            _ => {
                let mesh = self.probe_mesh(verbose)?;
                Ok(BedLevel::Mesh(mesh))
            }
        }
    }

    fn plane_model(&mut self, plane: &PlaneFit) -> Result<BedLevel, GcodeError> {
        let correction = PlaneCorrection::from_plane(plane)?;
        Ok(BedLevel::Plane(correction))
    }

    fn probe_next(&mut self, x: f64, y: f64, index: usize, verbose: u8) -> Result<ProbeSample, GcodeError> {
        let clearance = if index == 0 {
            self.config.probe.z_raise_before_probing
        } else {
            self.config.probe.z_raise_between_probings
        };
        let sample = self.probe_point(x, y, clearance)?;
        if verbose >= 3 {
            self.send(printcore_communication::Response::raw(sample.report()));
        }
        Ok(sample)
    }

    fn leveling_grid(&self) -> Result<MeshGrid, GcodeError> {
        let l = &self.config.leveling;
        let n = l.grid_points;
        Ok(MeshGrid::new(n, n, [l.left, l.front], [l.right, l.back])?)
    }

    /// Probe the configured grid in zig-zag order
    ///
    /// Points whose nozzle position lies outside a Delta's printable disk
    /// are skipped and left as `None`.
    fn probe_grid(&mut self, verbose: u8) -> Result<Vec<Vec<Option<ProbeSample>>>, GcodeError> {
        let grid = self.leveling_grid()?;
        let (nx, ny) = (grid.nx(), grid.ny());
        let mut samples = vec![vec![None; nx]; ny];
        let mut index = 0;
        for iy in 0..ny {
            let columns: Vec<usize> = if iy % 2 == 0 {
                (0..nx).collect()
            } else {
                (0..nx).rev().collect()
            };
            for ix in columns {
                let (x, y) = (grid.x_at(ix), grid.y_at(iy));
                let nozzle_x = x - self.config.probe.x_offset;
                let nozzle_y = y - self.config.probe.y_offset;
                if !self.probe_reachable(nozzle_x, nozzle_y) {
                    tracing::debug!("Skipping unreachable probe point X{:.3} Y{:.3}", x, y);
                    continue;
                }
                samples[iy][ix] = Some(self.probe_next(x, y, index, verbose)?);
                index += 1;
            }
        }
        Ok(samples)
    }

    fn probe_mesh(&mut self, verbose: u8) -> Result<MeshGrid, GcodeError> {
        let mut mesh = self.leveling_grid()?;
        let samples = self.probe_grid(verbose)?;
        for (iy, row) in samples.iter().enumerate() {
            for (ix, sample) in row.iter().enumerate() {
                if let Some(sample) = sample {
                    mesh.set(ix, iy, sample.z);
                }
            }
        }
        if !mesh.is_complete() {
            mesh.extrapolate_missing();
        }
        if !mesh.is_complete() {
            return Err(probe_error("no reachable probe points".to_string()));
        }
        Ok(mesh)
    }

    /// Lines of a mesh report, back row first
    pub fn mesh_report(mesh: &MeshGrid) -> Vec<String> {
        mesh.rows()
            .into_iter()
            .map(|row| {
                row.into_iter()
                    .map(|z| z.map_or_else(|| "   ?   ".to_string(), |z| format!("{:+.3}", z)))
                    .collect::<Vec<_>>()
                    .join(" ")
            })
            .collect()
    }

    /// G29 S3: set one mesh value by 1-based grid index
    pub fn set_mesh_value(&mut self, ix: usize, iy: usize, z: f64) -> Result<(), GcodeError> {
        let mut mesh = match self.leveling.model() {
            BedLevel::Mesh(mesh) => mesh.clone(),
            _ => self.leveling_grid()?,
        };
        if ix == 0 || ix > mesh.nx() {
            return Err(GcodeError::invalid('X', format!("index must be 1..{}", mesh.nx())));
        }
        if iy == 0 || iy > mesh.ny() {
            return Err(GcodeError::invalid('Y', format!("index must be 1..{}", mesh.ny())));
        }
        if !z.is_finite() {
            return Err(GcodeError::invalid('Z', "not a number"));
        }
        mesh.set(ix - 1, iy - 1, z);

        if let BedLevel::Mesh(existing) = self.leveling.model_mut() {
            *existing = mesh;
        } else {
            let complete = mesh.is_complete();
            self.leveling.set(BedLevel::Mesh(mesh));
            self.leveling.set_enabled(complete);
        }
        if self.leveling.is_active() {
            self.set_current_from_steppers()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_report_format() {
        let sample = ProbeSample {
            x: 15.0,
            y: 20.5,
            z: -0.125,
        };
        assert_eq!(sample.report(), "Bed X: 15.000 Y: 20.500 Z: -0.125");
    }

    #[test]
    fn test_mesh_report_marks_missing_points() {
        let mut mesh = MeshGrid::new(2, 2, [0.0, 0.0], [10.0, 10.0]).unwrap();
        mesh.set(0, 0, 0.5);
        mesh.set(1, 1, -0.25);
        let lines = Context::mesh_report(&mesh);
        assert_eq!(lines, vec!["   ?    -0.250", "+0.500    ?   "]);
    }
}

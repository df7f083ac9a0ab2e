//! Linear delta kinematics.
//!
//! Three carriages ride vertical towers placed at 210°, 330° and 90° around
//! the bed center. Each carriage is joined to the effector by a pair of
//! diagonal rods, so a carriage height is the rod's vertical projection
//! above the effector.

use crate::mathutil::{
    vector_add, vector_cross, vector_dot, vector_mag_sq, vector_mul_scalar, vector_sub, Vector3d,
};
use crate::{Kinematics, Segmentation};
use printcore_core::{ActuatorPosition, KinematicsError, Position};
use printcore_settings::{DeltaSettings, GeometryKind};

const TOWER_ANGLES_DEG: [f64; 3] = [210.0, 330.0, 90.0];

#[derive(Debug, Clone)]
pub struct DeltaKinematics {
    settings: DeltaSettings,
    towers: [[f64; 2]; 3],
    rod_sq: [f64; 3],
}

impl DeltaKinematics {
    pub fn new(settings: &DeltaSettings) -> Result<Self, KinematicsError> {
        let mut kin = Self {
            settings: settings.clone(),
            towers: [[0.0; 2]; 3],
            rod_sq: [0.0; 3],
        };
        kin.set_delta_constants(settings)?;
        Ok(kin)
    }

    /// Recompute tower positions and rod lengths after any correction changed
    pub fn set_delta_constants(&mut self, settings: &DeltaSettings) -> Result<(), KinematicsError> {
        let mut towers = [[0.0; 2]; 3];
        let mut rod_sq = [0.0; 3];
        for i in 0..3 {
            let radius = settings.radius + settings.tower_adj[3 + i];
            let angle = (TOWER_ANGLES_DEG[i] + settings.tower_adj[i]).to_radians();
            towers[i] = [radius * angle.cos(), radius * angle.sin()];

            let rod = settings.diagonal_rod + settings.diagrod_adj[i];
            if rod <= 0.0 || radius <= 0.0 {
                return Err(KinematicsError::DegenerateGeometry {
                    reason: format!("tower {} has rod {rod} and radius {radius}", i + 1),
                });
            }
            rod_sq[i] = rod * rod;
        }

        self.settings = settings.clone();
        self.towers = towers;
        self.rod_sq = rod_sq;
        tracing::debug!(
            "Delta constants: rod {} radius {} towers {:?}",
            settings.diagonal_rod,
            settings.radius,
            towers
        );
        Ok(())
    }

    /// XY position of tower `i`
    pub fn tower(&self, i: usize) -> [f64; 2] {
        self.towers[i]
    }

    pub fn settings(&self) -> &DeltaSettings {
        &self.settings
    }

    /// Carriage heights with the effector at the origin
    pub fn carriage_clearance(&self) -> Result<ActuatorPosition, KinematicsError> {
        self.inverse(&Position::default())
    }
}

impl Kinematics for DeltaKinematics {
    fn kind(&self) -> GeometryKind {
        GeometryKind::Delta
    }

    fn inverse(&self, logical: &Position) -> Result<ActuatorPosition, KinematicsError> {
        let mut actuator = ActuatorPosition::default();
        for i in 0..3 {
            let dx = self.towers[i][0] - logical.x;
            let dy = self.towers[i][1] - logical.y;
            let radicand = self.rod_sq[i] - dx * dx - dy * dy;
            if radicand < 0.0 || !radicand.is_finite() {
                return Err(KinematicsError::Unreachable {
                    x: logical.x,
                    y: logical.y,
                    z: logical.z,
                });
            }
            actuator[i] = radicand.sqrt() + logical.z;
        }
        Ok(actuator)
    }

    fn forward(&self, actuator: &ActuatorPosition) -> Result<Position, KinematicsError> {
        let t1: Vector3d = [self.towers[0][0], self.towers[0][1], actuator[0]];
        let t2: Vector3d = [self.towers[1][0], self.towers[1][1], actuator[1]];
        let t3: Vector3d = [self.towers[2][0], self.towers[2][1], actuator[2]];

        let degenerate = || KinematicsError::DegenerateGeometry {
            reason: "delta towers are collinear".to_string(),
        };

        let p12 = vector_sub(t2, t1);
        let d = vector_mag_sq(p12).sqrt();
        if d < 1e-9 {
            return Err(degenerate());
        }
        let ex = vector_mul_scalar(p12, 1.0 / d);

        let p13 = vector_sub(t3, t1);
        let i = vector_dot(ex, p13);
        let ey_raw = vector_sub(p13, vector_mul_scalar(ex, i));
        let j = vector_mag_sq(ey_raw).sqrt();
        if j < 1e-9 {
            return Err(degenerate());
        }
        let ey = vector_mul_scalar(ey_raw, 1.0 / j);
        let ez = vector_cross(ex, ey);

        let xn = (self.rod_sq[0] - self.rod_sq[1] + d * d) / (2.0 * d);
        let yn = ((self.rod_sq[0] - self.rod_sq[2] + i * i + j * j) / 2.0 - i * xn) / j;
        let zn_sq = self.rod_sq[0] - xn * xn - yn * yn;
        if zn_sq < 0.0 {
            return Err(KinematicsError::Unreachable {
                x: actuator[0],
                y: actuator[1],
                z: actuator[2],
            });
        }
        let zn = zn_sq.sqrt();

        // The effector hangs below the carriages.
        let p = vector_sub(
            vector_add(
                vector_add(t1, vector_mul_scalar(ex, xn)),
                vector_mul_scalar(ey, yn),
            ),
            vector_mul_scalar(ez, zn),
        );
        Ok(Position::new(p[0], p[1], p[2], 0.0))
    }

    fn segmentation(&self) -> Option<Segmentation> {
        Some(Segmentation {
            segments_per_second: self.settings.segments_per_second,
            segment_length_mm: self.settings.segment_length_mm,
        })
    }

    fn printable_radius(&self) -> Option<f64> {
        Some(self.settings.printable_radius)
    }
}

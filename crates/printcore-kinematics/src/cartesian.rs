//! Cartesian and Core geometries.
//!
//! Logical and actuator space coincide for all of them. The Core variants
//! differ only in how the stepper layer mixes two axes onto two motors, which
//! [`CartesianKinematics::motor_mix`] exposes for position reports.

use crate::Kinematics;
use printcore_core::{ActuatorPosition, KinematicsError, Position};
use printcore_settings::GeometryKind;

#[derive(Debug, Clone)]
pub struct CartesianKinematics {
    kind: GeometryKind,
}

impl CartesianKinematics {
    pub fn new(kind: GeometryKind) -> Self {
        debug_assert!(!kind.is_nonlinear());
        Self { kind }
    }
}

impl Kinematics for CartesianKinematics {
    fn kind(&self) -> GeometryKind {
        self.kind
    }

    fn inverse(&self, logical: &Position) -> Result<ActuatorPosition, KinematicsError> {
        Ok(ActuatorPosition::from_xyz(logical))
    }

    fn forward(&self, actuator: &ActuatorPosition) -> Result<Position, KinematicsError> {
        Ok(Position::new(actuator[0], actuator[1], actuator[2], 0.0))
    }

    fn motor_mix(&self, actuator: &ActuatorPosition) -> [f64; 3] {
        let [x, y, z] = actuator.axes;
        match self.kind {
            GeometryKind::CoreXY => [x + y, x - y, z],
            GeometryKind::CoreYX => [x + y, y - x, z],
            GeometryKind::CoreXZ => [x + z, y, x - z],
            GeometryKind::CoreZX => [x + z, y, z - x],
            _ => [x, y, z],
        }
    }
}

//! # printcore Kinematics
//!
//! Transforms between logical positions (X, Y, Z in millimetres) and actuator
//! positions for every supported machine geometry, plus bed leveling
//! correction.
//!
//! The geometry is chosen once from the machine configuration with
//! [`build`]; everything above this crate talks to the [`Kinematics`] trait
//! only.

pub mod cartesian;
pub mod delta;
pub mod leveling;
pub mod mathutil;
pub mod scara;

pub use cartesian::CartesianKinematics;
pub use delta::DeltaKinematics;
pub use leveling::{
    fit_plane_least_squares, plane_through_points, BedLevel, BedLeveling, MeshGrid,
    PlaneCorrection, PlaneFit,
};
pub use scara::ScaraKinematics;

use printcore_core::{ActuatorPosition, KinematicsError, Position};
use printcore_settings::{GeometryKind, MachineConfig};
use std::fmt::Debug;

/// How a straight logical move is cut into actuator-space segments
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Segmentation {
    /// Target segment rate
    pub segments_per_second: f64,
    /// Fixed segment length in mm; takes precedence when positive
    pub segment_length_mm: f64,
}

impl Segmentation {
    /// Number of segments for a move of `length_mm`
    ///
    /// `feedrate_mm_min` is the commanded feedrate and `feed_multiplier` the
    /// M220 percentage. Always at least one.
    pub fn segment_count(&self, length_mm: f64, feedrate_mm_min: f64, feed_multiplier: f64) -> usize {
        if !(length_mm > 0.0) {
            return 1;
        }
        let segments = if self.segment_length_mm > 0.0 {
            (length_mm / self.segment_length_mm).ceil()
        } else {
            let rate = feedrate_mm_min * feed_multiplier;
            if !(rate > 0.0) {
                return 1;
            }
            let seconds = 6000.0 * length_mm / rate;
            (self.segments_per_second * seconds).floor()
        };
        if segments.is_finite() && segments >= 1.0 {
            segments as usize
        } else {
            1
        }
    }
}

/// Logical ⇄ actuator transform for one machine geometry
pub trait Kinematics: Send + Debug {
    /// Geometry implemented
    fn kind(&self) -> GeometryKind;

    /// Actuator position for a logical position; E is ignored
    fn inverse(&self, logical: &Position) -> Result<ActuatorPosition, KinematicsError>;

    /// Logical position for an actuator position; the result has E = 0
    fn forward(&self, actuator: &ActuatorPosition) -> Result<Position, KinematicsError>;

    /// Segmentation for straight moves, `None` when actuator space is linear
    fn segmentation(&self) -> Option<Segmentation> {
        None
    }

    /// Radius of the printable disk for geometries bounded by one
    fn printable_radius(&self) -> Option<f64> {
        None
    }

    /// Motor positions as the stepper layer drives them
    fn motor_mix(&self, actuator: &ActuatorPosition) -> [f64; 3] {
        actuator.axes
    }

    /// Inverse transform of the leveled physical point
    fn inverse_leveled(
        &self,
        logical: &Position,
        leveling: &BedLeveling,
    ) -> Result<ActuatorPosition, KinematicsError> {
        let [x, y, z] = leveling.apply([logical.x, logical.y, logical.z]);
        self.inverse(&Position::new(x, y, z, logical.e))
    }

    /// Forward transform followed by removal of the leveling correction
    fn forward_leveled(
        &self,
        actuator: &ActuatorPosition,
        leveling: &BedLeveling,
    ) -> Result<Position, KinematicsError> {
        let physical = self.forward(actuator)?;
        let [x, y, z] = leveling.unapply([physical.x, physical.y, physical.z]);
        Ok(Position::new(x, y, z, 0.0))
    }
}

/// Kinematics for the configured geometry
pub fn build(config: &MachineConfig) -> Result<Box<dyn Kinematics>, KinematicsError> {
    let kinematics: Box<dyn Kinematics> = match config.geometry {
        GeometryKind::Delta => Box::new(DeltaKinematics::new(&config.delta)?),
        GeometryKind::Scara => Box::new(ScaraKinematics::new(&config.scara)?),
        kind => Box::new(CartesianKinematics::new(kind)),
    };
    tracing::info!("Kinematics: {}", config.geometry);
    Ok(kinematics)
}

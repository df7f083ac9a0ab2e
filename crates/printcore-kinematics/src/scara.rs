//! Two-link SCARA kinematics.
//!
//! Actuator A is the inner arm angle and B the absolute outer arm angle, both
//! in degrees. Only the elbow configuration with a positive sine is used.

use crate::{Kinematics, Segmentation};
use printcore_core::{ActuatorPosition, KinematicsError, Position};
use printcore_settings::{GeometryKind, ScaraSettings};

#[derive(Debug, Clone)]
pub struct ScaraKinematics {
    settings: ScaraSettings,
}

impl ScaraKinematics {
    pub fn new(settings: &ScaraSettings) -> Result<Self, KinematicsError> {
        if settings.linkage_1 <= 0.0 || settings.linkage_2 <= 0.0 {
            return Err(KinematicsError::DegenerateGeometry {
                reason: format!(
                    "SCARA links must be positive, got {} and {}",
                    settings.linkage_1, settings.linkage_2
                ),
            });
        }
        Ok(Self {
            settings: settings.clone(),
        })
    }

    pub fn settings(&self) -> &ScaraSettings {
        &self.settings
    }

    /// Arm angles in degrees for the configured home position
    pub fn home_angles(&self) -> [f64; 2] {
        self.settings.home_angles
    }
}

impl Kinematics for ScaraKinematics {
    fn kind(&self) -> GeometryKind {
        GeometryKind::Scara
    }

    fn inverse(&self, logical: &Position) -> Result<ActuatorPosition, KinematicsError> {
        let s = &self.settings;
        let (l1, l2) = (s.linkage_1, s.linkage_2);
        let sx = logical.x * s.scale[0] - s.offset[0];
        let sy = logical.y * s.scale[1] - s.offset[1];
        let r_sq = sx * sx + sy * sy;

        let c2 = if l1 == l2 {
            r_sq / (2.0 * l1 * l1) - 1.0
        } else {
            (r_sq - l1 * l1 - l2 * l2) / (2.0 * l1 * l2)
        };
        if !(-1.0..=1.0).contains(&c2) {
            return Err(KinematicsError::Unreachable {
                x: logical.x,
                y: logical.y,
                z: logical.z,
            });
        }
        let s2 = (1.0 - c2 * c2).sqrt();
        let k1 = l1 + l2 * c2;
        let k2 = l2 * s2;

        let theta = k1.atan2(k2) - sx.atan2(sy);
        let psi = s2.atan2(c2);

        Ok(ActuatorPosition::new(
            theta.to_degrees(),
            (theta + psi).to_degrees(),
            logical.z,
        ))
    }

    fn forward(&self, actuator: &ActuatorPosition) -> Result<Position, KinematicsError> {
        let s = &self.settings;
        let a = actuator[0].to_radians();
        let b = actuator[1].to_radians();
        let sx = s.linkage_1 * a.cos() + s.linkage_2 * b.cos();
        let sy = s.linkage_1 * a.sin() + s.linkage_2 * b.sin();
        Ok(Position::new(
            (sx + s.offset[0]) / s.scale[0],
            (sy + s.offset[1]) / s.scale[1],
            actuator[2],
            0.0,
        ))
    }

    fn segmentation(&self) -> Option<Segmentation> {
        Some(Segmentation {
            segments_per_second: self.settings.segments_per_second,
            segment_length_mm: 0.0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_straight_arm_along_y() {
        let settings = ScaraSettings {
            offset: [0.0, 0.0],
            ..ScaraSettings::default()
        };
        let kin = ScaraKinematics::new(&settings).unwrap();
        // Fully stretched along +Y: both links point at 90°.
        let a = kin.inverse(&Position::new(0.0, 300.0, 0.0, 0.0)).unwrap();
        assert!((a[0] - 90.0).abs() < 1e-6);
        assert!((a[1] - 90.0).abs() < 1e-6);
    }

    #[test]
    fn test_round_trip_unequal_arms() {
        let settings = ScaraSettings {
            linkage_1: 150.0,
            linkage_2: 120.0,
            ..ScaraSettings::default()
        };
        let kin = ScaraKinematics::new(&settings).unwrap();
        let p = Position::new(40.0, 80.0, 3.0, 0.0);
        let back = kin.forward(&kin.inverse(&p).unwrap()).unwrap();
        assert!((back.x - p.x).abs() < 1e-9);
        assert!((back.y - p.y).abs() < 1e-9);
        assert_eq!(back.z, 3.0);
    }

    #[test]
    fn test_out_of_reach() {
        let kin = ScaraKinematics::new(&ScaraSettings::default()).unwrap();
        let far = Position::new(400.0, 400.0, 0.0, 0.0);
        assert!(matches!(
            kin.inverse(&far),
            Err(KinematicsError::Unreachable { .. })
        ));
    }

    #[test]
    fn test_elbow_positive() {
        let kin = ScaraKinematics::new(&ScaraSettings::default()).unwrap();
        let a = kin.inverse(&Position::new(0.0, 100.0, 0.0, 0.0)).unwrap();
        // Outer arm is rotated counter-clockwise from the inner arm.
        assert!(a[1] > a[0]);
    }
}

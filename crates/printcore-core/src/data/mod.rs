//! Data models for positions and axes
//!
//! This module provides:
//! - The four logical axes (X, Y, Z, E) and their letters
//! - Logical positions in millimetres
//! - Actuator positions (tower heights, arm angles, or plain X/Y/Z)
//! - Per-axis flag sets used for homed/known tracking

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Index, IndexMut};

/// Number of positional axes (X, Y, Z)
pub const XYZ: usize = 3;
/// Number of logical axes including the extruder
pub const XYZE: usize = 4;

/// Logical machine axis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Axis {
    /// X axis
    X,
    /// Y axis
    Y,
    /// Z axis
    Z,
    /// Extruder axis
    E,
}

impl Axis {
    /// All axes in index order
    pub const ALL: [Axis; XYZE] = [Axis::X, Axis::Y, Axis::Z, Axis::E];
    /// Positional axes only
    pub const XYZ: [Axis; XYZ] = [Axis::X, Axis::Y, Axis::Z];

    /// Array index of this axis
    pub fn index(self) -> usize {
        match self {
            Axis::X => 0,
            Axis::Y => 1,
            Axis::Z => 2,
            Axis::E => 3,
        }
    }

    /// G-code parameter letter for this axis
    pub fn letter(self) -> char {
        match self {
            Axis::X => 'X',
            Axis::Y => 'Y',
            Axis::Z => 'Z',
            Axis::E => 'E',
        }
    }

    /// Axis for a parameter letter
    pub fn from_letter(letter: char) -> Option<Self> {
        match letter.to_ascii_uppercase() {
            'X' => Some(Axis::X),
            'Y' => Some(Axis::Y),
            'Z' => Some(Axis::Z),
            'E' => Some(Axis::E),
            _ => None,
        }
    }
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.letter())
    }
}

/// Logical position (X, Y, Z, E) in millimetres
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    /// X-axis position
    pub x: f64,
    /// Y-axis position
    pub y: f64,
    /// Z-axis position
    pub z: f64,
    /// Extruder position
    pub e: f64,
}

impl Position {
    /// Create a new position
    pub fn new(x: f64, y: f64, z: f64, e: f64) -> Self {
        Self { x, y, z, e }
    }

    /// Create a position from an axis-indexed array
    pub fn from_array(values: [f64; XYZE]) -> Self {
        Self::new(values[0], values[1], values[2], values[3])
    }

    /// Axis-indexed copy of this position
    pub fn to_array(&self) -> [f64; XYZE] {
        [self.x, self.y, self.z, self.e]
    }

    /// Euclidean distance in XYZ to another position
    pub fn distance_xyz(&self, other: &Position) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        (dx * dx + dy * dy + dz * dz).sqrt()
    }

    /// Distance from the Z axis (radius in the XY plane)
    pub fn radius_xy(&self) -> f64 {
        self.x.hypot(self.y)
    }

    /// Linear interpolation between `self` and `other`
    pub fn lerp(&self, other: &Position, t: f64) -> Position {
        Position {
            x: self.x + (other.x - self.x) * t,
            y: self.y + (other.y - self.y) * t,
            z: self.z + (other.z - self.z) * t,
            e: self.e + (other.e - self.e) * t,
        }
    }

    /// True when every component is finite
    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite() && self.e.is_finite()
    }
}

impl Index<Axis> for Position {
    type Output = f64;

    fn index(&self, axis: Axis) -> &f64 {
        match axis {
            Axis::X => &self.x,
            Axis::Y => &self.y,
            Axis::Z => &self.z,
            Axis::E => &self.e,
        }
    }
}

impl IndexMut<Axis> for Position {
    fn index_mut(&mut self, axis: Axis) -> &mut f64 {
        match axis {
            Axis::X => &mut self.x,
            Axis::Y => &mut self.y,
            Axis::Z => &mut self.z,
            Axis::E => &mut self.e,
        }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "X:{:.2} Y:{:.2} Z:{:.2} E:{:.2}",
            self.x, self.y, self.z, self.e
        )
    }
}

/// Actuator-space position
///
/// The three driven coordinates of the mechanism: carriage heights for a
/// Delta, arm angles in degrees for a SCARA (plus Z), plain X/Y/Z otherwise.
/// Derived from a [`Position`] by the inverse transform; never authoritative.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ActuatorPosition {
    /// Actuator values A, B, C
    pub axes: [f64; XYZ],
}

impl ActuatorPosition {
    /// Create an actuator position
    pub fn new(a: f64, b: f64, c: f64) -> Self {
        Self { axes: [a, b, c] }
    }

    /// Identity mapping from a logical position
    pub fn from_xyz(position: &Position) -> Self {
        Self::new(position.x, position.y, position.z)
    }

    /// Add the same offset to every actuator
    pub fn offset_all(&self, offset: f64) -> Self {
        Self::new(
            self.axes[0] + offset,
            self.axes[1] + offset,
            self.axes[2] + offset,
        )
    }

    /// True when every component is finite
    pub fn is_finite(&self) -> bool {
        self.axes.iter().all(|v| v.is_finite())
    }
}

impl Index<usize> for ActuatorPosition {
    type Output = f64;

    fn index(&self, index: usize) -> &f64 {
        &self.axes[index]
    }
}

impl IndexMut<usize> for ActuatorPosition {
    fn index_mut(&mut self, index: usize) -> &mut f64 {
        &mut self.axes[index]
    }
}

impl fmt::Display for ActuatorPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "A:{:.2} B:{:.2} C:{:.2}",
            self.axes[0], self.axes[1], self.axes[2]
        )
    }
}

/// A boolean per logical axis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AxisFlags(pub [bool; XYZE]);

impl AxisFlags {
    /// Every axis set
    pub const ALL: AxisFlags = AxisFlags([true; XYZE]);

    /// Flag value for an axis
    pub fn get(&self, axis: Axis) -> bool {
        self.0[axis.index()]
    }

    /// Set the flag for an axis
    pub fn set(&mut self, axis: Axis, value: bool) {
        self.0[axis.index()] = value;
    }

    /// True when X, Y and Z are all set
    pub fn all_xyz(&self) -> bool {
        self.0[..XYZ].iter().all(|v| *v)
    }

    /// True when any of X, Y and Z is set
    pub fn any_xyz(&self) -> bool {
        self.0[..XYZ].iter().any(|v| *v)
    }

    /// Slash separated letters of the positional axes that are NOT set,
    /// e.g. `X/Z`
    pub fn missing_xyz(&self) -> String {
        Axis::XYZ
            .iter()
            .filter(|axis| !self.get(**axis))
            .map(|axis| axis.letter().to_string())
            .collect::<Vec<_>>()
            .join("/")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_position_indexing() {
        let mut p = Position::new(1.0, 2.0, 3.0, 4.0);
        assert_eq!(p[Axis::Z], 3.0);
        p[Axis::E] = 10.0;
        assert_eq!(p.e, 10.0);
        assert_eq!(p.to_array(), [1.0, 2.0, 3.0, 10.0]);
    }

    #[test]
    fn test_position_lerp_endpoints() {
        let a = Position::new(0.0, 0.0, 0.0, 0.0);
        let b = Position::new(10.0, -10.0, 5.0, 1.0);
        assert_eq!(a.lerp(&b, 0.0), a);
        assert_eq!(a.lerp(&b, 1.0), b);
        assert_eq!(a.lerp(&b, 0.5), Position::new(5.0, -5.0, 2.5, 0.5));
    }

    #[test]
    fn test_axis_letters_round_trip() {
        for axis in Axis::ALL {
            assert_eq!(Axis::from_letter(axis.letter()), Some(axis));
        }
        assert_eq!(Axis::from_letter('x'), Some(Axis::X));
        assert_eq!(Axis::from_letter('F'), None);
    }

    #[test]
    fn test_axis_flags_missing() {
        let mut flags = AxisFlags::default();
        assert_eq!(flags.missing_xyz(), "X/Y/Z");
        flags.set(Axis::Y, true);
        assert_eq!(flags.missing_xyz(), "X/Z");
        flags.set(Axis::X, true);
        flags.set(Axis::Z, true);
        assert!(flags.all_xyz());
        assert_eq!(flags.missing_xyz(), "");
    }

    #[test]
    fn test_position_display() {
        let p = Position::new(1.0, 2.5, 3.25, 0.0);
        assert_eq!(p.to_string(), "X:1.00 Y:2.50 Z:3.25 E:0.00");
    }
}

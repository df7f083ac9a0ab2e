//! # printcore Core
//!
//! Core types shared by every printcore crate: the axis and position model,
//! unit systems, the layered error types and a few sharing aliases used by the
//! simulated collaborators.

pub mod data;
pub mod error;
pub mod types;
pub mod units;

pub use data::{ActuatorPosition, Axis, AxisFlags, Position, XYZ, XYZE};

pub use error::{
    Error, FramingError, GcodeError, KinematicsError, QueueError, Result, Severity,
};

pub use types::{thread_safe, ThreadSafe, ThreadSafeVec};

pub use units::{LinearUnit, TemperatureUnit};

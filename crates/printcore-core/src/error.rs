//! Error handling for printcore
//!
//! Provides error types for every layer of the command pipeline:
//! - Kinematics errors (numeric domain violations, degenerate geometry)
//! - Framing errors (line numbers and checksums at the transport)
//! - Queue errors (command ring buffer)
//! - G-code errors (handler refusals and invalid parameters)
//!
//! All error types use `thiserror`. The `Display` text of the transport and
//! handler errors is exactly what the host sees after the `Error:` or `echo:`
//! prefix, so hosts that pattern-match firmware messages keep working.

use thiserror::Error;

/// How a diagnostic is presented to the host and what it does to the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Informational diagnostic, `echo:` prefix. Processing continues.
    Echo,
    /// Recoverable error, `Error:` prefix. Processing continues.
    Error,
    /// Unrecoverable. The control loop halts after disabling everything.
    Fatal,
}

/// Kinematics error type
///
/// Raised by the inverse and forward transforms when a target has no real
/// solution or the configured geometry cannot produce one.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum KinematicsError {
    /// Target lies outside the physical reach of the mechanism
    #[error("Target X:{x:.3} Y:{y:.3} Z:{z:.3} is outside the reachable envelope")]
    Unreachable {
        /// Requested X
        x: f64,
        /// Requested Y
        y: f64,
        /// Requested Z
        z: f64,
    },

    /// Geometry parameters that make the transform undefined
    #[error("Degenerate geometry: {reason}")]
    DegenerateGeometry {
        /// What made the geometry degenerate.
        reason: String,
    },

    /// Not enough probe samples to fit a correction
    #[error("Need at least {needed} probe points, got {got}")]
    InsufficientSamples {
        /// Minimum number of samples.
        needed: usize,
        /// Samples available.
        got: usize,
    },
}

/// Framing error type
///
/// Transport-layer violations of the line-number / checksum protocol. Every
/// variant carries the last accepted line number so the host can be asked to
/// resend `last + 1`.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramingError {
    /// `N<k>` where `k != last + 1` and the line is not `M110`
    #[error("Line Number is not Last Line Number+1, Last Line: {last}")]
    LineNumberOutOfSequence {
        /// Line number found on the line.
        got: i64,
        /// Last accepted line number.
        last: i64,
    },

    /// Checksum present but wrong
    #[error("checksum mismatch, Last Line: {last}")]
    ChecksumMismatch {
        /// Last accepted line number.
        last: i64,
    },

    /// Line number present without a checksum
    #[error("No Checksum with line number, Last Line: {last}")]
    MissingChecksum {
        /// Last accepted line number.
        last: i64,
    },

    /// Checksum present without a line number
    #[error("No Line Number with checksum, Last Line: {last}")]
    ChecksumWithoutLineNumber {
        /// Last accepted line number.
        last: i64,
    },
}

impl FramingError {
    /// Last accepted line number at the time of the error
    pub fn last_line(&self) -> i64 {
        match *self {
            Self::LineNumberOutOfSequence { last, .. }
            | Self::ChecksumMismatch { last }
            | Self::MissingChecksum { last }
            | Self::ChecksumWithoutLineNumber { last } => last,
        }
    }

    /// The line the host has to send again
    pub fn resend_line(&self) -> i64 {
        self.last_line() + 1
    }
}

/// Command queue error type
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    /// All slots are occupied; the producer must retry later
    #[error("Command queue is full ({capacity} entries)")]
    Full {
        /// Queue capacity.
        capacity: usize,
    },

    /// Comment lines are never queued
    #[error("Comment lines are not queued")]
    Comment,

    /// Nothing to enqueue
    #[error("Empty command")]
    Empty,
}

/// G-Code error type
///
/// Represents handler-level failures. The dispatcher turns each into a
/// diagnostic line (see [`GcodeError::severity`]) and still acknowledges the
/// command, except for fatal errors which halt the loop.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GcodeError {
    /// Letter/number pair with no handler, or a line with no command at all
    #[error("Unknown command: \"{command}\"")]
    UnknownCommand {
        /// The offending command text.
        command: String,
    },

    /// Tool index outside the configured tool count
    #[error("T{tool} Invalid extruder")]
    InvalidExtruder {
        /// Requested tool index.
        tool: u32,
    },

    /// Parameter present but unusable
    #[error("Invalid parameter '{param}': {reason}")]
    InvalidParameter {
        /// Parameter letter.
        param: char,
        /// Why the value is rejected.
        reason: String,
    },

    /// Required parameter absent
    #[error("Missing parameter '{param}'")]
    MissingParameter {
        /// Parameter letter.
        param: char,
    },

    /// Operation requires homed axes
    #[error("Home {axes} first")]
    NotHomed {
        /// Axes that still need homing, e.g. "X/Y/Z".
        axes: String,
    },

    /// Delta destination beyond the printable radius
    #[error("Move out of reach")]
    OutOfReach {
        /// Requested X.
        x: f64,
        /// Requested Y.
        y: f64,
    },

    /// Probe position outside the bed
    #[error("Z probe out of bounds")]
    ProbeOutOfBounds,

    /// M428 requested too far from the home position
    #[error("Too far from reference point")]
    TooFarFromReference,

    /// Motion refused because the machine is in the soft-stopped state
    #[error("Printer stopped due to errors. Fix the error and use M999 to restart.")]
    Stopped,

    /// Kinematic transform failed
    #[error(transparent)]
    Kinematics(#[from] KinematicsError),

    /// Probe did not trigger or could not be used
    #[error("Probe failed: {reason}")]
    ProbeFailed {
        /// What went wrong.
        reason: String,
    },

    /// Operation not possible with the current build configuration
    #[error("{feature} not supported by this configuration")]
    Unsupported {
        /// Name of the feature.
        feature: String,
    },

    /// SD card operation failed
    #[error("{reason}")]
    SdCard {
        /// Human readable failure.
        reason: String,
    },

    /// Settings store failure
    #[error("Settings error: {reason}")]
    Settings {
        /// Human readable failure.
        reason: String,
    },

    /// The control loop was halted while the handler ran
    #[error("Printer halted: {reason}")]
    Halted {
        /// Why the loop halted.
        reason: String,
    },
}

impl GcodeError {
    /// Create an invalid parameter error
    pub fn invalid(param: char, reason: impl Into<String>) -> Self {
        Self::InvalidParameter {
            param,
            reason: reason.into(),
        }
    }

    /// How the dispatcher reports this error
    pub fn severity(&self) -> Severity {
        match self {
            Self::UnknownCommand { .. }
            | Self::InvalidExtruder { .. }
            | Self::InvalidParameter { .. }
            | Self::MissingParameter { .. }
            | Self::NotHomed { .. }
            | Self::Unsupported { .. }
            | Self::SdCard { .. }
            | Self::OutOfReach { .. }
            | Self::ProbeOutOfBounds => Severity::Echo,
            Self::Stopped
            | Self::Kinematics(_)
            | Self::Settings { .. }
            | Self::TooFarFromReference => Severity::Error,
            Self::ProbeFailed { .. } | Self::Halted { .. } => Severity::Fatal,
        }
    }

    /// Check if this error halts the control loop
    pub fn is_fatal(&self) -> bool {
        self.severity() == Severity::Fatal
    }
}

/// Main error type for printcore
///
/// A unified error type that can represent any error from all layers.
#[derive(Error, Debug)]
pub enum Error {
    /// Kinematics error
    #[error(transparent)]
    Kinematics(#[from] KinematicsError),

    /// Framing error
    #[error(transparent)]
    Framing(#[from] FramingError),

    /// Queue error
    #[error(transparent)]
    Queue(#[from] QueueError),

    /// G-Code error
    #[error(transparent)]
    Gcode(#[from] GcodeError),

    /// Standard I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create an error from a string message
    pub fn other(msg: impl Into<String>) -> Self {
        Error::Other(msg.into())
    }

    /// Check if this is a transport framing error
    pub fn is_framing_error(&self) -> bool {
        matches!(self, Error::Framing(_))
    }

    /// Check if this is a G-Code error
    pub fn is_gcode_error(&self) -> bool {
        matches!(self, Error::Gcode(_))
    }
}

/// Result type using Error
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_framing_messages_match_host_expectations() {
        let err = FramingError::ChecksumMismatch { last: 41 };
        assert_eq!(err.to_string(), "checksum mismatch, Last Line: 41");
        assert_eq!(err.resend_line(), 42);

        let err = FramingError::LineNumberOutOfSequence { got: 50, last: 41 };
        assert_eq!(
            err.to_string(),
            "Line Number is not Last Line Number+1, Last Line: 41"
        );
    }

    #[test]
    fn test_gcode_error_severity() {
        let unknown = GcodeError::UnknownCommand {
            command: "M999999".to_string(),
        };
        assert_eq!(unknown.severity(), Severity::Echo);
        assert_eq!(unknown.to_string(), "Unknown command: \"M999999\"");

        assert_eq!(GcodeError::Stopped.severity(), Severity::Error);
        assert!(GcodeError::ProbeFailed {
            reason: "no trigger".to_string()
        }
        .is_fatal());
    }

    #[test]
    fn test_error_conversion() {
        let err: Error = QueueError::Full { capacity: 4 }.into();
        assert!(matches!(err, Error::Queue(_)));

        let gcode: GcodeError = KinematicsError::Unreachable {
            x: 200.0,
            y: 0.0,
            z: 0.0,
        }
        .into();
        assert_eq!(gcode.severity(), Severity::Error);
        let err: Error = gcode.into();
        assert!(err.is_gcode_error());
    }
}

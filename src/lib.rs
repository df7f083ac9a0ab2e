//! # printcore
//!
//! Command-and-motion core of a 3D printer firmware, runnable on a host
//! against simulated hardware.
//!
//! ## Architecture
//!
//! printcore is organized as a workspace with multiple crates:
//!
//! 1. **printcore-core** - Positions, axes, units and the error taxonomy
//! 2. **printcore-settings** - Machine configuration and persisted settings (M500-M503)
//! 3. **printcore-kinematics** - Cartesian, Core, Delta and SCARA transforms, bed leveling
//! 4. **printcore-communication** - Command queue, serial framing, SD reader, macro injection
//! 5. **printcore-gcode** - Parser, dispatcher, handlers, motion preparation, homing, probing
//! 6. **printcore** - Host binary that streams G-code into a simulated printer

pub mod cli;

pub use printcore_core::{Error, GcodeError, Position, Result};
pub use printcore_gcode::{FirmwareInfo, PrinterBuilder, SimulatedPrinter};
pub use printcore_settings::{GeometryKind, MachineConfig};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build date (set at compile time)
pub const BUILD_DATE: &str = env!("BUILD_DATE");

/// Firmware identity reported by M115
pub fn firmware_info() -> FirmwareInfo {
    FirmwareInfo {
        name: "printcore".to_string(),
        version: VERSION.to_string(),
        build_date: BUILD_DATE.to_string(),
    }
}

/// Initialize logging
///
/// Logs go to stderr so stdout carries only the host protocol. `RUST_LOG`
/// overrides the default INFO level; `json` switches to one JSON object per
/// event.
pub fn init_logging(json: bool) -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(tracing::Level::INFO.to_string()));

    if json {
        let fmt_layer = fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_target(true);
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()?;
    } else {
        let fmt_layer = fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_level(true)
            .with_line_number(true);
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()?;
    }

    Ok(())
}

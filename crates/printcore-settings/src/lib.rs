//! printcore Settings Crate
//!
//! Handles the machine configuration loaded at boot and the persisted,
//! run-time adjustable settings behind M500-M503.

pub mod config;
pub mod error;
pub mod persistence;

pub use config::{
    AxesSettings, AxisSettings, DeltaSettings, ExtruderSettings, GeometryKind, HomingSettings,
    HostSettings, LevelingKind, LevelingSettings, MachineConfig, MotionLimits, ProbeSettings,
    QueueSettings, RetractSettings, SafetySettings, ScaraSettings, ThermalSettings,
};
pub use error::{ConfigError, ConfigResult, PersistenceError, SettingsError, SettingsResult};
pub use persistence::{
    report_lines, FileSettingsStore, MemorySettingsStore, PersistedSettings, SettingsStore,
    SETTINGS_VERSION,
};

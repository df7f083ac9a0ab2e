//! Settings Persistence
//!
//! Handles saving and restoring the run-time adjustable subset of the machine
//! configuration (M500/M501/M502/M503). The snapshot is versioned so that a
//! store written by an incompatible layout is rejected instead of being
//! misread.

use crate::config::{GeometryKind, MachineConfig, RetractSettings};
use crate::error::{PersistenceError, SettingsError, SettingsResult};
use parking_lot::Mutex;
use printcore_core::{XYZ, XYZE};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Layout version written with every snapshot
pub const SETTINGS_VERSION: &str = "V1";

/// Snapshot of the persisted machine settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedSettings {
    /// Layout version
    pub version: String,
    /// Steps per unit X, Y, Z, E
    pub steps_per_unit: [f64; XYZE],
    /// Maximum feedrates, mm/s
    pub max_feedrate_mm_s: [f64; XYZE],
    /// Maximum accelerations, mm/s²
    pub max_acceleration: [f64; XYZE],
    /// Print, retract and travel acceleration, mm/s²
    pub accelerations: [f64; 3],
    /// Minimum feedrate, mm/s
    pub min_feedrate_mm_s: f64,
    /// Minimum travel feedrate, mm/s
    pub min_travel_feedrate_mm_s: f64,
    /// Minimum segment time, µs
    pub min_segment_time_us: u64,
    /// XY, Z and E jerk, mm/s
    pub jerk: [f64; 3],
    /// Home offset, mm
    pub home_offset: [f64; XYZ],
    /// Delta endstop corrections
    pub delta_endstop_adj: [f64; XYZ],
    /// Delta tower radius
    pub delta_radius: f64,
    /// Delta diagonal rod
    pub delta_diagonal_rod: f64,
    /// Delta segments per second
    pub delta_segments_per_second: f64,
    /// Delta tower angle and radius corrections
    pub delta_tower_adj: [f64; 6],
    /// Delta diagonal rod corrections
    pub delta_diagrod_adj: [f64; XYZ],
    /// Probe Z offset
    pub probe_z_offset: f64,
    /// Per-tool offsets
    pub tool_offsets: Vec<[f64; XYZ]>,
    /// Preheat presets
    pub preheat: [[f64; 3]; 2],
    /// Firmware retraction
    pub retract: RetractSettings,
    /// Volumetric extrusion
    pub volumetric_enabled: bool,
    /// Filament diameters
    pub filament_diameter: Vec<f64>,
}

impl PersistedSettings {
    /// Capture the persisted subset of a configuration
    pub fn from_config(config: &MachineConfig) -> Self {
        let m = &config.motion;
        let d = &config.delta;
        Self {
            version: SETTINGS_VERSION.to_string(),
            steps_per_unit: m.steps_per_unit,
            max_feedrate_mm_s: m.max_feedrate_mm_s,
            max_acceleration: m.max_acceleration,
            accelerations: [m.acceleration, m.retract_acceleration, m.travel_acceleration],
            min_feedrate_mm_s: m.min_feedrate_mm_s,
            min_travel_feedrate_mm_s: m.min_travel_feedrate_mm_s,
            min_segment_time_us: m.min_segment_time_us,
            jerk: [m.max_xy_jerk, m.max_z_jerk, m.max_e_jerk],
            home_offset: config.homing.home_offset,
            delta_endstop_adj: d.endstop_adj,
            delta_radius: d.radius,
            delta_diagonal_rod: d.diagonal_rod,
            delta_segments_per_second: d.segments_per_second,
            delta_tower_adj: d.tower_adj,
            delta_diagrod_adj: d.diagrod_adj,
            probe_z_offset: config.probe.z_offset,
            tool_offsets: config.extruders.offsets.clone(),
            preheat: config.thermal.preheat,
            retract: config.retract.clone(),
            volumetric_enabled: config.extruders.volumetric_enabled,
            filament_diameter: config.extruders.filament_diameter.clone(),
        }
    }

    /// Write the snapshot into a configuration
    ///
    /// Per-tool tables are only taken over when their length matches the
    /// configured tool count.
    pub fn apply_to(&self, config: &mut MachineConfig) -> SettingsResult<()> {
        if self.version != SETTINGS_VERSION {
            return Err(PersistenceError::VersionMismatch {
                found: self.version.clone(),
                expected: SETTINGS_VERSION.to_string(),
            }
            .into());
        }

        let m = &mut config.motion;
        m.steps_per_unit = self.steps_per_unit;
        m.max_feedrate_mm_s = self.max_feedrate_mm_s;
        m.max_acceleration = self.max_acceleration;
        [m.acceleration, m.retract_acceleration, m.travel_acceleration] = self.accelerations;
        m.min_feedrate_mm_s = self.min_feedrate_mm_s;
        m.min_travel_feedrate_mm_s = self.min_travel_feedrate_mm_s;
        m.min_segment_time_us = self.min_segment_time_us;
        [m.max_xy_jerk, m.max_z_jerk, m.max_e_jerk] = self.jerk;

        config.homing.home_offset = self.home_offset;

        let d = &mut config.delta;
        d.endstop_adj = self.delta_endstop_adj;
        d.radius = self.delta_radius;
        d.diagonal_rod = self.delta_diagonal_rod;
        d.segments_per_second = self.delta_segments_per_second;
        d.tower_adj = self.delta_tower_adj;
        d.diagrod_adj = self.delta_diagrod_adj;

        config.probe.z_offset = self.probe_z_offset;
        if self.tool_offsets.len() == config.extruders.count {
            config.extruders.offsets = self.tool_offsets.clone();
        }
        if self.filament_diameter.len() == config.extruders.count {
            config.extruders.filament_diameter = self.filament_diameter.clone();
        }
        config.extruders.volumetric_enabled = self.volumetric_enabled;
        config.thermal.preheat = self.preheat;
        config.retract = self.retract.clone();

        config
            .validate()
            .map_err(|e| PersistenceError::ValidationFailed(e.to_string()))?;
        Ok(())
    }
}

/// Human readable settings report in G-code form (M503)
///
/// Each entry is one line without the `echo:` prefix; section titles are
/// followed by the command that would restore the values.
pub fn report_lines(config: &MachineConfig) -> Vec<String> {
    let m = &config.motion;
    let mut lines = vec![
        "Steps per unit:".to_string(),
        format!(
            "  M92 X{:.2} Y{:.2} Z{:.2} E{:.2}",
            m.steps_per_unit[0], m.steps_per_unit[1], m.steps_per_unit[2], m.steps_per_unit[3]
        ),
        "Maximum feedrates (mm/s):".to_string(),
        format!(
            "  M203 X{:.2} Y{:.2} Z{:.2} E{:.2}",
            m.max_feedrate_mm_s[0],
            m.max_feedrate_mm_s[1],
            m.max_feedrate_mm_s[2],
            m.max_feedrate_mm_s[3]
        ),
        "Maximum Acceleration (mm/s2):".to_string(),
        format!(
            "  M201 X{} Y{} Z{} E{}",
            m.max_acceleration[0] as i64,
            m.max_acceleration[1] as i64,
            m.max_acceleration[2] as i64,
            m.max_acceleration[3] as i64
        ),
        "Accelerations: P=printing, R=retract and T=travel".to_string(),
        format!(
            "  M204 P{:.2} R{:.2} T{:.2}",
            m.acceleration, m.retract_acceleration, m.travel_acceleration
        ),
        "Advanced variables: S=Min feedrate (mm/s), T=Min travel feedrate (mm/s), B=minimum segment time (ms), X=maximum XY jerk (mm/s), Z=maximum Z jerk (mm/s), E=maximum E jerk (mm/s)".to_string(),
        format!(
            "  M205 S{:.2} T{:.2} B{} X{:.2} Z{:.2} E{:.2}",
            m.min_feedrate_mm_s,
            m.min_travel_feedrate_mm_s,
            m.min_segment_time_us,
            m.max_xy_jerk,
            m.max_z_jerk,
            m.max_e_jerk
        ),
        "Home offset (mm):".to_string(),
        format!(
            "  M206 X{:.2} Y{:.2} Z{:.2}",
            config.homing.home_offset[0], config.homing.home_offset[1], config.homing.home_offset[2]
        ),
    ];

    if config.geometry == GeometryKind::Delta {
        let d = &config.delta;
        lines.push("Endstop adjustment (mm):".to_string());
        lines.push(format!(
            "  M666 X{:.2} Y{:.2} Z{:.2}",
            d.endstop_adj[0], d.endstop_adj[1], d.endstop_adj[2]
        ));
        lines.push(
            "Delta settings: L=diagonal_rod, R=radius, S=segments_per_second, ABC=diagonal_rod_trim_tower_[123]"
                .to_string(),
        );
        lines.push(format!(
            "  M665 L{:.2} R{:.2} S{:.2} A{:.2} B{:.2} C{:.2}",
            d.diagonal_rod,
            d.radius,
            d.segments_per_second,
            d.diagrod_adj[0],
            d.diagrod_adj[1],
            d.diagrod_adj[2]
        ));
    }

    if config.extruders.count > 1 {
        lines.push("Hotend offsets (mm):".to_string());
        for (tool, offset) in config.extruders.offsets.iter().enumerate().skip(1) {
            lines.push(format!(
                "  M218 T{} X{:.2} Y{:.2} Z{:.2}",
                tool, offset[0], offset[1], offset[2]
            ));
        }
    }

    if config.probe.enabled {
        lines.push("Z-Probe Offset (mm):".to_string());
        lines.push(format!("  M851 Z{:.2}", config.probe.z_offset));
    }

    let r = &config.retract;
    lines.push("Retract: S=Length (mm) F:Speed (mm/m) Z: ZLift (mm)".to_string());
    lines.push(format!(
        "  M207 S{:.2} F{:.2} Z{:.2}",
        r.length,
        r.feedrate_mm_s * 60.0,
        r.zlift
    ));
    lines.push("Recover: S=Extra length (mm) F:Speed (mm/m)".to_string());
    lines.push(format!(
        "  M208 S{:.2} F{:.2}",
        r.recover_length,
        r.recover_feedrate_mm_s * 60.0
    ));
    lines.push("Auto-Retract: S=0 to disable, 1 to interpret extrude-only moves as retracts or recoveries".to_string());
    lines.push(format!("  M209 S{}", u8::from(r.autoretract_enabled)));

    lines.push("Filament settings:".to_string());
    if config.extruders.volumetric_enabled {
        for (tool, diameter) in config.extruders.filament_diameter.iter().enumerate() {
            lines.push(format!("  M200 T{} D{:.2}", tool, diameter));
        }
    } else {
        lines.push("  Disabled".to_string());
    }

    lines
}

/// Backing store for persisted settings
pub trait SettingsStore: Send {
    /// Read the stored snapshot, `None` when nothing has been saved yet
    fn load(&mut self) -> SettingsResult<Option<PersistedSettings>>;

    /// Replace the stored snapshot
    fn save(&mut self, settings: &PersistedSettings) -> SettingsResult<()>;

    /// Where the settings live, for diagnostics
    fn describe(&self) -> String;
}

/// TOML file store
#[derive(Debug, Clone)]
pub struct FileSettingsStore {
    path: PathBuf,
}

impl FileSettingsStore {
    /// Store at an explicit path
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store in the platform config directory
    pub fn default_location() -> SettingsResult<Self> {
        let dir = dirs::config_dir().ok_or_else(|| {
            SettingsError::ConfigDirectory("no platform config directory".to_string())
        })?;
        Ok(Self::new(dir.join("printcore").join("settings.toml")))
    }

    /// Path of the settings file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SettingsStore for FileSettingsStore {
    fn load(&mut self) -> SettingsResult<Option<PersistedSettings>> {
        if !self.path.exists() {
            tracing::debug!("No stored settings at {}", self.path.display());
            return Ok(None);
        }
        let content = std::fs::read_to_string(&self.path)
            .map_err(SettingsError::read(&self.path))?;
        let settings: PersistedSettings = toml::from_str(&content)?;
        Ok(Some(settings))
    }

    fn save(&mut self, settings: &PersistedSettings) -> SettingsResult<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(SettingsError::write(parent))?;
        }
        let content = toml::to_string_pretty(settings)?;
        std::fs::write(&self.path, content)
            .map_err(SettingsError::write(&self.path))?;
        tracing::info!("Settings stored to {}", self.path.display());
        Ok(())
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// In-memory store; clones share the stored snapshot
#[derive(Debug, Clone, Default)]
pub struct MemorySettingsStore {
    stored: Arc<Mutex<Option<PersistedSettings>>>,
}

impl MemorySettingsStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Current snapshot, if any
    pub fn snapshot(&self) -> Option<PersistedSettings> {
        self.stored.lock().clone()
    }
}

impl SettingsStore for MemorySettingsStore {
    fn load(&mut self) -> SettingsResult<Option<PersistedSettings>> {
        Ok(self.stored.lock().clone())
    }

    fn save(&mut self, settings: &PersistedSettings) -> SettingsResult<()> {
        *self.stored.lock() = Some(settings.clone());
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

//! Machine configuration for printcore
//!
//! Provides the machine description loaded at boot, its validation, and JSON
//! or TOML file handling.
//!
//! Configuration is organized into logical sections:
//! - Geometry kind and per-axis travel/homing parameters
//! - Delta and SCARA mechanism dimensions
//! - Motion limits, arc and segmentation parameters
//! - Extruders, firmware retraction and thermal waits
//! - Bed leveling, probe and safety guards
//! - Command queue and host protocol options

use crate::error::{ConfigError, ConfigResult, SettingsError, SettingsResult};
use printcore_core::{Axis, XYZ, XYZE};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Machine geometry kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GeometryKind {
    /// Independent X, Y and Z axes
    #[default]
    Cartesian,
    /// CoreXY belt arrangement
    CoreXY,
    /// CoreYX belt arrangement
    CoreYX,
    /// CoreXZ belt arrangement
    CoreXZ,
    /// CoreZX belt arrangement
    CoreZX,
    /// Linear delta with three vertical towers
    Delta,
    /// Two-link SCARA arm
    Scara,
}

impl GeometryKind {
    /// Actuator space is not a linear image of logical space
    pub fn is_nonlinear(self) -> bool {
        matches!(self, Self::Delta | Self::Scara)
    }

    /// One of the Core belt arrangements
    pub fn is_core(self) -> bool {
        matches!(self, Self::CoreXY | Self::CoreYX | Self::CoreXZ | Self::CoreZX)
    }
}

impl fmt::Display for GeometryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Cartesian => "Cartesian",
            Self::CoreXY => "CoreXY",
            Self::CoreYX => "CoreYX",
            Self::CoreXZ => "CoreXZ",
            Self::CoreZX => "CoreZX",
            Self::Delta => "Delta",
            Self::Scara => "SCARA",
        };
        write!(f, "{}", name)
    }
}

impl FromStr for GeometryKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "cartesian" => Ok(Self::Cartesian),
            "corexy" => Ok(Self::CoreXY),
            "coreyx" => Ok(Self::CoreYX),
            "corexz" => Ok(Self::CoreXZ),
            "corezx" => Ok(Self::CoreZX),
            "delta" => Ok(Self::Delta),
            "scara" => Ok(Self::Scara),
            _ => Err(ConfigError::UnknownGeometry(s.to_string())),
        }
    }
}

/// Travel and homing parameters of one positional axis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AxisSettings {
    /// Minimum travel position (mm)
    pub min_pos: f64,
    /// Maximum travel position (mm)
    pub max_pos: f64,
    /// Endstop direction, -1 (min) or 1 (max)
    pub home_dir: i8,
    /// Back-off distance between coarse and fine seek (mm)
    pub home_bump_mm: f64,
    /// Divisor applied to the homing feedrate for the fine seek
    pub home_bump_divisor: f64,
    /// Coarse seek feedrate (mm/min)
    pub homing_feedrate_mm_min: f64,
    /// Logical position written on homing. Defaults to the endstop side bound.
    #[serde(default)]
    pub home_pos: Option<f64>,
}

impl AxisSettings {
    fn linear(max_pos: f64, bump: f64, divisor: f64, feedrate: f64) -> Self {
        Self {
            min_pos: 0.0,
            max_pos,
            home_dir: -1,
            home_bump_mm: bump,
            home_bump_divisor: divisor,
            homing_feedrate_mm_min: feedrate,
            home_pos: None,
        }
    }

    /// Total travel length
    pub fn max_length(&self) -> f64 {
        self.max_pos - self.min_pos
    }

    /// Logical position of the endstop before home offsets are applied
    pub fn base_home_pos(&self) -> f64 {
        self.home_pos.unwrap_or(if self.home_dir < 0 {
            self.min_pos
        } else {
            self.max_pos
        })
    }

    fn validate(&self, name: &str) -> ConfigResult<()> {
        if !(self.min_pos < self.max_pos) {
            return Err(ConfigError::Inconsistent(format!(
                "{name}.min_pos must be below {name}.max_pos"
            )));
        }
        if self.home_dir != -1 && self.home_dir != 1 {
            return Err(ConfigError::out_of_range(
                &format!("{name}.home_dir"),
                self.home_dir,
            ));
        }
        if self.home_bump_mm < 0.0 {
            return Err(ConfigError::out_of_range(
                &format!("{name}.home_bump_mm"),
                self.home_bump_mm,
            ));
        }
        if self.home_bump_divisor <= 0.0 {
            return Err(ConfigError::out_of_range(
                &format!("{name}.home_bump_divisor"),
                self.home_bump_divisor,
            ));
        }
        if self.homing_feedrate_mm_min <= 0.0 {
            return Err(ConfigError::out_of_range(
                &format!("{name}.homing_feedrate_mm_min"),
                self.homing_feedrate_mm_min,
            ));
        }
        Ok(())
    }
}

/// Per-axis settings for X, Y and Z
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AxesSettings {
    /// X axis
    pub x: AxisSettings,
    /// Y axis
    pub y: AxisSettings,
    /// Z axis
    pub z: AxisSettings,
}

impl AxesSettings {
    /// Settings for a positional axis; E has no travel settings
    pub fn get(&self, axis: Axis) -> Option<&AxisSettings> {
        match axis {
            Axis::X => Some(&self.x),
            Axis::Y => Some(&self.y),
            Axis::Z => Some(&self.z),
            Axis::E => None,
        }
    }

    /// Settings by index 0..3
    pub fn by_index(&self, index: usize) -> &AxisSettings {
        match index {
            0 => &self.x,
            1 => &self.y,
            _ => &self.z,
        }
    }
}

impl Default for AxesSettings {
    fn default() -> Self {
        Self {
            x: AxisSettings::linear(200.0, 5.0, 2.0, 3000.0),
            y: AxisSettings::linear(200.0, 5.0, 2.0, 3000.0),
            z: AxisSettings::linear(200.0, 2.0, 4.0, 240.0),
        }
    }
}

/// Delta mechanism dimensions and calibration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeltaSettings {
    /// Diagonal rod length, joint to joint (mm)
    pub diagonal_rod: f64,
    /// Horizontal distance from effector center to carriage joints (mm)
    pub radius: f64,
    /// Radius of the printable disk (mm)
    pub printable_radius: f64,
    /// Segmentation rate for straight moves
    pub segments_per_second: f64,
    /// Fixed segment length (mm); zero selects segments per second
    #[serde(default)]
    pub segment_length_mm: f64,
    /// Tower angle corrections (deg) then tower radius corrections (mm)
    #[serde(default)]
    pub tower_adj: [f64; 6],
    /// Per-tower diagonal rod corrections (mm)
    #[serde(default)]
    pub diagrod_adj: [f64; XYZ],
    /// Per-tower endstop corrections (mm, non-positive)
    #[serde(default)]
    pub endstop_adj: [f64; XYZ],
}

impl Default for DeltaSettings {
    fn default() -> Self {
        Self {
            diagonal_rod: 250.0,
            radius: 124.0,
            printable_radius: 90.0,
            segments_per_second: 200.0,
            segment_length_mm: 0.0,
            tower_adj: [0.0; 6],
            diagrod_adj: [0.0; XYZ],
            endstop_adj: [0.0; XYZ],
        }
    }
}

/// SCARA arm dimensions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScaraSettings {
    /// Inner link length (mm)
    pub linkage_1: f64,
    /// Outer link length (mm)
    pub linkage_2: f64,
    /// Shoulder position relative to the bed origin (mm)
    pub offset: [f64; 2],
    /// Cartesian scale factors for X and Y
    pub scale: [f64; 2],
    /// Segmentation rate for straight moves
    pub segments_per_second: f64,
    /// Arm angles (deg) at the endstops
    pub home_angles: [f64; 2],
}

impl Default for ScaraSettings {
    fn default() -> Self {
        Self {
            linkage_1: 150.0,
            linkage_2: 150.0,
            offset: [-25.0, -75.0],
            scale: [1.0, 1.0],
            segments_per_second: 200.0,
            home_angles: [-20.0, 130.0],
        }
    }
}

/// Planner limits, arcs and soft endstops
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MotionLimits {
    /// Steps per unit for X, Y, Z, E (M92)
    pub steps_per_unit: [f64; XYZE],
    /// Maximum feedrate per axis, mm/s (M203)
    pub max_feedrate_mm_s: [f64; XYZE],
    /// Maximum acceleration per axis, mm/s² (M201)
    pub max_acceleration: [f64; XYZE],
    /// Printing acceleration, mm/s² (M204 P)
    pub acceleration: f64,
    /// Retract acceleration, mm/s² (M204 R)
    pub retract_acceleration: f64,
    /// Travel acceleration, mm/s² (M204 T)
    pub travel_acceleration: f64,
    /// Minimum printing feedrate, mm/s (M205 S)
    pub min_feedrate_mm_s: f64,
    /// Minimum travel feedrate, mm/s (M205 T)
    pub min_travel_feedrate_mm_s: f64,
    /// Minimum segment time, µs (M205 B)
    pub min_segment_time_us: u64,
    /// Maximum XY jerk, mm/s (M205 X)
    pub max_xy_jerk: f64,
    /// Maximum Z jerk, mm/s (M205 Z)
    pub max_z_jerk: f64,
    /// Maximum E jerk, mm/s (M205 E)
    pub max_e_jerk: f64,
    /// Feedrate used until the first F word, mm/min
    pub default_feedrate_mm_min: f64,
    /// Clamp targets to the soft endstops
    pub soft_endstops: bool,
    /// Refuse moves on axes that have not been homed
    pub require_homing_before_move: bool,
    /// Maximum chord length of an arc segment (mm)
    pub mm_per_arc_segment: f64,
    /// Exact trig correction interval for arcs, in segments
    pub n_arc_correction: u32,
}

impl Default for MotionLimits {
    fn default() -> Self {
        Self {
            steps_per_unit: [80.0, 80.0, 4000.0, 500.0],
            max_feedrate_mm_s: [300.0, 300.0, 5.0, 25.0],
            max_acceleration: [3000.0, 3000.0, 100.0, 10000.0],
            acceleration: 3000.0,
            retract_acceleration: 3000.0,
            travel_acceleration: 3000.0,
            min_feedrate_mm_s: 0.0,
            min_travel_feedrate_mm_s: 0.0,
            min_segment_time_us: 20000,
            max_xy_jerk: 20.0,
            max_z_jerk: 0.4,
            max_e_jerk: 5.0,
            default_feedrate_mm_min: 1500.0,
            soft_endstops: true,
            require_homing_before_move: false,
            mm_per_arc_segment: 1.0,
            n_arc_correction: 25,
        }
    }
}

/// Extruder and tool settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtruderSettings {
    /// Number of tools
    pub count: usize,
    /// Per-tool X, Y, Z offset relative to tool 0 (M218)
    pub offsets: Vec<[f64; XYZ]>,
    /// Filament diameter per tool (mm), used when volumetric extrusion is on
    pub filament_diameter: Vec<f64>,
    /// Interpret E as volume (M200)
    pub volumetric_enabled: bool,
}

impl Default for ExtruderSettings {
    fn default() -> Self {
        Self {
            count: 1,
            offsets: vec![[0.0; XYZ]],
            filament_diameter: vec![1.75],
            volumetric_enabled: false,
        }
    }
}

/// Firmware retraction (G10/G11, M207/M208/M209)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetractSettings {
    /// Retract length (mm)
    pub length: f64,
    /// Retract length on tool swap (mm)
    pub swap_length: f64,
    /// Retract feedrate (mm/s)
    pub feedrate_mm_s: f64,
    /// Z lift while retracted (mm)
    pub zlift: f64,
    /// Extra length pushed on recover (mm)
    pub recover_length: f64,
    /// Extra length pushed on swap recover (mm)
    pub swap_recover_length: f64,
    /// Recover feedrate (mm/s)
    pub recover_feedrate_mm_s: f64,
    /// Treat E-only moves as retract/recover
    pub autoretract_enabled: bool,
}

impl Default for RetractSettings {
    fn default() -> Self {
        Self {
            length: 3.0,
            swap_length: 13.0,
            feedrate_mm_s: 45.0,
            zlift: 0.0,
            recover_length: 0.0,
            swap_recover_length: 0.0,
            recover_feedrate_mm_s: 8.0,
            autoretract_enabled: false,
        }
    }
}

/// Heater wait behavior
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThermalSettings {
    /// Seconds the hotend must stay in the window before M109 returns
    pub residency_time_s: f64,
    /// Window around the target that counts as reached (°C)
    pub window_c: f64,
    /// Window for the bed wait (°C)
    pub bed_window_c: f64,
    /// Preheat presets: hotend, bed, fan for PLA and ABS
    pub preheat: [[f64; 3]; 2],
}

impl Default for ThermalSettings {
    fn default() -> Self {
        Self {
            residency_time_s: 10.0,
            window_c: 1.0,
            bed_window_c: 1.0,
            preheat: [[180.0, 70.0, 0.0], [240.0, 110.0, 0.0]],
        }
    }
}

/// Bed leveling method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LevelingKind {
    /// No bed leveling
    #[default]
    None,
    /// Least-squares plane over a probed grid
    PlaneGrid,
    /// Exact plane through three probed points
    ThreePoint,
    /// Bilinear mesh of Z offsets
    Mesh,
}

/// Bed leveling parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LevelingSettings {
    /// Selected method
    pub kind: LevelingKind,
    /// Probe points per side of the grid (plane grid and mesh)
    pub grid_points: usize,
    /// Left bound of the probed area (mm)
    pub left: f64,
    /// Right bound of the probed area (mm)
    pub right: f64,
    /// Front bound of the probed area (mm)
    pub front: f64,
    /// Back bound of the probed area (mm)
    pub back: f64,
    /// Three XY points for the three point method
    pub three_points: [[f64; 2]; 3],
}

impl Default for LevelingSettings {
    fn default() -> Self {
        Self {
            kind: LevelingKind::None,
            grid_points: 3,
            left: 15.0,
            right: 170.0,
            front: 20.0,
            back: 170.0,
            three_points: [[15.0, 180.0], [15.0, 20.0], [170.0, 20.0]],
        }
    }
}

/// Z probe parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeSettings {
    /// A probe is fitted
    pub enabled: bool,
    /// Probe X offset from the nozzle (mm)
    pub x_offset: f64,
    /// Probe Y offset from the nozzle (mm)
    pub y_offset: f64,
    /// Probe trigger height relative to the nozzle (mm, M851)
    pub z_offset: f64,
    /// Plunge feedrate (mm/min)
    pub feedrate_mm_min: f64,
    /// XY travel feedrate between points (mm/min)
    pub travel_feedrate_mm_min: f64,
    /// Z clearance before the first probe (mm)
    pub z_raise_before_probing: f64,
    /// Z clearance between probes (mm)
    pub z_raise_between_probings: f64,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            x_offset: 0.0,
            y_offset: 0.0,
            z_offset: -1.0,
            feedrate_mm_min: 240.0,
            travel_feedrate_mm_min: 8000.0,
            z_raise_before_probing: 15.0,
            z_raise_between_probings: 5.0,
        }
    }
}

/// Homing behavior shared by all axes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HomingSettings {
    /// Home offset added to the endstop position (M206)
    pub home_offset: [f64; XYZ],
    /// Home Z at the bed center instead of wherever XY happen to be
    pub z_safe_homing: bool,
    /// Raise Z by this much before homing X or Y (mm)
    pub z_raise_before_homing: f64,
}

impl Default for HomingSettings {
    fn default() -> Self {
        Self {
            home_offset: [0.0; XYZ],
            z_safe_homing: false,
            z_raise_before_homing: 0.0,
        }
    }
}

/// Command queue sizing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueSettings {
    /// Number of queued commands (BUFSIZE)
    pub bufsize: usize,
    /// Maximum line length including terminator (MAX_CMD_SIZE)
    pub max_cmd_size: usize,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            bufsize: 4,
            max_cmd_size: 96,
        }
    }
}

/// Host protocol options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostSettings {
    /// Annotate acks with line number, planner and queue space
    pub advanced_ok: bool,
    /// Emit `busy:` keepalive lines while a handler holds the loop
    pub keepalive: bool,
    /// Keepalive interval (ms)
    pub keepalive_interval_ms: u64,
    /// Name reported by M115
    pub machine_name: String,
}

impl Default for HostSettings {
    fn default() -> Self {
        Self {
            advanced_ok: false,
            keepalive: true,
            keepalive_interval_ms: 2000,
            machine_name: "printcore".to_string(),
        }
    }
}

/// Safety guards and watchdogs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafetySettings {
    /// Freeze E when the hotend is below `min_extrude_temp`
    pub prevent_cold_extrusion: bool,
    /// Minimum hotend temperature for extrusion (°C)
    pub min_extrude_temp: f64,
    /// Freeze E on single moves longer than `extrude_max_length`
    pub prevent_lengthy_extrusion: bool,
    /// Longest single extrusion (mm)
    pub extrude_max_length: f64,
    /// Halt after this long without a command; zero disables (M85)
    pub max_inactive_time_ms: u64,
    /// Disable steppers after this long idle; zero disables (M18/M84 S)
    pub stepper_inactive_time_ms: u64,
}

impl Default for SafetySettings {
    fn default() -> Self {
        Self {
            prevent_cold_extrusion: true,
            min_extrude_temp: 170.0,
            prevent_lengthy_extrusion: true,
            extrude_max_length: 200.0,
            max_inactive_time_ms: 0,
            stepper_inactive_time_ms: 60_000,
        }
    }
}

/// Complete machine configuration
///
/// Aggregates all settings sections and provides file I/O operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct MachineConfig {
    /// Geometry kind
    #[serde(default)]
    pub geometry: GeometryKind,
    /// Per-axis travel and homing
    #[serde(default)]
    pub axes: AxesSettings,
    /// Delta dimensions
    #[serde(default)]
    pub delta: DeltaSettings,
    /// SCARA dimensions
    #[serde(default)]
    pub scara: ScaraSettings,
    /// Motion limits
    #[serde(default)]
    pub motion: MotionLimits,
    /// Homing behavior
    #[serde(default)]
    pub homing: HomingSettings,
    /// Extruders and tools
    #[serde(default)]
    pub extruders: ExtruderSettings,
    /// Firmware retraction
    #[serde(default)]
    pub retract: RetractSettings,
    /// Heater waits
    #[serde(default)]
    pub thermal: ThermalSettings,
    /// Bed leveling
    #[serde(default)]
    pub leveling: LevelingSettings,
    /// Z probe
    #[serde(default)]
    pub probe: ProbeSettings,
    /// Command queue
    #[serde(default)]
    pub queue: QueueSettings,
    /// Host protocol
    #[serde(default)]
    pub host: HostSettings,
    /// Safety guards
    #[serde(default)]
    pub safety: SafetySettings,
}

impl MachineConfig {
    /// Create new config with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults for a geometry kind
    ///
    /// Linear kinds share the 200×200×200 Cartesian envelope. Delta homes all
    /// towers up and is bounded by its printable disk. SCARA uses a square
    /// reachable by its default arm.
    pub fn for_geometry(kind: GeometryKind) -> Self {
        let mut config = Self {
            geometry: kind,
            ..Self::default()
        };
        match kind {
            GeometryKind::Delta => {
                let r = config.delta.printable_radius;
                for axis in [&mut config.axes.x, &mut config.axes.y] {
                    axis.min_pos = -r;
                    axis.max_pos = r;
                    axis.home_pos = Some(0.0);
                }
                for axis in [&mut config.axes.x, &mut config.axes.y, &mut config.axes.z] {
                    axis.home_dir = 1;
                    axis.homing_feedrate_mm_min = 3000.0;
                    axis.home_bump_mm = 5.0;
                    axis.home_bump_divisor = 10.0;
                }
                config.axes.z.max_pos = 250.0;
                config.motion.steps_per_unit = [80.0, 80.0, 80.0, 500.0];
                config.motion.max_feedrate_mm_s = [300.0, 300.0, 300.0, 25.0];
                config.motion.max_acceleration = [3000.0, 3000.0, 3000.0, 10000.0];
                config.motion.max_z_jerk = 20.0;
                config.leveling.left = -r * 0.8;
                config.leveling.right = r * 0.8;
                config.leveling.front = -r * 0.8;
                config.leveling.back = r * 0.8;
                config.leveling.grid_points = 7;
            }
            GeometryKind::Scara => {
                config.axes.x.min_pos = -100.0;
                config.axes.x.max_pos = 100.0;
                config.axes.y.min_pos = 0.0;
                config.axes.y.max_pos = 150.0;
                config.motion.steps_per_unit = [103.69, 106.65, 200.0 / 1.25, 92.6];
            }
            _ => {}
        }
        config
    }

    /// Default location of the machine configuration file
    pub fn default_path() -> SettingsResult<PathBuf> {
        let dir = dirs::config_dir().ok_or_else(|| {
            SettingsError::ConfigDirectory("no platform config directory".to_string())
        })?;
        Ok(dir.join("printcore").join("machine.toml"))
    }

    /// Load config from file (JSON or TOML)
    pub fn load_from_file(path: &Path) -> SettingsResult<Self> {
        let content = std::fs::read_to_string(path).map_err(SettingsError::read(path))?;

        let config: Self = if path.extension().is_some_and(|ext| ext == "json") {
            serde_json::from_str(&content)?
        } else if path.extension().is_some_and(|ext| ext == "toml") {
            toml::from_str(&content)?
        } else {
            return Err(ConfigError::UnsupportedFormat(path.display().to_string()).into());
        };

        config.validate()?;
        tracing::debug!("Loaded {} machine config from {}", config.geometry, path.display());
        Ok(config)
    }

    /// Save config to file (JSON or TOML)
    pub fn save_to_file(&self, path: &Path) -> SettingsResult<()> {
        self.validate()?;

        let content = if path.extension().is_some_and(|ext| ext == "json") {
            serde_json::to_string_pretty(self)?
        } else if path.extension().is_some_and(|ext| ext == "toml") {
            toml::to_string_pretty(self)?
        } else {
            return Err(ConfigError::UnsupportedFormat(path.display().to_string()).into());
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(SettingsError::write(parent))?;
        }
        std::fs::write(path, content).map_err(SettingsError::write(path))?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> ConfigResult<()> {
        self.axes.x.validate("axes.x")?;
        self.axes.y.validate("axes.y")?;
        self.axes.z.validate("axes.z")?;

        if self.queue.bufsize == 0 {
            return Err(ConfigError::out_of_range("queue.bufsize", self.queue.bufsize));
        }
        if self.queue.max_cmd_size < 8 {
            return Err(ConfigError::out_of_range(
                "queue.max_cmd_size",
                self.queue.max_cmd_size,
            ));
        }

        if self.motion.mm_per_arc_segment <= 0.0 {
            return Err(ConfigError::out_of_range(
                "motion.mm_per_arc_segment",
                self.motion.mm_per_arc_segment,
            ));
        }
        if self.motion.n_arc_correction == 0 {
            return Err(ConfigError::out_of_range("motion.n_arc_correction", 0));
        }
        if self.motion.default_feedrate_mm_min <= 0.0 {
            return Err(ConfigError::out_of_range(
                "motion.default_feedrate_mm_min",
                self.motion.default_feedrate_mm_min,
            ));
        }
        if self.motion.steps_per_unit.iter().any(|v| *v <= 0.0) {
            return Err(ConfigError::Inconsistent(
                "motion.steps_per_unit must be positive".to_string(),
            ));
        }

        if self.extruders.count == 0 {
            return Err(ConfigError::out_of_range("extruders.count", 0));
        }
        if self.extruders.offsets.len() != self.extruders.count {
            return Err(ConfigError::Inconsistent(format!(
                "extruders.offsets has {} entries for {} tools",
                self.extruders.offsets.len(),
                self.extruders.count
            )));
        }
        if self.extruders.filament_diameter.len() != self.extruders.count {
            return Err(ConfigError::Inconsistent(format!(
                "extruders.filament_diameter has {} entries for {} tools",
                self.extruders.filament_diameter.len(),
                self.extruders.count
            )));
        }

        match self.geometry {
            GeometryKind::Delta => self.validate_delta()?,
            GeometryKind::Scara => self.validate_scara()?,
            _ => {}
        }

        self.validate_leveling()?;

        if self.safety.min_extrude_temp < 0.0 {
            return Err(ConfigError::out_of_range(
                "safety.min_extrude_temp",
                self.safety.min_extrude_temp,
            ));
        }

        Ok(())
    }

    fn validate_delta(&self) -> ConfigResult<()> {
        let d = &self.delta;
        if d.diagonal_rod <= 0.0 {
            return Err(ConfigError::out_of_range("delta.diagonal_rod", d.diagonal_rod));
        }
        if d.radius <= 0.0 {
            return Err(ConfigError::out_of_range("delta.radius", d.radius));
        }
        if d.printable_radius <= 0.0 {
            return Err(ConfigError::out_of_range(
                "delta.printable_radius",
                d.printable_radius,
            ));
        }
        if d.segments_per_second <= 0.0 && d.segment_length_mm <= 0.0 {
            return Err(ConfigError::Inconsistent(
                "delta needs segments_per_second or segment_length_mm".to_string(),
            ));
        }
        // Every point of the printable disk must be reachable from every tower.
        if d.diagonal_rod <= d.radius + d.printable_radius {
            return Err(ConfigError::Inconsistent(format!(
                "delta.diagonal_rod {} cannot reach printable radius {} from tower radius {}",
                d.diagonal_rod, d.printable_radius, d.radius
            )));
        }
        Ok(())
    }

    fn validate_scara(&self) -> ConfigResult<()> {
        let s = &self.scara;
        if s.linkage_1 <= 0.0 {
            return Err(ConfigError::out_of_range("scara.linkage_1", s.linkage_1));
        }
        if s.linkage_2 <= 0.0 {
            return Err(ConfigError::out_of_range("scara.linkage_2", s.linkage_2));
        }
        if s.scale.iter().any(|v| *v <= 0.0) {
            return Err(ConfigError::Inconsistent(
                "scara.scale must be positive".to_string(),
            ));
        }
        if s.segments_per_second <= 0.0 {
            return Err(ConfigError::out_of_range(
                "scara.segments_per_second",
                s.segments_per_second,
            ));
        }
        Ok(())
    }

    fn validate_leveling(&self) -> ConfigResult<()> {
        let l = &self.leveling;
        if l.kind == LevelingKind::None {
            return Ok(());
        }
        if !self.probe.enabled {
            return Err(ConfigError::Inconsistent(
                "bed leveling requires probe.enabled".to_string(),
            ));
        }
        if self.geometry == GeometryKind::Delta && l.kind != LevelingKind::Mesh {
            return Err(ConfigError::Inconsistent(
                "delta machines only support mesh leveling".to_string(),
            ));
        }
        if l.grid_points < 2 {
            return Err(ConfigError::out_of_range("leveling.grid_points", l.grid_points));
        }
        if !(l.left < l.right) || !(l.front < l.back) {
            return Err(ConfigError::Inconsistent(
                "leveling probe area is empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Settings of positional axis `index` (0 = X, 1 = Y, 2 = Z)
    pub fn axis(&self, index: usize) -> &AxisSettings {
        self.axes.by_index(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = MachineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.queue.bufsize, 4);
        assert_eq!(config.queue.max_cmd_size, 96);
        assert_eq!(config.motion.n_arc_correction, 25);
    }

    #[test]
    fn test_geometry_presets_are_valid() {
        for kind in [
            GeometryKind::Cartesian,
            GeometryKind::CoreXY,
            GeometryKind::CoreXZ,
            GeometryKind::Delta,
            GeometryKind::Scara,
        ] {
            let config = MachineConfig::for_geometry(kind);
            assert_eq!(config.geometry, kind);
            assert!(config.validate().is_ok(), "{kind} preset invalid");
        }
    }

    #[test]
    fn test_delta_preset_homes_up() {
        let config = MachineConfig::for_geometry(GeometryKind::Delta);
        assert!(config.axes.z.home_dir > 0);
        assert_eq!(config.axes.z.base_home_pos(), 250.0);
        assert_eq!(config.axes.x.base_home_pos(), 0.0);
    }

    #[test]
    fn test_base_home_pos_follows_direction() {
        let mut axis = MachineConfig::default().axes.x;
        assert_eq!(axis.base_home_pos(), 0.0);
        axis.home_dir = 1;
        assert_eq!(axis.base_home_pos(), 200.0);
        axis.home_pos = Some(12.5);
        assert_eq!(axis.base_home_pos(), 12.5);
    }

    #[test]
    fn test_validate_rejects_short_delta_rod() {
        let mut config = MachineConfig::for_geometry(GeometryKind::Delta);
        config.delta.diagonal_rod = 150.0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Inconsistent(_))
        ));
    }

    #[test]
    fn test_validate_rejects_bad_extruder_table() {
        let mut config = MachineConfig::default();
        config.extruders.count = 2;
        assert!(config.validate().is_err());
        config.extruders.offsets.push([20.0, 0.0, 0.0]);
        config.extruders.filament_diameter.push(1.75);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_leveling_requires_probe() {
        let mut config = MachineConfig::default();
        config.leveling.kind = LevelingKind::Mesh;
        assert!(config.validate().is_err());
        config.probe.enabled = true;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_geometry_from_str() {
        assert_eq!("delta".parse::<GeometryKind>(), Ok(GeometryKind::Delta));
        assert_eq!("CoreXY".parse::<GeometryKind>(), Ok(GeometryKind::CoreXY));
        assert!("hexapod".parse::<GeometryKind>().is_err());
    }
}

//! Machine settings commands
//!
//! Motion limits go to the planner after every change. Geometry edits
//! (M665, M666) build a candidate configuration, validate it and only then
//! install it, so a rejected value leaves the machine as it was.

use super::movement::position_report;
use super::{linear, target_tool};
use crate::command::GcodeCommand;
use crate::context::Context;
use crate::dispatcher::{Ack, HandlerResult};
use printcore_communication::Response;
use printcore_core::{Axis, GcodeError, XYZ, XYZE};
use printcore_settings::{report_lines, GeometryKind, MachineConfig};

const M428_MAX_DIFF: f64 = 20.0;
const Z_PROBE_OFFSET_RANGE: std::ops::RangeInclusive<f64> = -20.0..=20.0;

fn apply_limits(ctx: &mut Context) {
    ctx.planner.apply_limits(&ctx.config.motion);
}

/// Read X, Y, Z and E into `values`
fn axis_values(
    ctx: &Context,
    cmd: &GcodeCommand,
    values: &mut [f64; XYZE],
) -> Result<(), GcodeError> {
    for axis in Axis::ALL {
        if let Some(v) = linear(ctx, cmd, axis.letter())? {
            values[axis.index()] = v;
        }
    }
    Ok(())
}

/// Validate and install a changed configuration, keeping the position
fn install_checked(ctx: &mut Context, config: MachineConfig) -> Result<(), GcodeError> {
    config.validate().map_err(|e| GcodeError::Settings {
        reason: e.to_string(),
    })?;
    ctx.install_config(config)?;
    ctx.sync_plan_position()
}

/// Move the home offset of `axis`, keeping the nozzle where it is
fn set_home_offset(ctx: &mut Context, axis: Axis, value: f64) {
    let i = axis.index();
    let old = ctx.config.homing.home_offset[i];
    ctx.state.current_position[axis] += value - old;
    ctx.config.homing.home_offset[i] = value;
    ctx.state.update_software_endstops(&ctx.config, i);
}

fn report_position(ctx: &mut Context) {
    let report = position_report(ctx);
    ctx.send(Response::raw(report));
}

/// M92 steps per unit
///
/// A new E value rescales the E feedrate, acceleration and jerk limits so
/// the extruder keeps its physical speed.
pub fn m92(ctx: &mut Context, cmd: &GcodeCommand) -> HandlerResult {
    for axis in Axis::ALL {
        let Some(value) = cmd.params.finite(axis.letter())? else {
            continue;
        };
        if value <= 0.0 {
            return Err(GcodeError::invalid(axis.letter(), "steps per unit must be positive"));
        }
        let i = axis.index();
        let motion = &mut ctx.config.motion;
        if axis == Axis::E {
            let factor = motion.steps_per_unit[i] / value;
            motion.max_e_jerk *= factor;
            motion.max_feedrate_mm_s[i] *= factor;
            motion.max_acceleration[i] *= factor;
        }
        motion.steps_per_unit[i] = value;
    }
    apply_limits(ctx);
    Ok(Ack::Ok)
}

/// M200 filament diameter; D0 switches volumetric extrusion off
pub fn m200(ctx: &mut Context, cmd: &GcodeCommand) -> HandlerResult {
    let tool = target_tool(ctx, cmd)?;
    if let Some(d) = linear(ctx, cmd, 'D')? {
        let ext = &mut ctx.config.extruders;
        ext.volumetric_enabled = d != 0.0;
        if ext.volumetric_enabled {
            if ext.filament_diameter.len() <= tool {
                ext.filament_diameter.resize(tool + 1, 0.0);
            }
            ext.filament_diameter[tool] = d;
        }
    }
    ctx.state.update_volumetric(&ctx.config);
    Ok(Ack::Ok)
}

/// M201 maximum acceleration per axis
pub fn m201(ctx: &mut Context, cmd: &GcodeCommand) -> HandlerResult {
    let mut values = ctx.config.motion.max_acceleration;
    axis_values(ctx, cmd, &mut values)?;
    ctx.config.motion.max_acceleration = values;
    apply_limits(ctx);
    Ok(Ack::Ok)
}

/// M203 maximum feedrate per axis (mm/s)
pub fn m203(ctx: &mut Context, cmd: &GcodeCommand) -> HandlerResult {
    let mut values = ctx.config.motion.max_feedrate_mm_s;
    axis_values(ctx, cmd, &mut values)?;
    ctx.config.motion.max_feedrate_mm_s = values;
    apply_limits(ctx);
    Ok(Ack::Ok)
}

/// M204 default accelerations: P printing, R retract, T travel, S both P and T
pub fn m204(ctx: &mut Context, cmd: &GcodeCommand) -> HandlerResult {
    let p = cmd.params.finite('P')?;
    let r = cmd.params.finite('R')?;
    let t = cmd.params.finite('T')?;
    let s = cmd.params.finite('S')?;
    let motion = &mut ctx.config.motion;
    if let Some(s) = s {
        motion.acceleration = s;
        motion.travel_acceleration = s;
    }
    if let Some(p) = p {
        motion.acceleration = p;
    }
    if let Some(r) = r {
        motion.retract_acceleration = r;
    }
    if let Some(t) = t {
        motion.travel_acceleration = t;
    }
    apply_limits(ctx);
    Ok(Ack::Ok)
}

/// M205 advanced: S/T minimum feedrates, B minimum segment time, X/Z/E jerk
pub fn m205(ctx: &mut Context, cmd: &GcodeCommand) -> HandlerResult {
    let s = cmd.params.finite('S')?;
    let t = cmd.params.finite('T')?;
    let b = cmd.params.index('B')?;
    let x = linear(ctx, cmd, 'X')?;
    let z = linear(ctx, cmd, 'Z')?;
    let e = linear(ctx, cmd, 'E')?;
    let motion = &mut ctx.config.motion;
    if let Some(s) = s {
        motion.min_feedrate_mm_s = s;
    }
    if let Some(t) = t {
        motion.min_travel_feedrate_mm_s = t;
    }
    if let Some(b) = b {
        motion.min_segment_time_us = b as u64;
    }
    if let Some(x) = x {
        motion.max_xy_jerk = x;
    }
    if let Some(z) = z {
        motion.max_z_jerk = z;
    }
    if let Some(e) = e {
        motion.max_e_jerk = e;
    }
    apply_limits(ctx);
    Ok(Ack::Ok)
}

/// M206 home offset
pub fn m206(ctx: &mut Context, cmd: &GcodeCommand) -> HandlerResult {
    let mut changed = false;
    for axis in Axis::XYZ {
        if let Some(v) = linear(ctx, cmd, axis.letter())? {
            set_home_offset(ctx, axis, v);
            changed = true;
        }
    }
    if changed {
        ctx.sync_plan_position()?;
        report_position(ctx);
    }
    Ok(Ack::Ok)
}

/// M207 retract length S, feedrate F (mm/min), Z lift, swap length W
pub fn m207(ctx: &mut Context, cmd: &GcodeCommand) -> HandlerResult {
    let s = linear(ctx, cmd, 'S')?;
    let f = linear(ctx, cmd, 'F')?;
    let z = linear(ctx, cmd, 'Z')?;
    let w = linear(ctx, cmd, 'W')?;
    let r = &mut ctx.config.retract;
    if let Some(s) = s {
        r.length = s;
    }
    if let Some(f) = f {
        r.feedrate_mm_s = f / 60.0;
    }
    if let Some(z) = z {
        r.zlift = z;
    }
    if let Some(w) = w {
        r.swap_length = w;
    }
    Ok(Ack::Ok)
}

/// M208 recover extra length S, feedrate F (mm/min), swap extra W
pub fn m208(ctx: &mut Context, cmd: &GcodeCommand) -> HandlerResult {
    let s = linear(ctx, cmd, 'S')?;
    let f = linear(ctx, cmd, 'F')?;
    let w = linear(ctx, cmd, 'W')?;
    let r = &mut ctx.config.retract;
    if let Some(s) = s {
        r.recover_length = s;
    }
    if let Some(f) = f {
        r.recover_feedrate_mm_s = f / 60.0;
    }
    if let Some(w) = w {
        r.swap_recover_length = w;
    }
    Ok(Ack::Ok)
}

/// M209 auto-retract on extrude-only moves
pub fn m209(ctx: &mut Context, cmd: &GcodeCommand) -> HandlerResult {
    if let Some(s) = cmd.params.finite('S')? {
        ctx.config.retract.autoretract_enabled = s != 0.0;
        ctx.state.retracted.iter_mut().for_each(|r| *r = false);
    }
    Ok(Ack::Ok)
}

/// M218 hotend offset for tool T
pub fn m218(ctx: &mut Context, cmd: &GcodeCommand) -> HandlerResult {
    let tool = target_tool(ctx, cmd)?;
    let mut offset = ctx
        .config
        .extruders
        .offsets
        .get(tool)
        .copied()
        .unwrap_or([0.0; XYZ]);
    for axis in Axis::XYZ {
        if let Some(v) = linear(ctx, cmd, axis.letter())? {
            offset[axis.index()] = v;
        }
    }
    let offsets = &mut ctx.config.extruders.offsets;
    if offsets.len() <= tool {
        offsets.resize(tool + 1, [0.0; XYZ]);
    }
    offsets[tool] = offset;

    let listing: Vec<String> = ctx
        .config
        .extruders
        .offsets
        .iter()
        .map(|o| format!("{:.3},{:.3},{:.3}", o[0], o[1], o[2]))
        .collect();
    ctx.echo(format!("Hotend offsets: {}", listing.join(" ")));
    Ok(Ack::Ok)
}

/// M220 feedrate percentage
pub fn m220(ctx: &mut Context, cmd: &GcodeCommand) -> HandlerResult {
    if let Some(s) = cmd.params.finite('S')? {
        if s <= 0.0 {
            return Err(GcodeError::invalid('S', "feedrate percentage must be positive"));
        }
        ctx.state.feed_multiplier = s;
    }
    Ok(Ack::Ok)
}

/// M221 flow percentage for tool T
pub fn m221(ctx: &mut Context, cmd: &GcodeCommand) -> HandlerResult {
    let tool = target_tool(ctx, cmd)?;
    if let Some(s) = cmd.params.finite('S')? {
        if s < 0.0 {
            return Err(GcodeError::invalid('S', "flow percentage must not be negative"));
        }
        if let Some(m) = ctx.state.extruder_multiplier.get_mut(tool) {
            *m = s;
        }
    }
    Ok(Ack::Ok)
}

/// M428 make the current position the home position
///
/// Homed axes nearer their maximum take the home base position, the others
/// zero. Offsets beyond ±20 mm are refused and nothing changes.
pub fn m428(ctx: &mut Context, _cmd: &GcodeCommand) -> HandlerResult {
    let mut offsets = ctx.config.homing.home_offset;
    for axis in Axis::XYZ {
        if !ctx.state.homed.get(axis) {
            continue;
        }
        let i = axis.index();
        let current = ctx.state.current_position[axis];
        let middle = (ctx.state.soft_min[i] + ctx.state.soft_max[i]) * 0.5;
        let base = if current > middle {
            ctx.config.axis(i).base_home_pos()
        } else {
            0.0
        };
        let raw = current - ctx.config.homing.home_offset[i] - ctx.state.position_shift[i];
        let diff = base - raw;
        if !(-M428_MAX_DIFF..=M428_MAX_DIFF).contains(&diff) {
            return Err(GcodeError::TooFarFromReference);
        }
        offsets[i] = diff;
    }

    for axis in Axis::XYZ {
        let value = offsets[axis.index()];
        if value != ctx.config.homing.home_offset[axis.index()] {
            set_home_offset(ctx, axis, value);
        }
    }
    ctx.sync_plan_position()?;
    report_position(ctx);
    ctx.echo("Offsets applied.");
    Ok(Ack::Ok)
}

/// M500 store settings
pub fn m500(ctx: &mut Context, _cmd: &GcodeCommand) -> HandlerResult {
    ctx.store_settings()?;
    tracing::info!("Settings stored to {}", ctx.settings.describe());
    ctx.echo("Settings Stored");
    Ok(Ack::Ok)
}

/// M501 load stored settings, or the defaults when nothing was stored
pub fn m501(ctx: &mut Context, _cmd: &GcodeCommand) -> HandlerResult {
    if ctx.load_stored_settings()? {
        ctx.echo("Stored settings retrieved");
    } else {
        let factory = ctx.factory.clone();
        ctx.install_config(factory)?;
        ctx.echo("Hardcoded Default Settings Loaded");
    }
    ctx.sync_plan_position()?;
    Ok(Ack::Ok)
}

/// M502 restore the factory configuration
pub fn m502(ctx: &mut Context, _cmd: &GcodeCommand) -> HandlerResult {
    let factory = ctx.factory.clone();
    ctx.install_config(factory)?;
    ctx.sync_plan_position()?;
    ctx.echo("Hardcoded Default Settings Loaded");
    Ok(Ack::Ok)
}

/// M503 print the settings as G-code
pub fn m503(ctx: &mut Context, _cmd: &GcodeCommand) -> HandlerResult {
    for line in report_lines(&ctx.config) {
        ctx.echo(line);
    }
    Ok(Ack::Ok)
}

fn require_delta(ctx: &Context, feature: &str) -> Result<(), GcodeError> {
    if ctx.config.geometry == GeometryKind::Delta {
        Ok(())
    } else {
        Err(GcodeError::Unsupported {
            feature: feature.to_string(),
        })
    }
}

/// M665 Delta geometry
///
/// L diagonal rod, R radius, S segments per second, A/B/C rod trims,
/// I/J/K tower radius trims, U/V/W tower angle trims.
pub fn m665(ctx: &mut Context, cmd: &GcodeCommand) -> HandlerResult {
    require_delta(ctx, "M665")?;
    let mut config = ctx.config.clone();
    let d = &mut config.delta;
    if let Some(l) = linear(ctx, cmd, 'L')? {
        d.diagonal_rod = l;
    }
    if let Some(r) = linear(ctx, cmd, 'R')? {
        d.radius = r;
    }
    if let Some(s) = cmd.params.finite('S')? {
        d.segments_per_second = s;
    }
    for (i, letter) in ['A', 'B', 'C'].into_iter().enumerate() {
        if let Some(v) = linear(ctx, cmd, letter)? {
            d.diagrod_adj[i] = v;
        }
    }
    for (i, letter) in ['I', 'J', 'K', 'U', 'V', 'W'].into_iter().enumerate() {
        if let Some(v) = cmd.params.finite(letter)? {
            d.tower_adj[i] = v;
        }
    }
    install_checked(ctx, config)?;
    Ok(Ack::Ok)
}

/// M666 Delta endstop adjustment
pub fn m666(ctx: &mut Context, cmd: &GcodeCommand) -> HandlerResult {
    require_delta(ctx, "M666")?;
    let mut config = ctx.config.clone();
    for axis in Axis::XYZ {
        if let Some(v) = linear(ctx, cmd, axis.letter())? {
            config.delta.endstop_adj[axis.index()] = v;
        }
    }
    install_checked(ctx, config)?;
    Ok(Ack::Ok)
}

/// M851 Z probe offset
pub fn m851(ctx: &mut Context, cmd: &GcodeCommand) -> HandlerResult {
    match linear(ctx, cmd, 'Z')? {
        Some(z) if Z_PROBE_OFFSET_RANGE.contains(&z) => {
            ctx.config.probe.z_offset = z;
            ctx.echo(format!("Z Offset : {:.2}", z));
        }
        Some(_) => {
            return Err(GcodeError::invalid(
                'Z',
                format!(
                    "Z Offset must be within {} and {}",
                    Z_PROBE_OFFSET_RANGE.start(),
                    Z_PROBE_OFFSET_RANGE.end()
                ),
            ))
        }
        None => {
            let z = ctx.config.probe.z_offset;
            ctx.echo(format!("Z Offset : {:.2}", z));
        }
    }
    Ok(Ack::Ok)
}

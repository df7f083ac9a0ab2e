//! Motion, homing, probing and position commands

use super::linear;
use crate::command::GcodeCommand;
use crate::context::Context;
use crate::dispatcher::{Ack, HandlerResult};
use crate::motion::{ArcRequest, MIN_RETRACT};
use printcore_communication::Response;
use printcore_core::{ActuatorPosition, Axis, AxisFlags, GcodeError, LinearUnit, XYZ};
use printcore_kinematics::BedLevel;

/// Fill `state.destination` from the axis words and take a new feedrate
fn get_destination(ctx: &mut Context, cmd: &GcodeCommand) -> Result<(), GcodeError> {
    let mut destination = ctx.state.current_position;
    for axis in Axis::ALL {
        if let Some(v) = linear(ctx, cmd, axis.letter())? {
            destination[axis] = if ctx.state.is_relative(axis) {
                ctx.state.current_position[axis] + v
            } else {
                v
            };
        }
    }
    if let Some(f) = linear(ctx, cmd, 'F')? {
        if f > 0.0 {
            ctx.state.feedrate_mm_min = f;
        }
    }
    ctx.state.destination = destination;
    Ok(())
}

/// M114 line: logical position followed by the motor counts
pub(crate) fn position_report(ctx: &Context) -> String {
    let [a, b, c] = ctx.kinematics.motor_mix(&ctx.planner.position());
    format!(
        "{} Count {}",
        ctx.state.current_position,
        ActuatorPosition::new(a, b, c)
    )
}

/// G0, G1
pub fn g0_g1(ctx: &mut Context, cmd: &GcodeCommand) -> HandlerResult {
    get_destination(ctx, cmd)?;

    let only_e = cmd.has('E') && !(cmd.has('X') || cmd.has('Y') || cmd.has('Z'));
    if ctx.config.retract.autoretract_enabled && only_e {
        let tool = ctx.state.active_tool;
        let retracted = ctx.state.retracted.get(tool).copied().unwrap_or(false);
        let change = ctx.state.destination.e - ctx.state.current_position.e;
        if (change < -MIN_RETRACT && !retracted) || (change > MIN_RETRACT && retracted) {
            ctx.state.current_position.e = ctx.state.destination.e;
            ctx.sync_plan_position_e();
            ctx.retract(!retracted, false)?;
            return Ok(Ack::Ok);
        }
    }

    ctx.prepare_move_to_destination()?;
    Ok(Ack::Ok)
}

/// G2, G3
pub fn g2_g3(ctx: &mut Context, cmd: &GcodeCommand) -> HandlerResult {
    get_destination(ctx, cmd)?;
    let clockwise = cmd.code == 2;
    let target = ctx.state.destination;

    let arc = if let Some(r) = linear(ctx, cmd, 'R')? {
        ArcRequest::from_radius(&ctx.state.current_position, target, r, clockwise)?
    } else {
        let i = linear(ctx, cmd, 'I')?;
        let j = linear(ctx, cmd, 'J')?;
        if i.is_none() && j.is_none() {
            return Err(GcodeError::invalid('I', "G2/G3 bad parameters"));
        }
        let offset = [i.unwrap_or(0.0), j.unwrap_or(0.0)];
        if offset[0] == 0.0 && offset[1] == 0.0 {
            return Err(GcodeError::invalid('I', "G2/G3 bad parameters"));
        }
        ArcRequest {
            target,
            offset,
            clockwise,
        }
    };

    let feedrate = ctx.state.feedrate_mm_min;
    ctx.plan_arc(arc, feedrate)?;
    Ok(Ack::Ok)
}

/// G4 dwell: P milliseconds or S seconds
pub fn g4(ctx: &mut Context, cmd: &GcodeCommand) -> HandlerResult {
    let mut ms = 0.0;
    if let Some(p) = cmd.params.finite('P')? {
        ms = p;
    }
    if let Some(s) = cmd.params.finite('S')? {
        ms = s * 1000.0;
    }
    ctx.synchronize()?;
    ctx.refresh_cmd_timeout();
    let until = ctx.previous_cmd_ms + ms.max(0.0) as u64;
    ctx.wait_until(|ctx| ctx.now_ms() >= until)?;
    Ok(Ack::Ok)
}

/// G10 firmware retract; S1 is a tool swap retract
pub fn g10(ctx: &mut Context, cmd: &GcodeCommand) -> HandlerResult {
    let swapping = cmd.get('S').is_some_and(|s| s != 0.0);
    ctx.retract(true, swapping)?;
    Ok(Ack::Ok)
}

/// G11 firmware recover
pub fn g11(ctx: &mut Context, _cmd: &GcodeCommand) -> HandlerResult {
    let tool = ctx.state.active_tool;
    let swapping = ctx.state.retracted_swap.get(tool).copied().unwrap_or(false);
    ctx.retract(false, swapping)?;
    Ok(Ack::Ok)
}

pub fn g20(ctx: &mut Context, _cmd: &GcodeCommand) -> HandlerResult {
    ctx.state.linear_unit = LinearUnit::Inches;
    Ok(Ack::Ok)
}

pub fn g21(ctx: &mut Context, _cmd: &GcodeCommand) -> HandlerResult {
    ctx.state.linear_unit = LinearUnit::Millimeters;
    Ok(Ack::Ok)
}

/// G28 home the named axes, or all
pub fn g28(ctx: &mut Context, cmd: &GcodeCommand) -> HandlerResult {
    let mut requested = AxisFlags::default();
    for axis in Axis::XYZ {
        requested.set(axis, cmd.has(axis.letter()));
    }
    ctx.home_axes(requested)?;
    Ok(Ack::Ok)
}

/// G29 bed leveling
///
/// - `S0` report the mesh
/// - `S3 X<i> Y<j> Z<z>` set one mesh value (1-based indices)
/// - `S5` reset the correction
/// - otherwise probe; `V<0-4>` sets the verbosity
pub fn g29(ctx: &mut Context, cmd: &GcodeCommand) -> HandlerResult {
    match cmd.params.index('S')? {
        Some(0) => {
            report_leveling(ctx, true);
            Ok(Ack::Ok)
        }
        Some(3) => {
            let ix = cmd.params.index('X')?.ok_or(GcodeError::MissingParameter { param: 'X' })?;
            let iy = cmd.params.index('Y')?.ok_or(GcodeError::MissingParameter { param: 'Y' })?;
            let z = cmd.params.finite('Z')?.ok_or(GcodeError::MissingParameter { param: 'Z' })?;
            ctx.set_mesh_value(ix, iy, z)?;
            Ok(Ack::Ok)
        }
        Some(5) => {
            ctx.leveling.reset();
            ctx.set_current_from_steppers()?;
            ctx.sync_plan_position()?;
            ctx.echo("Bed leveling reset");
            Ok(Ack::Ok)
        }
        Some(other) => Err(GcodeError::invalid('S', format!("S{} not supported", other))),
        None => {
            let verbose = cmd.params.index('V')?.unwrap_or(1);
            if verbose > 4 {
                return Err(GcodeError::invalid('V', "verbose level must be 0-4"));
            }
            ctx.level_bed(verbose as u8)?;
            if verbose >= 2 {
                report_leveling(ctx, false);
            }
            Ok(Ack::Ok)
        }
    }
}

/// Describe the active correction
fn report_leveling(ctx: &mut Context, with_state: bool) {
    if with_state {
        let state = if ctx.leveling.is_active() { "On" } else { "Off" };
        ctx.echo(format!("Bed leveling: {}", state));
    }
    let lines = match ctx.leveling.model() {
        BedLevel::Identity => vec!["Bed leveling has no data".to_string()],
        BedLevel::Plane(plane) => {
            let mut lines = vec!["Bed level correction matrix:".to_string()];
            for row in plane.matrix() {
                lines.push(format!("{:+.6} {:+.6} {:+.6}", row[0], row[1], row[2]));
            }
            lines
        }
        BedLevel::Mesh(mesh) => {
            let mut lines = vec![format!("Num X,Y: {},{}", mesh.nx(), mesh.ny())];
            lines.push("Measured points:".to_string());
            lines.extend(Context::mesh_report(mesh));
            lines
        }
    };
    for line in lines {
        ctx.send(Response::raw(line));
    }
}

/// G30 single probe at the current XY
pub fn g30(ctx: &mut Context, _cmd: &GcodeCommand) -> HandlerResult {
    let sample = ctx.single_probe()?;
    ctx.send(Response::raw(sample.report()));
    Ok(Ack::Ok)
}

pub fn g90(ctx: &mut Context, _cmd: &GcodeCommand) -> HandlerResult {
    ctx.state.relative_mode = false;
    Ok(Ack::Ok)
}

pub fn g91(ctx: &mut Context, _cmd: &GcodeCommand) -> HandlerResult {
    ctx.state.relative_mode = true;
    Ok(Ack::Ok)
}

/// G92 set position; XYZ shift the coordinate space
pub fn g92(ctx: &mut Context, cmd: &GcodeCommand) -> HandlerResult {
    let mut values = [None; 4];
    for axis in Axis::ALL {
        values[axis.index()] = linear(ctx, cmd, axis.letter())?;
    }
    let did_e = values[Axis::E.index()].is_some();
    if !did_e {
        ctx.synchronize()?;
    }

    let mut did_xyz = false;
    for axis in Axis::ALL {
        let Some(v) = values[axis.index()] else {
            continue;
        };
        let previous = ctx.state.current_position[axis];
        ctx.state.current_position[axis] = v;
        if axis != Axis::E {
            let i = axis.index();
            did_xyz = true;
            ctx.state.position_shift[i] += v - previous;
            ctx.state.update_software_endstops(&ctx.config, i);
        }
    }

    if did_xyz {
        ctx.sync_plan_position()?;
    } else if did_e {
        ctx.sync_plan_position_e();
    }
    ctx.state.destination = ctx.state.current_position;
    Ok(Ack::Ok)
}

/// M82 absolute E
pub fn m82(ctx: &mut Context, _cmd: &GcodeCommand) -> HandlerResult {
    ctx.state.axis_relative[Axis::E.index()] = false;
    Ok(Ack::Ok)
}

/// M83 relative E
pub fn m83(ctx: &mut Context, _cmd: &GcodeCommand) -> HandlerResult {
    ctx.state.axis_relative[Axis::E.index()] = true;
    Ok(Ack::Ok)
}

pub fn m114(ctx: &mut Context, _cmd: &GcodeCommand) -> HandlerResult {
    let report = position_report(ctx);
    ctx.send(Response::raw(report));
    Ok(Ack::Ok)
}

/// M400 finish all moves
pub fn m400(ctx: &mut Context, _cmd: &GcodeCommand) -> HandlerResult {
    ctx.synchronize()?;
    Ok(Ack::Ok)
}

pub fn m401(ctx: &mut Context, _cmd: &GcodeCommand) -> HandlerResult {
    ctx.deploy_probe()?;
    Ok(Ack::Ok)
}

pub fn m402(ctx: &mut Context, _cmd: &GcodeCommand) -> HandlerResult {
    ctx.stow_probe()?;
    Ok(Ack::Ok)
}

/// M410 quick stop
pub fn m410(ctx: &mut Context, _cmd: &GcodeCommand) -> HandlerResult {
    ctx.quick_stop()?;
    Ok(Ack::Ok)
}

/// M420 S<0|1> toggle leveling, V report
pub fn m420(ctx: &mut Context, cmd: &GcodeCommand) -> HandlerResult {
    if let Some(s) = cmd.params.finite('S')? {
        let wanted = s != 0.0;
        let enabled = ctx.leveling.set_enabled(wanted);
        ctx.set_current_from_steppers()?;
        ctx.sync_plan_position()?;
        ctx.state.destination = ctx.state.current_position;
        if wanted && !enabled {
            ctx.error("Failed to enable Bed Leveling");
        }
    }
    if cmd.has('V') {
        report_leveling(ctx, false);
    }
    let state = if ctx.leveling.is_active() { "On" } else { "Off" };
    ctx.echo(format!("Bed leveling: {}", state));
    Ok(Ack::Ok)
}

/// T<n> select a tool
///
/// The logical position is shifted by the difference in tool offsets and
/// the new tool is moved to where the old one was, unless `S0` is given or
/// the machine is not homed. `F` sets the feedrate of that move.
pub fn tool_change(ctx: &mut Context, cmd: &GcodeCommand) -> HandlerResult {
    let tool = cmd.code as usize;
    if tool >= ctx.config.extruders.count {
        return Err(GcodeError::InvalidExtruder { tool: cmd.code });
    }

    let saved_feedrate = ctx.state.feedrate_mm_min;
    if let Some(f) = linear(ctx, cmd, 'F')? {
        if f > 0.0 {
            ctx.state.feedrate_mm_min = f;
        }
    }

    let result = switch_tool(ctx, tool, cmd.get('S') == Some(0.0));
    ctx.state.feedrate_mm_min = saved_feedrate;
    result?;

    ctx.echo(format!("Active Extruder: {}", ctx.state.active_tool));
    Ok(Ack::Ok)
}

fn switch_tool(ctx: &mut Context, tool: usize, no_move: bool) -> Result<(), GcodeError> {
    let active = ctx.state.active_tool;
    if tool != active {
        let mut no_move = no_move;
        if !no_move && !ctx.state.homed.all_xyz() {
            ctx.echo("No move on toolchange");
            no_move = true;
        }

        ctx.state.destination = ctx.state.current_position;
        let offsets = &ctx.config.extruders.offsets;
        let old = offsets.get(active).copied().unwrap_or([0.0; XYZ]);
        let new = offsets.get(tool).copied().unwrap_or([0.0; XYZ]);
        for axis in Axis::XYZ {
            let i = axis.index();
            ctx.state.current_position[axis] += new[i] - old[i];
        }
        ctx.sync_plan_position()?;

        ctx.state.active_tool = tool;
        if no_move || !ctx.is_running() {
            ctx.state.destination = ctx.state.current_position;
        } else {
            ctx.prepare_move_to_destination()?;
        }
        tracing::info!("Switched from tool {} to tool {}", active, tool);
    }
    ctx.synchronize()?;
    ctx.state.active_tool = tool;
    Ok(())
}


//! Machine control: pauses, steppers, watchdogs, host protocol and status

use crate::command::GcodeCommand;
use crate::context::Context;
use crate::dispatcher::{Ack, HandlerResult};
use crate::state::DebugFlags;
use printcore_communication::{BusyState, Response};
use printcore_core::{Axis, AxisFlags};

/// M0, M1 wait for the user
///
/// `P` milliseconds or `S` seconds bound the wait. Without a timeout the
/// wait ends on M108 or when the input has closed for good.
pub fn m0_m1(ctx: &mut Context, cmd: &GcodeCommand) -> HandlerResult {
    let mut timeout_ms = None;
    if let Some(p) = cmd.params.finite('P')? {
        timeout_ms = Some(p.max(0.0) as u64);
    }
    if let Some(s) = cmd.params.finite('S')? {
        timeout_ms = Some((s.max(0.0) * 1000.0) as u64);
    }
    let message = cmd.string_arg().trim();
    if !cmd.has('P') && !cmd.has('S') && !message.is_empty() {
        ctx.state.status_message = message.to_string();
    }

    ctx.synchronize()?;
    ctx.refresh_cmd_timeout();
    let deadline = timeout_ms.map(|ms| ctx.previous_cmd_ms + ms);
    tracing::info!("Waiting for user, timeout {:?} ms", timeout_ms);

    ctx.set_busy(Some(BusyState::PausedForUser));
    ctx.begin_wait();
    let result = ctx.wait_until(|ctx| match deadline {
        _ if ctx.wait_cancelled() => true,
        Some(deadline) => ctx.now_ms() >= deadline,
        None => ctx.input_closed() && ctx.queue.len() <= 1,
    });
    ctx.set_busy(Some(BusyState::Processing));
    result?;
    ctx.refresh_cmd_timeout();
    Ok(Ack::Ok)
}

/// M17 enable all steppers
pub fn m17(ctx: &mut Context, _cmd: &GcodeCommand) -> HandlerResult {
    ctx.planner.enable_steppers();
    Ok(Ack::Ok)
}

/// M18, M84 disable steppers; `S` sets the idle timeout instead
pub fn m18_m84(ctx: &mut Context, cmd: &GcodeCommand) -> HandlerResult {
    if let Some(s) = cmd.params.finite('S')? {
        ctx.config.safety.stepper_inactive_time_ms = (s.max(0.0) * 1000.0) as u64;
        return Ok(Ack::Ok);
    }

    let mut axes = AxisFlags::default();
    for axis in Axis::ALL {
        axes.set(axis, cmd.has(axis.letter()));
    }
    if axes == AxisFlags::default() {
        axes = AxisFlags::ALL;
    }
    ctx.synchronize()?;
    ctx.disable_steppers(axes);
    Ok(Ack::Ok)
}

/// M85 inactivity kill after `S` seconds, 0 disables
pub fn m85(ctx: &mut Context, cmd: &GcodeCommand) -> HandlerResult {
    if let Some(s) = cmd.params.finite('S')? {
        ctx.config.safety.max_inactive_time_ms = (s.max(0.0) * 1000.0) as u64;
    }
    Ok(Ack::Ok)
}

/// M108 break out of a heating or user wait
pub fn m108(ctx: &mut Context, _cmd: &GcodeCommand) -> HandlerResult {
    ctx.cancel_wait();
    Ok(Ack::Ok)
}

/// M110 set the current line number
pub fn m110(ctx: &mut Context, cmd: &GcodeCommand) -> HandlerResult {
    if let Some(n) = cmd.params.finite('N')? {
        ctx.serial.set_last_line(n as i64);
    }
    Ok(Ack::Ok)
}

/// M111 debug flags
pub fn m111(ctx: &mut Context, cmd: &GcodeCommand) -> HandlerResult {
    if let Some(s) = cmd.params.index('S')? {
        ctx.state.debug = DebugFlags(s.min(u8::MAX as usize) as u8);
    }
    let flags = ctx.state.debug;
    ctx.echo(format!("DEBUG:{}", flags));
    Ok(Ack::Ok)
}

/// M112 emergency stop
pub fn m112(ctx: &mut Context, _cmd: &GcodeCommand) -> HandlerResult {
    ctx.kill("Killed by M112");
    Ok(Ack::Ok)
}

/// M115 firmware capabilities
pub fn m115(ctx: &mut Context, _cmd: &GcodeCommand) -> HandlerResult {
    let info = format!(
        "FIRMWARE_NAME:{} {} ({}) PROTOCOL_VERSION:1.0 MACHINE_TYPE:{} EXTRUDER_COUNT:{}",
        ctx.firmware.name,
        ctx.firmware.version,
        ctx.firmware.build_date,
        ctx.config.geometry,
        ctx.config.extruders.count
    );
    ctx.send(Response::raw(info));
    Ok(Ack::Ok)
}

/// M117 status message
pub fn m117(ctx: &mut Context, cmd: &GcodeCommand) -> HandlerResult {
    ctx.state.status_message = cmd.string_arg().to_string();
    tracing::info!("Status: {}", ctx.state.status_message);
    Ok(Ack::Ok)
}

/// M119 endstop states
pub fn m119(ctx: &mut Context, _cmd: &GcodeCommand) -> HandlerResult {
    let state = |triggered: bool| if triggered { "TRIGGERED" } else { "open" };
    let mut lines = vec!["Reporting endstop status".to_string()];
    for axis in Axis::XYZ {
        let i = axis.index();
        let end = if ctx.config.axis(i).home_dir < 0 { "min" } else { "max" };
        let triggered = ctx.planner.endstop_triggered(i);
        lines.push(format!(
            "{}_{}: {}",
            axis.letter().to_ascii_lowercase(),
            end,
            state(triggered)
        ));
    }
    if ctx.probe.is_some() {
        lines.push(format!("z_probe: {}", state(ctx.probe_triggered())));
    }
    for line in lines {
        ctx.send(Response::raw(line));
    }
    Ok(Ack::Ok)
}

/// M120 endstops always on
pub fn m120(ctx: &mut Context, _cmd: &GcodeCommand) -> HandlerResult {
    ctx.state.endstops_always_on = true;
    let mode = ctx.idle_stop_mode();
    ctx.planner.set_stop_mode(mode);
    Ok(Ack::Ok)
}

/// M121 endstops only while homing
pub fn m121(ctx: &mut Context, _cmd: &GcodeCommand) -> HandlerResult {
    ctx.state.endstops_always_on = false;
    let mode = ctx.idle_stop_mode();
    ctx.planner.set_stop_mode(mode);
    Ok(Ack::Ok)
}

/// M999 leave the stopped state and ask the host to resend
pub fn m999(ctx: &mut Context, _cmd: &GcodeCommand) -> HandlerResult {
    ctx.state.running = true;
    let last = ctx.state.stopped_last_line;
    ctx.serial.set_last_line(last);
    tracing::info!("Restarted, resending from line {}", last + 1);
    ctx.send(Response::Resend(last + 1));
    Ok(Ack::Ok)
}

//! Heater and fan commands
//!
//! Targets arrive in the M149 unit and are handed to the thermal
//! collaborator in °C. The waits report the heater state once a second and
//! end early on M108 or when the loop halts.

use super::target_tool;
use crate::command::GcodeCommand;
use crate::context::Context;
use crate::devices::Heater;
use crate::dispatcher::{Ack, HandlerResult};
use crate::state::DebugFlags;
use printcore_communication::Response;
use printcore_core::{GcodeError, TemperatureUnit};

const REPORT_INTERVAL_MS: u64 = 1000;

fn dry_run(ctx: &Context) -> bool {
    ctx.state.debug.contains(DebugFlags::DRYRUN)
}

/// `S` in the active temperature unit, as °C
fn target_celsius(ctx: &Context, cmd: &GcodeCommand, letter: char) -> Result<Option<f64>, GcodeError> {
    Ok(cmd
        .params
        .finite(letter)?
        .map(|v| ctx.state.temperature_unit.to_celsius(v)))
}

fn set_hotend(ctx: &mut Context, tool: usize, celsius: f64) {
    ctx.thermal.set_target(Heater::Tool(tool), celsius);
    if celsius > ctx.config.safety.min_extrude_temp {
        let now = ctx.now_ms();
        ctx.print_timer.start(now);
    }
    tracing::debug!("T{} target {:.1}", tool, celsius);
}

/// `T:<cur> /<target> B:<cur> /<target> T0:<cur> /<target> @:0 B@:0`
pub(crate) fn heater_report(ctx: &Context, tool: usize) -> String {
    let t = &ctx.thermal;
    let mut report = format!(
        "T:{:.1} /{:.1}",
        t.current(Heater::Tool(tool)),
        t.target(Heater::Tool(tool))
    );
    if t.has_bed() {
        report.push_str(&format!(
            " B:{:.1} /{:.1}",
            t.current(Heater::Bed),
            t.target(Heater::Bed)
        ));
    }
    for e in 0..t.tool_count() {
        report.push_str(&format!(
            " T{}:{:.1} /{:.1}",
            e,
            t.current(Heater::Tool(e)),
            t.target(Heater::Tool(e))
        ));
    }
    report.push_str(" @:0");
    if t.has_bed() {
        report.push_str(" B@:0");
    }
    report
}

/// M104 set hotend target
pub fn m104(ctx: &mut Context, cmd: &GcodeCommand) -> HandlerResult {
    let tool = target_tool(ctx, cmd)?;
    if dry_run(ctx) {
        return Ok(Ack::Ok);
    }
    if let Some(celsius) = target_celsius(ctx, cmd, 'S')? {
        set_hotend(ctx, tool, celsius);
    }
    Ok(Ack::Ok)
}

/// M105 report temperatures; carries its own `ok`
pub fn m105(ctx: &mut Context, cmd: &GcodeCommand) -> HandlerResult {
    let tool = target_tool(ctx, cmd)?;
    if ctx.thermal.tool_count() == 0 {
        ctx.error("No thermistors - no temperature");
        return Ok(Ack::Ok);
    }
    let report = heater_report(ctx, tool);
    ctx.send(Response::OkWith(report));
    Ok(Ack::Suppressed)
}

/// M106 fan on, S0-255
pub fn m106(ctx: &mut Context, cmd: &GcodeCommand) -> HandlerResult {
    let speed = cmd.params.finite('S')?.unwrap_or(255.0).clamp(0.0, 255.0);
    ctx.thermal.set_fan_speed(speed as u8);
    Ok(Ack::Ok)
}

/// M107 fan off
pub fn m107(ctx: &mut Context, _cmd: &GcodeCommand) -> HandlerResult {
    ctx.thermal.set_fan_speed(0);
    Ok(Ack::Ok)
}

/// M109 set hotend target and wait
///
/// `S` waits only while heating, `R` also waits for cooling. The
/// temperature has to stay within the window for the residency time.
pub fn m109(ctx: &mut Context, cmd: &GcodeCommand) -> HandlerResult {
    let tool = target_tool(ctx, cmd)?;
    if dry_run(ctx) {
        return Ok(Ack::Ok);
    }
    let no_wait_for_cooling = cmd.has('S');
    let requested = match target_celsius(ctx, cmd, 'S')? {
        Some(c) => Some(c),
        None => target_celsius(ctx, cmd, 'R')?,
    };
    if let Some(celsius) = requested {
        set_hotend(ctx, tool, celsius);
    }

    let heater = Heater::Tool(tool);
    let residency_ms = (ctx.config.thermal.residency_time_s * 1000.0) as u64;
    let window = ctx.config.thermal.window_c;
    let min_extrude = ctx.config.safety.min_extrude_temp;
    let mut the_target = f64::NAN;
    let mut wants_to_cool = false;
    let mut residency_start: Option<u64> = None;
    let mut next_report_ms = 0;

    ctx.set_busy(None);
    ctx.begin_wait();
    let result = ctx.wait_until(|ctx| {
        if ctx.wait_cancelled() {
            return true;
        }
        let target = ctx.thermal.target(heater);
        if target != the_target {
            the_target = target;
            wants_to_cool = ctx.thermal.current(heater) > target;
            if no_wait_for_cooling && wants_to_cool {
                return true;
            }
        }

        let now = ctx.now_ms();
        let temp = ctx.thermal.current(heater);
        if now >= next_report_ms {
            next_report_ms = now + REPORT_INTERVAL_MS;
            let remaining = match residency_start {
                Some(start) => {
                    let left = (start + residency_ms).saturating_sub(now) / 1000;
                    left.to_string()
                }
                None => "?".to_string(),
            };
            ctx.send(Response::raw(format!("T:{:.1} E:{} W:{}", temp, tool, remaining)));
        }
        ctx.refresh_cmd_timeout();

        if (the_target - temp).abs() <= window {
            residency_start.get_or_insert(now);
        } else if residency_start.is_some() {
            residency_start = Some(now);
        }
        if wants_to_cool && temp < min_extrude / 2.0 {
            return true;
        }
        residency_start.is_some_and(|start| now >= start + residency_ms)
    });
    ctx.set_busy(Some(printcore_communication::BusyState::Processing));
    result?;
    Ok(Ack::Ok)
}

/// M140 set bed target
pub fn m140(ctx: &mut Context, cmd: &GcodeCommand) -> HandlerResult {
    if dry_run(ctx) {
        return Ok(Ack::Ok);
    }
    require_bed(ctx)?;
    if let Some(celsius) = target_celsius(ctx, cmd, 'S')? {
        ctx.thermal.set_target(Heater::Bed, celsius);
    }
    Ok(Ack::Ok)
}

fn require_bed(ctx: &Context) -> Result<(), GcodeError> {
    if ctx.thermal.has_bed() {
        Ok(())
    } else {
        Err(GcodeError::Unsupported {
            feature: "Heated bed".to_string(),
        })
    }
}

/// M190 set bed target and wait; `R` also waits for cooling
pub fn m190(ctx: &mut Context, cmd: &GcodeCommand) -> HandlerResult {
    if dry_run(ctx) {
        return Ok(Ack::Ok);
    }
    require_bed(ctx)?;
    let no_wait_for_cooling = cmd.has('S');
    let requested = match target_celsius(ctx, cmd, 'S')? {
        Some(c) => Some(c),
        None => target_celsius(ctx, cmd, 'R')?,
    };
    if let Some(celsius) = requested {
        ctx.thermal.set_target(Heater::Bed, celsius);
        if celsius > ctx.config.safety.min_extrude_temp {
            let now = ctx.now_ms();
            ctx.print_timer.start(now);
        }
    }

    let tool = ctx.state.active_tool;
    let window = ctx.config.thermal.bed_window_c;
    let target = ctx.thermal.target(Heater::Bed);
    let wants_to_cool = ctx.thermal.current(Heater::Bed) > target;
    if no_wait_for_cooling && wants_to_cool {
        return Ok(Ack::Ok);
    }
    let mut next_report_ms = 0;

    ctx.set_busy(None);
    ctx.begin_wait();
    let result = ctx.wait_until(|ctx| {
        if ctx.wait_cancelled() {
            return true;
        }
        let now = ctx.now_ms();
        let bed = ctx.thermal.current(Heater::Bed);
        if now >= next_report_ms {
            next_report_ms = now + REPORT_INTERVAL_MS;
            let hotend = ctx.thermal.current(Heater::Tool(tool));
            ctx.send(Response::raw(format!("T:{:.1} E:{} B:{:.1}", hotend, tool, bed)));
        }
        ctx.refresh_cmd_timeout();
        if wants_to_cool {
            bed <= target + window
        } else {
            bed >= target - window
        }
    });
    ctx.set_busy(Some(printcore_communication::BusyState::Processing));
    result?;
    Ok(Ack::Ok)
}

/// M149 temperature unit: C, F or K
pub fn m149(ctx: &mut Context, cmd: &GcodeCommand) -> HandlerResult {
    for letter in ['C', 'F', 'K'] {
        if cmd.has(letter) {
            if let Some(unit) = TemperatureUnit::from_letter(letter) {
                ctx.state.temperature_unit = unit;
            }
            return Ok(Ack::Ok);
        }
    }
    Err(GcodeError::MissingParameter { param: 'C' })
}

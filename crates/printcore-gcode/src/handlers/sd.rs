//! SD card and print timer commands

use crate::command::GcodeCommand;
use crate::context::Context;
use crate::dispatcher::{Ack, HandlerResult};
use printcore_communication::Response;
use printcore_core::GcodeError;

fn sd_error(reason: impl Into<String>) -> GcodeError {
    GcodeError::SdCard {
        reason: reason.into(),
    }
}

/// M20 list files
pub fn m20(ctx: &mut Context, _cmd: &GcodeCommand) -> HandlerResult {
    let files = ctx
        .sd
        .list()
        .map_err(|e| sd_error(format!("SD card not ready: {}", e)))?;
    ctx.send(Response::raw("Begin file list"));
    for (name, size) in files {
        ctx.send(Response::raw(format!("{} {}", name, size)));
    }
    ctx.send(Response::raw("End file list"));
    Ok(Ack::Ok)
}

/// M21 mount the card
pub fn m21(ctx: &mut Context, _cmd: &GcodeCommand) -> HandlerResult {
    match ctx.sd.mount() {
        Ok(()) => {
            ctx.echo("SD card ok");
            Ok(Ack::Ok)
        }
        Err(e) => {
            tracing::warn!("SD mount failed: {}", e);
            Err(sd_error("SD init fail"))
        }
    }
}

/// M22 release the card
pub fn m22(ctx: &mut Context, _cmd: &GcodeCommand) -> HandlerResult {
    ctx.sd.release();
    Ok(Ack::Ok)
}

/// M23 select a file
pub fn m23(ctx: &mut Context, cmd: &GcodeCommand) -> HandlerResult {
    let name = cmd.string_arg().trim().to_string();
    match ctx.sd.open(&name) {
        Ok(size) => {
            ctx.send(Response::raw(format!("File opened: {} Size: {}", name, size)));
            ctx.send(Response::raw("File selected"));
            Ok(Ack::Ok)
        }
        Err(e) => {
            tracing::debug!("open {}: {}", name, e);
            Err(sd_error(format!("open failed, File: {}.", name)))
        }
    }
}

/// M24 start or resume the selected file
pub fn m24(ctx: &mut Context, _cmd: &GcodeCommand) -> HandlerResult {
    ctx.sd
        .start()
        .map_err(|e| sd_error(format!("Cannot start SD print: {}", e)))?;
    let now = ctx.now_ms();
    if !ctx.print_timer.is_running() && ctx.sd.progress().is_some_and(|(pos, _)| pos == 0) {
        ctx.print_timer.reset();
    }
    ctx.print_timer.start(now);
    Ok(Ack::Ok)
}

/// M25 pause the SD print
pub fn m25(ctx: &mut Context, _cmd: &GcodeCommand) -> HandlerResult {
    ctx.sd.pause();
    let now = ctx.now_ms();
    ctx.print_timer.pause(now);
    Ok(Ack::Ok)
}

/// M27 SD print progress
pub fn m27(ctx: &mut Context, _cmd: &GcodeCommand) -> HandlerResult {
    let report = match ctx.sd.progress() {
        Some((pos, size)) if ctx.sd.is_printing() || pos > 0 => {
            format!("SD printing byte {}/{}", pos, size)
        }
        _ => "Not SD printing".to_string(),
    };
    ctx.send(Response::raw(report));
    Ok(Ack::Ok)
}

/// M31 elapsed print time
pub fn m31(ctx: &mut Context, _cmd: &GcodeCommand) -> HandlerResult {
    let now = ctx.now_ms();
    let seconds = ctx.print_timer.elapsed_ms(now) / 1000;
    let message = format!("{} min, {} sec", seconds / 60, seconds % 60);
    tracing::info!("Print time {}", message);
    ctx.echo(message);
    Ok(Ack::Ok)
}

//! Command dispatcher
//!
//! Takes the oldest queued line, parses it, runs its handler against the
//! [`Context`] and acknowledges it. The queue read index moves only after
//! the command is fully handled, so producers see the slot as occupied for
//! the whole run of the handler.
//!
//! Every accepted line gets exactly one acknowledgment unless its handler
//! printed its own terminator or the loop halted while it ran.

use crate::command::{CommandLetter, GcodeCommand};
use crate::context::Context;
use crate::handlers;
use crate::state::DebugFlags;
use printcore_communication::{BusyState, CommandSource, QueueEntry, Response};
use printcore_core::{GcodeError, Severity};

/// How a handler finished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ack {
    /// Send the normal acknowledgment
    Ok,
    /// The handler sent its own terminator (`ok T:...`)
    Suppressed,
}

pub type HandlerResult = Result<Ack, GcodeError>;

/// Outcome of one [`Dispatcher::step`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// A command was handled
    Handled,
    /// The queue was empty
    Idle,
    /// The control loop is halted for good
    Halted,
}

/// Single consumer of the command queue
pub struct Dispatcher {
    ctx: Context,
    handled: u64,
}

impl Dispatcher {
    pub fn new(ctx: Context) -> Self {
        Self { ctx, handled: 0 }
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    pub fn context_mut(&mut self) -> &mut Context {
        &mut self.ctx
    }

    pub fn into_context(self) -> Context {
        self.ctx
    }

    /// Number of commands handled so far
    pub fn handled(&self) -> u64 {
        self.handled
    }

    /// One pass of the main loop: read input, run at most one command,
    /// do background work
    pub fn step(&mut self) -> StepOutcome {
        if self.ctx.is_halted() {
            self.ctx.idle();
            return StepOutcome::Halted;
        }

        self.ctx.service_transport();
        let outcome = match self.ctx.queue.peek().cloned() {
            Some(entry) => {
                self.execute(&entry);
                self.ctx.queue.advance();
                self.handled += 1;
                StepOutcome::Handled
            }
            None => StepOutcome::Idle,
        };

        self.ctx.idle();
        if self.ctx.is_halted() {
            StepOutcome::Halted
        } else {
            outcome
        }
    }

    /// Handle one queued line and acknowledge it
    pub fn execute(&mut self, entry: &QueueEntry) {
        let ctx = &mut self.ctx;
        ctx.current_source = entry.source;
        ctx.refresh_cmd_timeout();
        if ctx.state.debug.contains(DebugFlags::ECHO) {
            ctx.echo(entry.text.clone());
        }
        tracing::debug!("[{}] {}", entry.source, entry.text);

        let parsed = GcodeCommand::parse(&entry.text);
        let line_number = parsed.as_ref().ok().and_then(|cmd| cmd.line_number);
        let result = parsed.and_then(|cmd| self.dispatch(&cmd));

        let ctx = &mut self.ctx;
        let ack = match result {
            Ok(ack) => ack,
            Err(e) => {
                report_error(ctx, &e);
                Ack::Ok
            }
        };
        if ctx.is_halted() || !entry.echo_ok || ack == Ack::Suppressed {
            return;
        }

        let response = if ctx.config.host.advanced_ok {
            Response::AdvancedOk {
                line: line_number,
                planner_free: ctx.planner.free_blocks(),
                queue_free: ctx.queue.free(),
            }
        } else {
            Response::Ok
        };
        ctx.send(response);
    }

    fn dispatch(&mut self, cmd: &GcodeCommand) -> HandlerResult {
        let ctx = &mut self.ctx;
        if !ctx.is_running() && is_motion(cmd) {
            return match ctx.current_source {
                // the serial reader already told the host
                CommandSource::Serial => Ok(Ack::Ok),
                _ => Err(GcodeError::Stopped),
            };
        }

        let Some(handler) = handlers::lookup(cmd.letter, cmd.code) else {
            return Err(GcodeError::UnknownCommand {
                command: cmd.raw().to_string(),
            });
        };

        ctx.set_busy(Some(BusyState::Processing));
        let result = handler(ctx, cmd);
        ctx.set_busy(None);
        result
    }
}

fn is_motion(cmd: &GcodeCommand) -> bool {
    cmd.letter == CommandLetter::G && cmd.code <= 3
}

/// Turn a handler error into host diagnostics
fn report_error(ctx: &mut Context, e: &GcodeError) {
    match e.severity() {
        Severity::Echo => {
            tracing::debug!("{}", e);
            ctx.echo(e.to_string());
        }
        Severity::Error => {
            tracing::warn!("{}", e);
            ctx.error(e.to_string());
        }
        Severity::Fatal => ctx.kill(&e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_motion_classification() {
        let motion = ["G0 X1", "G1 X1", "G2 I1", "G3 J1"];
        for text in motion {
            assert!(is_motion(&GcodeCommand::parse(text).unwrap()), "{}", text);
        }
        for text in ["G4 P1", "G28", "M3", "T1"] {
            assert!(!is_motion(&GcodeCommand::parse(text).unwrap()), "{}", text);
        }
    }
}

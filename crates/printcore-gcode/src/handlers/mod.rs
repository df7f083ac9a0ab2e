//! Command handlers
//!
//! One function per command, grouped by concern. [`lookup`] maps a letter
//! and code to its handler; pairs without one are unknown commands.

pub mod config;
pub mod machine;
pub mod movement;
pub mod sd;
pub mod temperature;

use crate::command::{CommandLetter, GcodeCommand};
use crate::context::Context;
use crate::dispatcher::HandlerResult;
use printcore_core::GcodeError;

/// Handler signature shared by every command
pub type Handler = fn(&mut Context, &GcodeCommand) -> HandlerResult;

/// Handler for a command letter and code
pub fn lookup(letter: CommandLetter, code: u32) -> Option<Handler> {
    let handler: Handler = match (letter, code) {
        (CommandLetter::G, 0 | 1) => movement::g0_g1,
        (CommandLetter::G, 2 | 3) => movement::g2_g3,
        (CommandLetter::G, 4) => movement::g4,
        (CommandLetter::G, 10) => movement::g10,
        (CommandLetter::G, 11) => movement::g11,
        (CommandLetter::G, 20) => movement::g20,
        (CommandLetter::G, 21) => movement::g21,
        (CommandLetter::G, 28) => movement::g28,
        (CommandLetter::G, 29) => movement::g29,
        (CommandLetter::G, 30) => movement::g30,
        (CommandLetter::G, 90) => movement::g90,
        (CommandLetter::G, 91) => movement::g91,
        (CommandLetter::G, 92) => movement::g92,

        (CommandLetter::M, 0 | 1) => machine::m0_m1,
        (CommandLetter::M, 17) => machine::m17,
        (CommandLetter::M, 18 | 84) => machine::m18_m84,
        (CommandLetter::M, 20) => sd::m20,
        (CommandLetter::M, 21) => sd::m21,
        (CommandLetter::M, 22) => sd::m22,
        (CommandLetter::M, 23) => sd::m23,
        (CommandLetter::M, 24) => sd::m24,
        (CommandLetter::M, 25) => sd::m25,
        (CommandLetter::M, 27) => sd::m27,
        (CommandLetter::M, 31) => sd::m31,
        (CommandLetter::M, 82) => movement::m82,
        (CommandLetter::M, 83) => movement::m83,
        (CommandLetter::M, 85) => machine::m85,
        (CommandLetter::M, 92) => config::m92,
        (CommandLetter::M, 104) => temperature::m104,
        (CommandLetter::M, 105) => temperature::m105,
        (CommandLetter::M, 106) => temperature::m106,
        (CommandLetter::M, 107) => temperature::m107,
        (CommandLetter::M, 108) => machine::m108,
        (CommandLetter::M, 109) => temperature::m109,
        (CommandLetter::M, 110) => machine::m110,
        (CommandLetter::M, 111) => machine::m111,
        (CommandLetter::M, 112) => machine::m112,
        (CommandLetter::M, 114) => movement::m114,
        (CommandLetter::M, 115) => machine::m115,
        (CommandLetter::M, 117) => machine::m117,
        (CommandLetter::M, 119) => machine::m119,
        (CommandLetter::M, 120) => machine::m120,
        (CommandLetter::M, 121) => machine::m121,
        (CommandLetter::M, 140) => temperature::m140,
        (CommandLetter::M, 149) => temperature::m149,
        (CommandLetter::M, 190) => temperature::m190,
        (CommandLetter::M, 200) => config::m200,
        (CommandLetter::M, 201) => config::m201,
        (CommandLetter::M, 203) => config::m203,
        (CommandLetter::M, 204) => config::m204,
        (CommandLetter::M, 205) => config::m205,
        (CommandLetter::M, 206) => config::m206,
        (CommandLetter::M, 207) => config::m207,
        (CommandLetter::M, 208) => config::m208,
        (CommandLetter::M, 209) => config::m209,
        (CommandLetter::M, 218) => config::m218,
        (CommandLetter::M, 220) => config::m220,
        (CommandLetter::M, 221) => config::m221,
        (CommandLetter::M, 400) => movement::m400,
        (CommandLetter::M, 401) => movement::m401,
        (CommandLetter::M, 402) => movement::m402,
        (CommandLetter::M, 410) => movement::m410,
        (CommandLetter::M, 420) => movement::m420,
        (CommandLetter::M, 428) => config::m428,
        (CommandLetter::M, 500) => config::m500,
        (CommandLetter::M, 501) => config::m501,
        (CommandLetter::M, 502) => config::m502,
        (CommandLetter::M, 503) => config::m503,
        (CommandLetter::M, 665) => config::m665,
        (CommandLetter::M, 666) => config::m666,
        (CommandLetter::M, 851) => config::m851,
        (CommandLetter::M, 999) => machine::m999,

        (CommandLetter::T, _) => movement::tool_change,
        _ => return None,
    };
    Some(handler)
}

/// Tool selected by a `T` parameter, or the active one
pub(crate) fn target_tool(ctx: &Context, cmd: &GcodeCommand) -> Result<usize, GcodeError> {
    match cmd.params.finite('T')? {
        None => Ok(ctx.state.active_tool),
        Some(t) if t >= 0.0 && (t as usize) < ctx.config.extruders.count => Ok(t as usize),
        Some(t) => Err(GcodeError::InvalidExtruder {
            tool: t.max(0.0) as u32,
        }),
    }
}

/// Value of a parameter in the active linear unit, converted to millimetres
pub(crate) fn linear(ctx: &Context, cmd: &GcodeCommand, letter: char) -> Result<Option<f64>, GcodeError> {
    Ok(cmd.params.finite(letter)?.map(|v| ctx.state.to_mm(v)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_known_and_unknown() {
        assert!(lookup(CommandLetter::G, 1).is_some());
        assert!(lookup(CommandLetter::M, 503).is_some());
        assert!(lookup(CommandLetter::T, 3).is_some());
        assert!(lookup(CommandLetter::M, 9999).is_none());
        assert!(lookup(CommandLetter::G, 5).is_none());
    }
}

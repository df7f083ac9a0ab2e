//! Macro injection
//!
//! A multi-line script handed over by firmware code (startup commands, SD
//! autostart) is fed into the command queue one line at a time. It has
//! priority over the serial and SD producers while any line remains.

use crate::queue::{CommandQueue, CommandSource};
use crate::response::{Response, ResponseSink};

/// Feeds one script into the queue, line by line
#[derive(Debug, Default)]
pub struct MacroInjector {
    script: Option<String>,
    cursor: usize,
}

impl MacroInjector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start injecting `script`, replacing any script still in flight
    pub fn inject(&mut self, script: &str) {
        if self.is_active() {
            tracing::warn!("Replacing unfinished injected script");
        }
        self.script = if script.trim().is_empty() {
            None
        } else {
            Some(script.to_string())
        };
        self.cursor = 0;
    }

    pub fn is_active(&self) -> bool {
        self.script.is_some()
    }

    /// Queue the next line of the script
    ///
    /// The cursor moves past a line only when the queue accepted it, so a
    /// full queue simply retries on the next call. Returns whether lines
    /// remain.
    pub fn drain(&mut self, queue: &mut CommandQueue, out: &mut dyn ResponseSink) -> bool {
        let Some(script) = self.script.as_deref() else {
            return false;
        };

        let rest = &script[self.cursor..];
        let (line, consumed, last) = match rest.find('\n') {
            Some(end) => (&rest[..end], end + 1, false),
            None => (rest, rest.len(), true),
        };
        let line = line.trim_end_matches('\r').trim();

        let accepted = line.is_empty() || queue.try_enqueue(line, false, CommandSource::Injected);
        if accepted {
            if !line.is_empty() {
                out.send(Response::echo(format!("enqueueing \"{}\"", line)));
            }
            self.cursor += consumed;
            if last || self.cursor >= script.len() {
                self.script = None;
                self.cursor = 0;
            }
        }
        self.is_active()
    }

    /// Abandon the script in flight
    pub fn clear(&mut self) {
        self.script = None;
        self.cursor = 0;
    }
}
